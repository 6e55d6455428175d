//! Error taxonomy (spec.md §4.F, §7) and the process-visible "last error" state.
//!
//! The teacher repo (`ferric_ftp::sftp::error::SftpError`) kept a global-ish
//! error enum with `IoError`/`ServerError`/`ClientError`/`UnknownError`
//! variants. This generalizes it along the three families spec.md §7 names,
//! and — per the §9 design note — drops the idea of a *global* last-error in
//! favor of a field the caller owns (`ErrorState`, held on `SftpClient`).

use std::fmt;

use crate::constants::*;

/// Numeric SSH_FX status codes (spec.md §4.D "STATUS handling").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok,
    Eof,
    NoSuchFile,
    PermissionDenied,
    Failure,
    BadMessage,
    NoConnection,
    ConnectionLost,
    OpUnsupported,
    /// A code outside 0..8. Carries the raw value for diagnostics.
    Unknown(u32),
}

impl StatusCode {
    pub fn from_u32(code: u32) -> Self {
        match code {
            0 => StatusCode::Ok,
            1 => StatusCode::Eof,
            2 => StatusCode::NoSuchFile,
            3 => StatusCode::PermissionDenied,
            4 => StatusCode::Failure,
            5 => StatusCode::BadMessage,
            6 => StatusCode::NoConnection,
            7 => StatusCode::ConnectionLost,
            8 => StatusCode::OpUnsupported,
            other => StatusCode::Unknown(other),
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            StatusCode::Ok => 0,
            StatusCode::Eof => 1,
            StatusCode::NoSuchFile => 2,
            StatusCode::PermissionDenied => 3,
            StatusCode::Failure => 4,
            StatusCode::BadMessage => 5,
            StatusCode::NoConnection => 6,
            StatusCode::ConnectionLost => 7,
            StatusCode::OpUnsupported => 8,
            StatusCode::Unknown(v) => v,
        }
    }

    /// Fixed English phrase for the code, matching spec.md §7 ("fixed
    /// English phrase for codes 0..8 or 'unknown error code' otherwise").
    pub fn message(self) -> &'static str {
        match self {
            StatusCode::Ok => "success",
            StatusCode::Eof => "end of file",
            StatusCode::NoSuchFile => "no such file or directory",
            StatusCode::PermissionDenied => "permission denied",
            StatusCode::Failure => "failure",
            StatusCode::BadMessage => "bad message",
            StatusCode::NoConnection => "no connection",
            StatusCode::ConnectionLost => "connection lost",
            StatusCode::OpUnsupported => "operation unsupported",
            StatusCode::Unknown(_) => "unknown error code",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str((*self).message())
    }
}

/// Everything that can go wrong, grouped per spec.md §7's three families.
#[derive(Debug)]
pub enum SftpError {
    /// Family 1: transport failure. The session is dead; nothing retries.
    Io(std::io::Error),
    /// Family 2: protocol error — malformed, unexpected, or inconsistent
    /// packet. Corresponds to error-state kind −1.
    Protocol(String),
    /// Family 3: server-reported STATUS the caller's operation didn't
    /// expect as success.
    Server {
        code: StatusCode,
        request_id: u32,
        message: String,
    },
    /// The server's VERSION reply named a version newer than this crate
    /// speaks (spec.md §1 Non-goals, §4.D "INIT").
    VersionTooNew(u32),
}

impl SftpError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        SftpError::Protocol(msg.into())
    }
}

impl fmt::Display for SftpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SftpError::Io(e) => write!(f, "transport error: {e}"),
            SftpError::Protocol(msg) => write!(f, "protocol error: {msg}"),
            SftpError::Server {
                code,
                request_id,
                message,
            } => write!(
                f,
                "server error on request {request_id}: {code} ({message})"
            ),
            SftpError::VersionTooNew(v) => {
                write!(f, "server requires SFTP version {v} > {SFTP_VERSION} supported")
            }
        }
    }
}

impl std::error::Error for SftpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SftpError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SftpError {
    fn from(e: std::io::Error) -> Self {
        SftpError::Io(e)
    }
}

/// Kind half of the process-visible "last error" (spec.md §4.F). `-1` in the
/// reference maps to `Internal` here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Internal,
    Status(StatusCode),
}

/// The last-error channel. Lossy: each call to `set` overwrites whatever was
/// there, exactly like the reference's global fields (spec.md §4.F).
#[derive(Debug, Clone)]
pub struct ErrorState {
    kind: ErrorKind,
    message: String,
}

impl Default for ErrorState {
    fn default() -> Self {
        ErrorState {
            kind: ErrorKind::Internal,
            message: String::new(),
        }
    }
}

impl ErrorState {
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn set_internal(&mut self, message: impl Into<String>) {
        self.kind = ErrorKind::Internal;
        self.message = message.into();
    }

    pub fn set_status(&mut self, code: StatusCode) {
        self.kind = ErrorKind::Status(code);
        self.message = code.message().to_string();
    }

    /// Records whichever `SftpError` the caller just observed, matching
    /// spec.md §4.F's taxonomy.
    pub fn record(&mut self, err: &SftpError) {
        match err {
            SftpError::Server { code, .. } => {
                self.set_status(*code);
            }
            other => self.set_internal(other.to_string()),
        }
    }
}
