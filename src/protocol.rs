//! Protocol primitives (spec.md §4.D): one packet builder per outbound SFTP
//! operation, and a single reply parser shared by all of them. `client.rs`
//! pairs these with the request table and transport to realize the
//! send/recv function pairs spec.md describes; this module only knows
//! about bytes and the operation table, not about requests or sockets.
//!
//! Grounded in the teacher's `ClientPacket`/`ServerPacket` split
//! (src/sftp/packet.rs), generalized to the full operation table spec.md
//! §4.D lists (the teacher only ever got as far as Init/OpenDir/ReadDir/
//! Close/RealPath/Stat/Open, and left `Open`'s attrs unimplemented).

use crate::attrs::{DirEntry, FileAttributes, FileHandle, OpenFlags};
use crate::codec::{Decoder, Encoder};
use crate::constants::*;
use crate::error::{SftpError, StatusCode};
use crate::transport::RawPacket;

// ---- Outbound packet builders -------------------------------------------

pub fn build_init(version: u32) -> Vec<u8> {
    Encoder::new(SSH_FXP_INIT).add_u32(version).finish()
}

pub fn build_realpath(id: u32, path: &str) -> Vec<u8> {
    Encoder::new(SSH_FXP_REALPATH)
        .add_u32(id)
        .add_string(path.as_bytes())
        .finish()
}

pub fn build_open(id: u32, path: &str, pflags: OpenFlags, attrs: &FileAttributes) -> Vec<u8> {
    Encoder::new(SSH_FXP_OPEN)
        .add_u32(id)
        .add_string(path.as_bytes())
        .add_u32(pflags.bits())
        .add_attributes(attrs)
        .finish()
}

pub fn build_opendir(id: u32, path: &str) -> Vec<u8> {
    Encoder::new(SSH_FXP_OPENDIR)
        .add_u32(id)
        .add_string(path.as_bytes())
        .finish()
}

pub fn build_close(id: u32, handle: &FileHandle) -> Vec<u8> {
    Encoder::new(SSH_FXP_CLOSE)
        .add_u32(id)
        .add_string(handle.as_bytes())
        .finish()
}

pub fn build_stat(id: u32, path: &str) -> Vec<u8> {
    Encoder::new(SSH_FXP_STAT)
        .add_u32(id)
        .add_string(path.as_bytes())
        .finish()
}

pub fn build_fstat(id: u32, handle: &FileHandle) -> Vec<u8> {
    Encoder::new(SSH_FXP_FSTAT)
        .add_u32(id)
        .add_string(handle.as_bytes())
        .finish()
}

pub fn build_setstat(id: u32, path: &str, attrs: &FileAttributes) -> Vec<u8> {
    Encoder::new(SSH_FXP_SETSTAT)
        .add_u32(id)
        .add_string(path.as_bytes())
        .add_attributes(attrs)
        .finish()
}

pub fn build_fsetstat(id: u32, handle: &FileHandle, attrs: &FileAttributes) -> Vec<u8> {
    Encoder::new(SSH_FXP_FSETSTAT)
        .add_u32(id)
        .add_string(handle.as_bytes())
        .add_attributes(attrs)
        .finish()
}

pub fn build_mkdir(id: u32, path: &str, attrs: &FileAttributes) -> Vec<u8> {
    Encoder::new(SSH_FXP_MKDIR)
        .add_u32(id)
        .add_string(path.as_bytes())
        .add_attributes(attrs)
        .finish()
}

pub fn build_rmdir(id: u32, path: &str) -> Vec<u8> {
    Encoder::new(SSH_FXP_RMDIR)
        .add_u32(id)
        .add_string(path.as_bytes())
        .finish()
}

pub fn build_remove(id: u32, path: &str) -> Vec<u8> {
    Encoder::new(SSH_FXP_REMOVE)
        .add_u32(id)
        .add_string(path.as_bytes())
        .finish()
}

pub fn build_rename(id: u32, old_path: &str, new_path: &str) -> Vec<u8> {
    Encoder::new(SSH_FXP_RENAME)
        .add_u32(id)
        .add_string(old_path.as_bytes())
        .add_string(new_path.as_bytes())
        .finish()
}

pub fn build_readdir(id: u32, handle: &FileHandle) -> Vec<u8> {
    Encoder::new(SSH_FXP_READDIR)
        .add_u32(id)
        .add_string(handle.as_bytes())
        .finish()
}

pub fn build_read(id: u32, handle: &FileHandle, offset: u64, len: u32) -> Vec<u8> {
    Encoder::new(SSH_FXP_READ)
        .add_u32(id)
        .add_string(handle.as_bytes())
        .add_u64(offset)
        .add_u32(len)
        .finish()
}

pub fn build_write(id: u32, handle: &FileHandle, offset: u64, data: &[u8]) -> Vec<u8> {
    Encoder::new(SSH_FXP_WRITE)
        .add_u32(id)
        .add_string(handle.as_bytes())
        .add_u64(offset)
        .add_string(data)
        .finish()
}

// ---- Inbound reply parsing -----------------------------------------------

/// A parsed server reply, independent of which operation it answers; the
/// caller (client.rs) already knows what it sent and checks the variant it
/// expects (spec.md §4.D's per-operation "Inbound success" column).
#[derive(Debug)]
pub enum ServerReply {
    Version(u32),
    Handle(FileHandle),
    Name(Vec<DirEntry>),
    Status { code: StatusCode, message: String },
    Data(Vec<u8>),
    Attrs(FileAttributes),
}

/// The request ID carried by a reply, if any (VERSION has none — spec.md
/// §6: "Request ID ... for every request- or response-carrying packet
/// (INIT/VERSION excepted)").
pub fn peek_request_id(raw: &RawPacket) -> Result<Option<u32>, SftpError> {
    if raw.packet_type == SSH_FXP_VERSION {
        return Ok(None);
    }
    let mut dec = Decoder::new(&raw.body);
    Ok(Some(dec.get_u32()?))
}

/// Parses one full reply body, starting from byte 0 (`raw.body` is
/// whatever followed the packet-type byte). [`peek_request_id`] is used
/// first only to correlate the reply against the request table; this
/// function re-reads the id itself from scratch so it stays the single
/// owner of each packet type's field layout.
pub fn parse_reply(raw: &RawPacket) -> Result<ServerReply, SftpError> {
    let mut dec = Decoder::new(&raw.body);

    match raw.packet_type {
        SSH_FXP_VERSION => {
            let version = dec.get_u32()?;
            Ok(ServerReply::Version(version))
        }
        SSH_FXP_HANDLE => {
            let _id = dec.get_u32()?;
            let handle = dec.get_string()?.to_vec();
            Ok(ServerReply::Handle(FileHandle(handle)))
        }
        SSH_FXP_STATUS => {
            let _id = dec.get_u32()?;
            let code = StatusCode::from_u32(dec.get_u32()?);
            let message = dec.get_utf8_string()?;
            if !dec.is_empty() {
                let _lang = dec.get_string()?;
            }
            Ok(ServerReply::Status { code, message })
        }
        SSH_FXP_DATA => {
            let _id = dec.get_u32()?;
            let data = dec.get_string()?.to_vec();
            Ok(ServerReply::Data(data))
        }
        SSH_FXP_ATTRS => {
            let _id = dec.get_u32()?;
            let attrs = dec.get_attributes()?;
            Ok(ServerReply::Attrs(attrs))
        }
        SSH_FXP_NAME => {
            let _id = dec.get_u32()?;
            let count = dec.get_u32()?;

            // Defeat resource-exhaustion attacks via a lying count
            // (spec.md §4.D "READDIR"): at least MIN_NAME_ENTRY_BYTES bytes
            // must remain per claimed entry, and the count itself must not
            // overflow when multiplied out.
            let remaining = dec.remaining() as u64;
            if (count as u64).saturating_mul(MIN_NAME_ENTRY_BYTES as u64) > remaining {
                return Err(SftpError::protocol("malformed FXP_NAME packet"));
            }

            let mut entries = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let filename = dec.get_utf8_string()?;
                let long_name = dec.get_utf8_string()?;
                let attrs = dec.get_attributes()?;
                entries.push(DirEntry {
                    filename,
                    long_name,
                    attrs,
                });
            }
            Ok(ServerReply::Name(entries))
        }
        other => Err(SftpError::protocol(format!(
            "unexpected packet type {other} from server"
        ))),
    }
}

// ---- Per-operation reply validation ---------------------------------------
//
// `parse_reply` stays agnostic of which operation a reply answers; these
// helpers apply the "inbound success" shape each operation in spec.md §4.D's
// table expects, turning a mismatched reply (wrong variant, or a STATUS that
// isn't the one success code the operation allows) into a `SftpError`.
// `client.rs` calls exactly one of these per `recv_*` method.

fn as_server_error(code: StatusCode, request_id: u32, message: String) -> SftpError {
    SftpError::Server {
        code,
        request_id,
        message,
    }
}

/// HANDLE on success (OPEN, OPENDIR).
pub fn expect_handle(reply: ServerReply, request_id: u32) -> Result<FileHandle, SftpError> {
    match reply {
        ServerReply::Handle(h) => Ok(h),
        ServerReply::Status { code, message } => Err(as_server_error(code, request_id, message)),
        _ => Err(SftpError::protocol("expected HANDLE reply")),
    }
}

/// ATTRS on success (STAT, FSTAT, LSTAT).
pub fn expect_attrs(reply: ServerReply, request_id: u32) -> Result<FileAttributes, SftpError> {
    match reply {
        ServerReply::Attrs(a) => Ok(a),
        ServerReply::Status { code, message } => Err(as_server_error(code, request_id, message)),
        _ => Err(SftpError::protocol("expected ATTRS reply")),
    }
}

/// Bare STATUS(OK) on success (CLOSE, SETSTAT, FSETSTAT, MKDIR, RMDIR,
/// REMOVE, RENAME, WRITE). Any other status code is a server error; any
/// other reply shape is a protocol error.
pub fn expect_status_ok(reply: ServerReply, request_id: u32) -> Result<(), SftpError> {
    match reply {
        ServerReply::Status {
            code: StatusCode::Ok,
            ..
        } => Ok(()),
        ServerReply::Status { code, message } => Err(as_server_error(code, request_id, message)),
        _ => Err(SftpError::protocol("expected STATUS reply")),
    }
}

/// NAME with exactly one entry on success (REALPATH). Spec.md §4.D notes
/// REALPATH only ever returns one name in this protocol version; a server
/// that sends more is a protocol error, not a silently-accepted list.
pub fn expect_single_name(reply: ServerReply, request_id: u32) -> Result<DirEntry, SftpError> {
    match reply {
        ServerReply::Name(mut entries) if entries.len() == 1 => Ok(entries.remove(0)),
        ServerReply::Name(entries) => Err(SftpError::protocol(format!(
            "REALPATH returned {} names, expected exactly one",
            entries.len()
        ))),
        ServerReply::Status { code, message } => Err(as_server_error(code, request_id, message)),
        _ => Err(SftpError::protocol("expected NAME reply")),
    }
}

/// NAME on success, or `None` once STATUS(EOF) signals the listing is
/// exhausted (READDIR).
pub fn expect_names_or_eof(
    reply: ServerReply,
    request_id: u32,
) -> Result<Option<Vec<DirEntry>>, SftpError> {
    match reply {
        ServerReply::Name(entries) => Ok(Some(entries)),
        ServerReply::Status {
            code: StatusCode::Eof,
            ..
        } => Ok(None),
        ServerReply::Status { code, message } => Err(as_server_error(code, request_id, message)),
        _ => Err(SftpError::protocol("expected NAME or STATUS(EOF) reply")),
    }
}

/// A READ sub-request's outcome: either a block of data, or EOF. Servers use
/// both a `STATUS(EOF)` and (per the §9 design note) a zero-length `DATA` to
/// signal end of file; the transfer engine is the layer that reconciles the
/// two conventions, so this only distinguishes data-with-content from EOF.
#[derive(Debug)]
pub enum ReadOutcome {
    Data(Vec<u8>),
    Eof,
}

/// DATA on success, EOF via STATUS (READ). Rejects a server that returns
/// more bytes than were requested — spec.md §4.E treats that as a protocol
/// violation, not a pipelining convenience.
pub fn expect_read_data(
    reply: ServerReply,
    request_id: u32,
    requested_len: u32,
) -> Result<ReadOutcome, SftpError> {
    match reply {
        ServerReply::Data(bytes) => {
            if bytes.len() as u64 > requested_len as u64 {
                return Err(SftpError::protocol(
                    "server returned more bytes than requested from FXP_READ",
                ));
            }
            Ok(ReadOutcome::Data(bytes))
        }
        ServerReply::Status {
            code: StatusCode::Eof,
            ..
        } => Ok(ReadOutcome::Eof),
        ServerReply::Status { code, message } => Err(as_server_error(code, request_id, message)),
        _ => Err(SftpError::protocol("expected DATA or STATUS(EOF) reply")),
    }
}
