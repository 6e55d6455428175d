//! SFTP v3 wire codec, request correlation, and pipelined transfer engine
//! over a caller-supplied transport.
//!
//! This crate does not speak SSH itself: `T: Read + Write` is expected to
//! already be an authenticated SSH channel with the `sftp` subsystem
//! requested (an `ssh2::Channel` satisfies this directly). What's here is
//! everything above that line: [`codec`] turns bytes into typed fields and
//! back, [`transport`] frames those bytes over the channel, [`requests`]
//! correlates requests to responses, [`protocol`] builds/parses one packet
//! per SFTP operation, [`transfer`] pipelines READ/WRITE sub-requests to
//! keep a high-latency link saturated, and [`client`] ties all of the above
//! together into `SftpClient`.

pub mod attrs;
pub mod client;
pub mod codec;
pub mod constants;
pub mod error;
pub mod protocol;
pub mod requests;
pub mod transfer;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use attrs::{DirEntry, FileAttributes, FileHandle, OpenFlags};
pub use client::{ClientEvent, SftpClient, TransferEvent};
pub use error::{ErrorKind, ErrorState, SftpError, StatusCode};
pub use transfer::{Download, TransferOptions, Upload};
