//! Framed transport adapter (spec.md §4.B): length-prefixed framing over a
//! caller-supplied byte-oriented channel.
//!
//! The teacher wired `SftpSession` directly to `ssh2::Channel`
//! (src/sftp/session.rs). This generalizes that to any `Read + Write`, per
//! the §9 design note ("the SSH transport ... is assumed; the core calls
//! into it through two primitives only"). `ssh2::Channel` satisfies the
//! bound as-is, so existing callers need no adapter of their own.

use std::io::{self, Read, Write};

use log::{debug, trace};

/// One inbound frame: the packet type byte plus everything after it, with
/// the 4-byte length prefix already stripped (spec.md §4.B).
pub struct RawPacket {
    pub packet_type: u8,
    pub body: Vec<u8>,
}

/// Length-prefixed framing over a transport that can fail truncated reads
/// and writes (spec.md §4.B, §6). Does no further interpretation of the
/// body — that's `codec`'s job.
pub struct FramedTransport<T> {
    inner: T,
}

impl<T: Read + Write> FramedTransport<T> {
    pub fn new(inner: T) -> Self {
        FramedTransport { inner }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Sends a fully-built packet body (as returned by
    /// [`crate::codec::Encoder::finish`], which already carries the length
    /// prefix). Any short write is fatal per spec.md §4.B/§6 — the session
    /// is dead afterward.
    pub fn send_framed(&mut self, framed: &[u8]) -> io::Result<()> {
        trace!("sending {} bytes ({} byte body)", framed.len(), framed.len().saturating_sub(4));
        self.inner.write_all(framed)?;
        self.inner.flush()
    }

    /// Reads one frame: 4-byte big-endian length, then that many body
    /// bytes. The first body byte is the packet type (spec.md §4.B).
    pub fn recv_framed(&mut self) -> io::Result<RawPacket> {
        let mut len_buf = [0u8; 4];
        self.inner.read_exact(&mut len_buf)?;
        let len = u32::from_be_bytes(len_buf) as usize;
        if len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "zero-length SFTP packet",
            ));
        }

        let mut body = vec![0u8; len];
        self.inner.read_exact(&mut body)?;
        let packet_type = body[0];
        debug!("received packet type {packet_type} ({len} byte body)");
        Ok(RawPacket {
            packet_type,
            body: body.split_off(1),
        })
    }
}
