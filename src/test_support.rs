//! In-memory duplex transport standing in for an `ssh2::Channel`, so the
//! rest of the crate can be exercised without a real SSH connection.
//!
//! Grounded in the teacher's `MockSession` (src/sftp/test_utils.rs), which
//! did the same job for the teacher's own reader/writer trait pair. This
//! version implements plain `Read + Write` instead, since that's the bound
//! [`crate::transport::FramedTransport`] generalized the teacher's
//! `ssh2::Channel`-only code to.

use std::collections::VecDeque;
use std::io::{self, Read, Write};

use crate::codec::{Decoder, Encoder};
use crate::constants::{SSH_FXP_READ, SSH_FXP_VERSION, SSH_FXP_WRITE};
use crate::transport::RawPacket;

/// A queue of pre-framed inbound bytes feeding `read`, and a capture buffer
/// for whatever gets `write`n. `read` returns `Ok(0)` once the inbound queue
/// is empty — a real `ssh2::Channel` would block instead, but tests use this
/// as a deliberate "nothing more queued" sentinel via
/// [`crate::client::SftpClient::try_recv_event`].
pub struct FakeChannel {
    inbound: VecDeque<u8>,
    outbound: Vec<u8>,
}

impl FakeChannel {
    pub fn new() -> Self {
        FakeChannel {
            inbound: VecDeque::new(),
            outbound: Vec::new(),
        }
    }

    /// A channel with a VERSION reply already queued, as if a server just
    /// answered INIT — the common starting point for client-level tests.
    pub fn preloaded_with_version(version: u32) -> Self {
        let mut chan = FakeChannel::new();
        let frame = Encoder::new(SSH_FXP_VERSION).add_u32(version).finish();
        chan.push_inbound_frame(frame);
        chan
    }

    /// Queues one fully-framed packet (length prefix included, as returned
    /// by [`Encoder::finish`]) to be read back later.
    pub fn push_inbound_frame(&mut self, framed: Vec<u8>) {
        self.inbound.extend(framed);
    }

    pub fn inbound_is_empty(&self) -> bool {
        self.inbound.is_empty()
    }

    /// Parses and removes every complete frame written so far, regardless
    /// of packet type. Any trailing partial frame is left queued.
    fn drain_outbound_packets(&mut self) -> Vec<RawPacket> {
        let buf = std::mem::take(&mut self.outbound);
        let mut packets = Vec::new();
        let mut pos = 0;
        while pos + 4 <= buf.len() {
            let len = u32::from_be_bytes(buf[pos..pos + 4].try_into().unwrap()) as usize;
            if pos + 4 + len > buf.len() {
                break;
            }
            let packet_type = buf[pos + 4];
            let body = buf[pos + 5..pos + 4 + len].to_vec();
            packets.push(RawPacket { packet_type, body });
            pos += 4 + len;
        }
        self.outbound = buf[pos..].to_vec();
        packets
    }

    /// Drains every complete outbound READ packet sent so far:
    /// `(request_id, offset, requested_len)`.
    pub fn take_sent_reads(&mut self) -> Vec<(u32, u64, u32)> {
        self.drain_outbound_packets()
            .into_iter()
            .filter(|p| p.packet_type == SSH_FXP_READ)
            .map(|p| {
                let mut dec = Decoder::new(&p.body);
                let id = dec.get_u32().unwrap();
                let _handle = dec.get_string().unwrap();
                let offset = dec.get_u64().unwrap();
                let len = dec.get_u32().unwrap();
                (id, offset, len)
            })
            .collect()
    }

    /// Drains every complete outbound WRITE packet sent so far:
    /// `(request_id, offset)`.
    pub fn take_sent_writes(&mut self) -> Vec<(u32, u64)> {
        self.drain_outbound_packets()
            .into_iter()
            .filter(|p| p.packet_type == SSH_FXP_WRITE)
            .map(|p| {
                let mut dec = Decoder::new(&p.body);
                let id = dec.get_u32().unwrap();
                let _handle = dec.get_string().unwrap();
                let offset = dec.get_u64().unwrap();
                (id, offset)
            })
            .collect()
    }
}

impl Default for FakeChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl Read for FakeChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.inbound.is_empty() {
            return Ok(0);
        }
        let n = buf.len().min(self.inbound.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.inbound.pop_front().unwrap();
        }
        Ok(n)
    }
}

impl Write for FakeChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.outbound.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
