//! Shared fixtures for the integration suite: an in-memory duplex channel
//! standing in for an authenticated `ssh2::Channel`, so these tests exercise
//! the full `SftpClient` stack without a network or a real server.
//!
//! This mirrors the crate's own internal `test_support::FakeChannel`, but
//! lives here instead of reaching into the library's private test-only
//! items — `tests/` only sees the crate's public surface, same as the
//! teacher's own `tests/integration/test_utils.rs` stayed outside `src/`.

use std::collections::VecDeque;
use std::io::{self, Read, Write};

use sftp_core::codec::{Decoder, Encoder};
use sftp_core::constants::{SSH_FXP_READ, SSH_FXP_STATUS, SSH_FXP_VERSION, SSH_FXP_WRITE};

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

    pub fn preloaded_with_version(version: u32) -> Self {
        let mut chan = FakeChannel::new();
        chan.push_inbound_frame(Encoder::new(SSH_FXP_VERSION).add_u32(version).finish());
        chan
    }

    pub fn push_inbound_frame(&mut self, framed: Vec<u8>) {
        self.inbound.extend(framed);
    }

    pub fn inbound_is_empty(&self) -> bool {
        self.inbound.is_empty()
    }

    fn drain_outbound_packets(&mut self) -> Vec<(u8, Vec<u8>)> {
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
            packets.push((packet_type, body));
            pos += 4 + len;
        }
        self.outbound = buf[pos..].to_vec();
        packets
    }

    pub fn take_sent_reads(&mut self) -> Vec<(u32, u64, u32)> {
        self.drain_outbound_packets()
            .into_iter()
            .filter(|(t, _)| *t == SSH_FXP_READ)
            .map(|(_, body)| {
                let mut dec = Decoder::new(&body);
                let id = dec.get_u32().unwrap();
                let _handle = dec.get_string().unwrap();
                let offset = dec.get_u64().unwrap();
                let len = dec.get_u32().unwrap();
                (id, offset, len)
            })
            .collect()
    }

    pub fn take_sent_writes(&mut self) -> Vec<(u32, u64, Vec<u8>)> {
        self.drain_outbound_packets()
            .into_iter()
            .filter(|(t, _)| *t == SSH_FXP_WRITE)
            .map(|(_, body)| {
                let mut dec = Decoder::new(&body);
                let id = dec.get_u32().unwrap();
                let _handle = dec.get_string().unwrap();
                let offset = dec.get_u64().unwrap();
                let data = dec.get_string().unwrap().to_vec();
                (id, offset, data)
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

pub fn status_frame(request_id: u32, code: u32, message: &str) -> Vec<u8> {
    Encoder::new(SSH_FXP_STATUS)
        .add_u32(request_id)
        .add_u32(code)
        .add_string(message.as_bytes())
        .add_string(b"")
        .finish()
}
