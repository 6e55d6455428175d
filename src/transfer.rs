//! Pipelined transfer engine (spec.md §4.E): keeps many read (or write)
//! sub-requests in flight against one file handle to saturate high-latency
//! links, while delivering downloaded blocks to the caller strictly in
//! submission order regardless of arrival order.
//!
//! Nothing like this exists in the teacher repo — `ferric_ftp` never got
//! past directory listing (src/sftp/commands.rs has no get/put despite
//! `SftpCommand::Get`/`Put` existing as unimplemented variants). This is
//! "the hard part" spec.md §1 calls out (item 3), built from spec.md §3's
//! "Transfer state" data model and §4.E's algorithm, with the §9 design
//! note honored: the reference's manual linked list of sub-requests becomes
//! a `VecDeque` of slot ids plus a `HashMap` for out-of-order completion,
//! rather than pointer-chasing nodes.

use std::collections::{HashMap, VecDeque};
use std::io::{Read, Write};

use log::{debug, trace, warn};

use crate::attrs::FileHandle;
use crate::client::SftpClient;
use crate::error::SftpError;
use crate::protocol::{self, ReadOutcome};
use crate::transport::RawPacket;

/// Tunables for one transfer (spec.md §3 "window budget", §4.E block size).
#[derive(Debug, Clone, Copy)]
pub struct TransferOptions {
    /// Maximum total bytes in outstanding sub-requests (spec.md §4.E:
    /// "default 1,048,576 bytes").
    pub window: usize,
    /// Size of each read/write sub-request (spec.md §4.E: "fixed size
    /// 32,768 bytes").
    pub block_size: usize,
}

impl Default for TransferOptions {
    fn default() -> Self {
        TransferOptions {
            window: 1_048_576,
            block_size: 32_768,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubState {
    Pending,
    Ok,
    FailedOrEof,
}

struct DownloadSlot {
    offset: u64,
    requested_len: u32,
    request_id: u32,
    state: SubState,
    buffer: Option<Vec<u8>>,
}

/// One in-progress pipelined download against a single handle (spec.md §3
/// "Transfer state (one per active transfer)", §4.E "Download").
pub struct Download {
    id: u64,
    handle: FileHandle,
    options: TransferOptions,
    order: VecDeque<u64>,
    slots: HashMap<u64, DownloadSlot>,
    next_slot: u64,
    next_offset: u64,
    furthest_acked_offset: u64,
    /// Tentative file size; `u64::MAX` represents the reference's
    /// "unbounded" sentinel (both 32-bit halves at max) collapsed to a
    /// native 64-bit value per the §9 design note.
    filesize: u64,
    in_flight_bytes: usize,
    eof: bool,
    err: Option<SftpError>,
}

impl Download {
    pub fn new(id: u64, handle: FileHandle, start_offset: u64, options: TransferOptions) -> Self {
        Download {
            id,
            handle,
            options,
            order: VecDeque::new(),
            slots: HashMap::new(),
            next_slot: 0,
            next_offset: start_offset,
            furthest_acked_offset: start_offset,
            filesize: u64::MAX,
            in_flight_bytes: 0,
            eof: false,
            err: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// The file size inferred so far from short reads, if any (spec.md
    /// §4.E). `None` while still unbounded.
    pub fn inferred_file_size(&self) -> Option<u64> {
        (self.filesize != u64::MAX).then_some(self.filesize)
    }

    /// Queues new reads until `in_flight >= window`, EOF was observed, or
    /// an error was recorded (spec.md §4.E). Returns how many new
    /// sub-requests were issued.
    pub fn fill_window<T: Read + Write>(
        &mut self,
        client: &mut SftpClient<T>,
    ) -> Result<usize, SftpError> {
        let mut issued = 0;
        while self.err.is_none() && !self.eof && self.in_flight_bytes < self.options.window {
            let slot = self.next_slot;
            self.next_slot += 1;
            let offset = self.next_offset;
            let len = self.options.block_size as u32;

            let request_id = client.send_read_for_transfer(&self.handle, offset, len, self.id, slot)?;

            self.slots.insert(
                slot,
                DownloadSlot {
                    offset,
                    requested_len: len,
                    request_id,
                    state: SubState::Pending,
                    buffer: None,
                },
            );
            self.order.push_back(slot);
            self.next_offset += len as u64;
            self.in_flight_bytes += len as usize;
            issued += 1;
        }
        trace!("download {}: queued {issued} more reads", self.id);
        Ok(issued)
    }

    /// Feeds one correlated response packet in. `slot` came from the
    /// [`crate::requests::Continuation::Transfer`] the client's dispatch
    /// recovered for this packet.
    pub fn on_packet(&mut self, slot: u64, raw: RawPacket) {
        let Some(sub) = self.slots.get_mut(&slot) else {
            // Not ours — spec.md §4.E "returns 'not ours' if the userdata
            // is null"; here that's simply "no such slot" (already
            // delivered, or a bug upstream). Nothing to do.
            return;
        };
        let requested_len = sub.requested_len;
        let offset = sub.offset;
        self.in_flight_bytes = self.in_flight_bytes.saturating_sub(requested_len as usize);

        let outcome = protocol::parse_reply(&raw)
            .and_then(|reply| protocol::expect_read_data(reply, sub.request_id, requested_len));

        match outcome {
            Ok(ReadOutcome::Eof) => {
                debug!("download {}: EOF at offset {offset}", self.id);
                self.eof = true;
                self.slot_mut(slot).state = SubState::FailedOrEof;
            }
            Ok(ReadOutcome::Data(bytes)) if bytes.is_empty() => {
                // Some servers signal EOF with a zero-length DATA instead
                // of STATUS/EOF (spec.md §9: "the transfer engine must
                // handle both conventions").
                self.eof = true;
                self.slot_mut(slot).state = SubState::FailedOrEof;
            }
            Ok(ReadOutcome::Data(bytes)) => {
                let r = bytes.len() as u64;
                if offset > self.furthest_acked_offset {
                    self.furthest_acked_offset = offset;
                }
                if r < requested_len as u64 {
                    let candidate_size = offset + r;
                    if candidate_size < self.filesize {
                        self.filesize = candidate_size;
                    }
                }
                let sub = self.slot_mut(slot);
                sub.state = SubState::Ok;
                sub.buffer = Some(bytes);

                if self.furthest_acked_offset > self.filesize {
                    warn!(
                        "download {}: short buffer at offset {offset} but not at EOF",
                        self.id
                    );
                    self.err = Some(SftpError::protocol(
                        "received a short buffer from FXP_READ, but not at EOF",
                    ));
                }
            }
            Err(e) => {
                self.slot_mut(slot).state = SubState::FailedOrEof;
                self.err = Some(e);
            }
        }
    }

    fn slot_mut(&mut self, slot: u64) -> &mut DownloadSlot {
        self.slots.get_mut(&slot).expect("slot just looked up")
    }

    /// Walks the head of the queue, discarding completed-but-failed entries
    /// and returning the first completed-and-ok block: `(offset, bytes)`.
    /// Delivers strictly in submission order even though responses may
    /// have arrived out of order (spec.md §4.E "Delivery").
    pub fn take_ready(&mut self) -> Option<(u64, Vec<u8>)> {
        loop {
            let slot = *self.order.front()?;
            let state = self.slots.get(&slot)?.state;
            match state {
                SubState::Pending => return None,
                SubState::FailedOrEof => {
                    self.order.pop_front();
                    self.slots.remove(&slot);
                }
                SubState::Ok => {
                    self.order.pop_front();
                    let sub = self.slots.remove(&slot).expect("just matched Ok above");
                    return Some((sub.offset, sub.buffer.expect("Ok state always has a buffer")));
                }
            }
        }
    }

    pub fn is_done(&self) -> bool {
        (self.eof || self.err.is_some()) && self.order.is_empty()
    }

    pub fn take_error(&mut self) -> Option<SftpError> {
        self.err.take()
    }

    /// Releases every queued sub-request's transport-level reservation
    /// (spec.md §4.E "`xfer_cleanup`"). Must be called regardless of
    /// success to avoid leaking request-table entries (spec.md §5).
    pub fn cleanup<T: Read + Write>(mut self, client: &mut SftpClient<T>) {
        for slot in self.order.drain(..) {
            if let Some(sub) = self.slots.remove(&slot) {
                client.forget_request(sub.request_id);
            }
        }
        self.slots.clear();
    }
}

struct UploadSlot {
    len: usize,
    request_id: u32,
}

/// One in-progress pipelined upload (spec.md §4.E "Upload").
pub struct Upload {
    id: u64,
    handle: FileHandle,
    options: TransferOptions,
    next_offset: u64,
    next_slot: u64,
    in_flight: HashMap<u64, UploadSlot>,
    /// Starts `true` so `is_done` becomes true the moment the queue drains
    /// after the caller stops submitting (spec.md §4.E: "An upload state
    /// starts with eof=true so that xfer_done becomes true once the queue
    /// drains").
    eof: bool,
    err: Option<SftpError>,
}

impl Upload {
    pub fn new(id: u64, handle: FileHandle, start_offset: u64, options: TransferOptions) -> Self {
        Upload {
            id,
            handle,
            options,
            next_offset: start_offset,
            next_slot: 0,
            in_flight: HashMap::new(),
            eof: true,
            err: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    fn in_flight_bytes(&self) -> usize {
        self.in_flight.values().map(|s| s.len).sum()
    }

    /// Whether there's window budget for another write (spec.md §4.E
    /// "the caller asks `xfer_upload_ready` whether there is window").
    pub fn ready(&self) -> bool {
        self.err.is_none() && self.in_flight_bytes() < self.options.window
    }

    /// Synthesizes a WRITE sub-request for `data` at the next offset; no
    /// local buffer is retained (spec.md §4.E). Returns the offset written.
    pub fn submit<T: Read + Write>(
        &mut self,
        client: &mut SftpClient<T>,
        data: &[u8],
    ) -> Result<u64, SftpError> {
        let offset = self.next_offset;
        let slot = self.next_slot;
        self.next_slot += 1;

        let request_id = client.send_write_for_transfer(&self.handle, offset, data, self.id, slot)?;
        self.in_flight.insert(
            slot,
            UploadSlot {
                len: data.len(),
                request_id,
            },
        );
        self.next_offset += data.len() as u64;
        Ok(offset)
    }

    /// Feeds one correlated WRITE response in. A failed write records the
    /// engine's sticky error; a successful one is simply dropped (spec.md
    /// §4.E: "A failed write sets `err=1` ...; a successful one removes
    /// the entry silently").
    pub fn on_packet(&mut self, slot: u64, raw: RawPacket) {
        let Some(sub) = self.in_flight.remove(&slot) else {
            return;
        };
        let result =
            protocol::parse_reply(&raw).and_then(|reply| protocol::expect_status_ok(reply, sub.request_id));
        if let Err(e) = result {
            self.err = Some(e);
        }
    }

    pub fn is_done(&self) -> bool {
        (self.eof || self.err.is_some()) && self.in_flight.is_empty()
    }

    pub fn take_error(&mut self) -> Option<SftpError> {
        self.err.take()
    }

    pub fn cleanup<T: Read + Write>(mut self, client: &mut SftpClient<T>) {
        for (_, sub) in self.in_flight.drain() {
            client.forget_request(sub.request_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeChannel;

    fn status_ok_frame(id: u32) -> Vec<u8> {
        use crate::codec::Encoder;
        use crate::constants::SSH_FXP_STATUS;
        Encoder::new(SSH_FXP_STATUS)
            .add_u32(id)
            .add_u32(0)
            .add_string(b"")
            .add_string(b"")
            .finish()
    }

    fn data_frame(id: u32, bytes: &[u8]) -> Vec<u8> {
        use crate::codec::Encoder;
        use crate::constants::SSH_FXP_DATA;
        Encoder::new(SSH_FXP_DATA).add_u32(id).add_string(bytes).finish()
    }

    fn eof_frame(id: u32) -> Vec<u8> {
        use crate::codec::Encoder;
        use crate::constants::SSH_FXP_STATUS;
        Encoder::new(SSH_FXP_STATUS)
            .add_u32(id)
            .add_u32(1) // SSH_FX_EOF
            .add_string(b"")
            .add_string(b"")
            .finish()
    }

    fn make_client() -> SftpClient<FakeChannel> {
        let chan = FakeChannel::preloaded_with_version(3);
        SftpClient::init(chan).unwrap()
    }

    /// A "server" that always replies to the most recently sent request
    /// with a block of `file` starting at the request's offset, honoring
    /// short reads near EOF. Delivers replies out of order when
    /// `reorder` is set.
    fn serve_all_pending(client: &mut SftpClient<FakeChannel>, file: &[u8], reorder: bool) {
        let sent = client.transport_mut().take_sent_reads();
        let mut replies: Vec<Vec<u8>> = sent
            .into_iter()
            .map(|(id, offset, len)| {
                let offset = offset as usize;
                if offset >= file.len() {
                    eof_frame(id)
                } else {
                    let end = (offset + len as usize).min(file.len());
                    data_frame(id, &file[offset..end])
                }
            })
            .collect();
        if reorder {
            replies.reverse();
        }
        for r in replies {
            client.transport_mut().push_inbound_frame(r);
        }
    }

    #[test]
    fn windowed_download_delivers_in_order_even_when_replies_are_reordered() {
        let mut client = make_client();
        let file: Vec<u8> = (0..100_000u32).map(|i| (i % 256) as u8).collect();
        let options = TransferOptions {
            window: 1_048_576,
            block_size: 32_768,
        };
        let mut dl = Download::new(1, FileHandle(b"h".to_vec()), 0, options);

        dl.fill_window(&mut client).unwrap();
        serve_all_pending(&mut client, &file, true);

        let mut delivered = Vec::new();
        loop {
            while let Some(evt) = client.try_recv_transfer_event().unwrap() {
                dl.on_packet(evt.slot, evt.raw);
            }
            match dl.take_ready() {
                Some((offset, bytes)) => delivered.push((offset, bytes)),
                None => {
                    if dl.fill_window(&mut client).unwrap() > 0 {
                        serve_all_pending(&mut client, &file, true);
                        continue;
                    }
                    if dl.is_done() {
                        break;
                    }
                    if client.transport_mut().inbound_is_empty() {
                        break;
                    }
                }
            }
        }

        assert!(dl.take_error().is_none());
        let mut last_offset = None;
        let mut total = 0u64;
        for (offset, bytes) in &delivered {
            if let Some(last) = last_offset {
                assert!(*offset > last, "blocks must be delivered in increasing offset order");
            }
            last_offset = Some(*offset);
            total += bytes.len() as u64;
        }
        assert_eq!(total, file.len() as u64);
        assert_eq!(dl.inferred_file_size(), Some(file.len() as u64));
        dl.cleanup(&mut client);
    }

    #[test]
    fn short_block_not_at_eof_is_flagged_as_an_error() {
        let mut client = make_client();
        let options = TransferOptions {
            window: 1_048_576,
            block_size: 32_768,
        };
        let mut dl = Download::new(1, FileHandle(b"h".to_vec()), 0, options);
        dl.fill_window(&mut client).unwrap();

        let sent = client.transport_mut().take_sent_reads();
        // Claim the file is only 16384 bytes via a short first block...
        let (first_id, _, _) = sent[0];
        client
            .transport_mut()
            .push_inbound_frame(data_frame(first_id, &vec![0u8; 16_384]));
        // ...but let a later block complete *full-length* starting past
        // that inferred size.
        for (id, offset, len) in sent.iter().skip(1) {
            if *offset >= 16_384 {
                client
                    .transport_mut()
                    .push_inbound_frame(data_frame(*id, &vec![0u8; *len as usize]));
            } else {
                client.transport_mut().push_inbound_frame(eof_frame(*id));
            }
        }

        while let Some(evt) = client.try_recv_transfer_event().unwrap() {
            dl.on_packet(evt.slot, evt.raw);
        }

        assert!(dl.take_error().is_some());
        dl.cleanup(&mut client);
    }

    #[test]
    fn upload_completes_once_queue_drains_and_no_more_is_submitted() {
        let mut client = make_client();
        let options = TransferOptions::default();
        let mut up = Upload::new(1, FileHandle(b"h".to_vec()), 0, options);

        let offset1 = up.submit(&mut client, b"hello ").unwrap();
        let offset2 = up.submit(&mut client, b"world").unwrap();
        assert_eq!(offset1, 0);
        assert_eq!(offset2, 6);
        assert!(!up.is_done());

        let writes = client.transport_mut().take_sent_writes();
        let (id1, _) = writes[0];
        let (id2, _) = writes[1];
        client.transport_mut().push_inbound_frame(status_ok_frame(id1));
        client.transport_mut().push_inbound_frame(status_ok_frame(id2));

        while let Some(evt) = client.try_recv_transfer_event().unwrap() {
            up.on_packet(evt.slot, evt.raw);
        }

        assert!(up.is_done());
        assert!(up.take_error().is_none());
        up.cleanup(&mut client);
    }

    #[test]
    fn failed_write_is_recorded_and_removed() {
        let mut client = make_client();
        let mut up = Upload::new(1, FileHandle(b"h".to_vec()), 0, TransferOptions::default());
        up.submit(&mut client, b"data").unwrap();

        let (id, _) = client.transport_mut().take_sent_writes()[0];
        let frame = {
            use crate::codec::Encoder;
            use crate::constants::SSH_FXP_STATUS;
            Encoder::new(SSH_FXP_STATUS)
                .add_u32(id)
                .add_u32(3) // permission denied
                .add_string(b"denied")
                .add_string(b"")
                .finish()
        };
        client.transport_mut().push_inbound_frame(frame);

        while let Some(evt) = client.try_recv_transfer_event().unwrap() {
            up.on_packet(evt.slot, evt.raw);
        }

        assert!(up.take_error().is_some());
        assert!(up.is_done());
    }
}
