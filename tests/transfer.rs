//! Full-stack pipelined transfer scenarios (spec.md §4.E, §8): a
//! `Download`/`Upload` driven against a real `SftpClient`, not just the
//! engine in isolation (see the crate's own inline unit tests for that).

mod common;

use common::{status_frame, FakeChannel};
use sftp_core::codec::Encoder;
use sftp_core::constants::{SSH_FXP_DATA, SSH_FXP_HANDLE};
use sftp_core::{Download, FileHandle, SftpClient, TransferOptions, Upload};

fn open_for_read(client: &mut SftpClient<FakeChannel>) -> FileHandle {
    client
        .transport_mut()
        .push_inbound_frame(Encoder::new(SSH_FXP_HANDLE).add_u32(256).add_string(b"rh").finish());
    client
        .call_open(
            "/big.bin",
            sftp_core::OpenFlags::read(),
            &sftp_core::FileAttributes::default(),
        )
        .unwrap()
}

fn serve_pending_reads(client: &mut SftpClient<FakeChannel>, file: &[u8]) {
    for (id, offset, len) in client.transport_mut().take_sent_reads() {
        let offset = offset as usize;
        let frame = if offset >= file.len() {
            status_frame(id, 1, "") // SSH_FX_EOF
        } else {
            let end = (offset + len as usize).min(file.len());
            Encoder::new(SSH_FXP_DATA).add_u32(id).add_string(&file[offset..end]).finish()
        };
        client.transport_mut().push_inbound_frame(frame);
    }
}

#[test]
fn pipelined_download_through_the_client_delivers_the_whole_file_in_order() {
    let mut client = SftpClient::init(FakeChannel::preloaded_with_version(3)).unwrap();
    let handle = open_for_read(&mut client);

    let file: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    let transfer_id = client.new_transfer_id();
    let mut dl = Download::new(transfer_id, handle.clone(), 0, TransferOptions::default());

    let mut delivered = Vec::new();
    dl.fill_window(&mut client).unwrap();
    serve_pending_reads(&mut client, &file);

    loop {
        while let Some(event) = client.try_recv_transfer_event().unwrap() {
            assert_eq!(event.transfer_id, dl.id());
            dl.on_packet(event.slot, event.raw);
        }
        while let Some((offset, bytes)) = dl.take_ready() {
            delivered.push((offset, bytes));
        }
        if dl.is_done() {
            break;
        }
        if dl.fill_window(&mut client).unwrap() > 0 {
            serve_pending_reads(&mut client, &file);
        } else if client.transport_mut().inbound_is_empty() {
            break;
        }
    }

    assert!(dl.take_error().is_none());
    let total: usize = delivered.iter().map(|(_, b)| b.len()).sum();
    assert_eq!(total, file.len());

    let mut last = None;
    for (offset, _) in &delivered {
        if let Some(prev) = last {
            assert!(*offset > prev);
        }
        last = Some(*offset);
    }

    dl.cleanup(&mut client);
}

#[test]
fn pipelined_upload_through_the_client_acknowledges_every_write() {
    let mut client = SftpClient::init(FakeChannel::preloaded_with_version(3)).unwrap();
    client
        .transport_mut()
        .push_inbound_frame(Encoder::new(SSH_FXP_HANDLE).add_u32(256).add_string(b"wh").finish());
    let handle = client
        .call_open(
            "/out.bin",
            sftp_core::OpenFlags::write_create_truncate(),
            &sftp_core::FileAttributes::default(),
        )
        .unwrap();

    let transfer_id = client.new_transfer_id();
    let mut up = Upload::new(transfer_id, handle, 0, TransferOptions::default());

    let chunks: Vec<Vec<u8>> = (0..20).map(|i| vec![i as u8; 4096]).collect();
    for chunk in &chunks {
        up.submit(&mut client, chunk).unwrap();
    }

    let writes = client.transport_mut().take_sent_writes();
    assert_eq!(writes.len(), chunks.len());
    for (id, _, _) in &writes {
        client.transport_mut().push_inbound_frame(status_frame(*id, 0, ""));
    }

    while let Some(event) = client.try_recv_transfer_event().unwrap() {
        up.on_packet(event.slot, event.raw);
    }

    assert!(up.is_done());
    assert!(up.take_error().is_none());
    up.cleanup(&mut client);
}

#[test]
fn a_download_that_hits_a_server_error_mid_stream_surfaces_it_and_still_cleans_up() {
    let mut client = SftpClient::init(FakeChannel::preloaded_with_version(3)).unwrap();
    let handle = open_for_read(&mut client);

    let transfer_id = client.new_transfer_id();
    let mut dl = Download::new(transfer_id, handle, 0, TransferOptions::default());
    dl.fill_window(&mut client).unwrap();

    let sent = client.transport_mut().take_sent_reads();
    let (first_id, _, _) = sent[0];
    client
        .transport_mut()
        .push_inbound_frame(status_frame(first_id, 4, "disk offline")); // SSH_FX_FAILURE
    for (id, _, _) in sent.iter().skip(1) {
        client.transport_mut().push_inbound_frame(status_frame(*id, 1, "")); // SSH_FX_EOF
    }

    while let Some(event) = client.try_recv_transfer_event().unwrap() {
        dl.on_packet(event.slot, event.raw);
    }

    assert!(dl.take_error().is_some());
    dl.cleanup(&mut client);
}
