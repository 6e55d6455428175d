//! Minimal end-to-end walkthrough of the public API: connect, handshake,
//! list a directory, then pipeline a whole-file download.
//!
//! Grounded in the teacher's connection setup (src/main.rs: TcpStream ->
//! ssh2::Session -> channel_session -> subsystem("sftp")) but with the
//! command-loop/REPL stripped out, since that's the CLI layer this crate
//! deliberately leaves out (spec.md §1 Non-goals).

use std::env;
use std::net::TcpStream;

use env_logger::Builder;
use log::{info, LevelFilter};
use ssh2::Session;

use sftp_core::{ClientEvent, Download, FileAttributes, OpenFlags, SftpClient, TransferOptions};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    Builder::from_default_env().filter(None, LevelFilter::Info).init();

    let host = env::args().nth(1).unwrap_or_else(|| "test.rebex.net:22".to_string());
    let user = env::args().nth(2).unwrap_or_else(|| "demo".to_string());
    let pass = env::args().nth(3).unwrap_or_else(|| "password".to_string());
    let remote_path = env::args().nth(4).unwrap_or_else(|| "readme.txt".to_string());

    let tcp = TcpStream::connect(&host)?;
    let mut session = Session::new()?;
    session.set_tcp_stream(tcp);
    session.handshake()?;
    session.userauth_password(&user, &pass)?;
    info!("authenticated to {host} as {user}");

    let mut channel = session.channel_session()?;
    channel.subsystem("sftp")?;

    let mut client = SftpClient::init(channel)?;
    info!("negotiated SFTP version {}", client.version());

    let cwd = client.working_directory()?;
    info!("working directory: {cwd}");

    for entry in client.call_list_directory(&cwd)? {
        println!("{}", entry.long_name);
    }

    download_whole_file(&mut client, &remote_path)?;

    Ok(())
}

/// Drives a [`Download`] to completion, printing progress as blocks land.
/// This is the shape spec.md §4.E expects the caller to implement: keep
/// the window full, feed replies in, drain ready blocks, repeat.
fn download_whole_file(
    client: &mut SftpClient<ssh2::Channel>,
    path: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let handle = client.call_open(path, OpenFlags::read(), &FileAttributes::default())?;
    let transfer_id = client.new_transfer_id();
    let mut dl = Download::new(transfer_id, handle.clone(), 0, TransferOptions::default());

    let mut total = 0u64;
    loop {
        dl.fill_window(client)?;

        while let Some((offset, bytes)) = dl.take_ready() {
            total += bytes.len() as u64;
            info!("received {} bytes at offset {offset}", bytes.len());
        }

        if let Some(err) = dl.take_error() {
            dl.cleanup(client);
            let _ = client.call_close(&handle);
            return Err(err.into());
        }

        if dl.is_done() {
            break;
        }

        // Block for exactly one reply and feed it back in; fill_window
        // keeps the window full until EOF, so this always has something
        // outstanding to wait for.
        match client.recv_event()? {
            ClientEvent::Transfer(event) if event.transfer_id == dl.id() => {
                dl.on_packet(event.slot, event.raw)
            }
            ClientEvent::Transfer(_) => unreachable!("only one transfer is active"),
            ClientEvent::Reply { request_id, .. } => {
                return Err(format!("unexpected plain reply to request {request_id} during transfer").into())
            }
        }
    }

    info!(
        "download complete: {total} bytes (server reported {:?})",
        dl.inferred_file_size()
    );
    client.call_close(&handle)?;
    Ok(())
}
