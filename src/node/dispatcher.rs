//! Command dispatcher
//!
//! Runs exactly one request against a node's storage directory:
//! read the command message, perform the file operation, write the reply,
//! close the connection. Expected failures (missing files, I/O errors on the
//! node's disk, bad commands) are answered on the wire and logged here; an
//! `Err` is only returned when the peer itself could not be talked to.

use crate::common::{Error, Result};
use crate::node::protocol::{
    is_reserved_name, read_message, write_message, write_reply, Command, Reply, END_OF_LIST,
    LIST_FAILED, NO_FILES,
};
use std::io::ErrorKind;
use std::path::Path;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// Serve one connection, then close it whatever happened.
pub async fn serve_connection<S>(mut stream: S, directory: &Path) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let result = dispatch(&mut stream, directory).await;
    if let Err(e) = stream.shutdown().await {
        tracing::debug!("Connection shutdown failed: {}", e);
    }
    result
}

async fn dispatch<S>(stream: &mut S, directory: &Path) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let message = match read_message(stream).await {
        Ok(message) => message,
        Err(Error::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => {
            tracing::debug!("Peer closed before sending a command");
            return Ok(());
        }
        Err(Error::Protocol(reason)) => {
            tracing::warn!("Unreadable command: {}", reason);
            return write_reply(stream, &Reply::InvalidCommand).await;
        }
        Err(e) => return Err(e),
    };

    let command = match Command::parse(&message) {
        Ok(command) => command,
        Err(e) => {
            tracing::warn!("Rejected command: {}", e);
            return write_reply(stream, &Reply::InvalidCommand).await;
        }
    };

    tracing::debug!(command = %command, "Dispatching");
    match command {
        Command::Upload(name) => upload(stream, directory, &name).await,
        Command::Download(name) => download(stream, directory, &name).await,
        Command::Delete(name) => delete(stream, directory, &name).await,
        Command::List => list(stream, directory).await,
    }
}

async fn upload<S>(stream: &mut S, directory: &Path, name: &str) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let path = directory.join(name);
    match receive_file(stream, &path).await {
        Ok(bytes) => {
            tracing::info!(file = name, bytes, "File uploaded");
            write_reply(stream, &Reply::Uploaded(name.to_string())).await
        }
        Err(e) => {
            // The partial file stays on disk.
            tracing::warn!(file = name, "Upload failed: {}", e);
            write_reply(stream, &Reply::UploadFailed(name.to_string())).await
        }
    }
}

/// Copy everything up to the peer's half-close into `path`.
async fn receive_file<R>(reader: &mut R, path: &Path) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
{
    let mut file = fs::File::create(path).await?;
    let written = tokio::io::copy(reader, &mut file).await?;
    file.flush().await?;
    Ok(written)
}

async fn download<S>(stream: &mut S, directory: &Path, name: &str) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let path = directory.join(name);
    let mut file = match fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!(file = name, "Cannot open for download: {}", e);
                return write_reply(stream, &Reply::DownloadFailed(name.to_string())).await;
            }
        },
        Ok(_) => return write_reply(stream, &Reply::NotFound).await,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return write_reply(stream, &Reply::NotFound).await;
        }
        Err(e) => {
            tracing::warn!(file = name, "Cannot stat for download: {}", e);
            return write_reply(stream, &Reply::DownloadFailed(name.to_string())).await;
        }
    };

    write_reply(stream, &Reply::Ready).await?;
    // Past READY the body is in flight; a failure can only cut it short.
    let sent = tokio::io::copy(&mut file, stream).await?;
    stream.flush().await?;
    tracing::info!(file = name, bytes = sent, "File downloaded");
    Ok(())
}

async fn delete<S>(stream: &mut S, directory: &Path, name: &str) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let path = directory.join(name);
    let reply = match fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!(file = name, "File deleted");
                Reply::Deleted(name.to_string())
            }
            Err(e) => {
                tracing::warn!(file = name, "Delete failed: {}", e);
                Reply::DeleteFailed(name.to_string())
            }
        },
        Ok(_) => Reply::DeleteFailed(name.to_string()),
        Err(e) if e.kind() == ErrorKind::NotFound => Reply::NotFound,
        Err(e) => {
            tracing::warn!(file = name, "Cannot stat for delete: {}", e);
            Reply::DeleteFailed(name.to_string())
        }
    };
    write_reply(stream, &reply).await
}

async fn list<S>(stream: &mut S, directory: &Path) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match list_names(directory).await {
        Ok(names) if names.is_empty() => write_message(stream, NO_FILES).await?,
        Ok(names) => {
            for name in &names {
                write_message(stream, name).await?;
            }
        }
        Err(e) => {
            tracing::warn!("Cannot list {}: {}", directory.display(), e);
            write_message(stream, LIST_FAILED).await?;
        }
    }
    write_message(stream, END_OF_LIST).await
}

/// Immediate entries of a node directory, sorted. Entries named like a
/// LIST control message are left out.
pub async fn list_names(directory: &Path) -> std::io::Result<Vec<String>> {
    let mut entries = fs::read_dir(directory).await?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_reserved_name(&name) {
            tracing::warn!("Skipping {:?} in {}", name, directory.display());
            continue;
        }
        names.push(name);
    }
    names.sort();
    Ok(names)
}
