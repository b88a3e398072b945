//! Storage node wire protocol
//!
//! One connection carries one request. Text messages are length-prefixed:
//!
//! ```text
//! [LEN:2 big-endian][UTF-8 bytes:LEN]
//! ```
//!
//! File bodies are sent raw after the command (UPLOAD, delimited by the
//! client's half-close) or after a `READY` reply (DOWNLOAD, delimited by the
//! node closing the connection).

use crate::common::{validate_file_name, Error, Result};
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Positive answer to DOWNLOAD, followed by the raw file body
pub const READY: &str = "READY";
/// Terminates every LIST reply stream
pub const END_OF_LIST: &str = "END_OF_LIST";
pub const NO_FILES: &str = "No files available.";
pub const LIST_FAILED: &str = "Failed to list files.";
pub const NOT_FOUND: &str = "File not found.";
pub const INVALID_COMMAND: &str = "Invalid command!";

/// Largest text message the framing can carry
pub const MAX_MESSAGE_LEN: usize = u16::MAX as usize;

/// Messages that carry meaning inside a LIST reply stream
const RESERVED_NAMES: [&str; 3] = [END_OF_LIST, NO_FILES, LIST_FAILED];

/// Would a file with this name be mistaken for a LIST control message?
pub fn is_reserved_name(name: &str) -> bool {
    RESERVED_NAMES.contains(&name)
}

/// Check a name before it goes on the wire: a valid file name that is not
/// one of the LIST control messages.
pub fn validate_name(name: &str) -> Result<()> {
    validate_file_name(name)?;
    if is_reserved_name(name) {
        return Err(Error::InvalidFileName(name.to_string()));
    }
    Ok(())
}

/// Request sent by a client as the first message of a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Upload(String),
    Download(String),
    Delete(String),
    List,
}

impl Command {
    /// Parse a command message.
    ///
    /// Unknown verbs are a `Protocol` error; a known verb with an unusable
    /// name is an `InvalidFileName` error. Both are answered with
    /// [`INVALID_COMMAND`] by the node.
    pub fn parse(message: &str) -> Result<Self> {
        match message.split_once(' ') {
            Some(("UPLOAD", name)) => {
                validate_name(name)?;
                Ok(Command::Upload(name.to_string()))
            }
            Some(("DOWNLOAD", name)) => {
                validate_name(name)?;
                Ok(Command::Download(name.to_string()))
            }
            Some(("DELETE", name)) => {
                validate_name(name)?;
                Ok(Command::Delete(name.to_string()))
            }
            None if message == "LIST" => Ok(Command::List),
            _ => Err(Error::Protocol(format!("unrecognized command: {:?}", message))),
        }
    }

    /// File name the command targets, if any
    pub fn file_name(&self) -> Option<&str> {
        match self {
            Command::Upload(name) | Command::Download(name) | Command::Delete(name) => {
                Some(name)
            }
            Command::List => None,
        }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            Command::Upload(_) => "UPLOAD",
            Command::Download(_) => "DOWNLOAD",
            Command::Delete(_) => "DELETE",
            Command::List => "LIST",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.file_name() {
            Some(name) => write!(f, "{} {}", self.verb(), name),
            None => write!(f, "{}", self.verb()),
        }
    }
}

/// Terminal single-message replies
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Uploaded(String),
    UploadFailed(String),
    Ready,
    NotFound,
    DownloadFailed(String),
    Deleted(String),
    DeleteFailed(String),
    InvalidCommand,
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Uploaded(name) => write!(f, "File uploaded successfully: {}", name),
            Reply::UploadFailed(name) => write!(f, "Failed to upload the file: {}", name),
            Reply::Ready => f.write_str(READY),
            Reply::NotFound => f.write_str(NOT_FOUND),
            Reply::DownloadFailed(name) => write!(f, "Failed to read the file: {}", name),
            Reply::Deleted(name) => write!(f, "File deleted successfully: {}", name),
            Reply::DeleteFailed(name) => write!(f, "Failed to delete the file: {}", name),
            Reply::InvalidCommand => f.write_str(INVALID_COMMAND),
        }
    }
}

/// Read one length-prefixed text message
pub async fn read_message<R>(reader: &mut R) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u16().await? as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;

    String::from_utf8(buf).map_err(|e| Error::Protocol(format!("message is not UTF-8: {}", e)))
}

/// Write one length-prefixed text message
pub async fn write_message<W>(writer: &mut W, message: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = message.as_bytes();
    let len = u16::try_from(bytes.len()).map_err(|_| {
        Error::Protocol(format!(
            "message of {} bytes exceeds {} byte frame limit",
            bytes.len(),
            MAX_MESSAGE_LEN
        ))
    })?;

    writer.write_u16(len).await?;
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn write_reply<W>(writer: &mut W, reply: &Reply) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_message(writer, &reply.to_string()).await
}
