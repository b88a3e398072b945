//! Error types for minidfs

use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Node Lifecycle Errors ===
    #[error("Failed to bind {addr}: {source}")]
    BindFailure {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create storage directory {}: {source}", .path.display())]
    DirectoryCreateFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid node: {0}")]
    InvalidNode(String),

    // === Storage Errors ===
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid file name: {0:?}")]
    InvalidFileName(String),

    // === Protocol Errors ===
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // === Generic ===
    #[error("Operation timeout: {0}")]
    Timeout(String),

    #[error("{0}")]
    Other(String),
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        Error::Timeout(e.to_string())
    }
}
