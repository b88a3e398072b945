//! Common utilities and types shared across minidfs

pub mod config;
pub mod error;
pub mod utils;

pub use config::{Config, NodeConfig};
pub use error::{Error, Result};
pub use utils::{format_bytes, validate_file_name, NodeStatus, MAX_FILE_NAME_LEN};
