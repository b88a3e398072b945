//! Utility functions for minidfs

use serde::{Deserialize, Serialize};

/// Longest file name accepted on the wire
pub const MAX_FILE_NAME_LEN: usize = 255;

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_idx])
}

/// Validate a stored file name.
///
/// Names live in a flat per-node namespace, so anything that could resolve
/// outside the node directory is refused.
pub fn validate_file_name(name: &str) -> crate::Result<()> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(crate::Error::InvalidFileName(name.to_string()));
    }

    if name.len() > MAX_FILE_NAME_LEN {
        return Err(crate::Error::InvalidFileName(name.to_string()));
    }

    if name.chars().any(|c| c == '/' || c == '\\' || c.is_control()) {
        return Err(crate::Error::InvalidFileName(name.to_string()));
    }

    Ok(())
}

/// Node lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Stopped,
    Starting,
    Running,
}

impl NodeStatus {
    /// Is a runtime bound (or being bound) to this node?
    pub fn is_active(&self) -> bool {
        matches!(self, NodeStatus::Starting | NodeStatus::Running)
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeStatus::Stopped => write!(f, "stopped"),
            NodeStatus::Starting => write!(f, "starting"),
            NodeStatus::Running => write!(f, "running"),
        }
    }
}
