//! # minidfs
//!
//! A small multi-node file store:
//! - Independent storage nodes, each with its own TCP port and flat directory
//! - One request per connection: UPLOAD, DOWNLOAD, DELETE, LIST
//! - Shared bounded worker pool across all nodes
//! - Nodes started and stopped at runtime from an operator control loop
//! - Client that writes every upload to all reachable nodes
//!
//! ## Architecture
//!
//! ```text
//!  operator ──► control loop ──► NodeManager
//!                                  │ start / stop
//!          ┌───────────────────────┼───────────────────────┐
//!        ┌─▼────────┐          ┌───▼──────┐          ┌─────▼────┐
//!        │ Node 1   │          │ Node 2   │          │ Node 3   │
//!        │ :5001    │          │ :5002    │          │ :5003    │
//!        │ files1/  │          │ files2/  │          │ files3/  │
//!        └─┬────────┘          └───┬──────┘          └─────┬────┘
//!          └──── accepted connections ► WorkerPool ◄───────┘
//! ```
//!
//! ## Usage
//!
//! ### Run the nodes
//! ```bash
//! minidfs-server --config minidfs.toml
//! > startall
//! > shutdown2
//! > start2
//! ```
//!
//! ### Use the CLI
//! ```bash
//! minidfs upload ./report.pdf
//! minidfs download report.pdf --output ./out
//! minidfs delete report.pdf
//! minidfs list
//! ```

pub mod client;
pub mod common;
pub mod manager;
pub mod node;

// Re-export commonly used types
pub use client::ClusterClient;
pub use common::{Config, Error, Result};
pub use manager::{ControlLoop, NodeManager};
pub use node::{NodeRuntime, WorkerPool};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
