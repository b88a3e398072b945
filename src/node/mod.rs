//! Storage node implementation
//!
//! A node owns one listening socket and one flat storage directory:
//! - `protocol`: message framing, commands and reply texts
//! - `dispatcher`: runs one command per connection against the directory
//! - `pool`: bounded worker pool shared across nodes
//! - `runtime`: bind + accept loop with a cancellable listener

pub mod dispatcher;
pub mod pool;
pub mod protocol;
pub mod runtime;

pub use dispatcher::serve_connection;
pub use pool::WorkerPool;
pub use protocol::{Command, Reply};
pub use runtime::{Acceptor, NodeRuntime, StopReason};
