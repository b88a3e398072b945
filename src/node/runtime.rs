//! Node runtime: one listener, one storage directory
//!
//! [`NodeRuntime::bind`] prepares the directory and binds the socket;
//! [`NodeRuntime::run`] is the accept loop. The loop exits when its
//! shutdown signal fires (silently) or when `accept` fails (logged). Either
//! way the listener is dropped on return, so the port is free again.

use crate::common::{Error, Result};
use crate::node::dispatcher::serve_connection;
use crate::node::pool::WorkerPool;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

/// Source of inbound connections for an accept loop
pub trait Acceptor: Send + Sync {
    fn accept(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send;
}

impl Acceptor for TcpListener {
    fn accept(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        TcpListener::accept(self)
    }
}

/// Why an accept loop returned
#[derive(Debug)]
pub enum StopReason {
    /// The shutdown signal fired (or its sender was dropped)
    Shutdown,
    /// `accept` failed; the node is down until started again
    AcceptFailed(io::Error),
}

pub struct NodeRuntime<A = TcpListener> {
    index: usize,
    directory: PathBuf,
    listener: A,
    local_addr: SocketAddr,
    pool: WorkerPool,
}

impl NodeRuntime {
    /// Ensure the storage directory exists, then bind `addr`.
    pub async fn bind(
        index: usize,
        addr: SocketAddr,
        directory: PathBuf,
        pool: WorkerPool,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(&directory)
            .await
            .map_err(|source| Error::DirectoryCreateFailure {
                path: directory.clone(),
                source,
            })?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| Error::BindFailure { addr, source })?;
        let local_addr = listener.local_addr()?;

        tracing::info!(
            node = index + 1,
            "Listening on {} (directory {})",
            local_addr,
            directory.display()
        );

        Ok(Self {
            index,
            directory,
            listener,
            local_addr,
            pool,
        })
    }
}

impl<A: Acceptor> NodeRuntime<A> {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Accept connections until `shutdown` fires or `accept` fails.
    ///
    /// Connections are handed to the worker pool; in-flight workers are not
    /// cancelled when the loop ends.
    pub async fn run(self, mut shutdown: oneshot::Receiver<()>) -> StopReason {
        let node = self.index + 1;
        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    tracing::info!(node, "Listener on {} closed", self.local_addr);
                    return StopReason::Shutdown;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracing::debug!(node, %peer, "Accepted connection");
                        let directory = self.directory.clone();
                        self.pool.submit(async move {
                            if let Err(e) = serve_connection(stream, &directory).await {
                                tracing::warn!(node, %peer, "Connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(node, "Accept failed on {}: {}", self.local_addr, e);
                        return StopReason::AcceptFailed(e);
                    }
                }
            }
        }
    }
}
