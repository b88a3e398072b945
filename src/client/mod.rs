//! Client dispatcher
//!
//! [`NodeClient`] speaks the wire protocol to a single node.
//! [`ClusterClient`] probes every configured node first and then:
//! - uploads the same bytes to every reachable node (redundant write)
//! - downloads from the first node that answers `READY`
//! - deletes and lists on every reachable node

use crate::common::{Config, Error, Result};
use crate::node::protocol::{
    read_message, validate_name, write_message, Command, END_OF_LIST, LIST_FAILED, NO_FILES, READY,
};
use bytes::Bytes;
use futures_util::future::join_all;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// First reply to a DOWNLOAD
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Download {
    /// `READY` followed by the full body
    Ready(Vec<u8>),
    /// Any other reply (not found, read failure)
    Refused(String),
}

#[derive(Debug, Clone)]
pub struct NodeClient {
    addr: SocketAddr,
    timeout: Duration,
}

impl NodeClient {
    pub fn new(addr: SocketAddr, timeout: Duration) -> Self {
        Self { addr, timeout }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Can a TCP connection be opened within the probe timeout?
    pub async fn is_reachable(&self) -> bool {
        matches!(
            tokio::time::timeout(self.timeout, TcpStream::connect(self.addr)).await,
            Ok(Ok(_))
        )
    }

    async fn connect(&self) -> Result<TcpStream> {
        tokio::time::timeout(self.timeout, TcpStream::connect(self.addr))
            .await?
            .map_err(|e| Error::ConnectionFailed(format!("{}: {}", self.addr, e)))
    }

    /// Open a connection and send the command message.
    async fn request(&self, command: &Command) -> Result<TcpStream> {
        if let Some(name) = command.file_name() {
            validate_name(name)?;
        }
        let mut stream = self.connect().await?;
        write_message(&mut stream, &command.to_string()).await?;
        Ok(stream)
    }

    /// Store `data` under `name`; returns the node's reply text.
    pub async fn upload(&self, name: &str, data: &[u8]) -> Result<String> {
        let mut stream = self.request(&Command::Upload(name.to_string())).await?;
        if let Err(e) = send_body(&mut stream, data).await {
            // A node that gives up early still answers before it closes.
            return read_message(&mut stream).await.map_err(|_| Error::Io(e));
        }
        read_message(&mut stream).await
    }

    pub async fn download(&self, name: &str) -> Result<Download> {
        let mut stream = self.request(&Command::Download(name.to_string())).await?;
        let reply = read_message(&mut stream).await?;
        if reply != READY {
            return Ok(Download::Refused(reply));
        }

        let mut body = Vec::new();
        stream.read_to_end(&mut body).await?;
        Ok(Download::Ready(body))
    }

    pub async fn delete(&self, name: &str) -> Result<String> {
        let mut stream = self.request(&Command::Delete(name.to_string())).await?;
        read_message(&mut stream).await
    }

    /// File names stored on the node. An empty node yields an empty list.
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut stream = self.request(&Command::List).await?;
        let mut names = Vec::new();
        loop {
            let message = read_message(&mut stream).await?;
            if message == END_OF_LIST {
                break;
            }
            names.push(message);
        }

        match names.as_slice() {
            [only] if only == NO_FILES => Ok(Vec::new()),
            [only] if only == LIST_FAILED => {
                Err(Error::Other(format!("{} could not list its files", self.addr)))
            }
            _ => Ok(names),
        }
    }
}

/// Write an upload body and half-close to mark its end.
async fn send_body(stream: &mut TcpStream, data: &[u8]) -> std::io::Result<()> {
    stream.write_all(data).await?;
    stream.shutdown().await
}

/// Outcome of a fan-out call on one node
#[derive(Debug)]
pub struct NodeResult<T> {
    pub addr: SocketAddr,
    pub result: Result<T>,
}

#[derive(Debug, Clone)]
pub struct ClusterClient {
    nodes: Vec<NodeClient>,
}

impl ClusterClient {
    pub fn new(addrs: impl IntoIterator<Item = SocketAddr>, timeout: Duration) -> Self {
        Self {
            nodes: addrs
                .into_iter()
                .map(|addr| NodeClient::new(addr, timeout))
                .collect(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.node_addrs(), config.probe_timeout())
    }

    pub fn nodes(&self) -> &[NodeClient] {
        &self.nodes
    }

    /// Nodes answering a connection probe, in roster order
    pub async fn reachable(&self) -> Vec<&NodeClient> {
        let probes = join_all(self.nodes.iter().map(|node| node.is_reachable())).await;
        self.nodes
            .iter()
            .zip(probes)
            .filter_map(|(node, up)| {
                if !up {
                    tracing::debug!("Node {} unreachable", node.addr());
                }
                up.then_some(node)
            })
            .collect()
    }

    /// Write the same file to every reachable node.
    pub async fn upload(&self, name: &str, data: Bytes) -> Vec<NodeResult<String>> {
        let targets = self.reachable().await;
        join_all(targets.into_iter().map(|node| {
            let data = data.clone();
            async move {
                NodeResult {
                    addr: node.addr(),
                    result: node.upload(name, &data).await,
                }
            }
        }))
        .await
    }

    /// Fetch `name` from the first reachable node that has it.
    pub async fn download(&self, name: &str) -> Result<(SocketAddr, Vec<u8>)> {
        for node in self.reachable().await {
            match node.download(name).await {
                Ok(Download::Ready(body)) => return Ok((node.addr(), body)),
                Ok(Download::Refused(reply)) => {
                    tracing::debug!("Node {} refused download: {}", node.addr(), reply)
                }
                Err(e) => tracing::warn!("Download from {} failed: {}", node.addr(), e),
            }
        }
        Err(Error::NotFound(name.to_string()))
    }

    pub async fn delete(&self, name: &str) -> Vec<NodeResult<String>> {
        let mut results = Vec::new();
        for node in self.reachable().await {
            results.push(NodeResult {
                addr: node.addr(),
                result: node.delete(name).await,
            });
        }
        results
    }

    pub async fn list(&self) -> Vec<NodeResult<Vec<String>>> {
        let mut results = Vec::new();
        for node in self.reachable().await {
            results.push(NodeResult {
                addr: node.addr(),
                result: node.list().await,
            });
        }
        results
    }
}
