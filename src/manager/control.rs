//! Operator control loop
//!
//! Reads one command per line from a [`CommandSource`], drives the
//! [`NodeManager`] and publishes a [`ControlReport`] for every outcome.
//! Start requests claim their node at once and bind on their own task, so
//! a slow bind never holds up the next command and a `shutdown` that
//! follows immediately still sees the node.

use crate::common::{Error, Result};
use crate::manager::roster::{NodeInfo, NodeManager, StartOutcome, StopOutcome};
use std::fmt;
use std::future::Future;
use std::io::BufRead;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, Lines};
use tokio::sync::mpsc;

/// Parsed operator command. Node indices are 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Start(usize),
    Shutdown(usize),
    StartAll,
    ShutdownAll,
    Status,
}

impl ControlCommand {
    /// Parse one operator line against a roster of `node_count` nodes.
    ///
    /// Bad node numbers are `InvalidNode`; anything unrecognized is a
    /// `Protocol` error.
    pub fn parse(line: &str, node_count: usize) -> Result<Self> {
        let line = line.trim();
        match line {
            "startall" => return Ok(ControlCommand::StartAll),
            "shutdownall" => return Ok(ControlCommand::ShutdownAll),
            "status" => return Ok(ControlCommand::Status),
            _ => {}
        }

        // `startserver<k>` is the historical spelling of `start<k>`.
        if let Some(number) = line
            .strip_prefix("startserver")
            .or_else(|| line.strip_prefix("start"))
        {
            return Ok(ControlCommand::Start(parse_node(number, node_count)?));
        }
        if let Some(number) = line.strip_prefix("shutdown") {
            return Ok(ControlCommand::Shutdown(parse_node(number, node_count)?));
        }

        Err(Error::Protocol(format!("unrecognized control command: {:?}", line)))
    }
}

fn parse_node(number: &str, node_count: usize) -> Result<usize> {
    match number.parse::<usize>() {
        Ok(n) if (1..=node_count).contains(&n) => Ok(n - 1),
        _ => Err(Error::InvalidNode(format!(
            "Invalid server number {:?}! Please specify 1 to {}.",
            number, node_count
        ))),
    }
}

/// Operator-facing outcome of a control command. Node indices are 0-based;
/// `Display` renders them 1-based.
#[derive(Debug, Clone)]
pub enum ControlReport {
    Started { node: usize, addr: SocketAddr },
    AlreadyRunning { node: usize },
    StartFailed { node: usize, error: String },
    AllRunning,
    Stopped { node: usize },
    NotRunning { node: usize },
    NoneRunning,
    Status(Vec<NodeInfo>),
    InvalidNode(String),
    InvalidCommand(String),
}

impl fmt::Display for ControlReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlReport::Started { node, addr } => {
                write!(f, "Server {} started on {}.", node + 1, addr)
            }
            ControlReport::AlreadyRunning { node } => {
                write!(f, "Server {} is already running.", node + 1)
            }
            ControlReport::StartFailed { node, error } => {
                write!(f, "Server {} failed to start: {}", node + 1, error)
            }
            ControlReport::AllRunning => f.write_str("All servers are already running."),
            ControlReport::Stopped { node } => write!(f, "Server {} has shut down.", node + 1),
            ControlReport::NotRunning { node } => {
                write!(f, "Server {} is not running.", node + 1)
            }
            ControlReport::NoneRunning => f.write_str("No servers are currently running."),
            ControlReport::Status(nodes) => {
                for (i, node) in nodes.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(
                        f,
                        "Server {} [{}] {} -> {}",
                        node.number,
                        node.status,
                        node.addr,
                        node.directory.display()
                    )?;
                }
                Ok(())
            }
            ControlReport::InvalidNode(message) => f.write_str(message),
            ControlReport::InvalidCommand(_) => f.write_str("Invalid command! Try again."),
        }
    }
}

/// Where operator commands come from.
///
/// `Ok(None)` means the source is exhausted; an `Err` ends the control loop.
pub trait CommandSource {
    fn next_command(&mut self) -> impl Future<Output = Result<Option<String>>> + Send;
}

impl<R> CommandSource for Lines<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    fn next_command(&mut self) -> impl Future<Output = Result<Option<String>>> + Send {
        async move { Ok(self.next_line().await?) }
    }
}

impl CommandSource for mpsc::Receiver<String> {
    fn next_command(&mut self) -> impl Future<Output = Result<Option<String>>> + Send {
        async move { Ok(self.recv().await) }
    }
}

/// Forward lines from a blocking reader on a dedicated thread.
///
/// The thread is detached, so a read blocked on an idle terminal never
/// keeps the process alive. It ends at EOF, on a read error, or once the
/// receiver is dropped and the next line arrives.
pub fn spawn_line_reader<R>(reader: R, capacity: usize) -> Result<mpsc::Receiver<String>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(capacity);
    std::thread::Builder::new()
        .name("control-input".to_string())
        .spawn(move || {
            for line in reader.lines() {
                match line {
                    Ok(line) => {
                        if tx.blocking_send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Control input failed: {}", e);
                        break;
                    }
                }
            }
        })?;
    Ok(rx)
}

pub struct ControlLoop<S> {
    manager: Arc<NodeManager>,
    source: S,
    reports: mpsc::UnboundedSender<ControlReport>,
}

impl<S: CommandSource> ControlLoop<S> {
    pub fn new(
        manager: Arc<NodeManager>,
        source: S,
        reports: mpsc::UnboundedSender<ControlReport>,
    ) -> Self {
        Self {
            manager,
            source,
            reports,
        }
    }

    /// Run until the command source is exhausted or fails.
    pub async fn run(mut self) -> Result<()> {
        while let Some(line) = self.source.next_command().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match ControlCommand::parse(line, self.manager.len()) {
                Ok(command) => {
                    tracing::debug!(?command, "Control command");
                    self.execute(command).await;
                }
                Err(Error::InvalidNode(message)) => self.report(ControlReport::InvalidNode(message)),
                Err(_) => self.report(ControlReport::InvalidCommand(line.to_string())),
            }
        }

        tracing::info!("Control input closed");
        Ok(())
    }

    async fn execute(&self, command: ControlCommand) {
        match command {
            ControlCommand::Start(index) => self.spawn_start(index),
            ControlCommand::StartAll => {
                let stopped = self.manager.stopped_nodes();
                if stopped.is_empty() {
                    self.report(ControlReport::AllRunning);
                }
                for index in stopped {
                    self.spawn_start(index);
                }
            }
            ControlCommand::Shutdown(index) => self.stop(index).await,
            ControlCommand::ShutdownAll => {
                let active = self.manager.active_nodes();
                if active.is_empty() {
                    self.report(ControlReport::NoneRunning);
                }
                for index in active {
                    self.stop(index).await;
                }
            }
            ControlCommand::Status => self.report(ControlReport::Status(self.manager.snapshot())),
        }
    }

    fn spawn_start(&self, index: usize) {
        let claim = match self.manager.claim(index) {
            Ok(Some(claim)) => claim,
            Ok(None) => return self.report(ControlReport::AlreadyRunning { node: index }),
            Err(e) => return self.report(ControlReport::InvalidNode(e.to_string())),
        };

        let manager = self.manager.clone();
        let reports = self.reports.clone();
        tokio::spawn(async move {
            let report = match manager.launch(claim).await {
                Ok(StartOutcome::Started(addr)) => ControlReport::Started { node: index, addr },
                Ok(StartOutcome::AlreadyRunning) => ControlReport::AlreadyRunning { node: index },
                Err(e) => ControlReport::StartFailed {
                    node: index,
                    error: e.to_string(),
                },
            };
            let _ = reports.send(report);
        });
    }

    async fn stop(&self, index: usize) {
        let report = match self.manager.stop(index).await {
            Ok(StopOutcome::Stopped) => ControlReport::Stopped { node: index },
            Ok(StopOutcome::NotRunning) => ControlReport::NotRunning { node: index },
            Err(e) => ControlReport::InvalidNode(e.to_string()),
        };
        self.report(report);
    }

    fn report(&self, report: ControlReport) {
        if self.reports.send(report).is_err() {
            tracing::debug!("Report receiver dropped");
        }
    }
}
