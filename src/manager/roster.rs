//! Node roster and lifecycle
//!
//! The manager owns one [`NodeSlot`] per configured node. Each slot guards
//! its own state, so starting or stopping one node never waits on another.
//! A running slot holds the shutdown handle of its accept loop; dropping
//! that handle into `stop` is the only way a node goes down on purpose.

use crate::common::{Config, Error, NodeStatus, Result};
use crate::node::{NodeRuntime, StopReason, WorkerPool};
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{oneshot, Notify};

/// Result of a start request that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started(SocketAddr),
    AlreadyRunning,
}

/// Result of a stop request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NotRunning,
}

/// Point-in-time view of one node
#[derive(Debug, Clone, Serialize)]
pub struct NodeInfo {
    /// Operator-facing number (1-based)
    pub number: usize,
    pub addr: SocketAddr,
    pub directory: PathBuf,
    pub status: NodeStatus,
}

struct RunningNode {
    generation: u64,
    shutdown: oneshot::Sender<()>,
    finished: oneshot::Receiver<()>,
}

enum SlotState {
    Stopped,
    Starting,
    Running(RunningNode),
}

struct NodeSlot {
    addr: SocketAddr,
    directory: PathBuf,
    state: Mutex<SlotState>,
    /// Signalled whenever the slot leaves `Starting`
    settled: Notify,
}

impl NodeSlot {
    fn new(addr: SocketAddr, directory: PathBuf) -> Self {
        Self {
            addr,
            directory,
            state: Mutex::new(SlotState::Stopped),
            settled: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Leave `Starting` for `state` and wake anyone waiting on the start.
    fn settle(&self, state: SlotState) {
        *self.lock() = state;
        self.settled.notify_waiters();
    }

    fn status(&self) -> NodeStatus {
        match *self.lock() {
            SlotState::Stopped => NodeStatus::Stopped,
            SlotState::Starting => NodeStatus::Starting,
            SlotState::Running(_) => NodeStatus::Running,
        }
    }

    /// Mark the slot stopped if it still belongs to the given run.
    fn release(&self, generation: u64) {
        let mut state = self.lock();
        if matches!(&*state, SlotState::Running(run) if run.generation == generation) {
            *state = SlotState::Stopped;
        }
    }
}

/// Exclusive right to start one node, taken by [`NodeManager::claim`].
///
/// The node reports `Starting` while the claim is held. A claim dropped
/// without being launched puts the node back to stopped.
pub struct StartClaim {
    index: usize,
    slot: Arc<NodeSlot>,
    settled: bool,
}

impl StartClaim {
    pub fn index(&self) -> usize {
        self.index
    }

    fn settle(&mut self, state: SlotState) {
        self.settled = true;
        self.slot.settle(state);
    }
}

impl Drop for StartClaim {
    fn drop(&mut self) {
        if !self.settled {
            self.slot.settle(SlotState::Stopped);
        }
    }
}

/// Wait for a node's accept loop and release the slot if the loop died on
/// its own. A slot already handed to a newer run is left alone.
async fn supervise(
    slot: Arc<NodeSlot>,
    generation: u64,
    run: impl Future<Output = StopReason>,
    finished: oneshot::Sender<()>,
) {
    if let StopReason::AcceptFailed(_) = run.await {
        slot.release(generation);
    }
    let _ = finished.send(());
}

pub struct NodeManager {
    slots: Vec<Arc<NodeSlot>>,
    pool: WorkerPool,
    generation: AtomicU64,
}

impl NodeManager {
    /// Build the roster from configuration; every node starts stopped.
    pub fn new(config: &Config) -> Self {
        Self::with_pool(config, WorkerPool::new(config.worker_pool_size))
    }

    pub fn with_pool(config: &Config, pool: WorkerPool) -> Self {
        let slots = config
            .nodes
            .iter()
            .map(|node| Arc::new(NodeSlot::new(config.node_addr(node), node.directory.clone())))
            .collect();

        Self {
            slots,
            pool,
            generation: AtomicU64::new(0),
        }
    }

    /// Number of nodes in the roster
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    fn slot(&self, index: usize) -> Result<&Arc<NodeSlot>> {
        self.slots.get(index).ok_or_else(|| {
            Error::InvalidNode(format!(
                "node {} does not exist (have {})",
                index + 1,
                self.slots.len()
            ))
        })
    }

    pub fn status(&self, index: usize) -> Result<NodeStatus> {
        Ok(self.slot(index)?.status())
    }

    pub fn snapshot(&self) -> Vec<NodeInfo> {
        self.slots
            .iter()
            .enumerate()
            .map(|(index, slot)| NodeInfo {
                number: index + 1,
                addr: slot.addr,
                directory: slot.directory.clone(),
                status: slot.status(),
            })
            .collect()
    }

    /// Indices of nodes with no runtime bound or binding
    pub fn stopped_nodes(&self) -> Vec<usize> {
        self.indices_where(|status| !status.is_active())
    }

    pub fn running_nodes(&self) -> Vec<usize> {
        self.indices_where(|status| status == NodeStatus::Running)
    }

    /// Indices of nodes that are running or still binding
    pub fn active_nodes(&self) -> Vec<usize> {
        self.indices_where(|status| status.is_active())
    }

    fn indices_where(&self, pred: impl Fn(NodeStatus) -> bool) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| pred(slot.status()))
            .map(|(index, _)| index)
            .collect()
    }

    /// Bind node `index` and spawn its accept loop.
    ///
    /// A node that is already running or still binding is left alone.
    pub async fn start(&self, index: usize) -> Result<StartOutcome> {
        match self.claim(index)? {
            Some(claim) => self.launch(claim).await,
            None => Ok(StartOutcome::AlreadyRunning),
        }
    }

    /// Move a stopped node to `Starting`; `None` if it is already active.
    pub fn claim(&self, index: usize) -> Result<Option<StartClaim>> {
        let slot = self.slot(index)?;
        let mut state = slot.lock();
        if !matches!(*state, SlotState::Stopped) {
            return Ok(None);
        }
        *state = SlotState::Starting;
        Ok(Some(StartClaim {
            index,
            slot: slot.clone(),
            settled: false,
        }))
    }

    /// Bind a claimed node and spawn its accept loop.
    pub async fn launch(&self, mut claim: StartClaim) -> Result<StartOutcome> {
        let index = claim.index;
        let slot = claim.slot.clone();
        let runtime = match NodeRuntime::bind(
            index,
            slot.addr,
            slot.directory.clone(),
            self.pool.clone(),
        )
        .await
        {
            Ok(runtime) => runtime,
            Err(e) => {
                claim.settle(SlotState::Stopped);
                tracing::error!(node = index + 1, "Start failed: {}", e);
                return Err(e);
            }
        };

        let local_addr = runtime.local_addr();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (finished_tx, finished_rx) = oneshot::channel();

        claim.settle(SlotState::Running(RunningNode {
            generation,
            shutdown: shutdown_tx,
            finished: finished_rx,
        }));
        tokio::spawn(supervise(
            slot,
            generation,
            runtime.run(shutdown_rx),
            finished_tx,
        ));

        Ok(StartOutcome::Started(local_addr))
    }

    /// Close node `index`'s listener and wait until the port is released.
    ///
    /// A node still binding is waited for and then stopped. Connections
    /// already handed to workers keep running.
    pub async fn stop(&self, index: usize) -> Result<StopOutcome> {
        let slot = self.slot(index)?;
        let running = loop {
            let settled = slot.settled.notified();
            tokio::pin!(settled);
            // Register before looking at the state so a start finishing in
            // between still wakes us.
            settled.as_mut().enable();

            {
                let mut state = slot.lock();
                match std::mem::replace(&mut *state, SlotState::Stopped) {
                    SlotState::Running(running) => break running,
                    SlotState::Stopped => return Ok(StopOutcome::NotRunning),
                    SlotState::Starting => *state = SlotState::Starting,
                }
            }
            settled.await;
        };

        let _ = running.shutdown.send(());
        let _ = running.finished.await;
        tracing::info!(node = index + 1, "Node stopped");
        Ok(StopOutcome::Stopped)
    }

    /// Stop every active node; returns the indices that were stopped.
    pub async fn stop_all(&self) -> Vec<usize> {
        let mut stopped = Vec::new();
        for index in self.active_nodes() {
            if let Ok(StopOutcome::Stopped) = self.stop(index).await {
                stopped.push(index);
            }
        }
        stopped
    }
}
