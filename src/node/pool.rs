//! Bounded worker pool shared by every node
//!
//! Accepted connections are handed to the pool as futures. At most
//! `capacity` of them run at once; the rest wait for a permit, so a burst
//! of connections cannot fan out into unbounded concurrent file I/O.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

#[derive(Clone, Debug)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl WorkerPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Workers currently holding a permit
    pub fn busy(&self) -> usize {
        self.capacity - self.permits.available_permits()
    }

    /// Queue a job. Returns immediately; the job starts once a permit frees up.
    pub fn submit<F>(&self, job: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permits = self.permits.clone();
        tokio::spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    tracing::warn!("Worker pool closed, dropping job");
                    return;
                }
            };
            job.await;
        })
    }
}
