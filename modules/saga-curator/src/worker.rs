use std::future::Future;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Bounded pool for refresh jobs. The scheduler takes a permit before claiming a topic,
/// so it never claims more work than it can start.
#[derive(Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> anyhow::Result<OwnedSemaphorePermit> {
        Ok(self.semaphore.clone().acquire_owned().await?)
    }

    /// Run `job` on its own task, releasing `permit` when it finishes.
    pub fn spawn<F>(&self, permit: OwnedSemaphorePermit, job: F) -> tokio::task::JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            job.await;
            drop(permit);
        })
    }

    /// Wait until every running job has finished.
    pub async fn drain(&self) -> anyhow::Result<()> {
        debug!(size = self.size, "Draining worker pool");
        let all = self.semaphore.acquire_many(self.size as u32).await?;
        drop(all);
        Ok(())
    }
}
