//! Bounded task fan-out shared by hashing, transfer and push.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use crate::error::{ComstarError, Result};

/// Caps the number of concurrently running file tasks.
#[derive(Debug, Clone)]
pub struct Limiter {
    sem: Arc<Semaphore>,
}

impl Limiter {
    pub fn new(jobs: usize) -> Self {
        Self {
            sem: Arc::new(Semaphore::new(jobs.max(1))),
        }
    }

    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        Arc::clone(&self.sem)
            .acquire_owned()
            .await
            .map_err(|e| ComstarError::Storage(format!("limiter closed: {e}")))
    }
}

/// Await every handle in spawn order; the first failure wins.
pub(crate) async fn join_tasks<T>(handles: Vec<JoinHandle<Result<T>>>) -> Result<Vec<T>> {
    futures::future::try_join_all(handles)
        .await?
        .into_iter()
        .collect()
}
