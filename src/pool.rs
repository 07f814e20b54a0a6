use std::{future::Future, sync::Arc};

use tokio::{
    runtime::{Builder, Runtime},
    sync::{OwnedSemaphorePermit, Semaphore},
};

use crate::error::{ABCErr, ABCResult};

/// Permits for loss evaluations on blocking threads, one per thread.
///
/// An evaluation holds its permit until it returns, even after its caller has
/// given up on it, so a waiting evaluation always has a free thread to start on.
#[derive(Debug, Clone)]
pub struct EvaluationSlots(Arc<Semaphore>);
impl EvaluationSlots {
    pub fn new(size: usize) -> Self {
        Self(Arc::new(Semaphore::new(size)))
    }

    pub async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.0).acquire_owned().await.ok()
    }

    pub fn available(&self) -> usize {
        self.0.available_permits()
    }
}

/// Fixed-size set of worker threads that generation attempts fan out onto.
pub struct WorkerPool {
    runtime: Option<Runtime>,
    size: usize,
    slots: EvaluationSlots,
}
impl WorkerPool {
    pub fn new(size: usize) -> ABCResult<Self> {
        if size == 0 {
            return Err(ABCErr::WorkerPoolError(
                "Could not start worker pool with zero workers".into(),
            ));
        }

        let runtime = Builder::new_multi_thread()
            .worker_threads(size)
            .max_blocking_threads(size)
            .thread_name("abc-worker")
            .enable_all()
            .build()
            .map_err(|e| ABCErr::WorkerPoolError(format!("Could not start worker pool: {}", e)))?;

        log::info!("Starting worker pool of size {}", size);
        Ok(Self {
            runtime: Some(runtime),
            size,
            slots: EvaluationSlots::new(size),
        })
    }

    /// One worker per available CPU, or `num_workers` if given.
    pub fn from_config(num_workers: Option<usize>) -> ABCResult<Self> {
        let size = match num_workers {
            Some(n) => n,
            None => std::thread::available_parallelism()
                .map_err(|e| {
                    ABCErr::WorkerPoolError(format!("Could not determine parallelism: {}", e))
                })?
                .get(),
        };
        Self::new(size)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn evaluation_slots(&self) -> EvaluationSlots {
        self.slots.clone()
    }

    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        match &self.runtime {
            Some(runtime) => runtime.block_on(future),
            None => unreachable!("runtime is only taken on drop"),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Evaluations abandoned after a timeout may still be running; don't wait for them
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
