//! Bounded worker pool for chunk writes
//!
//! Core workers start with the pool and pull tasks from a bounded queue.
//! When the queue is full the pool grows, up to `max_workers`, by spawning a
//! worker whose first task is the one that did not fit. Past that the caller
//! runs the task itself, which throttles the producer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::PipelineError;

/// Work executed by pool workers
#[async_trait]
pub trait TaskHandler<T>: Send + Sync + 'static {
    async fn handle(&self, task: T);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub core_workers: usize,
    pub max_workers: usize,
    pub queue_capacity: usize,
}

/// Where a submitted task ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Queued,
    NewWorker,
    CallerRan,
}

type SharedReceiver<T> = Arc<Mutex<mpsc::Receiver<T>>>;

pub struct WorkerPool<T: Send + 'static> {
    sender: Option<mpsc::Sender<T>>,
    receiver: SharedReceiver<T>,
    handler: Arc<dyn TaskHandler<T>>,
    workers: JoinSet<()>,
    max_workers: usize,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Start the pool with its core workers running.
    pub fn start(settings: PoolSettings, handler: Arc<dyn TaskHandler<T>>) -> Self {
        let (sender, receiver) = mpsc::channel(settings.queue_capacity.max(1));
        let mut pool = Self {
            sender: Some(sender),
            receiver: Arc::new(Mutex::new(receiver)),
            handler,
            workers: JoinSet::new(),
            max_workers: settings.max_workers.max(settings.core_workers).max(1),
        };

        for _ in 0..settings.core_workers.max(1) {
            pool.spawn_worker(None);
        }
        pool
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Hand `task` to the pool.
    pub async fn submit(&mut self, task: T) -> Dispatch {
        let Some(sender) = &self.sender else {
            self.handler.handle(task).await;
            return Dispatch::CallerRan;
        };

        match sender.try_send(task) {
            Ok(()) => Dispatch::Queued,
            Err(TrySendError::Full(task)) if self.workers.len() < self.max_workers => {
                debug!(workers = self.workers.len() + 1, "queue full, adding worker");
                self.spawn_worker(Some(task));
                Dispatch::NewWorker
            },
            Err(TrySendError::Full(task)) | Err(TrySendError::Closed(task)) => {
                debug!("queue full at max workers, running task inline");
                self.handler.handle(task).await;
                Dispatch::CallerRan
            },
        }
    }

    /// Stop accepting tasks and wait up to `grace` for queued and running
    /// tasks to finish. Workers still running after that are aborted.
    pub async fn shutdown(mut self, grace: Duration) -> Result<(), PipelineError> {
        self.sender.take();

        let mut panicked = None;
        let drained = tokio::time::timeout(grace, async {
            while let Some(joined) = self.workers.join_next().await {
                if let Err(e) = joined {
                    warn!(error = %e, "chunk worker ended abnormally");
                    panicked.get_or_insert_with(|| e.to_string());
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(grace_secs = grace.as_secs(), remaining = self.workers.len(), "aborting chunk workers");
            self.workers.abort_all();
            return Err(PipelineError::ShutdownTimeout(grace));
        }

        match panicked {
            Some(message) => Err(PipelineError::Worker(message)),
            None => Ok(()),
        }
    }

    fn spawn_worker(&mut self, first: Option<T>) {
        let receiver = Arc::clone(&self.receiver);
        let handler = Arc::clone(&self.handler);
        self.workers.spawn(worker_loop(first, receiver, handler));
    }
}

async fn worker_loop<T: Send + 'static>(
    first: Option<T>,
    receiver: SharedReceiver<T>,
    handler: Arc<dyn TaskHandler<T>>,
) {
    if let Some(task) = first {
        handler.handle(task).await;
    }
    loop {
        let next = { receiver.lock().await.recv().await };
        match next {
            Some(task) => handler.handle(task).await,
            None => break,
        }
    }
}
