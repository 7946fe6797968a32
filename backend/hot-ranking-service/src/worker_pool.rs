//! Bounded pool for fire-and-forget side effects
//!
//! Tasks are queued on a bounded channel and run by a fixed set of workers.
//! Failures (errors and panics) go to an error channel drained by a reporter
//! task, so nothing fails silently in the background.

use futures::future::BoxFuture;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::WorkerPoolConfig;
use crate::error::{AppError, Result};
use crate::metrics;

struct Job {
    name: &'static str,
    task: BoxFuture<'static, Result<()>>,
}

#[derive(Debug, Clone)]
pub struct TaskFailure {
    pub task: &'static str,
    pub error: String,
}

/// Cloneable submission side of a [`TaskPool`].
#[derive(Clone)]
pub struct TaskPoolHandle {
    sender: mpsc::Sender<Job>,
}

impl TaskPoolHandle {
    /// Queue a task, waiting for room when the queue is full.
    pub async fn submit<F>(&self, name: &'static str, task: F) -> Result<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.sender
            .send(Job {
                name,
                task: Box::pin(task),
            })
            .await
            .map_err(|_| AppError::Internal("task pool is shut down".to_string()))
    }

    /// Queue a task without waiting. Fails with `Overloaded` when full.
    pub fn try_submit<F>(&self, name: &'static str, task: F) -> Result<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.sender
            .try_send(Job {
                name,
                task: Box::pin(task),
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => AppError::Overloaded,
                mpsc::error::TrySendError::Closed(_) => {
                    AppError::Internal("task pool is shut down".to_string())
                }
            })
    }
}

pub struct TaskPool {
    handle: TaskPoolHandle,
    stop: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
    reporter: JoinHandle<()>,
    failures: Arc<AtomicU64>,
}

enum Next {
    Job(Job),
    Stop,
    Closed,
}

impl TaskPool {
    pub fn new(config: &WorkerPoolConfig) -> Self {
        let (sender, receiver) = mpsc::channel::<Job>(config.queue_capacity.max(1));
        let (error_tx, error_rx) = mpsc::unbounded_channel::<TaskFailure>();
        let (stop, stop_rx) = watch::channel(false);
        let receiver = Arc::new(Mutex::new(receiver));
        let failures = Arc::new(AtomicU64::new(0));

        let workers = (0..config.workers.max(1))
            .map(|id| {
                tokio::spawn(run_worker(
                    id,
                    Arc::clone(&receiver),
                    error_tx.clone(),
                    stop_rx.clone(),
                ))
            })
            .collect();

        let reporter = tokio::spawn(report_failures(error_rx, Arc::clone(&failures)));

        info!(
            workers = config.workers.max(1),
            queue_capacity = config.queue_capacity.max(1),
            "Task pool started"
        );

        Self {
            handle: TaskPoolHandle { sender },
            stop,
            workers,
            reporter,
            failures,
        }
    }

    pub fn handle(&self) -> TaskPoolHandle {
        self.handle.clone()
    }

    /// Stop accepting work, run whatever is already queued, then wait for
    /// workers and the reporter. Returns the total failure count.
    pub async fn shutdown(self) -> u64 {
        let _ = self.stop.send(true);
        drop(self.handle);

        for worker in self.workers {
            if let Err(e) = worker.await {
                error!(error = %e, "Task pool worker terminated abnormally");
            }
        }
        if let Err(e) = self.reporter.await {
            error!(error = %e, "Task pool reporter terminated abnormally");
        }

        let failures = self.failures.load(Ordering::Relaxed);
        info!(failures = failures, "Task pool stopped");
        failures
    }
}

async fn run_worker(
    id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
    errors: mpsc::UnboundedSender<TaskFailure>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let next = {
            let mut rx = receiver.lock().await;
            tokio::select! {
                biased;
                job = rx.recv() => job.map_or(Next::Closed, Next::Job),
                _ = stop.changed() => Next::Stop,
            }
        };

        match next {
            Next::Job(job) => run_job(job, &errors).await,
            Next::Closed => break,
            Next::Stop => {
                // Drain what was queued before the stop signal.
                loop {
                    let queued = receiver.lock().await.try_recv();
                    match queued {
                        Ok(job) => run_job(job, &errors).await,
                        Err(_) => break,
                    }
                }
                break;
            }
        }
    }
    debug!(worker = id, "Task pool worker exiting");
}

async fn run_job(job: Job, errors: &mpsc::UnboundedSender<TaskFailure>) {
    let name = job.name;
    let error = match tokio::spawn(job.task).await {
        Ok(Ok(())) => return,
        Ok(Err(e)) => e.to_string(),
        Err(e) if e.is_panic() => "task panicked".to_string(),
        Err(e) => e.to_string(),
    };
    let _ = errors.send(TaskFailure { task: name, error });
}

async fn report_failures(
    mut errors: mpsc::UnboundedReceiver<TaskFailure>,
    failures: Arc<AtomicU64>,
) {
    while let Some(failure) = errors.recv().await {
        failures.fetch_add(1, Ordering::Relaxed);
        metrics::record_task_failure(failure.task);
        error!(task = failure.task, error = %failure.error, "Background task failed");
    }
}
