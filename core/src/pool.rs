//! # Worker Pool
//!
//! A fixed set of OS threads draining a FIFO task queue. The broker creates
//! one pool and hands it to every channel; publish-triggered deliveries run
//! here so a connection's receive path never waits on consumer callbacks.
//!
//! [`WorkerPool::submit`] returns a [`TaskHandle`] that resolves to the
//! task's result, either by `.await` or by the blocking [`TaskHandle::wait`].
//! After [`WorkerPool::shutdown`] new submissions are rejected; tasks that
//! were already queued still run before the workers exit.

use crate::{Result, TidemqError};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::thread::{self, JoinHandle};
use tokio::sync::oneshot;
use tracing::{debug, error, info};

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct WorkerPool {
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl WorkerPool {
    /// Start `threads` workers (at least one)
    pub fn new(threads: usize) -> Result<Self> {
        let size = threads.max(1);
        let (sender, receiver): (Sender<Job>, Receiver<Job>) = channel::unbounded();

        let mut workers = Vec::with_capacity(size);
        for i in 0..size {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("tidemq-worker-{}", i))
                .spawn(move || {
                    while let Ok(job) = receiver.recv() {
                        job();
                    }
                    debug!("Worker {} exiting", i);
                })?;
            workers.push(handle);
        }

        info!("Started worker pool with {} threads", size);
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Queue `task`; fails once the pool has been shut down
    pub fn submit<F, T>(&self, task: F) -> Result<TaskHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(task)).map_err(|payload| {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!("Worker task panicked: {}", reason);
                reason
            });
            let _ = tx.send(outcome);
        });

        let guard = self.sender.lock();
        let sender = guard.as_ref().ok_or(TidemqError::PoolShutdown)?;
        sender.send(job).map_err(|_| TidemqError::PoolShutdown)?;
        Ok(TaskHandle { receiver: rx })
    }

    pub fn is_shutdown(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Stop accepting tasks, drain the queue and join the workers
    pub fn shutdown(&self) {
        let sender = self.sender.lock().take();
        if sender.is_none() {
            return;
        }
        drop(sender);

        let current = thread::current().id();
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in workers {
            // A task shutting down its own pool cannot join itself
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!("Worker thread terminated abnormally");
            }
        }
        info!("Worker pool shut down");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Completion of a submitted task
#[derive(Debug)]
pub struct TaskHandle<T> {
    receiver: oneshot::Receiver<std::result::Result<T, String>>,
}

impl<T> TaskHandle<T> {
    /// Block the current thread until the task finishes.
    ///
    /// Must not be called from inside an async runtime; `.await` the handle
    /// there instead.
    pub fn wait(self) -> Result<T> {
        match self.receiver.blocking_recv() {
            Ok(outcome) => outcome.map_err(TidemqError::Task),
            Err(_) => Err(TidemqError::Task("task dropped before completion".to_string())),
        }
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome.map_err(TidemqError::Task)),
            Poll::Ready(Err(_)) => Poll::Ready(Err(TidemqError::Task(
                "task dropped before completion".to_string(),
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}
