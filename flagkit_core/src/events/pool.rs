use std::sync::mpsc::{sync_channel, SyncSender, TrySendError};
use std::thread::JoinHandle;

/// A fixed-size pool of worker threads with no internal queue.
///
/// Each worker owns a rendezvous channel, so [`WorkerPool::post`] succeeds only while some
/// worker is parked waiting for a job. A busy pool rejects the job and hands it back to the
/// caller, which is the pipeline's backpressure mechanism for outbound I/O.
pub(crate) struct WorkerPool<T: Send + 'static> {
    workers: Vec<Worker<T>>,
}

struct Worker<T: Send + 'static> {
    sender: Option<SyncSender<T>>,
    handle: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> WorkerPool<T> {
    pub fn new<F>(name: &str, size: usize, handler: F) -> std::io::Result<WorkerPool<T>>
    where
        F: Fn(T) + Send + Clone + 'static,
    {
        let mut workers = Vec::with_capacity(size);
        for i in 0..size {
            let (sender, receiver) = sync_channel::<T>(0);
            let handler = handler.clone();
            let handle = std::thread::Builder::new()
                .name(format!("{name}-{i}"))
                .spawn(move || {
                    while let Ok(job) = receiver.recv() {
                        handler(job);
                    }
                })?;
            workers.push(Worker { sender: Some(sender), handle: Some(handle) });
        }
        Ok(WorkerPool { workers })
    }

    /// Hand `job` to an idle worker. Returns the job back if every worker is busy.
    pub fn post(&self, mut job: T) -> std::result::Result<(), T> {
        for worker in &self.workers {
            let Some(sender) = &worker.sender else { continue };
            match sender.try_send(job) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(rejected)) | Err(TrySendError::Disconnected(rejected)) => {
                    job = rejected;
                }
            }
        }
        Err(job)
    }

    /// Blocking-send one job to every worker, waiting for each to accept. Used with barrier
    /// jobs to wait until all outstanding work has finished.
    pub fn broadcast(&self, mut make_job: impl FnMut() -> T) -> usize {
        let mut delivered = 0;
        for worker in &self.workers {
            if let Some(sender) = &worker.sender {
                if sender.send(make_job()).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    /// Stop accepting jobs and join every worker.
    pub fn shutdown(&mut self) {
        for worker in &mut self.workers {
            worker.sender = None;
        }
        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take() {
                let _ = handle.join();
            }
        }
    }
}

impl<T: Send + 'static> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
