//! A FIFO pool of async workers.
//!
//! Jobs are handed out in submission order to the first idle worker. Each
//! submission returns a [`Done`] handle that resolves once the job's `run`
//! has returned. On shutdown, workers finish the job they are running and
//! stop receiving; jobs submitted afterwards are dropped and their `Done`
//! handles resolve with an error.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

use std::{num::NonZeroUsize, sync::Arc};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info_span, Instrument};

/// A unit of work run by the pool.
#[async_trait::async_trait]
pub trait Job: Send + 'static {
    async fn run(&mut self);

    fn job_name(&self) -> String;
}

/// Resolves once the submitted job has finished running.
pub type Done = oneshot::Receiver<()>;

#[derive(Debug)]
pub struct WorkerPool {
    tx: mpsc::UnboundedSender<Envelope>,
    size: usize,
}

struct Envelope {
    job: Box<dyn Job>,
    done: oneshot::Sender<()>,
}

type SharedRx = Arc<Mutex<mpsc::UnboundedReceiver<Envelope>>>;

// === impl WorkerPool ===

impl WorkerPool {
    /// Spawns `size` workers, or one per available CPU when `size` is zero.
    pub fn spawn(size: usize, shutdown: drain::Watch) -> Self {
        let size = if size == 0 {
            std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1)
        } else {
            size
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let rx = Arc::new(Mutex::new(rx));
        for id in 0..size {
            tokio::spawn(
                worker(rx.clone(), shutdown.clone()).instrument(info_span!("worker", id)),
            );
        }
        debug!(size, "Started worker pool");

        Self { tx, size }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn add_job(&self, job: impl Job) -> Done {
        let (done, rx) = oneshot::channel();
        let name = job.job_name();
        if self
            .tx
            .send(Envelope {
                job: Box::new(job),
                done,
            })
            .is_err()
        {
            debug!(job = %name, "Worker pool stopped; dropping job");
        }
        rx
    }
}

async fn worker(rx: SharedRx, shutdown: drain::Watch) {
    let signaled = shutdown.signaled();
    tokio::pin!(signaled);

    let release = loop {
        let next = tokio::select! {
            biased;
            release = &mut signaled => break release,
            next = async { rx.lock().await.recv().await } => next,
        };

        let Some(Envelope { mut job, done }) = next else {
            debug!("Job channel closed");
            return;
        };

        let name = job.job_name();
        debug!(job = %name, "Running job");
        job.run().await;
        debug!(job = %name, "Job finished");
        let _ = done.send(());
    };

    debug!("Shutting down");
    drop(rx);
    drop(release);
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope")
            .field("job", &self.job.job_name())
            .finish()
    }
}
