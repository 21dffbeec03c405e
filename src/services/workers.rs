//! Bounded worker pool consuming rendition tasks from a shared channel.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::models::job::{ImageTask, ProcessError, ProcessErrorKind};
use crate::services::offload::{self, OffloadClient};
use crate::services::renditions;
use crate::services::storage::BlobStore;

/// One unit of work plus the per-job channel its error list is reported on.
pub struct RenditionTask {
    pub task: ImageTask,
    pub reply: mpsc::Sender<Vec<ProcessError>>,
}

/// Dependencies shared by every worker.
pub struct WorkerContext {
    pub storage: Arc<BlobStore>,
    pub http: reqwest::Client,
    pub images_folder: String,
    /// Set when `LAMBDA_FUNC` is configured; tasks are then sent to the
    /// remote runtime instead of being rendered locally.
    pub offload: Option<Arc<OffloadClient>>,
}

/// Fixed-size pool. Tasks are tenant-unaware and fully self-describing;
/// workers pull from one shared channel and reply on the channel embedded in
/// each task.
pub struct WorkerPool {
    sender: Mutex<Option<mpsc::Sender<RenditionTask>>>,
    done: Mutex<mpsc::Receiver<()>>,
    size: usize,
}

impl WorkerPool {
    pub fn start(size: usize, ctx: WorkerContext) -> Self {
        let (task_tx, task_rx) = mpsc::channel(1);
        let (done_tx, done_rx) = mpsc::channel(size.max(1));
        let task_rx = Arc::new(Mutex::new(task_rx));
        let ctx = Arc::new(ctx);

        tracing::debug!(cpus = num_cpus::get(), workers = size, "spawning worker pool");

        for worker_id in 0..size {
            tokio::spawn(run_worker(
                worker_id,
                Arc::clone(&task_rx),
                Arc::clone(&ctx),
                done_tx.clone(),
            ));
        }

        Self {
            sender: Mutex::new(Some(task_tx)),
            done: Mutex::new(done_rx),
            size,
        }
    }

    /// Queue a task; waits while every worker is busy.
    pub async fn submit(&self, task: RenditionTask) -> Result<(), PoolClosed> {
        let sender = self.sender.lock().await.clone().ok_or(PoolClosed)?;
        sender.send(task).await.map_err(|_| PoolClosed)
    }

    /// Close the task channel and wait for every worker to finish its
    /// in-flight task.
    pub async fn shutdown(&self) {
        self.sender.lock().await.take();

        let mut done = self.done.lock().await;
        for _ in 0..self.size {
            let _ = done.recv().await;
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("worker pool is shut down")]
pub struct PoolClosed;

async fn run_worker(
    worker_id: usize,
    tasks: Arc<Mutex<mpsc::Receiver<RenditionTask>>>,
    ctx: Arc<WorkerContext>,
    done: mpsc::Sender<()>,
) {
    loop {
        let task = { tasks.lock().await.recv().await };
        let Some(task) = task else { break };

        let errors = execute(&ctx, &task.task).await;
        if task.reply.send(errors).await.is_err() {
            tracing::warn!(worker_id, "job reply channel dropped before reply");
        }
    }

    let _ = done.send(()).await;
}

/// Run a task locally or through the offload runtime. Offload tasks are
/// pruned against the manifest first so the remote side never recomputes an
/// existing rendition; a task with nothing left to do is an immediate ok.
async fn execute(ctx: &WorkerContext, task: &ImageTask) -> Vec<ProcessError> {
    match &ctx.offload {
        Some(client) => {
            let (pruned, has_work) = offload::prune_against_manifest(task, &ctx.images_folder);
            if !has_work {
                return Vec::new();
            }

            match client.process(&pruned).await {
                Ok(()) => Vec::new(),
                Err(e) => vec![ProcessError {
                    url: task
                        .image
                        .as_ref()
                        .map(|image| image.url.clone())
                        .unwrap_or_default(),
                    kind: ProcessErrorKind::Upload,
                    msg: e.to_string(),
                    dim: String::new(),
                }],
            }
        }
        None => renditions::process_task(ctx, task).await,
    }
}
