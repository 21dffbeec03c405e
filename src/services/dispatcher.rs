//! Per-job scatter-gather.
//!
//! The dispatcher owns each job for its lifetime: it snapshots the keys
//! already present under the shop prefix, fans one task per image spec plus
//! one deletion task onto the worker pool, collects exactly that many reply
//! lists, and then acknowledges or redelivers.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicNackOptions};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::models::job::{ImageProcessJobData, ImageTask, ProcessError};
use crate::services::paths;
use crate::services::storage::BlobStore;
use crate::services::workers::{RenditionTask, WorkerPool};

/// Delay before a failed queue job is negatively acknowledged, giving a
/// transient upstream failure a chance to heal before the redelivery.
const NACK_BACKOFF: Duration = Duration::from_secs(60);

/// A job owned by the dispatcher for its lifetime: the payload plus either
/// the queue delivery to answer or the synchronous caller to reply to.
pub struct Job {
    pub data: ImageProcessJobData,
    pub delivery: Option<Delivery>,
    pub reply: Option<oneshot::Sender<Vec<ProcessError>>>,
}

impl Job {
    pub fn queued(data: ImageProcessJobData, delivery: Delivery) -> Self {
        Self {
            data,
            delivery: Some(delivery),
            reply: None,
        }
    }

    pub fn synchronous(data: ImageProcessJobData, reply: oneshot::Sender<Vec<ProcessError>>) -> Self {
        Self {
            data,
            delivery: None,
            reply: Some(reply),
        }
    }
}

/// Run the dispatcher until the job channel closes. Jobs are processed one
/// at a time; parallelism lives in the worker pool underneath.
pub fn spawn(
    mut jobs: mpsc::Receiver<Job>,
    pool: Arc<WorkerPool>,
    storage: Arc<BlobStore>,
    images_folder: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(job) = jobs.recv().await {
            dispatch(job, &pool, &storage, &images_folder).await;
        }
        tracing::warn!("job channel closed, dispatcher stopping");
    })
}

async fn dispatch(job: Job, pool: &Arc<WorkerPool>, storage: &BlobStore, images_folder: &str) {
    let started = Instant::now();
    let Job {
        data,
        delivery,
        reply,
    } = job;
    let ImageProcessJobData {
        shop_id,
        image_extension,
        images,
        delete_images,
    } = data;

    tracing::debug!(shop_id, images = images.len(), "received new job");
    metrics::counter!("image_jobs_total").increment(1);

    let manifest = build_manifest(storage, images_folder, shop_id).await;

    // The reply count must be fixed before feeding starts, otherwise the
    // gather loop below deadlocks.
    let expected_replies = images.len() + 1;
    let (reply_tx, mut reply_rx) = mpsc::channel::<Vec<ProcessError>>(1);

    let feeder_pool = Arc::clone(pool);
    tokio::spawn(async move {
        for image in images {
            let task = RenditionTask {
                task: ImageTask {
                    image: Some(image),
                    shop_id,
                    image_extension: image_extension.clone(),
                    delete_images: Vec::new(),
                    manifest: manifest.clone(),
                },
                reply: reply_tx.clone(),
            };
            if feeder_pool.submit(task).await.is_err() {
                tracing::error!(shop_id, "worker pool closed while feeding job");
                return;
            }
        }

        let delete_task = RenditionTask {
            task: ImageTask {
                image: None,
                shop_id,
                image_extension: String::new(),
                delete_images,
                manifest: None,
            },
            reply: reply_tx,
        };
        if feeder_pool.submit(delete_task).await.is_err() {
            tracing::error!(shop_id, "worker pool closed while feeding job");
        }
    });

    let mut collected: Vec<ProcessError> = Vec::new();
    for _ in 0..expected_replies {
        match reply_rx.recv().await {
            Some(errors) => collected.extend(errors),
            // Feeder gave up because the pool is shutting down.
            None => break,
        }
    }

    tracing::debug!(
        shop_id,
        elapsed = ?started.elapsed(),
        errors = collected.len(),
        "job finished"
    );
    metrics::histogram!("image_job_seconds").record(started.elapsed().as_secs_f64());
    if !collected.is_empty() {
        metrics::counter!("image_job_errors_total").increment(collected.len() as u64);
    }

    for error in &collected {
        tracing::error!(shop_id, error = %error, "unable to process job");
    }

    // Synchronous submissions get the aggregated errors and never touch the
    // queue.
    if let Some(reply) = reply {
        let _ = reply.send(collected);
        return;
    }

    let Some(delivery) = delivery else { return };

    if collected.is_empty() {
        if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
            tracing::error!(shop_id, error = %e, "could not ack delivery");
        }
    } else {
        // Fire and forget: space the retry out, and drop the message for
        // good if this delivery was already a retry.
        tokio::spawn(async move {
            tokio::time::sleep(NACK_BACKOFF).await;
            let requeue = !delivery.redelivered;
            let options = BasicNackOptions {
                requeue,
                ..BasicNackOptions::default()
            };
            if let Err(e) = delivery.nack(options).await {
                tracing::error!(error = %e, "could not nack delivery");
            }
        });
    }
}

/// Snapshot the keys already present under the shop prefix. Listed exactly
/// once per job; every idempotence decision uses this snapshot. A failed
/// listing means every rendition is computed unconditionally.
async fn build_manifest(
    storage: &BlobStore,
    images_folder: &str,
    shop_id: i64,
) -> Option<Arc<HashSet<String>>> {
    if shop_id == 0 {
        return Some(Arc::new(HashSet::new()));
    }

    let started = Instant::now();
    let prefix = paths::join(&[
        images_folder,
        &paths::sub_path("", Some(shop_id), "", None, ""),
    ]);

    match storage.list_as_set(&prefix).await {
        Ok(keys) => {
            tracing::debug!(
                prefix = %prefix,
                keys = keys.len(),
                elapsed = ?started.elapsed(),
                "listed existing images"
            );
            Some(Arc::new(keys))
        }
        Err(e) => {
            tracing::error!(
                prefix = %prefix,
                error = %e,
                "could not list existing images, computing all renditions"
            );
            None
        }
    }
}
