//! Fire-and-forget archive dispatch.
//!
//! Jobs go onto an unbounded channel; a dispatcher task hands each one to a
//! worker task, with at most `worker_count` attempts running at once.

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::archive::{ArchiveOutcome, ArchiveService};

/// One queued archive attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveJob {
    pub owner_id: String,
    pub bookmark_id: String,
}

/// The dispatcher has stopped and no longer accepts jobs.
#[derive(Debug, thiserror::Error)]
#[error("Archive queue is closed")]
pub struct QueueClosed;

/// Handle for submitting background archive attempts.
#[derive(Clone)]
pub struct ArchiveQueue {
    sender: mpsc::UnboundedSender<ArchiveJob>,
}

impl ArchiveQueue {
    /// Start the dispatcher. The returned handle finishes once every
    /// `ArchiveQueue` clone is dropped and in-flight attempts have completed.
    pub fn start(service: ArchiveService, worker_count: usize) -> (Self, JoinHandle<()>) {
        let worker_count = worker_count.max(1);
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = tokio::spawn(dispatch(service, receiver, worker_count));
        info!(workers = worker_count, "Archive queue started");
        (Self { sender }, handle)
    }

    /// Enqueue one attempt for an owned bookmark.
    pub fn submit(&self, owner_id: &str, bookmark_id: &str) -> Result<(), QueueClosed> {
        self.sender
            .send(ArchiveJob {
                owner_id: owner_id.to_string(),
                bookmark_id: bookmark_id.to_string(),
            })
            .map_err(|_| QueueClosed)?;
        debug!(bookmark_id, "Queued archive");
        Ok(())
    }
}

async fn dispatch(
    service: ArchiveService,
    mut receiver: mpsc::UnboundedReceiver<ArchiveJob>,
    worker_count: usize,
) {
    let semaphore = Arc::new(Semaphore::new(worker_count));

    while let Some(job) = receiver.recv().await {
        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            break;
        };
        let service = service.clone();

        tokio::spawn(async move {
            let _permit = permit;
            match service.archive(&job.owner_id, &job.bookmark_id).await {
                Ok(ArchiveOutcome::Cached { artifacts, .. }) => {
                    debug!(bookmark_id = %job.bookmark_id, artifacts, "Background archive finished");
                }
                Ok(outcome) => {
                    debug!(bookmark_id = %job.bookmark_id, ?outcome, "Background archive finished");
                }
                Err(e) => {
                    error!(bookmark_id = %job.bookmark_id, error = %e, "Background archive failed");
                }
            }
        });
    }

    // Wait for in-flight workers.
    let _ = semaphore.acquire_many(worker_count as u32).await;
    debug!("Archive queue drained");
}
