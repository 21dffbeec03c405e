use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::AppConfig;
use crate::services::dispatcher::Job;
use crate::services::queue::ImageQueue;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    /// Publishing side of the image queue.
    pub queue: Arc<ImageQueue>,
    /// Sender feeding the job dispatcher directly (urgent submissions).
    pub jobs: mpsc::Sender<Job>,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, queue: Arc<ImageQueue>, jobs: mpsc::Sender<Job>) -> Self {
        Self {
            config,
            queue,
            jobs,
        }
    }
}
