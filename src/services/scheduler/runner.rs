use super::SchedulerService;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info};

impl SchedulerService {
    /// Starts the background task that polls for due actions every `interval`.
    pub fn start_runner(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(?interval, "Scheduled action runner started.");
            loop {
                sleep(interval).await;

                if let Err(e) = self.poll_once().await {
                    error!("Failed to poll scheduled actions: {:?}", e);
                }
            }
        })
    }
}
