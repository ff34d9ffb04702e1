//! Action worker
//!
//! The only consumer of the job queue. Jobs run one after another and are
//! never interrupted; shutdown is observed between jobs.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::deploy::lifecycle::{LifecycleActions, LifecycleJob};

/// Run the action worker
pub async fn run(
    actions: &LifecycleActions,
    mut jobs: mpsc::Receiver<LifecycleJob>,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) {
    info!("Action worker starting...");

    loop {
        let job = tokio::select! {
            biased;
            _ = &mut shutdown_signal => {
                info!("Action worker shutting down...");
                return;
            }
            job = jobs.recv() => job,
        };

        let Some(job) = job else {
            info!("Job queue closed, action worker exiting...");
            return;
        };

        debug!("Running {}", job);
        // Failures are logged by execute; the record stays in its dispatched state
        let _ = actions.execute(&job).await;
    }
}
