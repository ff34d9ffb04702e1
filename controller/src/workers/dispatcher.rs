//! Dispatcher worker

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::deploy::lifecycle::Dispatcher;

/// Dispatcher worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Delay between dispatcher passes
    pub interval: Duration,

    /// Initial delay before the first pass
    pub initial_delay: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            initial_delay: Duration::from_secs(1),
        }
    }
}

/// Run the dispatcher worker
pub async fn run<S, F>(
    options: &Options,
    dispatcher: &Dispatcher,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Dispatcher worker starting...");

    tokio::select! {
        _ = &mut shutdown_signal => {
            info!("Dispatcher worker shutting down...");
            return;
        }
        _ = sleep_fn(options.initial_delay) => {}
    }

    loop {
        match dispatcher.tick().await {
            Ok(report) => debug!("Dispatcher pass enqueued {} job(s)", report.total()),
            Err(e) => error!("Dispatcher pass failed: {}", e),
        }

        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Dispatcher worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }
    }
}
