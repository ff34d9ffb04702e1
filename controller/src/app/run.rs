//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::{AppState, Collaborators};
use crate::deploy::lifecycle::LifecycleJob;
use crate::errors::ControlError;
use crate::workers::{actions, dispatcher};

/// Run the controller with system collaborators
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ControlError> {
    let collaborators = Collaborators::system(&options.settings)?;
    run_with(options, collaborators, shutdown_signal).await
}

/// Run the controller against the given collaborators
pub async fn run_with(
    options: AppOptions,
    collaborators: Collaborators,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ControlError> {
    info!("Initializing deployment controller...");

    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    if let Err(e) = init(&options, collaborators, &shutdown_tx, &mut shutdown_manager).await {
        error!("Failed to start controller: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    collaborators: Collaborators,
    shutdown_tx: &broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<Arc<AppState>, ControlError> {
    options.layout.setup().await?;

    let (app_state, jobs) = AppState::init(&options.settings, &options.layout, collaborators)?;
    let app_state = Arc::new(app_state);

    init_action_worker(app_state.clone(), jobs, shutdown_manager, shutdown_tx.subscribe())?;

    if options.enable_dispatcher {
        init_dispatcher_worker(
            options.dispatcher.clone(),
            app_state.clone(),
            shutdown_manager,
            shutdown_tx.subscribe(),
        )?;
    }

    Ok(app_state)
}

fn init_action_worker(
    app_state: Arc<AppState>,
    jobs: mpsc::Receiver<LifecycleJob>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), ControlError> {
    info!("Initializing action worker...");

    let lifecycle_actions = app_state.actions.clone();
    let handle = tokio::spawn(async move {
        actions::run(
            lifecycle_actions.as_ref(),
            jobs,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_action_worker_handle(handle)
}

fn init_dispatcher_worker(
    options: dispatcher::Options,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), ControlError> {
    info!("Initializing dispatcher worker...");

    let lifecycle_dispatcher = app_state.dispatcher.clone();
    let handle = tokio::spawn(async move {
        dispatcher::run(
            &options,
            lifecycle_dispatcher.as_ref(),
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_dispatcher_worker_handle(handle)
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    dispatcher_worker_handle: Option<JoinHandle<()>>,
    action_worker_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            dispatcher_worker_handle: None,
            action_worker_handle: None,
        }
    }

    pub fn with_dispatcher_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), ControlError> {
        if self.dispatcher_worker_handle.is_some() {
            return Err(ControlError::ShutdownError("dispatcher_handle already set".to_string()));
        }
        self.dispatcher_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_action_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), ControlError> {
        if self.action_worker_handle.is_some() {
            return Err(ControlError::ShutdownError("action_handle already set".to_string()));
        }
        self.action_worker_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), ControlError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), ControlError> {
        info!("Shutting down deployment controller...");

        // 1. Dispatcher worker, so no new jobs are queued
        if let Some(handle) = self.dispatcher_worker_handle.take() {
            handle.await.map_err(|e| ControlError::ShutdownError(e.to_string()))?;
        }

        // 2. Action worker, after its current job
        if let Some(handle) = self.action_worker_handle.take() {
            handle.await.map_err(|e| ControlError::ShutdownError(e.to_string()))?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
