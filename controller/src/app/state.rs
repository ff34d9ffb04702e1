//! Application state management

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::info;

use crate::cluster::{ClusterProbe, HttpClusterProbe};
use crate::deploy::generator::{DeploymentGenerator, GeneratorOptions};
use crate::deploy::git::{RepositoryConfig, WorkingTreeGate};
use crate::deploy::lifecycle::{job_queue, Dispatcher, LifecycleActions, LifecycleJob};
use crate::deploy::netpol::NetworkPolicySynthesizer;
use crate::deploy::ports::PortAllocator;
use crate::deploy::render::{TemplateRenderer, TeraRenderer};
use crate::deploy::sealer::SecretSealer;
use crate::errors::ControlError;
use crate::process::{ProcessRunner, SystemRunner};
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::store::{InMemoryStore, Store};

/// External collaborators the controller is wired against
pub struct Collaborators {
    pub store: Arc<dyn Store>,
    pub runner: Arc<dyn ProcessRunner>,
    pub probe: Arc<dyn ClusterProbe>,
    pub renderer: Arc<dyn TemplateRenderer>,
}

impl Collaborators {
    /// Real processes, HTTP probing and the in-memory store
    pub fn system(settings: &Settings) -> Result<Self, ControlError> {
        let probe = HttpClusterProbe::new(
            settings.clusters.clone(),
            Duration::from_secs(settings.dispatch.probe_timeout_secs),
        )?;
        Ok(Self {
            store: Arc::new(InMemoryStore::new()),
            runner: Arc::new(SystemRunner::new()),
            probe: Arc::new(probe),
            renderer: Arc::new(TeraRenderer::new()),
        })
    }
}

/// Main application state
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub gate: Arc<WorkingTreeGate>,
    pub generator: Arc<DeploymentGenerator>,
    pub dispatcher: Arc<Dispatcher>,
    pub actions: Arc<LifecycleActions>,
}

impl AppState {
    /// Wire every component; the returned receiver belongs to the action worker
    pub fn init(
        settings: &Settings,
        layout: &StorageLayout,
        collaborators: Collaborators,
    ) -> Result<(Self, mpsc::Receiver<LifecycleJob>), ControlError> {
        info!("Initializing application state...");
        let Collaborators {
            store,
            runner,
            probe,
            renderer,
        } = collaborators;

        if settings.port_pools.is_empty() {
            return Err(ControlError::ConfigError(
                "at least one port pool is required".to_string(),
            ));
        }
        for (group, range) in &settings.port_pools {
            if range.from > range.to {
                return Err(ControlError::ConfigError(format!(
                    "port pool '{}' is empty ({}-{})",
                    group, range.from, range.to
                )));
            }
        }

        let gate = Arc::new(WorkingTreeGate::new(
            RepositoryConfig::from_settings(settings, layout),
            runner.clone(),
        ));

        let generator = Arc::new(DeploymentGenerator::new(
            store.clone(),
            PortAllocator::new(store.clone(), settings.port_pools.clone()),
            renderer,
            SecretSealer::new(runner, settings.sealing.clone(), layout.scratch_dir()),
            NetworkPolicySynthesizer::new(settings.network.clone()),
            GeneratorOptions {
                template_root: settings
                    .template_root
                    .clone()
                    .unwrap_or_else(|| layout.templates_dir().path().to_path_buf()),
                deployments_dir: settings.repository.deployments_dir.clone().into(),
            },
        ));

        let (queue, jobs) = job_queue(settings.dispatch.queue_capacity);
        let dispatcher = Arc::new(Dispatcher::new(store.clone(), probe, queue));
        let actions = Arc::new(LifecycleActions::new(
            store.clone(),
            gate.clone(),
            generator.clone(),
        ));

        let state = Self {
            store,
            gate,
            generator,
            dispatcher,
            actions,
        };
        Ok((state, jobs))
    }
}
