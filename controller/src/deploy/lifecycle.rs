//! Deployment lifecycle coordination
//!
//! Dispatchers scan the store for deployments that need work, reserve a
//! slot on the job queue, record the dispatch transition and then hand over
//! a [`LifecycleJob`]. A job is never visible to the worker before its
//! dispatched state is stored. A single consumer runs
//! [`LifecycleActions::execute`] for each job, so at most one action touches
//! the working tree at a time.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::cluster::ClusterProbe;
use crate::deploy::audit::CommitAuditTrail;
use crate::deploy::fsm::{LifecycleEvent, LifecycleState};
use crate::deploy::generator::{DeploymentGenerator, GenerationOutcome};
use crate::deploy::git::WorkingTreeGate;
use crate::errors::ControlError;
use crate::models::deployment::{CommitInfo, Deployment};
use crate::store::{StorageError, Store};

/// Unit of work for the action worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleJob {
    Create(String),
    Update(String),
    Delete(String),
}

impl LifecycleJob {
    pub fn uuid(&self) -> &str {
        match self {
            LifecycleJob::Create(uuid) | LifecycleJob::Update(uuid) | LifecycleJob::Delete(uuid) => {
                uuid
            }
        }
    }
}

impl fmt::Display for LifecycleJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleJob::Create(uuid) => write!(f, "create {}", uuid),
            LifecycleJob::Update(uuid) => write!(f, "update {}", uuid),
            LifecycleJob::Delete(uuid) => write!(f, "delete {}", uuid),
        }
    }
}

/// Bounded job queue between dispatchers and the action worker
pub fn job_queue(capacity: usize) -> (mpsc::Sender<LifecycleJob>, mpsc::Receiver<LifecycleJob>) {
    mpsc::channel(capacity.max(1))
}

/// Jobs enqueued by one dispatcher pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub creations: usize,
    pub updates: usize,
    pub deletions: usize,
}

impl DispatchReport {
    pub fn total(&self) -> usize {
        self.creations + self.updates + self.deletions
    }
}

/// Finds deployments needing work and enqueues jobs for them
pub struct Dispatcher {
    store: Arc<dyn Store>,
    probe: Arc<dyn ClusterProbe>,
    queue: mpsc::Sender<LifecycleJob>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        probe: Arc<dyn ClusterProbe>,
        queue: mpsc::Sender<LifecycleJob>,
    ) -> Self {
        Self {
            store,
            probe,
            queue,
        }
    }

    /// Run all three dispatchers once
    pub async fn tick(&self) -> Result<DispatchReport, ControlError> {
        let report = DispatchReport {
            creations: self.dispatch_creations().await?,
            updates: self.dispatch_updates().await?,
            deletions: self.dispatch_deletions().await?,
        };
        if report.total() > 0 {
            debug!("Dispatched {:?}", report);
        }
        Ok(report)
    }

    /// Pending deployments not marked for deletion
    pub async fn dispatch_creations(&self) -> Result<usize, ControlError> {
        let mut count = 0;
        for deployment in self.store.list_deployments().await? {
            if deployment.state != LifecycleState::Pending || deployment.delete {
                continue;
            }
            let job = LifecycleJob::Create(deployment.uuid.clone());
            if self.dispatch(&deployment, job, LifecycleEvent::DispatchCreation).await? {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Live deployments with a pending update request
    pub async fn dispatch_updates(&self) -> Result<usize, ControlError> {
        let mut count = 0;
        for deployment in self.store.list_deployments().await? {
            if !deployment.state.is_live() || !deployment.update || deployment.delete {
                continue;
            }
            let job = LifecycleJob::Update(deployment.uuid.clone());
            if self.dispatch(&deployment, job, LifecycleEvent::DispatchUpdate).await? {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Live deployments marked for deletion whose cluster answers
    pub async fn dispatch_deletions(&self) -> Result<usize, ControlError> {
        let mut count = 0;
        for deployment in self.store.list_deployments().await? {
            if !deployment.state.is_live() || !deployment.delete {
                continue;
            }
            if !self.probe.is_reachable(&deployment.cluster).await {
                debug!(
                    "Holding deletion of {}: cluster {} unreachable",
                    deployment.uuid, deployment.cluster
                );
                continue;
            }
            let job = LifecycleJob::Delete(deployment.uuid.clone());
            if self.dispatch(&deployment, job, LifecycleEvent::DispatchDeletion).await? {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Reserve a queue slot, store the transition, then send the job.
    ///
    /// Returns false when the record left the listed state in the meantime.
    async fn dispatch(
        &self,
        deployment: &Deployment,
        job: LifecycleJob,
        event: LifecycleEvent,
    ) -> Result<bool, ControlError> {
        // Validate before reserving so an illegal record never produces a job
        let change = deployment.transition(event, Utc::now())?;

        let permit = self
            .queue
            .reserve()
            .await
            .map_err(|_| ControlError::QueueError(format!("cannot enqueue {}: queue closed", job)))?;

        match self.store.update_lifecycle(&deployment.uuid, change).await {
            Ok(()) => {}
            Err(StorageError::Conflict(reason) | StorageError::NotFound(reason)) => {
                debug!("Skipping {}: {}", job, reason);
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        }

        info!("Dispatched {}", job);
        permit.send(job);
        Ok(true)
    }
}

/// Executes lifecycle jobs against the working tree
pub struct LifecycleActions {
    store: Arc<dyn Store>,
    gate: Arc<WorkingTreeGate>,
    generator: Arc<DeploymentGenerator>,
    audit: CommitAuditTrail,
}

impl LifecycleActions {
    pub fn new(
        store: Arc<dyn Store>,
        gate: Arc<WorkingTreeGate>,
        generator: Arc<DeploymentGenerator>,
    ) -> Self {
        let audit = CommitAuditTrail::new(store.clone());
        Self {
            store,
            gate,
            generator,
            audit,
        }
    }

    pub fn audit(&self) -> &CommitAuditTrail {
        &self.audit
    }

    /// Run one job, logging its outcome
    pub async fn execute(&self, job: &LifecycleJob) -> Result<(), ControlError> {
        let result = match job {
            LifecycleJob::Create(uuid) => self.create(uuid).await.map(|_| ()),
            LifecycleJob::Update(uuid) => self.update(uuid).await.map(|_| ()),
            LifecycleJob::Delete(uuid) => self.delete(uuid).await.map(|_| ()),
        };
        match &result {
            Ok(()) => info!("Finished {}", job),
            Err(e) => error!("Failed to {}: {}", job, e),
        }
        result
    }

    /// Generate a new deployment; releases its ports when generation fails
    pub async fn create(&self, uuid: &str) -> Result<GenerationOutcome, ControlError> {
        let deployment = self.load(uuid).await?;
        deployment.state.next(&LifecycleEvent::CreationSucceeded)?;

        let mut tree = self.gate.open().await?;
        let outcome = match self.generator.generate(&mut tree, &deployment, false).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tree.close();
                if let Err(release) = self.generator.ports().release(uuid).await {
                    warn!("Failed to release ports of {}: {}", uuid, release);
                }
                return Err(e);
            }
        };
        tree.close();

        self.audit.record(&deployment, &outcome.commit).await?;
        self.transition(uuid, LifecycleEvent::CreationSucceeded).await?;
        Ok(outcome)
    }

    /// Regenerate a live deployment from its current configuration
    pub async fn update(&self, uuid: &str) -> Result<GenerationOutcome, ControlError> {
        let deployment = self.load(uuid).await?;
        deployment.state.next(&LifecycleEvent::UpdateSucceeded)?;

        let mut tree = self.gate.open().await?;
        let outcome = self.generator.generate(&mut tree, &deployment, true).await;
        tree.close();
        let outcome = outcome?;

        self.audit.record(&deployment, &outcome.commit).await?;
        self.transition(uuid, LifecycleEvent::UpdateSucceeded).await?;
        Ok(outcome)
    }

    /// Remove a deployment's output and every record belonging to it
    pub async fn delete(&self, uuid: &str) -> Result<Option<CommitInfo>, ControlError> {
        let deployment = self.load(uuid).await?;
        if deployment.state != LifecycleState::DeletionDispatched {
            return Err(ControlError::InvalidTransition(format!(
                "{:?} -> deletion of {}",
                deployment.state, uuid
            )));
        }

        let mut tree = self.gate.open().await?;
        let removed = self.generator.remove(&mut tree, uuid).await;
        tree.close();
        let commit = match removed {
            Ok(commit) => Some(commit),
            Err(ControlError::NotFound(reason)) => {
                warn!("Nothing to remove for {}: {}", uuid, reason);
                None
            }
            Err(e) => return Err(e),
        };

        let commits = self.store.delete_commits_for_deployment(uuid).await?;
        self.generator.ports().release(uuid).await?;
        self.store.delete_deployment(uuid).await?;
        debug!("Dropped {} commit record(s) of {}", commits, uuid);

        for mut helper in self.store.list_helpers(uuid).await? {
            if helper.delete {
                continue;
            }
            info!("Marking helper {} of {} for deletion", helper.uuid, uuid);
            helper.delete = true;
            self.store.upsert_deployment(helper).await?;
        }

        Ok(commit)
    }

    async fn load(&self, uuid: &str) -> Result<Deployment, ControlError> {
        self.store
            .get_deployment(uuid)
            .await?
            .ok_or_else(|| ControlError::NotFound(format!("deployment {}", uuid)))
    }

    /// Apply `event` to the latest stored state, leaving configuration alone
    async fn transition(&self, uuid: &str, event: LifecycleEvent) -> Result<(), ControlError> {
        let latest = self.load(uuid).await?;
        let change = latest.transition(event, Utc::now())?;
        self.store.update_lifecycle(uuid, change).await?;
        Ok(())
    }
}
