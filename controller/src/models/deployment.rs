//! Deployment models

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::deploy::fsm::{LifecycleEvent, LifecycleState};
use crate::errors::ControlError;

/// Optional CPU / memory limits applied by the template
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimit {
    pub enabled: bool,
    pub cpu: Option<String>,
    pub memory: Option<String>,
}

/// Audit timestamps stamped by lifecycle transitions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleTimestamps {
    pub creation_dispatched_at: Option<DateTime<Utc>>,
    pub deployed_at: Option<DateTime<Utc>>,
    pub update_dispatched_at: Option<DateTime<Utc>>,
    pub deployment_updated_at: Option<DateTime<Utc>>,
    pub deletion_dispatched_at: Option<DateTime<Utc>>,
}

/// One instantiation of a template, realized as a Kubernetes namespace
#[derive(Debug, Clone)]
pub struct Deployment {
    /// Unique ID, also the target namespace and the output directory name
    pub uuid: String,

    /// Template directory name under the template root
    pub template: String,

    /// Cluster the GitOps reconciler applies this deployment to
    pub cluster: String,

    /// Plain configuration keyed by template field key
    pub data: BTreeMap<String, String>,

    /// Secret configuration keyed by template field key
    pub secret: BTreeMap<String, SecretString>,

    pub limits: Option<ResourceLimit>,

    /// Rendered with replicas scaled to zero
    pub paused: bool,

    pub state: LifecycleState,

    /// Regeneration requested
    pub update: bool,

    /// Removal requested
    pub delete: bool,

    pub timestamps: LifecycleTimestamps,

    /// Deployments whose namespaces this deployment may reach
    pub ingress_targets: Vec<String>,

    /// Parent deployment when this is an ephemeral helper (file browser, db UI)
    pub helper_of: Option<String>,
}

impl Deployment {
    /// Create a pending deployment with empty configuration
    pub fn new(
        uuid: impl Into<String>,
        template: impl Into<String>,
        cluster: impl Into<String>,
    ) -> Self {
        Self {
            uuid: uuid.into(),
            template: template.into(),
            cluster: cluster.into(),
            data: BTreeMap::new(),
            secret: BTreeMap::new(),
            limits: None,
            paused: false,
            state: LifecycleState::Pending,
            update: false,
            delete: false,
            timestamps: LifecycleTimestamps::default(),
            ingress_targets: Vec::new(),
            helper_of: None,
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn with_secret(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.secret
            .insert(key.into(), SecretString::from(value.into()));
        self
    }

    /// Apply a lifecycle event, stamping its audit timestamp
    pub fn apply(&mut self, event: LifecycleEvent, at: DateTime<Utc>) -> Result<(), ControlError> {
        let next = self.state.next(&event)?;
        event.stamp(&mut self.timestamps, at);
        self.state = next;
        Ok(())
    }

    /// Lifecycle fields after `event`, for a write that leaves the
    /// configuration alone
    pub fn transition(
        &self,
        event: LifecycleEvent,
        at: DateTime<Utc>,
    ) -> Result<LifecycleChange, ControlError> {
        let state = self.state.next(&event)?;
        let mut timestamps = self.timestamps.clone();
        event.stamp(&mut timestamps, at);
        Ok(LifecycleChange {
            expected: self.state,
            state,
            timestamps,
            clear_update: event == LifecycleEvent::DispatchUpdate,
        })
    }

    /// Secret configuration in clear text, for rendering and snapshots
    pub fn exposed_secrets(&self) -> BTreeMap<String, String> {
        self.secret
            .iter()
            .map(|(k, v)| (k.clone(), v.expose_secret().to_string()))
            .collect()
    }

    /// Full configuration snapshot as stored with each commit
    pub fn snapshot(&self) -> ConfigSnapshot {
        ConfigSnapshot {
            data: self.data.clone(),
            secret: self.secret.clone(),
        }
    }
}

/// State write guarded by the state it was computed from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleChange {
    /// State the record must still be in
    pub expected: LifecycleState,
    pub state: LifecycleState,
    pub timestamps: LifecycleTimestamps,
    pub clear_update: bool,
}

/// Port reserved for one claim of a deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservedPort {
    /// Pool name, e.g. `services`
    pub group: String,

    /// Claim key, unique per deployment and group
    pub claim: String,

    pub port: u16,

    /// Owning deployment uuid
    pub deployment: String,
}

/// Configuration captured at commit time
#[derive(Debug, Clone, Default)]
pub struct ConfigSnapshot {
    pub data: BTreeMap<String, String>,
    pub secret: BTreeMap<String, SecretString>,
}

/// An immutable record of one generated commit
#[derive(Debug, Clone)]
pub struct DeploymentCommit {
    /// Owning deployment uuid
    pub deployment: String,

    pub hash: String,
    pub message: String,
    pub committed_at: DateTime<Utc>,
    pub snapshot: ConfigSnapshot,
}

/// Commit identity returned by a push
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub message: String,
    pub hash: String,
}
