//! Commit history and configuration diffs

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::info;

use crate::errors::ControlError;
use crate::models::deployment::{CommitInfo, ConfigSnapshot, Deployment, DeploymentCommit};
use crate::models::template::{label_for, TemplateField};
use crate::store::Store;

/// Which configuration map a changed key lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Plain,
    Secret,
}

/// One configuration key whose value differs from a commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigChange {
    pub key: String,
    pub label: String,
    pub current: Option<String>,
    pub previous: Option<String>,
    pub kind: ValueKind,
}

/// Keys that differ between two configurations, plain keys first.
///
/// Keys present on only one side count as changed. Secret values are
/// returned in clear text.
pub fn diff_snapshots(
    current: &ConfigSnapshot,
    previous: &ConfigSnapshot,
    fields: &[TemplateField],
) -> Vec<ConfigChange> {
    let mut changes = diff_map(&current.data, &previous.data, fields, ValueKind::Plain);
    changes.extend(diff_map(
        &expose(&current.secret),
        &expose(&previous.secret),
        fields,
        ValueKind::Secret,
    ));
    changes
}

fn expose(secret: &BTreeMap<String, SecretString>) -> BTreeMap<String, String> {
    secret
        .iter()
        .map(|(k, v)| (k.clone(), v.expose_secret().to_string()))
        .collect()
}

fn diff_map(
    current: &BTreeMap<String, String>,
    previous: &BTreeMap<String, String>,
    fields: &[TemplateField],
    kind: ValueKind,
) -> Vec<ConfigChange> {
    let keys: BTreeSet<&String> = current.keys().chain(previous.keys()).collect();
    keys.into_iter()
        .filter_map(|key| {
            let now = current.get(key);
            let then = previous.get(key);
            if now == then {
                return None;
            }
            Some(ConfigChange {
                key: key.clone(),
                label: label_for(fields, key).to_string(),
                current: now.cloned(),
                previous: then.cloned(),
                kind,
            })
        })
        .collect()
}

/// Records commit snapshots and answers history questions
pub struct CommitAuditTrail {
    store: Arc<dyn Store>,
}

impl CommitAuditTrail {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Persist a pushed commit with the configuration it was generated from
    pub async fn record(
        &self,
        deployment: &Deployment,
        commit: &CommitInfo,
    ) -> Result<DeploymentCommit, ControlError> {
        let entry = DeploymentCommit {
            deployment: deployment.uuid.clone(),
            hash: commit.hash.clone(),
            message: commit.message.clone(),
            committed_at: Utc::now(),
            snapshot: deployment.snapshot(),
        };
        self.store.append_commit(entry.clone()).await?;
        Ok(entry)
    }

    /// Commit history of a deployment, oldest first
    pub async fn history(&self, uuid: &str) -> Result<Vec<DeploymentCommit>, ControlError> {
        Ok(self.store.list_commits(uuid).await?)
    }

    /// What changed in `deployment`'s configuration since commit `hash`
    pub async fn diff(
        &self,
        deployment: &Deployment,
        hash: &str,
    ) -> Result<Vec<ConfigChange>, ControlError> {
        let commit = self.commit(&deployment.uuid, hash).await?;
        let fields = self.store.template_fields(&deployment.template).await?;
        Ok(diff_snapshots(&deployment.snapshot(), &commit.snapshot, &fields))
    }

    /// Roll a deployment's configuration back to commit `hash`.
    ///
    /// The configuration is replaced and the update flag raised; the next
    /// update dispatch regenerates the manifests.
    pub async fn restore(&self, uuid: &str, hash: &str) -> Result<Deployment, ControlError> {
        let mut deployment = self
            .store
            .get_deployment(uuid)
            .await?
            .ok_or_else(|| ControlError::NotFound(format!("deployment {}", uuid)))?;
        if !deployment.state.is_live() {
            return Err(ControlError::IllegalState(format!(
                "deployment {} is {:?} and cannot be restored",
                uuid, deployment.state
            )));
        }
        let commit = self.commit(uuid, hash).await?;

        deployment.data = commit.snapshot.data;
        deployment.secret = commit.snapshot.secret;
        deployment.update = true;
        self.store.upsert_deployment(deployment.clone()).await?;

        info!("Restored configuration of {} from commit {}", uuid, hash);
        Ok(deployment)
    }

    async fn commit(&self, uuid: &str, hash: &str) -> Result<DeploymentCommit, ControlError> {
        self.store
            .get_commit(uuid, hash)
            .await?
            .ok_or_else(|| ControlError::NotFound(format!("commit {} of deployment {}", hash, uuid)))
    }
}
