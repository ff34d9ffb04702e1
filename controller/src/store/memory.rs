//! In-memory storage implementation

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::traits::*;
use crate::models::deployment::{Deployment, DeploymentCommit, LifecycleChange, ReservedPort};
use crate::models::template::TemplateField;

/// In-memory storage for tests and single-process runs
#[derive(Debug, Default)]
pub struct InMemoryStore {
    deployments: Arc<RwLock<HashMap<String, Deployment>>>,
    ports: Arc<RwLock<Vec<ReservedPort>>>,
    commits: Arc<RwLock<HashMap<String, Vec<DeploymentCommit>>>>,
    template_fields: Arc<RwLock<HashMap<String, Vec<TemplateField>>>>,
}

impl InMemoryStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the field definitions of a template
    pub async fn put_template_fields(&self, template: &str, fields: Vec<TemplateField>) {
        let mut templates = self.template_fields.write().await;
        templates.insert(template.to_string(), fields);
    }
}

#[async_trait]
impl DeploymentStore for InMemoryStore {
    async fn get_deployment(&self, uuid: &str) -> StorageResult<Option<Deployment>> {
        let deployments = self.deployments.read().await;
        Ok(deployments.get(uuid).cloned())
    }

    async fn list_deployments(&self) -> StorageResult<Vec<Deployment>> {
        let deployments = self.deployments.read().await;
        let mut all: Vec<Deployment> = deployments.values().cloned().collect();
        all.sort_by(|a, b| a.uuid.cmp(&b.uuid));
        Ok(all)
    }

    async fn upsert_deployment(&self, deployment: Deployment) -> StorageResult<()> {
        let mut deployments = self.deployments.write().await;
        deployments.insert(deployment.uuid.clone(), deployment);
        Ok(())
    }

    async fn update_lifecycle(&self, uuid: &str, change: LifecycleChange) -> StorageResult<()> {
        let mut deployments = self.deployments.write().await;
        let deployment = deployments
            .get_mut(uuid)
            .ok_or_else(|| StorageError::NotFound(format!("deployment {}", uuid)))?;
        if deployment.state != change.expected {
            return Err(StorageError::Conflict(format!(
                "deployment {} is {:?}, expected {:?}",
                uuid, deployment.state, change.expected
            )));
        }
        deployment.state = change.state;
        deployment.timestamps = change.timestamps;
        if change.clear_update {
            deployment.update = false;
        }
        Ok(())
    }

    async fn delete_deployment(&self, uuid: &str) -> StorageResult<bool> {
        let mut deployments = self.deployments.write().await;
        Ok(deployments.remove(uuid).is_some())
    }

    async fn list_ingress_sources(&self, uuid: &str) -> StorageResult<Vec<Deployment>> {
        let deployments = self.deployments.read().await;
        let mut sources: Vec<Deployment> = deployments
            .values()
            .filter(|d| d.uuid != uuid && d.ingress_targets.iter().any(|t| t == uuid))
            .cloned()
            .collect();
        sources.sort_by(|a, b| a.uuid.cmp(&b.uuid));
        Ok(sources)
    }

    async fn list_helpers(&self, uuid: &str) -> StorageResult<Vec<Deployment>> {
        let deployments = self.deployments.read().await;
        Ok(deployments
            .values()
            .filter(|d| d.helper_of.as_deref() == Some(uuid))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PortStore for InMemoryStore {
    async fn list_ports(&self, group: &str) -> StorageResult<Vec<ReservedPort>> {
        let ports = self.ports.read().await;
        Ok(ports.iter().filter(|p| p.group == group).cloned().collect())
    }

    async fn list_ports_for_deployment(&self, deployment: &str) -> StorageResult<Vec<ReservedPort>> {
        let ports = self.ports.read().await;
        Ok(ports
            .iter()
            .filter(|p| p.deployment == deployment)
            .cloned()
            .collect())
    }

    async fn find_port(
        &self,
        deployment: &str,
        group: &str,
        claim: &str,
    ) -> StorageResult<Option<ReservedPort>> {
        let ports = self.ports.read().await;
        Ok(ports
            .iter()
            .find(|p| p.deployment == deployment && p.group == group && p.claim == claim)
            .cloned())
    }

    async fn insert_port(&self, port: ReservedPort) -> StorageResult<()> {
        let mut ports = self.ports.write().await;
        if ports
            .iter()
            .any(|p| p.group == port.group && p.port == port.port)
        {
            return Err(StorageError::Conflict(format!(
                "port {} already reserved in group {}",
                port.port, port.group
            )));
        }
        if ports
            .iter()
            .any(|p| p.deployment == port.deployment && p.group == port.group && p.claim == port.claim)
        {
            return Err(StorageError::Conflict(format!(
                "claim {} already reserved for {} in group {}",
                port.claim, port.deployment, port.group
            )));
        }
        ports.push(port);
        Ok(())
    }

    async fn delete_ports_for_deployment(&self, deployment: &str) -> StorageResult<usize> {
        let mut ports = self.ports.write().await;
        let before = ports.len();
        ports.retain(|p| p.deployment != deployment);
        Ok(before - ports.len())
    }
}

#[async_trait]
impl CommitStore for InMemoryStore {
    async fn append_commit(&self, commit: DeploymentCommit) -> StorageResult<()> {
        let mut commits = self.commits.write().await;
        commits
            .entry(commit.deployment.clone())
            .or_default()
            .push(commit);
        Ok(())
    }

    async fn list_commits(&self, deployment: &str) -> StorageResult<Vec<DeploymentCommit>> {
        let commits = self.commits.read().await;
        Ok(commits.get(deployment).cloned().unwrap_or_default())
    }

    async fn get_commit(
        &self,
        deployment: &str,
        hash: &str,
    ) -> StorageResult<Option<DeploymentCommit>> {
        let commits = self.commits.read().await;
        Ok(commits
            .get(deployment)
            .and_then(|history| history.iter().find(|c| c.hash == hash))
            .cloned())
    }

    async fn delete_commits_for_deployment(&self, deployment: &str) -> StorageResult<usize> {
        let mut commits = self.commits.write().await;
        Ok(commits.remove(deployment).map(|h| h.len()).unwrap_or(0))
    }
}

#[async_trait]
impl TemplateStore for InMemoryStore {
    async fn template_fields(&self, template: &str) -> StorageResult<Vec<TemplateField>> {
        let templates = self.template_fields.read().await;
        Ok(templates.get(template).cloned().unwrap_or_default())
    }
}
