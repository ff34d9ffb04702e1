//! Storage trait definitions

use async_trait::async_trait;
use thiserror::Error;

use crate::models::deployment::{Deployment, DeploymentCommit, LifecycleChange, ReservedPort};
use crate::models::template::TemplateField;

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// A uniqueness constraint rejected the write
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Combined storage trait
pub trait Store: DeploymentStore + PortStore + CommitStore + TemplateStore + Send + Sync {}

impl<T> Store for T where T: DeploymentStore + PortStore + CommitStore + TemplateStore + Send + Sync {}

/// Storage for deployment records and their configuration
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// Get a deployment by uuid
    async fn get_deployment(&self, uuid: &str) -> StorageResult<Option<Deployment>>;

    /// List all deployments
    async fn list_deployments(&self) -> StorageResult<Vec<Deployment>>;

    /// Create or update a deployment
    async fn upsert_deployment(&self, deployment: Deployment) -> StorageResult<()>;

    /// Write only the lifecycle fields of a deployment
    ///
    /// Fails with [`StorageError::Conflict`] when the stored state is no
    /// longer `change.expected`, and with [`StorageError::NotFound`] when the
    /// row is gone.
    async fn update_lifecycle(&self, uuid: &str, change: LifecycleChange) -> StorageResult<()>;

    /// Delete a deployment and its configuration rows
    async fn delete_deployment(&self, uuid: &str) -> StorageResult<bool>;

    /// Deployments that list `uuid` among their ingress targets
    async fn list_ingress_sources(&self, uuid: &str) -> StorageResult<Vec<Deployment>>;

    /// Ephemeral helper deployments attached to `uuid`
    async fn list_helpers(&self, uuid: &str) -> StorageResult<Vec<Deployment>>;
}

/// Storage for port reservations
///
/// Implementations must enforce uniqueness of `(group, port)` and of
/// `(deployment, group, claim)`, failing with [`StorageError::Conflict`].
#[async_trait]
pub trait PortStore: Send + Sync {
    /// All reservations in a pool
    async fn list_ports(&self, group: &str) -> StorageResult<Vec<ReservedPort>>;

    /// All reservations owned by a deployment
    async fn list_ports_for_deployment(&self, deployment: &str) -> StorageResult<Vec<ReservedPort>>;

    /// The reservation for one claim, if any
    async fn find_port(
        &self,
        deployment: &str,
        group: &str,
        claim: &str,
    ) -> StorageResult<Option<ReservedPort>>;

    /// Insert a reservation under the uniqueness constraints
    async fn insert_port(&self, port: ReservedPort) -> StorageResult<()>;

    /// Remove every reservation owned by a deployment, returning the count
    async fn delete_ports_for_deployment(&self, deployment: &str) -> StorageResult<usize>;
}

/// Append-only storage for commit snapshots
#[async_trait]
pub trait CommitStore: Send + Sync {
    /// Append a commit to a deployment's history
    async fn append_commit(&self, commit: DeploymentCommit) -> StorageResult<()>;

    /// Commit history, oldest first
    async fn list_commits(&self, deployment: &str) -> StorageResult<Vec<DeploymentCommit>>;

    /// Look up one commit by hash
    async fn get_commit(
        &self,
        deployment: &str,
        hash: &str,
    ) -> StorageResult<Option<DeploymentCommit>>;

    /// Remove a deployment's history, returning the count
    async fn delete_commits_for_deployment(&self, deployment: &str) -> StorageResult<usize>;
}

/// Read access to template metadata
#[async_trait]
pub trait TemplateStore: Send + Sync {
    /// Field definitions of a template; empty when the template declares none
    async fn template_fields(&self, template: &str) -> StorageResult<Vec<TemplateField>>;
}
