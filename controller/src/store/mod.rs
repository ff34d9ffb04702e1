//! Persistence layer for deployments, port reservations and commits
//!
//! The relational backend lives outside this crate; it plugs in through the
//! traits below. [`InMemoryStore`] backs tests and single-process runs.

mod memory;
mod traits;

pub use memory::InMemoryStore;
pub use traits::{
    CommitStore, DeploymentStore, PortStore, StorageError, StorageResult, Store, TemplateStore,
};
