//! Finite State Machine for the deployment lifecycle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ControlError;
use crate::models::deployment::LifecycleTimestamps;

/// Lifecycle state of a deployment record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Created, nothing generated yet
    Pending,

    /// Creation action queued or running
    CreationDispatched,

    /// Committed to the repository
    Deployed,

    /// Update action queued or running
    UpdateDispatched,

    /// Deletion action queued or running; the row goes away on success
    DeletionDispatched,
}

impl LifecycleState {
    /// Whether a generated tree exists in the repository
    pub fn is_live(&self) -> bool {
        matches!(self, LifecycleState::Deployed | LifecycleState::UpdateDispatched)
    }

    /// Compute the state after `event`, rejecting illegal predecessors
    pub fn next(&self, event: &LifecycleEvent) -> Result<LifecycleState, ControlError> {
        let next = match (self, event) {
            (LifecycleState::Pending, LifecycleEvent::DispatchCreation) => {
                LifecycleState::CreationDispatched
            }
            (LifecycleState::CreationDispatched, LifecycleEvent::CreationSucceeded) => {
                LifecycleState::Deployed
            }

            // A failed update leaves the record in UpdateDispatched; it may be
            // updated again or deleted from there.
            (
                LifecycleState::Deployed | LifecycleState::UpdateDispatched,
                LifecycleEvent::DispatchUpdate,
            ) => LifecycleState::UpdateDispatched,
            (LifecycleState::UpdateDispatched, LifecycleEvent::UpdateSucceeded) => {
                LifecycleState::Deployed
            }

            (
                LifecycleState::Deployed | LifecycleState::UpdateDispatched,
                LifecycleEvent::DispatchDeletion,
            ) => LifecycleState::DeletionDispatched,

            (state, event) => {
                return Err(ControlError::InvalidTransition(format!(
                    "{:?} -> {:?}",
                    state, event
                )));
            }
        };
        Ok(next)
    }
}

/// Lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    DispatchCreation,
    CreationSucceeded,
    DispatchUpdate,
    UpdateSucceeded,
    DispatchDeletion,
}

impl LifecycleEvent {
    /// Record the audit timestamp belonging to this event
    pub fn stamp(&self, timestamps: &mut LifecycleTimestamps, at: DateTime<Utc>) {
        let slot = match self {
            LifecycleEvent::DispatchCreation => &mut timestamps.creation_dispatched_at,
            LifecycleEvent::CreationSucceeded => &mut timestamps.deployed_at,
            LifecycleEvent::DispatchUpdate => &mut timestamps.update_dispatched_at,
            LifecycleEvent::UpdateSucceeded => &mut timestamps.deployment_updated_at,
            LifecycleEvent::DispatchDeletion => &mut timestamps.deletion_dispatched_at,
        };
        *slot = Some(at);
    }
}
