//! Port allocation from configured pools

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ControlError;
use crate::models::deployment::ReservedPort;
use crate::store::{StorageError, Store};

/// Pool used when a template does not name one
pub const DEFAULT_GROUP: &str = "services";

/// Redraws after a uniqueness conflict before giving up
const MAX_CONFLICT_RETRIES: usize = 16;

/// Inclusive port range of one pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub from: u16,
    pub to: u16,
}

impl PortRange {
    pub fn new(from: u16, to: u16) -> Self {
        Self { from, to }
    }

    pub fn contains(&self, port: u16) -> bool {
        self.from <= port && port <= self.to
    }
}

/// Reserves unique ports per (group, claim)
pub struct PortAllocator {
    store: Arc<dyn Store>,
    pools: BTreeMap<String, PortRange>,
}

impl PortAllocator {
    pub fn new(store: Arc<dyn Store>, pools: BTreeMap<String, PortRange>) -> Self {
        Self { store, pools }
    }

    fn range(&self, group: &str) -> Result<PortRange, ControlError> {
        self.pools
            .get(group)
            .copied()
            .ok_or_else(|| ControlError::NotFound(format!("port pool '{}'", group)))
    }

    /// Ports held by reservations in a group
    pub async fn disallowed(&self, group: &str) -> Result<HashSet<u16>, ControlError> {
        Ok(self
            .store
            .list_ports(group)
            .await?
            .into_iter()
            .map(|p| p.port)
            .collect())
    }

    /// A uniformly drawn free port of a group
    pub async fn random(&self, group: &str) -> Result<u16, ControlError> {
        let range = self.range(group)?;
        let disallowed = self.disallowed(group).await?;

        let free: Vec<u16> = (range.from..=range.to)
            .filter(|p| !disallowed.contains(p))
            .collect();
        if free.is_empty() {
            return Err(ControlError::ResourceExhausted(format!(
                "no free port left in pool '{}' ({}-{})",
                group, range.from, range.to
            )));
        }

        let index = rand::thread_rng().gen_range(0..free.len());
        Ok(free[index])
    }

    /// Reserve the port for one claim, reusing an existing reservation.
    ///
    /// The insert relies on the store's `(group, port)` uniqueness; a
    /// conflict with a concurrent allocation triggers a fresh draw.
    pub async fn allocate(
        &self,
        deployment: &str,
        claim: &str,
        group: &str,
    ) -> Result<ReservedPort, ControlError> {
        if let Some(existing) = self.store.find_port(deployment, group, claim).await? {
            debug!(
                "Reusing port {} for {}/{} ({})",
                existing.port, deployment, claim, group
            );
            return Ok(existing);
        }

        for attempt in 0..MAX_CONFLICT_RETRIES {
            let reservation = ReservedPort {
                group: group.to_string(),
                claim: claim.to_string(),
                port: self.random(group).await?,
                deployment: deployment.to_string(),
            };

            match self.store.insert_port(reservation.clone()).await {
                Ok(()) => {
                    info!(
                        "Reserved port {} for {}/{} ({})",
                        reservation.port, deployment, claim, group
                    );
                    return Ok(reservation);
                }
                Err(StorageError::Conflict(reason)) => {
                    warn!("Port draw conflicted (attempt {}): {}", attempt + 1, reason);
                    // The claim itself may have been reserved concurrently
                    if let Some(existing) = self.store.find_port(deployment, group, claim).await? {
                        return Ok(existing);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ControlError::ResourceExhausted(format!(
            "gave up reserving a port in pool '{}' after {} conflicts",
            group, MAX_CONFLICT_RETRIES
        )))
    }

    /// Drop every reservation of a deployment
    pub async fn release(&self, deployment: &str) -> Result<usize, ControlError> {
        let released = self.store.delete_ports_for_deployment(deployment).await?;
        if released > 0 {
            info!("Released {} port(s) of {}", released, deployment);
        }
        Ok(released)
    }
}
