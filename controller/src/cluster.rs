//! Cluster reachability

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::errors::ControlError;
use crate::storage::settings::ClusterSettings;

/// Answers whether a named cluster's API server is reachable
#[async_trait]
pub trait ClusterProbe: Send + Sync {
    async fn is_reachable(&self, cluster: &str) -> bool;
}

/// Probes `<api_server>/livez` of each configured cluster
pub struct HttpClusterProbe {
    clusters: BTreeMap<String, ClusterSettings>,
    client: Client,
    insecure_client: Client,
}

impl HttpClusterProbe {
    pub fn new(
        clusters: BTreeMap<String, ClusterSettings>,
        timeout: Duration,
    ) -> Result<Self, ControlError> {
        let client = Client::builder().timeout(timeout).build()?;
        let insecure_client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()?;
        Ok(Self {
            clusters,
            client,
            insecure_client,
        })
    }
}

#[async_trait]
impl ClusterProbe for HttpClusterProbe {
    async fn is_reachable(&self, cluster: &str) -> bool {
        let Some(settings) = self.clusters.get(cluster) else {
            warn!("Cluster {} is not configured", cluster);
            return false;
        };

        let url = format!("{}/livez", settings.api_server.trim_end_matches('/'));
        let client = if settings.insecure_skip_tls_verify {
            &self.insecure_client
        } else {
            &self.client
        };

        match client.get(&url).send().await {
            // An API server that demands credentials is still up
            Ok(response) => {
                let status = response.status();
                debug!("GET {} -> {}", url, status);
                status.is_success() || status.as_u16() == 401 || status.as_u16() == 403
            }
            Err(e) => {
                warn!("Cluster {} unreachable: {}", cluster, e);
                false
            }
        }
    }
}

/// Fixed answer per cluster; unknown clusters are unreachable
#[derive(Debug, Default)]
pub struct StaticClusterProbe {
    reachable: RwLock<BTreeSet<String>>,
}

impl StaticClusterProbe {
    pub fn new<I, S>(reachable: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            reachable: RwLock::new(reachable.into_iter().map(Into::into).collect()),
        }
    }

    pub async fn set_reachable(&self, cluster: &str, reachable: bool) {
        let mut clusters = self.reachable.write().await;
        if reachable {
            clusters.insert(cluster.to_string());
        } else {
            clusters.remove(cluster);
        }
    }
}

#[async_trait]
impl ClusterProbe for StaticClusterProbe {
    async fn is_reachable(&self, cluster: &str) -> bool {
        self.reachable.read().await.contains(cluster)
    }
}
