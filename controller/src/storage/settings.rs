//! Settings file management

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::deploy::ports::PortRange;
use crate::logs::LogLevel;

/// Controller settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines on stdout
    #[serde(default)]
    pub log_json: bool,

    /// Also write daily-rotated log files here
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// GitOps repository
    pub repository: RepositorySettings,

    /// Directory holding one subdirectory per template; defaults to the layout
    #[serde(default)]
    pub template_root: Option<PathBuf>,

    /// Port pools by group name
    #[serde(default = "default_port_pools")]
    pub port_pools: BTreeMap<String, PortRange>,

    /// Secret sealing tool
    #[serde(default)]
    pub sealing: SealingSettings,

    /// Network policy inputs
    #[serde(default)]
    pub network: NetworkSettings,

    /// Known clusters by name
    #[serde(default)]
    pub clusters: BTreeMap<String, ClusterSettings>,

    /// Dispatcher polling
    #[serde(default)]
    pub dispatch: DispatchSettings,
}

fn default_port_pools() -> BTreeMap<String, PortRange> {
    let mut pools = BTreeMap::new();
    pools.insert("services".to_string(), PortRange::new(30000, 32767));
    pools
}

/// GitOps repository settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositorySettings {
    /// Remote URL to clone and push to
    pub url: String,

    #[serde(default = "default_branch")]
    pub branch: String,

    /// Checkout location; defaults to the layout
    #[serde(default)]
    pub local_path: Option<PathBuf>,

    /// Directory inside the checkout that holds one folder per deployment
    #[serde(default = "default_deployments_dir")]
    pub deployments_dir: String,

    #[serde(default = "default_author_name")]
    pub author_name: String,

    #[serde(default = "default_author_email")]
    pub author_email: String,

    /// Timeout for clone, pull and push
    #[serde(default = "default_git_timeout")]
    pub timeout_secs: u64,
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_deployments_dir() -> String {
    "deployments".to_string()
}

fn default_author_name() -> String {
    "autodeploy".to_string()
}

fn default_author_email() -> String {
    "autodeploy@localhost".to_string()
}

fn default_git_timeout() -> u64 {
    120
}

/// Sealed-secrets tooling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealingSettings {
    /// Sealing executable
    #[serde(default = "default_sealing_binary")]
    pub binary: String,

    /// Directory prepended to PATH when invoking the binary
    #[serde(default)]
    pub search_path: Option<PathBuf>,

    #[serde(default = "default_controller_name")]
    pub controller_name: String,

    #[serde(default = "default_controller_namespace")]
    pub controller_namespace: String,

    /// API server the sealing tool fetches the certificate from
    #[serde(default)]
    pub api_server: String,

    /// PEM bundle for the API server
    #[serde(default)]
    pub ca_cert_path: Option<PathBuf>,

    /// Service-account token used for the transient credential
    #[serde(default)]
    pub token_file: Option<PathBuf>,
}

fn default_sealing_binary() -> String {
    "kubeseal".to_string()
}

fn default_controller_name() -> String {
    "sealed-secrets-controller".to_string()
}

fn default_controller_namespace() -> String {
    "kube-system".to_string()
}

impl Default for SealingSettings {
    fn default() -> Self {
        Self {
            binary: default_sealing_binary(),
            search_path: None,
            controller_name: default_controller_name(),
            controller_namespace: default_controller_namespace(),
            api_server: String::new(),
            ca_cert_path: None,
            token_file: None,
        }
    }
}

/// Namespaces and side-channel templates used for network policies
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSettings {
    #[serde(default = "default_utility_namespace")]
    pub utility_namespace: String,

    #[serde(default = "default_ingress_namespace")]
    pub ingress_namespace: String,

    /// Template of the file-transfer side-channel
    #[serde(default = "default_file_transfer_template")]
    pub file_transfer_template: String,

    /// Template of the database UI side-channel
    #[serde(default = "default_database_ui_template")]
    pub database_ui_template: String,
}

fn default_utility_namespace() -> String {
    "utility".to_string()
}

fn default_ingress_namespace() -> String {
    "ingress-nginx".to_string()
}

fn default_file_transfer_template() -> String {
    "filebrowser".to_string()
}

fn default_database_ui_template() -> String {
    "adminer".to_string()
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            utility_namespace: default_utility_namespace(),
            ingress_namespace: default_ingress_namespace(),
            file_transfer_template: default_file_transfer_template(),
            database_ui_template: default_database_ui_template(),
        }
    }
}

/// One target cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSettings {
    /// Kubernetes API server URL
    pub api_server: String,

    #[serde(default)]
    pub insecure_skip_tls_verify: bool,
}

/// Dispatcher polling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchSettings {
    #[serde(default = "default_dispatch_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Timeout of the cluster reachability probe
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
}

fn default_dispatch_interval() -> u64 {
    10
}

fn default_queue_capacity() -> usize {
    64
}

fn default_probe_timeout() -> u64 {
    5
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_dispatch_interval(),
            queue_capacity: default_queue_capacity(),
            probe_timeout_secs: default_probe_timeout(),
        }
    }
}
