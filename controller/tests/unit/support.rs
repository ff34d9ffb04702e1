//! Shared fakes and fixtures

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use autodeploy::deploy::generator::{DeploymentGenerator, GeneratorOptions};
use autodeploy::deploy::git::{GitIdentity, RepositoryConfig, WorkingTreeGate};
use autodeploy::deploy::netpol::NetworkPolicySynthesizer;
use autodeploy::deploy::ports::{PortAllocator, PortRange};
use autodeploy::deploy::render::TeraRenderer;
use autodeploy::deploy::sealer::SecretSealer;
use autodeploy::errors::ControlError;
use autodeploy::filesys::dir::Dir;
use autodeploy::models::deployment::{Deployment, DeploymentCommit, LifecycleChange, ReservedPort};
use autodeploy::models::template::TemplateField;
use autodeploy::process::{CommandSpec, ProcessOutput, ProcessRunner};
use autodeploy::storage::settings::{NetworkSettings, SealingSettings};
use autodeploy::store::{
    CommitStore, DeploymentStore, InMemoryStore, PortStore, StorageResult, Store, TemplateStore,
};
use autodeploy::utils::sha256_hash;

/// Answers git and kubeseal invocations without touching the network
#[derive(Default)]
pub struct ScriptedRunner {
    commands: Mutex<Vec<CommandSpec>>,
    commits: AtomicUsize,
    fail_on: Mutex<Option<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every command whose program or first argument equals `step` fail
    pub fn fail_on(&self, step: &str) {
        *self.fail_on.lock().unwrap() = Some(step.to_string());
    }

    pub fn clear_failure(&self) {
        *self.fail_on.lock().unwrap() = None;
    }

    pub fn commands(&self) -> Vec<CommandSpec> {
        self.commands.lock().unwrap().clone()
    }

    /// Commands rendered as `program arg arg ...`
    pub fn command_lines(&self) -> Vec<String> {
        self.commands().iter().map(|c| c.to_string()).collect()
    }

    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    fn ok(stdout: impl Into<String>) -> ProcessOutput {
        ProcessOutput {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: Some(0),
        }
    }

    fn failed(stderr: impl Into<String>) -> ProcessOutput {
        ProcessOutput {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code: Some(1),
        }
    }

    fn git(&self, command: &CommandSpec) -> ProcessOutput {
        let cwd = command.current_dir.clone().unwrap_or_default();
        match command.args.first().map(String::as_str) {
            Some("clone") => {
                let target = PathBuf::from(command.args.last().cloned().unwrap_or_default());
                std::fs::create_dir_all(target.join(".git")).unwrap();
                Self::ok("")
            }
            Some("rev-parse") => {
                if cwd.join(".git").is_dir() {
                    Self::ok("true\n")
                } else {
                    Self::failed("fatal: not a git repository")
                }
            }
            Some("commit") => {
                self.commits.fetch_add(1, Ordering::SeqCst);
                Self::ok("")
            }
            Some("log") => {
                let n = self.commits.load(Ordering::SeqCst);
                Self::ok(format!(
                    "commit {:040x}\nAuthor: autodeploy <autodeploy@localhost>\n\n    message\n",
                    n
                ))
            }
            _ => Self::ok(""),
        }
    }

    fn kubeseal(&self, command: &CommandSpec) -> ProcessOutput {
        let (Some(plain), Some(sealed)) = (
            command.flag_value("--secret-file"),
            command.flag_value("--sealed-secret-file"),
        ) else {
            return Self::failed("missing file flags");
        };
        let contents = std::fs::read(plain).unwrap();
        std::fs::write(sealed, format!("sealed: {}\n", sha256_hash(&contents))).unwrap();
        Self::ok("")
    }
}

#[async_trait]
impl ProcessRunner for ScriptedRunner {
    async fn run(&self, command: &CommandSpec) -> Result<ProcessOutput, ControlError> {
        self.commands.lock().unwrap().push(command.clone());

        let failing = self.fail_on.lock().unwrap().clone();
        if let Some(step) = failing {
            if command.program == step || command.args.first() == Some(&step) {
                return Ok(Self::failed(format!("scripted failure of {}", step)));
            }
        }

        Ok(match command.program.as_str() {
            "git" => self.git(command),
            "kubeseal" => self.kubeseal(command),
            other => Self::failed(format!("{}: command not found", other)),
        })
    }
}

/// Write a file below `root`, creating parents
pub fn write(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

/// The `web` template: one port claim, one secret, a kustomization
pub fn write_web_template(template_root: &Path) {
    write(
        template_root,
        "web/kustomization.yaml",
        "resources:\n  - deployment.yaml\n  - db-unsealedsecret.yaml\n",
    );
    write(
        template_root,
        "web/deployment.yaml",
        "replicas: {% if paused %}0{% else %}{{ data.replicas }}{% endif %}\n\
         port: {{ portClaims.http }}\n",
    );
    write(
        template_root,
        "web/db-unsealedsecret.yaml",
        "password: {{ secret.password }}\n",
    );
    write(template_root, "web/port-claims.json", r#"{"http": "services"}"#);
}

/// A side-channel template without a kustomization
pub fn write_filebrowser_template(template_root: &Path) {
    write(
        template_root,
        "filebrowser/deployment.yaml",
        "target: {{ data.target }}\n",
    );
}

/// A temp workspace with a template root, checkout and scratch space
pub struct Fixture {
    pub tmp: tempfile::TempDir,
    pub store: Arc<InMemoryStore>,
    pub runner: Arc<ScriptedRunner>,
    pub gate: Arc<WorkingTreeGate>,
    pub generator: Arc<DeploymentGenerator>,
}

pub const POOL: PortRange = PortRange { from: 30000, to: 30009 };

impl Fixture {
    pub fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryStore::new());
        let runner = Arc::new(ScriptedRunner::new());

        write_web_template(&tmp.path().join("templates"));
        write_filebrowser_template(&tmp.path().join("templates"));
        std::fs::create_dir_all(tmp.path().join("scratch")).unwrap();

        let gate = Arc::new(WorkingTreeGate::new(
            RepositoryConfig {
                remote_url: "git@example.com:ops/gitops.git".to_string(),
                local_path: tmp.path().join("checkout"),
                branch: "main".to_string(),
                identity: GitIdentity {
                    name: "autodeploy".to_string(),
                    email: "autodeploy@localhost".to_string(),
                },
                timeout: None,
            },
            runner.clone(),
        ));

        let dyn_store: Arc<dyn Store> = store.clone();
        let mut pools = BTreeMap::new();
        pools.insert("services".to_string(), POOL);

        let generator = Arc::new(DeploymentGenerator::new(
            dyn_store.clone(),
            PortAllocator::new(dyn_store, pools),
            Arc::new(TeraRenderer::new()),
            SecretSealer::new(
                runner.clone(),
                SealingSettings::default(),
                Dir::new(tmp.path().join("scratch")),
            ),
            NetworkPolicySynthesizer::new(NetworkSettings {
                utility_namespace: "utility-ns".to_string(),
                ingress_namespace: "ingress-ns".to_string(),
                ..Default::default()
            }),
            GeneratorOptions {
                template_root: tmp.path().join("templates"),
                deployments_dir: PathBuf::from("deployments"),
            },
        ));

        Self {
            tmp,
            store,
            runner,
            gate,
            generator,
        }
    }

    pub fn store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    /// Rendered output directory of a deployment
    pub fn output(&self, uuid: &str) -> PathBuf {
        self.tmp.path().join("checkout/deployments").join(uuid)
    }
}

/// Store whose deployment writes land late, widening dispatch windows
pub struct SlowStore {
    inner: Arc<InMemoryStore>,
    delay: Duration,
}

impl SlowStore {
    pub fn new(inner: Arc<InMemoryStore>, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl DeploymentStore for SlowStore {
    async fn get_deployment(&self, uuid: &str) -> StorageResult<Option<Deployment>> {
        self.inner.get_deployment(uuid).await
    }

    async fn list_deployments(&self) -> StorageResult<Vec<Deployment>> {
        self.inner.list_deployments().await
    }

    async fn upsert_deployment(&self, deployment: Deployment) -> StorageResult<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.upsert_deployment(deployment).await
    }

    async fn update_lifecycle(&self, uuid: &str, change: LifecycleChange) -> StorageResult<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.update_lifecycle(uuid, change).await
    }

    async fn delete_deployment(&self, uuid: &str) -> StorageResult<bool> {
        self.inner.delete_deployment(uuid).await
    }

    async fn list_ingress_sources(&self, uuid: &str) -> StorageResult<Vec<Deployment>> {
        self.inner.list_ingress_sources(uuid).await
    }

    async fn list_helpers(&self, uuid: &str) -> StorageResult<Vec<Deployment>> {
        self.inner.list_helpers(uuid).await
    }
}

#[async_trait]
impl PortStore for SlowStore {
    async fn list_ports(&self, group: &str) -> StorageResult<Vec<ReservedPort>> {
        self.inner.list_ports(group).await
    }

    async fn list_ports_for_deployment(&self, deployment: &str) -> StorageResult<Vec<ReservedPort>> {
        self.inner.list_ports_for_deployment(deployment).await
    }

    async fn find_port(
        &self,
        deployment: &str,
        group: &str,
        claim: &str,
    ) -> StorageResult<Option<ReservedPort>> {
        self.inner.find_port(deployment, group, claim).await
    }

    async fn insert_port(&self, port: ReservedPort) -> StorageResult<()> {
        self.inner.insert_port(port).await
    }

    async fn delete_ports_for_deployment(&self, deployment: &str) -> StorageResult<usize> {
        self.inner.delete_ports_for_deployment(deployment).await
    }
}

#[async_trait]
impl CommitStore for SlowStore {
    async fn append_commit(&self, commit: DeploymentCommit) -> StorageResult<()> {
        self.inner.append_commit(commit).await
    }

    async fn list_commits(&self, deployment: &str) -> StorageResult<Vec<DeploymentCommit>> {
        self.inner.list_commits(deployment).await
    }

    async fn get_commit(
        &self,
        deployment: &str,
        hash: &str,
    ) -> StorageResult<Option<DeploymentCommit>> {
        self.inner.get_commit(deployment, hash).await
    }

    async fn delete_commits_for_deployment(&self, deployment: &str) -> StorageResult<usize> {
        self.inner.delete_commits_for_deployment(deployment).await
    }
}

#[async_trait]
impl TemplateStore for SlowStore {
    async fn template_fields(&self, template: &str) -> StorageResult<Vec<TemplateField>> {
        self.inner.template_fields(template).await
    }
}
