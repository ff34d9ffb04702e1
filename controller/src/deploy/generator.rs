//! Deployment manifest generation
//!
//! Turns a template plus a deployment's configuration into a rendered
//! directory inside the GitOps working tree, then commits and pushes it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::deploy::git::{CommitKind, GitWorkingTree};
use crate::deploy::netpol::NetworkPolicySynthesizer;
use crate::deploy::ports::PortAllocator;
use crate::deploy::render::{RenderContext, TemplateRenderer};
use crate::deploy::sealer::{is_sealing_candidate, SecretSealer};
use crate::deploy::template::TemplateStructure;
use crate::errors::ControlError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::models::deployment::{CommitInfo, Deployment};
use crate::store::Store;
use crate::utils::hex;

/// Result of one successful generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationOutcome {
    pub template: String,
    pub uuid: String,
    pub commit: CommitInfo,

    /// SHA-256 over the sorted relative paths and contents of the output
    pub tree_digest: String,
}

/// Where templates are read from and output is written to
#[derive(Debug, Clone)]
pub struct GeneratorOptions {
    pub template_root: PathBuf,

    /// Directory inside the working tree holding one subdirectory per deployment
    pub deployments_dir: PathBuf,
}

pub struct DeploymentGenerator {
    store: Arc<dyn Store>,
    ports: PortAllocator,
    renderer: Arc<dyn TemplateRenderer>,
    sealer: SecretSealer,
    netpol: NetworkPolicySynthesizer,
    options: GeneratorOptions,
}

impl DeploymentGenerator {
    pub fn new(
        store: Arc<dyn Store>,
        ports: PortAllocator,
        renderer: Arc<dyn TemplateRenderer>,
        sealer: SecretSealer,
        netpol: NetworkPolicySynthesizer,
        options: GeneratorOptions,
    ) -> Self {
        Self {
            store,
            ports,
            renderer,
            sealer,
            netpol,
            options,
        }
    }

    pub fn ports(&self) -> &PortAllocator {
        &self.ports
    }

    /// Output directory of a deployment inside the working tree
    pub fn target_dir(&self, tree: &GitWorkingTree, uuid: &str) -> Result<Dir, ControlError> {
        if uuid.is_empty() || uuid.contains('/') || uuid.contains("..") {
            return Err(ControlError::GenerationFailed(format!(
                "'{}' is not a usable deployment directory name",
                uuid
            )));
        }
        Ok(Dir::new(
            tree.path()?.join(&self.options.deployments_dir).join(uuid),
        ))
    }

    /// Render `deployment` into the working tree and push the result.
    ///
    /// Without `replace`, an existing output directory is left untouched
    /// and the call fails with `Forbidden`.
    pub async fn generate(
        &self,
        tree: &mut GitWorkingTree,
        deployment: &Deployment,
        replace: bool,
    ) -> Result<GenerationOutcome, ControlError> {
        let structure =
            TemplateStructure::resolve(&self.options.template_root, &deployment.template).await?;
        let target = self.target_dir(tree, &deployment.uuid)?;

        if target.exists().await {
            if !replace {
                return Err(ControlError::Forbidden(format!(
                    "output for deployment {} already exists at {}",
                    deployment.uuid,
                    target.path().display()
                )));
            }
            debug!("Replacing {}", target.path().display());
            target
                .delete()
                .await
                .map_err(|e| e.into_generation_failure("clearing previous output"))?;
        }

        target
            .create()
            .await
            .map_err(|e| e.into_generation_failure("creating output directory"))?;
        for dir in &structure.dirs {
            target
                .subdir(dir)
                .create()
                .await
                .map_err(|e| e.into_generation_failure("creating output directory"))?;
        }

        let port_claims = self.allocate_claims(deployment, &structure).await?;
        let context = RenderContext::for_deployment(deployment, port_claims);

        for relative in &structure.files {
            self.render_file(&structure, &target, relative, &context)
                .await?;
        }

        if self.netpol.is_side_channel(&deployment.template) {
            debug!("Skipping network policy for side-channel template {}", deployment.template);
        } else {
            let linked = self.store.list_ingress_sources(&deployment.uuid).await?;
            self.netpol.apply(&target, deployment, &linked).await?;
        }

        let tree_digest = tree_digest(&target).await?;
        let kind = if replace {
            CommitKind::Update
        } else {
            CommitKind::Creation
        };
        let commit = tree.push(&deployment.uuid, kind).await?;

        info!(
            "Generated {} from template {} ({})",
            deployment.uuid, deployment.template, commit.hash
        );
        Ok(GenerationOutcome {
            template: deployment.template.clone(),
            uuid: deployment.uuid.clone(),
            commit,
            tree_digest,
        })
    }

    /// Delete a deployment's output directory and push the removal
    pub async fn remove(
        &self,
        tree: &mut GitWorkingTree,
        uuid: &str,
    ) -> Result<CommitInfo, ControlError> {
        let target = self.target_dir(tree, uuid)?;
        if !target.exists().await {
            return Err(ControlError::NotFound(format!(
                "no rendered output for deployment {}",
                uuid
            )));
        }
        target
            .delete()
            .await
            .map_err(|e| e.into_generation_failure("removing output"))?;
        tree.push(uuid, CommitKind::Deletion).await
    }

    async fn allocate_claims(
        &self,
        deployment: &Deployment,
        structure: &TemplateStructure,
    ) -> Result<BTreeMap<String, u16>, ControlError> {
        let mut ports = BTreeMap::new();
        for (claim, group) in &structure.port_claims {
            let reserved = self.ports.allocate(&deployment.uuid, claim, group).await?;
            ports.insert(claim.clone(), reserved.port);
        }
        Ok(ports)
    }

    async fn render_file(
        &self,
        structure: &TemplateStructure,
        target: &Dir,
        relative: &Path,
        context: &RenderContext,
    ) -> Result<(), ControlError> {
        let name = relative.to_string_lossy();
        let source = structure
            .root
            .file(relative)
            .read_string()
            .await
            .map_err(|e| e.into_generation_failure(&format!("reading template file {}", name)))?;
        let rendered = self.renderer.render(&name, &source, context)?;

        let output = target.path().join(relative);
        if is_sealing_candidate(relative) {
            self.sealer.seal(&rendered, &output).await?;
        } else {
            File::new(&output)
                .write_string(&rendered)
                .await
                .map_err(|e| e.into_generation_failure(&format!("writing {}", name)))?;
        }
        Ok(())
    }
}

/// Digest of a directory tree: sorted relative paths and file contents
pub async fn tree_digest(root: &Dir) -> Result<String, ControlError> {
    let listing = root.walk().await?;
    let mut hasher = Sha256::new();
    for relative in &listing.files {
        hasher.update(relative.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        hasher.update(root.file(relative).read_bytes().await?);
        hasher.update([0u8]);
    }
    Ok(hex::encode(hasher.finalize()))
}
