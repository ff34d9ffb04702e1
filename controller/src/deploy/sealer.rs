//! Sealed-secret conversion
//!
//! Rendered files whose name carries the `-unsealedsecret` marker are
//! plaintext Kubernetes secrets. They are encrypted with the cluster's
//! sealing certificate and only the `-sealedsecret` counterpart survives.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::errors::ControlError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::process::{CommandSpec, ProcessRunner};
use crate::storage::settings::SealingSettings;

pub const UNSEALED_MARKER: &str = "-unsealedsecret";
pub const SEALED_MARKER: &str = "-sealedsecret";

/// Whether a file name marks a plaintext secret
pub fn is_sealing_candidate(path: &Path) -> bool {
    marker_position(path).is_some()
}

/// Path of the sealed artifact for a candidate
pub fn sealed_counterpart(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?.to_str()?;
    let at = marker_position(path)?;
    let sealed = format!(
        "{}{}{}",
        &name[..at],
        SEALED_MARKER,
        &name[at + UNSEALED_MARKER.len()..]
    );
    Some(path.with_file_name(sealed))
}

/// Byte offset of the last marker that ends the name or precedes a `.`
///
/// Dots before the marker belong to the stem, so `redis.v2-unsealedsecret.yaml`
/// and `db-unsealedsecret.tar.gz` are both candidates.
fn marker_position(path: &Path) -> Option<usize> {
    let name = path.file_name()?.to_str()?;
    name.rmatch_indices(UNSEALED_MARKER)
        .map(|(at, _)| at)
        .find(|&at| {
            let rest = &name[at + UNSEALED_MARKER.len()..];
            at > 0 && (rest.is_empty() || rest.starts_with('.'))
        })
}

/// Short-lived credential handed to the sealing tool
struct SealingCredential {
    api_server: String,
    ca_data: Option<String>,
    token: SecretString,
}

impl SealingCredential {
    async fn load(settings: &SealingSettings) -> Result<Option<Self>, ControlError> {
        let Some(token_file) = &settings.token_file else {
            return Ok(None);
        };
        let token = File::new(token_file).read_string().await?;
        let ca_data = match &settings.ca_cert_path {
            Some(path) => Some(STANDARD.encode(File::new(path).read_bytes().await?)),
            None => None,
        };
        Ok(Some(Self {
            api_server: settings.api_server.clone(),
            ca_data,
            token: SecretString::from(token.trim().to_string()),
        }))
    }

    fn kubeconfig(&self) -> Result<String, ControlError> {
        let mut cluster = json!({ "server": self.api_server });
        if let Some(ca_data) = &self.ca_data {
            cluster["certificate-authority-data"] = json!(ca_data);
        }
        let config = json!({
            "apiVersion": "v1",
            "kind": "Config",
            "clusters": [{ "name": "target", "cluster": cluster }],
            "users": [{ "name": "sealer", "user": { "token": self.token.expose_secret() } }],
            "contexts": [{ "name": "sealer", "context": { "cluster": "target", "user": "sealer" } }],
            "current-context": "sealer",
        });
        Ok(serde_yaml::to_string(&config)?)
    }
}

/// Runs the sealing tool on rendered secrets
pub struct SecretSealer {
    runner: Arc<dyn ProcessRunner>,
    settings: SealingSettings,
    scratch: Dir,
}

impl SecretSealer {
    pub fn new(runner: Arc<dyn ProcessRunner>, settings: SealingSettings, scratch: Dir) -> Self {
        Self {
            runner,
            settings,
            scratch,
        }
    }

    /// Write `rendered` to `target`, seal it next to it and remove the plaintext.
    ///
    /// Returns the sealed file path.
    pub async fn seal(&self, rendered: &str, target: &Path) -> Result<PathBuf, ControlError> {
        let sealed = sealed_counterpart(target).ok_or_else(|| {
            ControlError::GenerationFailed(format!(
                "{} is not a sealing candidate",
                target.display()
            ))
        })?;

        let plaintext = File::new(target);
        plaintext
            .write_string(rendered)
            .await
            .map_err(|e| e.into_generation_failure("writing secret"))?;

        let credential_dir = self.write_credential().await?;
        let result = self.run_tool(target, &sealed, credential_dir.as_ref()).await;

        if let Some(dir) = credential_dir {
            if let Err(e) = dir.delete().await {
                warn!("Failed to remove transient credential {}: {}", dir.path().display(), e);
            }
        }
        result?;

        plaintext
            .delete()
            .await
            .map_err(|e| e.into_generation_failure("removing plaintext secret"))?;

        info!("Sealed {}", sealed.display());
        Ok(sealed)
    }

    async fn write_credential(&self) -> Result<Option<Dir>, ControlError> {
        let credential = SealingCredential::load(&self.settings)
            .await
            .map_err(|e| e.into_generation_failure("loading sealing credential"))?;
        let Some(credential) = credential else {
            return Ok(None);
        };

        let dir = self
            .scratch
            .create_temp_dir("seal")
            .await
            .map_err(|e| e.into_generation_failure("creating credential directory"))?;
        let written = match credential.kubeconfig() {
            Ok(kubeconfig) => dir.file("kubeconfig").write_private(&kubeconfig).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            let _ = dir.delete().await;
            return Err(e.into_generation_failure("writing sealing credential"));
        }
        Ok(Some(dir))
    }

    async fn run_tool(
        &self,
        plaintext: &Path,
        sealed: &Path,
        credential_dir: Option<&Dir>,
    ) -> Result<(), ControlError> {
        let mut command = CommandSpec::new(self.settings.binary.as_str());
        if let Some(dir) = credential_dir {
            command = command
                .arg("--kubeconfig")
                .arg(dir.file("kubeconfig").path().to_string_lossy());
        }
        let command = command
            .args(["--controller-name", self.settings.controller_name.as_str()])
            .args(["--controller-namespace", self.settings.controller_namespace.as_str()])
            .args(["--format", "yaml"])
            .arg("--secret-file")
            .arg(plaintext.to_string_lossy())
            .arg("--sealed-secret-file")
            .arg(sealed.to_string_lossy())
            .search_path(self.settings.search_path.clone());

        debug!("Sealing {}", plaintext.display());
        self.runner
            .run(&command)
            .await
            .map_err(|e| e.into_generation_failure("running sealing tool"))?
            .check(&command)
            .map_err(ControlError::GenerationFailed)?;
        Ok(())
    }
}
