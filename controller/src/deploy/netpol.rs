//! Network isolation policy synthesis

use serde_json::{json, Value};
use serde_yaml::{Mapping, Value as YamlValue};
use tracing::debug;

use crate::errors::ControlError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::models::deployment::Deployment;
use crate::storage::settings::NetworkSettings;

/// File the policies are written to, relative to the deployment directory
pub const NETPOL_FILE: &str = "netpol.yaml";

const KUSTOMIZATION_FILES: [&str; 3] = ["kustomization.yaml", "kustomization.yml", "Kustomization"];
const NAMESPACE_LABEL: &str = "kubernetes.io/metadata.name";
const APP_LABEL: &str = "app.kubernetes.io/name";

/// Builds the NetworkPolicy manifests of a deployment
#[derive(Debug, Clone)]
pub struct NetworkPolicySynthesizer {
    network: NetworkSettings,
}

impl NetworkPolicySynthesizer {
    pub fn new(network: NetworkSettings) -> Self {
        Self { network }
    }

    /// Templates that act as side-channels into other deployments
    pub fn side_channel_templates(&self) -> [&str; 2] {
        [
            self.network.file_transfer_template.as_str(),
            self.network.database_ui_template.as_str(),
        ]
    }

    pub fn is_side_channel(&self, template: &str) -> bool {
        self.side_channel_templates().contains(&template)
    }

    /// Namespaces allowed to reach `deployment`, in policy order
    pub fn ingress_sources(&self, deployment: &Deployment, linked: &[Deployment]) -> Vec<String> {
        let mut sources: Vec<String> = Vec::new();
        let mut push = |ns: &str| {
            if !sources.iter().any(|s| s == ns) {
                sources.push(ns.to_string());
            }
        };

        for source in linked {
            push(source.uuid.as_str());
        }
        push(deployment.uuid.as_str());
        push(self.network.utility_namespace.as_str());
        if self.network.ingress_namespace != self.network.utility_namespace {
            push(self.network.ingress_namespace.as_str());
        }
        sources
    }

    /// All policies for a deployment
    pub fn synthesize(&self, deployment: &Deployment, linked: &[Deployment]) -> Vec<Value> {
        let from: Vec<Value> = self
            .ingress_sources(deployment, linked)
            .iter()
            .map(|ns| json!({ "namespaceSelector": { "matchLabels": { NAMESPACE_LABEL: ns } } }))
            .collect();

        let mut policies = vec![policy(
            "autodeploy-ingress",
            &deployment.uuid,
            json!([{ "from": from }]),
        )];

        if !self.is_side_channel(&deployment.template) {
            for template in self.side_channel_templates() {
                policies.push(policy(
                    &format!("autodeploy-allow-{}", template),
                    &deployment.uuid,
                    json!([{ "from": [{ "podSelector": { "matchLabels": { APP_LABEL: template } } }] }]),
                ));
            }
        }

        policies
    }

    /// Write the policies into `target` and register them with kustomize
    pub async fn apply(
        &self,
        target: &Dir,
        deployment: &Deployment,
        linked: &[Deployment],
    ) -> Result<(), ControlError> {
        let manifest = to_multi_document(&self.synthesize(deployment, linked))?;
        target
            .file(NETPOL_FILE)
            .write_string(&manifest)
            .await
            .map_err(|e| e.into_generation_failure("writing network policy"))?;
        prepend_kustomization_resource(target, NETPOL_FILE).await?;
        debug!("Network policy written for {}", deployment.uuid);
        Ok(())
    }
}

fn policy(name: &str, namespace: &str, ingress: Value) -> Value {
    json!({
        "apiVersion": "networking.k8s.io/v1",
        "kind": "NetworkPolicy",
        "metadata": { "name": name, "namespace": namespace },
        "spec": {
            "podSelector": {},
            "policyTypes": ["Ingress"],
            "ingress": ingress,
        },
    })
}

/// Serialize several manifests as one `---`-separated YAML stream
pub fn to_multi_document(documents: &[Value]) -> Result<String, ControlError> {
    let mut out = String::new();
    for document in documents {
        out.push_str("---\n");
        out.push_str(&serde_yaml::to_string(document)?);
    }
    Ok(out)
}

/// Put `resource` at the head of the kustomization's resource list.
///
/// An existing entry for the same resource is moved, not duplicated.
pub async fn prepend_kustomization_resource(target: &Dir, resource: &str) -> Result<(), ControlError> {
    let mut kustomization: Option<File> = None;
    for name in KUSTOMIZATION_FILES {
        let candidate = target.file(name);
        if candidate.exists().await {
            kustomization = Some(candidate);
            break;
        }
    }
    let file = kustomization.ok_or_else(|| {
        ControlError::GenerationFailed(format!(
            "no kustomization manifest in {}",
            target.path().display()
        ))
    })?;

    let contents = file
        .read_string()
        .await
        .map_err(|e| e.into_generation_failure("reading kustomization"))?;
    let mut document: YamlValue = serde_yaml::from_str(&contents)
        .map_err(|e| ControlError::GenerationFailed(format!("parsing kustomization: {}", e)))?;
    if document.is_null() {
        document = YamlValue::Mapping(Mapping::new());
    }

    let mapping = document.as_mapping_mut().ok_or_else(|| {
        ControlError::GenerationFailed("kustomization is not a mapping".to_string())
    })?;
    let resources = mapping
        .entry(YamlValue::from("resources"))
        .or_insert_with(|| YamlValue::Sequence(Vec::new()));
    if resources.is_null() {
        *resources = YamlValue::Sequence(Vec::new());
    }
    let list = resources.as_sequence_mut().ok_or_else(|| {
        ControlError::GenerationFailed("kustomization resources is not a list".to_string())
    })?;
    list.retain(|r| r.as_str() != Some(resource));
    list.insert(0, YamlValue::from(resource));

    let patched = serde_yaml::to_string(&document)
        .map_err(|e| ControlError::GenerationFailed(format!("writing kustomization: {}", e)))?;
    file.write_string(&patched)
        .await
        .map_err(|e| e.into_generation_failure("writing kustomization"))?;
    Ok(())
}
