//! Manifest template rendering

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use tera::{Context, Tera};

use crate::errors::ControlError;
use crate::models::deployment::Deployment;

/// Resource limits as seen by templates
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RenderLimits {
    pub enabled: bool,
    pub cpu: Option<String>,
    pub memory: Option<String>,
}

/// Variables bound while rendering one deployment
#[derive(Clone, Default, Serialize)]
pub struct RenderContext {
    pub data: BTreeMap<String, String>,
    pub secret: BTreeMap<String, String>,
    pub limits: RenderLimits,
    #[serde(rename = "portClaims")]
    pub port_claims: BTreeMap<String, u16>,
    pub paused: bool,
}

impl RenderContext {
    /// Build the context for a deployment, exposing its secrets
    pub fn for_deployment(deployment: &Deployment, port_claims: BTreeMap<String, u16>) -> Self {
        let limits = deployment
            .limits
            .as_ref()
            .map(|l| RenderLimits {
                enabled: l.enabled,
                cpu: l.cpu.clone(),
                memory: l.memory.clone(),
            })
            .unwrap_or_default();

        Self {
            data: deployment.data.clone(),
            secret: deployment.exposed_secrets(),
            limits,
            port_claims,
            paused: deployment.paused,
        }
    }
}

impl fmt::Debug for RenderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderContext")
            .field("data", &self.data)
            .field("secret", &self.secret.keys().collect::<Vec<_>>())
            .field("limits", &self.limits)
            .field("port_claims", &self.port_claims)
            .field("paused", &self.paused)
            .finish()
    }
}

/// Renders a single file's text
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, name: &str, content: &str, context: &RenderContext) -> Result<String, ControlError>;
}

/// Tera-backed renderer; manifests are YAML, so auto-escaping is off
#[derive(Debug, Clone, Default)]
pub struct TeraRenderer;

impl TeraRenderer {
    pub fn new() -> Self {
        Self
    }
}

impl TemplateRenderer for TeraRenderer {
    fn render(&self, name: &str, content: &str, context: &RenderContext) -> Result<String, ControlError> {
        let context = Context::from_serialize(context).map_err(ControlError::from)?;
        Tera::one_off(content, &context, false).map_err(|e| match ControlError::from(e) {
            ControlError::GenerationFailed(msg) => {
                ControlError::GenerationFailed(format!("rendering {}: {}", name, msg))
            }
            other => other,
        })
    }
}
