//! Template directory structure

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::errors::ControlError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Port claims declared by a template, not rendered into the output
pub const PORT_CLAIMS_FILE: &str = "port-claims.json";

/// Files and directories of one template, relative to its root
#[derive(Debug, Clone)]
pub struct TemplateStructure {
    pub name: String,
    pub root: Dir,
    pub files: BTreeSet<PathBuf>,
    pub dirs: BTreeSet<PathBuf>,

    /// claim -> pool name
    pub port_claims: BTreeMap<String, String>,
}

impl TemplateStructure {
    /// Scan `<template_root>/<template>`
    pub async fn resolve(template_root: &Path, template: &str) -> Result<Self, ControlError> {
        if template.is_empty() || template.contains('/') || template.contains("..") {
            return Err(ControlError::NotFound(format!("template '{}'", template)));
        }

        let root = Dir::new(template_root.join(template));
        if !root.exists().await {
            return Err(ControlError::NotFound(format!(
                "template '{}' under {}",
                template,
                template_root.display()
            )));
        }

        let mut listing = root.walk().await?;
        let claims_file = Path::new(PORT_CLAIMS_FILE);
        let port_claims = if listing.files.remove(claims_file) {
            parse_port_claims(&root.file(claims_file)).await?
        } else {
            BTreeMap::new()
        };

        debug!(
            "Template {}: {} file(s), {} dir(s), {} port claim(s)",
            template,
            listing.files.len(),
            listing.dirs.len(),
            port_claims.len()
        );
        Ok(Self {
            name: template.to_string(),
            root,
            files: listing.files,
            dirs: listing.dirs,
            port_claims,
        })
    }

    pub fn has_port_claims(&self) -> bool {
        !self.port_claims.is_empty()
    }
}

async fn parse_port_claims(file: &File) -> Result<BTreeMap<String, String>, ControlError> {
    file.read_json::<BTreeMap<String, String>>()
        .await
        .map_err(|e| ControlError::GenerationFailed(format!("invalid {}: {}", PORT_CLAIMS_FILE, e)))
}
