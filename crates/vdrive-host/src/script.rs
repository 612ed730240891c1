// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Loading of volume configurations and request scripts from disk

use crate::adapter::Request;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use vdrive_core::VolumeConfig;

/// Reads a JSON volume configuration; no path means the defaults.
pub fn load_config(path: Option<&Path>) -> Result<VolumeConfig> {
    match path {
        Some(path) => {
            let content = fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            let config = VolumeConfig::from_json(&content)
                .with_context(|| format!("invalid config {}", path.display()))?;
            Ok(config)
        }
        None => Ok(VolumeConfig::default()),
    }
}

/// Reads a JSON array of requests.
pub fn load_script(path: &Path) -> Result<Vec<Request>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read script {}", path.display()))?;
    parse_script(&content).with_context(|| format!("invalid script {}", path.display()))
}

pub fn parse_script(text: &str) -> Result<Vec<Request>> {
    Ok(serde_json::from_str(text)?)
}
