// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Volume configuration

use crate::fault::FaultPolicy;
use crate::types::WritePolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_DRIVE_SIZE: u64 = 64 * 1024 * 1024;
pub const DEFAULT_SECTOR_SIZE: u32 = 512;
pub const DEFAULT_MAX_FILENAME_LENGTH: usize = 255;
pub const DEFAULT_BLOCK_SIZE: u64 = 4096;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseSensitivity {
    #[default]
    Sensitive,
    /// Lookups fold case; names keep the spelling they were created with
    InsensitivePreserving,
}

/// Separator convention of the mount
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathStyle {
    #[default]
    Posix,
    Windows,
}

impl PathStyle {
    pub fn separator(self) -> char {
        match self {
            PathStyle::Posix => '/',
            PathStyle::Windows => '\\',
        }
    }
}

/// Where the reference cache keeps its blocks
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CacheMedium {
    #[default]
    Memory,
    Disk { root: PathBuf },
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CacheMode {
    /// Pure memory drive: reads and writes go straight to the virtual files
    #[default]
    Disabled,
    WriteBack {
        #[serde(default = "default_block_size")]
        block_size: u64,
        #[serde(default)]
        medium: CacheMedium,
    },
}

/// Where flushed file contents land
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backing {
    /// Back into the volume's own virtual files
    #[default]
    Staging,
    /// Into regular files under a host folder; needs a write-back cache
    Folder { root: PathBuf },
}

fn default_block_size() -> u64 {
    DEFAULT_BLOCK_SIZE
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeConfig {
    pub case_sensitivity: CaseSensitivity,
    pub path_style: PathStyle,
    pub drive_size: u64,
    pub sector_size: u32,
    pub max_filename_length: usize,
    pub write_policy: WritePolicy,
    pub cache: CacheMode,
    pub backing: Backing,
    pub faults: Option<FaultPolicy>,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            case_sensitivity: CaseSensitivity::Sensitive,
            path_style: PathStyle::Posix,
            drive_size: DEFAULT_DRIVE_SIZE,
            sector_size: DEFAULT_SECTOR_SIZE,
            max_filename_length: DEFAULT_MAX_FILENAME_LENGTH,
            write_policy: WritePolicy::ExtendOnWrite,
            cache: CacheMode::Disabled,
            backing: Backing::Staging,
            faults: None,
        }
    }
}

impl VolumeConfig {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Windows-style mount: backslash separator, case-insensitive lookups
    pub fn windows() -> Self {
        Self {
            case_sensitivity: CaseSensitivity::InsensitivePreserving,
            path_style: PathStyle::Windows,
            ..Self::default()
        }
    }

    pub fn separator(&self) -> char {
        self.path_style.separator()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_yields_defaults() {
        let config = VolumeConfig::from_json("{}").unwrap();
        assert_eq!(config, VolumeConfig::default());
        assert_eq!(config.separator(), '/');
    }

    #[test]
    fn parses_write_back_disk_cache() {
        let config = VolumeConfig::from_json(
            r#"{
                "case_sensitivity": "insensitive_preserving",
                "path_style": "windows",
                "write_policy": "keep_size",
                "cache": { "mode": "write_back", "medium": { "kind": "disk", "root": "/tmp/vd" } }
            }"#,
        )
        .unwrap();
        assert_eq!(config.separator(), '\\');
        assert_eq!(config.write_policy, WritePolicy::KeepSize);
        assert_eq!(
            config.cache,
            CacheMode::WriteBack {
                block_size: DEFAULT_BLOCK_SIZE,
                medium: CacheMedium::Disk { root: PathBuf::from("/tmp/vd") },
            }
        );
        assert_eq!(config.backing, Backing::Staging);
    }

    #[test]
    fn parses_folder_backing() {
        let config = VolumeConfig::from_json(
            r#"{
                "cache": { "mode": "write_back", "block_size": 512 },
                "backing": { "kind": "folder", "root": "/srv/share" }
            }"#,
        )
        .unwrap();
        assert_eq!(
            config.backing,
            Backing::Folder { root: PathBuf::from("/srv/share") }
        );
    }
}
