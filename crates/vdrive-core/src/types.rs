// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Core type definitions shared by the volume engine and its drivers

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Opaque handle identifier returned to the driver layer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HandleId(pub u64);

impl HandleId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for HandleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "h{}", self.0)
    }
}

/// Stable identity of a virtual file for the lifetime of the volume
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileId(pub u64);

impl FileId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

/// File type bits, POSIX layout
pub const MODE_TYPE_MASK: u32 = 0o170000;
pub const MODE_DIR: u32 = 0o040000;
pub const MODE_FILE: u32 = 0o100000;

/// `fallocate` flag keeping the logical size untouched
pub const FALLOC_FL_KEEP_SIZE: u32 = 0x01;

/// Point in time as 100ns ticks since 1601-01-01 (FILETIME layout).
///
/// Tick value 0 is the "unset" sentinel; the Unix epoch is a regular,
/// non-empty value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub const EMPTY: Timestamp = Timestamp(0);
    /// 1970-01-01 expressed in FILETIME ticks
    pub const UNIX_EPOCH_TICKS: u64 = 116_444_736_000_000_000;
    const TICKS_PER_SECOND: u64 = 10_000_000;

    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Saturates instead of overflowing for times out of range.
    fn ticks(d: Duration) -> u64 {
        d.as_secs()
            .saturating_mul(Self::TICKS_PER_SECOND)
            .saturating_add(u64::from(d.subsec_nanos() / 100))
    }

    pub fn from_system_time(time: SystemTime) -> Self {
        match time.duration_since(UNIX_EPOCH) {
            Ok(after) => Timestamp(Self::UNIX_EPOCH_TICKS.saturating_add(Self::ticks(after))),
            Err(before) => {
                let ticks = Self::ticks(before.duration());
                // Never collapse onto the sentinel
                Timestamp(Self::UNIX_EPOCH_TICKS.saturating_sub(ticks).max(1))
            }
        }
    }

    /// `None` for the empty sentinel
    pub fn to_system_time(self) -> Option<SystemTime> {
        if self.is_empty() {
            return None;
        }
        let (ticks, before_epoch) = if self.0 >= Self::UNIX_EPOCH_TICKS {
            (self.0 - Self::UNIX_EPOCH_TICKS, false)
        } else {
            (Self::UNIX_EPOCH_TICKS - self.0, true)
        };
        let d = Duration::new(
            ticks / Self::TICKS_PER_SECOND,
            ((ticks % Self::TICKS_PER_SECOND) * 100) as u32,
        );
        if before_epoch {
            UNIX_EPOCH.checked_sub(d)
        } else {
            UNIX_EPOCH.checked_add(d)
        }
    }
}

/// Identity of the process on whose behalf a driver callback runs
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub uid: u32,
    pub gid: u32,
}

/// Attribute snapshot returned by `getattr` and enumeration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttributes {
    pub id: FileId,
    pub name: String,
    pub is_dir: bool,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub allocation_size: u64,
    pub created: Timestamp,
    pub accessed: Timestamp,
    pub written: Timestamp,
}

/// Directory entry produced by `readdir`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub attributes: FileAttributes,
}

/// Free-space report for the mounted volume
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeStats {
    pub sector_size: u32,
    pub total_sectors: u64,
    pub free_sectors: u64,
    pub used_bytes: u64,
    pub max_name_length: usize,
}

/// How writes past the current end of file are treated
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WritePolicy {
    /// Writes grow the file as needed
    #[default]
    ExtendOnWrite,
    /// Writes never change the size; ranges past the end are refused or clamped
    KeepSize,
}

/// Prefetch hint passed when a path is registered with the cache engine
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrefetchMode {
    Nothing,
    All,
}

/// What to do with dirty data when a cache entry is closed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushMode {
    /// Leave dirty blocks in the cache
    Deferred,
    /// Push dirty blocks to the data source before returning
    Immediate,
}

/// What to do with clean data when a cache entry is closed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PurgeMode {
    /// Keep the entry and its clean blocks around
    None,
    /// Drop the entry after flushing
    Purge,
}

/// Flags carried by data-source callbacks
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RwFlags {
    pub canceled: bool,
}

/// Outcome code set on data-source callback events
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RwResult {
    #[default]
    Success,
    Partial,
    RangeBeyondEof,
    FileFailure,
}
