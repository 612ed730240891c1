// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! In-process virtual drive engine
//!
//! A [`Volume`] keeps an in-memory tree of [`VirtualFile`]s addressed by
//! path, hands out reference-counted handles to driver callbacks, and can
//! stage file contents through an external [`CacheEngine`].

pub mod cache;
pub mod config;
pub mod error;
pub mod fault;
pub mod folder;
pub mod glob;
pub mod handle_table;
pub mod namespace;
pub mod staging;
pub mod storage;
pub mod types;
pub mod virtual_file;
pub mod volume;

pub use cache::{CacheDataSource, CacheEngine, ContentCache, ReadDataEvent, WriteDataEvent};
pub use config::{Backing, CacheMedium, CacheMode, CaseSensitivity, PathStyle, VolumeConfig};
pub use error::{FsError, FsResult};
pub use fault::{FaultErrno, FaultInjector, FaultOp, FaultPolicy, FaultRule};
pub use folder::FolderSource;
pub use glob::Wildcard;
pub use handle_table::{HandleTable, Release};
pub use namespace::{Namespace, RenamePlan};
pub use staging::StagingSource;
pub use storage::WriteBackCache;
pub use types::*;
pub use virtual_file::VirtualFile;
pub use volume::{EnumerationCursor, HandleTarget, Volume};
