// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Data source that stages cache traffic into the volume's virtual files

use crate::cache::{CacheDataSource, ReadDataEvent, WriteDataEvent};
use crate::handle_table::HandleTable;
use crate::namespace::Namespace;
use crate::types::{HandleId, RwResult, WritePolicy};
use crate::virtual_file::VirtualFile;
use crate::volume::HandleTarget;
use std::sync::Arc;
use tracing::debug;

/// Resolves cache callbacks to a `VirtualFile`.
///
/// The engine remembers the handle that first opened a path. That handle
/// may have been closed since, or its file unlinked, so resolution falls
/// back to the key.
pub struct StagingSource {
    handles: Arc<HandleTable<HandleTarget>>,
    namespace: Arc<Namespace>,
}

impl StagingSource {
    pub fn new(handles: Arc<HandleTable<HandleTarget>>, namespace: Arc<Namespace>) -> Self {
        Self { handles, namespace }
    }

    fn resolve(&self, context: HandleId, key: &str) -> Option<Arc<VirtualFile>> {
        match self.handles.get(context) {
            Some(HandleTarget::File(file)) if !file.is_detached() => Some(file),
            Some(HandleTarget::Directory(_)) => None,
            _ => self.namespace.lookup(key),
        }
    }
}

impl CacheDataSource for StagingSource {
    fn read_data(&self, event: &mut ReadDataEvent<'_>) {
        if event.flags.canceled || event.buffer.is_empty() {
            return;
        }
        let file = match self.resolve(event.context, event.key) {
            Some(file) if !file.is_dir() => file,
            _ => {
                event.result = RwResult::FileFailure;
                return;
            }
        };
        if event.position >= file.size() {
            event.result = RwResult::RangeBeyondEof;
            return;
        }
        match file.read(event.position, event.buffer) {
            Ok(0) | Err(_) => event.result = RwResult::FileFailure,
            Ok(n) => {
                event.bytes_read = n;
                event.result = if n < event.buffer.len() {
                    RwResult::Partial
                } else {
                    RwResult::Success
                };
            }
        }
    }

    fn write_data(&self, event: &mut WriteDataEvent<'_>) {
        if event.flags.canceled || event.buffer.is_empty() {
            return;
        }
        let file = match self.resolve(event.context, event.key) {
            Some(file) if !file.is_dir() => file,
            _ => {
                event.result = RwResult::FileFailure;
                return;
            }
        };
        // The volume sets the file size before the cache flushes into it
        match file.write(event.buffer, event.position, WritePolicy::KeepSize) {
            Ok(n) => {
                event.bytes_written = n;
                event.result = if n < event.buffer.len() {
                    RwResult::Partial
                } else {
                    RwResult::Success
                };
            }
            Err(err) => {
                debug!(target: "vdrive::staging", key = event.key, position = event.position, error = %err, "write_data refused");
                event.result = RwResult::FileFailure;
            }
        }
    }
}
