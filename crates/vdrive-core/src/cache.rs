// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Content cache contract and the facade the volume talks to
//!
//! A cache engine stores file bytes keyed by namespace key and pulls or
//! pushes them through a registered [`CacheDataSource`]. The engine is
//! opaque: it may be slow, it may fail, and its own locking is unknown.
//! [`ContentCache`] wraps it so every engine failure surfaces as an I/O
//! error for the one operation that hit it.

use crate::namespace::RenamePlan;
use crate::types::{FlushMode, HandleId, PrefetchMode, PurgeMode, RwFlags, RwResult};
use crate::{FsError, FsResult};
use std::io;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Request from the engine to fill `buffer` from the backing store.
#[derive(Debug)]
pub struct ReadDataEvent<'a> {
    pub key: &'a str,
    pub context: HandleId,
    pub position: u64,
    pub buffer: &'a mut [u8],
    pub flags: RwFlags,
    pub bytes_read: usize,
    pub result: RwResult,
}

impl<'a> ReadDataEvent<'a> {
    pub fn new(key: &'a str, context: HandleId, position: u64, buffer: &'a mut [u8]) -> Self {
        Self {
            key,
            context,
            position,
            buffer,
            flags: RwFlags::default(),
            bytes_read: 0,
            result: RwResult::Success,
        }
    }
}

/// Request from the engine to persist `buffer` to the backing store.
#[derive(Debug)]
pub struct WriteDataEvent<'a> {
    pub key: &'a str,
    pub context: HandleId,
    pub position: u64,
    pub buffer: &'a [u8],
    pub flags: RwFlags,
    pub bytes_written: usize,
    pub result: RwResult,
}

impl<'a> WriteDataEvent<'a> {
    pub fn new(key: &'a str, context: HandleId, position: u64, buffer: &'a [u8]) -> Self {
        Self {
            key,
            context,
            position,
            buffer,
            flags: RwFlags::default(),
            bytes_written: 0,
            result: RwResult::Success,
        }
    }
}

/// Backing store callbacks invoked by the cache engine.
///
/// Implementations report their outcome through the event's `result` and
/// byte-count fields and never panic or return errors.
pub trait CacheDataSource: Send + Sync {
    fn read_data(&self, event: &mut ReadDataEvent<'_>);
    fn write_data(&self, event: &mut WriteDataEvent<'_>);
}

/// External cache engine keyed by namespace key.
#[cfg_attr(test, mockall::automock)]
pub trait CacheEngine: Send + Sync {
    /// Registers the callbacks used to fill and flush blocks.
    fn attach_source(&self, source: Arc<dyn CacheDataSource>);

    fn open(&self, key: &str, initial_size: u64, prefetch: PrefetchMode, context: HandleId) -> FsResult<()>;

    fn open_ex(
        &self,
        key: &str,
        initial_size: u64,
        create_if_missing: bool,
        prefetch: PrefetchMode,
        context: HandleId,
    ) -> FsResult<()>;

    fn close(&self, key: &str, flush: FlushMode, purge: PurgeMode) -> FsResult<()>;

    fn exists(&self, key: &str) -> bool;

    fn size(&self, key: &str) -> FsResult<u64>;

    /// `exact == false` only ever grows the entry.
    fn set_size(&self, key: &str, size: u64, exact: bool) -> FsResult<()>;

    fn delete(&self, key: &str) -> FsResult<()>;

    fn change_id(&self, old_key: &str, new_key: &str) -> FsResult<()>;

    /// `Ok(false)` when fewer than `buf.len()` bytes were available.
    fn read(&self, key: &str, position: u64, buf: &mut [u8]) -> FsResult<bool>;

    fn write(&self, key: &str, position: u64, data: &[u8]) -> FsResult<bool>;
}

fn short_transfer(what: &str, key: &str) -> FsError {
    FsError::Io(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("short cache {what} on {key}"),
    ))
}

/// Volume-side view of the cache engine.
pub struct ContentCache {
    engine: Arc<dyn CacheEngine>,
}

impl ContentCache {
    pub fn new(engine: Arc<dyn CacheEngine>, source: Arc<dyn CacheDataSource>) -> Self {
        engine.attach_source(source);
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<dyn CacheEngine> {
        &self.engine
    }

    pub fn contains(&self, key: &str) -> bool {
        self.engine.exists(key)
    }

    /// First open of an existing file; data is pulled on demand.
    pub fn register(&self, key: &str, size: u64, context: HandleId) -> FsResult<()> {
        debug!(target: "vdrive::cache", key, size, %context, "register");
        self.engine
            .open(key, size, PrefetchMode::Nothing, context)
            .map_err(FsError::into_io)
    }

    /// Registration of a file that was just created.
    pub fn register_new(&self, key: &str, context: HandleId) -> FsResult<()> {
        debug!(target: "vdrive::cache", key, %context, "register new");
        self.engine
            .open_ex(key, 0, true, PrefetchMode::Nothing, context)
            .map_err(FsError::into_io)
    }

    /// Last close: flush dirty data now, keep clean data around.
    pub fn release(&self, key: &str) -> FsResult<()> {
        debug!(target: "vdrive::cache", key, "flush on last close");
        self.engine
            .close(key, FlushMode::Immediate, PurgeMode::None)
            .map_err(FsError::into_io)
    }

    /// Cached size, or `None` when the engine holds no entry for `key`.
    pub fn size(&self, key: &str) -> FsResult<Option<u64>> {
        if !self.engine.exists(key) {
            return Ok(None);
        }
        self.engine.size(key).map(Some).map_err(FsError::into_io)
    }

    pub fn resize(&self, key: &str, size: u64, exact: bool) -> FsResult<()> {
        self.engine
            .set_size(key, size, exact)
            .map_err(FsError::into_io)
    }

    pub fn read(&self, key: &str, position: u64, buf: &mut [u8]) -> FsResult<()> {
        match self.engine.read(key, position, buf) {
            Ok(true) => Ok(()),
            Ok(false) => Err(short_transfer("read", key)),
            Err(err) => Err(err.into_io()),
        }
    }

    pub fn write(&self, key: &str, position: u64, data: &[u8]) -> FsResult<()> {
        match self.engine.write(key, position, data) {
            Ok(true) => Ok(()),
            Ok(false) => Err(short_transfer("write", key)),
            Err(err) => Err(err.into_io()),
        }
    }

    /// Drops the cached entry for `key`, if any.
    pub fn forget(&self, key: &str) -> FsResult<()> {
        if !self.engine.exists(key) {
            return Ok(());
        }
        self.engine.delete(key).map_err(FsError::into_io)
    }

    /// Re-keys cache entries for a pending rename.
    ///
    /// Stale entries under destination keys are dropped first. If any
    /// identity change fails, the ones already applied are reverted.
    pub fn rekey(&self, plan: &RenamePlan) -> FsResult<()> {
        if let Some(dest) = &plan.replaced {
            self.forget(dest)?;
        }
        let mut applied: Vec<(&str, &str)> = Vec::new();
        for (from, to) in &plan.moved_files {
            if !self.engine.exists(from) {
                continue;
            }
            let step = self.forget(to).and_then(|_| self.engine.change_id(from, to));
            if let Err(err) = step {
                warn!(
                    target: "vdrive::cache",
                    from = %plan.from,
                    to = %plan.to,
                    entry = %from,
                    error = %err,
                    "cache identity change failed, rename aborted"
                );
                for (done_from, done_to) in applied.iter().rev() {
                    if let Err(undo) = self.engine.change_id(done_to, done_from) {
                        error!(
                            target: "vdrive::cache",
                            entry = %done_to,
                            error = %undo,
                            "could not restore cache identity"
                        );
                    }
                }
                return Err(err.into_io());
            }
            applied.push((from.as_str(), to.as_str()));
        }
        Ok(())
    }
}
