// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Mounted volume: the object a driver adapter calls into
//!
//! One `Volume` per mount owns its namespace, its handle table and the
//! optional content cache. Everything a driver callback needs goes through
//! the methods here; none of them panic on stale handles or missing paths.

use crate::cache::{CacheDataSource, CacheEngine, ContentCache};
use crate::config::{Backing, CacheMode, VolumeConfig};
use crate::folder::FolderSource;
use crate::glob::Wildcard;
use crate::handle_table::{HandleTable, Release};
use crate::namespace::{Namespace, RenamePlan};
use crate::staging::StagingSource;
use crate::storage::WriteBackCache;
use crate::types::{
    CallerIdentity, DirEntry, FileAttributes, HandleId, Timestamp, VolumeStats, WritePolicy,
    FALLOC_FL_KEEP_SIZE,
};
use crate::virtual_file::VirtualFile;
use crate::{FsError, FsResult};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Directory listing captured at `opendir` time
#[derive(Debug)]
pub struct EnumerationCursor {
    dir: Arc<VirtualFile>,
    mask: Wildcard,
    names: Vec<String>,
    next: usize,
}

/// What a driver handle refers to
#[derive(Clone, Debug)]
pub enum HandleTarget {
    File(Arc<VirtualFile>),
    Directory(Arc<Mutex<EnumerationCursor>>),
}

pub struct Volume {
    config: VolumeConfig,
    namespace: Arc<Namespace>,
    handles: Arc<HandleTable<HandleTarget>>,
    cache: Option<ContentCache>,
    folder: Option<Arc<FolderSource>>,
}

impl Volume {
    /// Builds a volume, with the reference cache engine when configured.
    pub fn new(config: VolumeConfig) -> FsResult<Self> {
        let engine: Option<Arc<dyn CacheEngine>> = match &config.cache {
            CacheMode::Disabled if config.backing != Backing::Staging => {
                warn!(target: "vdrive::volume", backing = ?config.backing, "folder backing needs a write-back cache");
                return Err(FsError::InvalidArgument);
            }
            CacheMode::Disabled => None,
            CacheMode::WriteBack { block_size, medium } => {
                let engine = WriteBackCache::new(*block_size, medium.clone())?;
                if let Some(policy) = &config.faults {
                    engine.faults().set_policy(policy.clone());
                }
                Some(Arc::new(engine))
            }
        };
        Ok(Self::assemble(config, engine))
    }

    /// Builds a volume in front of an externally provided cache engine.
    pub fn with_cache_engine(config: VolumeConfig, engine: Arc<dyn CacheEngine>) -> Self {
        Self::assemble(config, Some(engine))
    }

    fn assemble(config: VolumeConfig, engine: Option<Arc<dyn CacheEngine>>) -> Self {
        let namespace = Arc::new(Namespace::new(
            config.separator(),
            config.case_sensitivity,
            config.max_filename_length,
        ));
        let handles = Arc::new(HandleTable::new());
        let folder = match (&config.backing, &engine) {
            (Backing::Folder { root }, Some(_)) => {
                Some(Arc::new(FolderSource::new(root.clone(), config.separator())))
            }
            _ => None,
        };
        let cache = engine.map(|engine| {
            let source: Arc<dyn CacheDataSource> = match &folder {
                Some(folder) => Arc::clone(folder) as Arc<dyn CacheDataSource>,
                None => Arc::new(StagingSource::new(Arc::clone(&handles), Arc::clone(&namespace))),
            };
            ContentCache::new(engine, source)
        });
        info!(
            target: "vdrive::volume",
            separator = %config.separator(),
            case = ?config.case_sensitivity,
            cached = cache.is_some(),
            backing = ?config.backing,
            drive_size = config.drive_size,
            "volume ready"
        );
        Self {
            config,
            namespace,
            handles,
            cache,
            folder,
        }
    }

    pub fn config(&self) -> &VolumeConfig {
        &self.config
    }

    pub fn namespace(&self) -> &Arc<Namespace> {
        &self.namespace
    }

    pub fn handles(&self) -> &Arc<HandleTable<HandleTarget>> {
        &self.handles
    }

    pub fn cache(&self) -> Option<&ContentCache> {
        self.cache.as_ref()
    }

    fn file_for(&self, handle: HandleId) -> FsResult<Arc<VirtualFile>> {
        match self.handles.get(handle) {
            Some(HandleTarget::File(file)) => Ok(file),
            Some(HandleTarget::Directory(_)) | None => Err(FsError::InvalidHandle),
        }
    }

    /// Cache key of a linked file. Detached files own no cache entry; the
    /// key their old path maps to may belong to another file by now.
    fn cache_key(&self, file: &VirtualFile) -> Option<String> {
        if file.is_detached() {
            return None;
        }
        Some(self.namespace.key(&file.path()))
    }

    /// Cache key and cached size, when the cache holds an entry for `file`.
    fn cached_entry(&self, file: &VirtualFile) -> FsResult<Option<(String, u64)>> {
        let (Some(cache), Some(key)) = (&self.cache, self.cache_key(file)) else {
            return Ok(None);
        };
        Ok(cache.size(&key)?.map(|size| (key, size)))
    }

    /// Removes what the backing folder holds for a deleted entry. Leftovers
    /// are harmless: a later create under the same key discards them.
    fn discard_backing(&self, key: Option<&str>) {
        if let (Some(folder), Some(key)) = (&self.folder, key) {
            if let Err(err) = folder.remove(key) {
                warn!(target: "vdrive::volume", key, error = %err, "backing entry not removed");
            }
        }
    }

    fn move_backing(&self, plan: &RenamePlan) -> FsResult<()> {
        if let Some(folder) = &self.folder {
            if plan.from != plan.to {
                folder.rename(&plan.from, &plan.to)?;
            }
        }
        Ok(())
    }

    fn restore_backing(&self, plan: &RenamePlan) {
        if let Some(folder) = &self.folder {
            if plan.from != plan.to {
                if let Err(err) = folder.rename(&plan.to, &plan.from) {
                    warn!(target: "vdrive::volume", from = %plan.to, to = %plan.from, error = %err, "could not restore backing folder entry");
                }
            }
        }
    }

    /// Size as drivers must see it: the cache wins once it has an entry.
    fn effective_size(&self, file: &VirtualFile) -> FsResult<u64> {
        if file.is_dir() {
            return Ok(0);
        }
        Ok(match self.cached_entry(file)? {
            Some((_, size)) => size,
            None => file.size(),
        })
    }

    fn attributes_of(&self, file: &VirtualFile) -> FsResult<FileAttributes> {
        let mut attributes = file.attributes();
        if let Some((_, size)) = if file.is_dir() { None } else { self.cached_entry(file)? } {
            attributes.size = size;
        }
        Ok(attributes)
    }

    fn check_space(&self, current: u64, wanted: u64) -> FsResult<()> {
        if wanted <= current {
            return Ok(());
        }
        let used = self.namespace.total_size();
        if used.saturating_add(wanted - current) > self.config.drive_size {
            return Err(FsError::NoSpace);
        }
        Ok(())
    }

    /// Creates a regular file and returns an open handle to it.
    pub fn create_file(&self, path: &str, mode: u32, caller: CallerIdentity) -> FsResult<HandleId> {
        let file = self.namespace.new_file("", mode, caller);
        self.namespace.insert(path, Arc::clone(&file))?;
        let handle = self.handles.alloc(HandleTarget::File(Arc::clone(&file)));
        file.open();
        if let (Some(cache), Some(key)) = (&self.cache, self.cache_key(&file)) {
            // A backing file left under this key by an earlier file is stale
            let registered = cache
                .forget(&key)
                .and_then(|_| match &self.folder {
                    Some(folder) => folder.remove(&key).map_err(FsError::from),
                    None => Ok(()),
                })
                .and_then(|_| cache.register_new(&key, handle));
            if let Err(err) = registered {
                warn!(target: "vdrive::volume", path, error = %err, "cache registration failed on create");
                self.handles.free(handle);
                file.close();
                return Err(err);
            }
        }
        debug!(target: "vdrive::volume", path, %handle, "created");
        Ok(handle)
    }

    pub fn mkdir(&self, path: &str, mode: u32, caller: CallerIdentity) -> FsResult<()> {
        let dir = self.namespace.new_directory("", mode, caller);
        self.namespace.insert(path, dir)?;
        debug!(target: "vdrive::volume", path, "directory created");
        Ok(())
    }

    /// Opens an existing file or directory. The first open of a regular
    /// file registers it with the cache.
    pub fn open(&self, path: &str) -> FsResult<HandleId> {
        let file = self.namespace.get(path)?;
        let handle = self.handles.alloc(HandleTarget::File(Arc::clone(&file)));
        let first = file.open() == 1;
        if first && !file.is_dir() {
            if let (Some(cache), Some(key)) = (&self.cache, self.cache_key(&file)) {
                if let Err(err) = cache.register(&key, file.size(), handle) {
                    warn!(target: "vdrive::volume", path, error = %err, "cache registration failed on open");
                    self.handles.free(handle);
                    file.close();
                    return Err(err);
                }
            }
        }
        debug!(target: "vdrive::volume", path, %handle, opens = file.open_count(), "opened");
        Ok(handle)
    }

    /// Takes another driver reference on an existing handle.
    pub fn reopen(&self, handle: HandleId) -> FsResult<()> {
        match self.handles.acquire(handle) {
            Some(HandleTarget::File(file)) => {
                file.open();
                Ok(())
            }
            Some(HandleTarget::Directory(_)) => Ok(()),
            None => Err(FsError::InvalidHandle),
        }
    }

    /// Drops one driver reference. When the file's last reference goes, its
    /// cached data is flushed; a flush failure is reported but the handle
    /// is released regardless.
    pub fn close(&self, handle: HandleId) -> FsResult<()> {
        let target = self.handles.get(handle).ok_or(FsError::InvalidHandle)?;
        if let Release::Absent = self.handles.release(handle) {
            return Err(FsError::InvalidHandle);
        }
        let HandleTarget::File(file) = target else {
            return Ok(());
        };
        if !file.close() || file.is_dir() {
            return Ok(());
        }
        if let (Some(cache), Some(key)) = (&self.cache, self.cache_key(&file)) {
            if cache.contains(&key) {
                if let Err(err) = cache.release(&key) {
                    warn!(target: "vdrive::volume", key = %key, %handle, error = %err, "flush on close failed");
                    return Err(err);
                }
            }
        }
        debug!(target: "vdrive::volume", %handle, "last reference closed");
        Ok(())
    }

    /// Reads at `position`. Reading at or past the end yields `RangeBeyondEnd`.
    pub fn read(&self, handle: HandleId, position: u64, buf: &mut [u8]) -> FsResult<usize> {
        let file = self.file_for(handle)?;
        if file.is_dir() {
            return Err(FsError::IsADirectory);
        }
        if buf.is_empty() {
            return Ok(0);
        }
        let n = match self.cached_entry(&file)? {
            Some((key, size)) => {
                if position >= size {
                    return Err(FsError::RangeBeyondEnd);
                }
                let n = buf.len().min((size - position) as usize);
                if let Some(cache) = &self.cache {
                    cache.read(&key, position, &mut buf[..n])?;
                }
                n
            }
            None => {
                if position >= file.size() {
                    return Err(FsError::RangeBeyondEnd);
                }
                file.read(position, buf)?
            }
        };
        file.touch_accessed();
        Ok(n)
    }

    /// Writes at `position` following the volume's write policy.
    pub fn write(&self, handle: HandleId, position: u64, data: &[u8]) -> FsResult<usize> {
        let file = self.file_for(handle)?;
        if file.is_dir() {
            return Err(FsError::IsADirectory);
        }
        if data.is_empty() {
            return Ok(0);
        }
        let end = position
            .checked_add(data.len() as u64)
            .ok_or(FsError::InvalidArgument)?;
        let policy = self.config.write_policy;
        let written = match (self.cached_entry(&file)?, &self.cache) {
            (Some((key, size)), Some(cache)) => {
                let len = match policy {
                    WritePolicy::KeepSize => {
                        if position >= size {
                            return Err(FsError::RangeBeyondEnd);
                        }
                        data.len().min((size - position) as usize)
                    }
                    WritePolicy::ExtendOnWrite => {
                        self.check_space(size, end)?;
                        data.len()
                    }
                };
                cache.write(&key, position, &data[..len])?;
                // Keep the staged file's size in lockstep with the cache
                file.extend_to(position + len as u64)?;
                len
            }
            _ => {
                if policy == WritePolicy::ExtendOnWrite {
                    self.check_space(file.size(), end)?;
                }
                file.write(data, position, policy)?
            }
        };
        file.touch_written();
        Ok(written)
    }

    /// Sets the logical size. The cache is updated first; if it refuses,
    /// the file is left as it was.
    pub fn truncate(&self, path: &str, size: u64) -> FsResult<()> {
        let file = self.namespace.get(path)?;
        self.resize(&file, size)
    }

    pub fn truncate_handle(&self, handle: HandleId, size: u64) -> FsResult<()> {
        let file = self.file_for(handle)?;
        self.resize(&file, size)
    }

    fn resize(&self, file: &VirtualFile, size: u64) -> FsResult<()> {
        if file.is_dir() {
            return Err(FsError::IsADirectory);
        }
        let current = self.effective_size(file)?;
        self.check_space(current, size)?;
        if let (Some(cache), Some(key)) = (&self.cache, self.cache_key(file)) {
            if cache.contains(&key) {
                if let Err(err) = cache.resize(&key, size, true) {
                    warn!(target: "vdrive::volume", key = %key, size, error = %err, "cache resize failed, size unchanged");
                    return Err(err);
                }
            }
            if let Some(folder) = &self.folder {
                // Bytes past the cached size are never read back, so a
                // failure here only leaves an unreachable tail
                if let Err(err) = folder.set_len(&key, size) {
                    warn!(target: "vdrive::volume", key = %key, size, error = %err, "backing file not resized");
                }
            }
        }
        file.set_size(size)?;
        file.touch_written();
        Ok(())
    }

    /// Reserves space; without `FALLOC_FL_KEEP_SIZE` the file also grows to
    /// `offset + length`.
    pub fn fallocate(&self, handle: HandleId, flags: u32, offset: u64, length: u64) -> FsResult<()> {
        if flags & !FALLOC_FL_KEEP_SIZE != 0 {
            return Err(FsError::Unsupported);
        }
        let file = self.file_for(handle)?;
        if file.is_dir() {
            return Err(FsError::IsADirectory);
        }
        let end = offset.checked_add(length).ok_or(FsError::InvalidArgument)?;
        let keep_size = flags & FALLOC_FL_KEEP_SIZE != 0;
        let current = self.effective_size(&file)?;
        let previous_allocation = file.allocation_size();
        if !keep_size || end > previous_allocation {
            self.check_space(current, end)?;
        }

        if end > previous_allocation {
            file.set_allocation_size(end)?;
        }
        if !keep_size && end > current {
            if let (Some(cache), Some(key)) = (&self.cache, self.cache_key(&file)) {
                if cache.contains(&key) {
                    if let Err(err) = cache.resize(&key, end, false) {
                        if end > previous_allocation {
                            file.set_allocation_size(previous_allocation)?;
                        }
                        return Err(err);
                    }
                }
            }
            file.extend_to(end)?;
        }
        Ok(())
    }

    /// Renames within the volume, re-keying cached entries before the
    /// namespace changes.
    pub fn rename(&self, old: &str, new: &str, replace: bool) -> FsResult<()> {
        let plan = match &self.cache {
            Some(cache) => self.namespace.rename_with(old, new, replace, |plan| {
                self.move_backing(plan)?;
                if let Err(err) = cache.rekey(plan) {
                    self.restore_backing(plan);
                    return Err(err);
                }
                Ok(())
            })?,
            None => self.namespace.rename(old, new, replace)?,
        };
        debug!(target: "vdrive::volume", old, new, moved = plan.moved_files.len(), "renamed");
        Ok(())
    }

    /// Removes a regular file. Its cache entry goes first; if that fails the
    /// file stays.
    pub fn unlink(&self, path: &str) -> FsResult<()> {
        let file = self.namespace.get(path)?;
        if file.is_dir() {
            return Err(FsError::IsADirectory);
        }
        let key = self.cache_key(&file);
        if let (Some(cache), Some(key)) = (&self.cache, &key) {
            if let Err(err) = cache.forget(key) {
                warn!(target: "vdrive::volume", path, error = %err, "cache delete failed, file kept");
                return Err(err);
            }
        }
        self.namespace.delete(path)?;
        self.discard_backing(key.as_deref());
        debug!(target: "vdrive::volume", path, "unlinked");
        Ok(())
    }

    pub fn rmdir(&self, path: &str) -> FsResult<()> {
        let dir = self.namespace.get(path)?;
        if !dir.is_dir() {
            return Err(FsError::NotADirectory);
        }
        let key = self.cache_key(&dir);
        self.namespace.delete(path)?;
        self.discard_backing(key.as_deref());
        Ok(())
    }

    pub fn getattr(&self, path: &str) -> FsResult<FileAttributes> {
        let file = self.namespace.get(path)?;
        self.attributes_of(&file)
    }

    pub fn getattr_handle(&self, handle: HandleId) -> FsResult<FileAttributes> {
        let file = self.file_for(handle)?;
        self.attributes_of(&file)
    }

    pub fn chmod(&self, path: &str, mode: u32) -> FsResult<()> {
        self.namespace.get(path)?.set_mode(mode);
        Ok(())
    }

    pub fn chown(&self, path: &str, uid: Option<u32>, gid: Option<u32>) -> FsResult<()> {
        self.namespace.get(path)?.set_owner(uid, gid);
        Ok(())
    }

    /// Empty timestamps leave the corresponding time untouched.
    pub fn set_times(
        &self,
        path: &str,
        created: Timestamp,
        accessed: Timestamp,
        written: Timestamp,
    ) -> FsResult<()> {
        self.namespace.get(path)?.set_times(created, accessed, written);
        Ok(())
    }

    fn snapshot(&self, dir: Arc<VirtualFile>, mask: Wildcard) -> FsResult<EnumerationCursor> {
        let names = self.namespace.children(&dir.path(), Some(&mask))?;
        Ok(EnumerationCursor {
            dir,
            mask,
            names,
            next: 0,
        })
    }

    /// Starts an enumeration of `path`, filtered by a wildcard mask.
    pub fn opendir(&self, path: &str, mask: Option<&str>) -> FsResult<HandleId> {
        let dir = self.namespace.get(path)?;
        if !dir.is_dir() {
            return Err(FsError::NotADirectory);
        }
        let mask = Wildcard::new(mask.unwrap_or("*"), self.namespace.is_case_insensitive())?;
        let cursor = self.snapshot(dir, mask)?;
        let handle = self
            .handles
            .alloc(HandleTarget::Directory(Arc::new(Mutex::new(cursor))));
        debug!(target: "vdrive::volume", path, %handle, "enumeration started");
        Ok(handle)
    }

    /// Next entry of the snapshot, skipping names deleted since.
    pub fn readdir(&self, handle: HandleId) -> FsResult<Option<DirEntry>> {
        let cursor = match self.handles.get(handle) {
            Some(HandleTarget::Directory(cursor)) => cursor,
            Some(HandleTarget::File(_)) => return Err(FsError::NotADirectory),
            None => return Err(FsError::InvalidHandle),
        };
        let mut cursor = cursor.lock().unwrap();
        while cursor.next < cursor.names.len() {
            let name = cursor.names[cursor.next].clone();
            cursor.next += 1;
            let path = self.namespace.combine_names(&cursor.dir.path(), &name);
            if let Some(file) = self.namespace.lookup(&path) {
                let attributes = self.attributes_of(&file)?;
                return Ok(Some(DirEntry {
                    name: attributes.name.clone(),
                    attributes,
                }));
            }
        }
        Ok(None)
    }

    /// Restarts an enumeration from a fresh snapshot under the same handle.
    pub fn rewinddir(&self, handle: HandleId) -> FsResult<()> {
        let cursor = match self.handles.get(handle) {
            Some(HandleTarget::Directory(cursor)) => cursor,
            Some(HandleTarget::File(_)) => return Err(FsError::NotADirectory),
            None => return Err(FsError::InvalidHandle),
        };
        let (dir, mask) = {
            let cursor = cursor.lock().unwrap();
            (Arc::clone(&cursor.dir), cursor.mask.clone())
        };
        let fresh = self.snapshot(dir, mask)?;
        self.handles
            .set(handle, HandleTarget::Directory(Arc::new(Mutex::new(fresh))))
            .ok_or(FsError::InvalidHandle)?;
        Ok(())
    }

    pub fn closedir(&self, handle: HandleId) -> FsResult<()> {
        match self.handles.get(handle) {
            Some(HandleTarget::Directory(_)) => {
                self.handles.free(handle);
                Ok(())
            }
            Some(HandleTarget::File(_)) => Err(FsError::NotADirectory),
            None => Err(FsError::InvalidHandle),
        }
    }

    pub fn statfs(&self) -> VolumeStats {
        let used = self.namespace.total_size();
        let sector = u64::from(self.config.sector_size.max(1));
        let total_sectors = self.config.drive_size / sector;
        let free_sectors =
            (self.config.drive_size.saturating_sub(used) + sector / 2) / sector;
        VolumeStats {
            sector_size: self.config.sector_size,
            total_sectors,
            free_sectors: free_sectors.min(total_sectors),
            used_bytes: used,
            max_name_length: self.config.max_filename_length,
        }
    }

    /// Flushes open files, drops every handle and cache entry, and resets
    /// the namespace to an empty root. Returns the first failure seen.
    pub fn unmount(&self) -> FsResult<()> {
        let mut first_error = None;
        let drained = self.handles.clear();
        info!(target: "vdrive::volume", handles = drained.len(), "unmounting");
        if let Some(cache) = &self.cache {
            let mut flushed = HashSet::new();
            for (handle, target) in &drained {
                let HandleTarget::File(file) = target else {
                    continue;
                };
                if file.is_dir() || !flushed.insert(file.id()) {
                    continue;
                }
                let Some(key) = self.cache_key(file) else {
                    continue;
                };
                if cache.contains(&key) {
                    if let Err(err) = cache.release(&key) {
                        warn!(target: "vdrive::volume", %handle, key = %key, error = %err, "flush on unmount failed");
                        first_error.get_or_insert(err);
                    }
                }
            }
            for path in self.namespace.paths() {
                let key = self.namespace.key(&path);
                if let Err(err) = cache.forget(&key) {
                    first_error.get_or_insert(err);
                }
            }
        }
        self.namespace.clear();
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
