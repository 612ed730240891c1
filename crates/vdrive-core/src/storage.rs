// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Reference write-back cache engine
//!
//! Entries hold fixed-size blocks, each either absent, clean, or dirty.
//! Absent blocks are filled on demand from the attached data source; dirty
//! blocks are pushed back on an immediate-flush close. Block bytes live in
//! memory or in one spill file per entry.

use crate::cache::{CacheDataSource, CacheEngine, ReadDataEvent, WriteDataEvent};
use crate::config::{CacheMedium, DEFAULT_BLOCK_SIZE};
use crate::fault::{FaultInjector, FaultOp, FaultPolicy};
use crate::types::{FlushMode, HandleId, PrefetchMode, PurgeMode, RwResult};
use crate::{FsError, FsResult};
use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, warn};

enum BlockStore {
    Memory(HashMap<u64, Vec<u8>>),
    Disk { path: PathBuf, file: File },
}

impl BlockStore {
    fn load(&mut self, index: u64, block_size: u64) -> io::Result<Vec<u8>> {
        match self {
            BlockStore::Memory(blocks) => Ok(blocks
                .get(&index)
                .cloned()
                .unwrap_or_else(|| vec![0; block_size as usize])),
            BlockStore::Disk { file, .. } => {
                let mut buf = vec![0; block_size as usize];
                file.seek(SeekFrom::Start(index * block_size))?;
                file.read_exact(&mut buf)?;
                Ok(buf)
            }
        }
    }

    fn store(&mut self, index: u64, block_size: u64, data: &[u8]) -> io::Result<()> {
        match self {
            BlockStore::Memory(blocks) => {
                blocks.insert(index, data.to_vec());
                Ok(())
            }
            BlockStore::Disk { file, .. } => {
                file.seek(SeekFrom::Start(index * block_size))?;
                file.write_all(data)
            }
        }
    }

    /// Forgets every block at or after `first`.
    fn discard_from(&mut self, first: u64, block_size: u64) -> io::Result<()> {
        match self {
            BlockStore::Memory(blocks) => {
                blocks.retain(|index, _| *index < first);
                Ok(())
            }
            BlockStore::Disk { file, .. } => {
                let len = file.metadata()?.len();
                let cut = first * block_size;
                if cut < len {
                    file.set_len(cut)?;
                }
                Ok(())
            }
        }
    }

    fn destroy(self) {
        if let BlockStore::Disk { path, file } = self {
            drop(file);
            if let Err(err) = std::fs::remove_file(&path) {
                if err.kind() != io::ErrorKind::NotFound {
                    warn!(target: "vdrive::cache", path = %path.display(), error = %err, "spill file not removed");
                }
            }
        }
    }
}

struct CacheEntry {
    key: String,
    size: u64,
    context: HandleId,
    open: bool,
    /// Present blocks, `true` when dirty
    blocks: BTreeMap<u64, bool>,
    store: BlockStore,
}

impl CacheEntry {
    fn dirty_count(&self) -> usize {
        self.blocks.values().filter(|dirty| **dirty).count()
    }
}

pub struct WriteBackCache {
    block_size: u64,
    medium: CacheMedium,
    entries: Mutex<HashMap<String, Arc<Mutex<CacheEntry>>>>,
    source: RwLock<Option<Arc<dyn CacheDataSource>>>,
    faults: FaultInjector,
    next_entry_id: Mutex<u64>,
}

impl WriteBackCache {
    pub fn new(block_size: u64, medium: CacheMedium) -> FsResult<Self> {
        if block_size == 0 {
            return Err(FsError::InvalidArgument);
        }
        if let CacheMedium::Disk { root } = &medium {
            std::fs::create_dir_all(root)?;
        }
        Ok(Self {
            block_size,
            medium,
            entries: Mutex::new(HashMap::new()),
            source: RwLock::new(None),
            faults: FaultInjector::new(),
            next_entry_id: Mutex::new(1),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            medium: CacheMedium::Memory,
            entries: Mutex::new(HashMap::new()),
            source: RwLock::new(None),
            faults: FaultInjector::new(),
            next_entry_id: Mutex::new(1),
        }
    }

    pub fn with_faults(self, policy: FaultPolicy) -> Self {
        self.faults.set_policy(policy);
        self
    }

    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    pub fn entry_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Dirty blocks held for `key`; zero when there is no entry.
    pub fn dirty_blocks(&self, key: &str) -> usize {
        self.entry(key)
            .map(|entry| entry.lock().unwrap().dirty_count())
            .unwrap_or(0)
    }

    pub fn is_open(&self, key: &str) -> bool {
        self.entry(key)
            .map(|entry| entry.lock().unwrap().open)
            .unwrap_or(false)
    }

    fn entry(&self, key: &str) -> FsResult<Arc<Mutex<CacheEntry>>> {
        self.entries
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or(FsError::NotFound)
    }

    fn data_source(&self) -> FsResult<Arc<dyn CacheDataSource>> {
        self.source
            .read()
            .unwrap()
            .clone()
            .ok_or_else(|| FsError::Cache("no data source attached".into()))
    }

    fn new_store(&self) -> FsResult<BlockStore> {
        match &self.medium {
            CacheMedium::Memory => Ok(BlockStore::Memory(HashMap::new())),
            CacheMedium::Disk { root } => {
                let id = {
                    let mut next = self.next_entry_id.lock().unwrap();
                    let id = *next;
                    *next += 1;
                    id
                };
                let path = root.join(format!("{id:016x}.blk"));
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&path)?;
                Ok(BlockStore::Disk { path, file })
            }
        }
    }

    /// Returns block `index`, pulling it from the data source when absent.
    fn load_block(&self, entry: &mut CacheEntry, index: u64) -> FsResult<Vec<u8>> {
        if entry.blocks.contains_key(&index) {
            return Ok(entry.store.load(index, self.block_size)?);
        }
        let mut block = vec![0u8; self.block_size as usize];
        let start = index * self.block_size;
        let available = entry.size.saturating_sub(start).min(self.block_size) as usize;
        if available > 0 {
            let source = self.data_source()?;
            let mut event = ReadDataEvent::new(&entry.key, entry.context, start, &mut block[..available]);
            source.read_data(&mut event);
            match event.result {
                RwResult::Success | RwResult::Partial | RwResult::RangeBeyondEof => {}
                RwResult::FileFailure => {
                    return Err(FsError::Io(io::Error::new(
                        io::ErrorKind::Other,
                        format!("fill of {} at {} failed", entry.key, start),
                    )))
                }
            }
        }
        entry.store.store(index, self.block_size, &block)?;
        entry.blocks.insert(index, false);
        Ok(block)
    }

    fn flush_locked(&self, entry: &mut CacheEntry) -> FsResult<()> {
        let dirty: Vec<u64> = entry
            .blocks
            .iter()
            .filter(|(_, dirty)| **dirty)
            .map(|(index, _)| *index)
            .collect();
        if dirty.is_empty() {
            return Ok(());
        }
        let source = self.data_source()?;
        debug!(target: "vdrive::cache", key = %entry.key, blocks = dirty.len(), "flushing");
        for index in dirty {
            let start = index * self.block_size;
            if start < entry.size {
                let len = (entry.size - start).min(self.block_size) as usize;
                let block = entry.store.load(index, self.block_size)?;
                let mut event = WriteDataEvent::new(&entry.key, entry.context, start, &block[..len]);
                source.write_data(&mut event);
                if event.result != RwResult::Success {
                    return Err(FsError::Io(io::Error::new(
                        io::ErrorKind::WriteZero,
                        format!(
                            "flush of {} at {}: {:?} after {} bytes",
                            entry.key, start, event.result, event.bytes_written
                        ),
                    )));
                }
            }
            entry.blocks.insert(index, false);
        }
        Ok(())
    }

    fn prefetch(&self, key: &str) -> FsResult<()> {
        let entry = self.entry(key)?;
        let mut entry = entry.lock().unwrap();
        let blocks = entry.size.div_ceil(self.block_size);
        for index in 0..blocks {
            self.load_block(&mut entry, index)?;
        }
        Ok(())
    }
}

impl CacheEngine for WriteBackCache {
    fn attach_source(&self, source: Arc<dyn CacheDataSource>) {
        *self.source.write().unwrap() = Some(source);
    }

    fn open(&self, key: &str, initial_size: u64, prefetch: PrefetchMode, context: HandleId) -> FsResult<()> {
        self.faults.check(FaultOp::Open)?;
        {
            let mut entries = self.entries.lock().unwrap();
            match entries.get(key) {
                Some(existing) => {
                    let mut entry = existing.lock().unwrap();
                    entry.context = context;
                    entry.open = true;
                }
                None => {
                    let store = self.new_store()?;
                    entries.insert(
                        key.to_string(),
                        Arc::new(Mutex::new(CacheEntry {
                            key: key.to_string(),
                            size: initial_size,
                            context,
                            open: true,
                            blocks: BTreeMap::new(),
                            store,
                        })),
                    );
                }
            }
        }
        if prefetch == PrefetchMode::All {
            self.prefetch(key)?;
        }
        Ok(())
    }

    fn open_ex(
        &self,
        key: &str,
        initial_size: u64,
        create_if_missing: bool,
        prefetch: PrefetchMode,
        context: HandleId,
    ) -> FsResult<()> {
        if !create_if_missing && !self.exists(key) {
            return Err(FsError::NotFound);
        }
        self.open(key, initial_size, prefetch, context)
    }

    fn close(&self, key: &str, flush: FlushMode, purge: PurgeMode) -> FsResult<()> {
        self.faults.check(FaultOp::Close)?;
        let entry = self.entry(key)?;
        {
            let mut guard = entry.lock().unwrap();
            if flush == FlushMode::Immediate {
                self.flush_locked(&mut guard)?;
            }
            guard.open = false;
        }
        if purge == PurgeMode::Purge {
            let removed = {
                let mut entries = self.entries.lock().unwrap();
                match entries.get(key) {
                    Some(current) if Arc::ptr_eq(current, &entry) => entries.remove(key),
                    _ => None,
                }
            };
            drop(entry);
            if let Some(removed) = removed {
                if let Ok(cell) = Arc::try_unwrap(removed) {
                    cell.into_inner().unwrap().store.destroy();
                }
            }
        }
        Ok(())
    }

    fn exists(&self, key: &str) -> bool {
        self.entries.lock().unwrap().contains_key(key)
    }

    fn size(&self, key: &str) -> FsResult<u64> {
        Ok(self.entry(key)?.lock().unwrap().size)
    }

    fn set_size(&self, key: &str, size: u64, exact: bool) -> FsResult<()> {
        self.faults.check(FaultOp::SetSize)?;
        let entry = self.entry(key)?;
        let mut entry = entry.lock().unwrap();
        if size >= entry.size {
            entry.size = size;
            return Ok(());
        }
        if !exact {
            return Ok(());
        }
        let first_dropped = size.div_ceil(self.block_size);
        entry.blocks.retain(|index, _| *index < first_dropped);
        entry.store.discard_from(first_dropped, self.block_size)?;
        let tail = (size % self.block_size) as usize;
        let tail_index = size / self.block_size;
        if tail != 0 && entry.blocks.contains_key(&tail_index) {
            // Zero the cut-off part so a later grow reads zeros
            let mut block = entry.store.load(tail_index, self.block_size)?;
            block[tail..].fill(0);
            entry.store.store(tail_index, self.block_size, &block)?;
        }
        entry.size = size;
        Ok(())
    }

    fn delete(&self, key: &str) -> FsResult<()> {
        self.faults.check(FaultOp::Delete)?;
        let removed = self
            .entries
            .lock()
            .unwrap()
            .remove(key)
            .ok_or(FsError::NotFound)?;
        debug!(target: "vdrive::cache", key, "entry deleted");
        if let Ok(cell) = Arc::try_unwrap(removed) {
            cell.into_inner().unwrap().store.destroy();
        }
        Ok(())
    }

    fn change_id(&self, old_key: &str, new_key: &str) -> FsResult<()> {
        self.faults.check(FaultOp::ChangeId)?;
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(new_key) {
            return Err(FsError::AlreadyExists);
        }
        let entry = entries.remove(old_key).ok_or(FsError::NotFound)?;
        entry.lock().unwrap().key = new_key.to_string();
        entries.insert(new_key.to_string(), entry);
        debug!(target: "vdrive::cache", old_key, new_key, "entry re-keyed");
        Ok(())
    }

    fn read(&self, key: &str, position: u64, buf: &mut [u8]) -> FsResult<bool> {
        self.faults.check(FaultOp::Read)?;
        let entry = self.entry(key)?;
        let mut entry = entry.lock().unwrap();
        if buf.is_empty() {
            return Ok(true);
        }
        if position >= entry.size {
            return Ok(false);
        }
        let end = position.saturating_add(buf.len() as u64).min(entry.size);
        let mut offset = position;
        let mut done = 0usize;
        while offset < end {
            let index = offset / self.block_size;
            let within = (offset % self.block_size) as usize;
            let take = (self.block_size as usize - within).min((end - offset) as usize);
            let block = self.load_block(&mut entry, index)?;
            buf[done..done + take].copy_from_slice(&block[within..within + take]);
            done += take;
            offset += take as u64;
        }
        Ok(done == buf.len())
    }

    fn write(&self, key: &str, position: u64, data: &[u8]) -> FsResult<bool> {
        self.faults.check(FaultOp::Write)?;
        let entry = self.entry(key)?;
        let mut entry = entry.lock().unwrap();
        if data.is_empty() {
            return Ok(true);
        }
        let end = position
            .checked_add(data.len() as u64)
            .ok_or(FsError::InvalidArgument)?;
        let old_size = entry.size;
        let mut offset = position;
        let mut done = 0usize;
        while offset < end {
            let index = offset / self.block_size;
            let within = (offset % self.block_size) as usize;
            let take = (self.block_size as usize - within).min((end - offset) as usize);
            let whole_block = within == 0 && take == self.block_size as usize;
            let fresh = !entry.blocks.contains_key(&index) && index * self.block_size >= old_size;
            let mut block = if whole_block || fresh {
                vec![0u8; self.block_size as usize]
            } else {
                self.load_block(&mut entry, index)?
            };
            block[within..within + take].copy_from_slice(&data[done..done + take]);
            entry.store.store(index, self.block_size, &block)?;
            entry.blocks.insert(index, true);
            done += take;
            offset += take as u64;
        }
        if end > entry.size {
            entry.size = end;
        }
        Ok(true)
    }
}
