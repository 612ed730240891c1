// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! In-memory file and directory entities
//!
//! A `VirtualFile` carries its metadata behind one lock and its content
//! (bytes for files, child names for directories) behind another. Content
//! mutations on one file are serialized; different files never contend.
//! When both locks are needed, metadata is taken first.

use crate::glob::Wildcard;
use crate::types::{
    CallerIdentity, FileAttributes, FileId, Timestamp, WritePolicy, MODE_DIR, MODE_FILE,
    MODE_TYPE_MASK,
};
use crate::{FsError, FsResult};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

#[derive(Debug)]
struct Metadata {
    name: String,
    path: String,
    mode: u32,
    uid: u32,
    gid: u32,
    created: Timestamp,
    accessed: Timestamp,
    written: Timestamp,
}

#[derive(Debug)]
enum Content {
    /// `size <= data.len()` always holds; `data.len()` is the allocation
    Data { data: Vec<u8>, size: u64 },
    /// Folded child name -> name as created
    Entries { fold_case: bool, names: BTreeMap<String, String> },
}

#[derive(Debug)]
pub struct VirtualFile {
    id: FileId,
    is_dir: bool,
    meta: Mutex<Metadata>,
    content: Mutex<Content>,
    open_count: AtomicU32,
    /// Set once the file has been unlinked or replaced
    detached: AtomicBool,
}

fn to_len(value: u64) -> FsResult<usize> {
    usize::try_from(value).map_err(|_| FsError::NoSpace)
}

fn fold(name: &str, fold_case: bool) -> String {
    if fold_case {
        name.to_lowercase()
    } else {
        name.to_string()
    }
}

fn set_allocation_locked(data: &mut Vec<u8>, size: &mut u64, capacity: u64) -> FsResult<()> {
    let capacity_len = to_len(capacity)?;
    if capacity_len > data.len() {
        data.try_reserve_exact(capacity_len - data.len())
            .map_err(|_| FsError::NoSpace)?;
        data.resize(capacity_len, 0);
    } else {
        data.truncate(capacity_len);
        data.shrink_to_fit();
        if *size > capacity {
            *size = capacity;
        }
    }
    Ok(())
}

fn set_size_locked(data: &mut Vec<u8>, size: &mut u64, new_size: u64) -> FsResult<()> {
    if new_size <= *size {
        *size = new_size;
        return Ok(());
    }
    let new_len = to_len(new_size)?;
    if new_len > data.len() {
        set_allocation_locked(data, size, new_size)?;
    }
    // Bytes left behind by an earlier shrink must read back as zero
    let old_len = *size as usize;
    data[old_len..new_len].fill(0);
    *size = new_size;
    Ok(())
}

impl VirtualFile {
    pub fn file(id: FileId, name: &str, mode: u32, owner: CallerIdentity) -> Self {
        Self::with_content(
            id,
            false,
            name,
            (mode & !MODE_TYPE_MASK) | MODE_FILE,
            owner,
            Content::Data {
                data: Vec::new(),
                size: 0,
            },
        )
    }

    pub fn directory(
        id: FileId,
        name: &str,
        mode: u32,
        owner: CallerIdentity,
        fold_case: bool,
    ) -> Self {
        Self::with_content(
            id,
            true,
            name,
            (mode & !MODE_TYPE_MASK) | MODE_DIR,
            owner,
            Content::Entries {
                fold_case,
                names: BTreeMap::new(),
            },
        )
    }

    fn with_content(
        id: FileId,
        is_dir: bool,
        name: &str,
        mode: u32,
        owner: CallerIdentity,
        content: Content,
    ) -> Self {
        let now = Timestamp::now();
        Self {
            id,
            is_dir,
            meta: Mutex::new(Metadata {
                name: name.to_string(),
                path: String::new(),
                mode,
                uid: owner.uid,
                gid: owner.gid,
                created: now,
                accessed: now,
                written: now,
            }),
            content: Mutex::new(content),
            open_count: AtomicU32::new(0),
            detached: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> FileId {
        self.id
    }

    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    pub fn name(&self) -> String {
        self.meta.lock().unwrap().name.clone()
    }

    /// Full display path inside the volume.
    pub fn path(&self) -> String {
        self.meta.lock().unwrap().path.clone()
    }

    pub(crate) fn set_location(&self, name: &str, path: &str) {
        let mut meta = self.meta.lock().unwrap();
        meta.name = name.to_string();
        meta.path = path.to_string();
    }

    pub(crate) fn set_path(&self, path: String) {
        self.meta.lock().unwrap().path = path;
    }

    pub fn mode(&self) -> u32 {
        self.meta.lock().unwrap().mode
    }

    /// Permission bits only; the type bits are fixed at creation.
    pub fn set_mode(&self, mode: u32) {
        let mut meta = self.meta.lock().unwrap();
        meta.mode = (meta.mode & MODE_TYPE_MASK) | (mode & !MODE_TYPE_MASK);
    }

    pub fn owner(&self) -> CallerIdentity {
        let meta = self.meta.lock().unwrap();
        CallerIdentity {
            uid: meta.uid,
            gid: meta.gid,
        }
    }

    pub fn set_owner(&self, uid: Option<u32>, gid: Option<u32>) {
        let mut meta = self.meta.lock().unwrap();
        if let Some(uid) = uid {
            meta.uid = uid;
        }
        if let Some(gid) = gid {
            meta.gid = gid;
        }
    }

    /// (created, accessed, written)
    pub fn times(&self) -> (Timestamp, Timestamp, Timestamp) {
        let meta = self.meta.lock().unwrap();
        (meta.created, meta.accessed, meta.written)
    }

    /// Empty timestamps leave the corresponding field unchanged.
    pub fn set_times(&self, created: Timestamp, accessed: Timestamp, written: Timestamp) {
        let mut meta = self.meta.lock().unwrap();
        if !created.is_empty() {
            meta.created = created;
        }
        if !accessed.is_empty() {
            meta.accessed = accessed;
        }
        if !written.is_empty() {
            meta.written = written;
        }
    }

    pub fn touch_accessed(&self) {
        self.meta.lock().unwrap().accessed = Timestamp::now();
    }

    pub fn touch_written(&self) {
        let now = Timestamp::now();
        let mut meta = self.meta.lock().unwrap();
        meta.accessed = now;
        meta.written = now;
    }

    pub fn size(&self) -> u64 {
        match &*self.content.lock().unwrap() {
            Content::Data { size, .. } => *size,
            Content::Entries { .. } => 0,
        }
    }

    pub fn allocation_size(&self) -> u64 {
        match &*self.content.lock().unwrap() {
            Content::Data { data, .. } => data.len() as u64,
            Content::Entries { .. } => 0,
        }
    }

    /// Copies bytes at `position` into `buf`, clamped to the current size.
    pub fn read(&self, position: u64, buf: &mut [u8]) -> FsResult<usize> {
        let content = self.content.lock().unwrap();
        let Content::Data { data, size } = &*content else {
            return Err(FsError::IsADirectory);
        };
        if position >= *size || buf.is_empty() {
            return Ok(0);
        }
        let start = position as usize;
        let n = buf.len().min((*size - position) as usize);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    /// Writes `src` at `position`.
    ///
    /// Under `KeepSize` a write starting at or past the end fails with
    /// `RangeBeyondEnd` and one crossing the end is clamped.
    pub fn write(&self, src: &[u8], position: u64, policy: WritePolicy) -> FsResult<usize> {
        let mut content = self.content.lock().unwrap();
        let Content::Data { data, size } = &mut *content else {
            return Err(FsError::IsADirectory);
        };
        if src.is_empty() {
            return Ok(0);
        }
        let end = position
            .checked_add(src.len() as u64)
            .ok_or(FsError::InvalidArgument)?;
        match policy {
            WritePolicy::ExtendOnWrite => {
                if end > *size {
                    set_size_locked(data, size, end)?;
                }
            }
            WritePolicy::KeepSize => {
                if position >= *size {
                    return Err(FsError::RangeBeyondEnd);
                }
            }
        }
        let start = position as usize;
        let n = src.len().min((*size - position) as usize);
        data[start..start + n].copy_from_slice(&src[..n]);
        Ok(n)
    }

    /// Shrinking only moves the size; growing zero-fills the new range.
    pub fn set_size(&self, new_size: u64) -> FsResult<()> {
        let mut content = self.content.lock().unwrap();
        match &mut *content {
            Content::Data { data, size } => set_size_locked(data, size, new_size),
            Content::Entries { .. } => Err(FsError::IsADirectory),
        }
    }

    /// Grows the size to `end` if it is currently smaller; `true` if it grew.
    pub fn extend_to(&self, end: u64) -> FsResult<bool> {
        let mut content = self.content.lock().unwrap();
        match &mut *content {
            Content::Data { data, size } if end > *size => {
                set_size_locked(data, size, end)?;
                Ok(true)
            }
            Content::Data { .. } => Ok(false),
            Content::Entries { .. } => Err(FsError::IsADirectory),
        }
    }

    /// Reallocates to exactly `capacity` bytes; a smaller capacity also cuts the size.
    pub fn set_allocation_size(&self, capacity: u64) -> FsResult<()> {
        let mut content = self.content.lock().unwrap();
        match &mut *content {
            Content::Data { data, size } => set_allocation_locked(data, size, capacity),
            Content::Entries { .. } => Err(FsError::IsADirectory),
        }
    }

    /// Links a child name; `false` if the name was already present.
    pub fn add_child(&self, name: &str) -> FsResult<bool> {
        let mut content = self.content.lock().unwrap();
        let Content::Entries { fold_case, names } = &mut *content else {
            return Err(FsError::NotADirectory);
        };
        let key = fold(name, *fold_case);
        if names.contains_key(&key) {
            return Ok(false);
        }
        names.insert(key, name.to_string());
        Ok(true)
    }

    pub fn remove_child(&self, name: &str) -> bool {
        let mut content = self.content.lock().unwrap();
        match &mut *content {
            Content::Entries { fold_case, names } => names.remove(&fold(name, *fold_case)).is_some(),
            Content::Data { .. } => false,
        }
    }

    /// Replaces the stored spelling of an existing child, for case-only renames.
    pub fn respell_child(&self, name: &str) -> bool {
        let mut content = self.content.lock().unwrap();
        match &mut *content {
            Content::Entries { fold_case, names } => match names.get_mut(&fold(name, *fold_case)) {
                Some(stored) => {
                    *stored = name.to_string();
                    true
                }
                None => false,
            },
            Content::Data { .. } => false,
        }
    }

    pub fn child_exists(&self, name: &str) -> bool {
        match &*self.content.lock().unwrap() {
            Content::Entries { fold_case, names } => names.contains_key(&fold(name, *fold_case)),
            Content::Data { .. } => false,
        }
    }

    pub fn child_count(&self) -> usize {
        match &*self.content.lock().unwrap() {
            Content::Entries { names, .. } => names.len(),
            Content::Data { .. } => 0,
        }
    }

    /// Child names, in folded-name order, filtered by `mask` when given.
    pub fn enumerate_children(&self, mask: Option<&Wildcard>) -> Vec<String> {
        match &*self.content.lock().unwrap() {
            Content::Entries { names, .. } => names
                .values()
                .filter(|name| mask.map_or(true, |m| m.is_match(name)))
                .cloned()
                .collect(),
            Content::Data { .. } => Vec::new(),
        }
    }

    /// Releases content; used on delete and volume reset.
    pub fn clear(&self) {
        match &mut *self.content.lock().unwrap() {
            Content::Data { data, size } => {
                *data = Vec::new();
                *size = 0;
            }
            Content::Entries { names, .. } => names.clear(),
        }
    }

    /// Clears the file and marks it unreachable. Handles that still point
    /// here keep working on the orphaned bytes only.
    pub(crate) fn detach(&self) {
        self.detached.store(true, Ordering::Release);
        self.clear();
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    /// Adds a driver reference, returning the new count.
    pub fn open(&self) -> u32 {
        self.open_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Drops a driver reference; `true` when it was the last one.
    pub fn close(&self) -> bool {
        match self
            .open_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        {
            Ok(previous) => previous == 1,
            Err(_) => false,
        }
    }

    pub fn open_count(&self) -> u32 {
        self.open_count.load(Ordering::Acquire)
    }

    pub fn attributes(&self) -> FileAttributes {
        let meta = self.meta.lock().unwrap();
        let (size, allocation_size) = match &*self.content.lock().unwrap() {
            Content::Data { data, size } => (*size, data.len() as u64),
            Content::Entries { .. } => (0, 0),
        };
        FileAttributes {
            id: self.id,
            name: meta.name.clone(),
            is_dir: self.is_dir,
            mode: meta.mode,
            uid: meta.uid,
            gid: meta.gid,
            size,
            allocation_size,
            created: meta.created,
            accessed: meta.accessed,
            written: meta.written,
        }
    }
}
