// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Data source that keeps flushed contents in a host folder
//!
//! Each cache key maps to one regular file under the root folder, one path
//! component per key component. Files and parent directories are created
//! on first write. A missing file reads as empty.

use crate::cache::{CacheDataSource, ReadDataEvent, WriteDataEvent};
use crate::types::RwResult;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

pub struct FolderSource {
    root: PathBuf,
    separator: char,
}

fn ignore_missing(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Fills as much of `buf` as the file holds past `position`.
fn read_at(path: &Path, position: u64, buf: &mut [u8]) -> io::Result<usize> {
    let mut file = File::open(path)?;
    if position >= file.metadata()?.len() {
        return Ok(0);
    }
    file.seek(SeekFrom::Start(position))?;
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

/// Deletes a file or an empty directory; a missing path is fine.
fn remove_path(path: &Path) -> io::Result<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
    };
    if metadata.is_dir() {
        ignore_missing(fs::remove_dir(path))
    } else {
        ignore_missing(fs::remove_file(path))
    }
}

fn write_at(path: &Path, position: u64, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().write(true).create(true).open(path)?;
    file.seek(SeekFrom::Start(position))?;
    file.write_all(data)
}

impl FolderSource {
    pub fn new(root: impl Into<PathBuf>, separator: char) -> Self {
        Self {
            root: root.into(),
            separator,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Host path for a cache key. `None` when a component would not stay a
    /// single plain name under the root.
    pub fn host_path(&self, key: &str) -> Option<PathBuf> {
        let mut path = self.root.clone();
        for part in key.split(self.separator).filter(|part| !part.is_empty()) {
            let mut components = Path::new(part).components();
            match (components.next(), components.next()) {
                (Some(Component::Normal(name)), None) if name == part => path.push(name),
                _ => return None,
            }
        }
        Some(path)
    }

    fn resolve(&self, key: &str) -> io::Result<PathBuf> {
        self.host_path(key).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{key} has no host path"),
            )
        })
    }

    /// Deletes the file or empty directory behind `key`, if there is one.
    pub fn remove(&self, key: &str) -> io::Result<()> {
        remove_path(&self.resolve(key)?)
    }

    /// Moves whatever is stored under `from` to `to`, replacing a file there.
    /// With nothing stored under `from`, `to` ends up empty as well.
    pub fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        let from = self.resolve(from)?;
        let to = self.resolve(to)?;
        if fs::symlink_metadata(&from).is_err() {
            return remove_path(&to);
        }
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&from, &to)
    }

    /// Cuts or zero-extends the stored file to `size`.
    pub fn set_len(&self, key: &str, size: u64) -> io::Result<()> {
        let path = self.resolve(key)?;
        match OpenOptions::new().write(true).open(&path) {
            Ok(file) => file.set_len(size),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }
}

impl CacheDataSource for FolderSource {
    fn read_data(&self, event: &mut ReadDataEvent<'_>) {
        if event.flags.canceled || event.buffer.is_empty() {
            return;
        }
        let path = match self.resolve(event.key) {
            Ok(path) => path,
            Err(err) => {
                warn!(target: "vdrive::folder", key = event.key, error = %err, "read_data refused");
                event.result = RwResult::FileFailure;
                return;
            }
        };
        match read_at(&path, event.position, event.buffer) {
            Ok(0) => event.result = RwResult::RangeBeyondEof,
            Ok(n) => {
                event.bytes_read = n;
                event.result = if n < event.buffer.len() {
                    RwResult::Partial
                } else {
                    RwResult::Success
                };
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                event.result = RwResult::RangeBeyondEof;
            }
            Err(err) => {
                debug!(target: "vdrive::folder", path = %path.display(), position = event.position, error = %err, "read failed");
                event.result = RwResult::FileFailure;
            }
        }
    }

    fn write_data(&self, event: &mut WriteDataEvent<'_>) {
        if event.flags.canceled || event.buffer.is_empty() {
            return;
        }
        let written = self
            .resolve(event.key)
            .and_then(|path| write_at(&path, event.position, event.buffer));
        match written {
            Ok(()) => {
                event.bytes_written = event.buffer.len();
                event.result = RwResult::Success;
            }
            Err(err) => {
                debug!(target: "vdrive::folder", key = event.key, position = event.position, error = %err, "write failed");
                event.result = RwResult::FileFailure;
            }
        }
    }
}
