// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Driver callback adapter
//!
//! Every driver event arrives as one [`Request`] and leaves as one
//! [`Reply`] whose `code` is either a POSIX errno or a Win32 error code.
//! Nothing raised inside the core crosses [`Adapter::dispatch`]: errors
//! become codes and panics become a generic I/O failure.

use libc::{
    EBADF, EEXIST, EFBIG, EINVAL, EIO, EISDIR, ENOENT, ENOSPC, ENOTDIR, ENOTEMPTY, EOPNOTSUPP,
};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error};
use vdrive_core::{
    CallerIdentity, DirEntry, FileAttributes, FsError, FsResult, HandleId, Timestamp, Volume,
    VolumeStats,
};

/// Largest slice handed to the core in one read or write call.
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Win32 error codes produced under [`ErrorFlavor::Win32`].
pub mod win32 {
    pub const ERROR_SUCCESS: i32 = 0;
    pub const ERROR_FILE_NOT_FOUND: i32 = 2;
    pub const ERROR_PATH_NOT_FOUND: i32 = 3;
    pub const ERROR_ACCESS_DENIED: i32 = 5;
    pub const ERROR_INVALID_HANDLE: i32 = 6;
    pub const ERROR_WRITE_FAULT: i32 = 29;
    pub const ERROR_READ_FAULT: i32 = 30;
    pub const ERROR_HANDLE_EOF: i32 = 38;
    pub const ERROR_NOT_SUPPORTED: i32 = 50;
    pub const ERROR_FILE_EXISTS: i32 = 80;
    pub const ERROR_INVALID_PARAMETER: i32 = 87;
    pub const ERROR_DISK_FULL: i32 = 112;
    pub const ERROR_INVALID_NAME: i32 = 123;
    pub const ERROR_DIR_NOT_EMPTY: i32 = 145;
    pub const ERROR_ALREADY_EXISTS: i32 = 183;
    pub const ERROR_DIRECTORY: i32 = 267;
}

/// Code space of [`Reply::code`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ErrorFlavor {
    #[default]
    Posix,
    Win32,
}

fn default_file_mode() -> u32 {
    0o644
}

fn default_dir_mode() -> u32 {
    0o755
}

/// Truncate target: an open handle or a path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FileRef {
    Handle(HandleId),
    Path(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Create {
        path: String,
        #[serde(default = "default_file_mode")]
        mode: u32,
        #[serde(default)]
        caller: CallerIdentity,
    },
    Mkdir {
        path: String,
        #[serde(default = "default_dir_mode")]
        mode: u32,
        #[serde(default)]
        caller: CallerIdentity,
    },
    Open {
        path: String,
    },
    Reopen {
        handle: HandleId,
    },
    Close {
        handle: HandleId,
    },
    Read {
        handle: HandleId,
        position: u64,
        length: usize,
    },
    Write {
        handle: HandleId,
        position: u64,
        #[serde(with = "hex_bytes")]
        data: Vec<u8>,
    },
    Truncate {
        target: FileRef,
        size: u64,
    },
    Fallocate {
        handle: HandleId,
        #[serde(default)]
        flags: u32,
        offset: u64,
        length: u64,
    },
    Rename {
        from: String,
        to: String,
        #[serde(default)]
        replace: bool,
    },
    Unlink {
        path: String,
    },
    Rmdir {
        path: String,
    },
    GetAttr {
        path: String,
    },
    Chmod {
        path: String,
        mode: u32,
    },
    Chown {
        path: String,
        #[serde(default)]
        uid: Option<u32>,
        #[serde(default)]
        gid: Option<u32>,
    },
    SetTimes {
        path: String,
        #[serde(default)]
        created: Timestamp,
        #[serde(default)]
        accessed: Timestamp,
        #[serde(default)]
        written: Timestamp,
    },
    OpenDir {
        path: String,
        #[serde(default)]
        mask: Option<String>,
    },
    ReadDir {
        handle: HandleId,
    },
    RewindDir {
        handle: HandleId,
    },
    CloseDir {
        handle: HandleId,
    },
    StatFs,
    Unmount,
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::Create { .. } => "create",
            Request::Mkdir { .. } => "mkdir",
            Request::Open { .. } => "open",
            Request::Reopen { .. } => "reopen",
            Request::Close { .. } => "close",
            Request::Read { .. } => "read",
            Request::Write { .. } => "write",
            Request::Truncate { .. } => "truncate",
            Request::Fallocate { .. } => "fallocate",
            Request::Rename { .. } => "rename",
            Request::Unlink { .. } => "unlink",
            Request::Rmdir { .. } => "rmdir",
            Request::GetAttr { .. } => "getattr",
            Request::Chmod { .. } => "chmod",
            Request::Chown { .. } => "chown",
            Request::SetTimes { .. } => "set_times",
            Request::OpenDir { .. } => "opendir",
            Request::ReadDir { .. } => "readdir",
            Request::RewindDir { .. } => "rewinddir",
            Request::CloseDir { .. } => "closedir",
            Request::StatFs => "statfs",
            Request::Unmount => "unmount",
        }
    }

    /// Requests whose `NotFound` means a missing parent rather than a missing target.
    fn creates_entry(&self) -> bool {
        matches!(
            self,
            Request::Create { .. } | Request::Mkdir { .. } | Request::Rename { .. }
        )
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplyPayload {
    #[default]
    Empty,
    Handle {
        handle: HandleId,
    },
    Written {
        count: usize,
    },
    Data {
        #[serde(with = "hex_bytes")]
        data: Vec<u8>,
    },
    Attributes {
        attributes: FileAttributes,
    },
    Entry {
        entry: Option<DirEntry>,
    },
    Stats {
        stats: VolumeStats,
    },
}

/// Outcome of one request; `code == 0` means success.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub code: i32,
    #[serde(default)]
    pub payload: ReplyPayload,
}

impl Reply {
    fn ok(payload: ReplyPayload) -> Self {
        Self { code: 0, payload }
    }

    fn error(code: i32) -> Self {
        Self {
            code,
            payload: ReplyPayload::Empty,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

/// POSIX errno for a core error.
pub fn posix_code(err: &FsError) -> i32 {
    match err {
        FsError::NotFound => ENOENT,
        FsError::AlreadyExists => EEXIST,
        FsError::NotADirectory => ENOTDIR,
        FsError::IsADirectory => EISDIR,
        FsError::InvalidName | FsError::InvalidArgument => EINVAL,
        FsError::InvalidHandle => EBADF,
        FsError::DirectoryNotEmpty => ENOTEMPTY,
        FsError::RangeBeyondEnd => EFBIG,
        FsError::Unsupported => EOPNOTSUPP,
        FsError::NoSpace => ENOSPC,
        FsError::Io(e) => e.raw_os_error().unwrap_or(EIO),
        FsError::Cache(_) => EIO,
    }
}

/// Win32 error code for a core error raised by `request`.
pub fn win32_code(request: &Request, err: &FsError) -> i32 {
    use win32::*;
    match err {
        FsError::NotFound if request.creates_entry() => ERROR_PATH_NOT_FOUND,
        FsError::NotFound => ERROR_FILE_NOT_FOUND,
        FsError::AlreadyExists => match request {
            Request::Create { .. } => ERROR_FILE_EXISTS,
            _ => ERROR_ALREADY_EXISTS,
        },
        FsError::NotADirectory => ERROR_DIRECTORY,
        FsError::IsADirectory => ERROR_ACCESS_DENIED,
        FsError::InvalidName => ERROR_INVALID_NAME,
        FsError::InvalidArgument => ERROR_INVALID_PARAMETER,
        FsError::InvalidHandle => ERROR_INVALID_HANDLE,
        FsError::DirectoryNotEmpty => ERROR_DIR_NOT_EMPTY,
        FsError::RangeBeyondEnd => ERROR_HANDLE_EOF,
        FsError::Unsupported => ERROR_NOT_SUPPORTED,
        FsError::NoSpace => ERROR_DISK_FULL,
        FsError::Io(_) | FsError::Cache(_) => match request {
            Request::Read { .. } => ERROR_READ_FAULT,
            _ => ERROR_WRITE_FAULT,
        },
    }
}

/// Single entry point between an embedding driver and one mounted volume.
pub struct Adapter {
    volume: Arc<Volume>,
    flavor: ErrorFlavor,
}

impl Adapter {
    pub fn new(volume: Arc<Volume>, flavor: ErrorFlavor) -> Self {
        Self { volume, flavor }
    }

    pub fn volume(&self) -> &Arc<Volume> {
        &self.volume
    }

    pub fn flavor(&self) -> ErrorFlavor {
        self.flavor
    }

    pub fn dispatch(&self, request: Request) -> Reply {
        let op = request.name();
        let outcome = catch_unwind(AssertUnwindSafe(|| self.handle(&request)));
        match outcome {
            Ok(Ok(payload)) => Reply::ok(payload),
            Ok(Err(err)) => {
                let code = match self.flavor {
                    ErrorFlavor::Posix => posix_code(&err),
                    ErrorFlavor::Win32 => win32_code(&request, &err),
                };
                debug!(target: "vdrive::adapter", op, error = %err, code, "request failed");
                Reply::error(code)
            }
            Err(_) => {
                error!(target: "vdrive::adapter", op, "panic inside volume callback");
                Reply::error(match self.flavor {
                    ErrorFlavor::Posix => EIO,
                    ErrorFlavor::Win32 => win32::ERROR_WRITE_FAULT,
                })
            }
        }
    }

    fn handle(&self, request: &Request) -> FsResult<ReplyPayload> {
        let volume = &self.volume;
        let payload = match request {
            Request::Create { path, mode, caller } => ReplyPayload::Handle {
                handle: volume.create_file(path, *mode, *caller)?,
            },
            Request::Mkdir { path, mode, caller } => {
                volume.mkdir(path, *mode, *caller)?;
                ReplyPayload::Empty
            }
            Request::Open { path } => ReplyPayload::Handle {
                handle: volume.open(path)?,
            },
            Request::Reopen { handle } => {
                volume.reopen(*handle)?;
                ReplyPayload::Empty
            }
            Request::Close { handle } => {
                volume.close(*handle)?;
                ReplyPayload::Empty
            }
            Request::Read {
                handle,
                position,
                length,
            } => match self.read_chunked(*handle, *position, *length) {
                Ok(data) => ReplyPayload::Data { data },
                // POSIX drivers expect a short (empty) read at end of file
                Err(FsError::RangeBeyondEnd) if self.flavor == ErrorFlavor::Posix => {
                    ReplyPayload::Data { data: Vec::new() }
                }
                Err(err) => return Err(err),
            },
            Request::Write {
                handle,
                position,
                data,
            } => ReplyPayload::Written {
                count: self.write_chunked(*handle, *position, data)?,
            },
            Request::Truncate { target, size } => {
                match target {
                    FileRef::Handle(handle) => volume.truncate_handle(*handle, *size)?,
                    FileRef::Path(path) => volume.truncate(path, *size)?,
                }
                ReplyPayload::Empty
            }
            Request::Fallocate {
                handle,
                flags,
                offset,
                length,
            } => {
                volume.fallocate(*handle, *flags, *offset, *length)?;
                ReplyPayload::Empty
            }
            Request::Rename { from, to, replace } => {
                volume.rename(from, to, *replace)?;
                ReplyPayload::Empty
            }
            Request::Unlink { path } => {
                volume.unlink(path)?;
                ReplyPayload::Empty
            }
            Request::Rmdir { path } => {
                volume.rmdir(path)?;
                ReplyPayload::Empty
            }
            Request::GetAttr { path } => ReplyPayload::Attributes {
                attributes: volume.getattr(path)?,
            },
            Request::Chmod { path, mode } => {
                volume.chmod(path, *mode)?;
                ReplyPayload::Empty
            }
            Request::Chown { path, uid, gid } => {
                volume.chown(path, *uid, *gid)?;
                ReplyPayload::Empty
            }
            Request::SetTimes {
                path,
                created,
                accessed,
                written,
            } => {
                volume.set_times(path, *created, *accessed, *written)?;
                ReplyPayload::Empty
            }
            Request::OpenDir { path, mask } => ReplyPayload::Handle {
                handle: volume.opendir(path, mask.as_deref())?,
            },
            Request::ReadDir { handle } => ReplyPayload::Entry {
                entry: volume.readdir(*handle)?,
            },
            Request::RewindDir { handle } => {
                volume.rewinddir(*handle)?;
                ReplyPayload::Empty
            }
            Request::CloseDir { handle } => {
                volume.closedir(*handle)?;
                ReplyPayload::Empty
            }
            Request::StatFs => ReplyPayload::Stats {
                stats: volume.statfs(),
            },
            Request::Unmount => {
                volume.unmount()?;
                ReplyPayload::Empty
            }
        };
        Ok(payload)
    }

    /// The buffer grows one chunk at a time, so an oversized `length` costs
    /// no more memory than the file can fill.
    fn read_chunked(&self, handle: HandleId, position: u64, length: usize) -> FsResult<Vec<u8>> {
        let mut data = Vec::new();
        while data.len() < length {
            let done = data.len();
            let at = position
                .checked_add(done as u64)
                .ok_or(FsError::InvalidArgument)?;
            let wanted = CHUNK_SIZE.min(length - done);
            data.resize(done + wanted, 0);
            let n = match self.volume.read(handle, at, &mut data[done..]) {
                Ok(n) => n,
                Err(FsError::RangeBeyondEnd) if done > 0 => 0,
                Err(err) => return Err(err),
            };
            data.truncate(done + n);
            if n < wanted {
                break;
            }
        }
        Ok(data)
    }

    /// Bytes written so far are reported even when a later chunk fails.
    fn write_chunked(&self, handle: HandleId, position: u64, data: &[u8]) -> FsResult<usize> {
        let mut done = 0usize;
        for chunk in data.chunks(CHUNK_SIZE) {
            let at = position
                .checked_add(done as u64)
                .ok_or(FsError::InvalidArgument)?;
            let n = match self.volume.write(handle, at, chunk) {
                Ok(n) => n,
                Err(err) if done == 0 => return Err(err),
                Err(err) => {
                    debug!(target: "vdrive::adapter", %handle, done, error = %err, "short write");
                    break;
                }
            };
            done += n;
            if n < chunk.len() {
                break;
            }
        }
        Ok(done)
    }
}

/// Hex encoding for byte payloads in JSON requests and replies.
mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        hex::decode(text).map_err(serde::de::Error::custom)
    }
}
