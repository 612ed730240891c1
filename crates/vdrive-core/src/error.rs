// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for the volume engine

use std::io;

/// Core volume error type
#[derive(thiserror::Error, Debug)]
pub enum FsError {
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    AlreadyExists,
    #[error("not a directory")]
    NotADirectory,
    #[error("is a directory")]
    IsADirectory,
    #[error("name not allowed")]
    InvalidName,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("stale or unknown handle")]
    InvalidHandle,
    #[error("directory not empty")]
    DirectoryNotEmpty,
    #[error("range beyond end of file")]
    RangeBeyondEnd,
    #[error("unsupported")]
    Unsupported,
    #[error("no space left")]
    NoSpace,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("cache engine: {0}")]
    Cache(String),
}

impl FsError {
    /// Collapse a cache-engine failure into the I/O kind reported to drivers.
    ///
    /// `NoSpace` and `Io` already carry a precise meaning and pass through.
    pub fn into_io(self) -> FsError {
        match self {
            FsError::Io(_) | FsError::NoSpace => self,
            other => FsError::Io(io::Error::new(io::ErrorKind::Other, other.to_string())),
        }
    }
}

pub type FsResult<T> = Result<T, FsError>;
