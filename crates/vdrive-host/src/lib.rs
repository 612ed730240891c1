// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Driver-facing side of a vdrive volume

pub mod adapter;
pub mod script;

pub use adapter::{
    posix_code, win32, win32_code, Adapter, ErrorFlavor, FileRef, Reply, ReplyPayload, Request,
    CHUNK_SIZE,
};
pub use script::{load_config, load_script, parse_script};
