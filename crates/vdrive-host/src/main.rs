// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! vdrive replay host
//!
//! Stands in for an embedding driver: builds one volume from a JSON
//! configuration, feeds it a script of driver requests and prints every
//! reply as a JSON line on stdout.

use anyhow::Result;
use clap::Parser;
use serde::Serialize;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vdrive_core::Volume;
use vdrive_host::{load_config, load_script, Adapter, ErrorFlavor, Reply};

#[derive(Parser)]
#[command(name = "vdrive-replay", version, about = "Replay driver requests against a virtual drive")]
struct Args {
    /// Request script (JSON array)
    script: PathBuf,

    /// Volume configuration file (JSON)
    #[arg(short, long, env = "VDRIVE_CONFIG")]
    config: Option<PathBuf>,

    /// Error code space used in replies
    #[arg(long, value_enum, default_value_t = ErrorFlavor::Posix)]
    flavor: ErrorFlavor,

    /// Stop at the first request that fails
    #[arg(long)]
    stop_on_error: bool,
}

#[derive(Serialize)]
struct ReplyLine<'a> {
    index: usize,
    op: &'static str,
    #[serde(flatten)]
    reply: &'a Reply,
}

fn main() -> Result<()> {
    // Replies own stdout
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;
    let requests = load_script(&args.script)?;
    info!(
        script = %args.script.display(),
        requests = requests.len(),
        flavor = ?args.flavor,
        "starting replay"
    );

    let volume = Arc::new(Volume::new(config)?);
    let adapter = Adapter::new(Arc::clone(&volume), args.flavor);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut failures = 0usize;
    for (index, request) in requests.into_iter().enumerate() {
        let op = request.name();
        let reply = adapter.dispatch(request);
        serde_json::to_writer(&mut out, &ReplyLine { index, op, reply: &reply })?;
        writeln!(out)?;
        if !reply.is_success() {
            failures += 1;
            if args.stop_on_error {
                warn!(index, op, code = reply.code, "stopping at failed request");
                break;
            }
        }
    }
    out.flush()?;

    if let Err(err) = volume.unmount() {
        warn!(error = %err, "unmount reported an error");
    }
    info!(failures, "replay finished");
    Ok(())
}
