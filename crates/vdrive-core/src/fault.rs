// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Fault injection for the reference cache engine

use crate::FsError;
use libc::EIO;
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::Mutex;

/// Cache-engine operations that can be made to fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultOp {
    Open,
    Close,
    Read,
    Write,
    SetSize,
    Delete,
    ChangeId,
}

/// Error flavour produced by a firing rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultErrno {
    Eio,
    Enospc,
}

impl FaultErrno {
    fn to_error(self) -> FsError {
        match self {
            FaultErrno::Eio => FsError::Io(io::Error::from_raw_os_error(EIO)),
            FaultErrno::Enospc => FsError::NoSpace,
        }
    }
}

/// One rule: which operation fails, how, and how often.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultRule {
    pub op: FaultOp,
    #[serde(default = "default_errno")]
    pub errno: FaultErrno,
    /// Calls to let through before the rule starts firing.
    #[serde(default)]
    pub start_after: u64,
    /// Upper bound on failures produced by this rule.
    #[serde(default)]
    pub max_faults: Option<u64>,
}

fn default_errno() -> FaultErrno {
    FaultErrno::Eio
}

/// JSON-loadable fault policy, usually part of the volume configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FaultPolicy {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub rules: Vec<FaultRule>,
}

impl FaultPolicy {
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn is_active(&self) -> bool {
        self.enabled && !self.rules.is_empty()
    }
}

#[derive(Clone, Debug, Default)]
struct RuleCounters {
    hits: u64,
    invocations: u64,
}

#[derive(Debug, Default)]
struct FaultState {
    policy: FaultPolicy,
    counters: Vec<RuleCounters>,
}

/// Runtime controller holding the active policy and per-rule counters.
#[derive(Debug, Default)]
pub struct FaultInjector {
    state: Mutex<FaultState>,
}

impl FaultInjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: FaultPolicy) -> Self {
        let injector = Self::new();
        injector.set_policy(policy);
        injector
    }

    pub fn set_policy(&self, policy: FaultPolicy) {
        let mut guard = self.state.lock().unwrap();
        guard.counters = vec![RuleCounters::default(); policy.rules.len()];
        guard.policy = policy;
    }

    pub fn clear(&self) {
        self.set_policy(FaultPolicy::default());
    }

    /// Total faults injected so far for `op`.
    pub fn hits(&self, op: FaultOp) -> u64 {
        let guard = self.state.lock().unwrap();
        guard
            .policy
            .rules
            .iter()
            .zip(guard.counters.iter())
            .filter(|(rule, _)| rule.op == op)
            .map(|(_, c)| c.hits)
            .sum()
    }

    /// Fails with the first matching rule that is due to fire.
    pub fn check(&self, op: FaultOp) -> Result<(), FsError> {
        let mut guard = self.state.lock().unwrap();
        if !guard.policy.enabled {
            return Ok(());
        }
        let FaultState { policy, counters } = &mut *guard;
        for (rule, counter) in policy.rules.iter().zip(counters.iter_mut()) {
            if rule.op != op {
                continue;
            }
            counter.invocations = counter.invocations.saturating_add(1);
            if counter.invocations <= rule.start_after {
                continue;
            }
            if matches!(rule.max_faults, Some(max) if counter.hits >= max) {
                continue;
            }
            counter.hits = counter.hits.saturating_add(1);
            tracing::debug!(target: "vdrive::fault", ?op, hits = counter.hits, "injecting fault");
            return Err(rule.errno.to_error());
        }
        Ok(())
    }
}
