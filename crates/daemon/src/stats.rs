// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon counters and the `stats` control reply.

use std::sync::atomic::{AtomicU64, Ordering};

use nix::sys::resource::{getrusage, UsageWho};
use nix::sys::time::TimeVal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::message::epoch_secs;
use crate::security::SecurityCounts;

/// Loop-level counters. Security counters live in the provider.
#[derive(Debug)]
pub struct DaemonStats {
    start_time: u64,
    total: AtomicU64,
    replies: AtomicU64,
}

impl Default for DaemonStats {
    fn default() -> Self {
        Self::new()
    }
}

impl DaemonStats {
    pub fn new() -> Self {
        Self { start_time: epoch_secs(), total: AtomicU64::new(0), replies: AtomicU64::new(0) }
    }

    pub fn start_time(&self) -> u64 {
        self.start_time
    }

    pub fn record_received(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reply(&self) {
        self.replies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn replies(&self) -> u64 {
        self.replies.load(Ordering::Relaxed)
    }

    pub fn counters(&self, security: SecurityCounts) -> Counters {
        Counters {
            start_time: self.start_time,
            validated: security.validated,
            unvalidated: security.unvalidated,
            filtered: security.filtered,
            passed: security.passed,
            total: self.total(),
            replies: self.replies(),
        }
    }

    /// Full status report for the `stats` control command.
    pub fn snapshot(
        &self,
        security: SecurityCounts,
        in_flight: usize,
        agents: Vec<String>,
    ) -> StatusSnapshot {
        StatusSnapshot {
            stats: self.counters(security),
            pid: std::process::id(),
            times: CpuTimes::current(),
            in_flight,
            agents,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub start_time: u64,
    pub validated: u64,
    pub unvalidated: u64,
    pub filtered: u64,
    pub passed: u64,
    pub total: u64,
    pub replies: u64,
}

/// Process CPU accounting in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuTimes {
    pub utime: f64,
    pub stime: f64,
    pub cutime: f64,
    pub cstime: f64,
}

impl CpuTimes {
    /// Read from `getrusage`; zeros if unavailable.
    pub fn current() -> Self {
        let mut times = Self::default();
        match getrusage(UsageWho::RUSAGE_SELF) {
            Ok(usage) => {
                times.utime = seconds(usage.user_time());
                times.stime = seconds(usage.system_time());
            }
            Err(e) => debug!("getrusage(self) failed: {e}"),
        }
        match getrusage(UsageWho::RUSAGE_CHILDREN) {
            Ok(usage) => {
                times.cutime = seconds(usage.user_time());
                times.cstime = seconds(usage.system_time());
            }
            Err(e) => debug!("getrusage(children) failed: {e}"),
        }
        times
    }
}

fn seconds(tv: TimeVal) -> f64 {
    tv.tv_sec() as f64 + tv.tv_usec() as f64 / 1_000_000.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub stats: Counters,
    pub pid: u32,
    pub times: CpuTimes,
    /// Dispatches still running.
    pub in_flight: usize,
    pub agents: Vec<String>,
}

#[cfg(test)]
#[path = "stats_tests.rs"]
mod tests;
