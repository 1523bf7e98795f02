// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authenticated message envelopes.

pub mod psk;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::PluginConf;
use crate::error::Error;
use crate::filter::FilterPredicate;
use crate::message::{Filter, RawMessage, Reply, Request};

pub use psk::Psk;

/// Encodes and authenticates request/reply envelopes.
///
/// Implementations count every authentication and filter decision in
/// [`SecurityStats`].
pub trait SecurityProvider: Send + Sync + 'static {
    /// Parse the envelope, authenticate its body and decode the body.
    fn decode_request(&self, raw: &RawMessage) -> Result<Request, Error>;

    /// Client-side counterpart of [`decode_request`](Self::decode_request).
    fn decode_reply(&self, raw: &RawMessage) -> Result<Reply, Error>;

    fn encode_reply(
        &self,
        sender_agent: &str,
        target: &str,
        payload: &Value,
        request_id: &str,
    ) -> Result<Bytes, Error>;

    fn encode_request(
        &self,
        sender_id: &str,
        target: &str,
        payload: &Value,
        request_id: &str,
        filter: &Filter,
    ) -> Result<Bytes, Error>;

    /// Whether this node is an intended recipient of `filter`.
    fn validate_filter(&self, filter: &Filter) -> bool;

    fn stats(&self) -> SecurityCounts;
}

/// Running authentication and filter counters.
#[derive(Debug, Default)]
pub struct SecurityStats {
    validated: AtomicU64,
    unvalidated: AtomicU64,
    passed: AtomicU64,
    filtered: AtomicU64,
}

/// Point-in-time copy of [`SecurityStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityCounts {
    pub validated: u64,
    pub unvalidated: u64,
    pub passed: u64,
    pub filtered: u64,
}

impl SecurityStats {
    pub fn record_validated(&self) {
        self.validated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unvalidated(&self) {
        self.unvalidated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_passed(&self) {
        self.passed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_filtered(&self) {
        self.filtered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SecurityCounts {
        SecurityCounts {
            validated: self.validated.load(Ordering::Relaxed),
            unvalidated: self.unvalidated.load(Ordering::Relaxed),
            passed: self.passed.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
        }
    }

    /// Run `predicate` over `filter` and count the outcome.
    pub fn check_filter(&self, predicate: &dyn FilterPredicate, filter: &Filter) -> bool {
        if predicate.matches(filter) {
            self.record_passed();
            true
        } else {
            self.record_filtered();
            false
        }
    }
}

/// Everything a provider needs at construction.
#[derive(Clone)]
pub struct SecurityContext {
    pub identity: String,
    pub plugin: PluginConf,
    pub filter: Arc<dyn FilterPredicate>,
}

/// Build the security provider named `name`.
pub fn build(name: &str, ctx: SecurityContext) -> Result<Arc<dyn SecurityProvider>, Error> {
    match name {
        "psk" => Ok(Arc::new(Psk::new(ctx))),
        other => Err(Error::Configuration(format!("unknown security provider: {other}"))),
    }
}

/// Constant-time string comparison to prevent timing side-channel attacks.
pub(crate) fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}
