// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire envelopes and their decoded forms.
//!
//! Envelopes are JSON objects whose `body` field is itself a JSON-encoded
//! string. The `hash` covers those body bytes exactly as transmitted, so
//! decoding is always two-stage: parse the envelope, authenticate the raw
//! body string, then parse the body.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Filter kind (`identity`, `agent`, `fact`, ...) to its criteria.
pub type Filter = BTreeMap<String, Vec<String>>;

/// A message as handed over by a connector: destination plus raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub topic: String,
    pub payload: Bytes,
}

impl RawMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self { topic: topic.into(), payload: payload.into() }
    }
}

/// Request envelope as it travels on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub sender_id: String,
    pub request_id: String,
    pub message_target: String,
    pub message_time: u64,
    pub hash: String,
    #[serde(default)]
    pub filter: Filter,
    pub body: String,
}

/// Reply envelope as it travels on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    pub sender_id: String,
    pub request_id: String,
    pub sender_agent: String,
    pub message_target: String,
    pub message_time: u64,
    pub hash: String,
    pub body: String,
}

/// An authenticated request with its body decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub sender_id: String,
    pub request_id: String,
    pub message_target: String,
    pub message_time: u64,
    pub filter: Filter,
    pub body: Value,
}

impl Request {
    /// The body as plain text, for control commands and raw agents.
    pub fn body_str(&self) -> Option<&str> {
        self.body.as_str()
    }
}

/// An authenticated reply with its body decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub sender_id: String,
    pub request_id: String,
    pub sender_agent: String,
    pub message_target: String,
    pub message_time: u64,
    pub body: Value,
}

/// Current time as whole epoch seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Fresh correlation token for a new logical request.
pub fn new_request_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
