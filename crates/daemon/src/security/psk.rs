// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pre-shared key authentication.
//!
//! The hash is the lowercase hex SHA-256 of the serialized body followed
//! by the secret. The secret is read on every call from `MCOLLECTIVE_PSK`,
//! falling back to `plugin.psk`.

use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::{constant_time_eq, SecurityContext, SecurityCounts, SecurityProvider, SecurityStats};
use crate::config::PluginConf;
use crate::error::Error;
use crate::filter::FilterPredicate;
use crate::message::{
    epoch_secs, Filter, RawMessage, Reply, ReplyEnvelope, Request, RequestEnvelope,
};

pub const PSK_ENV: &str = "MCOLLECTIVE_PSK";
pub const PSK_KEY: &str = "psk";

pub struct Psk {
    identity: String,
    plugin: PluginConf,
    filter: Arc<dyn FilterPredicate>,
    stats: SecurityStats,
}

impl Psk {
    pub fn new(ctx: SecurityContext) -> Self {
        Self {
            identity: ctx.identity,
            plugin: ctx.plugin,
            filter: ctx.filter,
            stats: SecurityStats::default(),
        }
    }

    fn secret(&self) -> Result<String, Error> {
        self.plugin.require(PSK_ENV, PSK_KEY)
    }

    /// Digest of `body` under the current secret.
    pub fn make_hash(&self, body: &str) -> Result<String, Error> {
        let secret = self.secret()?;
        let mut hasher = Sha256::new();
        hasher.update(body.as_bytes());
        hasher.update(secret.as_bytes());
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Check `hash` against the body bytes exactly as received.
    fn validate(&self, body: &str, hash: &str) -> Result<(), Error> {
        let expected = self.make_hash(body)?;
        if constant_time_eq(&expected, hash) {
            self.stats.record_validated();
            Ok(())
        } else {
            self.stats.record_unvalidated();
            Err(Error::Authentication)
        }
    }

    fn serialize_body(payload: &Value) -> Result<String, Error> {
        serde_json::to_string(payload).map_err(|e| Error::Malformed(e.to_string()))
    }
}

impl SecurityProvider for Psk {
    fn decode_request(&self, raw: &RawMessage) -> Result<Request, Error> {
        let envelope: RequestEnvelope = serde_json::from_slice(&raw.payload)
            .map_err(|e| Error::Malformed(format!("request envelope: {e}")))?;

        if let Err(e) = self.validate(&envelope.body, &envelope.hash) {
            warn!(
                request_id = %envelope.request_id,
                sender = %envelope.sender_id,
                code = e.as_str(),
                "rejecting request"
            );
            return Err(e);
        }

        let body: Value = serde_json::from_str(&envelope.body)
            .map_err(|e| Error::Malformed(format!("request body: {e}")))?;

        Ok(Request {
            sender_id: envelope.sender_id,
            request_id: envelope.request_id,
            message_target: envelope.message_target,
            message_time: envelope.message_time,
            filter: envelope.filter,
            body,
        })
    }

    fn decode_reply(&self, raw: &RawMessage) -> Result<Reply, Error> {
        let envelope: ReplyEnvelope = serde_json::from_slice(&raw.payload)
            .map_err(|e| Error::Malformed(format!("reply envelope: {e}")))?;

        self.validate(&envelope.body, &envelope.hash)?;

        let body: Value = serde_json::from_str(&envelope.body)
            .map_err(|e| Error::Malformed(format!("reply body: {e}")))?;

        Ok(Reply {
            sender_id: envelope.sender_id,
            request_id: envelope.request_id,
            sender_agent: envelope.sender_agent,
            message_target: envelope.message_target,
            message_time: envelope.message_time,
            body,
        })
    }

    fn encode_reply(
        &self,
        sender_agent: &str,
        target: &str,
        payload: &Value,
        request_id: &str,
    ) -> Result<Bytes, Error> {
        let body = Self::serialize_body(payload)?;
        let hash = self.make_hash(&body)?;
        debug!(request_id, hash = %hash, "encoded reply");

        let envelope = ReplyEnvelope {
            sender_id: self.identity.clone(),
            request_id: request_id.to_owned(),
            sender_agent: sender_agent.to_owned(),
            message_target: target.to_owned(),
            message_time: epoch_secs(),
            hash,
            body,
        };
        serde_json::to_vec(&envelope).map(Bytes::from).map_err(|e| Error::Malformed(e.to_string()))
    }

    fn encode_request(
        &self,
        sender_id: &str,
        target: &str,
        payload: &Value,
        request_id: &str,
        filter: &Filter,
    ) -> Result<Bytes, Error> {
        let body = Self::serialize_body(payload)?;
        let hash = self.make_hash(&body)?;
        debug!(request_id, target, "encoded request");

        let envelope = RequestEnvelope {
            sender_id: sender_id.to_owned(),
            request_id: request_id.to_owned(),
            message_target: target.to_owned(),
            message_time: epoch_secs(),
            hash,
            filter: filter.clone(),
            body,
        };
        serde_json::to_vec(&envelope).map(Bytes::from).map_err(|e| Error::Malformed(e.to_string()))
    }

    fn validate_filter(&self, filter: &Filter) -> bool {
        self.stats.check_filter(self.filter.as_ref(), filter)
    }

    fn stats(&self) -> SecurityCounts {
        self.stats.snapshot()
    }
}

#[cfg(test)]
#[path = "psk_tests.rs"]
mod tests;
