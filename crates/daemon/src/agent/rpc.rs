// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Action-based request/reply convention layered over [`Agent`].
//!
//! A request body `{"agent", "action", "data"}` is routed to the handler
//! registered for `action`. Handler failures become a reply with a non-zero
//! `statuscode` instead of propagating to the dispatcher.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use super::{Agent, AgentMeta, DEFAULT_TIMEOUT};
use crate::connector::Connector;
use crate::message::Request;

/// Structured handler failure, reported to the caller in the reply.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    #[error("{0}")]
    UnknownAction(String),
    #[error("{0}")]
    MissingData(String),
    #[error("{0}")]
    InvalidData(String),
    #[error("{0}")]
    Unknown(String),
}

impl RpcError {
    pub fn code(&self) -> u32 {
        match self {
            Self::UnknownAction(_) => 2,
            Self::MissingData(_) => 3,
            Self::InvalidData(_) => 4,
            Self::Unknown(_) => 5,
        }
    }
}

/// An action call decoded from a request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub agent: String,
    pub action: String,
    pub data: Map<String, Value>,
    pub sender: String,
    pub time: u64,
    pub request_id: String,
}

impl RpcRequest {
    /// Decode `request`'s body. `agent` fills in a body without one.
    pub fn parse(agent: &str, request: &Request) -> Result<Self, RpcError> {
        let Some(body) = request.body.as_object() else {
            return Err(RpcError::InvalidData("request body is not an action call".into()));
        };
        let action = match body.get("action") {
            Some(Value::String(action)) => action.clone(),
            Some(_) => return Err(RpcError::InvalidData("action should be a string".into())),
            None => return Err(RpcError::MissingData("please supply an action".into())),
        };
        let data = match body.get("data") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(data)) => data.clone(),
            Some(_) => return Err(RpcError::InvalidData("data should be an object".into())),
        };
        let agent = body.get("agent").and_then(Value::as_str).unwrap_or(agent).to_owned();

        Ok(Self {
            agent,
            action,
            data,
            sender: request.sender_id.clone(),
            time: request.message_time,
            request_id: request.request_id.clone(),
        })
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn require(&self, key: &str) -> Result<&Value, RpcError> {
        self.data.get(key).ok_or_else(|| RpcError::MissingData(format!("please supply a {key}")))
    }

    pub fn require_str(&self, key: &str) -> Result<&str, RpcError> {
        self.require(key)?
            .as_str()
            .ok_or_else(|| RpcError::InvalidData(format!("{key} should be a String")))
    }

    /// A string value safe to splice into a shell command line.
    pub fn require_shellsafe(&self, key: &str) -> Result<&str, RpcError> {
        let value = self.require_str(key)?;
        for c in ['>', '<', '`', '|'] {
            if value.contains(c) {
                return Err(RpcError::InvalidData(format!("{key} should not have {c} in it")));
            }
        }
        Ok(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcReply {
    pub statuscode: u32,
    pub statusmsg: String,
    pub data: Value,
}

impl RpcReply {
    pub fn ok(data: Value) -> Self {
        Self { statuscode: 0, statusmsg: "OK".to_owned(), data }
    }

    pub fn fail(err: &RpcError) -> Self {
        Self { statuscode: err.code(), statusmsg: err.to_string(), data: Value::Object(Map::new()) }
    }
}

impl From<Result<Value, RpcError>> for RpcReply {
    fn from(result: Result<Value, RpcError>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(ref e) => Self::fail(e),
        }
    }
}

pub type ActionFn = Arc<dyn Fn(RpcRequest) -> BoxFuture<'static, Result<Value, RpcError>> + Send + Sync>;

/// Agent whose behaviour is a fixed table of named actions.
pub struct RpcAgent {
    name: String,
    help: String,
    timeout: Duration,
    meta: AgentMeta,
    actions: HashMap<String, ActionFn>,
}

impl RpcAgent {
    pub fn builder(name: impl Into<String>) -> RpcAgentBuilder {
        RpcAgentBuilder {
            agent: RpcAgent {
                name: name.into(),
                help: String::new(),
                timeout: DEFAULT_TIMEOUT,
                meta: AgentMeta::default(),
                actions: HashMap::new(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn actions(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Run one action call to completion.
    pub async fn call(&self, request: &Request) -> RpcReply {
        let rpc = match RpcRequest::parse(&self.name, request) {
            Ok(rpc) => rpc,
            Err(ref e) => return RpcReply::fail(e),
        };
        let Some(action) = self.actions.get(&rpc.action) else {
            return RpcReply::fail(&RpcError::UnknownAction(format!(
                "Unknown action: {}",
                rpc.action
            )));
        };
        debug!(agent = %self.name, action = %rpc.action, sender = %rpc.sender, "calling action");
        action(rpc).await.into()
    }
}

impl Agent for RpcAgent {
    fn help(&self) -> String {
        self.help.clone()
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn meta(&self) -> AgentMeta {
        self.meta.clone()
    }

    fn handle<'a>(
        &'a self,
        request: &'a Request,
        _connector: &'a Arc<dyn Connector>,
    ) -> BoxFuture<'a, anyhow::Result<Option<Value>>> {
        Box::pin(async move {
            let reply = self.call(request).await;
            Ok(Some(serde_json::to_value(reply)?))
        })
    }
}

pub struct RpcAgentBuilder {
    agent: RpcAgent,
}

impl RpcAgentBuilder {
    pub fn help(mut self, help: impl Into<String>) -> Self {
        self.agent.help = help.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.agent.timeout = timeout;
        self
    }

    pub fn meta(mut self, meta: AgentMeta) -> Self {
        self.agent.meta = meta;
        self
    }

    /// Register `handler` for `name`, replacing any previous one.
    pub fn action<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(RpcRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RpcError>> + Send + 'static,
    {
        let action: ActionFn = Arc::new(move |req| handler(req).boxed());
        self.agent.actions.insert(name.into(), action);
        self
    }

    pub fn build(self) -> RpcAgent {
        self.agent
    }
}

#[cfg(test)]
#[path = "rpc_tests.rs"]
mod tests;
