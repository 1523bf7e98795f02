// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent handlers and the catalog of in-process implementations.

pub mod builtin;
pub mod manifest;
pub mod process;
pub mod registry;
pub mod rpc;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::connector::Connector;
use crate::message::Request;

pub use manifest::AgentManifest;
pub use process::ProcessAgent;
pub use registry::{Agents, DispatchOutcome};
pub use rpc::{RpcAgent, RpcError, RpcReply, RpcRequest};

/// Bound applied to agents that do not declare their own.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Descriptive metadata an agent publishes about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentMeta {
    pub license: String,
    pub author: String,
    pub version: String,
    pub url: String,
}

impl Default for AgentMeta {
    fn default() -> Self {
        let unknown = || "Unknown".to_owned();
        Self { license: unknown(), author: unknown(), version: unknown(), url: unknown() }
    }
}

/// A named request handler.
///
/// `handle` returns the reply payload, or `None` when the agent chooses
/// not to answer. Object-safe for use as `Arc<dyn Agent>`.
pub trait Agent: Send + Sync + 'static {
    fn help(&self) -> String;

    fn timeout(&self) -> Duration {
        DEFAULT_TIMEOUT
    }

    fn meta(&self) -> AgentMeta {
        AgentMeta::default()
    }

    fn handle<'a>(
        &'a self,
        request: &'a Request,
        connector: &'a Arc<dyn Connector>,
    ) -> BoxFuture<'a, anyhow::Result<Option<Value>>>;
}

/// Builds a fresh agent instance.
pub type AgentConstructor = Arc<dyn Fn() -> Arc<dyn Agent> + Send + Sync>;

/// In-process agent implementations, selectable from a manifest by name.
#[derive(Clone, Default)]
pub struct AgentCatalog {
    entries: BTreeMap<String, AgentConstructor>,
}

impl AgentCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with `discovery` and `echo`.
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        catalog.register("discovery", Arc::new(|| Arc::new(builtin::Discovery) as Arc<dyn Agent>));
        catalog.register("echo", Arc::new(|| Arc::new(builtin::echo()) as Arc<dyn Agent>));
        catalog
    }

    pub fn register(&mut self, name: impl Into<String>, constructor: AgentConstructor) {
        self.entries.insert(name.into(), constructor);
    }

    pub fn get(&self, name: &str) -> Option<AgentConstructor> {
        self.entries.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }
}

impl fmt::Debug for AgentCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentCatalog").field("entries", &self.names()).finish()
    }
}

/// Wraps an agent with manifest-level overrides.
pub(crate) struct Configured {
    pub(crate) inner: Arc<dyn Agent>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) help: Option<String>,
    pub(crate) meta: Option<AgentMeta>,
}

impl Agent for Configured {
    fn help(&self) -> String {
        match self.help {
            Some(ref help) => help.clone(),
            None => self.inner.help(),
        }
    }

    fn timeout(&self) -> Duration {
        self.timeout.unwrap_or_else(|| self.inner.timeout())
    }

    fn meta(&self) -> AgentMeta {
        match self.meta {
            Some(ref meta) => meta.clone(),
            None => self.inner.meta(),
        }
    }

    fn handle<'a>(
        &'a self,
        request: &'a Request,
        connector: &'a Arc<dyn Connector>,
    ) -> BoxFuture<'a, anyhow::Result<Option<Value>>> {
        self.inner.handle(request, connector)
    }
}

/// Strip the first non-blank line's leading whitespace from every line
/// that starts with it. Leading blank lines are dropped.
pub fn dedent(text: &str) -> String {
    let lines: Vec<&str> = text.lines().skip_while(|l| l.trim().is_empty()).collect();
    let Some(first) = lines.first() else {
        return String::new();
    };
    let indent = &first[..first.len() - first.trim_start().len()];
    lines
        .iter()
        .map(|line| line.strip_prefix(indent).unwrap_or(line))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
