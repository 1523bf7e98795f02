// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The live agent set: loading, reloading and dispatch.
//!
//! Handlers live in the [`PluginRegistry`] under `<name>_agent`; this type
//! tracks which agents are loaded and which command topics are subscribed.
//!
//! Locking: reloads are serialized by an async mutex held across connector
//! calls. The live map sits behind a synchronous `RwLock` so dispatch lookups
//! never wait on a reload in progress. A reload swaps the registry entry in a
//! single insert, so a dispatch sees either the old handler or the new one.
//! A dispatch already running keeps its `Arc` to the old handler and
//! finishes against it.

use std::any::Any;
use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::FutureExt;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{dedent, Agent, AgentCatalog, AgentManifest};
use crate::connector::Connector;
use crate::error::Error;
use crate::filter::AgentPresence;
use crate::message::Request;
use crate::plugin::{agent_key, Plugin, PluginRegistry};
use crate::topic::Topics;

/// How a dispatch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The handler produced a payload and the reply callback ran.
    Replied,
    /// The handler chose not to answer.
    NoReply,
    /// The handler exceeded its bound and was abandoned.
    TimedOut,
    /// The handler returned an error or panicked.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRecord {
    pub manifest: PathBuf,
    pub command_topic: String,
}

pub struct Agents {
    agent_dir: PathBuf,
    topics: Topics,
    plugins: Arc<PluginRegistry>,
    connector: Arc<dyn Connector>,
    catalog: AgentCatalog,
    live: RwLock<BTreeMap<String, AgentRecord>>,
    reload: tokio::sync::Mutex<()>,
    in_flight: Arc<AtomicUsize>,
}

impl Agents {
    pub fn new(
        agent_dir: impl Into<PathBuf>,
        topics: Topics,
        plugins: Arc<PluginRegistry>,
        connector: Arc<dyn Connector>,
        catalog: AgentCatalog,
    ) -> Self {
        Self {
            agent_dir: agent_dir.into(),
            topics,
            plugins,
            connector,
            catalog,
            live: RwLock::new(BTreeMap::new()),
            reload: tokio::sync::Mutex::new(()),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn agent_dir(&self) -> &Path {
        &self.agent_dir
    }

    /// Unload every agent and load all manifests in the agent directory.
    ///
    /// A missing directory fails before anything is unloaded. Agents that
    /// fail to load are logged and skipped.
    pub async fn load_all(&self) -> Result<(), Error> {
        let _reload = self.reload.lock().await;
        debug!(dir = %self.agent_dir.display(), "reloading all agents");

        if !self.agent_dir.is_dir() {
            return Err(Error::DirectoryNotFound(self.agent_dir.clone()));
        }
        let names = self.discover()?;

        let old = std::mem::take(&mut *self.live.write());
        for (name, record) in &old {
            if let Err(e) = self.connector.unsubscribe(&record.command_topic).await {
                warn!(agent = %name, err = %format!("{e:#}"), "unsubscribe failed");
            }
            self.plugins.unregister(&agent_key(name));
        }

        for name in names {
            match self.load_locked(&name).await {
                Ok(true) => {}
                Ok(false) => debug!(agent = %name, "manifest vanished during reload"),
                Err(e) => error!(agent = %name, code = e.as_str(), "failed to load agent: {e}"),
            }
        }
        info!(agents = ?self.agent_names(), "agents loaded");
        Ok(())
    }

    /// Load or replace a single agent. `Ok(false)` when no manifest exists.
    pub async fn load_one(&self, name: &str) -> Result<bool, Error> {
        let _reload = self.reload.lock().await;
        self.load_locked(name).await
    }

    async fn load_locked(&self, name: &str) -> Result<bool, Error> {
        if !valid_name(name) {
            warn!(agent = name, "refusing to load agent with invalid name");
            return Ok(false);
        }
        let path = self.agent_dir.join(format!("{name}.json"));
        if !path.is_file() {
            debug!(agent = name, path = %path.display(), "no manifest for agent");
            return Ok(false);
        }

        let manifest = AgentManifest::load(&path)?;
        let agent = manifest.build(name, &path, &self.catalog)?;

        let key = agent_key(name);
        self.plugins.register_instance(&key, Plugin::Agent(agent));

        let command_topic = self.topics.command(name);
        let subscribed = self.live.read().contains_key(name);
        if !subscribed {
            if let Err(e) = self.connector.subscribe(&command_topic).await {
                self.plugins.unregister(&key);
                return Err(Error::Transport(format!("subscribing {command_topic}: {e:#}")));
            }
        }

        self.live.write().insert(name.to_owned(), AgentRecord { manifest: path, command_topic });
        debug!(agent = name, resubscribed = !subscribed, "agent loaded");
        Ok(true)
    }

    /// Enumerate `*.json` manifests, sorted by agent name.
    fn discover(&self) -> Result<Vec<String>, Error> {
        let entries = std::fs::read_dir(&self.agent_dir)
            .map_err(|_| Error::DirectoryNotFound(self.agent_dir.clone()))?;
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|path| path.file_stem().and_then(|s| s.to_str()).map(str::to_owned))
            .collect();
        names.sort();
        Ok(names)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.live.read().contains_key(name)
    }

    /// Loaded agent names, sorted.
    pub fn agent_names(&self) -> Vec<String> {
        self.live.read().keys().cloned().collect()
    }

    pub fn record(&self, name: &str) -> Option<AgentRecord> {
        self.live.read().get(name).cloned()
    }

    /// Command topics of every loaded agent.
    pub fn command_topics(&self) -> Vec<String> {
        self.live.read().values().map(|r| r.command_topic.clone()).collect()
    }

    fn handler(&self, name: &str) -> Result<Arc<dyn Agent>, Error> {
        if !self.contains(name) {
            return Err(Error::UnknownAgent(name.to_owned()));
        }
        self.plugins.agent(&agent_key(name)).map_err(|_| Error::UnknownAgent(name.to_owned()))
    }

    /// Help text for `name` with its common indentation removed.
    pub fn help(&self, name: &str) -> Result<String, Error> {
        Ok(dedent(&self.handler(name)?.help()))
    }

    /// Number of dispatches currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Run `target`'s handler on its own task, bounded by the agent's
    /// timeout. `on_reply` is awaited inside the task when the handler
    /// returns a payload in time; it never runs on timeout, failure, panic
    /// or no-reply. A `null` payload counts as no reply.
    pub fn dispatch<F, Fut>(
        &self,
        request: Request,
        target: &str,
        on_reply: F,
    ) -> Result<JoinHandle<DispatchOutcome>, Error>
    where
        F: FnOnce(Value) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let agent = self.handler(target)?;
        let bound = agent.timeout();
        let connector = Arc::clone(&self.connector);
        let target = target.to_owned();
        let guard = InFlight::enter(&self.in_flight);
        debug!(agent = %target, request_id = %request.request_id, "dispatching");

        Ok(tokio::spawn(async move {
            let _guard = guard;
            let handled = AssertUnwindSafe(agent.handle(&request, &connector)).catch_unwind();
            match tokio::time::timeout(bound, handled).await {
                Err(_) => {
                    let err = Error::Timeout { agent: target, secs: bound.as_secs_f64() };
                    warn!(request_id = %request.request_id, code = err.as_str(), "{err}");
                    DispatchOutcome::TimedOut
                }
                Ok(Err(payload)) => {
                    error!(
                        agent = %target,
                        request_id = %request.request_id,
                        err = %panic_message(&*payload),
                        "agent panicked"
                    );
                    DispatchOutcome::Failed
                }
                Ok(Ok(Err(e))) => {
                    error!(
                        agent = %target,
                        request_id = %request.request_id,
                        err = %format!("{e:#}"),
                        "agent execution failed"
                    );
                    DispatchOutcome::Failed
                }
                Ok(Ok(Ok(None | Some(Value::Null)))) => {
                    debug!(agent = %target, request_id = %request.request_id, "no reply");
                    DispatchOutcome::NoReply
                }
                Ok(Ok(Ok(Some(reply)))) => {
                    on_reply(reply).await;
                    DispatchOutcome::Replied
                }
            }
        }))
    }
}

impl AgentPresence for Agents {
    fn agent_names(&self) -> Vec<String> {
        Agents::agent_names(self)
    }
}

/// Counts a dispatch from spawn until its task ends, including on panic.
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
