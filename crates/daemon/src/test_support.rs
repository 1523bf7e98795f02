// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: builders, mocks, and assertion helpers.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::{json, Value};

use crate::agent::{Agent, AgentCatalog, AgentConstructor};
use crate::config::{PluginConf, Settings};
use crate::connector::Connector;
use crate::message::{Filter, Request};
use crate::topic::Topics;

/// Shared secret used by [`test_settings`].
pub const TEST_PSK: &str = "s3cr3t";

/// Settings for an in-process daemon: memory connector, psk security,
/// identity `node1`, default topics.
pub fn test_settings(libdir: &Path) -> Settings {
    let mut plugin = PluginConf::new(BTreeMap::new());
    plugin.insert("psk", TEST_PSK);
    Settings {
        identity: "node1".to_owned(),
        connector: "memory".to_owned(),
        security_provider: "psk".to_owned(),
        libdir: libdir.to_path_buf(),
        topics: Topics::new("mcollective", "."),
        plugin,
    }
}

/// Create `<libdir>/agent` and return it.
pub fn agent_dir(libdir: &Path) -> anyhow::Result<PathBuf> {
    let dir = libdir.join("agent");
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Write `<dir>/<name>.json`.
pub fn write_manifest(dir: &Path, name: &str, manifest: &Value) -> anyhow::Result<PathBuf> {
    let path = dir.join(format!("{name}.json"));
    std::fs::write(&path, serde_json::to_vec_pretty(manifest)?)?;
    Ok(path)
}

/// A request addressed to `agent` with the given body.
pub fn request(agent: &str, body: Value) -> Request {
    Request {
        sender_id: "client1".to_owned(),
        request_id: crate::message::new_request_id(),
        message_target: format!("mcollective.{agent}/command"),
        message_time: crate::message::epoch_secs(),
        filter: Filter::new(),
        body,
    }
}

/// Scripted agent: optionally sleeps, then replies with a fixed payload,
/// no reply, or an error.
pub struct MockAgent {
    delay: Duration,
    timeout: Duration,
    help: String,
    outcome: MockOutcome,
    calls: Arc<AtomicU32>,
}

#[derive(Debug, Clone)]
pub enum MockOutcome {
    Reply(Value),
    NoReply,
    Fail(String),
    Panic(String),
}

impl Default for MockAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAgent {
    pub fn new() -> Self {
        Self {
            delay: Duration::ZERO,
            timeout: crate::agent::DEFAULT_TIMEOUT,
            help: "mock agent".to_owned(),
            outcome: MockOutcome::Reply(json!("ok")),
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn delay(mut self, d: Duration) -> Self {
        self.delay = d;
        self
    }

    pub fn with_timeout(mut self, d: Duration) -> Self {
        self.timeout = d;
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = help.into();
        self
    }

    pub fn outcome(mut self, outcome: MockOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    /// Call counter. Take it before the agent is moved into a registry.
    pub fn calls(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.calls)
    }
}

impl Agent for MockAgent {
    fn help(&self) -> String {
        self.help.clone()
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn handle<'a>(
        &'a self,
        _request: &'a Request,
        _connector: &'a Arc<dyn Connector>,
    ) -> BoxFuture<'a, anyhow::Result<Option<Value>>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match self.outcome {
                MockOutcome::Reply(ref v) => Ok(Some(v.clone())),
                MockOutcome::NoReply => Ok(None),
                MockOutcome::Fail(ref msg) => anyhow::bail!("{msg}"),
                #[allow(clippy::panic)]
                MockOutcome::Panic(ref msg) => panic!("{msg}"),
            }
        })
    }
}

/// Catalog constructor building a fresh agent from `make` on every load.
pub fn constructor<F>(make: F) -> AgentConstructor
where
    F: Fn() -> MockAgent + Send + Sync + 'static,
{
    Arc::new(move || Arc::new(make()) as Arc<dyn Agent>)
}

/// Catalog constructor whose instances reply with their load generation
/// (1 for the first load, 2 for the second, ...).
pub fn generational(delay: Duration) -> (AgentConstructor, Arc<AtomicU32>) {
    let generation = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&generation);
    let ctor: AgentConstructor = Arc::new(move || {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        Arc::new(MockAgent::new().delay(delay).outcome(MockOutcome::Reply(json!({ "generation": n }))))
            as Arc<dyn Agent>
    });
    (ctor, generation)
}

/// Built-in catalog extended with `entries`.
pub fn catalog(entries: Vec<(&str, AgentConstructor)>) -> AgentCatalog {
    let mut catalog = AgentCatalog::with_builtins();
    for (name, ctor) in entries {
        catalog.register(name, ctor);
    }
    catalog
}

/// A throwaway `nats-server` on a free local port, killed on drop.
pub struct NatsServer {
    child: std::process::Child,
    port: u16,
}

impl NatsServer {
    /// Start a server, or `None` when `nats-server` is not on `$PATH` or
    /// does not come up within a few seconds.
    pub fn start() -> Option<Self> {
        let port = std::net::TcpListener::bind("127.0.0.1:0").ok()?.local_addr().ok()?.port();
        let child = std::process::Command::new("nats-server")
            .args(["-a", "127.0.0.1", "-p", &port.to_string()])
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .ok()?;
        let server = Self { child, port };

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while std::time::Instant::now() < deadline {
            if std::net::TcpStream::connect(("127.0.0.1", port)).is_ok() {
                return Some(server);
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        None
    }

    pub fn url(&self) -> String {
        format!("nats://127.0.0.1:{}", self.port)
    }

    /// Plugin settings pointing the NATS connector at this server.
    pub fn plugin_conf(&self) -> PluginConf {
        let mut conf = PluginConf::default();
        conf.insert("nats.host", "127.0.0.1");
        conf.insert("nats.port", self.port.to_string());
        conf
    }
}

impl Drop for NatsServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Assert that an expression evaluates to `Err` whose Display output
/// contains the given substring.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = err.to_string();
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}
