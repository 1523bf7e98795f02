// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The daemon control loop.
//!
//! One task receives, authenticates, filters and routes every message in
//! order. Control commands run inline on that task; agent requests are
//! handed to [`Agents::dispatch`] and never block intake.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::agent::{AgentCatalog, Agents};
use crate::config::Settings;
use crate::connector::{self, Connector};
use crate::error::Error;
use crate::filter::{AgentPresence, LocalFilter};
use crate::message::{RawMessage, Request};
use crate::plugin::{Plugin, PluginRegistry, CONNECTOR_KEY, SECURITY_KEY};
use crate::security::{self, SecurityContext, SecurityProvider};
use crate::stats::{DaemonStats, StatusSnapshot};
use crate::topic::CONTROL_AGENT;

/// Pause after a failed receive before trying again.
const RECEIVE_BACKOFF: Duration = Duration::from_millis(100);

/// Why [`Runner::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// An `exit` control command was received.
    ControlExit,
    /// The shutdown token was cancelled (SIGINT/SIGTERM).
    Interrupted,
}

/// A control-topic request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Help(String),
    Stats,
    ReloadAgent(String),
    ReloadAgents,
    Exit,
    Unknown(String),
}

impl ControlCommand {
    /// Match `body` as a whole line. Anything unrecognized is `Unknown`.
    pub fn parse(body: &str) -> Self {
        let line = body.trim();
        if let Some(name) = line.strip_prefix("help ") {
            return Self::Help(name.trim().to_owned());
        }
        if let Some(name) = line.strip_prefix("reload_agent ") {
            return Self::ReloadAgent(name.trim().to_owned());
        }
        match line {
            "stats" => Self::Stats,
            "reload_agents" => Self::ReloadAgents,
            "exit" => Self::Exit,
            _ => Self::Unknown(line.to_owned()),
        }
    }
}

/// Encodes, sends and counts replies. Cloned into dispatch tasks.
#[derive(Clone)]
struct Replier {
    security: Arc<dyn SecurityProvider>,
    connector: Arc<dyn Connector>,
    stats: Arc<DaemonStats>,
}

impl Replier {
    async fn send(&self, sender_agent: &str, topic: &str, payload: &Value, request_id: &str) {
        let bytes = match self.security.encode_reply(sender_agent, topic, payload, request_id) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(request_id, code = e.as_str(), "failed to encode reply: {e}");
                return;
            }
        };
        match self.connector.send(topic, bytes).await {
            Ok(()) => {
                self.stats.record_reply();
                debug!(request_id, topic, "sent reply");
            }
            Err(e) => error!(request_id, topic, err = %format!("{e:#}"), "failed to send reply"),
        }
    }
}

pub struct Runner {
    settings: Settings,
    plugins: Arc<PluginRegistry>,
    connector: Arc<dyn Connector>,
    security: Arc<dyn SecurityProvider>,
    agents: Arc<Agents>,
    stats: Arc<DaemonStats>,
}

impl Runner {
    /// Build every component, connect and load agents. Any error is fatal.
    pub async fn new(settings: Settings) -> anyhow::Result<Self> {
        Self::with_catalog(settings, AgentCatalog::with_builtins()).await
    }

    pub async fn with_catalog(settings: Settings, catalog: AgentCatalog) -> anyhow::Result<Self> {
        let connector = connector::build(&settings.connector, &settings.plugin)?;
        Self::with_connector(settings, catalog, connector).await
    }

    /// Like [`with_catalog`](Self::with_catalog) with a caller-supplied
    /// connector instance.
    pub async fn with_connector(
        settings: Settings,
        catalog: AgentCatalog,
        connector: Arc<dyn Connector>,
    ) -> anyhow::Result<Self> {
        info!(
            identity = %settings.identity,
            connector = %settings.connector,
            security = %settings.security_provider,
            libdir = %settings.libdir.display(),
            "starting"
        );

        let plugins = Arc::new(PluginRegistry::new());
        plugins.register_instance(CONNECTOR_KEY, Plugin::Connector(connector));
        let connector = plugins.connector(CONNECTOR_KEY)?;

        let agents = Arc::new(Agents::new(
            settings.agent_dir(),
            settings.topics.clone(),
            Arc::clone(&plugins),
            Arc::clone(&connector),
            catalog,
        ));

        let presence: Arc<dyn AgentPresence> = Arc::clone(&agents) as Arc<dyn AgentPresence>;
        let ctx = SecurityContext {
            identity: settings.identity.clone(),
            plugin: settings.plugin.clone(),
            filter: Arc::new(LocalFilter::new(settings.identity.clone(), presence)),
        };
        let provider = security::build(&settings.security_provider, ctx)?;
        plugins.register_instance(SECURITY_KEY, Plugin::Security(provider));
        let security = plugins.security(SECURITY_KEY)?;

        connector.connect().await.with_context(|| format!("connecting via {}", settings.connector))?;
        agents.load_all().await?;

        Ok(Self { settings, plugins, connector, security, agents, stats: Arc::new(DaemonStats::new()) })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn plugins(&self) -> &Arc<PluginRegistry> {
        &self.plugins
    }

    pub fn connector(&self) -> &Arc<dyn Connector> {
        &self.connector
    }

    pub fn security(&self) -> &Arc<dyn SecurityProvider> {
        &self.security
    }

    pub fn agents(&self) -> &Arc<Agents> {
        &self.agents
    }

    pub fn stats(&self) -> &Arc<DaemonStats> {
        &self.stats
    }

    fn replier(&self) -> Replier {
        Replier {
            security: Arc::clone(&self.security),
            connector: Arc::clone(&self.connector),
            stats: Arc::clone(&self.stats),
        }
    }

    /// Serve until an `exit` command or until `shutdown` is cancelled.
    /// The connector is disconnected on both paths.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<ExitReason> {
        let control = self.settings.topics.control_command();
        self.connector
            .subscribe(&control)
            .await
            .with_context(|| format!("subscribing {control}"))?;
        info!(control = %control, agents = ?self.agents.agent_names(), "serving");

        loop {
            let received = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return self.interrupted().await,
                received = self.connector.receive() => received,
            };

            let raw = match received {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(err = %format!("{e:#}"), "receive failed");
                    tokio::select! {
                        _ = shutdown.cancelled() => return self.interrupted().await,
                        _ = tokio::time::sleep(RECEIVE_BACKOFF) => continue,
                    }
                }
            };

            self.stats.record_received();
            match self.handle(raw).await {
                Ok(Some(reason)) => return Ok(reason),
                Ok(None) => {}
                Err(Error::NotAddressed) => debug!("message not addressed to this node"),
                Err(e) => warn!(code = e.as_str(), "failed to handle message: {e}"),
            }
        }
    }

    async fn interrupted(&self) -> anyhow::Result<ExitReason> {
        warn!("exiting after interrupt signal");
        self.disconnect().await;
        Ok(ExitReason::Interrupted)
    }

    async fn disconnect(&self) {
        if let Err(e) = self.connector.disconnect().await {
            warn!(err = %format!("{e:#}"), "disconnect failed");
        }
    }

    /// Process one received message.
    async fn handle(&self, raw: RawMessage) -> Result<Option<ExitReason>, Error> {
        let request = self.security.decode_request(&raw)?;
        if !self.security.validate_filter(&request.filter) {
            return Err(Error::NotAddressed);
        }

        let topics = &self.settings.topics;
        if topics.is_control(&request.message_target) {
            debug!(request_id = %request.request_id, "handling control message");
            return Ok(self.control(&request).await);
        }

        let Some(target) = topics.agent_for_command(&request.message_target).map(str::to_owned)
        else {
            debug!(destination = %request.message_target, "no route for destination");
            return Ok(None);
        };
        self.agent_message(request, &target)?;
        Ok(None)
    }

    fn agent_message(&self, request: Request, target: &str) -> Result<(), Error> {
        debug!(agent = target, request_id = %request.request_id, "handling agent message");
        let replier = self.replier();
        let reply_topic = self.settings.topics.reply(target);
        let sender_agent = target.to_owned();
        let request_id = request.request_id.clone();

        // The handle is dropped: the dispatch runs detached.
        self.agents.dispatch(request, target, move |payload| async move {
            replier.send(&sender_agent, &reply_topic, &payload, &request_id).await;
        })?;
        Ok(())
    }

    async fn control(&self, request: &Request) -> Option<ExitReason> {
        let Some(body) = request.body_str() else {
            error!(request_id = %request.request_id, "control message body is not text");
            return None;
        };

        let reply_topic = self.settings.topics.control_reply();
        let payload = match ControlCommand::parse(body) {
            ControlCommand::Help(name) => match self.agents.help(&name) {
                Ok(help) => Value::String(help),
                Err(e) => {
                    error!(agent = %name, code = e.as_str(), "failed to handle control message: {e}");
                    return None;
                }
            },
            ControlCommand::Stats => match serde_json::to_value(self.status()) {
                Ok(value) => value,
                Err(e) => {
                    error!("failed to serialize stats: {e}");
                    return None;
                }
            },
            ControlCommand::ReloadAgent(name) => match self.agents.load_one(&name).await {
                Ok(true) => json!(format!("reloaded {name} agent")),
                Ok(false) => {
                    warn!(agent = %name, "reload requested for unknown agent");
                    return None;
                }
                Err(e) => {
                    error!(agent = %name, code = e.as_str(), "reload failed: {e}");
                    return None;
                }
            },
            ControlCommand::ReloadAgents => match self.agents.load_all().await {
                Ok(()) => json!("reloaded all agents"),
                Err(e) => {
                    error!(code = e.as_str(), "reload failed: {e}");
                    return None;
                }
            },
            ControlCommand::Exit => {
                warn!("exiting due to request to controller");
                let ack = json!("exiting after request to controller");
                self.replier().send(CONTROL_AGENT, &reply_topic, &ack, &request.request_id).await;
                self.disconnect().await;
                return Some(ExitReason::ControlExit);
            }
            ControlCommand::Unknown(line) => {
                error!(body = %line, "received an unknown message to the controller");
                return None;
            }
        };

        self.replier().send(CONTROL_AGENT, &reply_topic, &payload, &request.request_id).await;
        None
    }

    /// Current status report, as sent for `stats`.
    pub fn status(&self) -> StatusSnapshot {
        self.stats.snapshot(self.security.stats(), self.agents.in_flight(), self.agents.agent_names())
    }
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
