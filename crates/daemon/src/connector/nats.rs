// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! NATS binding for the connector interface.
//!
//! Each subscribed topic gets a forwarding task that pushes messages into
//! one shared inbox; `receive` reads from that inbox. Connection settings
//! come from the environment first, then from `plugin.nats.*`:
//!
//! - `NATS_SERVER` / `plugin.nats.host` (required)
//! - `NATS_PORT` / `plugin.nats.port` (default 4222)
//! - `NATS_USER` + `NATS_PASSWORD` / `plugin.nats.user` + `plugin.nats.password`
//! - `NATS_TOKEN` / `plugin.nats.token`

use std::collections::HashMap;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Connector;
use crate::config::PluginConf;
use crate::error::Error;
use crate::message::RawMessage;

const DEFAULT_PORT: u16 = 4222;
const INBOX_CAPACITY: usize = 1024;

/// Server URL and credentials resolved from environment and plugin settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatsSettings {
    pub url: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
}

impl NatsSettings {
    pub fn resolve(plugin: &PluginConf) -> Result<Self, Error> {
        let host = plugin.require("NATS_SERVER", "nats.host")?;
        let port = match plugin.resolve("NATS_PORT", "nats.port") {
            Some(p) => p
                .parse::<u16>()
                .map_err(|_| Error::Configuration(format!("invalid NATS port: {p}")))?,
            None => DEFAULT_PORT,
        };
        let url =
            if host.contains("://") { host } else { format!("nats://{host}:{port}") };

        Ok(Self {
            url,
            user: plugin.resolve("NATS_USER", "nats.user"),
            password: plugin.resolve("NATS_PASSWORD", "nats.password"),
            token: plugin.resolve("NATS_TOKEN", "nats.token"),
        })
    }

    fn options(&self) -> async_nats::ConnectOptions {
        let mut opts = async_nats::ConnectOptions::new();
        if let Some(ref token) = self.token {
            opts = opts.token(token.clone());
        }
        if let (Some(user), Some(password)) = (&self.user, &self.password) {
            opts = opts.user_and_password(user.clone(), password.clone());
        }
        opts
    }
}

pub struct NatsConnector {
    plugin: PluginConf,
    client: Mutex<Option<async_nats::Client>>,
    subscriptions: Mutex<HashMap<String, CancellationToken>>,
    inbox_tx: mpsc::Sender<RawMessage>,
    inbox_rx: tokio::sync::Mutex<mpsc::Receiver<RawMessage>>,
}

impl NatsConnector {
    pub fn new(plugin: PluginConf) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
        Self {
            plugin,
            client: Mutex::new(None),
            subscriptions: Mutex::new(HashMap::new()),
            inbox_tx,
            inbox_rx: tokio::sync::Mutex::new(inbox_rx),
        }
    }

    fn client(&self) -> anyhow::Result<async_nats::Client> {
        self.client.lock().clone().ok_or_else(|| anyhow::anyhow!("NATS connector is not connected"))
    }
}

impl Connector for NatsConnector {
    fn connect(&self) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            let settings = NatsSettings::resolve(&self.plugin)?;
            debug!(url = %settings.url, "connecting to NATS");
            let client = settings
                .options()
                .connect(&settings.url)
                .await
                .map_err(|e| anyhow::anyhow!("could not connect to NATS server {}: {e}", settings.url))?;
            info!(url = %settings.url, "NATS connected");
            *self.client.lock() = Some(client);
            Ok(())
        })
    }

    fn disconnect(&self) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            debug!("disconnecting from NATS");
            for (_, cancel) in self.subscriptions.lock().drain() {
                cancel.cancel();
            }
            let client = self.client.lock().take();
            if let Some(client) = client {
                client.drain().await?;
            }
            Ok(())
        })
    }

    fn subscribe<'a>(&'a self, topic: &'a str) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            if self.subscriptions.lock().contains_key(topic) {
                debug!(topic, "already subscribed");
                return Ok(());
            }
            debug!(topic, "subscribing");
            let mut sub = self.client()?.subscribe(topic.to_owned()).await?;

            let cancel = CancellationToken::new();
            self.subscriptions.lock().insert(topic.to_owned(), cancel.clone());

            let tx = self.inbox_tx.clone();
            let topic_owned = topic.to_owned();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            if let Err(e) = sub.unsubscribe().await {
                                warn!(topic = %topic_owned, "NATS unsubscribe failed: {e}");
                            }
                            break;
                        }
                        msg = sub.next() => {
                            let Some(msg) = msg else { break };
                            let raw = RawMessage {
                                topic: msg.subject.as_str().to_owned(),
                                payload: msg.payload,
                            };
                            if tx.send(raw).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                debug!(topic = %topic_owned, "NATS subscription closed");
            });
            Ok(())
        })
    }

    fn unsubscribe<'a>(&'a self, topic: &'a str) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            debug!(topic, "unsubscribing");
            if let Some(cancel) = self.subscriptions.lock().remove(topic) {
                cancel.cancel();
            }
            Ok(())
        })
    }

    fn send<'a>(&'a self, topic: &'a str, payload: Bytes) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            debug!(topic, bytes = payload.len(), "sending message");
            let client = self.client()?;
            client.publish(topic.to_owned(), payload).await?;
            client.flush().await?;
            Ok(())
        })
    }

    fn receive(&self) -> BoxFuture<'_, anyhow::Result<RawMessage>> {
        Box::pin(async move {
            let mut inbox = self.inbox_rx.lock().await;
            inbox.recv().await.ok_or_else(|| anyhow::anyhow!("NATS inbox closed"))
        })
    }
}

#[cfg(test)]
#[path = "nats_tests.rs"]
mod tests;
