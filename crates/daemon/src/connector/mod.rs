// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

pub mod memory;
pub mod nats;

use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::BoxFuture;

use crate::config::PluginConf;
use crate::error::Error;
use crate::message::RawMessage;

pub use memory::MemoryConnector;
pub use nats::NatsConnector;

/// Transport binding between the daemon and a publish/subscribe bus.
///
/// Only topics and raw payload bytes cross this boundary.
/// Object-safe for use as `Arc<dyn Connector>`.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self) -> BoxFuture<'_, anyhow::Result<()>>;

    fn disconnect(&self) -> BoxFuture<'_, anyhow::Result<()>>;

    fn subscribe<'a>(&'a self, topic: &'a str) -> BoxFuture<'a, anyhow::Result<()>>;

    fn unsubscribe<'a>(&'a self, topic: &'a str) -> BoxFuture<'a, anyhow::Result<()>>;

    fn send<'a>(&'a self, topic: &'a str, payload: Bytes) -> BoxFuture<'a, anyhow::Result<()>>;

    /// Wait for the next message on any subscribed topic.
    fn receive(&self) -> BoxFuture<'_, anyhow::Result<RawMessage>>;
}

/// Build the connector named `name` from plugin settings.
pub fn build(name: &str, plugin: &PluginConf) -> Result<Arc<dyn Connector>, Error> {
    match name {
        "nats" => Ok(Arc::new(NatsConnector::new(plugin.clone()))),
        "memory" => Ok(Arc::new(MemoryConnector::new())),
        other => Err(Error::Configuration(format!("unknown connector: {other}"))),
    }
}
