// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process loopback bus.
//!
//! Everything sent is published to observers (see [`MemoryConnector::watch`])
//! and looped back into the inbox when the destination is subscribed.
//! Like a real broker, a topic subscribed twice delivers every message twice.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use bytes::Bytes;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, trace};

use super::Connector;
use crate::message::RawMessage;

/// How many sent messages [`MemoryConnector::sent`] remembers by default.
pub const SENT_HISTORY: usize = 256;

pub struct MemoryConnector {
    connected: AtomicBool,
    disconnects: AtomicU32,
    subscriptions: Mutex<BTreeMap<String, usize>>,
    inbox_tx: mpsc::UnboundedSender<RawMessage>,
    inbox_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<RawMessage>>,
    outbox: broadcast::Sender<RawMessage>,
    sent: Mutex<VecDeque<RawMessage>>,
    history: usize,
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::with_history(SENT_HISTORY)
    }

    /// Keep only the last `history` sent messages for [`sent`](Self::sent).
    pub fn with_history(history: usize) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (outbox, _) = broadcast::channel(256);
        Self {
            connected: AtomicBool::new(false),
            disconnects: AtomicU32::new(0),
            subscriptions: Mutex::new(BTreeMap::new()),
            inbox_tx,
            inbox_rx: tokio::sync::Mutex::new(inbox_rx),
            outbox,
            sent: Mutex::new(VecDeque::new()),
            history,
        }
    }

    /// Deliver a message from outside the process. Returns how many
    /// subscriptions received it (zero if the topic is not subscribed).
    pub fn inject(&self, message: RawMessage) -> usize {
        let copies = self.subscriptions.lock().get(&message.topic).copied().unwrap_or(0);
        if copies == 0 {
            trace!(topic = %message.topic, "memory: dropping message for unsubscribed topic");
        }
        for _ in 0..copies {
            let _ = self.inbox_tx.send(message.clone());
        }
        copies
    }

    /// Observe every message sent through this connector from now on.
    pub fn watch(&self) -> broadcast::Receiver<RawMessage> {
        self.outbox.subscribe()
    }

    /// The most recent sent messages, oldest first.
    pub fn sent(&self) -> Vec<RawMessage> {
        self.sent.lock().iter().cloned().collect()
    }

    pub fn sent_to(&self, topic: &str) -> Vec<RawMessage> {
        self.sent.lock().iter().filter(|m| m.topic == topic).cloned().collect()
    }

    /// Currently subscribed topics, sorted.
    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().keys().cloned().collect()
    }

    /// How many times `topic` is currently subscribed.
    pub fn subscription_count(&self, topic: &str) -> usize {
        self.subscriptions.lock().get(topic).copied().unwrap_or(0)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn disconnect_count(&self) -> u32 {
        self.disconnects.load(Ordering::Acquire)
    }
}

impl Connector for MemoryConnector {
    fn connect(&self) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            self.connected.store(true, Ordering::Release);
            debug!("memory: connected");
            Ok(())
        })
    }

    fn disconnect(&self) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            self.connected.store(false, Ordering::Release);
            self.disconnects.fetch_add(1, Ordering::AcqRel);
            debug!("memory: disconnected");
            Ok(())
        })
    }

    fn subscribe<'a>(&'a self, topic: &'a str) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            debug!(topic, "memory: subscribing");
            *self.subscriptions.lock().entry(topic.to_owned()).or_insert(0) += 1;
            Ok(())
        })
    }

    fn unsubscribe<'a>(&'a self, topic: &'a str) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            debug!(topic, "memory: unsubscribing");
            self.subscriptions.lock().remove(topic);
            Ok(())
        })
    }

    fn send<'a>(&'a self, topic: &'a str, payload: Bytes) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            if !self.is_connected() {
                anyhow::bail!("memory connector is not connected");
            }
            let message = RawMessage { topic: topic.to_owned(), payload };
            {
                let mut sent = self.sent.lock();
                if sent.len() >= self.history {
                    sent.pop_front();
                }
                if self.history > 0 {
                    sent.push_back(message.clone());
                }
            }
            let _ = self.outbox.send(message.clone());
            self.inject(message);
            Ok(())
        })
    }

    fn receive(&self) -> BoxFuture<'_, anyhow::Result<RawMessage>> {
        Box::pin(async move {
            if !self.is_connected() {
                anyhow::bail!("memory connector is not connected");
            }
            let mut inbox = self.inbox_rx.lock().await;
            inbox.recv().await.ok_or_else(|| anyhow::anyhow!("memory inbox closed"))
        })
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
