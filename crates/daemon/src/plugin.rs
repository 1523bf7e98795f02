// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-wide keyed store of swappable implementations.
//!
//! Connector, security provider and every agent are registered here under
//! a string key as a factory. The first `get` instantiates and caches the
//! instance; later calls return the same one until the key is registered
//! again or removed.
//!
//! The registry never tears down external resources of a replaced
//! instance. Callers unsubscribe topics before overwriting an agent.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::agent::Agent;
use crate::connector::Connector;
use crate::error::Error;
use crate::security::SecurityProvider;

/// Registry key for the active connector.
pub const CONNECTOR_KEY: &str = "connector_plugin";

/// Registry key for the active security provider.
pub const SECURITY_KEY: &str = "security_plugin";

/// Registry key for an agent.
pub fn agent_key(name: &str) -> String {
    format!("{name}_agent")
}

/// A live plugin instance.
#[derive(Clone)]
pub enum Plugin {
    Connector(Arc<dyn Connector>),
    Security(Arc<dyn SecurityProvider>),
    Agent(Arc<dyn Agent>),
}

impl Plugin {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connector(_) => "connector",
            Self::Security(_) => "security",
            Self::Agent(_) => "agent",
        }
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Plugin::{}", self.kind())
    }
}

/// Builds a plugin instance on first access.
///
/// Runs with the registry's write lock held, so it must not call back into
/// the registry.
pub type PluginFactory = Arc<dyn Fn() -> anyhow::Result<Plugin> + Send + Sync>;

struct Entry {
    factory: PluginFactory,
    instance: Option<Plugin>,
}

#[derive(Default)]
pub struct PluginRegistry {
    entries: RwLock<HashMap<String, Entry>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite `key`. A previously cached instance is dropped
    /// from the registry (in-flight holders keep their `Arc`).
    pub fn register(&self, key: impl Into<String>, factory: PluginFactory) {
        let key = key.into();
        debug!(key = %key, "registering plugin");
        self.entries.write().insert(key, Entry { factory, instance: None });
    }

    /// Register an already-built instance. Its factory hands out clones.
    pub fn register_instance(&self, key: impl Into<String>, plugin: Plugin) {
        let cached = plugin.clone();
        let factory: PluginFactory = Arc::new(move || Ok(cached.clone()));
        let key = key.into();
        debug!(key = %key, kind = plugin.kind(), "registering plugin instance");
        self.entries.write().insert(key, Entry { factory, instance: Some(plugin) });
    }

    /// Remove `key`. Returns whether anything was registered.
    pub fn unregister(&self, key: &str) -> bool {
        self.entries.write().remove(key).is_some()
    }

    pub fn has(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Return the singleton instance for `key`, building it on first use.
    pub fn get(&self, key: &str) -> Result<Plugin, Error> {
        if let Some(entry) = self.entries.read().get(key) {
            if let Some(ref instance) = entry.instance {
                return Ok(instance.clone());
            }
        }

        let mut entries = self.entries.write();
        let entry = entries.get_mut(key).ok_or_else(|| Error::NotFound(key.to_owned()))?;
        if let Some(ref instance) = entry.instance {
            return Ok(instance.clone());
        }
        match (entry.factory)() {
            Ok(instance) => {
                debug!(key, kind = instance.kind(), "instantiated plugin");
                entry.instance = Some(instance.clone());
                Ok(instance)
            }
            Err(e) => {
                warn!(key, err = %format!("{e:#}"), "plugin failed to instantiate");
                Err(Error::NotFound(key.to_owned()))
            }
        }
    }

    pub fn connector(&self, key: &str) -> Result<Arc<dyn Connector>, Error> {
        match self.get(key)? {
            Plugin::Connector(c) => Ok(c),
            other => Err(mismatch(key, "connector", &other)),
        }
    }

    pub fn security(&self, key: &str) -> Result<Arc<dyn SecurityProvider>, Error> {
        match self.get(key)? {
            Plugin::Security(s) => Ok(s),
            other => Err(mismatch(key, "security", &other)),
        }
    }

    pub fn agent(&self, key: &str) -> Result<Arc<dyn Agent>, Error> {
        match self.get(key)? {
            Plugin::Agent(a) => Ok(a),
            other => Err(mismatch(key, "agent", &other)),
        }
    }
}

fn mismatch(key: &str, wanted: &str, found: &Plugin) -> Error {
    warn!(key, wanted, found = found.kind(), "plugin registered with a different kind");
    Error::NotFound(key.to_owned())
}

#[cfg(test)]
#[path = "plugin_tests.rs"]
mod tests;
