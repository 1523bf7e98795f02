// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;

use crate::error::Error;
use crate::topic::Topics;

const DEFAULT_CONNECTOR: &str = "nats";
const DEFAULT_SECURITY_PROVIDER: &str = "psk";
const DEFAULT_LIBDIR: &str = "/usr/libexec/collective";
const DEFAULT_TOPIC_PREFIX: &str = "mcollective";
const DEFAULT_TOPIC_SEP: &str = ".";

/// Orchestration daemon: serves authenticated agent requests from a message bus.
#[derive(Debug, Parser)]
#[command(name = "collectived", version, about)]
pub struct Config {
    /// Path to a JSON configuration file.
    #[arg(long, env = "COLLECTIVE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Identity this node answers to (defaults to the host name).
    #[arg(long, env = "COLLECTIVE_IDENTITY")]
    pub identity: Option<String>,

    /// Connector implementation (nats, memory).
    #[arg(long, env = "COLLECTIVE_CONNECTOR")]
    pub connector: Option<String>,

    /// Security provider implementation (psk).
    #[arg(long, env = "COLLECTIVE_SECURITY_PROVIDER")]
    pub security_provider: Option<String>,

    /// Plugin library directory; agent manifests live in `<libdir>/agent`.
    #[arg(long, env = "COLLECTIVE_LIBDIR")]
    pub libdir: Option<PathBuf>,

    /// Topic prefix for control and agent topics.
    #[arg(long, env = "COLLECTIVE_TOPIC_PREFIX")]
    pub topic_prefix: Option<String>,

    /// Separator between the topic prefix and the agent name.
    #[arg(long, env = "COLLECTIVE_TOPIC_SEP")]
    pub topic_sep: Option<String>,

    /// Log format (json or text).
    #[arg(long, env = "COLLECTIVE_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "COLLECTIVE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// On-disk configuration file. Every key is optional.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct FileConfig {
    pub identity: Option<String>,
    pub connector: Option<String>,
    pub securityprovider: Option<String>,
    pub libdir: Option<PathBuf>,
    pub topicprefix: Option<String>,
    pub topicsep: Option<String>,
    #[serde(default)]
    pub plugin: BTreeMap<String, String>,
}

/// Load and parse the configuration file at `path`.
pub fn load_file_config(path: &Path) -> anyhow::Result<FileConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;
    let config: FileConfig = serde_json::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("parsing {}: {e}", path.display()))?;
    Ok(config)
}

/// Free-form `plugin.*` settings consumed by connector and security plugins.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PluginConf(BTreeMap<String, String>);

impl PluginConf {
    pub fn new(values: BTreeMap<String, String>) -> Self {
        Self(values)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Look up a value, letting the environment variable `env` override
    /// the configured `key`. Read at call time, never cached.
    pub fn resolve(&self, env: &str, key: &str) -> Option<String> {
        match std::env::var(env) {
            Ok(v) => Some(v),
            Err(_) => self.get(key).map(str::to_owned),
        }
    }

    /// Like [`resolve`](Self::resolve) but absence is a configuration error.
    pub fn require(&self, env: &str, key: &str) -> Result<String, Error> {
        self.resolve(env, key).ok_or_else(|| {
            Error::Configuration(format!("no {env} environment or plugin.{key} option specified"))
        })
    }
}

/// Fully resolved daemon settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub identity: String,
    pub connector: String,
    pub security_provider: String,
    pub libdir: PathBuf,
    pub topics: Topics,
    pub plugin: PluginConf,
}

impl Settings {
    /// Directory holding agent manifests.
    pub fn agent_dir(&self) -> PathBuf {
        self.libdir.join("agent")
    }
}

impl Config {
    /// Read the configuration file (if any) and merge it under the
    /// command line and environment values.
    pub fn resolve(&self) -> anyhow::Result<Settings> {
        let file = match self.config {
            Some(ref path) => load_file_config(path)?,
            None => FileConfig::default(),
        };
        let settings = merge_settings(self, file);
        validate(&settings)?;
        Ok(settings)
    }
}

/// Layer command line / environment values over file values over defaults.
pub fn merge_settings(cli: &Config, file: FileConfig) -> Settings {
    let identity = match cli.identity.clone().or(file.identity) {
        Some(id) => id,
        None => default_identity(),
    };
    let prefix = cli
        .topic_prefix
        .clone()
        .or(file.topicprefix)
        .unwrap_or_else(|| DEFAULT_TOPIC_PREFIX.to_owned());
    let sep =
        cli.topic_sep.clone().or(file.topicsep).unwrap_or_else(|| DEFAULT_TOPIC_SEP.to_owned());

    Settings {
        identity,
        connector: cli
            .connector
            .clone()
            .or(file.connector)
            .unwrap_or_else(|| DEFAULT_CONNECTOR.to_owned()),
        security_provider: cli
            .security_provider
            .clone()
            .or(file.securityprovider)
            .unwrap_or_else(|| DEFAULT_SECURITY_PROVIDER.to_owned()),
        libdir: cli.libdir.clone().or(file.libdir).unwrap_or_else(|| PathBuf::from(DEFAULT_LIBDIR)),
        topics: Topics::new(prefix, sep),
        plugin: PluginConf::new(file.plugin),
    }
}

fn validate(settings: &Settings) -> anyhow::Result<()> {
    if settings.identity.is_empty() {
        anyhow::bail!("identity must not be empty");
    }
    if settings.connector.is_empty() {
        anyhow::bail!("connector must not be empty");
    }
    if settings.security_provider.is_empty() {
        anyhow::bail!("security provider must not be empty");
    }
    if settings.topics.prefix().is_empty() {
        anyhow::bail!("topic prefix must not be empty");
    }
    Ok(())
}

fn default_identity() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_owned())
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
