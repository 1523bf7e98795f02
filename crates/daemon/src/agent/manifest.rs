// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! On-disk agent descriptions: `<libdir>/agent/<name>.json`.
//!
//! ```json
//! { "command": ["/usr/libexec/collective/bin/package"], "timeout_secs": 30 }
//! { "implementation": "echo", "help": "..." }
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use super::{Agent, AgentCatalog, AgentMeta, Configured, ProcessAgent};
use crate::error::Error;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentManifest {
    /// Catalog entry to instantiate. Defaults to the agent's own name.
    pub implementation: Option<String>,
    /// External command (program followed by arguments).
    pub command: Option<Vec<String>>,
    pub timeout_secs: Option<f64>,
    pub help: Option<String>,
    pub meta: Option<AgentMeta>,
}

impl AgentManifest {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path).map_err(|e| manifest_err(path, e))?;
        serde_json::from_str(&contents).map_err(|e| manifest_err(path, e))
    }

    pub fn timeout(&self, path: &Path) -> Result<Option<Duration>, Error> {
        let Some(secs) = self.timeout_secs else {
            return Ok(None);
        };
        if secs <= 0.0 {
            return Err(manifest_err(path, "timeout_secs must be positive"));
        }
        Duration::try_from_secs_f64(secs).map(Some).map_err(|e| manifest_err(path, e))
    }

    /// Instantiate the agent `name` described by this manifest.
    pub fn build(
        &self,
        name: &str,
        path: &Path,
        catalog: &AgentCatalog,
    ) -> Result<Arc<dyn Agent>, Error> {
        let timeout = self.timeout(path)?;

        if let Some(ref command) = self.command {
            let Some((program, args)) = command.split_first() else {
                return Err(manifest_err(path, "command must not be empty"));
            };
            let mut agent = ProcessAgent::new(name, program.clone(), args.to_vec());
            if let Some(timeout) = timeout {
                agent = agent.with_timeout(timeout);
            }
            if let Some(ref help) = self.help {
                agent = agent.with_help(help.clone());
            }
            if let Some(ref meta) = self.meta {
                agent = agent.with_meta(meta.clone());
            }
            return Ok(Arc::new(agent));
        }

        let implementation = self.implementation.as_deref().unwrap_or(name);
        let constructor = catalog.get(implementation).ok_or_else(|| {
            manifest_err(path, format!("unknown agent implementation: {implementation}"))
        })?;
        let inner = constructor();

        if timeout.is_none() && self.help.is_none() && self.meta.is_none() {
            return Ok(inner);
        }
        Ok(Arc::new(Configured {
            inner,
            timeout,
            help: self.help.clone(),
            meta: self.meta.clone(),
        }))
    }
}

fn manifest_err(path: &Path, message: impl ToString) -> Error {
    Error::Manifest { path: path.to_path_buf(), message: message.to_string() }
}

#[cfg(test)]
#[path = "manifest_tests.rs"]
mod tests;
