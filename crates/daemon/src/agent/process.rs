// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agents implemented by an external executable.
//!
//! Each request spawns the command with the decoded request as JSON on
//! stdin. Stdout is the reply payload (empty means no reply); a non-zero
//! exit is a handler failure. The child is killed if the dispatch is
//! abandoned.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{Agent, AgentMeta, DEFAULT_TIMEOUT};
use crate::connector::Connector;
use crate::message::Request;

pub struct ProcessAgent {
    name: String,
    program: String,
    args: Vec<String>,
    timeout: Duration,
    help: String,
    meta: AgentMeta,
}

impl ProcessAgent {
    pub fn new(name: impl Into<String>, program: impl Into<String>, args: Vec<String>) -> Self {
        let name = name.into();
        Self {
            help: format!("{name} (external command)"),
            name,
            program: program.into(),
            args,
            timeout: DEFAULT_TIMEOUT,
            meta: AgentMeta::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = help.into();
        self
    }

    pub fn with_meta(mut self, meta: AgentMeta) -> Self {
        self.meta = meta;
        self
    }

    async fn run(&self, request: &Request) -> anyhow::Result<Option<Value>> {
        let input = serde_json::to_vec(request)?;

        debug!(agent = %self.name, program = %self.program, "spawning agent process");
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning {}", self.program))?;

        let mut stdin = child.stdin.take().context("failed to capture stdin")?;
        let write = async move {
            // A child that never reads stdin closes the pipe early; not an error.
            if let Err(e) = stdin.write_all(&input).await {
                debug!("agent stdin closed early: {e}");
            }
        };
        let ((), output) = tokio::join!(write, child.wait_with_output());
        let output = output.with_context(|| format!("waiting for {}", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("{} exited with {}: {}", self.program, output.status, stderr.trim());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stdout = stdout.trim();
        if stdout.is_empty() {
            return Ok(None);
        }
        let reply = serde_json::from_str(stdout)
            .with_context(|| format!("parsing output of {}", self.program))?;
        Ok(Some(reply))
    }
}

impl Agent for ProcessAgent {
    fn help(&self) -> String {
        self.help.clone()
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn meta(&self) -> AgentMeta {
        self.meta.clone()
    }

    fn handle<'a>(
        &'a self,
        request: &'a Request,
        _connector: &'a Arc<dyn Connector>,
    ) -> BoxFuture<'a, anyhow::Result<Option<Value>>> {
        Box::pin(self.run(request))
    }
}

#[cfg(test)]
#[path = "process_tests.rs"]
mod tests;
