// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::{json, Value};

use super::rpc::{RpcAgent, RpcError, RpcRequest};
use super::{Agent, AgentMeta};
use crate::connector::Connector;
use crate::message::{epoch_secs, Request};

/// Answers `ping` with `pong` so clients can enumerate live nodes.
/// Any other body is ignored.
pub struct Discovery;

impl Agent for Discovery {
    fn help(&self) -> String {
        "Discovery agent\n\nSend the body \"ping\"; every addressed node replies \"pong\".".to_owned()
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(5)
    }

    fn meta(&self) -> AgentMeta {
        AgentMeta {
            license: "BUSL-1.1".into(),
            author: "Alfred Jean LLC".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            ..AgentMeta::default()
        }
    }

    fn handle<'a>(
        &'a self,
        request: &'a Request,
        _connector: &'a Arc<dyn Connector>,
    ) -> BoxFuture<'a, anyhow::Result<Option<Value>>> {
        let reply = match request.body_str() {
            Some("ping") => Some(json!("pong")),
            _ => None,
        };
        Box::pin(async move { Ok(reply) })
    }
}

const ECHO_HELP: &str = "
    Echo agent

    Actions:
      echo  returns data.msg unchanged
      ping  returns the node's current epoch time
";

/// Round-trip test agent.
pub fn echo() -> RpcAgent {
    RpcAgent::builder("echo")
        .help(ECHO_HELP)
        .meta(AgentMeta {
            license: "BUSL-1.1".into(),
            author: "Alfred Jean LLC".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            ..AgentMeta::default()
        })
        .action("echo", |req: RpcRequest| async move {
            req.require("msg").map(|msg| json!({ "msg": msg }))
        })
        .action("ping", |_req: RpcRequest| async move {
            Ok::<_, RpcError>(json!({ "pong": epoch_secs() }))
        })
        .build()
}

#[cfg(test)]
#[path = "builtin_tests.rs"]
mod tests;
