// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end tests of the control loop over the in-memory connector.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use collectived::agent::AgentCatalog;
use collectived::connector::{Connector, MemoryConnector};
use collectived::message::{new_request_id, Filter, RawMessage, Reply};
use collectived::runner::{ExitReason, Runner};
use collectived::test_support::{
    agent_dir, catalog, constructor, test_settings, write_manifest, MockAgent,
};

const CONTROL: &str = "mcollective.mcollective/command";
const CONTROL_REPLY: &str = "mcollective.mcollective/reply";

struct Daemon {
    _libdir: tempfile::TempDir,
    bus: Arc<MemoryConnector>,
    runner: Arc<Runner>,
    replies: broadcast::Receiver<RawMessage>,
    shutdown: CancellationToken,
    task: JoinHandle<anyhow::Result<ExitReason>>,
}

async fn start(catalog: AgentCatalog, agents: &[&str]) -> anyhow::Result<Daemon> {
    let libdir = tempfile::tempdir()?;
    let dir = agent_dir(libdir.path())?;
    for name in agents {
        write_manifest(&dir, name, &json!({}))?;
    }

    let bus = Arc::new(MemoryConnector::new());
    let connector: Arc<dyn Connector> = Arc::clone(&bus) as Arc<dyn Connector>;
    let runner =
        Arc::new(Runner::with_connector(test_settings(libdir.path()), catalog, connector).await?);
    let replies = bus.watch();

    let shutdown = CancellationToken::new();
    let task = {
        let runner = Arc::clone(&runner);
        let sd = shutdown.clone();
        tokio::spawn(async move { runner.run(sd).await })
    };

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while bus.subscription_count(CONTROL) == 0 {
        anyhow::ensure!(tokio::time::Instant::now() < deadline, "control topic never subscribed");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    Ok(Daemon { _libdir: libdir, bus, runner, replies, shutdown, task })
}

impl Daemon {
    fn send_to(&self, target: &str, body: Value) -> anyhow::Result<String> {
        let request_id = new_request_id();
        let payload = self.runner.security().encode_request(
            "client1",
            target,
            &body,
            &request_id,
            &Filter::new(),
        )?;
        anyhow::ensure!(self.bus.inject(RawMessage::new(target, payload)) > 0, "{target} not subscribed");
        Ok(request_id)
    }

    fn control(&self, body: &str) -> anyhow::Result<String> {
        self.send_to(CONTROL, json!(body))
    }

    /// Next reply sent by the daemon, decoded.
    async fn next_reply(&mut self) -> anyhow::Result<(String, Reply)> {
        let raw = tokio::time::timeout(Duration::from_secs(5), self.replies.recv()).await??;
        let reply = self.runner.security().decode_reply(&raw)?;
        Ok((raw.topic, reply))
    }
}

#[tokio::test]
async fn stats_reports_counters_and_agents() -> anyhow::Result<()> {
    let mut d = start(AgentCatalog::with_builtins(), &["echo", "discovery"]).await?;

    let request_id = d.control("stats")?;
    let (topic, reply) = d.next_reply().await?;

    assert_eq!(topic, CONTROL_REPLY);
    assert_eq!(reply.request_id, request_id);
    assert_eq!(reply.sender_agent, "mcollective");
    let stats = &reply.body["stats"];
    for key in ["start_time", "validated", "unvalidated", "filtered", "passed", "total", "replies"] {
        assert!(stats[key].is_u64(), "missing counter {key}");
    }
    assert_eq!(stats["total"], 1);
    assert_eq!(stats["validated"], 1);
    assert_eq!(stats["passed"], 1);
    assert_eq!(stats["replies"], 0);
    assert_eq!(reply.body["agents"], json!(["discovery", "echo"]));
    assert_eq!(reply.body["pid"], std::process::id());
    Ok(())
}

#[tokio::test]
async fn reload_of_missing_agent_is_silent() -> anyhow::Result<()> {
    let mut d = start(AgentCatalog::with_builtins(), &["echo"]).await?;

    d.control("reload_agent nosuchagent")?;
    let stats_id = d.control("stats")?;

    // The loop is serial: the first reply is the one for `stats`.
    let (_, reply) = d.next_reply().await?;
    assert_eq!(reply.request_id, stats_id);
    assert_eq!(reply.body["stats"]["total"], 2);
    assert_eq!(d.bus.sent_to(CONTROL_REPLY).len(), 1);
    assert!(!d.task.is_finished());
    Ok(())
}

#[tokio::test]
async fn exit_replies_once_then_disconnects() -> anyhow::Result<()> {
    let mut d = start(AgentCatalog::with_builtins(), &["echo"]).await?;

    d.control("exit")?;
    let (_, reply) = d.next_reply().await?;
    let reason = tokio::time::timeout(Duration::from_secs(5), d.task).await???;

    assert_eq!(reply.body, json!("exiting after request to controller"));
    assert_eq!(reason, ExitReason::ControlExit);
    assert_eq!(d.bus.sent_to(CONTROL_REPLY).len(), 1);
    assert_eq!(d.bus.disconnect_count(), 1);
    assert!(!d.bus.is_connected());
    Ok(())
}

#[tokio::test]
async fn interrupt_disconnects() -> anyhow::Result<()> {
    let d = start(AgentCatalog::with_builtins(), &["echo"]).await?;

    d.shutdown.cancel();
    let reason = tokio::time::timeout(Duration::from_secs(5), d.task).await???;

    assert_eq!(reason, ExitReason::Interrupted);
    assert_eq!(d.bus.disconnect_count(), 1);
    assert!(d.bus.sent().is_empty());
    Ok(())
}

#[tokio::test]
async fn echo_request_is_answered() -> anyhow::Result<()> {
    let mut d = start(AgentCatalog::with_builtins(), &["echo"]).await?;

    let request_id =
        d.send_to("mcollective.echo/command", json!({ "action": "echo", "data": { "msg": "hi" } }))?;
    let (topic, reply) = d.next_reply().await?;

    assert_eq!(topic, "mcollective.echo/reply");
    assert_eq!(reply.request_id, request_id);
    assert_eq!(reply.sender_agent, "echo");
    assert_eq!(reply.body["statuscode"], 0);
    assert_eq!(reply.body["data"]["msg"], "hi");

    // The counter is bumped after the send completes.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while d.runner.stats().replies() == 0 {
        anyhow::ensure!(tokio::time::Instant::now() < deadline, "reply never counted");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(d.runner.stats().replies(), 1);
    Ok(())
}

#[tokio::test]
async fn unknown_action_is_a_structured_failure() -> anyhow::Result<()> {
    let mut d = start(AgentCatalog::with_builtins(), &["echo"]).await?;

    d.send_to("mcollective.echo/command", json!({ "action": "shutdown" }))?;
    let (_, reply) = d.next_reply().await?;

    assert_eq!(reply.body["statuscode"], 2);
    assert_eq!(reply.body["statusmsg"], "Unknown action: shutdown");
    Ok(())
}

#[tokio::test]
async fn help_returns_dedented_text() -> anyhow::Result<()> {
    let mut d = start(AgentCatalog::with_builtins(), &["echo"]).await?;

    d.control("help echo")?;
    let (_, reply) = d.next_reply().await?;

    let text = reply.body.as_str().unwrap_or_default();
    assert!(text.starts_with("Echo agent\n"), "{text:?}");
    Ok(())
}

#[tokio::test]
async fn reloads_confirm_and_keep_single_subscriptions() -> anyhow::Result<()> {
    let mut d = start(AgentCatalog::with_builtins(), &["echo", "discovery"]).await?;

    d.control("reload_agent echo")?;
    let (_, reply) = d.next_reply().await?;
    assert_eq!(reply.body, json!("reloaded echo agent"));

    d.control("reload_agents")?;
    let (_, reply) = d.next_reply().await?;
    assert_eq!(reply.body, json!("reloaded all agents"));

    assert_eq!(d.bus.subscription_count("mcollective.echo/command"), 1);
    assert_eq!(d.bus.subscription_count("mcollective.discovery/command"), 1);
    assert_eq!(d.bus.subscription_count(CONTROL), 1);
    Ok(())
}

#[tokio::test]
async fn bad_messages_do_not_stop_the_loop() -> anyhow::Result<()> {
    let mut d = start(AgentCatalog::with_builtins(), &["echo"]).await?;

    d.bus.inject(RawMessage::new(CONTROL, &b"definitely not json"[..]));
    d.control("nonsense command")?;
    d.control("stats")?;

    let (_, reply) = d.next_reply().await?;
    assert_eq!(reply.body["stats"]["total"], 3);
    assert_eq!(reply.body["stats"]["validated"], 2);
    assert_eq!(d.bus.sent().len(), 1);
    Ok(())
}

#[tokio::test]
async fn slow_agent_does_not_block_control() -> anyhow::Result<()> {
    let catalog = catalog(vec![(
        "slow",
        constructor(|| MockAgent::new().with_timeout(Duration::from_secs(120)).delay(Duration::from_secs(60))),
    )]);
    let mut d = start(catalog, &["slow"]).await?;

    d.send_to("mcollective.slow/command", json!("work"))?;
    d.control("stats")?;

    let (topic, reply) = d.next_reply().await?;
    assert_eq!(topic, CONTROL_REPLY);
    assert_eq!(reply.body["in_flight"], 1);
    Ok(())
}
