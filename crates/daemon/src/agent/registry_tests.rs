// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde_json::json;

use super::*;
use crate::connector::MemoryConnector;
use crate::test_support::{
    agent_dir, catalog, constructor, generational, request, write_manifest, MockAgent, MockOutcome,
};

struct Fixture {
    _libdir: tempfile::TempDir,
    dir: PathBuf,
    bus: Arc<MemoryConnector>,
    plugins: Arc<PluginRegistry>,
    agents: Agents,
}

fn fixture(catalog: AgentCatalog) -> anyhow::Result<Fixture> {
    let libdir = tempfile::tempdir()?;
    let dir = agent_dir(libdir.path())?;
    let bus = Arc::new(MemoryConnector::new());
    let plugins = Arc::new(PluginRegistry::new());
    let connector: Arc<dyn Connector> = Arc::clone(&bus) as Arc<dyn Connector>;
    let agents = Agents::new(
        &dir,
        Topics::new("mcollective", "."),
        Arc::clone(&plugins),
        connector,
        catalog,
    );
    Ok(Fixture { _libdir: libdir, dir, bus, plugins, agents })
}

/// Reply callback that counts its invocations.
fn counting() -> (Arc<AtomicU32>, impl FnOnce(Value) -> futures_util::future::Ready<()>) {
    let count = Arc::new(AtomicU32::new(0));
    let c = Arc::clone(&count);
    (count, move |_reply: Value| {
        c.fetch_add(1, Ordering::SeqCst);
        futures_util::future::ready(())
    })
}

#[tokio::test]
async fn missing_directory_is_fatal() -> anyhow::Result<()> {
    let f = fixture(AgentCatalog::with_builtins())?;
    std::fs::remove_dir(&f.dir)?;
    let err = f.agents.load_all().await.unwrap_err();
    assert!(matches!(err, Error::DirectoryNotFound(_)));
    Ok(())
}

#[tokio::test]
async fn load_all_registers_and_subscribes() -> anyhow::Result<()> {
    let f = fixture(AgentCatalog::with_builtins())?;
    write_manifest(&f.dir, "echo", &json!({}))?;
    write_manifest(&f.dir, "discovery", &json!({}))?;
    std::fs::write(f.dir.join("README.txt"), "not a manifest")?;

    f.agents.load_all().await?;

    assert_eq!(f.agents.agent_names(), vec!["discovery".to_owned(), "echo".to_owned()]);
    assert!(f.agents.contains("echo"));
    assert!(f.plugins.has("echo_agent"));
    assert_eq!(f.bus.subscription_count("mcollective.echo/command"), 1);
    assert_eq!(f.bus.subscription_count("mcollective.discovery/command"), 1);
    Ok(())
}

#[tokio::test]
async fn full_reload_is_idempotent() -> anyhow::Result<()> {
    let f = fixture(AgentCatalog::with_builtins())?;
    write_manifest(&f.dir, "echo", &json!({}))?;
    write_manifest(&f.dir, "discovery", &json!({}))?;

    f.agents.load_all().await?;
    let names = f.agents.agent_names();
    let topics = f.bus.subscriptions();

    f.agents.load_all().await?;

    assert_eq!(f.agents.agent_names(), names);
    assert_eq!(f.bus.subscriptions(), topics);
    for topic in &topics {
        assert_eq!(f.bus.subscription_count(topic), 1, "{topic}");
    }
    Ok(())
}

#[tokio::test]
async fn reload_drops_removed_agents() -> anyhow::Result<()> {
    let f = fixture(AgentCatalog::with_builtins())?;
    write_manifest(&f.dir, "echo", &json!({}))?;
    let discovery = write_manifest(&f.dir, "discovery", &json!({}))?;
    f.agents.load_all().await?;

    std::fs::remove_file(discovery)?;
    f.agents.load_all().await?;

    assert_eq!(f.agents.agent_names(), vec!["echo".to_owned()]);
    assert!(!f.plugins.has("discovery_agent"));
    assert_eq!(f.bus.subscription_count("mcollective.discovery/command"), 0);
    Ok(())
}

#[tokio::test]
async fn broken_manifest_is_skipped() -> anyhow::Result<()> {
    let f = fixture(AgentCatalog::with_builtins())?;
    write_manifest(&f.dir, "echo", &json!({}))?;
    write_manifest(&f.dir, "package", &json!({}))?;
    std::fs::write(f.dir.join("garbled.json"), "{")?;

    f.agents.load_all().await?;

    assert_eq!(f.agents.agent_names(), vec!["echo".to_owned()]);
    Ok(())
}

#[tokio::test]
async fn load_one_reports_absence() -> anyhow::Result<()> {
    let f = fixture(AgentCatalog::with_builtins())?;
    assert!(!f.agents.load_one("nosuchagent").await?);
    assert!(!f.agents.load_one("../etc/passwd").await?);
    assert!(f.bus.subscriptions().is_empty());
    Ok(())
}

#[tokio::test]
async fn load_one_twice_subscribes_once() -> anyhow::Result<()> {
    let (ctor, generation) = generational(Duration::ZERO);
    let f = fixture(catalog(vec![("versioned", ctor)]))?;
    write_manifest(&f.dir, "versioned", &json!({}))?;

    assert!(f.agents.load_one("versioned").await?);
    assert!(f.agents.load_one("versioned").await?);

    assert_eq!(generation.load(Ordering::SeqCst), 2);
    assert_eq!(f.bus.subscription_count("mcollective.versioned/command"), 1);
    Ok(())
}

#[tokio::test]
async fn help_is_dedented() -> anyhow::Result<()> {
    let f = fixture(catalog(vec![(
        "doc",
        constructor(|| MockAgent::new().with_help("\n    Doc agent\n      usage: doc")),
    )]))?;
    write_manifest(&f.dir, "doc", &json!({}))?;
    f.agents.load_all().await?;

    assert_eq!(f.agents.help("doc")?, "Doc agent\n  usage: doc");
    assert!(matches!(f.agents.help("nope"), Err(Error::UnknownAgent(_))));
    Ok(())
}

#[tokio::test]
async fn dispatch_unknown_agent() -> anyhow::Result<()> {
    let f = fixture(AgentCatalog::with_builtins())?;
    let (_count, on_reply) = counting();
    let err = f.agents.dispatch(request("ghost", json!("x")), "ghost", on_reply).unwrap_err();
    assert!(matches!(err, Error::UnknownAgent(ref name) if name == "ghost"));
    Ok(())
}

#[tokio::test]
async fn dispatch_delivers_reply() -> anyhow::Result<()> {
    let f = fixture(AgentCatalog::with_builtins())?;
    write_manifest(&f.dir, "echo", &json!({}))?;
    f.agents.load_all().await?;

    let (tx, rx) = tokio::sync::oneshot::channel();
    let body = json!({ "action": "echo", "data": { "msg": "hi" } });
    let handle = f.agents.dispatch(request("echo", body), "echo", move |reply| async move {
        let _ = tx.send(reply);
    })?;

    assert_eq!(handle.await?, DispatchOutcome::Replied);
    assert_eq!(rx.await?["data"]["msg"], "hi");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn reply_just_under_the_bound() -> anyhow::Result<()> {
    let f = fixture(catalog(vec![(
        "slow",
        constructor(|| {
            MockAgent::new().with_timeout(Duration::from_secs(10)).delay(Duration::from_millis(9_900))
        }),
    )]))?;
    write_manifest(&f.dir, "slow", &json!({}))?;
    f.agents.load_all().await?;

    let (count, on_reply) = counting();
    let outcome = f.agents.dispatch(request("slow", json!("x")), "slow", on_reply)?.await?;

    assert_eq!(outcome, DispatchOutcome::Replied);
    assert_eq!(count.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn timeout_suppresses_reply() -> anyhow::Result<()> {
    let f = fixture(catalog(vec![(
        "slow",
        constructor(|| {
            MockAgent::new().with_timeout(Duration::from_secs(10)).delay(Duration::from_millis(10_100))
        }),
    )]))?;
    write_manifest(&f.dir, "slow", &json!({}))?;
    f.agents.load_all().await?;

    let (count, on_reply) = counting();
    let outcome = f.agents.dispatch(request("slow", json!("x")), "slow", on_reply)?.await?;

    assert_eq!(outcome, DispatchOutcome::TimedOut);
    assert_eq!(count.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn manifest_timeout_overrides_agent() -> anyhow::Result<()> {
    let f = fixture(catalog(vec![(
        "slow",
        constructor(|| MockAgent::new().delay(Duration::from_secs(3))),
    )]))?;
    write_manifest(&f.dir, "slow", &json!({ "timeout_secs": 1 }))?;
    f.agents.load_all().await?;

    let (count, on_reply) = counting();
    let outcome = f.agents.dispatch(request("slow", json!("x")), "slow", on_reply)?.await?;

    assert_eq!(outcome, DispatchOutcome::TimedOut);
    assert_eq!(count.load(Ordering::SeqCst), 0);
    Ok(())
}

async fn silent_outcome(outcome: MockOutcome) -> anyhow::Result<(DispatchOutcome, u32)> {
    let f = fixture(catalog(vec![("quiet", constructor(move || MockAgent::new().outcome(outcome.clone())))]))?;
    write_manifest(&f.dir, "quiet", &json!({}))?;
    f.agents.load_all().await?;

    let (count, on_reply) = counting();
    let result = f.agents.dispatch(request("quiet", json!("x")), "quiet", on_reply)?.await?;
    Ok((result, count.load(Ordering::SeqCst)))
}

#[tokio::test]
async fn no_reply_sentinel_skips_callback() -> anyhow::Result<()> {
    assert_eq!(silent_outcome(MockOutcome::NoReply).await?, (DispatchOutcome::NoReply, 0));
    Ok(())
}

#[tokio::test]
async fn handler_failure_skips_callback() -> anyhow::Result<()> {
    let outcome = silent_outcome(MockOutcome::Fail("disk full".into())).await?;
    assert_eq!(outcome, (DispatchOutcome::Failed, 0));
    Ok(())
}

#[tokio::test]
async fn null_payload_is_no_reply() -> anyhow::Result<()> {
    let outcome = silent_outcome(MockOutcome::Reply(Value::Null)).await?;
    assert_eq!(outcome, (DispatchOutcome::NoReply, 0));
    Ok(())
}

#[tokio::test]
async fn handler_panic_is_contained() -> anyhow::Result<()> {
    let f = fixture(catalog(vec![
        ("crashy", constructor(|| MockAgent::new().outcome(MockOutcome::Panic("index out of bounds".into())))),
        ("steady", constructor(MockAgent::new)),
    ]))?;
    write_manifest(&f.dir, "crashy", &json!({}))?;
    write_manifest(&f.dir, "steady", &json!({}))?;
    f.agents.load_all().await?;

    let (count, on_reply) = counting();
    let outcome = f.agents.dispatch(request("crashy", json!("x")), "crashy", on_reply)?.await?;
    assert_eq!(outcome, DispatchOutcome::Failed);
    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert_eq!(f.agents.in_flight(), 0);

    // Other agents keep working afterwards.
    let (count, on_reply) = counting();
    let outcome = f.agents.dispatch(request("steady", json!("x")), "steady", on_reply)?.await?;
    assert_eq!(outcome, DispatchOutcome::Replied);
    assert_eq!(count.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn in_flight_tracks_running_dispatches() -> anyhow::Result<()> {
    let f = fixture(catalog(vec![(
        "slow",
        constructor(|| MockAgent::new().delay(Duration::from_secs(1))),
    )]))?;
    write_manifest(&f.dir, "slow", &json!({}))?;
    f.agents.load_all().await?;

    let (_a, on_a) = counting();
    let (_b, on_b) = counting();
    let first = f.agents.dispatch(request("slow", json!("x")), "slow", on_a)?;
    let second = f.agents.dispatch(request("slow", json!("x")), "slow", on_b)?;
    assert_eq!(f.agents.in_flight(), 2);

    first.await?;
    second.await?;
    assert_eq!(f.agents.in_flight(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn reload_during_dispatch_keeps_old_handler() -> anyhow::Result<()> {
    let (ctor, _generation) = generational(Duration::from_secs(5));
    let f = fixture(catalog(vec![("versioned", ctor)]))?;
    write_manifest(&f.dir, "versioned", &json!({}))?;
    f.agents.load_all().await?;

    let (old_tx, old_rx) = tokio::sync::oneshot::channel();
    let old = f.agents.dispatch(request("versioned", json!("x")), "versioned", move |r| async move {
        let _ = old_tx.send(r);
    })?;
    tokio::task::yield_now().await;

    assert!(f.agents.load_one("versioned").await?);

    let (new_tx, new_rx) = tokio::sync::oneshot::channel();
    let new = f.agents.dispatch(request("versioned", json!("x")), "versioned", move |r| async move {
        let _ = new_tx.send(r);
    })?;

    assert_eq!(old.await?, DispatchOutcome::Replied);
    assert_eq!(new.await?, DispatchOutcome::Replied);
    assert_eq!(old_rx.await?, json!({ "generation": 1 }));
    assert_eq!(new_rx.await?, json!({ "generation": 2 }));
    assert_eq!(f.bus.subscription_count("mcollective.versioned/command"), 1);
    Ok(())
}

#[tokio::test]
async fn command_topics_follow_live_set() -> anyhow::Result<()> {
    let f = fixture(AgentCatalog::with_builtins())?;
    write_manifest(&f.dir, "echo", &json!({}))?;
    f.agents.load_all().await?;

    assert_eq!(f.agents.command_topics(), vec!["mcollective.echo/command".to_owned()]);
    let record = f.agents.record("echo");
    assert_eq!(record.map(|r| r.manifest), Some(f.dir.join("echo.json")));
    assert_eq!(f.agents.agent_dir(), f.dir.as_path());
    Ok(())
}
