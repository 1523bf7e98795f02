// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[yare::parameterized(
    indented = { "\n    Echo agent\n\n    Actions:\n      echo", "Echo agent\n\nActions:\n  echo" },
    flat = { "line one\nline two", "line one\nline two" },
    first_line_sets_indent = { "  a\n    b\nc", "a\n  b\nc" },
    empty = { "", "" },
    blank = { "\n   \n", "" },
)]
fn dedent_strips_first_line_indent(input: &str, expected: &str) {
    assert_eq!(dedent(input), expected);
}

#[test]
fn meta_defaults_to_unknown() {
    let meta = AgentMeta::default();
    assert_eq!(meta.license, "Unknown");
    assert_eq!(meta.author, "Unknown");
    assert_eq!(meta.version, "Unknown");
    assert_eq!(meta.url, "Unknown");
}

#[test]
fn partial_meta_fills_unknown() -> anyhow::Result<()> {
    let meta: AgentMeta = serde_json::from_str(r#"{"author": "ops"}"#)?;
    assert_eq!(meta.author, "ops");
    assert_eq!(meta.license, "Unknown");
    Ok(())
}

#[test]
fn builtin_catalog() {
    let catalog = AgentCatalog::with_builtins();
    assert_eq!(catalog.names(), vec!["discovery".to_owned(), "echo".to_owned()]);
    assert!(catalog.get("echo").is_some());
    assert!(catalog.get("package").is_none());
}

#[test]
fn configured_overrides_only_what_is_set() {
    let inner: Arc<dyn Agent> = Arc::new(builtin::echo());
    let wrapped = Configured {
        inner: Arc::clone(&inner),
        timeout: Some(Duration::from_secs(3)),
        help: None,
        meta: None,
    };
    assert_eq!(wrapped.timeout(), Duration::from_secs(3));
    assert_eq!(wrapped.help(), inner.help());
    assert_eq!(wrapped.meta(), inner.meta());
}
