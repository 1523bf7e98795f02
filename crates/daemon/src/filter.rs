// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Decides whether a broadcast request is addressed to this node.
//!
//! [`LocalFilter`] understands two kinds:
//! - `identity`: passes if any criterion matches this node's identity.
//! - `agent`: passes if every criterion matches a loaded agent.
//!
//! A criterion written `/re/` is a regular expression, anything else is
//! compared literally. Kinds this core has no data for (facts, classes)
//! never match. Kinds with no criteria are ignored.

use std::collections::BTreeSet;
use std::sync::Arc;

use regex::Regex;
use tracing::debug;

use crate::message::Filter;

pub trait FilterPredicate: Send + Sync {
    fn matches(&self, filter: &Filter) -> bool;
}

/// Addresses every node.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl FilterPredicate for AcceptAll {
    fn matches(&self, _filter: &Filter) -> bool {
        true
    }
}

/// Source of the currently loaded agent names.
pub trait AgentPresence: Send + Sync {
    fn agent_names(&self) -> Vec<String>;
}

impl AgentPresence for BTreeSet<String> {
    fn agent_names(&self) -> Vec<String> {
        self.iter().cloned().collect()
    }
}

pub struct LocalFilter {
    identity: String,
    agents: Arc<dyn AgentPresence>,
}

impl LocalFilter {
    pub fn new(identity: impl Into<String>, agents: Arc<dyn AgentPresence>) -> Self {
        Self { identity: identity.into(), agents }
    }
}

impl FilterPredicate for LocalFilter {
    fn matches(&self, filter: &Filter) -> bool {
        for (kind, criteria) in filter {
            if criteria.is_empty() {
                continue;
            }
            let ok = match kind.as_str() {
                "identity" => criteria.iter().any(|c| criterion_matches(c, &self.identity)),
                "agent" => {
                    let names = self.agents.agent_names();
                    criteria.iter().all(|c| {
                        let criterion = Criterion::parse(c);
                        names.iter().any(|name| criterion.matches(name))
                    })
                }
                other => {
                    debug!(kind = other, "unsupported filter kind, not addressed");
                    false
                }
            };
            if !ok {
                return false;
            }
        }
        true
    }
}

/// One filter criterion, compiled once and matched against many values.
#[derive(Debug)]
pub enum Criterion<'a> {
    Literal(&'a str),
    Pattern(Regex),
    /// A `/re/` criterion that failed to compile; matches nothing.
    Invalid,
}

impl<'a> Criterion<'a> {
    pub fn parse(criterion: &'a str) -> Self {
        match criterion.strip_prefix('/').and_then(|c| c.strip_suffix('/')) {
            Some(pattern) => match Regex::new(pattern) {
                Ok(re) => Self::Pattern(re),
                Err(e) => {
                    debug!(pattern, "invalid filter regex: {e}");
                    Self::Invalid
                }
            },
            None => Self::Literal(criterion),
        }
    }

    pub fn matches(&self, value: &str) -> bool {
        match self {
            Self::Literal(literal) => *literal == value,
            Self::Pattern(re) => re.is_match(value),
            Self::Invalid => false,
        }
    }
}

/// `/re/` criteria are regular expressions; anything else must equal
/// `value` exactly. An invalid regex matches nothing.
pub fn criterion_matches(criterion: &str, value: &str) -> bool {
    Criterion::parse(criterion).matches(value)
}

#[cfg(test)]
#[path = "filter_tests.rs"]
mod tests;
