// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Topic naming: `<prefix><sep><agent>/command` and `<prefix><sep><agent>/reply`.

/// Agent name reserved for the daemon's own control topic.
pub const CONTROL_AGENT: &str = "mcollective";

/// Direction of a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    Command,
    Reply,
}

impl TopicKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Reply => "reply",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    prefix: String,
    sep: String,
}

impl Topics {
    pub fn new(prefix: impl Into<String>, sep: impl Into<String>) -> Self {
        Self { prefix: prefix.into(), sep: sep.into() }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn make(&self, agent: &str, kind: TopicKind) -> String {
        format!("{}{}{}/{}", self.prefix, self.sep, agent, kind.as_str())
    }

    pub fn command(&self, agent: &str) -> String {
        self.make(agent, TopicKind::Command)
    }

    pub fn reply(&self, agent: &str) -> String {
        self.make(agent, TopicKind::Reply)
    }

    pub fn control_command(&self) -> String {
        self.command(CONTROL_AGENT)
    }

    pub fn control_reply(&self) -> String {
        self.reply(CONTROL_AGENT)
    }

    /// Extract the agent name from a command destination.
    pub fn agent_for_command<'a>(&self, destination: &'a str) -> Option<&'a str> {
        let rest = destination.strip_prefix(self.prefix.as_str())?;
        let rest = rest.strip_prefix(self.sep.as_str())?;
        let agent = rest.strip_suffix("/command")?;
        if agent.is_empty() || agent.contains('/') {
            return None;
        }
        Some(agent)
    }

    pub fn is_control(&self, destination: &str) -> bool {
        self.agent_for_command(destination) == Some(CONTROL_AGENT)
    }
}

#[cfg(test)]
#[path = "topic_tests.rs"]
mod tests;
