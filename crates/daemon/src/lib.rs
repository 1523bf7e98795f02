// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

pub mod agent;
pub mod config;
pub mod connector;
pub mod error;
pub mod filter;
pub mod message;
pub mod plugin;
pub mod runner;
pub mod security;
pub mod stats;
pub mod test_support;
pub mod topic;
