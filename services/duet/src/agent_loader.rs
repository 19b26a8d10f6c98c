//! Loads an agent definition from a markdown file.
//!
//! ```text
//! name: chatAgent
//! voice: sage
//! ---
//! You are a helpful customer service agent...
//! ```
//!
//! Header keys are `name` and `voice`; everything after `---` is the instructions.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use duet_core::agent::AgentDefinition;
use duet_core::types::audio::Voice;

pub fn load_agent(path: &Path) -> Result<AgentDefinition> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read agent file: {}", path.display()))?;
    parse_agent(&content).with_context(|| format!("Invalid agent file: {}", path.display()))
}

/// Loads `path` when given, otherwise the built-in agent.
pub fn load_agent_or_default(path: Option<&Path>) -> Result<AgentDefinition> {
    match path {
        Some(path) => load_agent(path),
        None => Ok(AgentDefinition::default()),
    }
}

pub fn parse_agent(content: &str) -> Result<AgentDefinition> {
    let mut agent = AgentDefinition::default();
    let mut lines = content.lines();
    let mut terminated = false;

    for line in lines.by_ref() {
        let line = line.trim();
        if line == "---" {
            terminated = true;
            break;
        }
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            bail!("expected `key: value` in header, got {:?}", line);
        };
        let value = value.trim();
        match key.trim() {
            "name" => agent.name = value.to_string(),
            "voice" => agent.voice = Voice::from(value),
            other => tracing::warn!("ignoring unknown agent header key: {}", other),
        }
    }
    if !terminated {
        bail!("header is not terminated by `---`");
    }

    let instructions = lines.collect::<Vec<_>>().join("\n");
    let instructions = instructions.trim();
    if instructions.is_empty() {
        bail!("agent instructions are empty");
    }
    agent.instructions = instructions.to_string();
    Ok(agent)
}
