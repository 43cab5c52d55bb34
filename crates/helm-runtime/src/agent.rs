//! Agent definitions.
//!
//! An agent bundles a system prompt, an optional model, ordered tool rules
//! and a step cap. The catalog ships two primary agents: `build` sees every
//! tool, `plan` cannot edit files or run shell commands.

use std::collections::BTreeMap;

use helm_core::messages::ModelRef;
use helm_tools::{ToolError, ToolRules};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::errors::RuntimeError;

/// Agent used when a prompt names none.
pub const DEFAULT_AGENT: &str = "build";

/// Where an agent may be used.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    /// Interactive sessions.
    Primary,
    /// Background tasks only.
    Subagent,
    /// Both.
    #[default]
    All,
}

/// One agent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDefinition {
    /// Unique name.
    pub name: String,
    /// One-line description.
    pub description: String,
    /// Model override; the configured default is used otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelRef>,
    /// System prompt sections.
    #[serde(default)]
    pub system_prompt: Vec<String>,
    /// Ordered `(wildcard, allow)` tool rules.
    #[serde(default)]
    pub tools: Vec<(String, bool)>,
    /// Maximum model steps per prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<u32>,
    /// Where the agent may be used.
    #[serde(default)]
    pub mode: AgentMode,
}

impl AgentDefinition {
    /// An agent with no prompt, no rules and no step cap.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            model: None,
            system_prompt: Vec::new(),
            tools: Vec::new(),
            max_steps: None,
            mode: AgentMode::All,
        }
    }

    /// Add a tool rule.
    #[must_use]
    pub fn with_tool_rule(mut self, pattern: impl Into<String>, allow: bool) -> Self {
        self.tools.push((pattern.into(), allow));
        self
    }

    /// Pin a model.
    #[must_use]
    pub fn with_model(mut self, model: ModelRef) -> Self {
        self.model = Some(model);
        self
    }

    /// Add a system prompt section.
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt.push(prompt.into());
        self
    }

    /// Cap model steps per prompt.
    #[must_use]
    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    /// Restrict where the agent may be used.
    #[must_use]
    pub fn with_mode(mut self, mode: AgentMode) -> Self {
        self.mode = mode;
        self
    }

    /// Compile the tool rules.
    pub fn rules(&self) -> Result<ToolRules, ToolError> {
        ToolRules::new(self.tools.iter().map(|(p, allow)| (p.clone(), *allow)))
    }
}

/// Registered agents, keyed by name.
#[derive(Default)]
pub struct AgentCatalog {
    agents: RwLock<BTreeMap<String, AgentDefinition>>,
}

impl AgentCatalog {
    /// An empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in `build` and `plan` agents. `plan` is interactive only.
    #[must_use]
    pub fn builtin() -> Self {
        let catalog = Self::new();
        catalog.register(AgentDefinition::new(DEFAULT_AGENT, "Default agent with access to every tool."));
        catalog.register(
            AgentDefinition::new("plan", "Read-only agent for exploring and planning changes.")
                .with_tool_rule("edit*", false)
                .with_tool_rule("write*", false)
                .with_tool_rule("bash", false)
                .with_mode(AgentMode::Primary),
        );
        catalog
    }

    /// Add or replace an agent.
    pub fn register(&self, agent: AgentDefinition) {
        let _ = self.agents.write().insert(agent.name.clone(), agent);
    }

    /// Look up an agent.
    pub fn get(&self, name: &str) -> Result<AgentDefinition, RuntimeError> {
        self.agents
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::AgentNotFound(name.to_owned()))
    }

    /// All agents, sorted by name.
    #[must_use]
    pub fn list(&self) -> Vec<AgentDefinition> {
        self.agents.read().values().cloned().collect()
    }
}
