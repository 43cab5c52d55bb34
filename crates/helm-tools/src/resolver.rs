//! Per-turn tool resolution.
//!
//! The visible set is rebuilt on every loop iteration:
//!
//! 1. immediate tools, plus deferred tools enabled for the session
//! 2. filtered by the agent's wildcard rules
//! 3. filtered by the request's overrides, which win over agent rules
//!
//! Within one rule set the most specific (longest) matching pattern decides;
//! ties go to the later rule.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use globset::{Glob, GlobMatcher};
use helm_core::ids::SessionId;
use helm_llm::ToolDefinition;
use tracing::debug;

use crate::enablement::ToolEnablement;
use crate::errors::ToolError;
use crate::registry::ToolRegistry;
use crate::traits::Tool;

struct Rule {
    pattern: String,
    matcher: GlobMatcher,
    allow: bool,
}

/// Ordered wildcard allow/deny rules.
#[derive(Default)]
pub struct ToolRules {
    rules: Vec<Rule>,
}

impl ToolRules {
    /// Compile `(pattern, allow)` pairs.
    pub fn new<I, S>(rules: I) -> Result<Self, ToolError>
    where
        I: IntoIterator<Item = (S, bool)>,
        S: Into<String>,
    {
        let mut compiled = Vec::new();
        for (pattern, allow) in rules {
            let pattern = pattern.into();
            let matcher = Glob::new(&pattern)
                .map_err(|e| ToolError::InvalidPattern {
                    pattern: pattern.clone(),
                    message: e.to_string(),
                })?
                .compile_matcher();
            compiled.push(Rule {
                pattern,
                matcher,
                allow,
            });
        }
        compiled.sort_by_key(|r| r.pattern.len());
        Ok(Self { rules: compiled })
    }

    /// Rules that allow everything.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Compile a request's `tool → enabled` override map.
    pub fn from_overrides(overrides: &BTreeMap<String, bool>) -> Result<Self, ToolError> {
        Self::new(overrides.iter().map(|(k, v)| (k.clone(), *v)))
    }

    /// The verdict of the most specific matching rule, if any matches.
    #[must_use]
    pub fn decide(&self, tool: &str) -> Option<bool> {
        self.rules
            .iter()
            .rev()
            .find(|r| r.matcher.is_match(tool))
            .map(|r| r.allow)
    }

    /// Whether there are no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl std::fmt::Debug for ToolRules {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.rules.iter().map(|r| (&r.pattern, r.allow)))
            .finish()
    }
}

/// The tools visible to one model step.
#[derive(Clone, Default)]
pub struct ResolvedTools {
    tools: Vec<Arc<dyn Tool>>,
}

impl ResolvedTools {
    /// Whether `id` is visible.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.tools.iter().any(|t| t.id() == id)
    }

    /// Visible IDs.
    #[must_use]
    pub fn ids(&self) -> HashSet<String> {
        self.tools.iter().map(|t| t.id().to_owned()).collect()
    }

    /// Definitions to send to the model.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    /// Number of visible tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no tool is visible.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Computes [`ResolvedTools`] from the registry and session state.
pub struct ToolResolver {
    registry: Arc<ToolRegistry>,
    enablement: Arc<ToolEnablement>,
}

impl ToolResolver {
    /// Create a resolver.
    #[must_use]
    pub fn new(registry: Arc<ToolRegistry>, enablement: Arc<ToolEnablement>) -> Self {
        Self {
            registry,
            enablement,
        }
    }

    /// Resolve the visible set for one step.
    pub fn resolve(
        &self,
        session_id: &SessionId,
        agent_rules: &ToolRules,
        overrides: &ToolRules,
    ) -> ResolvedTools {
        let enabled = self.enablement.enabled(session_id);
        let tools: Vec<_> = self
            .registry
            .immediate()
            .into_iter()
            .chain(
                self.registry
                    .deferred()
                    .into_iter()
                    .filter(|t| enabled.contains(t.id())),
            )
            .filter(|t| {
                overrides
                    .decide(t.id())
                    .or_else(|| agent_rules.decide(t.id()))
                    .unwrap_or(true)
            })
            .collect();
        debug!(session_id = %session_id, visible = tools.len(), "resolved tools");
        ResolvedTools { tools }
    }

    /// The registry this resolver reads.
    #[must_use]
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// The enablement map this resolver reads.
    #[must_use]
    pub fn enablement(&self) -> &Arc<ToolEnablement> {
        &self.enablement
    }
}
