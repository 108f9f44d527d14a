//! Graph-construction policy: exactly one per run.

use serde::{Deserialize, Serialize};

use crate::error::{GroundGenError, Result};

/// Which linguistic structure becomes the edge set of the document graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GraphPolicy {
    /// Dependency arcs, head -> dependent. The "default" graph.
    Dependency,
    /// Coreference chains.
    Coreference,
    /// Entity spans.
    Entity,
    /// Co-occurrence inside a sliding window of `window` tokens.
    Lexical { window: usize },
}

impl GraphPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            GraphPolicy::Dependency => "default",
            GraphPolicy::Coreference => "coreference",
            GraphPolicy::Entity => "entity",
            GraphPolicy::Lexical { .. } => "lexical",
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let GraphPolicy::Lexical { window } = self {
            if *window == 0 {
                return Err(GroundGenError::config("lexical graph window must be >= 1"));
            }
        }
        Ok(())
    }
}

impl Default for GraphPolicy {
    fn default() -> Self {
        GraphPolicy::Dependency
    }
}

/// Flat boolean switches as they arrive from a command line or a legacy
/// config file. Resolved once into a [`GraphPolicy`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphPolicyFlags {
    pub default: bool,
    pub coreference: bool,
    pub entity: bool,
    pub lexical: bool,
    pub lexical_window: usize,
}

impl GraphPolicyFlags {
    /// No flag selects the dependency graph; two or more are rejected.
    pub fn resolve(&self) -> Result<GraphPolicy> {
        let mut selected = Vec::new();
        if self.default {
            selected.push("default");
        }
        if self.coreference {
            selected.push("coreference");
        }
        if self.entity {
            selected.push("entity");
        }
        if self.lexical {
            selected.push("lexical");
        }
        if selected.len() > 1 {
            return Err(GroundGenError::ConflictingGraphPolicies(selected));
        }

        let policy = match selected.first().copied() {
            Some("coreference") => GraphPolicy::Coreference,
            Some("entity") => GraphPolicy::Entity,
            Some("lexical") => GraphPolicy::Lexical {
                window: self.lexical_window,
            },
            _ => GraphPolicy::Dependency,
        };
        policy.validate()?;
        Ok(policy)
    }
}
