//! Agent — a remote process running probes and shipping samples (§3).

use super::config_types::FreshnessWindowSecs;
use super::ids::{AgentId, WorkspaceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Remote agent entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    /// Unique agent identifier.
    pub id: AgentId,
    /// Owning workspace.
    pub workspace_id: WorkspaceId,
    /// Display name.
    pub name: String,
    /// Last time this agent was heard from.
    pub last_seen: DateTime<Utc>,
    /// Operator-declared public address override, if any.
    pub public_address_override: Option<String>,
    /// Optional free-form location string.
    pub location: Option<String>,
}

impl Agent {
    /// Whether this agent is online: `last_seen` within `freshness` of `now`.
    #[must_use]
    pub fn is_online(&self, now: DateTime<Utc>, freshness: FreshnessWindowSecs) -> bool {
        let window = chrono::Duration::from_std(freshness.as_duration())
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        now.signed_duration_since(self.last_seen) <= window
    }
}

/// Result of resolving an agent's effective reachable address (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedAddress {
    /// Operator override, or the latest self-reported `NetInfo` address.
    Address(String),
    /// Neither an override nor a usable `NetInfo` sample exists.
    Unavailable,
}

impl ResolvedAddress {
    /// Returns the address string, if resolved.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Address(addr) => Some(addr.as_str()),
            Self::Unavailable => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent_at(last_seen: DateTime<Utc>) -> Agent {
        Agent {
            id: AgentId::generate(),
            workspace_id: WorkspaceId::generate(),
            name: "agent-a".to_string(),
            last_seen,
            public_address_override: None,
            location: None,
        }
    }

    #[test]
    fn online_within_freshness_window() {
        let now = Utc::now();
        let agent = agent_at(now - chrono::Duration::seconds(30));
        assert!(agent.is_online(now, FreshnessWindowSecs::try_new(60).unwrap()));
    }

    #[test]
    fn offline_past_freshness_window() {
        let now = Utc::now();
        let agent = agent_at(now - chrono::Duration::seconds(90));
        assert!(!agent.is_online(now, FreshnessWindowSecs::try_new(60).unwrap()));
    }
}
