//! Probe and Target — monitoring job definitions (§3).

use super::ids::{AgentId, ProbeId, TargetId, WorkspaceId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Kind of probe a job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProbeKind {
    /// ICMP ping sweep.
    Ping,
    /// MTR traceroute.
    Mtr,
    /// Synthetic round-trip probe between two agents.
    Rperf,
    /// Bandwidth/throughput test.
    Speedtest,
    /// Host/public-address/ISP facts.
    NetInfo,
    /// Host resource facts (CPU, memory).
    SysInfo,
    /// Continuous synthetic UDP traffic simulation.
    TrafficSim,
    /// Meta-probe expanded into concrete per-kind probes against a peer agent.
    Agent,
}

impl ProbeKind {
    /// `true` for probe kinds the Alert Bridge is wired to evaluate on
    /// arrival (§4.2, "Kinds that fan out to alerts").
    #[must_use]
    pub fn fans_out_to_alerts(self) -> bool {
        matches!(
            self,
            Self::Ping | Self::TrafficSim | Self::Mtr | Self::SysInfo
        )
    }
}

/// Either a literal address, or a reference to another agent whose resolved
/// public address is substituted at dispatch time (§3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetRef {
    /// A literal `host` or `host:port`.
    Literal(String),
    /// Reference to another agent, resolved at dispatch.
    Agent(AgentId),
}

/// A single measurement target belonging to exactly one probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Unique target identifier.
    pub id: TargetId,
    /// Owning probe.
    pub probe_id: ProbeId,
    /// The literal address or agent reference (never both, see `TargetRef`).
    pub target: TargetRef,
}

impl Target {
    /// Returns the literal string for duplicate-detection / display purposes,
    /// if this target is a literal (agent-reference targets compare by id).
    #[must_use]
    pub fn literal_str(&self) -> Option<&str> {
        match &self.target {
            TargetRef::Literal(s) => Some(s.as_str()),
            TargetRef::Agent(_) => None,
        }
    }
}

/// A monitoring job owned by (workspace, agent).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Probe {
    /// Unique probe identifier.
    pub id: ProbeId,
    /// Owning workspace.
    pub workspace_id: WorkspaceId,
    /// Owning agent.
    pub agent_id: AgentId,
    /// Probe kind.
    pub kind: ProbeKind,
    /// Whether this probe is currently scheduled.
    pub enabled: bool,
    /// Interval between runs, in seconds.
    pub interval_secs: u32,
    /// Per-run timeout, in seconds.
    pub timeout_secs: u32,
    /// Optional packet/iteration count.
    pub count: Option<u32>,
    /// Optional run duration, in seconds.
    pub duration_secs: Option<u32>,
    /// Whether this probe runs a server (e.g. a `TRAFFICSIM` listener).
    pub server_mode: bool,
    /// Free-form operator label.
    pub label: Option<String>,
    /// Free-form metadata.
    pub metadata: HashMap<String, String>,
    /// Ordered targets. Invariant: never empty.
    pub targets: Vec<Target>,
    /// Server port, meaningful only when `server_mode` is set (used to
    /// resolve `public-address(T):T.server-port` for meta-probe expansion).
    pub server_port: Option<u16>,
}

impl Probe {
    /// `true` when the probe has at least one target, the structural
    /// invariant every probe must satisfy (§8).
    #[must_use]
    pub fn has_targets(&self) -> bool {
        !self.targets.is_empty()
    }

    /// Returns the set of literal target strings and referenced agent ids,
    /// used for duplicate-probe detection on (agent, kind, target-set).
    #[must_use]
    pub fn target_fingerprint(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .targets
            .iter()
            .map(|t| match &t.target {
                TargetRef::Literal(s) => format!("lit:{s}"),
                TargetRef::Agent(a) => format!("agent:{a}"),
            })
            .collect();
        out.sort();
        out
    }
}
