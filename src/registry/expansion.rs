//! Dispatch-time expansion: meta-probe (`AGENT`) fan-out and agent-target
//! literal resolution (§4.1 "Dispatch expansion", "Agent-address
//! resolution").

use super::RegistryError;
use crate::domain::{AgentId, NetInfoPayload, Probe, ProbeKind, Target, TargetId, TargetRef};
use async_trait::async_trait;
use tracing::warn;

/// Boundary for resolving an agent's latest self-reported `NetInfo`
/// address, implemented by the columnar query layer. Kept as a trait so
/// the registry never depends on the columnar store directly.
#[async_trait]
pub trait NetInfoLookup: Send + Sync {
    /// Returns the most recent decoded `NetInfo` payload for `agent_id`, if
    /// any sample has arrived.
    async fn latest_netinfo(
        &self,
        agent_id: AgentId,
    ) -> Result<Option<NetInfoPayload>, RegistryError>;
}

/// Resolves an agent's effective reachable address: override, else the
/// latest self-reported `NetInfo` public address, else `None` (§3 "An
/// agent's effective reachable address").
///
/// Never defaults a missing address (§4.1 "on failure the target is
/// dropped from dispatch and logged — never defaulted").
pub async fn resolve_agent_address(
    agent: &crate::domain::Agent,
    netinfo: &dyn NetInfoLookup,
) -> Option<String> {
    if let Some(override_addr) = &agent.public_address_override {
        return Some(override_addr.clone());
    }
    match netinfo.latest_netinfo(agent.id).await {
        Ok(Some(payload)) => Some(payload.public_address),
        Ok(None) => {
            warn!(agent_id = %agent.id, "no NetInfo sample available, dropping target from dispatch");
            None
        }
        Err(e) => {
            warn!(agent_id = %agent.id, error = %e, "NetInfo lookup failed, dropping target from dispatch");
            None
        }
    }
}

/// One synthetic dispatch-ready probe produced by expanding a parent probe.
/// Shares the parent's probe id so resulting samples correlate (§4.1).
#[derive(Debug, Clone)]
pub struct DispatchProbe {
    /// The parent probe id every synthetic probe shares.
    pub probe_id: crate::domain::ProbeId,
    /// Kind to actually run.
    pub kind: ProbeKind,
    /// Resolved literal target.
    pub target: String,
}

/// Whether a target in an `AGENT` meta-probe's peer runs a `TRAFFICSIM`
/// server; supplied by the caller since it requires a sibling-probe lookup
/// the registry store already has cached from `list_probes_for_agent`.
pub struct PeerServerInfo {
    /// The peer agent id.
    pub agent_id: AgentId,
    /// `TRAFFICSIM` server port, if the peer runs one in server mode.
    pub trafficsim_server_port: Option<u16>,
}

/// Expands one probe into its dispatch-ready form (§4.1 "Dispatch
/// expansion"):
/// - `AGENT` kind fans out into one `MTR`, one `PING`, and (only when the
///   peer runs a `TRAFFICSIM` server) one `TRAFFICSIM` probe per agent
///   target, all sharing the parent probe id.
/// - `MTR`/`PING` with an unresolved agent-reference target get the
///   literal resolved in place.
/// - Everything else passes through unchanged.
pub async fn expand_for_dispatch(
    probe: &Probe,
    netinfo: &dyn NetInfoLookup,
    agents: &dyn Fn(AgentId) -> Option<crate::domain::Agent>,
    peers: &[PeerServerInfo],
) -> Vec<DispatchProbe> {
    match probe.kind {
        ProbeKind::Agent => expand_agent_meta_probe(probe, netinfo, agents, peers).await,
        ProbeKind::Mtr | ProbeKind::Ping => resolve_single_kind_targets(probe, netinfo, agents).await,
        other => probe
            .targets
            .iter()
            .filter_map(|t| t.literal_str().map(ToString::to_string))
            .map(|target| DispatchProbe {
                probe_id: probe.id,
                kind: other,
                target,
            })
            .collect(),
    }
}

async fn expand_agent_meta_probe(
    probe: &Probe,
    netinfo: &dyn NetInfoLookup,
    agents: &dyn Fn(AgentId) -> Option<crate::domain::Agent>,
    peers: &[PeerServerInfo],
) -> Vec<DispatchProbe> {
    let mut out = Vec::new();
    for target in &probe.targets {
        let TargetRef::Agent(peer_id) = &target.target else {
            continue;
        };
        let Some(peer_agent) = agents(*peer_id) else {
            warn!(agent_id = %peer_id, "AGENT meta-probe references unknown agent, skipping");
            continue;
        };
        let Some(address) = resolve_agent_address(&peer_agent, netinfo).await else {
            continue;
        };
        out.push(DispatchProbe {
            probe_id: probe.id,
            kind: ProbeKind::Mtr,
            target: address.clone(),
        });
        out.push(DispatchProbe {
            probe_id: probe.id,
            kind: ProbeKind::Ping,
            target: address.clone(),
        });
        if let Some(port) = peers
            .iter()
            .find(|p| p.agent_id == *peer_id)
            .and_then(|p| p.trafficsim_server_port)
        {
            out.push(DispatchProbe {
                probe_id: probe.id,
                kind: ProbeKind::TrafficSim,
                target: format!("{address}:{port}"),
            });
        }
    }
    out
}

async fn resolve_single_kind_targets(
    probe: &Probe,
    netinfo: &dyn NetInfoLookup,
    agents: &dyn Fn(AgentId) -> Option<crate::domain::Agent>,
) -> Vec<DispatchProbe> {
    let mut out = Vec::new();
    for target in &probe.targets {
        let resolved = match &target.target {
            TargetRef::Literal(literal) => Some(literal.clone()),
            TargetRef::Agent(agent_id) => {
                let Some(agent) = agents(*agent_id) else {
                    warn!(agent_id = %agent_id, "target agent unknown, skipping");
                    continue;
                };
                resolve_agent_address(&agent, netinfo).await
            }
        };
        if let Some(target) = resolved {
            out.push(DispatchProbe {
                probe_id: probe.id,
                kind: probe.kind,
                target,
            });
        }
    }
    out
}

/// Used by a target-literal accessor that needs a stable placeholder id
/// when constructing ad-hoc targets outside the registry store (kept for
/// downstream callers that assemble [`Target`] values directly from
/// resolved dispatch addresses).
#[must_use]
pub fn synthetic_target(probe_id: crate::domain::ProbeId, literal: String) -> Target {
    Target {
        id: TargetId::generate(),
        probe_id,
        target: TargetRef::Literal(literal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Agent, ProbeId, WorkspaceId};
    use chrono::Utc;
    use std::collections::HashMap;

    struct FakeNetInfo(Option<NetInfoPayload>);

    #[async_trait]
    impl NetInfoLookup for FakeNetInfo {
        async fn latest_netinfo(
            &self,
            _agent_id: AgentId,
        ) -> Result<Option<NetInfoPayload>, RegistryError> {
            Ok(self.0.clone())
        }
    }

    fn agent_with_override(id: AgentId, addr: Option<&str>) -> Agent {
        Agent {
            id,
            workspace_id: WorkspaceId::generate(),
            name: "peer".to_string(),
            last_seen: Utc::now(),
            public_address_override: addr.map(ToString::to_string),
            location: None,
        }
    }

    #[tokio::test]
    async fn resolve_prefers_override_over_netinfo() {
        let agent = agent_with_override(AgentId::generate(), Some("10.0.0.9"));
        let netinfo = FakeNetInfo(None);
        let resolved = resolve_agent_address(&agent, &netinfo).await;
        assert_eq!(resolved.as_deref(), Some("10.0.0.9"));
    }

    #[tokio::test]
    async fn resolve_drops_target_when_neither_override_nor_netinfo_exists() {
        let agent = agent_with_override(AgentId::generate(), None);
        let netinfo = FakeNetInfo(None);
        let resolved = resolve_agent_address(&agent, &netinfo).await;
        assert_eq!(resolved, None);
    }

    #[tokio::test]
    async fn agent_meta_probe_expands_to_mtr_and_ping_without_trafficsim_server() {
        let parent_agent = AgentId::generate();
        let peer_id = AgentId::generate();
        let peer = agent_with_override(peer_id, Some("203.0.113.5"));
        let probe_id = ProbeId::generate();
        let probe = Probe {
            id: probe_id,
            workspace_id: WorkspaceId::generate(),
            agent_id: parent_agent,
            kind: ProbeKind::Agent,
            enabled: true,
            interval_secs: 30,
            timeout_secs: 5,
            count: None,
            duration_secs: None,
            server_mode: false,
            label: None,
            metadata: HashMap::new(),
            targets: vec![Target {
                id: TargetId::generate(),
                probe_id,
                target: TargetRef::Agent(peer_id),
            }],
            server_port: None,
        };
        let netinfo = FakeNetInfo(None);
        let lookup = move |id: AgentId| if id == peer_id { Some(peer.clone()) } else { None };
        let dispatch = expand_for_dispatch(&probe, &netinfo, &lookup, &[]).await;
        assert_eq!(dispatch.len(), 2);
        assert!(dispatch.iter().all(|d| d.probe_id == probe_id));
        assert!(dispatch.iter().any(|d| d.kind == ProbeKind::Mtr));
        assert!(dispatch.iter().any(|d| d.kind == ProbeKind::Ping));
    }
}
