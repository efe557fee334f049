//! Probe creation: validation (functional core) plus the orchestration that
//! checks for duplicates and builds the bidirectional mirror probe before
//! handing both to the store in one atomic unit (§4.1 "Create contract",
//! "Bidirectional creation").

use super::{RegistryError, RegistryStore};
use crate::domain::{
    AgentId, Probe, ProbeId, ProbeKind, Target, TargetId, TargetRef, WorkspaceId,
};
use std::collections::HashMap;
use tracing::instrument;

/// Inputs accepted by [`create_probe`] (§4.1 "Create contract").
#[derive(Debug, Clone)]
pub struct CreateProbeInput {
    /// Owning workspace.
    pub workspace_id: Option<WorkspaceId>,
    /// Owning agent.
    pub agent_id: Option<AgentId>,
    /// Probe kind.
    pub kind: Option<ProbeKind>,
    /// Scheduling: poll interval, seconds.
    pub interval_secs: u32,
    /// Scheduling: per-run timeout, seconds.
    pub timeout_secs: u32,
    /// Optional packet/iteration count.
    pub count: Option<u32>,
    /// Optional run duration, seconds.
    pub duration_secs: Option<u32>,
    /// Whether this probe runs a server.
    pub server_mode: bool,
    /// Server port, meaningful only when `server_mode` is set.
    pub server_port: Option<u16>,
    /// Free-form label.
    pub label: Option<String>,
    /// Free-form metadata.
    pub metadata: HashMap<String, String>,
    /// Literal target strings.
    pub literal_targets: Vec<String>,
    /// Agent-reference targets.
    pub agent_targets: Vec<AgentId>,
    /// When set, a mirror probe is created for each agent target.
    pub bidirectional: bool,
}

impl CreateProbeInput {
    /// Validates the structural preconditions that don't require a store
    /// round-trip: required fields present, at least one target (§4.1,
    /// §8 "For all probes P, |targets(P)| >= 1").
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidInput`] or [`RegistryError::NoTargets`].
    pub fn validate(&self) -> Result<(WorkspaceId, AgentId, ProbeKind), RegistryError> {
        let workspace_id = self
            .workspace_id
            .ok_or_else(|| RegistryError::InvalidInput("workspace id missing".to_string()))?;
        let agent_id = self
            .agent_id
            .ok_or_else(|| RegistryError::InvalidInput("agent id missing".to_string()))?;
        let kind = self
            .kind
            .ok_or_else(|| RegistryError::InvalidInput("probe kind missing".to_string()))?;
        if self.literal_targets.is_empty() && self.agent_targets.is_empty() {
            return Err(RegistryError::NoTargets);
        }
        Ok((workspace_id, agent_id, kind))
    }

    fn target_fingerprint(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .literal_targets
            .iter()
            .map(|t| format!("lit:{t}"))
            .chain(self.agent_targets.iter().map(|a| format!("agent:{a}")))
            .collect();
        out.sort();
        out
    }
}

fn build_targets(probe_id: ProbeId, input: &CreateProbeInput) -> Vec<Target> {
    input
        .literal_targets
        .iter()
        .map(|literal| Target {
            id: TargetId::generate(),
            probe_id,
            target: TargetRef::Literal(literal.clone()),
        })
        .chain(input.agent_targets.iter().map(|agent_id| Target {
            id: TargetId::generate(),
            probe_id,
            target: TargetRef::Agent(*agent_id),
        }))
        .collect()
}

/// Creates a probe (and, for a bidirectional request, its mirror) after
/// checking for duplicates (§4.1 "Create contract", "Bidirectional
/// creation").
///
/// # Errors
///
/// Returns [`RegistryError::InvalidInput`], [`RegistryError::NoTargets`],
/// [`RegistryError::DuplicateProbe`], or a propagated store error.
#[instrument(skip(store, input), fields(kind = ?input.kind), err)]
pub async fn create_probe(
    store: &dyn RegistryStore,
    input: CreateProbeInput,
) -> Result<Probe, RegistryError> {
    let (workspace_id, agent_id, kind) = input.validate()?;

    let existing = store.list_probes_for_agent_kind(agent_id, kind).await?;
    let fingerprint = input.target_fingerprint();
    for other in &existing {
        let other_fp = other.target_fingerprint();
        if fingerprint.iter().any(|f| other_fp.contains(f)) {
            return Err(RegistryError::DuplicateProbe { agent_id, kind });
        }
    }

    let probe_id = ProbeId::generate();
    let probe = Probe {
        id: probe_id,
        workspace_id,
        agent_id,
        kind,
        enabled: true,
        interval_secs: input.interval_secs,
        timeout_secs: input.timeout_secs,
        count: input.count,
        duration_secs: input.duration_secs,
        server_mode: input.server_mode,
        label: input.label.clone(),
        metadata: input.metadata.clone(),
        targets: build_targets(probe_id, &input),
        server_port: input.server_port,
    };

    let mirrors: Vec<Probe> = if input.bidirectional {
        // One mirror per agent target, each owned by that target agent and
        // pointing back to the originator (§4.1 "For each agent target, a
        // mirror probe is created ... All mirror creations share the
        // atomic unit with the primary").
        input
            .agent_targets
            .iter()
            .map(|&peer_agent_id| {
                let mirror_id = ProbeId::generate();
                Probe {
                    id: mirror_id,
                    workspace_id,
                    agent_id: peer_agent_id,
                    kind,
                    enabled: true,
                    interval_secs: input.interval_secs,
                    timeout_secs: input.timeout_secs,
                    count: input.count,
                    duration_secs: input.duration_secs,
                    server_mode: input.server_mode,
                    label: input.label.clone(),
                    metadata: input.metadata.clone(),
                    targets: vec![Target {
                        id: TargetId::generate(),
                        probe_id: mirror_id,
                        target: TargetRef::Agent(agent_id),
                    }],
                    server_port: input.server_port,
                }
            })
            .collect()
    } else {
        Vec::new()
    };

    store.insert_probe_atomic(&probe, &mirrors).await?;
    Ok(probe)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_input() -> CreateProbeInput {
        CreateProbeInput {
            workspace_id: Some(WorkspaceId::generate()),
            agent_id: Some(AgentId::generate()),
            kind: Some(ProbeKind::Ping),
            interval_secs: 30,
            timeout_secs: 5,
            count: None,
            duration_secs: None,
            server_mode: false,
            server_port: None,
            label: None,
            metadata: HashMap::new(),
            literal_targets: vec!["1.1.1.1".to_string()],
            agent_targets: vec![],
            bidirectional: false,
        }
    }

    #[test]
    fn validate_rejects_missing_workspace() {
        let mut input = base_input();
        input.workspace_id = None;
        assert!(matches!(
            input.validate(),
            Err(RegistryError::InvalidInput(_))
        ));
    }

    #[test]
    fn validate_rejects_empty_targets() {
        let mut input = base_input();
        input.literal_targets.clear();
        assert!(matches!(input.validate(), Err(RegistryError::NoTargets)));
    }

    #[test]
    fn target_fingerprint_is_order_independent() {
        let mut a = base_input();
        a.literal_targets = vec!["1.1.1.1".to_string(), "8.8.8.8".to_string()];
        let mut b = a.clone();
        b.literal_targets.reverse();
        assert_eq!(a.target_fingerprint(), b.target_fingerprint());
    }
}
