//! Probe Registry — CRUD for probes/targets, meta-probe expansion, reverse
//! discovery, and duplicate prevention (§4.1).

pub mod create;
pub mod expansion;
pub mod reverse;
pub mod store;

pub use create::CreateProbeInput;
pub use reverse::find_reverse_probes;
pub use store::SqliteRegistryStore;

use crate::domain::{Agent, AgentId, Probe, ProbeId, ProbeKind, Workspace, WorkspaceId};
use async_trait::async_trait;
use thiserror::Error;

/// Errors surfaced by the Probe Registry (§7 "Input validation",
/// "Uniqueness", "NotFound").
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Workspace, agent, or kind missing from a create request.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Both literal and agent target lists were empty.
    #[error("probe must have at least one target")]
    NoTargets,
    /// Another probe exists on the same (agent, kind) with an overlapping
    /// target set.
    #[error("duplicate probe on (agent {agent_id}, kind {kind:?})")]
    DuplicateProbe {
        /// Owning agent of the conflicting probe.
        agent_id: AgentId,
        /// Shared kind.
        kind: ProbeKind,
    },
    /// Referenced entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// Transient relational store failure.
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
    /// Stored JSON (metadata, channel list) failed to parse.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Relational persistence boundary for the registry (§3, §6 "Relational
/// tables"). Kept as a trait so the expansion/resolution logic in this
/// module can be exercised against an in-memory fake in tests.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Fetches a workspace by id.
    async fn get_workspace(&self, id: WorkspaceId) -> Result<Option<Workspace>, RegistryError>;

    /// Fetches an agent by id.
    async fn get_agent(&self, id: AgentId) -> Result<Option<Agent>, RegistryError>;

    /// Lists every workspace (§4.4 "for each workspace with at least one
    /// undeleted agent" — callers filter on agent presence themselves).
    async fn list_workspaces(&self) -> Result<Vec<Workspace>, RegistryError>;

    /// Lists every agent owned by a workspace.
    async fn list_agents_for_workspace(
        &self,
        workspace_id: WorkspaceId,
    ) -> Result<Vec<Agent>, RegistryError>;

    /// Fetches a probe by id, including its targets.
    async fn get_probe(&self, id: ProbeId) -> Result<Option<Probe>, RegistryError>;

    /// Lists every probe owned by an agent, including targets.
    async fn list_probes_for_agent(&self, agent_id: AgentId) -> Result<Vec<Probe>, RegistryError>;

    /// Lists probes owned by `agent_id` of a given `kind`, used for
    /// duplicate-target-set detection at create time.
    async fn list_probes_for_agent_kind(
        &self,
        agent_id: AgentId,
        kind: ProbeKind,
    ) -> Result<Vec<Probe>, RegistryError>;

    /// Atomically persists a probe and its targets (and, for a
    /// bidirectional create, one mirror probe per agent target).
    async fn insert_probe_atomic(
        &self,
        probe: &Probe,
        mirrors: &[Probe],
    ) -> Result<(), RegistryError>;

    /// Deletes a probe; targets cascade (§8 "Deletion of P deletes all its
    /// targets").
    async fn delete_probe(&self, id: ProbeId) -> Result<(), RegistryError>;

    /// Finds every `AGENT`-kind probe, owned by an agent other than
    /// `target_agent_id`, that has a target referencing `target_agent_id`
    /// (§4.1 "Reverse discovery").
    async fn find_reverse_agent_probes(
        &self,
        target_agent_id: AgentId,
    ) -> Result<Vec<Probe>, RegistryError>;
}
