//! Workspace — the tenant scope owning agents, probes, and alert rules (§3).

use super::ids::WorkspaceId;
use serde::{Deserialize, Serialize};

/// Tenant scope. Owns agents, probes, and alert rules.
///
/// The relational schema for workspaces belongs to an external collaborator
/// per §1/§6; this type is the read shape the core needs to carry a
/// workspace's identity through the registry, intake, and analysis paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    /// Unique workspace identifier.
    pub id: WorkspaceId,
    /// Display name.
    pub name: String,
}
