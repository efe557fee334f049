//! Reverse-probe discovery (§4.1 "Reverse discovery", §9 "Cyclic /
//! recursive graphs").
//!
//! Reverse relationships are never embedded as pointers; they are derived
//! by querying the probe/target join through [`RegistryStore`].

use super::{RegistryError, RegistryStore};
use crate::domain::{AgentId, Probe};

/// Finds every `AGENT`-kind probe owned by another agent that targets
/// `agent_id`. Used both for dispatch (the target agent "sees" reverse
/// probes) and for paired per-probe analysis (§4.4 "If a reverse probe ...
/// exists, recurse once").
///
/// # Errors
///
/// Propagates store errors.
pub async fn find_reverse_probes(
    store: &dyn RegistryStore,
    agent_id: AgentId,
) -> Result<Vec<Probe>, RegistryError> {
    store.find_reverse_agent_probes(agent_id).await
}
