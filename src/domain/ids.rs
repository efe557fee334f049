//! Strongly-typed identifiers shared across the registry, intake, and
//! analysis modules.
//!
//! Every identifier that crosses a module boundary is a distinct newtype,
//! not a bare `Uuid` or `u64`, so that a `ProbeId` can never be passed
//! where an `AgentId` is expected.

use nutype::nutype;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($name:ident) => {
        #[nutype(derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            Serialize,
            Deserialize,
            Display,
            TryFrom,
            Into
        ))]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier.
            #[must_use]
            pub fn generate() -> Self {
                Self::new(Uuid::new_v4())
            }
        }
    };
}

uuid_id!(WorkspaceId);
uuid_id!(AgentId);
uuid_id!(ProbeId);
uuid_id!(TargetId);
uuid_id!(AlertRuleId);
uuid_id!(AlertId);

/// Surrogate key for a raw columnar `probe_data` row.
///
/// Columnar rows are append-only and keyed by a process-generated `u64`
/// rather than a UUID, matching the `probe_data.id UInt64` column in §6.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    TryFrom,
    Into
))]
pub struct SampleId(u64);

impl SampleId {
    /// Generates a best-effort unique row id from a random `u64`.
    ///
    /// Uniqueness is not a correctness invariant for `probe_data` (it is
    /// append-only and never looked up by this id); collisions only widen
    /// the insert, they never corrupt other rows.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(rand::random())
    }
}
