//! Analysis Engine (§4.4): scoring functions, per-probe analysis, workspace
//! analysis with incident detection, and the on-demand connectivity
//! read-models the front-end consumes via the external HTTP collaborator.

pub mod connectivity;
pub mod per_probe;
pub mod scheduler;
pub mod scoring;
pub mod workspace;

pub use per_probe::{agent_rollup, analyze_probe, analyze_probe_leaf, worst_three, AnalysisError};
pub use scheduler::{spawn_analysis_scheduler, AnalysisDeps};
pub use workspace::{analyze_workspace, StatusSummariser, SummariserError};
