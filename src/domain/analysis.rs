//! Derived analysis types — `HealthVector`, `ProbeMetrics`,
//! `MtrPathAnalysis`, `Incident`, `StatusSummary`, and the per-probe /
//! per-workspace rollups that compose them (§3, §4.4).

use super::ids::{AgentId, ProbeId, WorkspaceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Letter grade bucketed from an overall health score (§4.4 `grade`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grade {
    /// `>= 90`.
    Excellent,
    /// `>= 75`.
    Good,
    /// `>= 55`.
    Fair,
    /// `>= 35`.
    Poor,
    /// `< 35`.
    Critical,
}

impl Grade {
    /// Buckets an overall score in `[0, 100]` into a `Grade` (§4.4, §8
    /// boundary behaviours).
    #[must_use]
    pub fn from_score(overall: f64) -> Self {
        if overall >= 90.0 {
            Self::Excellent
        } else if overall >= 75.0 {
            Self::Good
        } else if overall >= 55.0 {
            Self::Fair
        } else if overall >= 35.0 {
            Self::Poor
        } else {
            Self::Critical
        }
    }

    /// `true` for the two grades that qualify an agent as "degraded" for
    /// incident-detection purposes (§4.4 "Agent-level").
    #[must_use]
    pub fn is_degraded(self) -> bool {
        matches!(self, Self::Poor | Self::Critical)
    }
}

/// Multi-dimensional health score for a probe, agent, or workspace (§4.4
/// `healthVector`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthVector {
    /// Latency sub-score, `[0, 100]`.
    pub latency_score: f64,
    /// Packet loss sub-score, `[0, 100]`.
    pub loss_score: f64,
    /// Route stability percent, `[0, 100]`.
    pub route_stability: f64,
    /// Mean Opinion Score, `[1.0, 4.5]`.
    pub mos: f64,
    /// Weighted overall score, `[0, 100]`.
    pub overall: f64,
}

impl HealthVector {
    /// This vector's letter grade.
    #[must_use]
    pub fn grade(&self) -> Grade {
        Grade::from_score(self.overall)
    }

    /// Returns a copy with `overall` reduced by `penalty` points, clamped
    /// to `[0, 100]` (§4.4 "offline agents ... reduced by 20 points").
    #[must_use]
    pub fn penalized(&self, penalty: f64) -> Self {
        Self {
            overall: (self.overall - penalty).clamp(0.0, 100.0),
            ..*self
        }
    }
}

/// Aggregate PING/TRAFFICSIM metrics for one probe (or blended AGENT probe)
/// over a lookback window (§4.4 "Per-probe analysis").
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProbeMetrics {
    /// Mean latency, milliseconds.
    pub mean_latency_ms: f64,
    /// 95th percentile latency, milliseconds.
    pub p95_latency_ms: f64,
    /// Mean packet loss percent.
    pub mean_loss_pct: f64,
    /// Mean jitter, milliseconds.
    pub mean_jitter_ms: f64,
    /// Number of samples the metrics were derived from.
    pub sample_count: u64,
}

impl ProbeMetrics {
    /// Neutral metrics for an empty sample set.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            mean_latency_ms: 0.0,
            p95_latency_ms: 0.0,
            mean_loss_pct: 0.0,
            mean_jitter_ms: 0.0,
            sample_count: 0,
        }
    }

    /// Blends PING metrics with TRAFFICSIM metrics for an `AGENT` meta-probe
    /// (§4.4 "For kind = AGENT, also fetch TRAFFICSIM and blend"): adopt
    /// TRAFFICSIM wholesale when no PING data exists, otherwise keep PING
    /// latency/jitter and take the worse (higher) of the two loss figures.
    #[must_use]
    pub fn blend_with_trafficsim(&self, trafficsim: &Self) -> Self {
        if self.sample_count == 0 {
            return *trafficsim;
        }
        Self {
            mean_loss_pct: self.mean_loss_pct.max(trafficsim.mean_loss_pct),
            ..*self
        }
    }
}

/// A non-responding hop range, rendered `"Hops a-b"` (§4.4).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NonRespondingSegment {
    /// First silent hop, inclusive.
    pub from_hop: u32,
    /// Last silent hop, inclusive.
    pub to_hop: u32,
}

impl NonRespondingSegment {
    /// Renders as `"Hops a-b"` (or `"Hop a"` for a single-hop segment).
    #[must_use]
    pub fn render(&self) -> String {
        if self.from_hop == self.to_hop {
            format!("Hop {}", self.from_hop)
        } else {
            format!("Hops {}-{}", self.from_hop, self.to_hop)
        }
    }
}

/// Derived MTR path health for one probe over a lookback window (§4.4
/// "Per-probe analysis").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MtrPathAnalysis {
    /// Maximum hop count observed across traces.
    pub hop_count: u32,
    /// Count of distinct route signatures observed.
    pub unique_route_count: u32,
    /// `(max-matching-signature count / total traces) * 100`.
    pub route_stability_pct: f64,
    /// Mean latency of the last responding hop, milliseconds.
    pub mean_end_hop_latency_ms: f64,
    /// Mean loss percent of the last responding hop.
    pub mean_end_hop_loss_pct: f64,
    /// Intermediate hops with loss > 10% while end-to-end loss < 1%.
    pub rate_limited_hops: Vec<u32>,
    /// Contiguous silent-hop ranges.
    pub non_responding_segments: Vec<NonRespondingSegment>,
}

/// A signal derived during per-probe analysis, named per the fixed set in
/// §4.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisSignalKind {
    /// Loss pattern consistent with ICMP rate-limiting rather than real loss.
    IcmpArtifact,
    /// Route signature changed within the window.
    RouteChange,
    /// Loss exceeded the high-loss threshold.
    HighLoss,
    /// Latency exceeded the high-latency threshold.
    HighLatency,
    /// Jitter exceeded the anomaly threshold.
    JitterAnomaly,
}

/// One derived signal with a confidence score, `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSignal {
    /// Signal kind.
    pub kind: AnalysisSignalKind,
    /// Confidence, `[0, 1]`.
    pub confidence: f64,
}

/// A short, human-readable conclusion synthesised from a probe's signals
/// and metrics (§4.4 "synthesise 1-3 AnalysisFindings").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisFinding {
    /// Short title, e.g. `"Route instability detected"`.
    pub title: String,
    /// Full explanatory sentence.
    pub detail: String,
    /// Severity this finding implies.
    pub severity: super::alert_rule::Severity,
}

/// Full per-probe analysis result, optionally carrying one level of
/// `Reverse` nesting (§4.4, §9 "cap recursion at depth 1").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeAnalysis {
    /// Probe this analysis covers.
    pub probe_id: ProbeId,
    /// Reporting agent.
    pub agent_id: AgentId,
    /// Window start, UTC.
    pub window_start: DateTime<Utc>,
    /// Window end, UTC.
    pub window_end: DateTime<Utc>,
    /// Blended PING/TRAFFICSIM metrics.
    pub metrics: ProbeMetrics,
    /// MTR path analysis, when MTR samples were present.
    pub mtr: Option<MtrPathAnalysis>,
    /// Derived health vector.
    pub health: HealthVector,
    /// Derived signals.
    pub signals: Vec<AnalysisSignal>,
    /// Synthesised findings, 1-3 entries.
    pub findings: Vec<AnalysisFinding>,
    /// The reverse probe's analysis, if one exists (depth-1 only: its own
    /// `reverse` field is always `None`).
    pub reverse: Option<Box<ProbeAnalysis>>,
}

/// Incident scope (§4.4 "Incident detection").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentScope {
    /// Affects a shared piece of infrastructure across multiple agents.
    Infrastructure,
    /// Localised to a single agent.
    AgentSpecific,
}

/// One emitted incident, deduplicated by [`Incident::id`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    /// Stable deduplication id, e.g. `"shared_target_8_8_8_8"`,
    /// `"agent_offline_<id>"`.
    pub id: String,
    /// Incident scope.
    pub scope: IncidentScope,
    /// Severity.
    pub severity: super::alert_rule::Severity,
    /// Human-readable title.
    pub title: String,
    /// Agents this incident affects.
    pub affected_agents: Vec<AgentId>,
    /// Probable root cause, from the rule table over (affected fraction,
    /// mean latency, mean loss).
    pub suggested_cause: Option<String>,
    /// Suggested operator actions.
    pub recommendations: Vec<String>,
    /// When this incident was detected.
    pub detected_at: DateTime<Utc>,
}

/// Derived workspace status, from §4.4 "Status summary".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// No agents exist in the workspace.
    Unknown,
    /// Every agent is offline.
    Outage,
    /// Any critical incident, or any degraded/offline agents.
    Degraded,
    /// Neither of the above.
    Healthy,
}

/// Fixed-template or summariser-enriched status message (§4.4, §9(c)).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSummary {
    /// Derived status label.
    pub status: Status,
    /// Rendered message: rule-based unless an optional summariser replaced
    /// it for this cycle.
    pub message: String,
}

/// Per-agent rollup within a `WorkspaceAnalysis`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentAnalysis {
    /// Agent this rollup covers.
    pub agent_id: AgentId,
    /// Whether the agent was online at analysis time.
    pub online: bool,
    /// Per-agent aggregate health (already penalized if offline).
    pub health: HealthVector,
    /// The three worst-scoring probes owned by this agent, lowest first.
    pub worst_probes: Vec<ProbeId>,
}

/// Full output of one analysis cycle for one workspace (§4.4 "Workspace
/// analysis").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceAnalysis {
    /// Workspace this analysis covers.
    pub workspace_id: WorkspaceId,
    /// When this cycle ran.
    pub generated_at: DateTime<Utc>,
    /// Workspace-level health, the arithmetic mean of per-agent overalls.
    pub health: HealthVector,
    /// Per-agent rollups.
    pub agents: Vec<AgentAnalysis>,
    /// Detected incidents, in class order: shared-target, agent-level,
    /// infrastructure-wide.
    pub incidents: Vec<Incident>,
    /// Derived status summary.
    pub status: StatusSummary,
    /// Total probe count across the workspace.
    pub total_probes: u32,
    /// Total agent count.
    pub total_agents: u32,
    /// Online agent count.
    pub online_agents: u32,
}

/// Persisted row for one analysis cycle (§3, §6 `analysis_snapshots`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSnapshot {
    /// Workspace this snapshot covers.
    pub workspace_id: WorkspaceId,
    /// When the cycle ran.
    pub generated_at: DateTime<Utc>,
    /// Overall health score.
    pub overall_health: f64,
    /// Latency sub-score.
    pub latency_score: f64,
    /// Packet loss sub-score.
    pub packet_loss_score: f64,
    /// Route stability percent.
    pub route_stability: f64,
    /// MOS score.
    pub mos_score: f64,
    /// Letter grade.
    pub grade: Grade,
    /// Derived status.
    pub status: Status,
    /// Status message (rule-based or summariser-enriched).
    pub status_message: String,
    /// Incident count.
    pub incident_count: u32,
    /// Total agent count.
    pub total_agents: u32,
    /// Online agent count.
    pub online_agents: u32,
    /// Total probe count.
    pub total_probes: u32,
    /// Incidents, serialised as a JSON side-car.
    pub incidents_json: String,
    /// Agent rollups, serialised as a JSON side-car.
    pub agents_json: String,
    /// The message actually shown, stored separately to preserve
    /// idempotence across repeated reads (§9(c)).
    pub llm_summary: String,
}

impl AnalysisSnapshot {
    /// Builds a snapshot row from a completed workspace analysis.
    ///
    /// # Errors
    ///
    /// Returns an error if the incidents or per-agent rollups fail to
    /// serialise to JSON; this should not happen for well-formed data but
    /// is surfaced rather than panicking (§7 "Payload decode").
    pub fn from_analysis(analysis: &WorkspaceAnalysis) -> Result<Self, serde_json::Error> {
        Ok(Self {
            workspace_id: analysis.workspace_id,
            generated_at: analysis.generated_at,
            overall_health: analysis.health.overall,
            latency_score: analysis.health.latency_score,
            packet_loss_score: analysis.health.loss_score,
            route_stability: analysis.health.route_stability,
            mos_score: analysis.health.mos,
            grade: analysis.health.grade(),
            status: analysis.status.status,
            status_message: analysis.status.message.clone(),
            incident_count: u32::try_from(analysis.incidents.len()).unwrap_or(u32::MAX),
            total_agents: analysis.total_agents,
            online_agents: analysis.online_agents,
            total_probes: analysis.total_probes,
            incidents_json: serde_json::to_string(&analysis.incidents)?,
            agents_json: serde_json::to_string(&analysis.agents)?,
            llm_summary: analysis.status.message.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grade_boundaries_match_documented_thresholds() {
        assert_eq!(Grade::from_score(89.99), Grade::Good);
        assert_eq!(Grade::from_score(90.0), Grade::Excellent);
        assert_eq!(Grade::from_score(34.99), Grade::Critical);
    }

    #[test]
    fn penalized_health_clamps_at_zero() {
        let health = HealthVector {
            latency_score: 50.0,
            loss_score: 50.0,
            route_stability: 50.0,
            mos: 2.0,
            overall: 10.0,
        };
        assert_eq!(health.penalized(20.0).overall, 0.0);
    }

    #[test]
    fn blend_adopts_trafficsim_when_no_ping_data() {
        let ping = ProbeMetrics::empty();
        let trafficsim = ProbeMetrics {
            mean_latency_ms: 40.0,
            p95_latency_ms: 60.0,
            mean_loss_pct: 2.0,
            mean_jitter_ms: 5.0,
            sample_count: 10,
        };
        let blended = ping.blend_with_trafficsim(&trafficsim);
        assert_eq!(blended.mean_latency_ms, 40.0);
        assert_eq!(blended.sample_count, 10);
    }

    #[test]
    fn blend_keeps_ping_latency_but_worse_loss() {
        let ping = ProbeMetrics {
            mean_latency_ms: 20.0,
            p95_latency_ms: 30.0,
            mean_loss_pct: 1.0,
            mean_jitter_ms: 2.0,
            sample_count: 5,
        };
        let trafficsim = ProbeMetrics {
            mean_latency_ms: 999.0,
            p95_latency_ms: 999.0,
            mean_loss_pct: 8.0,
            mean_jitter_ms: 999.0,
            sample_count: 5,
        };
        let blended = ping.blend_with_trafficsim(&trafficsim);
        assert_eq!(blended.mean_latency_ms, 20.0);
        assert_eq!(blended.mean_loss_pct, 8.0);
    }

    #[test]
    fn non_responding_segment_renders_single_hop_without_range() {
        let seg = NonRespondingSegment {
            from_hop: 4,
            to_hop: 4,
        };
        assert_eq!(seg.render(), "Hop 4");
        let range = NonRespondingSegment {
            from_hop: 4,
            to_hop: 6,
        };
        assert_eq!(range.render(), "Hops 4-6");
    }
}
