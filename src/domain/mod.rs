//! Core domain types: entities (§3) and derived analysis values (§4.4),
//! independent of storage and transport concerns.

pub mod agent;
pub mod alert_rule;
pub mod analysis;
pub mod config_types;
pub mod ids;
pub mod probe;
pub mod sample;
pub mod workspace;

pub use agent::{Agent, ResolvedAddress};
pub use alert_rule::{Alert, AlertRule, AlertStatus, Comparison, Metric, NotificationChannel, Severity};
pub use analysis::{
    AgentAnalysis, AnalysisFinding, AnalysisSignal, AnalysisSignalKind, AnalysisSnapshot, Grade,
    HealthVector, Incident, IncidentScope, MtrPathAnalysis, NonRespondingSegment, ProbeAnalysis,
    ProbeMetrics, Status, StatusSummary, WorkspaceAnalysis,
};
pub use config_types::{
    AggregationRowCap, AnalysisIntervalSecs, ColumnarStatementTimeoutSecs, ConnectionPoolSize,
    FlushBatchSize, FlushIntervalMs, FlushTimeoutMs, FreshnessWindowSecs, RetentionDays,
    WebhookTimeoutMs, WriterQueueCapacity,
};
pub use ids::{AgentId, AlertId, AlertRuleId, ProbeId, SampleId, TargetId, WorkspaceId};
pub use probe::{Probe, ProbeKind, Target, TargetRef};
pub use sample::{
    deserialize_tolerant_percent, tolerant_percent_from_json, Geo, MtrHop, MtrPayload,
    NetInfoPayload, NetInfoWire, NetworkInterface, PingPayload, ProbeSample, RouteEntry,
    SampleEnvelope, SamplePayload, SpeedtestPayload, SysInfoPayload, TrafficSimPayload,
};
pub use workspace::Workspace;
