//! `ProbeSample` — the raw columnar observation row and its typed payload
//! variants (§3, §4.2, §6).

use super::ids::{AgentId, ProbeId, SampleId, TargetId};
use super::probe::ProbeKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Envelope fields present on every inbound sample, independent of payload
/// shape (§6 "Inbound sample envelope").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleEnvelope {
    /// Probe kind.
    pub kind: ProbeKind,
    /// Probe this sample belongs to.
    pub probe_id: ProbeId,
    /// Agent that owns the probe.
    pub probe_agent_id: AgentId,
    /// Agent that actually reported the sample (equal to `probe_agent_id`
    /// except for reverse/mirrored dispatch).
    pub reporting_agent_id: AgentId,
    /// When the observation was made (UTC); `None` means "now" at intake.
    pub created_at: Option<DateTime<Utc>>,
    /// When the controller received it (UTC); `None` means "now" at intake.
    pub received_at: Option<DateTime<Utc>>,
    /// Whether this sample was agent-triggered (e.g. by a detected change)
    /// rather than a scheduled run.
    pub triggered: bool,
    /// Free-form reason when `triggered` is set.
    pub triggered_reason: Option<String>,
    /// Literal target string this sample was measured against.
    pub target: String,
    /// Target agent id, when the target was an agent reference.
    pub target_agent_id: Option<AgentId>,
}

/// A resolved hop within an `MTR` trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MtrHop {
    /// 1-based hop index.
    pub hop: u32,
    /// Responding hop address, `None` for a non-responding (`*`) hop.
    pub address: Option<String>,
    /// Packets sent to this hop.
    pub sent: u32,
    /// Packets received from this hop.
    pub received: u32,
    /// Loss percent; tolerant of either a bare number or a `"NN.N%"` string
    /// on the wire (§4.2 "Dynamically-typed fields").
    #[serde(deserialize_with = "deserialize_tolerant_percent")]
    pub loss_pct: f64,
    /// Average RTT to this hop, in nanoseconds.
    pub avg_rtt_ns: u64,
    /// Best observed RTT to this hop, in nanoseconds.
    pub best_rtt_ns: u64,
    /// Worst observed RTT to this hop, in nanoseconds.
    pub worst_rtt_ns: u64,
}

impl MtrHop {
    /// `true` if this hop responded to any probe (has a resolvable address).
    #[must_use]
    pub fn is_responding(&self) -> bool {
        self.address.is_some()
    }

    /// The signature token for this hop: its address, or `*` if silent.
    #[must_use]
    pub fn signature_token(&self) -> &str {
        self.address.as_deref().unwrap_or("*")
    }
}

/// Deserializes a loss percentage that may arrive as a JSON number or as a
/// string with a trailing `%` (e.g. `"12.5%"`). On failure, yields `0.0`
/// per §4.2/§9 ("Dynamically-typed fields") rather than rejecting the row;
/// callers that need to know about the fallback should inspect the raw
/// payload separately via a decode counter.
pub fn deserialize_tolerant_percent<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = NumOrStr::deserialize(deserializer)?;
    Ok(parse_tolerant_percent(&value))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumOrStr {
    Num(f64),
    Str(String),
}

fn parse_tolerant_percent(value: &NumOrStr) -> f64 {
    match value {
        NumOrStr::Num(n) => *n,
        NumOrStr::Str(s) => s.trim().trim_end_matches('%').parse::<f64>().unwrap_or(0.0),
    }
}

/// Parses a loss percentage from a standalone JSON value (used outside of
/// `serde`-driven field deserialization, e.g. when re-normalizing an
/// already-parsed `serde_json::Value`).
#[must_use]
pub fn tolerant_percent_from_json(value: &serde_json::Value) -> f64 {
    match value {
        serde_json::Value::Number(n) => n.as_f64().unwrap_or(0.0),
        serde_json::Value::String(s) => s.trim().trim_end_matches('%').parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// `PING` payload: one round of ICMP echo statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingPayload {
    /// Packets sent.
    pub sent: u32,
    /// Packets received.
    pub received: u32,
    /// Packet loss percent.
    pub loss_pct: f64,
    /// Minimum RTT, nanoseconds.
    pub min_rtt_ns: u64,
    /// Mean RTT, nanoseconds.
    pub avg_rtt_ns: u64,
    /// Maximum RTT, nanoseconds.
    pub max_rtt_ns: u64,
    /// RTT standard deviation ("jitter"), nanoseconds.
    pub jitter_ns: u64,
}

/// `MTR` payload: one traceroute trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MtrPayload {
    /// Ordered hops, 1-based.
    pub hops: Vec<MtrHop>,
}

impl MtrPayload {
    /// The route signature: ordered responding-hop addresses (or `*`),
    /// joined by `|` (§4.3, Glossary).
    #[must_use]
    pub fn route_signature(&self) -> String {
        self.hops
            .iter()
            .map(MtrHop::signature_token)
            .collect::<Vec<_>>()
            .join("|")
    }

    /// The last hop that actually responded, if any.
    #[must_use]
    pub fn last_responding_hop(&self) -> Option<&MtrHop> {
        self.hops.iter().rev().find(|h| h.is_responding())
    }

    /// End-to-end loss percent, derived from the last responding hop.
    #[must_use]
    pub fn end_to_end_loss_pct(&self) -> f64 {
        self.last_responding_hop().map_or(0.0, |h| h.loss_pct)
    }
}

/// `TRAFFICSIM` payload: synthetic UDP traffic round statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficSimPayload {
    /// Total packets sent.
    pub total_sent: u64,
    /// Total packets received.
    pub total_received: u64,
    /// Packets lost.
    pub lost: u64,
    /// Packets received out of sequence.
    pub out_of_sequence: u64,
    /// Packets received as duplicates.
    pub duplicate: u64,
    /// Average RTT, nanoseconds.
    pub avg_rtt_ns: u64,
    /// Minimum RTT, nanoseconds.
    pub min_rtt_ns: u64,
    /// Maximum RTT, nanoseconds.
    pub max_rtt_ns: u64,
}

impl TrafficSimPayload {
    /// Loss percent derived from sent/lost counters.
    #[must_use]
    pub fn loss_pct(&self) -> f64 {
        if self.total_sent == 0 {
            0.0
        } else {
            (self.lost as f64 / self.total_sent as f64) * 100.0
        }
    }
}

/// `SPEEDTEST` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedtestPayload {
    /// Measured download throughput, Mbps.
    pub download_mbps: f64,
    /// Measured upload throughput, Mbps.
    pub upload_mbps: f64,
    /// Latency to the speedtest server, milliseconds.
    pub latency_ms: f64,
    /// Server identifier/host used for the test.
    pub server: String,
}

/// Geolocation sub-object of the rich `NETINFO` schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Geo {
    /// Latitude.
    pub lat: Option<f64>,
    /// Longitude.
    pub long: Option<f64>,
    /// City name.
    pub city: Option<String>,
    /// Country name.
    pub country: Option<String>,
}

/// Network interface entry in the rich `NETINFO` schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkInterface {
    /// Interface name (e.g. `eth0`).
    pub name: String,
    /// Assigned addresses.
    pub addresses: Vec<String>,
}

/// Route entry in the rich `NETINFO` schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteEntry {
    /// Destination prefix.
    pub destination: String,
    /// Gateway address.
    pub gateway: String,
}

/// `NETINFO` payload. Accepts both the legacy flat schema and the rich
/// nested schema (§4.2). Always constructed via [`NetInfoPayload::normalize`]
/// so downstream code only ever sees the rich shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetInfoPayload {
    /// Self-reported public address.
    pub public_address: String,
    /// ISP / network operator name.
    pub isp: Option<String>,
    /// Geolocation, always present after normalization (fields may be `None`).
    pub geo: Geo,
    /// Network interfaces, empty under the legacy schema.
    pub interfaces: Vec<NetworkInterface>,
    /// Routing table entries, empty under the legacy schema.
    pub routes: Vec<RouteEntry>,
}

/// Wire shape accepted for `NETINFO`: either schema, parsed permissively.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum NetInfoWire {
    /// Rich nested schema (already has a `geo` object).
    Rich {
        /// Self-reported public address.
        public_address: String,
        /// ISP name.
        isp: Option<String>,
        /// Nested geo object.
        geo: Geo,
        /// Interface list.
        #[serde(default)]
        interfaces: Vec<NetworkInterface>,
        /// Route list.
        #[serde(default)]
        routes: Vec<RouteEntry>,
    },
    /// Legacy flat schema: scalar strings for lat/long/ISP.
    Legacy {
        /// Self-reported public address.
        public_address: String,
        /// ISP name.
        isp: Option<String>,
        /// Latitude, as a permissively-scanned string.
        #[serde(default)]
        lat: Option<String>,
        /// Longitude, as a permissively-scanned string.
        #[serde(default)]
        long: Option<String>,
        /// City name.
        #[serde(default)]
        city: Option<String>,
        /// Country name.
        #[serde(default)]
        country: Option<String>,
    },
}

impl NetInfoWire {
    /// Normalizes either wire shape into the single rich [`NetInfoPayload`]
    /// shape (§4.2 "Payload format tolerance").
    ///
    /// An unparseable legacy coordinate is zeroed rather than dropping the
    /// whole `Geo` object, per the open question in §9(b): "keep the
    /// current zero-the-field behaviour until product decides".
    #[must_use]
    pub fn normalize(self) -> NetInfoPayload {
        match self {
            Self::Rich {
                public_address,
                isp,
                geo,
                interfaces,
                routes,
            } => NetInfoPayload {
                public_address,
                isp,
                geo,
                interfaces,
                routes,
            },
            Self::Legacy {
                public_address,
                isp,
                lat,
                long,
                city,
                country,
            } => NetInfoPayload {
                public_address,
                isp,
                geo: Geo {
                    lat: lat.as_deref().and_then(scan_coordinate),
                    long: long.as_deref().and_then(scan_coordinate),
                    city,
                    country,
                },
                interfaces: Vec::new(),
                routes: Vec::new(),
            },
        }
    }
}

/// Permissively scans a coordinate string, returning `None` (zeroed, per
/// §9(b)) rather than an error when it cannot be parsed.
fn scan_coordinate(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().or_else(|| {
        // Strip a trailing compass letter (N/S/E/W) permissively; anything
        // else is left to the `None` fallback.
        let stripped = trimmed.trim_end_matches(|c: char| c.is_ascii_alphabetic());
        stripped.trim().parse::<f64>().ok()
    })
}

/// `SYSINFO` payload: host resource facts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SysInfoPayload {
    /// CPU idle time, as a fraction of total (0.0-1.0).
    pub cpu_idle_fraction: f64,
    /// Total system memory, bytes.
    pub mem_total_bytes: u64,
    /// Used system memory, bytes.
    pub mem_used_bytes: u64,
    /// Hostname.
    pub hostname: String,
}

impl SysInfoPayload {
    /// CPU utilization percent, `(1 - idle/total) * 100` (§4.4 "Host capacity").
    #[must_use]
    pub fn cpu_percent(&self) -> f64 {
        (1.0 - self.cpu_idle_fraction.clamp(0.0, 1.0)) * 100.0
    }

    /// Memory utilization percent, `used/total * 100`.
    #[must_use]
    pub fn memory_percent(&self) -> f64 {
        if self.mem_total_bytes == 0 {
            0.0
        } else {
            (self.mem_used_bytes as f64 / self.mem_total_bytes as f64) * 100.0
        }
    }
}

/// Tagged union over every probe kind's decoded payload shape (§9
/// "Polymorphic sample payloads").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "UPPERCASE")]
pub enum SamplePayload {
    /// `PING`.
    Ping(PingPayload),
    /// `MTR`.
    Mtr(MtrPayload),
    /// `RPERF`.
    Rperf(TrafficSimPayload),
    /// `SPEEDTEST`.
    Speedtest(SpeedtestPayload),
    /// `NETINFO`, already normalized.
    NetInfo(NetInfoPayload),
    /// `SYSINFO`.
    SysInfo(SysInfoPayload),
    /// `TRAFFICSIM`.
    TrafficSim(TrafficSimPayload),
}

impl SamplePayload {
    /// The `ProbeKind` this payload corresponds to.
    #[must_use]
    pub fn kind(&self) -> ProbeKind {
        match self {
            Self::Ping(_) => ProbeKind::Ping,
            Self::Mtr(_) => ProbeKind::Mtr,
            Self::Rperf(_) => ProbeKind::Rperf,
            Self::Speedtest(_) => ProbeKind::Speedtest,
            Self::NetInfo(_) => ProbeKind::NetInfo,
            Self::SysInfo(_) => ProbeKind::SysInfo,
            Self::TrafficSim(_) => ProbeKind::TrafficSim,
        }
    }
}

/// The fully assembled raw columnar row, ready for the batch writer (§3, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeSample {
    /// Row surrogate key.
    pub id: SampleId,
    /// When the observation was made, UTC.
    pub created_at: DateTime<Utc>,
    /// When the controller received it, UTC.
    pub received_at: DateTime<Utc>,
    /// Probe kind, stored as a low-cardinality string.
    pub kind: ProbeKind,
    /// Owning probe.
    pub probe_id: ProbeId,
    /// Owning agent (matches `probe_agent_id` in the envelope).
    pub probe_agent_id: AgentId,
    /// Reporting agent.
    pub agent_id: AgentId,
    /// Whether this sample was agent-triggered.
    pub triggered: bool,
    /// Free-form trigger reason.
    pub triggered_reason: String,
    /// Literal target string.
    pub target: String,
    /// Target agent id, `0`-equivalent (`None`) when the target was literal.
    pub target_agent: Option<AgentId>,
    /// Verbatim JSON payload, as received.
    pub payload_raw: String,
    /// Unused marker to keep `TargetId` imported for downstream modules
    /// that construct samples directly from `Target` lookups.
    #[serde(skip)]
    pub(crate) _marker: Option<TargetId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_signature_joins_hop_tokens_with_pipe() {
        let mtr = MtrPayload {
            hops: vec![
                MtrHop {
                    hop: 1,
                    address: Some("10.0.0.1".into()),
                    sent: 10,
                    received: 10,
                    loss_pct: 0.0,
                    avg_rtt_ns: 1_000_000,
                    best_rtt_ns: 900_000,
                    worst_rtt_ns: 1_100_000,
                },
                MtrHop {
                    hop: 2,
                    address: None,
                    sent: 10,
                    received: 0,
                    loss_pct: 100.0,
                    avg_rtt_ns: 0,
                    best_rtt_ns: 0,
                    worst_rtt_ns: 0,
                },
                MtrHop {
                    hop: 3,
                    address: Some("8.8.8.8".into()),
                    sent: 10,
                    received: 9,
                    loss_pct: 10.0,
                    avg_rtt_ns: 12_000_000,
                    best_rtt_ns: 11_000_000,
                    worst_rtt_ns: 15_000_000,
                },
            ],
        };
        assert_eq!(mtr.route_signature(), "10.0.0.1|*|8.8.8.8");
    }

    #[test]
    fn tolerant_percent_parses_number_and_percent_string() {
        assert_eq!(
            tolerant_percent_from_json(&serde_json::json!(12.5)),
            12.5
        );
        assert_eq!(
            tolerant_percent_from_json(&serde_json::json!("12.5%")),
            12.5
        );
        assert_eq!(tolerant_percent_from_json(&serde_json::json!("garbage")), 0.0);
    }

    #[test]
    fn legacy_netinfo_normalizes_into_rich_shape() {
        let wire: NetInfoWire = serde_json::from_value(serde_json::json!({
            "public_address": "1.2.3.4",
            "isp": "Example ISP",
            "lat": "37.77N",
            "long": "-122.41",
            "city": "San Francisco",
            "country": "US"
        }))
        .unwrap();
        let payload = wire.normalize();
        assert_eq!(payload.public_address, "1.2.3.4");
        assert_eq!(payload.geo.lat, Some(37.77));
        assert_eq!(payload.geo.long, Some(-122.41));
        assert!(payload.interfaces.is_empty());
    }

    #[test]
    fn unparseable_legacy_coordinate_zeroes_the_field_not_the_geo_object() {
        let wire: NetInfoWire = serde_json::from_value(serde_json::json!({
            "public_address": "1.2.3.4",
            "isp": null,
            "lat": "not-a-number",
            "long": "-122.41"
        }))
        .unwrap();
        let payload = wire.normalize();
        assert_eq!(payload.geo.lat, None);
        assert_eq!(payload.geo.long, Some(-122.41));
    }
}
