//! Per-kind handler registry (§4.2 "Handler contract", §9 "Polymorphic
//! sample payloads": "Handlers are registered in a process-wide registry
//! keyed by tag; registration happens at start-up and is read-only
//! thereafter.").

use super::netinfo::decode_netinfo;
use crate::domain::{MtrPayload, ProbeKind, SamplePayload};
use dashmap::DashMap;
use std::sync::Arc;

/// A per-kind sample handler: decodes the wire JSON into the kind's typed
/// payload and performs semantic validation (§4.2 "Handler contract").
pub trait SampleHandler: Send + Sync {
    /// Decodes the raw JSON payload into this kind's typed shape.
    ///
    /// # Errors
    ///
    /// Returns a [`serde_json::Error`] if the payload does not match the
    /// kind's expected JSON shape.
    fn decode(&self, raw: &str) -> Result<SamplePayload, serde_json::Error>;

    /// Performs semantic validation beyond shape (e.g. "MTR must contain
    /// at least one hop").
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason the payload failed validation.
    fn validate(&self, payload: &SamplePayload) -> Result<(), String>;
}

struct PingHandler;
impl SampleHandler for PingHandler {
    fn decode(&self, raw: &str) -> Result<SamplePayload, serde_json::Error> {
        Ok(SamplePayload::Ping(serde_json::from_str(raw)?))
    }
    fn validate(&self, payload: &SamplePayload) -> Result<(), String> {
        let SamplePayload::Ping(p) = payload else {
            return Err("expected PING payload".to_string());
        };
        if p.sent == 0 {
            return Err("PING sample must record at least one sent packet".to_string());
        }
        Ok(())
    }
}

struct MtrHandler;
impl SampleHandler for MtrHandler {
    fn decode(&self, raw: &str) -> Result<SamplePayload, serde_json::Error> {
        Ok(SamplePayload::Mtr(serde_json::from_str(raw)?))
    }
    fn validate(&self, payload: &SamplePayload) -> Result<(), String> {
        let SamplePayload::Mtr(MtrPayload { hops }) = payload else {
            return Err("expected MTR payload".to_string());
        };
        if hops.is_empty() {
            return Err("MTR trace must contain at least one hop".to_string());
        }
        Ok(())
    }
}

struct TrafficSimLikeHandler {
    expects_rperf: bool,
}
impl SampleHandler for TrafficSimLikeHandler {
    fn decode(&self, raw: &str) -> Result<SamplePayload, serde_json::Error> {
        let payload: crate::domain::TrafficSimPayload = serde_json::from_str(raw)?;
        Ok(if self.expects_rperf {
            SamplePayload::Rperf(payload)
        } else {
            SamplePayload::TrafficSim(payload)
        })
    }
    fn validate(&self, payload: &SamplePayload) -> Result<(), String> {
        let stats = match payload {
            SamplePayload::Rperf(s) | SamplePayload::TrafficSim(s) => s,
            _ => return Err("expected RPERF/TRAFFICSIM payload".to_string()),
        };
        if stats.total_sent == 0 {
            return Err("traffic simulation must record at least one sent packet".to_string());
        }
        Ok(())
    }
}

struct SpeedtestHandler;
impl SampleHandler for SpeedtestHandler {
    fn decode(&self, raw: &str) -> Result<SamplePayload, serde_json::Error> {
        Ok(SamplePayload::Speedtest(serde_json::from_str(raw)?))
    }
    fn validate(&self, payload: &SamplePayload) -> Result<(), String> {
        let SamplePayload::Speedtest(s) = payload else {
            return Err("expected SPEEDTEST payload".to_string());
        };
        if s.download_mbps < 0.0 || s.upload_mbps < 0.0 {
            return Err("speedtest throughput cannot be negative".to_string());
        }
        Ok(())
    }
}

struct NetInfoHandler;
impl SampleHandler for NetInfoHandler {
    fn decode(&self, raw: &str) -> Result<SamplePayload, serde_json::Error> {
        Ok(SamplePayload::NetInfo(decode_netinfo(raw)?))
    }
    fn validate(&self, payload: &SamplePayload) -> Result<(), String> {
        let SamplePayload::NetInfo(n) = payload else {
            return Err("expected NETINFO payload".to_string());
        };
        if n.public_address.trim().is_empty() {
            return Err("NETINFO must report a non-empty public address".to_string());
        }
        Ok(())
    }
}

struct SysInfoHandler;
impl SampleHandler for SysInfoHandler {
    fn decode(&self, raw: &str) -> Result<SamplePayload, serde_json::Error> {
        Ok(SamplePayload::SysInfo(serde_json::from_str(raw)?))
    }
    fn validate(&self, payload: &SamplePayload) -> Result<(), String> {
        let SamplePayload::SysInfo(s) = payload else {
            return Err("expected SYSINFO payload".to_string());
        };
        if s.mem_total_bytes == 0 {
            return Err("SYSINFO must report nonzero total memory".to_string());
        }
        Ok(())
    }
}

/// Process-wide, read-only-after-start-up handler registry keyed by
/// [`ProbeKind`] (§9 "Polymorphic sample payloads").
pub struct HandlerRegistry {
    handlers: DashMap<ProbeKind, Arc<dyn SampleHandler>>,
}

impl HandlerRegistry {
    /// Builds the registry with one handler per sample-bearing kind.
    /// `AGENT` carries no samples of its own (it expands into concrete
    /// probes, §4.1) and so has no handler.
    #[must_use]
    pub fn with_default_handlers() -> Self {
        let handlers: DashMap<ProbeKind, Arc<dyn SampleHandler>> = DashMap::new();
        handlers.insert(ProbeKind::Ping, Arc::new(PingHandler));
        handlers.insert(ProbeKind::Mtr, Arc::new(MtrHandler));
        handlers.insert(
            ProbeKind::Rperf,
            Arc::new(TrafficSimLikeHandler { expects_rperf: true }),
        );
        handlers.insert(
            ProbeKind::TrafficSim,
            Arc::new(TrafficSimLikeHandler { expects_rperf: false }),
        );
        handlers.insert(ProbeKind::Speedtest, Arc::new(SpeedtestHandler));
        handlers.insert(ProbeKind::NetInfo, Arc::new(NetInfoHandler));
        handlers.insert(ProbeKind::SysInfo, Arc::new(SysInfoHandler));
        Self { handlers }
    }

    /// Looks up the handler registered for `kind`, if any.
    #[must_use]
    pub fn get(&self, kind: ProbeKind) -> Option<Arc<dyn SampleHandler>> {
        self.handlers.get(&kind).map(|entry| Arc::clone(entry.value()))
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_default_handlers()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mtr_handler_rejects_empty_hop_list() {
        let handler = MtrHandler;
        let payload = SamplePayload::Mtr(MtrPayload { hops: vec![] });
        assert!(handler.validate(&payload).is_err());
    }

    #[test]
    fn registry_has_no_handler_for_agent_meta_probe() {
        let registry = HandlerRegistry::with_default_handlers();
        assert!(registry.get(ProbeKind::Agent).is_none());
    }

    #[test]
    fn registry_resolves_ping_handler() {
        let registry = HandlerRegistry::with_default_handlers();
        assert!(registry.get(ProbeKind::Ping).is_some());
    }
}
