//! `NetInfo` payload tolerance: accepts both the legacy flat schema and the
//! rich nested schema, normalising to one shape before it reaches storage
//! or analysis (§4.2 "Payload format tolerance").

use crate::domain::{NetInfoPayload, NetInfoWire};

/// Decodes a raw `NetInfo` JSON payload, accepting either wire schema, and
/// returns the normalized rich shape.
///
/// # Errors
///
/// Returns a [`serde_json::Error`] if the payload matches neither schema.
pub fn decode_netinfo(raw: &str) -> Result<NetInfoPayload, serde_json::Error> {
    let wire: NetInfoWire = serde_json::from_str(raw)?;
    Ok(wire.normalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_legacy_schema() {
        let raw = r#"{"public_address":"1.2.3.4","isp":"Acme","lat":"37.7","long":"-122.4"}"#;
        let payload = decode_netinfo(raw).unwrap();
        assert_eq!(payload.public_address, "1.2.3.4");
        assert_eq!(payload.geo.lat, Some(37.7));
    }

    #[test]
    fn decodes_rich_schema() {
        let raw = r#"{
            "public_address":"1.2.3.4",
            "isp":"Acme",
            "geo":{"lat":37.7,"long":-122.4,"city":"SF","country":"US"},
            "interfaces":[{"name":"eth0","addresses":["10.0.0.1"]}],
            "routes":[]
        }"#;
        let payload = decode_netinfo(raw).unwrap();
        assert_eq!(payload.interfaces.len(), 1);
    }
}
