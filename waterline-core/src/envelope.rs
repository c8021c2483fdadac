//! Response envelope detection and unwrapping.
//!
//! The backend wraps most payloads in `{status, data, meta?}`, but some
//! endpoints (health, third-party passthroughs) return bare JSON. Payloads
//! are classified structurally into a tagged variant and normalized to one
//! `Value` before any cache logic sees them.

use serde_json::Value;

/// Envelope status discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeStatus {
    Success,
    Error,
}

impl EnvelopeStatus {
    fn from_wire(status: &str) -> Option<Self> {
        match status {
            "success" => Some(EnvelopeStatus::Success),
            "error" => Some(EnvelopeStatus::Error),
            _ => None,
        }
    }
}

/// A detected `{status, data, meta?}` wrapper.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub status: EnvelopeStatus,
    pub data: Value,
    pub meta: Option<Value>,
}

impl Envelope {
    /// Human-readable detail for an error envelope, best effort: prefers
    /// `meta.detail`, then `meta.message`, then a string `data`.
    pub fn error_detail(&self) -> String {
        let from_meta = self
            .meta
            .as_ref()
            .and_then(|m| m.get("detail").or_else(|| m.get("message")))
            .and_then(|v| v.as_str());
        if let Some(detail) = from_meta {
            return detail.to_string();
        }
        if let Some(detail) = self.data.as_str() {
            return detail.to_string();
        }
        "request rejected".to_string()
    }
}

/// A response payload, envelope or bare.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiPayload {
    Envelope(Envelope),
    Raw(Value),
}

impl ApiPayload {
    /// Structural predicate: an object is an envelope iff it has a `status`
    /// string of `"success"` or `"error"` AND a `data` field. Objects that
    /// merely contain a `status` field (e.g. a node record with a status
    /// column) are not envelopes.
    pub fn is_envelope(value: &Value) -> bool {
        let Some(obj) = value.as_object() else {
            return false;
        };
        obj.contains_key("data")
            && obj
                .get("status")
                .and_then(|s| s.as_str())
                .and_then(EnvelopeStatus::from_wire)
                .is_some()
    }

    /// Classify a payload, consuming it.
    pub fn classify(value: Value) -> Self {
        if !Self::is_envelope(&value) {
            return ApiPayload::Raw(value);
        }
        match value {
            Value::Object(mut obj) => {
                // is_envelope guarantees a recognized status string and a
                // data field; the fallbacks here are unreachable defaults.
                let status = obj
                    .get("status")
                    .and_then(|s| s.as_str())
                    .and_then(EnvelopeStatus::from_wire)
                    .unwrap_or(EnvelopeStatus::Success);
                let data = obj.remove("data").unwrap_or(Value::Null);
                let meta = obj.remove("meta").filter(|m| !m.is_null());
                ApiPayload::Envelope(Envelope { status, data, meta })
            }
            other => ApiPayload::Raw(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_envelope_unwraps() {
        let payload = ApiPayload::classify(json!({
            "status": "success",
            "data": [{"id": "n1"}],
            "meta": {"count": 1}
        }));
        match payload {
            ApiPayload::Envelope(env) => {
                assert_eq!(env.status, EnvelopeStatus::Success);
                assert_eq!(env.data, json!([{"id": "n1"}]));
                assert_eq!(env.meta, Some(json!({"count": 1})));
            }
            ApiPayload::Raw(_) => panic!("expected envelope"),
        }
    }

    #[test]
    fn test_error_envelope_detail() {
        let payload = ApiPayload::classify(json!({
            "status": "error",
            "data": null,
            "meta": {"detail": "node not found"}
        }));
        match payload {
            ApiPayload::Envelope(env) => {
                assert_eq!(env.status, EnvelopeStatus::Error);
                assert_eq!(env.error_detail(), "node not found");
            }
            ApiPayload::Raw(_) => panic!("expected envelope"),
        }
    }

    #[test]
    fn test_bare_json_passes_through() {
        let array = json!([{"id": "n1"}]);
        assert_eq!(ApiPayload::classify(array.clone()), ApiPayload::Raw(array));

        let scalar = json!("ok");
        assert_eq!(ApiPayload::classify(scalar.clone()), ApiPayload::Raw(scalar));
    }

    #[test]
    fn test_status_field_alone_is_not_an_envelope() {
        // A node record with a status column must not be unwrapped.
        let record = json!({"id": "n1", "status": "online"});
        assert!(!ApiPayload::is_envelope(&record));
        assert_eq!(ApiPayload::classify(record.clone()), ApiPayload::Raw(record));
    }

    #[test]
    fn test_unknown_status_string_is_not_an_envelope() {
        let value = json!({"status": "partial", "data": []});
        assert!(!ApiPayload::is_envelope(&value));
    }

    #[test]
    fn test_error_detail_fallbacks() {
        let env = Envelope {
            status: EnvelopeStatus::Error,
            data: json!("quota exceeded"),
            meta: None,
        };
        assert_eq!(env.error_detail(), "quota exceeded");

        let bare = Envelope {
            status: EnvelopeStatus::Error,
            data: Value::Null,
            meta: None,
        };
        assert_eq!(bare.error_detail(), "request rejected");
    }
}
