//! Relay wire schema.
//!
//! The relay speaks snake_case JSON; the listener sees camelCase. This
//! module is the explicit boundary between the two.

use serde::{Deserialize, Serialize};

/// The plaintext envelope the relay delivers over SSE, before decryption.
///
/// `{ from, message, trace_id?, request_source?, connect_source? }`.
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingEnvelope {
    /// Hex public key of the sender.
    pub from: String,
    /// Base64-encoded ciphertext.
    pub message: String,
    #[serde(default)]
    pub trace_id: Option<String>,
    /// Base64 of an anonymous-box-sealed `RequestSource`.
    #[serde(default)]
    pub request_source: Option<String>,
    #[serde(default)]
    pub connect_source: Option<ConnectSource>,
}

/// `request_source`, once anonymous-box-opened and JSON-parsed.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSource {
    pub origin: String,
    pub ip: String,
    pub time: i64,
    pub user_agent: Option<String>,
}

/// Raw, snake_case shape of `request_source` as sealed by the sender,
/// mapped to [`RequestSource`] at the Provider boundary.
#[derive(Debug, Clone, Deserialize)]
pub struct RawRequestSource {
    pub origin: String,
    pub ip: String,
    pub time: i64,
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl From<RawRequestSource> for RequestSource {
    fn from(raw: RawRequestSource) -> Self {
        RequestSource {
            origin: raw.origin,
            ip: raw.ip,
            time: raw.time,
            user_agent: raw.user_agent,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectSource {
    pub ip: String,
}

/// The event the Provider hands to the user's listener: the decrypted
/// payload, spread alongside the relay metadata every delivered event
/// carries.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderEvent {
    pub last_event_id: String,
    pub from: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_source: Option<RequestSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_source: Option<ConnectSource>,
    /// The decrypted, application-level JSON payload (e.g. a TON Connect
    /// RPC request/response), kept generic since the bridge core does not
    /// interpret it.
    pub payload: serde_json::Value,
}

/// Body of the outgoing `verify` request.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyRequest<'a> {
    pub client_id: &'a str,
    pub url: &'a str,
    #[serde(rename = "type")]
    pub kind: &'a str,
}

/// Body of the `verify` response.
#[derive(Debug, Clone, Deserialize)]
pub struct VerifyResponse {
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incoming_envelope_parses_minimal_frame() {
        let json = r#"{"from":"aa","message":"YmFzZTY0"}"#;
        let frame: IncomingEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(frame.from, "aa");
        assert!(frame.trace_id.is_none());
        assert!(frame.request_source.is_none());
    }

    #[test]
    fn raw_request_source_maps_snake_to_camel() {
        let json = r#"{"origin":"https://x","ip":"1.2.3.4","time":1,"user_agent":"curl/8"}"#;
        let raw: RawRequestSource = serde_json::from_str(json).unwrap();
        let mapped: RequestSource = raw.into();
        assert_eq!(mapped.user_agent.as_deref(), Some("curl/8"));
    }
}
