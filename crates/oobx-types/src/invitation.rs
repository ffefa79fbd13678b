//! Out-of-band invitation model and its URL form.
//!
//! An [`Invitation`] is immutable once constructed: fields are only reachable
//! through accessors, and every mutation path builds a new value.

use crate::error::{OobError, OobResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Current DIDComm message type prefix.
pub const DIDCOMM_PREFIX: &str = "https://didcomm.org/";

/// Legacy DIDComm message type prefix, still accepted on input.
pub const DIDCOMM_LEGACY_PREFIX: &str = "did:sov:BzCbsNYhMrjHiqZDTUASHg;spec/";

/// Message type of an out-of-band invitation.
pub const INVITATION_TYPE: &str = "https://didcomm.org/out-of-band/1.1/invitation";

/// Service type used for inline service blocks.
pub const DID_COMMUNICATION_SERVICE: &str = "did-communication";

/// Strip either DIDComm prefix from a message type or protocol identifier.
pub fn unqualify(identifier: &str) -> &str {
    identifier
        .strip_prefix(DIDCOMM_PREFIX)
        .or_else(|| identifier.strip_prefix(DIDCOMM_LEGACY_PREFIX))
        .unwrap_or(identifier)
}

/// Qualify a protocol identifier with the current DIDComm prefix.
pub fn qualify(identifier: &str) -> String {
    format!("{DIDCOMM_PREFIX}{}", unqualify(identifier))
}

/// A handshake sub-protocol that can establish a new connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeProtocol {
    /// DID exchange (Aries RFC 0023).
    Rfc23,
    /// Legacy connection protocol (Aries RFC 0160).
    Rfc160,
}

impl HandshakeProtocol {
    /// All known protocols, in preference order.
    pub const ALL: [HandshakeProtocol; 2] = [HandshakeProtocol::Rfc23, HandshakeProtocol::Rfc160];

    /// Unqualified protocol name, e.g. `didexchange/1.0`.
    pub fn name(&self) -> &'static str {
        match self {
            HandshakeProtocol::Rfc23 => "didexchange/1.0",
            HandshakeProtocol::Rfc160 => "connections/1.0",
        }
    }

    /// Fully qualified protocol identifier as written into invitations.
    pub fn qualified(&self) -> String {
        qualify(self.name())
    }

    /// Whether the protocol needs explicit key material instead of a DID reference.
    pub fn requires_explicit_keys(&self) -> bool {
        matches!(self, HandshakeProtocol::Rfc160)
    }

    /// Look up a protocol by any accepted spelling. Unknown identifiers yield `None`.
    pub fn parse(identifier: &str) -> Option<Self> {
        let bare = unqualify(identifier.trim()).to_ascii_lowercase();
        match bare.as_str() {
            "didexchange/1.0" | "rfc23" | "23" => Some(HandshakeProtocol::Rfc23),
            "connections/1.0" | "rfc160" | "160" => Some(HandshakeProtocol::Rfc160),
            _ => None,
        }
    }
}

impl fmt::Display for HandshakeProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HandshakeProtocol {
    type Err = OobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HandshakeProtocol::parse(s)
            .ok_or_else(|| OobError::InvalidInvitation(format!("Unknown handshake protocol: {s}")))
    }
}

/// Inline service descriptor: keys plus an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineService {
    /// Service id, `#inline` for invitations built here.
    pub id: String,
    /// Service type.
    #[serde(rename = "type")]
    pub service_type: String,
    /// Recipient keys as `did:key` references.
    #[serde(rename = "recipientKeys", default)]
    pub recipient_keys: Vec<String>,
    /// Routing (mediator) keys as `did:key` references.
    #[serde(rename = "routingKeys", default)]
    pub routing_keys: Vec<String>,
    /// Endpoint URL.
    #[serde(rename = "serviceEndpoint")]
    pub service_endpoint: String,
}

impl InlineService {
    /// Build a `did-communication` inline service block.
    pub fn did_communication(
        recipient_keys: Vec<String>,
        routing_keys: Vec<String>,
        service_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            id: "#inline".to_string(),
            service_type: DID_COMMUNICATION_SERVICE.to_string(),
            recipient_keys,
            routing_keys,
            service_endpoint: service_endpoint.into(),
        }
    }
}

/// A single entry of an invitation's `services` array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServiceEntry {
    /// A bare DID reference, e.g. `did:sov:WgWxqztrNooG92RXvxSTWv`.
    Did(String),
    /// An inline descriptor.
    Inline(InlineService),
}

impl ServiceEntry {
    /// The unqualified public DID when this entry is a bare DID reference.
    pub fn public_did(&self) -> Option<&str> {
        match self {
            ServiceEntry::Did(did) => did.rsplit(':').next(),
            ServiceEntry::Inline(_) => None,
        }
    }

    /// The inline endpoint, if any.
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            ServiceEntry::Did(_) => None,
            ServiceEntry::Inline(svc) => Some(svc.service_endpoint.as_str()),
        }
    }
}

/// Payload of an attachment.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AttachData {
    /// Inline JSON content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json: Option<serde_json::Value>,
    /// Base64 (standard or URL-safe) encoded JSON content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base64: Option<String>,
}

/// An attached application message (`requests~attach` entry).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachDecorator {
    /// Attachment identifier.
    #[serde(rename = "@id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Media type of the content.
    #[serde(rename = "mime-type", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// The payload.
    pub data: AttachData,
}

impl AttachDecorator {
    /// Wrap a JSON message as an attachment.
    pub fn wrap_json(ident: impl Into<String>, message: serde_json::Value) -> Self {
        Self {
            id: Some(ident.into()),
            mime_type: Some("application/json".to_string()),
            data: AttachData {
                json: Some(message),
                base64: None,
            },
        }
    }

    /// Extract the attached application message.
    ///
    /// The content must be a JSON object carrying a string `@type`.
    pub fn content(&self) -> OobResult<serde_json::Value> {
        let value = match (&self.data.json, &self.data.base64) {
            (Some(json), _) => json.clone(),
            (None, Some(encoded)) => {
                let trimmed = encoded.trim_end_matches('=');
                let bytes = URL_SAFE_NO_PAD
                    .decode(trimmed)
                    .or_else(|_| base64::engine::general_purpose::STANDARD_NO_PAD.decode(trimmed))
                    .map_err(|e| OobError::MalformedAttachment(format!("invalid base64: {e}")))?;
                serde_json::from_slice(&bytes)
                    .map_err(|e| OobError::MalformedAttachment(format!("invalid JSON: {e}")))?
            }
            (None, None) => {
                return Err(OobError::MalformedAttachment(
                    "attachment carries no data".to_string(),
                ))
            }
        };
        let has_type = value
            .get("@type")
            .and_then(|t| t.as_str())
            .is_some_and(|t| !t.is_empty());
        if !value.is_object() || !has_type {
            return Err(OobError::MalformedAttachment(
                "attached content is not a DIDComm message".to_string(),
            ));
        }
        Ok(value)
    }
}

/// An out-of-band invitation message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invitation {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@type", default = "default_invitation_type")]
    msg_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    label: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    handshake_protocols: Vec<String>,
    #[serde(rename = "requests~attach", default, skip_serializing_if = "Vec::is_empty")]
    requests_attach: Vec<AttachDecorator>,
    #[serde(default)]
    services: Vec<ServiceEntry>,
}

fn default_invitation_type() -> String {
    INVITATION_TYPE.to_string()
}

impl Invitation {
    /// Construct an invitation.
    pub fn new(
        id: impl Into<String>,
        label: Option<String>,
        handshake_protocols: Vec<String>,
        requests_attach: Vec<AttachDecorator>,
        services: Vec<ServiceEntry>,
    ) -> Self {
        Self {
            id: id.into(),
            msg_type: default_invitation_type(),
            label,
            handshake_protocols,
            requests_attach,
            services,
        }
    }

    /// The invitation message id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The message type.
    pub fn msg_type(&self) -> &str {
        &self.msg_type
    }

    /// Human-readable label of the inviter.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Handshake protocol identifiers, in inviter preference order.
    pub fn handshake_protocols(&self) -> &[String] {
        &self.handshake_protocols
    }

    /// Attached application messages.
    pub fn requests_attach(&self) -> &[AttachDecorator] {
        &self.requests_attach
    }

    /// Service entries.
    pub fn services(&self) -> &[ServiceEntry] {
        &self.services
    }

    /// Known handshake protocols in invitation order, duplicates collapsed.
    pub fn known_handshake_protocols(&self) -> Vec<HandshakeProtocol> {
        let mut out = Vec::new();
        for proto in self.handshake_protocols.iter().filter_map(|p| HandshakeProtocol::parse(p)) {
            if !out.contains(&proto) {
                out.push(proto);
            }
        }
        out
    }

    /// Validate the shape required to receive an invitation.
    pub fn validate_for_receipt(&self) -> OobResult<()> {
        if self.services.len() != 1 {
            return Err(OobError::InvalidInvitation(
                "service array must have exactly one element".to_string(),
            ));
        }
        if self.handshake_protocols.is_empty() && self.requests_attach.is_empty() {
            return Err(OobError::InvalidInvitation(
                "Invitation must specify handshake_protocols, requests_attach, or both".to_string(),
            ));
        }
        Ok(())
    }

    /// Encode the invitation as a URL: `<base>?oob=<base64url(json)>`.
    ///
    /// Without an explicit base, the inline service endpoint is used.
    pub fn to_url(&self, base: Option<&str>) -> OobResult<String> {
        let base = base
            .or_else(|| self.services.first().and_then(|s| s.endpoint()))
            .ok_or_else(|| {
                OobError::InvalidInvitation("no endpoint available for invitation URL".to_string())
            })?;
        let mut url = url::Url::parse(base)
            .map_err(|e| OobError::InvalidInvitation(format!("invalid endpoint '{base}': {e}")))?;
        let json = serde_json::to_vec(self)?;
        url.query_pairs_mut()
            .append_pair("oob", &URL_SAFE_NO_PAD.encode(json));
        Ok(url.to_string())
    }

    /// Decode an invitation from its URL form (`oob=` or legacy `c_i=`).
    pub fn from_url(raw: &str) -> OobResult<Self> {
        let url = url::Url::parse(raw)
            .map_err(|e| OobError::InvalidInvitation(format!("invalid invitation URL: {e}")))?;
        let encoded = url
            .query_pairs()
            .find(|(k, _)| k == "oob" || k == "c_i")
            .map(|(_, v)| v.into_owned())
            .ok_or_else(|| {
                OobError::InvalidInvitation("URL carries no oob query parameter".to_string())
            })?;
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded.trim_end_matches('='))
            .map_err(|e| OobError::InvalidInvitation(format!("invalid base64 payload: {e}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| OobError::InvalidInvitation(format!("invalid invitation JSON: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inline_invitation() -> Invitation {
        Invitation::new(
            "inv-1",
            Some("Alice".into()),
            vec![HandshakeProtocol::Rfc23.qualified()],
            vec![],
            vec![ServiceEntry::Inline(InlineService::did_communication(
                vec!["did:key:z6MkexampleA".into()],
                vec![],
                "http://alice.example:8020",
            ))],
        )
    }

    #[test]
    fn protocol_parse_accepts_both_prefixes() {
        assert_eq!(
            HandshakeProtocol::parse("https://didcomm.org/didexchange/1.0"),
            Some(HandshakeProtocol::Rfc23)
        );
        assert_eq!(
            HandshakeProtocol::parse("did:sov:BzCbsNYhMrjHiqZDTUASHg;spec/connections/1.0"),
            Some(HandshakeProtocol::Rfc160)
        );
        assert_eq!(HandshakeProtocol::parse("RFC160"), Some(HandshakeProtocol::Rfc160));
        assert_eq!(HandshakeProtocol::parse("https://didcomm.org/unknown/1.0"), None);
    }

    #[test]
    fn known_protocols_dedupe_in_invitation_order() {
        let inv = Invitation::new(
            "inv-2",
            None,
            vec![
                HandshakeProtocol::Rfc160.qualified(),
                "https://didcomm.org/mystery/2.0".into(),
                HandshakeProtocol::Rfc23.qualified(),
                "did:sov:BzCbsNYhMrjHiqZDTUASHg;spec/connections/1.0".into(),
            ],
            vec![],
            vec![ServiceEntry::Did("did:sov:abc".into())],
        );
        assert_eq!(
            inv.known_handshake_protocols(),
            vec![HandshakeProtocol::Rfc160, HandshakeProtocol::Rfc23]
        );
    }

    #[test]
    fn public_did_is_last_segment() {
        let svc = ServiceEntry::Did("did:sov:WgWxqztrNooG92RXvxSTWv".into());
        assert_eq!(svc.public_did(), Some("WgWxqztrNooG92RXvxSTWv"));
        assert!(inline_invitation().services()[0].public_did().is_none());
    }

    #[test]
    fn service_entries_deserialize_untagged() {
        let raw = json!({
            "@id": "inv-3",
            "handshake_protocols": ["https://didcomm.org/didexchange/1.0"],
            "services": ["did:sov:abc"]
        });
        let inv: Invitation = serde_json::from_value(raw).unwrap();
        assert_eq!(inv.msg_type(), INVITATION_TYPE);
        assert!(matches!(inv.services()[0], ServiceEntry::Did(_)));
    }

    #[test]
    fn url_uses_inline_endpoint_and_decodes() {
        let inv = inline_invitation();
        let url = inv.to_url(None).unwrap();
        assert!(url.starts_with("http://alice.example:8020/?oob="));
        let decoded = Invitation::from_url(&url).unwrap();
        assert_eq!(decoded, inv);
    }

    #[test]
    fn url_without_endpoint_is_rejected() {
        let inv = Invitation::new(
            "inv-4",
            None,
            vec![HandshakeProtocol::Rfc23.qualified()],
            vec![],
            vec![ServiceEntry::Did("did:sov:abc".into())],
        );
        assert!(matches!(inv.to_url(None), Err(OobError::InvalidInvitation(_))));
        assert!(inv.to_url(Some("https://issuer.example")).is_ok());
    }

    #[test]
    fn receipt_validation() {
        let no_services = Invitation::new("a", None, vec!["x".into()], vec![], vec![]);
        assert!(no_services.validate_for_receipt().is_err());

        let empty = Invitation::new(
            "b",
            None,
            vec![],
            vec![],
            vec![ServiceEntry::Did("did:sov:abc".into())],
        );
        assert!(matches!(
            empty.validate_for_receipt(),
            Err(OobError::InvalidInvitation(_))
        ));
        assert!(inline_invitation().validate_for_receipt().is_ok());
    }

    #[test]
    fn attachment_content_requires_message_type() {
        let good = AttachDecorator::wrap_json(
            "request-0",
            json!({"@type": "https://didcomm.org/present-proof/2.0/request-presentation", "@id": "p1"}),
        );
        assert!(good.content().is_ok());

        let bad = AttachDecorator::wrap_json("request-0", json!({"hello": "world"}));
        assert!(matches!(bad.content(), Err(OobError::MalformedAttachment(_))));

        let empty = AttachDecorator {
            id: None,
            mime_type: None,
            data: AttachData::default(),
        };
        assert!(matches!(empty.content(), Err(OobError::MalformedAttachment(_))));
    }

    #[test]
    fn attachment_content_from_base64() {
        let msg = json!({"@type": "https://didcomm.org/issue-credential/2.0/offer-credential"});
        let encoded = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&msg).unwrap());
        let attach = AttachDecorator {
            id: Some("request-0".into()),
            mime_type: None,
            data: AttachData {
                json: None,
                base64: Some(encoded),
            },
        };
        assert_eq!(attach.content().unwrap(), msg);
    }
}
