//! The self-contained JSON envelope carried in every text frame.
//!
//! ```json
//! {"kind":"message","space":"spc_…","payload":{…}}
//! {"kind":"invite","user":"usr_…","payload":{…}}
//! ```

use eligos_core::{SpaceId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where an envelope goes: every connected member of a space, or one identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Space(SpaceId),
    User(UserId),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawEnvelope")]
pub struct Envelope {
    pub kind: String,
    #[serde(flatten)]
    pub route: Route,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("malformed envelope: {0}")]
    Malformed(String),

    #[error("envelope has no kind")]
    MissingKind,

    #[error("envelope has no route")]
    MissingRoute,

    #[error("envelope names both a space and a user")]
    AmbiguousRoute,
}

#[derive(Deserialize)]
struct RawEnvelope {
    kind: Option<String>,
    space: Option<SpaceId>,
    user: Option<UserId>,
    #[serde(default)]
    payload: Value,
}

impl TryFrom<RawEnvelope> for Envelope {
    type Error = EnvelopeError;

    fn try_from(raw: RawEnvelope) -> Result<Self, Self::Error> {
        let kind = raw.kind.filter(|k| !k.is_empty()).ok_or(EnvelopeError::MissingKind)?;
        let route = match (raw.space, raw.user) {
            (Some(space), None) => Route::Space(space),
            (None, Some(user)) => Route::User(user),
            (Some(_), Some(_)) => return Err(EnvelopeError::AmbiguousRoute),
            (None, None) => return Err(EnvelopeError::MissingRoute),
        };
        Ok(Self {
            kind,
            route,
            payload: raw.payload,
        })
    }
}

impl Envelope {
    pub fn new(kind: impl Into<String>, route: Route, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            route,
            payload,
        }
    }

    /// Decode one inbound frame.
    pub fn decode(raw: &str) -> Result<Self, EnvelopeError> {
        let raw: RawEnvelope =
            serde_json::from_str(raw).map_err(|e| EnvelopeError::Malformed(e.to_string()))?;
        Self::try_from(raw)
    }

    /// Compact single-line JSON, safe to join with `\n`.
    pub fn encode(&self) -> Result<String, EnvelopeError> {
        serde_json::to_string(self).map_err(|e| EnvelopeError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_space_route() {
        let env = Envelope::decode(r#"{"kind":"message","space":"S1","payload":"hi"}"#).unwrap();
        assert_eq!(env.kind, "message");
        assert_eq!(env.route, Route::Space(SpaceId::from_raw("S1")));
        assert_eq!(env.payload, json!("hi"));
    }

    #[test]
    fn decode_user_route_without_payload() {
        let env = Envelope::decode(r#"{"kind":"invite","user":"u2"}"#).unwrap();
        assert_eq!(env.route, Route::User(UserId::from_raw("u2")));
        assert_eq!(env.payload, Value::Null);
    }

    #[test]
    fn encode_flattens_route() {
        let env = Envelope::new("message", Route::Space(SpaceId::from_raw("S1")), json!({"id": "m1"}));
        let value: Value = serde_json::from_str(&env.encode().unwrap()).unwrap();
        assert_eq!(value, json!({"kind": "message", "space": "S1", "payload": {"id": "m1"}}));
    }

    #[test]
    fn encoded_payload_newlines_are_escaped() {
        let env = Envelope::new("message", Route::User(UserId::from_raw("u1")), json!("a\nb"));
        assert!(!env.encode().unwrap().contains('\n'));
    }

    #[test]
    fn rejects_bad_envelopes() {
        assert!(matches!(Envelope::decode("not json"), Err(EnvelopeError::Malformed(_))));
        assert_eq!(
            Envelope::decode(r#"{"space":"S1","payload":1}"#),
            Err(EnvelopeError::MissingKind)
        );
        assert_eq!(
            Envelope::decode(r#"{"kind":"","space":"S1"}"#),
            Err(EnvelopeError::MissingKind)
        );
        assert_eq!(
            Envelope::decode(r#"{"kind":"message","payload":1}"#),
            Err(EnvelopeError::MissingRoute)
        );
        assert_eq!(
            Envelope::decode(r#"{"kind":"message","space":"S1","user":"u1"}"#),
            Err(EnvelopeError::AmbiguousRoute)
        );
    }

    #[test]
    fn serde_path_applies_same_rules() {
        let ok: Envelope = serde_json::from_value(json!({"kind": "k", "user": "u1"})).unwrap();
        assert_eq!(ok.route, Route::User(UserId::from_raw("u1")));
        assert!(serde_json::from_value::<Envelope>(json!({"kind": "k"})).is_err());
    }
}
