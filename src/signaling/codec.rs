//! Signaling frame codec
//!
//! Translates between text frames and [`SignalingMessage`]. Decoding accepts
//! both peer dialects; encoding emits the dialect the receiving peer expects.
//! This is the only place where the two naming conventions meet.

use super::{CodecError, Dialect, IceCandidate, SdpKind, SessionDescription, SignalingMessage};
use log::warn;
use serde_json::{json, Map, Value};

const JSON_TYPE: &str = "type";
const JSON_SDP: &str = "sdp";
const JSON_DESCRIPTION: &str = "description";
const JSON_CANDIDATE: &str = "candidate";
const JSON_SDP_MID: &str = "sdpMid";
const JSON_SDP_MLINE_INDEX: &str = "sdpMLineIndex";

/// Message codec for signaling frames
pub struct MessageCodec;

impl MessageCodec {
    /// Decode a text frame.
    ///
    /// Classification order is ICE triple, then type field, then empty.
    /// `null` and objects matching no known shape decode to
    /// [`SignalingMessage::Empty`]; only text that is not JSON, or JSON that
    /// is neither an object nor null, is an error.
    pub fn decode(raw: &str) -> Result<SignalingMessage, CodecError> {
        let value: Value = serde_json::from_str(raw.trim())
            .map_err(|e| CodecError(format!("invalid JSON: {}", e)))?;

        let object = match value {
            Value::Null => return Ok(SignalingMessage::Empty),
            Value::Object(object) => object,
            other => {
                return Err(CodecError(format!(
                    "expected object or null, got {}",
                    json_kind(&other)
                )))
            }
        };

        if has_ice_fields(&object) {
            return Ok(match parse_ice_candidate(&object) {
                Some(candidate) => SignalingMessage::IceCandidate(candidate),
                None => {
                    warn!("Ignoring ICE candidate with unusable field values");
                    SignalingMessage::Empty
                }
            });
        }

        if object.contains_key(JSON_TYPE) {
            return Ok(match parse_session_description(&object) {
                Some(description) => SignalingMessage::SessionDescription(description),
                None => {
                    warn!(
                        "Ignoring session description with type {:?}",
                        object.get(JSON_TYPE)
                    );
                    SignalingMessage::Empty
                }
            });
        }

        Ok(SignalingMessage::Empty)
    }

    /// Encode a message for a peer speaking `dialect`
    pub fn encode(message: &SignalingMessage, dialect: Dialect) -> String {
        let value = match message {
            SignalingMessage::Empty => Value::Null,
            SignalingMessage::IceCandidate(ice) => {
                let candidate_key = match dialect {
                    Dialect::Browser => JSON_CANDIDATE,
                    Dialect::Native => JSON_SDP,
                };
                let mut object = Map::new();
                object.insert(candidate_key.to_string(), json!(ice.candidate));
                object.insert(JSON_SDP_MID.to_string(), json!(ice.sdp_mid));
                object.insert(JSON_SDP_MLINE_INDEX.to_string(), json!(ice.sdp_mline_index));
                Value::Object(object)
            }
            SignalingMessage::SessionDescription(desc) => match dialect {
                Dialect::Browser => json!({
                    JSON_TYPE: desc.kind.as_str().to_ascii_lowercase(),
                    JSON_SDP: desc.sdp,
                }),
                Dialect::Native => json!({
                    JSON_TYPE: desc.kind.as_str(),
                    JSON_DESCRIPTION: desc.sdp,
                }),
            },
        };
        value.to_string()
    }

    /// Re-emit a frame from either dialect in `target` dialect
    pub fn translate(raw: &str, target: Dialect) -> Result<String, CodecError> {
        Self::decode(raw).map(|message| Self::encode(&message, target))
    }
}

fn has_ice_fields(object: &Map<String, Value>) -> bool {
    // Native peers carry the candidate line under `sdp`, which only
    // session descriptions share, and those always have a `type`.
    let has_candidate = object.contains_key(JSON_CANDIDATE)
        || (object.contains_key(JSON_SDP) && !object.contains_key(JSON_TYPE));
    has_candidate && object.contains_key(JSON_SDP_MID) && object.contains_key(JSON_SDP_MLINE_INDEX)
}

fn parse_ice_candidate(object: &Map<String, Value>) -> Option<IceCandidate> {
    let candidate = object
        .get(JSON_CANDIDATE)
        .or_else(|| object.get(JSON_SDP))?
        .as_str()?
        .to_string();

    // Browsers send null for an unassociated candidate
    let sdp_mid = match object.get(JSON_SDP_MID)? {
        Value::String(mid) => mid.clone(),
        Value::Null => String::new(),
        _ => return None,
    };

    let sdp_mline_index = match object.get(JSON_SDP_MLINE_INDEX)? {
        Value::Number(n) => i32::try_from(n.as_i64()?).ok()?,
        Value::String(s) => s.trim().parse().ok()?,
        Value::Null => 0,
        _ => return None,
    };

    Some(IceCandidate {
        candidate,
        sdp_mid,
        sdp_mline_index,
    })
}

fn parse_session_description(object: &Map<String, Value>) -> Option<SessionDescription> {
    let kind = SdpKind::parse(object.get(JSON_TYPE)?.as_str()?)?;
    let sdp = object
        .get(JSON_SDP)
        .or_else(|| object.get(JSON_DESCRIPTION))?
        .as_str()?
        .to_string();
    Some(SessionDescription { kind, sdp })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
