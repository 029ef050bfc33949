//! Post-call webhook from the voice vendor.
//!
//! Signature header format: `t=<unix seconds>,v0=<hex hmac>`, where the HMAC is
//! SHA-256 keyed by the shared secret over `"{t}.{raw body}"`. Comparison is
//! constant time (`Mac::verify_slice`).

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "elevenlabs-signature";

/// Event type carrying the transcript; other event types are acknowledged and ignored.
pub const TRANSCRIPTION_EVENT: &str = "post_call_transcription";

/// Dynamic variable the voice client sets to identify the caller.
pub const USER_EMAIL_VARIABLE: &str = "user_email";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Webhook secret is not configured")]
    MissingSecret,

    #[error("Missing signature header")]
    MissingHeader,

    #[error("Malformed signature header")]
    MalformedHeader,

    #[error("Signature timestamp is {age_secs}s old")]
    Expired { age_secs: i64 },

    #[error("Signature mismatch")]
    Mismatch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp: i64,
    pub signature: Vec<u8>,
}

/// Parse `t=<ts>,v0=<hex>`. Parts may come in any order; unknown parts are ignored.
pub fn parse_header(header: &str) -> Result<SignatureHeader, SignatureError> {
    let mut timestamp = None;
    let mut signature = None;

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse::<i64>().ok(),
            "v0" => signature = hex::decode(value).ok(),
            _ => {}
        }
    }

    match (timestamp, signature) {
        (Some(timestamp), Some(signature)) => Ok(SignatureHeader {
            timestamp,
            signature,
        }),
        _ => Err(SignatureError::MalformedHeader),
    }
}

fn mac_for(secret: &str, timestamp: i64, body: &[u8]) -> HmacSha256 {
    // HMAC accepts keys of any length, so this cannot fail.
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take any size");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    mac
}

/// Compare two secrets without an early exit on the first differing byte.
///
/// Both sides are MACed under `expected` and the tags compared with
/// `verify_slice`, so the timing does not track the common prefix.
pub fn secrets_match(expected: &str, presented: &str) -> bool {
    let tag = mac_for(expected, 0, expected.as_bytes()).finalize().into_bytes();
    mac_for(expected, 0, presented.as_bytes())
        .verify_slice(&tag)
        .is_ok()
}

/// Hex HMAC for `timestamp` and `body`.
pub fn sign(secret: &str, timestamp: i64, body: &[u8]) -> String {
    hex::encode(mac_for(secret, timestamp, body).finalize().into_bytes())
}

/// Full header value, as the vendor would send it.
pub fn signature_header(secret: &str, timestamp: i64, body: &[u8]) -> String {
    format!("t={},v0={}", timestamp, sign(secret, timestamp, body))
}

/// Check a webhook request. `tolerance_secs = 0` disables the age check.
pub fn verify(
    secret: Option<&str>,
    header: Option<&str>,
    body: &[u8],
    now: i64,
    tolerance_secs: u64,
) -> Result<(), SignatureError> {
    let secret = secret
        .filter(|s| !s.is_empty())
        .ok_or(SignatureError::MissingSecret)?;
    let header = header.ok_or(SignatureError::MissingHeader)?;
    let parsed = parse_header(header)?;

    if tolerance_secs > 0 {
        // The header is unauthenticated here; treat overflow as expired.
        let age_secs = now.checked_sub(parsed.timestamp).unwrap_or(i64::MAX);
        if age_secs > i64::try_from(tolerance_secs).unwrap_or(i64::MAX) {
            return Err(SignatureError::Expired { age_secs });
        }
    }

    mac_for(secret, parsed.timestamp, body)
        .verify_slice(&parsed.signature)
        .map_err(|_| SignatureError::Mismatch)
}

// ============================================================================
// Payload
// ============================================================================

#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("Invalid JSON body: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),
}

#[derive(Debug, Deserialize)]
pub struct PostCallEvent {
    #[serde(rename = "type", default)]
    pub event_type: String,
    #[serde(default)]
    pub event_timestamp: Option<i64>,
    #[serde(default)]
    pub data: Option<PostCallData>,
}

#[derive(Debug, Deserialize)]
pub struct PostCallData {
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub transcript: Vec<TranscriptTurn>,
    #[serde(default)]
    pub metadata: Option<CallMetadata>,
    #[serde(default)]
    pub conversation_initiation_client_data: Option<ClientData>,
}

#[derive(Debug, Deserialize)]
pub struct TranscriptTurn {
    pub role: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CallMetadata {
    #[serde(default)]
    pub call_duration_secs: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct ClientData {
    #[serde(default)]
    pub dynamic_variables: HashMap<String, serde_json::Value>,
}

/// The fields the transcript pipeline needs from a post-call event.
#[derive(Debug, Clone, PartialEq)]
pub struct PostCall {
    pub conversation_id: String,
    pub user_email: String,
    pub transcript: String,
    pub duration_secs: i32,
}

impl PostCallEvent {
    pub fn from_body(body: &[u8]) -> Result<Self, PayloadError> {
        Ok(serde_json::from_slice(body)?)
    }

    /// Events without a type are treated as transcriptions.
    pub fn is_transcription(&self) -> bool {
        self.event_type.is_empty() || self.event_type == TRANSCRIPTION_EVENT
    }

    /// Validate the required fields. `conversation_id` is checked first.
    pub fn into_post_call(self) -> Result<PostCall, PayloadError> {
        let data = self
            .data
            .ok_or(PayloadError::MissingField("conversation_id"))?;

        let conversation_id = data
            .conversation_id
            .clone()
            .filter(|c| !c.trim().is_empty())
            .ok_or(PayloadError::MissingField("conversation_id"))?;

        let user_email = data
            .conversation_initiation_client_data
            .as_ref()
            .and_then(|c| c.dynamic_variables.get(USER_EMAIL_VARIABLE))
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or(PayloadError::MissingField(USER_EMAIL_VARIABLE))?;

        let duration_secs = data
            .metadata
            .as_ref()
            .and_then(|m| m.call_duration_secs)
            .map(|d| d.round() as i32)
            .unwrap_or(0);

        Ok(PostCall {
            conversation_id,
            user_email,
            transcript: render_transcript(&data.transcript),
            duration_secs,
        })
    }
}

/// `role: message` per turn; turns without text are skipped.
pub fn render_transcript(turns: &[TranscriptTurn]) -> String {
    turns
        .iter()
        .filter_map(|t| {
            let msg = t.message.as_deref()?.trim();
            if msg.is_empty() {
                None
            } else {
                Some(format!("{}: {}", t.role, msg))
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
