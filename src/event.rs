//! Typed stream events and the payload decoder.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Secret revealed by the server. Ends the turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PasswordFound {
    pub password: String,
    pub prize_type: String,
    pub prize_amount: String,
    pub is_first_winner: bool,
}

/// Mid-conversation offer: take the consolation prize now or keep playing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BonusOffer {
    pub total_turns: u32,
    pub consolation_prize_amount: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consolation_password: Option<String>,
    pub grand_available: bool,
}

/// One decoded `data: ` payload. The server omits empty fields, so every
/// field falls back to its default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Incremental assistant text; may contain hidden-region markers.
    Content {
        #[serde(default)]
        content: String,
    },
    PasswordFound(PasswordFound),
    BonusOffer(BonusOffer),
    /// Stream-level failure reported by the server.
    Error {
        #[serde(default)]
        content: String,
    },
}

impl StreamEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Content { .. } => "content",
            StreamEvent::PasswordFound(_) => "password_found",
            StreamEvent::BonusOffer(_) => "bonus_offer",
            StreamEvent::Error { .. } => "error",
        }
    }

    /// True for kinds that end the turn.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::PasswordFound(_) | StreamEvent::Error { .. })
    }
}

/// Decode one frame payload.
///
/// Total: malformed JSON and unknown kinds yield `None` so the caller can keep
/// consuming the stream.
pub fn decode(payload: &str) -> Option<StreamEvent> {
    match serde_json::from_str::<StreamEvent>(payload) {
        Ok(event) => Some(event),
        Err(e) => {
            debug!(error = %e, payload_len = payload.len(), "skipping undecodable frame");
            None
        }
    }
}
