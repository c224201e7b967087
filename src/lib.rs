//! Streaming client for the password-hunt chat game.
//!
//! A reply travels through five stages:
//!
//! 1. [`frame::FrameReader`] splits the raw body into `data: ` payloads.
//! 2. [`event::decode`] turns each payload into a [`StreamEvent`].
//! 3. [`scrubber::TagScrubber`] removes hidden reasoning regions from content.
//! 4. [`redact::SecretRedactor`] rewrites the reply once a secret is revealed.
//! 5. [`orchestrator::StreamOrchestrator`] ties them together per message turn
//!    and publishes [`TurnUpdate`]s for the view.

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod event;
pub mod frame;
pub mod orchestrator;
pub mod redact;
pub mod render;
pub mod scrubber;
pub mod transcript;

pub use client::{
    BonusChoice, BonusChoiceOutcome, ByteStream, ConversationStatus, GameApi, HttpGameClient,
    MessageRequest, Rejection, SiteInfo, Submission,
};
pub use config::HuntConfig;
pub use error::HuntError;
pub use event::{BonusOffer, PasswordFound, StreamEvent};
pub use frame::{Frame, FrameReader};
pub use orchestrator::{StatusLevel, StreamOrchestrator, TurnOutcome, TurnStatus, TurnUpdate};
pub use redact::{Redaction, SecretRedactor};
pub use render::TerminalView;
pub use scrubber::{Markers, ScrubState, TagScrubber};
pub use transcript::VisibleTranscript;

// ---------------------------------------------------------------------------
// One-shot helpers
// ---------------------------------------------------------------------------

/// Visible text of a complete, already-buffered response body.
///
/// Runs the same frame, decode and scrub stages as a live turn and ignores
/// non-content events.
pub fn visible_text(body: &[u8], markers: &Markers) -> String {
    let mut reader = FrameReader::new();
    let mut scrubber = TagScrubber::new(markers.clone());
    let mut out = String::new();

    let mut frames = reader.push(body);
    frames.extend(reader.finish());
    for frame in frames {
        let Frame::Data(payload) = frame else { break };
        if let Some(StreamEvent::Content { content }) = event::decode(&payload) {
            out.push_str(&scrubber.feed(&content));
        }
    }
    out.push_str(&scrubber.finish());
    out
}
