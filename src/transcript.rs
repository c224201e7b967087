//! Visible text of the in-flight assistant reply.

use crate::redact::{Redaction, SecretRedactor};

/// Accumulated, already-filtered reply text for one exchange.
///
/// Append-only while streaming, apart from a single redaction rewrite and
/// error replacement. Committing consumes it, so a committed reply can no
/// longer change.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct VisibleTranscript {
    text: String,
    redacted: bool,
}

impl VisibleTranscript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn is_redacted(&self) -> bool {
        self.redacted
    }

    /// Append scrubbed text. Returns false when there was nothing to add.
    pub fn append(&mut self, visible: &str) -> bool {
        if visible.is_empty() {
            return false;
        }
        self.text.push_str(visible);
        true
    }

    /// Replace the whole reply, e.g. with a server error message.
    pub fn replace(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    /// Retroactively redact `token`. Only the first call has any effect.
    pub fn redact(&mut self, redactor: &SecretRedactor, token: &str) -> Option<Redaction> {
        if self.redacted {
            return None;
        }
        let redaction = redactor.redact(&self.text, token);
        self.text.clone_from(&redaction.text);
        self.redacted = true;
        Some(redaction)
    }

    pub fn commit(self) -> String {
        self.text
    }
}
