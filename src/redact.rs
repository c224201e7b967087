//! Retroactive removal of a revealed secret from the visible transcript.
//!
//! When the server reports `password_found`, the secret has usually already
//! been rendered as part of the reply. The redactor replaces every literal
//! occurrence with a placeholder (so the reader can see that something was
//! removed) and strips the guidance sentence the server appends when it hands
//! out the secret on its own.

use regex::Regex;
use tracing::debug;

use crate::error::HuntError;

pub const DEFAULT_PLACEHOLDER: &str = "***";

/// Token replaced in guidance templates by the escaped placeholder.
pub const PLACEHOLDER_SLOT: &str = "{placeholder}";

/// Guidance sentence variants: the current format with the `（共N轮对话）`
/// turn count, and the older one without it. Both tolerate arbitrary text
/// before the final `口令是：<placeholder>`.
pub const DEFAULT_GUIDANCE_PATTERNS: &[&str] = &[
    r"(?s)\n\n好吧，你已经和我聊了这么久了（共\d+轮对话）.*?口令是：{placeholder}",
    r"(?s)\n\n好吧，你已经和我聊了这么久了(?:[^（].*?)?口令是：{placeholder}",
];

/// Result of one redaction pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redaction {
    pub text: String,
    pub tokens_replaced: usize,
    pub guidance_removed: usize,
}

impl Redaction {
    pub fn is_noop(&self) -> bool {
        self.tokens_replaced == 0 && self.guidance_removed == 0
    }
}

#[derive(Debug, Clone)]
pub struct SecretRedactor {
    placeholder: String,
    guidance: Vec<Regex>,
}

impl SecretRedactor {
    /// Build a redactor from guidance templates; `{placeholder}` in a template
    /// matches the placeholder literally.
    pub fn new<S: AsRef<str>>(
        placeholder: impl Into<String>,
        templates: &[S],
    ) -> Result<Self, HuntError> {
        let placeholder = placeholder.into();
        let escaped = regex::escape(&placeholder);
        let guidance = templates
            .iter()
            .map(|t| Regex::new(&t.as_ref().replace(PLACEHOLDER_SLOT, &escaped)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            placeholder,
            guidance,
        })
    }

    pub fn placeholder(&self) -> &str {
        &self.placeholder
    }

    /// Replace `token` with the placeholder and drop guidance sentences.
    /// Running it again on its own output changes nothing.
    pub fn redact(&self, text: &str, token: &str) -> Redaction {
        let mut out = text.to_string();
        let mut tokens_replaced = 0;

        // A token inside the placeholder would be re-matched on every pass.
        if !token.is_empty() && !self.placeholder.contains(token) {
            tokens_replaced = out.matches(token).count();
            if tokens_replaced > 0 {
                out = out.replace(token, &self.placeholder);
            }
        }

        let mut guidance_removed = 0;
        for pattern in &self.guidance {
            let hits = pattern.find_iter(&out).count();
            if hits > 0 {
                out = pattern.replace_all(&out, "").into_owned();
                guidance_removed += hits;
            }
        }

        let redaction = Redaction {
            text: out,
            tokens_replaced,
            guidance_removed,
        };
        if redaction.is_noop() {
            debug!(token_len = token.len(), "secret not present in transcript, nothing redacted");
        } else {
            debug!(tokens_replaced, guidance_removed, "transcript redacted");
        }
        redaction
    }
}

impl Default for SecretRedactor {
    /// Panics only if the built-in patterns stop compiling, which
    /// `test_default_patterns_compile` catches.
    fn default() -> Self {
        Self::new(DEFAULT_PLACEHOLDER, DEFAULT_GUIDANCE_PATTERNS)
            .expect("built-in guidance patterns compile")
    }
}
