//! Incremental removal of hidden reasoning regions from streamed text.
//!
//! Models wrap their reasoning in a start/end marker pair (`<think>` and
//! `</think>` by default). The scrubber sees the reply as a sequence of
//! fragments whose boundaries are arbitrary, so a marker may be split across
//! two or more fragments. Any suffix that could still grow into a marker is
//! held back as the pending tail until the next fragment decides it.
//!
//! Feeding `f1, f2, .., fn` one at a time produces exactly the output of
//! feeding `f1 + f2 + .. + fn` once.

use crate::error::HuntError;

pub const THINK_START: &str = "<think>";
pub const THINK_END: &str = "</think>";

/// Delimiters of a hidden region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Markers {
    start: String,
    end: String,
}

impl Markers {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Result<Self, HuntError> {
        let start = start.into();
        let end = end.into();
        if start.is_empty() || end.is_empty() {
            return Err(HuntError::InvalidMarkers(format!(
                "start {:?} and end {:?} must both be non-empty",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn think() -> Self {
        Self {
            start: THINK_START.to_string(),
            end: THINK_END.to_string(),
        }
    }

    pub fn start(&self) -> &str {
        &self.start
    }

    pub fn end(&self) -> &str {
        &self.end
    }

    /// Upper bound on the pending tail length, in bytes.
    pub fn max_tail_len(&self) -> usize {
        self.start.len().max(self.end.len()) - 1
    }
}

impl Default for Markers {
    fn default() -> Self {
        Self::think()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScrubState {
    /// Emitting visible text.
    #[default]
    Outside,
    /// Suppressing text until the end marker.
    Inside,
}

/// Per-turn scrubbing automaton. Create one per submitted message.
#[derive(Debug, Clone)]
pub struct TagScrubber {
    markers: Markers,
    state: ScrubState,
    pending_tail: String,
}

impl TagScrubber {
    pub fn new(markers: Markers) -> Self {
        Self {
            markers,
            state: ScrubState::Outside,
            pending_tail: String::new(),
        }
    }

    pub fn state(&self) -> ScrubState {
        self.state
    }

    pub fn pending_tail(&self) -> &str {
        &self.pending_tail
    }

    pub fn markers(&self) -> &Markers {
        &self.markers
    }

    /// Return to the initial `Outside` state with nothing buffered.
    pub fn reset(&mut self) {
        self.state = ScrubState::Outside;
        self.pending_tail.clear();
    }

    /// Consume one fragment and return the text that is now known to be visible.
    pub fn feed(&mut self, fragment: &str) -> String {
        let mut text = std::mem::take(&mut self.pending_tail);
        text.push_str(fragment);

        let start = self.markers.start.as_str();
        let end = self.markers.end.as_str();
        let mut visible = String::new();
        let mut rest = text.as_str();

        loop {
            match self.state {
                ScrubState::Outside => match rest.find(start) {
                    Some(idx) => {
                        visible.push_str(&rest[..idx]);
                        rest = &rest[idx + start.len()..];
                        self.state = ScrubState::Inside;
                    }
                    None => {
                        let split = rest.len() - partial_marker_len(rest, start);
                        visible.push_str(&rest[..split]);
                        self.pending_tail.push_str(&rest[split..]);
                        break;
                    }
                },
                ScrubState::Inside => match rest.find(end) {
                    Some(idx) => {
                        rest = &rest[idx + end.len()..];
                        self.state = ScrubState::Outside;
                    }
                    None => {
                        // Everything before a possible partial end marker is hidden.
                        let split = rest.len() - partial_marker_len(rest, end);
                        self.pending_tail.push_str(&rest[split..]);
                        break;
                    }
                },
            }
        }

        visible
    }

    /// End of turn. A tail withheld while outside can no longer become a
    /// marker and is released as visible text; a tail inside an unclosed
    /// region is dropped. The scrubber is reset afterwards.
    pub fn finish(&mut self) -> String {
        let tail = std::mem::take(&mut self.pending_tail);
        let state = self.state;
        self.reset();
        match state {
            ScrubState::Outside => tail,
            ScrubState::Inside => String::new(),
        }
    }
}

impl Default for TagScrubber {
    fn default() -> Self {
        Self::new(Markers::default())
    }
}

/// Length in bytes of the longest suffix of `text` that is a proper prefix of
/// `marker`. Suffixes starting inside a UTF-8 sequence never match, since a
/// marker always starts on a character boundary.
fn partial_marker_len(text: &str, marker: &str) -> usize {
    let longest = marker.len().saturating_sub(1).min(text.len());
    (1..=longest)
        .rev()
        .find(|&k| {
            let at = text.len() - k;
            text.is_char_boundary(at) && marker.starts_with(&text[at..])
        })
        .unwrap_or(0)
}

/// Scrub a complete text in one pass.
pub fn scrub_all(markers: &Markers, text: &str) -> String {
    let mut scrubber = TagScrubber::new(markers.clone());
    let mut out = scrubber.feed(text);
    out.push_str(&scrubber.finish());
    out
}
