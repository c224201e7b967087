//! Drives one message exchange from submission to input re-enable.
//!
//! The orchestrator owns all per-turn state: a fresh [`TagScrubber`] and
//! [`VisibleTranscript`] are created for every submitted message and dropped
//! when its stream ends. View updates are pushed as [`TurnUpdate`]s over an
//! unbounded channel, in arrival order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::client::{
    BonusChoice, BonusChoiceOutcome, ByteStream, ConversationStatus, GameApi, MessageRequest,
    Rejection, Submission,
};
use crate::config::HuntConfig;
use crate::error::HuntError;
use crate::event::{self, BonusOffer, PasswordFound, StreamEvent};
use crate::frame::{Frame, FrameReader};
use crate::redact::SecretRedactor;
use crate::scrubber::{Markers, TagScrubber};
use crate::transcript::VisibleTranscript;

pub const SEND_FAILED: &str = "Send failed, please retry";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Instruction for the view layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnUpdate {
    /// Full visible text of the in-flight reply.
    Text(String),
    InputEnabled(bool),
    Status { level: StatusLevel, message: String },
    TurnCounter { turn_count: u32, max_turns: u32 },
    /// Outcome of a reveal, delivered after the configured delay.
    Revealed { found: PasswordFound, via_bonus: bool },
    /// One-time claim-or-continue choice; answer with `choose_bonus`.
    BonusOffer(BonusOffer),
    /// The turn failed; the text replaces the reply.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnStatus {
    Completed,
    Revealed(PasswordFound),
    /// The server reported an `error` event.
    Failed(String),
    /// Network failure or non-OK status without a structured body.
    TransportFailed(String),
    /// Declined before streaming.
    Rejected(Rejection),
    /// The user already won; nothing was streamed.
    UserSuccess(String),
}

impl TurnStatus {
    /// True once a reveal, a server error or a broken stream has ended the
    /// turn. No further text reaches the transcript after that.
    fn ends_stream(&self) -> bool {
        matches!(
            self,
            TurnStatus::Revealed(_) | TurnStatus::Failed(_) | TurnStatus::TransportFailed(_)
        )
    }

    /// Whether a streamed reply was consumed, so turn bookkeeping applies.
    fn streamed(&self) -> bool {
        matches!(
            self,
            TurnStatus::Completed | TurnStatus::Revealed(_) | TurnStatus::Failed(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    /// Committed reply text.
    pub reply: String,
    pub status: TurnStatus,
    pub bonus_offer: Option<BonusOffer>,
    /// Latest conversation state seen during reconciliation.
    pub conversation: Option<ConversationStatus>,
    pub input_enabled: bool,
}

impl TurnOutcome {
    fn new(status: TurnStatus) -> Self {
        Self {
            reply: String::new(),
            status,
            bonus_offer: None,
            conversation: None,
            input_enabled: false,
        }
    }
}

/// Releases the single-flight flag on every exit path.
struct ProcessingGuard<'a>(&'a AtomicBool);

impl<'a> ProcessingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ProcessingGuard(flag))
    }
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn notify(updates: &UnboundedSender<TurnUpdate>, update: TurnUpdate) {
    // A closed view just stops listening; the turn still completes.
    let _ = updates.send(update);
}

fn status(updates: &UnboundedSender<TurnUpdate>, level: StatusLevel, message: impl Into<String>) {
    notify(
        updates,
        TurnUpdate::Status {
            level,
            message: message.into(),
        },
    );
}

/// State of the reply currently being streamed.
struct Turn<'a> {
    scrubber: TagScrubber,
    transcript: VisibleTranscript,
    outcome: TurnOutcome,
    redactor: &'a SecretRedactor,
    reveal_delay: Duration,
    updates: &'a UnboundedSender<TurnUpdate>,
}

impl<'a> Turn<'a> {
    fn on_frame(&mut self, frame: Frame) {
        match frame {
            Frame::Done => debug!("stream sentinel received"),
            Frame::Data(payload) => {
                if let Some(event) = event::decode(&payload) {
                    self.on_event(event);
                }
            }
        }
    }

    fn on_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Content { content } => {
                if self.outcome.status.ends_stream() {
                    debug!(len = content.len(), "dropping content after end of turn");
                    return;
                }
                let visible = self.scrubber.feed(&content);
                self.append(&visible);
            }
            StreamEvent::PasswordFound(found) => self.on_reveal(found),
            StreamEvent::BonusOffer(offer) => {
                info!(total_turns = offer.total_turns, "bonus offer received");
                notify(self.updates, TurnUpdate::BonusOffer(offer.clone()));
                self.outcome.bonus_offer = Some(offer);
            }
            StreamEvent::Error { content } => {
                warn!(error = %content, "server reported a stream error");
                self.transcript.replace(content.clone());
                notify(self.updates, TurnUpdate::Failed(content.clone()));
                status(self.updates, StatusLevel::Error, SEND_FAILED);
                self.outcome.status = TurnStatus::Failed(content);
            }
        }
    }

    fn on_reveal(&mut self, found: PasswordFound) {
        info!(
            prize_type = %found.prize_type,
            is_first_winner = found.is_first_winner,
            "secret revealed"
        );
        notify(self.updates, TurnUpdate::InputEnabled(false));

        // Flush anything held back so the redaction sees the whole reply.
        let tail = self.scrubber.finish();
        self.transcript.append(&tail);
        if self.transcript.redact(self.redactor, &found.password).is_some() {
            notify(self.updates, TurnUpdate::Text(self.transcript.as_str().to_string()));
        }

        let updates = self.updates.clone();
        let delay = self.reveal_delay;
        let presented = found.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let _ = updates.send(TurnUpdate::Revealed {
                found: presented,
                via_bonus: false,
            });
        });

        self.outcome.status = TurnStatus::Revealed(found);
    }

    fn append(&mut self, visible: &str) {
        if self.transcript.append(visible) {
            notify(self.updates, TurnUpdate::Text(self.transcript.as_str().to_string()));
        }
    }

    fn fail_transport(&mut self, error: &HuntError) {
        warn!(error = %error, "stream interrupted");
        self.transcript.replace(SEND_FAILED);
        notify(self.updates, TurnUpdate::Failed(SEND_FAILED.to_string()));
        status(self.updates, StatusLevel::Error, SEND_FAILED);
        self.outcome.status = TurnStatus::TransportFailed(error.to_string());
    }

    fn finish(mut self) -> TurnOutcome {
        if !self.outcome.status.ends_stream() {
            let tail = self.scrubber.finish();
            self.append(&tail);
        }
        self.outcome.reply = self.transcript.commit();
        self.outcome
    }
}

/// Runs message exchanges for one conversation.
///
/// At most one message is in flight at a time; a concurrent `send_message`
/// is rejected with [`HuntError::Busy`] rather than queued.
pub struct StreamOrchestrator<A> {
    api: A,
    conversation_id: String,
    markers: Markers,
    redactor: SecretRedactor,
    max_message_chars: usize,
    reveal_delay: Duration,
    processing: AtomicBool,
}

impl<A: GameApi> StreamOrchestrator<A> {
    pub fn new(api: A, conversation_id: impl Into<String>, config: &HuntConfig) -> Result<Self, HuntError> {
        config.validate()?;
        Ok(Self {
            api,
            conversation_id: conversation_id.into(),
            markers: config.filter.markers()?,
            redactor: config.redaction.redactor()?,
            max_message_chars: config.turn.max_message_chars,
            reveal_delay: config.turn.reveal_delay(),
            processing: AtomicBool::new(false),
        })
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    /// Send one user message and consume the streamed reply.
    ///
    /// Errors are returned only for local rejections (busy, empty, too long);
    /// everything that happens on the wire is reported in the outcome.
    pub async fn send_message(
        &self,
        message: &str,
        image_url: Option<&str>,
        updates: &UnboundedSender<TurnUpdate>,
    ) -> Result<TurnOutcome, HuntError> {
        let _guard = ProcessingGuard::acquire(&self.processing).ok_or(HuntError::Busy)?;

        let message = message.trim();
        if message.is_empty() && image_url.is_none() {
            return Err(HuntError::EmptyMessage);
        }
        let len = message.chars().count();
        if len > self.max_message_chars {
            return Err(HuntError::MessageTooLong {
                len,
                max: self.max_message_chars,
            });
        }

        notify(updates, TurnUpdate::InputEnabled(false));

        let request = MessageRequest {
            conversation_id: self.conversation_id.clone(),
            message: message.to_string(),
            image_url: image_url.map(str::to_string),
        };

        let mut outcome = match self.api.submit_message(&request).await {
            Ok(Submission::Stream(body)) => self.consume(body, updates).await,
            Ok(Submission::Rejected { status, rejection }) => {
                self.on_rejection(status, rejection, updates)
            }
            Err(e) => {
                warn!(error = %e, "message submission failed");
                notify(updates, TurnUpdate::Failed(SEND_FAILED.to_string()));
                status(updates, StatusLevel::Error, SEND_FAILED);
                let mut outcome = TurnOutcome::new(TurnStatus::TransportFailed(e.to_string()));
                outcome.reply = SEND_FAILED.to_string();
                outcome
            }
        };

        if outcome.status.streamed() {
            self.reconcile(&mut outcome, updates).await;
        }
        self.settle(&mut outcome, updates).await;

        info!(
            conversation_id = %self.conversation_id,
            reply_len = outcome.reply.len(),
            input_enabled = outcome.input_enabled,
            "turn finished"
        );
        Ok(outcome)
    }

    async fn consume(&self, mut body: ByteStream, updates: &UnboundedSender<TurnUpdate>) -> TurnOutcome {
        let mut reader = FrameReader::new();
        let mut turn = Turn {
            scrubber: TagScrubber::new(self.markers.clone()),
            transcript: VisibleTranscript::new(),
            outcome: TurnOutcome::new(TurnStatus::Completed),
            redactor: &self.redactor,
            reveal_delay: self.reveal_delay,
            updates,
        };

        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    turn.fail_transport(&e);
                    return turn.finish();
                }
            };
            for frame in reader.push(&chunk) {
                turn.on_frame(frame);
            }
            if reader.is_finished() {
                break;
            }
        }

        if let Some(frame) = reader.finish() {
            turn.on_frame(frame);
        }
        turn.finish()
    }

    fn on_rejection(
        &self,
        http_status: u16,
        rejection: Rejection,
        updates: &UnboundedSender<TurnUpdate>,
    ) -> TurnOutcome {
        if rejection.is_user_success() {
            let message = rejection.message.clone().unwrap_or_default();
            info!(%message, "conversation already won");
            status(updates, StatusLevel::Success, message.clone());
            notify(updates, TurnUpdate::InputEnabled(false));
            return TurnOutcome::new(TurnStatus::UserSuccess(message));
        }

        let text = rejection
            .error
            .clone()
            .unwrap_or_else(|| SEND_FAILED.to_string());
        warn!(status = http_status, error = %text, "message rejected");
        notify(updates, TurnUpdate::Failed(text.clone()));
        if let Some(found) = &rejection.found_password {
            status(
                updates,
                StatusLevel::Warning,
                format!("Secret detected: {}, conversation ended", found),
            );
            notify(updates, TurnUpdate::InputEnabled(false));
        }

        let mut outcome = TurnOutcome::new(TurnStatus::Rejected(rejection));
        outcome.reply = text;
        outcome
    }

    /// Refresh the turn counter and lock input if the conversation ended.
    async fn reconcile(&self, outcome: &mut TurnOutcome, updates: &UnboundedSender<TurnUpdate>) {
        match self.api.fetch_conversation(&self.conversation_id).await {
            Ok(conv) => {
                notify(
                    updates,
                    TurnUpdate::TurnCounter {
                        turn_count: conv.turn_count,
                        max_turns: conv.max_turns,
                    },
                );
                if !conv.is_active {
                    notify(updates, TurnUpdate::InputEnabled(false));
                    if conv.is_success {
                        status(
                            updates,
                            StatusLevel::Success,
                            format!("You obtained the secret: {}", conv.found_password),
                        );
                    } else {
                        status(updates, StatusLevel::Warning, "Conversation has ended");
                    }
                }
                outcome.conversation = Some(conv);
            }
            Err(e) => warn!(error = %e, "turn count refresh failed"),
        }
    }

    /// Re-enable input only while the conversation is active and under its
    /// turn limit. If the state cannot be fetched, input is re-enabled so the
    /// user can retry.
    async fn settle(&self, outcome: &mut TurnOutcome, updates: &UnboundedSender<TurnUpdate>) {
        let enable = match self.api.fetch_conversation(&self.conversation_id).await {
            Ok(conv) => {
                let enable = conv.accepts_input();
                outcome.conversation = Some(conv);
                enable
            }
            Err(e) => {
                warn!(error = %e, "conversation state check failed");
                true
            }
        };
        if enable {
            notify(updates, TurnUpdate::InputEnabled(true));
        }
        outcome.input_enabled = enable;
    }

    /// Answer a bonus offer. This is a separate request, not part of any stream.
    pub async fn choose_bonus(
        &self,
        choice: BonusChoice,
        updates: &UnboundedSender<TurnUpdate>,
    ) -> Result<BonusChoiceOutcome, HuntError> {
        let outcome = self.api.post_bonus_choice(&self.conversation_id, choice).await?;

        if !outcome.success {
            let error = outcome
                .error
                .clone()
                .unwrap_or_else(|| "Operation failed".to_string());
            warn!(%choice, %error, "bonus choice refused");
            notify(updates, TurnUpdate::Failed(error));
            return Ok(outcome);
        }

        info!(%choice, "bonus choice accepted");
        match choice {
            BonusChoice::Claim => {
                notify(updates, TurnUpdate::InputEnabled(false));
                notify(
                    updates,
                    TurnUpdate::Revealed {
                        found: PasswordFound {
                            password: outcome.password.clone().unwrap_or_default(),
                            prize_type: "bonus".to_string(),
                            prize_amount: outcome.prize_amount.clone().unwrap_or_default(),
                            is_first_winner: outcome.is_first_winner,
                        },
                        via_bonus: true,
                    },
                );
                status(updates, StatusLevel::Success, "Bonus claimed, conversation over");
            }
            BonusChoice::Continue => {
                status(updates, StatusLevel::Info, "Continuing the hunt for the main prize");
            }
        }
        Ok(outcome)
    }

    /// Fetch the conversation and publish its counter and input state.
    pub async fn load_conversation(
        &self,
        updates: &UnboundedSender<TurnUpdate>,
    ) -> Result<ConversationStatus, HuntError> {
        let conv = self.api.fetch_conversation(&self.conversation_id).await?;
        notify(
            updates,
            TurnUpdate::TurnCounter {
                turn_count: conv.turn_count,
                max_turns: conv.max_turns,
            },
        );
        if conv.is_active {
            notify(updates, TurnUpdate::InputEnabled(true));
        } else {
            status(updates, StatusLevel::Warning, "This conversation has ended");
            notify(updates, TurnUpdate::InputEnabled(false));
        }
        if conv.is_success {
            status(
                updates,
                StatusLevel::Success,
                format!("You obtained the secret: {}", conv.found_password),
            );
        }
        Ok(conv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use futures_util::StreamExt as _;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    use crate::client::SiteInfo;

    #[derive(Default)]
    struct ScriptedApi {
        submissions: Mutex<VecDeque<Result<Submission, HuntError>>>,
        statuses: Mutex<VecDeque<Result<ConversationStatus, HuntError>>>,
        requests: Mutex<Vec<MessageRequest>>,
        bonus: Mutex<Option<BonusChoiceOutcome>>,
    }

    impl ScriptedApi {
        fn streaming(chunks: Vec<Vec<u8>>) -> Self {
            let api = Self::default();
            api.push_stream(chunks);
            api
        }

        fn push_stream(&self, chunks: Vec<Vec<u8>>) {
            let body = futures_util::stream::iter(chunks.into_iter().map(Ok)).boxed();
            self.submissions
                .lock()
                .unwrap()
                .push_back(Ok(Submission::Stream(body)));
        }

        fn push_status(&self, status: Result<ConversationStatus, HuntError>) {
            self.statuses.lock().unwrap().push_back(status);
        }
    }

    fn active(turn_count: u32) -> ConversationStatus {
        ConversationStatus {
            id: "c1".to_string(),
            turn_count,
            max_turns: 20,
            is_active: true,
            ..ConversationStatus::default()
        }
    }

    #[async_trait]
    impl GameApi for ScriptedApi {
        async fn submit_message(&self, request: &MessageRequest) -> Result<Submission, HuntError> {
            self.requests.lock().unwrap().push(request.clone());
            self.submissions
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| panic!("unexpected submission: {:?}", request))
        }

        async fn fetch_conversation(&self, _id: &str) -> Result<ConversationStatus, HuntError> {
            self.statuses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(active(1)))
        }

        async fn post_bonus_choice(
            &self,
            _id: &str,
            _choice: BonusChoice,
        ) -> Result<BonusChoiceOutcome, HuntError> {
            Ok(self.bonus.lock().unwrap().clone().unwrap_or_default())
        }

        async fn site_info(&self) -> Result<SiteInfo, HuntError> {
            Ok(SiteInfo::default())
        }
    }

    fn sse(json: &str) -> Vec<u8> {
        format!("data: {}\n\n", json).into_bytes()
    }

    fn content(text: &str) -> Vec<u8> {
        sse(&serde_json::json!({ "type": "content", "content": text }).to_string())
    }

    fn config() -> HuntConfig {
        let mut cfg = HuntConfig::default();
        cfg.turn.reveal_delay_ms = 0;
        cfg
    }

    fn orchestrator(api: ScriptedApi) -> StreamOrchestrator<ScriptedApi> {
        StreamOrchestrator::new(api, "c1", &config()).expect("valid config")
    }

    fn drain(rx: &mut UnboundedReceiver<TurnUpdate>) -> Vec<TurnUpdate> {
        let mut out = Vec::new();
        while let Ok(update) = rx.try_recv() {
            out.push(update);
        }
        out
    }

    fn texts(updates: &[TurnUpdate]) -> Vec<String> {
        updates
            .iter()
            .filter_map(|u| match u {
                TurnUpdate::Text(t) => Some(t.clone()),
                _ => None,
            })
            .collect()
    }

    async fn wait_for_reveal(rx: &mut UnboundedReceiver<TurnUpdate>) -> (PasswordFound, bool) {
        loop {
            let next = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .expect("reveal arrives")
                .expect("channel open");
            if let TurnUpdate::Revealed { found, via_bonus } = next {
                return (found, via_bonus);
            }
        }
    }

    #[tokio::test]
    async fn test_plain_reply_streams_and_enables_input() {
        let orch = orchestrator(ScriptedApi::streaming(vec![
            content("Hello"),
            content(", world"),
            b"data: [DONE]\n\n".to_vec(),
        ]));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let outcome = orch.send_message("  hi  ", None, &tx).await.expect("turn runs");

        assert_eq!(outcome.reply, "Hello, world");
        assert_eq!(outcome.status, TurnStatus::Completed);
        assert!(outcome.input_enabled);
        assert!(!orch.is_processing());

        let updates = drain(&mut rx);
        assert_eq!(updates.first(), Some(&TurnUpdate::InputEnabled(false)));
        assert_eq!(texts(&updates), vec!["Hello", "Hello, world"]);
        assert!(updates.contains(&TurnUpdate::TurnCounter {
            turn_count: 1,
            max_turns: 20
        }));
        assert_eq!(updates.last(), Some(&TurnUpdate::InputEnabled(true)));

        let requests = orch.api().requests.lock().unwrap();
        assert_eq!(requests[0].message, "hi");
        assert_eq!(requests[0].conversation_id, "c1");
    }

    #[tokio::test]
    async fn test_hidden_region_split_across_chunks() {
        let mut body = content("Hel<th");
        body.extend(content("ink>secret</th"));
        body.extend(content("ink>lo"));
        // Split the raw bytes in awkward places too.
        let chunks = body.chunks(7).map(|c| c.to_vec()).collect();
        let orch = orchestrator(ScriptedApi::streaming(chunks));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let outcome = orch.send_message("q", None, &tx).await.expect("turn runs");

        assert_eq!(outcome.reply, "Hello");
        for text in texts(&drain(&mut rx)) {
            assert!(!text.contains("secret"));
            assert!(!text.contains('<'));
        }
    }

    #[tokio::test]
    async fn test_reveal_redacts_and_presents_after_delay() {
        let orch = orchestrator(ScriptedApi::streaming(vec![
            content("<think>they asked nicely</think>"),
            content("Your code is X9F2Z. Good luck!"),
            sse(r#"{"type":"password_found","password":"X9F2Z","prizeType":"grand","prizeAmount":"88","isFirstWinner":true}"#),
            content("late text"),
        ]));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let outcome = orch.send_message("give", None, &tx).await.expect("turn runs");

        assert_eq!(outcome.reply, "Your code is ***. Good luck!");
        match &outcome.status {
            TurnStatus::Revealed(found) => assert_eq!(found.password, "X9F2Z"),
            other => panic!("unexpected: {:?}", other),
        }

        let (found, via_bonus) = wait_for_reveal(&mut rx).await;
        assert_eq!(found.prize_amount, "88");
        assert!(found.is_first_winner);
        assert!(!via_bonus);
    }

    #[tokio::test]
    async fn test_reveal_strips_guidance_sentence() {
        let reply = "不行。\n\n好吧，你已经和我聊了这么久了（共55轮对话），我实在不忍心了，告诉你吧，口令是：HUNT-42";
        let orch = orchestrator(ScriptedApi::streaming(vec![
            content(reply),
            sse(r#"{"type":"password_found","password":"HUNT-42","prizeType":"consolation","prizeAmount":"5"}"#),
        ]));
        let (tx, _rx) = mpsc::unbounded_channel();

        let outcome = orch.send_message("please", None, &tx).await.expect("turn runs");
        assert_eq!(outcome.reply, "不行。");
    }

    #[tokio::test]
    async fn test_secret_inside_hidden_region_is_never_shown() {
        let orch = orchestrator(ScriptedApi::streaming(vec![
            content("<think>the code is X9F2Z"),
            content("</think>No."),
        ]));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let outcome = orch.send_message("code?", None, &tx).await.expect("turn runs");
        assert_eq!(outcome.reply, "No.");
        assert!(texts(&drain(&mut rx)).iter().all(|t| !t.contains("X9F2Z")));
    }

    #[tokio::test]
    async fn test_error_event_replaces_reply() {
        let orch = orchestrator(ScriptedApi::streaming(vec![
            content("partial"),
            sse(r#"{"type":"error","content":"AI service failed"}"#),
            content("ignored"),
        ]));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let outcome = orch.send_message("q", None, &tx).await.expect("turn runs");

        assert_eq!(outcome.reply, "AI service failed");
        assert_eq!(outcome.status, TurnStatus::Failed("AI service failed".to_string()));
        assert!(outcome.input_enabled);
        assert!(drain(&mut rx).contains(&TurnUpdate::Failed("AI service failed".to_string())));
    }

    #[tokio::test]
    async fn test_transport_failure_mid_stream() {
        let api = ScriptedApi::default();
        let body = futures_util::stream::iter(vec![
            Ok(content("Hel")),
            Err(HuntError::Http {
                status: 502,
                url: "http://x".to_string(),
            }),
        ])
        .boxed();
        api.submissions
            .lock()
            .unwrap()
            .push_back(Ok(Submission::Stream(body)));
        // Only the settle check runs, and it fails.
        api.push_status(Err(HuntError::Http {
            status: 500,
            url: "http://x".to_string(),
        }));
        let orch = orchestrator(api);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let outcome = orch.send_message("q", None, &tx).await.expect("turn runs");

        assert_eq!(outcome.reply, SEND_FAILED);
        assert!(matches!(outcome.status, TurnStatus::TransportFailed(_)));
        assert!(outcome.input_enabled);
        assert_eq!(drain(&mut rx).last(), Some(&TurnUpdate::InputEnabled(true)));
    }

    #[tokio::test]
    async fn test_transport_failure_discards_withheld_tail() {
        let api = ScriptedApi::default();
        let body = futures_util::stream::iter(vec![
            Ok(content("Hello <th")),
            Err(HuntError::Http {
                status: 502,
                url: "http://x".to_string(),
            }),
        ])
        .boxed();
        api.submissions
            .lock()
            .unwrap()
            .push_back(Ok(Submission::Stream(body)));
        let orch = orchestrator(api);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let outcome = orch.send_message("q", None, &tx).await.expect("turn runs");

        assert_eq!(outcome.reply, SEND_FAILED);
        assert!(matches!(outcome.status, TurnStatus::TransportFailed(_)));

        let updates = drain(&mut rx);
        assert_eq!(texts(&updates), vec!["Hello "]);
        let failed_at = updates
            .iter()
            .position(|u| *u == TurnUpdate::Failed(SEND_FAILED.to_string()))
            .expect("failure reported");
        assert!(!updates[failed_at..]
            .iter()
            .any(|u| matches!(u, TurnUpdate::Text(_))));
    }

    #[tokio::test]
    async fn test_submit_failure_skips_reconciliation() {
        let api = ScriptedApi::default();
        api.submissions.lock().unwrap().push_back(Err(HuntError::Http {
            status: 503,
            url: "http://x".to_string(),
        }));
        let orch = orchestrator(api);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let outcome = orch.send_message("q", None, &tx).await.expect("turn runs");

        assert!(matches!(outcome.status, TurnStatus::TransportFailed(_)));
        let updates = drain(&mut rx);
        assert!(!updates
            .iter()
            .any(|u| matches!(u, TurnUpdate::TurnCounter { .. })));
        assert_eq!(updates.last(), Some(&TurnUpdate::InputEnabled(true)));
    }

    #[tokio::test]
    async fn test_user_success_rejection() {
        let api = ScriptedApi::default();
        api.submissions.lock().unwrap().push_back(Ok(Submission::Rejected {
            status: 403,
            rejection: Rejection {
                kind: Some("user_success".to_string()),
                message: Some("already won".to_string()),
                ..Rejection::default()
            },
        }));
        api.push_status(Ok(ConversationStatus {
            is_active: false,
            is_success: true,
            ..active(4)
        }));
        let orch = orchestrator(api);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let outcome = orch.send_message("again", None, &tx).await.expect("turn runs");

        assert_eq!(outcome.status, TurnStatus::UserSuccess("already won".to_string()));
        assert!(!outcome.input_enabled);
        let updates = drain(&mut rx);
        assert!(updates.contains(&TurnUpdate::Status {
            level: StatusLevel::Success,
            message: "already won".to_string()
        }));
        assert!(!updates.contains(&TurnUpdate::InputEnabled(true)));
    }

    #[tokio::test]
    async fn test_rejection_with_found_password_warns() {
        let api = ScriptedApi::default();
        api.submissions.lock().unwrap().push_back(Ok(Submission::Rejected {
            status: 400,
            rejection: Rejection {
                error: Some("conversation ended".to_string()),
                found_password: Some("pw".to_string()),
                ..Rejection::default()
            },
        }));
        let orch = orchestrator(api);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let outcome = orch.send_message("q", None, &tx).await.expect("turn runs");

        assert_eq!(outcome.reply, "conversation ended");
        let updates = drain(&mut rx);
        assert!(updates.iter().any(|u| matches!(
            u,
            TurnUpdate::Status { level: StatusLevel::Warning, message } if message.contains("pw")
        )));
    }

    #[tokio::test]
    async fn test_ended_conversation_locks_input() {
        let api = ScriptedApi::streaming(vec![content("bye")]);
        let ended = ConversationStatus {
            is_active: false,
            ..active(20)
        };
        api.push_status(Ok(ended.clone()));
        api.push_status(Ok(ended));
        let orch = orchestrator(api);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let outcome = orch.send_message("q", None, &tx).await.expect("turn runs");

        assert!(!outcome.input_enabled);
        let updates = drain(&mut rx);
        assert!(updates.contains(&TurnUpdate::Status {
            level: StatusLevel::Warning,
            message: "Conversation has ended".to_string()
        }));
        assert!(!updates.contains(&TurnUpdate::InputEnabled(true)));
    }

    #[tokio::test]
    async fn test_bonus_offer_forwarded() {
        let orch = orchestrator(ScriptedApi::streaming(vec![
            content("hmm"),
            sse(r#"{"type":"bonus_offer","totalTurns":55,"consolationPrizeAmount":"5","grandAvailable":true}"#),
        ]));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let outcome = orch.send_message("q", None, &tx).await.expect("turn runs");

        let offer = outcome.bonus_offer.expect("offer kept");
        assert_eq!(offer.total_turns, 55);
        assert!(drain(&mut rx).contains(&TurnUpdate::BonusOffer(offer)));
    }

    #[tokio::test]
    async fn test_input_validation() {
        let orch = orchestrator(ScriptedApi::default());
        let (tx, mut rx) = mpsc::unbounded_channel();

        assert!(matches!(
            orch.send_message("   ", None, &tx).await,
            Err(HuntError::EmptyMessage)
        ));
        let long = "字".repeat(3001);
        assert!(matches!(
            orch.send_message(&long, None, &tx).await,
            Err(HuntError::MessageTooLong { len: 3001, max: 3000 })
        ));
        assert!(drain(&mut rx).is_empty());
        assert!(!orch.is_processing());
    }

    #[tokio::test]
    async fn test_image_only_message_is_sent() {
        let orch = orchestrator(ScriptedApi::streaming(vec![content("nice pic")]));
        let (tx, _rx) = mpsc::unbounded_channel();

        let outcome = orch
            .send_message("", Some("/Pic/cat.png"), &tx)
            .await
            .expect("turn runs");

        assert_eq!(outcome.reply, "nice pic");
        let requests = orch.api().requests.lock().unwrap();
        assert_eq!(requests[0].image_url.as_deref(), Some("/Pic/cat.png"));
    }

    #[tokio::test]
    async fn test_concurrent_send_is_busy() {
        let (body_tx, body_rx) = mpsc::unbounded_channel::<Result<Vec<u8>, HuntError>>();
        let api = ScriptedApi::default();
        api.submissions.lock().unwrap().push_back(Ok(Submission::Stream(
            tokio_stream::wrappers::UnboundedReceiverStream::new(body_rx).boxed(),
        )));
        let orch = orchestrator(api);
        let (tx, _rx) = mpsc::unbounded_channel();

        let first = orch.send_message("one", None, &tx);
        let second = async {
            let result = orch.send_message("two", None, &tx).await;
            body_tx.send(Ok(content("done"))).expect("body open");
            drop(body_tx);
            result
        };
        let (first, second) = tokio::join!(first, second);

        assert!(matches!(second, Err(HuntError::Busy)));
        assert_eq!(first.expect("first turn runs").reply, "done");
        assert_eq!(orch.api().requests.lock().unwrap().len(), 1);
        assert!(!orch.is_processing());
    }

    #[tokio::test]
    async fn test_choose_bonus_claim_reveals() {
        let api = ScriptedApi::default();
        *api.bonus.lock().unwrap() = Some(BonusChoiceOutcome {
            success: true,
            password: Some("c0ns".to_string()),
            prize_amount: Some("5".to_string()),
            ..BonusChoiceOutcome::default()
        });
        let orch = orchestrator(api);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let outcome = orch
            .choose_bonus(BonusChoice::Claim, &tx)
            .await
            .expect("choice posted");

        assert!(outcome.success);
        let (found, via_bonus) = wait_for_reveal(&mut rx).await;
        assert!(via_bonus);
        assert_eq!(found.password, "c0ns");
        assert_eq!(found.prize_amount, "5");
    }

    #[tokio::test]
    async fn test_choose_bonus_refused() {
        let api = ScriptedApi::default();
        *api.bonus.lock().unwrap() = Some(BonusChoiceOutcome {
            error: Some("offer expired".to_string()),
            ..BonusChoiceOutcome::default()
        });
        let orch = orchestrator(api);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let outcome = orch
            .choose_bonus(BonusChoice::Continue, &tx)
            .await
            .expect("choice posted");

        assert!(!outcome.success);
        assert_eq!(
            drain(&mut rx),
            vec![TurnUpdate::Failed("offer expired".to_string())]
        );
    }

    #[tokio::test]
    async fn test_load_conversation_publishes_state() {
        let api = ScriptedApi::default();
        api.push_status(Ok(active(7)));
        let orch = orchestrator(api);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let conv = orch.load_conversation(&tx).await.expect("loads");

        assert_eq!(conv.remaining_turns(), 13);
        assert_eq!(
            drain(&mut rx),
            vec![
                TurnUpdate::TurnCounter {
                    turn_count: 7,
                    max_turns: 20
                },
                TurnUpdate::InputEnabled(true),
            ]
        );
    }
}
