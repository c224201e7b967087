//! Game server collaborators: message submission, conversation status and
//! the bonus choice.
//!
//! [`GameApi`] is the seam the orchestrator depends on; [`HttpGameClient`] is
//! the reqwest implementation talking to the game server.

use async_trait::async_trait;
use clap::ValueEnum;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::header::COOKIE;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ServerConfig;
use crate::error::HuntError;

/// Raw response body of a streamed reply.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, HuntError>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRequest {
    pub conversation_id: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// Body of a non-2xx reply to a message submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Rejection {
    pub error: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub message: Option<String>,
    pub found_password: Option<String>,
}

impl Rejection {
    /// The server short-circuited because the user already won.
    pub fn is_user_success(&self) -> bool {
        self.kind.as_deref() == Some("user_success")
    }
}

pub enum Submission {
    /// The reply is being streamed.
    Stream(ByteStream),
    /// The server declined the message before streaming.
    Rejected { status: u16, rejection: Rejection },
}

impl std::fmt::Debug for Submission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Submission::Stream(_) => f.write_str("Submission::Stream(..)"),
            Submission::Rejected { status, rejection } => f
                .debug_struct("Submission::Rejected")
                .field("status", status)
                .field("rejection", rejection)
                .finish(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConversationStatus {
    pub id: String,
    pub turn_count: u32,
    pub max_turns: u32,
    pub is_active: bool,
    pub is_success: bool,
    pub found_password: String,
}

impl ConversationStatus {
    pub fn remaining_turns(&self) -> u32 {
        self.max_turns.saturating_sub(self.turn_count)
    }

    /// Whether the user may send another message.
    pub fn accepts_input(&self) -> bool {
        self.is_active && self.turn_count < self.max_turns
    }
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BonusChoice {
    /// Take the consolation prize and end the conversation.
    Claim,
    /// Decline it and keep playing for the main prize.
    Continue,
}

impl std::fmt::Display for BonusChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BonusChoice::Claim => write!(f, "claim"),
            BonusChoice::Continue => write!(f, "continue"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BonusChoiceOutcome {
    pub success: bool,
    pub password: Option<String>,
    pub prize_amount: Option<String>,
    pub is_first_winner: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SiteInfo {
    pub deadline: String,
    pub is_expired: bool,
    #[serde(rename = "adminQQ")]
    pub admin_qq: String,
    pub admin_email: String,
    pub admin_wechat: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BonusChoiceRequest<'a> {
    conversation_id: &'a str,
    choice: BonusChoice,
}

#[async_trait]
pub trait GameApi: Send + Sync {
    async fn submit_message(&self, request: &MessageRequest) -> Result<Submission, HuntError>;

    async fn fetch_conversation(&self, conversation_id: &str) -> Result<ConversationStatus, HuntError>;

    async fn post_bonus_choice(
        &self,
        conversation_id: &str,
        choice: BonusChoice,
    ) -> Result<BonusChoiceOutcome, HuntError>;

    async fn site_info(&self) -> Result<SiteInfo, HuntError>;
}

/// reqwest-backed [`GameApi`].
pub struct HttpGameClient {
    client: reqwest::Client,
    base_url: String,
    session: Option<String>,
}

impl HttpGameClient {
    pub fn new(config: &ServerConfig) -> Result<Self, HuntError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            session: config.session.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn with_session(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.session {
            Some(session) => builder.header(COOKIE, format!("session={}", session)),
            None => builder,
        }
    }
}

#[async_trait]
impl GameApi for HttpGameClient {
    async fn submit_message(&self, request: &MessageRequest) -> Result<Submission, HuntError> {
        let url = self.url("/api/conversation/message");
        let response = self
            .with_session(self.client.post(&url))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let body = response
                .bytes_stream()
                .map(|chunk| chunk.map(|b| b.to_vec()).map_err(HuntError::from))
                .boxed();
            return Ok(Submission::Stream(body));
        }

        let bytes = response.bytes().await?;
        match serde_json::from_slice::<Rejection>(&bytes) {
            Ok(rejection) => {
                debug!(status = status.as_u16(), ?rejection, "message rejected before streaming");
                Ok(Submission::Rejected {
                    status: status.as_u16(),
                    rejection,
                })
            }
            Err(_) => Err(HuntError::Http {
                status: status.as_u16(),
                url,
            }),
        }
    }

    async fn fetch_conversation(&self, conversation_id: &str) -> Result<ConversationStatus, HuntError> {
        let url = self.url(&format!("/api/conversation/{}", conversation_id));
        let response = self.with_session(self.client.get(&url)).send().await?;
        if !response.status().is_success() {
            return Err(HuntError::Http {
                status: response.status().as_u16(),
                url,
            });
        }
        Ok(response.json::<ConversationStatus>().await?)
    }

    async fn post_bonus_choice(
        &self,
        conversation_id: &str,
        choice: BonusChoice,
    ) -> Result<BonusChoiceOutcome, HuntError> {
        let url = self.url("/api/conversation/bonus-choice");
        let response = self
            .with_session(self.client.post(&url))
            .json(&BonusChoiceRequest {
                conversation_id,
                choice,
            })
            .send()
            .await?;

        // Refusals come back as 4xx with a JSON `error`, which is still an outcome.
        let status = response.status();
        let bytes = response.bytes().await?;
        serde_json::from_slice::<BonusChoiceOutcome>(&bytes).map_err(|_| HuntError::Http {
            status: status.as_u16(),
            url,
        })
    }

    async fn site_info(&self) -> Result<SiteInfo, HuntError> {
        let url = self.url("/api/info");
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(HuntError::Http {
                status: response.status().as_u16(),
                url,
            });
        }
        Ok(response.json::<SiteInfo>().await?)
    }
}
