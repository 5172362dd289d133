//! DeepSeek chat-completions adapter (OpenAI-compatible wire format).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use riskmap_scoring::ScoredRisk;

use crate::hedger::{HedgeError, HedgeResult, Hedger};
use crate::prompt::{SYSTEM_PROMPT, build_prompt, parse_hedge_json};

pub const DEFAULT_BASE_URL: &str = "https://api.deepseek.com";
pub const DEFAULT_MODEL: &str = "deepseek-chat";
const MAX_TOKENS: u32 = 2048;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug, Clone)]
pub struct DeepSeekHedger {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<ChatMessage<'a>>,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

impl DeepSeekHedger {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, HedgeError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn complete(&self, user_prompt: &str) -> Result<String, HedgeError> {
        let body = ChatRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let resp = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(HedgeError::Api {
                status: status.as_u16(),
                body: text.chars().take(200).collect(),
            });
        }

        let parsed: ChatResponse =
            serde_json::from_str(&text).map_err(|e| HedgeError::Parse(e.to_string()))?;
        first_choice(parsed)
    }
}

fn first_choice(resp: ChatResponse) -> Result<String, HedgeError> {
    resp.choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .filter(|content| !content.is_empty())
        .ok_or(HedgeError::Empty)
}

#[async_trait::async_trait]
impl Hedger for DeepSeekHedger {
    fn name(&self) -> &str {
        "deepseek"
    }

    async fn generate_hedges(&self, risks: &[ScoredRisk]) -> Result<HedgeResult, HedgeError> {
        if risks.is_empty() {
            return Ok(HedgeResult::default());
        }
        debug!(model = %self.model, risks = risks.len(), "requesting hedges");
        let raw = self.complete(&build_prompt(risks)).await?;
        parse_hedge_json(&raw)
    }
}
