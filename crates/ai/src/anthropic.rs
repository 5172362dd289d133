//! Anthropic Messages API adapter.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use riskmap_scoring::ScoredRisk;

use crate::hedger::{HedgeError, HedgeResult, Hedger};
use crate::prompt::{SYSTEM_PROMPT, build_prompt, parse_hedge_json};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_MODEL: &str = "claude-opus-4-6";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 2048;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug, Clone)]
pub struct AnthropicHedger {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

impl AnthropicHedger {
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
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            system: SYSTEM_PROMPT,
            messages: vec![Message {
                role: "user",
                content: user_prompt,
            }],
        };

        let resp = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
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

        let parsed: MessagesResponse =
            serde_json::from_str(&text).map_err(|e| HedgeError::Parse(e.to_string()))?;
        first_text_block(parsed)
    }
}

fn first_text_block(resp: MessagesResponse) -> Result<String, HedgeError> {
    resp.content
        .into_iter()
        .find(|block| block.kind == "text")
        .map(|block| block.text)
        .ok_or(HedgeError::Empty)
}

#[async_trait::async_trait]
impl Hedger for AnthropicHedger {
    fn name(&self) -> &str {
        "anthropic"
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
