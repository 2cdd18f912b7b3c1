use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{OracleError, OracleResult};
use crate::models::{OracleDecision, OracleRequest};
use crate::parser::parse_decision;
use crate::AdvisoryOracle;

const API_VERSION: &str = "2023-06-01";
const BASE_BACKOFF_MS: u64 = 500;

const SYSTEM_PROMPT: &str = "You gate entries for an intraday futures trading agent.
You receive one indicator snapshot and, when available, a multi-timeframe summary
(alignment 0-100, direction, opportunity 0-100, volatility context, risk factors).

Weigh higher timeframes more than lower ones. Alignment is the main confidence input:
above 80 is strong, 70-80 good, 60-70 needs confirmation from the 4h trend, below 60 weak.
Treat RSI as a range (30-35 oversold, 65-70 overbought), not a hard threshold.
Reject when alignment is under 40, when daily and 4h disagree, or when volatility is above 4%
without strong alignment. Level 1 is permissive and level 5 is the most selective: raise the
bar on alignment, RSI extremity and reward:risk as the level rises.

Reply with JSON only, no markdown:
{\"should_enter\": true|false, \"confidence\": 0.0-1.0, \"reason\": \"short explanation\"}";

/// Connection settings for the hosted oracle.
#[derive(Debug, Clone)]
pub struct OracleConfig {
    pub api_url: String,
    /// Without a key every consultation fails, which the gatekeeper treats as a rejection.
    pub api_key: Option<String>,
    pub model: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub max_tokens: u32,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.anthropic.com/v1/messages".to_string(),
            api_key: None,
            model: "claude-sonnet-4-5".to_string(),
            timeout: Duration::from_secs(15),
            max_retries: 2,
            max_tokens: 150,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

impl MessagesResponse {
    fn first_text(self) -> OracleResult<String> {
        self.content
            .into_iter()
            .next()
            .and_then(|block| block.text)
            .ok_or_else(|| OracleError::InvalidResponse("reply has no text block".to_string()))
    }
}

/// Oracle backed by a hosted messages-style LLM endpoint.
#[derive(Clone)]
pub struct HttpOracle {
    client: reqwest::Client,
    config: OracleConfig,
}

impl HttpOracle {
    pub fn new(config: OracleConfig) -> OracleResult<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    pub fn is_configured(&self) -> bool {
        self.config.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    async fn send_once(&self, api_key: &str, message: &str) -> OracleResult<OracleDecision> {
        let body = MessagesRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            system: SYSTEM_PROMPT,
            messages: vec![ChatMessage { role: "user", content: message }],
        };

        let response = self
            .client
            .post(&self.config.api_url)
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| if e.is_timeout() { OracleError::Timeout } else { OracleError::RequestFailed(e) })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                OracleError::ServiceUnavailable(format!("Status: {} {}", status, detail))
            } else {
                OracleError::InvalidResponse(format!("Status: {} {}", status, detail))
            });
        }

        let text = response.json::<MessagesResponse>().await?.first_text()?;
        parse_decision(&text)
    }
}

#[async_trait]
impl AdvisoryOracle for HttpOracle {
    async fn consult(&self, request: &OracleRequest) -> OracleResult<OracleDecision> {
        let api_key = match self.config.api_key.as_deref() {
            Some(key) if !key.is_empty() => key,
            _ => return Err(OracleError::NotConfigured("ORACLE_API_KEY not set".to_string())),
        };
        let message = request.render_message();

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.send_once(api_key, &message).await {
                Ok(decision) => return Ok(decision),
                Err(e) if e.is_retryable() && attempt <= self.config.max_retries => {
                    let delay = Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt - 1));
                    tracing::warn!(
                        attempt,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Oracle call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn oracle_name(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_has_messages_shape() {
        let body = MessagesRequest {
            model: "m",
            max_tokens: 150,
            system: "sys",
            messages: vec![ChatMessage { role: "user", content: "ANALYSIS:" }],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["max_tokens"], 150);
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["system"], "sys");
    }

    #[test]
    fn first_text_block_is_reply() {
        let raw = r#"{"id":"x","content":[{"type":"text","text":"{\"should_enter\":true,\"confidence\":0.7}"}]}"#;
        let resp: MessagesResponse = serde_json::from_str(raw).unwrap();
        let decision = parse_decision(&resp.first_text().unwrap()).unwrap();
        assert!(decision.should_enter);

        let empty: MessagesResponse = serde_json::from_str(r#"{"content":[]}"#).unwrap();
        assert!(matches!(empty.first_text(), Err(OracleError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn missing_key_fails_without_network() {
        let oracle = HttpOracle::new(OracleConfig::default()).unwrap();
        assert!(!oracle.is_configured());
        let request = OracleRequest {
            level: Default::default(),
            side: None,
            price: 1.0,
            rsi: 50.0,
            ema_fast: 1.0,
            ema_slow: 1.0,
            phase: "NEUTRAL".into(),
            open_positions: 0,
            risk_reward_ratio: 1.0,
            correlation: None,
        };
        let err = oracle.consult(&request).await.unwrap_err();
        assert!(matches!(err, OracleError::NotConfigured(_)));
        assert!(!err.is_retryable());
    }
}
