//! Chat-completion client for an OpenAI-compatible API.
//!
//! Sends `POST {url}/chat/completions` with an optional system prompt plus
//! the conversation turns, using the same bounded timeout and backoff
//! discipline as the embedding clients. If `OPENAI_API_KEY` is set it is
//! sent as the bearer token; otherwise a placeholder is used (required but
//! ignored by Ollama).

use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::{Error, Result};
use crate::models::ChatMessage;

/// One conversation turn in provider wire format.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub role: &'static str,
    pub content: String,
}

impl From<&ChatMessage> for ChatTurn {
    fn from(message: &ChatMessage) -> Self {
        ChatTurn {
            role: message.role.as_str(),
            content: message.content.clone(),
        }
    }
}

/// Request a completion for the given turns. Returns the assistant's text.
pub async fn chat_completion(
    config: &LlmConfig,
    system_prompt: Option<&str>,
    turns: &[ChatTurn],
) -> Result<String> {
    let mut messages = Vec::with_capacity(turns.len() + 1);
    if let Some(system) = system_prompt {
        messages.push(serde_json::json!({"role": "system", "content": system}));
    }
    for turn in turns {
        messages.push(serde_json::json!({"role": turn.role, "content": turn.content}));
    }

    let mut body = serde_json::json!({
        "model": config.model,
        "messages": messages,
        "temperature": config.temperature,
    });
    if let Some(max_tokens) = config.max_tokens {
        body["max_tokens"] = serde_json::json!(max_tokens);
    }

    let api_key = std::env::var("OPENAI_API_KEY").unwrap_or_else(|_| "ollama".to_string());

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| Error::Generation(format!("failed to build HTTP client: {e}")))?;

    let mut last_err = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let resp = client
            .post(format!("{}/chat/completions", config.url))
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&body)
            .send()
            .await;

        match resp {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    let json: serde_json::Value = response
                        .json()
                        .await
                        .map_err(|e| Error::Generation(format!("invalid response body: {e}")))?;
                    return parse_completion(&json);
                }

                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(Error::Generation(format!(
                        "LLM API error {status}: {body_text}"
                    )));
                    continue;
                }

                return Err(Error::Generation(format!(
                    "LLM API error {status}: {body_text}"
                )));
            }
            Err(e) => {
                last_err = Some(Error::Generation(format!("LLM request failed: {e}")));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| Error::Generation("completion failed after retries".to_string())))
}

/// Extract `choices[0].message.content` from a completion response.
fn parse_completion(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| Error::Generation("no content in completion response".to_string()))
}
