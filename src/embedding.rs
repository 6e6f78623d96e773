//! Embedding backend clients and vector utilities.
//!
//! Two HTTP providers are supported, selected by `[embedding].provider`:
//! - **`openai`** — an OpenAI-compatible `POST {url}/embeddings` endpoint,
//!   authenticated via the `OPENAI_API_KEY` environment variable.
//! - **`ollama`** — a local Ollama instance's `POST {url}/api/embed`.
//!
//! Both use bounded timeouts and exponential backoff on 429/5xx/network
//! errors (1s, 2s, 4s, ... capped at 32s). Other 4xx responses fail
//! immediately. `disabled` rejects every call.
//!
//! Vectors are stored as little-endian f32 BLOBs; [`vec_to_blob`] and
//! [`blob_to_vec`] convert between representations, and
//! [`similarity_score`] maps cosine similarity onto the `[0, 1]` scale the
//! API reports.

use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com/v1";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

/// Embed a batch of texts with the configured provider. Returns one vector
/// per input text, in input order.
pub async fn embed_texts(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    match config.provider.as_str() {
        "openai" => embed_openai(config, texts).await,
        "ollama" => embed_ollama(config, texts).await,
        "disabled" => Err(Error::Upstream(
            "embedding provider is disabled".to_string(),
        )),
        other => Err(Error::Upstream(format!(
            "unknown embedding provider: {other}"
        ))),
    }
}

/// Embed a single query string.
pub async fn embed_query(config: &EmbeddingConfig, text: &str) -> Result<Vec<f32>> {
    let results = embed_texts(config, &[text.to_string()]).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| Error::Upstream("empty embedding response".to_string()))
}

async fn embed_openai(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let api_key = std::env::var("OPENAI_API_KEY")
        .map_err(|_| Error::Upstream("OPENAI_API_KEY not set".to_string()))?;

    let model = required_model(config)?;
    let url = config.url.as_deref().unwrap_or(OPENAI_DEFAULT_URL);

    let client = http_client(config.timeout_secs)?;
    let body = serde_json::json!({
        "model": model,
        "input": texts,
    });

    let mut last_err = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            tokio::time::sleep(backoff_delay(attempt)).await;
        }

        let resp = client
            .post(format!("{url}/embeddings"))
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
                        .map_err(|e| Error::Upstream(format!("invalid response body: {e}")))?;
                    return parse_openai_response(&json);
                }

                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(Error::Upstream(format!(
                        "embedding API error {status}: {body_text}"
                    )));
                    continue;
                }

                // Client error, not rate limiting: retrying will not help
                return Err(Error::Upstream(format!(
                    "embedding API error {status}: {body_text}"
                )));
            }
            Err(e) => {
                last_err = Some(Error::Upstream(format!("embedding request failed: {e}")));
                continue;
            }
        }
    }

    Err(last_err
        .unwrap_or_else(|| Error::Upstream("embedding failed after retries".to_string())))
}

async fn embed_ollama(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let model = required_model(config)?;
    let url = config.url.as_deref().unwrap_or(OLLAMA_DEFAULT_URL);

    let client = http_client(config.timeout_secs)?;
    let body = serde_json::json!({
        "model": model,
        "input": texts,
    });

    let mut last_err = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            tokio::time::sleep(backoff_delay(attempt)).await;
        }

        let resp = client
            .post(format!("{url}/api/embed"))
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
                        .map_err(|e| Error::Upstream(format!("invalid response body: {e}")))?;
                    return parse_ollama_response(&json);
                }

                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(Error::Upstream(format!(
                        "Ollama API error {status}: {body_text}"
                    )));
                    continue;
                }

                return Err(Error::Upstream(format!(
                    "Ollama API error {status}: {body_text}"
                )));
            }
            Err(e) => {
                last_err = Some(Error::Upstream(format!(
                    "Ollama connection error (is Ollama running at {url}?): {e}"
                )));
                continue;
            }
        }
    }

    Err(last_err
        .unwrap_or_else(|| Error::Upstream("embedding failed after retries".to_string())))
}

fn required_model(config: &EmbeddingConfig) -> Result<&str> {
    config
        .model
        .as_deref()
        .ok_or_else(|| Error::Upstream("embedding.model not configured".to_string()))
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| Error::Upstream(format!("failed to build HTTP client: {e}")))
}

fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(1 << (attempt - 1).min(5))
}

/// Parse `{"data": [{"embedding": [...]}, ...]}`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| Error::Upstream("invalid embedding response: missing data".to_string()))?;

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| {
                Error::Upstream("invalid embedding response: missing embedding".to_string())
            })?;
        embeddings.push(
            embedding
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect(),
        );
    }

    Ok(embeddings)
}

/// Parse `{"embeddings": [[...], ...]}`.
fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            Error::Upstream("invalid Ollama response: missing embeddings".to_string())
        })?;

    let mut result = Vec::with_capacity(embeddings.len());
    for embedding in embeddings {
        let vec: Vec<f32> = embedding
            .as_array()
            .ok_or_else(|| {
                Error::Upstream("invalid Ollama response: embedding is not an array".to_string())
            })?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        result.push(vec);
    }

    Ok(result)
}

// ============ Vector utilities ============

/// Encode a float vector as little-endian f32 bytes for BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1, 1]`. Returns 0.0 for empty or mismatched
/// vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Map cosine similarity onto the `[0, 1]` scale reported by the API:
/// 1.0 = identical direction, 0.5 = orthogonal, 0.0 = opposite.
pub fn similarity_score(cosine: f32) -> f32 {
    ((cosine + 1.0) / 2.0).clamp(0.0, 1.0)
}
