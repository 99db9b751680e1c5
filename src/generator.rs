//! Generation-service client for Gemini-style `generateContent` endpoints.

use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use rand::Rng;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

/// Answer substituted when the response lacks the expected text path.
pub const FALLBACK_ANSWER: &str = "No valid response returned from the generation service.";

/// Failures from the generation call, split so the HTTP layer can forward
/// upstream status codes while mapping transport faults to a server error.
#[derive(Debug)]
pub enum GenerationError {
    /// Upstream replied with a non-success status after retries.
    Status {
        /// Status code the generation service returned.
        status: StatusCode,
        /// Response body, for the error detail.
        body: String,
    },
    /// Transport-level failure (timeout, connect, decode) after retries.
    Transport(reqwest::Error),
}

impl fmt::Display for GenerationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status { status, body } => {
                write!(f, "generation service returned {status}: {body}")
            }
            Self::Transport(err) => write!(f, "generation request failed: {err}"),
        }
    }
}

impl std::error::Error for GenerationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(err) => Some(err),
            _ => None,
        }
    }
}

/// Async client for the downstream text-generation service.
#[derive(Debug, Clone)]
pub struct GenerationClient {
    client: Client,
    url: String,
    api_key: String,
    max_retries: usize,
}

impl GenerationClient {
    /// Builds a client for `{base_url}/models/{model}:generateContent`.
    pub fn new(
        api_key: String,
        base_url: String,
        model: String,
        timeout: Duration,
        max_retries: usize,
    ) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing generation API key");
        anyhow::ensure!(!model.trim().is_empty(), "missing generation model name");
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build generation HTTP client")?;
        let url = format!(
            "{}/models/{}:generateContent",
            base_url.trim_end_matches('/'),
            model
        );
        Ok(Self {
            client,
            url,
            api_key: api_key.trim().to_string(),
            max_retries: max_retries.max(1),
        })
    }

    /// Sends the prompt and returns the answer text.
    ///
    /// Timeouts, connect failures, 429 and 5xx responses are retried with
    /// jittered exponential backoff up to the configured attempt budget;
    /// other 4xx responses fail immediately so the caller can forward them.
    pub async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let body = GenerateRequest {
            contents: [Content {
                parts: [Part { text: prompt }],
            }],
        };
        let mut attempt = 0usize;
        loop {
            let response = self
                .client
                .post(&self.url)
                .header("x-goog-api-key", &self.api_key)
                .json(&body)
                .send()
                .await;
            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let parsed: GenerateResponse =
                            resp.json().await.map_err(GenerationError::Transport)?;
                        return Ok(answer_text(parsed));
                    }
                    let body_text = resp
                        .text()
                        .await
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if retryable_status(status) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        tokio::time::sleep(retry_backoff(attempt)).await;
                        continue;
                    }
                    return Err(GenerationError::Status {
                        status,
                        body: body_text,
                    });
                }
                Err(err) => {
                    if retryable_error(&err) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        tokio::time::sleep(retry_backoff(attempt)).await;
                        continue;
                    }
                    return Err(GenerationError::Transport(err));
                }
            }
        }
    }
}

/// Extracts `candidates[0].content.parts[0].text`, substituting the fixed
/// fallback when any link of that path is absent.
fn answer_text(response: GenerateResponse) -> String {
    response
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content.parts.into_iter().next())
        .and_then(|part| part.text)
        .unwrap_or_else(|| FALLBACK_ANSWER.to_string())
}

fn retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() || err.is_decode()
}

fn retry_backoff(attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    let base = 500u64 * (1 << capped);
    let jitter = rand::thread_rng().gen_range(0..250u64);
    Duration::from_millis(base + jitter)
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<ResponseCandidate>,
}

#[derive(Debug, Deserialize)]
struct ResponseCandidate {
    #[serde(default)]
    content: ResponseContent,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> GenerateResponse {
        serde_json::from_str(json).expect("response json")
    }

    #[test]
    fn extracts_first_candidate_text() {
        let response = parse(
            r#"{"candidates":[{"content":{"parts":[{"text":"the answer"},{"text":"ignored"}]}}]}"#,
        );

        assert_eq!(answer_text(response), "the answer");
    }

    #[test]
    fn missing_answer_path_yields_fallback() {
        for json in [
            r#"{}"#,
            r#"{"candidates":[]}"#,
            r#"{"candidates":[{"content":{"parts":[]}}]}"#,
            r#"{"candidates":[{"content":{"parts":[{"inlineData":{}}]}}]}"#,
        ] {
            assert_eq!(answer_text(parse(json)), FALLBACK_ANSWER, "for {json}");
        }
    }

    #[test]
    fn retry_classification_splits_4xx_from_5xx() {
        assert!(retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(retryable_status(StatusCode::BAD_GATEWAY));
        assert!(!retryable_status(StatusCode::BAD_REQUEST));
        assert!(!retryable_status(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn backoff_grows_with_attempts() {
        assert!(retry_backoff(1) >= Duration::from_millis(1000));
        assert!(retry_backoff(3) >= Duration::from_millis(4000));
        assert!(retry_backoff(8) < Duration::from_millis(16_250 + 1));
    }
}
