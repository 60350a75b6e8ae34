//! Async embeddings client for OpenAI-compatible endpoints.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::config::EmbeddingConfig;
use crate::types::IndexError;

use super::EmbeddingProvider;

/// HTTP-backed [`EmbeddingProvider`] speaking the `/embeddings` wire format.
///
/// Rate-limit (429) and server errors are retried with exponential backoff up
/// to `max_retries` attempts; client errors fail immediately.
#[derive(Clone)]
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dimensions: usize,
    max_retries: usize,
}

impl HttpEmbeddingProvider {
    /// Builds a client for an OpenAI-compatible embeddings endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Embedding`] when the API key is not a valid
    /// header value or the HTTP client cannot be constructed.
    pub fn new(
        base_url: &str,
        api_key: Option<&str>,
        model: impl Into<String>,
        dimensions: usize,
        timeout: Duration,
        max_retries: usize,
    ) -> Result<Self, IndexError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = api_key {
            let auth = format!("Bearer {}", key.trim());
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth)
                    .map_err(|err| IndexError::Embedding(format!("invalid api key: {err}")))?,
            );
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| {
                IndexError::Embedding(format!("failed to build embedding client: {err}"))
            })?;
        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model: model.into(),
            dimensions,
            max_retries: max_retries.max(1),
        })
    }

    /// Builds a client from an [`EmbeddingConfig`] section.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, IndexError> {
        Self::new(
            &config.endpoint,
            config.api_key.as_deref(),
            config.model.clone(),
            config.dimensions,
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )
    }

    fn should_retry(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }

    fn is_retryable_transport(err: &reqwest::Error) -> bool {
        err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() || err.is_decode()
    }

    fn backoff(attempt: usize) -> Duration {
        let capped = attempt.min(5) as u32;
        Duration::from_millis(250 * (1 << capped))
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    fn name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let mut attempt = 0usize;
        loop {
            let response = self.client.post(&self.endpoint).json(&request).send().await;
            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let mut parsed: EmbeddingResponse = resp.json().await.map_err(|err| {
                            IndexError::Embedding(format!(
                                "failed to parse embedding response: {err}"
                            ))
                        })?;
                        parsed.data.sort_by_key(|entry| entry.index);
                        if parsed.data.len() != texts.len() {
                            return Err(IndexError::Embedding(format!(
                                "endpoint returned {} embeddings for {} inputs",
                                parsed.data.len(),
                                texts.len()
                            )));
                        }
                        return Ok(parsed
                            .data
                            .into_iter()
                            .map(|entry| entry.embedding)
                            .collect());
                    }

                    let body = resp.text().await.unwrap_or_else(|_| "<no body>".into());
                    if Self::should_retry(status) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        tracing::warn!(%status, attempt, "embedding request retrying");
                        tokio::time::sleep(Self::backoff(attempt)).await;
                        continue;
                    }
                    return Err(IndexError::Embedding(format!(
                        "embedding request failed ({status}): {body}"
                    )));
                }
                Err(err) => {
                    if Self::is_retryable_transport(&err) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        tracing::warn!(error = %err, attempt, "embedding transport retrying");
                        tokio::time::sleep(Self::backoff(attempt)).await;
                        continue;
                    }
                    return Err(IndexError::Embedding(err.to_string()));
                }
            }
        }
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingEntry>,
}

#[derive(Deserialize)]
struct EmbeddingEntry {
    index: usize,
    embedding: Vec<f32>,
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn provider_for(server: &MockServer, max_retries: usize) -> HttpEmbeddingProvider {
        HttpEmbeddingProvider::new(
            &server.base_url(),
            Some("test-key"),
            "test-model",
            3,
            Duration::from_secs(5),
            max_retries,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn parses_vectors_in_input_order() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/embeddings");
                then.status(200).json_body(serde_json::json!({
                    "data": [
                        {"index": 1, "embedding": [0.4, 0.5, 0.6]},
                        {"index": 0, "embedding": [0.1, 0.2, 0.3]}
                    ]
                }));
            })
            .await;

        let provider = provider_for(&server, 3);
        let vectors = provider
            .embed_batch(&["first".into(), "second".into()])
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(vectors[0], vec![0.1, 0.2, 0.3]);
        assert_eq!(vectors[1], vec![0.4, 0.5, 0.6]);
    }

    #[tokio::test]
    async fn client_error_is_not_retried() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/embeddings");
                then.status(400).body("bad request");
            })
            .await;

        let provider = provider_for(&server, 5);
        let err = provider.embed_batch(&["text".into()]).await.unwrap_err();

        assert!(matches!(err, IndexError::Embedding(_)));
        assert_eq!(mock.hits_async().await, 1);
    }

    #[tokio::test]
    async fn length_mismatch_is_rejected() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/embeddings");
                then.status(200).json_body(serde_json::json!({
                    "data": [{"index": 0, "embedding": [0.1]}]
                }));
            })
            .await;

        let provider = provider_for(&server, 1);
        let err = provider
            .embed_batch(&["one".into(), "two".into()])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("1 embeddings for 2 inputs"));
    }

    #[tokio::test]
    async fn empty_batch_short_circuits() {
        let server = MockServer::start_async().await;
        let provider = provider_for(&server, 1);
        assert!(provider.embed_batch(&[]).await.unwrap().is_empty());
    }
}
