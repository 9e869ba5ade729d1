use crate::adapters::ToneGenerator;
use crate::models::generation::GenerationError;
use crate::models::tones::ModelConfig;
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_API_URL: &str = "https://api.anthropic.com/v1/messages";
pub const DEFAULT_API_VERSION: &str = "2023-06-01";

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: [RequestMessage<'a>; 1],
}

#[derive(Serialize)]
struct RequestMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// Tone Generator backed by the Anthropic Messages API.
///
/// One request per call, no retries here: the fan-out owns retry and backoff,
/// this type only classifies failures.
#[derive(Debug, Clone)]
pub struct AnthropicGenerator {
    client: reqwest::Client,
    api_url: String,
}

impl AnthropicGenerator {
    pub fn new(
        api_key: &str,
        api_version: &str,
        api_url: impl Into<String>,
        request_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_str(api_key)?);
        headers.insert("anthropic-version", HeaderValue::from_str(api_version)?);
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            client,
            api_url: api_url.into(),
        })
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    // 529 is Anthropic's "overloaded"
    matches!(status.as_u16(), 408 | 429 | 500 | 502 | 503 | 504 | 529)
}

fn classify_request_error(e: reqwest::Error) -> GenerationError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        GenerationError::Transient(e.to_string())
    } else {
        GenerationError::Fatal(e.to_string())
    }
}

#[async_trait]
impl ToneGenerator for AnthropicGenerator {
    async fn generate(&self, prompt: &str, model: &ModelConfig) -> Result<String, GenerationError> {
        let request = MessagesRequest {
            model: &model.name,
            max_tokens: model.max_tokens,
            messages: [RequestMessage {
                role: "user",
                content: prompt,
            }],
        };
        let response = self
            .client
            .post(&self.api_url)
            .json(&request)
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        debug!(status = %status, model = model.name, "Tone generation response received");
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let reason = format!("generator returned {status}: {body}");
            return match is_transient_status(status) {
                true => Err(GenerationError::Transient(reason)),
                false => Err(GenerationError::Fatal(reason)),
            };
        }

        let response: MessagesResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Fatal(format!("malformed generator response: {e}")))?;
        response
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .find_map(|block| block.text)
            .map(|text| text.trim().to_owned())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| GenerationError::Fatal("generator returned no text".to_owned()))
    }
}

/// Stand-in used when no API key is configured. Every call is rejected.
pub struct UnconfiguredGenerator;

#[async_trait]
impl ToneGenerator for UnconfiguredGenerator {
    async fn generate(&self, _prompt: &str, _model: &ModelConfig) -> Result<String, GenerationError> {
        Err(GenerationError::Fatal("ANTHROPIC_API_KEY is not set".to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn model() -> ModelConfig {
        ModelConfig {
            name: "claude-test".to_owned(),
            max_tokens: 256,
        }
    }

    fn generator(server: &MockServer) -> AnthropicGenerator {
        AnthropicGenerator::new(
            "test-api-key",
            DEFAULT_API_VERSION,
            server.uri(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn returns_first_text_block() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-api-key", "test-api-key"))
            .and(header("anthropic-version", DEFAULT_API_VERSION))
            .and(body_partial_json(serde_json::json!({
                "model": "claude-test",
                "max_tokens": 256,
                "messages": [{"role": "user", "content": "be gentle"}],
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [{"type": "text", "text": "  Sorry, I can't make it.  "}],
            })))
            .mount(&server)
            .await;

        let text = generator(&server).generate("be gentle", &model()).await;
        assert_eq!(text, Ok("Sorry, I can't make it.".to_owned()));
    }

    #[tokio::test]
    async fn overloaded_and_rate_limited_are_transient() {
        for status in [429, 503, 529] {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(status).set_body_string("busy"))
                .mount(&server)
                .await;

            let result = generator(&server).generate("x", &model()).await;
            assert!(
                matches!(result, Err(GenerationError::Transient(_))),
                "status {status} gave {result:?}"
            );
        }
    }

    #[tokio::test]
    async fn bad_request_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid model"))
            .mount(&server)
            .await;

        let result = generator(&server).generate("x", &model()).await;
        match result {
            Err(GenerationError::Fatal(reason)) => assert!(reason.contains("invalid model")),
            other => panic!("expected fatal error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_content_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "content": [] })),
            )
            .mount(&server)
            .await;

        let result = generator(&server).generate("x", &model()).await;
        assert!(matches!(result, Err(GenerationError::Fatal(_))));
    }

    #[tokio::test]
    async fn unreachable_generator_is_transient() {
        let server = MockServer::start().await;
        let uri = server.uri();
        drop(server);

        let generator =
            AnthropicGenerator::new("k", DEFAULT_API_VERSION, uri, Duration::from_secs(2)).unwrap();
        let result = generator.generate("x", &model()).await;
        assert!(matches!(result, Err(GenerationError::Transient(_))));
    }
}
