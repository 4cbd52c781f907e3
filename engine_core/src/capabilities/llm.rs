use crate::contracts::{ExtractError, ExtractResult};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};

/// # NDOC
/// component: `capabilities::llm`
/// purpose: Text-completion request; `json_mode` demands a JSON-only response
///   from providers that support it.
#[derive(Debug, Clone)]
pub struct TextRequest {
    pub prompt: String,
    pub json_mode: bool,
    pub max_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct EncodedImage {
    /// `image/png` or `image/jpeg`.
    pub media_type: String,
    pub base64_data: String,
}

#[derive(Debug, Clone)]
pub struct VisionRequest {
    pub prompt: String,
    pub images: Vec<EncodedImage>,
    pub max_tokens: u32,
}

/// # NDOC
/// component: `capabilities::llm`
/// purpose: Text LLM capability.
/// invariants:
///   - Implementations pace their own calls; the orchestrator does not share
///     rate-limit state across runs.
#[async_trait]
pub trait TextModel: Send + Sync {
    async fn complete(&self, request: TextRequest) -> ExtractResult<String>;

    /// Heuristic per-call cost estimate for the budget ledger.
    fn cost_per_call_usd(&self) -> f64 {
        0.002
    }
}

/// # NDOC
/// component: `capabilities::llm`
/// purpose: Multimodal LLM capability accepting base64 images.
#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn complete(&self, request: VisionRequest) -> ExtractResult<String>;

    fn cost_per_call_usd(&self) -> f64 {
        0.01
    }
}

/// Minimum delay between calls on one client instance.
const MIN_DELAY_BETWEEN_CALLS_MS: u64 = 1_000;

/// # NDOC
/// component: `capabilities::llm`
/// purpose: Gemini REST implementation behind both model capabilities.
///   API key and client are instance state; nothing global.
pub struct GeminiModel {
    http: reqwest::Client,
    api_key: String,
    model_name: String,
    base_url: String,
    last_call: Mutex<Option<Instant>>,
}

impl GeminiModel {
    pub fn new(http: reqwest::Client, api_key: impl Into<String>, model_name: impl Into<String>) -> Self {
        Self::with_base_url(
            http,
            api_key,
            model_name,
            "https://generativelanguage.googleapis.com/v1beta",
        )
    }

    pub fn with_base_url(
        http: reqwest::Client,
        api_key: impl Into<String>,
        model_name: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            http,
            api_key: api_key.into(),
            model_name: model_name.into(),
            base_url: base_url.into(),
            last_call: Mutex::new(None),
        }
    }

    async fn pace(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(at) = *last {
            let elapsed = at.elapsed();
            if elapsed < Duration::from_millis(MIN_DELAY_BETWEEN_CALLS_MS) {
                sleep(Duration::from_millis(MIN_DELAY_BETWEEN_CALLS_MS) - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn generate(&self, parts: Vec<Value>, json_mode: bool, max_tokens: u32) -> ExtractResult<String> {
        self.pace().await;

        let mut generation_config = json!({
            "temperature": 0.2,
            "candidateCount": 1,
            "maxOutputTokens": max_tokens,
        });
        if json_mode {
            generation_config["responseMimeType"] = json!("application/json");
        }
        let request_body = json!({
            "contents": [{"parts": parts}],
            "generationConfig": generation_config,
        });

        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model_name, self.api_key
        );
        let response = self.http.post(&url).json(&request_body).send().await?;
        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ExtractError::quota("llm service rate limit"));
        }
        if !status.is_success() {
            return Err(ExtractError::new(
                crate::contracts::ExtractErrorKind::TransientExternalError,
                format!("llm service returned {}", status),
                status.is_server_error(),
                None,
            ));
        }
        let body: Value = response.json().await?;
        body["candidates"]
            .as_array()
            .and_then(|c| c.first())
            .and_then(|c| c["content"]["parts"].as_array())
            .and_then(|p| p.first())
            .and_then(|p| p["text"].as_str())
            .map(str::to_string)
            .ok_or_else(|| ExtractError::parse("llm response had no text candidate"))
    }
}

#[async_trait]
impl TextModel for GeminiModel {
    async fn complete(&self, request: TextRequest) -> ExtractResult<String> {
        self.generate(
            vec![json!({"text": request.prompt})],
            request.json_mode,
            request.max_tokens,
        )
        .await
    }
}

#[async_trait]
impl VisionModel for GeminiModel {
    async fn complete(&self, request: VisionRequest) -> ExtractResult<String> {
        let mut parts = vec![json!({"text": request.prompt})];
        for image in &request.images {
            parts.push(json!({
                "inline_data": {
                    "mime_type": image.media_type,
                    "data": image.base64_data,
                }
            }));
        }
        self.generate(parts, true, request.max_tokens).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httptest::{matchers::*, responders::*, Expectation, Server};

    fn model(server: &Server) -> GeminiModel {
        GeminiModel::with_base_url(
            reqwest::Client::new(),
            "test-key",
            "gemini-test",
            server.url_str("/v1beta"),
        )
    }

    #[tokio::test]
    async fn text_completion_extracts_first_candidate() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path(
                "POST",
                "/v1beta/models/gemini-test:generateContent",
            ))
            .respond_with(json_encoded(serde_json::json!({
                "candidates": [{"content": {"parts": [{"text": "{\"ok\":true}"}]}}]
            }))),
        );
        let out = TextModel::complete(
            &model(&server),
            TextRequest {
                prompt: "return ok".to_string(),
                json_mode: true,
                max_tokens: 256,
            },
        )
        .await
        .unwrap();
        assert_eq!(out, "{\"ok\":true}");
    }

    #[tokio::test]
    async fn missing_candidates_is_a_parse_error() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path(
                "POST",
                "/v1beta/models/gemini-test:generateContent",
            ))
            .respond_with(json_encoded(serde_json::json!({"candidates": []}))),
        );
        let err = TextModel::complete(
            &model(&server),
            TextRequest {
                prompt: "anything".to_string(),
                json_mode: false,
                max_tokens: 64,
            },
        )
        .await
        .expect_err("must fail");
        assert_eq!(err.kind, crate::contracts::ExtractErrorKind::ParseError);
    }
}
