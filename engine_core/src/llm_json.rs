use crate::capabilities::llm::{TextModel, TextRequest, VisionModel, VisionRequest};
use crate::contracts::{ExtractError, ExtractErrorKind};
use rand::Rng;
use serde::de::DeserializeOwned;
use std::future::Future;
use thiserror::Error;
use tokio::time::{sleep, Duration};

pub const MAX_LLM_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_MS: u64 = 500;
const BACKOFF_JITTER_MS: u64 = 250;

/// # NDOC
/// component: `llm_json`
/// purpose: Terminal failure of a strict-JSON LLM contract, with the cost
///   already spent on the failed attempts.
#[derive(Debug, Error)]
#[error("llm json contract failed after {attempts} attempts: {error}")]
pub struct LlmJsonFailure {
    pub error: ExtractError,
    pub attempts: u32,
    pub cost_usd: f64,
}

/// Successful strict-JSON response with accounting.
#[derive(Debug, Clone)]
pub struct LlmJsonResponse<T> {
    pub value: T,
    pub attempts: u32,
    pub cost_usd: f64,
}

/// Pulls the JSON payload out of a free-form model response: strips markdown
/// code fences, then takes the span from the first `{`/`[` to the matching
/// last `}`/`]`.
pub fn extract_json_block(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    let defenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.strip_suffix("```").unwrap_or(rest))
        .unwrap_or(trimmed)
        .trim();

    let object = defenced.find('{').zip(defenced.rfind('}'));
    let array = defenced.find('[').zip(defenced.rfind(']'));
    let span = match (object, array) {
        (Some((os, oe)), Some((as_, ae))) => {
            if as_ < os {
                Some((as_, ae))
            } else {
                Some((os, oe))
            }
        }
        (Some(o), None) => Some(o),
        (None, Some(a)) => Some(a),
        (None, None) => None,
    };
    span.and_then(|(start, end)| (start < end).then(|| &defenced[start..=end]))
}

/// Parses a model response against a serde schema.
pub fn parse_llm_json<T: DeserializeOwned>(raw: &str) -> Result<T, ExtractError> {
    let block = extract_json_block(raw)
        .ok_or_else(|| ExtractError::parse("llm response contained no JSON payload"))?;
    serde_json::from_str(block)
        .map_err(|e| ExtractError::parse(format!("llm response failed schema parse: {}", e)))
}

fn backoff_delay(attempt: u32) -> Duration {
    let base = BACKOFF_BASE_MS.saturating_mul(1u64 << attempt.min(6));
    let jitter = rand::thread_rng().gen_range(0..BACKOFF_JITTER_MS);
    Duration::from_millis(base + jitter)
}

/// # NDOC
/// component: `llm_json`
/// purpose: Drive any LLM call through the strict-JSON contract: parse into
///   `T`, retry with exponential backoff on parse and transient failures, up
///   to `MAX_LLM_ATTEMPTS`. Quota and input errors end the loop immediately.
pub async fn complete_json_with<T, F, Fut>(
    mut call: F,
    cost_per_call_usd: f64,
) -> Result<LlmJsonResponse<T>, LlmJsonFailure>
where
    T: DeserializeOwned,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<String, ExtractError>>,
{
    let mut cost_usd = 0.0;
    let mut last_error = ExtractError::internal("llm contract loop did not run");
    for attempt in 0..MAX_LLM_ATTEMPTS {
        if attempt > 0 {
            sleep(backoff_delay(attempt - 1)).await;
        }
        match call().await {
            Ok(raw) => {
                cost_usd += cost_per_call_usd;
                match parse_llm_json::<T>(&raw) {
                    Ok(value) => {
                        return Ok(LlmJsonResponse {
                            value,
                            attempts: attempt + 1,
                            cost_usd,
                        })
                    }
                    Err(err) => last_error = err,
                }
            }
            Err(err) => {
                if matches!(err.kind, ExtractErrorKind::TransientExternalError) && err.retryable {
                    cost_usd += cost_per_call_usd;
                    last_error = err;
                    continue;
                }
                return Err(LlmJsonFailure {
                    error: err,
                    attempts: attempt + 1,
                    cost_usd,
                });
            }
        }
    }
    Err(LlmJsonFailure {
        error: last_error,
        attempts: MAX_LLM_ATTEMPTS,
        cost_usd,
    })
}

/// Strict-JSON completion over the text capability.
pub async fn complete_text_json<T: DeserializeOwned>(
    model: &dyn TextModel,
    prompt: &str,
    max_tokens: u32,
) -> Result<LlmJsonResponse<T>, LlmJsonFailure> {
    complete_json_with(
        || {
            model.complete(TextRequest {
                prompt: prompt.to_string(),
                json_mode: true,
                max_tokens,
            })
        },
        model.cost_per_call_usd(),
    )
    .await
}

/// Strict-JSON completion over the vision capability.
pub async fn complete_vision_json<T: DeserializeOwned>(
    model: &dyn VisionModel,
    request: VisionRequest,
) -> Result<LlmJsonResponse<T>, LlmJsonFailure> {
    complete_json_with(
        || model.complete(request.clone()),
        model.cost_per_call_usd(),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Deserialize, PartialEq)]
    struct Probe {
        ok: bool,
    }

    #[test]
    fn extracts_fenced_json() {
        let raw = "```json\n{\"ok\": true}\n```";
        assert_eq!(extract_json_block(raw), Some("{\"ok\": true}"));
    }

    #[test]
    fn extracts_json_with_surrounding_prose() {
        let raw = "Here is the data you asked for: {\"ok\": true} hope it helps!";
        assert_eq!(extract_json_block(raw), Some("{\"ok\": true}"));
    }

    #[test]
    fn prefers_leading_array_payload() {
        let raw = "[{\"ok\": true}]";
        let parsed: Vec<Probe> = parse_llm_json(raw).unwrap();
        assert_eq!(parsed, vec![Probe { ok: true }]);
    }

    #[test]
    fn no_json_payload_is_parse_error() {
        let err = parse_llm_json::<Probe>("sorry, I cannot help").expect_err("must fail");
        assert_eq!(err.kind, ExtractErrorKind::ParseError);
    }

    #[tokio::test]
    async fn retries_parse_failures_then_succeeds() {
        let calls = AtomicU32::new(0);
        let out = complete_json_with::<Probe, _, _>(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Ok("not json".to_string())
                    } else {
                        Ok("{\"ok\": true}".to_string())
                    }
                }
            },
            0.002,
        )
        .await
        .unwrap();
        assert_eq!(out.value, Probe { ok: true });
        assert_eq!(out.attempts, 2);
        assert!((out.cost_usd - 0.004).abs() < 1e-9);
    }

    #[tokio::test]
    async fn exhausts_attempts_and_reports_spent_cost() {
        let failure = complete_json_with::<Probe, _, _>(
            || async { Ok("still not json".to_string()) },
            0.002,
        )
        .await
        .expect_err("must fail");
        assert_eq!(failure.attempts, MAX_LLM_ATTEMPTS);
        assert_eq!(failure.error.kind, ExtractErrorKind::ParseError);
        assert!((failure.cost_usd - 0.006).abs() < 1e-9);
    }

    #[tokio::test]
    async fn quota_error_short_circuits() {
        let failure = complete_json_with::<Probe, _, _>(
            || async { Err(ExtractError::quota("llm quota")) },
            0.002,
        )
        .await
        .expect_err("must fail");
        assert_eq!(failure.attempts, 1);
        assert_eq!(failure.error.kind, ExtractErrorKind::QuotaError);
        assert_eq!(failure.cost_usd, 0.0);
    }
}
