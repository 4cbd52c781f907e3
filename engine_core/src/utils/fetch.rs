use crate::contracts::{ExtractError, ExtractResult};
use rand::Rng;
use tokio::time::{sleep, Duration};

const MAX_FETCH_ATTEMPTS: u32 = 3;
const FETCH_BACKOFF_BASE_MS: u64 = 300;

async fn fetch_once(client: &reqwest::Client, url: &str) -> ExtractResult<reqwest::Response> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if status.as_u16() == 429 {
        return Err(ExtractError::transient(format!("rate limited fetching {}", url)));
    }
    if !status.is_success() {
        return Err(ExtractError::new(
            crate::contracts::ExtractErrorKind::TransientExternalError,
            format!("fetch of {} returned {}", url, status),
            status.is_server_error(),
            None,
        ));
    }
    Ok(response)
}

async fn with_retries<T, F, Fut>(mut call: F) -> ExtractResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ExtractResult<T>>,
{
    let mut last = ExtractError::internal("fetch loop did not run");
    for attempt in 0..MAX_FETCH_ATTEMPTS {
        if attempt > 0 {
            let jitter = rand::thread_rng().gen_range(0..150);
            sleep(Duration::from_millis(
                FETCH_BACKOFF_BASE_MS * (1 << (attempt - 1)) + jitter,
            ))
            .await;
        }
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.retryable => last = err,
            Err(err) => return Err(err),
        }
    }
    Err(last)
}

/// # NDOC
/// component: `utils::fetch`
/// purpose: Plain HTTP text fetch with component-local retry policy
///   (exponential backoff with jitter, capped at 3 attempts).
pub async fn fetch_text(client: &reqwest::Client, url: &str) -> ExtractResult<String> {
    with_retries(|| async {
        let response = fetch_once(client, url).await?;
        response.text().await.map_err(ExtractError::from)
    })
    .await
}

/// Binary fetch used for PDFs captured during the crawl.
pub async fn fetch_bytes(client: &reqwest::Client, url: &str) -> ExtractResult<Vec<u8>> {
    with_retries(|| async {
        let response = fetch_once(client, url).await?;
        let bytes = response.bytes().await.map_err(ExtractError::from)?;
        Ok(bytes.to_vec())
    })
    .await
}
