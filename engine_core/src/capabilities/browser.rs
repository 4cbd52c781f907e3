use crate::contracts::{ExtractError, ExtractResult};
use async_trait::async_trait;
use playwright::api::{Browser, BrowserContext, DocumentLoadState, Page, Playwright};
use tokio::time::{sleep, Duration};

/// # NDOC
/// component: `capabilities::browser`
/// purpose: Per-navigation limits handed down from the crawler configuration.
#[derive(Debug, Clone, Copy)]
pub struct PageLimits {
    pub nav_timeout_ms: u64,
    pub settle_ms: u64,
}

/// # NDOC
/// component: `capabilities::browser`
/// purpose: One rendered page: post-JavaScript DOM plus a full-page screenshot.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub final_url: String,
    pub html: String,
    pub screenshot_png: Vec<u8>,
}

/// # NDOC
/// component: `capabilities::browser`
/// purpose: A live browser context reused for every navigation in one run.
/// invariants:
///   - One navigation at a time; callers sequence their own page work.
///   - `close` must release the underlying browser on every exit path.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn render_page(&self, url: &str, limits: &PageLimits) -> ExtractResult<RenderedPage>;
    async fn close(&self) -> ExtractResult<()>;
}

/// # NDOC
/// component: `capabilities::browser`
/// purpose: Headless browser capability; sessions are per-run, never shared
///   across runs.
#[async_trait]
pub trait HeadlessBrowser: Send + Sync {
    async fn open_session(&self) -> ExtractResult<Box<dyn BrowserSession>>;
}

/// Playwright-backed implementation. Chromium is launched per session and a
/// single page is reused across navigations.
pub struct PlaywrightBrowser;

pub struct PlaywrightSession {
    browser: Browser,
    _context: BrowserContext,
    page: Page,
}

fn launch_error(e: impl std::fmt::Debug) -> ExtractError {
    ExtractError::resource(format!("browser launch failed: {:?}", e), false)
}

fn nav_error(url: &str, e: impl std::fmt::Debug) -> ExtractError {
    ExtractError::transient(format!("navigation to {} failed: {:?}", url, e))
}

#[async_trait]
impl HeadlessBrowser for PlaywrightBrowser {
    async fn open_session(&self) -> ExtractResult<Box<dyn BrowserSession>> {
        let pw = Playwright::initialize().await.map_err(launch_error)?;
        pw.prepare().map_err(launch_error)?;
        let chromium = pw.chromium();
        let browser = chromium
            .launcher()
            .headless(true)
            .launch()
            .await
            .map_err(launch_error)?;
        let context = browser.context_builder().build().await.map_err(launch_error)?;
        let page = context.new_page().await.map_err(launch_error)?;
        Ok(Box::new(PlaywrightSession {
            browser,
            _context: context,
            page,
        }))
    }
}

#[async_trait]
impl BrowserSession for PlaywrightSession {
    async fn render_page(&self, url: &str, limits: &PageLimits) -> ExtractResult<RenderedPage> {
        self.page
            .goto_builder(url)
            .wait_until(DocumentLoadState::NetworkIdle)
            .timeout(limits.nav_timeout_ms as f64)
            .goto()
            .await
            .map_err(|e| nav_error(url, e))?;
        // Give client-side rendering a moment to settle after network idle.
        sleep(Duration::from_millis(limits.settle_ms)).await;

        let html = self.page.content().await.map_err(|e| nav_error(url, e))?;
        let screenshot_png = self
            .page
            .screenshot_builder()
            .full_page(true)
            .screenshot()
            .await
            .map_err(|e| nav_error(url, e))?;
        let final_url = self
            .page
            .url()
            .map_err(|e| nav_error(url, e))?;
        Ok(RenderedPage {
            final_url,
            html,
            screenshot_png,
        })
    }

    async fn close(&self) -> ExtractResult<()> {
        self.browser
            .close()
            .await
            .map_err(|e| ExtractError::resource(format!("browser close failed: {:?}", e), false))
    }
}
