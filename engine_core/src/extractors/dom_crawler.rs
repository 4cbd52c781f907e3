use crate::artifact_store::{ArtifactMeta, ArtifactStore};
use crate::capabilities::browser::{HeadlessBrowser, PageLimits};
use crate::capabilities::Clock;
use crate::config::CrawlerLimits;
use crate::contracts::ExtractResult;
use crate::data_models::contact::{platform_for_host, SocialLink};
use crate::data_models::menu::MenuItem;
use crate::data_models::record::{MediaKind, Observations, PhaseId, RawField, SourceTag};
use crate::extractors::sitemap::{classify_url, ClassifiedUrl, PageType};
use crate::utils::fetch::fetch_bytes;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

const DOM_CONFIDENCE: f64 = 0.6;
const LINK_CONFIDENCE: f64 = 0.7;
const MENU_CONTAINER_MIN_CHARS: usize = 200;
const PRICE_BLOCK_MIN_CHARS: usize = 80;
const SPARSE_HTML_THRESHOLD: usize = 3;
const COST_PER_PAGE_USD: f64 = 0.001;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("static regex")
});
static PHONE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\+?\(?\d{1,3}\)?[\s.-]?\(?\d{2,4}\)?[\s.-]?\d{3,4}[\s.-]?\d{3,4}")
        .expect("static regex")
});
static PRICE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[$€£]\s?\d{1,4}(?:[.,]\d{2})?").expect("static regex")
});
/// Menu line shaped like "Item name ... $12.99" with an optional separator.
static MENU_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*([A-Za-z][A-Za-z0-9' &(),\-]{2,70}?)\s*(?:[.\u{2026}\u{2013}\u{2014}-]{1,}|\s{2,})?\s*([$€£]\s?\d{1,4}(?:[.,]\d{2})?)\s*$")
        .expect("static regex")
});
/// A line that looks like one weekday's opening hours.
static DAY_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(mon|tue|wed|thu|fri|sat|sun)[a-z]*\b.*\d").expect("static regex")
});

#[derive(Debug, Clone)]
pub struct CrawlError {
    pub url: String,
    pub message: String,
}

/// # NDOC
/// component: `extractors::dom_crawler`
/// purpose: Output of the crawl phase: observations, visited URLs, isolated
///   page errors, and accounting.
#[derive(Debug, Default)]
pub struct CrawlOutcome {
    pub observations: Observations,
    pub crawled_urls: Vec<String>,
    pub errors: Vec<CrawlError>,
    pub duration_s: f64,
    pub cost_usd: f64,
}

pub struct DomCrawler {
    browser: Arc<dyn HeadlessBrowser>,
    http: reqwest::Client,
    store: Arc<dyn ArtifactStore>,
    clock: Arc<dyn Clock>,
    limits: CrawlerLimits,
}

/// Visited-set key: scheme + host + canonical path + sorted query, fragment
/// stripped, trailing slash removed.
pub fn normalize_url(url: &Url) -> String {
    let mut path = url.path().to_string();
    while path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();
    let query = if pairs.is_empty() {
        String::new()
    } else {
        let joined = pairs
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        format!("?{}", joined)
    };
    format!(
        "{}://{}{}{}",
        url.scheme(),
        url.host_str().unwrap_or_default(),
        path,
        query
    )
}

fn same_registrable_host(a: &Url, b: &Url) -> bool {
    let strip = |u: &Url| {
        u.host_str()
            .map(|h| h.trim_start_matches("www.").to_lowercase())
            .unwrap_or_default()
    };
    strip(a) == strip(b)
}

/// Collects rendered text, skipping script/style subtrees.
fn visible_text(element: ElementRef) -> String {
    use scraper::Node;

    let mut out = String::new();
    let mut stack = vec![*element];
    while let Some(node) = stack.pop() {
        match node.value() {
            Node::Text(text) => {
                let t = text.trim();
                if !t.is_empty() {
                    out.push_str(t);
                    out.push('\n');
                }
            }
            Node::Element(el) => {
                if matches!(el.name(), "script" | "style" | "noscript" | "svg") {
                    continue;
                }
                let mut children: Vec<_> = node.children().collect();
                children.reverse();
                stack.extend(children);
            }
            _ => {
                let mut children: Vec<_> = node.children().collect();
                children.reverse();
                stack.extend(children);
            }
        }
    }
    out
}

impl DomCrawler {
    pub fn new(
        browser: Arc<dyn HeadlessBrowser>,
        http: reqwest::Client,
        store: Arc<dyn ArtifactStore>,
        clock: Arc<dyn Clock>,
        limits: CrawlerLimits,
    ) -> Self {
        Self {
            browser,
            http,
            store,
            clock,
            limits,
        }
    }

    /// # NDOC
    /// component: `extractors::dom_crawler`
    /// purpose: Bounded BFS crawl of the target site. Page-level failures are
    ///   recorded and never abort the crawl; only a browser-launch failure is
    ///   returned as an error. The session is closed on every exit path.
    pub async fn crawl(
        &self,
        target: &Url,
        priority_urls: &[ClassifiedUrl],
        pdf_urls: &[String],
        cancel: &CancellationToken,
    ) -> ExtractResult<CrawlOutcome> {
        let started = Instant::now();
        let session = self.browser.open_session().await?;

        let result = self
            .crawl_inner(target, priority_urls, pdf_urls, cancel, session.as_ref(), started)
            .await;

        if let Err(close_err) = session.close().await {
            log::warn!(target: "dom_crawler", "browser close failed: {}", close_err.message);
        }

        let mut outcome = result;
        outcome.duration_s = started.elapsed().as_secs_f64();
        Ok(outcome)
    }

    async fn crawl_inner(
        &self,
        target: &Url,
        priority_urls: &[ClassifiedUrl],
        pdf_urls: &[String],
        cancel: &CancellationToken,
        session: &dyn crate::capabilities::browser::BrowserSession,
        started: Instant,
    ) -> CrawlOutcome {
        let mut outcome = CrawlOutcome::default();
        let limits = PageLimits {
            nav_timeout_ms: self.limits.per_page_nav_timeout_ms,
            settle_ms: self.limits.post_nav_settle_ms,
        };
        let wall_cap = Duration::from_secs(self.limits.max_wall_time_s);

        let mut queue: VecDeque<(Url, PageType, usize)> = VecDeque::new();
        queue.push_back((target.clone(), PageType::Homepage, 0));
        // Priority pages queue right behind the homepage, ahead of anything
        // the homepage links to.
        for classified in priority_urls {
            if let Ok(url) = Url::parse(&classified.url).or_else(|_| target.join(&classified.url)) {
                queue.push_back((url, classified.page_type, 1));
            }
        }

        let mut visited: HashSet<String> = HashSet::new();
        let mut stored_pdf_uris: HashSet<String> = HashSet::new();

        // PDFs already known from the sitemap are captured up front.
        for pdf_url in pdf_urls {
            self.capture_pdf(pdf_url, &mut outcome, &mut stored_pdf_uris).await;
        }

        while let Some((url, page_type, depth)) = queue.pop_front() {
            if cancel.is_cancelled() {
                outcome.errors.push(CrawlError {
                    url: url.to_string(),
                    message: "crawl cancelled".to_string(),
                });
                break;
            }
            if outcome.crawled_urls.len() >= self.limits.max_pages {
                break;
            }
            if started.elapsed() >= wall_cap {
                outcome.errors.push(CrawlError {
                    url: url.to_string(),
                    message: "crawl wall time exhausted".to_string(),
                });
                break;
            }
            let key = normalize_url(&url);
            if !visited.insert(key.clone()) {
                continue;
            }

            let rendered = match session.render_page(url.as_str(), &limits).await {
                Ok(rendered) => rendered,
                Err(err) => {
                    log::warn!(target: "dom_crawler", url = url.as_str();
                        "page skipped: {}", err.message);
                    outcome.errors.push(CrawlError {
                        url: url.to_string(),
                        message: err.message,
                    });
                    continue;
                }
            };
            outcome.cost_usd += COST_PER_PAGE_USD;
            outcome.crawled_urls.push(url.to_string());

            let observed_at = self.clock.now();
            match self
                .store
                .put(
                    &rendered.screenshot_png,
                    MediaKind::ImagePng,
                    ArtifactMeta {
                        source_phase: PhaseId::DomCrawl,
                        caption: Some(format!(
                            "screenshot of {} ({})",
                            url,
                            page_type.as_str()
                        )),
                        captured_at: observed_at,
                        hint_path: None,
                    },
                )
                .await
            {
                Ok(artifact) => outcome.observations.artifacts.push(artifact),
                Err(err) => outcome.errors.push(CrawlError {
                    url: url.to_string(),
                    message: format!("screenshot store failed: {}", err.message),
                }),
            }

            let extraction_counts =
                extract_page(&rendered.html, &url, page_type, observed_at, &mut outcome.observations);

            // Sparse structured extraction on key pages keeps the raw HTML
            // around for later LLM use.
            if matches!(page_type, PageType::Menu | PageType::Contact | PageType::About)
                && extraction_counts < SPARSE_HTML_THRESHOLD
            {
                match self
                    .store
                    .put(
                        rendered.html.as_bytes(),
                        MediaKind::TextHtml,
                        ArtifactMeta {
                            source_phase: PhaseId::DomCrawl,
                            caption: Some(format!("raw html of {} ({})", url, page_type.as_str())),
                            captured_at: observed_at,
                            hint_path: None,
                        },
                    )
                    .await
                {
                    Ok(artifact) => outcome.observations.artifacts.push(artifact),
                    Err(err) => outcome.errors.push(CrawlError {
                        url: url.to_string(),
                        message: format!("html store failed: {}", err.message),
                    }),
                }
                outcome
                    .observations
                    .html_by_url
                    .insert(key.clone(), rendered.html.clone());
            }

            if depth < self.limits.max_depth {
                for (link, link_type) in discover_links(&rendered.html, &url, target) {
                    if link.path().to_lowercase().ends_with(".pdf") {
                        self.capture_pdf(link.as_str(), &mut outcome, &mut stored_pdf_uris)
                            .await;
                        continue;
                    }
                    let link_key = normalize_url(&link);
                    if visited.contains(&link_key) {
                        continue;
                    }
                    let item = (link, link_type, depth + 1);
                    if link_type.is_priority() {
                        queue.push_front(item);
                    } else {
                        queue.push_back(item);
                    }
                }
            }
        }

        outcome
    }

    async fn capture_pdf(
        &self,
        pdf_url: &str,
        outcome: &mut CrawlOutcome,
        stored: &mut HashSet<String>,
    ) {
        let bytes = match fetch_bytes(&self.http, pdf_url).await {
            Ok(bytes) => bytes,
            Err(err) => {
                outcome.errors.push(CrawlError {
                    url: pdf_url.to_string(),
                    message: format!("pdf fetch failed: {}", err.message),
                });
                return;
            }
        };
        match self
            .store
            .put(
                &bytes,
                MediaKind::ApplicationPdf,
                ArtifactMeta {
                    source_phase: PhaseId::DomCrawl,
                    caption: Some(format!("pdf captured from {}", pdf_url)),
                    captured_at: self.clock.now(),
                    hint_path: None,
                },
            )
            .await
        {
            // Content addressing dedups identical PDFs; only record the first ref.
            Ok(artifact) => {
                if stored.insert(artifact.uri.clone()) {
                    outcome.observations.artifacts.push(artifact);
                }
            }
            Err(err) => outcome.errors.push(CrawlError {
                url: pdf_url.to_string(),
                message: format!("pdf store failed: {}", err.message),
            }),
        }
    }
}

/// Runs the targeted extractors over one rendered page. Returns how many
/// distinct field groups produced anything, for the sparse-page check.
fn extract_page(
    html: &str,
    url: &Url,
    page_type: PageType,
    observed_at: chrono::DateTime<chrono::Utc>,
    observations: &mut Observations,
) -> usize {
    let document = Html::parse_document(html);
    let mut groups = 0;

    let body_text = Selector::parse("body")
        .ok()
        .and_then(|sel| document.select(&sel).next())
        .map(visible_text)
        .unwrap_or_default();

    if extract_contacts(&document, &body_text, observed_at, observations) {
        groups += 1;
    }
    if extract_social(&document, url, observed_at, observations) {
        groups += 1;
    }
    if extract_menu_content(&document, &body_text, page_type, url, observed_at, observations) {
        groups += 1;
    }
    if extract_hours(&document, &body_text, observed_at, observations) {
        groups += 1;
    }
    if extract_section_text(&document, &body_text, page_type, observed_at, observations) {
        groups += 1;
    }
    groups
}

/// Opening hours from dedicated containers first, then weekday-shaped lines
/// in the body text. At least three day lines are required so stray weekday
/// mentions do not pass as a schedule.
fn extract_hours(
    document: &Html,
    body_text: &str,
    observed_at: chrono::DateTime<chrono::Utc>,
    observations: &mut Observations,
) -> bool {
    let mut hours_text = String::new();
    if let Ok(sel) = Selector::parse("[id*=hour], [class*=hour], [id*=opening], [class*=opening]") {
        for container in document.select(&sel) {
            let text = visible_text(container);
            let day_lines = text
                .lines()
                .filter(|line| DAY_LINE_RE.is_match(line.trim()))
                .count();
            if day_lines >= 3 && text.len() > hours_text.len() {
                hours_text = text;
            }
        }
    }
    if hours_text.is_empty() {
        let day_lines: Vec<&str> = body_text
            .lines()
            .map(str::trim)
            .filter(|line| DAY_LINE_RE.is_match(line))
            .collect();
        if day_lines.len() >= 3 {
            hours_text = day_lines.join("\n");
        }
    }
    let hours_text = hours_text.trim().to_string();
    if hours_text.is_empty() {
        return false;
    }
    observations.hours.push(RawField::new(
        hours_text,
        SourceTag::Dom,
        DOM_CONFIDENCE,
        observed_at,
    ));
    true
}

fn extract_contacts(
    document: &Html,
    body_text: &str,
    observed_at: chrono::DateTime<chrono::Utc>,
    observations: &mut Observations,
) -> bool {
    let mut phones: Vec<String> = Vec::new();
    let mut emails: Vec<String> = Vec::new();
    let mut seen_phone: HashSet<String> = HashSet::new();
    let mut seen_email: HashSet<String> = HashSet::new();

    // Link-based first: tel:/mailto: anchors carry higher signal.
    if let Ok(sel) = Selector::parse("a[href]") {
        for anchor in document.select(&sel) {
            let href = anchor.value().attr("href").unwrap_or("");
            if let Some(number) = href.strip_prefix("tel:") {
                let number = number.trim().to_string();
                if !number.is_empty() && seen_phone.insert(number.clone()) {
                    phones.push(number);
                }
            } else if let Some(addr) = href.strip_prefix("mailto:") {
                let addr = addr.split('?').next().unwrap_or("").trim().to_lowercase();
                if !addr.is_empty() && seen_email.insert(addr.clone()) {
                    emails.push(addr);
                }
            }
        }
    }

    // Regex over visible text second, deduped against the link results.
    for m in EMAIL_RE.find_iter(body_text) {
        let addr = m.as_str().to_lowercase();
        if seen_email.insert(addr.clone()) {
            emails.push(addr);
        }
    }
    for m in PHONE_RE.find_iter(body_text) {
        let digits: String = m.as_str().chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.len() < 10 || digits.len() > 15 {
            continue;
        }
        let number = m.as_str().trim().to_string();
        if seen_phone.insert(number.clone()) {
            phones.push(number);
        }
    }

    let found = !phones.is_empty() || !emails.is_empty();
    for phone in phones {
        observations
            .phones
            .push(RawField::new(phone, SourceTag::Dom, LINK_CONFIDENCE, observed_at));
    }
    for email in emails {
        observations
            .emails
            .push(RawField::new(email, SourceTag::Dom, LINK_CONFIDENCE, observed_at));
    }
    found
}

fn extract_social(
    document: &Html,
    page_url: &Url,
    observed_at: chrono::DateTime<chrono::Utc>,
    observations: &mut Observations,
) -> bool {
    let Ok(sel) = Selector::parse("a[href]") else {
        return false;
    };
    let mut found = false;
    let mut seen: HashSet<(String, String)> = HashSet::new();
    for anchor in document.select(&sel) {
        let href = anchor.value().attr("href").unwrap_or("");
        let Ok(resolved) = page_url.join(href) else {
            continue;
        };
        let Some(platform) = resolved.host_str().and_then(platform_for_host) else {
            continue;
        };
        let link = SocialLink {
            platform: platform.to_string(),
            url: resolved.to_string(),
        };
        if seen.insert((link.platform.clone(), link.url.clone())) {
            observations
                .social
                .push(RawField::new(link, SourceTag::Dom, LINK_CONFIDENCE, observed_at));
            found = true;
        }
    }
    found
}

fn extract_menu_content(
    document: &Html,
    body_text: &str,
    page_type: PageType,
    url: &Url,
    observed_at: chrono::DateTime<chrono::Utc>,
    observations: &mut Observations,
) -> bool {
    // Large blocks inside menu-ish containers first.
    let mut menu_text = String::new();
    if let Ok(sel) = Selector::parse("[id*=menu], [class*=menu]") {
        for container in document.select(&sel) {
            let text = visible_text(container);
            if text.len() > menu_text.len() {
                menu_text = text;
            }
        }
    }

    // Fall back to blocks around price-like tokens when containers are thin.
    if menu_text.len() < MENU_CONTAINER_MIN_CHARS {
        let price_lines: Vec<&str> = body_text
            .lines()
            .filter(|line| PRICE_RE.is_match(line))
            .collect();
        let joined = price_lines.join("\n");
        if joined.len() >= PRICE_BLOCK_MIN_CHARS {
            menu_text = joined;
        }
    }

    // Last resort on pages already hinted as menus: the readable body.
    if menu_text.len() < PRICE_BLOCK_MIN_CHARS && page_type == PageType::Menu {
        menu_text = body_text.to_string();
    }

    if menu_text.trim().len() < PRICE_BLOCK_MIN_CHARS {
        return false;
    }

    for item in parse_menu_items(&menu_text, url) {
        observations.menu_items.push(item);
    }
    observations.menu_text.push(RawField::new(
        menu_text,
        SourceTag::Dom,
        DOM_CONFIDENCE,
        observed_at,
    ));
    true
}

/// Line-oriented menu item parse: a name column ending in a price token.
fn parse_menu_items(menu_text: &str, url: &Url) -> Vec<MenuItem> {
    let mut items = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for caps in MENU_LINE_RE.captures_iter(menu_text) {
        let name = caps[1].trim().trim_end_matches(['.', '-', '…']).trim().to_string();
        if name.is_empty() || name.chars().filter(|c| c.is_alphabetic()).count() < 3 {
            continue;
        }
        let price_raw = caps[2].trim().to_string();
        let key = name.to_lowercase();
        if !seen.insert(key) {
            continue;
        }
        items.push(MenuItem {
            name,
            description: None,
            price_raw: Some(price_raw),
            price_numeric: None,
            currency: None,
            category: None,
            source_tag: SourceTag::Dom,
            source_artifact: Some(url.to_string()),
        });
    }
    items
}

fn extract_section_text(
    document: &Html,
    body_text: &str,
    page_type: PageType,
    observed_at: chrono::DateTime<chrono::Utc>,
    observations: &mut Observations,
) -> bool {
    let mut section_text = String::new();
    if let Ok(sel) = Selector::parse("[id*=about], [class*=about], [id*=story], [class*=story]") {
        for container in document.select(&sel) {
            let text = visible_text(container);
            if text.len() > section_text.len() {
                section_text = text;
            }
        }
    }
    if section_text.len() < 120 && matches!(page_type, PageType::About | PageType::Contact) {
        // Dedicated sections were thin; take the main readable content.
        if let Ok(sel) = Selector::parse("main, article") {
            if let Some(main) = document.select(&sel).next() {
                section_text = visible_text(main);
            }
        }
        if section_text.len() < 120 {
            section_text = body_text.to_string();
        }
    }
    if section_text.trim().len() < 120 {
        return false;
    }
    observations.about_text.push(RawField::new(
        section_text,
        SourceTag::Dom,
        DOM_CONFIDENCE,
        observed_at,
    ));
    true
}

/// Finds internal links on a rendered page and classifies them by URL path
/// and anchor text.
fn discover_links(html: &str, page_url: &Url, target: &Url) -> Vec<(Url, PageType)> {
    let document = Html::parse_document(html);
    let Ok(sel) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let mut seen: HashSet<String> = HashSet::new();
    let mut links = Vec::new();
    for anchor in document.select(&sel) {
        let href = anchor.value().attr("href").unwrap_or("");
        if href.starts_with('#') || href.starts_with("mailto:") || href.starts_with("tel:") {
            continue;
        }
        let Ok(mut resolved) = page_url.join(href) else {
            continue;
        };
        resolved.set_fragment(None);
        if resolved.scheme() != "http" && resolved.scheme() != "https" {
            continue;
        }
        if !same_registrable_host(&resolved, target) {
            continue;
        }
        if !seen.insert(normalize_url(&resolved)) {
            continue;
        }
        let mut page_type = classify_url(resolved.as_str());
        if page_type == PageType::Other {
            let text = anchor.text().collect::<String>().to_lowercase();
            if text.contains("menu") {
                page_type = PageType::Menu;
            } else if text.contains("contact") {
                page_type = PageType::Contact;
            } else if text.contains("about") {
                page_type = PageType::About;
            } else if text.contains("reserv") || text.contains("book") {
                page_type = PageType::Reservation;
            }
        }
        links.push((resolved, page_type));
    }
    links
}
