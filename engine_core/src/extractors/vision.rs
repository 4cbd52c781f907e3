use crate::artifact_store::{ArtifactMeta, ArtifactStore};
use crate::capabilities::llm::{EncodedImage, VisionModel, VisionRequest};
use crate::capabilities::Clock;
use crate::config::VisionLimits;
use crate::contracts::{ExtractError, ExtractResult};
use crate::data_models::menu::{MenuItem, MENU_CATEGORIES};
use crate::data_models::record::{ArtifactRef, MediaKind, Observations, PhaseId, RawField, SourceTag};
use crate::llm_json::complete_vision_json;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::ImageOutputFormat;
use pdfium_render::prelude::*;
use serde::Deserialize;
use std::collections::HashSet;
use std::io::Cursor;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const VISION_CONFIDENCE: f64 = 0.75;
const MAX_TOKENS_MENU: u32 = 2048;
const PDF_RENDER_SCALE: f32 = 2.0;

const MENU_PROMPT: &str = r#"You are reading a restaurant page screenshot. Extract every menu item you can see.
Respond with STRICT JSON only, matching exactly this schema:
{
  "items": [
    {"name": "string", "description": "string or null", "price_original": "string or null", "price_cleaned": 0.0, "category": "string or null"}
  ],
  "notes": "free text about anything else relevant on the page"
}
Rules: "price_cleaned" is a non-negative number or null. Use null, not empty strings, for unknowns.
If the image shows no menu content, return {"items": [], "notes": "..."}."#;

#[derive(Debug, Deserialize)]
struct VisionMenuResponse {
    #[serde(default)]
    items: Vec<VisionMenuItem>,
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VisionMenuItem {
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    price_original: Option<String>,
    #[serde(default)]
    price_cleaned: Option<f64>,
    #[serde(default)]
    category: Option<String>,
}

/// # NDOC
/// component: `extractors::vision`
/// purpose: Output of the vision phase. Per-artifact failures are isolated in
///   `errors`; everything that succeeded is kept.
#[derive(Debug, Default)]
pub struct VisionOutcome {
    pub observations: Observations,
    pub images_processed: usize,
    pub cost_usd: f64,
    pub errors: Vec<String>,
}

/// Signature of the PDF page rasterizer, injectable for tests.
pub type PdfRasterizer = fn(&[u8], usize) -> ExtractResult<Vec<Vec<u8>>>;

pub struct VisionProcessor {
    vision: Arc<dyn VisionModel>,
    store: Arc<dyn ArtifactStore>,
    clock: Arc<dyn Clock>,
    limits: VisionLimits,
    rasterizer: PdfRasterizer,
}

impl VisionProcessor {
    pub fn new(
        vision: Arc<dyn VisionModel>,
        store: Arc<dyn ArtifactStore>,
        clock: Arc<dyn Clock>,
        limits: VisionLimits,
    ) -> Self {
        Self {
            vision,
            store,
            clock,
            limits,
            rasterizer: rasterize_pdf,
        }
    }

    #[cfg(test)]
    pub fn with_rasterizer(mut self, rasterizer: PdfRasterizer) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    /// # NDOC
    /// component: `extractors::vision`
    /// purpose: Run menu extraction over screenshot artifacts and rasterized
    ///   PDF pages. PDF page images become new phase-3 screenshot artifacts.
    pub async fn process(
        &self,
        screenshots: &[ArtifactRef],
        pdfs: &[ArtifactRef],
        context_hint: Option<&str>,
        cancel: &CancellationToken,
    ) -> VisionOutcome {
        let mut outcome = VisionOutcome::default();
        let mut pending: Vec<(String, Vec<u8>)> = Vec::new();

        for screenshot in screenshots {
            match self.store.get(&screenshot.uri).await {
                Ok(bytes) => pending.push((screenshot.uri.clone(), bytes)),
                Err(err) => outcome
                    .errors
                    .push(format!("{}: {}", screenshot.uri, err.message)),
            }
        }

        for pdf in pdfs {
            if cancel.is_cancelled() {
                break;
            }
            match self.rasterize_and_store(pdf, &mut outcome).await {
                Ok(pages) => pending.extend(pages),
                Err(err) => outcome.errors.push(format!("{}: {}", pdf.uri, err.message)),
            }
        }

        let mut seen_names: HashSet<String> = HashSet::new();
        for (uri, bytes) in pending {
            if cancel.is_cancelled() {
                outcome.errors.push("vision phase cancelled".to_string());
                break;
            }
            match self.extract_from_image(&uri, bytes, context_hint).await {
                Ok((items, notes, cost)) => {
                    outcome.cost_usd += cost;
                    outcome.images_processed += 1;
                    for item in items {
                        // Union across images, deduped by normalized name.
                        if seen_names.insert(item.normalized_name()) {
                            outcome.observations.menu_items.push(item);
                        }
                    }
                    if let Some(notes) = notes.filter(|n| n.trim().len() > 40) {
                        outcome.observations.menu_text.push(RawField::new(
                            notes,
                            SourceTag::Vision,
                            VISION_CONFIDENCE,
                            self.clock.now(),
                        ));
                    }
                }
                Err((message, cost)) => {
                    outcome.cost_usd += cost;
                    outcome.errors.push(format!("{}: {}", uri, message));
                }
            }
        }

        log::info!(
            target: "vision",
            images = outcome.images_processed,
            items = outcome.observations.menu_items.len(),
            errors = outcome.errors.len();
            "vision extraction complete"
        );
        outcome
    }

    async fn rasterize_and_store(
        &self,
        pdf: &ArtifactRef,
        outcome: &mut VisionOutcome,
    ) -> ExtractResult<Vec<(String, Vec<u8>)>> {
        let bytes = self.store.get(&pdf.uri).await?;
        let page_images = (self.rasterizer)(&bytes, self.limits.max_pdf_pages)?;
        let mut stored = Vec::new();
        for (index, png) in page_images.into_iter().enumerate() {
            let artifact = self
                .store
                .put(
                    &png,
                    MediaKind::ImagePng,
                    ArtifactMeta {
                        source_phase: PhaseId::Vision,
                        caption: Some(format!("rasterized page {} of {}", index + 1, pdf.uri)),
                        captured_at: self.clock.now(),
                        hint_path: None,
                    },
                )
                .await?;
            stored.push((artifact.uri.clone(), png));
            outcome.observations.artifacts.push(artifact);
        }
        Ok(stored)
    }

    async fn extract_from_image(
        &self,
        artifact_uri: &str,
        bytes: Vec<u8>,
        context_hint: Option<&str>,
    ) -> Result<(Vec<MenuItem>, Option<String>, f64), (String, f64)> {
        let prepared = prepare_image(bytes, self.limits.max_image_bytes)
            .map_err(|e| (e.message, 0.0))?;

        let mut prompt = MENU_PROMPT.to_string();
        if let Some(hint) = context_hint {
            prompt.push_str(&format!("\nContext: this page belongs to \"{}\".", hint));
        }

        let request = VisionRequest {
            prompt,
            images: vec![EncodedImage {
                media_type: "image/png".to_string(),
                base64_data: BASE64.encode(&prepared),
            }],
            max_tokens: MAX_TOKENS_MENU,
        };

        match complete_vision_json::<VisionMenuResponse>(self.vision.as_ref(), request).await {
            Ok(response) => {
                let items = response
                    .value
                    .items
                    .into_iter()
                    .filter_map(|item| convert_item(item, artifact_uri))
                    .collect();
                Ok((items, response.value.notes, response.cost_usd))
            }
            Err(failure) => Err((failure.error.message, failure.cost_usd)),
        }
    }
}

fn convert_item(item: VisionMenuItem, artifact_uri: &str) -> Option<MenuItem> {
    let name = item.name.trim().to_string();
    if name.is_empty() {
        return None;
    }
    let category = item
        .category
        .map(|c| c.trim().to_lowercase())
        .filter(|c| MENU_CATEGORIES.contains(&c.as_str()));
    Some(MenuItem {
        name,
        description: item.description.filter(|d| !d.trim().is_empty()),
        price_raw: item.price_original.filter(|p| !p.trim().is_empty()),
        price_numeric: item.price_cleaned.map(|p| p.max(0.0)),
        currency: None,
        category,
        source_tag: SourceTag::Vision,
        source_artifact: Some(artifact_uri.to_string()),
    })
}

/// Downscales an image until its encoded size fits the submission cap.
fn prepare_image(bytes: Vec<u8>, max_bytes: usize) -> ExtractResult<Vec<u8>> {
    if bytes.len() <= max_bytes {
        return Ok(bytes);
    }
    let mut img = image::load_from_memory(&bytes)
        .map_err(|e| ExtractError::parse(format!("unreadable image: {}", e)))?;
    for _ in 0..6 {
        let (w, h) = (img.width(), img.height());
        img = img.resize(
            (w * 7 / 10).max(1),
            (h * 7 / 10).max(1),
            image::imageops::FilterType::Triangle,
        );
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageOutputFormat::Png)
            .map_err(|e| ExtractError::internal(format!("png encode failed: {}", e)))?;
        let encoded = buf.into_inner();
        if encoded.len() <= max_bytes {
            return Ok(encoded);
        }
    }
    Err(ExtractError::resource(
        "image could not be downscaled under the submission cap",
        false,
    ))
}

/// Rasterizes the first `max_pages` pages of a PDF at 2x zoom to PNG bytes.
/// Synchronous on purpose: the pdfium handle is not shared across awaits.
fn rasterize_pdf(bytes: &[u8], max_pages: usize) -> ExtractResult<Vec<Vec<u8>>> {
    let pdfium = Pdfium::new(
        Pdfium::bind_to_system_library()
            .map_err(|e| ExtractError::resource(format!("pdfium unavailable: {}", e), false))?,
    );
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| ExtractError::parse(format!("unreadable pdf: {}", e)))?;

    let config = PdfRenderConfig::new().scale_page_by_factor(PDF_RENDER_SCALE);
    let mut pages = Vec::new();
    for page in document.pages().iter().take(max_pages) {
        let bitmap = page
            .render_with_config(&config)
            .map_err(|e| ExtractError::parse(format!("pdf page render failed: {}", e)))?;
        let mut buf = Cursor::new(Vec::new());
        bitmap
            .as_image()
            .write_to(&mut buf, ImageOutputFormat::Png)
            .map_err(|e| ExtractError::internal(format!("png encode failed: {}", e)))?;
        pages.push(buf.into_inner());
    }
    Ok(pages)
}
