use crate::contracts::{ExtractError, ExtractResult};
use crate::data_models::record::{ArtifactRef, MediaKind, PhaseId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

pub const DEFAULT_MAX_ARTIFACT_BYTES: usize = 20 * 1024 * 1024;

const URI_PREFIX: &str = "artifact://sha256/";

/// # NDOC
/// component: `artifact_store`
/// purpose: Descriptive metadata attached to a stored blob; the address itself
///   comes from the content hash only.
#[derive(Debug, Clone)]
pub struct ArtifactMeta {
    pub source_phase: PhaseId,
    pub caption: Option<String>,
    pub captured_at: DateTime<Utc>,
    /// Naming hint for operators browsing the store; never part of the address.
    pub hint_path: Option<String>,
}

/// # NDOC
/// component: `artifact_store`
/// purpose: Content-addressed blob store for screenshots, PDFs, and captured
///   HTML.
/// invariants:
///   - `put` is idempotent: identical bytes and media kind yield the same URI.
///   - `get` returns byte-exact content for any URI a `put` returned.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put(
        &self,
        bytes: &[u8],
        media_kind: MediaKind,
        meta: ArtifactMeta,
    ) -> ExtractResult<ArtifactRef>;

    async fn get(&self, uri: &str) -> ExtractResult<Vec<u8>>;
}

pub fn content_uri(bytes: &[u8], media_kind: MediaKind) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{}{:x}.{}", URI_PREFIX, hasher.finalize(), media_kind.suffix())
}

fn object_name(uri: &str) -> ExtractResult<&str> {
    uri.strip_prefix(URI_PREFIX)
        .ok_or_else(|| ExtractError::resource(format!("unrecognized artifact uri '{}'", uri), false))
}

fn check_size(bytes: &[u8], cap: usize) -> ExtractResult<()> {
    if bytes.len() > cap {
        return Err(ExtractError::resource(
            format!("artifact of {} bytes exceeds cap of {} bytes", bytes.len(), cap),
            false,
        ));
    }
    Ok(())
}

/// # NDOC
/// component: `artifact_store`
/// purpose: Filesystem-backed store; objects live flat under a root directory
///   named by content hash.
pub struct FsArtifactStore {
    root: PathBuf,
    max_bytes: usize,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_bytes: DEFAULT_MAX_ARTIFACT_BYTES,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(
        &self,
        bytes: &[u8],
        media_kind: MediaKind,
        meta: ArtifactMeta,
    ) -> ExtractResult<ArtifactRef> {
        check_size(bytes, self.max_bytes)?;
        let uri = content_uri(bytes, media_kind);
        let path = self.root.join(object_name(&uri)?);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tokio::fs::create_dir_all(&self.root)
                .await
                .map_err(|e| ExtractError::resource(format!("store unavailable: {}", e), true))?;
            // Write through a temp file so a crashed put never leaves a
            // half-written object under a content hash.
            let mut staged = tempfile::NamedTempFile::new_in(&self.root)
                .map_err(|e| ExtractError::resource(format!("store unavailable: {}", e), true))?;
            std::io::Write::write_all(&mut staged, bytes)
                .map_err(|e| ExtractError::resource(format!("store unavailable: {}", e), true))?;
            staged
                .persist(&path)
                .map_err(|e| ExtractError::resource(format!("store unavailable: {}", e), true))?;
        }
        log::info!(
            target: "artifact_store",
            uri = uri.as_str(),
            bytes = bytes.len(),
            hint = meta.hint_path.as_deref().unwrap_or("");
            "artifact stored"
        );
        Ok(ArtifactRef {
            uri,
            media_kind,
            source_phase: meta.source_phase,
            caption: meta.caption,
            captured_at: meta.captured_at,
        })
    }

    async fn get(&self, uri: &str) -> ExtractResult<Vec<u8>> {
        let path = self.root.join(object_name(uri)?);
        tokio::fs::read(&path)
            .await
            .map_err(|e| ExtractError::resource(format!("artifact not found '{}': {}", uri, e), false))
    }
}

/// # NDOC
/// component: `artifact_store`
/// purpose: In-memory store for tests; satisfies the same idempotency and
///   byte-exactness contract.
pub struct InMemoryArtifactStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    max_bytes: usize,
}

impl Default for InMemoryArtifactStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            max_bytes: DEFAULT_MAX_ARTIFACT_BYTES,
        }
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().expect("store lock").len()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn put(
        &self,
        bytes: &[u8],
        media_kind: MediaKind,
        meta: ArtifactMeta,
    ) -> ExtractResult<ArtifactRef> {
        check_size(bytes, self.max_bytes)?;
        let uri = content_uri(bytes, media_kind);
        self.objects
            .lock()
            .expect("store lock")
            .entry(uri.clone())
            .or_insert_with(|| bytes.to_vec());
        Ok(ArtifactRef {
            uri,
            media_kind,
            source_phase: meta.source_phase,
            caption: meta.caption,
            captured_at: meta.captured_at,
        })
    }

    async fn get(&self, uri: &str) -> ExtractResult<Vec<u8>> {
        self.objects
            .lock()
            .expect("store lock")
            .get(uri)
            .cloned()
            .ok_or_else(|| ExtractError::resource(format!("artifact not found '{}'", uri), false))
    }
}
