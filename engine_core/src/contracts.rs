use serde::{Deserialize, Serialize};
use serde_json::Value;

/// # NDOC
/// component: `contracts`
/// purpose: Standard result alias for extraction components.
pub type ExtractResult<T> = Result<T, ExtractError>;

/// # NDOC
/// component: `contracts`
/// purpose: Stable machine-readable extraction error category.
/// invariants:
///   - Variants are part of external API surface; changes require compatibility review.
///   - Only `InputError` and `InternalError` may propagate out of the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExtractErrorKind {
    InputError,
    TransientExternalError,
    QuotaError,
    ParseError,
    ResourceError,
    Cancelled,
    InternalError,
}

/// # NDOC
/// component: `contracts`
/// purpose: Canonical error payload used across extractors, capabilities, and the orchestrator.
/// invariants:
///   - `message` is user-safe.
///   - `retryable` indicates whether automated retry is acceptable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractError {
    pub kind: ExtractErrorKind,
    pub message: String,
    pub retryable: bool,
    pub details: Option<Value>,
}

impl ExtractError {
    pub fn new(
        kind: ExtractErrorKind,
        message: impl Into<String>,
        retryable: bool,
        details: Option<Value>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable,
            details,
        }
    }

    pub fn input(message: impl Into<String>) -> Self {
        Self::new(ExtractErrorKind::InputError, message, false, None)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ExtractErrorKind::TransientExternalError, message, true, None)
    }

    pub fn quota(message: impl Into<String>) -> Self {
        Self::new(ExtractErrorKind::QuotaError, message, false, None)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ExtractErrorKind::ParseError, message, false, None)
    }

    pub fn resource(message: impl Into<String>, retryable: bool) -> Self {
        Self::new(ExtractErrorKind::ResourceError, message, retryable, None)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ExtractErrorKind::Cancelled, message, false, None)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ExtractErrorKind::InternalError, message, false, None)
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// True for failures the orchestrator records as phase errors instead of
    /// aborting the run.
    pub fn is_phase_recoverable(&self) -> bool {
        !matches!(
            self.kind,
            ExtractErrorKind::InputError | ExtractErrorKind::InternalError
        )
    }
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ExtractError {}

impl From<std::io::Error> for ExtractError {
    fn from(value: std::io::Error) -> Self {
        ExtractError::resource(value.to_string(), true)
    }
}

impl From<serde_json::Error> for ExtractError {
    fn from(value: serde_json::Error) -> Self {
        ExtractError::parse(value.to_string())
    }
}

impl From<reqwest::Error> for ExtractError {
    fn from(value: reqwest::Error) -> Self {
        let retryable = value.is_timeout()
            || value.is_connect()
            || value
                .status()
                .map(|s| s.is_server_error())
                .unwrap_or(false);
        ExtractError::new(
            ExtractErrorKind::TransientExternalError,
            value.to_string(),
            retryable,
            None,
        )
    }
}
