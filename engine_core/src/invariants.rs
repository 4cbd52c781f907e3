use crate::contracts::ExtractError;
use url::Url;

/// # NDOC
/// component: `engine_core::invariants`
/// purpose: Shared invariant checks used by multiple components.
/// invariants:
///   - Validation helpers must return `ExtractError::input` for caller-safe failures.
///   - Helpers must not perform I/O or mutate external state.
pub fn ensure_non_empty_trimmed(value: &str, field: &str) -> Result<(), ExtractError> {
    if value.trim().is_empty() {
        return Err(ExtractError::input(format!("'{}' cannot be empty", field)));
    }
    Ok(())
}

/// # NDOC
/// component: `engine_core::invariants`
/// purpose: Enforce an inclusive numeric bound with a user-safe error.
pub fn ensure_range_usize(
    value: usize,
    min: usize,
    max: usize,
    name: &str,
) -> Result<(), ExtractError> {
    if value < min || value > max {
        return Err(ExtractError::input(format!(
            "'{}' must be in range {}..={}",
            name, min, max
        )));
    }
    Ok(())
}

/// # NDOC
/// component: `engine_core::invariants`
/// purpose: Require an absolute http(s) URL before any phase runs.
pub fn ensure_http_url(value: &str, field: &str) -> Result<Url, ExtractError> {
    let parsed = Url::parse(value.trim())
        .map_err(|e| ExtractError::input(format!("'{}' is not a valid URL: {}", field, e)))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(ExtractError::input(format!(
            "'{}' must use http or https, got '{}'",
            field,
            parsed.scheme()
        )));
    }
    if parsed.host_str().is_none() {
        return Err(ExtractError::input(format!("'{}' has no host", field)));
    }
    Ok(parsed)
}

/// # NDOC
/// component: `engine_core::invariants`
/// purpose: Scores and confidences live in the closed unit interval.
pub fn ensure_unit_interval(value: f64, name: &str) -> Result<(), ExtractError> {
    if !(0.0..=1.0).contains(&value) || value.is_nan() {
        return Err(ExtractError::input(format!(
            "'{}' must be in 0.0..=1.0, got {}",
            name, value
        )));
    }
    Ok(())
}

/// # NDOC
/// component: `engine_core::invariants`
/// purpose: Missing-field paths use deterministic dot notation over the canonical schema.
/// invariants:
///   - Segments are non-empty, lowercase ascii, underscores allowed.
pub fn ensure_field_path(path: &str, field: &str) -> Result<(), ExtractError> {
    if path.is_empty()
        || path.split('.').any(|seg| {
            seg.is_empty()
                || !seg
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        })
    {
        return Err(ExtractError::input(format!(
            "'{}' must be a dot-notation field path, got '{}'",
            field, path
        )));
    }
    Ok(())
}
