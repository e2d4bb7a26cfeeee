use chrono::DateTime;
use tracing::warn;

use crate::{Error, Result};

/// Storage representation for wire timestamps.
pub const STORAGE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parses an optional RFC 3339 timestamp into [`STORAGE_FORMAT`].
///
/// The wall-clock time of the original offset is kept; no conversion to
/// UTC happens.
pub fn normalize_timestamp(field: &'static str, raw: Option<&str>) -> Result<Option<String>> {
    let Some(raw) = raw else {
        return Ok(None);
    };

    let parsed = DateTime::parse_from_rfc3339(raw).map_err(|e| Error::Mapping {
        field,
        value: raw.to_string(),
        message: e.to_string(),
    })?;

    Ok(Some(parsed.format(STORAGE_FORMAT).to_string()))
}

/// Parses a numeric field carried as text. Failure leaves the field unset.
pub fn lenient_f64(field: &'static str, id: &str, raw: Option<&str>) -> Option<f64> {
    let raw = raw?;
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => Some(value),
        Ok(_) => {
            warn!(id, field, value = raw, "Ignoring non-finite number");
            None
        }
        Err(e) => {
            warn!(id, field, value = raw, error = %e, "Failed to parse number, leaving unset");
            None
        }
    }
}
