//! Caption payloads written by the captions stage.

use serde::{Deserialize, Serialize};

/// Duration used when the caption list cannot produce one.
pub const DEFAULT_RENDER_DURATION_SECS: f64 = 30.0;

/// Upper bound on a computed duration; anything above is treated as corrupt.
const MAX_RENDER_DURATION_SECS: f64 = 600.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Caption {
    pub text: String,
    /// Start offset in seconds
    pub start: f64,
    /// End offset in seconds
    pub end: f64,
}

/// Compute the render duration from a raw caption payload.
///
/// The payload comes from a previous stage's durable output and may be
/// missing or malformed. Entries that fail to parse are skipped; if nothing
/// usable remains, [`DEFAULT_RENDER_DURATION_SECS`] is returned.
pub fn render_duration_secs(captions: Option<&serde_json::Value>) -> f64 {
    let Some(serde_json::Value::Array(items)) = captions else {
        return DEFAULT_RENDER_DURATION_SECS;
    };

    let duration = items
        .iter()
        .filter_map(|item| serde_json::from_value::<Caption>(item.clone()).ok())
        .map(|caption| caption.end)
        .filter(|end| end.is_finite() && *end > 0.0)
        .fold(0.0_f64, f64::max);

    if duration > 0.0 && duration <= MAX_RENDER_DURATION_SECS {
        duration.ceil()
    } else {
        DEFAULT_RENDER_DURATION_SECS
    }
}
