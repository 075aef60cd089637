//! Choosing the closest offered encoding to a requested quality.
//!
//! Quality names follow the `NNNpMM` convention (`1080p60`), optionally
//! without frame rate (`720p`) or without the `p` (`480`). Anything else
//! (`best`, `audio_only`, `chunked`) is an opaque label.

use tracing::debug;

/// Parsed `(resolution, fps)` of a quality name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualitySpec {
    pub resolution: u32,
    pub fps: Option<u32>,
}

/// Parse a quality name. Returns `None` for opaque labels.
pub fn parse_quality(name: &str) -> Option<QualitySpec> {
    let name = name.trim().to_ascii_lowercase();
    let (resolution, fps) = match name.split_once('p') {
        Some((res, fps)) => (res, fps),
        None => (name.as_str(), ""),
    };

    if resolution.is_empty() || !resolution.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let resolution = resolution.parse().ok()?;

    let fps = if fps.is_empty() {
        None
    } else if fps.bytes().all(|b| b.is_ascii_digit()) {
        Some(fps.parse().ok()?)
    } else {
        return None;
    };

    Some(QualitySpec { resolution, fps })
}

/// Select the offered quality closest to `requested`.
///
/// - opaque request: returned unchanged
/// - no offer at the requested resolution: `"best"`
/// - request with fps: exact match, else highest fps not above the request,
///   else the lowest fps offered
/// - request without fps: highest fps at that resolution
pub fn select_closest_quality<S: AsRef<str>>(requested: &str, options: &[S]) -> String {
    let Some(want) = parse_quality(requested) else {
        return requested.to_string();
    };

    let candidates: Vec<(&str, u32)> = options
        .iter()
        .map(AsRef::as_ref)
        .filter_map(|name| {
            let spec = parse_quality(name)?;
            (spec.resolution == want.resolution).then_some((name, spec.fps.unwrap_or(0)))
        })
        .collect();

    let chosen = match want.fps {
        _ if candidates.is_empty() => None,
        Some(fps) => candidates
            .iter()
            .find(|(_, f)| *f == fps)
            .or_else(|| {
                candidates
                    .iter()
                    .filter(|(_, f)| *f <= fps)
                    .max_by_key(|(_, f)| *f)
            })
            .or_else(|| candidates.iter().min_by_key(|(_, f)| *f)),
        None => candidates.iter().max_by_key(|(_, f)| *f),
    };

    let selected = chosen
        .map(|(name, _)| name.to_string())
        .unwrap_or_else(|| "best".to_string());
    debug!(requested, selected = %selected, "Selected stream quality");
    selected
}
