//! HLS multi-variant manifest selection and mirror locator decoding.
//!
//! Mirrors hide the origin CDN URL of a stream behind paths of the form
//! `/enc/<token>/<payload>` where the payload is a `_`-separated list of
//! base64 segments. Decoding every segment and joining them with `?` yields
//! the origin URL and its query.

use std::sync::LazyLock;

use base64::Engine;
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use regex::Regex;
use thiserror::Error;
use url::Url;

use crate::util::{absolutize_url, compile_static_regex};

static RESOLUTION_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"RESOLUTION=([0-9]+)x([0-9]+)"));
static ENC_PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"/enc/([A-Za-z0-9]+)/([^/?#]+)"));
static EMBEDDED_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?i)https%3A[^ ]+"));

const LENIENT: GeneralPurposeConfig =
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent);
const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT);
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT);

/// Errors raised while picking a stream variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManifestError {
    /// The manifest lists no `RESOLUTION=` variant followed by a URI.
    #[error("manifest has no resolvable variant")]
    NoVariant,

    /// The chosen locator could not be turned into an absolute URL.
    #[error("cannot resolve stream locator '{locator}'")]
    InvalidLocator {
        /// The offending locator.
        locator: String,
    },
}

/// One quality variant of a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Variant URI as written in the manifest.
    pub uri: String,
}

impl Variant {
    /// Returns the pixel area.
    #[must_use]
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// Picks the variant with the largest `width * height`.
///
/// The URI is the first non-blank, non-tag line after the winning
/// `RESOLUTION=` tag. Ties go to the variant listed first.
///
/// # Errors
///
/// Returns [`ManifestError::NoVariant`] when no tagged variant has a URI.
pub fn select_variant(manifest: &str) -> Result<Variant, ManifestError> {
    let lines: Vec<&str> = manifest.lines().map(str::trim).collect();
    let mut best: Option<Variant> = None;

    for (index, line) in lines.iter().enumerate() {
        let Some(caps) = RESOLUTION_RE.captures(line) else {
            continue;
        };
        let (Ok(width), Ok(height)) = (caps[1].parse::<u32>(), caps[2].parse::<u32>()) else {
            continue;
        };
        let Some(uri) = lines[index + 1..]
            .iter()
            .find(|next| !next.is_empty())
            .filter(|next| !next.starts_with('#'))
        else {
            continue;
        };
        let candidate = Variant {
            width,
            height,
            uri: (*uri).to_string(),
        };
        if best.as_ref().is_none_or(|current| candidate.area() > current.area()) {
            best = Some(candidate);
        }
    }

    best.ok_or(ManifestError::NoVariant)
}

/// Decodes a mirror `/enc/<token>/<payload>` locator into the origin URL.
///
/// Returns `None` when the locator is not in that form or a segment is not
/// valid base64.
#[must_use]
pub fn decode_obfuscated_locator(locator: &str) -> Option<String> {
    let caps = ENC_PATH_RE.captures(locator)?;
    let payload = urlencoding::decode(&caps[2]).ok()?;
    let segments = payload
        .split('_')
        .map(decode_base64_text)
        .collect::<Option<Vec<String>>>()?;
    Some(segments.join("?"))
}

/// Decodes padded or unpadded, standard or URL-safe base64 into text.
pub(crate) fn decode_base64_text(segment: &str) -> Option<String> {
    let bytes = STANDARD_LENIENT
        .decode(segment)
        .or_else(|_| URL_SAFE_LENIENT.decode(segment))
        .ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

/// Turns a variant URI (or any mirror media locator) into an absolute URL.
///
/// Obfuscated `/enc/` locators are decoded; relative locators are resolved
/// against `mirror_base`; mirror proxy paths embedding a percent-encoded
/// origin URL are unwrapped.
///
/// # Errors
///
/// Returns [`ManifestError::InvalidLocator`] when no absolute URL results.
pub fn resolve_locator(locator: &str, mirror_base: &Url) -> Result<String, ManifestError> {
    let invalid = || ManifestError::InvalidLocator {
        locator: locator.to_string(),
    };
    let decoded = if locator.contains("/enc/") {
        decode_obfuscated_locator(locator).unwrap_or_else(|| locator.to_string())
    } else {
        locator.to_string()
    };

    let absolute = absolutize_url(&decoded, mirror_base).ok_or_else(invalid)?;

    if let Some(embedded) = EMBEDDED_URL_RE.find(&absolute) {
        let unwrapped = urlencoding::decode(embedded.as_str()).map_err(|_| invalid())?;
        return Ok(unwrapped.into_owned());
    }
    Ok(absolute)
}
