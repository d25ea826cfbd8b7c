//! Video URL resolution: mirror HLS playback, lookup services and manifest
//! variant selection.

mod lookup;
mod manifest;

pub use lookup::{VideoError, VideoResolver};
pub use manifest::{
    ManifestError, Variant, decode_obfuscated_locator, resolve_locator, select_variant,
};

pub(crate) use manifest::decode_base64_text;
