//! Resource classification
//!
//! A request's URL path alone decides how it is routed and whether a fetched
//! response is kept. The rules are a short ordered list of predicates:
//! - audio: `\.mp3$`
//! - image: `\.(jpg|jpeg|png|gif|webp)$`
//! - static asset (persist only): `.css`, `.js`, `.woff2`, `.ttf`
//!
//! All matches are case-insensitive and never look at query or fragment.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// Audio files bypass cache-first routing
pub static AUDIO_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\.mp3$").expect("Invalid AUDIO_RE regex"));

/// Images are persisted on fetch
pub static IMAGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\.(jpg|jpeg|png|gif|webp)$").expect("Invalid IMAGE_RE regex")
});

/// Other static assets persisted on fetch
pub const STATIC_SUFFIXES: &[&str] = &[".css", ".js", ".woff2", ".ttf"];

/// Class of a requested resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceClass {
    Audio,
    Image,
    Static,
    Other,
}

impl ResourceClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceClass::Audio => "audio",
            ResourceClass::Image => "image",
            ResourceClass::Static => "static",
            ResourceClass::Other => "other",
        }
    }
}

fn has_static_suffix(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    STATIC_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix))
}

/// Classify a URL path; the first matching rule wins
pub fn classify(path: &str) -> ResourceClass {
    if AUDIO_RE.is_match(path) {
        ResourceClass::Audio
    } else if IMAGE_RE.is_match(path) {
        ResourceClass::Image
    } else if has_static_suffix(path) {
        ResourceClass::Static
    } else {
        ResourceClass::Other
    }
}

pub fn is_audio(path: &str) -> bool {
    classify(path) == ResourceClass::Audio
}

/// Whether a qualifying network response for `path` is written to the cache
pub fn should_persist(path: &str) -> bool {
    matches!(classify(path), ResourceClass::Image | ResourceClass::Static)
}

/// Manifest entries to pre-populate: everything except audio, order kept
///
/// Entries are matched on their path part, so `/a.mp3?v=1` is audio too.
pub fn precache_set(manifest: &[String]) -> Vec<String> {
    manifest
        .iter()
        .filter(|entry| !is_audio(entry_path(entry)))
        .cloned()
        .collect()
}

/// Path part of a root-relative manifest entry
fn entry_path(entry: &str) -> &str {
    let end = entry.find(['?', '#']).unwrap_or(entry.len());
    &entry[..end]
}
