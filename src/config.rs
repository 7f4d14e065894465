//! Worker configuration: origin, cache generation and static manifest

use std::path::Path;
use thiserror::Error;
use url::Url;

/// Current cache generation. Change it whenever the manifest or the caching
/// rules change so the next activation rolls the old generation over.
pub const CACHE_GENERATION: &str = "pupu-cosmos-v1";

/// Origin the worker serves when none is given
pub const DEFAULT_ORIGIN: &str = "http://localhost:8080";

/// Resources eligible for pre-population at install time
pub const STATIC_MANIFEST: &[&str] = &[
    "/",
    "/index.html",
    "/style.css",
    "/script.js",
    "/images/cosmos.jpg",
    "/images/pupu.png",
    "/images/stars.webp",
    "/fonts/pupu.woff2",
    "/fonts/pupu.ttf",
    "/audio/bgm.mp3",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid origin {value:?}: {reason}")]
    InvalidOrigin { value: String, reason: String },

    #[error("manifest entry {0:?} is not root-relative")]
    NotRootRelative(String),

    #[error("invalid manifest file: {0}")]
    InvalidManifest(#[from] serde_json::Error),

    #[error("failed to read manifest file: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything the policy engine needs to know about its deployment
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// The worker's own origin; requests elsewhere are not intercepted
    pub origin: Url,
    /// Name of the current cache generation
    pub generation: String,
    /// Root-relative URLs to pre-populate
    pub manifest: Vec<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            origin: Url::parse(DEFAULT_ORIGIN).expect("DEFAULT_ORIGIN is a valid URL"),
            generation: CACHE_GENERATION.to_string(),
            manifest: STATIC_MANIFEST.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl WorkerConfig {
    pub fn with_origin(mut self, origin: &str) -> Result<Self, ConfigError> {
        self.origin = parse_origin(origin)?;
        Ok(self)
    }

    pub fn with_generation(mut self, generation: impl Into<String>) -> Self {
        self.generation = generation.into();
        self
    }

    pub fn with_manifest(mut self, manifest: Vec<String>) -> Result<Self, ConfigError> {
        validate_manifest(&manifest)?;
        self.manifest = manifest;
        Ok(self)
    }

    /// Resolve a root-relative or absolute URL against the origin
    pub fn resolve(&self, input: &str) -> Result<Url, url::ParseError> {
        match Url::parse(input) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => self.origin.join(input),
            Err(e) => Err(e),
        }
    }
}

/// Parse an origin, keeping only scheme, host and port
pub fn parse_origin(value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value).map_err(|e| ConfigError::InvalidOrigin {
        value: value.to_string(),
        reason: e.to_string(),
    })?;
    if !url.origin().is_tuple() {
        return Err(ConfigError::InvalidOrigin {
            value: value.to_string(),
            reason: "opaque origin".to_string(),
        });
    }
    let origin = url.origin().ascii_serialization();
    Url::parse(&origin).map_err(|e| ConfigError::InvalidOrigin {
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn validate_manifest(manifest: &[String]) -> Result<(), ConfigError> {
    match manifest
        .iter()
        .find(|entry| !entry.starts_with('/') || entry.starts_with("//"))
    {
        Some(bad) => Err(ConfigError::NotRootRelative(bad.clone())),
        None => Ok(()),
    }
}

/// Parse manifest text: a JSON array of strings, or one URL per line with
/// `#` comments and blank lines ignored
pub fn parse_manifest(content: &str) -> Result<Vec<String>, ConfigError> {
    let trimmed = content.trim_start();
    let entries: Vec<String> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed)?
    } else {
        content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect()
    };
    validate_manifest(&entries)?;
    Ok(entries)
}

pub fn load_manifest(path: &Path) -> Result<Vec<String>, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_manifest(&content)
}
