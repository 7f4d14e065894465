//! Unified Result Model
//!
//! Every command maps what the worker did onto this model before rendering
//! output.

use serde::{Deserialize, Serialize};

/// The kind of result item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    /// A manifest entry handled during install
    Precache,
    /// A cache generation (created, kept or deleted)
    Generation,
    /// A stored cache entry
    Entry,
    /// The outcome of one intercepted request
    Fetch,
    /// A reply to a control message
    Reply,
    /// Classification of a path
    Class,
    Error,
}

/// Metadata for a result item
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    /// Body size in bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    /// Content type of the response
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    /// SHA-1 of the body
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,

    /// When the entry was written (RFC 3339)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_at: Option<String>,

    /// Whether the excerpt was truncated
    #[serde(default)]
    pub truncated: bool,
}

/// Error information for a result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    pub code: String,
    pub message: String,
}

impl ItemError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// The unified result item that all commands produce
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultItem {
    /// The kind of this result
    pub kind: Kind,

    /// Request URL or manifest entry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Generation name for generation items
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<String>,

    /// HTTP status of the response handed back
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,

    /// Short outcome label (e.g. cache / network / cached / deleted)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,

    /// Excerpt of the body (may be truncated)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,

    /// Structured data payload (control message replies, classification)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    /// Metadata
    #[serde(default, skip_serializing_if = "is_default_meta")]
    pub meta: Meta,

    /// Errors (if any)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ItemError>,
}

fn is_default_meta(meta: &Meta) -> bool {
    *meta == Meta::default()
}

impl ResultItem {
    fn empty(kind: Kind) -> Self {
        Self {
            kind,
            url: None,
            generation: None,
            status: None,
            outcome: None,
            excerpt: None,
            data: None,
            meta: Meta::default(),
            errors: Vec::new(),
        }
    }

    /// Create a new pre-population result
    pub fn precache(url: impl Into<String>, outcome: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            outcome: Some(outcome.into()),
            ..Self::empty(Kind::Precache)
        }
    }

    /// Create a new generation result
    pub fn generation(name: impl Into<String>, outcome: impl Into<String>) -> Self {
        Self {
            generation: Some(name.into()),
            outcome: Some(outcome.into()),
            ..Self::empty(Kind::Generation)
        }
    }

    /// Create a new cache entry result
    pub fn entry(url: impl Into<String>, status: u16) -> Self {
        Self {
            url: Some(url.into()),
            status: Some(status),
            ..Self::empty(Kind::Entry)
        }
    }

    /// Create a new fetch result
    pub fn fetch(url: impl Into<String>, outcome: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            outcome: Some(outcome.into()),
            ..Self::empty(Kind::Fetch)
        }
    }

    /// Create a new message reply result
    pub fn reply(data: serde_json::Value) -> Self {
        Self {
            data: Some(data),
            ..Self::empty(Kind::Reply)
        }
    }

    /// Create a new classification result
    pub fn class(url: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            outcome: Some(class.into()),
            ..Self::empty(Kind::Class)
        }
    }

    /// Create a new error result
    pub fn error(error: ItemError) -> Self {
        Self {
            errors: vec![error],
            ..Self::empty(Kind::Error)
        }
    }

    /// Set metadata
    pub fn with_meta(mut self, meta: Meta) -> Self {
        self.meta = meta;
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_excerpt(mut self, excerpt: impl Into<String>) -> Self {
        self.excerpt = Some(excerpt.into());
        self
    }

    /// Set structured data payload
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Add an error
    pub fn with_error(mut self, error: ItemError) -> Self {
        self.errors.push(error);
        self
    }
}

/// Result set containing multiple result items
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultSet {
    pub items: Vec<ResultItem>,
}

impl ResultSet {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    pub fn push(&mut self, item: ResultItem) {
        self.items.push(item);
    }

    pub fn extend(&mut self, items: impl IntoIterator<Item = ResultItem>) {
        self.items.extend(items);
    }

    /// Whether any item carries an error
    pub fn has_errors(&self) -> bool {
        self.items.iter().any(|item| !item.errors.is_empty())
    }
}

impl IntoIterator for ResultSet {
    type Item = ResultItem;
    type IntoIter = std::vec::IntoIter<ResultItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl FromIterator<ResultItem> for ResultSet {
    fn from_iter<T: IntoIterator<Item = ResultItem>>(iter: T) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_item_fetch() {
        let item = ResultItem::fetch("http://localhost:8080/a.css", "cache").with_status(200);
        assert_eq!(item.kind, Kind::Fetch);
        assert_eq!(item.status, Some(200));
        assert_eq!(item.outcome.as_deref(), Some("cache"));
    }

    #[test]
    fn test_result_item_error() {
        let item = ResultItem::error(ItemError::new("NETWORK_ERROR", "offline"));
        assert_eq!(item.kind, Kind::Error);
        assert_eq!(item.errors.len(), 1);
        assert_eq!(item.errors[0].code, "NETWORK_ERROR");
    }

    #[test]
    fn test_result_item_serialization_skips_empty() {
        let item = ResultItem::generation("v1", "kept");
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["kind"], "generation");
        assert_eq!(json["generation"], "v1");
        assert!(json.get("url").is_none());
        assert!(json.get("meta").is_none());
        assert!(json.get("errors").is_none());
    }

    #[test]
    fn test_result_item_with_meta() {
        let meta = Meta {
            size: Some(1024),
            digest: Some("abc".into()),
            ..Default::default()
        };
        let item = ResultItem::entry("http://localhost:8080/a.png", 200).with_meta(meta);
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["meta"]["size"], 1024);
        assert_eq!(json["status"], 200);
    }

    #[test]
    fn test_result_set_has_errors() {
        let mut set = ResultSet::new();
        set.push(ResultItem::precache("/a.css", "cached"));
        assert!(!set.has_errors());
        set.push(
            ResultItem::precache("/b.css", "failed").with_error(ItemError::new("PRECACHE_FAILED", "x")),
        );
        assert!(set.has_errors());
        assert_eq!(set.items.len(), 2);
    }

    #[test]
    fn test_result_set_from_iter() {
        let set: ResultSet = vec![ResultItem::class("/a.mp3", "audio")].into_iter().collect();
        assert_eq!(set.items.len(), 1);
    }
}
