//! Site network - serves a local site directory as the worker's origin

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use url::{Origin, Url};

use crate::host::http::{Method, Request, Response};
use crate::host::{Network, NetworkError};

/// Content type for a file extension
pub fn content_type_for(path: &str) -> &'static str {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "text/javascript; charset=utf-8",
        "json" => "application/json",
        "txt" => "text/plain; charset=utf-8",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "woff2" => "font/woff2",
        "woff" => "font/woff",
        "ttf" => "font/ttf",
        "mp3" => "audio/mpeg",
        _ => "application/octet-stream",
    }
}

/// Map a URL path onto a relative file path, rejecting anything that
/// would leave the site root
fn relative_file_path(url_path: &str) -> Option<PathBuf> {
    let mut rel = PathBuf::new();
    for segment in url_path.split('/').filter(|s| !s.is_empty()) {
        let segment = urlencoding::decode(segment).ok()?;
        let mut components = Path::new(&*segment).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(part)), None) => rel.push(part),
            _ => return None,
        }
    }
    Some(rel)
}

/// A network that answers requests for one origin from files on disk
#[derive(Debug, Clone)]
pub struct SiteNetwork {
    origin: Origin,
    root: PathBuf,
}

impl SiteNetwork {
    pub fn new(origin: &Url, root: impl Into<PathBuf>) -> Self {
        Self {
            origin: origin.origin(),
            root: root.into(),
        }
    }
}

#[async_trait]
impl Network for SiteNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
        let url = request.url.as_str().to_string();
        if request.url.origin() != self.origin {
            return Err(NetworkError::Unreachable(format!(
                "no route to {}",
                request.url.origin().ascii_serialization()
            )));
        }
        if !matches!(request.method, Method::Get | Method::Head) {
            return Ok(Response::new(405, Vec::<u8>::new()));
        }

        let rel = relative_file_path(request.path()).ok_or_else(|| NetworkError::Refused {
            url: url.clone(),
            reason: "path escapes the site root".to_string(),
        })?;
        let mut path = self.root.join(rel);
        if tokio::fs::metadata(&path).await.map(|m| m.is_dir()).unwrap_or(false) {
            path.push("index.html");
        }

        match tokio::fs::read(&path).await {
            Ok(body) => {
                debug!(url = %url, file = %path.display(), "site hit");
                let content_type = content_type_for(&path.to_string_lossy());
                let body = if request.method == Method::Head {
                    Vec::new()
                } else {
                    body
                };
                Ok(Response::new(200, body).with_header("Content-Type", content_type))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(url = %url, "site miss");
                Ok(Response::new(404, "Not Found")
                    .with_header("Content-Type", "text/plain; charset=utf-8"))
            }
            Err(e) => Err(NetworkError::Io {
                url,
                message: e.to_string(),
            }),
        }
    }
}
