use std::{
    io::ErrorKind,
    path::PathBuf,
};

use thiserror::Error;
use tracing::debug;

const SOURCE: &str = "application::pages::PageService";
const INDEX_FILE: &str = "index.html";
const PAGE_EXTENSION: &str = "html";

#[derive(Debug, Error)]
#[error("failed to read page `{}`: {source}", .path.display())]
pub struct PageError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Serves `.html` documents from a directory on disk.
///
/// `/` maps to `index.html`, `/about` to `about.html` and `/docs/` to
/// `docs/index.html`. Hidden segments and parent references never resolve.
#[derive(Debug, Clone)]
pub struct PageService {
    root: PathBuf,
}

impl PageService {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn resolve(&self, request_path: &str) -> Option<PathBuf> {
        let trimmed = request_path.trim_start_matches('/');
        let mut relative = PathBuf::new();

        for segment in trimmed.split('/').filter(|segment| !segment.is_empty()) {
            if segment.starts_with('.') || segment.contains('\\') {
                return None;
            }
            relative.push(segment);
        }

        if relative.as_os_str().is_empty() || trimmed.ends_with('/') {
            relative.push(INDEX_FILE);
        } else {
            match relative.extension() {
                None => {
                    relative.set_extension(PAGE_EXTENSION);
                }
                Some(extension) if extension == PAGE_EXTENSION => {}
                Some(_) => return None,
            }
        }

        Some(self.root.join(relative))
    }

    /// `Ok(None)` when no page exists for the path.
    pub async fn load(&self, request_path: &str) -> Result<Option<String>, PageError> {
        let Some(path) = self.resolve(request_path) else {
            debug!(source = SOURCE, request_path, "path does not map to a page");
            return Ok(None);
        };

        match tokio::fs::read_to_string(&path).await {
            Ok(markup) => Ok(Some(markup)),
            Err(err) if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::IsADirectory) => {
                Ok(None)
            }
            Err(source) => Err(PageError { path, source }),
        }
    }
}
