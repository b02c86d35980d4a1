//! Directory collector: walks a local tree and emits image files.
//!
//! The tree is scanned once, sorted, and served in batches so the
//! resume point (the last emitted path) stays meaningful. A restart
//! skips everything up to and including the stored path. This
//! collector is one-shot: once the tree is exhausted it reports end
//! of stream and the harness exits instead of polling.

use std::path::{Path, PathBuf};

use log::{info, warn};
use tokio::fs;
use url::Url;
use walkdir::WalkDir;

use crate::messages::CollectedImage;

use super::{CollectedBatch, Collector, CollectorError};

/// Files emitted per batch between resume checkpoints.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Collector for a local directory of images.
pub struct DirectoryCollector {
    service_name: String,
    root: PathBuf,
    source: Url,
    batch_size: usize,
    /// Sorted image paths, scanned on the first `collect` call.
    entries: Option<Vec<String>>,
}

impl DirectoryCollector {
    /// Creates a collector rooted at `root`. The root is canonicalized
    /// so emitted paths and resume points are absolute.
    pub fn new(
        service_name: String,
        root: PathBuf,
        batch_size: usize,
    ) -> Result<Self, CollectorError> {
        let root = root.canonicalize().map_err(|e| CollectorError::Io {
            path: root.clone(),
            source: e,
        })?;
        let source = Url::from_directory_path(&root).map_err(|_| {
            CollectorError::InvalidUrl(format!("no file URL for {}", root.display()))
        })?;

        Ok(Self {
            service_name,
            root,
            source,
            batch_size: batch_size.max(1),
            entries: None,
        })
    }
}

fn is_image(path: &Path) -> bool {
    mime_guess::from_path(path)
        .first()
        .map(|mime| mime.type_() == mime_guess::mime::IMAGE)
        .unwrap_or(false)
}

/// Walks `root` and returns the sorted list of image file paths.
/// Non-UTF-8 paths cannot become resume points and are skipped.
fn scan_images(root: &Path) -> Result<Vec<String>, CollectorError> {
    let mut paths = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| {
            let path = e
                .path()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| root.to_path_buf());
            CollectorError::Io {
                path,
                source: e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "walk failed")),
            }
        })?;
        if !entry.file_type().is_file() || !is_image(entry.path()) {
            continue;
        }
        match entry.path().to_str() {
            Some(path) => paths.push(path.to_string()),
            None => warn!("Skipping non-UTF-8 path: {}", entry.path().display()),
        }
    }
    paths.sort();
    Ok(paths)
}

#[async_trait::async_trait]
impl Collector for DirectoryCollector {
    fn service_name(&self) -> &str {
        &self.service_name
    }

    async fn collect(&mut self, resume: Option<String>) -> Result<CollectedBatch, CollectorError> {
        if self.entries.is_none() {
            let scanned = scan_images(&self.root)?;
            info!(
                "Found {} images under {}",
                scanned.len(),
                self.root.display()
            );
            self.entries = Some(scanned);
        }
        let entries = self.entries.as_deref().unwrap_or_default();

        let start = match &resume {
            Some(last) => entries.partition_point(|path| path.as_str() <= last.as_str()),
            None => 0,
        };
        let batch = &entries[start..(start + self.batch_size).min(entries.len())];

        let mut images = Vec::with_capacity(batch.len());
        for path in batch {
            let data = fs::read(path).await.map_err(|e| CollectorError::Io {
                path: PathBuf::from(path),
                source: e,
            })?;
            let image = Url::from_file_path(path)
                .map_err(|_| CollectorError::InvalidUrl(format!("no file URL for {}", path)))?;
            images.push(CollectedImage {
                service_name: self.service_name.clone(),
                source: self.source.clone(),
                image,
                data,
            });
        }

        Ok(CollectedBatch {
            images,
            resume_point: batch.last().cloned(),
            end_of_stream: start + batch.len() >= entries.len(),
        })
    }
}
