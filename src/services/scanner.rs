use glob::Pattern;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use walkdir::WalkDir;

use crate::core::deletion::DeletionManager;
use crate::core::duplicate::DuplicateResolver;
use crate::core::hash::{HashError, IdentityHasher};
use crate::core::metadata::{MetadataError, MetadataExtractor};
use crate::core::thumbnail::ThumbnailService;
use crate::database::models::{Asset, MediaType, NewAsset};
use crate::database::repositories::{AssetRepository, TagRepository};
use crate::database::{Database, DatabaseError};

pub const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "bmp", "tif", "tiff", "heic", "heif", "avif",
];
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "m4v", "mov", "webm", "mkv", "avi"];

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Invalid path: {path}")]
    InvalidPath { path: String },

    #[error("Invalid exclude pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Hash computation error: {0}")]
    Hash(#[from] HashError),

    #[error("Metadata extraction error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Scan task failed: {message}")]
    TaskFailed { message: String },
}

/// Per-folder tallies. `added` counts new rows, replacements included.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub added: usize,
    pub unchanged: usize,
    pub replaced: usize,
    pub failed: usize,
}

impl ScanReport {
    fn record(&mut self, outcome: &FileOutcome) {
        match outcome {
            FileOutcome::Unchanged => self.unchanged += 1,
            FileOutcome::Added(_) => self.added += 1,
            FileOutcome::Replaced(_) => {
                self.added += 1;
                self.replaced += 1;
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
    /// Same path, same bytes; nothing was touched.
    Unchanged,
    Added(Asset),
    /// The path held different bytes; the old asset was deleted first.
    Replaced(Asset),
}

pub fn media_type_for(path: &Path) -> Option<MediaType> {
    let ext = path.extension()?.to_string_lossy().to_lowercase();
    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaType::Image)
    } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaType::Video)
    } else {
        None
    }
}

/// Supported media under `root`, depth-first in name order.
pub fn discover_files(root: &Path, recursive: bool, exclude_patterns: &[Pattern]) -> Vec<PathBuf> {
    let walker = WalkDir::new(root)
        .follow_links(false)
        .max_depth(if recursive { usize::MAX } else { 1 })
        .sort_by_file_name();

    let mut discovered_files = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                continue;
            }
        };

        // Follows symlinks, so linked media is picked up.
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let path_str = path.to_string_lossy();
        if exclude_patterns
            .iter()
            .any(|pattern| pattern.matches(&path_str))
        {
            log::trace!("Excluded {}", path_str);
            continue;
        }

        if media_type_for(path).is_some() {
            discovered_files.push(path.to_path_buf());
        }
    }

    discovered_files
}

/// Ingests folders file by file. Callers are responsible for holding the
/// scan lock.
#[derive(Clone)]
pub struct Scanner {
    db: Database,
    hasher: IdentityHasher,
    thumbnails: ThumbnailService,
    metadata: Arc<dyn MetadataExtractor>,
    resolver: DuplicateResolver,
    deletion: DeletionManager,
    perceptual_hashing: bool,
}

impl Scanner {
    pub fn new(
        db: Database,
        hasher: IdentityHasher,
        thumbnails: ThumbnailService,
        metadata: Arc<dyn MetadataExtractor>,
        deletion: DeletionManager,
        perceptual_hashing: bool,
    ) -> Self {
        Self {
            db,
            hasher,
            thumbnails,
            metadata,
            resolver: DuplicateResolver::new(),
            deletion,
            perceptual_hashing,
        }
    }

    /// Walk `root` and ingest every supported file. Per-file failures are
    /// logged and counted; they never abort the walk.
    pub async fn scan_directory(
        &self,
        root: &Path,
        recursive: bool,
        exclude: &[String],
    ) -> Result<ScanReport, ScanError> {
        if !root.is_dir() {
            return Err(ScanError::InvalidPath {
                path: root.display().to_string(),
            });
        }

        let exclude_patterns = exclude
            .iter()
            .map(|pattern| Pattern::new(pattern))
            .collect::<Result<Vec<_>, _>>()?;

        let discover_root = root.to_path_buf();
        let files = tokio::task::spawn_blocking(move || {
            discover_files(&discover_root, recursive, &exclude_patterns)
        })
        .await
        .map_err(|e| ScanError::TaskFailed {
            message: e.to_string(),
        })?;

        log::info!(
            "Scanning {} ({} candidate files, recursive={})",
            root.display(),
            files.len(),
            recursive
        );

        let mut report = ScanReport::default();
        for file in &files {
            match self.process_file(file).await {
                Ok(outcome) => report.record(&outcome),
                Err(e) => {
                    log::warn!("Failed to ingest {}: {}", file.display(), e);
                    report.failed += 1;
                }
            }
        }

        log::info!(
            "Finished {}: {} added ({} replaced), {} unchanged, {} failed",
            root.display(),
            report.added,
            report.replaced,
            report.unchanged,
            report.failed
        );
        Ok(report)
    }

    /// Run one file through the ingest state machine.
    pub async fn process_file(&self, path: &Path) -> Result<FileOutcome, ScanError> {
        let media_type = media_type_for(path).ok_or_else(|| ScanError::InvalidPath {
            path: path.display().to_string(),
        })?;
        let size = fs::metadata(path)
            .map_err(|source| ScanError::Io {
                path: path.display().to_string(),
                source,
            })?
            .len();
        let identity_hash = self.hasher.compute_async(path).await?;
        let path_str = path.to_string_lossy().to_string();

        let existing = self
            .db
            .read(|conn| AssetRepository::new(conn).find_by_path(&path_str))?;
        let replaced = match existing {
            Some(asset) if asset.identity_hash == identity_hash => {
                log::trace!("Unchanged: {}", path_str);
                return Ok(FileOutcome::Unchanged);
            }
            Some(asset) => {
                log::info!("Content changed at {}; replacing", path_str);
                self.deletion.delete(&asset.id).await?;
                true
            }
            None => false,
        };

        let pending = self.prepare(path, media_type, size, identity_hash).await?;
        let asset = self.store(path, pending).await?;

        log::debug!("Ingested {} as {}", asset.path, asset.id);
        Ok(if replaced {
            FileOutcome::Replaced(asset)
        } else {
            FileOutcome::Added(asset)
        })
    }

    /// Extract metadata and build the preview; nothing is written to the store.
    async fn prepare(
        &self,
        path: &Path,
        media_type: MediaType,
        size: u64,
        identity_hash: String,
    ) -> Result<PendingAsset, ScanError> {
        let path_str = path.to_string_lossy().to_string();
        let extractor = self.metadata.clone();
        let meta_path = path.to_path_buf();
        let metadata = tokio::task::spawn_blocking(move || extractor.extract(&meta_path))
            .await
            .map_err(|e| ScanError::TaskFailed {
                message: e.to_string(),
            })??;

        let preview = self
            .thumbnails
            .generate(&self.db, path, &identity_hash, media_type)
            .await;

        let (width, height) = match (metadata.width, metadata.height, preview.dimensions) {
            (0, _, Some(dims)) | (_, 0, Some(dims)) => dims,
            (w, h, _) => (w, h),
        };

        let asset = NewAsset {
            filename: path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_else(|| path_str.clone()),
            path: path_str,
            media_type,
            size: i64::try_from(size).unwrap_or(i64::MAX),
            identity_hash,
            hashes: preview.hashes,
            width: i64::from(width),
            height: i64::from(height),
            artist: metadata.artist,
            rating: metadata.rating,
            source: metadata.source,
            created_at: metadata.captured_at,
        };

        Ok(PendingAsset {
            asset,
            tags: metadata.tags,
            reused_preview: preview.reused,
        })
    }

    /// Insert, tag and group in one transaction. A shared thumbnail may have
    /// been collected while its last referent was deleted in between, so it
    /// is regenerated when missing.
    async fn store(&self, path: &Path, pending: PendingAsset) -> Result<Asset, ScanError> {
        let resolver = self.resolver;
        let perceptual_hashing = self.perceptual_hashing;
        let asset = self
            .db
            .transaction(|tx| {
                let asset = AssetRepository::new(tx).create(&pending.asset)?;
                TagRepository::new(tx).attach_all(&asset.id, pending.tags.iter().map(String::as_str))?;
                if perceptual_hashing {
                    resolver.resolve(tx, &asset)?;
                }
                Ok(asset)
            })
            .await?;

        if pending.reused_preview {
            self.thumbnails
                .restore(path, &pending.asset.identity_hash, pending.asset.media_type)
                .await;
        }

        Ok(asset)
    }
}

/// A file that has been fingerprinted but not yet written to the store.
struct PendingAsset {
    asset: NewAsset,
    tags: Vec<String>,
    reused_preview: bool,
}
