use image::{imageops::FilterType, DynamicImage, GenericImageView, ImageFormat};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use super::perceptual::{hash_at_resolutions, PerceptualHashes};
use super::video::{sample_frame, MediaDecoder};
use crate::config::{BrightnessThresholds, CatalogConfig};
use crate::database::models::MediaType;
use crate::database::repositories::AssetRepository;
use crate::database::Database;

#[derive(Debug, Error)]
pub enum ThumbnailError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Decoder error: {message}")]
    Decoder { message: String },

    #[error("Thumbnail task failed: {message}")]
    TaskFailed { message: String },
}

/// Where the thumbnail for `identity_hash` lives. Purely a function of the
/// hash, so byte-identical files share one thumbnail.
pub fn thumbnail_path(thumbnail_dir: &Path, identity_hash: &str) -> PathBuf {
    let shard = identity_hash.get(..2).unwrap_or("__");
    thumbnail_dir
        .join(shard)
        .join(format!("{}.jpg", identity_hash))
}

/// Outcome of preview generation for one file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Preview {
    pub hashes: PerceptualHashes,
    /// Dimensions of the decoded source frame, when one was decoded.
    pub dimensions: Option<(u32, u32)>,
    /// Hashes were copied from an asset with the same identity hash.
    pub reused: bool,
}

impl Preview {
    fn sentinel() -> Self {
        Self {
            hashes: PerceptualHashes::sentinel(),
            dimensions: None,
            reused: false,
        }
    }
}

#[derive(Clone)]
pub struct ThumbnailService {
    thumbnail_dir: PathBuf,
    thumbnail_size: u32,
    quality: u8,
    perceptual_hashing: bool,
    resolutions: [u32; 3],
    brightness: BrightnessThresholds,
    decoder: Arc<dyn MediaDecoder>,
}

impl ThumbnailService {
    pub fn new(config: &CatalogConfig, decoder: Arc<dyn MediaDecoder>) -> Self {
        Self {
            thumbnail_dir: config.thumbnail_dir.clone(),
            thumbnail_size: config.thumbnail_size.max(1),
            quality: config.thumbnail_quality,
            perceptual_hashing: config.perceptual_hashing,
            resolutions: config.phash_resolutions.map(|bound| bound.max(1)),
            brightness: config.frame_brightness,
            decoder,
        }
    }

    pub fn path_for(&self, identity_hash: &str) -> PathBuf {
        thumbnail_path(&self.thumbnail_dir, identity_hash)
    }

    pub fn exists(&self, identity_hash: &str) -> bool {
        self.path_for(identity_hash).is_file()
    }

    /// Produce the thumbnail and perceptual hashes for `path`.
    ///
    /// Never fails: decode and probe problems are logged and yield the
    /// all-zero sentinel so ingestion can continue.
    pub async fn generate(
        &self,
        db: &Database,
        path: &Path,
        identity_hash: &str,
        media_type: MediaType,
    ) -> Preview {
        if self.exists(identity_hash) {
            let existing = db.read(|conn| AssetRepository::new(conn).find_by_identity_hash(identity_hash));
            match existing {
                Ok(Some(asset)) => {
                    log::debug!(
                        "Reusing preview of {} for identical content at {}",
                        asset.path,
                        path.display()
                    );
                    let dimensions = u32::try_from(asset.width)
                        .ok()
                        .zip(u32::try_from(asset.height).ok())
                        .filter(|(w, h)| *w > 0 && *h > 0);
                    return Preview {
                        hashes: asset.perceptual_hashes(),
                        dimensions,
                        reused: true,
                    };
                }
                Ok(None) => {}
                Err(e) => log::warn!("Identity lookup failed for {}: {}", path.display(), e),
            }
        }

        let service = self.clone();
        let source = path.to_path_buf();
        let hash = identity_hash.to_string();
        let rendered =
            tokio::task::spawn_blocking(move || service.render(&source, &hash, media_type))
                .await
                .map_err(|e| ThumbnailError::TaskFailed {
                    message: e.to_string(),
                })
                .and_then(|result| result);

        match rendered {
            Ok(preview) => preview,
            Err(e) => {
                log::warn!(
                    "Preview generation failed for {}: {}; duplicate detection disabled for it",
                    path.display(),
                    e
                );
                Preview::sentinel()
            }
        }
    }

    /// Re-render the thumbnail for `identity_hash` if it has gone missing.
    /// Returns whether a new one was written.
    pub async fn restore(&self, path: &Path, identity_hash: &str, media_type: MediaType) -> bool {
        if self.exists(identity_hash) {
            return false;
        }

        log::info!(
            "Thumbnail for {} vanished during ingest of {}; regenerating",
            identity_hash,
            path.display()
        );
        let service = self.clone();
        let source = path.to_path_buf();
        let hash = identity_hash.to_string();
        let rendered =
            tokio::task::spawn_blocking(move || service.render(&source, &hash, media_type)).await;

        match rendered {
            Ok(Ok(_)) => self.exists(identity_hash),
            Ok(Err(e)) => {
                log::warn!("Failed to regenerate thumbnail for {}: {}", path.display(), e);
                false
            }
            Err(e) => {
                log::warn!("Thumbnail task failed for {}: {}", path.display(), e);
                false
            }
        }
    }

    /// Decode, hash and write the thumbnail synchronously.
    pub fn render(
        &self,
        path: &Path,
        identity_hash: &str,
        media_type: MediaType,
    ) -> Result<Preview, ThumbnailError> {
        let frame = match media_type {
            MediaType::Image => Some(self.decode_still(path)?),
            MediaType::Video => sample_frame(self.decoder.as_ref(), path, &self.brightness)?,
        };

        let Some(frame) = frame else {
            return Ok(Preview::sentinel());
        };

        let hashes = if self.perceptual_hashing {
            hash_at_resolutions(&frame, self.resolutions)
        } else {
            PerceptualHashes::sentinel()
        };

        if let Err(e) = self.write_thumbnail(&frame, identity_hash) {
            log::warn!("Failed to write thumbnail for {}: {}", path.display(), e);
        }

        Ok(Preview {
            hashes,
            dimensions: Some(frame.dimensions()),
            reused: false,
        })
    }

    fn decode_still(&self, path: &Path) -> Result<DynamicImage, ThumbnailError> {
        let direct = image::ImageReader::open(path)?
            .with_guessed_format()?
            .decode();

        match direct {
            Ok(img) => Ok(img),
            Err(e) => {
                log::debug!(
                    "Direct decode of {} failed ({}); transcoding to JPEG",
                    path.display(),
                    e
                );
                let jpeg = self.decoder.transcode_to_jpeg(path)?;
                Ok(image::load_from_memory_with_format(&jpeg, ImageFormat::Jpeg)?)
            }
        }
    }

    /// Write the display thumbnail for `identity_hash` unless it exists.
    pub fn write_thumbnail(
        &self,
        img: &DynamicImage,
        identity_hash: &str,
    ) -> Result<PathBuf, ThumbnailError> {
        let target = self.path_for(identity_hash);
        if target.is_file() {
            return Ok(target);
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let thumbnail = self.resize_image(img);
        let staging = target.with_extension(format!("jpg.{}", Uuid::new_v4().simple()));
        let written = self.save_thumbnail(&thumbnail, &staging);
        if let Err(e) = written {
            let _ = fs::remove_file(&staging);
            return Err(e);
        }
        fs::rename(&staging, &target)?;

        Ok(target)
    }

    /// Delete the thumbnail for `identity_hash`. Returns whether one existed.
    pub fn remove(&self, identity_hash: &str) -> Result<bool, ThumbnailError> {
        match fs::remove_file(self.path_for(identity_hash)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ThumbnailError::Io(e)),
        }
    }

    fn resize_image(&self, img: &DynamicImage) -> DynamicImage {
        let (width, height) = img.dimensions();
        if width.max(height) <= self.thumbnail_size {
            return img.clone();
        }

        // Lanczos3 keeps small thumbnails sharp.
        img.resize(self.thumbnail_size, self.thumbnail_size, FilterType::Lanczos3)
    }

    fn save_thumbnail(&self, img: &DynamicImage, path: &Path) -> Result<(), ThumbnailError> {
        let rgb_img = img.to_rgb8();

        let mut output = fs::File::create(path)?;
        let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut output, self.quality);
        rgb_img.write_with_encoder(encoder)?;

        Ok(())
    }
}
