use chrono::NaiveDateTime;
use exif::{Context, Exif, In, Reader, Tag, Value};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use thiserror::Error;

// Windows rating and keyword tags; not named by the exif crate.
const TAG_RATING: Tag = Tag(Context::Tiff, 0x4746);
const TAG_XP_KEYWORDS: Tag = Tag(Context::Tiff, 0x9c9e);

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Descriptive fields read from a media file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedMetadata {
    pub tags: Vec<String>,
    pub artist: Option<String>,
    pub rating: Option<i64>,
    pub width: u32,
    pub height: u32,
    pub source: Option<String>,
    /// RFC 3339 capture time.
    pub captured_at: Option<String>,
}

pub trait MetadataExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<ExtractedMetadata, MetadataError>;
}

/// Reads EXIF fields and pixel dimensions from image headers. Files without
/// EXIF (or that aren't images at all) yield an empty record.
#[derive(Debug, Clone, Default)]
pub struct ExifMetadataExtractor;

impl ExifMetadataExtractor {
    pub fn new() -> Self {
        Self
    }

    fn read_exif(&self, path: &Path) -> Result<Option<Exif>, MetadataError> {
        let file = File::open(path).map_err(|source| MetadataError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut reader = BufReader::new(file);

        match Reader::new().read_from_container(&mut reader) {
            Ok(exif) => Ok(Some(exif)),
            Err(e) => {
                log::trace!("No EXIF in {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }
}

impl MetadataExtractor for ExifMetadataExtractor {
    fn extract(&self, path: &Path) -> Result<ExtractedMetadata, MetadataError> {
        let mut metadata = ExtractedMetadata::default();

        if let Some(exif) = self.read_exif(path)? {
            metadata.artist = ascii_field(&exif, Tag::Artist);
            metadata.rating = exif
                .get_field(TAG_RATING, In::PRIMARY)
                .and_then(|field| field.value.get_uint(0))
                .map(i64::from);
            metadata.tags = exif
                .get_field(TAG_XP_KEYWORDS, In::PRIMARY)
                .map(|field| parse_keywords(&field.value))
                .unwrap_or_default();

            let camera: Vec<String> = [Tag::Make, Tag::Model]
                .into_iter()
                .filter_map(|tag| ascii_field(&exif, tag))
                .collect();
            if !camera.is_empty() {
                metadata.source = Some(camera.join(" "));
            }

            metadata.captured_at = ascii_field(&exif, Tag::DateTimeOriginal)
                .or_else(|| ascii_field(&exif, Tag::DateTime))
                .and_then(|raw| parse_exif_datetime(&raw));
        }

        if let Ok((width, height)) = image::image_dimensions(path) {
            metadata.width = width;
            metadata.height = height;
        }

        Ok(metadata)
    }
}

fn ascii_field(exif: &Exif, tag: Tag) -> Option<String> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    match &field.value {
        Value::Ascii(parts) => parts
            .first()
            .map(|raw| String::from_utf8_lossy(raw).trim_end_matches('\0').trim().to_string())
            .filter(|text| !text.is_empty()),
        _ => None,
    }
}

/// `XPKeywords` is UTF-16LE, semicolon separated.
fn parse_keywords(value: &Value) -> Vec<String> {
    let bytes = match value {
        Value::Byte(bytes) => bytes,
        _ => return Vec::new(),
    };

    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    String::from_utf16_lossy(&units)
        .trim_end_matches('\0')
        .split(';')
        .map(str::trim)
        .filter(|keyword| !keyword.is_empty())
        .map(str::to_string)
        .collect()
}

/// EXIF datetime format: "YYYY:MM:DD HH:MM:SS", no zone. Treated as UTC.
fn parse_exif_datetime(raw: &str) -> Option<String> {
    match NaiveDateTime::parse_from_str(raw.trim(), "%Y:%m:%d %H:%M:%S") {
        Ok(dt) => Some(dt.and_utc().to_rfc3339()),
        Err(_) => {
            log::warn!("Failed to parse EXIF datetime: {}", raw);
            None
        }
    }
}
