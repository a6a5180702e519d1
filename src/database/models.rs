use crate::core::perceptual::PerceptualHashes;
use rusqlite::Row;
use serde::{Deserialize, Serialize};

// Asset models
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    pub path: String,
    pub filename: String,
    pub media_type: MediaType,
    pub size: i64,
    pub identity_hash: String,
    pub phash_small: String,
    pub phash_medium: String,
    pub phash_large: String,
    pub width: i64,
    pub height: i64,
    pub artist: Option<String>,
    pub rating: Option<i64>,
    pub source: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

pub const ASSET_COLUMNS: &str = "id, path, filename, type, size, identity_hash, \
     phash_small, phash_medium, phash_large, width, height, artist, rating, source, \
     created_at, updated_at";

impl Asset {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Asset {
            id: row.get(0)?,
            path: row.get(1)?,
            filename: row.get(2)?,
            media_type: MediaType::from(row.get::<_, String>(3)?),
            size: row.get(4)?,
            identity_hash: row.get(5)?,
            phash_small: row.get(6)?,
            phash_medium: row.get(7)?,
            phash_large: row.get(8)?,
            width: row.get(9)?,
            height: row.get(10)?,
            artist: row.get(11)?,
            rating: row.get(12)?,
            source: row.get(13)?,
            created_at: row.get(14)?,
            updated_at: row.get(15)?,
        })
    }

    pub fn pixel_area(&self) -> i64 {
        self.width.saturating_mul(self.height)
    }

    pub fn perceptual_hashes(&self) -> PerceptualHashes {
        PerceptualHashes {
            small: self.phash_small.clone(),
            medium: self.phash_medium.clone(),
            large: self.phash_large.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewAsset {
    pub path: String,
    pub filename: String,
    pub media_type: MediaType,
    pub size: i64,
    pub identity_hash: String,
    pub hashes: PerceptualHashes,
    pub width: i64,
    pub height: i64,
    pub artist: Option<String>,
    pub rating: Option<i64>,
    pub source: Option<String>,
    pub created_at: Option<String>,
}

// Duplicate group membership: one row per member, the prime included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMembership {
    pub asset_id: String,
    pub prime_id: String,
}

impl GroupMembership {
    pub fn is_prime(&self) -> bool {
        self.asset_id == self.prime_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub prime: Asset,
    pub members: Vec<Asset>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    pub count: i64,
}

// Watched folder models
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Folder {
    pub id: i64,
    pub path: String,
    pub recursive: bool,
    pub enabled: bool,
    pub exclude_patterns: String, // JSON string
    pub last_scanned_at: Option<String>,
}

impl Folder {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Folder {
            id: row.get(0)?,
            path: row.get(1)?,
            recursive: row.get(2)?,
            enabled: row.get(3)?,
            exclude_patterns: row.get(4)?,
            last_scanned_at: row.get(5)?,
        })
    }

    pub fn exclude_list(&self) -> Result<Vec<String>, serde_json::Error> {
        serde_json::from_str(&self.exclude_patterns)
    }
}

// Enums for type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaType {
    Image,
    Video,
}

impl From<String> for MediaType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "video" => MediaType::Video,
            _ => MediaType::Image,
        }
    }
}

impl From<MediaType> for String {
    fn from(media_type: MediaType) -> Self {
        match media_type {
            MediaType::Image => "image".to_string(),
            MediaType::Video => "video".to_string(),
        }
    }
}
