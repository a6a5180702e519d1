use super::{placeholders, Repository};
use crate::core::perceptual::PerceptualHashes;
use crate::database::models::{Asset, NewAsset, ASSET_COLUMNS};
use crate::database::DatabaseError;
use chrono::Utc;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use uuid::Uuid;

pub struct AssetRepository<'c> {
    conn: &'c Connection,
}

impl<'c> Repository<'c> for AssetRepository<'c> {
    fn connection(&self) -> &'c Connection {
        self.conn
    }
}

impl<'c> AssetRepository<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    pub fn create(&self, asset: &NewAsset) -> Result<Asset, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let id = format!("ast_{}", Uuid::new_v4().simple());
        let created_at = asset.created_at.clone().unwrap_or_else(|| now.clone());

        self.connection().execute(
            &format!(
                "INSERT INTO assets ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                ASSET_COLUMNS
            ),
            params![
                id,
                asset.path,
                asset.filename,
                String::from(asset.media_type),
                asset.size,
                asset.identity_hash,
                asset.hashes.small,
                asset.hashes.medium,
                asset.hashes.large,
                asset.width,
                asset.height,
                asset.artist,
                asset.rating,
                asset.source,
                created_at,
                now,
            ],
        )?;

        self.find_by_id(&id)
    }

    pub fn find_by_id(&self, id: &str) -> Result<Asset, DatabaseError> {
        self.find_optional_by_id(id)?
            .ok_or_else(|| DatabaseError::NotFound(format!("asset {}", id)))
    }

    pub fn find_optional_by_id(&self, id: &str) -> Result<Option<Asset>, DatabaseError> {
        self.connection()
            .query_row(
                &format!("SELECT {} FROM assets WHERE id = ?1", ASSET_COLUMNS),
                params![id],
                Asset::from_row,
            )
            .optional()
            .map_err(DatabaseError::Query)
    }

    pub fn find_by_ids(&self, ids: &[String]) -> Result<Vec<Asset>, DatabaseError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut stmt = self.connection().prepare(&format!(
            "SELECT {} FROM assets WHERE id IN ({}) ORDER BY width * height DESC, rowid ASC",
            ASSET_COLUMNS,
            placeholders(ids.len())
        ))?;
        let assets = stmt
            .query_map(params_from_iter(ids.iter()), Asset::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(assets)
    }

    pub fn find_by_path(&self, path: &str) -> Result<Option<Asset>, DatabaseError> {
        self.connection()
            .query_row(
                &format!("SELECT {} FROM assets WHERE path = ?1", ASSET_COLUMNS),
                params![path],
                Asset::from_row,
            )
            .optional()
            .map_err(DatabaseError::Query)
    }

    /// Any asset whose bytes hash to `identity_hash`.
    pub fn find_by_identity_hash(&self, identity_hash: &str) -> Result<Option<Asset>, DatabaseError> {
        self.connection()
            .query_row(
                &format!(
                    "SELECT {} FROM assets WHERE identity_hash = ?1 LIMIT 1",
                    ASSET_COLUMNS
                ),
                params![identity_hash],
                Asset::from_row,
            )
            .optional()
            .map_err(DatabaseError::Query)
    }

    pub fn count_by_identity_hash(&self, identity_hash: &str) -> Result<i64, DatabaseError> {
        self.connection()
            .query_row(
                "SELECT COUNT(*) FROM assets WHERE identity_hash = ?1",
                params![identity_hash],
                |row| row.get(0),
            )
            .map_err(DatabaseError::Query)
    }

    /// Assets whose small/medium/large hash equals any of `hashes`,
    /// largest pixel area first. Sentinel values are never matched.
    pub fn find_perceptual_matches(
        &self,
        hashes: &PerceptualHashes,
    ) -> Result<Vec<Asset>, DatabaseError> {
        let values = hashes.matchable();
        if values.is_empty() {
            return Ok(Vec::new());
        }

        let list = placeholders(values.len());
        let sql = format!(
            "SELECT {cols} FROM assets \
             WHERE phash_small IN ({list}) OR phash_medium IN ({list}) OR phash_large IN ({list}) \
             ORDER BY width * height DESC, created_at ASC, rowid ASC",
            cols = ASSET_COLUMNS,
            list = list
        );

        let bound = values.iter().chain(values.iter()).chain(values.iter());
        let mut stmt = self.connection().prepare(&sql)?;
        let assets = stmt
            .query_map(params_from_iter(bound), Asset::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(assets)
    }

    /// `(id, path)` for every asset, for the missing-file sweep.
    pub fn list_paths(&self) -> Result<Vec<(String, String)>, DatabaseError> {
        let mut stmt = self
            .connection()
            .prepare("SELECT id, path FROM assets ORDER BY path")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn count(&self) -> Result<i64, DatabaseError> {
        self.connection()
            .query_row("SELECT COUNT(*) FROM assets", [], |row| row.get(0))
            .map_err(DatabaseError::Query)
    }

    pub fn delete(&self, id: &str) -> Result<bool, DatabaseError> {
        let deleted_count = self
            .connection()
            .execute("DELETE FROM assets WHERE id = ?1", params![id])?;

        Ok(deleted_count > 0)
    }
}
