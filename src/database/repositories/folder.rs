use super::Repository;
use crate::config::FolderConfig;
use crate::database::models::Folder;
use crate::database::DatabaseError;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

const FOLDER_COLUMNS: &str = "id, path, recursive, enabled, exclude_patterns, last_scanned_at";

pub struct FolderRepository<'c> {
    conn: &'c Connection,
}

impl<'c> Repository<'c> for FolderRepository<'c> {
    fn connection(&self) -> &'c Connection {
        self.conn
    }
}

impl<'c> FolderRepository<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Register a configured folder, refreshing its settings if known.
    pub fn upsert(&self, folder: &FolderConfig) -> Result<Folder, DatabaseError> {
        let path = folder.path.to_string_lossy().to_string();
        let exclude_json = serde_json::to_string(&folder.exclude)?;

        self.connection().execute(
            "INSERT INTO folders (path, recursive, enabled, exclude_patterns) VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(path) DO UPDATE SET recursive = excluded.recursive, \
             enabled = excluded.enabled, exclude_patterns = excluded.exclude_patterns",
            params![path, folder.recursive, folder.enabled, exclude_json],
        )?;

        self.find_by_path(&path)?
            .ok_or_else(|| DatabaseError::NotFound(format!("folder {}", path)))
    }

    pub fn find_by_path(&self, path: &str) -> Result<Option<Folder>, DatabaseError> {
        self.connection()
            .query_row(
                &format!("SELECT {} FROM folders WHERE path = ?1", FOLDER_COLUMNS),
                params![path],
                Folder::from_row,
            )
            .optional()
            .map_err(DatabaseError::Query)
    }

    pub fn find_enabled(&self) -> Result<Vec<Folder>, DatabaseError> {
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {} FROM folders WHERE enabled = 1 ORDER BY path",
            FOLDER_COLUMNS
        ))?;
        let folders = stmt
            .query_map([], Folder::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(folders)
    }

    pub fn mark_scanned(&self, id: i64) -> Result<(), DatabaseError> {
        self.connection().execute(
            "UPDATE folders SET last_scanned_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;

    #[test]
    fn test_upsert_refreshes_settings() {
        let db = Database::open_in_memory().unwrap();

        db.read(|conn| {
            let repo = FolderRepository::new(conn);
            let mut config = FolderConfig::new("/photos", true);
            let first = repo.upsert(&config).unwrap();
            assert!(first.recursive);
            assert!(first.last_scanned_at.is_none());

            config.recursive = false;
            config.exclude = vec!["*.tmp.*".to_string()];
            let second = repo.upsert(&config).unwrap();

            assert_eq!(first.id, second.id);
            assert!(!second.recursive);
            assert_eq!(second.exclude_list().unwrap(), vec!["*.tmp.*".to_string()]);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_find_enabled_and_mark_scanned() {
        let db = Database::open_in_memory().unwrap();

        db.read(|conn| {
            let repo = FolderRepository::new(conn);
            let on = repo.upsert(&FolderConfig::new("/on", true)).unwrap();
            let mut off = FolderConfig::new("/off", true);
            off.enabled = false;
            repo.upsert(&off).unwrap();

            let enabled = repo.find_enabled().unwrap();
            assert_eq!(enabled.len(), 1);
            assert_eq!(enabled[0].path, "/on");

            repo.mark_scanned(on.id).unwrap();
            let stamped = repo.find_by_path("/on").unwrap().unwrap();
            assert!(stamped.last_scanned_at.is_some());
            Ok(())
        })
        .unwrap();
    }
}
