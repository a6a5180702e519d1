use serde::Serialize;
use std::path::Path;

use crate::core::deletion::DeletionManager;
use crate::database::repositories::AssetRepository;
use crate::database::{Database, DatabaseError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub checked: usize,
    pub removed: usize,
    pub failed: usize,
}

/// Drops catalog entries whose files no longer exist on disk.
#[derive(Clone)]
pub struct CleanupSweep {
    db: Database,
    deletion: DeletionManager,
}

impl CleanupSweep {
    pub fn new(db: Database, deletion: DeletionManager) -> Self {
        Self { db, deletion }
    }

    /// Check every asset (or only those under `prefix`) and delete the ones
    /// whose file is gone.
    pub async fn run(&self, prefix: Option<&Path>) -> Result<CleanupReport, DatabaseError> {
        let entries = self.db.read(|conn| AssetRepository::new(conn).list_paths())?;
        let mut report = CleanupReport::default();

        for (asset_id, path) in entries {
            let path = Path::new(&path);
            if prefix.is_some_and(|prefix| !path.starts_with(prefix)) {
                continue;
            }
            report.checked += 1;

            // An unanswerable stat is not evidence the file is gone.
            if tokio::fs::try_exists(path).await.unwrap_or(true) {
                continue;
            }

            match self.deletion.delete(&asset_id).await {
                Ok(_) => report.removed += 1,
                Err(e) => {
                    log::warn!("Failed to remove missing {}: {}", path.display(), e);
                    report.failed += 1;
                }
            }
        }

        if report.removed > 0 {
            log::info!(
                "Cleanup removed {} of {} checked assets",
                report.removed,
                report.checked
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CatalogConfig;
    use crate::core::thumbnail::ThumbnailService;
    use crate::core::video::FfmpegDecoder;
    use crate::database::repositories::test_support::{hashes, insert};
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn sweep(temp_dir: &TempDir, db: &Database) -> CleanupSweep {
        let thumbnails = ThumbnailService::new(
            &CatalogConfig::rooted_at(temp_dir.path()),
            Arc::new(FfmpegDecoder::default()),
        );
        CleanupSweep::new(db.clone(), DeletionManager::new(db.clone(), thumbnails))
    }

    #[tokio::test]
    async fn test_removes_only_missing_files() {
        let temp_dir = TempDir::new().unwrap();
        let present = temp_dir.path().join("present.jpg");
        fs::write(&present, b"x").unwrap();
        let missing = temp_dir.path().join("missing.jpg");
        let db = Database::open_in_memory().unwrap();
        db.read(|conn| {
            insert(conn, &present.to_string_lossy(), hashes("1", "2", "3"), 1, 1);
            insert(conn, &missing.to_string_lossy(), hashes("4", "5", "6"), 1, 1);
            Ok(())
        })
        .unwrap();

        let report = sweep(&temp_dir, &db).run(None).await.unwrap();

        assert_eq!(report, CleanupReport { checked: 2, removed: 1, failed: 0 });
        let remaining = db.read(|conn| AssetRepository::new(conn).list_paths()).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].1, present.to_string_lossy());
    }

    #[tokio::test]
    async fn test_prefix_limits_the_sweep() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();
        db.read(|conn| {
            insert(conn, "/gone/inside/a.jpg", hashes("1", "2", "3"), 1, 1);
            insert(conn, "/gone/insider/b.jpg", hashes("4", "5", "6"), 1, 1);
            insert(conn, "/elsewhere/c.jpg", hashes("7", "8", "9"), 1, 1);
            Ok(())
        })
        .unwrap();

        let report = sweep(&temp_dir, &db)
            .run(Some(Path::new("/gone/inside")))
            .await
            .unwrap();

        assert_eq!(report.checked, 1);
        assert_eq!(report.removed, 1);
        assert_eq!(db.read(|conn| AssetRepository::new(conn).count()).unwrap(), 2);
    }
}
