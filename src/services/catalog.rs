use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::MissedTickBehavior;

use super::cleanup::{CleanupReport, CleanupSweep};
use super::scan_lock::{ScanGuard, ScanLock, ScanMode, ScanState};
use super::scanner::{ScanError, ScanReport, Scanner};
use crate::config::{CatalogConfig, ConfigError, FolderConfig};
use crate::core::deletion::{DeletionManager, DeletionReport};
use crate::core::hash::IdentityHasher;
use crate::core::metadata::{ExifMetadataExtractor, MetadataExtractor};
use crate::core::thumbnail::ThumbnailService;
use crate::core::video::{FfmpegDecoder, MediaDecoder};
use crate::database::models::{DuplicateGroup, Folder};
use crate::database::repositories::{AssetRepository, DuplicateGroupRepository, FolderRepository};
use crate::database::{Database, DatabaseError};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScanOutcome {
    Completed(ScanReport),
    /// Another scan held the lock and the request was non-blocking.
    Skipped,
}

impl ScanOutcome {
    /// Number of assets added; zero when skipped.
    pub fn added(&self) -> usize {
        match self {
            ScanOutcome::Completed(report) => report.added,
            ScanOutcome::Skipped => 0,
        }
    }
}

/// Entry point tying the store, the scan lock and the pipeline together.
#[derive(Clone)]
pub struct Catalog {
    config: CatalogConfig,
    db: Database,
    lock: ScanLock,
    scanner: Scanner,
    deletion: DeletionManager,
    cleanup: CleanupSweep,
}

impl Catalog {
    /// Open the catalog described by `config`, creating directories and
    /// the schema as needed.
    pub fn open(config: CatalogConfig) -> Result<Self, CatalogError> {
        config.ensure_directories()?;
        let db = Database::open(&config.database_path, config.retry_policy())?;
        let decoder = Arc::new(FfmpegDecoder::new(
            config.ffmpeg_path.clone(),
            config.ffprobe_path.clone(),
        ));

        log::info!("Opened catalog at {}", config.database_path.display());
        Ok(Self::with_components(
            config,
            db,
            decoder,
            Arc::new(ExifMetadataExtractor::new()),
        ))
    }

    pub fn with_components(
        config: CatalogConfig,
        db: Database,
        decoder: Arc<dyn MediaDecoder>,
        metadata: Arc<dyn MetadataExtractor>,
    ) -> Self {
        let thumbnails = ThumbnailService::new(&config, decoder);
        let deletion = DeletionManager::new(db.clone(), thumbnails.clone());
        let scanner = Scanner::new(
            db.clone(),
            IdentityHasher::new(config.large_file_threshold),
            thumbnails,
            metadata,
            deletion.clone(),
            config.perceptual_hashing,
        );
        let cleanup = CleanupSweep::new(db.clone(), deletion.clone());

        Self {
            config,
            db,
            lock: ScanLock::new(),
            scanner,
            deletion,
            cleanup,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    pub fn scan_state(&self) -> ScanState {
        self.lock.state()
    }

    /// Store every configured folder so `scan_all_folders` can find it.
    pub async fn register_folders(&self) -> Result<Vec<Folder>, DatabaseError> {
        let configured = self.config.folders.clone();
        self.db
            .transaction(|tx| {
                let repo = FolderRepository::new(tx);
                configured.iter().map(|folder| repo.upsert(folder)).collect()
            })
            .await
    }

    /// Scan one registered folder under the scan lock.
    pub async fn scan_folder(&self, folder: &Folder, mode: ScanMode) -> Result<ScanOutcome, ScanError> {
        let Some(guard) = self.lock.acquire(mode).await else {
            log::info!("Scan of {} skipped: another scan is running", folder.path);
            return Ok(ScanOutcome::Skipped);
        };

        self.scan_folder_locked(folder, guard).await
    }

    /// Register `path` as a folder (keeping any stored excludes) and scan it.
    /// A skipped request leaves the stored folder row untouched.
    pub async fn scan_path(
        &self,
        path: &Path,
        recursive: bool,
        mode: ScanMode,
    ) -> Result<ScanOutcome, ScanError> {
        let Some(guard) = self.lock.acquire(mode).await else {
            log::info!("Scan of {} skipped: another scan is running", path.display());
            return Ok(ScanOutcome::Skipped);
        };

        let path_str = path.to_string_lossy().to_string();
        let folder = self
            .db
            .transaction(|tx| {
                let repo = FolderRepository::new(tx);
                let mut config = FolderConfig::new(PathBuf::from(&path_str), recursive);
                if let Some(existing) = repo.find_by_path(&path_str)? {
                    config.enabled = existing.enabled;
                    config.exclude = existing.exclude_list()?;
                }
                repo.upsert(&config)
            })
            .await?;

        self.scan_folder_locked(&folder, guard).await
    }

    async fn scan_folder_locked(&self, folder: &Folder, guard: ScanGuard) -> Result<ScanOutcome, ScanError> {
        let exclude = folder.exclude_list().map_err(DatabaseError::from)?;
        let report = self
            .scanner
            .scan_directory(Path::new(&folder.path), folder.recursive, &exclude)
            .await?;

        let folder_id = folder.id;
        self.db
            .transaction(|tx| FolderRepository::new(tx).mark_scanned(folder_id))
            .await?;

        log::debug!("Held scan lock for {:?}", guard.held_for());
        Ok(ScanOutcome::Completed(report))
    }

    /// Non-blocking pass over every enabled folder. Failures are logged per
    /// folder and do not stop the sweep.
    pub async fn scan_all_folders(&self) -> Result<Vec<(String, ScanOutcome)>, DatabaseError> {
        let folders = self
            .db
            .read(|conn| FolderRepository::new(conn).find_enabled())?;

        let mut outcomes = Vec::with_capacity(folders.len());
        for folder in folders {
            match self.scan_folder(&folder, ScanMode::NonBlocking).await {
                Ok(outcome) => outcomes.push((folder.path, outcome)),
                Err(e) => log::warn!("Scan of {} failed: {}", folder.path, e),
            }
        }
        Ok(outcomes)
    }

    pub async fn cleanup_deleted_files(&self, prefix: Option<&Path>) -> Result<CleanupReport, DatabaseError> {
        self.cleanup.run(prefix).await
    }

    pub async fn delete_asset(&self, asset_id: &str) -> Result<DeletionReport, DatabaseError> {
        self.deletion.delete(asset_id).await
    }

    /// Every duplicate group with its members, largest prime first.
    pub fn duplicate_groups(&self) -> Result<Vec<DuplicateGroup>, DatabaseError> {
        self.db.read(|conn| {
            let assets = AssetRepository::new(conn);
            let groups = DuplicateGroupRepository::new(conn);

            let primes = assets.find_by_ids(&groups.primes()?)?;
            primes
                .into_iter()
                .map(|prime| {
                    let members = groups.members_of(&prime.id)?;
                    Ok(DuplicateGroup { prime, members })
                })
                .collect()
        })
    }

    /// Scan every enabled folder and sweep missing files on each tick until
    /// `shutdown` resolves. Late ticks are dropped rather than queued.
    pub async fn run_periodic<F>(&self, interval: Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    log::info!("Periodic scanning stopped");
                    return;
                }
                _ = ticker.tick() => self.run_cycle().await,
            }
        }
    }

    async fn run_cycle(&self) {
        match self.scan_all_folders().await {
            Ok(outcomes) => {
                let added: usize = outcomes.iter().map(|(_, outcome)| outcome.added()).sum();
                log::info!("Periodic scan of {} folders added {}", outcomes.len(), added);
            }
            Err(e) => log::error!("Periodic scan failed: {}", e),
        }

        if let Err(e) = self.cleanup_deleted_files(None).await {
            log::error!("Periodic cleanup failed: {}", e);
        }
    }
}
