use rusqlite::Connection;
use serde::Serialize;

use super::thumbnail::ThumbnailService;
use crate::database::repositories::{AssetRepository, DuplicateGroupRepository, TagRepository};
use crate::database::{Database, DatabaseError};

/// How removing an asset changed its duplicate group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum GroupChange {
    /// The asset was in no group.
    Unaffected,
    /// A non-prime member left; the group survives.
    MemberRemoved { prime_id: String },
    /// The prime left and the largest remaining member took over.
    Reelected { new_prime_id: String },
    /// Fewer than two members were left, so the group is gone.
    Dissolved { prime_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletionReport {
    pub asset_id: String,
    pub path: String,
    pub identity_hash: String,
    pub group: GroupChange,
    pub tags_detached: usize,
    pub thumbnail_removed: bool,
}

/// Remove `asset_id` and restore the group and tag invariants. Meant to
/// run inside a single transaction; the thumbnail is left alone.
pub fn cascade_delete(conn: &Connection, asset_id: &str) -> Result<DeletionReport, DatabaseError> {
    let assets = AssetRepository::new(conn);
    let groups = DuplicateGroupRepository::new(conn);
    let tags = TagRepository::new(conn);

    let asset = assets.find_by_id(asset_id)?;
    let membership = groups.membership(asset_id)?;

    let mut group = GroupChange::Unaffected;
    let mut orphan_check = None;

    match membership {
        Some(row) if row.is_prime() => {
            let member_count = groups.count_members(asset_id)?;
            if member_count >= 3 {
                let successor = groups
                    .members_of(asset_id)?
                    .into_iter()
                    .find(|member| member.id != asset_id)
                    .ok_or_else(|| DatabaseError::NotFound(format!("successor for {}", asset_id)))?;
                groups.repoint(asset_id, &successor.id)?;
                log::debug!("{} replaces {} as prime", successor.path, asset.path);
                group = GroupChange::Reelected {
                    new_prime_id: successor.id,
                };
            } else {
                groups.delete_group(asset_id)?;
                group = GroupChange::Dissolved {
                    prime_id: asset_id.to_string(),
                };
            }
        }
        Some(row) => orphan_check = Some(row.prime_id),
        None => {}
    }

    let tags_detached = tags.detach_all(asset_id)?;
    assets.delete(asset_id)?;

    // Membership rows cascade with the asset; a prime left alone with only
    // its own row is no longer a group.
    if let Some(prime_id) = orphan_check {
        if groups.count_members(&prime_id)? <= 1 {
            groups.delete_group(&prime_id)?;
            group = GroupChange::Dissolved { prime_id };
        } else {
            group = GroupChange::MemberRemoved { prime_id };
        }
    }

    Ok(DeletionReport {
        asset_id: asset.id,
        path: asset.path,
        identity_hash: asset.identity_hash,
        group,
        tags_detached,
        thumbnail_removed: false,
    })
}

/// Runs the cascade transactionally and collects unreferenced thumbnails.
#[derive(Clone)]
pub struct DeletionManager {
    db: Database,
    thumbnails: ThumbnailService,
}

impl DeletionManager {
    pub fn new(db: Database, thumbnails: ThumbnailService) -> Self {
        Self { db, thumbnails }
    }

    pub async fn delete(&self, asset_id: &str) -> Result<DeletionReport, DatabaseError> {
        let mut report = self
            .db
            .transaction(|tx| cascade_delete(tx, asset_id))
            .await?;

        let still_referenced = self.db.read(|conn| {
            AssetRepository::new(conn).count_by_identity_hash(&report.identity_hash)
        })? > 0;

        if !still_referenced {
            match self.thumbnails.remove(&report.identity_hash) {
                Ok(removed) => report.thumbnail_removed = removed,
                Err(e) => log::warn!(
                    "Failed to remove thumbnail for {}: {}",
                    report.identity_hash,
                    e
                ),
            }
        }

        log::info!("Deleted {} from the catalog", report.path);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CatalogConfig;
    use crate::core::duplicate::DuplicateResolver;
    use crate::core::video::FfmpegDecoder;
    use crate::database::models::Asset;
    use crate::database::repositories::test_support::{hashes, insert, new_asset};
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn group_of(conn: &Connection, assets: &[&Asset]) {
        let resolver = DuplicateResolver::new();
        for asset in assets {
            resolver.resolve(conn, asset).unwrap();
        }
    }

    fn manager(temp_dir: &TempDir, db: &Database) -> DeletionManager {
        let thumbnails = ThumbnailService::new(
            &CatalogConfig::rooted_at(temp_dir.path()),
            Arc::new(FfmpegDecoder::default()),
        );
        DeletionManager::new(db.clone(), thumbnails)
    }

    fn touch_thumbnail(manager: &DeletionManager, identity_hash: &str) {
        let path = manager.thumbnails.path_for(identity_hash);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"jpeg").unwrap();
    }

    #[test]
    fn test_removing_member_of_pair_dissolves_group() {
        let db = Database::open_in_memory().unwrap();

        db.read(|conn| {
            let a = insert(conn, "/a.jpg", hashes("aaaa", "1", "2"), 800, 600);
            let b = insert(conn, "/b.jpg", hashes("aaaa", "3", "4"), 400, 300);
            group_of(conn, &[&b]);

            let report = cascade_delete(conn, &b.id).unwrap();

            assert_eq!(report.group, GroupChange::Dissolved { prime_id: a.id.clone() });
            assert_eq!(DuplicateGroupRepository::new(conn).count().unwrap(), 0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_removing_member_of_larger_group_keeps_it() {
        let db = Database::open_in_memory().unwrap();

        db.read(|conn| {
            let a = insert(conn, "/a.jpg", hashes("aaaa", "1", "2"), 800, 600);
            let b = insert(conn, "/b.jpg", hashes("aaaa", "3", "4"), 400, 300);
            let c = insert(conn, "/c.jpg", hashes("aaaa", "5", "6"), 200, 150);
            group_of(conn, &[&b, &c]);

            let report = cascade_delete(conn, &c.id).unwrap();

            assert_eq!(report.group, GroupChange::MemberRemoved { prime_id: a.id.clone() });
            assert_eq!(DuplicateGroupRepository::new(conn).count_members(&a.id).unwrap(), 2);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_removing_prime_reelects_largest_remaining() {
        let db = Database::open_in_memory().unwrap();

        db.read(|conn| {
            let a = insert(conn, "/a.jpg", hashes("aaaa", "1", "2"), 800, 600);
            let b = insert(conn, "/b.jpg", hashes("aaaa", "3", "4"), 400, 300);
            let c = insert(conn, "/c.jpg", hashes("aaaa", "5", "6"), 600, 450);
            group_of(conn, &[&b, &c]);

            let report = cascade_delete(conn, &a.id).unwrap();

            assert_eq!(report.group, GroupChange::Reelected { new_prime_id: c.id.clone() });
            let groups = DuplicateGroupRepository::new(conn);
            assert!(groups.membership(&c.id).unwrap().unwrap().is_prime());
            assert_eq!(groups.membership(&b.id).unwrap().unwrap().prime_id, c.id);
            assert_eq!(groups.count().unwrap(), 2);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_removing_prime_of_pair_dissolves_group() {
        let db = Database::open_in_memory().unwrap();

        db.read(|conn| {
            let a = insert(conn, "/a.jpg", hashes("aaaa", "1", "2"), 800, 600);
            let b = insert(conn, "/b.jpg", hashes("aaaa", "3", "4"), 400, 300);
            group_of(conn, &[&b]);

            let report = cascade_delete(conn, &a.id).unwrap();

            assert_eq!(report.group, GroupChange::Dissolved { prime_id: a.id.clone() });
            assert!(DuplicateGroupRepository::new(conn).membership(&b.id).unwrap().is_none());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_tag_counts_follow_deletion() {
        let db = Database::open_in_memory().unwrap();

        db.read(|conn| {
            let a = insert(conn, "/a.jpg", hashes("1", "2", "3"), 10, 10);
            let b = insert(conn, "/b.jpg", hashes("4", "5", "6"), 10, 10);
            let tags = TagRepository::new(conn);
            tags.attach_all(&a.id, ["shared", "solo"]).unwrap();
            tags.attach(&b.id, "shared").unwrap();

            let report = cascade_delete(conn, &a.id).unwrap();

            assert_eq!(report.tags_detached, 2);
            assert_eq!(report.group, GroupChange::Unaffected);
            assert!(tags.find("solo").unwrap().is_none());
            assert_eq!(tags.find("shared").unwrap().unwrap().count, 1);
            Ok(())
        })
        .unwrap();
    }

    #[tokio::test]
    async fn test_unknown_asset_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();

        let result = manager(&temp_dir, &db).delete("ast_missing").await;
        assert!(matches!(result, Err(DatabaseError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_shared_thumbnail_survives_until_last_referent() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();
        let manager = manager(&temp_dir, &db);

        let (first, second) = db
            .read(|conn| {
                let repo = AssetRepository::new(conn);
                let first = repo.create(&new_asset("/x/one.jpg", "cafe01", hashes("1", "2", "3"), 5, 5))?;
                let second = repo.create(&new_asset("/y/two.jpg", "cafe01", hashes("1", "2", "3"), 5, 5))?;
                Ok((first, second))
            })
            .unwrap();
        touch_thumbnail(&manager, "cafe01");

        let report = manager.delete(&first.id).await.unwrap();
        assert!(!report.thumbnail_removed);
        assert!(manager.thumbnails.exists("cafe01"));

        let report = manager.delete(&second.id).await.unwrap();
        assert!(report.thumbnail_removed);
        assert!(!manager.thumbnails.exists("cafe01"));
    }
}
