//! Near-duplicate grouping.
//!
//! Assets whose perceptual hashes collide at any resolution form a group led
//! by a "prime", the highest-resolution member. Groups are stored as one
//! membership row per member (the prime points at itself) and carry a
//! marker tag so they can be found through ordinary tag search.

use rusqlite::Connection;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};

use crate::database::models::Asset;
use crate::database::repositories::tag::DUPLICATE_TAG;
use crate::database::repositories::{AssetRepository, DuplicateGroupRepository, TagRepository};
use crate::database::DatabaseError;

/// What the resolver did for one asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupResolution {
    pub prime_id: String,
    /// Every member of the resulting group, prime included.
    pub member_ids: Vec<String>,
    /// Primes of pre-existing groups folded into this one.
    pub absorbed_primes: Vec<String>,
}

impl GroupResolution {
    pub fn size(&self) -> usize {
        self.member_ids.len()
    }
}

/// Stateless; every call works on the connection it is handed.
#[derive(Debug, Clone, Copy, Default)]
pub struct DuplicateResolver;

impl DuplicateResolver {
    pub fn new() -> Self {
        Self
    }

    /// Match `asset` (already inserted) against the catalog and update group
    /// membership and tags. Returns `None` when it matches nothing else.
    ///
    /// Run this inside the same transaction as the insert.
    pub fn resolve(
        &self,
        conn: &Connection,
        asset: &Asset,
    ) -> Result<Option<GroupResolution>, DatabaseError> {
        let hashes = asset.perceptual_hashes();
        if hashes.matchable().is_empty() {
            return Ok(None);
        }

        let assets = AssetRepository::new(conn);
        let groups = DuplicateGroupRepository::new(conn);

        // Largest first, oldest first among equals.
        let matched = assets.find_perceptual_matches(&hashes)?;
        if matched.len() < 2 {
            return Ok(None);
        }

        let matched_ids: Vec<String> = matched.iter().map(|a| a.id.clone()).collect();
        let existing_primes = groups.primes_among(&matched_ids)?;

        let (prime, members, absorbed_primes) = if existing_primes.is_empty() {
            (matched[0].clone(), matched, Vec::new())
        } else {
            let prime_assets = assets.find_by_ids(&existing_primes)?;
            let Some(current_prime) = prime_assets.first().cloned() else {
                return Err(DatabaseError::NotFound(format!(
                    "prime among {:?}",
                    existing_primes
                )));
            };

            let mut members = matched;
            for prime_asset in &prime_assets {
                members.extend(groups.members_of(&prime_asset.id)?);
            }
            let members = dedup_by_id(members);

            // Only the newcomer can challenge the standing prime, and only
            // by being strictly larger.
            let prime = if asset.pixel_area() > current_prime.pixel_area() {
                asset.clone()
            } else {
                current_prime
            };

            let absorbed = prime_assets
                .into_iter()
                .map(|a| a.id)
                .filter(|id| *id != prime.id)
                .collect();
            (prime, members, absorbed)
        };

        for member in &members {
            groups.upsert(&member.id, &prime.id)?;
        }

        propagate_tags(conn, &prime, &members)?;

        let resolution = GroupResolution {
            prime_id: prime.id.clone(),
            member_ids: members.iter().map(|m| m.id.clone()).collect(),
            absorbed_primes,
        };
        log::info!(
            "Duplicate group of {} led by {} ({}x{})",
            resolution.size(),
            prime.path,
            prime.width,
            prime.height
        );
        if !resolution.absorbed_primes.is_empty() {
            log::debug!("Merged groups led by {:?}", resolution.absorbed_primes);
        }

        Ok(Some(resolution))
    }
}

fn dedup_by_id(assets: Vec<Asset>) -> Vec<Asset> {
    let mut seen = HashSet::new();
    assets
        .into_iter()
        .filter(|asset| seen.insert(asset.id.clone()))
        .collect()
}

/// The prime gets the union of every member's tags plus the marker; the
/// others get only the marker.
fn propagate_tags(conn: &Connection, prime: &Asset, members: &[Asset]) -> Result<(), DatabaseError> {
    let tags = TagRepository::new(conn);

    let mut union = BTreeSet::new();
    for member in members {
        union.extend(tags.names_for_asset(&member.id)?);
    }
    union.insert(DUPLICATE_TAG.to_string());

    tags.attach_all(&prime.id, union.iter().map(String::as_str))?;
    for member in members.iter().filter(|m| m.id != prime.id) {
        tags.attach(&member.id, DUPLICATE_TAG)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::perceptual::PerceptualHashes;
    use crate::database::repositories::test_support::{hashes, insert};
    use crate::database::Database;
    use std::collections::BTreeSet;

    fn names(conn: &Connection, asset: &Asset) -> BTreeSet<String> {
        TagRepository::new(conn).names_for_asset(&asset.id).unwrap()
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_unmatched_asset_forms_no_group() {
        let db = Database::open_in_memory().unwrap();

        db.read(|conn| {
            insert(conn, "/other.jpg", hashes("aa", "bb", "cc"), 10, 10);
            let lone = insert(conn, "/lone.jpg", hashes("11", "22", "33"), 10, 10);

            assert!(DuplicateResolver::new().resolve(conn, &lone).unwrap().is_none());
            assert_eq!(DuplicateGroupRepository::new(conn).count().unwrap(), 0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_sentinel_asset_forms_no_group() {
        let db = Database::open_in_memory().unwrap();

        db.read(|conn| {
            insert(conn, "/a.jpg", PerceptualHashes::sentinel(), 10, 10);
            let b = insert(conn, "/b.jpg", PerceptualHashes::sentinel(), 10, 10);

            assert!(DuplicateResolver::new().resolve(conn, &b).unwrap().is_none());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_largest_match_becomes_prime_and_tags_propagate() {
        let db = Database::open_in_memory().unwrap();

        db.read(|conn| {
            let a = insert(conn, "/a.jpg", hashes("f0f0", "0f0f", "ffff"), 800, 600);
            let b = insert(conn, "/b.jpg", hashes("f0f0", "1234", "4321"), 400, 300);
            let tags = TagRepository::new(conn);
            tags.attach(&a.id, "beach").unwrap();
            tags.attach(&b.id, "family").unwrap();

            let resolution = DuplicateResolver::new().resolve(conn, &b).unwrap().unwrap();

            assert_eq!(resolution.prime_id, a.id);
            assert_eq!(resolution.size(), 2);

            let groups = DuplicateGroupRepository::new(conn);
            assert!(groups.membership(&a.id).unwrap().unwrap().is_prime());
            assert_eq!(groups.membership(&b.id).unwrap().unwrap().prime_id, a.id);

            assert_eq!(names(conn, &a), set(&["beach", "duplicate", "family"]));
            assert_eq!(names(conn, &b), set(&["duplicate", "family"]));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_equal_area_newcomer_does_not_displace_prime() {
        let db = Database::open_in_memory().unwrap();

        db.read(|conn| {
            let resolver = DuplicateResolver::new();
            let first = insert(conn, "/first.jpg", hashes("aaaa", "bbbb", "cccc"), 10, 10);
            let second = insert(conn, "/second.jpg", hashes("aaaa", "x1", "x2"), 10, 10);
            let prime = resolver.resolve(conn, &second).unwrap().unwrap().prime_id;
            assert_eq!(prime, first.id);

            let third = insert(conn, "/third.jpg", hashes("y1", "bbbb", "y2"), 10, 10);
            let resolution = resolver.resolve(conn, &third).unwrap().unwrap();

            assert_eq!(resolution.prime_id, first.id);
            assert_eq!(
                DuplicateGroupRepository::new(conn).count_members(&first.id).unwrap(),
                3
            );
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_strictly_larger_newcomer_takes_over() {
        let db = Database::open_in_memory().unwrap();

        db.read(|conn| {
            let resolver = DuplicateResolver::new();
            let small = insert(conn, "/small.jpg", hashes("aaaa", "bbbb", "cccc"), 100, 100);
            let medium = insert(conn, "/medium.jpg", hashes("aaaa", "m1", "m2"), 200, 100);
            resolver.resolve(conn, &medium).unwrap();

            let big = insert(conn, "/big.jpg", hashes("b1", "b2", "cccc"), 400, 300);
            let resolution = resolver.resolve(conn, &big).unwrap().unwrap();

            assert_eq!(resolution.prime_id, big.id);
            let groups = DuplicateGroupRepository::new(conn);
            assert_eq!(groups.primes().unwrap(), vec![big.id.clone()]);
            for member in [&small, &medium, &big] {
                assert_eq!(groups.membership(&member.id).unwrap().unwrap().prime_id, big.id);
            }
            assert!(names(conn, &big).contains(DUPLICATE_TAG));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_bridging_asset_merges_groups() {
        let db = Database::open_in_memory().unwrap();

        db.read(|conn| {
            let resolver = DuplicateResolver::new();
            let p1 = insert(conn, "/p1.jpg", hashes("aaaa", "a2", "a3"), 500, 500);
            let m1 = insert(conn, "/m1.jpg", hashes("aaaa", "a4", "a5"), 100, 100);
            resolver.resolve(conn, &m1).unwrap();

            let p2 = insert(conn, "/p2.jpg", hashes("bbbb", "b2", "b3"), 300, 300);
            let m2 = insert(conn, "/m2.jpg", hashes("bbbb", "b4", "b5"), 50, 50);
            resolver.resolve(conn, &m2).unwrap();

            let bridge = insert(conn, "/bridge.jpg", hashes("aaaa", "bbbb", "c"), 20, 20);
            let resolution = resolver.resolve(conn, &bridge).unwrap().unwrap();

            assert_eq!(resolution.prime_id, p1.id);
            assert_eq!(resolution.absorbed_primes, vec![p2.id.clone()]);
            assert_eq!(resolution.size(), 5);

            let groups = DuplicateGroupRepository::new(conn);
            assert_eq!(groups.primes().unwrap(), vec![p1.id.clone()]);
            assert_eq!(groups.count_members(&p1.id).unwrap(), 5);
            assert_eq!(groups.membership(&m2.id).unwrap().unwrap().prime_id, p1.id);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_resolving_twice_is_idempotent() {
        let db = Database::open_in_memory().unwrap();

        db.read(|conn| {
            let resolver = DuplicateResolver::new();
            insert(conn, "/a.jpg", hashes("aaaa", "1", "2"), 20, 20);
            let b = insert(conn, "/b.jpg", hashes("aaaa", "3", "4"), 10, 10);

            let first = resolver.resolve(conn, &b).unwrap().unwrap();
            let second = resolver.resolve(conn, &b).unwrap().unwrap();

            assert_eq!(first.prime_id, second.prime_id);
            assert_eq!(DuplicateGroupRepository::new(conn).count().unwrap(), 2);
            assert_eq!(
                TagRepository::new(conn).find(DUPLICATE_TAG).unwrap().unwrap().count,
                2
            );
            Ok(())
        })
        .unwrap();
    }
}
