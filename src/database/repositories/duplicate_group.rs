use super::{placeholders, Repository};
use crate::database::models::{Asset, GroupMembership, ASSET_COLUMNS};
use crate::database::DatabaseError;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

pub struct DuplicateGroupRepository<'c> {
    conn: &'c Connection,
}

impl<'c> Repository<'c> for DuplicateGroupRepository<'c> {
    fn connection(&self) -> &'c Connection {
        self.conn
    }
}

impl<'c> DuplicateGroupRepository<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    pub fn membership(&self, asset_id: &str) -> Result<Option<GroupMembership>, DatabaseError> {
        self.connection()
            .query_row(
                "SELECT asset_id, prime_id FROM duplicate_groups WHERE asset_id = ?1",
                params![asset_id],
                |row| {
                    Ok(GroupMembership {
                        asset_id: row.get(0)?,
                        prime_id: row.get(1)?,
                    })
                },
            )
            .optional()
            .map_err(DatabaseError::Query)
    }

    /// Membership rows for any of `asset_ids`, in the order given.
    pub fn memberships_for(
        &self,
        asset_ids: &[String],
    ) -> Result<Vec<GroupMembership>, DatabaseError> {
        let mut found = Vec::new();
        for asset_id in asset_ids {
            if let Some(membership) = self.membership(asset_id)? {
                found.push(membership);
            }
        }
        Ok(found)
    }

    /// Every member of the group led by `prime_id`, the prime included,
    /// largest pixel area first.
    pub fn members_of(&self, prime_id: &str) -> Result<Vec<Asset>, DatabaseError> {
        let columns = ASSET_COLUMNS
            .split(", ")
            .map(|column| format!("a.{}", column.trim()))
            .collect::<Vec<_>>()
            .join(", ");
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {} FROM duplicate_groups g JOIN assets a ON a.id = g.asset_id \
             WHERE g.prime_id = ?1 ORDER BY a.width * a.height DESC, a.created_at ASC, a.rowid ASC",
            columns
        ))?;
        let members = stmt
            .query_map(params![prime_id], Asset::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(members)
    }

    pub fn count_members(&self, prime_id: &str) -> Result<i64, DatabaseError> {
        self.connection()
            .query_row(
                "SELECT COUNT(*) FROM duplicate_groups WHERE prime_id = ?1",
                params![prime_id],
                |row| row.get(0),
            )
            .map_err(DatabaseError::Query)
    }

    /// Insert `(asset_id, prime_id)` or re-point an existing row.
    pub fn upsert(&self, asset_id: &str, prime_id: &str) -> Result<(), DatabaseError> {
        self.connection().execute(
            "INSERT INTO duplicate_groups (asset_id, prime_id) VALUES (?1, ?2) \
             ON CONFLICT(asset_id) DO UPDATE SET prime_id = excluded.prime_id \
             WHERE duplicate_groups.prime_id <> excluded.prime_id",
            params![asset_id, prime_id],
        )?;
        Ok(())
    }

    /// Move every row led by `old_prime` to `new_prime`.
    pub fn repoint(&self, old_prime: &str, new_prime: &str) -> Result<usize, DatabaseError> {
        self.connection()
            .execute(
                "UPDATE duplicate_groups SET prime_id = ?2 WHERE prime_id = ?1",
                params![old_prime, new_prime],
            )
            .map_err(DatabaseError::Query)
    }

    /// Dissolve the group led by `prime_id`.
    pub fn delete_group(&self, prime_id: &str) -> Result<usize, DatabaseError> {
        self.connection()
            .execute(
                "DELETE FROM duplicate_groups WHERE prime_id = ?1",
                params![prime_id],
            )
            .map_err(DatabaseError::Query)
    }

    /// Ids of every current prime.
    pub fn primes(&self) -> Result<Vec<String>, DatabaseError> {
        let mut stmt = self.connection().prepare(
            "SELECT DISTINCT prime_id FROM duplicate_groups ORDER BY prime_id",
        )?;
        let primes = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(primes)
    }

    /// Primes among `asset_ids`, used to sanity-check merges.
    pub fn primes_among(&self, asset_ids: &[String]) -> Result<Vec<String>, DatabaseError> {
        if asset_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut stmt = self.connection().prepare(&format!(
            "SELECT DISTINCT prime_id FROM duplicate_groups WHERE asset_id IN ({})",
            placeholders(asset_ids.len())
        ))?;
        let primes = stmt
            .query_map(params_from_iter(asset_ids.iter()), |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(primes)
    }

    pub fn count(&self) -> Result<i64, DatabaseError> {
        self.connection()
            .query_row("SELECT COUNT(*) FROM duplicate_groups", [], |row| row.get(0))
            .map_err(DatabaseError::Query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::repositories::test_support::{hashes, insert};
    use crate::database::repositories::AssetRepository;
    use crate::database::Database;

    #[test]
    fn test_upsert_and_repoint() {
        let db = Database::open_in_memory().unwrap();

        db.read(|conn| {
            let a = insert(conn, "/a.jpg", hashes("1", "2", "3"), 100, 100);
            let b = insert(conn, "/b.jpg", hashes("1", "2", "3"), 50, 50);
            let c = insert(conn, "/c.jpg", hashes("1", "2", "3"), 10, 10);
            let repo = DuplicateGroupRepository::new(conn);

            for member in [&a, &b, &c] {
                repo.upsert(&member.id, &a.id).unwrap();
            }
            repo.upsert(&a.id, &a.id).unwrap();
            assert_eq!(repo.count_members(&a.id).unwrap(), 3);
            assert!(repo.membership(&a.id).unwrap().unwrap().is_prime());

            let moved = repo.repoint(&a.id, &b.id).unwrap();
            assert_eq!(moved, 3);
            assert_eq!(repo.count_members(&b.id).unwrap(), 3);
            assert_eq!(repo.membership(&c.id).unwrap().unwrap().prime_id, b.id);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_members_ordered_by_area() {
        let db = Database::open_in_memory().unwrap();

        db.read(|conn| {
            let small = insert(conn, "/s.jpg", hashes("1", "2", "3"), 10, 10);
            let big = insert(conn, "/b.jpg", hashes("1", "2", "3"), 90, 90);
            let repo = DuplicateGroupRepository::new(conn);
            repo.upsert(&small.id, &big.id).unwrap();
            repo.upsert(&big.id, &big.id).unwrap();

            let members = repo.members_of(&big.id).unwrap();
            assert_eq!(members.len(), 2);
            assert_eq!(members[0].id, big.id);
            assert_eq!(members[1].id, small.id);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_rows_cascade_with_asset() {
        let db = Database::open_in_memory().unwrap();

        db.read(|conn| {
            let a = insert(conn, "/a.jpg", hashes("1", "2", "3"), 10, 10);
            let b = insert(conn, "/b.jpg", hashes("1", "2", "3"), 10, 10);
            let repo = DuplicateGroupRepository::new(conn);
            repo.upsert(&a.id, &a.id).unwrap();
            repo.upsert(&b.id, &a.id).unwrap();

            AssetRepository::new(conn).delete(&b.id).unwrap();
            assert!(repo.membership(&b.id).unwrap().is_none());
            assert_eq!(repo.count_members(&a.id).unwrap(), 1);

            assert_eq!(repo.delete_group(&a.id).unwrap(), 1);
            assert_eq!(repo.count().unwrap(), 0);
            Ok(())
        })
        .unwrap();
    }
}
