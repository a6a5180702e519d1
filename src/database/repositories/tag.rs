use super::Repository;
use crate::database::models::Tag;
use crate::database::DatabaseError;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;

/// Name of the marker tag attached to every member of a duplicate group.
pub const DUPLICATE_TAG: &str = "duplicate";

pub struct TagRepository<'c> {
    conn: &'c Connection,
}

impl<'c> Repository<'c> for TagRepository<'c> {
    fn connection(&self) -> &'c Connection {
        self.conn
    }
}

impl<'c> TagRepository<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    pub fn find(&self, name: &str) -> Result<Option<Tag>, DatabaseError> {
        self.connection()
            .query_row(
                "SELECT id, name, count FROM tags WHERE name = ?1",
                params![name],
                |row| {
                    Ok(Tag {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        count: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(DatabaseError::Query)
    }

    /// Link `name` to `asset_id`, creating the tag if needed. The reference
    /// count only moves when a new link is made. Returns whether it was.
    pub fn attach(&self, asset_id: &str, name: &str) -> Result<bool, DatabaseError> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(false);
        }

        let conn = self.connection();
        conn.execute(
            "INSERT INTO tags (name, count) VALUES (?1, 0) ON CONFLICT(name) DO NOTHING",
            params![name],
        )?;
        let tag_id: i64 = conn.query_row(
            "SELECT id FROM tags WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;

        let linked = conn.execute(
            "INSERT OR IGNORE INTO asset_tags (asset_id, tag_id) VALUES (?1, ?2)",
            params![asset_id, tag_id],
        )?;
        if linked > 0 {
            conn.execute(
                "UPDATE tags SET count = count + 1 WHERE id = ?1",
                params![tag_id],
            )?;
        }

        Ok(linked > 0)
    }

    pub fn attach_all<'n, I>(&self, asset_id: &str, names: I) -> Result<usize, DatabaseError>
    where
        I: IntoIterator<Item = &'n str>,
    {
        let mut linked = 0;
        for name in names {
            if self.attach(asset_id, name)? {
                linked += 1;
            }
        }
        Ok(linked)
    }

    pub fn names_for_asset(&self, asset_id: &str) -> Result<BTreeSet<String>, DatabaseError> {
        let mut stmt = self.connection().prepare(
            "SELECT t.name FROM asset_tags at JOIN tags t ON t.id = at.tag_id \
             WHERE at.asset_id = ?1",
        )?;
        let names = stmt
            .query_map(params![asset_id], |row| row.get(0))?
            .collect::<Result<BTreeSet<String>, _>>()?;
        Ok(names)
    }

    /// Drop every tag link of `asset_id`, decrementing each tag and deleting
    /// tags whose count falls to zero.
    pub fn detach_all(&self, asset_id: &str) -> Result<usize, DatabaseError> {
        let conn = self.connection();
        let tag_ids: Vec<i64> = {
            let mut stmt = conn.prepare("SELECT tag_id FROM asset_tags WHERE asset_id = ?1")?;
            let ids = stmt
                .query_map(params![asset_id], |row| row.get(0))?
                .collect::<Result<Vec<i64>, _>>()?;
            ids
        };

        conn.execute(
            "DELETE FROM asset_tags WHERE asset_id = ?1",
            params![asset_id],
        )?;

        for tag_id in &tag_ids {
            conn.execute(
                "UPDATE tags SET count = count - 1 WHERE id = ?1",
                params![tag_id],
            )?;
            conn.execute(
                "DELETE FROM tags WHERE id = ?1 AND count <= 0",
                params![tag_id],
            )?;
        }

        Ok(tag_ids.len())
    }
}
