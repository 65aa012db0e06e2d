//! SQLite persistence for the deploy queue.
//!
//! The whole queue is rewritten after every mutation, so the table always
//! mirrors the in-memory order exactly.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, params};

use crate::queue::{Identity, Participant};

/// Queue store.
pub struct Store {
    db: Mutex<Connection>,
}

impl Store {
    /// Open or create a queue database.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Connection::open(path)
            .with_context(|| format!("Failed to open queue database {}", path.display()))?;
        Self::init(db)
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let db = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::init(db)
    }

    fn init(db: Connection) -> Result<Self> {
        db.execute_batch(
            "CREATE TABLE IF NOT EXISTS queue (
                position  INTEGER PRIMARY KEY,
                identity  TEXT NOT NULL UNIQUE,
                metadata  TEXT NOT NULL,
                queued_at TEXT NOT NULL
            );",
        )
        .context("Failed to create queue table")?;
        Ok(Self { db: Mutex::new(db) })
    }

    /// Load the stored queue, head first.
    pub fn load(&self) -> Result<Vec<Participant>> {
        let db = self.db.lock();
        let mut stmt = db.prepare(
            "SELECT identity, metadata, queued_at FROM queue ORDER BY position ASC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(identity, metadata, queued_at)| {
                let queued_at = DateTime::parse_from_rfc3339(&queued_at)
                    .with_context(|| format!("Bad queued_at for {identity}: {queued_at}"))?
                    .with_timezone(&Utc);
                Ok(Participant {
                    identity: Identity::new(identity),
                    metadata,
                    queued_at,
                })
            })
            .collect()
    }

    /// Replace the stored queue with `participants`.
    pub fn save(&self, participants: &[Participant]) -> Result<()> {
        let mut db = self.db.lock();
        let tx = db.transaction()?;
        tx.execute("DELETE FROM queue", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO queue (position, identity, metadata, queued_at)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (position, p) in participants.iter().enumerate() {
                stmt.execute(params![
                    position as i64,
                    p.identity.as_str(),
                    p.metadata,
                    p.queued_at.to_rfc3339(),
                ])
                .with_context(|| format!("Failed to store {}", p.identity))?;
            }
        }
        tx.commit().context("Failed to commit queue")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_store_loads_nothing() {
        let store = Store::in_memory().unwrap();
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn roundtrip_keeps_order_and_fields() {
        let store = Store::in_memory().unwrap();
        let queue = vec![
            Participant::new("carol", "billing"),
            Participant::new("alice", ""),
            Participant::new("bob", "api v2"),
        ];
        store.save(&queue).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[0].identity.as_str(), "carol");
        assert_eq!(loaded[0].metadata, "billing");
        assert_eq!(loaded[1].identity.as_str(), "alice");
        assert_eq!(loaded[2].metadata, "api v2");
        assert_eq!(loaded[2].queued_at, queue[2].queued_at);
    }

    #[test]
    fn save_replaces_previous_contents() {
        let store = Store::in_memory().unwrap();
        store
            .save(&[Participant::new("alice", ""), Participant::new("bob", "")])
            .unwrap();
        store.save(&[Participant::new("bob", "")]).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].identity.as_str(), "bob");

        store.save(&[]).unwrap();
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn duplicate_identity_rejected_by_schema() {
        let store = Store::in_memory().unwrap();
        let dup = [Participant::new("alice", ""), Participant::new("alice", "")];
        assert!(store.save(&dup).is_err());
        // The failed transaction leaves the old contents alone.
        assert!(store.load().unwrap().is_empty());
    }
}
