//! # Unified Jewel Database
//!
//! Single SQLite database for all Jewel state. Holds the skill registry and
//! its append-only audit mirror in `.jewel/jewel.db`.

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::seeds;

/// Schema version for migrations
const SCHEMA_VERSION: i32 = 1;

/// Unified database manager for all Jewel state
pub struct JewelDb {
    conn: Arc<Mutex<Connection>>,
}

impl JewelDb {
    /// Open or create the unified database at `.jewel/jewel.db`
    pub fn open() -> Result<Self> {
        Self::open_at(".jewel/jewel.db")
    }

    /// Open database at a specific path (useful for testing)
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let conn = Connection::open(path.as_ref()).context("Failed to open jewel database")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.run_migrations()?;

        Ok(db)
    }

    /// Get a shared connection for use by other modules
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    /// Run schema migrations
    fn run_migrations(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        // Create schema version table
        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
            [],
        )?;

        // Get current version
        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        // Run migrations incrementally
        if current_version < 1 {
            self.migrate_v1(&conn)?;
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                [1],
            )?;
        }

        Ok(())
    }

    /// Migration to version 1 - complete schema
    fn migrate_v1(&self, conn: &Connection) -> Result<()> {
        // Skill registry
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS skills (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                description TEXT NOT NULL,
                parameters TEXT NOT NULL DEFAULT '{}',
                implementation TEXT NOT NULL,
                context_keys TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
            [],
        )?;

        // Append-only audit mirror of registry mutations
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS skills_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                skill_id INTEGER,
                name TEXT NOT NULL,
                description TEXT NOT NULL,
                parameters TEXT NOT NULL,
                implementation TEXT NOT NULL,
                action TEXT NOT NULL,
                recorded_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_skills_history_name ON skills_history(name)",
            [],
        )?;

        tracing::info!("JewelDb initialized with schema version {}", SCHEMA_VERSION);

        Ok(())
    }

    /// Seed the demo skills if the registry is empty
    pub fn seed_skills(&self) -> Result<usize> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        // Check if already seeded
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM skills", [], |row| row.get(0))?;

        if count > 0 {
            tracing::debug!("Skills already present ({} found)", count);
            return Ok(0);
        }

        let defaults = seeds::default_skills();
        let mut inserted = 0;

        for seed in defaults {
            conn.execute(
                r#"
                INSERT INTO skills (name, description, parameters, implementation, context_keys)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    seed.name,
                    seed.description,
                    seed.parameters,
                    seed.implementation,
                    seed.context_keys,
                ],
            )?;
            conn.execute(
                r#"
                INSERT INTO skills_history (skill_id, name, description, parameters, implementation, action)
                VALUES (last_insert_rowid(), ?1, ?2, ?3, ?4, 'seeded')
                "#,
                params![seed.name, seed.description, seed.parameters, seed.implementation],
            )?;
            inserted += 1;
        }

        tracing::info!("Seeded {} default skills", inserted);
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_jewel_db_open_creates_tables() {
        let path = ".jewel/test_jewel.db";
        let _ = fs::remove_file(path);

        let db = JewelDb::open_at(path).unwrap();
        let conn = db.connection();
        let conn = conn.lock().unwrap();

        // Verify tables exist
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        assert!(tables.contains(&"skills".to_string()));
        assert!(tables.contains(&"skills_history".to_string()));

        drop(conn);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_schema_version_tracking() {
        let path = ".jewel/test_jewel_version.db";
        let _ = fs::remove_file(path);

        // Open twice - should not fail on second open
        let _db1 = JewelDb::open_at(path).unwrap();
        drop(_db1);

        let db2 = JewelDb::open_at(path).unwrap();
        let conn = db2.connection();
        let conn = conn.lock().unwrap();

        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .unwrap();

        assert_eq!(version, SCHEMA_VERSION);

        drop(conn);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_skill_seeding() {
        let path = ".jewel/test_jewel_seed.db";
        let _ = fs::remove_file(path);

        let db = JewelDb::open_at(path).unwrap();

        // First seed should insert the defaults
        let count = db.seed_skills().unwrap();
        assert!(count > 0, "Should seed default skills");

        // Second seed should be a no-op
        let count2 = db.seed_skills().unwrap();
        assert_eq!(count2, 0, "Should not re-seed");

        let _ = fs::remove_file(path);
    }
}
