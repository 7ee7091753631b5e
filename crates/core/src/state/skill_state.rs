//! # Skill Registry
//!
//! Skill storage using SQLite. Each skill is a row in the `skills` table;
//! every mutation is mirrored into the append-only `skills_history` table
//! inside the same transaction.

use super::db::JewelDb;
use crate::error::RegistryError;
use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, OnceLock};

/// Skill names double as remote tool names, so they follow the remote
/// service's function-name rules.
fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("static pattern"))
}

/// A registered skill
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    /// Surrogate key
    pub id: i64,
    /// Unique, stable identifier; also the remote tool name
    pub name: String,
    /// Forwarded verbatim to the remote model
    pub description: String,
    /// Parameter schema as JSON text
    pub parameters: String,
    /// Sandboxed script source with a `main(args, ctx)` entry point
    pub implementation: String,
    /// Capability-context fields this skill declares it needs
    pub context_keys: Vec<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// Input for creating a skill
#[derive(Debug, Clone, Deserialize)]
pub struct SkillDraft {
    pub name: String,
    pub description: String,
    /// JSON text; `{}` means no arguments
    #[serde(default = "default_parameters")]
    pub parameters: String,
    pub implementation: String,
    #[serde(default)]
    pub context_keys: Vec<String>,
}

fn default_parameters() -> String {
    "{}".to_string()
}

/// Manager for skill storage in SQLite
pub struct SkillManager {
    conn: Arc<Mutex<Connection>>,
}

impl SkillManager {
    /// Create a new SkillManager from a JewelDb
    pub fn new(db: &JewelDb) -> Self {
        Self {
            conn: db.connection(),
        }
    }

    /// List all skills, oldest first
    pub fn list(&self) -> Result<Vec<Skill>, RegistryError> {
        let conn = self.conn.lock().map_err(|_| RegistryError::Lock)?;

        let mut stmt = conn.prepare(
            r#"
            SELECT id, name, description, parameters, implementation, context_keys, created_at
            FROM skills
            ORDER BY id
            "#,
        )?;

        let skills = stmt
            .query_map([], |row| Self::row_to_skill(row))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(skills)
    }

    /// Add a skill. Fails if the name is invalid or already taken; on
    /// failure nothing is written.
    pub fn add(&self, draft: &SkillDraft) -> Result<Skill, RegistryError> {
        let name = draft.name.trim();
        if !name_pattern().is_match(name) {
            return Err(RegistryError::InvalidName(draft.name.clone()));
        }
        if serde_json::from_str::<serde_json::Value>(&draft.parameters).is_err() {
            tracing::warn!(
                skill = name,
                "parameter schema is not valid JSON; the catalog will advertise an empty schema"
            );
        }

        let mut conn = self.conn.lock().map_err(|_| RegistryError::Lock)?;
        let tx = conn.transaction()?;

        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM skills WHERE name = ?1)",
            params![name],
            |row| row.get(0),
        )?;
        if exists {
            return Err(RegistryError::Duplicate(name.to_string()));
        }

        let context_keys =
            serde_json::to_string(&draft.context_keys).unwrap_or_else(|_| "[]".to_string());
        let created_at = Utc::now();

        tx.execute(
            r#"
            INSERT INTO skills (name, description, parameters, implementation, context_keys, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                name,
                draft.description,
                draft.parameters,
                draft.implementation,
                context_keys,
                created_at.to_rfc3339(),
            ],
        )?;
        let id = tx.last_insert_rowid();

        tx.execute(
            r#"
            INSERT INTO skills_history (skill_id, name, description, parameters, implementation, action)
            VALUES (?1, ?2, ?3, ?4, ?5, 'added')
            "#,
            params![id, name, draft.description, draft.parameters, draft.implementation],
        )?;

        tx.commit()?;
        tracing::info!(skill = name, "skill added");

        Ok(Skill {
            id,
            name: name.to_string(),
            description: draft.description.clone(),
            parameters: draft.parameters.clone(),
            implementation: draft.implementation.clone(),
            context_keys: draft.context_keys.clone(),
            created_at,
        })
    }

    /// Remove a skill by name. Fails without side effects if no such skill
    /// exists.
    pub fn remove(&self, name: &str) -> Result<(), RegistryError> {
        let mut conn = self.conn.lock().map_err(|_| RegistryError::Lock)?;
        let tx = conn.transaction()?;

        let row = tx
            .query_row(
                "SELECT id, description, parameters, implementation FROM skills WHERE name = ?1",
                params![name],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, description, parameters, implementation)) = row else {
            return Err(RegistryError::NotFound(name.to_string()));
        };

        tx.execute("DELETE FROM skills WHERE id = ?1", params![id])?;
        tx.execute(
            r#"
            INSERT INTO skills_history (skill_id, name, description, parameters, implementation, action)
            VALUES (?1, ?2, ?3, ?4, ?5, 'removed')
            "#,
            params![id, name, description, parameters, implementation],
        )?;

        tx.commit()?;
        tracing::info!(skill = name, "skill removed");

        Ok(())
    }

    fn row_to_skill(row: &rusqlite::Row) -> rusqlite::Result<Skill> {
        let context_keys: String = row.get(5)?;
        let created_at: String = row.get(6)?;

        Ok(Skill {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            parameters: row.get(3)?,
            implementation: row.get(4)?,
            context_keys: serde_json::from_str(&context_keys).unwrap_or_default(),
            created_at: parse_timestamp(&created_at),
        })
    }
}

/// Rows created by SQLite defaults use `datetime('now')`, rows written by the
/// manager use RFC 3339; accept both.
fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|t| t.and_utc())
        })
        .unwrap_or_else(|_| Utc::now())
}
