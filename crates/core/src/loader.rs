//! # Skill Loader
//!
//! Materializes registry rows into the process-wide [`CallableTable`]. The
//! table is built once at startup and replaced wholesale on an explicit
//! reload; it is never mutated in place. One skill failing to compile never
//! stops the others from loading.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::SkillLoadError;
use crate::sandbox::{CompiledSkill, SkillEngine};
use crate::state::Skill;

/// An invocable skill handler.
///
/// `args` are the decoded tool-call arguments, `ctx` the capability-context
/// fields the skill declared. Implementations must not panic; the sandboxed
/// implementation runs on a blocking thread and converts panics to errors.
#[async_trait]
pub trait SkillHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn invoke(
        &self,
        args: serde_json::Value,
        ctx: serde_json::Value,
    ) -> anyhow::Result<serde_json::Value>;
}

/// A sandbox-compiled skill behind the handler seam.
struct SandboxedSkill {
    engine: Arc<SkillEngine>,
    skill: CompiledSkill,
}

#[async_trait]
impl SkillHandler for SandboxedSkill {
    fn name(&self) -> &str {
        &self.skill.name
    }

    async fn invoke(
        &self,
        args: serde_json::Value,
        ctx: serde_json::Value,
    ) -> anyhow::Result<serde_json::Value> {
        let engine = Arc::clone(&self.engine);
        let skill = self.skill.clone();
        let result = tokio::task::spawn_blocking(move || engine.invoke(&skill, args, ctx)).await;

        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(anyhow::anyhow!(message)),
            // JoinError: the evaluation thread panicked
            Err(e) => Err(anyhow::anyhow!("skill evaluation aborted: {e}")),
        }
    }
}

/// One callable-table entry: the handler plus the context fields its row
/// declared.
#[derive(Clone)]
pub struct TableEntry {
    pub handler: Arc<dyn SkillHandler>,
    pub context_keys: Vec<String>,
}

/// The in-process mapping from skill name to invocable handler. Read-only
/// after construction.
#[derive(Clone, Default)]
pub struct CallableTable {
    entries: HashMap<String, TableEntry>,
}

impl CallableTable {
    pub fn get(&self, name: &str) -> Option<&TableEntry> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered names, sorted for stable display.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Register a handler. Used by the loader and by tests wiring fakes.
    pub fn insert(&mut self, handler: Arc<dyn SkillHandler>, context_keys: Vec<String>) {
        self.entries.insert(
            handler.name().to_string(),
            TableEntry {
                handler,
                context_keys,
            },
        );
    }
}

/// Result of a full load pass: the table plus the skills that were omitted.
pub struct LoadReport {
    pub table: CallableTable,
    pub errors: Vec<SkillLoadError>,
}

/// Compiles registry rows into a [`CallableTable`].
pub struct SkillLoader {
    engine: Arc<SkillEngine>,
}

impl SkillLoader {
    pub fn new(engine: Arc<SkillEngine>) -> Self {
        Self { engine }
    }

    /// Compile every skill; a failure is recorded and the skill omitted.
    pub fn load_all(&self, skills: &[Skill]) -> LoadReport {
        let mut table = CallableTable::default();
        let mut errors = Vec::new();

        for skill in skills {
            match self.engine.compile(&skill.name, &skill.implementation) {
                Ok(compiled) => {
                    table.insert(
                        Arc::new(SandboxedSkill {
                            engine: Arc::clone(&self.engine),
                            skill: compiled,
                        }),
                        skill.context_keys.clone(),
                    );
                }
                Err(message) => {
                    tracing::warn!(skill = %skill.name, %message, "skipping skill that failed to compile");
                    errors.push(SkillLoadError {
                        name: skill.name.clone(),
                        message,
                    });
                }
            }
        }

        tracing::info!(
            loaded = table.len(),
            skipped = errors.len(),
            "callable table built"
        );

        LoadReport { table, errors }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn skill_row(name: &str, implementation: &str) -> Skill {
        Skill {
            id: 0,
            name: name.to_string(),
            description: String::new(),
            parameters: "{}".to_string(),
            implementation: implementation.to_string(),
            context_keys: vec![],
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_one_bad_skill_does_not_abort_loading() {
        let loader = SkillLoader::new(Arc::new(SkillEngine::new()));
        let skills = vec![
            skill_row("good_a", "fn main(args, ctx) { \"a\" }"),
            skill_row("broken", "fn main(args ctx) {"),
            skill_row("good_b", "fn main(args, ctx) { \"b\" }"),
        ];

        let report = loader.load_all(&skills);

        assert_eq!(report.table.len(), 2);
        assert!(report.table.get("good_a").is_some());
        assert!(report.table.get("good_b").is_some());
        assert!(report.table.get("broken").is_none());
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].name, "broken");
    }

    #[tokio::test]
    async fn test_loaded_handler_is_invocable() {
        let loader = SkillLoader::new(Arc::new(SkillEngine::new()));
        let skills = vec![skill_row(
            "double",
            "fn main(args, ctx) { args[\"n\"] * 2 }",
        )];

        let report = loader.load_all(&skills);
        let entry = report.table.get("double").unwrap();
        let out = entry.handler.invoke(json!({"n": 21}), json!({})).await.unwrap();
        assert_eq!(out, json!(42));
    }
}
