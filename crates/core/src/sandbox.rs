//! # Skill Sandbox
//!
//! Capability-restricted Rhai evaluation context for stored skill
//! implementations. Scripts get arithmetic, strings, arrays and maps -
//! nothing else. No module imports, no `eval`, no host I/O, and hard ceilings
//! on operations, recursion and value sizes, so a hostile or buggy skill can
//! neither reach process state nor pin the CPU.
//!
//! Every skill defines `fn main(args, ctx)` where `args` is the decoded tool
//! arguments and `ctx` the declared capability-context fields.

use rhai::module_resolvers::DummyModuleResolver;
use rhai::{Dynamic, Engine, Scope, AST};
use std::sync::Arc;

/// Entry function every skill implementation must define.
pub const ENTRY_POINT: &str = "main";

/// Ceilings applied to the evaluation context.
#[derive(Debug, Clone)]
pub struct SandboxLimits {
    pub max_operations: u64,
    pub max_expr_depth: usize,
    pub max_call_levels: usize,
    pub max_string_size: usize,
    pub max_collection_size: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            max_operations: 100_000,
            max_expr_depth: 64,
            max_call_levels: 32,
            max_string_size: 64 * 1024,
            max_collection_size: 10_000,
        }
    }
}

/// A skill implementation compiled for the restricted engine.
#[derive(Debug, Clone)]
pub struct CompiledSkill {
    pub name: String,
    ast: Arc<AST>,
}

/// The restricted evaluation engine shared by all skills.
pub struct SkillEngine {
    engine: Engine,
}

impl Default for SkillEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SkillEngine {
    pub fn new() -> Self {
        Self::with_limits(SandboxLimits::default())
    }

    pub fn with_limits(limits: SandboxLimits) -> Self {
        let mut engine = Engine::new();
        engine.set_max_operations(limits.max_operations);
        engine.set_max_expr_depths(limits.max_expr_depth, limits.max_expr_depth);
        engine.set_max_call_levels(limits.max_call_levels);
        engine.set_max_string_size(limits.max_string_size);
        engine.set_max_array_size(limits.max_collection_size);
        engine.set_max_map_size(limits.max_collection_size);
        // No imports, no textual eval: scripts only see what is registered.
        engine.set_module_resolver(DummyModuleResolver::new());
        engine.disable_symbol("eval");
        Self { engine }
    }

    /// Compile a skill source and check it defines `main(args, ctx)`.
    pub fn compile(&self, name: &str, source: &str) -> Result<CompiledSkill, String> {
        let ast = self
            .engine
            .compile(source)
            .map_err(|e| format!("parse error: {e}"))?;

        let has_entry = ast
            .iter_functions()
            .any(|f| f.name == ENTRY_POINT && f.params.len() == 2);
        if !has_entry {
            return Err(format!("missing entry function `{ENTRY_POINT}(args, ctx)`"));
        }

        Ok(CompiledSkill {
            name: name.to_string(),
            ast: Arc::new(ast),
        })
    }

    /// Run a compiled skill with decoded arguments and context fields.
    pub fn invoke(
        &self,
        skill: &CompiledSkill,
        args: serde_json::Value,
        ctx: serde_json::Value,
    ) -> Result<serde_json::Value, String> {
        let args: Dynamic =
            rhai::serde::to_dynamic(args).map_err(|e| format!("argument conversion: {e}"))?;
        let ctx: Dynamic =
            rhai::serde::to_dynamic(ctx).map_err(|e| format!("context conversion: {e}"))?;

        let mut scope = Scope::new();
        let out: Dynamic = self
            .engine
            .call_fn(&mut scope, &skill.ast, ENTRY_POINT, (args, ctx))
            .map_err(|e| e.to_string())?;

        rhai::serde::from_dynamic(&out).map_err(|e| format!("result conversion: {e}"))
    }
}
