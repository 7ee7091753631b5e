//! # Tool Catalog
//!
//! Converts registry rows into the declarative tool list advertised to the
//! remote assistant. A row with an unparsable parameter schema is advertised
//! with an empty-object schema instead of aborting catalog construction, and
//! the built-in capabilities of the remote service are always prepended.

use serde_json::{json, Value};

use crate::state::Skill;

/// The remote service's own sandboxed execution tool, always advertised.
pub const CODE_INTERPRETER: &str = "code_interpreter";

/// Schema descriptor for one function tool.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolSchema {
    /// Check decoded arguments against this schema: required properties must
    /// be present and declared primitive types must match. This mirrors what
    /// the remote service promises about emitted arguments, no more.
    pub fn validate_args(&self, args: &Value) -> Result<(), String> {
        let Some(fields) = args.as_object() else {
            return Err("arguments must be a JSON object".to_string());
        };

        if let Some(required) = self.parameters.get("required").and_then(Value::as_array) {
            for key in required.iter().filter_map(Value::as_str) {
                if !fields.contains_key(key) {
                    return Err(format!("missing required argument {key:?}"));
                }
            }
        }

        if let Some(props) = self.parameters.get("properties").and_then(Value::as_object) {
            for (key, value) in fields {
                let declared = props
                    .get(key)
                    .and_then(|p| p.get("type"))
                    .and_then(Value::as_str);
                let Some(declared) = declared else { continue };
                let matches = match declared {
                    "string" => value.is_string(),
                    "number" => value.is_number(),
                    "integer" => value.is_i64() || value.is_u64(),
                    "boolean" => value.is_boolean(),
                    "array" => value.is_array(),
                    "object" => value.is_object(),
                    _ => true,
                };
                if !matches {
                    return Err(format!("argument {key:?} should be of type {declared}"));
                }
            }
        }

        Ok(())
    }
}

/// One advertised tool: a built-in capability or a registry-backed function.
#[derive(Debug, Clone)]
pub enum ToolDescriptor {
    Builtin(&'static str),
    Function(ToolSchema),
}

/// The ordered tool list attached to an assistant at creation time.
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    tools: Vec<ToolDescriptor>,
}

impl ToolCatalog {
    /// Derive a catalog from registry rows, built-ins first.
    pub fn build(skills: &[Skill]) -> Self {
        let mut tools = vec![ToolDescriptor::Builtin(CODE_INTERPRETER)];

        for skill in skills {
            let parameters = match serde_json::from_str::<Value>(&skill.parameters) {
                Ok(value) if value.is_object() => value,
                Ok(_) => {
                    tracing::warn!(
                        skill = %skill.name,
                        "parameter schema is not an object; advertising an empty schema"
                    );
                    empty_object_schema()
                }
                Err(error) => {
                    tracing::warn!(
                        skill = %skill.name,
                        %error,
                        "unparsable parameter schema; advertising an empty schema"
                    );
                    empty_object_schema()
                }
            };

            tools.push(ToolDescriptor::Function(ToolSchema {
                name: skill.name.clone(),
                description: skill.description.clone(),
                parameters,
            }));
        }

        Self { tools }
    }

    /// Number of advertised tools, built-ins included.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn descriptors(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    /// Look up a function tool's schema for argument validation.
    pub fn function(&self, name: &str) -> Option<&ToolSchema> {
        self.tools.iter().find_map(|tool| match tool {
            ToolDescriptor::Function(schema) if schema.name == name => Some(schema),
            _ => None,
        })
    }

    /// Wire format expected by the assistants API.
    pub fn to_wire(&self) -> Vec<Value> {
        self.tools
            .iter()
            .map(|tool| match tool {
                ToolDescriptor::Builtin(kind) => json!({ "type": kind }),
                ToolDescriptor::Function(schema) => json!({
                    "type": "function",
                    "function": {
                        "name": schema.name.clone(),
                        "description": schema.description.clone(),
                        "parameters": schema.parameters.clone(),
                    }
                }),
            })
            .collect()
    }
}

/// The substitute schema for rows whose parameters cannot be parsed.
pub fn empty_object_schema() -> Value {
    json!({ "type": "object", "properties": {} })
}
