//! Default skill rows inserted into an empty registry.

/// One seedable skill row.
pub struct SeedSkill {
    pub name: &'static str,
    pub description: &'static str,
    /// Parameter schema as JSON text, exactly as stored.
    pub parameters: &'static str,
    /// Sandboxed script source. Entry point is `main(args, ctx)`.
    pub implementation: &'static str,
    /// Declared capability-context keys as JSON text.
    pub context_keys: &'static str,
}

/// The demo weather skill every fresh registry starts with.
pub fn default_skills() -> Vec<SeedSkill> {
    vec![SeedSkill {
        name: "get_current_weather",
        description: "Get the current weather in a given location",
        parameters: r#"{
    "type": "object",
    "properties": {
        "location": {
            "type": "string",
            "description": "The city and state, e.g. San Francisco, CA"
        },
        "unit": {
            "type": "string",
            "enum": ["celsius", "fahrenheit"]
        }
    },
    "required": ["location"]
}"#,
        implementation: r#"fn main(args, ctx) {
    let location = args["location"];
    let place = location.to_lower();
    if place.contains("tokyo") {
        #{ location: "Tokyo", temperature: "10", unit: "celsius" }
    } else if place.contains("san francisco") {
        #{ location: "San Francisco", temperature: "72", unit: "fahrenheit" }
    } else if place.contains("paris") {
        #{ location: "Paris", temperature: "22", unit: "celsius" }
    } else {
        #{ location: location, temperature: "unknown" }
    }
}"#,
        context_keys: "[]",
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_parameters_are_valid_json() {
        for seed in default_skills() {
            let parsed: serde_json::Value = serde_json::from_str(seed.parameters).unwrap();
            assert!(parsed.is_object(), "{} parameters must be an object", seed.name);
            let keys: serde_json::Value = serde_json::from_str(seed.context_keys).unwrap();
            assert!(keys.is_array(), "{} context_keys must be an array", seed.name);
        }
    }
}
