//! Tool schema helpers
//!
//! Builds the JSON schemas tools report through `input_schema`.

use serde_json::{json, Map, Value as JsonValue};

/// Fluent builder for an object schema
///
/// # Example
/// ```ignore
/// let schema = SchemaBuilder::object()
///     .string("task", "What to do", true)
///     .integer_range("timeout", "Seconds", 5, 300, false)
///     .build();
/// ```
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    properties: Map<String, JsonValue>,
    required: Vec<String>,
}

impl SchemaBuilder {
    pub fn object() -> Self {
        Self::default()
    }

    /// Add an arbitrary property schema
    pub fn property(mut self, name: &str, schema: JsonValue, required: bool) -> Self {
        self.properties.insert(name.to_string(), schema);
        if required {
            self.required.push(name.to_string());
        }
        self
    }

    pub fn string(self, name: &str, description: &str, required: bool) -> Self {
        self.property(
            name,
            json!({"type": "string", "description": description}),
            required,
        )
    }

    pub fn boolean(self, name: &str, description: &str, required: bool) -> Self {
        self.property(
            name,
            json!({"type": "boolean", "description": description}),
            required,
        )
    }

    pub fn integer_range(
        self,
        name: &str,
        description: &str,
        minimum: i64,
        maximum: i64,
        required: bool,
    ) -> Self {
        self.property(
            name,
            json!({
                "type": "integer",
                "description": description,
                "minimum": minimum,
                "maximum": maximum
            }),
            required,
        )
    }

    pub fn string_enum(self, name: &str, description: &str, values: &[&str], required: bool) -> Self {
        self.property(
            name,
            json!({"type": "string", "description": description, "enum": values}),
            required,
        )
    }

    /// Array property whose items follow `items`
    pub fn array(
        self,
        name: &str,
        description: &str,
        items: JsonValue,
        min_items: usize,
        max_items: usize,
        required: bool,
    ) -> Self {
        self.property(
            name,
            json!({
                "type": "array",
                "description": description,
                "items": items,
                "minItems": min_items,
                "maxItems": max_items
            }),
            required,
        )
    }

    pub fn build(self) -> JsonValue {
        json!({
            "type": "object",
            "properties": self.properties,
            "required": self.required
        })
    }
}
