//! JSON Schema Model
//!
//! A closed set of JSON-representable types. Tool parameters and structured
//! replies are both declared with it, rendered to JSON Schema for the model,
//! and checked against it when values come back.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// A JSON-representable type
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum JsonType {
    String,
    Integer,
    Number,
    Boolean,
    Array { items: Box<JsonType> },
    Object { fields: Vec<Field> },
    /// Anything goes
    Any,
}

/// A named member of an object type
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "schema")]
    pub ty: JsonType,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl Field {
    /// A required field
    pub fn required(name: impl Into<String>, ty: JsonType) -> Self {
        Self {
            name: name.into(),
            ty,
            description: None,
            required: true,
        }
    }

    /// An optional field
    pub fn optional(name: impl Into<String>, ty: JsonType) -> Self {
        Self {
            required: false,
            ..Self::required(name, ty)
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl JsonType {
    pub fn array(items: JsonType) -> Self {
        JsonType::Array {
            items: Box::new(items),
        }
    }

    pub fn object(fields: Vec<Field>) -> Self {
        JsonType::Object { fields }
    }

    /// JSON Schema type keyword
    pub fn type_name(&self) -> &'static str {
        match self {
            JsonType::String => "string",
            JsonType::Integer => "integer",
            JsonType::Number => "number",
            JsonType::Boolean => "boolean",
            JsonType::Array { .. } => "array",
            JsonType::Object { .. } => "object",
            JsonType::Any => "any",
        }
    }

    /// Parse a primitive type name, accepting JSON Schema and common
    /// programming-language spellings (`int`, `str`, `float`, `bool`, ...)
    pub fn from_name(name: &str) -> Option<Self> {
        let ty = match name.trim().to_ascii_lowercase().as_str() {
            "string" | "str" | "text" => JsonType::String,
            "integer" | "int" | "i64" | "u64" => JsonType::Integer,
            "number" | "float" | "double" | "f64" => JsonType::Number,
            "boolean" | "bool" => JsonType::Boolean,
            "array" | "list" => JsonType::array(JsonType::Any),
            "object" | "dict" | "map" => JsonType::object(Vec::new()),
            "any" => JsonType::Any,
            _ => return None,
        };
        Some(ty)
    }

    /// Render as a JSON Schema fragment
    pub fn to_json_schema(&self) -> Value {
        match self {
            JsonType::Any => json!({}),
            JsonType::Array { items } => json!({
                "type": "array",
                "items": items.to_json_schema(),
            }),
            JsonType::Object { fields } => {
                let mut properties = Map::new();
                let mut required = Vec::new();
                for field in fields {
                    let mut prop = field.ty.to_json_schema();
                    if let (Some(desc), Some(obj)) = (&field.description, prop.as_object_mut()) {
                        obj.insert("description".into(), Value::String(desc.clone()));
                    }
                    properties.insert(field.name.clone(), prop);
                    if field.required {
                        required.push(Value::String(field.name.clone()));
                    }
                }
                json!({
                    "type": "object",
                    "properties": properties,
                    "required": required,
                })
            }
            other => json!({ "type": other.type_name() }),
        }
    }

    /// Check a value against this type. The error names the offending path.
    pub fn validate(&self, value: &Value) -> Result<(), String> {
        self.validate_at(value, "$")
    }

    fn validate_at(&self, value: &Value, path: &str) -> Result<(), String> {
        let ok = match self {
            JsonType::Any => true,
            JsonType::String => value.is_string(),
            JsonType::Boolean => value.is_boolean(),
            JsonType::Number => value.is_number(),
            JsonType::Integer => value.is_i64() || value.is_u64(),
            JsonType::Array { items } => {
                let Some(elements) = value.as_array() else {
                    return Err(mismatch(path, self, value));
                };
                for (i, element) in elements.iter().enumerate() {
                    items.validate_at(element, &format!("{path}[{i}]"))?;
                }
                true
            }
            JsonType::Object { fields } => {
                let Some(obj) = value.as_object() else {
                    return Err(mismatch(path, self, value));
                };
                for field in fields {
                    match obj.get(&field.name) {
                        None | Some(Value::Null) if field.required => {
                            return Err(format!("{path}.{}: missing required field", field.name));
                        }
                        None | Some(Value::Null) => {}
                        Some(v) => field.ty.validate_at(v, &format!("{path}.{}", field.name))?,
                    }
                }
                true
            }
        };

        if ok {
            Ok(())
        } else {
            Err(mismatch(path, self, value))
        }
    }

    /// Check that the declaration itself is well formed (field names are
    /// identifiers and unique within each object).
    pub fn check_declaration(&self) -> Result<(), String> {
        match self {
            JsonType::Array { items } => items.check_declaration(),
            JsonType::Object { fields } => {
                let mut seen = std::collections::HashSet::new();
                for field in fields {
                    if !is_identifier(&field.name) {
                        return Err(format!("'{}' is not a valid field name", field.name));
                    }
                    if !seen.insert(field.name.as_str()) {
                        return Err(format!("field '{}' declared twice", field.name));
                    }
                    field.ty.check_declaration()?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

fn mismatch(path: &str, expected: &JsonType, actual: &Value) -> String {
    let found = match actual {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    format!("{path}: expected {}, found {found}", expected.type_name())
}

/// ASCII identifier: letter or underscore, then letters, digits, `_` or `-`
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn movie() -> JsonType {
        JsonType::object(vec![
            Field::required("title", JsonType::String),
            Field::required("year", JsonType::Integer),
            Field::optional("rating", JsonType::Number),
        ])
    }

    #[test]
    fn test_object_schema_rendering() {
        let schema = movie().to_json_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["year"]["type"], "integer");
        assert_eq!(schema["required"], json!(["title", "year"]));
    }

    #[test]
    fn test_validate_reports_path() {
        let err = movie()
            .validate(&json!({"title": "Her", "year": "twenty thirteen"}))
            .unwrap_err();
        assert!(err.contains("$.year"), "{err}");
        assert!(err.contains("expected integer"), "{err}");
    }

    #[test]
    fn test_validate_numbers() {
        assert!(JsonType::Number.validate(&json!(3)).is_ok());
        assert!(JsonType::Integer.validate(&json!(3.5)).is_err());
        assert!(movie().validate(&json!({"title": "Her", "year": 2013, "extra": true})).is_ok());
    }

    #[test]
    fn test_nested_array_validation() {
        let steps = JsonType::array(JsonType::String);
        assert!(steps.validate(&json!(["a", "b"])).is_ok());
        let err = steps.validate(&json!(["a", 2])).unwrap_err();
        assert!(err.starts_with("$[1]"), "{err}");
    }

    #[test]
    fn test_type_names() {
        assert_eq!(JsonType::from_name("int"), Some(JsonType::Integer));
        assert_eq!(JsonType::from_name("str"), Some(JsonType::String));
        assert_eq!(JsonType::from_name("complex"), None);
    }

    #[test]
    fn test_declaration_rejects_duplicates() {
        let ty = JsonType::object(vec![
            Field::required("a", JsonType::String),
            Field::required("a", JsonType::Integer),
        ]);
        assert!(ty.check_declaration().is_err());
        assert!(!is_identifier("9lives"));
        assert!(is_identifier("get_user_info"));
    }
}
