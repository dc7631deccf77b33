//! Structured Output
//!
//! Coerces a model's final text into a value validated against a
//! caller-supplied schema.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AgentError, Result};
use crate::schema::JsonType;

/// Schema a structured reply must satisfy
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutputSchema {
    /// Name shown to the model
    pub name: String,
    /// Expected shape of the reply
    pub root: JsonType,
}

impl OutputSchema {
    pub fn new(name: impl Into<String>, root: JsonType) -> Self {
        Self {
            name: name.into(),
            root,
        }
    }

    /// A JSON array of strings
    pub fn string_list(name: impl Into<String>) -> Self {
        Self::new(name, JsonType::array(JsonType::String))
    }

    /// Whether the reply is a JSON object (providers can enable JSON mode)
    pub fn expects_object(&self) -> bool {
        matches!(self.root, JsonType::Object { .. })
    }

    pub fn to_json_schema(&self) -> Value {
        let mut schema = self.root.to_json_schema();
        if let Some(obj) = schema.as_object_mut() {
            obj.insert("title".into(), Value::String(self.name.clone()));
        }
        schema
    }
}

/// Types that can describe their own output schema
pub trait StructuredOutput {
    fn output_schema() -> OutputSchema;
}

/// Strip a surrounding markdown code fence, if any.
///
/// Returns the trimmed input when there is no fence.
pub fn strip_markdown_fence(content: &str) -> &str {
    let content = content.trim();
    if !content.starts_with("```") {
        return content;
    }
    let Some(first_newline) = content.find('\n') else {
        return content;
    };
    match content.rfind("```") {
        Some(closing) if closing > first_newline => content[first_newline + 1..closing].trim(),
        _ => content,
    }
}

/// Parses and validates structured replies against one schema
#[derive(Clone, Debug)]
pub struct StructuredOutputParser {
    schema: OutputSchema,
}

impl StructuredOutputParser {
    pub fn new(schema: OutputSchema) -> Self {
        Self { schema }
    }

    /// Parser for a statically typed target
    pub fn for_type<T: StructuredOutput>() -> Self {
        Self::new(T::output_schema())
    }

    pub fn schema(&self) -> &OutputSchema {
        &self.schema
    }

    /// Instruction appended to the prompt when a structured reply is requested
    pub fn format_instruction(&self) -> String {
        let shape = if self.schema.expects_object() {
            "a single JSON object"
        } else {
            "a single JSON value"
        };
        format!(
            "Return {shape} matching this schema ({}): {}\n\
             Reply with the JSON content only. NEVER wrap it in markdown or code fences.",
            self.schema.name,
            self.schema.to_json_schema()
        )
    }

    /// Strip, parse and validate. Errors carry the original text.
    pub fn parse_value(&self, raw: &str) -> Result<Value> {
        let body = strip_markdown_fence(raw);
        let value: Value = serde_json::from_str(body)
            .map_err(|e| failure(raw, format!("reply is not valid JSON: {e}")))?;
        self.schema
            .root
            .validate(&value)
            .map_err(|reason| failure(raw, reason))?;
        Ok(value)
    }

    /// Parse into a typed value
    pub fn parse<T: DeserializeOwned>(&self, raw: &str) -> Result<T> {
        let value = self.parse_value(raw)?;
        serde_json::from_value(value).map_err(|e| failure(raw, e.to_string()))
    }
}

fn failure(raw: &str, reason: String) -> AgentError {
    AgentError::StructuredOutput {
        raw: raw.to_string(),
        reason,
    }
}
