//! Tool System
//!
//! Tools are registered on an agent with an explicit schema and invoked by
//! the tool-calling loop when the model asks for them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{AgentError, Result};
use crate::schema::{is_identifier, JsonType};

/// Tool call request from the LLM
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call ID, unique within one assistant turn
    #[serde(default)]
    pub id: String,

    /// Tool identifier
    pub name: String,

    /// Arguments as raw text, expected to be a JSON object
    #[serde(default)]
    pub arguments: String,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// Parameter definition for tool schema
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Parameter name
    pub name: String,

    /// Declared type
    #[serde(rename = "type")]
    pub param_type: JsonType,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Whether this parameter is required
    #[serde(default)]
    pub required: bool,

    /// Default value if not provided
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Enum of allowed values
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
}

impl ParameterSchema {
    /// A required parameter
    pub fn required(name: impl Into<String>, param_type: JsonType) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: String::new(),
            required: true,
            default: None,
            enum_values: None,
        }
    }

    /// An optional parameter
    pub fn optional(name: impl Into<String>, param_type: JsonType) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type)
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn one_of(mut self, values: Vec<Value>) -> Self {
        self.enum_values = Some(values);
        self
    }
}

/// Tool definition schema (for LLM function calling)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Unique tool identifier
    pub name: String,

    /// Human-readable description (shown to LLM)
    pub description: String,

    /// Parameter definitions
    pub parameters: Vec<ParameterSchema>,
}

impl ToolSchema {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Vec<ParameterSchema>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// JSON Schema object describing the arguments
    pub fn parameters_json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();

        for param in &self.parameters {
            let mut prop = param.param_type.to_json_schema();
            if let Some(obj) = prop.as_object_mut() {
                if !param.description.is_empty() {
                    obj.insert("description".into(), Value::String(param.description.clone()));
                }
                if let Some(default) = &param.default {
                    obj.insert("default".into(), default.clone());
                }
                if let Some(values) = &param.enum_values {
                    obj.insert("enum".into(), Value::Array(values.clone()));
                }
            }
            properties.insert(param.name.clone(), prop);
            if param.required {
                required.push(Value::String(param.name.clone()));
            }
        }

        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Reject schemas that cannot be expressed as JSON Schema
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(AgentError::Registration(format!("{}: {msg}", self.name)));

        if !is_identifier(&self.name) {
            return fail("tool name must be an identifier".into());
        }

        let mut seen = std::collections::HashSet::new();
        for param in &self.parameters {
            if !is_identifier(&param.name) {
                return fail(format!("'{}' is not a valid parameter name", param.name));
            }
            if !seen.insert(param.name.as_str()) {
                return fail(format!("parameter '{}' declared twice", param.name));
            }
            if let Err(e) = param.param_type.check_declaration() {
                return fail(format!("parameter '{}': {e}", param.name));
            }
            if let Some(default) = &param.default {
                if let Err(e) = param.param_type.validate(default) {
                    return fail(format!("default for '{}' has wrong type ({e})", param.name));
                }
            }
            for value in param.enum_values.iter().flatten() {
                if let Err(e) = param.param_type.validate(value) {
                    return fail(format!("enum value for '{}' has wrong type ({e})", param.name));
                }
            }
        }

        Ok(())
    }

    /// Apply defaults and check arguments against the declared parameters
    pub fn prepare_arguments(&self, mut args: Map<String, Value>) -> Result<Map<String, Value>> {
        for param in &self.parameters {
            match args.get(&param.name) {
                None | Some(Value::Null) => {
                    if let Some(default) = &param.default {
                        args.insert(param.name.clone(), default.clone());
                    } else if param.required {
                        return Err(AgentError::ArgumentParse(format!(
                            "missing required parameter '{}'",
                            param.name
                        )));
                    }
                }
                Some(value) => {
                    param.param_type.validate(value).map_err(|e| {
                        AgentError::ArgumentParse(format!(
                            "parameter '{}': {}",
                            param.name,
                            e.trim_start_matches("$: ")
                        ))
                    })?;
                    if let Some(allowed) = &param.enum_values {
                        if !allowed.contains(value) {
                            return Err(AgentError::ArgumentParse(format!(
                                "parameter '{}' must be one of {}",
                                param.name,
                                Value::Array(allowed.clone())
                            )));
                        }
                    }
                }
            }
        }
        Ok(args)
    }
}

/// Tool trait - implement to add new capabilities
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool's schema for LLM function calling
    fn schema(&self) -> ToolSchema;

    /// Execute the tool with validated arguments
    async fn execute(&self, arguments: Map<String, Value>) -> anyhow::Result<Value>;
}

type Handler = dyn Fn(&Map<String, Value>) -> anyhow::Result<Value> + Send + Sync;

/// A tool backed by a plain function and an explicitly declared schema
pub struct FunctionTool {
    schema: ToolSchema,
    handler: Box<Handler>,
}

impl FunctionTool {
    pub fn new<F>(schema: ToolSchema, handler: F) -> Self
    where
        F: Fn(&Map<String, Value>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self {
            schema,
            handler: Box::new(handler),
        }
    }
}

#[async_trait]
impl Tool for FunctionTool {
    fn schema(&self) -> ToolSchema {
        self.schema.clone()
    }

    async fn execute(&self, arguments: Map<String, Value>) -> anyhow::Result<Value> {
        (self.handler)(&arguments)
    }
}

/// Registry for available tools
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A tool already registered under the same name is replaced.
    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> Result<()> {
        self.register_shared(Arc::new(tool))
    }

    /// Register a shared tool
    pub fn register_shared(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let schema = tool.schema();
        schema.validate()?;
        if self.tools.insert(schema.name.clone(), tool).is_some() {
            tracing::debug!(tool = %schema.name, "Replacing previously registered tool");
        }
        Ok(())
    }

    /// Register a plain function under an explicit schema
    pub fn register_fn<F>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Vec<ParameterSchema>,
        handler: F,
    ) -> Result<()>
    where
        F: Fn(&Map<String, Value>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let schema = ToolSchema::new(name, description, parameters);
        self.register(FunctionTool::new(schema, handler))
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Parse, validate and run a tool, serializing its return value to text
    pub async fn invoke(&self, name: &str, arguments_text: &str) -> Result<String> {
        let tool = self
            .get(name)
            .ok_or_else(|| AgentError::ToolNotFound(name.to_string()))?;

        let args = parse_arguments(arguments_text)?;
        let args = tool.schema().prepare_arguments(args)?;

        let value = tool
            .execute(args)
            .await
            .map_err(|e| AgentError::ToolExecution(format!("{e:#}")))?;

        Ok(render_output(value))
    }

    /// Run a tool call, turning any failure into text for the model
    pub async fn invoke_call(&self, call: &ToolCall) -> std::result::Result<String, String> {
        self.invoke(&call.name, &call.arguments)
            .await
            .map_err(|e| format!("Error: {e}"))
    }

    /// All tool schemas, sorted by name
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<_> = self.tools.values().map(|t| t.schema()).collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Get tool names
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry").field("tools", &self.names()).finish()
    }
}

fn parse_arguments(text: &str) -> Result<Map<String, Value>> {
    if text.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(Value::Null) => Ok(Map::new()),
        Ok(other) => Err(AgentError::ArgumentParse(format!(
            "expected a JSON object, got {other}"
        ))),
        Err(e) => Err(AgentError::ArgumentParse(format!("{e}: {text}"))),
    }
}

fn render_output(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}
