//! Tool-Calling Loop
//!
//! The agent sends the conversation to the provider, executes any tool
//! calls in the reply, appends the results and asks again until the model
//! answers without tools.
//!
//! ```text
//!              ┌──────────────────────┐
//!      ┌──────▶│    AwaitingModel     │──── iterations == max ──▶ MaxIterations
//!      │       └──────────┬───────────┘
//!      │          reply   │
//!      │      ┌───────────┴────────────┐
//!      │      ▼                        ▼
//!  ┌───┴──────────────┐      ┌──────────────────┐
//!  │   HasToolCalls   │      │  HasFinalAnswer  │ (terminal)
//!  └──────────────────┘      └──────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{AgentError, Result};
use crate::message::{Conversation, Message};
use crate::provider::{default_temperature, GenerationOptions, LlmProvider};
use crate::structured::{OutputSchema, StructuredOutput, StructuredOutputParser};
use crate::tool::{ParameterSchema, Tool, ToolCall, ToolRegistry, ToolSchema};

/// Agent configuration
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// Model identifier passed to the provider
    pub model: String,

    /// Role label folded into the system message (e.g. "researcher")
    pub role: Option<String>,

    /// System prompt
    pub system_prompt: Option<String>,

    /// Maximum provider calls per run
    pub max_iterations: usize,

    /// Default sampling temperature
    pub temperature: f32,

    /// Deadline for a single provider call
    pub call_timeout: Option<Duration>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4".into(),
            role: None,
            system_prompt: None,
            max_iterations: 10,
            temperature: default_temperature(),
            call_timeout: None,
        }
    }
}

/// Per-run overrides
#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    /// Sampling temperature (agent default when unset)
    pub temperature: Option<f32>,

    /// Maximum tokens per reply
    pub max_tokens: Option<u32>,

    /// Requested shape of the final answer
    pub response_format: Option<OutputSchema>,

    /// Provider call budget (agent default when unset)
    pub max_iterations: Option<usize>,
}

impl RunOptions {
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = Some(max);
        self
    }

    pub fn response_format(mut self, schema: OutputSchema) -> Self {
        self.response_format = Some(schema);
        self
    }
}

/// Outcome of a completed run
#[derive(Clone, Debug)]
pub struct AgentRun {
    /// Final answer text
    pub answer: String,

    /// Validated structured answer, when a response format was requested
    pub structured: Option<Value>,

    /// Full conversation, including tool traffic
    pub conversation: Conversation,

    /// Provider calls made
    pub iterations: usize,
}

enum LoopState {
    AwaitingModel,
    HasToolCalls(Vec<ToolCall>),
    HasFinalAnswer(String),
}

/// The main Agent struct
pub struct Agent {
    provider: Arc<dyn LlmProvider>,
    tools: ToolRegistry,
    config: AgentConfig,
}

impl Agent {
    /// Create a new agent
    pub fn new(provider: Arc<dyn LlmProvider>, tools: ToolRegistry, config: AgentConfig) -> Self {
        Self {
            provider,
            tools,
            config,
        }
    }

    /// Create with default configuration and no tools
    pub fn with_defaults(provider: Arc<dyn LlmProvider>) -> Self {
        Self::new(provider, ToolRegistry::new(), AgentConfig::default())
    }

    pub fn builder() -> AgentBuilder {
        AgentBuilder::new()
    }

    /// Register a tool implementation
    pub fn register_tool<T: Tool + 'static>(&mut self, tool: T) -> Result<&mut Self> {
        self.tools.register(tool)?;
        Ok(self)
    }

    /// Register a function as a tool under an explicit schema
    pub fn tool<F>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Vec<ParameterSchema>,
        handler: F,
    ) -> Result<&mut Self>
    where
        F: Fn(&Map<String, Value>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.tools.register_fn(name, description, parameters, handler)?;
        Ok(self)
    }

    /// System message for a run, with the role label folded in
    pub fn system_message(&self) -> Option<String> {
        match (&self.config.role, &self.config.system_prompt) {
            (Some(role), Some(prompt)) => Some(format!("You are a {role}.\n\n{prompt}")),
            (Some(role), None) => Some(format!("You are a {role}.")),
            (None, Some(prompt)) => Some(prompt.clone()),
            (None, None) => None,
        }
    }

    /// Run the agent and return the final answer text
    pub async fn run(&self, prompt: &str, options: RunOptions) -> Result<String> {
        Ok(self.run_detailed(prompt, options).await?.answer)
    }

    /// Run with a response format and return the validated JSON value
    pub async fn run_with_schema(
        &self,
        prompt: &str,
        schema: OutputSchema,
        options: RunOptions,
    ) -> Result<Value> {
        let run = self
            .run_detailed(prompt, options.response_format(schema))
            .await?;
        run.structured
            .ok_or_else(|| AgentError::Other("structured run produced no value".into()))
    }

    /// Run and deserialize the final answer into `T`
    pub async fn run_structured<T>(&self, prompt: &str, options: RunOptions) -> Result<T>
    where
        T: StructuredOutput + DeserializeOwned,
    {
        let schema = T::output_schema();
        let parser = StructuredOutputParser::new(schema.clone());
        let run = self
            .run_detailed(prompt, options.response_format(schema))
            .await?;
        parser.parse(&run.answer)
    }

    /// Run the agent and keep the whole conversation
    pub async fn run_detailed(&self, prompt: &str, options: RunOptions) -> Result<AgentRun> {
        let parser = options.response_format.clone().map(StructuredOutputParser::new);
        let max_iterations = options.max_iterations.unwrap_or(self.config.max_iterations);
        if max_iterations == 0 {
            return Err(AgentError::Config("max_iterations must be at least 1".into()));
        }
        let generation = GenerationOptions {
            model: self.config.model.clone(),
            temperature: options.temperature.unwrap_or(self.config.temperature),
            max_tokens: options.max_tokens,
            response_format: options.response_format,
        };

        let mut conversation = match self.system_message() {
            Some(system) => Conversation::with_system_prompt(system),
            None => Conversation::new(),
        };
        let user_prompt = match &parser {
            Some(parser) => format!("{prompt}\n\n{}", parser.format_instruction()),
            None => prompt.to_string(),
        };
        conversation.push(Message::user(user_prompt));

        let schemas = self.tools.schemas();
        let mut iterations = 0;
        let mut state = LoopState::AwaitingModel;

        let answer = loop {
            state = match state {
                LoopState::AwaitingModel => {
                    if iterations >= max_iterations {
                        tracing::warn!(
                            model = %self.config.model,
                            max_iterations,
                            "Model kept requesting tools; giving up"
                        );
                        return Err(AgentError::MaxIterations(max_iterations));
                    }
                    iterations += 1;
                    tracing::debug!(
                        iteration = iterations,
                        messages = conversation.len(),
                        "Calling provider"
                    );

                    conversation.verify_tool_pairing()?;
                    let mut reply = self
                        .call_provider(conversation.messages(), &schemas, &generation)
                        .await?;
                    assign_missing_call_ids(&mut reply);

                    let next = if reply.has_tool_calls() {
                        LoopState::HasToolCalls(reply.calls().to_vec())
                    } else {
                        LoopState::HasFinalAnswer(reply.content.clone())
                    };
                    conversation.push(reply);
                    next
                }
                LoopState::HasToolCalls(calls) => {
                    for call in &calls {
                        let content = self.execute_tool(call).await;
                        conversation.push(Message::tool(content, call.id.clone()).with_name(&call.name));
                    }
                    LoopState::AwaitingModel
                }
                LoopState::HasFinalAnswer(answer) => break answer,
            };
        };

        let structured = match &parser {
            Some(parser) => Some(parser.parse_value(&answer)?),
            None => None,
        };

        Ok(AgentRun {
            answer,
            structured,
            conversation,
            iterations,
        })
    }

    async fn call_provider(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &GenerationOptions,
    ) -> Result<Message> {
        let request = self.provider.generate(messages, tools, options);
        match self.config.call_timeout {
            Some(limit) => tokio::time::timeout(limit, request).await.map_err(|_| {
                AgentError::ProviderTimeout(format!(
                    "{} did not answer within {limit:?}",
                    self.provider.name()
                ))
            })?,
            None => request.await,
        }
    }

    /// Execute a tool call; failures become text the model can read
    async fn execute_tool(&self, call: &ToolCall) -> String {
        tracing::debug!(tool = %call.name, call_id = %call.id, "Executing tool");
        match self.tools.invoke_call(call).await {
            Ok(output) => output,
            Err(error) => {
                tracing::warn!(tool = %call.name, call_id = %call.id, %error, "Tool call failed");
                error
            }
        }
    }

    /// Blocking variant of [`Agent::run`]. Must not be called from async code.
    pub fn run_blocking(&self, prompt: &str, options: RunOptions) -> Result<String> {
        crate::blocking::block_on(self.run(prompt, options))
    }

    /// Blocking variant of [`Agent::run_structured`]
    pub fn run_structured_blocking<T>(&self, prompt: &str, options: RunOptions) -> Result<T>
    where
        T: StructuredOutput + DeserializeOwned,
    {
        crate::blocking::block_on(self.run_structured(prompt, options))
    }

    /// Get the tool registry
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Get configuration
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Role label, if any
    pub fn role(&self) -> Option<&str> {
        self.config.role.as_deref()
    }

    pub(crate) fn set_role(&mut self, role: impl Into<String>) {
        self.config.role = Some(role.into());
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }
}

fn assign_missing_call_ids(reply: &mut Message) {
    if let Some(calls) = reply.tool_calls.as_mut() {
        for call in calls.iter_mut().filter(|c| c.id.is_empty()) {
            call.id = format!("call_{}", uuid::Uuid::new_v4().simple());
        }
    }
}

/// Builder for Agent configuration
pub struct AgentBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    tools: ToolRegistry,
    config: AgentConfig,
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            tools: ToolRegistry::new(),
            config: AgentConfig::default(),
        }
    }

    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.config.role = Some(role.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn temperature(mut self, temp: f32) -> Self {
        self.config.temperature = temp;
        self
    }

    pub fn max_iterations(mut self, max: usize) -> Self {
        self.config.max_iterations = max;
        self
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<Agent> {
        let provider = self
            .provider
            .ok_or_else(|| AgentError::Config("Provider is required".into()))?;
        if self.config.max_iterations == 0 {
            return Err(AgentError::Config("max_iterations must be at least 1".into()));
        }

        Ok(Agent::new(provider, self.tools, self.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;
    use crate::mock::ScriptedProvider;
    use crate::schema::{Field, JsonType};
    use serde::Deserialize;
    use serde_json::json;

    fn agent_with(provider: Arc<ScriptedProvider>) -> Agent {
        let mut agent = Agent::builder().provider(provider).build().unwrap();
        agent
            .tool(
                "get_user_info",
                "Get user information by ID",
                vec![ParameterSchema::required("user_id", JsonType::Integer)],
                |args| match args["user_id"].as_i64() {
                    Some(1) => Ok(json!({"name": "Alice", "city": "New York"})),
                    _ => Ok(json!({"error": "User not found"})),
                },
            )
            .unwrap();
        agent
    }

    fn tool_turn(calls: Vec<ToolCall>) -> Message {
        Message::assistant_tool_calls("", calls)
    }

    #[tokio::test]
    async fn test_plain_answer() {
        let provider = Arc::new(ScriptedProvider::new(vec![Message::assistant("8")]));
        let agent = agent_with(provider.clone());

        let answer = agent.run("What is 5 + 3?", RunOptions::default()).await.unwrap();
        assert_eq!(answer, "8");
        assert_eq!(provider.call_count(), 1);
        assert_eq!(provider.calls()[0].tool_names, vec!["get_user_info"]);
    }

    #[tokio::test]
    async fn test_single_tool_call_round_trip() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_turn(vec![ToolCall::new("call_1", "get_user_info", r#"{"user_id":1}"#)]),
            Message::assistant("Alice lives in New York."),
        ]));
        let agent = agent_with(provider.clone());

        let run = agent
            .run_detailed("Where does user 1 live?", RunOptions::default())
            .await
            .unwrap();

        assert_eq!(run.answer, "Alice lives in New York.");
        assert_eq!(provider.call_count(), 2);

        let tool_messages: Vec<_> = run.conversation.by_role(Role::Tool).collect();
        assert_eq!(tool_messages.len(), 1);
        assert_eq!(tool_messages[0].tool_call_id.as_deref(), Some("call_1"));
        let value: Value = serde_json::from_str(&tool_messages[0].content).unwrap();
        assert_eq!(value, json!({"name": "Alice", "city": "New York"}));

        // the second provider call saw the tool result as its last message
        let second = &provider.calls()[1];
        assert_eq!(second.messages.last().unwrap().role, Role::Tool);
        assert!(run.conversation.verify_tool_pairing().is_ok());
    }

    #[tokio::test]
    async fn test_tool_results_follow_call_order() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_turn(vec![
                ToolCall::new("a", "get_user_info", r#"{"user_id":1}"#),
                ToolCall::new("b", "missing_tool", "{}"),
                ToolCall::new("c", "get_user_info", "not json"),
            ]),
            Message::assistant("done"),
        ]));
        let agent = agent_with(provider.clone());

        let run = agent.run_detailed("go", RunOptions::default()).await.unwrap();
        let tool_messages: Vec<_> = run.conversation.by_role(Role::Tool).collect();

        let ids: Vec<_> = tool_messages.iter().map(|m| m.tool_call_id.as_deref().unwrap()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(tool_messages[1].content.starts_with("Error: Tool not found"));
        assert!(tool_messages[2].content.starts_with("Error: Invalid tool arguments"));
        assert_eq!(run.iterations, 2);
    }

    #[tokio::test]
    async fn test_max_iterations_stops_after_exact_budget() {
        let provider = Arc::new(ScriptedProvider::repeating(tool_turn(vec![ToolCall::new(
            "loop",
            "get_user_info",
            r#"{"user_id":2}"#,
        )])));
        let agent = agent_with(provider.clone());

        let err = agent
            .run("spin", RunOptions::default().max_iterations(3))
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::MaxIterations(3)));
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn test_missing_call_ids_are_generated() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_turn(vec![ToolCall::new("", "get_user_info", r#"{"user_id":1}"#)]),
            Message::assistant("ok"),
        ]));
        let agent = agent_with(provider);

        let run = agent.run_detailed("go", RunOptions::default()).await.unwrap();
        let tool = run.conversation.by_role(Role::Tool).next().unwrap();
        assert!(tool.tool_call_id.as_deref().unwrap().starts_with("call_"));
        assert!(run.conversation.verify_tool_pairing().is_ok());
    }

    #[tokio::test]
    async fn test_provider_errors_propagate() {
        let provider = Arc::new(ScriptedProvider::default());
        provider.push_error(AgentError::ProviderHttp {
            status: 500,
            body: "boom".into(),
        });
        let agent = agent_with(provider);

        let err = agent.run("hi", RunOptions::default()).await.unwrap_err();
        assert!(matches!(err, AgentError::ProviderHttp { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_role_is_folded_into_system_message() {
        let provider = Arc::new(ScriptedProvider::new(vec![Message::assistant("ok")]));
        let agent = Agent::builder()
            .provider(provider.clone())
            .role("researcher")
            .system_prompt("Cite sources.")
            .build()
            .unwrap();

        agent.run("hi", RunOptions::default()).await.unwrap();
        let first = &provider.calls()[0].messages[0];
        assert_eq!(first.role, Role::System);
        assert_eq!(first.content, "You are a researcher.\n\nCite sources.");
    }

    #[derive(Debug, Deserialize)]
    struct Movie {
        title: String,
        year: i64,
    }

    impl StructuredOutput for Movie {
        fn output_schema() -> OutputSchema {
            OutputSchema::new(
                "MovieRecommendation",
                JsonType::object(vec![
                    Field::required("title", JsonType::String),
                    Field::required("year", JsonType::Integer),
                ]),
            )
        }
    }

    #[tokio::test]
    async fn test_structured_run() {
        let provider = Arc::new(ScriptedProvider::new(vec![Message::assistant(
            "```json\n{\"title\": \"Ex Machina\", \"year\": 2014}\n```",
        )]));
        let agent = agent_with(provider.clone());

        let movie: Movie = agent
            .run_structured("Recommend a sci-fi movie", RunOptions::default())
            .await
            .unwrap();
        assert_eq!(movie.title, "Ex Machina");
        assert_eq!(movie.year, 2014);

        let call = &provider.calls()[0];
        let prompt = &call.messages.last().unwrap().content;
        assert!(prompt.starts_with("Recommend a sci-fi movie"));
        assert!(prompt.contains("MovieRecommendation"));
        assert!(call.options.response_format.is_some());
    }

    #[tokio::test]
    async fn test_structured_run_surfaces_mismatch() {
        let raw = r#"{"title": "Her", "year": "recent"}"#;
        let provider = Arc::new(ScriptedProvider::new(vec![Message::assistant(raw)]));
        let agent = agent_with(provider);

        let err = agent
            .run_structured::<Movie>("Recommend", RunOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.raw_output(), Some(raw));
    }

    #[tokio::test]
    async fn test_call_timeout() {
        struct Slow;

        #[async_trait::async_trait]
        impl LlmProvider for Slow {
            fn name(&self) -> &str {
                "slow"
            }

            async fn generate(
                &self,
                _messages: &[Message],
                _tools: &[ToolSchema],
                _options: &GenerationOptions,
            ) -> Result<Message> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(Message::assistant("late"))
            }

            async fn stream(
                &self,
                _messages: &[Message],
                _options: &GenerationOptions,
            ) -> Result<crate::provider::TextStream> {
                Err(AgentError::Other("unsupported".into()))
            }
        }

        let agent = Agent::builder()
            .provider(Arc::new(Slow))
            .call_timeout(Duration::from_millis(20))
            .build()
            .unwrap();
        let err = agent.run("hi", RunOptions::default()).await.unwrap_err();
        assert!(matches!(err, AgentError::ProviderTimeout(_)));
    }

    #[test]
    fn test_run_blocking() {
        let provider = Arc::new(ScriptedProvider::new(vec![Message::assistant("8")]));
        let agent = agent_with(provider);
        assert_eq!(agent.run_blocking("5 + 3?", RunOptions::default()).unwrap(), "8");
    }

    #[tokio::test]
    async fn test_zero_iteration_budget_is_rejected() {
        let provider = Arc::new(ScriptedProvider::new(vec![Message::assistant("unused")]));
        let agent = agent_with(provider.clone());

        let err = agent
            .run("hi", RunOptions::default().max_iterations(0))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
        assert_eq!(provider.call_count(), 0);
    }

    #[test]
    fn test_builder_requires_provider() {
        assert!(matches!(AgentBuilder::new().build(), Err(AgentError::Config(_))));
    }
}
