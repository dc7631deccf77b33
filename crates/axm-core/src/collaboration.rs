//! Multi-Agent Collaboration
//!
//! An orchestrator agent assigns work to role-labelled participants, reviews
//! their answers between rounds and produces the final verdict.
//!
//! ```text
//!   round 0            rounds 1..=N                      after round N
//! ┌──────────┐   ┌───────────────────────────┐   ┌─────────────────────┐
//! │  assign  │──▶│ participants ─▶ review ───┼──▶│  forced synthesis   │
//! └──────────┘   │      ▲            │ cont. │   └─────────────────────┘
//!                │      └────────────┘       │
//!                └──────── complete ─────────┼──▶ verdict
//! ```

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};
use crate::message::Message;
use crate::provider::LlmProvider;
use crate::reasoning::{Agent, RunOptions};
use crate::schema::{Field, JsonType};
use crate::structured::{OutputSchema, StructuredOutput};

const ORCHESTRATOR_ROLE: &str = "orchestrator";

const DEFAULT_ORCHESTRATOR_PROMPT: &str = "You coordinate a team of specialist agents. \
You split the task between them, judge their answers and decide when the task is done.";

/// How to build the orchestrator agent
#[derive(Clone)]
pub struct OrchestratorSpec {
    pub provider: Arc<dyn LlmProvider>,
    pub model: String,
    pub system_prompt: Option<String>,
}

impl OrchestratorSpec {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            system_prompt: None,
        }
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }
}

/// Collaboration configuration
#[derive(Clone, Debug, Default)]
pub struct CollaborationConfig {
    /// Run the participants of a round concurrently
    pub concurrent: bool,
}

impl CollaborationConfig {
    pub fn concurrent(mut self, enabled: bool) -> Self {
        self.concurrent = enabled;
        self
    }
}

/// State of one `collaborate` invocation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CollaborationState {
    pub task: String,
    /// Last round started (0 while assigning)
    pub round: usize,
    /// Participant answers in order, tagged with the participant role
    pub transcript: Vec<(String, Message)>,
    /// Final answer chosen by the orchestrator
    pub verdict: Option<String>,
    /// Whether the verdict came from the post-round synthesis
    pub forced_synthesis: bool,
}

impl CollaborationState {
    fn new(task: &str) -> Self {
        Self {
            task: task.to_string(),
            round: 0,
            transcript: Vec::new(),
            verdict: None,
            forced_synthesis: false,
        }
    }

    /// Transcript as `[role]: answer` blocks
    pub fn render_transcript(&self) -> String {
        let mut out = String::new();
        for (role, message) in &self.transcript {
            if !out.is_empty() {
                out.push_str("\n\n");
            }
            let _ = write!(out, "[{role}]: {}", message.content);
        }
        out
    }
}

#[derive(Clone, Debug, Deserialize)]
struct Assignment {
    role: String,
    instruction: String,
}

fn assignment_list() -> JsonType {
    JsonType::array(JsonType::object(vec![
        Field::required("role", JsonType::String),
        Field::required("instruction", JsonType::String),
    ]))
}

#[derive(Debug, Deserialize)]
struct AssignmentPlan {
    assignments: Vec<Assignment>,
}

impl StructuredOutput for AssignmentPlan {
    fn output_schema() -> OutputSchema {
        OutputSchema::new(
            "TaskAssignment",
            JsonType::object(vec![Field::required("assignments", assignment_list())]),
        )
    }
}

#[derive(Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ReviewStatus {
    Complete,
    Continue,
}

#[derive(Debug, Deserialize)]
struct Review {
    status: ReviewStatus,
    #[serde(default)]
    final_answer: Option<String>,
    #[serde(default)]
    assignments: Option<Vec<Assignment>>,
}

impl StructuredOutput for Review {
    fn output_schema() -> OutputSchema {
        OutputSchema::new(
            "RoundReview",
            JsonType::object(vec![
                Field::required("status", JsonType::String)
                    .describe("\"complete\" when the task is solved, otherwise \"continue\""),
                Field::optional("final_answer", JsonType::String),
                Field::optional("assignments", assignment_list()),
            ]),
        )
    }
}

/// A team of role-labelled agents under one orchestrator
pub struct MultiAgent {
    participants: Vec<Agent>,
    orchestrator: Agent,
    config: CollaborationConfig,
}

impl MultiAgent {
    /// Create a team. Participants without a role are labelled `agent_<n>`.
    pub fn new(participants: Vec<Agent>, orchestrator: OrchestratorSpec) -> Result<Self> {
        if participants.is_empty() {
            return Err(AgentError::Config(
                "a collaboration needs at least one participant".into(),
            ));
        }

        let participants = participants
            .into_iter()
            .enumerate()
            .map(|(i, mut agent)| {
                if agent.role().is_none() {
                    agent.set_role(format!("agent_{}", i + 1));
                }
                agent
            })
            .collect();

        let orchestrator = Agent::builder()
            .provider(orchestrator.provider)
            .model(orchestrator.model)
            .role(ORCHESTRATOR_ROLE)
            .system_prompt(
                orchestrator
                    .system_prompt
                    .unwrap_or_else(|| DEFAULT_ORCHESTRATOR_PROMPT.to_string()),
            )
            .build()?;

        Ok(Self {
            participants,
            orchestrator,
            config: CollaborationConfig::default(),
        })
    }

    pub fn with_config(mut self, config: CollaborationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn orchestrator(&self) -> &Agent {
        &self.orchestrator
    }

    pub fn participants(&self) -> &[Agent] {
        &self.participants
    }

    /// Participant roles in registration order
    pub fn roles(&self) -> Vec<&str> {
        self.participants.iter().filter_map(Agent::role).collect()
    }

    /// Work on `task` for at most `max_rounds` rounds
    pub async fn collaborate(
        &self,
        task: &str,
        max_rounds: usize,
        verbose: bool,
    ) -> Result<CollaborationState> {
        if max_rounds == 0 {
            return Err(AgentError::Config("max_rounds must be at least 1".into()));
        }

        let mut state = CollaborationState::new(task);
        let plan: AssignmentPlan = self
            .orchestrator
            .run_structured(&self.assignment_prompt(task), RunOptions::default())
            .await?;
        let mut instructions = HashMap::new();
        self.apply_assignments(&mut instructions, plan.assignments);

        for round in 1..=max_rounds {
            state.round = round;
            self.log(verbose, round, "Round started");

            let answers = self.run_round(&state, &instructions).await?;
            for (agent, answer) in self.participants.iter().zip(answers) {
                let role = agent.role().unwrap_or_default().to_string();
                tracing::debug!(round, role = %role, "Participant answered");
                state
                    .transcript
                    .push((role.clone(), Message::assistant(answer).with_name(role)));
            }

            if round == max_rounds {
                break;
            }

            let review: Review = self
                .orchestrator
                .run_structured(&self.review_prompt(&state), RunOptions::default())
                .await?;
            match review.status {
                ReviewStatus::Complete => match review.final_answer {
                    Some(answer) if !answer.trim().is_empty() => {
                        self.log(verbose, round, "Orchestrator marked the task complete");
                        state.verdict = Some(answer);
                        return Ok(state);
                    }
                    _ => tracing::warn!(round, "Review marked complete without a final answer"),
                },
                ReviewStatus::Continue => {}
            }
            if let Some(assignments) = review.assignments {
                self.apply_assignments(&mut instructions, assignments);
            }
        }

        self.log(verbose, state.round, "Round limit reached; forcing synthesis");
        let verdict = self
            .orchestrator
            .run(&self.synthesis_prompt(&state), RunOptions::default())
            .await?;
        state.verdict = Some(verdict);
        state.forced_synthesis = true;
        Ok(state)
    }

    /// Blocking variant of [`MultiAgent::collaborate`]
    pub fn collaborate_blocking(
        &self,
        task: &str,
        max_rounds: usize,
        verbose: bool,
    ) -> Result<CollaborationState> {
        crate::blocking::block_on(self.collaborate(task, max_rounds, verbose))
    }

    /// Answers in registration order. Every participant sees the transcript
    /// as it stood when the round began.
    async fn run_round(
        &self,
        state: &CollaborationState,
        instructions: &HashMap<String, String>,
    ) -> Result<Vec<String>> {
        let prompts: Vec<String> = self
            .participants
            .iter()
            .map(|agent| {
                let role = agent.role().unwrap_or_default();
                let instruction = instructions.get(role).map_or(state.task.as_str(), String::as_str);
                participant_prompt(state, instruction)
            })
            .collect();

        if self.config.concurrent {
            let runs = self
                .participants
                .iter()
                .zip(&prompts)
                .map(|(agent, prompt)| agent.run(prompt, RunOptions::default()));
            return futures::future::try_join_all(runs).await;
        }

        let mut answers = Vec::with_capacity(prompts.len());
        for (agent, prompt) in self.participants.iter().zip(&prompts) {
            answers.push(agent.run(prompt, RunOptions::default()).await?);
        }
        Ok(answers)
    }

    fn apply_assignments(&self, instructions: &mut HashMap<String, String>, assignments: Vec<Assignment>) {
        let roles = self.roles();
        for assignment in assignments {
            if roles.contains(&assignment.role.as_str()) {
                instructions.insert(assignment.role, assignment.instruction);
            } else {
                tracing::debug!(role = %assignment.role, "Ignoring assignment for unknown role");
            }
        }
    }

    fn assignment_prompt(&self, task: &str) -> String {
        format!(
            "Task: {task}\n\nTeam members: {}\n\n\
             Give each team member one instruction that moves the task forward.",
            self.roles().join(", ")
        )
    }

    fn review_prompt(&self, state: &CollaborationState) -> String {
        format!(
            "Task: {}\n\nRound {} answers so far:\n\n{}\n\n\
             If the answers already solve the task, reply with status \"complete\" and the \
             final answer. Otherwise reply with status \"continue\" and new instructions for \
             the team members ({}).",
            state.task,
            state.round,
            state.render_transcript(),
            self.roles().join(", ")
        )
    }

    fn synthesis_prompt(&self, state: &CollaborationState) -> String {
        format!(
            "Task: {}\n\nThe team's answers:\n\n{}\n\n\
             Combine them into the single best final answer to the task.",
            state.task,
            state.render_transcript()
        )
    }

    fn log(&self, verbose: bool, round: usize, message: &str) {
        if verbose {
            tracing::info!(round, participants = self.participants.len(), "{message}");
        } else {
            tracing::debug!(round, participants = self.participants.len(), "{message}");
        }
    }
}

fn participant_prompt(state: &CollaborationState, instruction: &str) -> String {
    let mut prompt = format!("Team task: {}\n\nYour instruction: {instruction}", state.task);
    if !state.transcript.is_empty() {
        let _ = write!(prompt, "\n\nTeam discussion so far:\n\n{}", state.render_transcript());
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;
    use crate::mock::ScriptedProvider;

    fn participant(role: Option<&str>, provider: Arc<ScriptedProvider>) -> Agent {
        let mut builder = Agent::builder().provider(provider);
        if let Some(role) = role {
            builder = builder.role(role);
        }
        builder.build().unwrap()
    }

    fn assignments() -> Message {
        Message::assistant(
            r#"{"assignments": [
                {"role": "researcher", "instruction": "Collect facts"},
                {"role": "writer", "instruction": "Draft the text"}
            ]}"#,
        )
    }

    #[tokio::test]
    async fn test_single_round_forces_synthesis() {
        let researcher = Arc::new(ScriptedProvider::new(vec![Message::assistant("facts")]));
        let writer = Arc::new(ScriptedProvider::new(vec![Message::assistant("draft")]));
        let orchestrator = Arc::new(ScriptedProvider::new(vec![
            assignments(),
            Message::assistant("final"),
        ]));

        let team = MultiAgent::new(
            vec![
                participant(Some("researcher"), researcher.clone()),
                participant(Some("writer"), writer.clone()),
            ],
            OrchestratorSpec::new(orchestrator.clone(), "gpt-4"),
        )
        .unwrap();

        let state = team.collaborate("Explain X", 1, false).await.unwrap();

        assert_eq!(state.transcript.len(), 2);
        assert_eq!(state.transcript[0].0, "researcher");
        assert_eq!(state.transcript[1].1.name.as_deref(), Some("writer"));
        assert_eq!(state.transcript[1].1.role, Role::Assistant);
        assert!(state.forced_synthesis);
        assert_eq!(state.verdict.as_deref(), Some("final"));

        let total = researcher.call_count() + writer.call_count() + orchestrator.call_count();
        assert_eq!(total, 4);

        let researcher_calls = researcher.calls();
        let prompt = &researcher_calls[0].messages.last().unwrap().content;
        assert!(prompt.contains("Your instruction: Collect facts"));
    }

    #[tokio::test]
    async fn test_early_completion() {
        let worker = Arc::new(ScriptedProvider::repeating(Message::assistant("42")));
        let orchestrator = Arc::new(ScriptedProvider::new(vec![
            Message::assistant(r#"{"assignments": []}"#),
            Message::assistant(r#"{"status": "complete", "final_answer": "The answer is 42"}"#),
        ]));

        let team = MultiAgent::new(
            vec![participant(None, worker.clone())],
            OrchestratorSpec::new(orchestrator.clone(), "gpt-4"),
        )
        .unwrap();
        assert_eq!(team.roles(), vec!["agent_1"]);

        let state = team.collaborate("What is 6 * 7?", 3, true).await.unwrap();
        assert_eq!(state.round, 1);
        assert!(!state.forced_synthesis);
        assert_eq!(state.verdict.as_deref(), Some("The answer is 42"));
        assert_eq!(orchestrator.call_count(), 2);

        // missing assignment falls back to the task
        let worker_calls = worker.calls();
        let prompt = &worker_calls[0].messages.last().unwrap().content;
        assert!(prompt.contains("Your instruction: What is 6 * 7?"));
    }

    #[tokio::test]
    async fn test_continue_refines_instructions() {
        let worker = Arc::new(ScriptedProvider::repeating(Message::assistant("attempt")));
        let orchestrator = Arc::new(ScriptedProvider::new(vec![
            Message::assistant(r#"{"assignments": [{"role": "solver", "instruction": "try"}]}"#),
            Message::assistant(
                r#"{"status": "continue", "assignments": [{"role": "solver", "instruction": "try harder"}]}"#,
            ),
            Message::assistant("synthesized"),
        ]));

        let team = MultiAgent::new(
            vec![participant(Some("solver"), worker.clone())],
            OrchestratorSpec::new(orchestrator, "gpt-4"),
        )
        .unwrap()
        .with_config(CollaborationConfig::default().concurrent(true));

        let state = team.collaborate("task", 2, false).await.unwrap();
        assert_eq!(state.round, 2);
        assert_eq!(state.transcript.len(), 2);
        assert!(state.forced_synthesis);

        let worker_calls = worker.calls();
        let second = &worker_calls[1].messages.last().unwrap().content;
        assert!(second.contains("Your instruction: try harder"));
        assert!(second.contains("[solver]: attempt"));
    }

    #[tokio::test]
    async fn test_concurrent_round_keeps_registration_order() {
        let a = Arc::new(ScriptedProvider::new(vec![Message::assistant("from a")]));
        let b = Arc::new(ScriptedProvider::new(vec![Message::assistant("from b")]));
        let orchestrator = Arc::new(ScriptedProvider::new(vec![
            Message::assistant(r#"{"assignments": []}"#),
            Message::assistant("done"),
        ]));

        let team = MultiAgent::new(
            vec![participant(Some("a"), a), participant(Some("b"), b)],
            OrchestratorSpec::new(orchestrator, "gpt-4"),
        )
        .unwrap()
        .with_config(CollaborationConfig::default().concurrent(true));

        let state = team.collaborate("task", 1, false).await.unwrap();
        let roles: Vec<_> = state.transcript.iter().map(|(r, _)| r.as_str()).collect();
        assert_eq!(roles, vec!["a", "b"]);
        assert_eq!(state.render_transcript(), "[a]: from a\n\n[b]: from b");
    }

    #[tokio::test]
    async fn test_invalid_configuration() {
        let orchestrator = Arc::new(ScriptedProvider::default());
        assert!(matches!(
            MultiAgent::new(vec![], OrchestratorSpec::new(orchestrator.clone(), "gpt-4")),
            Err(AgentError::Config(_))
        ));

        let worker = Arc::new(ScriptedProvider::default());
        let team = MultiAgent::new(
            vec![participant(None, worker)],
            OrchestratorSpec::new(orchestrator.clone(), "gpt-4"),
        )
        .unwrap();
        let err = team.collaborate("task", 0, false).await.unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
        assert_eq!(orchestrator.call_count(), 0);
    }

    #[tokio::test]
    async fn test_bad_review_is_structured_error() {
        let worker = Arc::new(ScriptedProvider::repeating(Message::assistant("x")));
        let orchestrator = Arc::new(ScriptedProvider::new(vec![
            Message::assistant(r#"{"assignments": []}"#),
            Message::assistant(r#"{"status": "maybe"}"#),
        ]));
        let team = MultiAgent::new(
            vec![participant(None, worker)],
            OrchestratorSpec::new(orchestrator, "gpt-4"),
        )
        .unwrap();

        let err = team.collaborate("task", 2, false).await.unwrap_err();
        assert_eq!(err.raw_output(), Some(r#"{"status": "maybe"}"#));
    }

    #[test]
    fn test_collaborate_blocking() {
        let worker = Arc::new(ScriptedProvider::repeating(Message::assistant("x")));
        let orchestrator = Arc::new(ScriptedProvider::new(vec![
            Message::assistant(r#"{"assignments": []}"#),
            Message::assistant("verdict"),
        ]));
        let team = MultiAgent::new(
            vec![participant(None, worker)],
            OrchestratorSpec::new(orchestrator, "gpt-4"),
        )
        .unwrap();
        let state = team.collaborate_blocking("task", 1, false).unwrap();
        assert_eq!(state.verdict.as_deref(), Some("verdict"));
    }
}
