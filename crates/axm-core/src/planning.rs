//! Planning Agent
//!
//! Decomposes a goal into ordered steps and executes them one at a time,
//! each through its own tool-calling loop. Steps never run in parallel and
//! a finished step is never revisited.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AgentError, Result};
use crate::reasoning::{Agent, RunOptions};
use crate::structured::OutputSchema;

/// Emit a progress event at `info` when verbose, `debug` otherwise
macro_rules! progress {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            tracing::info!($($arg)+);
        } else {
            tracing::debug!($($arg)+);
        }
    };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Done,
    Failed,
}

/// One unit of work in a plan
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Step {
    /// 1-based position
    pub index: usize,
    pub description: String,
    pub status: StepStatus,
    pub result: Option<String>,
}

/// Ordered decomposition of a goal
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Plan {
    pub goal: String,
    pub steps: Vec<Step>,
}

impl Plan {
    pub fn new(goal: impl Into<String>, descriptions: Vec<String>) -> Self {
        let steps = descriptions
            .into_iter()
            .enumerate()
            .map(|(i, description)| Step {
                index: i + 1,
                description,
                status: StepStatus::Pending,
                result: None,
            })
            .collect();
        Self {
            goal: goal.into(),
            steps,
        }
    }

    /// Steps that finished successfully
    pub fn completed(&self) -> impl Iterator<Item = &Step> {
        self.steps.iter().filter(|s| s.status == StepStatus::Done)
    }

    pub fn is_complete(&self) -> bool {
        self.steps.iter().all(|s| s.status == StepStatus::Done)
    }

    /// `Step N: <description>\n<result>` blocks for every finished step
    pub fn render_results(&self) -> String {
        let mut out = String::new();
        for step in self.completed() {
            if !out.is_empty() {
                out.push_str("\n\n");
            }
            let _ = write!(
                out,
                "Step {}: {}\n{}",
                step.index,
                step.description,
                step.result.as_deref().unwrap_or_default()
            );
        }
        out
    }
}

/// Planning configuration
#[derive(Clone, Debug)]
pub struct PlanningConfig {
    /// Upper bound on the number of steps taken from the decomposition
    pub max_steps: usize,

    /// Run one extra pass turning the step results into a final answer
    pub synthesize: bool,
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self {
            max_steps: 10,
            synthesize: false,
        }
    }
}

impl PlanningConfig {
    pub fn max_steps(mut self, max: usize) -> Self {
        self.max_steps = max;
        self
    }

    pub fn synthesize(mut self, enabled: bool) -> Self {
        self.synthesize = enabled;
        self
    }
}

/// Outcome of `execute_plan`
#[derive(Clone, Debug)]
pub struct PlanReport {
    pub plan: Plan,
    pub result: String,
}

/// Agent that plans before it acts
pub struct PlanningAgent {
    agent: Agent,
    config: PlanningConfig,
}

impl PlanningAgent {
    pub fn new(agent: Agent) -> Self {
        Self::with_config(agent, PlanningConfig::default())
    }

    pub fn with_config(agent: Agent, config: PlanningConfig) -> Self {
        Self { agent, config }
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    pub fn agent_mut(&mut self) -> &mut Agent {
        &mut self.agent
    }

    pub fn config(&self) -> &PlanningConfig {
        &self.config
    }

    /// Decompose `goal` into a plan and execute it step by step
    pub async fn execute_plan(&self, goal: &str, verbose: bool) -> Result<PlanReport> {
        let mut plan = Plan::new(goal, self.decompose(goal).await?);
        progress!(verbose, goal, steps = plan.steps.len(), "Plan created");

        for idx in 0..plan.steps.len() {
            plan.steps[idx].status = StepStatus::Running;
            let step = &plan.steps[idx];
            progress!(verbose, step = step.index, description = %step.description, "Executing step");

            let prompt = step_prompt(&plan, idx);
            match self.agent.run(&prompt, RunOptions::default()).await {
                Ok(result) => {
                    let step = &mut plan.steps[idx];
                    step.status = StepStatus::Done;
                    step.result = Some(result);
                    progress!(verbose, step = step.index, "Step done");
                }
                Err(error) => {
                    plan.steps[idx].status = StepStatus::Failed;
                    let step = idx + 1;
                    tracing::warn!(step, %error, "Plan step failed");
                    return Err(match error {
                        AgentError::MaxIterations(_) => AgentError::PlanHalted {
                            step,
                            plan: Box::new(plan),
                            source: Box::new(error),
                        },
                        other => other,
                    });
                }
            }
        }

        let result = if self.config.synthesize {
            progress!(verbose, "Synthesizing final answer");
            let prompt = format!(
                "Goal: {goal}\n\nCompleted steps and their results:\n\n{}\n\n\
                 Using these results, write the final answer to the goal.",
                plan.render_results()
            );
            self.agent.run(&prompt, RunOptions::default()).await?
        } else {
            plan.render_results()
        };

        Ok(PlanReport { plan, result })
    }

    /// Blocking variant of [`PlanningAgent::execute_plan`]
    pub fn execute_plan_blocking(&self, goal: &str, verbose: bool) -> Result<PlanReport> {
        crate::blocking::block_on(self.execute_plan(goal, verbose))
    }

    async fn decompose(&self, goal: &str) -> Result<Vec<String>> {
        let prompt = format!(
            "Break the following goal into a short ordered list of concrete, atomic steps. \
             Each step must be a single instruction that can be carried out on its own.\n\n\
             Goal: {goal}"
        );
        let value = self
            .agent
            .run_with_schema(&prompt, OutputSchema::string_list("plan_steps"), RunOptions::default())
            .await?;

        let mut steps: Vec<String> = match value {
            Value::Array(items) => items
                .into_iter()
                .filter_map(|item| item.as_str().map(str::trim).map(str::to_string))
                .filter(|s| !s.is_empty())
                .collect(),
            _ => Vec::new(),
        };

        if steps.is_empty() {
            tracing::debug!("Empty decomposition; using the goal as the only step");
            steps.push(goal.to_string());
        }
        steps.truncate(self.config.max_steps.max(1));
        Ok(steps)
    }
}

fn step_prompt(plan: &Plan, idx: usize) -> String {
    let step = &plan.steps[idx];
    let mut prompt = format!("Overall goal: {}\n\n", plan.goal);
    let previous = plan.render_results();
    if !previous.is_empty() {
        let _ = write!(prompt, "Results of previous steps:\n\n{previous}\n\n");
    }
    let _ = write!(
        prompt,
        "Current step ({} of {}): {}\n\nComplete this step only.",
        step.index,
        plan.steps.len(),
        step.description
    );
    prompt
}
