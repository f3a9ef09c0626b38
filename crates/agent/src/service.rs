//! Execution service: the public entry point for running an agent.
//!
//! Looks the agent up, enforces a wall-clock deadline, runs the loop in its
//! own task and turns every outcome (including panics) into an
//! [`ExecutionResult`]. Nothing here returns `Err`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use thinkloop_core::agent::{AgentRepository, RegisteredAgent};
use thinkloop_core::error::AgentError;
use thinkloop_core::turn::ConversationContext;
use thinkloop_memory::MemoryStats;

use crate::loop_runner::{AgentLoop, LoopReport, Termination, ToolTraceEntry};

pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(300);

/// Per-call overrides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionOptions {
    /// Wall-clock limit; the service default applies when `None`
    pub timeout: Option<Duration>,

    /// Iteration cap; the agent's `max_reasoning_turns` applies when `None`
    pub max_iterations: Option<u32>,
}

impl ExecutionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    pub fn validate(&self) -> Result<(), AgentError> {
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(AgentError::InvalidOptions("timeout must be greater than zero".into()));
        }
        if self.max_iterations == Some(0) {
            return Err(AgentError::InvalidOptions("max_iterations must be at least 1".into()));
        }
        Ok(())
    }
}

/// Outcome of one execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,

    /// Final answer, or partial progress when the run stopped early
    pub output: String,

    pub tool_trace: Vec<ToolTraceEntry>,

    pub elapsed_seconds: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub timestamp: DateTime<Utc>,

    pub agent_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,

    pub iterations: u32,

    /// `None` when the loop never ran (lookup or option failure, panic)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination: Option<Termination>,

    /// History window at the end of the run
    #[serde(skip)]
    pub context: Option<Arc<ConversationContext>>,
}

impl ExecutionResult {
    fn failed(agent_id: &str, agent_name: Option<&str>, error: impl ToString, elapsed: Duration) -> Self {
        Self {
            success: false,
            output: String::new(),
            tool_trace: Vec::new(),
            elapsed_seconds: elapsed.as_secs_f64(),
            error: Some(error.to_string()),
            timestamp: Utc::now(),
            agent_id: agent_id.to_string(),
            agent_name: agent_name.map(str::to_string),
            iterations: 0,
            termination: None,
            context: None,
        }
    }

    fn from_report(agent: &RegisteredAgent, report: LoopReport, elapsed: Duration) -> Self {
        Self {
            success: report.is_success(),
            output: report.output,
            tool_trace: report.tool_trace,
            elapsed_seconds: elapsed.as_secs_f64(),
            error: report.error,
            timestamp: Utc::now(),
            agent_id: agent.id().to_string(),
            agent_name: Some(agent.name().to_string()),
            iterations: report.iterations,
            termination: Some(report.termination),
            context: Some(report.context),
        }
    }

    pub fn timed_out(&self) -> bool {
        self.termination == Some(Termination::TimedOut)
    }
}

/// Running totals across executions.
#[derive(Debug, Default)]
pub struct ExecutionMetrics {
    total: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    total_elapsed_ms: AtomicU64,
}

/// Point-in-time copy of [`ExecutionMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub total_elapsed_ms: u64,
}

impl MetricsSnapshot {
    pub fn average_elapsed_ms(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.total_elapsed_ms as f64 / self.total as f64
        }
    }
}

impl ExecutionMetrics {
    fn record(&self, result: &ExecutionResult) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if result.success {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        if result.timed_out() {
            self.timed_out.fetch_add(1, Ordering::Relaxed);
        }
        self.total_elapsed_ms
            .fetch_add((result.elapsed_seconds * 1000.0) as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total: self.total.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            total_elapsed_ms: self.total_elapsed_ms.load(Ordering::Relaxed),
        }
    }
}

/// Service-wide figures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub total_agents: usize,
    pub active_agents: usize,
    pub memory: MemoryStats,
    pub executions: MetricsSnapshot,
}

pub struct ExecutionService {
    repository: Arc<dyn AgentRepository>,
    agent_loop: Arc<AgentLoop>,
    default_timeout: Duration,
    metrics: ExecutionMetrics,
}

impl ExecutionService {
    pub fn new(repository: Arc<dyn AgentRepository>, agent_loop: Arc<AgentLoop>) -> Self {
        Self {
            repository,
            agent_loop,
            default_timeout: DEFAULT_EXECUTION_TIMEOUT,
            metrics: ExecutionMetrics::default(),
        }
    }

    /// Timeout used when the caller's options give none.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn repository(&self) -> &Arc<dyn AgentRepository> {
        &self.repository
    }

    /// Run the agent with id `agent_id` on `input`.
    pub async fn execute_agent(&self, agent_id: &str, input: &str, options: ExecutionOptions) -> ExecutionResult {
        let started = Instant::now();
        let result = self.execute_inner(agent_id, input, options, started).await;
        self.metrics.record(&result);

        info!(
            agent_id = %result.agent_id,
            success = result.success,
            termination = ?result.termination,
            iterations = result.iterations,
            elapsed_seconds = result.elapsed_seconds,
            "Execution completed"
        );
        result
    }

    /// Run the agent registered under `name`.
    pub async fn execute_agent_by_name(&self, name: &str, input: &str, options: ExecutionOptions) -> ExecutionResult {
        match self.repository.find_by_name(name).await {
            Some(agent) => self.execute_agent(agent.id(), input, options).await,
            None => {
                warn!(agent = %name, "Agent not found");
                let result = ExecutionResult::failed(
                    "",
                    Some(name),
                    AgentError::NotFound(format!("'{name}'")),
                    Duration::ZERO,
                );
                self.metrics.record(&result);
                result
            }
        }
    }

    async fn execute_inner(
        &self,
        agent_id: &str,
        input: &str,
        options: ExecutionOptions,
        started: Instant,
    ) -> ExecutionResult {
        info!(agent_id, input_length = input.len(), "Starting execution");

        if let Err(e) = options.validate() {
            return ExecutionResult::failed(agent_id, None, e, started.elapsed());
        }

        let Some(agent) = self.repository.find_by_id(agent_id).await else {
            error!(agent_id, "Agent not found");
            return ExecutionResult::failed(agent_id, None, AgentError::NotFound(agent_id.into()), started.elapsed());
        };
        if !agent.is_active() {
            warn!(agent_id, "Agent is inactive");
            return ExecutionResult::failed(
                agent_id,
                Some(agent.name()),
                AgentError::Inactive(agent_id.into()),
                started.elapsed(),
            );
        }

        let timeout = options.timeout.unwrap_or(self.default_timeout);
        let max_iterations = options
            .max_iterations
            .unwrap_or(agent.capabilities().max_reasoning_turns);
        // A timeout too large to represent as an instant never expires.
        let deadline = started.checked_add(timeout);
        if deadline.is_none() {
            debug!(agent_id, timeout_secs = timeout.as_secs(), "Timeout exceeds the clock range, running without a deadline");
        }

        let agent_loop = Arc::clone(&self.agent_loop);
        let task_agent = agent.clone();
        let task_input = input.to_string();
        let handle = tokio::spawn(async move {
            agent_loop
                .run(&task_agent, &task_input, max_iterations, deadline)
                .await
        });

        match handle.await {
            Ok(report) => ExecutionResult::from_report(&agent, report, started.elapsed()),
            Err(e) => {
                error!(agent_id, error = %e, "Agent run aborted");
                let reason = if e.is_panic() {
                    "agent run panicked"
                } else {
                    "agent run was cancelled"
                };
                ExecutionResult::failed(agent_id, Some(agent.name()), reason, started.elapsed())
            }
        }
    }

    /// Periodically evict memory of agents idle for longer than `threshold`.
    ///
    /// The task runs until the returned handle is aborted.
    pub fn spawn_memory_sweeper(&self, every: Duration, threshold: Duration) -> JoinHandle<()> {
        let memory = Arc::clone(self.agent_loop.memory());
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let evicted = memory.cleanup_inactive(threshold);
                if evicted > 0 {
                    info!(evicted, "Evicted inactive agent memory");
                }
            }
        })
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub async fn stats(&self) -> ExecutionStats {
        ExecutionStats {
            total_agents: self.repository.count().await,
            active_agents: self.repository.find_active().await.len(),
            memory: self.agent_loop.memory().stats(),
            executions: self.metrics.snapshot(),
        }
    }
}
