//! Task polling for asynchronous backends.
//!
//! A [`GenerationTask`] is a small state machine advanced one observation
//! at a time; [`TaskPoller`] drives it against a [`TaskStatusSource`],
//! sleeping through an injected [`Sleeper`] between polls.

use crate::error::{MingleError, Result};
use crate::image::ProviderId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Default delay between status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default number of polls before a task is declared timed out.
pub const DEFAULT_MAX_POLLS: u32 = 30;

/// Abstraction over waiting, so retry loops can be tested without real delays.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Returns immediately and records every requested delay.
#[derive(Debug, Default, Clone)]
pub struct RecordingSleeper {
    delays: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays requested so far, in order.
    pub fn delays(&self) -> Vec<Duration> {
        self.delays
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut delays) = self.delays.lock() {
            delays.push(duration);
        }
    }
}

/// Retry pacing shared by task polling and synchronous model-loading retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Base delay; multiplied by the attempt number when `linear` is set.
    pub base: Duration,
    /// Attempt ceiling, counting the first try.
    pub max_attempts: u32,
    /// Grow the delay with each attempt instead of keeping it fixed.
    pub linear: bool,
}

impl Backoff {
    pub const fn fixed(base: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_attempts,
            linear: false,
        }
    }

    pub const fn linear(base: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_attempts,
            linear: true,
        }
    }

    /// Delay after the given 1-based attempt, preferring a server hint.
    pub fn delay(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        if let Some(hint) = hint {
            return hint;
        }
        if self.linear {
            self.base.saturating_mul(attempt.max(1))
        } else {
            self.base
        }
    }

    /// Whether another attempt is allowed after `attempt` tries.
    pub fn allows_another(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::fixed(DEFAULT_POLL_INTERVAL, DEFAULT_MAX_POLLS)
    }
}

/// Lifecycle of a backend task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    TimedOut,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::TimedOut)
    }
}

/// What a single status poll reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollObservation {
    /// Still queued or running.
    InProgress,
    /// Finished; carries the generated outputs (possibly none).
    Completed(Vec<String>),
    /// Backend gave up, with its reason if any.
    Failed(Option<String>),
    /// A status string this client does not know; treated as still running.
    Unknown(String),
}

/// Backend-side status of one task, owned by the poll loop handling it.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationTask {
    pub provider: ProviderId,
    pub task_id: String,
    pub status: TaskStatus,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    /// First output once completed.
    pub output: Option<String>,
    /// Reason for a failed or timed-out task.
    pub failure: Option<String>,
    /// Set when the backend broke its contract rather than reporting failure.
    pub malformed: bool,
}

impl GenerationTask {
    pub fn new(provider: ProviderId, task_id: impl Into<String>) -> Self {
        Self {
            provider,
            task_id: task_id.into(),
            status: TaskStatus::Pending,
            attempts: 0,
            created_at: Utc::now(),
            output: None,
            failure: None,
            malformed: false,
        }
    }

    /// Applies one poll result. Counts the poll and moves to the next state.
    pub fn observe(&mut self, observation: PollObservation) {
        if self.status.is_terminal() {
            return;
        }
        self.attempts += 1;
        match observation {
            PollObservation::Completed(outputs) => {
                match outputs.into_iter().find(|o| !o.trim().is_empty()) {
                    Some(first) => {
                        self.output = Some(first);
                        self.status = TaskStatus::Completed;
                    }
                    None => {
                        self.failure = Some("task completed but no images generated".into());
                        self.malformed = true;
                        self.status = TaskStatus::Failed;
                    }
                }
            }
            PollObservation::Failed(reason) => {
                self.failure = Some(reason.unwrap_or_else(|| "generation failed".into()));
                self.status = TaskStatus::Failed;
            }
            PollObservation::InProgress | PollObservation::Unknown(_) => {
                self.status = TaskStatus::InProgress;
            }
        }
    }

    /// Records a poll that errored in transit; counts against the same ceiling.
    pub fn observe_error(&mut self, error: &MingleError) {
        if self.status.is_terminal() {
            return;
        }
        self.attempts += 1;
        if error.is_terminal() {
            self.failure = Some(error.to_string());
            self.status = TaskStatus::Failed;
        } else {
            self.status = TaskStatus::InProgress;
        }
    }

    /// Declares the task timed out if the ceiling is reached without a verdict.
    pub fn enforce_ceiling(&mut self, max_attempts: u32) {
        if !self.status.is_terminal() && self.attempts >= max_attempts {
            self.failure = Some(format!("no terminal status after {} polls", self.attempts));
            self.status = TaskStatus::TimedOut;
        }
    }
}

/// Where a poller reads task status from.
#[async_trait]
pub trait TaskStatusSource: Send + Sync {
    /// Performs one status check for `task_id`.
    async fn check(&self, task_id: &str) -> Result<PollObservation>;
}

/// Drives a task to a terminal state.
#[derive(Clone)]
pub struct TaskPoller {
    backoff: Backoff,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for TaskPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskPoller")
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl Default for TaskPoller {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL, DEFAULT_MAX_POLLS)
    }
}

impl TaskPoller {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            backoff: Backoff::fixed(interval, max_attempts.max(1)),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Replaces the sleeper used between polls.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn interval(&self) -> Duration {
        self.backoff.base
    }

    pub fn max_attempts(&self) -> u32 {
        self.backoff.max_attempts
    }

    /// Polls until the task is terminal; returns the final task state.
    pub async fn run(
        &self,
        source: &dyn TaskStatusSource,
        mut task: GenerationTask,
    ) -> GenerationTask {
        loop {
            match source.check(&task.task_id).await {
                Ok(observation) => task.observe(observation),
                Err(e) => {
                    tracing::debug!(
                        provider = %task.provider,
                        task_id = %task.task_id,
                        attempt = task.attempts + 1,
                        "status poll failed: {e}"
                    );
                    task.observe_error(&e);
                }
            }
            task.enforce_ceiling(self.backoff.max_attempts);

            if task.status.is_terminal() {
                tracing::debug!(
                    provider = %task.provider,
                    task_id = %task.task_id,
                    status = ?task.status,
                    attempts = task.attempts,
                    "task reached terminal state"
                );
                return task;
            }

            tracing::debug!(
                provider = %task.provider,
                task_id = %task.task_id,
                attempt = task.attempts,
                "task still in progress"
            );
            self.sleeper
                .sleep(self.backoff.delay(task.attempts, None))
                .await;
        }
    }

    /// Polls to completion and returns the first output, or the matching error.
    pub async fn wait_for_output(
        &self,
        source: &dyn TaskStatusSource,
        task: GenerationTask,
    ) -> Result<(String, u32)> {
        let started = Instant::now();
        let task = self.run(source, task).await;
        match task.status {
            TaskStatus::Completed => task
                .output
                .map(|url| (url, task.attempts))
                .ok_or_else(|| MingleError::MalformedResponse("completed task without output".into())),
            TaskStatus::TimedOut => Err(MingleError::Timeout {
                attempts: task.attempts,
                elapsed: started.elapsed(),
            }),
            TaskStatus::Failed => {
                let reason = task.failure.unwrap_or_else(|| "generation failed".into());
                if task.malformed {
                    Err(MingleError::MalformedResponse(reason))
                } else {
                    Err(MingleError::GenerationFailed(reason))
                }
            }
            TaskStatus::Pending | TaskStatus::InProgress => Err(MingleError::GenerationFailed(
                "poller stopped before a terminal state".into(),
            )),
        }
    }
}
