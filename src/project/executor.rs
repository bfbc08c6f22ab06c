//! Task executors run by the dispatcher.

use std::time::Duration;

use async_trait::async_trait;

use crate::agents::{Agent, Task};
use crate::error::ExecutionError;

/// Runs one task on behalf of an agent.
///
/// Implementations do not need to enforce the agent's timeout; the
/// dispatcher wraps every call in one.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Execute `task` as `agent`, returning its output.
    async fn execute(&self, task: &Task, agent: &Agent) -> Result<String, ExecutionError>;
}

/// Stand-in executor that sleeps and returns canned output.
#[derive(Debug, Clone)]
pub struct SimulatedExecutor {
    delay: Duration,
}

impl SimulatedExecutor {
    pub fn new() -> Self {
        Self {
            delay: Duration::from_secs(2),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn output_for(task: &Task) -> &'static str {
        let title = task.title.to_lowercase();
        if title.contains("code") || title.contains("develop") {
            "Generated code successfully"
        } else if title.contains("test") {
            "Ran tests and reported results"
        } else if title.contains("review") {
            "Reviewed code and provided feedback"
        } else {
            "Task completed successfully"
        }
    }
}

impl Default for SimulatedExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskExecutor for SimulatedExecutor {
    async fn execute(&self, task: &Task, agent: &Agent) -> Result<String, ExecutionError> {
        tracing::debug!(
            task_id = %task.id,
            agent = %agent.name,
            delay_ms = self.delay.as_millis() as u64,
            "Simulating task execution"
        );
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(Self::output_for(task).to_string())
    }
}
