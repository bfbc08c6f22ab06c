//! In-memory registry of agents and tasks.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::agents::{Agent, AgentStatus, AgentType, Task, TaskResult, TaskStatus};
use crate::assignment::matches_labels;
use crate::error::RegistryError;

/// Optional settings applied by [`Registry::create_agent`].
#[derive(Debug, Clone, Default)]
pub struct AgentOverrides {
    pub auto_assign: Option<bool>,
    pub labels: Option<Vec<String>>,
    pub capabilities: Option<Vec<String>>,
    pub description: Option<String>,
}

/// Counts returned by [`Registry::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub total_agents: usize,
    /// Working or paused agents.
    pub active_agents: usize,
    pub idle_agents: usize,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
}

#[derive(Default)]
struct RegistryState {
    agents: HashMap<String, Agent>,
    tasks: HashMap<String, Task>,
}

/// Thread-safe store of agents and the tasks used for internal assignment.
///
/// Reads take a shared lock; every mutation validates and applies its state
/// transition under a single exclusive lock, so racing callers observe a
/// consistent agent/task pairing. Accessors return snapshots, never
/// references into the store.
#[derive(Default)]
pub struct Registry {
    state: RwLock<RegistryState>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    // ==================== Agents ====================

    /// Store an agent, assigning an ID if it has none. The agent starts idle.
    pub async fn register_agent(&self, mut agent: Agent) -> Agent {
        if agent.id.is_empty() {
            agent.id = Uuid::new_v4().to_string();
        }
        let now = Utc::now();
        agent.created_at = now;
        agent.updated_at = now;
        agent.status = AgentStatus::Idle;
        agent.current_task = None;
        agent.load = agent.load.min(100);

        tracing::debug!(agent_id = %agent.id, name = %agent.name, "Registered agent");

        let mut state = self.state.write().await;
        state.agents.insert(agent.id.clone(), agent.clone());
        agent
    }

    /// Build an agent with default config, apply `overrides`, and register it.
    pub async fn create_agent(
        &self,
        name: impl Into<String>,
        agent_type: AgentType,
        overrides: AgentOverrides,
    ) -> Agent {
        let mut agent = Agent::new(name, agent_type)
            .with_description(format!("Agent of type {}", agent_type));

        if let Some(auto_assign) = overrides.auto_assign {
            agent.config.auto_assign = auto_assign;
        }
        if let Some(labels) = overrides.labels {
            agent.labels = labels;
        }
        if let Some(capabilities) = overrides.capabilities {
            agent.capabilities = capabilities;
        }
        if let Some(description) = overrides.description {
            agent.description = description;
        }

        self.register_agent(agent).await
    }

    /// Register the built-in agent set.
    pub async fn register_defaults(&self) -> Vec<Agent> {
        let mut registered = Vec::new();
        for agent in super::default_agents() {
            registered.push(self.register_agent(agent).await);
        }
        registered
    }

    /// Remove an agent.
    pub async fn delete_agent(&self, agent_id: &str) -> Result<(), RegistryError> {
        let mut state = self.state.write().await;
        state
            .agents
            .remove(agent_id)
            .map(|_| ())
            .ok_or_else(|| RegistryError::AgentNotFound(agent_id.to_string()))
    }

    pub async fn get_agent(&self, agent_id: &str) -> Option<Agent> {
        self.state.read().await.agents.get(agent_id).cloned()
    }

    /// All agents, ordered by ID.
    pub async fn list_agents(&self) -> Vec<Agent> {
        let state = self.state.read().await;
        let mut agents: Vec<Agent> = state.agents.values().cloned().collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        agents
    }

    pub async fn agents_by_type(&self, agent_type: AgentType) -> Vec<Agent> {
        self.list_agents()
            .await
            .into_iter()
            .filter(|a| a.agent_type == agent_type)
            .collect()
    }

    pub async fn idle_agents(&self) -> Vec<Agent> {
        self.list_agents()
            .await
            .into_iter()
            .filter(|a| a.status == AgentStatus::Idle)
            .collect()
    }

    /// Put an agent back into service.
    pub async fn start_agent(&self, agent_id: &str) -> Result<(), RegistryError> {
        self.set_agent_status(agent_id, AgentStatus::Idle).await
    }

    /// Take an agent out of service.
    pub async fn stop_agent(&self, agent_id: &str) -> Result<(), RegistryError> {
        self.set_agent_status(agent_id, AgentStatus::Offline).await
    }

    async fn set_agent_status(
        &self,
        agent_id: &str,
        status: AgentStatus,
    ) -> Result<(), RegistryError> {
        let mut state = self.state.write().await;
        let agent = state
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| RegistryError::AgentNotFound(agent_id.to_string()))?;

        // Only Working may carry a current task.
        agent.status = status;
        agent.current_task = None;
        agent.updated_at = Utc::now();

        tracing::info!(agent_id = %agent_id, status = %status, "Agent status changed");
        Ok(())
    }

    /// Reserve an idle agent for work tracked outside the registry's own task
    /// map (tracker-driven executions). `work_id` becomes the agent's current
    /// task until [`Registry::release_agent`] is called with the same ID.
    ///
    /// Claims are exclusive: an agent holds at most one piece of work.
    pub async fn claim_agent(
        &self,
        agent_id: &str,
        work_id: &str,
    ) -> Result<Agent, RegistryError> {
        let mut state = self.state.write().await;
        let agent = state
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| RegistryError::AgentNotFound(agent_id.to_string()))?;

        if agent.current_task.as_deref() == Some(work_id) {
            return Ok(agent.clone());
        }
        if agent.status != AgentStatus::Idle {
            return Err(RegistryError::AgentBusy(agent_id.to_string()));
        }

        agent.status = AgentStatus::Working;
        agent.current_task = Some(work_id.to_string());
        agent.updated_at = Utc::now();

        tracing::debug!(agent_id = %agent_id, work_id = %work_id, "Claimed agent");
        Ok(agent.clone())
    }

    /// Give back an agent claimed for `work_id`, recording the outcome when
    /// the work actually ran. A claim for other work is left untouched.
    pub async fn release_agent(
        &self,
        agent_id: &str,
        work_id: &str,
        outcome: Option<(bool, Duration)>,
    ) -> Result<(), RegistryError> {
        let mut state = self.state.write().await;
        let agent = state
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| RegistryError::AgentNotFound(agent_id.to_string()))?;

        let now = Utc::now();
        if agent.current_task.as_deref() == Some(work_id) {
            agent.status = AgentStatus::Idle;
            agent.current_task = None;
        }
        match outcome {
            Some((true, duration)) => agent
                .stats
                .record_success(duration.as_millis() as u64, now),
            Some((false, _)) => agent.stats.record_failure(now),
            None => {}
        }
        agent.updated_at = now;

        tracing::debug!(agent_id = %agent_id, work_id = %work_id, "Released agent");
        Ok(())
    }

    // ==================== Tasks ====================

    /// Store a task as pending, assigning an ID if it has none.
    pub async fn create_task(&self, mut task: Task) -> Task {
        if task.id.is_empty() {
            task.id = Uuid::new_v4().to_string();
        }
        let now = Utc::now();
        task.created_at = now;
        task.updated_at = now;
        task.status = TaskStatus::Pending;

        let mut state = self.state.write().await;
        state.tasks.insert(task.id.clone(), task.clone());
        task
    }

    pub async fn get_task(&self, task_id: &str) -> Option<Task> {
        self.state.read().await.tasks.get(task_id).cloned()
    }

    pub async fn list_tasks(&self) -> Vec<Task> {
        let state = self.state.read().await;
        let mut tasks: Vec<Task> = state.tasks.values().cloned().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        tasks
    }

    /// Tasks that are pending or queued.
    pub async fn pending_tasks(&self) -> Vec<Task> {
        self.list_tasks()
            .await
            .into_iter()
            .filter(|t| matches!(t.status, TaskStatus::Pending | TaskStatus::Queued))
            .collect()
    }

    /// Hand `task_id` to `agent_id`.
    ///
    /// The availability check and the claim happen under one write lock: of
    /// several callers racing for the same idle agent exactly one succeeds
    /// and the rest get [`RegistryError::AgentBusy`].
    ///
    /// Only a pending task, or a queued one already reserved for `agent_id`,
    /// can be assigned. Finished tasks yield
    /// [`RegistryError::TaskAlreadyFinished`]; running tasks and tasks queued
    /// for another agent yield [`RegistryError::TaskNotAssignable`].
    pub async fn assign_task(&self, task_id: &str, agent_id: &str) -> Result<(), RegistryError> {
        let mut state = self.state.write().await;
        let RegistryState { agents, tasks } = &mut *state;

        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| RegistryError::TaskNotFound(task_id.to_string()))?;
        let agent = agents
            .get_mut(agent_id)
            .ok_or_else(|| RegistryError::AgentNotFound(agent_id.to_string()))?;

        if task.status.is_terminal() {
            return Err(RegistryError::TaskAlreadyFinished(task_id.to_string()));
        }
        let reserved_here = task.status == TaskStatus::Queued
            && task.assigned_to.as_deref() == Some(agent_id)
            && agent.current_task.as_deref() == Some(task_id);
        if task.status != TaskStatus::Pending && !reserved_here {
            return Err(RegistryError::TaskNotAssignable(task_id.to_string()));
        }

        if agent.status != AgentStatus::Idle && !reserved_here {
            return Err(RegistryError::AgentBusy(agent_id.to_string()));
        }

        let now = Utc::now();
        task.assigned_to = Some(agent_id.to_string());
        task.status = TaskStatus::InProgress;
        task.started_at = Some(now);
        task.updated_at = now;

        agent.status = AgentStatus::Working;
        agent.current_task = Some(task_id.to_string());
        agent.updated_at = now;

        tracing::info!(task_id = %task_id, agent_id = %agent_id, "Assigned task");
        Ok(())
    }

    /// Mark a task completed and release its agent.
    ///
    /// Completing a task that already reached a terminal state is rejected
    /// with [`RegistryError::TaskAlreadyFinished`] and changes nothing.
    pub async fn complete_task(
        &self,
        task_id: &str,
        result: Option<TaskResult>,
    ) -> Result<(), RegistryError> {
        self.finish_task(task_id, TaskStatus::Completed, result).await
    }

    /// Mark a task failed and release its agent.
    pub async fn fail_task(
        &self,
        task_id: &str,
        result: Option<TaskResult>,
    ) -> Result<(), RegistryError> {
        self.finish_task(task_id, TaskStatus::Failed, result).await
    }

    async fn finish_task(
        &self,
        task_id: &str,
        status: TaskStatus,
        result: Option<TaskResult>,
    ) -> Result<(), RegistryError> {
        let mut state = self.state.write().await;
        let RegistryState { agents, tasks } = &mut *state;

        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| RegistryError::TaskNotFound(task_id.to_string()))?;

        if task.status.is_terminal() {
            return Err(RegistryError::TaskAlreadyFinished(task_id.to_string()));
        }

        let now = Utc::now();
        let duration_ms = result.as_ref().map(|r| r.duration_ms).unwrap_or(0);
        task.status = status;
        task.completed_at = Some(now);
        task.updated_at = now;
        task.result = result;

        if let Some(agent_id) = task.assigned_to.as_deref()
            && let Some(agent) = agents.get_mut(agent_id)
        {
            // A stopped agent stays offline; only release a working one.
            if agent.current_task.as_deref() == Some(task_id) {
                agent.status = AgentStatus::Idle;
                agent.current_task = None;
            }
            if status == TaskStatus::Completed {
                agent.stats.record_success(duration_ms, now);
            } else {
                agent.stats.record_failure(now);
            }
            agent.updated_at = now;
        }

        tracing::info!(task_id = %task_id, status = %status, "Task finished");
        Ok(())
    }

    /// Pair pending tasks with idle, auto-assign agents by label overlap.
    ///
    /// First match wins. Tasks are visited highest priority first, then
    /// oldest first; agents in ID order. Returns the number of assignments.
    pub async fn auto_assign(&self) -> usize {
        let mut state = self.state.write().await;
        let RegistryState { agents, tasks } = &mut *state;

        let mut task_ids: Vec<(String, _, _)> = tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .map(|t| (t.id.clone(), t.priority, t.created_at))
            .collect();
        task_ids.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)).then(a.0.cmp(&b.0)));

        let mut agent_ids: Vec<String> = agents.keys().cloned().collect();
        agent_ids.sort();

        let mut assigned = 0;
        for (task_id, _, _) in task_ids {
            let Some(task) = tasks.get_mut(&task_id) else {
                continue;
            };

            let chosen = agent_ids.iter().find(|id| {
                agents
                    .get(id.as_str())
                    .is_some_and(|a| a.accepts_auto_assign() && matches_labels(&a.labels, &task.labels))
            });

            let Some(agent_id) = chosen else {
                continue;
            };
            let Some(agent) = agents.get_mut(agent_id.as_str()) else {
                continue;
            };

            let now = Utc::now();
            task.assigned_to = Some(agent_id.clone());
            task.status = TaskStatus::Queued;
            task.updated_at = now;

            agent.status = AgentStatus::Working;
            agent.current_task = Some(task_id.clone());
            agent.updated_at = now;

            tracing::info!(task_id = %task_id, agent_id = %agent_id, "Auto-assigned task by labels");
            assigned += 1;
        }

        assigned
    }

    /// Aggregate counts from one scan under the shared lock.
    pub async fn stats(&self) -> RegistryStats {
        let state = self.state.read().await;
        let mut stats = RegistryStats {
            total_agents: state.agents.len(),
            total_tasks: state.tasks.len(),
            ..Default::default()
        };

        for agent in state.agents.values() {
            match agent.status {
                AgentStatus::Idle => stats.idle_agents += 1,
                AgentStatus::Working | AgentStatus::Paused => stats.active_agents += 1,
                AgentStatus::Error | AgentStatus::Offline => {}
            }
        }

        for task in state.tasks.values() {
            match task.status {
                TaskStatus::Completed => stats.completed_tasks += 1,
                TaskStatus::Failed => stats.failed_tasks += 1,
                _ => {}
            }
        }

        stats
    }
}
