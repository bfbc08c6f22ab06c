//! Agent types.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of work an agent is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Coder,
    Reviewer,
    Planner,
    Documenter,
    Tester,
    General,
}

impl AgentType {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Coder => "coder",
            AgentType::Reviewer => "reviewer",
            AgentType::Planner => "planner",
            AgentType::Documenter => "documenter",
            AgentType::Tester => "tester",
            AgentType::General => "general",
        }
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for AgentType {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "coder" => Ok(AgentType::Coder),
            "reviewer" => Ok(AgentType::Reviewer),
            "planner" => Ok(AgentType::Planner),
            "documenter" => Ok(AgentType::Documenter),
            "tester" => Ok(AgentType::Tester),
            "general" => Ok(AgentType::General),
            other => Err(format!("unknown agent type: {}", other)),
        }
    }
}

/// Current status of an agent.
///
/// `Working` is set if and only if the agent has a current task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Available for new work.
    Idle,
    /// Holding exactly one task.
    Working,
    /// Reserved; no core operation drives an agent here yet.
    Paused,
    Error,
    /// Stopped explicitly.
    Offline,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Working => "working",
            AgentStatus::Paused => "paused",
            AgentStatus::Error => "error",
            AgentStatus::Offline => "offline",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-agent settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Whether auto-assignment may hand this agent work.
    pub auto_assign: bool,
    /// Advertised concurrency. The registry grants one claim at a time.
    pub max_concurrent: u32,
    /// Execution timeout in seconds.
    pub timeout_secs: u64,
    /// Kinds of tasks this agent prefers (informational).
    #[serde(default)]
    pub preferred_tasks: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            auto_assign: true,
            max_concurrent: 1,
            timeout_secs: 300,
            preferred_tasks: Vec::new(),
        }
    }
}

/// Running performance counters for an agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentStats {
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    /// Cumulative execution time in milliseconds.
    pub total_time_ms: u64,
    /// Average execution time over completed tasks in milliseconds.
    pub avg_time_ms: u64,
    pub last_active: Option<DateTime<Utc>>,
    /// `completed / (completed + failed)`, 0.0 before any outcome.
    pub success_rate: f64,
}

impl AgentStats {
    /// Record a successful task.
    pub fn record_success(&mut self, duration_ms: u64, at: DateTime<Utc>) {
        self.tasks_completed += 1;
        self.total_time_ms += duration_ms;
        self.avg_time_ms = self.total_time_ms / self.tasks_completed;
        self.last_active = Some(at);
        self.recompute_success_rate();
    }

    /// Record a failed task. Failures do not contribute to the average time.
    pub fn record_failure(&mut self, at: DateTime<Utc>) {
        self.tasks_failed += 1;
        self.last_active = Some(at);
        self.recompute_success_rate();
    }

    fn recompute_success_rate(&mut self) {
        let finished = self.tasks_completed + self.tasks_failed;
        self.success_rate = if finished == 0 {
            0.0
        } else {
            self.tasks_completed as f64 / finished as f64
        };
    }
}

/// A worker entity capable of executing tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub agent_type: AgentType,
    pub status: AgentStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Labels matched by the registry's label auto-assign.
    #[serde(default)]
    pub labels: Vec<String>,
    /// Capabilities matched by the keyword scorer.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// 0-100, lower is more available.
    #[serde(default)]
    pub load: u8,
    pub config: AgentConfig,
    #[serde(default)]
    pub stats: AgentStats,
    /// ID of the task this agent is working on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub meta: HashMap<String, String>,
}

impl Agent {
    /// Create an agent with default config. The ID is assigned on registration.
    pub fn new(name: impl Into<String>, agent_type: AgentType) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            name: name.into(),
            agent_type,
            status: AgentStatus::Idle,
            description: String::new(),
            labels: Vec::new(),
            capabilities: Vec::new(),
            load: 0,
            config: AgentConfig::default(),
            stats: AgentStats::default(),
            current_task: None,
            created_at: now,
            updated_at: now,
            meta: HashMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    /// Set the load factor, clamped to 100.
    pub fn with_load(mut self, load: u8) -> Self {
        self.load = load.min(100);
        self
    }

    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    /// Whether the agent can take new work right now.
    pub fn is_available(&self) -> bool {
        self.status == AgentStatus::Idle
    }

    /// Whether the agent takes part in auto-assignment.
    pub fn accepts_auto_assign(&self) -> bool {
        self.is_available() && self.config.auto_assign
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_rate_formula() {
        let mut stats = AgentStats::default();
        let now = Utc::now();

        stats.record_success(100, now);
        stats.record_failure(now);
        stats.record_success(300, now);
        stats.record_failure(now);
        stats.record_failure(now);

        assert_eq!(stats.tasks_completed, 2);
        assert_eq!(stats.tasks_failed, 3);
        assert_eq!(stats.success_rate, 2.0 / 5.0);
        assert_eq!(stats.total_time_ms, 400);
        assert_eq!(stats.avg_time_ms, 200);
    }

    #[test]
    fn test_load_is_clamped() {
        let agent = Agent::new("busy", AgentType::General).with_load(250);
        assert_eq!(agent.load, 100);
    }

    #[test]
    fn test_agent_type_round_trip_through_str() {
        for t in [
            AgentType::Coder,
            AgentType::Reviewer,
            AgentType::Planner,
            AgentType::Documenter,
            AgentType::Tester,
            AgentType::General,
        ] {
            assert_eq!(AgentType::try_from(t.as_str()).unwrap(), t);
        }
        assert!(AgentType::try_from("wizard").is_err());
    }

    #[test]
    fn test_auto_assign_requires_idle_and_opt_in() {
        let mut agent = Agent::new("a", AgentType::Coder);
        assert!(agent.accepts_auto_assign());

        agent.config.auto_assign = false;
        assert!(!agent.accepts_auto_assign());

        agent.config.auto_assign = true;
        agent.status = AgentStatus::Offline;
        assert!(!agent.accepts_auto_assign());
    }
}
