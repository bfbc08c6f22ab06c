//! Tracker wire types and local assignment records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::agents::{Task, TaskPriority, TaskStatus};

/// Task status as the tracker names it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerStatus {
    #[default]
    Todo,
    InProgress,
    Done,
    Blocked,
    Cancelled,
    /// Any status this crate does not know about.
    #[serde(other)]
    Unknown,
}

impl TrackerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerStatus::Todo => "todo",
            TrackerStatus::InProgress => "in_progress",
            TrackerStatus::Done => "done",
            TrackerStatus::Blocked => "blocked",
            TrackerStatus::Cancelled => "cancelled",
            TrackerStatus::Unknown => "unknown",
        }
    }

    /// Parse a status string; unrecognized values become `Unknown`.
    pub fn parse(s: &str) -> Self {
        match s {
            "todo" => TrackerStatus::Todo,
            "in_progress" => TrackerStatus::InProgress,
            "done" => TrackerStatus::Done,
            "blocked" => TrackerStatus::Blocked,
            "cancelled" => TrackerStatus::Cancelled,
            _ => TrackerStatus::Unknown,
        }
    }

    /// Local status for this tracker status. `None` for `Unknown`.
    pub fn to_task_status(self) -> Option<TaskStatus> {
        match self {
            TrackerStatus::Todo => Some(TaskStatus::Pending),
            TrackerStatus::InProgress => Some(TaskStatus::InProgress),
            TrackerStatus::Done => Some(TaskStatus::Completed),
            TrackerStatus::Blocked => Some(TaskStatus::Failed),
            TrackerStatus::Cancelled => Some(TaskStatus::Cancelled),
            TrackerStatus::Unknown => None,
        }
    }
}

/// Task priority as the tracker names it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
    #[serde(other)]
    Unknown,
}

impl From<TrackerPriority> for TaskPriority {
    fn from(p: TrackerPriority) -> Self {
        match p {
            TrackerPriority::Low => TaskPriority::Low,
            TrackerPriority::Medium | TrackerPriority::Unknown => TaskPriority::Medium,
            TrackerPriority::High => TaskPriority::High,
            TrackerPriority::Critical => TaskPriority::Urgent,
        }
    }
}

/// Treat an explicit JSON `null` like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A task record as served by the tracker API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalTask {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub priority: TrackerPriority,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: TrackerStatus,
    /// Empty when unassigned.
    #[serde(default, deserialize_with = "null_as_default")]
    pub assignee: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub labels: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
}

impl ExternalTask {
    /// Create a bare `todo` task; mostly useful for tests and fakes.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            priority: TrackerPriority::default(),
            status: TrackerStatus::Todo,
            assignee: String::new(),
            labels: Vec::new(),
            metadata: serde_json::Map::new(),
            created_at: None,
            updated_at: None,
            due_date: None,
        }
    }

    pub fn assignee(&self) -> Option<&str> {
        if self.assignee.is_empty() {
            None
        } else {
            Some(&self.assignee)
        }
    }

    /// Build a local task for a tracker record seen for the first time.
    pub fn to_task(&self, source: &str) -> Task {
        let mut task = Task::new(self.title.clone()).with_external(self.id.clone(), source);
        task.id = uuid::Uuid::new_v4().to_string();
        if let Some(created) = self.created_at {
            task.created_at = created;
        }
        self.apply_to(&mut task);
        task
    }

    /// Overwrite a mirrored task with this record, keeping its local ID.
    ///
    /// An `Unknown` tracker status leaves the local status untouched.
    pub fn apply_to(&self, task: &mut Task) {
        self.apply_details(task);
        if let Some(status) = self.status.to_task_status() {
            task.status = status;
        }
        task.assigned_to = self.assignee().map(str::to_string);
    }

    /// Overwrite descriptive fields only, leaving status and assignee alone.
    pub fn apply_details(&self, task: &mut Task) {
        task.title = self.title.clone();
        task.description = self.description.clone();
        task.priority = self.priority.into();
        task.labels = self.labels.clone();
        task.updated_at = self.updated_at.unwrap_or_else(Utc::now);
        for (key, value) in &self.metadata {
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            task.meta.insert(key.clone(), value);
        }
    }
}

/// Status of a local assignment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Assigned,
    InProgress,
    Completed,
    Failed,
}

impl AssignmentStatus {
    /// Not yet in a terminal state.
    pub fn is_active(&self) -> bool {
        matches!(self, AssignmentStatus::Assigned | AssignmentStatus::InProgress)
    }
}

/// Binds a tracker task to the agent executing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    /// The tracker's task ID.
    pub task_id: String,
    pub agent_id: String,
    pub assigned_at: DateTime<Utc>,
    pub status: AssignmentStatus,
    /// Output on success, error text on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Assignment {
    pub fn new(task_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            agent_id: agent_id.into(),
            assigned_at: Utc::now(),
            status: AssignmentStatus::Assigned,
            result: None,
            started_at: None,
            completed_at: None,
        }
    }
}

/// Body of the tracker's create-assignment call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentRequest {
    pub task_id: String,
    pub agent_id: String,
    pub assigned_at: DateTime<Utc>,
    pub status: AssignmentStatus,
}

/// Body of the tracker's register-webhook call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookRegistration {
    pub url: String,
    /// Comma-separated event types.
    pub events: String,
}
