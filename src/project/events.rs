//! Inbound tracker webhook events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::EventError;
use crate::project::types::{ExternalTask, TrackerStatus};

pub const TASK_CREATED: &str = "task.created";
pub const TASK_UPDATED: &str = "task.updated";
pub const TASK_ASSIGNED: &str = "task.assigned";

/// Event types requested when registering the webhook.
pub const SUBSCRIBED_EVENTS: &[&str] = &[TASK_CREATED, TASK_UPDATED, TASK_ASSIGNED];

/// The webhook envelope exactly as delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawWebhookEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl RawWebhookEvent {
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        let data = match data {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            event_type: event_type.into(),
            timestamp: Some(Utc::now()),
            data,
        }
    }
}

/// A validated tracker event.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    TaskCreated(ExternalTask),
    /// Fields that are `None` were absent from the payload. An empty
    /// assignee clears the assignment.
    TaskUpdated {
        task_id: String,
        status: Option<TrackerStatus>,
        assignee: Option<String>,
    },
    TaskAssigned {
        task_id: String,
        agent_id: String,
    },
}

impl TrackerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            TrackerEvent::TaskCreated(_) => TASK_CREATED,
            TrackerEvent::TaskUpdated { .. } => TASK_UPDATED,
            TrackerEvent::TaskAssigned { .. } => TASK_ASSIGNED,
        }
    }

    pub fn task_id(&self) -> &str {
        match self {
            TrackerEvent::TaskCreated(task) => &task.id,
            TrackerEvent::TaskUpdated { task_id, .. } | TrackerEvent::TaskAssigned { task_id, .. } => {
                task_id
            }
        }
    }
}

impl TryFrom<RawWebhookEvent> for TrackerEvent {
    type Error = EventError;

    fn try_from(raw: RawWebhookEvent) -> Result<Self, Self::Error> {
        let RawWebhookEvent {
            event_type, mut data, ..
        } = raw;

        match event_type.as_str() {
            TASK_CREATED => {
                let value = data
                    .remove("task")
                    .filter(|v| !v.is_null())
                    .ok_or_else(|| missing(&event_type, "task"))?;
                let task: ExternalTask =
                    serde_json::from_value(value).map_err(|e| EventError::InvalidField {
                        event: event_type.clone(),
                        field: "task".to_string(),
                        reason: e.to_string(),
                    })?;
                if task.id.is_empty() {
                    return Err(missing(&event_type, "task.id"));
                }
                Ok(TrackerEvent::TaskCreated(task))
            }
            TASK_UPDATED => {
                let task_id = required_str(&event_type, &data, "task_id")?;
                let status = optional_str(&event_type, &data, "status")?
                    .map(|s| TrackerStatus::parse(&s));
                let assignee = optional_str(&event_type, &data, "assignee")?;
                Ok(TrackerEvent::TaskUpdated {
                    task_id,
                    status,
                    assignee,
                })
            }
            TASK_ASSIGNED => Ok(TrackerEvent::TaskAssigned {
                task_id: required_str(&event_type, &data, "task_id")?,
                agent_id: required_str(&event_type, &data, "agent_id")?,
            }),
            _ => Err(EventError::UnsupportedType(event_type)),
        }
    }
}

fn missing(event: &str, field: &str) -> EventError {
    EventError::MissingField {
        event: event.to_string(),
        field: field.to_string(),
    }
}

fn required_str(event: &str, data: &Map<String, Value>, field: &str) -> Result<String, EventError> {
    match optional_str(event, data, field)? {
        Some(s) if !s.is_empty() => Ok(s),
        _ => Err(missing(event, field)),
    }
}

fn optional_str(
    event: &str,
    data: &Map<String, Value>,
    field: &str,
) -> Result<Option<String>, EventError> {
    match data.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(EventError::InvalidField {
            event: event.to_string(),
            field: field.to_string(),
            reason: format!("expected a string, got {}", other),
        }),
    }
}
