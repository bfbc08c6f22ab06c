//! Synchronization with an external project tracker.
//!
//! - [`ProjectClient`] / [`HttpProjectClient`]: the tracker's REST API
//! - [`ProjectSyncManager`]: mirror, auto-assign, execution dispatch
//! - [`webhook`]: axum listener feeding events into the manager
//! - [`TaskExecutor`]: what actually runs a task for an agent

mod client;
mod dispatcher;
mod events;
mod executor;
mod manager;
mod types;
pub mod webhook;

pub use client::{HttpProjectClient, ProjectClient};
pub use dispatcher::{DispatchJob, Dispatcher};
pub use events::{
    RawWebhookEvent, SUBSCRIBED_EVENTS, TASK_ASSIGNED, TASK_CREATED, TASK_UPDATED, TrackerEvent,
};
pub use executor::{SimulatedExecutor, TaskExecutor};
pub use manager::{PollSummary, ProjectSyncManager};
pub use types::{
    Assignment, AssignmentRequest, AssignmentStatus, ExternalTask, TrackerPriority, TrackerStatus,
    WebhookRegistration,
};
