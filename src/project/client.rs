//! Client for the external project tracker API.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::config::SyncConfig;
use crate::error::ProjectError;
use crate::project::events::SUBSCRIBED_EVENTS;
use crate::project::types::{
    AssignmentRequest, AssignmentStatus, ExternalTask, TrackerStatus, WebhookRegistration,
};

/// Operations the sync manager needs from a tracker.
#[async_trait]
pub trait ProjectClient: Send + Sync {
    /// List tasks with the given status.
    async fn list_tasks(&self, status: TrackerStatus) -> Result<Vec<ExternalTask>, ProjectError>;

    /// Fetch a single task.
    async fn get_task(&self, task_id: &str) -> Result<ExternalTask, ProjectError>;

    /// Push a status change for a task.
    async fn update_task_status(
        &self,
        task_id: &str,
        status: TrackerStatus,
    ) -> Result<(), ProjectError>;

    /// Record that `agent_id` took `task_id`.
    async fn create_assignment(&self, task_id: &str, agent_id: &str) -> Result<(), ProjectError>;

    /// Ask the tracker to deliver task events to `url`.
    async fn register_webhook(&self, url: &str) -> Result<(), ProjectError>;
}

/// `list_tasks` accepts a bare array or an object wrapping one.
#[derive(Deserialize)]
#[serde(untagged)]
enum TaskList {
    Bare(Vec<ExternalTask>),
    Wrapped { tasks: Vec<ExternalTask> },
}

impl From<TaskList> for Vec<ExternalTask> {
    fn from(list: TaskList) -> Self {
        match list {
            TaskList::Bare(tasks) | TaskList::Wrapped { tasks } => tasks,
        }
    }
}

/// [`ProjectClient`] over the tracker's JSON HTTP API.
pub struct HttpProjectClient {
    base_url: String,
    api_key: SecretString,
    http_client: reqwest::Client,
}

impl HttpProjectClient {
    /// Create a client for `base_url`. A trailing slash is ignored.
    pub fn new(base_url: &str, api_key: SecretString) -> Result<Self, ProjectError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ProjectError::Request {
                endpoint: base_url.to_string(),
                source: e,
            })?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            http_client,
        })
    }

    /// Create a client from sync settings.
    pub fn from_config(config: &SyncConfig) -> Result<Self, ProjectError> {
        Self::new(
            &config.base_url,
            SecretString::from(config.api_key.expose_secret().to_string()),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn task_path(task_id: &str) -> String {
        format!("/api/v1/tasks/{}", urlencoding::encode(task_id))
    }

    /// Send with auth and reject non-success statuses.
    async fn send(
        &self,
        endpoint: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, ProjectError> {
        let response = request
            .bearer_auth(self.api_key.expose_secret())
            .send()
            .await
            .map_err(|e| ProjectError::Request {
                endpoint: endpoint.to_string(),
                source: e,
            })?;

        if !response.status().is_success() {
            return Err(ProjectError::Status {
                endpoint: endpoint.to_string(),
                status: response.status().as_u16(),
            });
        }

        Ok(response)
    }

    async fn decode<T: DeserializeOwned>(
        endpoint: &str,
        response: reqwest::Response,
    ) -> Result<T, ProjectError> {
        response
            .json()
            .await
            .map_err(|e| ProjectError::InvalidResponse {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl ProjectClient for HttpProjectClient {
    async fn list_tasks(&self, status: TrackerStatus) -> Result<Vec<ExternalTask>, ProjectError> {
        let endpoint = "/api/v1/tasks";
        let request = self
            .http_client
            .get(self.url(endpoint))
            .query(&[("status", status.as_str())]);
        let response = self.send(endpoint, request).await?;
        let list: TaskList = Self::decode(endpoint, response).await?;
        Ok(list.into())
    }

    async fn get_task(&self, task_id: &str) -> Result<ExternalTask, ProjectError> {
        let endpoint = Self::task_path(task_id);
        let request = self.http_client.get(self.url(&endpoint));
        let response = self.send(&endpoint, request).await?;
        Self::decode(&endpoint, response).await
    }

    async fn update_task_status(
        &self,
        task_id: &str,
        status: TrackerStatus,
    ) -> Result<(), ProjectError> {
        let endpoint = Self::task_path(task_id);
        let request = self
            .http_client
            .patch(self.url(&endpoint))
            .json(&serde_json::json!({ "status": status.as_str() }));
        self.send(&endpoint, request).await?;
        Ok(())
    }

    async fn create_assignment(&self, task_id: &str, agent_id: &str) -> Result<(), ProjectError> {
        let endpoint = "/api/v1/task-assignments";
        let body = AssignmentRequest {
            task_id: task_id.to_string(),
            agent_id: agent_id.to_string(),
            assigned_at: Utc::now(),
            status: AssignmentStatus::Assigned,
        };
        let request = self.http_client.post(self.url(endpoint)).json(&body);
        self.send(endpoint, request).await?;
        Ok(())
    }

    async fn register_webhook(&self, url: &str) -> Result<(), ProjectError> {
        let endpoint = "/api/v1/webhooks";
        let body = WebhookRegistration {
            url: url.to_string(),
            events: SUBSCRIBED_EVENTS.join(","),
        };
        let request = self.http_client.post(self.url(endpoint)).json(&body);
        self.send(endpoint, request).await?;
        Ok(())
    }
}
