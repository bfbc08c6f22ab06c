//! Keeps a local mirror of tracker tasks and drives their execution.
//!
//! Work enters through two doors: the poll loop ([`ProjectSyncManager::poll_once`])
//! and webhook events ([`ProjectSyncManager::ingest`]). Both upsert into the
//! mirror, optionally auto-assign an agent, and hand assignments to the
//! dispatcher. The mirror lock is never held across a tracker call or an
//! executor run.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::agents::{Agent, Registry, Task, TaskResult, TaskStatus};
use crate::assignment::find_best_agent;
use crate::config::SyncConfig;
use crate::error::{EventError, ExecutionError, ProjectError, RegistryError, SyncError};
use crate::project::client::ProjectClient;
use crate::project::dispatcher::{DispatchJob, Dispatcher};
use crate::project::events::{RawWebhookEvent, TrackerEvent};
use crate::project::executor::TaskExecutor;
use crate::project::types::{Assignment, AssignmentStatus, ExternalTask, TrackerStatus};
use crate::project::webhook;

/// Counts from one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollSummary {
    /// Tasks returned by the tracker.
    pub fetched: usize,
    pub created: usize,
    pub updated: usize,
    /// Tasks auto-assigned to an agent this cycle.
    pub assigned: usize,
    /// Assignments handed to the dispatcher this cycle.
    pub dispatched: usize,
}

/// Next step for a task after it was upserted, decided under the mirror
/// lock and carried out after it is released.
enum FollowUp {
    Nothing,
    AutoAssign { task_id: String, task: Task },
    Dispatch(DispatchJob),
}

/// Tracker-sourced tasks and their assignments, keyed by tracker task ID.
#[derive(Default)]
struct MirrorState {
    tasks: HashMap<String, Task>,
    assignments: HashMap<String, Assignment>,
    /// Tasks being auto-assigned, queued on or running in the dispatcher.
    in_flight: HashSet<String>,
}

impl MirrorState {
    fn has_active_assignment(&self, task_id: &str) -> bool {
        self.in_flight.contains(task_id)
            || self
                .assignments
                .get(task_id)
                .is_some_and(|a| a.status.is_active())
    }

    /// Insert or refresh a task. Returns true if it was new.
    ///
    /// While a task is in flight its local status and assignee belong to
    /// the execution, so only descriptive fields are refreshed.
    fn upsert(&mut self, ext: &ExternalTask, source: &str) -> bool {
        let in_flight = self.in_flight.contains(&ext.id);
        match self.tasks.get_mut(&ext.id) {
            Some(task) if in_flight => {
                ext.apply_details(task);
                false
            }
            Some(task) => {
                ext.apply_to(task);
                false
            }
            None => {
                self.tasks.insert(ext.id.clone(), ext.to_task(source));
                true
            }
        }
    }

    fn plan(&mut self, task_id: &str, auto_assign: bool) -> FollowUp {
        if self.in_flight.contains(task_id) {
            return FollowUp::Nothing;
        }
        let Some(task) = self.tasks.get(task_id) else {
            return FollowUp::Nothing;
        };
        if task.status != TaskStatus::Pending {
            return FollowUp::Nothing;
        }

        // An assignment recorded earlier but never started (webhook arrived
        // before the task, or the queue was full) is dispatched now.
        if let Some(assignment) = self.assignments.get(task_id)
            && assignment.status == AssignmentStatus::Assigned
        {
            let job = DispatchJob {
                task_id: task_id.to_string(),
                agent_id: assignment.agent_id.clone(),
            };
            self.mark_queued(task_id, &job.agent_id);
            return FollowUp::Dispatch(job);
        }

        if auto_assign && task.assigned_to.is_none() && !self.has_active_assignment(task_id) {
            let task = task.clone();
            // Pending claim: concurrent planners see the task as taken until
            // the auto-assign finishes or is rolled back.
            self.in_flight.insert(task_id.to_string());
            return FollowUp::AutoAssign {
                task_id: task_id.to_string(),
                task,
            };
        }
        FollowUp::Nothing
    }

    fn mark_queued(&mut self, task_id: &str, agent_id: &str) {
        if let Some(task) = self.tasks.get_mut(task_id) {
            task.status = TaskStatus::Queued;
            task.assigned_to = Some(agent_id.to_string());
            task.updated_at = Utc::now();
        }
        self.in_flight.insert(task_id.to_string());
    }

    /// Record a fresh assignment and mark the task queued.
    fn claim(&mut self, task_id: &str, agent_id: &str) {
        self.assignments
            .insert(task_id.to_string(), Assignment::new(task_id, agent_id));
        self.mark_queued(task_id, agent_id);
    }

    /// Undo `mark_queued` or a pending auto-assign claim. An existing
    /// assignment stays `Assigned`, so the next poll dispatches it again.
    fn release(&mut self, task_id: &str) {
        self.in_flight.remove(task_id);
        if let Some(task) = self.tasks.get_mut(task_id)
            && task.status == TaskStatus::Queued
        {
            task.status = TaskStatus::Pending;
            task.updated_at = Utc::now();
        }
    }
}

struct Inner {
    config: SyncConfig,
    client: Arc<dyn ProjectClient>,
    registry: Arc<Registry>,
    executor: Arc<dyn TaskExecutor>,
    mirror: RwLock<MirrorState>,
    dispatcher: Dispatcher<DispatchJob>,
    cancel: CancellationToken,
    tasks: TaskTracker,
    started: AtomicBool,
    webhook_addr: OnceLock<SocketAddr>,
}

/// Synchronizes tracker tasks with local agents.
///
/// Cloning is cheap and every clone drives the same state.
#[derive(Clone)]
pub struct ProjectSyncManager {
    inner: Arc<Inner>,
}

impl ProjectSyncManager {
    pub fn new(
        config: SyncConfig,
        client: Arc<dyn ProjectClient>,
        registry: Arc<Registry>,
        executor: Arc<dyn TaskExecutor>,
    ) -> Self {
        let dispatcher = Dispatcher::new(config.workers, config.queue_capacity);
        Self {
            inner: Arc::new(Inner {
                config,
                client,
                registry,
                executor,
                mirror: RwLock::new(MirrorState::default()),
                dispatcher,
                cancel: CancellationToken::new(),
                tasks: TaskTracker::new(),
                started: AtomicBool::new(false),
                webhook_addr: OnceLock::new(),
            }),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Address the webhook listener is bound to, once started.
    pub fn webhook_addr(&self) -> Option<SocketAddr> {
        self.inner.webhook_addr.get().copied()
    }

    // ==================== Lifecycle ====================

    /// Start workers, the webhook listener and the poll loop.
    ///
    /// Does nothing unless sync is enabled with credentials.
    pub async fn start(&self) -> Result<(), SyncError> {
        let inner = &self.inner;
        if !inner.config.is_active() {
            tracing::info!("Project sync disabled or missing credentials, not starting");
            return Ok(());
        }
        if inner.started.swap(true, Ordering::SeqCst) {
            return Err(SyncError::AlreadyStarted);
        }

        let listener = match inner.config.webhook.bind_addr {
            Some(addr) => match TcpListener::bind(addr).await {
                Ok(listener) => Some(listener),
                Err(e) => {
                    inner.started.store(false, Ordering::SeqCst);
                    return Err(SyncError::Bind {
                        addr: addr.to_string(),
                        source: e,
                    });
                }
            },
            None => None,
        };

        let manager = self.clone();
        inner
            .dispatcher
            .spawn_workers(&inner.tasks, &inner.cancel, move |job| {
                let manager = manager.clone();
                async move { manager.execute(job).await }
            });

        if let Some(listener) = listener {
            if let Ok(addr) = listener.local_addr() {
                let _ = inner.webhook_addr.set(addr);
                tracing::info!(%addr, "Webhook listener started");
            }
            let manager = self.clone();
            let cancel = inner.cancel.clone();
            inner.tasks.spawn(async move {
                if let Err(e) = webhook::serve(listener, manager, cancel).await {
                    tracing::warn!(error = %e, "Webhook listener failed");
                }
            });
        }

        let callback = inner
            .config
            .webhook
            .public_url
            .clone()
            .or_else(|| self.webhook_addr().map(|a| format!("http://{}/webhook", a)));
        if let Some(url) = callback {
            match inner.client.register_webhook(&url).await {
                Ok(()) => tracing::info!(url = %url, "Registered tracker webhook"),
                Err(e) => tracing::warn!(url = %url, error = %e, "Failed to register webhook"),
            }
        }

        let manager = self.clone();
        inner.tasks.spawn(async move { manager.poll_loop().await });

        tracing::info!(
            workers = inner.dispatcher.workers(),
            poll_interval_secs = inner.config.poll_interval().as_secs(),
            auto_assign = inner.config.auto_assign,
            "Project sync started"
        );
        Ok(())
    }

    /// Stop accepting work and wait up to the shutdown grace period for
    /// running executions. Never fails; a timeout is only logged.
    pub async fn stop(&self) -> Result<(), SyncError> {
        let inner = &self.inner;
        tracing::info!("Stopping project sync");
        inner.cancel.cancel();
        inner.tasks.close();

        let grace = inner.config.shutdown_grace();
        if tokio::time::timeout(grace, inner.tasks.wait()).await.is_err() {
            tracing::warn!(
                outstanding = inner.tasks.len(),
                grace_secs = grace.as_secs(),
                "Timed out waiting for sync work to finish"
            );
        } else {
            tracing::info!("Project sync stopped");
        }
        Ok(())
    }

    async fn poll_loop(&self) {
        let mut ticker = tokio::time::interval(self.inner.config.poll_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.inner.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.poll_once().await {
                Ok(summary) => tracing::debug!(
                    fetched = summary.fetched,
                    created = summary.created,
                    assigned = summary.assigned,
                    "Poll cycle finished"
                ),
                Err(e) if e.is_transient() => {
                    tracing::warn!(error = %e, "Failed to load tasks from tracker")
                }
                Err(e) => tracing::error!(error = %e, "Tracker rejected task listing"),
            }
        }
        tracing::debug!("Poll loop stopped");
    }

    // ==================== Sync ====================

    /// Run one poll cycle: fetch `todo` tasks, upsert them, and assign or
    /// dispatch the ones that are ready.
    pub async fn poll_once(&self) -> Result<PollSummary, ProjectError> {
        let external = self.inner.client.list_tasks(TrackerStatus::Todo).await?;

        let mut summary = PollSummary {
            fetched: external.len(),
            ..PollSummary::default()
        };
        let mut follow_ups = Vec::new();
        {
            let mut mirror = self.inner.mirror.write().await;
            for ext in &external {
                if mirror.upsert(ext, &self.inner.config.source) {
                    summary.created += 1;
                } else {
                    summary.updated += 1;
                }
                follow_ups.push(mirror.plan(&ext.id, self.inner.config.auto_assign));
            }
        }

        for follow_up in follow_ups {
            match follow_up {
                FollowUp::Nothing => {}
                FollowUp::AutoAssign { task_id, task } => {
                    if self.auto_assign(task_id, task).await {
                        summary.assigned += 1;
                        summary.dispatched += 1;
                    }
                }
                FollowUp::Dispatch(job) => {
                    if self.dispatch(job).await {
                        summary.dispatched += 1;
                    }
                }
            }
        }

        tracing::info!(
            fetched = summary.fetched,
            created = summary.created,
            "Loaded tasks from tracker"
        );
        Ok(summary)
    }

    /// Parse and apply a raw webhook payload.
    pub async fn ingest_raw(&self, raw: RawWebhookEvent) -> Result<(), EventError> {
        let event = TrackerEvent::try_from(raw)?;
        self.ingest(event).await;
        Ok(())
    }

    /// Apply a tracker event to the mirror.
    pub async fn ingest(&self, event: TrackerEvent) {
        if self.inner.cancel.is_cancelled() {
            tracing::debug!(event = event.kind(), "Sync stopped, dropping event");
            return;
        }
        tracing::debug!(event = event.kind(), task_id = event.task_id(), "Handling tracker event");

        match event {
            TrackerEvent::TaskCreated(ext) => {
                let follow_up = {
                    let mut mirror = self.inner.mirror.write().await;
                    mirror.upsert(&ext, &self.inner.config.source);
                    mirror.plan(&ext.id, self.inner.config.auto_assign)
                };
                tracing::info!(task_id = %ext.id, title = %ext.title, "New task from tracker");
                match follow_up {
                    FollowUp::Nothing => {}
                    FollowUp::AutoAssign { task_id, task } => {
                        self.auto_assign(task_id, task).await;
                    }
                    FollowUp::Dispatch(job) => {
                        self.dispatch(job).await;
                    }
                }
            }
            TrackerEvent::TaskUpdated {
                task_id,
                status,
                assignee,
            } => {
                let mut mirror = self.inner.mirror.write().await;
                let in_flight = mirror.in_flight.contains(&task_id);
                let Some(task) = mirror.tasks.get_mut(&task_id) else {
                    tracing::debug!(task_id = %task_id, "Update for unknown task dropped");
                    return;
                };
                if !in_flight {
                    if let Some(status) = status.and_then(TrackerStatus::to_task_status) {
                        task.status = status;
                    }
                    if let Some(assignee) = assignee {
                        task.assigned_to = (!assignee.is_empty()).then_some(assignee);
                    }
                }
                task.updated_at = Utc::now();
            }
            TrackerEvent::TaskAssigned { task_id, agent_id } => {
                self.record_assignment(task_id, agent_id).await;
            }
        }
    }

    /// Record an assignment made at the tracker and dispatch it if the task
    /// is known and waiting.
    async fn record_assignment(&self, task_id: String, agent_id: String) {
        let job = {
            let mut mirror = self.inner.mirror.write().await;
            if mirror.in_flight.contains(&task_id) {
                tracing::debug!(
                    task_id = %task_id,
                    agent_id = %agent_id,
                    "Task already executing, ignoring assignment"
                );
                return;
            }
            mirror
                .assignments
                .insert(task_id.clone(), Assignment::new(&task_id, &agent_id));

            let pending = mirror
                .tasks
                .get(&task_id)
                .is_some_and(|t| t.status == TaskStatus::Pending);
            if pending {
                mirror.mark_queued(&task_id, &agent_id);
                Some(DispatchJob {
                    task_id: task_id.clone(),
                    agent_id: agent_id.clone(),
                })
            } else {
                None
            }
        };

        tracing::info!(task_id = %task_id, agent_id = %agent_id, "Task assigned");
        if let Some(job) = job {
            self.dispatch(job).await;
        }
    }

    /// Pick an agent for `task`, claim it in the registry, record the
    /// assignment at the tracker and locally, and dispatch it. Returns true
    /// if the task was dispatched.
    ///
    /// Called with the task marked in flight by `plan`; every path that
    /// does not dispatch clears that mark.
    async fn auto_assign(&self, task_id: String, task: Task) -> bool {
        let agents = self.inner.registry.list_agents().await;
        let Some(agent) = find_best_agent(&task, &agents) else {
            tracing::debug!(task_id = %task_id, "No suitable agent for task");
            self.inner.mirror.write().await.release(&task_id);
            return false;
        };
        let agent_id = agent.id.clone();
        let agent_name = agent.name.clone();

        if let Err(e) = self.inner.registry.claim_agent(&agent_id, &task_id).await {
            tracing::debug!(
                task_id = %task_id,
                agent_id = %agent_id,
                error = %e,
                "Agent taken concurrently"
            );
            self.inner.mirror.write().await.release(&task_id);
            return false;
        }

        if let Err(e) = self
            .inner
            .client
            .create_assignment(&task_id, &agent_id)
            .await
        {
            tracing::warn!(
                task_id = %task_id,
                agent_id = %agent_id,
                error = %e,
                "Failed to create assignment"
            );
            self.release_agent(&agent_id, &task_id, None).await;
            self.inner.mirror.write().await.release(&task_id);
            return false;
        }

        {
            let mut mirror = self.inner.mirror.write().await;
            let taken = mirror
                .assignments
                .get(&task_id)
                .is_some_and(|a| a.status.is_active());
            if taken {
                tracing::debug!(task_id = %task_id, "Task was assigned concurrently");
                mirror.release(&task_id);
                drop(mirror);
                self.release_agent(&agent_id, &task_id, None).await;
                return false;
            }
            mirror.claim(&task_id, &agent_id);
        }

        tracing::info!(
            task_id = %task_id,
            title = %task.title,
            agent = %agent_name,
            "Auto-assigned task"
        );
        self.dispatch(DispatchJob { task_id, agent_id }).await
    }

    /// Hand a claimed task to the dispatcher, rolling the claim back if the
    /// dispatcher refuses it.
    async fn dispatch(&self, job: DispatchJob) -> bool {
        let submitted = if self.inner.cancel.is_cancelled() {
            Err(SyncError::ShuttingDown)
        } else {
            self.inner.dispatcher.try_submit(job.clone())
        };

        match submitted {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    task_id = %job.task_id,
                    agent_id = %job.agent_id,
                    error = %e,
                    "Could not dispatch task, will retry on next poll"
                );
                self.inner.mirror.write().await.release(&job.task_id);
                self.release_agent(&job.agent_id, &job.task_id, None).await;
                false
            }
        }
    }

    /// Return an agent claimed for `task_id` to the registry's idle pool.
    async fn release_agent(
        &self,
        agent_id: &str,
        task_id: &str,
        outcome: Option<(bool, Duration)>,
    ) {
        match self
            .inner
            .registry
            .release_agent(agent_id, task_id, outcome)
            .await
        {
            Ok(()) => {}
            Err(RegistryError::AgentNotFound(_)) => {
                tracing::debug!(agent_id = %agent_id, "Agent no longer registered");
            }
            Err(e) => tracing::warn!(agent_id = %agent_id, error = %e, "Failed to release agent"),
        }
    }

    // ==================== Execution ====================

    async fn execute(&self, job: DispatchJob) {
        let DispatchJob { task_id, agent_id } = job;
        let client = &self.inner.client;

        // Tracker assignments name the agent directly, so it may be busy
        // with other work; the task then waits for the next poll.
        let agent = match self.inner.registry.claim_agent(&agent_id, &task_id).await {
            Ok(agent) => Some(agent),
            Err(RegistryError::AgentNotFound(_)) => None,
            Err(e) => {
                tracing::info!(
                    task_id = %task_id,
                    agent_id = %agent_id,
                    error = %e,
                    "Agent unavailable, deferring task"
                );
                self.inner.mirror.write().await.release(&task_id);
                return;
            }
        };

        let detail = match client.get_task(&task_id).await {
            Ok(detail) => detail,
            Err(e) => {
                if e.is_transient() {
                    tracing::warn!(task_id = %task_id, error = %e, "Failed to fetch task detail");
                } else {
                    tracing::error!(task_id = %task_id, error = %e, "Tracker rejected task detail");
                }
                self.abandon(&task_id, &e).await;
                if agent.is_some() {
                    self.release_agent(&agent_id, &task_id, None).await;
                }
                return;
            }
        };

        if let Err(e) = client
            .update_task_status(&task_id, TrackerStatus::InProgress)
            .await
        {
            tracing::warn!(task_id = %task_id, error = %e, "Failed to update task status");
        }

        let task = self.mark_started(&task_id, &agent_id, &detail).await;
        let started = Instant::now();

        let outcome = match &agent {
            Some(agent) => self.run_executor(&task, agent).await,
            None => Err(ExecutionError::AgentNotFound(agent_id.clone())),
        };
        let elapsed = started.elapsed();

        let tracker_status = match &outcome {
            Ok(_) => TrackerStatus::Done,
            Err(_) => TrackerStatus::Blocked,
        };
        if let Err(e) = client.update_task_status(&task_id, tracker_status).await {
            tracing::warn!(task_id = %task_id, error = %e, "Failed to update task status");
        }

        match &outcome {
            Ok(_) => tracing::info!(
                task_id = %task_id,
                agent_id = %agent_id,
                duration_ms = elapsed.as_millis() as u64,
                "Task completed"
            ),
            Err(e) => tracing::warn!(
                task_id = %task_id,
                agent_id = %agent_id,
                error = %e,
                "Task failed"
            ),
        }

        self.mark_finished(&task_id, &outcome, elapsed).await;

        if agent.is_some() {
            self.release_agent(&agent_id, &task_id, Some((outcome.is_ok(), elapsed)))
                .await;
        }
    }

    async fn run_executor(&self, task: &Task, agent: &Agent) -> Result<String, ExecutionError> {
        let timeout = Duration::from_secs(agent.config.timeout_secs.max(1));
        match tokio::time::timeout(timeout, self.inner.executor.execute(task, agent)).await {
            Ok(result) => result,
            Err(_) => Err(ExecutionError::Timeout(timeout)),
        }
    }

    /// The task never started: fail the assignment and let the task be
    /// picked up again.
    async fn abandon(&self, task_id: &str, error: &ProjectError) {
        let mut mirror = self.inner.mirror.write().await;
        let now = Utc::now();
        if let Some(assignment) = mirror.assignments.get_mut(task_id) {
            assignment.status = AssignmentStatus::Failed;
            assignment.result = Some(error.to_string());
            assignment.completed_at = Some(now);
        }
        if let Some(task) = mirror.tasks.get_mut(task_id)
            && task.status == TaskStatus::Queued
        {
            task.status = TaskStatus::Pending;
            task.assigned_to = None;
            task.updated_at = now;
        }
        mirror.in_flight.remove(task_id);
    }

    /// Mark the assignment and task as running. Returns the task as handed
    /// to the executor.
    async fn mark_started(&self, task_id: &str, agent_id: &str, detail: &ExternalTask) -> Task {
        let mut mirror = self.inner.mirror.write().await;
        let now = Utc::now();

        if let Some(assignment) = mirror.assignments.get_mut(task_id) {
            assignment.status = AssignmentStatus::InProgress;
            assignment.started_at = Some(now);
        }

        let task = mirror
            .tasks
            .entry(task_id.to_string())
            .or_insert_with(|| detail.to_task(&self.inner.config.source));
        detail.apply_details(task);
        task.status = TaskStatus::InProgress;
        task.assigned_to = Some(agent_id.to_string());
        task.started_at = Some(now);
        task.updated_at = now;
        task.clone()
    }

    async fn mark_finished(
        &self,
        task_id: &str,
        outcome: &Result<String, ExecutionError>,
        elapsed: Duration,
    ) {
        let mut mirror = self.inner.mirror.write().await;
        let now = Utc::now();
        let duration_ms = elapsed.as_millis() as u64;

        let (status, task_status, text, result) = match outcome {
            Ok(output) => (
                AssignmentStatus::Completed,
                TaskStatus::Completed,
                output.clone(),
                TaskResult::success(output.clone(), duration_ms),
            ),
            Err(e) => (
                AssignmentStatus::Failed,
                TaskStatus::Failed,
                e.to_string(),
                TaskResult::failure(e.to_string(), duration_ms),
            ),
        };

        if let Some(assignment) = mirror.assignments.get_mut(task_id) {
            assignment.status = status;
            assignment.result = Some(text);
            assignment.completed_at = Some(now);
        }
        if let Some(task) = mirror.tasks.get_mut(task_id) {
            task.status = task_status;
            task.result = Some(result);
            task.completed_at = Some(now);
            task.updated_at = now;
        }
        mirror.in_flight.remove(task_id);
    }

    // ==================== Queries ====================

    /// Mirrored tasks, ordered by tracker ID.
    pub async fn tasks(&self) -> Vec<Task> {
        let mirror = self.inner.mirror.read().await;
        let mut tasks: Vec<Task> = mirror.tasks.values().cloned().collect();
        tasks.sort_by(|a, b| a.external_id.cmp(&b.external_id));
        tasks
    }

    /// A mirrored task by tracker ID.
    pub async fn task(&self, task_id: &str) -> Option<Task> {
        self.inner.mirror.read().await.tasks.get(task_id).cloned()
    }

    pub async fn assignment(&self, task_id: &str) -> Option<Assignment> {
        self.inner.mirror.read().await.assignments.get(task_id).cloned()
    }

    /// All assignments, ordered by tracker task ID.
    pub async fn assignments(&self) -> Vec<Assignment> {
        let mirror = self.inner.mirror.read().await;
        let mut assignments: Vec<Assignment> = mirror.assignments.values().cloned().collect();
        assignments.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        assignments
    }

    /// Whether an execution for `task_id` is queued or running.
    pub async fn is_in_flight(&self, task_id: &str) -> bool {
        self.inner.mirror.read().await.in_flight.contains(task_id)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn ext(id: &str, title: &str) -> ExternalTask {
        ExternalTask::new(id, title)
    }

    #[test]
    fn test_upsert_preserves_local_id() {
        let mut mirror = MirrorState::default();
        assert!(mirror.upsert(&ext("t1", "Old title"), "project"));
        let local_id = mirror.tasks["t1"].id.clone();

        assert!(!mirror.upsert(&ext("t1", "New title"), "project"));
        assert_eq!(mirror.tasks.len(), 1);
        assert_eq!(mirror.tasks["t1"].id, local_id);
        assert_eq!(mirror.tasks["t1"].title, "New title");
    }

    #[test]
    fn test_upsert_in_flight_keeps_local_status() {
        let mut mirror = MirrorState::default();
        mirror.upsert(&ext("t1", "Task"), "project");
        mirror.claim("t1", "agent-1");

        mirror.upsert(&ext("t1", "Task renamed"), "project");
        let task = &mirror.tasks["t1"];
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.assigned_to.as_deref(), Some("agent-1"));
        assert_eq!(task.title, "Task renamed");
    }

    #[test]
    fn test_plan_auto_assign_only_when_eligible() {
        let mut mirror = MirrorState::default();
        mirror.upsert(&ext("t1", "Task"), "project");
        assert!(matches!(mirror.plan("t1", false), FollowUp::Nothing));
        assert!(matches!(
            mirror.plan("t1", true),
            FollowUp::AutoAssign { .. }
        ));

        let mut assigned = ext("t2", "Task");
        assigned.assignee = "someone".to_string();
        mirror.upsert(&assigned, "project");
        assert!(matches!(mirror.plan("t2", true), FollowUp::Nothing));
    }

    #[test]
    fn test_plan_dispatches_recorded_assignment() {
        let mut mirror = MirrorState::default();
        mirror
            .assignments
            .insert("t1".to_string(), Assignment::new("t1", "agent-9"));
        mirror.upsert(&ext("t1", "Task"), "project");

        match mirror.plan("t1", false) {
            FollowUp::Dispatch(job) => assert_eq!(job.agent_id, "agent-9"),
            _ => panic!("expected dispatch"),
        }
        assert!(mirror.in_flight.contains("t1"));
        assert_eq!(mirror.tasks["t1"].status, TaskStatus::Queued);
        // Already in flight: nothing more to do.
        assert!(matches!(mirror.plan("t1", true), FollowUp::Nothing));
    }

    #[test]
    fn test_release_returns_task_to_pending() {
        let mut mirror = MirrorState::default();
        mirror.upsert(&ext("t1", "Task"), "project");
        mirror.claim("t1", "agent-1");
        mirror.release("t1");

        assert!(!mirror.in_flight.contains("t1"));
        assert_eq!(mirror.tasks["t1"].status, TaskStatus::Pending);
        assert_eq!(
            mirror.assignments["t1"].status,
            AssignmentStatus::Assigned
        );
    }

    #[test]
    fn test_auto_assign_plan_is_exclusive_until_released() {
        let mut mirror = MirrorState::default();
        mirror.upsert(&ext("t1", "Task"), "project");

        match mirror.plan("t1", true) {
            FollowUp::AutoAssign { task_id, .. } => assert_eq!(task_id, "t1"),
            _ => panic!("expected auto-assign"),
        }
        // A second planner (poll racing a webhook) backs off.
        assert!(matches!(mirror.plan("t1", true), FollowUp::Nothing));
        assert!(!mirror.upsert(&ext("t1", "Task"), "project"));
        assert!(matches!(mirror.plan("t1", true), FollowUp::Nothing));

        // A failed auto-assign clears the claim and the task is eligible again.
        mirror.release("t1");
        assert_eq!(mirror.tasks["t1"].status, TaskStatus::Pending);
        assert!(matches!(
            mirror.plan("t1", true),
            FollowUp::AutoAssign { .. }
        ));
    }
}
