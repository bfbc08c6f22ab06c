//! Registry behavior under concurrent callers.

use std::sync::Arc;

use agentsync::agents::{Agent, AgentStatus, AgentType, Registry, Task, TaskResult, TaskStatus};
use agentsync::error::RegistryError;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_assign_has_single_winner() {
    for _ in 0..20 {
        let registry = Arc::new(Registry::new());
        let agent = registry
            .register_agent(Agent::new("Solo", AgentType::General).with_id("solo"))
            .await;

        let mut task_ids = Vec::new();
        for i in 0..8 {
            let task = registry.create_task(Task::new(format!("task {}", i))).await;
            task_ids.push(task.id);
        }

        let handles: Vec<_> = task_ids
            .iter()
            .cloned()
            .map(|task_id| {
                let registry = Arc::clone(&registry);
                let agent_id = agent.id.clone();
                tokio::spawn(async move { registry.assign_task(&task_id, &agent_id).await })
            })
            .collect();

        let mut wins = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => wins += 1,
                Err(RegistryError::AgentBusy(id)) => assert_eq!(id, "solo"),
                Err(other) => panic!("unexpected error: {}", other),
            }
        }
        assert_eq!(wins, 1);

        let agent = registry.get_agent("solo").await.unwrap();
        assert_eq!(agent.status, AgentStatus::Working);
        let current = agent.current_task.clone().unwrap();

        let in_progress: Vec<Task> = registry
            .list_tasks()
            .await
            .into_iter()
            .filter(|t| t.status == TaskStatus::InProgress)
            .collect();
        assert_eq!(in_progress.len(), 1);
        assert_eq!(in_progress[0].id, current);
        assert_eq!(in_progress[0].assigned_to.as_deref(), Some("solo"));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_completions_keep_stats_exact() {
    let registry = Arc::new(Registry::new());
    let mut agent_ids = Vec::new();
    for i in 0..6 {
        let agent = registry
            .register_agent(Agent::new(format!("a{}", i), AgentType::Coder))
            .await;
        agent_ids.push(agent.id);
    }

    let mut handles = Vec::new();
    for (i, agent_id) in agent_ids.iter().cloned().enumerate() {
        let registry = Arc::clone(&registry);
        handles.push(tokio::spawn(async move {
            let task = registry.create_task(Task::new(format!("t{}", i))).await;
            registry.assign_task(&task.id, &agent_id).await.unwrap();
            if i % 3 == 0 {
                registry
                    .fail_task(&task.id, Some(TaskResult::failure("boom", 5)))
                    .await
                    .unwrap();
            } else {
                registry
                    .complete_task(&task.id, Some(TaskResult::success("ok", 10)))
                    .await
                    .unwrap();
            }
            // A second completion never double-counts.
            assert!(matches!(
                registry.complete_task(&task.id, None).await,
                Err(RegistryError::TaskAlreadyFinished(_))
            ));
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let stats = registry.stats().await;
    assert_eq!(stats.total_tasks, 6);
    assert_eq!(stats.completed_tasks, 4);
    assert_eq!(stats.failed_tasks, 2);
    assert_eq!(stats.idle_agents, 6);

    for agent in registry.list_agents().await {
        let s = &agent.stats;
        assert_eq!(s.tasks_completed + s.tasks_failed, 1);
        let expected = s.tasks_completed as f64 / (s.tasks_completed + s.tasks_failed) as f64;
        assert_eq!(s.success_rate, expected);
        assert!(agent.current_task.is_none());
    }
}

#[tokio::test]
async fn test_label_auto_assign_scenario() {
    let registry = Registry::new();
    registry
        .register_agent(
            Agent::new("Backend", AgentType::Coder)
                .with_id("backend")
                .with_labels(["backend"]),
        )
        .await;
    registry
        .register_agent(
            Agent::new("Frontend", AgentType::Coder)
                .with_id("frontend")
                .with_labels(["frontend"]),
        )
        .await;

    let task = registry
        .create_task(Task::new("Add endpoint").with_labels(["backend"]))
        .await;

    assert_eq!(registry.auto_assign().await, 1);

    let task = registry.get_task(&task.id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Queued);
    assert_eq!(task.assigned_to.as_deref(), Some("backend"));

    let backend = registry.get_agent("backend").await.unwrap();
    assert_eq!(backend.status, AgentStatus::Working);
    assert_eq!(backend.current_task.as_deref(), Some(task.id.as_str()));

    let frontend = registry.get_agent("frontend").await.unwrap();
    assert_eq!(frontend.status, AgentStatus::Idle);

    // Nothing left to assign.
    assert_eq!(registry.auto_assign().await, 0);
}
