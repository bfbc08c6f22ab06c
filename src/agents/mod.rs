//! Agents, tasks, and the registry that owns them.
//!
//! The registry holds:
//! - Agents, with status, labels, capabilities, load and stats
//! - Tasks created internally for label-based assignment
//!
//! Tracker-sourced tasks use the same [`Task`] type but live in the sync
//! manager's mirror, not here.

mod agent;
mod registry;
mod task;

pub use agent::{Agent, AgentConfig, AgentStats, AgentStatus, AgentType};
pub use registry::{AgentOverrides, Registry, RegistryStats};
pub use task::{Task, TaskPriority, TaskResult, TaskStatus};

/// The built-in agent set registered at startup.
pub fn default_agents() -> Vec<Agent> {
    vec![
        Agent::new("Coder", AgentType::Coder)
            .with_description("Writes and refactors code")
            .with_labels(["code", "implement", "refactor", "fix"])
            .with_capabilities(["code", "implementation", "refactoring", "bugfix", "develop"])
            .with_config(AgentConfig {
                auto_assign: true,
                max_concurrent: 1,
                timeout_secs: 300,
                preferred_tasks: vec!["implement".into(), "code".into(), "fix".into()],
            }),
        Agent::new("Reviewer", AgentType::Reviewer)
            .with_description("Reviews code and suggests improvements")
            .with_labels(["review", "security", "quality"])
            .with_capabilities(["code review", "security audit", "quality analysis"])
            .with_config(AgentConfig {
                auto_assign: true,
                max_concurrent: 2,
                timeout_secs: 180,
                preferred_tasks: vec!["review".into(), "analyze".into()],
            }),
        Agent::new("Planner", AgentType::Planner)
            .with_description("Creates plans and breaks down tasks")
            .with_labels(["plan", "design", "architecture"])
            .with_capabilities(["planning", "design", "architecture", "specification"])
            .with_config(AgentConfig {
                auto_assign: true,
                max_concurrent: 1,
                timeout_secs: 120,
                preferred_tasks: vec!["plan".into(), "specify".into(), "design".into()],
            }),
        Agent::new("Documenter", AgentType::Documenter)
            .with_description("Writes documentation and READMEs")
            .with_labels(["docs", "readme", "documentation"])
            .with_capabilities(["documentation", "readme", "guides"])
            .with_config(AgentConfig {
                auto_assign: true,
                max_concurrent: 2,
                timeout_secs: 180,
                preferred_tasks: vec!["document".into(), "readme".into()],
            }),
    ]
}
