//! agentsync: run a pool of agents against tasks from an external project
//! tracker.
//!
//! - [`agents`]: agent and task model plus the in-memory [`agents::Registry`]
//! - [`assignment`]: label matching and keyword scoring
//! - [`project`]: tracker client, webhook listener and the sync manager
//! - [`config`]: settings loaded from TOML and `AGENTSYNC_*` variables

pub mod agents;
pub mod assignment;
pub mod config;
pub mod error;
pub mod project;

pub use config::SyncConfig;
pub use error::{Error, Result};
