//! Worker accounts and their scheduling
//!
//! This module manages the pool of hosting-worker accounts: the `GameHost`
//! capability each one wraps, the serialized per-worker command queue, the
//! live registry and the scheduler that binds workers to lobbies.

pub mod host;
pub mod mock;
pub mod registry;
pub mod runner;
pub mod scheduler;

// Re-export main types
pub use host::{GameHost, GameHostFactory, HostLobbyOptions, TeamSnapshot, WorkerSignal};
pub use mock::{MockGameHost, MockHostFactory};
pub use registry::WorkerRegistry;
pub use runner::{RunnerSettings, WorkerHandle};
pub use scheduler::{AssignmentContext, WorkerScheduler};
