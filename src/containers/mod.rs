//! Container engine access: the engine seam, its Docker adapter, log framing
//! and the action orchestrator used by the HTTP handlers.

pub mod docker;
pub mod engine;
pub mod logs;
pub mod orchestrator;

pub use docker::DockerEngine;
pub use engine::{ContainerEngine, EngineError};
pub use orchestrator::{ContainerAction, ContainerDefaults, ContainerOrchestrator, OrchestratorError};
