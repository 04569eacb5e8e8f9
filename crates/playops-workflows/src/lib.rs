//! playops-workflows: declarative workflow execution engine
//!
//! Features:
//! - JSON-serializable state machine definitions (invoke, loop, always, on)
//! - Bounded sequential and parallel-batched loops with a body sub-graph
//! - Pluggable invocation transports (network HTTP, direct in-process)
//! - Durable execution and per-node audit trail via playops-store
//! - Lifecycle event emission over a broadcast bus

pub mod builtin;
pub mod condition;
pub mod definition;
pub mod engine;
pub mod events;
pub mod expression;
pub mod interpreter;
pub mod loops;
pub mod registry;
pub mod strategy;

pub use builtin::{ActionDispatcher, ActionHandler, SqlExecutor};
pub use definition::{StateDefinition, StateKind, WorkflowDefinition};
pub use engine::WorkflowEngine;
pub use events::{EventBus, WorkflowEvent};
pub use registry::{ActionRegistry, ActionSpec};
pub use strategy::{
    ActionRoute, DirectHandler, DirectRequest, DirectResponse, DirectStrategy, ExecutionStrategy,
    NetworkStrategy,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use super::builtin::{ActionDispatcher, ActionHandler};
    pub use super::definition::WorkflowDefinition;
    pub use super::engine::WorkflowEngine;
    pub use super::events::EventBus;
    pub use super::registry::ActionRegistry;
    pub use super::strategy::{DirectStrategy, ExecutionStrategy, NetworkStrategy};
}
