//! 核心编排层：批次状态、重试策略、任务调度、聚合、编辑、持久化、主控循环

pub mod aggregator;
pub mod context;
pub mod edit;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod persistence;
pub mod retry;
pub mod state;
pub mod task_scheduler;

pub use aggregator::{ApplyOutcome, BatchAggregator};
pub use context::OrchestratorContext;
pub use edit::{EditCoordinator, EditRequest};
pub use error::{OrchestratorError, RetryDecision};
pub use events::{OrchestratorEvent, TaskUpdate, Transition, WorkerMessage};
pub use orchestrator::{create_orchestrator, Command, OrchestratorHandle};
pub use persistence::PersistenceCoordinator;
pub use retry::RetryPolicy;
pub use state::{
    Batch, BatchKey, BatchProgress, FramingQuality, ImageData, ProjectId, ProjectSnapshot,
    SubjectDescriptor, Task, TaskStatus,
};
pub use task_scheduler::{BatchPlan, TaskScheduler};
