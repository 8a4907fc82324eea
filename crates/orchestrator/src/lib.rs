pub mod command_ops;
pub mod commissioner;
pub mod config;
pub mod context;
pub mod error;
pub mod group;
pub mod lock;
pub mod node_ops;
pub mod queue;
pub mod resources;
pub mod retry;
pub mod state_machine;
pub mod subtask;
pub mod task;
pub mod tasks;

pub use command_ops::{CommandNodeOperations, NodeCommandTemplates};
pub use commissioner::Commissioner;
pub use config::OrchestratorConfig;
pub use context::TaskContext;
pub use error::{OrchestratorError, Result, SubTaskError};
pub use group::{GroupOutcome, SubTaskFailure, SubTaskGroup, SubTaskGroupType};
pub use lock::{ExclusiveLock, ExpectedVersion, LockToken};
pub use node_ops::{NodeOpError, NodeOperations};
pub use queue::{QueueProgress, QueueSnapshot, QueueStatus, SubTaskGroupQueue};
pub use resources::UniverseLockGuard;
pub use retry::{BackoffStrategy, RetryPolicy};
pub use state_machine::TaskStateMachine;
pub use subtask::{Idempotency, SubTask, SubTaskKind, SubTaskReport, SubTaskState};
pub use task::{TaskParams, TaskProgress, TaskRunner, TaskSnapshot, UniverseTask};
pub use tasks::ResumeUniverse;
