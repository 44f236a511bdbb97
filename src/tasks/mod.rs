//! Backend-owned long-running tasks and the poller that follows them.

pub mod poller;
pub mod task;

pub use poller::{PollPhase, PollState, TaskEvent, TaskPoller, TaskSubscription, ViewVisibility};
pub use task::{RebuildMetrics, Task, TaskKind, TaskMetrics, TaskStatus};
