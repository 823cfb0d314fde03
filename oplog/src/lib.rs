//! Operation-log task store.
//!
//! A task is never mutated in place. Every change is appended to an
//! ordered [`Operation`] log and the current task map is derived by
//! replaying that log through [`projector::project`]. The [`validator`]
//! module checks an operation against the projected state before it is
//! appended.

pub mod log;
pub mod op;
pub mod projector;
pub mod task;
pub mod validator;

pub use log::{LogError, OperationLog};
pub use op::{Operation, OperationKind, Relation, TaskChanges};
pub use task::{Complexity, CompletionCriterion, Source, Task, TaskStatus, TaskType};
pub use validator::{ValidationError, ValidationPolicy, Validator};

/// Keyed projection of the operation log: the only form of task state
/// the rest of the system is allowed to read.
pub type TaskMap = std::collections::BTreeMap<String, Task>;
