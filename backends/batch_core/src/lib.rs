//! Single-threaded, request-coalescing cooperative scheduler for
//! data-fetching DAGs: a caller builds a tree of tasks and leaf operations,
//! and the scheduler runs it to completion, transparently grouping leaf
//! operations that share a batcher into as few batch calls as possible.
//!
//! See the module-level docs on [`scheduler::Scheduler`] for the tick loop,
//! and [`task::Task`] for how a unit of work is expressed.

mod arena;
mod error;
mod memo;
mod node;
mod operation;
mod scheduler;
mod shared_task;
mod task;

pub mod executor;

pub use arena::{Entry, EntryList};
pub use error::{Exception, SchedulerError};
pub use memo::{next_run_token, Memo, MemoCache, OrderedKey, RunToken, UnorderedKey};
pub use operation::{Batcher, BatcherKey, BoxedOperation, DynKey, Operation};
pub use scheduler::SchedulerOptions;
pub use shared_task::guarded;
pub use task::{
    result, task_handle, task_identity, yield_many, yield_op, yield_task, ChildSpec, Payload,
    Resume, Seq, SharedPayload, Task, TaskHandle, TaskOutcome, Yielded,
};

pub use executor::{execute, execute_with_options, executev, executev_with_options};
