//! The resumable-task abstraction (§3, §4.2, §9).
//!
//! Rust has no stable stackful coroutine that can be `start`/`send`/`throw`n
//! into, so a `Task` here is a hand-rolled state machine: every `next_*` call
//! advances it by exactly one yield, matching the semantics a generator
//! coroutine would have in a host language that has them.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use crate::error::Exception;
use crate::operation::BoxedOperation;

/// Payload shuttled through the DAG: an arbitrary, dynamically-typed value,
/// produced once by the task that yields it.
pub type Payload = Box<dyn Any>;

/// A payload once it has been published to a slot. `Rc`-backed rather than
/// `Box`-backed because a shared task's terminal result is delivered to
/// every parent awaiting it (§3 invariant 3), not just one.
pub type SharedPayload = Rc<dyn Any>;

/// Marker wrapping the ordered results of a batch (§4.3): a `gen_batch` task
/// must terminate with `Yielded::Result(Box::new(Seq(values)))` where
/// `values.len()` matches the number of operations it was handed.
pub struct Seq(pub Vec<Payload>);

/// A handle to a live task node, shared by every parent that is awaiting it
/// (§4.5 "shared task"). Identity for the `task → node` map is `Rc` pointer
/// equality on this handle, not any value inside it.
pub type TaskHandle = Rc<RefCell<dyn Task>>;

pub fn task_identity(handle: &TaskHandle) -> usize {
    Rc::as_ptr(handle) as *const () as usize
}

/// One element of a yielded sequence: either a nested task or a leaf
/// operation (§9 "Sum typing of yield values").
pub enum ChildSpec {
    Task(TaskHandle),
    Operation(BoxedOperation),
}

/// What a task produced at a single suspension point.
pub enum Yielded {
    /// Terminal: the task is declaring its final value. No further
    /// statements in the task's body may execute after this (§4.2).
    Result(Payload),

    /// A single child to await (wrapped as a one-element sequence per §4.2,
    /// "A single operation or task").
    One(ChildSpec),

    /// A sequence of children to await in parallel.
    Many(Vec<ChildSpec>),
}

/// The outcome of resuming a task by one step.
pub enum TaskOutcome {
    Yielded(Yielded),
    /// The task's own code raised an exception that was not a yielded
    /// `ChildSpec` failure — propagate to every current parent and abandon
    /// the task (§4.2, "If start/send/throw raises any other exception").
    Raised(Exception),
    /// The task's state machine reached its end without an explicit
    /// `Yielded::Result` (the coroutine equivalent of falling off the end
    /// without a return value). Treated identically to yielding a result
    /// marker wrapping null (§4.2 "Round-trip").
    Done,
}

/// Resumption payload delivered back into a task that is awaiting children:
/// either the single slot 0 payload (if the task's last yield was a scalar)
/// or the full vector of slot payloads (if it was a sequence), per §4.2
/// resume mode 2.
pub enum Resume {
    Scalar(Option<SharedPayload>),
    Seq(Vec<Option<SharedPayload>>),
}

/// A resumable computation whose suspension points expose either leaf
/// operations or other tasks to the scheduler (§3).
pub trait Task {
    fn start(&mut self) -> TaskOutcome;
    fn send(&mut self, resume: Resume) -> TaskOutcome;
    fn throw(&mut self, exception: Exception) -> TaskOutcome;

    /// Release any resources held across yield points. Called exactly once,
    /// either when the task's result has been published to every parent or
    /// when an unrecoverable error reaches the root (§5 "Resource release").
    fn close(&mut self) {}
}

/// Convenience for wrapping a concrete [`Task`] impl as a shared [`TaskHandle`].
pub fn task_handle(task: impl Task + 'static) -> TaskHandle {
    Rc::new(RefCell::new(task))
}

/// Helper constructors for the common `Yielded` shapes, used pervasively by
/// hand-rolled task state machines.
pub fn result<T: 'static>(value: T) -> Yielded {
    Yielded::Result(Box::new(value))
}

pub fn yield_task(handle: TaskHandle) -> Yielded {
    Yielded::One(ChildSpec::Task(handle))
}

pub fn yield_op(op: BoxedOperation) -> Yielded {
    Yielded::One(ChildSpec::Operation(op))
}

pub fn yield_many(children: Vec<ChildSpec>) -> Yielded {
    Yielded::Many(children)
}
