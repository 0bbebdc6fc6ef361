//! Error taxonomy for the scheduler (§7).
//!
//! Caller errors (bad arguments, cyclic DAGs, malformed yields) are distinct
//! from task/batcher exceptions: the former can never be caught by a task,
//! the latter flow through the DAG per §4.4 and may be caught.

use std::fmt;
use std::rc::Rc;

/// An exception raised by task or batcher code, attributable to a specific
/// node and eligible to be caught by an ancestor task via `throw`.
///
/// This wraps an arbitrary payload rather than a fixed error type because
/// tasks in this scheduler are written in arbitrary host code that may
/// raise arbitrary error values, exactly like the dynamically-typed
/// coroutines this scheduler is modeled on. It is `Rc`-backed (not
/// `Box`-backed) because a batcher's exception must fan out, unmodified, to
/// every op-node parent of the failed batch (§4.3, §4.4) rather than to a
/// single catcher.
#[derive(Debug, Clone)]
pub struct Exception(pub Rc<dyn std::error::Error + 'static>);

impl Exception {
    pub fn new<E: std::error::Error + 'static>(err: E) -> Self {
        Self(Rc::new(err))
    }

    pub fn msg(message: impl Into<String>) -> Self {
        Self(Rc::new(MessageError(message.into())))
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for Exception {}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct MessageError(String);

/// Errors the scheduler raises directly to the caller of `execute`/`executev`,
/// never to task code (§6.5, §7).
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// The root node still had children when both ready sets drained: the
    /// caller built a dependency cycle that can never resolve.
    #[error("generators form a cycle")]
    Cycle,

    /// A batcher's `gen_batch` returned successfully but its terminal
    /// payload was not a sequence.
    #[error("batch result not a sequence")]
    BatchResultNotSequence,

    /// A batcher's terminal payload was a sequence, but its length did not
    /// match the number of operations passed to `gen_batch`.
    #[error("batch result length mismatch: expected {expected}, got {actual}")]
    BatchLengthMismatch { expected: usize, actual: usize },

    /// An uncaught exception reached the root node.
    #[error(transparent)]
    Uncaught(#[from] Exception),
}
