//! Shared-task guard (§6.3).
//!
//! Two parents yielding the same `TaskHandle` within one scheduler run
//! already share one node via `task_identity` (§4.5) — the arena handles
//! that for free. What it cannot catch is a `TaskHandle` surviving past the
//! run that closed it and being handed to a *second* run (e.g. a
//! [`Memo`](crate::memo::Memo) entry read with a stale [`RunToken`], or a
//! task handle stashed in a long-lived struct by mistake): calling `start`
//! again on an already-closed task would silently resume dead state. This
//! wrapper turns that misuse into a catchable exception instead.

use crate::error::Exception;
use crate::task::{task_handle, Resume, Task, TaskHandle, TaskOutcome};

struct Guarded<T: Task> {
    inner: T,
    closed: bool,
}

impl<T: Task> Task for Guarded<T> {
    fn start(&mut self) -> TaskOutcome {
        if self.closed {
            return reuse_error();
        }
        self.inner.start()
    }

    fn send(&mut self, resume: Resume) -> TaskOutcome {
        if self.closed {
            return reuse_error();
        }
        self.inner.send(resume)
    }

    fn throw(&mut self, exception: Exception) -> TaskOutcome {
        if self.closed {
            return reuse_error();
        }
        self.inner.throw(exception)
    }

    fn close(&mut self) {
        self.closed = true;
        self.inner.close();
    }
}

fn reuse_error() -> TaskOutcome {
    TaskOutcome::Raised(Exception::msg(
        "shared task handle reused after its underlying task already completed",
    ))
}

/// Wraps `task` so that reuse past its `close()` call raises instead of
/// silently resuming closed state.
pub fn guarded(task: impl Task + 'static) -> TaskHandle {
    task_handle(Guarded { inner: task, closed: false })
}
