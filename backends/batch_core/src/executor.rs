//! Public entry points (§1, §4): bind top-level values to a fresh
//! [`Scheduler`] and run the tick loop to completion.

use tracing::{debug, trace_span};

use crate::error::SchedulerError;
use crate::scheduler::{Scheduler, SchedulerOptions};
use crate::task::{ChildSpec, SharedPayload};

/// Runs `value` to completion and returns its published result.
///
/// `value` is bound as a child of the synthetic root exactly as if a task
/// had just yielded it (§4.5), so a bare top-level operation is coalesced
/// with any other operations of the same batcher reached later in the run.
pub fn execute(value: ChildSpec) -> Result<SharedPayload, SchedulerError> {
    execute_with_options(value, SchedulerOptions::default())
}

pub fn execute_with_options(
    value: ChildSpec,
    options: SchedulerOptions,
) -> Result<SharedPayload, SchedulerError> {
    let mut results = executev_with_options(vec![value], options)?;
    Ok(results.remove(0))
}

/// Runs every value in `values` to completion in one scheduler run (so they
/// can share batches and memoized tasks) and returns their results in order.
pub fn executev(values: Vec<ChildSpec>) -> Result<Vec<SharedPayload>, SchedulerError> {
    executev_with_options(values, SchedulerOptions::default())
}

pub fn executev_with_options(
    values: Vec<ChildSpec>,
    options: SchedulerOptions,
) -> Result<Vec<SharedPayload>, SchedulerError> {
    let _span = trace_span!("executev", count = values.len()).entered();
    debug!(count = values.len(), "starting scheduler run");

    let mut scheduler = Scheduler::with_options(values.len(), options);
    for (index, value) in values.into_iter().enumerate() {
        scheduler.submit_root_child(index, value)?;
    }
    scheduler.run()
}
