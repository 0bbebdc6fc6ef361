//! Fixture tasks, operations, and batchers shared by the scenario tests in
//! `tests/scenarios.rs`. Kept in a library crate (rather than duplicated
//! per test file) so the fibonacci and batching fixtures can be reused
//! across scenarios that want to combine them.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use batch_core::{
    result, task_handle, yield_many, yield_op, yield_task, Batcher, ChildSpec, DynKey, Exception,
    Memo, Operation, Payload, Resume, RunToken, Seq, Task, TaskHandle, TaskOutcome,
};

/// Yields its value back immediately on the first tick.
pub struct Echo<T>(pub Option<T>);

impl<T: 'static> Task for Echo<T> {
    fn start(&mut self) -> TaskOutcome {
        TaskOutcome::Yielded(result(self.0.take().expect("echo started twice")))
    }
    fn send(&mut self, _resume: Resume) -> TaskOutcome {
        unreachable!("echo never awaits a child")
    }
    fn throw(&mut self, _exception: Exception) -> TaskOutcome {
        unreachable!("echo never awaits a child")
    }
}

// ---- fibonacci, grounded in the original's `cached_generator` scenario ---

pub struct FibTask {
    n: u64,
    memo: Rc<Memo<u64>>,
    counter: Rc<RefCell<usize>>,
    run: RunToken,
}

impl Task for FibTask {
    fn start(&mut self) -> TaskOutcome {
        if self.n < 2 {
            return TaskOutcome::Yielded(result(self.n));
        }
        let left = fib_handle(self.n - 1, &self.memo, self.run, &self.counter);
        let right = fib_handle(self.n - 2, &self.memo, self.run, &self.counter);
        TaskOutcome::Yielded(yield_many(vec![
            ChildSpec::Task(left),
            ChildSpec::Task(right),
        ]))
    }

    fn send(&mut self, resume: Resume) -> TaskOutcome {
        match resume {
            Resume::Seq(values) => {
                let a = *values[0].as_ref().unwrap().downcast_ref::<u64>().unwrap();
                let b = *values[1].as_ref().unwrap().downcast_ref::<u64>().unwrap();
                TaskOutcome::Yielded(result(a + b))
            }
            Resume::Scalar(_) => panic!("fib always awaits exactly two children"),
        }
    }

    fn throw(&mut self, exception: Exception) -> TaskOutcome {
        TaskOutcome::Raised(exception)
    }
}

/// Builds (or reuses, via `memo`) the task computing `fib(n)`, counting one
/// construction per distinct `n` in `counter`.
pub fn fib_handle(
    n: u64,
    memo: &Rc<Memo<u64>>,
    run: RunToken,
    counter: &Rc<RefCell<usize>>,
) -> TaskHandle {
    let memo_for_struct = memo.clone();
    let counter_for_closure = counter.clone();
    memo.get_or_create(n, run, move || {
        *counter_for_closure.borrow_mut() += 1;
        Ok(task_handle(FibTask {
            n,
            memo: memo_for_struct,
            counter: counter_for_closure.clone(),
            run,
        }))
    })
    .expect("fib construction never fails")
}

// ---- a hash-store-backed batcher, grounded in the original's db-object
// lookup scenario ("spouses") ------------------------------------------

pub struct PersonLookup {
    pub name: &'static str,
    pub batcher: Rc<PersonBatcher>,
}

impl Operation for PersonLookup {
    fn batcher(&self) -> Result<Rc<dyn Batcher>, Exception> {
        Ok(self.batcher.clone())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct PersonBatcher {
    pub calls: Rc<Cell<usize>>,
}

impl PersonBatcher {
    pub fn new() -> Rc<Self> {
        Rc::new(Self { calls: Rc::new(Cell::new(0)) })
    }

    pub fn call_count(&self) -> usize {
        self.calls.get()
    }
}

fn spouse_of(name: &str) -> &'static str {
    match name {
        "alice" => "bob",
        "bob" => "alice",
        "carol" => "dave",
        "dave" => "carol",
        _ => "unknown",
    }
}

impl Batcher for PersonBatcher {
    fn key(&self) -> Box<dyn DynKey> {
        Box::new("person_batcher")
    }

    fn gen_batch(&self, operations: &[&dyn Operation]) -> Result<TaskHandle, Exception> {
        self.calls.set(self.calls.get() + 1);
        let spouses: Vec<Payload> = operations
            .iter()
            .map(|op| {
                let lookup = op.as_any().downcast_ref::<PersonLookup>().unwrap();
                Box::new(spouse_of(lookup.name).to_string()) as Payload
            })
            .collect();
        Ok(task_handle(Echo(Some(Seq(spouses)))))
    }
}

// ---- a batcher whose gen_batch task itself awaits a nested task before
// producing its sequence, demonstrating §4.3 does not require gen_batch's
// task to be a single synchronous step ----------------------------------

pub struct DoubleOp {
    pub value: i64,
    pub batcher: Rc<DoubleBatcher>,
}

impl Operation for DoubleOp {
    fn batcher(&self) -> Result<Rc<dyn Batcher>, Exception> {
        Ok(self.batcher.clone())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct DoubleBatcher {
    pub calls: Rc<Cell<usize>>,
}

impl DoubleBatcher {
    pub fn new() -> Rc<Self> {
        Rc::new(Self { calls: Rc::new(Cell::new(0)) })
    }

    pub fn call_count(&self) -> usize {
        self.calls.get()
    }
}

impl Batcher for DoubleBatcher {
    fn key(&self) -> Box<dyn DynKey> {
        Box::new("double_batcher")
    }

    fn gen_batch(&self, operations: &[&dyn Operation]) -> Result<TaskHandle, Exception> {
        self.calls.set(self.calls.get() + 1);
        let values: Vec<i64> = operations
            .iter()
            .map(|op| op.as_any().downcast_ref::<DoubleOp>().unwrap().value)
            .collect();
        Ok(task_handle(DoubleBatchTask {
            values,
            awaiting_validation: false,
        }))
    }
}

struct DoubleBatchTask {
    values: Vec<i64>,
    awaiting_validation: bool,
}

impl Task for DoubleBatchTask {
    fn start(&mut self) -> TaskOutcome {
        self.awaiting_validation = true;
        TaskOutcome::Yielded(yield_task(task_handle(ValidateNonEmpty(self.values.len()))))
    }

    fn send(&mut self, resume: Resume) -> TaskOutcome {
        assert!(self.awaiting_validation);
        match resume {
            Resume::Scalar(Some(payload)) => {
                assert!(*payload.downcast_ref::<bool>().unwrap(), "validation failed");
                let doubled: Vec<Payload> = self.values.iter().map(|v| Box::new(v * 2) as Payload).collect();
                TaskOutcome::Yielded(result(Seq(doubled)))
            }
            _ => panic!("expected a scalar resume from the validation task"),
        }
    }

    fn throw(&mut self, exception: Exception) -> TaskOutcome {
        TaskOutcome::Raised(exception)
    }
}

struct ValidateNonEmpty(usize);

impl Task for ValidateNonEmpty {
    fn start(&mut self) -> TaskOutcome {
        TaskOutcome::Yielded(result(self.0 > 0))
    }
    fn send(&mut self, _resume: Resume) -> TaskOutcome {
        unreachable!("validation never awaits a child")
    }
    fn throw(&mut self, _exception: Exception) -> TaskOutcome {
        unreachable!("validation never awaits a child")
    }
}

// ---- a batcher yielding a nested operation of a batcher already pending,
// demonstrating the nested operation coalesces into the same gen_batch call
// as its independent sibling rather than forcing a second call ----------

pub struct DbOp {
    pub label: String,
    pub batcher: Rc<DbBatcher>,
}

impl Operation for DbOp {
    fn batcher(&self) -> Result<Rc<dyn Batcher>, Exception> {
        Ok(self.batcher.clone())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct DbBatcher {
    pub calls: Rc<Cell<usize>>,
}

impl DbBatcher {
    pub fn new() -> Rc<Self> {
        Rc::new(Self { calls: Rc::new(Cell::new(0)) })
    }

    pub fn call_count(&self) -> usize {
        self.calls.get()
    }
}

impl Batcher for DbBatcher {
    fn key(&self) -> Box<dyn DynKey> {
        Box::new("db_batcher")
    }

    fn gen_batch(&self, operations: &[&dyn Operation]) -> Result<TaskHandle, Exception> {
        self.calls.set(self.calls.get() + 1);
        let results: Vec<Payload> = operations
            .iter()
            .map(|op| {
                let op = op.as_any().downcast_ref::<DbOp>().unwrap();
                Box::new(format!("{}:done", op.label)) as Payload
            })
            .collect();
        Ok(task_handle(Echo(Some(Seq(results)))))
    }
}

pub struct DbObjectOperation {
    pub table: &'static str,
    pub ids: Vec<i64>,
    pub object_batcher: Rc<ObjectBatcher>,
    pub db_batcher: Rc<DbBatcher>,
}

impl Operation for DbObjectOperation {
    fn batcher(&self) -> Result<Rc<dyn Batcher>, Exception> {
        Ok(self.object_batcher.clone())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct ObjectBatcher {
    pub calls: Rc<Cell<usize>>,
}

impl ObjectBatcher {
    pub fn new() -> Rc<Self> {
        Rc::new(Self { calls: Rc::new(Cell::new(0)) })
    }

    pub fn call_count(&self) -> usize {
        self.calls.get()
    }
}

impl Batcher for ObjectBatcher {
    fn key(&self) -> Box<dyn DynKey> {
        Box::new("object_batcher")
    }

    fn gen_batch(&self, operations: &[&dyn Operation]) -> Result<TaskHandle, Exception> {
        self.calls.set(self.calls.get() + 1);
        let op = operations[0].as_any().downcast_ref::<DbObjectOperation>().unwrap();
        let label = format!("value:{}:{:?}", op.table, op.ids);
        Ok(task_handle(ObjectBatchTask { db_batcher: op.db_batcher.clone(), label, awaiting: false }))
    }
}

struct ObjectBatchTask {
    db_batcher: Rc<DbBatcher>,
    label: String,
    awaiting: bool,
}

impl Task for ObjectBatchTask {
    fn start(&mut self) -> TaskOutcome {
        self.awaiting = true;
        TaskOutcome::Yielded(yield_op(Box::new(DbOp { label: self.label.clone(), batcher: self.db_batcher.clone() })))
    }

    fn send(&mut self, resume: Resume) -> TaskOutcome {
        assert!(self.awaiting);
        match resume {
            Resume::Scalar(Some(payload)) => {
                let value = payload.downcast_ref::<String>().unwrap().clone();
                TaskOutcome::Yielded(result(Seq(vec![Box::new(value) as Payload])))
            }
            _ => panic!("expected a scalar resume from the nested database operation"),
        }
    }

    fn throw(&mut self, exception: Exception) -> TaskOutcome {
        TaskOutcome::Raised(exception)
    }
}

// ---- catch-sibling-exception fixtures ----------------------------------

pub struct FailingChild;

impl Task for FailingChild {
    fn start(&mut self) -> TaskOutcome {
        TaskOutcome::Raised(Exception::msg("boom"))
    }
    fn send(&mut self, _resume: Resume) -> TaskOutcome {
        unreachable!("a task that raises on start is never resumed")
    }
    fn throw(&mut self, _exception: Exception) -> TaskOutcome {
        unreachable!("a task that raises on start is never resumed")
    }
}

pub struct SideEffectChild(pub Rc<Cell<bool>>);

impl Task for SideEffectChild {
    fn start(&mut self) -> TaskOutcome {
        self.0.set(true);
        TaskOutcome::Yielded(result(()))
    }
    fn send(&mut self, _resume: Resume) -> TaskOutcome {
        unreachable!("side-effect child never awaits a child")
    }
    fn throw(&mut self, _exception: Exception) -> TaskOutcome {
        unreachable!("side-effect child never awaits a child")
    }
}

pub struct CatchingParent {
    pub ran_side_effect: Rc<Cell<bool>>,
}

impl Task for CatchingParent {
    fn start(&mut self) -> TaskOutcome {
        TaskOutcome::Yielded(yield_many(vec![
            ChildSpec::Task(task_handle(FailingChild)),
            ChildSpec::Task(task_handle(SideEffectChild(self.ran_side_effect.clone()))),
        ]))
    }

    fn send(&mut self, _resume: Resume) -> TaskOutcome {
        panic!("a failed sibling must reach the parent via throw, never via send")
    }

    fn throw(&mut self, exception: Exception) -> TaskOutcome {
        assert!(
            self.ran_side_effect.get(),
            "the side-effecting sibling must run to completion before the caught exception is delivered"
        );
        TaskOutcome::Yielded(result(format!("caught: {exception}")))
    }
}

// ---- cycle fixture: two tasks that mutually await each other -----------

pub struct MutualCycle(pub Rc<RefCell<Option<TaskHandle>>>);

impl Task for MutualCycle {
    fn start(&mut self) -> TaskOutcome {
        let peer = self.0.borrow().clone().expect("peer must be wired before start");
        TaskOutcome::Yielded(yield_task(peer))
    }
    fn send(&mut self, _resume: Resume) -> TaskOutcome {
        unreachable!("a true cycle never resolves, so send is never reached")
    }
    fn throw(&mut self, exception: Exception) -> TaskOutcome {
        TaskOutcome::Raised(exception)
    }
}
