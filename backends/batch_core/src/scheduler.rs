//! The tick loop (§4): alternates draining the ready-task set and starting
//! pending batches until both are empty, then checks for a cycle.

use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use tracing::{debug, trace, trace_span};

use crate::arena::{Entry, EntryList};
use crate::error::{Exception, SchedulerError};
use crate::node::{BatcherNode, Node, OperationNode, ParentRef, RootNode, TaskNode};
use crate::operation::{Batcher, BatcherKey};
use crate::task::{
    task_identity, ChildSpec, Payload, Resume, SharedPayload, Seq, TaskOutcome, Yielded,
};

struct PendingGroup {
    batcher: Rc<dyn Batcher>,
    operations: Vec<Entry>,
}

/// Typed construction options for a [`Scheduler`], in place of globals or
/// environment configuration (this is a library, not a service).
#[derive(Debug, Clone, Copy)]
pub struct SchedulerOptions {
    /// Pre-sized arena capacity, as a hint when the caller has a rough idea
    /// of how many nodes a run will create. Purely an allocation hint; the
    /// arena grows past it without error.
    pub initial_arena_capacity: usize,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self { initial_arena_capacity: 0 }
    }
}

/// Owns the whole DAG for one `execute`/`executev` call. Not reused across
/// calls: a fresh `Scheduler` is built per invocation (§9 "Open question
/// (resolved)" — this is deliberately distinct from the sticky memoization
/// caches, which do outlive a single scheduler run).
pub struct Scheduler {
    arena: EntryList<Node>,
    root: RootNode,
    ready_tasks: VecDeque<Entry>,
    /// Distinct batcher targets awaiting a `gen_batch` call, in the order
    /// their first operation arrived. Linear scan on insert/lookup: batch
    /// cardinality per tick is small in practice, and batcher identity
    /// compares through a type-erased `eq_dyn`, not a `Hash` we can use
    /// directly as a `HashMap` key without an extra allocation per probe.
    pending_groups: VecDeque<(BatcherKey, PendingGroup)>,
    /// `task_identity(handle) -> node entry`, so two parents yielding the
    /// same `Rc<RefCell<dyn Task>>` resolve to one shared node (§4.5).
    task_identity_map: HashMap<usize, Entry>,
}

impl Scheduler {
    pub fn new(top_level_count: usize) -> Self {
        Self::with_options(top_level_count, SchedulerOptions::default())
    }

    pub fn with_options(top_level_count: usize, options: SchedulerOptions) -> Self {
        Self {
            arena: EntryList::with_capacity(options.initial_arena_capacity),
            root: RootNode {
                results: vec![None; top_level_count],
                children: HashSet::new(),
            },
            ready_tasks: VecDeque::new(),
            pending_groups: VecDeque::new(),
            task_identity_map: HashMap::new(),
        }
    }

    /// Binds a top-level value as a child of the root, exactly as if a task
    /// had just yielded it (§4.5).
    pub fn submit_root_child(&mut self, index: usize, spec: ChildSpec) -> Result<(), SchedulerError> {
        self.resolve_child(ParentRef::Root, index, spec)?;
        Ok(())
    }

    /// Drains the ready-task set and the pending batch groups until both are
    /// empty (§4.1), then returns the root's results, or `Cycle` if the root
    /// still has unresolved children.
    pub fn run(mut self) -> Result<Vec<SharedPayload>, SchedulerError> {
        loop {
            if let Some(entry) = self.ready_tasks.pop_front() {
                self.resume_task(entry)?;
                continue;
            }
            if let Some((key, group)) = self.pending_groups.pop_front() {
                trace!(?key, count = group.operations.len(), "starting batch");
                self.start_batch(group.batcher, group.operations)?;
                continue;
            }
            break;
        }

        if !self.root.children.is_empty() {
            return Err(SchedulerError::Cycle);
        }

        Ok(self
            .root
            .results
            .into_iter()
            .map(|slot| slot.expect("root slot unfilled with no cycle detected"))
            .collect())
    }

    // ---- task resumption (§4.2) ----------------------------------------

    fn resume_task(&mut self, entry: Entry) -> Result<(), SchedulerError> {
        let _span = trace_span!("resume_task", id = ?entry).entered();

        enum Mode {
            Start,
            Send(Resume),
            Throw(Exception),
        }

        let (handle, mode) = {
            let task_node = self.task_node_mut(entry).expect("ready entry must be a task node");
            if let Some(exc) = task_node.pending_exception.take() {
                (task_node.task.clone(), Mode::Throw(exc))
            } else if let Some(mut slots) = task_node.results.take() {
                let resume = if task_node.is_result_list {
                    Resume::Seq(slots)
                } else {
                    Resume::Scalar(slots.pop().unwrap_or(None))
                };
                (task_node.task.clone(), Mode::Send(resume))
            } else {
                (task_node.task.clone(), Mode::Start)
            }
        };

        let outcome = match mode {
            Mode::Start => handle.borrow_mut().start(),
            Mode::Send(resume) => handle.borrow_mut().send(resume),
            Mode::Throw(exc) => handle.borrow_mut().throw(exc),
        };
        drop(handle);

        match outcome {
            TaskOutcome::Raised(exc) => self.terminate_task_with_exception(entry, exc),
            TaskOutcome::Done => {
                let null: Payload = Box::new(());
                self.terminate_task_with_result(entry, null)
            }
            TaskOutcome::Yielded(Yielded::Result(payload)) => {
                self.terminate_task_with_result(entry, payload)
            }
            TaskOutcome::Yielded(Yielded::One(spec)) => self.await_children(entry, vec![spec], false),
            TaskOutcome::Yielded(Yielded::Many(specs)) => self.await_children(entry, specs, true),
        }
    }

    fn await_children(
        &mut self,
        entry: Entry,
        specs: Vec<ChildSpec>,
        is_list: bool,
    ) -> Result<(), SchedulerError> {
        let count = specs.len();
        {
            let task_node = self.task_node_mut(entry).expect("task node disappeared mid-yield");
            task_node.is_result_list = is_list;
            task_node.results = Some(vec![None; count]);
        }

        for (index, spec) in specs.into_iter().enumerate() {
            if self.resolve_child(ParentRef::Node(entry), index, spec)? {
                // Construction of this child raised (e.g. `batcher()`
                // failed): stop resolving the remaining specs in this yield
                // and put the node back in ready unconditionally, even if
                // earlier specs in the same yield are still outstanding
                // children. Matches the original's `_iterate_generator_node`,
                // which `return`s immediately on this exception and adds the
                // node to `_leaf_generator_nodes` regardless of
                // `node.children`.
                self.ready_tasks.push_back(entry);
                return Ok(());
            }
        }

        // Empty sequence, or every child failed construction synchronously:
        // nothing left to wait on, so the node re-enters ready immediately
        // (§4.2 "Empty sequence yield").
        self.reready_if_childless(entry);
        Ok(())
    }

    fn terminate_task_with_result(&mut self, entry: Entry, payload: Payload) -> Result<(), SchedulerError> {
        let parents = self.remove_task_node(entry);

        if let Some(batcher_entry) = single_batcher_parent(&parents) {
            if matches!(self.arena.get(&batcher_entry), Some(Node::Batcher(_))) {
                return self.complete_batch(batcher_entry, payload);
            }
        }

        let shared: SharedPayload = Rc::from(payload);
        for (parent, index) in parents {
            let index = index.expect("non-batch parent always carries a result index");
            self.deliver_result(entry, parent, index, shared.clone());
        }
        Ok(())
    }

    fn terminate_task_with_exception(&mut self, entry: Entry, exc: Exception) -> Result<(), SchedulerError> {
        let parents = self.remove_task_node(entry);

        if let Some(batcher_entry) = single_batcher_parent(&parents) {
            if let Some(Node::Batcher(_)) = self.arena.get(&batcher_entry) {
                let batcher_node = match self.arena.take(&batcher_entry) {
                    Some(Node::Batcher(b)) => b,
                    _ => unreachable!(),
                };
                return self.fail_batch_ops(batcher_node, exc);
            }
        }

        for (parent, _index) in parents {
            self.deliver_exception(entry, parent, exc.clone())?;
        }
        Ok(())
    }

    fn remove_task_node(&mut self, entry: Entry) -> HashMap<ParentRef, Option<usize>> {
        match self.arena.take(&entry) {
            Some(Node::Task(task_node)) => {
                task_node.task.borrow_mut().close();
                let id = task_identity(&task_node.task);
                self.task_identity_map.remove(&id);
                task_node.parent_to_result_index
            }
            _ => HashMap::new(),
        }
    }

    // ---- result/exception transmission (§4.4) ---------------------------

    fn deliver_result(&mut self, child: Entry, parent: ParentRef, index: usize, payload: SharedPayload) {
        match parent {
            ParentRef::Root => {
                if let Some(slot) = self.root.results.get_mut(index) {
                    *slot = Some(payload);
                }
                self.root.children.remove(&child);
            }
            ParentRef::Node(parent_entry) => {
                if let Some(Node::Task(task_node)) = self.arena.get_mut(&parent_entry) {
                    if let Some(results) = task_node.results.as_mut() {
                        if let Some(slot) = results.get_mut(index) {
                            *slot = Some(payload);
                        }
                    }
                }
                if let Some(node) = self.arena.get_mut(&parent_entry) {
                    node.children_mut().remove(&child);
                }
                self.reready_if_childless(parent_entry);
            }
        }
    }

    fn deliver_exception(
        &mut self,
        child: Entry,
        parent: ParentRef,
        exc: Exception,
    ) -> Result<(), SchedulerError> {
        match parent {
            ParentRef::Root => {
                self.root.children.remove(&child);
                Err(SchedulerError::Uncaught(exc))
            }
            ParentRef::Node(parent_entry) => {
                if let Some(Node::Task(task_node)) = self.arena.get_mut(&parent_entry) {
                    task_node.pending_exception = Some(exc);
                }
                if let Some(node) = self.arena.get_mut(&parent_entry) {
                    node.children_mut().remove(&child);
                }
                self.reready_if_childless(parent_entry);
                Ok(())
            }
        }
    }

    fn reready_if_childless(&mut self, entry: Entry) {
        if let Some(Node::Task(_)) = self.arena.get(&entry) {
            if self.arena.get(&entry).is_some_and(Node::is_childless) {
                self.ready_tasks.push_back(entry);
            }
        }
    }

    // ---- child-spec resolution (§4.5) -----------------------------------

    /// Resolves one child spec into a node. Returns `Ok(true)` if the
    /// child's construction itself raised (e.g. `batcher()` failed) and the
    /// exception has been attributed to `parent` — the caller must stop
    /// resolving any further specs from the same yield (§4.2).
    fn resolve_child(
        &mut self,
        parent: ParentRef,
        index: usize,
        spec: ChildSpec,
    ) -> Result<bool, SchedulerError> {
        match spec {
            ChildSpec::Task(handle) => {
                let id = task_identity(&handle);
                let child_entry = match self.task_identity_map.get(&id).copied() {
                    Some(existing) => existing,
                    None => {
                        let entry = self.arena.insert(Node::Task(TaskNode {
                            task: handle,
                            children: HashSet::new(),
                            parent_to_result_index: HashMap::new(),
                            results: None,
                            pending_exception: None,
                            is_result_list: false,
                        }));
                        self.task_identity_map.insert(id, entry);
                        self.ready_tasks.push_back(entry);
                        entry
                    }
                };
                if let Some(Node::Task(task_node)) = self.arena.get_mut(&child_entry) {
                    task_node.parent_to_result_index.insert(parent, Some(index));
                }
                self.register_child(parent, child_entry);
                Ok(false)
            }
            ChildSpec::Operation(op) => match op.batcher() {
                Ok(batcher) => {
                    let op_entry = self.arena.insert(Node::Operation(OperationNode {
                        op,
                        batcher: batcher.clone(),
                        parent,
                        result_index: index,
                        children: HashSet::new(),
                    }));
                    self.register_child(parent, op_entry);
                    self.enqueue_pending_op(batcher, op_entry);
                    Ok(false)
                }
                Err(exc) => {
                    debug!("operation construction raised while resolving a batcher");
                    self.attribute_construction_failure(parent, exc)?;
                    Ok(true)
                }
            },
        }
    }

    /// A child failed to construct before any node for it existed. §4.2:
    /// attribute the exception to the yielding task (or re-raise if it was a
    /// top-level submission) without going through the generic
    /// child-removal path, since there is no child entry to remove.
    fn attribute_construction_failure(
        &mut self,
        parent: ParentRef,
        exc: Exception,
    ) -> Result<(), SchedulerError> {
        match parent {
            ParentRef::Root => Err(SchedulerError::Uncaught(exc)),
            ParentRef::Node(entry) => {
                if let Some(Node::Task(task_node)) = self.arena.get_mut(&entry) {
                    task_node.pending_exception = Some(exc);
                }
                Ok(())
            }
        }
    }

    fn register_child(&mut self, parent: ParentRef, child: Entry) {
        match parent {
            ParentRef::Root => {
                self.root.children.insert(child);
            }
            ParentRef::Node(entry) => {
                if let Some(node) = self.arena.get_mut(&entry) {
                    node.children_mut().insert(child);
                }
            }
        }
    }

    fn task_node_mut(&mut self, entry: Entry) -> Option<&mut TaskNode> {
        match self.arena.get_mut(&entry) {
            Some(Node::Task(task_node)) => Some(task_node),
            _ => None,
        }
    }

    // ---- batching (§4.3) -------------------------------------------------

    fn enqueue_pending_op(&mut self, batcher: Rc<dyn Batcher>, op_entry: Entry) {
        let key = BatcherKey(batcher.key());
        if let Some((_, group)) = self.pending_groups.iter_mut().find(|(k, _)| *k == key) {
            group.operations.push(op_entry);
        } else {
            self.pending_groups.push_back((key, PendingGroup { batcher, operations: vec![op_entry] }));
        }
    }

    fn start_batch(&mut self, batcher: Rc<dyn Batcher>, op_entries: Vec<Entry>) -> Result<(), SchedulerError> {
        let op_refs: Vec<&dyn crate::operation::Operation> = op_entries
            .iter()
            .filter_map(|entry| self.arena.get(entry))
            .filter_map(|node| match node {
                Node::Operation(op_node) => Some(op_node.op.as_ref()),
                _ => None,
            })
            .collect();

        let gen_result = batcher.gen_batch(&op_refs);
        drop(op_refs);

        let task_handle = match gen_result {
            Ok(handle) => handle,
            Err(exc) => {
                let mut index_map = HashMap::new();
                for (i, entry) in op_entries.into_iter().enumerate() {
                    index_map.insert(entry, i);
                }
                let dummy = BatcherNode {
                    batcher,
                    operation_count: index_map.len(),
                    parent_to_operation_index: index_map,
                    children: HashSet::new(),
                };
                return self.fail_batch_ops(dummy, exc);
            }
        };

        let mut parent_to_operation_index = HashMap::new();
        for (i, entry) in op_entries.iter().enumerate() {
            parent_to_operation_index.insert(*entry, i);
        }
        let operation_count = parent_to_operation_index.len();

        let batcher_entry = self.arena.insert(Node::Batcher(BatcherNode {
            batcher,
            operation_count,
            parent_to_operation_index,
            children: HashSet::new(),
        }));

        for entry in &op_entries {
            if let Some(Node::Operation(op_node)) = self.arena.get_mut(entry) {
                op_node.children.insert(batcher_entry);
            }
        }

        let id = task_identity(&task_handle);
        let mut parent_to_result_index = HashMap::new();
        parent_to_result_index.insert(ParentRef::Node(batcher_entry), None);
        let task_entry = self.arena.insert(Node::Task(TaskNode {
            task: task_handle,
            children: HashSet::new(),
            parent_to_result_index,
            results: None,
            pending_exception: None,
            is_result_list: false,
        }));
        self.task_identity_map.insert(id, task_entry);

        if let Some(Node::Batcher(batcher_node)) = self.arena.get_mut(&batcher_entry) {
            batcher_node.children.insert(task_entry);
        }

        self.ready_tasks.push_back(task_entry);
        Ok(())
    }

    fn complete_batch(&mut self, batcher_entry: Entry, payload: Payload) -> Result<(), SchedulerError> {
        let batcher_node = match self.arena.take(&batcher_entry) {
            Some(Node::Batcher(b)) => b,
            _ => unreachable!("complete_batch called on a non-batcher entry"),
        };

        let seq = match payload.downcast::<Seq>() {
            Ok(seq) => seq.0,
            Err(_) => {
                return self.fail_batch_ops(batcher_node, Exception::new(SchedulerError::BatchResultNotSequence));
            }
        };

        if seq.len() != batcher_node.operation_count {
            return self.fail_batch_ops(
                batcher_node,
                Exception::new(SchedulerError::BatchLengthMismatch {
                    expected: batcher_node.operation_count,
                    actual: seq.len(),
                }),
            );
        }

        let mut values: Vec<Option<Payload>> = seq.into_iter().map(Some).collect();
        for (op_entry, index) in batcher_node.parent_to_operation_index {
            if let Some(Node::Operation(op_node)) = self.arena.take(&op_entry) {
                let value = values[index].take().expect("batch slot consumed twice");
                let shared: SharedPayload = Rc::from(value);
                self.deliver_result(op_entry, op_node.parent, op_node.result_index, shared);
            }
        }
        Ok(())
    }

    fn fail_batch_ops(&mut self, batcher_node: BatcherNode, exc: Exception) -> Result<(), SchedulerError> {
        for (op_entry, _index) in batcher_node.parent_to_operation_index {
            if let Some(Node::Operation(op_node)) = self.arena.take(&op_entry) {
                self.deliver_exception(op_entry, op_node.parent, exc.clone())?;
            }
        }
        Ok(())
    }
}

fn single_batcher_parent(parents: &HashMap<ParentRef, Option<usize>>) -> Option<Entry> {
    if parents.len() != 1 {
        return None;
    }
    match parents.iter().next() {
        Some((ParentRef::Node(entry), None)) => Some(*entry),
        _ => None,
    }
}
