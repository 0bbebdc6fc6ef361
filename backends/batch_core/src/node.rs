//! DAG node representation (§3).
//!
//! Nodes refer to each other by [`Entry`] handle into the scheduler's arena,
//! never by owned reference, so there is no reified ownership cycle (§9
//! "Cyclic ownership").

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::arena::Entry;
use crate::error::Exception;
use crate::operation::BoxedOperation;
use crate::operation::Batcher as BatcherTrait;
use crate::task::{SharedPayload, TaskHandle};

/// Where a node's result or exception is delivered: either the synthetic
/// root, or another node in the arena.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum ParentRef {
    Root,
    Node(Entry),
}

/// A single result slot, as stored in a task's or the root's `results`.
pub type Slot = Option<SharedPayload>;

pub struct RootNode {
    pub results: Vec<Slot>,
    pub children: HashSet<Entry>,
}

pub struct TaskNode {
    pub task: TaskHandle,
    pub children: HashSet<Entry>,
    /// Every parent currently awaiting this task's result, and the slot
    /// index to deliver into (§3 invariant 3, shared tasks).
    pub parent_to_result_index: HashMap<ParentRef, Option<usize>>,
    /// `None` before the task's first tick; `Some` once it has yielded at
    /// least once, holding one slot per currently-awaited child.
    pub results: Option<Vec<Slot>>,
    pub pending_exception: Option<Exception>,
    /// Whether the task's most recent yield was a sequence (vs. a single
    /// child wrapped in a one-element sequence) — determines whether the
    /// next `send` delivers the whole results vector or just slot 0.
    pub is_result_list: bool,
}

pub struct OperationNode {
    pub op: BoxedOperation,
    pub batcher: Rc<dyn BatcherTrait>,
    pub parent: ParentRef,
    pub result_index: usize,
    /// Holds the batcher node's `Entry` once batching has started for this
    /// operation; empty until then (§3 invariant 4).
    pub children: HashSet<Entry>,
}

pub struct BatcherNode {
    pub batcher: Rc<dyn BatcherTrait>,
    pub operation_count: usize,
    /// May shrink below `operation_count` as sibling failures disown
    /// operations mid-flight (§3 invariant 5); `operation_count` itself
    /// never changes.
    pub parent_to_operation_index: HashMap<Entry, usize>,
    /// Holds the `gen_batch` task node's `Entry` once `gen_batch` has
    /// returned successfully.
    pub children: HashSet<Entry>,
}

pub enum Node {
    Task(TaskNode),
    Operation(OperationNode),
    Batcher(BatcherNode),
}

impl Node {
    pub fn children(&self) -> &HashSet<Entry> {
        match self {
            Node::Task(n) => &n.children,
            Node::Operation(n) => &n.children,
            Node::Batcher(n) => &n.children,
        }
    }

    pub fn children_mut(&mut self) -> &mut HashSet<Entry> {
        match self {
            Node::Task(n) => &mut n.children,
            Node::Operation(n) => &mut n.children,
            Node::Batcher(n) => &mut n.children,
        }
    }

    pub fn is_childless(&self) -> bool {
        self.children().is_empty()
    }
}
