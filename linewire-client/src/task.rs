//! FIFO of requests awaiting their response.
//!
//! Responses carry no identifier, so the queue relies on the server
//! answering strictly in order: the head task always owns the next
//! response.

use std::collections::VecDeque;
use std::fmt;

/// Identifier of an enqueued task, unique per queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Completion handler. Receives the owner so it can issue follow-up
/// commands.
pub type Handler<C, R> = Box<dyn FnOnce(&mut C, R)>;

/// A pending request.
pub struct Task<C, R> {
    id: TaskId,
    handler: Option<Handler<C, R>>,
}

impl<C, R> Task<C, R> {
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Delivers the response. Tasks without a handler just discard it.
    pub fn complete(self, ctx: &mut C, response: R) {
        if let Some(handler) = self.handler {
            handler(ctx, response);
        }
    }
}

impl<C, R> fmt::Debug for Task<C, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("silent", &self.handler.is_none())
            .finish()
    }
}

/// Ordered queue of pending tasks.
pub struct TaskQueue<C, R> {
    tasks: VecDeque<Task<C, R>>,
    next_id: u64,
}

impl<C, R> TaskQueue<C, R> {
    pub fn new() -> Self {
        Self {
            tasks: VecDeque::new(),
            next_id: 1,
        }
    }

    /// Appends a task to the tail.
    pub fn enqueue(&mut self, handler: Option<Handler<C, R>>) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;
        self.tasks.push_back(Task { id, handler });
        id
    }

    /// Removes the oldest task.
    pub fn pop_head(&mut self) -> Option<Task<C, R>> {
        self.tasks.pop_front()
    }

    /// Drops every task without invoking any handler. Returns how many
    /// were discarded.
    pub fn clear(&mut self) -> usize {
        let n = self.tasks.len();
        self.tasks.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl<C, R> Default for TaskQueue<C, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C, R> fmt::Debug for TaskQueue<C, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.tasks.iter()).finish()
    }
}
