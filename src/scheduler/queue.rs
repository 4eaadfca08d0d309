//! # Task Queue
//!
//! Priority + FIFO sub-queues with dependency-gated dequeue.
//!
//! Tasks with priority above [`PRIORITY_QUEUE_THRESHOLD`](crate::scheduler::task::PRIORITY_QUEUE_THRESHOLD)
//! land in the priority queue, kept sorted descending with insertion-order
//! ties; the rest append to FIFO. Dequeue scans the priority queue first and
//! returns the first task whose dependencies are all present in the
//! completed-results map.
//!
//! A dependency that completed unsuccessfully still unblocks its dependents:
//! presence in the completed map, not success, is the gate. A dependency id
//! that was never accepted (or was dropped via [`TaskQueue::clear`]) can never
//! complete; such dependents are surfaced through
//! [`TaskQueue::take_unresolvable`] instead of starving in the queue.

use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, trace};

use crate::scheduler::task::{Task, TaskId, TaskResult};

/// Priority- and dependency-aware bounded task queue
#[derive(Debug)]
pub struct TaskQueue {
    /// Sorted descending by priority, insertion order within a priority
    priority: Vec<Task>,
    fifo: VecDeque<Task>,
    /// Dependency bookkeeping for tasks still waiting in a queue
    dependencies: HashMap<TaskId, Vec<TaskId>>,
    /// Results of every finished task, keyed by id
    completed: HashMap<TaskId, TaskResult>,
    /// Every id this queue has accepted and not dropped; a dependency outside
    /// this set and outside `completed` can never be satisfied
    known: HashSet<TaskId>,
    max_size: usize,
}

impl TaskQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            priority: Vec::new(),
            fifo: VecDeque::new(),
            dependencies: HashMap::new(),
            completed: HashMap::new(),
            known: HashSet::new(),
            max_size,
        }
    }

    /// Accept a task unless the combined queues are at capacity
    ///
    /// Returns `false` on rejection; the task is not recorded anywhere.
    pub fn enqueue(&mut self, task: Task) -> bool {
        if self.priority.len() + self.fifo.len() >= self.max_size {
            debug!(task_id = %task.id, max_size = self.max_size, "Queue at capacity, rejecting task");
            return false;
        }

        self.known.insert(task.id);
        if !task.dependencies.is_empty() {
            self.dependencies.insert(task.id, task.dependencies.clone());
        }

        if task.is_priority() {
            // Stable insertion keeps submission order within a priority level
            let position = self
                .priority
                .partition_point(|queued| queued.priority >= task.priority);
            trace!(task_id = %task.id, priority = task.priority, position, "Enqueued to priority queue");
            self.priority.insert(position, task);
        } else {
            trace!(task_id = %task.id, "Enqueued to FIFO queue");
            self.fifo.push_back(task);
        }

        true
    }

    /// Remove and return the first task whose dependencies are all completed
    ///
    /// The priority queue is always scanned before FIFO; relative order of the
    /// remaining tasks is preserved. Returns `None` when nothing is ready.
    pub fn dequeue(&mut self) -> Option<Task> {
        if let Some(index) = self
            .priority
            .iter()
            .position(|task| self.dependencies_satisfied(task))
        {
            return Some(self.priority.remove(index));
        }

        if let Some(index) = self
            .fifo
            .iter()
            .position(|task| self.dependencies_satisfied(task))
        {
            return self.fifo.remove(index);
        }

        None
    }

    /// Remove every queued task with a dependency that can never complete
    ///
    /// Returns each removed task with the first offending dependency id. A
    /// dependency can never complete when it is neither in the completed map
    /// nor known to the queue (never submitted, or dropped by `clear`).
    pub fn take_unresolvable(&mut self) -> Vec<(Task, TaskId)> {
        let mut stuck = Vec::new();

        let mut index = 0;
        while index < self.priority.len() {
            if let Some(dep) = self.first_unresolvable_dependency(&self.priority[index]) {
                stuck.push((self.priority.remove(index), dep));
            } else {
                index += 1;
            }
        }

        let mut index = 0;
        while index < self.fifo.len() {
            match self.first_unresolvable_dependency(&self.fifo[index]) {
                Some(dep) => {
                    if let Some(task) = self.fifo.remove(index) {
                        stuck.push((task, dep));
                    }
                }
                None => index += 1,
            }
        }

        for (task, _) in &stuck {
            self.dependencies.remove(&task.id);
            self.known.remove(&task.id);
        }
        stuck
    }

    /// Record a task's result and clear its dependency bookkeeping
    pub fn mark_completed(&mut self, task_id: TaskId, result: TaskResult) {
        self.dependencies.remove(&task_id);
        self.completed.insert(task_id, result);
    }

    /// Result of a finished task, if any
    pub fn completed(&self, task_id: &TaskId) -> Option<&TaskResult> {
        self.completed.get(task_id)
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    /// Drop all pending tasks, forgetting their ids
    ///
    /// Dependents of a cleared task are failed on the next unresolvable scan
    /// rather than waiting forever. Tasks already dequeued are unaffected;
    /// assigned work cannot be cancelled.
    pub fn clear(&mut self) -> usize {
        let dropped = self.priority.len() + self.fifo.len();
        for task in self.priority.drain(..) {
            self.known.remove(&task.id);
            self.dependencies.remove(&task.id);
        }
        for task in self.fifo.drain(..) {
            self.known.remove(&task.id);
            self.dependencies.remove(&task.id);
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.priority.len() + self.fifo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.priority.is_empty() && self.fifo.is_empty()
    }

    pub fn priority_len(&self) -> usize {
        self.priority.len()
    }

    pub fn fifo_len(&self) -> usize {
        self.fifo.len()
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }

    fn dependencies_satisfied(&self, task: &Task) -> bool {
        task.dependencies
            .iter()
            .all(|dep| self.completed.contains_key(dep))
    }

    fn first_unresolvable_dependency(&self, task: &Task) -> Option<TaskId> {
        task.dependencies
            .iter()
            .find(|dep| !self.completed.contains_key(dep) && !self.known.contains(dep))
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::task::TaskRequest;
    use serde_json::Value;
    use std::time::Duration;
    use uuid::Uuid;

    fn task_with_priority(priority: i32) -> Task {
        Task::from_request(TaskRequest::new("noop", Value::Null).with_priority(priority))
    }

    fn task_with_dependencies(dependencies: Vec<TaskId>) -> Task {
        Task::from_request(TaskRequest::new("noop", Value::Null).with_dependencies(dependencies))
    }

    fn dummy_result(task_id: TaskId) -> TaskResult {
        TaskResult::success(task_id, Uuid::new_v4(), Value::Null, Duration::from_millis(1))
    }

    #[test]
    fn test_priority_order_with_fifo_ties() {
        let mut queue = TaskQueue::new(10);
        let priorities = [9, 1, 5, 9];
        let mut ids = Vec::new();
        for p in priorities {
            let task = task_with_priority(p);
            ids.push(task.id);
            assert!(queue.enqueue(task));
        }

        // Both priority-9 tasks first, in submission order, then the FIFO pair.
        let first = queue.dequeue().unwrap();
        let second = queue.dequeue().unwrap();
        assert_eq!(first.id, ids[0]);
        assert_eq!(second.id, ids[3]);

        let third = queue.dequeue().unwrap();
        let fourth = queue.dequeue().unwrap();
        assert_eq!(third.id, ids[1]);
        assert_eq!(fourth.id, ids[2]);
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn test_capacity_rejection() {
        let mut queue = TaskQueue::new(2);
        assert!(queue.enqueue(task_with_priority(0)));
        assert!(queue.enqueue(task_with_priority(9)));
        assert!(!queue.enqueue(task_with_priority(0)));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_dependency_gated_dequeue() {
        let mut queue = TaskQueue::new(10);
        let parent = task_with_priority(0);
        let parent_id = parent.id;
        let child = task_with_dependencies(vec![parent_id]);
        let child_id = child.id;

        assert!(queue.enqueue(parent));
        assert!(queue.enqueue(child));

        let dequeued = queue.dequeue().unwrap();
        assert_eq!(dequeued.id, parent_id);
        // Child is blocked until the parent's result is recorded.
        assert!(queue.dequeue().is_none());

        queue.mark_completed(parent_id, dummy_result(parent_id));
        let dequeued = queue.dequeue().unwrap();
        assert_eq!(dequeued.id, child_id);
    }

    #[test]
    fn test_failed_dependency_still_unblocks() {
        let mut queue = TaskQueue::new(10);
        let parent = task_with_priority(0);
        let parent_id = parent.id;
        let child = task_with_dependencies(vec![parent_id]);

        assert!(queue.enqueue(parent));
        assert!(queue.enqueue(child));
        queue.dequeue().unwrap();

        let failed = TaskResult::failure(parent_id, None, "boom", Duration::ZERO);
        queue.mark_completed(parent_id, failed);
        assert!(queue.dequeue().is_some());
    }

    #[test]
    fn test_unresolvable_dependency_detected() {
        let mut queue = TaskQueue::new(10);
        let phantom = Uuid::new_v4();
        let stuck = task_with_dependencies(vec![phantom]);
        let stuck_id = stuck.id;
        assert!(queue.enqueue(stuck));

        assert!(queue.dequeue().is_none());
        let unresolvable = queue.take_unresolvable();
        assert_eq!(unresolvable.len(), 1);
        assert_eq!(unresolvable[0].0.id, stuck_id);
        assert_eq!(unresolvable[0].1, phantom);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pending_dependency_is_not_unresolvable() {
        let mut queue = TaskQueue::new(10);
        let parent = task_with_priority(0);
        let child = task_with_dependencies(vec![parent.id]);
        assert!(queue.enqueue(parent));
        assert!(queue.enqueue(child));

        // Parent dequeued but not completed: the child must keep waiting.
        queue.dequeue().unwrap();
        assert!(queue.take_unresolvable().is_empty());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_clear_makes_dependents_unresolvable() {
        let mut queue = TaskQueue::new(10);
        let parent = task_with_priority(0);
        let parent_id = parent.id;
        assert!(queue.enqueue(parent));
        assert_eq!(queue.clear(), 1);

        let orphan = task_with_dependencies(vec![parent_id]);
        assert!(queue.enqueue(orphan));
        let unresolvable = queue.take_unresolvable();
        assert_eq!(unresolvable.len(), 1);
        assert_eq!(unresolvable[0].1, parent_id);
    }
}
