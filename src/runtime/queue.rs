use super::InstanceId;
use crate::error::FlowError;
use std::collections::VecDeque;

/// One unit of scheduled work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Task {
    pub instance: InstanceId,
    pub component: usize,
    /// Set for resumptions of a suspended component; these skip the readiness recheck.
    pub continuous: bool,
}

/// Bounded FIFO of pending tasks. A full queue rejects work instead of dropping it.
#[derive(Debug)]
pub struct ExecutionQueue {
    tasks: VecDeque<Task>,
    capacity: usize,
}

impl ExecutionQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            tasks: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, task: Task) -> Result<(), FlowError> {
        if self.tasks.len() >= self.capacity {
            return Err(FlowError::QueueFull);
        }
        self.tasks.push_back(task);
        Ok(())
    }

    pub fn peek(&self) -> Option<&Task> {
        self.tasks.front()
    }

    pub fn pop(&mut self) -> Option<Task> {
        self.tasks.pop_front()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn has_tasks_for(&self, instance: InstanceId) -> bool {
        self.tasks.iter().any(|task| task.instance == instance)
    }

    pub fn discard_instance(&mut self, instance: InstanceId) {
        self.tasks.retain(|task| task.instance != instance);
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }
}
