//! Unbounded multi-producer FIFO of learning tasks

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use crate::types::LearnTask;

/// Task queue shared between producers and the drain loop.
///
/// Pushes never block producers beyond the short critical section; order is
/// FIFO per producer.
#[derive(Default)]
pub struct TaskQueue {
    inner: Mutex<VecDeque<LearnTask>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task at the tail
    pub fn push(&self, task: LearnTask) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(task);
    }

    /// Remove and return the head task, if any
    pub fn pop(&self) -> Option<LearnTask> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    /// Number of queued tasks
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
