use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use crate::{PoolError, Result};

/// A deferred unit of work with its arguments already bound.
pub(crate) type Task = Box<dyn FnOnce() + Send + 'static>;

struct State {
    tasks: VecDeque<Task>,
    stopped: bool,
}

/// FIFO of pending tasks shared by the workers and the submission path.
///
/// The task sequence and the stop flag live under one lock, so a worker
/// never sees one change without the other.
pub(crate) struct TaskQueue {
    state: Mutex<State>,
    available: Condvar,
}

impl TaskQueue {
    pub(crate) fn new() -> Self {
        TaskQueue {
            state: Mutex::new(State {
                tasks: VecDeque::new(),
                stopped: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Appends a task and wakes one idle worker.
    ///
    /// Fails with [`PoolError::Stopped`] once [`stop`](Self::stop) has been called.
    pub(crate) fn push(&self, task: Task) -> Result<()> {
        {
            let mut state = self.lock();
            if state.stopped {
                return Err(PoolError::Stopped);
            }
            state.tasks.push_back(task);
        }
        self.available.notify_one();
        Ok(())
    }

    /// Blocks until there is a task to run or the queue is stopped and drained.
    ///
    /// Returns `None` only when the caller should exit.
    pub(crate) fn pop_or_wait(&self) -> Option<Task> {
        let state = self.lock();
        let mut state = self
            .available
            .wait_while(state, |s| !s.stopped && s.tasks.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        state.tasks.pop_front()
    }

    /// Stops accepting tasks and wakes every worker.
    ///
    /// Returns `true` for the call that actually flipped the flag.
    pub(crate) fn stop(&self) -> bool {
        let first = !std::mem::replace(&mut self.lock().stopped, true);
        self.available.notify_all();
        first
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().tasks.len()
    }

    // No task runs while the lock is held, so a poisoned lock still guards
    // consistent state.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
