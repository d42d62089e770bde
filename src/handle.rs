use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crossbeam::channel::{self, Receiver, Sender, TryRecvError};
use log::debug;

use crate::TaskError;

/// Lifecycle of a submitted task.
///
/// A task moves `Created -> Queued -> Executing` and ends in exactly one of
/// `Completed` or `Failed`. A task that is dropped before any worker picks it
/// up ends in `Discarded` instead. Once a handle reports `Completed` or
/// `Failed`, its outcome is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Bound to a handle but not yet in the queue.
    Created,
    /// Waiting in the queue.
    Queued,
    /// Running on a worker.
    Executing,
    /// Returned normally; the value is in the handle.
    Completed,
    /// Panicked; the payload is in the handle.
    Failed,
    /// Dropped without running.
    Discarded,
}

impl TaskState {
    /// Returns `true` once the state can no longer change.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Discarded
        )
    }

    fn from_u8(raw: u8) -> TaskState {
        match raw {
            0 => TaskState::Created,
            1 => TaskState::Queued,
            2 => TaskState::Executing,
            3 => TaskState::Completed,
            4 => TaskState::Failed,
            5 => TaskState::Discarded,
            _ => unreachable!("invalid task state {raw}"),
        }
    }
}

/// State cell shared by a promise and its handle.
#[derive(Clone)]
struct Status(Arc<AtomicU8>);

impl Status {
    fn new() -> Self {
        Status(Arc::new(AtomicU8::new(TaskState::Created as u8)))
    }

    fn get(&self) -> TaskState {
        TaskState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Moves `from -> to`, failing if the task is not in `from`.
    fn advance(&self, from: TaskState, to: TaskState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Producer side of a task's result channel. Lives inside the queued task.
pub(crate) struct Promise<T> {
    tx: Sender<std::thread::Result<T>>,
    status: Status,
}

/// Creates a connected promise and handle for one task.
pub(crate) fn task_pair<T>() -> (Promise<T>, TaskHandle<T>) {
    let (tx, rx) = channel::bounded(1);
    let status = Status::new();
    let promise = Promise {
        tx,
        status: status.clone(),
    };
    let handle = TaskHandle {
        rx,
        status,
        outcome: None,
    };
    (promise, handle)
}

impl<T> Promise<T> {
    /// Runs `f` and records its value or panic for the handle.
    pub(crate) fn run<F>(self, f: F)
    where
        F: FnOnce() -> T,
    {
        let started = self.status.advance(TaskState::Queued, TaskState::Executing);
        debug_assert!(started, "task executed without being queued");

        let outcome = panic::catch_unwind(AssertUnwindSafe(f));
        let end = if outcome.is_ok() {
            TaskState::Completed
        } else {
            debug!("Task panicked, failure stored in its handle");
            TaskState::Failed
        };

        // A dropped handle means nobody wants the outcome. The state moves
        // only after the send, so a terminal state implies a ready handle.
        let _ = self.tx.send(outcome);
        self.status.advance(TaskState::Executing, end);
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if !self.status.advance(TaskState::Queued, TaskState::Discarded) {
            self.status.advance(TaskState::Created, TaskState::Discarded);
        }
    }
}

/// A handle to the eventual outcome of a task submitted to a
/// [`ThreadPool`](crate::ThreadPool).
///
/// The handle is consumed by [`get`](TaskHandle::get) or
/// [`join`](TaskHandle::join), both of which block until the task has run.
/// Dropping the handle does not cancel the task.
pub struct TaskHandle<T> {
    rx: Receiver<std::thread::Result<T>>,
    status: Status,
    outcome: Option<Result<T, TaskError>>,
}

impl<T> TaskHandle<T> {
    /// Marks the task as queued. Called right before it is pushed.
    pub(crate) fn mark_queued(&self) {
        self.status.advance(TaskState::Created, TaskState::Queued);
    }

    /// Returns the current lifecycle state of the task.
    pub fn state(&self) -> TaskState {
        self.status.get()
    }

    /// Checks whether the outcome is available without blocking.
    ///
    /// Once this returns `true`, [`get`](TaskHandle::get) and
    /// [`join`](TaskHandle::join) return immediately.
    pub fn is_ready(&mut self) -> bool {
        if self.outcome.is_some() {
            return true;
        }
        match self.rx.try_recv() {
            Ok(outcome) => {
                self.outcome = Some(outcome.map_err(TaskError::Panicked));
                true
            }
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Disconnected) => {
                self.outcome = Some(Err(TaskError::Discarded));
                true
            }
        }
    }

    /// Waits for the task and returns its value, or the reason there is none.
    pub fn join(mut self) -> Result<T, TaskError> {
        if let Some(outcome) = self.outcome.take() {
            return outcome;
        }
        match self.rx.recv() {
            Ok(outcome) => outcome.map_err(TaskError::Panicked),
            Err(_) => Err(TaskError::Discarded),
        }
    }

    /// Waits for the task and returns its value.
    ///
    /// # Panics
    ///
    /// If the task panicked, the original panic is resumed on the calling
    /// thread with the same payload. Also panics if the task was discarded
    /// without running.
    pub fn get(self) -> T {
        match self.join() {
            Ok(value) => value,
            Err(TaskError::Panicked(payload)) => panic::resume_unwind(payload),
            Err(err @ TaskError::Discarded) => panic!("{}", err),
        }
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;

    fn queued_pair<T>() -> (Promise<T>, TaskHandle<T>) {
        let (promise, handle) = task_pair();
        handle.mark_queued();
        (promise, handle)
    }

    #[test]
    fn value_reaches_handle() {
        let (promise, mut handle) = queued_pair();
        assert_eq!(handle.state(), TaskState::Queued);
        assert!(!handle.is_ready());

        promise.run(|| 6 * 7);
        assert_eq!(handle.state(), TaskState::Completed);
        assert!(handle.is_ready());
        assert!(handle.is_ready());
        assert_eq!(handle.get(), 42);
    }

    #[test]
    fn panic_reaches_handle_as_error() {
        let (promise, handle) = queued_pair::<i32>();
        promise.run(|| {
            panic_control::disable_hook_in_current_thread();
            panic!("boom")
        });
        panic_control::enable_hook_in_current_thread();
        assert_eq!(handle.state(), TaskState::Failed);

        let err = handle.join().unwrap_err();
        assert_eq!(err.message(), Some("boom"));
    }

    #[test]
    fn get_resumes_original_panic() {
        let (promise, handle) = queued_pair::<()>();
        promise.run(|| {
            panic_control::disable_hook_in_current_thread();
            panic::panic_any(String::from("custom payload"))
        });

        let payload = panic::catch_unwind(AssertUnwindSafe(|| handle.get())).unwrap_err();
        panic_control::enable_hook_in_current_thread();
        assert_eq!(
            payload.downcast_ref::<String>().map(String::as_str),
            Some("custom payload")
        );
    }

    #[test]
    fn dropped_promise_discards() {
        let (promise, mut handle) = queued_pair::<u8>();
        drop(promise);
        assert_eq!(handle.state(), TaskState::Discarded);
        assert!(handle.is_ready());
        assert!(matches!(handle.join(), Err(TaskError::Discarded)));
    }

    #[test]
    fn unqueued_promise_discards() {
        let (promise, handle) = task_pair::<u8>();
        assert_eq!(handle.state(), TaskState::Created);
        drop(promise);
        assert_eq!(handle.state(), TaskState::Discarded);
    }

    #[test]
    fn terminal_state_survives_promise_drop() {
        let (promise, handle) = queued_pair();
        promise.run(|| "done");
        assert_eq!(handle.state(), TaskState::Completed);
        assert!(handle.state().is_terminal());
        assert_eq!(handle.join().unwrap(), "done");
    }

    #[test]
    fn join_blocks_until_run() {
        let (promise, handle) = queued_pair();
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            promise.run(|| vec![1, 2, 3]);
        });
        assert_eq!(handle.join().unwrap(), vec![1, 2, 3]);
        producer.join().unwrap();
    }

    #[test]
    fn terminal_state_means_ready() {
        for _ in 0..200 {
            let (promise, mut handle) = queued_pair();
            let producer = thread::spawn(move || promise.run(|| 7));
            while !handle.state().is_terminal() {
                thread::yield_now();
            }
            assert!(handle.is_ready());
            assert_eq!(handle.get(), 7);
            producer.join().unwrap();
        }
    }

    #[test]
    fn state_round_trips_through_u8() {
        for state in [
            TaskState::Created,
            TaskState::Queued,
            TaskState::Executing,
            TaskState::Completed,
            TaskState::Failed,
            TaskState::Discarded,
        ] {
            assert_eq!(TaskState::from_u8(state as u8), state);
        }
    }

    #[test]
    #[should_panic(expected = "invalid task state")]
    fn unknown_state_is_rejected() {
        TaskState::from_u8(6);
    }

    #[test]
    fn dropped_handle_does_not_stop_promise() {
        let (promise, handle) = queued_pair();
        drop(handle);
        promise.run(|| 1);
    }
}
