use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, error};

use crate::handle::{task_pair, TaskHandle};
use crate::{PoolError, Result};

mod queue;
mod worker;

use self::queue::TaskQueue;
use self::worker::spawn_worker;

const DEFAULT_THREAD_NAME: &str = "taskpool-worker";

/// A fixed-size pool of worker threads fed from a shared FIFO queue.
///
/// Tasks are started in submission order by whichever worker is free. Each
/// submission returns a [`TaskHandle`] that delivers the task's value, or
/// re-raises its panic, once a worker has run it.
///
/// Dropping the pool stops it from accepting work, lets the workers finish
/// everything already queued, and joins them.
///
/// ```
/// use taskpool::ThreadPool;
///
/// let pool = ThreadPool::new(4)?;
/// let (a, b) = (7, 35);
/// let sum = pool.submit(move || a + b)?;
/// assert_eq!(sum.get(), 42);
/// # Ok::<(), taskpool::PoolError>(())
/// ```
pub struct ThreadPool {
    queue: Arc<TaskQueue>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Creates a thread pool with `threads` workers.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidArgument`] if `threads` is zero, and
    /// [`PoolError::Io`] if a worker thread cannot be spawned.
    pub fn new(threads: usize) -> Result<Self> {
        Builder::new().num_threads(threads).build()
    }

    /// Returns a builder for configuring a pool.
    pub fn builder() -> Builder {
        Builder::new()
    }

    /// Submits a task and returns a handle to its result.
    ///
    /// Arguments are bound by moving them into the closure, so later changes
    /// to the caller's variables do not affect the task.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Stopped`] if the pool no longer accepts work.
    /// The task is dropped without running.
    pub fn submit<F, T>(&self, f: F) -> Result<TaskHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (promise, handle) = task_pair();
        handle.mark_queued();
        self.queue.push(Box::new(move || promise.run(f)))?;
        Ok(handle)
    }

    /// Submits `f` to be called with `args`.
    ///
    /// ```
    /// # use taskpool::ThreadPool;
    /// # let pool = ThreadPool::new(2)?;
    /// let sum = pool.submit_with(|(a, b): (i32, i32)| a + b, (7, 35))?;
    /// assert_eq!(sum.get(), 42);
    /// # Ok::<(), taskpool::PoolError>(())
    /// ```
    pub fn submit_with<F, A, T>(&self, f: F, args: A) -> Result<TaskHandle<T>>
    where
        F: FnOnce(A) -> T + Send + 'static,
        A: Send + 'static,
        T: Send + 'static,
    {
        self.submit(move || f(args))
    }

    /// Returns the number of worker threads.
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Stops accepting new tasks.
    ///
    /// Already queued tasks still run. Workers exit once the queue is empty;
    /// they are joined when the pool is dropped.
    pub fn stop(&self) {
        if self.queue.stop() {
            debug!(
                "Thread pool stopping with {} queued tasks",
                self.queue.len()
            );
        }
    }

    /// Stops the pool and blocks until every worker has exited.
    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.stop();

        let current = thread::current().id();
        for worker in self.workers.drain(..) {
            // A task may own the last reference to its pool; a worker
            // cannot join itself.
            if worker.thread().id() == current {
                continue;
            }
            let name = worker.thread().name().unwrap_or("worker").to_owned();
            if worker.join().is_err() {
                error!("{name} exited with a panic");
            }
        }
        debug!("Thread pool shut down");
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("size", &self.size())
            .field("queued", &self.queue.len())
            .finish()
    }
}

/// Configuration for a [`ThreadPool`].
///
/// ```
/// use taskpool::ThreadPool;
///
/// let pool = ThreadPool::builder()
///     .num_threads(2)
///     .thread_name("resize")
///     .build()?;
/// assert_eq!(pool.size(), 2);
/// # Ok::<(), taskpool::PoolError>(())
/// ```
#[derive(Debug, Clone)]
pub struct Builder {
    num_threads: usize,
    thread_name: String,
}

impl Builder {
    /// Creates a builder with one worker per logical CPU.
    pub fn new() -> Self {
        Builder {
            num_threads: num_cpus::get(),
            thread_name: DEFAULT_THREAD_NAME.to_owned(),
        }
    }

    /// Sets the number of worker threads.
    pub fn num_threads(mut self, threads: usize) -> Self {
        self.num_threads = threads;
        self
    }

    /// Sets the name prefix of worker threads. Workers are named
    /// `"{prefix}-{index}"`.
    pub fn thread_name(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name = prefix.into();
        self
    }

    /// Starts the workers and returns the pool.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidArgument`] if the thread count is zero or
    /// the name prefix contains a NUL byte. If a worker cannot be spawned,
    /// the workers already started are stopped and joined before
    /// [`PoolError::Io`] is returned.
    pub fn build(self) -> Result<ThreadPool> {
        if self.num_threads == 0 {
            return Err(PoolError::InvalidArgument(
                "thread pool needs at least one worker thread".to_owned(),
            ));
        }
        if self.thread_name.contains('\0') {
            return Err(PoolError::InvalidArgument(format!(
                "thread name {:?} contains a NUL byte",
                self.thread_name
            )));
        }

        let mut pool = ThreadPool {
            queue: Arc::new(TaskQueue::new()),
            workers: Vec::with_capacity(self.num_threads),
        };
        for id in 0..self.num_threads {
            let name = format!("{}-{}", self.thread_name, id);
            let worker = spawn_worker(name, Arc::clone(&pool.queue))?;
            pool.workers.push(worker);
        }

        debug!(
            "Started thread pool with {} workers ({})",
            self.num_threads, self.thread_name
        );
        Ok(pool)
    }
}

impl Default for Builder {
    fn default() -> Self {
        Builder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The error path of `build` drops a pool holding only the workers
    // started so far; those must be stopped and joined.
    #[test]
    fn partial_pool_drop_joins_started_workers() {
        let queue = Arc::new(TaskQueue::new());
        let worker = spawn_worker("partial-0".to_owned(), Arc::clone(&queue)).unwrap();
        let pool = ThreadPool {
            queue: Arc::clone(&queue),
            workers: vec![worker],
        };

        drop(pool);
        assert_eq!(Arc::strong_count(&queue), 1);
        assert!(matches!(
            queue.push(Box::new(|| ())),
            Err(PoolError::Stopped)
        ));
    }
}
