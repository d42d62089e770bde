use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, error, trace};

use super::queue::TaskQueue;

/// Spawns a single worker thread that runs tasks from the queue until it
/// is stopped and drained.
pub(super) fn spawn_worker(
    name: String,
    queue: Arc<TaskQueue>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new().name(name).spawn(move || run(&queue))
}

fn run(queue: &TaskQueue) {
    let name = thread::current().name().unwrap_or("worker").to_owned();
    debug!("{name} started");

    while let Some(task) = queue.pop_or_wait() {
        trace!("{name} executing task");
        // Task outcomes are captured by their handles; this only guards
        // against panics while handing the outcome over.
        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            error!("{name} task panicked outside its handle, continuing");
        }
    }

    debug!("{name}: queue stopped, shutting down");
}
