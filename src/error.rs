use std::any::Any;
use std::io;

use thiserror::Error;

/// Error type for thread pool operations.
#[derive(Error, Debug)]
pub enum PoolError {
    /// The pool was configured with an unusable argument, such as zero workers.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Work was submitted after the pool stopped accepting it.
    #[error("submit() on stopped thread pool")]
    Stopped,

    /// The OS refused to spawn a worker thread.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias for thread pool operations.
pub type Result<T> = std::result::Result<T, PoolError>;

/// Failure reported by a [`TaskHandle`](crate::TaskHandle) instead of a value.
#[derive(Error, Debug)]
pub enum TaskError {
    /// The task panicked. Holds the original panic payload.
    #[error("task panicked: {}", panic_message(&**.0).unwrap_or("<non-string payload>"))]
    Panicked(Box<dyn Any + Send + 'static>),

    /// The task was dropped before a worker ran it.
    #[error("task was discarded before it ran")]
    Discarded,
}

impl TaskError {
    /// Returns the panic message if the payload is a `&str` or `String`.
    pub fn message(&self) -> Option<&str> {
        match self {
            TaskError::Panicked(payload) => panic_message(&**payload),
            TaskError::Discarded => None,
        }
    }

    /// Consumes the error, returning the panic payload if there is one.
    pub fn into_panic(self) -> Option<Box<dyn Any + Send + 'static>> {
        match self {
            TaskError::Panicked(payload) => Some(payload),
            TaskError::Discarded => None,
        }
    }
}

fn panic_message<'a>(payload: &'a (dyn Any + Send + 'static)) -> Option<&'a str> {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        Some(*s)
    } else {
        payload.downcast_ref::<String>().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_from_str_and_string_payloads() {
        let err = TaskError::Panicked(Box::new("boom"));
        assert_eq!(err.message(), Some("boom"));
        assert_eq!(err.to_string(), "task panicked: boom");

        let err = TaskError::Panicked(Box::new(String::from("formatted 42")));
        assert_eq!(err.message(), Some("formatted 42"));
    }

    #[test]
    fn message_from_opaque_payload() {
        let err = TaskError::Panicked(Box::new(7_u32));
        assert_eq!(err.message(), None);
        assert_eq!(err.to_string(), "task panicked: <non-string payload>");
        let payload = err.into_panic().expect("panicked error carries a payload");
        assert_eq!(payload.downcast_ref::<u32>(), Some(&7));
    }

    #[test]
    fn discarded_has_no_payload() {
        assert!(TaskError::Discarded.message().is_none());
        assert!(TaskError::Discarded.into_panic().is_none());
    }
}
