//! Failure isolation at the host boundary.
//!
//! Plugin code and host callbacks run behind [`isolate`], which turns both
//! returned errors and panics into a [`Failure`]. [`swallow`] is the
//! top-level handler: it logs and drops whatever escaped, so the host process
//! never unwinds through the runtime.

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::error;

/// What went wrong inside an isolated call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// The call returned an error.
    Error(String),
    /// The call panicked.
    Panic(String),
}

impl Failure {
    pub fn message(&self) -> &str {
        match self {
            Failure::Error(message) | Failure::Panic(message) => message,
        }
    }

    pub fn is_panic(&self) -> bool {
        matches!(self, Failure::Panic(_))
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Error(message) => write!(f, "{}", message),
            Failure::Panic(message) => write!(f, "panic: {}", message),
        }
    }
}

/// Run `f`, converting an error or a panic into a [`Failure`].
pub fn isolate<T, F>(f: F) -> Result<T, Failure>
where
    F: FnOnce() -> anyhow::Result<T>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(Failure::Error(format!("{:#}", err))),
        Err(payload) => Err(Failure::Panic(panic_message(payload.as_ref()))),
    }
}

/// Top-level handler for host-facing entry points.
///
/// Runs `f` and logs anything that escapes it. Nothing is ever propagated.
pub fn swallow<F>(context: &str, f: F)
where
    F: FnOnce(),
{
    if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
        error!(
            context,
            panic = %panic_message(payload.as_ref()),
            "Unhandled failure swallowed at host boundary"
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
