//! Single-assignment asynchronous result containers.
//!
//! A [`Deferred`] is the primitive every asynchronous operation in the
//! runtime is built on: it is settled exactly once, delivers to observers in
//! registration order, and never lets a failure disappear — an outcome with
//! no registered error handler is routed to a process-wide default handler
//! instead of being dropped.

use std::sync::{Arc, Mutex, RwLock};

use anyhow::Result;
use thiserror::Error;
use tracing::error;

/// Shared failure payload, clonable so one error value can be delivered to
/// any number of observers.
pub type Failure = Arc<anyhow::Error>;

type SuccessHandler<T> = Box<dyn FnOnce(T) -> Result<()> + Send>;
type ErrorHandler = Box<dyn FnOnce(Failure) -> Result<()> + Send>;
type GlobalErrorHandler = Box<dyn Fn(Failure) + Send + Sync>;

static GLOBAL_ERROR_HANDLER: RwLock<Option<GlobalErrorHandler>> = RwLock::new(None);

/// Replaces the process-wide handler that receives failures for which no
/// error handler was ever registered. The built-in default logs the failure.
pub fn set_global_error_handler(handler: impl Fn(Failure) + Send + Sync + 'static) {
    let mut guard = GLOBAL_ERROR_HANDLER
        .write()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    *guard = Some(Box::new(handler));
}

fn report_to_global(failure: Failure) {
    let guard = GLOBAL_ERROR_HANDLER
        .read()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    match guard.as_ref() {
        Some(handler) => handler(failure),
        None => error!(error = %failure, "unhandled deferred failure"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Created, no handlers registered yet.
    Unattached,
    /// At least one handler registered, not yet settled.
    Pending,
    Fulfilled,
    Failed,
    /// Delivery permanently suppressed.
    Canceled,
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("incorrect state for {operation}: {state:?}")]
    InvalidTransition {
        operation: &'static str,
        state: State,
    },
    #[error("already canceled")]
    AlreadyCanceled,
}

struct Inner<T> {
    state: State,
    value: Option<T>,
    failure: Option<Failure>,
    success_handlers: Vec<SuccessHandler<T>>,
    error_handlers: Vec<ErrorHandler>,
}

pub struct Deferred<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + 'static> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> Deferred<T> {
    pub fn new() -> Self {
        Self::with_state(State::Unattached, None, None)
    }

    /// Returns a deferred that is already fulfilled. Handlers registered on
    /// it are delivered asynchronously with `value`.
    pub fn fulfilled(value: T) -> Self {
        Self::with_state(State::Fulfilled, Some(value), None)
    }

    /// Returns a deferred that is already failed. Intended for
    /// immediately-returned results whose caller attaches handlers; the
    /// stored failure is delivered to them asynchronously.
    pub fn failed(error: impl Into<anyhow::Error>) -> Self {
        Self::with_state(State::Failed, None, Some(Arc::new(error.into())))
    }

    fn with_state(state: State, value: Option<T>, failure: Option<Failure>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state,
                value,
                failure,
                success_handlers: Vec::new(),
                error_handlers: Vec::new(),
            })),
        }
    }

    pub fn state(&self) -> State {
        self.lock().state
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<T>> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Registers a success handler and an error handler.
    ///
    /// Before settlement handlers are queued in registration order. After
    /// settlement the matching handler is scheduled on the next tick with
    /// the original result, never invoked synchronously. On a canceled
    /// deferred this is a no-op.
    pub fn on_settled(
        &self,
        on_success: impl FnOnce(T) -> Result<()> + Send + 'static,
        on_error: impl FnOnce(Failure) -> Result<()> + Send + 'static,
    ) {
        self.register(Some(Box::new(on_success)), Some(Box::new(on_error)));
    }

    /// Registers a success handler only. A failure of this deferred is then
    /// reported to the global error handler.
    pub fn on_success(&self, on_success: impl FnOnce(T) -> Result<()> + Send + 'static) {
        self.register(Some(Box::new(on_success)), None);
    }

    /// Registers an error handler only.
    pub fn on_failure(&self, on_error: impl FnOnce(Failure) -> Result<()> + Send + 'static) {
        self.register(None, Some(Box::new(on_error)));
    }

    fn register(&self, success: Option<SuccessHandler<T>>, error: Option<ErrorHandler>) {
        let mut inner = self.lock();
        match inner.state {
            State::Unattached | State::Pending => {
                if let Some(handler) = success {
                    inner.success_handlers.push(handler);
                }
                if let Some(handler) = error {
                    inner.error_handlers.push(handler);
                }
                inner.state = State::Pending;
            }
            State::Fulfilled => {
                let value = inner.value.clone();
                drop(inner);
                let (Some(handler), Some(value)) = (success, value) else {
                    return;
                };
                tokio::spawn(async move {
                    if let Err(err) = handler(value) {
                        let failure = Arc::new(err);
                        match error {
                            Some(on_error) => {
                                if let Err(err) = on_error(failure) {
                                    report_to_global(Arc::new(err));
                                }
                            }
                            None => report_to_global(failure),
                        }
                    }
                });
            }
            State::Failed => {
                let failure = inner.failure.clone();
                drop(inner);
                let Some(failure) = failure else { return };
                tokio::spawn(async move {
                    match error {
                        Some(on_error) => {
                            if let Err(err) = on_error(failure) {
                                report_to_global(Arc::new(err));
                            }
                        }
                        None => report_to_global(failure),
                    }
                });
            }
            State::Canceled => {}
        }
    }

    /// Fulfills the deferred and invokes all registered success handlers in
    /// registration order.
    ///
    /// Calling this on an already-settled deferred is an invalid state
    /// transition; on a canceled deferred it is a silent no-op.
    pub fn fulfill(&self, value: T) -> Result<(), StateError> {
        let (successes, errors) = {
            let mut inner = self.lock();
            match inner.state {
                State::Canceled => return Ok(()),
                State::Fulfilled | State::Failed => {
                    return Err(StateError::InvalidTransition {
                        operation: "fulfill",
                        state: inner.state,
                    });
                }
                State::Unattached | State::Pending => {}
            }
            inner.state = State::Fulfilled;
            inner.value = Some(value.clone());
            (
                std::mem::take(&mut inner.success_handlers),
                std::mem::take(&mut inner.error_handlers),
            )
        };
        deliver_success(value, successes, errors);
        Ok(())
    }

    /// Fails the deferred and invokes all registered error handlers, or the
    /// global error handler when none were registered.
    pub fn fail(&self, error: impl Into<anyhow::Error>) -> Result<(), StateError> {
        self.fail_shared(Arc::new(error.into()))
    }

    /// Same as [`fail`](Self::fail), taking an already-shared failure so the
    /// one payload can settle several deferreds.
    pub fn fail_shared(&self, failure: Failure) -> Result<(), StateError> {
        let errors = {
            let mut inner = self.lock();
            match inner.state {
                State::Canceled => return Ok(()),
                State::Fulfilled | State::Failed => {
                    return Err(StateError::InvalidTransition {
                        operation: "fail",
                        state: inner.state,
                    });
                }
                State::Unattached | State::Pending => {}
            }
            inner.state = State::Failed;
            inner.failure = Some(failure.clone());
            inner.success_handlers.clear();
            std::mem::take(&mut inner.error_handlers)
        };
        deliver_failure(failure, errors);
        Ok(())
    }

    /// Cancels the deferred: all future delivery is suppressed.
    ///
    /// The settled states cannot be left, so canceling a fulfilled, failed
    /// or already-canceled deferred is an error.
    pub fn cancel(&self) -> Result<(), StateError> {
        let mut inner = self.lock();
        match inner.state {
            State::Canceled => Err(StateError::AlreadyCanceled),
            State::Fulfilled | State::Failed => Err(StateError::InvalidTransition {
                operation: "cancel",
                state: inner.state,
            }),
            State::Unattached | State::Pending => {
                inner.state = State::Canceled;
                inner.success_handlers.clear();
                inner.error_handlers.clear();
                inner.value = None;
                inner.failure = None;
                Ok(())
            }
        }
    }
}

fn deliver_success<T: Clone>(
    value: T,
    successes: Vec<SuccessHandler<T>>,
    errors: Vec<ErrorHandler>,
) {
    let mut errors = Some(errors);
    for handler in successes {
        if let Err(err) = handler(value.clone()) {
            // One observer's failure diverts into this deferred's error
            // chain; the remaining success handlers are skipped.
            deliver_failure(Arc::new(err), errors.take().unwrap_or_default());
            return;
        }
    }
}

fn deliver_failure(failure: Failure, handlers: Vec<ErrorHandler>) {
    if handlers.is_empty() {
        report_to_global(failure);
        return;
    }
    for handler in handlers {
        if let Err(err) = handler(failure.clone()) {
            report_to_global(Arc::new(err));
            return;
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
