//! # Call Futures
//!
//! `CallFuture` is the single-assignment handle behind every call that expects a
//! reply. It owns the receiving end of the call's reply channel; the service loop
//! owns the sending end through the registry.
//!
//! `wait` produces exactly one outcome: the transformed value, the host's error,
//! or a local failure (timeout, cancellation, closed link).

use std::sync::Arc;
use std::time::Duration;

use bridgerpc::Value;
use bridgerpc::frame::CANCEL_FUNCTION;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::debug;

use crate::error::Error;
use crate::error::Result;
use crate::executor::Executor;
use crate::link::Recv;
use crate::link::Shared;
use crate::registry::CallId;
use crate::registry::Delivery;

type Transform<T> = Box<dyn Fn(Value) -> Result<T> + Send>;
type TimeoutHandler<T> = Box<dyn FnOnce() -> Result<T> + Send>;

/// Handle to the eventual result of an asynchronous call.
pub struct CallFuture<T = Value> {
    id: CallId,
    function: String,
    executor: Executor,
    rx: UnboundedReceiver<Delivery>,
    shared: Arc<Shared>,
    transform: Transform<T>,
    on_timeout: Option<TimeoutHandler<T>>,
    resolved: bool,
    cancelled: bool,
}

impl CallFuture<Value> {
    pub(crate) fn new(
        id: CallId,
        function: String,
        executor: Executor,
        rx: UnboundedReceiver<Delivery>,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            id,
            function,
            executor,
            rx,
            shared,
            transform: Box::new(Ok::<Value, Error>),
            on_timeout: None,
            resolved: false,
            cancelled: false,
        }
    }
}

impl<T: 'static> CallFuture<T> {
    pub fn id(&self) -> CallId {
        self.id
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    /// Applies `f` to the value once it arrives.
    pub fn map<U, F>(self, f: F) -> CallFuture<U>
    where
        F: Fn(T) -> Result<U> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let prev = self.transform;
        let then = Arc::clone(&f);
        let transform: Transform<U> = Box::new(move |v| prev(v).and_then(|t| then(t)));
        let on_timeout = self.on_timeout.map(|h| -> TimeoutHandler<U> {
            Box::new(move || h().and_then(|t| f(t)))
        });

        CallFuture {
            id: self.id,
            function: self.function,
            executor: self.executor,
            rx: self.rx,
            shared: self.shared,
            transform,
            on_timeout,
            resolved: self.resolved,
            cancelled: self.cancelled,
        }
    }

    /// Converts the value with `TryFrom<Value>`.
    pub fn typed<U>(self) -> CallFuture<U>
    where
        T: Into<Value>,
        U: TryFrom<Value, Error = bridgerpc::RpcError> + 'static,
    {
        self.map(|t| U::try_from(t.into()).map_err(Error::from))
    }

    /// Produces the outcome of a timed-out `wait` instead of `Error::Timeout`.
    pub fn on_timeout<F>(mut self, handler: F) -> Self
    where
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        self.on_timeout = Some(Box::new(handler));
        self
    }

    /// Blocks until the call produces its result.
    ///
    /// With a `timeout`, returns no later than the deadline: either the timeout
    /// handler's result or `Error::Timeout`. A timed-out future without a handler
    /// can be waited on again. Once the link is closed, returns `Error::LinkClosed`
    /// without blocking. On a thread driving a tokio runtime, returns
    /// `Error::InsideRuntime` instead of blocking; the future stays pending.
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<T> {
        if self.resolved {
            return Err(Error::AlreadyResolved);
        }
        if self.cancelled {
            return Err(Error::Cancelled);
        }

        match self.shared.recv_blocking(&mut self.rx, timeout) {
            Recv::Delivery(delivery) => {
                self.resolved = true;
                delivery.outcome.and_then(|v| (self.transform)(v))
            }
            Recv::Disconnected => {
                self.resolved = true;
                if self.shared.is_closed() {
                    Err(Error::LinkClosed)
                } else {
                    Err(Error::NoResult { function: self.function.clone() })
                }
            }
            Recv::Closed => {
                self.resolved = true;
                Err(Error::LinkClosed)
            }
            Recv::InsideRuntime => Err(Error::InsideRuntime),
            Recv::TimedOut => match self.on_timeout.take() {
                Some(handler) => {
                    self.resolved = true;
                    handler()
                }
                None => Err(Error::Timeout {
                    function: self.function.clone(),
                    after: timeout.unwrap_or_default(),
                }),
            },
        }
    }

    /// Asks the host to abandon the call. Best-effort: a result the host already
    /// produced is dropped rather than delivered.
    pub fn cancel(&mut self) -> Result<()> {
        if self.resolved || self.cancelled {
            return Ok(());
        }
        self.cancelled = true;
        if self.shared.registry().forget(self.id).is_some() {
            debug!("cancelling call {} ('{}')", self.id, self.function);
            let args = [Value::from(self.id), Value::from(self.function.as_str())];
            self.shared.fire(CANCEL_FUNCTION, &args, self.executor)?;
        }
        Ok(())
    }
}

/// A call whose host function returns several values before closing.
pub struct ReplyStream {
    id: CallId,
    function: String,
    executor: Executor,
    rx: UnboundedReceiver<Delivery>,
    shared: Arc<Shared>,
    finished: bool,
}

impl ReplyStream {
    pub(crate) fn new(
        id: CallId,
        function: String,
        executor: Executor,
        rx: UnboundedReceiver<Delivery>,
        shared: Arc<Shared>,
    ) -> Self {
        Self { id, function, executor, rx, shared, finished: false }
    }

    pub fn id(&self) -> CallId {
        self.id
    }

    /// Next streamed value, or `Ok(None)` once the host has closed the call.
    pub fn next(&mut self, timeout: Option<Duration>) -> Result<Option<Value>> {
        if self.finished {
            return Ok(None);
        }
        match self.shared.recv_blocking(&mut self.rx, timeout) {
            Recv::Delivery(delivery) => match delivery.outcome {
                Ok(v) => Ok(Some(v)),
                Err(Error::LinkClosed) => {
                    self.finished = true;
                    Err(Error::LinkClosed)
                }
                Err(e) => Err(e),
            },
            Recv::Disconnected => {
                self.finished = true;
                Ok(None)
            }
            Recv::Closed => {
                self.finished = true;
                Err(Error::LinkClosed)
            }
            Recv::InsideRuntime => Err(Error::InsideRuntime),
            Recv::TimedOut => Err(Error::Timeout {
                function: self.function.clone(),
                after: timeout.unwrap_or_default(),
            }),
        }
    }

    /// Asks the host to stop streaming.
    pub fn cancel(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        if self.shared.registry().forget(self.id).is_some() {
            let args = [Value::from(self.id), Value::from(self.function.as_str())];
            self.shared.fire(CANCEL_FUNCTION, &args, self.executor)?;
        }
        Ok(())
    }
}

impl Drop for ReplyStream {
    fn drop(&mut self) {
        if let Err(e) = self.cancel() {
            debug!("could not cancel stream {}: {}", self.id, e);
        }
    }
}
