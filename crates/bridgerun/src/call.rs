//! # Call Builder
//!
//! ```no_run
//! # fn example(link: &bridgerun::Link) -> bridgerun::Result<()> {
//! use bridgerun::Executor;
//!
//! let block = link
//!     .function("getblock")
//!     .arg(10)
//!     .arg(64)
//!     .arg(-3)
//!     .default_on(Executor::Render)
//!     .call()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use bridgerpc::Value;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::executor;
use crate::executor::Executor;
use crate::future::CallFuture;
use crate::future::ReplyStream;
use crate::link::Shared;
use crate::registry::ErrorRoute;

/// A call being assembled. Nothing is sent until one of the terminal methods
/// (`call`, `spawn`, `stream`, `fire`) runs.
#[must_use = "a call is only sent by call(), spawn(), stream() or fire()"]
pub struct Call<'a> {
    shared: &'a Arc<Shared>,
    function: String,
    args: Vec<Value>,
    required: Option<Executor>,
    site_default: Option<Executor>,
    errors: ErrorRoute,
}

impl<'a> Call<'a> {
    pub(crate) fn new(shared: &'a Arc<Shared>, function: String) -> Self {
        Self {
            shared,
            function,
            args: Vec::new(),
            required: None,
            site_default: None,
            errors: ErrorRoute::Deliver,
        }
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn args(mut self, values: impl IntoIterator<Item = Value>) -> Self {
        self.args.extend(values);
        self
    }

    /// Runs the call on `executor` regardless of any entered executor scope.
    pub fn on(mut self, executor: Executor) -> Self {
        self.required = Some(executor);
        self
    }

    /// Runs the call on `executor` unless an executor scope is active.
    pub fn default_on(mut self, executor: Executor) -> Self {
        self.site_default = Some(executor);
        self
    }

    /// Prints host exceptions as diagnostics instead of returning them.
    pub fn report_errors(mut self) -> Self {
        self.errors = ErrorRoute::Report;
        self
    }

    /// The executor this call would run on if sent from the current thread.
    pub fn executor(&self) -> Executor {
        executor::resolve(self.required, self.site_default, self.shared.default_executor())
    }

    /// Sends the call and blocks for its result.
    pub fn call(self) -> Result<Value> {
        self.spawn()?.wait(None)
    }

    /// Sends the call and returns a future for its result.
    pub fn spawn(self) -> Result<CallFuture<Value>> {
        let executor = self.executor();
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.shared.issue(&self.function, &self.args, executor, self.errors, tx)?;
        Ok(CallFuture::new(id, self.function, executor, rx, Arc::clone(self.shared)))
    }

    /// Sends the call and returns a stream of every value it produces.
    pub fn stream(self) -> Result<ReplyStream> {
        let executor = self.executor();
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.shared.issue(&self.function, &self.args, executor, self.errors, tx)?;
        Ok(ReplyStream::new(id, self.function, executor, rx, Arc::clone(self.shared)))
    }

    /// Sends the call on id 0. No reply is expected or tracked.
    pub fn fire(self) -> Result<()> {
        let executor = self.executor();
        self.shared.fire(&self.function, &self.args, executor)
    }
}
