//! # Executor Contexts
//!
//! The host runs calls inside one of a few scheduling loops. A call issued on the
//! `render` loop observes state consistent with the frame being drawn; a call on
//! the `tick` loop observes state consistent with the simulation step.
//!
//! Each thread keeps its own stack of executors. Entering an executor returns an
//! `ExecutorScope`; dropping the scope pops it again, on every exit path. Calls
//! resolve their executor with this precedence:
//!
//! 1. an executor the call explicitly requires,
//! 2. the top of the calling thread's stack,
//! 3. the call site's declared default,
//! 4. the link's process-wide default.

use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Executor {
    /// The simulation tick loop.
    Tick,
    /// The frame rendering loop.
    Render,
    /// The host's dedicated script-servicing loop.
    Script,
}

impl Executor {
    pub const ALL: [Executor; 3] = [Executor::Tick, Executor::Render, Executor::Script];

    /// The tag written on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Executor::Tick => "tick",
            Executor::Render => "render",
            Executor::Script => "script",
        }
    }

    /// Makes this executor the current one for the calling thread until the
    /// returned scope is dropped.
    pub fn enter(self) -> ExecutorScope {
        STACK.with(|stack| stack.borrow_mut().push(self));
        ExecutorScope {
            executor: self,
            _not_send: PhantomData,
        }
    }

    /// The innermost executor entered on the calling thread, if any.
    pub fn current() -> Option<Executor> {
        STACK.with(|stack| stack.borrow().last().copied())
    }

    pub(crate) fn to_u8(self) -> u8 {
        match self {
            Executor::Tick => 0,
            Executor::Render => 1,
            Executor::Script => 2,
        }
    }

    pub(crate) fn from_u8(v: u8) -> Executor {
        match v {
            0 => Executor::Tick,
            1 => Executor::Render,
            _ => Executor::Script,
        }
    }
}

impl fmt::Display for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Executor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Executor::ALL
            .into_iter()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| format!("unknown executor '{}'", s))
    }
}

thread_local! {
    static STACK: RefCell<Vec<Executor>> = const { RefCell::new(Vec::new()) };
}

/// Guard returned by [`Executor::enter`].
///
/// Not `Send`: it must be dropped on the thread whose stack it pushed onto.
#[must_use = "the executor is popped as soon as the scope is dropped"]
pub struct ExecutorScope {
    executor: Executor,
    _not_send: PhantomData<*const ()>,
}

impl ExecutorScope {
    pub fn executor(&self) -> Executor {
        self.executor
    }
}

impl Drop for ExecutorScope {
    fn drop(&mut self) {
        STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            // out-of-order drops remove the innermost matching entry
            if let Some(pos) = stack.iter().rposition(|e| *e == self.executor) {
                stack.remove(pos);
            }
        });
    }
}

/// Picks the executor for one call.
pub fn resolve(required: Option<Executor>, site_default: Option<Executor>, process_default: Executor) -> Executor {
    required
        .or_else(Executor::current)
        .or(site_default)
        .unwrap_or(process_default)
}
