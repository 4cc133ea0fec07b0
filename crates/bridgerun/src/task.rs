//! # Task Batching
//!
//! A `Task` is a call that has been described but not sent. A list of tasks
//! travels to the host as one `run_tasks` call and runs within a single cycle of
//! one executor, so no other script can interleave with the chain and the whole
//! chain costs one round trip.
//!
//! A task can take an earlier task's result as an argument:
//!
//! ```no_run
//! # fn example(link: &bridgerun::Link) -> bridgerun::Result<()> {
//! use bridgerun::task::Arg;
//!
//! let name = link.task("player_name", vec![])?;
//! let pos = link.task("player_position", vec![])?;
//! let say = link.task("echo", vec![Arg::from("hello"), name.arg()])?;
//! let echoed = link.run_tasks(&[name, pos, say])?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use bridgerpc::TaskArg;
use bridgerpc::TaskFrame;
use bridgerpc::Value;
use bridgerpc::encode_batch;
use bridgerpc::encode_call;
use tracing::debug;

use crate::error::Error;
use crate::error::Result;
use crate::executor::Executor;
use crate::link::Link;
use crate::registry::CallId;

pub const RUN_TASKS_FUNCTION: &str = "run_tasks";
pub const SCHEDULE_TICK_FUNCTION: &str = "schedule_tick_tasks";
pub const SCHEDULE_RENDER_FUNCTION: &str = "schedule_render_tasks";
pub const CANCEL_SCHEDULE_FUNCTION: &str = "cancel_scheduled_tasks";

type Transform = Arc<dyn Fn(Value) -> Result<Value> + Send + Sync>;

/// An argument to a task: a value now, or another task's result later.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Value(Value),
    Task(CallId),
}

impl From<Value> for Arg {
    fn from(v: Value) -> Self { Arg::Value(v) }
}

impl From<&str> for Arg {
    fn from(s: &str) -> Self { Arg::Value(Value::from(s)) }
}

impl From<String> for Arg {
    fn from(s: String) -> Self { Arg::Value(Value::from(s)) }
}

impl From<bool> for Arg {
    fn from(b: bool) -> Self { Arg::Value(Value::from(b)) }
}

impl From<i32> for Arg {
    fn from(i: i32) -> Self { Arg::Value(Value::from(i)) }
}

impl From<i64> for Arg {
    fn from(i: i64) -> Self { Arg::Value(Value::from(i)) }
}

impl From<f64> for Arg {
    fn from(x: f64) -> Self { Arg::Value(Value::from(x)) }
}

impl From<&Task> for Arg {
    fn from(task: &Task) -> Self { task.arg() }
}

/// A described, unsent call.
#[derive(Clone)]
pub struct Task {
    frame: TaskFrame,
    transform: Option<Transform>,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.frame.id)
            .field("function", &self.frame.function)
            .field("args", &self.frame.args)
            .finish()
    }
}

impl Task {
    pub fn id(&self) -> CallId {
        self.frame.id
    }

    pub fn function(&self) -> &str {
        &self.frame.function
    }

    /// Uses this task's result as an argument to a later task in the same batch.
    pub fn arg(&self) -> Arg {
        Arg::Task(self.frame.id)
    }

    /// Transforms the result when this task is the last in a batch.
    pub fn map<F>(mut self, f: F) -> Self
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.transform = Some(match self.transform.take() {
            Some(prev) => Arc::new(move |v| prev(v).and_then(&f)),
            None => Arc::new(f),
        });
        self
    }

    fn finish(&self, value: Value) -> Result<Value> {
        match &self.transform {
            Some(f) => f(value),
            None => Ok(value),
        }
    }
}

/// Host-side id of a recurring batch.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub struct ScheduleId(pub i64);

impl fmt::Display for ScheduleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "schedule-{}", self.0)
    }
}

/// Checks that every deferred argument names a task earlier in the batch.
fn validate(tasks: &[Task]) -> Result<Vec<TaskFrame>> {
    if tasks.is_empty() {
        return Err(Error::InvalidBatch("no tasks".into()));
    }
    let mut seen = HashSet::new();
    for task in tasks {
        for arg in &task.frame.args {
            if let TaskArg::Deferred(id) = arg {
                if !seen.contains(id) {
                    return Err(Error::InvalidBatch(format!(
                        "task {} ('{}') depends on task {}, which does not run before it",
                        task.frame.id, task.frame.function, id
                    )));
                }
            }
        }
        if !seen.insert(task.frame.id) {
            return Err(Error::InvalidBatch(format!("task {} appears twice", task.frame.id)));
        }
    }
    Ok(tasks.iter().map(|t| t.frame.clone()).collect())
}

impl Link {
    /// Describes a call without sending it.
    pub fn task(&self, function: &str, args: Vec<Arg>) -> Result<Task> {
        // reject names that could never be encoded, before they reach a batch
        encode_call(0, Executor::Script.as_str(), function, &[])?;

        let args = args
            .into_iter()
            .map(|arg| match arg {
                Arg::Value(v) => TaskArg::Immediate(v),
                Arg::Task(id) => TaskArg::Deferred(id),
            })
            .collect();
        let frame = TaskFrame {
            id: self.shared().registry().allocate(),
            function: function.to_string(),
            args,
        };
        Ok(Task { frame, transform: None })
    }

    /// Runs `tasks` in order within one host cycle and returns the last task's
    /// (transformed) result.
    pub fn run_tasks(&self, tasks: &[Task]) -> Result<Value> {
        let frames = validate(tasks)?;
        let Some(last) = tasks.last() else {
            return Err(Error::InvalidBatch("no tasks".into()));
        };
        debug!("running batch of {} tasks ending in '{}'", frames.len(), last.function());

        let value = self.function(RUN_TASKS_FUNCTION).arg(encode_batch(&frames)).call()?;
        last.finish(value)
    }

    /// Registers `tasks` to run on every cycle of `executor` until cancelled.
    pub fn schedule_tasks(&self, executor: Executor, tasks: &[Task]) -> Result<ScheduleId> {
        let function = match executor {
            Executor::Tick => SCHEDULE_TICK_FUNCTION,
            Executor::Render => SCHEDULE_RENDER_FUNCTION,
            Executor::Script => {
                return Err(Error::InvalidBatch("tasks can only be scheduled on tick or render".into()));
            }
        };
        let frames = validate(tasks)?;
        let id = self.function(function).arg(encode_batch(&frames)).call()?;
        Ok(ScheduleId(i64::try_from(id)?))
    }

    /// Stops a recurring batch. Returns whether the host knew the schedule.
    pub fn cancel_schedule(&self, id: ScheduleId) -> Result<bool> {
        let removed = self.function(CANCEL_SCHEDULE_FUNCTION).arg(id.0).call()?;
        Ok(bool::try_from(removed)?)
    }
}
