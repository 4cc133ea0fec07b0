//! # Task Batches
//!
//! A batch is a list of call descriptors shipped inside a single call. Each task is
//! encoded as a four-element list:
//!
//! ```text
//! [id, function, [immediate args], [deferred args]]
//! ```
//!
//! The two argument lists are parallel. At each position exactly one side is
//! meaningful: a deferred slot holds the id of an earlier task whose result the
//! host substitutes, and the matching immediate slot is `null`. Otherwise the
//! deferred slot is `null`.

use crate::error::Result;
use crate::error::RpcError;
use crate::value::Value;

/// One argument of a batched call.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskArg {
    Immediate(Value),
    /// The result of another task in the same batch, by id.
    Deferred(u64),
}

/// Wire form of a single batched call.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskFrame {
    pub id: u64,
    pub function: String,
    pub args: Vec<TaskArg>,
}

impl TaskFrame {
    fn to_value(&self) -> Value {
        let mut immediate = Vec::with_capacity(self.args.len());
        let mut deferred = Vec::with_capacity(self.args.len());
        for arg in &self.args {
            match arg {
                TaskArg::Immediate(v) => {
                    immediate.push(v.clone());
                    deferred.push(Value::Null);
                }
                TaskArg::Deferred(id) => {
                    immediate.push(Value::Null);
                    deferred.push(Value::from(*id));
                }
            }
        }
        Value::List(vec![
            Value::from(self.id),
            Value::from(self.function.as_str()),
            Value::List(immediate),
            Value::List(deferred),
        ])
    }

    fn from_value(value: Value) -> Result<Self> {
        let bad = |details: String| RpcError::InvalidField { field: "task", details };

        let items: Vec<Value> = value.try_into()?;
        let [id, function, immediate, deferred]: [Value; 4] = items
            .try_into()
            .map_err(|v: Vec<Value>| bad(format!("expected 4 elements, got {}", v.len())))?;

        let id = id.as_i64().and_then(|i| u64::try_from(i).ok()).ok_or_else(|| bad("bad id".into()))?;
        let function: String = function.try_into()?;
        let immediate: Vec<Value> = immediate.try_into()?;
        let deferred: Vec<Value> = deferred.try_into()?;
        if immediate.len() != deferred.len() {
            return Err(bad(format!(
                "argument lists differ in length: {} immediate, {} deferred",
                immediate.len(),
                deferred.len()
            )));
        }

        let args = immediate
            .into_iter()
            .zip(deferred)
            .map(|(imm, def)| match def {
                Value::Null => Ok(TaskArg::Immediate(imm)),
                Value::Int(i) if i > 0 => Ok(TaskArg::Deferred(i as u64)),
                other => Err(bad(format!("bad deferred reference {}", other))),
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { id, function, args })
    }
}

/// Encodes a batch as a single value, suitable as a call argument.
pub fn encode_batch(tasks: &[TaskFrame]) -> Value {
    Value::List(tasks.iter().map(TaskFrame::to_value).collect())
}

/// Decodes a batch. This is the host's half of the format.
pub fn decode_batch(value: Value) -> Result<Vec<TaskFrame>> {
    let items: Vec<Value> = value.try_into()?;
    items.into_iter().map(TaskFrame::from_value).collect()
}
