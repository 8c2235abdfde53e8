//! Operation handlers for the interpreter.
//!
//! Helpers called from [`Interpreter::step`], grouped by category:
//!
//! - **Operand helpers**: `index`, `target`
//! - **Arguments and locals**: `load_argument`, `store_argument`, `load_local`, `store_local`
//! - **Constants**: `push_constant`
//! - **Arithmetic**: `binary_op`, `compare_eq`
//! - **Control flow**: `branch_if`, `call`

use crate::{
    assembly::{Label, OpCode, Operand, Operation},
    emulation::{
        interpreter::{Frame, Interpreter, StepResult},
        Value,
    },
    Error, Result,
};

impl Interpreter<'_> {
    pub(super) fn index(op: &Operation) -> Result<usize> {
        match op.operand {
            Operand::Integer(index) => usize::try_from(index)
                .map_err(|_| Error::Execution(format!("negative index in '{op}'"))),
            _ => Err(Error::Execution(format!("'{op}' requires an index operand"))),
        }
    }

    pub(super) fn target(op: &Operation) -> Result<Label> {
        op.branch_target()
            .ok_or_else(|| Error::Execution(format!("'{op}' requires a label operand")))
    }

    pub(super) fn load_argument(frame: &mut Frame, index: usize) -> Result<StepResult> {
        let value = frame
            .args
            .get(index)
            .cloned()
            .ok_or_else(|| Error::Execution(format!("argument {index} out of range")))?;
        frame.push(value);
        Ok(StepResult::Continue)
    }

    pub(super) fn store_argument(frame: &mut Frame, index: usize) -> Result<StepResult> {
        let value = frame.pop()?;
        let slot = frame
            .args
            .get_mut(index)
            .ok_or_else(|| Error::Execution(format!("argument {index} out of range")))?;
        *slot = value;
        Ok(StepResult::Continue)
    }

    pub(super) fn load_local(frame: &mut Frame, index: usize) -> Result<StepResult> {
        let value = frame
            .locals
            .get(index)
            .cloned()
            .ok_or_else(|| Error::Execution(format!("local {index} out of range")))?;
        frame.push(value);
        Ok(StepResult::Continue)
    }

    pub(super) fn store_local(frame: &mut Frame, index: usize) -> Result<StepResult> {
        let value = frame.pop()?;
        let slot = frame
            .locals
            .get_mut(index)
            .ok_or_else(|| Error::Execution(format!("local {index} out of range")))?;
        *slot = value;
        Ok(StepResult::Continue)
    }

    pub(super) fn push_constant(frame: &mut Frame, operand: &Operand) -> Result<StepResult> {
        let value = match operand {
            Operand::Integer(value) => Value::Int(*value),
            Operand::String(value) => Value::Str(value.clone()),
            other => {
                return Err(Error::Execution(format!(
                    "'{other}' is not a constant operand"
                )))
            }
        };
        frame.push(value);
        Ok(StepResult::Continue)
    }

    pub(super) fn binary_op(
        frame: &mut Frame,
        opcode: OpCode,
        apply: fn(i64, i64) -> i64,
    ) -> Result<StepResult> {
        let right = frame.pop()?;
        let left = frame.pop()?;
        match (left.as_int(), right.as_int()) {
            (Some(left), Some(right)) => {
                frame.push(Value::Int(apply(left, right)));
                Ok(StepResult::Continue)
            }
            _ => Err(Error::Execution(format!(
                "{opcode} on non-integer operands {left} and {right}"
            ))),
        }
    }

    pub(super) fn compare_eq(frame: &mut Frame) -> Result<StepResult> {
        let right = frame.pop()?;
        let left = frame.pop()?;
        frame.push(Value::Int(i64::from(left == right)));
        Ok(StepResult::Continue)
    }

    pub(super) fn branch_if(frame: &mut Frame, target: Label, when: bool) -> Result<StepResult> {
        if frame.pop()?.is_truthy() == when {
            Ok(StepResult::Branch { target })
        } else {
            Ok(StepResult::Continue)
        }
    }

    /// Pops the arguments and `this` of a call and hands them to the dispatcher.
    ///
    /// Virtual calls on a null `this` fault before anything is dispatched.
    pub(super) fn call(&mut self, frame: &mut Frame, op: &Operation) -> Result<StepResult> {
        let method = op
            .method()
            .ok_or_else(|| Error::Execution(format!("'{op}' requires a method operand")))?;

        let mut args = Vec::with_capacity(method.params.len());
        for _ in 0..method.params.len() {
            args.push(frame.pop()?);
        }
        args.reverse();

        let this = if method.has_this {
            Some(frame.pop()?)
        } else {
            None
        };

        if op.opcode == OpCode::CallVirtual && matches!(this, Some(Value::Null)) {
            return Err(Error::Execution(format!(
                "null reference calling {method}"
            )));
        }

        let result = self.dispatch.dispatch(method, this, args, self.depth)?;
        if method.returns.is_some() {
            frame.push(result.unwrap_or(Value::Null));
        }

        Ok(StepResult::Continue)
    }
}
