//! Stack-machine interpreter for installed streams.
//!
//! The [`Interpreter`] executes an [`InstructionStream`] one operation at a time. Each call to
//! [`Interpreter::step`] runs a single operation against a [`Frame`] and reports what the
//! dispatch loop has to do next through a [`StepResult`].
//!
//! Calls are not executed here. They are handed to a [`Dispatch`] implementation, which is how
//! the registry routes calls to other intercepted methods back through their hooks and sends
//! everything else to the host.

mod handlers;

use std::collections::HashMap;

use crate::{
    assembly::{InstructionStream, Label, OpCode, Operation},
    config::EngineConfig,
    emulation::Value,
    metadata::{body::MethodDef, identity::MethodRef},
    Error, Result,
};

/// Executes calls issued by an interpreted stream.
pub trait Dispatch: Send + Sync {
    /// Invokes `method`.
    ///
    /// `depth` is the call depth of the frame issuing the call. Implementations that execute
    /// another stream pass `depth + 1` to the nested interpreter.
    ///
    /// # Errors
    /// Any error is propagated unchanged to the caller of the interpreted stream.
    fn dispatch(
        &self,
        method: &MethodRef,
        this: Option<Value>,
        args: Vec<Value>,
        depth: usize,
    ) -> Result<Option<Value>>;
}

/// Result of executing a single operation.
#[derive(Debug, Clone, PartialEq)]
pub enum StepResult {
    /// Fall through to the next operation.
    Continue,

    /// Transfer control to the operation carrying `target`.
    Branch {
        /// The label to continue at
        target: Label,
    },

    /// Leave the method.
    Return {
        /// The return value, `None` for void methods
        value: Option<Value>,
    },
}

/// An executable stream.
///
/// Label positions are resolved once when the program is built, so branches are a map lookup
/// at run time.
#[derive(Debug, Clone)]
pub struct Program {
    stream: InstructionStream,
    positions: HashMap<Label, usize>,
    returns_value: bool,
    local_count: usize,
}

impl Program {
    /// Builds a program from a stream and the method it implements.
    ///
    /// # Errors
    /// Returns [`Error::InvalidBranch`] if a label is attached to more than one operation.
    pub fn new(stream: InstructionStream, method: &MethodDef) -> Result<Self> {
        let mut positions = HashMap::new();
        for (index, op) in stream.iter().enumerate() {
            for label in &op.labels {
                if positions.insert(*label, index).is_some() {
                    return Err(Error::InvalidBranch(format!(
                        "{label} is attached to more than one operation"
                    )));
                }
            }
        }

        Ok(Program {
            stream,
            positions,
            returns_value: method.returns_value(),
            local_count: method.locals.len(),
        })
    }

    /// The stream being executed.
    #[must_use]
    pub fn stream(&self) -> &InstructionStream {
        &self.stream
    }

    /// Position of the operation carrying `label`.
    #[must_use]
    pub fn position_of(&self, label: Label) -> Option<usize> {
        self.positions.get(&label).copied()
    }

    /// Returns `true` if `ret` pops a return value.
    #[must_use]
    pub fn returns_value(&self) -> bool {
        self.returns_value
    }

    /// Number of local slots a frame needs.
    #[must_use]
    pub fn local_count(&self) -> usize {
        self.local_count
    }
}

/// Arguments, locals and evaluation stack of one invocation.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    args: Vec<Value>,
    locals: Vec<Value>,
    stack: Vec<Value>,
}

impl Frame {
    /// Creates a frame.
    ///
    /// `args` includes `this` at index 0 for instance methods. Locals start out null.
    #[must_use]
    pub fn new(args: Vec<Value>, local_count: usize) -> Self {
        Frame {
            args,
            locals: vec![Value::Null; local_count],
            stack: Vec::new(),
        }
    }

    /// The argument slots.
    #[must_use]
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// The local slots.
    #[must_use]
    pub fn locals(&self) -> &[Value] {
        &self.locals
    }

    /// Current evaluation stack depth.
    #[must_use]
    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Result<Value> {
        self.stack
            .pop()
            .ok_or_else(|| Error::StackImbalance("pop from an empty evaluation stack".to_string()))
    }

    fn peek(&self) -> Result<&Value> {
        self.stack
            .last()
            .ok_or_else(|| Error::StackImbalance("dup on an empty evaluation stack".to_string()))
    }
}

/// Core interpreter.
///
/// # Example
///
/// ```rust,ignore
/// let mut interpreter = Interpreter::new(&registry, &config, 0);
/// let mut frame = Frame::new(args, program.local_count());
/// let result = interpreter.execute(&program, &mut frame)?;
/// ```
pub struct Interpreter<'a> {
    dispatch: &'a dyn Dispatch,
    config: &'a EngineConfig,
    depth: usize,
    executed: u64,
}

impl<'a> Interpreter<'a> {
    /// Creates an interpreter running at call depth `depth`.
    #[must_use]
    pub fn new(dispatch: &'a dyn Dispatch, config: &'a EngineConfig, depth: usize) -> Self {
        Interpreter {
            dispatch,
            config,
            depth,
            executed: 0,
        }
    }

    /// Number of operations executed so far.
    #[must_use]
    pub fn executed(&self) -> u64 {
        self.executed
    }

    /// Call depth of the frames this interpreter runs.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Runs `program` to completion.
    ///
    /// # Errors
    /// Returns [`Error::InstructionLimit`] when the budget of the [`EngineConfig`] is exhausted,
    /// [`Error::Execution`] if control falls off the end of the stream, and any error raised
    /// by an operation or a dispatched call.
    pub fn execute(&mut self, program: &Program, frame: &mut Frame) -> Result<Option<Value>> {
        let ops = program.stream().operations();
        let mut pc = 0;

        loop {
            let op = ops.get(pc).ok_or_else(|| {
                Error::Execution(format!("control fell off the end of the stream at {pc}"))
            })?;

            self.executed += 1;
            if self.executed > self.config.max_instructions {
                return Err(Error::InstructionLimit(self.config.max_instructions));
            }

            match self.step(frame, op, program.returns_value())? {
                StepResult::Continue => pc += 1,
                StepResult::Branch { target } => {
                    pc = program.position_of(target).ok_or_else(|| {
                        Error::InvalidBranch(format!("{target} is not attached to any operation"))
                    })?;
                }
                StepResult::Return { value } => return Ok(value),
            }
        }
    }

    /// Executes a single operation.
    ///
    /// # Errors
    /// Returns [`Error::StackImbalance`] on a stack underflow, [`Error::Execution`] for operand
    /// faults and propagates errors from dispatched calls.
    pub fn step(
        &mut self,
        frame: &mut Frame,
        op: &Operation,
        returns_value: bool,
    ) -> Result<StepResult> {
        match op.opcode {
            OpCode::Nop => Ok(StepResult::Continue),
            OpCode::LoadArg => Self::load_argument(frame, Self::index(op)?),
            OpCode::StoreArg => Self::store_argument(frame, Self::index(op)?),
            OpCode::LoadLocal => Self::load_local(frame, Self::index(op)?),
            OpCode::StoreLocal => Self::store_local(frame, Self::index(op)?),
            OpCode::LoadNull => {
                frame.push(Value::Null);
                Ok(StepResult::Continue)
            }
            OpCode::PushConstant => Self::push_constant(frame, &op.operand),
            OpCode::Dup => {
                let value = frame.peek()?.clone();
                frame.push(value);
                Ok(StepResult::Continue)
            }
            OpCode::Pop => {
                frame.pop()?;
                Ok(StepResult::Continue)
            }
            OpCode::Call | OpCode::CallVirtual => self.call(frame, op),
            OpCode::Return => {
                let value = if returns_value {
                    Some(frame.pop()?)
                } else {
                    None
                };
                Ok(StepResult::Return { value })
            }
            OpCode::Branch => Ok(StepResult::Branch {
                target: Self::target(op)?,
            }),
            OpCode::BranchIfFalse => Self::branch_if(frame, Self::target(op)?, false),
            OpCode::BranchIfTrue => Self::branch_if(frame, Self::target(op)?, true),
            OpCode::Add => Self::binary_op(frame, op.opcode, i64::wrapping_add),
            OpCode::Sub => Self::binary_op(frame, op.opcode, i64::wrapping_sub),
            OpCode::CompareEq => Self::compare_eq(frame),
        }
    }
}

#[cfg(test)]
mod tests;
