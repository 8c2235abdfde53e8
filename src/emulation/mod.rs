//! Execution of installed streams.
//!
//! Patches only have an observable effect once the patched stream runs. This module provides
//! the runtime for that:
//!
//! - [`Value`] / [`Object`] - values on the evaluation stack, in arguments and in locals
//! - [`Interpreter`] - step-based executor for an [`crate::InstructionStream`]
//! - [`Program`] - a stream with its label positions resolved
//! - [`Frame`] - arguments, locals and evaluation stack of one invocation
//! - [`Dispatch`] - the seam through which interpreted calls leave the interpreter
//!
//! The registry implements [`Dispatch`]: calls to methods the catalog defines go back through
//! their installed hooks and streams, all other calls are handed to the [`crate::Host`].

mod interpreter;
mod value;

pub use interpreter::{Dispatch, Frame, Interpreter, Program, StepResult};
pub use value::{Object, ObjectRef, Value};
