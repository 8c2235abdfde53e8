//! Canonical operation model.
//!
//! Decoding turns a raw method body into an [`InstructionStream`] of [`Operation`]s. Operations
//! are independent of the encoding they were read from: `ldloc.2`, `ldloc.s 2` and `ldloc 2` all
//! become `LoadLocal 2`, and branch targets are [`Label`]s instead of byte offsets. Positions are
//! only assigned again when the stream is encoded.
//!
//! # Labels
//!
//! A label is attached to the operation it marks, not to an index. Inserting operations in front
//! of a labelled operation shifts the index but the label keeps marking the same operation, which
//! is what lets a rewrite splice code into a stream it does not understand.

use std::{collections::BTreeSet, fmt};

use strum::{Display, EnumCount, EnumIter, IntoStaticStr};

use crate::{metadata::identity::MethodRef, Error, Result};

/// An opaque branch target.
///
/// Labels are allocated by [`InstructionStream::define_label`] and are unique within their
/// stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(u32);

impl Label {
    /// Returns the numeric identity of this label.
    #[must_use]
    pub fn id(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IL_L{}", self.0)
    }
}

/// Encoding-independent opcode tag.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumIter, EnumCount, IntoStaticStr,
)]
pub enum OpCode {
    /// No operation
    Nop,
    /// Push an argument, operand is the argument index (`this` is argument 0)
    LoadArg,
    /// Pop into an argument, operand is the argument index
    StoreArg,
    /// Push a local variable, operand is the slot index
    LoadLocal,
    /// Pop into a local variable, operand is the slot index
    StoreLocal,
    /// Push null
    LoadNull,
    /// Push an integer or string constant
    PushConstant,
    /// Duplicate the top of the stack
    Dup,
    /// Discard the top of the stack
    Pop,
    /// Call a method non-virtually
    Call,
    /// Call a method virtually, `this` must not be null
    CallVirtual,
    /// Return from the method
    Return,
    /// Unconditional branch
    Branch,
    /// Branch if the top of the stack is null, zero or false
    BranchIfFalse,
    /// Branch if the top of the stack is not null, zero or false
    BranchIfTrue,
    /// Integer addition
    Add,
    /// Integer subtraction
    Sub,
    /// Push 1 if the two top values are equal, 0 otherwise
    CompareEq,
}

impl OpCode {
    /// Returns `true` for the three branch opcodes.
    #[must_use]
    pub fn is_branch(self) -> bool {
        matches!(
            self,
            OpCode::Branch | OpCode::BranchIfFalse | OpCode::BranchIfTrue
        )
    }

    /// Returns `true` if execution never falls through to the next operation.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, OpCode::Branch | OpCode::Return)
    }

    /// Returns `true` for both call opcodes.
    #[must_use]
    pub fn is_call(self) -> bool {
        matches!(self, OpCode::Call | OpCode::CallVirtual)
    }
}

/// The operand of an [`Operation`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Operand {
    /// No operand
    None,
    /// Integer constant, argument index or local slot
    Integer(i64),
    /// String constant
    String(String),
    /// Call target
    Method(MethodRef),
    /// Branch target
    Label(Label),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::None => Ok(()),
            Operand::Integer(value) => write!(f, "{value}"),
            Operand::String(value) => write!(f, "{value:?}"),
            Operand::Method(method) => write!(f, "{method}"),
            Operand::Label(label) => write!(f, "{label}"),
        }
    }
}

/// One canonical instruction: opcode, operand and the labels marking it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Operation {
    /// The opcode tag
    pub opcode: OpCode,
    /// The operand
    pub operand: Operand,
    /// Labels that resolve to this operation
    pub labels: BTreeSet<Label>,
}

impl Operation {
    /// Creates an unlabelled operation.
    #[must_use]
    pub fn new(opcode: OpCode, operand: Operand) -> Self {
        Operation {
            opcode,
            operand,
            labels: BTreeSet::new(),
        }
    }

    /// Creates an unlabelled operation without an operand.
    #[must_use]
    pub fn simple(opcode: OpCode) -> Self {
        Self::new(opcode, Operand::None)
    }

    /// `LoadLocal slot`
    #[must_use]
    pub fn load_local(slot: u16) -> Self {
        Self::new(OpCode::LoadLocal, Operand::Integer(i64::from(slot)))
    }

    /// `StoreLocal slot`
    #[must_use]
    pub fn store_local(slot: u16) -> Self {
        Self::new(OpCode::StoreLocal, Operand::Integer(i64::from(slot)))
    }

    /// `LoadArg index`
    #[must_use]
    pub fn load_arg(index: u16) -> Self {
        Self::new(OpCode::LoadArg, Operand::Integer(i64::from(index)))
    }

    /// `PushConstant value`
    #[must_use]
    pub fn push_int(value: i64) -> Self {
        Self::new(OpCode::PushConstant, Operand::Integer(value))
    }

    /// `PushConstant "value"`
    #[must_use]
    pub fn push_string(value: &str) -> Self {
        Self::new(OpCode::PushConstant, Operand::String(value.to_string()))
    }

    /// `Call method`
    #[must_use]
    pub fn call(method: MethodRef) -> Self {
        Self::new(OpCode::Call, Operand::Method(method))
    }

    /// `CallVirtual method`
    #[must_use]
    pub fn call_virtual(method: MethodRef) -> Self {
        Self::new(OpCode::CallVirtual, Operand::Method(method))
    }

    /// A branch of the given kind to `target`.
    #[must_use]
    pub fn branch(opcode: OpCode, target: Label) -> Self {
        Self::new(opcode, Operand::Label(target))
    }

    /// Attaches `label` to this operation.
    #[must_use]
    pub fn with_label(mut self, label: Label) -> Self {
        self.labels.insert(label);
        self
    }

    /// The local slot of a `LoadLocal`/`StoreLocal`, if the operand is a valid slot.
    #[must_use]
    pub fn local_slot(&self) -> Option<u16> {
        match (self.opcode, &self.operand) {
            (OpCode::LoadLocal | OpCode::StoreLocal, Operand::Integer(slot)) => {
                u16::try_from(*slot).ok()
            }
            _ => None,
        }
    }

    /// The call target of a call operation.
    #[must_use]
    pub fn method(&self) -> Option<&MethodRef> {
        match (&self.operand, self.opcode.is_call()) {
            (Operand::Method(method), true) => Some(method),
            _ => None,
        }
    }

    /// The target of a branch operation.
    #[must_use]
    pub fn branch_target(&self) -> Option<Label> {
        match (&self.operand, self.opcode.is_branch()) {
            (Operand::Label(label), true) => Some(*label),
            _ => None,
        }
    }

    /// Number of stack slots consumed and produced.
    ///
    /// `Return` reports `(0, 0)`, its effect depends on the enclosing method and is accounted
    /// for by the encoder and the interpreter.
    ///
    /// # Errors
    /// Returns [`Error::Malformed`] if a call operation carries no method operand.
    pub fn stack_effect(&self) -> Result<(usize, usize)> {
        Ok(match self.opcode {
            OpCode::Nop | OpCode::Branch | OpCode::Return => (0, 0),
            OpCode::LoadArg
            | OpCode::LoadLocal
            | OpCode::LoadNull
            | OpCode::PushConstant => (0, 1),
            OpCode::StoreArg
            | OpCode::StoreLocal
            | OpCode::Pop
            | OpCode::BranchIfFalse
            | OpCode::BranchIfTrue => (1, 0),
            OpCode::Dup => (1, 2),
            OpCode::Add | OpCode::Sub | OpCode::CompareEq => (2, 1),
            OpCode::Call | OpCode::CallVirtual => {
                let method = self.method().ok_or_else(|| {
                    malformed_error!("{} without a method operand", self.opcode)
                })?;
                (method.pops(), method.pushes())
            }
        })
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for label in &self.labels {
            write!(f, "{label}: ")?;
        }

        write!(f, "{}", self.opcode)?;
        if self.operand != Operand::None {
            write!(f, " {}", self.operand)?;
        }

        Ok(())
    }
}

/// Net stack effect of a run of operations.
///
/// # Errors
/// Returns [`Error::StackImbalance`] if the run pops more than is available at any point, and
/// [`Error::Malformed`] for call operations without a method operand.
pub fn net_stack_delta(ops: &[Operation]) -> Result<i64> {
    let mut depth: i64 = 0;
    for op in ops {
        let (pops, pushes) = op.stack_effect()?;
        #[allow(clippy::cast_possible_wrap)]
        {
            depth -= pops as i64;
            if depth < 0 {
                return Err(Error::StackImbalance(format!(
                    "'{op}' pops below the start of the sequence"
                )));
            }
            depth += pushes as i64;
        }
    }

    Ok(depth)
}

/// An ordered sequence of operations.
///
/// Two streams compare equal when their operations are equal, the label allocator state is not
/// part of the comparison.
///
/// # Examples
///
/// ```rust
/// use dotpatch::assembly::{InstructionStream, Operation, OpCode};
///
/// let mut stream = InstructionStream::new();
/// let end = stream.define_label();
/// stream.push(Operation::load_local(0));
/// stream.push(Operation::branch(OpCode::BranchIfFalse, end));
/// stream.push(Operation::simple(OpCode::Return).with_label(end));
///
/// assert_eq!(stream.position_of(end), Some(2));
/// ```
#[derive(Clone, Debug, Default)]
pub struct InstructionStream {
    ops: Vec<Operation>,
    next_label: u32,
}

impl InstructionStream {
    /// Creates an empty stream.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a stream from existing operations.
    ///
    /// The label allocator starts past every label used by `ops`.
    #[must_use]
    pub fn from_operations(ops: Vec<Operation>) -> Self {
        let next_label = ops
            .iter()
            .flat_map(|op| op.labels.iter().copied().chain(op.branch_target()))
            .map(|label| label.0 + 1)
            .max()
            .unwrap_or(0);

        InstructionStream { ops, next_label }
    }

    /// Allocates a fresh label, unique within this stream.
    pub fn define_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    /// Appends an operation.
    pub fn push(&mut self, op: Operation) {
        self.ops.push(op);
    }

    /// Inserts `ops` immediately before the operation at `index`.
    ///
    /// Labels attached to the operation at `index` stay attached to it.
    ///
    /// # Errors
    /// Returns [`Error::OutOfBounds`] if `index` is past the end of the stream.
    pub fn insert_before(&mut self, index: usize, ops: Vec<Operation>) -> Result<()> {
        if index > self.ops.len() {
            return Err(out_of_bounds_error!());
        }

        self.ops.splice(index..index, ops);
        Ok(())
    }

    /// Number of operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns `true` if the stream has no operations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Returns the operation at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Operation> {
        self.ops.get(index)
    }

    /// Iterates over the operations in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Operation> {
        self.ops.iter()
    }

    /// The operations as a slice.
    #[must_use]
    pub fn operations(&self) -> &[Operation] {
        &self.ops
    }

    /// Consumes the stream and returns its operations.
    #[must_use]
    pub fn into_operations(self) -> Vec<Operation> {
        self.ops
    }

    /// Index of the operation carrying `label`.
    #[must_use]
    pub fn position_of(&self, label: Label) -> Option<usize> {
        self.ops.iter().position(|op| op.labels.contains(&label))
    }
}

impl PartialEq for InstructionStream {
    fn eq(&self, other: &Self) -> bool {
        self.ops == other.ops
    }
}

impl Eq for InstructionStream {}

impl<'a> IntoIterator for &'a InstructionStream {
    type Item = &'a Operation;
    type IntoIter = std::slice::Iter<'a, Operation>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.iter()
    }
}

impl fmt::Display for InstructionStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, op) in self.ops.iter().enumerate() {
            writeln!(f, "{i:04}: {op}")?;
        }
        Ok(())
    }
}
