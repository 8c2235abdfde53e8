//! CIL instruction encoding.
//!
//! This module is the reverse counterpart to the decoder. [`InstructionEncoder`] emits
//! instructions by mnemonic using the same metadata tables the decoder reads, tracks the
//! evaluation stack and resolves [`Label`] references once the final layout is known.
//! [`encode`] drives the encoder over a canonical [`InstructionStream`] and selects the most
//! compact form for every local, argument and constant access.
//!
//! # Branch forms
//!
//! Every branch is first laid out in its long form. When short branches are enabled, branches
//! whose displacement fits an `i8` are shrunk, and since shrinking only ever brings other
//! branches closer to their targets the pass is repeated until no further branch can shrink.
//!
//! # Usage Examples
//!
//! ```rust
//! use dotpatch::assembly::{InstructionEncoder, InstructionStream};
//!
//! let mut labels = InstructionStream::new();
//! let end = labels.define_label();
//!
//! let mut encoder = InstructionEncoder::new(false);
//! encoder.emit_ldloc(0)?;
//! encoder.emit_branch("brfalse", end)?;
//! encoder.emit_instruction("nop", None)?;
//! encoder.define_label(end)?;
//! encoder.emit_instruction("ret", None)?;
//!
//! let (bytecode, max_stack, _) = encoder.finalize()?;
//! assert_eq!(bytecode, vec![0x06, 0x2C, 0x01, 0x00, 0x2A]);
//! assert_eq!(max_stack, 1);
//! # Ok::<(), dotpatch::Error>(())
//! ```

use std::collections::HashMap;

use crate::{
    assembly::{
        instruction::{FlowType, Immediate, InstructionOperand, OperandType},
        instructions::get_mnemonic_lookup,
        operation::{InstructionStream, Label, OpCode, Operand, Operation},
    },
    config::EngineConfig,
    file::io::write_le,
    metadata::{
        body::{MethodBody, TokenTable},
        identity::MethodRef,
        token::Token,
    },
    Error, Result,
};

/// Size of a branch in short form: opcode and `i8` displacement.
const SHORT_BRANCH_SIZE: usize = 2;
/// Size of a branch in long form: opcode and `i32` displacement.
const LONG_BRANCH_SIZE: usize = 5;

/// Label fixup information for branch instruction resolution.
///
/// Branches occupy no bytes in the raw buffer while encoding. `position` is the raw offset the
/// branch is inserted at, its final offset depends on the forms chosen for earlier branches.
#[derive(Debug, Clone)]
pub struct LabelFixup {
    /// The target label
    pub label: Label,
    /// Raw buffer offset the branch is inserted at
    pub position: usize,
    /// Opcode of the long form
    pub long_opcode: u8,
    /// Opcode of the short form
    pub short_opcode: u8,
    /// Whether the short form has been selected
    pub short: bool,
}

impl LabelFixup {
    fn size(&self) -> usize {
        if self.short {
            SHORT_BRANCH_SIZE
        } else {
            LONG_BRANCH_SIZE
        }
    }
}

/// Maps a branch mnemonic to its `(long, short)` form pair.
fn get_branch_forms(mnemonic: &str) -> Option<(&'static str, &'static str)> {
    match mnemonic {
        "br" | "br.s" => Some(("br", "br.s")),
        "brfalse" | "brfalse.s" => Some(("brfalse", "brfalse.s")),
        "brtrue" | "brtrue.s" => Some(("brtrue", "brtrue.s")),
        _ => None,
    }
}

fn lookup_opcode(mnemonic: &str) -> Result<(u8, u8, FlowType, OperandType, u8, u8)> {
    let (opcode, prefix, instr) = get_mnemonic_lookup()
        .get(mnemonic)
        .ok_or_else(|| malformed_error!("Unknown mnemonic '{}'", mnemonic))?;

    Ok((
        *opcode,
        *prefix,
        instr.flow,
        instr.op_type,
        instr.stack_pops,
        instr.stack_pushes,
    ))
}

/// Core CIL instruction encoder.
///
/// # Thread Safety
///
/// [`InstructionEncoder`] holds mutable encoding state. Create one encoder per body.
pub struct InstructionEncoder {
    /// Raw bytes of every non-branch instruction
    bytecode: Vec<u8>,
    /// Pending branches, in emission order
    fixups: Vec<LabelFixup>,
    /// Placed labels: raw offset and number of branches emitted before the label
    labels: HashMap<Label, (usize, usize)>,
    /// Current stack depth
    current_stack_depth: i32,
    /// Maximum stack depth reached during encoding
    max_stack_depth: u16,
    /// Expected stack depth at each branch target
    label_stack_depths: HashMap<Label, i32>,
    /// Whether the current position is only reachable through a label not yet placed
    unreachable: bool,
    /// Whether `ret` pops a return value
    returns_value: bool,
    /// Whether stack violations are errors
    verify_stack: bool,
    /// Whether branches may be shrunk to their short form
    prefer_short_branches: bool,
}

impl InstructionEncoder {
    /// Create a new encoder with the default configuration.
    ///
    /// # Arguments
    ///
    /// * `returns_value` - Whether the encoded method returns a value, which makes `ret` pop
    #[must_use]
    pub fn new(returns_value: bool) -> Self {
        Self::with_config(returns_value, &EngineConfig::default())
    }

    /// Create a new encoder honouring `config`.
    #[must_use]
    pub fn with_config(returns_value: bool, config: &EngineConfig) -> Self {
        InstructionEncoder {
            bytecode: Vec::new(),
            fixups: Vec::new(),
            labels: HashMap::new(),
            current_stack_depth: 0,
            max_stack_depth: 0,
            label_stack_depths: HashMap::new(),
            unreachable: false,
            returns_value,
            verify_stack: config.verify_stack,
            prefer_short_branches: config.prefer_short_branches,
        }
    }

    /// Emit a non-branch, non-call instruction by mnemonic.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] for unknown mnemonics, [`Error::UnsupportedOperand`] if the
    /// operand does not match the instruction's operand type, [`Error::InvalidBranch`] for
    /// branch mnemonics and [`Error::StackImbalance`] for stack violations.
    pub fn emit_instruction(
        &mut self,
        mnemonic: &str,
        operand: Option<InstructionOperand>,
    ) -> Result<()> {
        let (opcode, prefix, flow, op_type, pops, pushes) = lookup_opcode(mnemonic)?;

        match flow {
            FlowType::ConditionalBranch | FlowType::UnconditionalBranch => {
                return Err(Error::InvalidBranch(format!(
                    "'{mnemonic}' must be emitted with a label"
                )));
            }
            FlowType::Call => {
                return Err(malformed_error!(
                    "'{}' must be emitted with a call target",
                    mnemonic
                ));
            }
            FlowType::Sequential | FlowType::Return => {}
        }

        if prefix != 0 {
            self.bytecode.push(prefix);
        }
        self.bytecode.push(opcode);
        self.emit_operand(operand.unwrap_or(InstructionOperand::None), op_type)?;

        if flow == FlowType::Return {
            self.update_stack_depth(usize::from(self.returns_value), 0)?;
            if self.verify_stack && !self.unreachable && self.current_stack_depth != 0 {
                return Err(Error::StackImbalance(format!(
                    "{} value(s) left on the stack at 'ret'",
                    self.current_stack_depth
                )));
            }
            self.unreachable = true;
        } else {
            self.update_stack_depth(usize::from(pops), usize::from(pushes))?;
        }

        Ok(())
    }

    /// Emit a `call` or `callvirt` with its resolved token.
    ///
    /// The stack effect is derived from `method`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] if `mnemonic` is not a call instruction and
    /// [`Error::StackImbalance`] if the stack does not hold the call's arguments.
    pub fn emit_call(&mut self, mnemonic: &str, token: Token, method: &MethodRef) -> Result<()> {
        let (opcode, prefix, flow, _, _, _) = lookup_opcode(mnemonic)?;
        if flow != FlowType::Call {
            return Err(malformed_error!("'{}' is not a call instruction", mnemonic));
        }

        if prefix != 0 {
            self.bytecode.push(prefix);
        }
        self.bytecode.push(opcode);
        write_le(&mut self.bytecode, token.value());

        self.update_stack_depth(method.pops(), method.pushes())
    }

    /// Emit a branch to `label`.
    ///
    /// Both the long and the short mnemonic are accepted, the final form is chosen by
    /// [`InstructionEncoder::finalize`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBranch`] if `mnemonic` is not a branch and
    /// [`Error::StackImbalance`] if the stack depth disagrees with other paths to `label`.
    pub fn emit_branch(&mut self, mnemonic: &str, label: Label) -> Result<()> {
        let (long, short) = get_branch_forms(mnemonic)
            .ok_or_else(|| Error::InvalidBranch(format!("'{mnemonic}' is not a branch")))?;
        let (long_opcode, _, flow, _, pops, _) = lookup_opcode(long)?;
        let (short_opcode, _, _, _, _, _) = lookup_opcode(short)?;

        self.update_stack_depth(usize::from(pops), 0)?;
        self.record_label_stack_depth(label)?;

        self.fixups.push(LabelFixup {
            label,
            position: self.bytecode.len(),
            long_opcode,
            short_opcode,
            short: false,
        });

        if flow == FlowType::UnconditionalBranch {
            self.unreachable = true;
        }

        Ok(())
    }

    /// Emit a `ldarg` instruction with optimal encoding.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StackImbalance`] only if stack tracking fails.
    pub fn emit_ldarg(&mut self, index: u16) -> Result<()> {
        match index {
            0 => self.emit_instruction("ldarg.0", None),
            1 => self.emit_instruction("ldarg.1", None),
            2 => self.emit_instruction("ldarg.2", None),
            3 => self.emit_instruction("ldarg.3", None),
            x => match u8::try_from(x) {
                Ok(short) => self.emit_instruction("ldarg.s", Some(imm(Immediate::UInt8(short)))),
                Err(_) => self.emit_instruction("ldarg", Some(imm(Immediate::UInt16(x)))),
            },
        }
    }

    /// Emit a `starg` instruction with optimal encoding.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StackImbalance`] if the stack is empty.
    pub fn emit_starg(&mut self, index: u16) -> Result<()> {
        match u8::try_from(index) {
            Ok(short) => self.emit_instruction("starg.s", Some(imm(Immediate::UInt8(short)))),
            Err(_) => self.emit_instruction("starg", Some(imm(Immediate::UInt16(index)))),
        }
    }

    /// Emit a `ldloc` instruction with optimal encoding.
    ///
    /// Selects `ldloc.0`..`ldloc.3`, then `ldloc.s` for slots up to 255, then `ldloc`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StackImbalance`] only if stack tracking fails.
    pub fn emit_ldloc(&mut self, index: u16) -> Result<()> {
        match index {
            0 => self.emit_instruction("ldloc.0", None),
            1 => self.emit_instruction("ldloc.1", None),
            2 => self.emit_instruction("ldloc.2", None),
            3 => self.emit_instruction("ldloc.3", None),
            x => match u8::try_from(x) {
                Ok(short) => self.emit_instruction("ldloc.s", Some(imm(Immediate::UInt8(short)))),
                Err(_) => self.emit_instruction("ldloc", Some(imm(Immediate::UInt16(x)))),
            },
        }
    }

    /// Emit a `stloc` instruction with optimal encoding.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StackImbalance`] if the stack is empty.
    pub fn emit_stloc(&mut self, index: u16) -> Result<()> {
        match index {
            0 => self.emit_instruction("stloc.0", None),
            1 => self.emit_instruction("stloc.1", None),
            2 => self.emit_instruction("stloc.2", None),
            3 => self.emit_instruction("stloc.3", None),
            x => match u8::try_from(x) {
                Ok(short) => self.emit_instruction("stloc.s", Some(imm(Immediate::UInt8(short)))),
                Err(_) => self.emit_instruction("stloc", Some(imm(Immediate::UInt16(x)))),
            },
        }
    }

    /// Emit an integer constant with optimal encoding.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StackImbalance`] only if stack tracking fails.
    pub fn emit_ldc(&mut self, value: i64) -> Result<()> {
        match value {
            -1 => self.emit_instruction("ldc.i4.m1", None),
            0 => self.emit_instruction("ldc.i4.0", None),
            1 => self.emit_instruction("ldc.i4.1", None),
            2 => self.emit_instruction("ldc.i4.2", None),
            3 => self.emit_instruction("ldc.i4.3", None),
            4 => self.emit_instruction("ldc.i4.4", None),
            5 => self.emit_instruction("ldc.i4.5", None),
            6 => self.emit_instruction("ldc.i4.6", None),
            7 => self.emit_instruction("ldc.i4.7", None),
            8 => self.emit_instruction("ldc.i4.8", None),
            x => {
                if let Ok(short) = i8::try_from(x) {
                    self.emit_instruction("ldc.i4.s", Some(imm(Immediate::Int8(short))))
                } else if let Ok(word) = i32::try_from(x) {
                    self.emit_instruction("ldc.i4", Some(imm(Immediate::Int32(word))))
                } else {
                    self.emit_instruction("ldc.i8", Some(imm(Immediate::Int64(x))))
                }
            }
        }
    }

    /// Emit one canonical operation, interning its call and string operands into `tokens`.
    ///
    /// Labels attached to `op` are not placed, use [`InstructionEncoder::define_label`] first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedOperand`] if the operand does not fit the opcode, and any
    /// error of the underlying emit method.
    pub fn emit_operation(&mut self, op: &Operation, tokens: &mut TokenTable) -> Result<()> {
        match op.opcode {
            OpCode::Nop => self.emit_instruction("nop", None),
            OpCode::LoadArg => self.emit_ldarg(index_operand(op)?),
            OpCode::StoreArg => self.emit_starg(index_operand(op)?),
            OpCode::LoadLocal => self.emit_ldloc(index_operand(op)?),
            OpCode::StoreLocal => self.emit_stloc(index_operand(op)?),
            OpCode::LoadNull => self.emit_instruction("ldnull", None),
            OpCode::PushConstant => match &op.operand {
                Operand::Integer(value) => self.emit_ldc(*value),
                Operand::String(value) => {
                    let token = tokens.intern_string(value)?;
                    self.emit_instruction("ldstr", Some(InstructionOperand::Token(token)))
                }
                _ => Err(unsupported(op)),
            },
            OpCode::Dup => self.emit_instruction("dup", None),
            OpCode::Pop => self.emit_instruction("pop", None),
            OpCode::Add => self.emit_instruction("add", None),
            OpCode::Sub => self.emit_instruction("sub", None),
            OpCode::CompareEq => self.emit_instruction("ceq", None),
            OpCode::Return => self.emit_instruction("ret", None),
            OpCode::Call | OpCode::CallVirtual => {
                let method = op.method().ok_or_else(|| unsupported(op))?;
                let token = tokens.intern_member(method)?;
                let mnemonic = if op.opcode == OpCode::Call { "call" } else { "callvirt" };
                self.emit_call(mnemonic, token, method)
            }
            OpCode::Branch | OpCode::BranchIfFalse | OpCode::BranchIfTrue => {
                let label = op.branch_target().ok_or_else(|| unsupported(op))?;
                let mnemonic = match op.opcode {
                    OpCode::Branch => "br",
                    OpCode::BranchIfFalse => "brfalse",
                    _ => "brtrue",
                };
                self.emit_branch(mnemonic, label)
            }
        }
    }

    /// Place `label` at the current position.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBranch`] if the label was already placed and
    /// [`Error::StackImbalance`] if the fall-through depth disagrees with branches to `label`.
    pub fn define_label(&mut self, label: Label) -> Result<()> {
        if self.labels.contains_key(&label) {
            return Err(Error::InvalidBranch(format!(
                "Label {label} is placed more than once"
            )));
        }

        if let Some(&expected) = self.label_stack_depths.get(&label) {
            if self.unreachable {
                self.current_stack_depth = expected;
            } else if self.current_stack_depth != expected {
                if self.verify_stack {
                    return Err(Error::StackImbalance(format!(
                        "Stack depth mismatch at {label}: {expected} from branches, {} on fall-through",
                        self.current_stack_depth
                    )));
                }
                self.current_stack_depth = expected;
            }
        } else {
            if self.unreachable {
                self.current_stack_depth = 0;
            }
            self.label_stack_depths
                .insert(label, self.current_stack_depth);
        }

        self.unreachable = false;
        self.labels
            .insert(label, (self.bytecode.len(), self.fixups.len()));
        Ok(())
    }

    /// Maximum stack depth reached so far.
    #[must_use]
    pub fn max_stack_depth(&self) -> u16 {
        self.max_stack_depth
    }

    /// Current stack depth.
    #[must_use]
    pub fn current_stack_depth(&self) -> i32 {
        self.current_stack_depth
    }

    /// Finalize encoding: choose branch forms and resolve all label references.
    ///
    /// Returns the bytecode, the maximum stack depth and the final offset of every label.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBranch`] if a branch targets a label that was never placed.
    pub fn finalize(mut self) -> Result<(Vec<u8>, u16, HashMap<Label, u32>)> {
        if let Some(fixup) = self
            .fixups
            .iter()
            .find(|fixup| !self.labels.contains_key(&fixup.label))
        {
            return Err(Error::InvalidBranch(format!(
                "Branch to {} which is never placed",
                fixup.label
            )));
        }

        if self.prefer_short_branches {
            self.optimize_branch_forms()?;
        }

        let prefix = self.branch_prefix_sizes();
        let mut code = Vec::with_capacity(
            self.bytecode.len() + prefix.last().copied().unwrap_or_default(),
        );
        let mut cursor = 0;
        for (idx, fixup) in self.fixups.iter().enumerate() {
            code.extend_from_slice(&self.bytecode[cursor..fixup.position]);
            cursor = fixup.position;

            let start = fixup.position + prefix[idx];
            let target = self.label_position(fixup.label, &prefix)?;
            let offset = to_i64(target)? - to_i64(start + fixup.size())?;

            if fixup.short {
                let offset = i8::try_from(offset).map_err(|_| {
                    Error::InvalidBranch(format!("Short branch to {} out of range", fixup.label))
                })?;
                code.push(fixup.short_opcode);
                write_le(&mut code, offset);
            } else {
                let offset = i32::try_from(offset).map_err(|_| {
                    Error::InvalidBranch(format!("Branch to {} out of range", fixup.label))
                })?;
                code.push(fixup.long_opcode);
                write_le(&mut code, offset);
            }
        }
        code.extend_from_slice(&self.bytecode[cursor..]);

        let mut labels = HashMap::with_capacity(self.labels.len());
        for label in self.labels.keys() {
            let position = self.label_position(*label, &prefix)?;
            let position = u32::try_from(position)
                .map_err(|_| malformed_error!("Label position exceeds u32 range"))?;
            labels.insert(*label, position);
        }

        Ok((code, self.max_stack_depth, labels))
    }

    /// Shrink branches to their short form until no further branch fits.
    fn optimize_branch_forms(&mut self) -> Result<()> {
        loop {
            let shrinkable = self.find_shrinkable_branches()?;
            if shrinkable.is_empty() {
                return Ok(());
            }

            for idx in shrinkable {
                self.fixups[idx].short = true;
            }
        }
    }

    /// Indices of long branches whose displacement fits an `i8` under the current layout.
    fn find_shrinkable_branches(&self) -> Result<Vec<usize>> {
        let prefix = self.branch_prefix_sizes();
        let mut shrinkable = Vec::new();

        for (idx, fixup) in self.fixups.iter().enumerate() {
            if fixup.short {
                continue;
            }

            let start = to_i64(fixup.position + prefix[idx])?;
            let mut target = to_i64(self.label_position(fixup.label, &prefix)?)?;
            if target > start {
                // the label moves along with this branch shrinking
                target -= (LONG_BRANCH_SIZE - SHORT_BRANCH_SIZE) as i64;
            }

            let offset = target - (start + SHORT_BRANCH_SIZE as i64);
            if (-128..=127).contains(&offset) {
                shrinkable.push(idx);
            }
        }

        Ok(shrinkable)
    }

    /// `prefix[i]` is the total size of the first `i` branches.
    fn branch_prefix_sizes(&self) -> Vec<usize> {
        let mut prefix = Vec::with_capacity(self.fixups.len() + 1);
        let mut total = 0;
        prefix.push(0);
        for fixup in &self.fixups {
            total += fixup.size();
            prefix.push(total);
        }
        prefix
    }

    fn label_position(&self, label: Label, prefix: &[usize]) -> Result<usize> {
        let (raw, branches_before) = self
            .labels
            .get(&label)
            .ok_or_else(|| Error::InvalidBranch(format!("Label {label} is never placed")))?;
        Ok(raw + prefix[*branches_before])
    }

    fn emit_operand(&mut self, operand: InstructionOperand, expected: OperandType) -> Result<()> {
        match (expected, operand) {
            (OperandType::None, InstructionOperand::None) => {}
            (OperandType::Int8, InstructionOperand::Immediate(Immediate::Int8(v))) => {
                write_le(&mut self.bytecode, v);
            }
            (OperandType::UInt8, InstructionOperand::Immediate(Immediate::UInt8(v))) => {
                write_le(&mut self.bytecode, v);
            }
            (OperandType::UInt16, InstructionOperand::Immediate(Immediate::UInt16(v))) => {
                write_le(&mut self.bytecode, v);
            }
            (OperandType::Int32, InstructionOperand::Immediate(Immediate::Int32(v))) => {
                write_le(&mut self.bytecode, v);
            }
            (OperandType::Int64, InstructionOperand::Immediate(Immediate::Int64(v))) => {
                write_le(&mut self.bytecode, v);
            }
            (OperandType::Token, InstructionOperand::Token(token)) => {
                write_le(&mut self.bytecode, token.value());
            }
            (expected, operand) => {
                return Err(Error::UnsupportedOperand(format!(
                    "expected a {expected:?} operand, got {operand:?}"
                )));
            }
        }

        Ok(())
    }

    fn update_stack_depth(&mut self, pops: usize, pushes: usize) -> Result<()> {
        if self.unreachable {
            return Ok(());
        }

        let pops = i32::try_from(pops).map_err(|_| malformed_error!("Stack effect too large"))?;
        let pushes =
            i32::try_from(pushes).map_err(|_| malformed_error!("Stack effect too large"))?;

        self.current_stack_depth -= pops;
        if self.current_stack_depth < 0 {
            if self.verify_stack {
                return Err(Error::StackImbalance(format!(
                    "Stack underflow: {pops} value(s) popped with {} available",
                    self.current_stack_depth + pops
                )));
            }
            self.current_stack_depth = 0;
        }

        self.current_stack_depth += pushes;
        let depth = u16::try_from(self.current_stack_depth)
            .map_err(|_| malformed_error!("Stack depth exceeds u16 range"))?;
        self.max_stack_depth = self.max_stack_depth.max(depth);

        Ok(())
    }

    fn record_label_stack_depth(&mut self, label: Label) -> Result<()> {
        if self.unreachable {
            return Ok(());
        }

        match self.label_stack_depths.get(&label) {
            Some(&expected) if expected != self.current_stack_depth => {
                if self.verify_stack {
                    return Err(Error::StackImbalance(format!(
                        "Stack depth mismatch for branch to {label}: expected {expected}, branch has {}",
                        self.current_stack_depth
                    )));
                }
            }
            Some(_) => {}
            None => {
                self.label_stack_depths
                    .insert(label, self.current_stack_depth);
            }
        }

        Ok(())
    }
}

fn imm(value: Immediate) -> InstructionOperand {
    InstructionOperand::Immediate(value)
}

fn unsupported(op: &Operation) -> Error {
    Error::UnsupportedOperand(format!("'{op}' has an operand of the wrong kind"))
}

fn index_operand(op: &Operation) -> Result<u16> {
    match op.operand {
        Operand::Integer(value) => u16::try_from(value).map_err(|_| {
            Error::UnsupportedOperand(format!("'{op}' index is outside the u16 range"))
        }),
        _ => Err(unsupported(op)),
    }
}

fn to_i64(value: usize) -> Result<i64> {
    i64::try_from(value).map_err(|_| malformed_error!("Offset exceeds i64 range"))
}

/// Encodes a canonical stream into a method body.
///
/// Every label attached to an operation is placed in front of it. Call and string operands are
/// interned into a fresh [`TokenTable`] in order of first use, so encoding the decoding of a body
/// produces an equivalent table.
///
/// # Errors
///
/// Returns [`Error::InvalidBranch`] if a label is attached twice or a branch targets a label not
/// attached to any operation, [`Error::StackImbalance`] for stack violations when
/// [`EngineConfig::verify_stack`] is set, and [`Error::UnsupportedOperand`] for operands that do
/// not fit their opcode.
pub fn encode(
    stream: &InstructionStream,
    returns_value: bool,
    config: &EngineConfig,
) -> Result<MethodBody> {
    let mut encoder = InstructionEncoder::with_config(returns_value, config);
    let mut tokens = TokenTable::new();

    for op in stream {
        for label in &op.labels {
            encoder.define_label(*label)?;
        }
        encoder.emit_operation(op, &mut tokens)?;
    }

    let (code, max_stack, _) = encoder.finalize()?;
    log::debug!(
        "encoded {} operations into {} bytes (max stack {})",
        stream.len(),
        code.len(),
        max_stack
    );

    Ok(MethodBody {
        code,
        tokens,
        max_stack,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::{decoder::decode, opcodes::*};

    fn labels<const N: usize>() -> [Label; N] {
        let mut stream = InstructionStream::new();
        std::array::from_fn(|_| stream.define_label())
    }

    fn encode_ops(ops: Vec<Operation>, returns_value: bool) -> Result<MethodBody> {
        encode(
            &InstructionStream::from_operations(ops),
            returns_value,
            &EngineConfig::default(),
        )
    }

    #[test]
    fn test_simple_instruction_encoding() -> Result<()> {
        let mut encoder = InstructionEncoder::new(true);
        encoder.emit_ldarg(0)?;
        encoder.emit_ldc(5)?;
        encoder.emit_instruction("add", None)?;
        encoder.emit_instruction("ret", None)?;

        let (bytecode, max_stack, _) = encoder.finalize()?;
        assert_eq!(bytecode, vec![LDARG_0, LDC_I4_5, ADD, RET]);
        assert_eq!(max_stack, 2);
        Ok(())
    }

    #[test]
    fn test_compact_local_forms() -> Result<()> {
        let mut encoder = InstructionEncoder::with_config(
            false,
            &EngineConfig::default().with_verify_stack(false),
        );
        for slot in [0, 3, 4, 255, 256, 1000] {
            encoder.emit_ldloc(slot)?;
        }
        encoder.emit_stloc(2)?;
        encoder.emit_stloc(10)?;
        encoder.emit_stloc(1000)?;

        let (bytecode, _, _) = encoder.finalize()?;
        assert_eq!(
            bytecode,
            vec![
                LDLOC_0, LDLOC_3, LDLOC_S, 4, LDLOC_S, 255, FE_PREFIX, FE_LDLOC, 0x00, 0x01,
                FE_PREFIX, FE_LDLOC, 0xE8, 0x03, STLOC_2, STLOC_S, 10, FE_PREFIX, FE_STLOC, 0xE8,
                0x03,
            ]
        );
        Ok(())
    }

    #[test]
    fn test_constant_forms() -> Result<()> {
        let mut encoder = InstructionEncoder::with_config(
            false,
            &EngineConfig::default().with_verify_stack(false),
        );
        encoder.emit_ldc(-1)?;
        encoder.emit_ldc(8)?;
        encoder.emit_ldc(-128)?;
        encoder.emit_ldc(128)?;
        encoder.emit_ldc(1 << 40)?;

        let (bytecode, max_stack, _) = encoder.finalize()?;
        assert_eq!(&bytecode[..5], &[LDC_I4_M1, LDC_I4_8, LDC_I4_S, 0x80, LDC_I4]);
        assert_eq!(&bytecode[5..9], &128i32.to_le_bytes());
        assert_eq!(bytecode[9], LDC_I8);
        assert_eq!(&bytecode[10..], &(1i64 << 40).to_le_bytes());
        assert_eq!(max_stack, 5);
        Ok(())
    }

    #[test]
    fn test_short_and_long_branches() -> Result<()> {
        let [near, far] = labels();

        let mut ops = vec![
            Operation::push_int(1),
            Operation::branch(OpCode::BranchIfTrue, near),
            Operation::simple(OpCode::Nop).with_label(near),
            Operation::push_int(0),
            Operation::branch(OpCode::BranchIfFalse, far),
        ];
        ops.extend((0..200).map(|_| Operation::simple(OpCode::Nop)));
        ops.push(Operation::simple(OpCode::Return).with_label(far));

        let body = encode_ops(ops.clone(), false)?;
        assert_eq!(body.code[1], BRTRUE_S);
        assert_eq!(body.code[2], 0);
        assert_eq!(body.code[5], BRFALSE);
        assert_eq!(&body.code[6..10], &200i32.to_le_bytes());

        let long_only = encode(
            &InstructionStream::from_operations(ops),
            false,
            &EngineConfig::default().with_short_branches(false),
        )?;
        assert_eq!(long_only.code[1], BRTRUE);
        assert_eq!(long_only.code.len(), body.code.len() + 3);
        Ok(())
    }

    #[test]
    fn test_branch_relaxation_reaches_fixed_point() -> Result<()> {
        let [outer, inner] = labels();

        // The outer branch only fits a short form once the inner one has been shrunk.
        let mut ops = vec![
            Operation::push_int(1),
            Operation::branch(OpCode::BranchIfTrue, outer),
            Operation::branch(OpCode::Branch, inner),
        ];
        ops.extend((0..123).map(|i| {
            let nop = Operation::simple(OpCode::Nop);
            if i == 0 {
                nop.with_label(inner)
            } else {
                nop
            }
        }));
        ops.push(Operation::simple(OpCode::Return).with_label(outer));

        let body = encode_ops(ops, false)?;
        assert_eq!(body.code.len(), 129);
        assert_eq!(body.code[1], BRTRUE_S);
        assert_eq!(body.code[2], 125);
        assert_eq!(body.code[3], BR_S);
        assert_eq!(body.code[4], 0);
        Ok(())
    }

    #[test]
    fn test_backward_branch() -> Result<()> {
        let [top] = labels();

        let body = encode_ops(
            vec![
                Operation::simple(OpCode::Nop).with_label(top),
                Operation::push_int(0),
                Operation::branch(OpCode::BranchIfTrue, top),
                Operation::simple(OpCode::Return),
            ],
            false,
        )?;
        assert_eq!(body.code, vec![NOP, LDC_I4_0, BRTRUE_S, 0xFC, RET]);
        Ok(())
    }

    #[test]
    fn test_undefined_label() {
        let [missing] = labels();
        let result = encode_ops(
            vec![
                Operation::branch(OpCode::Branch, missing),
                Operation::simple(OpCode::Return),
            ],
            false,
        );
        assert!(matches!(result, Err(Error::InvalidBranch(_))));
    }

    #[test]
    fn test_duplicate_label() {
        let [twice] = labels();
        let result = encode_ops(
            vec![
                Operation::simple(OpCode::Nop).with_label(twice),
                Operation::simple(OpCode::Return).with_label(twice),
            ],
            false,
        );
        assert!(matches!(result, Err(Error::InvalidBranch(_))));
    }

    #[test]
    fn test_stack_violations() {
        let underflow = encode_ops(vec![Operation::simple(OpCode::Pop)], false);
        assert!(matches!(underflow, Err(Error::StackImbalance(_))));

        let leftover = encode_ops(
            vec![Operation::push_int(1), Operation::simple(OpCode::Return)],
            false,
        );
        assert!(matches!(leftover, Err(Error::StackImbalance(_))));

        let [join] = labels();
        let mismatch = encode_ops(
            vec![
                Operation::push_int(1),
                Operation::branch(OpCode::BranchIfTrue, join),
                Operation::push_int(2),
                Operation::simple(OpCode::Nop).with_label(join),
                Operation::simple(OpCode::Pop),
                Operation::simple(OpCode::Return),
            ],
            false,
        );
        assert!(matches!(mismatch, Err(Error::StackImbalance(_))));

        let unchecked = encode(
            &InstructionStream::from_operations(vec![
                Operation::push_int(1),
                Operation::simple(OpCode::Return),
            ]),
            false,
            &EngineConfig::default().with_verify_stack(false),
        );
        assert!(unchecked.is_ok());
    }

    #[test]
    fn test_wrong_operand_type() {
        let mut encoder = InstructionEncoder::new(false);
        assert!(matches!(
            encoder.emit_instruction("ldloc.s", Some(imm(Immediate::UInt16(4)))),
            Err(Error::UnsupportedOperand(_))
        ));
        assert!(matches!(
            encoder.emit_instruction("br", None),
            Err(Error::InvalidBranch(_))
        ));
        assert!(encoder.emit_instruction("frobnicate", None).is_err());

        let negative = encode_ops(
            vec![Operation::new(OpCode::LoadLocal, Operand::Integer(-1))],
            false,
        );
        assert!(matches!(negative, Err(Error::UnsupportedOperand(_))));
    }

    #[test]
    fn test_decode_encode_fixed_point() -> Result<()> {
        let mut tokens = TokenTable::new();
        let info = MethodRef::instance("Acme.InfoController", "GetServerInformation")
            .returning("Acme.ServerInformation");
        let member = tokens.intern_member(&info).unwrap().value().to_le_bytes();
        let text = tokens.intern_string("x").unwrap().value().to_le_bytes();

        // ldarg.0; call GetServerInformation; stloc.s 2; ldloc 2; brfalse (long) -> nop;
        // ldstr "x"; pop; ldc.i4 3; pop; nop; ret
        let mut code = vec![LDARG_0, CALL];
        code.extend_from_slice(&member);
        code.extend_from_slice(&[STLOC_S, 2, FE_PREFIX, FE_LDLOC, 2, 0, BRFALSE]);
        code.extend_from_slice(&12i32.to_le_bytes());
        code.push(LDSTR);
        code.extend_from_slice(&text);
        code.push(POP);
        code.push(LDC_I4);
        code.extend_from_slice(&3i32.to_le_bytes());
        code.extend_from_slice(&[POP, NOP, RET]);

        let first = decode(&code, &tokens)?;
        let body = encode(&first, false, &EngineConfig::default())?;
        let second = decode(&body.code, &body.tokens)?;

        assert_eq!(first, second);
        assert!(body.code.len() < code.len());

        let again = encode(&second, false, &EngineConfig::default())?;
        assert_eq!(again, body);
        Ok(())
    }
}
