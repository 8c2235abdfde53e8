//! Raw CIL instruction representation.
//!
//! An [`Instruction`] is the byte-level view of one decoded instruction: where it sits in the
//! method body, which opcode it was encoded with and its operand exactly as found in the bytes.
//! The local slot resolver and the canonicalizing decoder both consume this view. The canonical,
//! encoding-independent view is [`crate::assembly::Operation`].

use std::fmt;

use crate::metadata::token::Token;

/// Types of operands for the supported CIL instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandType {
    /// No operand present
    None,
    /// Signed 8-bit integer
    Int8,
    /// Unsigned 8-bit integer
    UInt8,
    /// Unsigned 16-bit integer
    UInt16,
    /// Signed 32-bit integer
    Int32,
    /// Signed 64-bit integer
    Int64,
    /// Metadata token (4 bytes)
    Token,
}

impl OperandType {
    /// Size of the operand in bytes.
    #[must_use]
    pub fn size(self) -> usize {
        match self {
            OperandType::None => 0,
            OperandType::Int8 | OperandType::UInt8 => 1,
            OperandType::UInt16 => 2,
            OperandType::Int32 | OperandType::Token => 4,
            OperandType::Int64 => 8,
        }
    }
}

/// Immediate values embedded in an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Immediate {
    /// Signed 8-bit immediate value
    Int8(i8),
    /// Unsigned 8-bit immediate value
    UInt8(u8),
    /// Unsigned 16-bit immediate value
    UInt16(u16),
    /// Signed 32-bit immediate value
    Int32(i32),
    /// Signed 64-bit immediate value
    Int64(i64),
}

impl From<Immediate> for i64 {
    fn from(val: Immediate) -> Self {
        match val {
            Immediate::Int8(value) => i64::from(value),
            Immediate::UInt8(value) => i64::from(value),
            Immediate::UInt16(value) => i64::from(value),
            Immediate::Int32(value) => i64::from(value),
            Immediate::Int64(value) => value,
        }
    }
}

impl fmt::UpperHex for Immediate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Immediate::Int8(value) => write!(f, "{value:02X}"),
            Immediate::UInt8(value) => write!(f, "{value:02X}"),
            Immediate::UInt16(value) => write!(f, "{value:04X}"),
            Immediate::Int32(value) => write!(f, "{value:08X}"),
            Immediate::Int64(value) => write!(f, "{value:016X}"),
        }
    }
}

/// An operand as it was found in the instruction bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionOperand {
    /// No operand present
    None,
    /// Immediate value (constant, index or relative branch offset)
    Immediate(Immediate),
    /// Metadata token reference
    Token(Token),
}

/// How an instruction affects control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowType {
    /// Execution continues with the next instruction
    Sequential,
    /// Execution may continue at the branch target
    ConditionalBranch,
    /// Execution always continues at the branch target
    UnconditionalBranch,
    /// Calls a method, then continues with the next instruction
    Call,
    /// Returns from the method
    Return,
}

/// Fixed stack effect of an instruction.
///
/// Calls and returns have a signature-dependent effect and carry zero here, consumers derive
/// the real effect from the call target or the enclosing method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackBehavior {
    /// Number of items popped from stack
    pub pops: u8,
    /// Number of items pushed to stack
    pub pushes: u8,
}

/// A decoded CIL instruction.
///
/// # Examples
///
/// ```rust
/// use dotpatch::assembly::{decode_instruction, InstructionOperand, Immediate};
/// use dotpatch::Parser;
///
/// let mut parser = Parser::new(&[0x11, 0x0A]);
/// let instruction = decode_instruction(&mut parser)?;
///
/// assert_eq!(instruction.mnemonic, "ldloc.s");
/// assert_eq!(instruction.size, 2);
/// assert_eq!(instruction.operand, InstructionOperand::Immediate(Immediate::UInt8(10)));
/// # Ok::<(), dotpatch::Error>(())
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Instruction {
    /// Offset of the instruction within the method body
    pub offset: u64,
    /// Size of this instruction in bytes
    pub size: u64,
    /// Primary opcode byte
    pub opcode: u8,
    /// Prefix byte (0 if no prefix)
    pub prefix: u8,
    /// Human-readable instruction mnemonic (e.g., "ldloc.s", "callvirt", "ret")
    pub mnemonic: &'static str,
    /// How this instruction affects control flow
    pub flow_type: FlowType,
    /// The operand data for this instruction
    pub operand: InstructionOperand,
    /// How this instruction affects the evaluation stack
    pub stack_behavior: StackBehavior,
    /// Computed branch targets, as absolute offsets within the body
    pub branch_targets: Vec<u64>,
}

impl Instruction {
    /// Check if this instruction is a branch instruction.
    #[must_use]
    pub fn is_branch(&self) -> bool {
        matches!(
            self.flow_type,
            FlowType::ConditionalBranch | FlowType::UnconditionalBranch
        )
    }

    /// Check if execution cannot fall through to the next instruction.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.flow_type,
            FlowType::UnconditionalBranch | FlowType::Return
        )
    }

    /// Returns the operand as an unsigned 8-bit value, if it is one.
    #[must_use]
    pub fn get_u8_operand(&self) -> Option<u8> {
        match self.operand {
            InstructionOperand::Immediate(Immediate::UInt8(value)) => Some(value),
            _ => None,
        }
    }

    /// Returns the operand as an unsigned 16-bit value, if it is one.
    #[must_use]
    pub fn get_u16_operand(&self) -> Option<u16> {
        match self.operand {
            InstructionOperand::Immediate(Immediate::UInt16(value)) => Some(value),
            _ => None,
        }
    }

    /// Returns the operand as a metadata token, if it is one.
    #[must_use]
    pub fn get_token_operand(&self) -> Option<Token> {
        match self.operand {
            InstructionOperand::Token(token) => Some(token),
            _ => None,
        }
    }
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X} - ", self.offset)?;

        if self.prefix != 0 {
            write!(f, "{:02X}:", self.prefix)?;
        }

        write!(f, "{:02X} - {:<12}", self.opcode, self.mnemonic)?;

        match &self.operand {
            InstructionOperand::None => {}
            InstructionOperand::Immediate(imm) => write!(f, " 0x{imm:X}")?,
            InstructionOperand::Token(token) => write!(f, " token:0x{:08X}", token.value())?,
        }

        if !self.branch_targets.is_empty() {
            write!(f, " -> [")?;
            for (i, target) in self.branch_targets.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "0x{target:04X}")?;
            }
            write!(f, "]")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediate_sign_extension() {
        assert_eq!(i64::from(Immediate::Int8(-2)), -2);
        assert_eq!(i64::from(Immediate::UInt8(0xFF)), 255);
        assert_eq!(i64::from(Immediate::UInt16(1000)), 1000);
        assert_eq!(i64::from(Immediate::Int32(-70_000)), -70_000);
    }

    #[test]
    fn operand_sizes() {
        assert_eq!(OperandType::None.size(), 0);
        assert_eq!(OperandType::Int8.size(), 1);
        assert_eq!(OperandType::UInt16.size(), 2);
        assert_eq!(OperandType::Token.size(), 4);
        assert_eq!(OperandType::Int64.size(), 8);
    }
}
