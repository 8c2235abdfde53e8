//! Local variable slot resolution.
//!
//! CIL has three encodings for each local access direction: the compact shorthands for slots
//! 0 to 3 (`ldloc.0`..`ldloc.3`, `stloc.0`..`stloc.3`), the short form with a `u8` index
//! (`ldloc.s`, `stloc.s`) and the `0xFE`-prefixed form with a `u16` index (`ldloc`, `stloc`).
//! [`resolve_slot`] maps all of them to one [`LocalAccess`].
//!
//! Anything else is rejected with [`Error::UnsupportedOperand`]. Callers treat that as fatal,
//! it means a pattern matched something that is not a local access.

use crate::{
    assembly::{
        instruction::Instruction,
        opcodes::*,
        operation::{OpCode, Operation},
    },
    Error, Result,
};

/// Direction of a local variable access.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccessDirection {
    /// The local is pushed onto the stack
    Load,
    /// The top of the stack is popped into the local
    Store,
}

/// A resolved local variable access.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LocalAccess {
    /// Load or store
    pub direction: AccessDirection,
    /// The canonical slot index
    pub slot: u16,
}

impl LocalAccess {
    fn load(slot: u16) -> Self {
        LocalAccess {
            direction: AccessDirection::Load,
            slot,
        }
    }

    fn store(slot: u16) -> Self {
        LocalAccess {
            direction: AccessDirection::Store,
            slot,
        }
    }
}

/// Resolves the local slot accessed by a raw load/store-local instruction.
///
/// # Errors
/// Returns [`Error::UnsupportedOperand`] if the instruction is not a local access, or if a
/// generic form carries an operand of the wrong width.
///
/// # Examples
///
/// ```rust
/// use dotpatch::assembly::{decode_instruction, resolve_slot, AccessDirection};
/// use dotpatch::Parser;
///
/// // ldloc 1000
/// let mut parser = Parser::new(&[0xFE, 0x0C, 0xE8, 0x03]);
/// let access = resolve_slot(&decode_instruction(&mut parser)?)?;
///
/// assert_eq!(access.direction, AccessDirection::Load);
/// assert_eq!(access.slot, 1000);
/// # Ok::<(), dotpatch::Error>(())
/// ```
pub fn resolve_slot(instruction: &Instruction) -> Result<LocalAccess> {
    let unsupported = || {
        Error::UnsupportedOperand(format!(
            "'{}' at 0x{:04X} is not a local variable access",
            instruction.mnemonic, instruction.offset
        ))
    };

    if instruction.prefix == FE_PREFIX {
        let slot = instruction.get_u16_operand().ok_or_else(unsupported)?;
        return match instruction.opcode {
            FE_LDLOC => Ok(LocalAccess::load(slot)),
            FE_STLOC => Ok(LocalAccess::store(slot)),
            _ => Err(unsupported()),
        };
    }

    if instruction.prefix != 0 {
        return Err(unsupported());
    }

    match instruction.opcode {
        LDLOC_0..=LDLOC_3 => Ok(LocalAccess::load(u16::from(instruction.opcode - LDLOC_0))),
        STLOC_0..=STLOC_3 => Ok(LocalAccess::store(u16::from(instruction.opcode - STLOC_0))),
        LDLOC_S => instruction
            .get_u8_operand()
            .map(|slot| LocalAccess::load(u16::from(slot)))
            .ok_or_else(unsupported),
        STLOC_S => instruction
            .get_u8_operand()
            .map(|slot| LocalAccess::store(u16::from(slot)))
            .ok_or_else(unsupported),
        _ => Err(unsupported()),
    }
}

/// Resolves the local slot accessed by a canonical operation.
///
/// # Errors
/// Returns [`Error::UnsupportedOperand`] if the operation is not a local access or its slot is
/// not a valid `u16`.
pub fn resolve_operation_slot(op: &Operation) -> Result<LocalAccess> {
    let slot = op
        .local_slot()
        .ok_or_else(|| Error::UnsupportedOperand(format!("'{op}' is not a local variable access")))?;

    match op.opcode {
        OpCode::LoadLocal => Ok(LocalAccess::load(slot)),
        OpCode::StoreLocal => Ok(LocalAccess::store(slot)),
        _ => Err(Error::UnsupportedOperand(format!(
            "'{op}' is not a local variable access"
        ))),
    }
}
