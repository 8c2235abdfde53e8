//! CIL instruction model, decoding and encoding.
//!
//! This module covers the byte-level side of the engine:
//!
//! - [`decode_instruction`] / [`decode_stream`] read raw [`Instruction`]s from a method body
//! - [`resolve_slot`] normalizes the three local access encodings to one slot index
//! - [`decode`] turns a method body into a canonical [`InstructionStream`] of [`Operation`]s
//! - [`encode`] and [`InstructionEncoder`] turn a stream back into bytes, choosing compact forms
//!   and short branches where possible
//!
//! The supported instruction subset covers argument and local access, constants, strings,
//! calls, returns, conditional and unconditional branches and basic integer arithmetic. Opcodes
//! outside it are rejected by the decoder with [`crate::Error::Malformed`].
//!
//! # Examples
//!
//! ```rust
//! use dotpatch::assembly::{decode, encode};
//! use dotpatch::metadata::body::TokenTable;
//! use dotpatch::EngineConfig;
//!
//! // ldloc 2 (long form); pop; ret
//! let code = [0xFE, 0x0C, 0x02, 0x00, 0x26, 0x2A];
//! let stream = decode(&code, &TokenTable::new())?;
//! let body = encode(&stream, false, &EngineConfig::default())?;
//!
//! // ldloc.2; pop; ret
//! assert_eq!(body.code, vec![0x08, 0x26, 0x2A]);
//! assert_eq!(decode(&body.code, &body.tokens)?, stream);
//! # Ok::<(), dotpatch::Error>(())
//! ```

mod decoder;
mod encoder;
mod instruction;
mod instructions;
pub mod opcodes;
mod operation;
mod slot;

pub use decoder::{decode, decode_instruction, decode_stream};
pub use encoder::{encode, InstructionEncoder, LabelFixup};
pub use instruction::{
    FlowType, Immediate, Instruction, InstructionOperand, OperandType, StackBehavior,
};
pub use instructions::{get_mnemonic_lookup, CilInstruction, INSTRUCTIONS, INSTRUCTIONS_FE};
pub use operation::{net_stack_delta, InstructionStream, Label, OpCode, Operand, Operation};
pub use slot::{resolve_operation_slot, resolve_slot, AccessDirection, LocalAccess};
