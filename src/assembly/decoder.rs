//! CIL instruction decoding.
//!
//! Decoding happens in two layers. [`decode_instruction`] and [`decode_stream`] read raw
//! [`Instruction`]s exactly as they are encoded, with byte offsets and raw operands. [`decode`]
//! builds on them to produce a canonical [`InstructionStream`]: local accesses are normalized
//! through the slot resolver, metadata tokens are resolved through the body's [`TokenTable`] and
//! branch offsets are replaced by [`Label`]s attached to their target operations.
//!
//! # Label numbering
//!
//! Labels are numbered in ascending order of their target offset. Decoding the same bytes
//! twice, or decoding the re-encoding of an unmodified stream, therefore yields equal streams.

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    assembly::{
        instruction::{Immediate, Instruction, InstructionOperand, OperandType, StackBehavior},
        instructions::{INSTRUCTIONS, INSTRUCTIONS_FE},
        opcodes::*,
        operation::{InstructionStream, Label, OpCode, Operand, Operation},
        slot::{resolve_slot, AccessDirection},
    },
    file::parser::Parser,
    metadata::{body::TokenTable, token::Token},
    Result,
};

/// Decodes a single CIL instruction from the current parser position.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] for opcodes outside the supported subset and
/// [`crate::Error::OutOfBounds`] if the operand is truncated.
///
/// # Examples
///
/// ```rust
/// use dotpatch::{assembly::decode_instruction, Parser};
///
/// // ldstr <token>
/// let bytecode = [0x72, 0x01, 0x00, 0x00, 0x70];
/// let mut parser = Parser::new(&bytecode);
///
/// let instruction = decode_instruction(&mut parser)?;
/// assert_eq!(instruction.mnemonic, "ldstr");
/// assert_eq!(instruction.get_token_operand().map(|t| t.value()), Some(0x7000_0001));
/// # Ok::<(), dotpatch::Error>(())
/// ```
pub fn decode_instruction(parser: &mut Parser) -> Result<Instruction> {
    let offset = parser.pos() as u64;
    let first_byte = parser.read_le::<u8>()?;

    let (cil_instruction, prefix, opcode) = match first_byte {
        FE_PREFIX => {
            let second_byte = parser.read_le::<u8>()?;

            match INSTRUCTIONS_FE.get(second_byte as usize) {
                Some(instr) => (instr, FE_PREFIX, second_byte),
                None => return Err(malformed_error!("Invalid opcode: FE {:02X}", second_byte)),
            }
        }
        _ => (&INSTRUCTIONS[first_byte as usize], 0, first_byte),
    };

    if cil_instruction.instr.is_empty() {
        return Err(if prefix == FE_PREFIX {
            malformed_error!("Unsupported opcode: FE {:02X}", opcode)
        } else {
            malformed_error!("Unsupported opcode: {:02X}", opcode)
        });
    }

    let operand = match cil_instruction.op_type {
        OperandType::None => InstructionOperand::None,
        OperandType::Int8 => {
            InstructionOperand::Immediate(Immediate::Int8(parser.read_le::<i8>()?))
        }
        OperandType::UInt8 => {
            InstructionOperand::Immediate(Immediate::UInt8(parser.read_le::<u8>()?))
        }
        OperandType::UInt16 => {
            InstructionOperand::Immediate(Immediate::UInt16(parser.read_le::<u16>()?))
        }
        OperandType::Int32 => {
            InstructionOperand::Immediate(Immediate::Int32(parser.read_le::<i32>()?))
        }
        OperandType::Int64 => {
            InstructionOperand::Immediate(Immediate::Int64(parser.read_le::<i64>()?))
        }
        OperandType::Token => InstructionOperand::Token(Token::new(parser.read_le::<u32>()?)),
    };
    let size = parser.pos() as u64 - offset;

    let mut instruction = Instruction {
        offset,
        size,
        opcode,
        prefix,
        mnemonic: cil_instruction.instr,
        flow_type: cil_instruction.flow,
        operand,
        stack_behavior: StackBehavior {
            pops: cil_instruction.stack_pops,
            pushes: cil_instruction.stack_pushes,
        },
        branch_targets: Vec::new(),
    };

    if instruction.is_branch() {
        if let InstructionOperand::Immediate(value) = instruction.operand {
            let next_instruction = i64::try_from(offset + size)
                .map_err(|_| malformed_error!("Instruction offset exceeds i64 range"))?;
            let target = next_instruction + i64::from(value);
            let target = u64::try_from(target).map_err(|_| {
                malformed_error!(
                    "Branch at 0x{:04X} targets a negative offset ({})",
                    offset,
                    target
                )
            })?;
            instruction.branch_targets.push(target);
        }
    }

    Ok(instruction)
}

/// Decodes instructions from the current parser position until the end of the data.
///
/// # Errors
///
/// Returns [`crate::Error`] if any instruction fails to decode, see [`decode_instruction`].
pub fn decode_stream(parser: &mut Parser) -> Result<Vec<Instruction>> {
    let mut instructions = Vec::new();

    while parser.has_more_data() {
        instructions.push(decode_instruction(parser)?);
    }

    Ok(instructions)
}

/// Decodes a method body into a canonical [`InstructionStream`].
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] if the bytes cannot be decoded, a token does not resolve
/// through `tokens`, or a branch targets an offset that is not the start of an instruction.
///
/// # Examples
///
/// ```rust
/// use dotpatch::assembly::{decode, OpCode};
/// use dotpatch::metadata::body::TokenTable;
///
/// // ldloc.s 2; brfalse.s +1; nop; ret
/// let code = [0x11, 0x02, 0x2C, 0x01, 0x00, 0x2A];
/// let stream = decode(&code, &TokenTable::new())?;
///
/// assert_eq!(stream.len(), 4);
/// assert_eq!(stream.get(0).unwrap().local_slot(), Some(2));
/// let target = stream.get(1).unwrap().branch_target().unwrap();
/// assert_eq!(stream.position_of(target), Some(3));
/// # Ok::<(), dotpatch::Error>(())
/// ```
pub fn decode(code: &[u8], tokens: &TokenTable) -> Result<InstructionStream> {
    let mut parser = Parser::new(code);
    let instructions = decode_stream(&mut parser)?;

    let targets: BTreeSet<u64> = instructions
        .iter()
        .flat_map(|instruction| instruction.branch_targets.iter().copied())
        .collect();

    let mut stream = InstructionStream::new();
    let labels: BTreeMap<u64, Label> = targets
        .into_iter()
        .map(|target| (target, stream.define_label()))
        .collect();

    let mut bound = 0;
    for instruction in &instructions {
        let mut op = canonicalize(instruction, tokens, &labels)?;
        if let Some(label) = labels.get(&instruction.offset) {
            op.labels.insert(*label);
            bound += 1;
        }
        stream.push(op);
    }

    if bound != labels.len() {
        let stray = labels
            .keys()
            .find(|offset| !instructions.iter().any(|i| i.offset == **offset))
            .copied()
            .unwrap_or_default();
        return Err(malformed_error!(
            "Branch target 0x{:04X} is not the start of an instruction",
            stray
        ));
    }

    log::debug!(
        "decoded {} bytes into {} operations ({} labels)",
        code.len(),
        stream.len(),
        labels.len()
    );

    Ok(stream)
}

fn canonicalize(
    instruction: &Instruction,
    tokens: &TokenTable,
    labels: &BTreeMap<u64, Label>,
) -> Result<Operation> {
    let immediate = || match instruction.operand {
        InstructionOperand::Immediate(value) => Ok(i64::from(value)),
        _ => Err(malformed_error!(
            "'{}' at 0x{:04X} is missing its immediate operand",
            instruction.mnemonic,
            instruction.offset
        )),
    };
    let token = || {
        instruction.get_token_operand().ok_or_else(|| {
            malformed_error!(
                "'{}' at 0x{:04X} is missing its token operand",
                instruction.mnemonic,
                instruction.offset
            )
        })
    };

    if instruction.is_branch() {
        let target = instruction
            .branch_targets
            .first()
            .and_then(|target| labels.get(target))
            .copied()
            .ok_or_else(|| malformed_error!("Branch at 0x{:04X} has no target", instruction.offset))?;

        let opcode = match (instruction.prefix, instruction.opcode) {
            (0, BR | BR_S) => OpCode::Branch,
            (0, BRFALSE | BRFALSE_S) => OpCode::BranchIfFalse,
            _ => OpCode::BranchIfTrue,
        };
        return Ok(Operation::branch(opcode, target));
    }

    if instruction.prefix == FE_PREFIX {
        return match instruction.opcode {
            FE_CEQ => Ok(Operation::simple(OpCode::CompareEq)),
            FE_LDARG => Ok(Operation::new(OpCode::LoadArg, Operand::Integer(immediate()?))),
            FE_STARG => Ok(Operation::new(OpCode::StoreArg, Operand::Integer(immediate()?))),
            _ => local_access(instruction),
        };
    }

    Ok(match instruction.opcode {
        NOP => Operation::simple(OpCode::Nop),
        LDARG_0..=LDARG_3 => Operation::load_arg(u16::from(instruction.opcode - LDARG_0)),
        LDARG_S => Operation::new(OpCode::LoadArg, Operand::Integer(immediate()?)),
        STARG_S => Operation::new(OpCode::StoreArg, Operand::Integer(immediate()?)),
        LDLOC_0..=STLOC_3 | LDLOC_S | STLOC_S => return local_access(instruction),
        LDNULL => Operation::simple(OpCode::LoadNull),
        LDC_I4_M1..=LDC_I4_8 => {
            Operation::push_int(i64::from(instruction.opcode) - i64::from(LDC_I4_0))
        }
        LDC_I4_S | LDC_I4 | LDC_I8 => Operation::push_int(immediate()?),
        LDSTR => Operation::push_string(tokens.string(token()?)?),
        DUP => Operation::simple(OpCode::Dup),
        POP => Operation::simple(OpCode::Pop),
        CALL => Operation::call(tokens.member(token()?)?.clone()),
        CALLVIRT => Operation::call_virtual(tokens.member(token()?)?.clone()),
        RET => Operation::simple(OpCode::Return),
        ADD => Operation::simple(OpCode::Add),
        SUB => Operation::simple(OpCode::Sub),
        _ => {
            return Err(malformed_error!(
                "No canonical form for '{}'",
                instruction.mnemonic
            ))
        }
    })
}

fn local_access(instruction: &Instruction) -> Result<Operation> {
    let access = resolve_slot(instruction)?;
    Ok(match access.direction {
        AccessDirection::Load => Operation::load_local(access.slot),
        AccessDirection::Store => Operation::store_local(access.slot),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{assembly::instruction::FlowType, metadata::identity::MethodRef, Error};

    #[test]
    fn decode_instruction_basic() {
        let mut parser = Parser::new(&[LDLOC_S, 0x10]);
        let instruction = decode_instruction(&mut parser).unwrap();

        assert_eq!(instruction.mnemonic, "ldloc.s");
        assert_eq!(instruction.offset, 0);
        assert_eq!(instruction.size, 2);
        assert_eq!(instruction.get_u8_operand(), Some(0x10));
        assert_eq!(instruction.flow_type, FlowType::Sequential);
    }

    #[test]
    fn decode_instruction_two_byte() {
        let mut parser = Parser::new(&[FE_PREFIX, FE_CEQ]);
        let instruction = decode_instruction(&mut parser).unwrap();

        assert_eq!(instruction.mnemonic, "ceq");
        assert_eq!(instruction.prefix, FE_PREFIX);
        assert_eq!(instruction.size, 2);
        assert_eq!(instruction.stack_behavior.pops, 2);
    }

    #[test]
    fn decode_instruction_branch() {
        // nop; br.s -3
        let mut parser = Parser::new(&[NOP, BR_S, 0xFD]);
        decode_instruction(&mut parser).unwrap();
        let instruction = decode_instruction(&mut parser).unwrap();

        assert!(instruction.is_branch());
        assert!(instruction.is_terminal());
        assert_eq!(instruction.branch_targets, vec![0]);
    }

    #[test]
    fn decode_instruction_invalid_opcode() {
        assert!(matches!(
            decode_instruction(&mut Parser::new(&[0x01])),
            Err(Error::Malformed { .. })
        ));
        assert!(matches!(
            decode_instruction(&mut Parser::new(&[FE_PREFIX, 0x7F])),
            Err(Error::Malformed { .. })
        ));
        assert!(matches!(
            decode_instruction(&mut Parser::new(&[FE_PREFIX, 0x00])),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn decode_instruction_truncated() {
        assert!(matches!(
            decode_instruction(&mut Parser::new(&[LDC_I4, 0x01, 0x02])),
            Err(Error::OutOfBounds { .. })
        ));
        assert!(decode_instruction(&mut Parser::new(&[FE_PREFIX])).is_err());
    }

    #[test]
    fn decode_stream_offsets() {
        let mut parser = Parser::new(&[LDARG_0, LDC_I4_S, 0x05, ADD, RET]);
        let instructions = decode_stream(&mut parser).unwrap();

        let offsets: Vec<u64> = instructions.iter().map(|i| i.offset).collect();
        assert_eq!(offsets, vec![0, 1, 3, 4]);
    }

    #[test]
    fn decode_canonical_forms() {
        let mut tokens = TokenTable::new();
        let ok = MethodRef::instance("Mvc.ControllerBase", "Ok")
            .with_params(&["System.Object"])
            .returning("Mvc.OkObjectResult");
        let member = tokens.intern_member(&ok).unwrap().value().to_le_bytes();
        let string = tokens.intern_string("🍌").unwrap().value().to_le_bytes();

        let mut code = vec![LDARG_0, LDLOC_2, LDLOC_S, 0x02, FE_PREFIX, FE_LDLOC, 0x02, 0x00];
        code.push(LDSTR);
        code.extend_from_slice(&string);
        code.push(POP);
        code.push(CALLVIRT);
        code.extend_from_slice(&member);
        code.extend_from_slice(&[LDC_I4_M1, LDC_I4_S, 0x80, ADD, ADD, POP, POP, POP, RET]);

        let stream = decode(&code, &tokens).unwrap();
        let ops = stream.operations();

        assert_eq!(ops[0], Operation::load_arg(0));
        assert_eq!(ops[1], Operation::load_local(2));
        assert_eq!(ops[2], Operation::load_local(2));
        assert_eq!(ops[3], Operation::load_local(2));
        assert_eq!(ops[4], Operation::push_string("🍌"));
        assert_eq!(ops[6], Operation::call_virtual(ok));
        assert_eq!(ops[7], Operation::push_int(-1));
        assert_eq!(ops[8], Operation::push_int(-128));
    }

    #[test]
    fn decode_assigns_labels_by_offset() {
        // 0: ldc.i4.1  1: brtrue.s +2 -> 5  3: br.s -5 -> 0  5: ret
        let code = [LDC_I4_1, BRTRUE_S, 0x02, BR_S, 0xFB, RET];
        let stream = decode(&code, &TokenTable::new()).unwrap();

        let back = stream.get(2).unwrap().branch_target().unwrap();
        let forward = stream.get(1).unwrap().branch_target().unwrap();
        assert!(back < forward);
        assert_eq!(stream.position_of(back), Some(0));
        assert_eq!(stream.position_of(forward), Some(3));
        assert_eq!(stream, decode(&code, &TokenTable::new()).unwrap());
    }

    #[test]
    fn decode_rejects_mid_instruction_target() {
        // ldc.i4.s 0; brfalse.s -3 -> offset 1, inside ldc.i4.s
        let code = [LDC_I4_S, 0x00, BRFALSE_S, 0xFD, RET];
        assert!(matches!(
            decode(&code, &TokenTable::new()),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn decode_rejects_unknown_token() {
        let code = [LDSTR, 0x05, 0x00, 0x00, 0x70, RET];
        assert!(matches!(
            decode(&code, &TokenTable::new()),
            Err(Error::Malformed { .. })
        ));
    }
}
