//! Static instruction metadata tables.
//!
//! [`INSTRUCTIONS`] is indexed by the single opcode byte, [`INSTRUCTIONS_FE`] by the second byte
//! of `0xFE`-prefixed opcodes. Entries with an empty mnemonic are not supported by the codec.

use std::{collections::HashMap, sync::OnceLock};

use crate::assembly::{
    instruction::{FlowType, OperandType},
    opcodes::*,
};

/// Metadata describing one CIL opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CilInstruction<'a> {
    /// Mnemonic, empty for unsupported opcodes
    pub instr: &'a str,
    /// Operand encoding
    pub op_type: OperandType,
    /// Fixed number of popped stack slots
    pub stack_pops: u8,
    /// Fixed number of pushed stack slots
    pub stack_pushes: u8,
    /// Control flow behaviour
    pub flow: FlowType,
}

const EMPTY: CilInstruction<'static> = CilInstruction {
    instr: "",
    op_type: OperandType::None,
    stack_pops: 0,
    stack_pushes: 0,
    flow: FlowType::Sequential,
};

const fn op(
    instr: &'static str,
    op_type: OperandType,
    stack_pops: u8,
    stack_pushes: u8,
    flow: FlowType,
) -> CilInstruction<'static> {
    CilInstruction {
        instr,
        op_type,
        stack_pops,
        stack_pushes,
        flow,
    }
}

const fn seq(
    instr: &'static str,
    op_type: OperandType,
    stack_pops: u8,
    stack_pushes: u8,
) -> CilInstruction<'static> {
    op(instr, op_type, stack_pops, stack_pushes, FlowType::Sequential)
}

/// Single-byte opcode table.
pub static INSTRUCTIONS: [CilInstruction<'static>; 0x100] = {
    let mut table = [EMPTY; 0x100];

    table[NOP as usize] = seq("nop", OperandType::None, 0, 0);

    table[LDARG_0 as usize] = seq("ldarg.0", OperandType::None, 0, 1);
    table[LDARG_1 as usize] = seq("ldarg.1", OperandType::None, 0, 1);
    table[LDARG_2 as usize] = seq("ldarg.2", OperandType::None, 0, 1);
    table[LDARG_3 as usize] = seq("ldarg.3", OperandType::None, 0, 1);

    table[LDLOC_0 as usize] = seq("ldloc.0", OperandType::None, 0, 1);
    table[LDLOC_1 as usize] = seq("ldloc.1", OperandType::None, 0, 1);
    table[LDLOC_2 as usize] = seq("ldloc.2", OperandType::None, 0, 1);
    table[LDLOC_3 as usize] = seq("ldloc.3", OperandType::None, 0, 1);
    table[STLOC_0 as usize] = seq("stloc.0", OperandType::None, 1, 0);
    table[STLOC_1 as usize] = seq("stloc.1", OperandType::None, 1, 0);
    table[STLOC_2 as usize] = seq("stloc.2", OperandType::None, 1, 0);
    table[STLOC_3 as usize] = seq("stloc.3", OperandType::None, 1, 0);

    table[LDARG_S as usize] = seq("ldarg.s", OperandType::UInt8, 0, 1);
    table[STARG_S as usize] = seq("starg.s", OperandType::UInt8, 1, 0);
    table[LDLOC_S as usize] = seq("ldloc.s", OperandType::UInt8, 0, 1);
    table[STLOC_S as usize] = seq("stloc.s", OperandType::UInt8, 1, 0);

    table[LDNULL as usize] = seq("ldnull", OperandType::None, 0, 1);
    table[LDC_I4_M1 as usize] = seq("ldc.i4.m1", OperandType::None, 0, 1);
    table[LDC_I4_0 as usize] = seq("ldc.i4.0", OperandType::None, 0, 1);
    table[LDC_I4_1 as usize] = seq("ldc.i4.1", OperandType::None, 0, 1);
    table[LDC_I4_2 as usize] = seq("ldc.i4.2", OperandType::None, 0, 1);
    table[LDC_I4_3 as usize] = seq("ldc.i4.3", OperandType::None, 0, 1);
    table[LDC_I4_4 as usize] = seq("ldc.i4.4", OperandType::None, 0, 1);
    table[LDC_I4_5 as usize] = seq("ldc.i4.5", OperandType::None, 0, 1);
    table[LDC_I4_6 as usize] = seq("ldc.i4.6", OperandType::None, 0, 1);
    table[LDC_I4_7 as usize] = seq("ldc.i4.7", OperandType::None, 0, 1);
    table[LDC_I4_8 as usize] = seq("ldc.i4.8", OperandType::None, 0, 1);
    table[LDC_I4_S as usize] = seq("ldc.i4.s", OperandType::Int8, 0, 1);
    table[LDC_I4 as usize] = seq("ldc.i4", OperandType::Int32, 0, 1);
    table[LDC_I8 as usize] = seq("ldc.i8", OperandType::Int64, 0, 1);

    table[DUP as usize] = seq("dup", OperandType::None, 1, 2);
    table[POP as usize] = seq("pop", OperandType::None, 1, 0);

    table[CALL as usize] = op("call", OperandType::Token, 0, 0, FlowType::Call);
    table[RET as usize] = op("ret", OperandType::None, 0, 0, FlowType::Return);

    table[BR_S as usize] = op("br.s", OperandType::Int8, 0, 0, FlowType::UnconditionalBranch);
    table[BRFALSE_S as usize] =
        op("brfalse.s", OperandType::Int8, 1, 0, FlowType::ConditionalBranch);
    table[BRTRUE_S as usize] =
        op("brtrue.s", OperandType::Int8, 1, 0, FlowType::ConditionalBranch);
    table[BR as usize] = op("br", OperandType::Int32, 0, 0, FlowType::UnconditionalBranch);
    table[BRFALSE as usize] = op("brfalse", OperandType::Int32, 1, 0, FlowType::ConditionalBranch);
    table[BRTRUE as usize] = op("brtrue", OperandType::Int32, 1, 0, FlowType::ConditionalBranch);

    table[ADD as usize] = seq("add", OperandType::None, 2, 1);
    table[SUB as usize] = seq("sub", OperandType::None, 2, 1);

    table[CALLVIRT as usize] = op("callvirt", OperandType::Token, 0, 0, FlowType::Call);
    table[LDSTR as usize] = seq("ldstr", OperandType::Token, 0, 1);

    table
};

/// `0xFE`-prefixed opcode table, indexed by the second byte.
pub static INSTRUCTIONS_FE: [CilInstruction<'static>; 0x20] = {
    let mut table = [EMPTY; 0x20];

    table[FE_CEQ as usize] = seq("ceq", OperandType::None, 2, 1);
    table[FE_LDARG as usize] = seq("ldarg", OperandType::UInt16, 0, 1);
    table[FE_STARG as usize] = seq("starg", OperandType::UInt16, 1, 0);
    table[FE_LDLOC as usize] = seq("ldloc", OperandType::UInt16, 0, 1);
    table[FE_STLOC as usize] = seq("stloc", OperandType::UInt16, 1, 0);

    table
};

/// Reverse lookup from mnemonic to `(opcode, prefix, metadata)`.
static MNEMONIC_TO_OPCODE: OnceLock<
    HashMap<&'static str, (u8, u8, &'static CilInstruction<'static>)>,
> = OnceLock::new();

/// Returns the mnemonic lookup table, building it on first use.
pub fn get_mnemonic_lookup(
) -> &'static HashMap<&'static str, (u8, u8, &'static CilInstruction<'static>)> {
    MNEMONIC_TO_OPCODE.get_or_init(|| {
        let mut map = HashMap::new();

        for (opcode, instr) in (0u8..=u8::MAX).zip(INSTRUCTIONS.iter()) {
            if !instr.instr.is_empty() {
                map.insert(instr.instr, (opcode, 0, instr));
            }
        }

        for (opcode, instr) in (0u8..=u8::MAX).zip(INSTRUCTIONS_FE.iter()) {
            if !instr.instr.is_empty() {
                map.insert(instr.instr, (opcode, FE_PREFIX, instr));
            }
        }

        map
    })
}
