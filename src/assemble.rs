//! Assembly: merged IR -> raw method body.
//!
//! The bytecode pass runs first because it is the only pass that can fix
//! final offsets: alignment padding may shift everything discovered during
//! decoding. The debug-info and exception-table passes then read the
//! reassigned node and label offsets.

use std::collections::HashMap;

use crate::code_item::{
    CodeItem, DebugInfoItem, TryRegion, DBG_ADVANCE_LINE, DBG_ADVANCE_PC, DBG_END_LOCAL,
    DBG_END_SEQUENCE, DBG_FIRST_SPECIAL, DBG_LINE_BASE, DBG_LINE_RANGE, DBG_RESTART_LOCAL,
    DBG_SET_EPILOGUE_BEGIN, DBG_SET_FILE, DBG_SET_PROLOGUE_END, DBG_START_LOCAL,
    DBG_START_LOCAL_EXTENDED,
};
use crate::error::LirError;
use crate::ir::{DebugOp, LabelId, MethodIr, NodeKind, Operand};
use crate::leb::{write_sleb128, write_uleb128, write_uleb128p1};
use crate::opcode_format::{Format, ARRAY_DATA_IDENT, PACKED_SWITCH_IDENT, SPARSE_SWITCH_IDENT};
use crate::opcodes::{op, Opcode};
use crate::pool::{ConstantPool, NO_INDEX};

impl MethodIr {
    /// Re-encodes the merged stream into a raw method body. Encoding order
    /// is fixed: bytecode first (this reassigns every node and label
    /// offset), then debug info, then the exception table, both of which
    /// depend on the final offsets.
    pub fn assemble(&mut self, pool: &ConstantPool) -> Result<CodeItem, LirError> {
        let insns = encode_bytecode(self, pool)?;
        let debug_info = encode_debug_info(self)?;
        let (tries, handlers) = encode_try_blocks(self)?;

        Ok(CodeItem {
            registers_size: self.registers_size,
            ins_size: self.ins_size,
            outs_size: self.outs_size,
            insns,
            tries,
            handlers,
            debug_info,
        })
    }
}

// ---------------------------------------------------------------------------
// bytecode emitter

struct Layout {
    /// Final code-unit offset per node, parallel to `ir.nodes`.
    node_offsets: Vec<u32>,
    /// Final offset per label (by raw label index); None while unplaced.
    label_offsets: Vec<Option<u32>>,
    /// Referring-instruction offset per switch payload, keyed by the
    /// payload's pre-assembly offset.
    switch_bases: HashMap<u32, u32>,
}

fn opcode_def(value: u8) -> Result<&'static Opcode, LirError> {
    Opcode::for_value(value).ok_or_else(|| err!("unknown opcode 0x{:02x} in IR node", value))
}

/// First walk: fix every node and label offset, inserting alignment slack
/// before payloads and aligned labels, and pair each switch instruction
/// with its payload.
fn compute_layout(ir: &MethodIr) -> Result<Layout, LirError> {
    let mut layout = Layout {
        node_offsets: vec![0; ir.nodes.len()],
        label_offsets: vec![None; ir.label_count()],
        switch_bases: HashMap::new(),
    };

    let mut off: u32 = 0;
    for (i, node) in ir.nodes.iter().enumerate() {
        match &node.kind {
            NodeKind::Label(id) => {
                if ir.label(*id).aligned && off % 2 == 1 {
                    off += 1;
                }
                layout.node_offsets[i] = off;
                layout.label_offsets[id.0 as usize] = Some(off);
            }

            NodeKind::Bytecode { opcode, operands } => {
                layout.node_offsets[i] = off;
                let def = opcode_def(*opcode)?;
                let width = def.format.code_units();
                if width == 0 {
                    fail!("payload format opcode 0x{:02x} in a bytecode node", opcode);
                }

                if matches!(*opcode, op::PACKED_SWITCH | op::SPARSE_SWITCH) {
                    let target = branch_target(operands)?;
                    let payload_key = ir.label(target).offset;
                    if layout.switch_bases.insert(payload_key, off).is_some() {
                        fail!("switch payload referenced by more than one instruction");
                    }
                }
                off += width as u32;
            }

            NodeKind::PackedSwitchPayload { targets, .. } => {
                if off % 2 == 1 {
                    off += 1;
                }
                layout.node_offsets[i] = off;
                off += 4 + 2 * targets.len() as u32;
            }

            NodeKind::SparseSwitchPayload { cases } => {
                if off % 2 == 1 {
                    off += 1;
                }
                layout.node_offsets[i] = off;
                off += 2 + 4 * cases.len() as u32;
            }

            NodeKind::ArrayDataPayload { data } => {
                if data.len() % 2 != 0 {
                    fail!("array-data payload with odd byte length {}", data.len());
                }
                if off % 2 == 1 {
                    off += 1;
                }
                layout.node_offsets[i] = off;
                off += (data.len() / 2) as u32;
            }

            NodeKind::TryBlockBegin { .. }
            | NodeKind::TryBlockEnd { .. }
            | NodeKind::DebugInfoHeader { .. }
            | NodeKind::DebugInfoAnnotation { .. } => {
                layout.node_offsets[i] = off;
            }
        }
    }
    Ok(layout)
}

fn encode_bytecode(ir: &mut MethodIr, pool: &ConstantPool) -> Result<Vec<u16>, LirError> {
    let layout = compute_layout(ir)?;

    let mut out: Vec<u16> = Vec::new();
    for (i, node) in ir.nodes.iter().enumerate() {
        let at = layout.node_offsets[i] as usize;
        match &node.kind {
            NodeKind::Bytecode { opcode, operands } => {
                pad_to(&mut out, at);
                emit_op(&mut out, ir, &layout, at as u32, *opcode, operands, pool)?;
            }

            NodeKind::PackedSwitchPayload { first_key, targets } => {
                pad_to(&mut out, at);
                let base = payload_base(&layout, node.offset)?;
                out.push(PACKED_SWITCH_IDENT);
                out.push(switch_size(targets.len())?);
                push_u32(&mut out, *first_key as u32);
                for target in targets {
                    push_u32(&mut out, switch_rel(ir, &layout, *target, base)? as u32);
                }
            }

            NodeKind::SparseSwitchPayload { cases } => {
                pad_to(&mut out, at);
                let base = payload_base(&layout, node.offset)?;
                out.push(SPARSE_SWITCH_IDENT);
                out.push(switch_size(cases.len())?);
                for (key, _) in cases {
                    push_u32(&mut out, *key as u32);
                }
                for (_, target) in cases {
                    push_u32(&mut out, switch_rel(ir, &layout, *target, base)? as u32);
                }
            }

            NodeKind::ArrayDataPayload { data } => {
                pad_to(&mut out, at);
                if data.len() < 2 || u16::from_le_bytes([data[0], data[1]]) != ARRAY_DATA_IDENT {
                    fail!("array-data payload bytes do not start with the payload signature");
                }
                for pair in data.chunks_exact(2) {
                    out.push(u16::from_le_bytes([pair[0], pair[1]]));
                }
            }

            _ => {}
        }
    }

    // write the final offsets back into the instance
    for (i, node) in ir.nodes.iter_mut().enumerate() {
        node.offset = layout.node_offsets[i];
    }
    for (raw, new_offset) in layout.label_offsets.iter().enumerate() {
        if let Some(new_offset) = new_offset {
            ir.label_mut(LabelId(raw as u32)).offset = *new_offset;
        }
    }
    Ok(out)
}

fn pad_to(out: &mut Vec<u16>, at: usize) {
    while out.len() < at {
        out.push(0x0000); // nop
    }
}

fn push_u32(out: &mut Vec<u16>, value: u32) {
    out.push(value as u16);
    out.push((value >> 16) as u16);
}

fn switch_size(len: usize) -> Result<u16, LirError> {
    u16::try_from(len).map_err(|_| err!("switch payload with {} cases does not fit", len))
}

fn payload_base(layout: &Layout, payload_key: u32) -> Result<u32, LirError> {
    layout
        .switch_bases
        .get(&payload_key)
        .copied()
        .ok_or_else(|| err!("switch payload at offset {} has no referencing instruction", payload_key))
}

fn resolved_label(ir: &MethodIr, layout: &Layout, label: LabelId) -> Result<u32, LirError> {
    layout.label_offsets[label.0 as usize]
        .ok_or_else(|| err!("branch target label {} is not placed in the stream", ir.label(label).id))
}

fn switch_rel(ir: &MethodIr, layout: &Layout, label: LabelId, base: u32) -> Result<i32, LirError> {
    let target = resolved_label(ir, layout, label)?;
    Ok((target as i64 - base as i64) as i32)
}

// operand shape extractors; a mismatch means the caller built an invalid node

fn want(operands: &[Operand], i: usize) -> Result<&Operand, LirError> {
    operands.get(i).ok_or_else(|| err!("missing operand {}", i))
}

fn reg(operands: &[Operand], i: usize) -> Result<u16, LirError> {
    match want(operands, i)? {
        Operand::Reg(r) => Ok(*r),
        other => Err(err!("expected register operand, found {:?}", other)),
    }
}

fn reg_pair(operands: &[Operand], i: usize) -> Result<u16, LirError> {
    match want(operands, i)? {
        Operand::RegPair(r) => Ok(*r),
        other => Err(err!("expected register-pair operand, found {:?}", other)),
    }
}

fn const32(operands: &[Operand], i: usize) -> Result<u32, LirError> {
    match want(operands, i)? {
        Operand::Const32(bits) => Ok(*bits),
        other => Err(err!("expected 32-bit constant operand, found {:?}", other)),
    }
}

fn const64(operands: &[Operand], i: usize) -> Result<u64, LirError> {
    match want(operands, i)? {
        Operand::Const64(bits) => Ok(*bits),
        other => Err(err!("expected 64-bit constant operand, found {:?}", other)),
    }
}

fn branch_target(operands: &[Operand]) -> Result<LabelId, LirError> {
    for operand in operands {
        if let Operand::Target(label) = operand {
            return Ok(*label);
        }
    }
    Err(err!("branch instruction without a target operand"))
}

fn pool_index(operands: &[Operand], i: usize, pool: &ConstantPool) -> Result<u32, LirError> {
    match want(operands, i)? {
        Operand::PoolRef { kind, index } => {
            if *index == NO_INDEX || !pool.resolves(*kind, *index) {
                fail!("unresolvable {:?} pool index {}", kind, index);
            }
            Ok(*index)
        }
        other => Err(err!("expected pool reference operand, found {:?}", other)),
    }
}

fn nibble(r: u16, what: &str) -> Result<u16, LirError> {
    if r > 0x0f {
        fail!("{} register v{} does not fit in four bits", what, r);
    }
    Ok(r)
}

fn byte_reg(r: u16, what: &str) -> Result<u16, LirError> {
    if r > 0xff {
        fail!("{} register v{} does not fit in eight bits", what, r);
    }
    Ok(r)
}

fn check_i32(value: i64, bits: u32, what: &str) -> Result<i32, LirError> {
    let min = -(1i64 << (bits - 1));
    let max = (1i64 << (bits - 1)) - 1;
    if value < min || value > max {
        fail!("{} {} does not fit in {} bits", what, value, bits);
    }
    Ok(value as i32)
}

fn emit_op(
    out: &mut Vec<u16>,
    ir: &MethodIr,
    layout: &Layout,
    at: u32,
    opcode: u8,
    operands: &[Operand],
    pool: &ConstantPool,
) -> Result<(), LirError> {
    let def = opcode_def(opcode)?;
    let opw = opcode as u16;

    let rel = |label: LabelId| -> Result<i64, LirError> {
        Ok(resolved_label(ir, layout, label)? as i64 - at as i64)
    };

    match def.format {
        Format::Format10x => {
            out.push(opw);
        }

        Format::Format12x => {
            let a = nibble(reg(operands, 0)?, "first")?;
            let b = nibble(reg(operands, 1)?, "second")?;
            out.push(opw | (a << 8) | (b << 12));
        }

        Format::Format11n => {
            let a = nibble(reg(operands, 0)?, "first")?;
            let v = check_i32(const32(operands, 1)? as i32 as i64, 4, "literal")?;
            out.push(opw | (a << 8) | (((v as u16) & 0x0f) << 12));
        }

        Format::Format11x => {
            let a = byte_reg(reg(operands, 0)?, "first")?;
            out.push(opw | (a << 8));
        }

        Format::Format10t => {
            let delta = check_i32(rel(branch_target(operands)?)?, 8, "branch delta")?;
            out.push(opw | (((delta as u16) & 0xff) << 8));
        }

        Format::Format20t => {
            let delta = check_i32(rel(branch_target(operands)?)?, 16, "branch delta")?;
            out.push(opw);
            out.push(delta as u16);
        }

        Format::Format22x => {
            let a = byte_reg(reg(operands, 0)?, "first")?;
            out.push(opw | (a << 8));
            out.push(reg(operands, 1)?);
        }

        Format::Format21t => {
            let a = byte_reg(reg(operands, 0)?, "first")?;
            let delta = check_i32(rel(branch_target(operands)?)?, 16, "branch delta")?;
            out.push(opw | (a << 8));
            out.push(delta as u16);
        }

        Format::Format21s => {
            let a = byte_reg(reg(operands, 0)?, "first")?;
            let v = check_i32(const32(operands, 1)? as i32 as i64, 16, "literal")?;
            out.push(opw | (a << 8));
            out.push(v as u16);
        }

        Format::Format21h => match opcode {
            op::CONST_HIGH16 => {
                let a = byte_reg(reg(operands, 0)?, "first")?;
                let bits = const32(operands, 1)?;
                if bits & 0xffff != 0 {
                    fail!("const/high16 literal 0x{:08x} has low bits set", bits);
                }
                out.push(opw | (a << 8));
                out.push((bits >> 16) as u16);
            }
            op::CONST_WIDE_HIGH16 => {
                let a = byte_reg(reg_pair(operands, 0)?, "first")?;
                let bits = const64(operands, 1)?;
                if bits & 0xffff_ffff_ffff != 0 {
                    fail!("const-wide/high16 literal 0x{:016x} has low bits set", bits);
                }
                out.push(opw | (a << 8));
                out.push((bits >> 48) as u16);
            }
            other => fail!("unexpected opcode 0x{:02x} for format 21h", other),
        },

        Format::Format21c => {
            let a = byte_reg(reg(operands, 0)?, "first")?;
            let index = pool_index(operands, 1, pool)?;
            if index > u16::MAX as u32 {
                fail!("pool index {} does not fit in 16 bits", index);
            }
            out.push(opw | (a << 8));
            out.push(index as u16);
        }

        Format::Format23x => {
            let a = byte_reg(reg(operands, 0)?, "first")?;
            let b = byte_reg(reg(operands, 1)?, "second")?;
            let c = byte_reg(reg(operands, 2)?, "third")?;
            out.push(opw | (a << 8));
            out.push(b | (c << 8));
        }

        Format::Format22b => {
            let a = byte_reg(reg(operands, 0)?, "first")?;
            let b = byte_reg(reg(operands, 1)?, "second")?;
            let v = check_i32(const32(operands, 2)? as i32 as i64, 8, "literal")?;
            out.push(opw | (a << 8));
            out.push(b | (((v as u16) & 0xff) << 8));
        }

        Format::Format22t => {
            let a = nibble(reg(operands, 0)?, "first")?;
            let b = nibble(reg(operands, 1)?, "second")?;
            let delta = check_i32(rel(branch_target(operands)?)?, 16, "branch delta")?;
            out.push(opw | (a << 8) | (b << 12));
            out.push(delta as u16);
        }

        Format::Format22s => {
            let a = nibble(reg(operands, 0)?, "first")?;
            let b = nibble(reg(operands, 1)?, "second")?;
            let v = check_i32(const32(operands, 2)? as i32 as i64, 16, "literal")?;
            out.push(opw | (a << 8) | (b << 12));
            out.push(v as u16);
        }

        Format::Format22c => {
            let a = nibble(reg(operands, 0)?, "first")?;
            let b = nibble(reg(operands, 1)?, "second")?;
            let index = pool_index(operands, 2, pool)?;
            if index > u16::MAX as u32 {
                fail!("pool index {} does not fit in 16 bits", index);
            }
            out.push(opw | (a << 8) | (b << 12));
            out.push(index as u16);
        }

        Format::Format30t => {
            let delta = rel(branch_target(operands)?)? as i32;
            out.push(opw);
            push_u32(out, delta as u32);
        }

        Format::Format32x => {
            out.push(opw);
            out.push(reg(operands, 0)?);
            out.push(reg(operands, 1)?);
        }

        Format::Format31i => {
            let a = byte_reg(reg(operands, 0)?, "first")?;
            out.push(opw | (a << 8));
            push_u32(out, const32(operands, 1)?);
        }

        Format::Format31t => {
            let a = byte_reg(reg(operands, 0)?, "first")?;
            let delta = rel(branch_target(operands)?)? as i32;
            out.push(opw | (a << 8));
            push_u32(out, delta as u32);
        }

        Format::Format31c => {
            let a = byte_reg(reg(operands, 0)?, "first")?;
            let index = pool_index(operands, 1, pool)?;
            out.push(opw | (a << 8));
            push_u32(out, index);
        }

        Format::Format35c => {
            let registers = match want(operands, 0)? {
                Operand::RegList(list) => list,
                other => fail!("expected register-list operand, found {:?}", other),
            };
            if registers.len() > 5 {
                fail!("register list with {} entries does not fit", registers.len());
            }
            let index = pool_index(operands, 1, pool)?;
            if index > u16::MAX as u32 {
                fail!("pool index {} does not fit in 16 bits", index);
            }
            let mut packed = [0u16; 5];
            for (i, r) in registers.iter().enumerate() {
                packed[i] = nibble(*r, "argument")?;
            }
            let count = registers.len() as u16;
            out.push(opw | (packed[4] << 8) | (count << 12));
            out.push(index as u16);
            out.push(packed[0] | (packed[1] << 4) | (packed[2] << 8) | (packed[3] << 12));
        }

        Format::Format3rc => {
            let (base, count) = match want(operands, 0)? {
                Operand::RegRange { base, count } => (*base, *count),
                other => fail!("expected register-range operand, found {:?}", other),
            };
            if count > 0xff {
                fail!("register range of {} does not fit in eight bits", count);
            }
            let index = pool_index(operands, 1, pool)?;
            if index > u16::MAX as u32 {
                fail!("pool index {} does not fit in 16 bits", index);
            }
            out.push(opw | (count << 8));
            out.push(index as u16);
            out.push(base);
        }

        Format::Format51l => {
            let a = byte_reg(reg_pair(operands, 0)?, "first")?;
            let bits = const64(operands, 1)?;
            out.push(opw | (a << 8));
            out.push(bits as u16);
            out.push((bits >> 16) as u16);
            out.push((bits >> 32) as u16);
            out.push((bits >> 48) as u16);
        }

        other => {
            fail!("format {:?} cannot be assembled (opcode 0x{:02x})", other, opcode);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// debug-info encoder

fn annotation_const32(operands: &[Operand]) -> Result<i32, LirError> {
    Ok(const32(operands, 0)? as i32)
}

fn annotation_reg(operands: &[Operand]) -> Result<u32, LirError> {
    Ok(reg(operands, 0)? as u32)
}

/// A nullable string/type index from a debug annotation operand; `NO_INDEX`
/// is legal here and maps back to the uleb128p1 -1 form.
fn annotation_index(operands: &[Operand], i: usize) -> Result<i32, LirError> {
    match want(operands, i)? {
        Operand::PoolRef { index, .. } => {
            Ok(if *index == NO_INDEX { -1 } else { *index as i32 })
        }
        other => Err(err!("expected pool reference operand, found {:?}", other)),
    }
}

fn advance_pc(bytes: &mut Vec<u8>, address: &mut u32, target: u32) -> Result<(), LirError> {
    if target < *address {
        fail!("debug annotation addresses regress ({} after {})", target, *address);
    }
    if target > *address {
        bytes.push(DBG_ADVANCE_PC);
        write_uleb128(bytes, target - *address);
        *address = target;
    }
    Ok(())
}

fn encode_debug_info(ir: &MethodIr) -> Result<Option<DebugInfoItem>, LirError> {
    let mut has_debug = false;
    let mut param_names: Vec<u32> = Vec::new();
    let mut bytes: Vec<u8> = Vec::new();

    let mut address: u32 = 0;
    let mut line_start: Option<i32> = None;
    let mut line: i32 = 0;
    let mut initial_file_seen = false;

    for node in &ir.nodes {
        match &node.kind {
            NodeKind::DebugInfoHeader { param_names: names } => {
                has_debug = true;
                param_names = names.clone();
            }

            NodeKind::DebugInfoAnnotation { op, operands } => {
                has_debug = true;
                match op {
                    DebugOp::AdvanceLine => {
                        let value = annotation_const32(operands)?;
                        if line_start.is_none() {
                            // the synthesized initial line becomes the header's
                            // start line; it produces no program bytes
                            line_start = Some(value);
                            line = value;
                            continue;
                        }

                        let mut line_delta = value as i64 - line as i64;
                        let mut addr_delta = (node.offset as i64) - (address as i64);
                        if addr_delta < 0 {
                            fail!(
                                "debug annotation addresses regress ({} after {})",
                                node.offset,
                                address
                            );
                        }

                        if line_delta < DBG_LINE_BASE as i64
                            || line_delta >= (DBG_LINE_BASE + DBG_LINE_RANGE) as i64
                        {
                            bytes.push(DBG_ADVANCE_LINE);
                            write_sleb128(&mut bytes, line_delta as i32);
                            line_delta = 0;
                        }

                        let adjusted = line_delta - DBG_LINE_BASE as i64;
                        if DBG_FIRST_SPECIAL as i64 + adjusted + addr_delta * DBG_LINE_RANGE as i64
                            > 0xff
                        {
                            bytes.push(DBG_ADVANCE_PC);
                            write_uleb128(&mut bytes, addr_delta as u32);
                            addr_delta = 0;
                        }

                        let special = DBG_FIRST_SPECIAL as i64
                            + adjusted
                            + addr_delta * DBG_LINE_RANGE as i64;
                        bytes.push(special as u8);
                        line = value;
                        address = node.offset;
                    }

                    DebugOp::StartLocal | DebugOp::StartLocalExtended => {
                        advance_pc(&mut bytes, &mut address, node.offset)?;
                        let extended = matches!(op, DebugOp::StartLocalExtended);
                        bytes.push(if extended { DBG_START_LOCAL_EXTENDED } else { DBG_START_LOCAL });
                        write_uleb128(&mut bytes, annotation_reg(operands)?);
                        write_uleb128p1(&mut bytes, annotation_index(operands, 1)?);
                        write_uleb128p1(&mut bytes, annotation_index(operands, 2)?);
                        if extended {
                            write_uleb128p1(&mut bytes, annotation_index(operands, 3)?);
                        }
                    }

                    DebugOp::EndLocal | DebugOp::RestartLocal => {
                        advance_pc(&mut bytes, &mut address, node.offset)?;
                        bytes.push(if matches!(op, DebugOp::EndLocal) {
                            DBG_END_LOCAL
                        } else {
                            DBG_RESTART_LOCAL
                        });
                        write_uleb128(&mut bytes, annotation_reg(operands)?);
                    }

                    DebugOp::PrologueEnd | DebugOp::EpilogueBegin => {
                        advance_pc(&mut bytes, &mut address, node.offset)?;
                        bytes.push(if matches!(op, DebugOp::PrologueEnd) {
                            DBG_SET_PROLOGUE_END
                        } else {
                            DBG_SET_EPILOGUE_BEGIN
                        });
                    }

                    DebugOp::SetFile => {
                        let index = annotation_index(operands, 0)?;
                        if !initial_file_seen && node.offset == 0 && address == 0 {
                            // the synthesized initial source file restates the
                            // enclosing class's; the stream does not repeat it
                            initial_file_seen = true;
                            continue;
                        }
                        advance_pc(&mut bytes, &mut address, node.offset)?;
                        bytes.push(DBG_SET_FILE);
                        write_uleb128p1(&mut bytes, index);
                    }
                }
            }

            _ => {}
        }
    }

    if !has_debug {
        return Ok(None);
    }

    bytes.push(DBG_END_SEQUENCE);
    let line_start = line_start.unwrap_or(1).max(0) as u32;
    Ok(Some(DebugInfoItem { line_start, parameter_names: param_names, bytecode: bytes }))
}

// ---------------------------------------------------------------------------
// exception-table encoder

fn encode_try_blocks(ir: &MethodIr) -> Result<(Vec<TryRegion>, Vec<u8>), LirError> {
    let mut begin_offsets: HashMap<u32, u32> = HashMap::new();
    for node in &ir.nodes {
        if let NodeKind::TryBlockBegin { id } = &node.kind {
            if begin_offsets.insert(*id, node.offset).is_some() {
                fail!("duplicate try-block begin id {}", id);
            }
        }
    }

    // (start, count, index into `entries`)
    let mut regions: Vec<(u32, u16, usize)> = Vec::new();
    let mut entries: Vec<Vec<u8>> = Vec::new();
    let mut entry_index: HashMap<Vec<u8>, usize> = HashMap::new();

    for node in &ir.nodes {
        let NodeKind::TryBlockEnd { begin, handlers, catch_all } = &node.kind else {
            continue;
        };
        let Some(start) = begin_offsets.get(begin).copied() else {
            fail!("try-block end without a matching begin (id {})", begin);
        };
        if node.offset < start {
            fail!("try-block end at {} precedes its begin at {}", node.offset, start);
        }
        let count = u16::try_from(node.offset - start)
            .map_err(|_| err!("protected region of {} code units does not fit", node.offset - start))?;

        if handlers.is_empty() && catch_all.is_none() {
            fail!("exception region at offset {} has no handlers", start);
        }

        let mut encoded = Vec::new();
        let typed = handlers.len() as i32;
        write_sleb128(&mut encoded, if catch_all.is_some() { -typed } else { typed });
        for handler in handlers {
            write_uleb128(&mut encoded, handler.type_idx);
            write_uleb128(&mut encoded, ir.label(handler.target).offset);
        }
        if let Some(label) = catch_all {
            write_uleb128(&mut encoded, ir.label(*label).offset);
        }

        let index = *entry_index.entry(encoded.clone()).or_insert_with(|| {
            entries.push(encoded);
            entries.len() - 1
        });
        regions.push((start, count, index));
    }

    if regions.is_empty() {
        return Ok((Vec::new(), Vec::new()));
    }
    regions.sort_by_key(|(start, _, _)| *start);

    let mut blob: Vec<u8> = Vec::new();
    write_uleb128(&mut blob, entries.len() as u32);
    let mut offsets: Vec<usize> = Vec::with_capacity(entries.len());
    for entry in &entries {
        offsets.push(blob.len());
        blob.extend_from_slice(entry);
    }

    let mut tries = Vec::with_capacity(regions.len());
    for (start, count, index) in regions {
        let handler_off = u16::try_from(offsets[index])
            .map_err(|_| err!("handler blob offset {} does not fit", offsets[index]))?;
        tries.push(TryRegion { start_addr: start, insn_count: count, handler_off });
    }
    Ok((tries, blob))
}
