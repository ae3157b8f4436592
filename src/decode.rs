//! Disassembly: raw method body -> merged symbolic IR.
//!
//! Pass order is fixed: bytecode first (labels and switch-fixup bases are
//! discovered here), then the exception table, then the debug-info replay,
//! then the switch-payload fixup (which needs every base offset), then label
//! id assignment, then the stream merges.

use std::collections::HashMap;

use log::warn;

use crate::code_item::{
    CodeItem, DBG_ADVANCE_LINE, DBG_ADVANCE_PC, DBG_END_LOCAL, DBG_END_SEQUENCE,
    DBG_FIRST_SPECIAL, DBG_LINE_BASE, DBG_LINE_RANGE, DBG_RESTART_LOCAL,
    DBG_SET_EPILOGUE_BEGIN, DBG_SET_FILE, DBG_SET_PROLOGUE_END, DBG_START_LOCAL,
    DBG_START_LOCAL_EXTENDED,
};
use crate::error::LirError;
use crate::ir::{
    merge_nodes, CatchHandler, DebugOp, MethodIr, Node, NodeKind, Operand, PoolRefKind,
};
use crate::leb::{read_sleb128, read_uleb128, read_uleb128p1};
use crate::opcode_format::{
    decode_insn, dword_at, insn_width, word_at, Format, ReferenceType, ARRAY_DATA_IDENT,
    PACKED_SWITCH_IDENT, SPARSE_SWITCH_IDENT,
};
use crate::opcodes::op;
use crate::pool::{ConstantPool, NO_INDEX};
use crate::read_u1;

/// Pending fixup state for one switch payload offset. `node` is filled when
/// the payload itself is decoded, `base_offset` when the referring switch
/// instruction is; both must be present exactly once before fixup runs.
#[derive(Default)]
struct SwitchFixup {
    node: Option<usize>,
    base_offset: Option<u32>,
}

struct Disassembler<'a> {
    code: &'a CodeItem,
    pool: &'a ConstantPool,
    ir: MethodIr,
    packed_switches: HashMap<u32, SwitchFixup>,
    sparse_switches: HashMap<u32, SwitchFixup>,
    try_begins: Vec<Node>,
    try_ends: Vec<Node>,
    dbg_annotations: Vec<Node>,
}

impl MethodIr {
    /// Decodes `code` into a merged IR. `source_file` is the enclosing
    /// class's source-file string index (`NO_INDEX` when the class has
    /// none); it seeds the debug-info replay state.
    pub fn disassemble(
        code: &CodeItem,
        source_file: u32,
        pool: &ConstantPool,
    ) -> Result<MethodIr, LirError> {
        let mut d = Disassembler {
            code,
            pool,
            ir: MethodIr::new(code.registers_size, code.ins_size, code.outs_size),
            packed_switches: HashMap::new(),
            sparse_switches: HashMap::new(),
            try_begins: Vec::new(),
            try_ends: Vec::new(),
            dbg_annotations: Vec::new(),
        };

        d.decode_bytecode()?;
        d.decode_try_blocks()?;
        d.decode_debug_info(source_file)?;
        d.fixup_switches()?;

        let Disassembler { mut ir, try_begins, try_ends, dbg_annotations, .. } = d;
        ir.assign_label_ids();
        let label_nodes: Vec<Node> =
            ir.labels().map(|(id, l)| Node::new(l.offset, NodeKind::Label(id))).collect();

        merge_nodes(&mut ir.nodes, dbg_annotations)?;
        merge_nodes(&mut ir.nodes, try_begins)?;
        merge_nodes(&mut ir.nodes, label_nodes)?;
        merge_nodes(&mut ir.nodes, try_ends)?;
        Ok(ir)
    }
}

#[inline]
fn add_delta(offset: u32, delta: u32) -> u32 {
    (offset as i32).wrapping_add(delta as i32) as u32
}

#[inline]
fn p1_index(value: i32) -> u32 {
    if value < 0 {
        NO_INDEX
    } else {
        value as u32
    }
}

impl<'a> Disassembler<'a> {
    fn decode_bytecode(&mut self) -> Result<(), LirError> {
        let code = self.code;
        let insns = &code.insns;

        let mut pc: usize = 0;
        while pc < insns.len() {
            let width = insn_width(insns, pc)?;
            if width == 0 {
                fail!("zero-width instruction at code unit {}", pc);
            }

            let offset = pc as u32;
            let node_index = self.ir.nodes.len();
            let kind = match insns[pc] {
                PACKED_SWITCH_IDENT => self.begin_switch_payload(offset, node_index, true)?,
                SPARSE_SWITCH_IDENT => self.begin_switch_payload(offset, node_index, false)?,
                ARRAY_DATA_IDENT => decode_array_data(insns, pc, offset, width as usize)?,
                _ => self.decode_op(insns, pc, offset)?,
            };
            self.ir.nodes.push(Node::new(offset, kind));
            pc += width as usize;
        }
        if pc != insns.len() {
            fail!("instruction stream does not end on an instruction boundary");
        }
        Ok(())
    }

    /// Switch payloads decode structurally empty: the targets inside are
    /// relative to the referring instruction, which may not be decoded yet.
    fn begin_switch_payload(
        &mut self,
        offset: u32,
        node_index: usize,
        packed: bool,
    ) -> Result<NodeKind, LirError> {
        if offset % 2 != 0 {
            fail!("switch payload at unaligned offset {}", offset);
        }
        let map = if packed { &mut self.packed_switches } else { &mut self.sparse_switches };
        let fixup = map.entry(offset).or_default();
        if fixup.node.is_some() {
            fail!("duplicate switch payload at offset {}", offset);
        }
        fixup.node = Some(node_index);

        Ok(if packed {
            NodeKind::PackedSwitchPayload { first_key: 0, targets: Vec::new() }
        } else {
            NodeKind::SparseSwitchPayload { cases: Vec::new() }
        })
    }

    fn record_switch_base(
        &mut self,
        packed: bool,
        payload_offset: u32,
        branch_offset: u32,
    ) -> Result<(), LirError> {
        let map = if packed { &mut self.packed_switches } else { &mut self.sparse_switches };
        let fixup = map.entry(payload_offset).or_default();
        if fixup.base_offset.is_some() {
            fail!("switch payload at offset {} referenced by more than one instruction", payload_offset);
        }
        fixup.base_offset = Some(branch_offset);
        Ok(())
    }

    fn pool_ref(&self, reference_type: ReferenceType, index: u32) -> Result<Operand, LirError> {
        if index == NO_INDEX {
            fail!("instruction requires a pool index but carries NO_INDEX");
        }
        let kind = match reference_type {
            ReferenceType::String => PoolRefKind::String,
            ReferenceType::Type => PoolRefKind::Type,
            ReferenceType::Field => PoolRefKind::Field,
            ReferenceType::Method => PoolRefKind::Method,
            other => fail!("unexpected index reference type {:?}", other),
        };
        if !self.pool.resolves(kind, index) {
            fail!("unresolvable {:?} pool index {}", kind, index);
        }
        Ok(Operand::PoolRef { kind, index })
    }

    /// Maps one decoded instruction's format onto operand shapes.
    fn decode_op(&mut self, insns: &[u16], pc: usize, offset: u32) -> Result<NodeKind, LirError> {
        let insn = decode_insn(insns, pc)?;
        let mut operands: Vec<Operand> = Vec::new();

        match insn.format {
            Format::Format10x => {}

            Format::Format12x | Format::Format22x | Format::Format32x => {
                operands.push(Operand::Reg(insn.va as u16));
                operands.push(Operand::Reg(insn.vb as u16));
            }

            Format::Format11n | Format::Format21s | Format::Format31i => {
                operands.push(Operand::Reg(insn.va as u16));
                operands.push(Operand::Const32(insn.vb));
            }

            Format::Format11x => {
                operands.push(Operand::Reg(insn.va as u16));
            }

            Format::Format10t | Format::Format20t | Format::Format30t => {
                let label = self.ir.label_at(add_delta(offset, insn.va));
                operands.push(Operand::Target(label));
            }

            Format::Format21t | Format::Format31t => {
                let target_offset = add_delta(offset, insn.vb);
                operands.push(Operand::Reg(insn.va as u16));
                let label = self.ir.label_at(target_offset);
                operands.push(Operand::Target(label));

                match insn.opcode {
                    op::PACKED_SWITCH => {
                        self.ir.label_mut(label).aligned = true;
                        self.record_switch_base(true, target_offset, offset)?;
                    }
                    op::SPARSE_SWITCH => {
                        self.ir.label_mut(label).aligned = true;
                        self.record_switch_base(false, target_offset, offset)?;
                    }
                    op::FILL_ARRAY_DATA => {
                        self.ir.label_mut(label).aligned = true;
                    }
                    _ => {}
                }
            }

            Format::Format23x => {
                operands.push(Operand::Reg(insn.va as u16));
                operands.push(Operand::Reg(insn.vb as u16));
                operands.push(Operand::Reg(insn.vc as u16));
            }

            Format::Format22t => {
                operands.push(Operand::Reg(insn.va as u16));
                operands.push(Operand::Reg(insn.vb as u16));
                let label = self.ir.label_at(add_delta(offset, insn.vc));
                operands.push(Operand::Target(label));
            }

            Format::Format22b | Format::Format22s => {
                operands.push(Operand::Reg(insn.va as u16));
                operands.push(Operand::Reg(insn.vb as u16));
                operands.push(Operand::Const32(insn.vc));
            }

            Format::Format22c => {
                operands.push(Operand::Reg(insn.va as u16));
                operands.push(Operand::Reg(insn.vb as u16));
                operands.push(self.pool_ref(insn.reference_type, insn.vc)?);
            }

            Format::Format21c | Format::Format31c => {
                operands.push(Operand::Reg(insn.va as u16));
                operands.push(self.pool_ref(insn.reference_type, insn.vb)?);
            }

            Format::Format35c => {
                if insn.va > 5 {
                    fail!("argument count {} out of range at code unit {}", insn.va, pc);
                }
                let registers =
                    insn.args[..insn.va as usize].iter().map(|r| *r as u16).collect();
                operands.push(Operand::RegList(registers));
                operands.push(self.pool_ref(insn.reference_type, insn.vb)?);
            }

            Format::Format3rc => {
                operands.push(Operand::RegRange { base: insn.vc as u16, count: insn.va as u16 });
                operands.push(self.pool_ref(insn.reference_type, insn.vb)?);
            }

            // Half-width constants carry only the high bits of the value.
            Format::Format21h => match insn.opcode {
                op::CONST_HIGH16 => {
                    operands.push(Operand::Reg(insn.va as u16));
                    operands.push(Operand::Const32(insn.vb << 16));
                }
                op::CONST_WIDE_HIGH16 => {
                    operands.push(Operand::RegPair(insn.va as u16));
                    operands.push(Operand::Const64((insn.vb as u64) << 48));
                }
                other => fail!("unexpected opcode 0x{:02x} for format 21h", other),
            },

            Format::Format51l => {
                operands.push(Operand::RegPair(insn.va as u16));
                operands.push(Operand::Const64(insn.vb_wide));
            }

            other => {
                fail!(
                    "unexpected bytecode format {:?} for opcode 0x{:02x} at code unit {}",
                    other,
                    insn.opcode,
                    pc
                );
            }
        }

        Ok(NodeKind::Bytecode { opcode: insn.opcode, operands })
    }

    fn decode_try_blocks(&mut self) -> Result<(), LirError> {
        let code = self.code;
        let mut next_id = 1u32;

        for region in &code.tries {
            let begin_id = next_id;
            next_id += 1;
            self.try_begins
                .push(Node::new(region.start_addr, NodeKind::TryBlockBegin { id: begin_id }));

            let mut ix = region.handler_off as usize;
            if ix >= code.handlers.len() {
                fail!(
                    "handler offset {} is outside the {}-byte handler blob",
                    ix,
                    code.handlers.len()
                );
            }

            let count = read_sleb128(&code.handlers, &mut ix)?;
            let mut handlers = Vec::new();
            for _ in 0..count.unsigned_abs() {
                let type_idx = read_uleb128(&code.handlers, &mut ix)?;
                if self.pool.type_at(type_idx).is_none() {
                    fail!("catch handler references unresolvable type index {}", type_idx);
                }
                let address = read_uleb128(&code.handlers, &mut ix)?;
                let target = self.ir.label_at(address);
                handlers.push(CatchHandler { type_idx, target });
            }

            // a non-positive count means |count| typed handlers plus a
            // trailing catch-all (used for finally blocks)
            let catch_all = if count < 1 {
                let address = read_uleb128(&code.handlers, &mut ix)?;
                Some(self.ir.label_at(address))
            } else {
                None
            };

            if handlers.is_empty() && catch_all.is_none() {
                fail!("exception region at offset {} has no handlers", region.start_addr);
            }

            let end_offset = region.start_addr + region.insn_count as u32;
            self.try_ends.push(Node::new(
                end_offset,
                NodeKind::TryBlockEnd { begin: begin_id, handlers, catch_all },
            ));
        }
        Ok(())
    }

    fn decode_debug_info(&mut self, source_file: u32) -> Result<(), LirError> {
        let Some(debug) = &self.code.debug_info else {
            return Ok(());
        };

        // state machine registers
        let mut address: u32 = 0;
        let mut line: i32 = debug.line_start as i32;

        // header and the two initial annotations are always synthesized,
        // even when the encoded stream is empty
        self.dbg_annotations.push(Node::new(
            0,
            NodeKind::DebugInfoHeader { param_names: debug.parameter_names.clone() },
        ));
        self.dbg_annotations.push(Node::new(
            0,
            NodeKind::DebugInfoAnnotation {
                op: DebugOp::SetFile,
                operands: vec![Operand::PoolRef { kind: PoolRefKind::String, index: source_file }],
            },
        ));
        self.dbg_annotations.push(Node::new(
            0,
            NodeKind::DebugInfoAnnotation {
                op: DebugOp::AdvanceLine,
                operands: vec![Operand::Const32(line as u32)],
            },
        ));

        let data = &debug.bytecode;
        let mut ix = 0usize;
        loop {
            let opcode = read_u1(data, &mut ix)?;
            if opcode == DBG_END_SEQUENCE {
                break;
            }

            let annotation: Option<NodeKind> = match opcode {
                DBG_ADVANCE_PC => {
                    address = address.wrapping_add(read_uleb128(data, &mut ix)?);
                    None
                }

                DBG_ADVANCE_LINE => {
                    line = line.wrapping_add(read_sleb128(data, &mut ix)?);
                    if line <= 0 {
                        warn!("debug line advanced to non-positive {} at address {}", line, address);
                    }
                    Some(NodeKind::DebugInfoAnnotation {
                        op: DebugOp::AdvanceLine,
                        operands: vec![Operand::Const32(line as u32)],
                    })
                }

                DBG_START_LOCAL | DBG_START_LOCAL_EXTENDED => {
                    let register = read_uleb128(data, &mut ix)? as u16;
                    let name_idx = p1_index(read_uleb128p1(data, &mut ix)?);
                    let type_idx = p1_index(read_uleb128p1(data, &mut ix)?);
                    let mut operands = vec![
                        Operand::Reg(register),
                        Operand::PoolRef { kind: PoolRefKind::String, index: name_idx },
                        Operand::PoolRef { kind: PoolRefKind::Type, index: type_idx },
                    ];
                    let op = if opcode == DBG_START_LOCAL {
                        DebugOp::StartLocal
                    } else {
                        let sig_idx = p1_index(read_uleb128p1(data, &mut ix)?);
                        operands
                            .push(Operand::PoolRef { kind: PoolRefKind::String, index: sig_idx });
                        DebugOp::StartLocalExtended
                    };
                    Some(NodeKind::DebugInfoAnnotation { op, operands })
                }

                DBG_END_LOCAL | DBG_RESTART_LOCAL => {
                    let register = read_uleb128(data, &mut ix)? as u16;
                    let op = if opcode == DBG_END_LOCAL {
                        DebugOp::EndLocal
                    } else {
                        DebugOp::RestartLocal
                    };
                    Some(NodeKind::DebugInfoAnnotation {
                        op,
                        operands: vec![Operand::Reg(register)],
                    })
                }

                DBG_SET_PROLOGUE_END => Some(NodeKind::DebugInfoAnnotation {
                    op: DebugOp::PrologueEnd,
                    operands: Vec::new(),
                }),

                DBG_SET_EPILOGUE_BEGIN => Some(NodeKind::DebugInfoAnnotation {
                    op: DebugOp::EpilogueBegin,
                    operands: Vec::new(),
                }),

                DBG_SET_FILE => {
                    let name_idx = p1_index(read_uleb128p1(data, &mut ix)?);
                    Some(NodeKind::DebugInfoAnnotation {
                        op: DebugOp::SetFile,
                        operands: vec![Operand::PoolRef {
                            kind: PoolRefKind::String,
                            index: name_idx,
                        }],
                    })
                }

                // special opcode: combined line and address advance
                _ => {
                    let adjusted = (opcode - DBG_FIRST_SPECIAL) as i32;
                    line = line.wrapping_add(DBG_LINE_BASE + adjusted % DBG_LINE_RANGE);
                    address = address.wrapping_add((adjusted / DBG_LINE_RANGE) as u32);
                    if line <= 0 {
                        warn!("debug line advanced to non-positive {} at address {}", line, address);
                    }
                    Some(NodeKind::DebugInfoAnnotation {
                        op: DebugOp::AdvanceLine,
                        operands: vec![Operand::Const32(line as u32)],
                    })
                }
            };

            if let Some(kind) = annotation {
                self.dbg_annotations.push(Node::new(address, kind));
            }
        }
        Ok(())
    }

    fn fixup_switches(&mut self) -> Result<(), LirError> {
        let packed: Vec<(u32, SwitchFixup)> = self.packed_switches.drain().collect();
        for (payload_offset, fixup) in packed {
            let (node_index, base) = check_fixup(payload_offset, &fixup, "packed-switch")?;
            self.fixup_packed_switch(node_index, payload_offset, base)?;
        }

        let sparse: Vec<(u32, SwitchFixup)> = self.sparse_switches.drain().collect();
        for (payload_offset, fixup) in sparse {
            let (node_index, base) = check_fixup(payload_offset, &fixup, "sparse-switch")?;
            self.fixup_sparse_switch(node_index, payload_offset, base)?;
        }
        Ok(())
    }

    fn fixup_packed_switch(
        &mut self,
        node_index: usize,
        payload_offset: u32,
        base: u32,
    ) -> Result<(), LirError> {
        let code = self.code;
        let insns = &code.insns;
        let pc = payload_offset as usize;

        if word_at(insns, pc)? != PACKED_SWITCH_IDENT {
            fail!("no packed-switch signature at offset {}", payload_offset);
        }
        let size = word_at(insns, pc + 1)? as usize;
        let first_key = dword_at(insns, pc + 2)? as i32;

        let mut targets = Vec::with_capacity(size);
        for i in 0..size {
            let rel = dword_at(insns, pc + 4 + i * 2)?;
            targets.push(self.ir.label_at(add_delta(base, rel)));
        }

        match &mut self.ir.nodes[node_index].kind {
            NodeKind::PackedSwitchPayload { first_key: fk, targets: t } => {
                if !t.is_empty() {
                    fail!("packed-switch payload at offset {} fixed up twice", payload_offset);
                }
                *fk = first_key;
                *t = targets;
            }
            _ => fail!("fixup target at offset {} is not a packed-switch payload", payload_offset),
        }
        Ok(())
    }

    fn fixup_sparse_switch(
        &mut self,
        node_index: usize,
        payload_offset: u32,
        base: u32,
    ) -> Result<(), LirError> {
        let code = self.code;
        let insns = &code.insns;
        let pc = payload_offset as usize;

        if word_at(insns, pc)? != SPARSE_SWITCH_IDENT {
            fail!("no sparse-switch signature at offset {}", payload_offset);
        }
        let size = word_at(insns, pc + 1)? as usize;

        let mut cases = Vec::with_capacity(size);
        for i in 0..size {
            let key = dword_at(insns, pc + 2 + i * 2)? as i32;
            let rel = dword_at(insns, pc + 2 + size * 2 + i * 2)?;
            let target = self.ir.label_at(add_delta(base, rel));
            cases.push((key, target));
        }

        match &mut self.ir.nodes[node_index].kind {
            NodeKind::SparseSwitchPayload { cases: c } => {
                if !c.is_empty() {
                    fail!("sparse-switch payload at offset {} fixed up twice", payload_offset);
                }
                *c = cases;
            }
            _ => fail!("fixup target at offset {} is not a sparse-switch payload", payload_offset),
        }
        Ok(())
    }
}

fn check_fixup(
    payload_offset: u32,
    fixup: &SwitchFixup,
    what: &str,
) -> Result<(usize, u32), LirError> {
    let Some(node_index) = fixup.node else {
        fail!("{} instruction references offset {} but no payload is there", what, payload_offset);
    };
    let Some(base) = fixup.base_offset else {
        fail!("{} payload at offset {} has no referencing instruction", what, payload_offset);
    };
    Ok((node_index, base))
}

/// Array payloads are kept as their raw bytes, header included.
fn decode_array_data(
    insns: &[u16],
    pc: usize,
    offset: u32,
    width: usize,
) -> Result<NodeKind, LirError> {
    if offset % 2 != 0 {
        fail!("array-data payload at unaligned offset {}", offset);
    }
    if pc + width > insns.len() {
        fail!("truncated array-data payload at offset {}", offset);
    }

    let mut data = Vec::with_capacity(width * 2);
    for i in 0..width {
        let w = insns[pc + i];
        data.push((w & 0x00ff) as u8);
        data.push((w >> 8) as u8);
    }
    Ok(NodeKind::ArrayDataPayload { data })
}
