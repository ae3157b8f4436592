use crate::code_item::{CodeItem, DebugInfoItem, TryRegion};
use crate::ir::{DebugOp, MethodIr, Node, NodeKind, Operand};
use crate::pool::{ConstantPool, NO_INDEX};

fn plain_code(insns: Vec<u16>) -> CodeItem {
    CodeItem {
        registers_size: 4,
        ins_size: 0,
        outs_size: 0,
        insns,
        tries: Vec::new(),
        handlers: Vec::new(),
        debug_info: None,
    }
}

fn pool_with_exception_type() -> ConstantPool {
    let mut pool = ConstantPool::new();
    pool.add_type_desc("Ljava/lang/Exception;");
    pool
}

fn debug_annotations(ir: &MethodIr) -> Vec<&Node> {
    ir.nodes
        .iter()
        .filter(|n| {
            matches!(n.kind, NodeKind::DebugInfoAnnotation { .. } | NodeKind::DebugInfoHeader { .. })
        })
        .collect()
}

#[test]
fn packed_switch_fixup_resolves_targets_against_the_branch_offset() {
    // branch at 10, payload at 20 with first_key=5 and targets 30 and 40
    let mut insns = vec![0u16; 41];
    insns[10] = 0x002b; // packed-switch v0, +10
    insns[11] = 10;
    insns[12] = 0;
    insns[20] = 0x0100; // payload signature
    insns[21] = 2; // size
    insns[22] = 5; // first_key
    insns[23] = 0;
    insns[24] = 20; // +20 relative to the branch -> 30
    insns[25] = 0;
    insns[26] = 30; // -> 40
    insns[27] = 0;
    insns[40] = 0x000e; // return-void

    let pool = ConstantPool::new();
    let ir = MethodIr::disassemble(&plain_code(insns), NO_INDEX, &pool).unwrap();

    let payload = ir
        .nodes
        .iter()
        .find_map(|n| match &n.kind {
            NodeKind::PackedSwitchPayload { first_key, targets } => Some((*first_key, targets)),
            _ => None,
        })
        .expect("payload node");
    let (first_key, targets) = payload;
    assert_eq!(first_key, 5);
    assert_eq!(targets.len(), 2);
    assert_eq!(ir.label(targets[0]).offset, 30);
    assert_eq!(ir.label(targets[1]).offset, 40);

    // the branch's own target label (the payload) is alignment-marked at
    // decode time, before fixup runs
    let payload_label = ir.label_for_offset(20).expect("payload label");
    assert!(ir.label(payload_label).aligned);
    assert_eq!(ir.label(payload_label).ref_count, 1);
    for offset in [30, 40] {
        let label = ir.label_for_offset(offset).expect("case label");
        assert!(!ir.label(label).aligned);
        assert_eq!(ir.label(label).ref_count, 1);
    }

    // ids ascend by offset
    assert_eq!(ir.label(payload_label).id, 1);
    assert_eq!(ir.label(ir.label_for_offset(30).unwrap()).id, 2);
    assert_eq!(ir.label(ir.label_for_offset(40).unwrap()).id, 3);

    // each case label node sits immediately before its target instruction
    let pos_label = ir
        .nodes
        .iter()
        .position(|n| matches!(n.kind, NodeKind::Label(id) if ir.label(id).offset == 30))
        .unwrap();
    assert!(matches!(ir.nodes[pos_label + 1].kind, NodeKind::Bytecode { .. }));
    assert_eq!(ir.nodes[pos_label + 1].offset, 30);
}

#[test]
fn exception_region_with_catch_all_emits_begin_and_end_markers() {
    let mut insns = vec![0u16; 11];
    insns[10] = 0x000e;

    let code = CodeItem {
        tries: vec![TryRegion { start_addr: 0, insn_count: 10, handler_off: 1 }],
        // one entry: count -1 (one typed handler plus catch-all)
        handlers: vec![0x01, 0x7f, 0x00, 0x04, 0x06],
        ..plain_code(insns)
    };

    let pool = pool_with_exception_type();
    let ir = MethodIr::disassemble(&code, NO_INDEX, &pool).unwrap();

    let begins: Vec<&Node> =
        ir.nodes.iter().filter(|n| matches!(n.kind, NodeKind::TryBlockBegin { .. })).collect();
    assert_eq!(begins.len(), 1);
    assert_eq!(begins[0].offset, 0);

    let ends: Vec<&Node> =
        ir.nodes.iter().filter(|n| matches!(n.kind, NodeKind::TryBlockEnd { .. })).collect();
    assert_eq!(ends.len(), 1);
    assert_eq!(ends[0].offset, 10);
    let NodeKind::TryBlockEnd { begin, handlers, catch_all } = &ends[0].kind else {
        unreachable!()
    };
    assert_eq!(*begin, 1);
    assert_eq!(handlers.len(), 1);
    assert_eq!(handlers[0].type_idx, 0);
    assert_eq!(ir.label(handlers[0].target).offset, 4);
    let catch_all = catch_all.expect("catch-all");
    assert_eq!(ir.label(catch_all).offset, 6);
}

#[test]
fn truncated_handler_entry_is_fatal() {
    let mut insns = vec![0u16; 3];
    insns[2] = 0x000e;
    let code = CodeItem {
        tries: vec![TryRegion { start_addr: 0, insn_count: 2, handler_off: 1 }],
        handlers: vec![0x01, 0x00], // count 0 but the catch-all byte is missing
        ..plain_code(insns)
    };
    let pool = pool_with_exception_type();
    assert!(MethodIr::disassemble(&code, NO_INDEX, &pool).is_err());
}

#[test]
fn try_block_without_any_handler_is_rejected_on_assembly() {
    let pool = ConstantPool::new();
    let mut ir = MethodIr::new(1, 0, 0);
    ir.nodes.push(Node::new(0, NodeKind::TryBlockBegin { id: 1 }));
    ir.nodes.push(Node::new(
        0,
        NodeKind::Bytecode { opcode: 0x0e, operands: vec![] },
    ));
    ir.nodes.push(Node::new(
        1,
        NodeKind::TryBlockEnd { begin: 1, handlers: vec![], catch_all: None },
    ));

    let err = ir.assemble(&pool).unwrap_err();
    assert!(err.to_string().contains("no handlers"));
}

#[test]
fn branches_to_one_offset_share_a_label() {
    // if-eqz and goto both land on the return at 4
    let insns = vec![0x0038, 0x0004, 0x0228, 0x0000, 0x000e];
    let pool = ConstantPool::new();
    let ir = MethodIr::disassemble(&plain_code(insns), NO_INDEX, &pool).unwrap();

    assert_eq!(ir.label_count(), 1);
    let label = ir.label_for_offset(4).unwrap();
    assert_eq!(ir.label(label).ref_count, 2);
    assert_eq!(ir.label(label).id, 1);
}

#[test]
fn two_branches_into_one_payload_are_rejected() {
    let mut insns = vec![0u16; 14];
    insns[0] = 0x002b; // packed-switch v0, +8 -> 8
    insns[1] = 8;
    insns[3] = 0x002b; // packed-switch v0, +5 -> 8
    insns[4] = 5;
    insns[8] = 0x0100; // payload, one case
    insns[9] = 1;
    insns[12] = 2;

    let pool = ConstantPool::new();
    let err = MethodIr::disassemble(&plain_code(insns), NO_INDEX, &pool).unwrap_err();
    assert!(err.to_string().contains("more than one"));
}

#[test]
fn payload_without_a_referencing_branch_is_rejected() {
    let insns = vec![0x000e, 0x0000, 0x0100, 0x0000, 0x0000, 0x0000];
    let pool = ConstantPool::new();
    let err = MethodIr::disassemble(&plain_code(insns), NO_INDEX, &pool).unwrap_err();
    assert!(err.to_string().contains("no referencing instruction"));
}

#[test]
fn branch_into_a_missing_payload_is_rejected() {
    let insns = vec![0x002b, 0x0004, 0x0000, 0x000e, 0x000e];
    let pool = ConstantPool::new();
    let err = MethodIr::disassemble(&plain_code(insns), NO_INDEX, &pool).unwrap_err();
    assert!(err.to_string().contains("no payload"));
}

#[test]
fn payload_at_odd_offset_is_rejected() {
    // return-void, then a packed-switch payload signature at offset 1
    let insns = vec![0x000e, 0x0100, 0x0000, 0x0000, 0x0000];
    let pool = ConstantPool::new();
    let err = MethodIr::disassemble(&plain_code(insns), NO_INDEX, &pool).unwrap_err();
    assert!(err.to_string().contains("unaligned"));
}

#[test]
fn debug_replay_reconstructs_lines_locals_and_markers() {
    let mut pool = ConstantPool::new();
    let name_idx = pool.add_string("x");
    let type_idx = pool.add_type_desc("I");

    let mut insns = vec![0u16; 5];
    insns[4] = 0x000e;
    let code = CodeItem {
        debug_info: Some(DebugInfoItem {
            line_start: 7,
            parameter_names: vec![name_idx],
            bytecode: vec![
                0x07, // prologue end
                0x01, 0x02, // advance pc by 2
                0x1f, // special: line +2, address +1
                0x03, 0x00, 0x01, 0x01, // start local v0, "x", I
                0x00,
            ],
        }),
        ..plain_code(insns)
    };

    let ir = MethodIr::disassemble(&code, NO_INDEX, &pool).unwrap();
    let nodes = debug_annotations(&ir);
    assert_eq!(nodes.len(), 6);

    assert!(matches!(&nodes[0].kind, NodeKind::DebugInfoHeader { param_names } if param_names == &vec![name_idx]));
    assert!(
        matches!(&nodes[1].kind, NodeKind::DebugInfoAnnotation { op: DebugOp::SetFile, operands }
            if operands == &vec![Operand::PoolRef { kind: crate::ir::PoolRefKind::String, index: NO_INDEX }])
    );
    assert!(
        matches!(&nodes[2].kind, NodeKind::DebugInfoAnnotation { op: DebugOp::AdvanceLine, operands }
            if operands[0].as_i32() == Some(7))
    );
    assert_eq!(nodes[2].offset, 0);

    assert!(matches!(&nodes[3].kind, NodeKind::DebugInfoAnnotation { op: DebugOp::PrologueEnd, .. }));
    assert_eq!(nodes[3].offset, 0);

    // special opcode 0x1f: adjusted 21 -> line 7+2=9, address 2+1=3
    let NodeKind::DebugInfoAnnotation { op: DebugOp::AdvanceLine, operands } = &nodes[4].kind
    else {
        panic!("expected line annotation");
    };
    assert_eq!(operands[0].as_i32(), Some(9));
    assert_eq!(nodes[4].offset, 3);

    let NodeKind::DebugInfoAnnotation { op: DebugOp::StartLocal, operands } = &nodes[5].kind
    else {
        panic!("expected start-local annotation");
    };
    assert_eq!(nodes[5].offset, 3);
    assert_eq!(operands[0], Operand::Reg(0));
    assert_eq!(
        operands[1],
        Operand::PoolRef { kind: crate::ir::PoolRefKind::String, index: name_idx }
    );
    assert_eq!(operands[2], Operand::PoolRef { kind: crate::ir::PoolRefKind::Type, index: type_idx });
}

#[test]
fn debug_replay_is_deterministic() {
    let mut insns = vec![0u16; 6];
    insns[5] = 0x000e;
    let code = CodeItem {
        debug_info: Some(DebugInfoItem {
            line_start: 1,
            parameter_names: vec![],
            bytecode: vec![0x0a + 4, 0x02, 0x05, 0x1d, 0x00],
        }),
        ..plain_code(insns)
    };
    let pool = ConstantPool::new();

    let first = MethodIr::disassemble(&code, NO_INDEX, &pool).unwrap();
    let second = MethodIr::disassemble(&code, NO_INDEX, &pool).unwrap();

    let a: Vec<Node> = debug_annotations(&first).into_iter().cloned().collect();
    let b: Vec<Node> = debug_annotations(&second).into_iter().cloned().collect();
    assert_eq!(a, b);
}

#[test]
fn non_positive_line_is_tolerated() {
    let mut insns = vec![0u16; 2];
    insns[1] = 0x000e;
    let code = CodeItem {
        debug_info: Some(DebugInfoItem {
            line_start: 1,
            parameter_names: vec![],
            // advance line by -5: line becomes -4, logged but not fatal
            bytecode: vec![0x02, 0x7b, 0x00],
        }),
        ..plain_code(insns)
    };
    let pool = ConstantPool::new();
    let ir = MethodIr::disassemble(&code, NO_INDEX, &pool).unwrap();

    let line = ir
        .nodes
        .iter()
        .filter_map(|n| match &n.kind {
            NodeKind::DebugInfoAnnotation { op: DebugOp::AdvanceLine, operands } => {
                operands[0].as_i32()
            }
            _ => None,
        })
        .last()
        .unwrap();
    assert_eq!(line, -4);
}

#[test]
fn tied_offsets_interleave_in_the_fixed_category_order() {
    // branch to 2, try region ending at 2, line annotation at 2
    let insns = vec![0x0038, 0x0002, 0x000e];
    let code = CodeItem {
        tries: vec![TryRegion { start_addr: 0, insn_count: 2, handler_off: 1 }],
        handlers: vec![0x01, 0x00, 0x02], // catch-all only, at address 2
        debug_info: Some(DebugInfoItem {
            line_start: 1,
            parameter_names: vec![],
            // advance pc by 2, then line +1
            bytecode: vec![0x01, 0x02, 0x0a + 5, 0x00],
        }),
        ..plain_code(insns)
    };
    let pool = ConstantPool::new();
    let ir = MethodIr::disassemble(&code, NO_INDEX, &pool).unwrap();

    let pos = |pred: &dyn Fn(&NodeKind) -> bool| {
        ir.nodes.iter().position(|n| n.offset == 2 && pred(&n.kind)).unwrap()
    };
    let try_end = pos(&|k| matches!(k, NodeKind::TryBlockEnd { .. }));
    let label = pos(&|k| matches!(k, NodeKind::Label(_)));
    let annotation = pos(&|k| matches!(k, NodeKind::DebugInfoAnnotation { .. }));
    let insn = pos(&|k| matches!(k, NodeKind::Bytecode { .. }));

    assert!(try_end < label);
    assert!(label < annotation);
    assert!(annotation < insn);

    // catch-all and branch both reference offset 2
    let target = ir.label_for_offset(2).unwrap();
    assert_eq!(ir.label(target).ref_count, 2);
}

#[test]
fn fill_array_data_keeps_raw_payload_bytes() {
    let mut insns = vec![0u16; 10];
    insns[0] = 0x0026; // fill-array-data v0, +4
    insns[1] = 4;
    insns[3] = 0x000e;
    insns[4] = 0x0300; // payload: element width 1, 3 elements
    insns[5] = 1;
    insns[6] = 3;
    insns[7] = 0;
    insns[8] = 0x0201; // bytes 01 02
    insns[9] = 0x0003; // byte 03 + pad

    let pool = ConstantPool::new();
    let ir = MethodIr::disassemble(&plain_code(insns), NO_INDEX, &pool).unwrap();

    let data = ir
        .nodes
        .iter()
        .find_map(|n| match &n.kind {
            NodeKind::ArrayDataPayload { data } => Some(data),
            _ => None,
        })
        .expect("array-data node");
    assert_eq!(data.len(), 12);
    assert_eq!(&data[..2], &[0x00, 0x03]); // signature, little-endian
    assert_eq!(&data[8..], &[0x01, 0x02, 0x03, 0x00]);

    assert!(ir.label(ir.label_for_offset(4).unwrap()).aligned);
}

#[test]
fn unresolvable_pool_index_is_fatal() {
    // const-string v0, string@0 with an empty pool
    let insns = vec![0x001a, 0x0000];
    let pool = ConstantPool::new();
    let err = MethodIr::disassemble(&plain_code(insns), NO_INDEX, &pool).unwrap_err();
    assert!(err.to_string().contains("unresolvable"));
}

#[test]
fn unknown_opcode_is_fatal() {
    let insns = vec![0x003e, 0x000e];
    let pool = ConstantPool::new();
    assert!(MethodIr::disassemble(&plain_code(insns), NO_INDEX, &pool).is_err());
}
