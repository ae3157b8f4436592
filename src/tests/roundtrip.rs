use crate::code_item::{CodeItem, DebugInfoItem, TryRegion};
use crate::ir::{MethodIr, Node, NodeKind, Operand};
use crate::opcodes::op;
use crate::pool::{ConstantPool, NO_INDEX};

fn pool_with_exception_type() -> ConstantPool {
    let mut pool = ConstantPool::new();
    pool.add_type_desc("Ljava/lang/Exception;");
    pool
}

#[test]
fn branchy_method_with_tries_and_debug_info_reassembles_byte_identical() {
    // const/4 v0, #2; const/16 v1, #300; if-eqz v0, :8; add-int v2, v0, v1;
    // goto :8; return-void -- protected region [0, 5) with a typed handler
    // and a catch-all at 8, one line-table row at address 3
    let code = CodeItem {
        registers_size: 4,
        ins_size: 1,
        outs_size: 2,
        insns: vec![0x2012, 0x0113, 0x012c, 0x0038, 0x0005, 0x0290, 0x0100, 0x0128, 0x000e],
        tries: vec![TryRegion { start_addr: 0, insn_count: 5, handler_off: 1 }],
        handlers: vec![0x01, 0x7f, 0x00, 0x08, 0x08],
        debug_info: Some(DebugInfoItem {
            line_start: 3,
            parameter_names: vec![NO_INDEX],
            bytecode: vec![0x3c, 0x00], // special: line +1, address +3
        }),
    };

    let pool = pool_with_exception_type();
    let mut ir = MethodIr::disassemble(&code, NO_INDEX, &pool).unwrap();
    let assembled = ir.assemble(&pool).unwrap();
    assert_eq!(assembled, code);
}

#[test]
fn switch_payloads_and_array_data_reassemble_byte_identical() {
    // packed-switch v0 -> :10; sparse-switch v1 -> :18; fill-array-data v0
    // -> :28; return-void; then the three payloads
    let insns = vec![
        0x002b, 10, 0, // packed-switch v0, +10
        0x012c, 15, 0, // sparse-switch v1, +15
        0x0026, 22, 0, // fill-array-data v0, +22
        0x000e, // return-void at 9
        // packed payload: first_key -1, two targets -> 9
        0x0100, 2, 0xffff, 0xffff, 9, 0, 9, 0,
        // sparse payload: keys -5 and 100, both -> 9 (relative to base 3)
        0x0200, 2, 0xfffb, 0xffff, 100, 0, 6, 0, 6, 0,
        // array payload: four u8 elements de ad be ef
        0x0300, 1, 4, 0, 0xadde, 0xefbe,
    ];
    let code = CodeItem {
        registers_size: 2,
        ins_size: 0,
        outs_size: 0,
        insns,
        tries: Vec::new(),
        handlers: Vec::new(),
        debug_info: None,
    };

    let pool = ConstantPool::new();
    let mut ir = MethodIr::disassemble(&code, NO_INDEX, &pool).unwrap();

    // sanity on the decoded structure before re-encoding
    let cases = ir
        .nodes
        .iter()
        .find_map(|n| match &n.kind {
            NodeKind::SparseSwitchPayload { cases } => Some(cases.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(cases.len(), 2);
    assert_eq!(cases[0].0, -5);
    assert_eq!(cases[1].0, 100);
    assert_eq!(ir.label(cases[0].1).offset, 9);

    let assembled = ir.assemble(&pool).unwrap();
    assert_eq!(assembled, code);
}

#[test]
fn local_variable_debug_stream_reassembles_byte_identical() {
    let mut pool = ConstantPool::new();
    let name_idx = pool.add_string("x");
    pool.add_type_desc("I");
    let file_idx = pool.add_string("Foo.java");
    assert_eq!(name_idx, 0);
    assert_eq!(file_idx, 2);

    let mut insns = vec![0u16; 9];
    insns[8] = 0x000e;
    let code = CodeItem {
        registers_size: 2,
        ins_size: 0,
        outs_size: 0,
        insns,
        tries: Vec::new(),
        handlers: Vec::new(),
        debug_info: Some(DebugInfoItem {
            line_start: 10,
            parameter_names: vec![],
            bytecode: vec![
                0x07, // prologue end
                0x03, 0x01, 0x01, 0x01, // start local v1, "x", I
                0x4b, // special: line +1, address +4
                0x05, 0x01, // end local v1
                0x09, 0x03, // set file "Foo.java"
                0x00,
            ],
        }),
    };

    let mut ir = MethodIr::disassemble(&code, NO_INDEX, &pool).unwrap();
    let assembled = ir.assemble(&pool).unwrap();
    assert_eq!(assembled, code);
}

#[test]
fn empty_debug_stream_still_yields_header_and_initial_annotations() {
    let code = CodeItem {
        registers_size: 1,
        ins_size: 0,
        outs_size: 0,
        insns: vec![0x000e],
        tries: Vec::new(),
        handlers: Vec::new(),
        debug_info: Some(DebugInfoItem {
            line_start: 42,
            parameter_names: vec![],
            bytecode: vec![0x00],
        }),
    };
    let pool = ConstantPool::new();
    let mut ir = MethodIr::disassemble(&code, NO_INDEX, &pool).unwrap();

    let kinds: Vec<&NodeKind> = ir
        .nodes
        .iter()
        .filter(|n| {
            matches!(
                n.kind,
                NodeKind::DebugInfoHeader { .. } | NodeKind::DebugInfoAnnotation { .. }
            )
        })
        .map(|n| &n.kind)
        .collect();
    assert_eq!(kinds.len(), 3); // header + initial source file + initial line

    let assembled = ir.assemble(&pool).unwrap();
    assert_eq!(assembled.debug_info, code.debug_info);
}

#[test]
fn inserting_an_instruction_realigns_the_switch_payload() {
    // packed-switch v0 -> :4; return-void; payload with one case -> 3
    let code = CodeItem {
        registers_size: 1,
        ins_size: 0,
        outs_size: 0,
        insns: vec![0x002b, 4, 0, 0x000e, 0x0100, 1, 7, 0, 3, 0],
        tries: Vec::new(),
        handlers: Vec::new(),
        debug_info: None,
    };
    let pool = ConstantPool::new();
    let mut ir = MethodIr::disassemble(&code, NO_INDEX, &pool).unwrap();

    // splice a nop in front of the return: the payload shifts to an odd
    // offset and the assembler must pad it back to alignment
    let return_pos = ir
        .nodes
        .iter()
        .position(|n| matches!(&n.kind, NodeKind::Bytecode { opcode, .. } if *opcode == op::RETURN_VOID))
        .unwrap();
    ir.nodes.insert(
        return_pos,
        Node::new(0, NodeKind::Bytecode { opcode: op::NOP, operands: vec![] }),
    );

    let assembled = ir.assemble(&pool).unwrap();
    assert_eq!(assembled.insns.len(), 12);
    assert_eq!(assembled.insns[5], 0x0000); // alignment nop
    assert_eq!(assembled.insns[6], 0x0100); // payload signature at 6

    // the re-encoded stream must decode again with the same logical shape
    let mut ir2 = MethodIr::disassemble(&assembled, NO_INDEX, &pool).unwrap();
    let targets = ir2
        .nodes
        .iter()
        .find_map(|n| match &n.kind {
            NodeKind::PackedSwitchPayload { first_key, targets } => {
                assert_eq!(*first_key, 7);
                Some(targets.clone())
            }
            _ => None,
        })
        .unwrap();
    assert_eq!(targets.len(), 1);
    // the case target still points at the code-unit before return-void
    assert_eq!(ir2.label(targets[0]).offset, 3);
    let switch_label = ir2.label_for_offset(6).unwrap();
    assert!(ir2.label(switch_label).aligned);

    // and a second assembly is a fixed point
    let reassembled = ir2.assemble(&pool).unwrap();
    assert_eq!(reassembled, assembled);
}

#[test]
fn overflowing_branch_delta_is_rejected() {
    let pool = ConstantPool::new();
    let mut ir = MethodIr::new(1, 0, 0);
    let label = ir.label_at(0);
    ir.nodes.push(Node::new(
        0,
        NodeKind::Bytecode { opcode: op::GOTO, operands: vec![Operand::Target(label)] },
    ));
    for _ in 0..200 {
        ir.nodes.push(Node::new(0, NodeKind::Bytecode { opcode: op::NOP, operands: vec![] }));
    }
    ir.nodes.push(Node::new(0, NodeKind::Label(label)));
    ir.nodes.push(Node::new(
        0,
        NodeKind::Bytecode { opcode: op::RETURN_VOID, operands: vec![] },
    ));

    let err = ir.assemble(&pool).unwrap_err();
    assert!(err.to_string().contains("does not fit"));
}

#[test]
fn half_width_constants_keep_their_shifted_bits() {
    let code = CodeItem {
        registers_size: 2,
        ins_size: 0,
        outs_size: 0,
        // const/high16 v0, #0x7fc00000; const-wide/high16 v0, #0x4045<<48
        insns: vec![0x0015, 0x7fc0, 0x0019, 0x4045, 0x000e],
        tries: Vec::new(),
        handlers: Vec::new(),
        debug_info: None,
    };
    let pool = ConstantPool::new();
    let mut ir = MethodIr::disassemble(&code, NO_INDEX, &pool).unwrap();

    let consts: Vec<&NodeKind> = ir
        .nodes
        .iter()
        .filter(|n| matches!(n.kind, NodeKind::Bytecode { opcode, .. } if opcode == op::CONST_HIGH16 || opcode == op::CONST_WIDE_HIGH16))
        .map(|n| &n.kind)
        .collect();

    let NodeKind::Bytecode { operands, .. } = consts[0] else { unreachable!() };
    assert_eq!(operands[1], Operand::Const32(0x7fc0_0000));
    let NodeKind::Bytecode { operands, .. } = consts[1] else { unreachable!() };
    assert_eq!(operands[1], Operand::Const64(0x4045_0000_0000_0000));

    let assembled = ir.assemble(&pool).unwrap();
    assert_eq!(assembled, code);
}
