//! Read-only IR traversal and text rendering.
//!
//! [`walk`] dispatches every node kind to exactly one visitor method; the
//! match is exhaustive, so adding a node kind without extending the visitor
//! fails at compile time. [`Printer`] is the built-in consumer producing a
//! smali-flavored listing.

use crate::ir::{CatchHandler, DebugOp, LabelData, LabelId, MethodIr, Node, NodeKind, Operand, PoolRefKind};
use crate::opcodes::Opcode;
use crate::pool::{ConstantPool, NO_INDEX};

/// One visit method per node kind; all default to no-ops so a consumer only
/// overrides what it cares about. Visitors never mutate the IR.
pub trait Visitor {
    fn visit_bytecode(&mut self, _node: &Node, _opcode: u8, _operands: &[Operand]) {}
    fn visit_packed_switch(&mut self, _node: &Node, _first_key: i32, _targets: &[LabelId]) {}
    fn visit_sparse_switch(&mut self, _node: &Node, _cases: &[(i32, LabelId)]) {}
    fn visit_array_data(&mut self, _node: &Node, _data: &[u8]) {}
    fn visit_label(&mut self, _node: &Node, _label: &LabelData) {}
    fn visit_try_begin(&mut self, _node: &Node, _id: u32) {}
    fn visit_try_end(
        &mut self,
        _node: &Node,
        _begin: u32,
        _handlers: &[CatchHandler],
        _catch_all: Option<LabelId>,
    ) {
    }
    fn visit_debug_header(&mut self, _node: &Node, _param_names: &[u32]) {}
    fn visit_debug_annotation(&mut self, _node: &Node, _op: DebugOp, _operands: &[Operand]) {}
}

/// Drives a visitor over the merged stream in order.
pub fn walk(ir: &MethodIr, visitor: &mut dyn Visitor) {
    for node in &ir.nodes {
        match &node.kind {
            NodeKind::Bytecode { opcode, operands } => {
                visitor.visit_bytecode(node, *opcode, operands)
            }
            NodeKind::PackedSwitchPayload { first_key, targets } => {
                visitor.visit_packed_switch(node, *first_key, targets)
            }
            NodeKind::SparseSwitchPayload { cases } => visitor.visit_sparse_switch(node, cases),
            NodeKind::ArrayDataPayload { data } => visitor.visit_array_data(node, data),
            NodeKind::Label(id) => visitor.visit_label(node, ir.label(*id)),
            NodeKind::TryBlockBegin { id } => visitor.visit_try_begin(node, *id),
            NodeKind::TryBlockEnd { begin, handlers, catch_all } => {
                visitor.visit_try_end(node, *begin, handlers, *catch_all)
            }
            NodeKind::DebugInfoHeader { param_names } => {
                visitor.visit_debug_header(node, param_names)
            }
            NodeKind::DebugInfoAnnotation { op, operands } => {
                visitor.visit_debug_annotation(node, *op, operands)
            }
        }
    }
}

/// Maps raw register numbers to `vN`/`pN` names from the method's register
/// and parameter counts.
pub struct RegNamer {
    pub registers_size: u16,
    pub ins_size: u16,
}

impl RegNamer {
    pub fn name(&self, raw: u16) -> String {
        let params_base = self.registers_size.saturating_sub(self.ins_size);
        if raw >= params_base {
            format!("p{}", raw - params_base)
        } else {
            format!("v{}", raw)
        }
    }
}

/// Renders a method IR as text.
pub fn render(ir: &MethodIr, pool: &ConstantPool) -> String {
    let mut printer = Printer::new(ir, pool);
    walk(ir, &mut printer);
    printer.finish()
}

pub struct Printer<'a> {
    ir: &'a MethodIr,
    pool: &'a ConstantPool,
    regs: RegNamer,
    out: String,
}

impl<'a> Printer<'a> {
    pub fn new(ir: &'a MethodIr, pool: &'a ConstantPool) -> Printer<'a> {
        let mut out = String::new();
        out.push_str(&format!(".registers {}\n", ir.registers_size));
        Printer {
            ir,
            pool,
            regs: RegNamer { registers_size: ir.registers_size, ins_size: ir.ins_size },
            out,
        }
    }

    pub fn finish(self) -> String {
        self.out
    }

    fn label_name(&self, id: LabelId) -> String {
        format!(":L{}", self.ir.label(id).id)
    }

    fn string_ref(&self, index: u32) -> String {
        if index == NO_INDEX {
            return String::from("<none>");
        }
        match self.pool.string_at(index) {
            Some(s) => format!("\"{}\"", s),
            None => format!("string@{}", index),
        }
    }

    fn type_ref(&self, index: u32) -> String {
        if index == NO_INDEX {
            return String::from("<none>");
        }
        match self.pool.type_at(index) {
            Some(d) => d.to_string(),
            None => format!("type@{}", index),
        }
    }

    fn operand(&self, operand: &Operand) -> String {
        match operand {
            Operand::Reg(r) | Operand::RegPair(r) => self.regs.name(*r),
            Operand::RegList(list) => {
                let names: Vec<String> = list.iter().map(|r| self.regs.name(*r)).collect();
                format!("{{{}}}", names.join(", "))
            }
            Operand::RegRange { base, count } => {
                if *count == 0 {
                    String::from("{}")
                } else {
                    format!("{{{} .. {}}}", self.regs.name(*base), self.regs.name(base + count - 1))
                }
            }
            Operand::Const32(bits) => format!("#{}", *bits as i32),
            Operand::Const64(bits) => format!("#{}L", *bits as i64),
            Operand::Target(label) => self.label_name(*label),
            Operand::PoolRef { kind: PoolRefKind::String, index } => self.string_ref(*index),
            Operand::PoolRef { kind: PoolRefKind::Type, index } => self.type_ref(*index),
            Operand::PoolRef { kind: PoolRefKind::Field, index } => self
                .pool
                .display_field(*index)
                .unwrap_or_else(|| format!("field@{}", index)),
            Operand::PoolRef { kind: PoolRefKind::Method, index } => self
                .pool
                .display_method(*index)
                .unwrap_or_else(|| format!("method@{}", index)),
        }
    }

    fn line(&mut self, text: String) {
        self.out.push_str(&text);
        self.out.push('\n');
    }
}

impl<'a> Visitor for Printer<'a> {
    fn visit_bytecode(&mut self, node: &Node, opcode: u8, operands: &[Operand]) {
        let name = Opcode::for_value(opcode).map(|o| o.name).unwrap_or("<bad-op>");
        let rendered: Vec<String> = operands.iter().map(|o| self.operand(o)).collect();
        if rendered.is_empty() {
            self.line(format!("{:04x}: {}", node.offset, name));
        } else {
            self.line(format!("{:04x}: {} {}", node.offset, name, rendered.join(", ")));
        }
    }

    fn visit_packed_switch(&mut self, node: &Node, first_key: i32, targets: &[LabelId]) {
        self.line(format!("{:04x}: .packed-switch {}", node.offset, first_key));
        for (i, target) in targets.iter().enumerate() {
            let name = self.label_name(*target);
            self.line(format!("    {} -> {}", first_key + i as i32, name));
        }
        self.line(String::from("    .end packed-switch"));
    }

    fn visit_sparse_switch(&mut self, node: &Node, cases: &[(i32, LabelId)]) {
        self.line(format!("{:04x}: .sparse-switch", node.offset));
        for (key, target) in cases {
            let name = self.label_name(*target);
            self.line(format!("    {} -> {}", key, name));
        }
        self.line(String::from("    .end sparse-switch"));
    }

    fn visit_array_data(&mut self, node: &Node, data: &[u8]) {
        let hex: Vec<String> = data.iter().map(|b| format!("{:02x}", b)).collect();
        self.line(format!("{:04x}: .array-data [{}]", node.offset, hex.join(" ")));
    }

    fn visit_label(&mut self, _node: &Node, label: &LabelData) {
        self.line(format!(":L{}", label.id));
    }

    fn visit_try_begin(&mut self, _node: &Node, id: u32) {
        self.line(format!(".try_start_{}", id));
    }

    fn visit_try_end(
        &mut self,
        _node: &Node,
        begin: u32,
        handlers: &[CatchHandler],
        catch_all: Option<LabelId>,
    ) {
        self.line(format!(".try_end_{}", begin));
        for handler in handlers {
            let ty = self.type_ref(handler.type_idx);
            let target = self.label_name(handler.target);
            self.line(format!("    .catch {} -> {}", ty, target));
        }
        if let Some(label) = catch_all {
            let target = self.label_name(label);
            self.line(format!("    .catchall -> {}", target));
        }
    }

    fn visit_debug_header(&mut self, _node: &Node, param_names: &[u32]) {
        let names: Vec<String> = param_names.iter().map(|n| self.string_ref(*n)).collect();
        self.line(format!(".params {}", names.join(", ")));
    }

    fn visit_debug_annotation(&mut self, _node: &Node, op: DebugOp, operands: &[Operand]) {
        let rendered: Vec<String> = operands.iter().map(|o| self.operand(o)).collect();
        let text = match op {
            DebugOp::AdvanceLine => format!(".line {}", rendered.join(", ")),
            DebugOp::StartLocal | DebugOp::StartLocalExtended => {
                format!(".local {}", rendered.join(", "))
            }
            DebugOp::EndLocal => format!(".end local {}", rendered.join(", ")),
            DebugOp::RestartLocal => format!(".restart local {}", rendered.join(", ")),
            DebugOp::PrologueEnd => String::from(".prologue"),
            DebugOp::EpilogueBegin => String::from(".epilogue"),
            DebugOp::SetFile => format!(".source {}", rendered.join(", ")),
        };
        self.line(text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{MethodIr, Node, NodeKind, Operand};

    #[test]
    fn register_names_split_at_the_parameter_base() {
        let regs = RegNamer { registers_size: 5, ins_size: 2 };
        assert_eq!(regs.name(0), "v0");
        assert_eq!(regs.name(2), "v2");
        assert_eq!(regs.name(3), "p0");
        assert_eq!(regs.name(4), "p1");
    }

    #[test]
    fn render_lists_instructions_and_labels() {
        let pool = ConstantPool::new();
        let mut ir = MethodIr::new(2, 0, 0);
        let label = ir.label_at(1);
        ir.nodes.push(Node::new(
            0,
            NodeKind::Bytecode {
                opcode: crate::opcodes::op::CONST_4,
                operands: vec![Operand::Reg(0), Operand::Const32(5)],
            },
        ));
        ir.nodes.push(Node::new(1, NodeKind::Label(label)));
        ir.nodes.push(Node::new(
            1,
            NodeKind::Bytecode { opcode: crate::opcodes::op::RETURN_VOID, operands: vec![] },
        ));
        ir.assign_label_ids();

        let text = render(&ir, &pool);
        assert!(text.contains(".registers 2"));
        assert!(text.contains("const/4 v0, #5"));
        assert!(text.contains(":L1"));
        assert!(text.contains("return-void"));
    }
}
