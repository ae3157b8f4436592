//! The symbolic method-body IR.
//!
//! A [`MethodIr`] owns one node arena per method: the merged, offset-ordered
//! node stream plus a label table keyed by original target offset. All
//! cross-references (branch targets, switch cases, catch handlers, the
//! try-end -> try-begin link) are index handles scoped to this instance, so
//! dropping the instance releases everything at once and nothing can dangle.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::LirError;

/// Handle to a label inside one `MethodIr`'s label table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LabelId(pub(crate) u32);

/// A branch/switch/handler target. `id` is 0 until the id-assignment pass
/// runs; ids are handed out ascending by offset, starting at 1, only after
/// decoding completes, so id order reflects final target order rather than
/// discovery order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelData {
    pub id: u32,
    pub offset: u32,
    pub ref_count: u32,
    /// Set when the label is the target of a payload-referencing instruction
    /// and must therefore land on an even code-unit offset.
    pub aligned: bool,
}

/// The pool table an indexed operand points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolRefKind {
    String,
    Type,
    Field,
    Method,
}

/// One instruction or annotation operand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operand {
    Reg(u16),
    /// A register pair `vN, vN+1` holding a wide value; only the base is kept.
    RegPair(u16),
    /// Up to five explicit argument registers.
    RegList(Vec<u16>),
    RegRange { base: u16, count: u16 },
    Const32(u32),
    Const64(u64),
    Target(LabelId),
    PoolRef { kind: PoolRefKind, index: u32 },
}

impl Operand {
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Operand::Const32(bits) => Some(*bits as i32),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Operand::Const32(bits) => Some(f32::from_bits(*bits)),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Operand::Const64(bits) => Some(*bits as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Operand::Const64(bits) => Some(f64::from_bits(*bits)),
            _ => None,
        }
    }
}

/// Debug annotation kinds. There is no `AdvancePc` variant: address advances
/// never materialize as nodes, they only move the replay cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DebugOp {
    AdvanceLine,
    StartLocal,
    StartLocalExtended,
    EndLocal,
    RestartLocal,
    PrologueEnd,
    EpilogueBegin,
    SetFile,
}

/// One typed catch handler: exception type (pool type index) and target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatchHandler {
    pub type_idx: u32,
    pub target: LabelId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    /// A decoded real instruction.
    Bytecode { opcode: u8, operands: Vec<Operand> },
    PackedSwitchPayload { first_key: i32, targets: Vec<LabelId> },
    SparseSwitchPayload { cases: Vec<(i32, LabelId)> },
    /// Raw payload bytes (ident and header included), never interpreted.
    ArrayDataPayload { data: Vec<u8> },
    Label(LabelId),
    TryBlockBegin { id: u32 },
    TryBlockEnd { begin: u32, handlers: Vec<CatchHandler>, catch_all: Option<LabelId> },
    /// Parameter names as string indices, `NO_INDEX` for unnamed parameters.
    DebugInfoHeader { param_names: Vec<u32> },
    DebugInfoAnnotation { op: DebugOp, operands: Vec<Operand> },
}

/// A node in the merged stream. `offset` is in 16-bit code units: the
/// original stream position for decoded nodes, reassigned during assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub offset: u32,
    pub kind: NodeKind,
}

impl Node {
    pub fn new(offset: u32, kind: NodeKind) -> Node {
        Node { offset, kind }
    }
}

/// The per-method IR instance.
#[derive(Debug, Default)]
pub struct MethodIr {
    pub registers_size: u16,
    pub ins_size: u16,
    pub outs_size: u16,
    /// The merged node stream, ordered by offset with the fixed category
    /// interleaving produced by [`merge_nodes`]. Callers may insert and
    /// remove nodes freely before re-assembling.
    pub nodes: Vec<Node>,
    labels: Vec<LabelData>,
    label_offsets: BTreeMap<u32, LabelId>,
}

impl MethodIr {
    pub fn new(registers_size: u16, ins_size: u16, outs_size: u16) -> MethodIr {
        MethodIr { registers_size, ins_size, outs_size, ..MethodIr::default() }
    }

    /// Returns the label for `offset`, creating it on first sight. Every
    /// call counts as one referencing site.
    pub fn label_at(&mut self, offset: u32) -> LabelId {
        let id = *self.label_offsets.entry(offset).or_insert_with(|| {
            self.labels.push(LabelData { id: 0, offset, ref_count: 0, aligned: false });
            LabelId((self.labels.len() - 1) as u32)
        });
        self.labels[id.0 as usize].ref_count += 1;
        id
    }

    /// Looks a label up without creating it or counting a reference.
    pub fn label_for_offset(&self, offset: u32) -> Option<LabelId> {
        self.label_offsets.get(&offset).copied()
    }

    pub fn label(&self, id: LabelId) -> &LabelData {
        &self.labels[id.0 as usize]
    }

    pub(crate) fn label_mut(&mut self, id: LabelId) -> &mut LabelData {
        &mut self.labels[id.0 as usize]
    }

    /// All labels, in ascending offset order.
    pub fn labels(&self) -> impl Iterator<Item = (LabelId, &LabelData)> {
        self.label_offsets.values().map(|id| (*id, &self.labels[id.0 as usize]))
    }

    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    /// Second phase of label construction: ids ascend by offset from 1.
    pub(crate) fn assign_label_ids(&mut self) {
        let ordered: Vec<LabelId> = self.label_offsets.values().copied().collect();
        for (i, id) in ordered.into_iter().enumerate() {
            self.labels[id.0 as usize].id = (i + 1) as u32;
        }
    }
}

/// Splices `extra` (sorted by offset) into `stream`: each extra node lands
/// immediately before the first unconsumed stream node with the same offset,
/// or at the very end if the stream runs out without a match. The stream
/// cursor only advances on a failed match, so it can never skip past a
/// future matching position.
pub(crate) fn merge_nodes(stream: &mut Vec<Node>, extra: Vec<Node>) -> Result<(), LirError> {
    if extra.windows(2).any(|w| w[0].offset > w[1].offset) {
        fail!("auxiliary node stream is not sorted by offset");
    }

    let mut merged = Vec::with_capacity(stream.len() + extra.len());
    let mut primary = std::mem::take(stream).into_iter().peekable();

    for node in extra {
        while let Some(ahead) = primary.next_if(|p| p.offset != node.offset) {
            merged.push(ahead);
        }
        merged.push(node);
    }
    merged.extend(primary);

    *stream = merged;
    Ok(())
}
