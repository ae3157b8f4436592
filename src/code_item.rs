//! The raw `code_item` wire layer: a method body as it sits in the container
//! file. Instructions are kept as undecoded 16-bit code units, the exception
//! table as try regions plus the variable-length encoded handler blob, and
//! the debug information as its header fields plus the raw state-machine
//! program. [`crate::ir::MethodIr`] is built from and assembled back into
//! this representation.

use log::warn;

use crate::error::LirError;
use crate::leb::{read_sleb128, read_uleb128, read_uleb128p1, write_uleb128, write_uleb128p1};
use crate::pool::NO_INDEX;
use crate::{read_u1, read_u2, read_u4, write_u1, write_u2, write_u4};

// Debug-info state machine opcodes and the special-opcode arithmetic.
pub const DBG_END_SEQUENCE: u8 = 0x00;
pub const DBG_ADVANCE_PC: u8 = 0x01;
pub const DBG_ADVANCE_LINE: u8 = 0x02;
pub const DBG_START_LOCAL: u8 = 0x03;
pub const DBG_START_LOCAL_EXTENDED: u8 = 0x04;
pub const DBG_END_LOCAL: u8 = 0x05;
pub const DBG_RESTART_LOCAL: u8 = 0x06;
pub const DBG_SET_PROLOGUE_END: u8 = 0x07;
pub const DBG_SET_EPILOGUE_BEGIN: u8 = 0x08;
pub const DBG_SET_FILE: u8 = 0x09;
pub const DBG_FIRST_SPECIAL: u8 = 0x0a;
pub const DBG_LINE_BASE: i32 = -4;
pub const DBG_LINE_RANGE: i32 = 15;

/// One protected region: `insn_count` code units starting at `start_addr`,
/// with its catch handlers at `handler_off` bytes into the handler blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryRegion {
    pub start_addr: u32,
    pub insn_count: u16,
    pub handler_off: u16,
}

impl TryRegion {
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<TryRegion, LirError> {
        Ok(TryRegion {
            start_addr: read_u4(bytes, ix)?,
            insn_count: read_u2(bytes, ix)?,
            handler_off: read_u2(bytes, ix)?,
        })
    }

    pub fn write(&self, bytes: &mut Vec<u8>) {
        write_u4(bytes, self.start_addr);
        write_u2(bytes, self.insn_count);
        write_u2(bytes, self.handler_off);
    }
}

/// Debug-info header plus the raw state-machine program (terminator
/// included). Parameter names are string indices, `NO_INDEX` for unnamed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugInfoItem {
    pub line_start: u32,
    pub parameter_names: Vec<u32>,
    pub bytecode: Vec<u8>,
}

impl DebugInfoItem {
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<DebugInfoItem, LirError> {
        let line_start = read_uleb128(bytes, ix)?;
        let parameters_size = read_uleb128(bytes, ix)?;
        if parameters_size > u16::MAX as u32 {
            fail!("implausible debug-info parameter count {}", parameters_size);
        }

        let mut parameter_names = Vec::with_capacity(parameters_size as usize);
        for _ in 0..parameters_size {
            let idx = read_uleb128p1(bytes, ix)?; // -1 => NO_INDEX
            parameter_names.push(if idx < 0 { NO_INDEX } else { idx as u32 });
        }

        let start = *ix;
        skip_state_machine(bytes, ix)?;
        let bytecode = bytes[start..*ix].to_vec();

        Ok(DebugInfoItem { line_start, parameter_names, bytecode })
    }

    pub fn write(&self, bytes: &mut Vec<u8>) {
        write_uleb128(bytes, self.line_start);
        write_uleb128(bytes, self.parameter_names.len() as u32);
        for p in &self.parameter_names {
            write_uleb128p1(bytes, if *p == NO_INDEX { -1 } else { *p as i32 });
        }
        if self.bytecode.is_empty() {
            write_u1(bytes, DBG_END_SEQUENCE);
        } else {
            bytes.extend_from_slice(&self.bytecode);
        }
    }
}

/// Walks one state-machine program, leaving `ix` just past the terminator.
fn skip_state_machine(bytes: &[u8], ix: &mut usize) -> Result<(), LirError> {
    loop {
        match read_u1(bytes, ix)? {
            DBG_END_SEQUENCE => return Ok(()),
            DBG_ADVANCE_PC => {
                read_uleb128(bytes, ix)?;
            }
            DBG_ADVANCE_LINE => {
                read_sleb128(bytes, ix)?;
            }
            DBG_START_LOCAL => {
                read_uleb128(bytes, ix)?;
                read_uleb128p1(bytes, ix)?;
                read_uleb128p1(bytes, ix)?;
            }
            DBG_START_LOCAL_EXTENDED => {
                read_uleb128(bytes, ix)?;
                read_uleb128p1(bytes, ix)?;
                read_uleb128p1(bytes, ix)?;
                read_uleb128p1(bytes, ix)?;
            }
            DBG_END_LOCAL | DBG_RESTART_LOCAL => {
                read_uleb128(bytes, ix)?;
            }
            DBG_SET_PROLOGUE_END | DBG_SET_EPILOGUE_BEGIN => {}
            DBG_SET_FILE => {
                read_uleb128p1(bytes, ix)?;
            }
            _ => {} // special opcodes carry no operands
        }
    }
}

/// Walks one encoded catch handler, leaving `ix` just past it.
fn skip_catch_handler(bytes: &[u8], ix: &mut usize) -> Result<(), LirError> {
    let count = read_sleb128(bytes, ix)?;
    for _ in 0..count.abs() {
        read_uleb128(bytes, ix)?; // type index
        read_uleb128(bytes, ix)?; // handler address
    }
    if count < 1 {
        read_uleb128(bytes, ix)?; // catch-all address
    }
    Ok(())
}

/// A complete method body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeItem {
    pub registers_size: u16,
    pub ins_size: u16,
    pub outs_size: u16,
    pub insns: Vec<u16>,
    pub tries: Vec<TryRegion>,
    /// The encoded_catch_handler_list blob, starting at its size field;
    /// `TryRegion::handler_off` values index into this.
    pub handlers: Vec<u8>,
    pub debug_info: Option<DebugInfoItem>,
}

impl CodeItem {
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<CodeItem, LirError> {
        let code_item_start = *ix;
        let registers_size = read_u2(bytes, ix)?;
        let ins_size = read_u2(bytes, ix)?;
        let outs_size = read_u2(bytes, ix)?;
        let tries_size = read_u2(bytes, ix)?;

        // debug_info_off indexes into the same buffer; zero means absent
        let mut debug_offset = read_u4(bytes, ix)? as usize;
        let debug_info =
            if debug_offset > 0 { Some(DebugInfoItem::read(bytes, &mut debug_offset)?) } else { None };

        let insns_size = read_u4(bytes, ix)? as usize;
        if bytes.len() - *ix < insns_size * 2 {
            fail!("code_item claims {} code units but the buffer is shorter", insns_size);
        }
        let mut insns = Vec::with_capacity(insns_size);
        for _ in 0..insns_size {
            insns.push(read_u2(bytes, ix)?);
        }

        let mut tries: Vec<TryRegion> = Vec::new();
        let mut handlers: Vec<u8> = Vec::new();

        if tries_size > 0 {
            // tries must start 4-byte aligned
            if (insns_size & 1) != 0 {
                let padding = read_u2(bytes, ix)?;
                if padding != 0 {
                    warn!(
                        "non-zero code_item padding 0x{:04x} at 0x{:x} (code_item_start=0x{:x})",
                        padding,
                        *ix - 2,
                        code_item_start
                    );
                }
            }
            for _ in 0..tries_size {
                tries.push(TryRegion::read(bytes, ix)?);
            }

            let list_start = *ix;
            let handlers_size = read_uleb128(bytes, ix)?;
            if handlers_size > 1_000_000 {
                fail!("implausible encoded_catch_handler_list size {}", handlers_size);
            }
            for i in 0..handlers_size {
                let entry_off = *ix;
                skip_catch_handler(bytes, ix).map_err(|e| {
                    err!(e, "encoded catch handler #{}/{} at 0x{:x}", i + 1, handlers_size, entry_off)
                })?;
                if *ix <= entry_off {
                    fail!("encoded catch handler did not advance the cursor");
                }
            }
            handlers.extend_from_slice(&bytes[list_start..*ix]);
        }

        Ok(CodeItem { registers_size, ins_size, outs_size, insns, tries, handlers, debug_info })
    }

    pub fn write(&self, bytes: &mut Vec<u8>) {
        write_u2(bytes, self.registers_size);
        write_u2(bytes, self.ins_size);
        write_u2(bytes, self.outs_size);
        write_u2(bytes, self.tries.len() as u16);

        // reserve debug_info_off; patched once the debug block lands
        let debug_off_pos = bytes.len();
        write_u4(bytes, 0);

        write_u4(bytes, self.insns.len() as u32);
        for w in &self.insns {
            write_u2(bytes, *w);
        }

        if !self.tries.is_empty() {
            if (self.insns.len() & 1) != 0 {
                write_u2(bytes, 0);
            }
            for t in &self.tries {
                t.write(bytes);
            }
            bytes.extend_from_slice(&self.handlers);
        }

        if let Some(di) = &self.debug_info {
            let debug_info_off = bytes.len() as u32;
            let mut tmp = Vec::with_capacity(4);
            write_u4(&mut tmp, debug_info_off);
            bytes[debug_off_pos..debug_off_pos + 4].copy_from_slice(&tmp);
            di.write(bytes);
        }
    }
}
