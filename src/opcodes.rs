//! The standard Dalvik opcode table.
//!
//! One entry per defined opcode value: mnemonic, encoding format, the kind of
//! constant-pool index carried by the index field, and behavior flags. Gaps
//! in the value space (`0x3e..=0x43`, `0x73`, `0x79..=0x7a`, `0xe3..=0xf9`)
//! have no entry and decode as unknown opcodes.

use std::collections::HashMap;

use bitflags::bitflags;
use once_cell::sync::Lazy;

use crate::opcode_format::{Format, ReferenceType};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpcodeFlags: u32 {
        const CAN_THROW = 0x1;
        const CAN_CONTINUE = 0x2;
        const SETS_RESULT = 0x4;
        const SETS_REGISTER = 0x8;
        const SETS_WIDE_REGISTER = 0x10;
    }
}

/// A single opcode definition.
pub struct Opcode {
    pub value: u8,
    pub name: &'static str,
    pub format: Format,
    pub reference_type: ReferenceType,
    pub flags: OpcodeFlags,
}

impl Opcode {
    pub fn for_value(value: u8) -> Option<&'static Opcode> {
        BY_VALUE.get(&value).copied()
    }

    pub fn all() -> &'static [Opcode] {
        &OPCODES
    }

    pub fn can_throw(&self) -> bool {
        self.flags.contains(OpcodeFlags::CAN_THROW)
    }

    pub fn can_continue(&self) -> bool {
        self.flags.contains(OpcodeFlags::CAN_CONTINUE)
    }

    pub fn sets_result(&self) -> bool {
        self.flags.contains(OpcodeFlags::SETS_RESULT)
    }

    pub fn sets_register(&self) -> bool {
        self.flags.contains(OpcodeFlags::SETS_REGISTER)
    }

    pub fn sets_wide_register(&self) -> bool {
        self.flags.contains(OpcodeFlags::SETS_WIDE_REGISTER)
    }
}

/// Opcode values referenced by name elsewhere in the crate.
pub mod op {
    pub const NOP: u8 = 0x00;
    pub const MOVE: u8 = 0x01;
    pub const MOVE_WIDE: u8 = 0x04;
    pub const MOVE_OBJECT: u8 = 0x07;
    pub const MOVE_RESULT: u8 = 0x0a;
    pub const MOVE_EXCEPTION: u8 = 0x0d;
    pub const RETURN_VOID: u8 = 0x0e;
    pub const RETURN: u8 = 0x0f;
    pub const RETURN_OBJECT: u8 = 0x11;
    pub const CONST_4: u8 = 0x12;
    pub const CONST_16: u8 = 0x13;
    pub const CONST: u8 = 0x14;
    pub const CONST_HIGH16: u8 = 0x15;
    pub const CONST_WIDE_16: u8 = 0x16;
    pub const CONST_WIDE_32: u8 = 0x17;
    pub const CONST_WIDE: u8 = 0x18;
    pub const CONST_WIDE_HIGH16: u8 = 0x19;
    pub const CONST_STRING: u8 = 0x1a;
    pub const CONST_CLASS: u8 = 0x1c;
    pub const MONITOR_ENTER: u8 = 0x1d;
    pub const CHECK_CAST: u8 = 0x1f;
    pub const INSTANCE_OF: u8 = 0x20;
    pub const ARRAY_LENGTH: u8 = 0x21;
    pub const NEW_INSTANCE: u8 = 0x22;
    pub const NEW_ARRAY: u8 = 0x23;
    pub const FILLED_NEW_ARRAY: u8 = 0x24;
    pub const FILL_ARRAY_DATA: u8 = 0x26;
    pub const THROW: u8 = 0x27;
    pub const GOTO: u8 = 0x28;
    pub const GOTO_16: u8 = 0x29;
    pub const GOTO_32: u8 = 0x2a;
    pub const PACKED_SWITCH: u8 = 0x2b;
    pub const SPARSE_SWITCH: u8 = 0x2c;
    pub const CMP_LONG: u8 = 0x31;
    pub const IF_EQ: u8 = 0x32;
    pub const IF_LT: u8 = 0x34;
    pub const IF_EQZ: u8 = 0x38;
    pub const IF_GEZ: u8 = 0x3b;
    pub const AGET: u8 = 0x44;
    pub const APUT: u8 = 0x4b;
    pub const IGET: u8 = 0x52;
    pub const IPUT: u8 = 0x59;
    pub const SGET: u8 = 0x60;
    pub const SPUT: u8 = 0x67;
    pub const INVOKE_VIRTUAL: u8 = 0x6e;
    pub const INVOKE_DIRECT: u8 = 0x70;
    pub const INVOKE_STATIC: u8 = 0x71;
    pub const INVOKE_VIRTUAL_RANGE: u8 = 0x74;
    pub const NEG_INT: u8 = 0x7b;
    pub const INT_TO_LONG: u8 = 0x81;
    pub const ADD_INT: u8 = 0x90;
    pub const ADD_INT_2ADDR: u8 = 0xb0;
    pub const ADD_INT_LIT16: u8 = 0xd0;
    pub const ADD_INT_LIT8: u8 = 0xd8;
    pub const INVOKE_POLYMORPHIC: u8 = 0xfa;
}

const NONE: OpcodeFlags = OpcodeFlags::empty();
const THROW: OpcodeFlags = OpcodeFlags::CAN_THROW;
const CONT: OpcodeFlags = OpcodeFlags::CAN_CONTINUE;
const RESULT: OpcodeFlags = OpcodeFlags::SETS_RESULT;
const REG: OpcodeFlags = OpcodeFlags::SETS_REGISTER;
const WIDE: OpcodeFlags = OpcodeFlags::SETS_WIDE_REGISTER;

macro_rules! op_table {
    ($($value:literal $name:literal $fmt:ident $rt:ident [$flags:expr];)*) => {
        vec![$(Opcode {
            value: $value,
            name: $name,
            format: Format::$fmt,
            reference_type: ReferenceType::$rt,
            flags: $flags,
        }),*]
    };
}

static OPCODES: Lazy<Vec<Opcode>> = Lazy::new(|| {
    op_table![
        0x00 "nop" Format10x None [CONT];
        0x01 "move" Format12x None [CONT | REG];
        0x02 "move/from16" Format22x None [CONT | REG];
        0x03 "move/16" Format32x None [CONT | REG];
        0x04 "move-wide" Format12x None [CONT | REG | WIDE];
        0x05 "move-wide/from16" Format22x None [CONT | REG | WIDE];
        0x06 "move-wide/16" Format32x None [CONT | REG | WIDE];
        0x07 "move-object" Format12x None [CONT | REG];
        0x08 "move-object/from16" Format22x None [CONT | REG];
        0x09 "move-object/16" Format32x None [CONT | REG];
        0x0a "move-result" Format11x None [CONT | REG];
        0x0b "move-result-wide" Format11x None [CONT | REG | WIDE];
        0x0c "move-result-object" Format11x None [CONT | REG];
        0x0d "move-exception" Format11x None [CONT | REG];
        0x0e "return-void" Format10x None [NONE];
        0x0f "return" Format11x None [NONE];
        0x10 "return-wide" Format11x None [NONE];
        0x11 "return-object" Format11x None [NONE];
        0x12 "const/4" Format11n None [CONT | REG];
        0x13 "const/16" Format21s None [CONT | REG];
        0x14 "const" Format31i None [CONT | REG];
        0x15 "const/high16" Format21h None [CONT | REG];
        0x16 "const-wide/16" Format21s None [CONT | REG | WIDE];
        0x17 "const-wide/32" Format31i None [CONT | REG | WIDE];
        0x18 "const-wide" Format51l None [CONT | REG | WIDE];
        0x19 "const-wide/high16" Format21h None [CONT | REG | WIDE];
        0x1a "const-string" Format21c String [CONT | THROW | REG];
        0x1b "const-string/jumbo" Format31c String [CONT | THROW | REG];
        0x1c "const-class" Format21c Type [CONT | THROW | REG];
        0x1d "monitor-enter" Format11x None [CONT | THROW];
        0x1e "monitor-exit" Format11x None [CONT | THROW];
        0x1f "check-cast" Format21c Type [CONT | THROW | REG];
        0x20 "instance-of" Format22c Type [CONT | THROW | REG];
        0x21 "array-length" Format12x None [CONT | THROW | REG];
        0x22 "new-instance" Format21c Type [CONT | THROW | REG];
        0x23 "new-array" Format22c Type [CONT | THROW | REG];
        0x24 "filled-new-array" Format35c Type [CONT | THROW | RESULT];
        0x25 "filled-new-array/range" Format3rc Type [CONT | THROW | RESULT];
        0x26 "fill-array-data" Format31t None [CONT | THROW];
        0x27 "throw" Format11x None [THROW];
        0x28 "goto" Format10t None [NONE];
        0x29 "goto/16" Format20t None [NONE];
        0x2a "goto/32" Format30t None [NONE];
        0x2b "packed-switch" Format31t None [CONT];
        0x2c "sparse-switch" Format31t None [CONT];
        0x2d "cmpl-float" Format23x None [CONT | REG];
        0x2e "cmpg-float" Format23x None [CONT | REG];
        0x2f "cmpl-double" Format23x None [CONT | REG];
        0x30 "cmpg-double" Format23x None [CONT | REG];
        0x31 "cmp-long" Format23x None [CONT | REG];
        0x32 "if-eq" Format22t None [CONT];
        0x33 "if-ne" Format22t None [CONT];
        0x34 "if-lt" Format22t None [CONT];
        0x35 "if-ge" Format22t None [CONT];
        0x36 "if-gt" Format22t None [CONT];
        0x37 "if-le" Format22t None [CONT];
        0x38 "if-eqz" Format21t None [CONT];
        0x39 "if-nez" Format21t None [CONT];
        0x3a "if-ltz" Format21t None [CONT];
        0x3b "if-gez" Format21t None [CONT];
        0x3c "if-gtz" Format21t None [CONT];
        0x3d "if-lez" Format21t None [CONT];
        0x44 "aget" Format23x None [CONT | THROW | REG];
        0x45 "aget-wide" Format23x None [CONT | THROW | REG | WIDE];
        0x46 "aget-object" Format23x None [CONT | THROW | REG];
        0x47 "aget-boolean" Format23x None [CONT | THROW | REG];
        0x48 "aget-byte" Format23x None [CONT | THROW | REG];
        0x49 "aget-char" Format23x None [CONT | THROW | REG];
        0x4a "aget-short" Format23x None [CONT | THROW | REG];
        0x4b "aput" Format23x None [CONT | THROW];
        0x4c "aput-wide" Format23x None [CONT | THROW];
        0x4d "aput-object" Format23x None [CONT | THROW];
        0x4e "aput-boolean" Format23x None [CONT | THROW];
        0x4f "aput-byte" Format23x None [CONT | THROW];
        0x50 "aput-char" Format23x None [CONT | THROW];
        0x51 "aput-short" Format23x None [CONT | THROW];
        0x52 "iget" Format22c Field [CONT | THROW | REG];
        0x53 "iget-wide" Format22c Field [CONT | THROW | REG | WIDE];
        0x54 "iget-object" Format22c Field [CONT | THROW | REG];
        0x55 "iget-boolean" Format22c Field [CONT | THROW | REG];
        0x56 "iget-byte" Format22c Field [CONT | THROW | REG];
        0x57 "iget-char" Format22c Field [CONT | THROW | REG];
        0x58 "iget-short" Format22c Field [CONT | THROW | REG];
        0x59 "iput" Format22c Field [CONT | THROW];
        0x5a "iput-wide" Format22c Field [CONT | THROW];
        0x5b "iput-object" Format22c Field [CONT | THROW];
        0x5c "iput-boolean" Format22c Field [CONT | THROW];
        0x5d "iput-byte" Format22c Field [CONT | THROW];
        0x5e "iput-char" Format22c Field [CONT | THROW];
        0x5f "iput-short" Format22c Field [CONT | THROW];
        0x60 "sget" Format21c Field [CONT | THROW | REG];
        0x61 "sget-wide" Format21c Field [CONT | THROW | REG | WIDE];
        0x62 "sget-object" Format21c Field [CONT | THROW | REG];
        0x63 "sget-boolean" Format21c Field [CONT | THROW | REG];
        0x64 "sget-byte" Format21c Field [CONT | THROW | REG];
        0x65 "sget-char" Format21c Field [CONT | THROW | REG];
        0x66 "sget-short" Format21c Field [CONT | THROW | REG];
        0x67 "sput" Format21c Field [CONT | THROW];
        0x68 "sput-wide" Format21c Field [CONT | THROW];
        0x69 "sput-object" Format21c Field [CONT | THROW];
        0x6a "sput-boolean" Format21c Field [CONT | THROW];
        0x6b "sput-byte" Format21c Field [CONT | THROW];
        0x6c "sput-char" Format21c Field [CONT | THROW];
        0x6d "sput-short" Format21c Field [CONT | THROW];
        0x6e "invoke-virtual" Format35c Method [CONT | THROW | RESULT];
        0x6f "invoke-super" Format35c Method [CONT | THROW | RESULT];
        0x70 "invoke-direct" Format35c Method [CONT | THROW | RESULT];
        0x71 "invoke-static" Format35c Method [CONT | THROW | RESULT];
        0x72 "invoke-interface" Format35c Method [CONT | THROW | RESULT];
        0x74 "invoke-virtual/range" Format3rc Method [CONT | THROW | RESULT];
        0x75 "invoke-super/range" Format3rc Method [CONT | THROW | RESULT];
        0x76 "invoke-direct/range" Format3rc Method [CONT | THROW | RESULT];
        0x77 "invoke-static/range" Format3rc Method [CONT | THROW | RESULT];
        0x78 "invoke-interface/range" Format3rc Method [CONT | THROW | RESULT];
        0x7b "neg-int" Format12x None [CONT | REG];
        0x7c "not-int" Format12x None [CONT | REG];
        0x7d "neg-long" Format12x None [CONT | REG | WIDE];
        0x7e "not-long" Format12x None [CONT | REG | WIDE];
        0x7f "neg-float" Format12x None [CONT | REG];
        0x80 "neg-double" Format12x None [CONT | REG | WIDE];
        0x81 "int-to-long" Format12x None [CONT | REG | WIDE];
        0x82 "int-to-float" Format12x None [CONT | REG];
        0x83 "int-to-double" Format12x None [CONT | REG | WIDE];
        0x84 "long-to-int" Format12x None [CONT | REG];
        0x85 "long-to-float" Format12x None [CONT | REG];
        0x86 "long-to-double" Format12x None [CONT | REG | WIDE];
        0x87 "float-to-int" Format12x None [CONT | REG];
        0x88 "float-to-long" Format12x None [CONT | REG | WIDE];
        0x89 "float-to-double" Format12x None [CONT | REG | WIDE];
        0x8a "double-to-int" Format12x None [CONT | REG];
        0x8b "double-to-long" Format12x None [CONT | REG | WIDE];
        0x8c "double-to-float" Format12x None [CONT | REG];
        0x8d "int-to-byte" Format12x None [CONT | REG];
        0x8e "int-to-char" Format12x None [CONT | REG];
        0x8f "int-to-short" Format12x None [CONT | REG];
        0x90 "add-int" Format23x None [CONT | REG];
        0x91 "sub-int" Format23x None [CONT | REG];
        0x92 "mul-int" Format23x None [CONT | REG];
        0x93 "div-int" Format23x None [CONT | THROW | REG];
        0x94 "rem-int" Format23x None [CONT | THROW | REG];
        0x95 "and-int" Format23x None [CONT | REG];
        0x96 "or-int" Format23x None [CONT | REG];
        0x97 "xor-int" Format23x None [CONT | REG];
        0x98 "shl-int" Format23x None [CONT | REG];
        0x99 "shr-int" Format23x None [CONT | REG];
        0x9a "ushr-int" Format23x None [CONT | REG];
        0x9b "add-long" Format23x None [CONT | REG | WIDE];
        0x9c "sub-long" Format23x None [CONT | REG | WIDE];
        0x9d "mul-long" Format23x None [CONT | REG | WIDE];
        0x9e "div-long" Format23x None [CONT | THROW | REG | WIDE];
        0x9f "rem-long" Format23x None [CONT | THROW | REG | WIDE];
        0xa0 "and-long" Format23x None [CONT | REG | WIDE];
        0xa1 "or-long" Format23x None [CONT | REG | WIDE];
        0xa2 "xor-long" Format23x None [CONT | REG | WIDE];
        0xa3 "shl-long" Format23x None [CONT | REG | WIDE];
        0xa4 "shr-long" Format23x None [CONT | REG | WIDE];
        0xa5 "ushr-long" Format23x None [CONT | REG | WIDE];
        0xa6 "add-float" Format23x None [CONT | REG];
        0xa7 "sub-float" Format23x None [CONT | REG];
        0xa8 "mul-float" Format23x None [CONT | REG];
        0xa9 "div-float" Format23x None [CONT | REG];
        0xaa "rem-float" Format23x None [CONT | REG];
        0xab "add-double" Format23x None [CONT | REG | WIDE];
        0xac "sub-double" Format23x None [CONT | REG | WIDE];
        0xad "mul-double" Format23x None [CONT | REG | WIDE];
        0xae "div-double" Format23x None [CONT | REG | WIDE];
        0xaf "rem-double" Format23x None [CONT | REG | WIDE];
        0xb0 "add-int/2addr" Format12x None [CONT | REG];
        0xb1 "sub-int/2addr" Format12x None [CONT | REG];
        0xb2 "mul-int/2addr" Format12x None [CONT | REG];
        0xb3 "div-int/2addr" Format12x None [CONT | THROW | REG];
        0xb4 "rem-int/2addr" Format12x None [CONT | THROW | REG];
        0xb5 "and-int/2addr" Format12x None [CONT | REG];
        0xb6 "or-int/2addr" Format12x None [CONT | REG];
        0xb7 "xor-int/2addr" Format12x None [CONT | REG];
        0xb8 "shl-int/2addr" Format12x None [CONT | REG];
        0xb9 "shr-int/2addr" Format12x None [CONT | REG];
        0xba "ushr-int/2addr" Format12x None [CONT | REG];
        0xbb "add-long/2addr" Format12x None [CONT | REG | WIDE];
        0xbc "sub-long/2addr" Format12x None [CONT | REG | WIDE];
        0xbd "mul-long/2addr" Format12x None [CONT | REG | WIDE];
        0xbe "div-long/2addr" Format12x None [CONT | THROW | REG | WIDE];
        0xbf "rem-long/2addr" Format12x None [CONT | THROW | REG | WIDE];
        0xc0 "and-long/2addr" Format12x None [CONT | REG | WIDE];
        0xc1 "or-long/2addr" Format12x None [CONT | REG | WIDE];
        0xc2 "xor-long/2addr" Format12x None [CONT | REG | WIDE];
        0xc3 "shl-long/2addr" Format12x None [CONT | REG | WIDE];
        0xc4 "shr-long/2addr" Format12x None [CONT | REG | WIDE];
        0xc5 "ushr-long/2addr" Format12x None [CONT | REG | WIDE];
        0xc6 "add-float/2addr" Format12x None [CONT | REG];
        0xc7 "sub-float/2addr" Format12x None [CONT | REG];
        0xc8 "mul-float/2addr" Format12x None [CONT | REG];
        0xc9 "div-float/2addr" Format12x None [CONT | REG];
        0xca "rem-float/2addr" Format12x None [CONT | REG];
        0xcb "add-double/2addr" Format12x None [CONT | REG | WIDE];
        0xcc "sub-double/2addr" Format12x None [CONT | REG | WIDE];
        0xcd "mul-double/2addr" Format12x None [CONT | REG | WIDE];
        0xce "div-double/2addr" Format12x None [CONT | REG | WIDE];
        0xcf "rem-double/2addr" Format12x None [CONT | REG | WIDE];
        0xd0 "add-int/lit16" Format22s None [CONT | REG];
        0xd1 "rsub-int" Format22s None [CONT | REG];
        0xd2 "mul-int/lit16" Format22s None [CONT | REG];
        0xd3 "div-int/lit16" Format22s None [CONT | THROW | REG];
        0xd4 "rem-int/lit16" Format22s None [CONT | THROW | REG];
        0xd5 "and-int/lit16" Format22s None [CONT | REG];
        0xd6 "or-int/lit16" Format22s None [CONT | REG];
        0xd7 "xor-int/lit16" Format22s None [CONT | REG];
        0xd8 "add-int/lit8" Format22b None [CONT | REG];
        0xd9 "rsub-int/lit8" Format22b None [CONT | REG];
        0xda "mul-int/lit8" Format22b None [CONT | REG];
        0xdb "div-int/lit8" Format22b None [CONT | THROW | REG];
        0xdc "rem-int/lit8" Format22b None [CONT | THROW | REG];
        0xdd "and-int/lit8" Format22b None [CONT | REG];
        0xde "or-int/lit8" Format22b None [CONT | REG];
        0xdf "xor-int/lit8" Format22b None [CONT | REG];
        0xe0 "shl-int/lit8" Format22b None [CONT | REG];
        0xe1 "shr-int/lit8" Format22b None [CONT | REG];
        0xe2 "ushr-int/lit8" Format22b None [CONT | REG];
        0xfa "invoke-polymorphic" Format45cc Method [CONT | THROW | RESULT];
        0xfb "invoke-polymorphic/range" Format4rcc Method [CONT | THROW | RESULT];
        0xfc "invoke-custom" Format35c CallSite [CONT | THROW | RESULT];
        0xfd "invoke-custom/range" Format3rc CallSite [CONT | THROW | RESULT];
        0xfe "const-method-handle" Format21c MethodHandle [CONT | THROW | REG];
        0xff "const-method-type" Format21c MethodProto [CONT | THROW | REG];
    ]
});

static BY_VALUE: Lazy<HashMap<u8, &'static Opcode>> =
    Lazy::new(|| OPCODES.iter().map(|o| (o.value, o)).collect());
