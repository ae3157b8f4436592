//! Read-only constant-pool lookup consumed by the IR.
//!
//! The pool is populated once (typically while walking a container file's
//! string/type/field/method id tables) and then only read; decoded methods
//! hold plain `u32` indices into it, never references, so a pool can be
//! shared across any number of method IRs.

use serde::{Deserialize, Serialize};

use crate::error::LirError;
use crate::ir::PoolRefKind;

/// Marker for an absent pool index (`0xffffffff` in the container format).
/// Only nullable sites (debug-info source files, local-variable names and
/// types) may carry it; instruction operands never do.
pub const NO_INDEX: u32 = 0xffff_ffff;

/// A field reference: declaring class, field type and field name, all as
/// pool indices (class and type are type indices, the name a string index).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRef {
    pub class_idx: u32,
    pub type_idx: u32,
    pub name_idx: u32,
}

/// A method reference: declaring class (type index), method name (string
/// index) and the rendered prototype descriptor, e.g. `(ILjava/lang/String;)V`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodRef {
    pub class_idx: u32,
    pub name_idx: u32,
    pub proto: String,
}

#[derive(Debug, Default)]
pub struct ConstantPool {
    strings: Vec<String>,
    types: Vec<u32>, // descriptor string indices
    fields: Vec<FieldRef>,
    methods: Vec<MethodRef>,
}

impl ConstantPool {
    pub fn new() -> ConstantPool {
        ConstantPool::default()
    }

    /// Appends an already-decoded string, returning its index.
    pub fn add_string(&mut self, value: &str) -> u32 {
        self.strings.push(value.to_string());
        (self.strings.len() - 1) as u32
    }

    /// Appends a string given in the container's modified-UTF-8 encoding.
    pub fn add_string_mutf8(&mut self, raw: &[u8]) -> Result<u32, LirError> {
        let decoded = cesu8::from_java_cesu8(raw)
            .map_err(|_| err!("invalid modified-UTF-8 string data"))?;
        Ok(self.add_string(&decoded))
    }

    /// Appends a type whose descriptor is the given string index.
    pub fn add_type(&mut self, descriptor_idx: u32) -> u32 {
        self.types.push(descriptor_idx);
        (self.types.len() - 1) as u32
    }

    /// Convenience: interns the descriptor string and the type in one step.
    pub fn add_type_desc(&mut self, descriptor: &str) -> u32 {
        let s = self.add_string(descriptor);
        self.add_type(s)
    }

    pub fn add_field(&mut self, class_idx: u32, type_idx: u32, name_idx: u32) -> u32 {
        self.fields.push(FieldRef { class_idx, type_idx, name_idx });
        (self.fields.len() - 1) as u32
    }

    pub fn add_method(&mut self, class_idx: u32, name_idx: u32, proto: &str) -> u32 {
        self.methods.push(MethodRef { class_idx, name_idx, proto: proto.to_string() });
        (self.methods.len() - 1) as u32
    }

    pub fn string_at(&self, index: u32) -> Option<&str> {
        self.strings.get(index as usize).map(|s| s.as_str())
    }

    /// Resolves a type index to its descriptor string.
    pub fn type_at(&self, index: u32) -> Option<&str> {
        let desc_idx = *self.types.get(index as usize)?;
        self.string_at(desc_idx)
    }

    pub fn field_at(&self, index: u32) -> Option<&FieldRef> {
        self.fields.get(index as usize)
    }

    pub fn method_at(&self, index: u32) -> Option<&MethodRef> {
        self.methods.get(index as usize)
    }

    /// True when `index` resolves for the given reference kind.
    pub fn resolves(&self, kind: PoolRefKind, index: u32) -> bool {
        match kind {
            PoolRefKind::String => self.string_at(index).is_some(),
            PoolRefKind::Type => self.type_at(index).is_some(),
            PoolRefKind::Field => self.field_at(index).is_some(),
            PoolRefKind::Method => self.method_at(index).is_some(),
        }
    }

    /// Renders a field reference as `Lcls;->name:Type`.
    pub fn display_field(&self, index: u32) -> Option<String> {
        let f = self.field_at(index)?;
        Some(format!(
            "{}->{}:{}",
            self.type_at(f.class_idx)?,
            self.string_at(f.name_idx)?,
            self.type_at(f.type_idx)?
        ))
    }

    /// Renders a method reference as `Lcls;->name(args)ret`.
    pub fn display_method(&self, index: u32) -> Option<String> {
        let m = self.method_at(index)?;
        Some(format!(
            "{}->{}{}",
            self.type_at(m.class_idx)?,
            self.string_at(m.name_idx)?,
            m.proto
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_pool() -> ConstantPool {
        let mut pool = ConstantPool::new();
        let name = pool.add_string("value");
        let obj = pool.add_type_desc("Ljava/lang/Object;");
        let int_ty = pool.add_type_desc("I");
        pool.add_field(obj, int_ty, name);
        pool.add_method(obj, name, "()I");
        pool
    }

    #[test]
    fn lookups_resolve() {
        let pool = sample_pool();
        assert_eq!(pool.string_at(0), Some("value"));
        assert_eq!(pool.type_at(0), Some("Ljava/lang/Object;"));
        assert_eq!(pool.display_field(0).unwrap(), "Ljava/lang/Object;->value:I");
        assert_eq!(pool.display_method(0).unwrap(), "Ljava/lang/Object;->value()I");
    }

    #[test]
    fn out_of_range_and_no_index_do_not_resolve() {
        let pool = sample_pool();
        assert!(pool.string_at(99).is_none());
        assert!(pool.string_at(NO_INDEX).is_none());
        assert!(!pool.resolves(PoolRefKind::Method, 7));
    }

    #[test]
    fn mutf8_strings_decode() {
        let mut pool = ConstantPool::new();
        let idx = pool.add_string_mutf8(b"plain ascii").unwrap();
        assert_eq!(pool.string_at(idx), Some("plain ascii"));

        // embedded NUL uses the two-byte form 0xc0 0x80
        let idx = pool.add_string_mutf8(&[0x61, 0xc0, 0x80, 0x62]).unwrap();
        assert_eq!(pool.string_at(idx), Some("a\0b"));
    }
}
