//! # Type Model
//!
//! The immutable description of everything that can cross the wire.
//!
//! ## Invariants
//! - **Validated Once**: `EnumType` and `StructType` can only be obtained through their
//!   builders, which reject malformed schemas. A `Type` built from them is wire-safe.
//! - **Single Derived Length**: A struct holds at most one variable-length member. Its
//!   layout (`Segment`s and the combined size of the fixed members) is computed up front.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use crate::error::Error;
use crate::error::Result;

/// Widest bit-field accepted, strictly less than a machine word.
pub const MAX_BIT_WIDTH: u32 = 63;

/// A schema type.
///
/// Enum and struct definitions are shared behind `Arc`, so cloning a `Type` is cheap
/// and two handles to the same definition compare equal.
#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    /// Unsigned bit-field of the given width. Only valid as a struct member.
    Bits(u32),
    Enum(Arc<EnumType>),
    Struct(Arc<StructType>),
    /// UTF-8 text, no terminator.
    String,
    /// Raw bytes.
    Bytes,
    /// Sequence of fixed-size, byte-aligned elements.
    List(Box<Type>),
}

impl Type {
    /// Builds a bit-field type, checking the width.
    pub fn bits(width: u32) -> Result<Type> {
        let ty = Type::Bits(width);
        ty.check()?;
        Ok(ty)
    }

    /// Builds a list type, checking that the element is fixed-size and byte aligned.
    pub fn list(elem: Type) -> Result<Type> {
        let ty = Type::List(Box::new(elem));
        ty.check()?;
        Ok(ty)
    }

    /// Validates types assembled by hand rather than through the builders.
    pub fn check(&self) -> Result<()> {
        match self {
            Type::Bits(w) => {
                if *w == 0 || *w > MAX_BIT_WIDTH {
                    return Err(Error::InvalidBitWidth(*w));
                }
                Ok(())
            }
            Type::List(elem) => {
                elem.check()?;
                if elem.is_bitfield() || elem.fixed_size().unwrap_or(0) == 0 {
                    return Err(Error::InvalidListElement(elem.to_string()));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// True for the integer primitives.
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            Type::U8 | Type::I8 | Type::U16 | Type::I16 | Type::U32 | Type::I32 | Type::U64 | Type::I64
        )
    }

    /// True for the signed integer primitives.
    pub fn is_signed(&self) -> bool {
        matches!(self, Type::I8 | Type::I16 | Type::I32 | Type::I64)
    }

    /// True for members that take part in bit-packing runs.
    pub fn is_bitfield(&self) -> bool {
        match self {
            Type::Bits(_) => true,
            Type::Enum(e) => e.backing.is_bitfield(),
            _ => false,
        }
    }

    /// Width in bits of a bit-field member.
    pub fn bit_width(&self) -> Option<u32> {
        match self {
            Type::Bits(w) => Some(*w),
            Type::Enum(e) => e.backing.bit_width(),
            _ => None,
        }
    }

    /// Encoded size in bytes, or `None` when the size depends on the value.
    ///
    /// A lone bit-field rounds up to whole bytes, as if it were a run of one.
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            Type::U8 | Type::I8 => Some(1),
            Type::U16 | Type::I16 => Some(2),
            Type::U32 | Type::I32 | Type::F32 => Some(4),
            Type::U64 | Type::I64 => Some(8),
            Type::Bits(w) => Some((*w as usize).div_ceil(8)),
            Type::Enum(e) => e.backing.fixed_size(),
            Type::Struct(s) => s.fixed_size(),
            Type::String | Type::Bytes | Type::List(_) => None,
        }
    }

    /// True when the encoded length is derived from the enclosing span.
    pub fn is_variable(&self) -> bool {
        self.fixed_size().is_none()
    }

    /// Inclusive range of values representable by an integer or bit-field type.
    pub(crate) fn int_range(&self) -> Option<(i128, i128)> {
        let range = match self {
            Type::U8 => (0, u8::MAX as i128),
            Type::I8 => (i8::MIN as i128, i8::MAX as i128),
            Type::U16 => (0, u16::MAX as i128),
            Type::I16 => (i16::MIN as i128, i16::MAX as i128),
            Type::U32 => (0, u32::MAX as i128),
            Type::I32 => (i32::MIN as i128, i32::MAX as i128),
            Type::U64 => (0, u64::MAX as i128),
            Type::I64 => (i64::MIN as i128, i64::MAX as i128),
            Type::Bits(w) => (0, (1i128 << w) - 1),
            _ => return None,
        };
        Some(range)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::U8 => write!(f, "u8"),
            Type::I8 => write!(f, "i8"),
            Type::U16 => write!(f, "u16"),
            Type::I16 => write!(f, "i16"),
            Type::U32 => write!(f, "u32"),
            Type::I32 => write!(f, "i32"),
            Type::U64 => write!(f, "u64"),
            Type::I64 => write!(f, "i64"),
            Type::F32 => write!(f, "f32"),
            Type::Bits(w) => write!(f, "bits<{}>", w),
            Type::Enum(e) => write!(f, "{}", e.name),
            Type::Struct(s) => write!(f, "{}", s.name),
            Type::String => write!(f, "string"),
            Type::Bytes => write!(f, "bytes"),
            Type::List(elem) => write!(f, "list<{}>", elem),
        }
    }
}

// ============================================================================
//  ENUMS
// ============================================================================

/// A named set of integer constants over a backing type.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumType {
    name: String,
    backing: Type,
    constants: Vec<(String, i64)>,
}

impl EnumType {
    /// Starts declaring an enum backed by an integer primitive or a bit-field.
    pub fn builder(name: impl Into<String>, backing: Type) -> EnumBuilder {
        EnumBuilder {
            name: name.into(),
            backing,
            constants: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backing(&self) -> &Type {
        &self.backing
    }

    /// Constants in declaration order.
    pub fn constants(&self) -> &[(String, i64)] {
        &self.constants
    }

    /// Looks up the value of a constant by name.
    pub fn value_of(&self, constant: &str) -> Option<i64> {
        self.constants.iter().find(|(n, _)| n == constant).map(|(_, v)| *v)
    }

    /// Looks up the constant carrying `value`.
    pub fn constant_of(&self, value: i64) -> Option<&str> {
        self.constants.iter().find(|(_, v)| *v == value).map(|(n, _)| n.as_str())
    }
}

/// Declares an `EnumType`.
pub struct EnumBuilder {
    name: String,
    backing: Type,
    constants: Vec<(String, i64)>,
}

impl EnumBuilder {
    pub fn constant(mut self, name: impl Into<String>, value: i64) -> Self {
        self.constants.push((name.into(), value));
        self
    }

    /// Validates the declaration.
    ///
    /// # Errors
    /// - `InvalidEnumBacking` unless the backing type is an integer or a valid bit-field.
    /// - `Empty` when no constants were declared.
    /// - `DuplicateName` when a name or a value repeats.
    /// - `EnumValueOutOfRange` when a constant does not fit the backing type.
    pub fn build(self) -> Result<Type> {
        let backing_ok = self.backing.is_integer() || matches!(self.backing, Type::Bits(_));
        if !backing_ok || self.backing.check().is_err() {
            return Err(Error::InvalidEnumBacking { name: self.name });
        }
        if self.constants.is_empty() {
            return Err(Error::Empty(self.name));
        }

        let (min, max) = self.backing.int_range().ok_or_else(|| Error::InvalidEnumBacking {
            name: self.name.clone(),
        })?;

        for (i, (constant, value)) in self.constants.iter().enumerate() {
            let earlier = &self.constants[..i];
            if earlier.iter().any(|(n, v)| n == constant || v == value) {
                return Err(Error::DuplicateName { scope: self.name.clone(), name: constant.clone() });
            }
            let wide = *value as i128;
            if wide < min || wide > max {
                return Err(Error::EnumValueOutOfRange {
                    name: self.name.clone(),
                    constant: constant.clone(),
                    value: *value,
                });
            }
        }

        Ok(Type::Enum(Arc::new(EnumType {
            name: self.name,
            backing: self.backing,
            constants: self.constants,
        })))
    }
}

// ============================================================================
//  STRUCTS
// ============================================================================

/// A named struct member.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub ty: Type,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self { name: name.into(), ty }
    }
}

/// One step of a struct's wire layout.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// A single byte-aligned member, by index.
    Member(usize),
    /// A maximal run of bit-field members packed into `size` bytes.
    Bits { members: Range<usize>, size: usize },
}

/// An ordered, fixed sequence of members with at most one variable-length member.
#[derive(Debug, Clone, PartialEq)]
pub struct StructType {
    name: String,
    fields: Vec<Field>,
    segments: Vec<Segment>,
    variable: Option<usize>,
    fixed_bytes: usize,
}

impl StructType {
    /// Starts declaring a struct.
    pub fn builder(name: impl Into<String>) -> StructBuilder {
        StructBuilder { name: name.into(), fields: Vec::new() }
    }

    /// Lays out a named struct.
    pub fn new(name: impl Into<String>, fields: Vec<Field>) -> Result<Self> {
        let name = name.into();
        if fields.is_empty() {
            return Err(Error::Empty(name));
        }
        Self::layout(name, fields)
    }

    /// Lays out an anonymous member tuple, such as a parameter list. May be empty.
    pub fn tuple(name: impl Into<String>, fields: Vec<Field>) -> Result<Self> {
        Self::layout(name.into(), fields)
    }

    fn layout(name: String, fields: Vec<Field>) -> Result<Self> {
        let mut variable = None;
        for (i, field) in fields.iter().enumerate() {
            field.ty.check()?;
            if fields[..i].iter().any(|f| f.name == field.name) {
                return Err(Error::DuplicateName { scope: name, name: field.name.clone() });
            }
            if field.ty.is_variable() {
                if variable.is_some() {
                    return Err(Error::MultipleVariableMembers { name });
                }
                variable = Some(i);
            }
        }

        let mut segments = Vec::new();
        let mut fixed_bytes = 0;
        let mut i = 0;
        while i < fields.len() {
            if fields[i].ty.is_bitfield() {
                let start = i;
                let mut total_bits = 0usize;
                while i < fields.len() {
                    let Some(width) = fields[i].ty.bit_width() else { break };
                    total_bits += width as usize;
                    i += 1;
                }
                let size = total_bits.div_ceil(8);
                fixed_bytes += size;
                segments.push(Segment::Bits { members: start..i, size });
            } else {
                if variable != Some(i) {
                    fixed_bytes += fields[i].ty.fixed_size().unwrap_or(0);
                }
                segments.push(Segment::Member(i));
                i += 1;
            }
        }

        Ok(Self { name, fields, segments, variable, fixed_bytes })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Wire layout in declaration order.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Index of the variable-length member, if any.
    pub fn variable_member(&self) -> Option<usize> {
        self.variable
    }

    /// Combined encoded size of every member except the variable-length one.
    pub fn fixed_bytes(&self) -> usize {
        self.fixed_bytes
    }

    pub fn fixed_size(&self) -> Option<usize> {
        match self.variable {
            Some(_) => None,
            None => Some(self.fixed_bytes),
        }
    }
}

/// Declares a `StructType`.
pub struct StructBuilder {
    name: String,
    fields: Vec<Field>,
}

impl StructBuilder {
    pub fn field(mut self, name: impl Into<String>, ty: Type) -> Self {
        self.fields.push(Field::new(name, ty));
        self
    }

    /// Validates the declaration and computes its layout.
    ///
    /// # Errors
    /// - `Empty` when no members were declared.
    /// - `DuplicateName` when two members share a name.
    /// - `MultipleVariableMembers` when more than one member has a derived length.
    pub fn build(self) -> Result<Type> {
        Ok(Type::Struct(Arc::new(StructType::new(self.name, self.fields)?)))
    }
}
