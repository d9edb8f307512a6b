//! Bytes to value.
//!
//! Every helper here receives the exact span of bytes belonging to the type it
//! decodes. Spans are carved from the outside in: a fixed-size type takes its size
//! from the front, the variable member of a struct takes whatever the fixed members
//! leave over.

use crate::bits::BitReader;
use crate::error::Error;
use crate::error::Result;
use crate::pack::derived_len;
use crate::pack::window;
use crate::types::EnumType;
use crate::types::Segment;
use crate::types::StructType;
use crate::types::Type;
use crate::value::Value;

/// Decodes a value of type `ty` from the front of `buf`.
///
/// A fixed-size type consumes exactly its size. A variable-length type consumes the
/// whole buffer. Returns the value and the number of bytes consumed.
///
/// # Errors
/// - `TruncatedMessage` if the buffer is too short, or a derived list length does not
///   divide into whole elements.
/// - `InvalidEnumValue` if an enum value matches no constant.
/// - `InvalidUtf8` for malformed strings.
pub fn decode(ty: &Type, buf: &[u8]) -> Result<(Value, usize)> {
    let span = match ty.fixed_size() {
        Some(size) => window(buf, 0, size)?,
        None => buf,
    };
    Ok((decode_span(ty, span)?, span.len()))
}

/// Decodes a value that must occupy all of `buf`.
pub fn decode_exact(ty: &Type, buf: &[u8]) -> Result<Value> {
    let (value, consumed) = decode(ty, buf)?;
    if consumed != buf.len() {
        return Err(Error::TrailingBytes { consumed, available: buf.len() });
    }
    Ok(value)
}

fn decode_span(ty: &Type, span: &[u8]) -> Result<Value> {
    let value = match ty {
        Type::U8 => Value::U8(le(span) as u8),
        Type::I8 => Value::I8(le(span) as u8 as i8),
        Type::U16 => Value::U16(le(span) as u16),
        Type::I16 => Value::I16(le(span) as u16 as i16),
        Type::U32 => Value::U32(le(span) as u32),
        Type::I32 => Value::I32(le(span) as u32 as i32),
        Type::U64 => Value::U64(le(span)),
        Type::I64 => Value::I64(le(span) as i64),
        Type::F32 => Value::F32(f32::from_bits(le(span) as u32)),
        Type::Bits(w) => Value::Bits(BitReader::new(span).take(*w)?),
        Type::Enum(e) => {
            let raw = if e.backing().is_bitfield() {
                BitReader::new(span).take(e.backing().bit_width().unwrap_or(0))? as i128
            } else {
                decode_span(e.backing(), span)?.as_int().unwrap_or_default()
            };
            enum_constant(e, raw)?
        }
        Type::String => {
            let text = std::str::from_utf8(span).map_err(|_| Error::InvalidUtf8)?;
            Value::String(text.to_string())
        }
        Type::Bytes => Value::Bytes(span.to_vec()),
        Type::List(elem) => {
            let width = match elem.fixed_size() {
                Some(w) if w > 0 => w,
                _ => return Err(Error::InvalidListElement(elem.to_string())),
            };
            let rem = span.len() % width;
            if rem != 0 {
                return Err(Error::TruncatedMessage {
                    needed: span.len() + (width - rem),
                    available: span.len(),
                });
            }
            let items = span
                .chunks_exact(width)
                .map(|chunk| decode_span(elem, chunk))
                .collect::<Result<Vec<_>>>()?;
            Value::List(items)
        }
        Type::Struct(s) => decode_struct(s, span)?,
    };
    Ok(value)
}

fn decode_struct(s: &StructType, span: &[u8]) -> Result<Value> {
    let var_len = derived_len(span.len(), s.fixed_bytes())?;
    let fields = s.fields();
    let mut members = Vec::with_capacity(fields.len());
    let mut offset = 0;

    for segment in s.segments() {
        match segment {
            Segment::Member(i) => {
                let field = &fields[*i];
                let size = match s.variable_member() {
                    Some(v) if v == *i => var_len,
                    _ => field.ty.fixed_size().unwrap_or(0),
                };
                let value = decode_span(&field.ty, window(span, offset, size)?)?;
                members.push((field.name.clone(), value));
                offset += size;
            }
            Segment::Bits { members: run, size } => {
                let mut reader = BitReader::new(window(span, offset, *size)?);
                for field in &fields[run.clone()] {
                    let raw = reader.take(field.ty.bit_width().unwrap_or(0))?;
                    let value = match &field.ty {
                        Type::Enum(e) => enum_constant(e, raw as i128)?,
                        _ => Value::Bits(raw),
                    };
                    members.push((field.name.clone(), value));
                }
                offset += size;
            }
        }
    }
    Ok(Value::Struct(members))
}

fn enum_constant(e: &EnumType, raw: i128) -> Result<Value> {
    let value = raw as i64;
    match e.constant_of(value) {
        Some(constant) => Ok(Value::Enum(constant.to_string())),
        None => Err(Error::InvalidEnumValue { name: e.name().to_string(), value }),
    }
}

/// Little-endian bytes to an unsigned integer, at most eight bytes.
fn le(span: &[u8]) -> u64 {
    span.iter().take(8).enumerate().fold(0u64, |acc, (i, b)| acc | (*b as u64) << (8 * i))
}
