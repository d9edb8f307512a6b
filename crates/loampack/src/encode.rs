//! Value to bytes.

use crate::bits::BitWriter;
use crate::error::Error;
use crate::error::Result;
use crate::types::EnumType;
use crate::types::Segment;
use crate::types::StructType;
use crate::types::Type;
use crate::value::Value;

/// Encodes `value` as `ty` into a fresh buffer.
pub fn encode(ty: &Type, value: &Value) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    encode_into(ty, value, &mut buf)?;
    Ok(buf)
}

/// Appends the encoding of `value` as `ty` to `buf`.
///
/// Integer values are accepted for any integer type they fit in. On error `buf`
/// may hold a partial encoding.
///
/// # Errors
/// - `TypeMismatch` if the value has the wrong shape.
/// - `ValueOutOfRange` if an integer does not fit the type.
/// - `UnknownEnumConstant` for an undeclared constant name.
/// - `MissingField` if struct members are missing or out of order.
pub fn encode_into(ty: &Type, value: &Value, buf: &mut Vec<u8>) -> Result<()> {
    if ty.is_bitfield() {
        // A bit-field outside a struct is a run of one.
        let mut run = BitWriter::new();
        run.put(bit_value(ty, value)?, width_of(ty)?)?;
        buf.extend_from_slice(&run.finish());
        return Ok(());
    }

    match (ty, value) {
        (Type::F32, Value::F32(v)) => buf.extend_from_slice(&v.to_le_bytes()),
        (Type::Enum(e), Value::Enum(constant)) => {
            let raw = enum_value(e, constant)?;
            put_int(e.backing(), raw as i128, buf)?;
        }
        (Type::String, Value::String(s)) => buf.extend_from_slice(s.as_bytes()),
        (Type::Bytes, Value::Bytes(b)) => buf.extend_from_slice(b),
        (Type::List(elem), Value::List(items)) => {
            for item in items {
                encode_into(elem, item, buf)?;
            }
        }
        (Type::Struct(s), Value::Struct(members)) => encode_struct(s, members, buf)?,
        _ if ty.is_integer() => {
            let raw = value.as_int().ok_or_else(|| mismatch(ty, value))?;
            put_int(ty, raw, buf)?;
        }
        _ => return Err(mismatch(ty, value)),
    }
    Ok(())
}

fn encode_struct(s: &StructType, members: &[(String, Value)], buf: &mut Vec<u8>) -> Result<()> {
    let fields = s.fields();
    for (i, field) in fields.iter().enumerate() {
        match members.get(i) {
            Some((name, _)) if *name == field.name => {}
            _ => return Err(Error::MissingField { name: field.name.clone() }),
        }
    }
    if let Some((extra, _)) = members.get(fields.len()) {
        return Err(Error::TypeMismatch {
            expected: s.name().to_string(),
            found: format!("struct with extra member {}", extra),
        });
    }

    for segment in s.segments() {
        match segment {
            Segment::Member(i) => encode_into(&fields[*i].ty, &members[*i].1, buf)?,
            Segment::Bits { members: run, .. } => {
                let mut writer = BitWriter::new();
                for i in run.clone() {
                    let ty = &fields[i].ty;
                    writer.put(bit_value(ty, &members[i].1)?, width_of(ty)?)?;
                }
                buf.extend_from_slice(&writer.finish());
            }
        }
    }
    Ok(())
}

/// Raw unsigned value of a bit-field member.
fn bit_value(ty: &Type, value: &Value) -> Result<u64> {
    let raw = match (ty, value) {
        (Type::Enum(e), Value::Enum(constant)) => enum_value(e, constant)? as i128,
        (Type::Bits(_), _) => value.as_int().ok_or_else(|| mismatch(ty, value))?,
        _ => return Err(mismatch(ty, value)),
    };
    u64::try_from(raw).map_err(|_| Error::ValueOutOfRange { ty: ty.to_string(), value: raw as u64 })
}

fn width_of(ty: &Type) -> Result<u32> {
    ty.bit_width().ok_or_else(|| Error::InvalidBitWidth(0))
}

fn enum_value(e: &EnumType, constant: &str) -> Result<i64> {
    e.value_of(constant).ok_or_else(|| Error::UnknownEnumConstant {
        name: e.name().to_string(),
        constant: constant.to_string(),
    })
}

fn put_int(ty: &Type, raw: i128, buf: &mut Vec<u8>) -> Result<()> {
    let (min, max) = ty.int_range().ok_or_else(|| Error::TypeMismatch {
        expected: "integer type".to_string(),
        found: ty.to_string(),
    })?;
    if raw < min || raw > max {
        return Err(Error::ValueOutOfRange { ty: ty.to_string(), value: raw as u64 });
    }
    let size = ty.fixed_size().unwrap_or(0);
    // Truncating to the low bytes is two's complement for the signed types.
    buf.extend_from_slice(&(raw as u64).to_le_bytes()[..size]);
    Ok(())
}

fn mismatch(ty: &Type, value: &Value) -> Error {
    Error::TypeMismatch { expected: ty.to_string(), found: value.kind().to_string() }
}
