use crate::*;

fn status() -> Type {
    EnumType::builder("Status", Type::U8)
        .constant("OK", 0)
        .constant("WARN", 1)
        .constant("ERR", 2)
        .constant("FAIL", 255)
        .build()
        .unwrap()
}

fn voltages() -> Type {
    let mut builder = EnumType::builder("Voltages", Type::Bits(4));
    for (i, name) in ["MV_0", "MV_12_50", "MV_25_00", "MV_37_50"].iter().enumerate() {
        builder = builder.constant(*name, i as i64 * 3);
    }
    builder.build().unwrap()
}

fn list_struct(order: &[&str]) -> Type {
    let mut builder = StructType::builder("Limits");
    for name in order {
        let ty = match *name {
            "data" => Type::list(Type::I16).unwrap(),
            _ => Type::I16,
        };
        builder = builder.field(*name, ty);
    }
    builder.build().unwrap()
}

fn limits(data: &[i16]) -> Vec<(&'static str, Value)> {
    vec![
        ("min", Value::I16(-7)),
        ("max", Value::I16(300)),
        ("data", Value::List(data.iter().map(|v| Value::I16(*v)).collect())),
    ]
}

fn ordered(order: &[&str], members: &[(&'static str, Value)]) -> Value {
    Value::record(order.iter().map(|name| {
        let (_, value) = members.iter().find(|(n, _)| n == name).unwrap();
        (*name, value.clone())
    }))
}

// ============================================================================
//  SCALARS
// ============================================================================

#[test]
fn test_scalars_little_endian() -> Result<()> {
    assert_eq!(encode(&Type::U16, &Value::U16(0x1234))?, vec![0x34, 0x12]);
    assert_eq!(encode(&Type::I32, &Value::I32(-2))?, vec![0xFE, 0xFF, 0xFF, 0xFF]);
    assert_eq!(encode(&Type::U64, &Value::U64(1))?, vec![1, 0, 0, 0, 0, 0, 0, 0]);
    assert_eq!(encode(&Type::F32, &Value::F32(1.0))?, 1.0f32.to_le_bytes().to_vec());
    Ok(())
}

#[test]
fn test_scalar_roundtrip_extremes() -> Result<()> {
    let cases = [
        (Type::U8, Value::U8(u8::MAX)),
        (Type::I8, Value::I8(i8::MIN)),
        (Type::U16, Value::U16(u16::MAX)),
        (Type::I16, Value::I16(i16::MIN)),
        (Type::U32, Value::U32(u32::MAX)),
        (Type::I32, Value::I32(i32::MIN)),
        (Type::U64, Value::U64(u64::MAX)),
        (Type::I64, Value::I64(i64::MIN)),
        (Type::F32, Value::F32(-0.5)),
    ];
    for (ty, value) in cases {
        let bytes = encode(&ty, &value)?;
        assert_eq!(Some(bytes.len()), ty.fixed_size());
        assert_eq!(decode_exact(&ty, &bytes)?, value);
    }
    Ok(())
}

#[test]
fn test_integer_values_widen_into_any_fitting_type() -> Result<()> {
    assert_eq!(encode(&Type::U16, &Value::I32(513))?, vec![0x01, 0x02]);
    assert!(matches!(
        encode(&Type::U8, &Value::U32(300)),
        Err(Error::ValueOutOfRange { .. })
    ));
    assert!(matches!(
        encode(&Type::U32, &Value::I8(-1)),
        Err(Error::ValueOutOfRange { .. })
    ));
    Ok(())
}

#[test]
fn test_decode_fixed_consumes_only_its_size() -> Result<()> {
    let (value, consumed) = decode(&Type::U16, &[1, 2, 3])?;
    assert_eq!(value, Value::U16(0x0201));
    assert_eq!(consumed, 2);
    assert_eq!(
        decode_exact(&Type::U16, &[1, 2, 3]),
        Err(Error::TrailingBytes { consumed: 2, available: 3 })
    );
    assert_eq!(
        decode(&Type::U32, &[1, 2]),
        Err(Error::TruncatedMessage { needed: 4, available: 2 })
    );
    Ok(())
}

#[test]
fn test_type_mismatch() {
    assert!(matches!(
        encode(&Type::String, &Value::U8(1)),
        Err(Error::TypeMismatch { .. })
    ));
    assert!(matches!(
        encode(&Type::F32, &Value::U32(1)),
        Err(Error::TypeMismatch { .. })
    ));
}

// ============================================================================
//  VARIABLE LENGTH
// ============================================================================

#[test]
fn test_string_and_bytes_take_whole_span() -> Result<()> {
    let (value, consumed) = decode(&Type::String, b"secret")?;
    assert_eq!(value, Value::String("secret".into()));
    assert_eq!(consumed, 6);
    assert_eq!(decode_exact(&Type::Bytes, &[3, 1, 2])?, Value::Bytes(vec![3, 1, 2]));
    assert_eq!(decode_exact(&Type::String, &[])?, Value::String(String::new()));
    assert_eq!(decode(&Type::String, &[0xFF, 0xFE]), Err(Error::InvalidUtf8));
    Ok(())
}

#[test]
fn test_list_element_count_from_length() -> Result<()> {
    let ty = Type::list(Type::U32)?;
    let bytes = encode(&ty, &Value::List((1..=6).map(Value::U32).collect()))?;
    assert_eq!(bytes.len(), 24);
    assert_eq!(decode_exact(&ty, &bytes)?.as_list().map(|l| l.len()), Some(6));

    assert_eq!(
        decode(&ty, &bytes[..23]),
        Err(Error::TruncatedMessage { needed: 24, available: 23 })
    );
    Ok(())
}

#[test]
fn test_variable_member_in_any_position() -> Result<()> {
    let members = limits(&[1, 2, 3]);
    for order in [["data", "min", "max"], ["min", "data", "max"], ["min", "max", "data"]] {
        let ty = list_struct(&order);
        assert_eq!(ty.fixed_size(), None);

        let value = ordered(&order, &members);
        let bytes = encode(&ty, &value)?;
        assert_eq!(bytes.len(), 4 + 3 * 2, "order {:?}", order);

        let decoded = decode_exact(&ty, &bytes)?;
        assert_eq!(decoded, value);
        assert_eq!(decoded.member("min"), Some(&Value::I16(-7)));
        assert_eq!(decoded.member("max"), Some(&Value::I16(300)));

        // Odd remainder cannot split into i16 elements.
        let mut odd = bytes.clone();
        odd.push(0);
        assert!(matches!(decode(&ty, &odd), Err(Error::TruncatedMessage { .. })));
    }
    Ok(())
}

#[test]
fn test_variable_member_layout_bytes() -> Result<()> {
    let order = ["min", "data", "max"];
    let bytes = encode(&list_struct(&order), &ordered(&order, &limits(&[1, 2])))?;
    assert_eq!(bytes, vec![0xF9, 0xFF, 1, 0, 2, 0, 0x2C, 0x01]);
    Ok(())
}

#[test]
fn test_empty_variable_member() -> Result<()> {
    let order = ["data", "min", "max"];
    let ty = list_struct(&order);
    let value = ordered(&order, &limits(&[]));
    let bytes = encode(&ty, &value)?;
    assert_eq!(bytes.len(), 4);
    assert_eq!(decode_exact(&ty, &bytes)?, value);
    assert!(matches!(decode(&ty, &bytes[..3]), Err(Error::TruncatedMessage { .. })));
    Ok(())
}

#[test]
fn test_nested_struct_spans() -> Result<()> {
    let header = StructType::builder("Header")
        .field("kind", Type::U8)
        .field("flags", Type::Bits(4))
        .build()?;
    let message = StructType::builder("Message")
        .field("header", header.clone())
        .field("text", Type::String)
        .field("crc", Type::U16)
        .build()?;
    let list = Type::list(header)?;

    let value = Value::record([
        (
            "header",
            Value::record([("kind", Value::U8(7)), ("flags", Value::Bits(0xA))]),
        ),
        ("text", Value::String("hi".into())),
        ("crc", Value::U16(0xBEEF)),
    ]);
    let bytes = encode(&message, &value)?;
    assert_eq!(bytes, vec![7, 0x0A, b'h', b'i', 0xEF, 0xBE]);
    assert_eq!(decode_exact(&message, &bytes)?, value);

    // Fixed-size structs are valid list elements.
    assert_eq!(decode_exact(&list, &[1, 2, 3, 4])?.as_list().map(|l| l.len()), Some(2));
    Ok(())
}

// ============================================================================
//  BIT RUNS
// ============================================================================

#[test]
fn test_bit_run_lsb_first() -> Result<()> {
    let ty = StructType::builder("Run")
        .field("a", Type::Bits(3))
        .field("b", Type::Bits(4))
        .field("c", Type::Bits(2))
        .build()?;
    let value = Value::record([("a", Value::Bits(5)), ("b", Value::Bits(0xA)), ("c", Value::Bits(3))]);

    let bytes = encode(&ty, &value)?;
    assert_eq!(bytes, vec![0xD5, 0x01]);
    assert_eq!(decode_exact(&ty, &bytes)?, value);

    // Padding bits in the final byte are ignored.
    assert_eq!(decode_exact(&ty, &[0xD5, 0xFF])?, value);
    Ok(())
}

#[test]
fn test_field_after_full_byte_starts_next_byte() -> Result<()> {
    let ty = StructType::builder("Split")
        .field("x", Type::Bits(8))
        .field("y", Type::Bits(4))
        .build()?;
    let bytes = encode(&ty, &Value::record([("x", Value::Bits(0xAB)), ("y", Value::Bits(5))]))?;
    assert_eq!(bytes, vec![0xAB, 0x05]);
    Ok(())
}

#[test]
fn test_runs_are_split_by_byte_members() -> Result<()> {
    let ty = StructType::builder("Mixed")
        .field("lo", Type::Bits(1))
        .field("mid", Type::U8)
        .field("hi", Type::Bits(1))
        .build()?;
    assert_eq!(ty.fixed_size(), Some(3));
    let bytes = encode(
        &ty,
        &Value::record([("lo", Value::Bits(1)), ("mid", Value::U8(0x80)), ("hi", Value::Bits(1))]),
    )?;
    assert_eq!(bytes, vec![0x01, 0x80, 0x01]);
    Ok(())
}

#[test]
fn test_bitfield_struct_size() -> Result<()> {
    let ty = StructType::builder("BitfieldStruct")
        .field("channel", Type::Bits(8))
        .field("inom", Type::Bits(5))
        .field("hsc", Type::Bits(4))
        .field("tnom", Type::Bits(9))
        .field("temp", voltages())
        .field("ststart", Type::Bits(3))
        .field("ccm", Type::Bits(1))
        .field("set", Type::Bits(1))
        .field("state", Type::Bits(1))
        .field("clear", Type::Bits(1))
        .build()?;
    // 37 bits round up to 5 bytes.
    assert_eq!(ty.fixed_size(), Some(5));

    let value = Value::record([
        ("channel", Value::Bits(200)),
        ("inom", Value::Bits(31)),
        ("hsc", Value::Bits(0)),
        ("tnom", Value::Bits(511)),
        ("temp", Value::Enum("MV_37_50".into())),
        ("ststart", Value::Bits(5)),
        ("ccm", Value::Bits(1)),
        ("set", Value::Bits(0)),
        ("state", Value::Bits(1)),
        ("clear", Value::Bits(0)),
    ]);
    let bytes = encode(&ty, &value)?;
    assert_eq!(bytes.len(), 5);
    assert_eq!(bytes[4] >> 5, 0, "padding must be zero");
    assert_eq!(decode_exact(&ty, &bytes)?, value);
    Ok(())
}

#[test]
fn test_bit_value_out_of_range() {
    let ty = StructType::builder("Narrow").field("n", Type::Bits(3)).build().unwrap();
    assert!(matches!(
        encode(&ty, &Value::record([("n", Value::Bits(8))])),
        Err(Error::ValueOutOfRange { .. })
    ));
}

#[test]
fn test_bit_cursors() -> Result<()> {
    let mut writer = BitWriter::new();
    writer.put(1, 1)?;
    writer.put(0x3FF, 10)?;
    assert_eq!(writer.bit_len(), 11);
    let bytes = writer.finish();
    assert_eq!(bytes, vec![0xFF, 0x07]);

    let mut reader = BitReader::new(&bytes);
    assert_eq!(reader.take(1)?, 1);
    assert_eq!(reader.take(10)?, 0x3FF);
    assert_eq!(reader.position(), 11);
    assert!(matches!(reader.take(8), Err(Error::TruncatedMessage { .. })));
    Ok(())
}

// ============================================================================
//  ENUMS
// ============================================================================

#[test]
fn test_enum_boundary() -> Result<()> {
    let ty = status();
    for (name, raw) in [("OK", 0u8), ("WARN", 1), ("ERR", 2), ("FAIL", 255)] {
        let value = Value::Enum(name.into());
        assert_eq!(encode(&ty, &value)?, vec![raw]);
        assert_eq!(decode_exact(&ty, &[raw])?, value);
    }
    assert_eq!(
        decode(&ty, &[3]),
        Err(Error::InvalidEnumValue { name: "Status".into(), value: 3 })
    );
    assert!(matches!(
        encode(&ty, &Value::Enum("MAYBE".into())),
        Err(Error::UnknownEnumConstant { .. })
    ));
    Ok(())
}

#[test]
fn test_signed_enum_backing() -> Result<()> {
    let ty = EnumType::builder("Direction", Type::I8)
        .constant("DOWN", -1)
        .constant("UP", 1)
        .build()?;
    assert_eq!(encode(&ty, &Value::Enum("DOWN".into()))?, vec![0xFF]);
    assert_eq!(decode_exact(&ty, &[0xFF])?, Value::Enum("DOWN".into()));
    Ok(())
}

#[test]
fn test_bitfield_enum_in_struct_rejects_unknown_raw() {
    let ty = StructType::builder("Reading")
        .field("temp", voltages())
        .field("rest", Type::Bits(4))
        .build()
        .unwrap();
    // 4 is not a declared constant (0, 3, 6, 9).
    assert_eq!(
        decode(&ty, &[0x04]),
        Err(Error::InvalidEnumValue { name: "Voltages".into(), value: 4 })
    );
}

// ============================================================================
//  SCHEMA VALIDATION
// ============================================================================

#[test]
fn test_rejects_two_variable_members() {
    let result = StructType::builder("Date")
        .field("as_text", Type::String)
        .field("as_digits", Type::Bytes)
        .build();
    assert_eq!(result, Err(Error::MultipleVariableMembers { name: "Date".into() }));

    // A nested variable struct counts as the variable member.
    let inner = StructType::builder("Inner").field("s", Type::String).build().unwrap();
    let result = StructType::builder("Outer")
        .field("inner", inner)
        .field("tail", Type::Bytes)
        .build();
    assert!(matches!(result, Err(Error::MultipleVariableMembers { .. })));
}

#[test]
fn test_rejects_bad_bit_widths() {
    assert_eq!(Type::bits(0), Err(Error::InvalidBitWidth(0)));
    assert_eq!(Type::bits(64), Err(Error::InvalidBitWidth(64)));
    assert!(Type::bits(MAX_BIT_WIDTH).is_ok());
    let result = StructType::builder("S").field("x", Type::Bits(70)).build();
    assert_eq!(result, Err(Error::InvalidBitWidth(70)));
}

#[test]
fn test_rejects_bad_list_elements() {
    assert!(matches!(Type::list(Type::String), Err(Error::InvalidListElement(_))));
    assert!(matches!(Type::list(Type::Bits(3)), Err(Error::InvalidListElement(_))));
    assert!(matches!(Type::list(voltages()), Err(Error::InvalidListElement(_))));
    assert!(Type::list(status()).is_ok());
}

#[test]
fn test_rejects_bad_enums() {
    assert!(matches!(
        EnumType::builder("E", Type::F32).constant("A", 0).build(),
        Err(Error::InvalidEnumBacking { .. })
    ));
    assert!(matches!(EnumType::builder("E", Type::U8).build(), Err(Error::Empty(_))));
    assert!(matches!(
        EnumType::builder("E", Type::U8).constant("A", 256).build(),
        Err(Error::EnumValueOutOfRange { .. })
    ));
    assert!(matches!(
        EnumType::builder("E", Type::Bits(2)).constant("A", 4).build(),
        Err(Error::EnumValueOutOfRange { .. })
    ));
    assert!(matches!(
        EnumType::builder("E", Type::U8).constant("A", 1).constant("B", 1).build(),
        Err(Error::DuplicateName { .. })
    ));
}

#[test]
fn test_rejects_bad_structs() {
    assert!(matches!(StructType::builder("S").build(), Err(Error::Empty(_))));
    assert!(matches!(
        StructType::builder("S").field("a", Type::U8).field("a", Type::U16).build(),
        Err(Error::DuplicateName { .. })
    ));
    assert!(StructType::tuple("args", vec![]).is_ok());
}

#[test]
fn test_struct_value_must_follow_declaration_order() {
    let ty = StructType::builder("Pair")
        .field("a", Type::U8)
        .field("b", Type::U8)
        .build()
        .unwrap();
    assert_eq!(
        encode(&ty, &Value::record([("b", Value::U8(1)), ("a", Value::U8(2))])),
        Err(Error::MissingField { name: "a".into() })
    );
    assert_eq!(
        encode(&ty, &Value::record([("a", Value::U8(1))])),
        Err(Error::MissingField { name: "b".into() })
    );
}

// ============================================================================
//  PACK PARITY
// ============================================================================

#[test]
fn test_pack_matches_dynamic_codec() -> Result<()> {
    let list = vec![-1i16, 2, 300];
    let dynamic = encode(
        &Type::list(Type::I16)?,
        &Value::List(list.iter().map(|v| Value::I16(*v)).collect()),
    )?;
    assert_eq!(list.to_bytes()?, dynamic);
    assert_eq!(Vec::<i16>::from_bytes(&dynamic)?, list);

    assert_eq!(0xBEEFu16.to_bytes()?, encode(&Type::U16, &Value::U16(0xBEEF))?);
    assert_eq!(String::from_bytes(b"tfdsfu")?, "tfdsfu");
    assert_eq!(<u32 as Pack>::FIXED_SIZE, Some(4));
    assert_eq!(<Vec<u8> as Pack>::FIXED_SIZE, None);
    Ok(())
}

#[test]
fn test_pack_errors() {
    assert!(matches!(u32::unpack(&[1, 2]), Err(Error::TruncatedMessage { .. })));
    assert!(matches!(Vec::<u16>::unpack(&[1, 2, 3]), Err(Error::TruncatedMessage { .. })));
    assert!(matches!(u8::from_bytes(&[1, 2]), Err(Error::TrailingBytes { .. })));
    assert!(matches!(Vec::<String>::unpack(b"ab"), Err(Error::InvalidListElement(_))));
    assert_eq!(window(&[1, 2, 3], 1, 2), Ok(&[2u8, 3][..]));
    assert_eq!(derived_len(10, 4), Ok(6));
    assert!(derived_len(3, 4).is_err());
}
