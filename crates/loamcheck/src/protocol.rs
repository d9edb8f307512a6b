//! The reference protocol both ends of the suite are built from.
//!
//! Also compiled into the build script, so it only depends on `loampack` and `loamrpc`.

use loampack::EnumType;
use loampack::StructType;
use loampack::Type;
use loamrpc::Direction;
use loamrpc::Protocol;
use loamrpc::Signature;

const VOLTAGES: [&str; 16] = [
    "MV_110_92",
    "MV_98_76",
    "MV_88_07",
    "MV_78_66",
    "MV_70_38",
    "MV_63_08",
    "MV_56_64",
    "MV_50_95",
    "MV_45_92",
    "MV_41_46",
    "MV_37_50",
    "MV_37_50_1",
    "MV_37_50_2",
    "MV_37_50_3",
    "MV_37_50_4",
    "MV_37_50_5",
];

fn list_attr(name: &str, position: usize) -> loampack::Result<Type> {
    let mut fields = vec![("min", Type::I16), ("max", Type::I16)];
    fields.insert(position, ("data", Type::list(Type::I16)?));
    fields.into_iter().fold(StructType::builder(name), |s, (field, ty)| s.field(field, ty)).build()
}

/// Builds the protocol exercised by the mock device and the scenario tests.
pub fn test_protocol() -> loamrpc::Result<Protocol> {
    let status = EnumType::builder("Status", Type::U8)
        .constant("OK", 0)
        .constant("WARN", 1)
        .constant("ERR", 2)
        .constant("FAIL", 255)
        .build()?;
    let motor_state = EnumType::builder("MotorState", Type::I8)
        .constant("OFF", 0)
        .constant("ON", 1)
        .constant("START", 2)
        .constant("STOP", 3)
        .build()?;
    let motor_direction = EnumType::builder("MotorDirection", Type::I8).constant("DOWN", 0).constant("UP", 1).build()?;
    let voltages = VOLTAGES
        .iter()
        .zip(0i64..)
        .fold(EnumType::builder("Voltages", Type::bits(4)?), |e, (name, value)| e.constant(*name, value))
        .build()?;

    // 37 bits, five bytes on the wire.
    let bitfields = StructType::builder("BitfieldStruct")
        .field("channel", Type::bits(8)?)
        .field("inom", Type::bits(5)?)
        .field("hsc", Type::bits(4)?)
        .field("tnom", Type::bits(9)?)
        .field("temp", voltages)
        .field("ststart", Type::bits(3)?)
        .field("ccm", Type::bits(1)?)
        .field("set", Type::bits(1)?)
        .field("state", Type::bits(1)?)
        .field("clear", Type::bits(1)?)
        .build()?;

    let list_first = list_attr("ListFirstAttr", 0)?;
    let list_mid = list_attr("ListMidAttr", 1)?;
    let list_last = list_attr("ListLastAttr", 2)?;

    let date = StructType::builder("MockDate")
        .field("day", Type::U16)
        .field("month", Type::U8)
        .field("year", Type::I32)
        .field("as_text", Type::String)
        .build()?;
    let motor_report = StructType::builder("MockMotorReport")
        .field("state", motor_state.clone())
        .field("direction", motor_direction.clone())
        .field("voltage", Type::list(Type::U16)?)
        .build()?;
    let motor_control = StructType::builder("MockMotorControl")
        .field("state", motor_state)
        .field("direction", motor_direction)
        .field("pwm_duty", Type::U16)
        .build()?;
    let log = StructType::builder("MockLogMessage")
        .field("severity", status)
        .field("message", Type::String)
        .field("byte_xor", Type::U8)
        .build()?;
    let lfsr = StructType::builder("MockLfsr")
        .field("polynomial", Type::U64)
        .field("value", Type::U64)
        .field("timestamp", date.clone())
        .build()?;

    let i16_list = Type::list(Type::I16)?;
    Protocol::builder("TestProtocol")
        .signature(Signature::call(0xB00, "trigger_notification").param("rpc_id", Type::U16))
        .signature(Signature::call(0xC00, "add_int").param("a", Type::U32).param("b", Type::U32).returns(Type::U32))
        .signature(Signature::call(0xC01, "sum_list").param("a", Type::list(Type::U32)?).returns(Type::U32))
        .signature(Signature::call(0xC02, "void_return").param("x", Type::I16))
        .signature(Signature::call(0xC03, "void_full"))
        .signature(Signature::call(0xC04, "divide_float").param("a", Type::F32).param("b", Type::F32).returns(Type::F32))
        .signature(
            Signature::call(0xC05, "caesar_cipher")
                .param("text", Type::String)
                .param("offset", Type::U8)
                .returns(Type::String),
        )
        .signature(Signature::call(0xC06, "sort_bytes").param("data", Type::Bytes).returns(Type::Bytes))
        .signature(Signature::call(0xC07, "list_first_attr").param("data", i16_list.clone()).returns(list_first.clone()))
        .signature(Signature::call(0xC08, "list_mid_attr").param("data", i16_list.clone()).returns(list_mid))
        .signature(Signature::call(0xC09, "list_last_attr").param("data", i16_list).returns(list_last))
        .signature(Signature::call(0xC0B, "epoch_to_date").param("epoch", Type::I32).returns(date.clone()))
        .signature(Signature::call(0xC0C, "emoji").param("text", Type::String).returns(Type::String))
        .signature(
            Signature::call(0xC0E, "get_random_number")
                .param("seed", Type::U64)
                .param("iter", Type::U8)
                .returns(lfsr),
        )
        .signature(Signature::call(0xC0F, "struct_in_param").param("structure", list_first))
        .signature(Signature::notification(0xE00, "date", Direction::TwoWay).param("date", date))
        .signature(Signature::notification(0xE01, "log", Direction::ToHost).param("log", log))
        .signature(Signature::notification(0xE02, "heartbeat", Direction::ToHost))
        .signature(
            Signature::notification(0xE03, "bitwise_complement", Direction::ToHost)
                .param("value", Type::U64)
                .param("complement", Type::U64),
        )
        .signature(Signature::notification(0xE04, "bitfields", Direction::TwoWay).param("config", bitfields))
        .signature(Signature::notification(0xE05, "motor_report", Direction::TwoWay).param("report", motor_report))
        .signature(Signature::notification(0xE06, "motor_control", Direction::TwoWay).param("control", motor_control))
        .build()
}
