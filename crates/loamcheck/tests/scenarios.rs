//! The reference scenarios, driven through the generated bindings against the mock
//! device, in-process and as a child process.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;

use loamcheck::bindings::BitfieldStruct;
use loamcheck::bindings::BitfieldsArgs;
use loamcheck::bindings::BitwiseComplementArgs;
use loamcheck::bindings::Client;
use loamcheck::bindings::DateArgs;
use loamcheck::bindings::HeartbeatArgs;
use loamcheck::bindings::ListFirstAttr;
use loamcheck::bindings::ListLastAttr;
use loamcheck::bindings::ListMidAttr;
use loamcheck::bindings::MockMotorControl;
use loamcheck::bindings::MockMotorReport;
use loamcheck::bindings::MotorControlArgs;
use loamcheck::bindings::MotorDirection;
use loamcheck::bindings::MotorReportArgs;
use loamcheck::bindings::MotorState;
use loamcheck::bindings::Voltages;
use loamcheck::bindings::BITWISE_COMPLEMENT_ID;
use loamcheck::bindings::DATE_ID;
use loamcheck::bindings::HEARTBEAT_ID;
use loamcheck::device;
use loamcheck::protocol::test_protocol;
use loamgen::CTarget;
use loamgen::RustTarget;
use loamgen::Target;
use loamrun::Peer;
use loamrun::PeerConfig;
use loamrun::RemoteFailure;
use loamrun::config::loopback;
use loamrun::peer::Error;
use loamrun::transport::ChannelTransport;
use loamrun::transport::ProcessTransport;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A host linked to an attached mock device.
fn linked() -> anyhow::Result<(Peer, Peer)> {
    init_tracing();
    let protocol = Arc::new(test_protocol()?);
    let (a, b) = loopback();
    let host = Peer::new(PeerConfig::host("host"), protocol.clone(), a);
    let device = Peer::new(PeerConfig::device("device"), protocol, b);
    device::attach(&device)?;
    Ok((host, device))
}

/// A callback that forwards every value into a channel.
fn forward<T: Send + 'static>() -> (impl Fn(T) + Send + Sync + 'static, mpsc::UnboundedReceiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        move |value| {
            let _ = tx.send(value);
        },
        rx,
    )
}

async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> anyhow::Result<T> {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await?
        .ok_or_else(|| anyhow::anyhow!("subscription channel closed"))
}

fn has_line(text: &str, line: &str) -> bool {
    text.lines().any(|l| l.trim() == line)
}

// ============================================================================
//  CALLS
// ============================================================================

#[tokio::test]
async fn test_scalar_calls() -> anyhow::Result<()> {
    let (host, _device) = linked()?;
    let rpc = Client::new(&host);

    assert_eq!(rpc.add_int(5, 3).await?, 8);
    assert_eq!(rpc.add_int(u32::MAX, 2).await?, 1);
    assert_eq!(rpc.sum_list(vec![1, 2, 3, 4, 5, 6]).await?, 21);
    assert_eq!(rpc.sum_list(Vec::new()).await?, 0);
    rpc.void_return(-7).await?;
    rpc.void_full().await?;

    assert_eq!(rpc.divide_float(8.0, 1.0).await?, 8.0);
    let ratio = rpc.divide_float(88.16, 856.3).await?;
    assert!((ratio - 0.102_954_57).abs() < 1e-5);
    Ok(())
}

#[tokio::test]
async fn test_strings_and_bytes() -> anyhow::Result<()> {
    let (host, _device) = linked()?;
    let rpc = Client::new(&host);

    assert_eq!(rpc.caesar_cipher("secret".into(), 1).await?, "tfdsfu");
    assert_eq!(rpc.caesar_cipher(String::new(), 9).await?, "");
    assert_eq!(rpc.sort_bytes(vec![3, 1, 2]).await?, vec![1, 2, 3]);
    assert_eq!(rpc.emoji("😘".into()).await?, "🥰");
    assert_eq!(rpc.emoji("😛".into()).await?, "🤔");
    Ok(())
}

#[tokio::test]
async fn test_list_position_in_struct() -> anyhow::Result<()> {
    let (host, _device) = linked()?;
    let rpc = Client::new(&host);
    let data = vec![4, -3, 7, 2];

    assert_eq!(rpc.list_first_attr(data.clone()).await?, ListFirstAttr { data: data.clone(), min: -3, max: 7 });
    assert_eq!(rpc.list_mid_attr(data.clone()).await?, ListMidAttr { min: -3, data: data.clone(), max: 7 });
    assert_eq!(rpc.list_last_attr(data.clone()).await?, ListLastAttr { min: -3, max: 7, data });

    let empty = rpc.list_mid_attr(Vec::new()).await?;
    assert!(empty.data.is_empty());
    assert_eq!((empty.min, empty.max), (i16::MAX, i16::MIN));
    Ok(())
}

#[tokio::test]
async fn test_nested_structs() -> anyhow::Result<()> {
    let (host, _device) = linked()?;
    let rpc = Client::new(&host);

    let date = rpc.epoch_to_date(1_706_109_534).await?;
    assert_eq!((date.day, date.month, date.year), (24, 1, 2024));
    assert_eq!(date.as_text, "24012024");

    let now = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH)?.as_secs() as i32;
    let lfsr = rpc.get_random_number(0x1111_1111_1111_1118, 1).await?;
    let current = rpc.epoch_to_date(now).await?;
    assert_eq!(lfsr.value, 0x0888_8888_8888_888C);
    assert_eq!(lfsr.polynomial, 0xD800_0000_0000_0000);
    assert_eq!(lfsr.timestamp.year, current.year);
    assert_eq!(lfsr.timestamp.as_text.len(), 8);
    Ok(())
}

#[tokio::test]
async fn test_struct_in_param() -> anyhow::Result<()> {
    let (host, _device) = linked()?;
    let rpc = Client::new(&host);

    let structure = ListFirstAttr { data: vec![1, 2, 3, 4, 5, 10, 6, 7, 8, 9], min: 1, max: 10 };
    rpc.struct_in_param(structure).await?;

    let wrong = ListFirstAttr { data: vec![1, 10], min: 1, max: 10 };
    let err = rpc.struct_in_param(wrong).await.unwrap_err();
    assert!(matches!(err, Error::Remote(RemoteFailure::Failed(_))));
    Ok(())
}

#[tokio::test]
async fn test_concurrent_calls() -> anyhow::Result<()> {
    let (host, _device) = linked()?;
    let host = Arc::new(host);

    let mut calls = JoinSet::new();
    for i in 0..64u32 {
        let host = host.clone();
        calls.spawn(async move { (i, Client::new(&host).add_int(i, 1000).await) });
    }
    while let Some(joined) = calls.join_next().await {
        let (i, sum) = joined?;
        assert_eq!(sum?, i + 1000);
    }
    Ok(())
}

#[tokio::test]
async fn test_unserved_and_silent_devices() -> anyhow::Result<()> {
    init_tracing();
    let protocol = Arc::new(test_protocol()?);

    // A device without handlers answers Unsupported.
    let (a, b) = loopback();
    let host = Peer::new(PeerConfig::host("host"), protocol.clone(), a);
    let _bare = Peer::new(PeerConfig::device("bare"), protocol.clone(), b);
    let err = Client::new(&host).add_int(1, 2).await.unwrap_err();
    assert_eq!(err, Error::Remote(RemoteFailure::Unsupported));

    // A device that never answers runs into the timeout.
    let (a, _silent) = ChannelTransport::pair();
    let host = Peer::new(
        PeerConfig::host("host").with_timeout(Some(Duration::from_millis(50))),
        protocol,
        Box::new(a),
    );
    let err = Client::new(&host).void_full().await.unwrap_err();
    assert_eq!(err, Error::CallTimeout);
    Ok(())
}

// ============================================================================
//  NOTIFICATIONS
// ============================================================================

#[tokio::test]
async fn test_triggered_notifications() -> anyhow::Result<()> {
    let (host, _device) = linked()?;
    let rpc = Client::new(&host);

    let (on_heartbeat, mut heartbeats) = forward::<HeartbeatArgs>();
    let (on_complement, mut complements) = forward::<BitwiseComplementArgs>();
    let (on_date, mut dates) = forward::<DateArgs>();
    rpc.on_heartbeat(on_heartbeat)?;
    rpc.on_bitwise_complement(on_complement)?;
    rpc.on_date(on_date)?;

    rpc.trigger_notification(HEARTBEAT_ID).await?;
    next(&mut heartbeats).await?;

    rpc.trigger_notification(BITWISE_COMPLEMENT_ID).await?;
    let pair = next(&mut complements).await?;
    assert_eq!(pair.value, 0xAAAA_AAAA_AAAA_AAAA);
    assert_eq!(pair.complement, 0x5555_5555_5555_5555);

    rpc.trigger_notification(DATE_ID).await?;
    let date = next(&mut dates).await?.date;
    assert!(date.year >= 2024);
    assert_eq!(date.as_text.len(), 8);

    // Unknown ids are ignored.
    rpc.trigger_notification(0xFFFF).await?;
    Ok(())
}

#[tokio::test]
async fn test_bitfields_are_complemented() -> anyhow::Result<()> {
    let (host, _device) = linked()?;
    let rpc = Client::new(&host);
    let (on_bitfields, mut replies) = forward::<BitfieldsArgs>();
    rpc.on_bitfields(on_bitfields)?;

    let config = BitfieldStruct {
        channel: 0,
        inom: 1,
        hsc: 0,
        tnom: 1,
        temp: Voltages::MV_110_92,
        ststart: 1,
        ccm: 0,
        set: 1,
        state: 0,
        clear: 1,
    };
    rpc.notify_bitfields(config.clone()).await?;

    let reply = next(&mut replies).await?.config;
    assert_eq!(reply.channel, !config.channel);
    assert_eq!(reply.inom, !config.inom & 0x1F);
    assert_eq!(reply.hsc, !config.hsc & 0x0F);
    assert_eq!(reply.tnom, !config.tnom & 0x1FF);
    assert_eq!(reply.temp, Voltages::MV_37_50);
    assert_eq!(reply.ststart, !config.ststart & 0x07);
    assert_eq!((reply.ccm, reply.set, reply.state, reply.clear), (1, 0, 1, 0));
    Ok(())
}

#[tokio::test]
async fn test_motor_control_is_answered_with_report() -> anyhow::Result<()> {
    let (host, _device) = linked()?;
    let rpc = Client::new(&host);
    let (on_report, mut reports) = forward::<MotorReportArgs>();
    rpc.on_motor_report(on_report)?;

    let control = MockMotorControl { state: MotorState::ON, direction: MotorDirection::UP, pwm_duty: 50 };
    rpc.notify_motor_control(control).await?;

    let report = next(&mut reports).await?.report;
    assert_eq!(report.state, MotorState::STOP);
    assert_eq!(report.direction, MotorDirection::DOWN);
    assert_eq!(report.voltage, (11..31).collect::<Vec<u16>>());
    Ok(())
}

#[tokio::test]
async fn test_motor_report_is_answered_with_control() -> anyhow::Result<()> {
    let (host, _device) = linked()?;
    let rpc = Client::new(&host);
    let (on_control, mut controls) = forward::<MotorControlArgs>();
    rpc.on_motor_control(on_control)?;

    let report = MockMotorReport { state: MotorState::START, direction: MotorDirection::UP, voltage: vec![230; 20] };
    rpc.notify_motor_report(report).await?;

    let control = next(&mut controls).await?.control;
    assert_eq!(control, MockMotorControl { state: MotorState::STOP, direction: MotorDirection::DOWN, pwm_duty: 1200 });
    Ok(())
}

// ============================================================================
//  CHILD PROCESS
// ============================================================================

#[tokio::test]
async fn test_mock_device_process() -> anyhow::Result<()> {
    init_tracing();
    let transport = ProcessTransport::spawn(&[env!("CARGO_BIN_EXE_mock_device")])?;
    let host = Peer::new(PeerConfig::host("host"), Arc::new(test_protocol()?), Box::new(transport));
    let rpc = Client::new(&host);

    let (on_heartbeat, mut heartbeats) = forward::<HeartbeatArgs>();
    rpc.on_heartbeat(on_heartbeat)?;

    assert_eq!(rpc.add_int(40, 2).await?, 42);
    assert_eq!(rpc.caesar_cipher("secret".into(), 1).await?, "tfdsfu");
    assert_eq!(rpc.epoch_to_date(1_706_109_534).await?.as_text, "24012024");
    rpc.trigger_notification(HEARTBEAT_ID).await?;
    next(&mut heartbeats).await?;

    host.shutdown().await?;
    Ok(())
}

// ============================================================================
//  GENERATED SOURCES
// ============================================================================

#[test]
fn test_reference_protocol_generates_c() -> anyhow::Result<()> {
    let protocol = test_protocol()?;
    let files = CTarget.generate(&protocol);
    let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["test_protocol.h", "test_protocol.c"]);

    let h = &files[0].contents;
    assert!(has_line(h, "#define TEST_PROTOCOL_ADD_INT_ID 0x0C00"));
    assert!(has_line(h, "#define TEST_PROTOCOL_MOTOR_CONTROL_ID 0x0E06"));
    // 37 bits of bit-fields round up to five bytes.
    assert!(has_line(h, "#define BITFIELD_STRUCT_FIXED 5"));
    assert!(has_line(h, "#define VOLTAGES_MV_37_50 (10)"));
    assert!(has_line(h, "int test_protocol_handle_add_int(const struct test_protocol_add_int_args *args, uint32_t *ret);"));
    Ok(())
}

#[test]
fn test_build_script_output_is_current() -> anyhow::Result<()> {
    let files = RustTarget.generate(&test_protocol()?);
    let built = std::fs::read_to_string(concat!(env!("OUT_DIR"), "/test_protocol.rs"))?;
    assert_eq!(files[0].contents, built);

    let files = CTarget.generate(&test_protocol()?);
    let built = std::fs::read_to_string(concat!(env!("OUT_DIR"), "/test_protocol.c"))?;
    assert_eq!(files[1].contents, built);
    Ok(())
}
