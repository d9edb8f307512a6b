//! Integration tests for loamrun transports, configuration and wrappers.

use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::net::UdpSocket;

use loampack::Type;
use loampack::Value;
use loamrpc::Direction;
use loamrpc::Frame;
use loamrpc::FrameKind;
use loamrpc::Protocol;
use loamrpc::Signature;
use loamrpc::frame::encode_frame;

use loamrun::BlockingPeer;
use loamrun::Peer;
use loamrun::PeerConfig;
use loamrun::TcpProxy;
use loamrun::TransportConfig;
use loamrun::config::loopback;
use loamrun::transport;
use loamrun::transport::ChannelTransport;
use loamrun::transport::ProcessTransport;
use loamrun::transport::TcpTransport;
use loamrun::transport::Transport;
use loamrun::transport::UdpTransport;
use loamrun::transport::framing::read_frame;
use loamrun::transport::framing::write_frame;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn protocol() -> Arc<Protocol> {
    let protocol = Protocol::builder("suite")
        .signature(Signature::call(0xC00, "add_int").param("a", Type::U32).param("b", Type::U32).returns(Type::U32))
        .signature(Signature::notification(0xE02, "heartbeat", Direction::ToHost).param("tick", Type::U32))
        .signature(Signature::notification(0xE10, "set_led", Direction::ToDevice).param("on", Type::U8))
        .build()
        .expect("valid protocol");
    Arc::new(protocol)
}

fn serve_add(device: &Peer) {
    device
        .serve("add_int", |args| {
            let a = args[0].as_int().ok_or("a")?;
            let b = args[1].as_int().ok_or("b")?;
            Ok(Some(Value::U32((a + b) as u32)))
        })
        .expect("add_int is declared");
}

fn add_payload(frame: &[u8]) -> u32 {
    let a = u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]);
    let b = u32::from_le_bytes([frame[8], frame[9], frame[10], frame[11]]);
    a.wrapping_add(b)
}

// --- Framing ---

#[tokio::test]
async fn test_length_prefix_framing() -> anyhow::Result<()> {
    let (mut a, mut b) = tokio::io::duplex(1024);
    write_frame(&mut a, b"hello").await?;
    write_frame(&mut a, b"").await?;
    drop(a);

    assert_eq!(read_frame(&mut b).await?, Some(b"hello".to_vec()));
    assert_eq!(read_frame(&mut b).await?, Some(Vec::new()));
    assert_eq!(read_frame(&mut b).await?, None);
    Ok(())
}

#[tokio::test]
async fn test_prefix_is_little_endian() -> anyhow::Result<()> {
    let (mut a, mut b) = tokio::io::duplex(1024);
    a.write_all(&[0x03, 0x00, 1, 2, 3]).await?;
    assert_eq!(read_frame(&mut b).await?, Some(vec![1, 2, 3]));
    Ok(())
}

#[tokio::test]
async fn test_cut_frame_is_connection_lost() -> anyhow::Result<()> {
    let (mut a, mut b) = tokio::io::duplex(1024);
    a.write_all(&[5, 0, 1, 2]).await?;
    drop(a);
    assert!(matches!(read_frame(&mut b).await, Err(transport::Error::ConnectionLost(_))));
    Ok(())
}

#[tokio::test]
async fn test_oversized_frame_is_rejected() {
    let (mut a, _b) = tokio::io::duplex(1024);
    let frame = vec![0u8; 70_000];
    assert_eq!(write_frame(&mut a, &frame).await, Err(transport::Error::FrameTooLarge(70_000)));
}

// --- Configuration ---

#[test]
fn test_transport_uris() -> anyhow::Result<()> {
    let cases = [
        ("tcp://127.0.0.1:9000", TransportConfig::Tcp { addr: "127.0.0.1:9000".into() }),
        (
            "udp://10.0.0.2:5000?bind=0.0.0.0:5001",
            TransportConfig::Udp { target: "10.0.0.2:5000".into(), bind: Some("0.0.0.0:5001".into()) },
        ),
        ("udp://10.0.0.2:5000", TransportConfig::Udp { target: "10.0.0.2:5000".into(), bind: None }),
        ("serial:///dev/ttyACM0?baud=9600", TransportConfig::Serial { path: "/dev/ttyACM0".into(), baud: 9600 }),
        ("exec:./mock_device --fast", TransportConfig::Exec { argv: vec!["./mock_device".into(), "--fast".into()] }),
        ("stdio:", TransportConfig::Stdio),
    ];
    for (uri, expected) in cases {
        let parsed: TransportConfig = uri.parse()?;
        assert_eq!(parsed, expected);
        assert_eq!(parsed.to_string(), uri);
    }

    let serial: TransportConfig = "serial:///dev/ttyUSB0".parse()?;
    assert_eq!(serial, TransportConfig::Serial { path: "/dev/ttyUSB0".into(), baud: 115_200 });
    Ok(())
}

#[test]
fn test_exec_command_lines_are_quoted() -> anyhow::Result<()> {
    let parsed: TransportConfig = r#"exec:"/opt/my tools/mock_device" --name 'bench a' plain"#.parse()?;
    let argv = vec!["/opt/my tools/mock_device".to_string(), "--name".into(), "bench a".into(), "plain".into()];
    assert_eq!(parsed, TransportConfig::Exec { argv });

    let reparsed: TransportConfig = parsed.to_string().parse()?;
    assert_eq!(reparsed, parsed);
    Ok(())
}

#[test]
fn test_bad_transport_uris() {
    for uri in ["ftp://host", "tcp://", "exec:", "exec:   ", "exec:\"unclosed", "serial:///dev/x?baud=fast", "localhost:9000"] {
        let parsed = uri.parse::<TransportConfig>();
        assert!(matches!(parsed, Err(transport::Error::InvalidConfig(_))), "{} parsed as {:?}", uri, parsed);
    }
}

#[test]
fn test_peer_config_defaults() {
    let host = PeerConfig::host("bench");
    assert_eq!(host.role, loamrpc::Role::Host);
    assert_eq!(host.call_timeout, Some(loamrun::config::DEFAULT_CALL_TIMEOUT));

    let device = PeerConfig::device("dut").with_timeout(None);
    assert_eq!(device.role, loamrpc::Role::Device);
    assert_eq!(device.name, "dut");
    assert_eq!(device.call_timeout, None);
}

// --- Transports ---

#[tokio::test]
async fn test_tcp_call() -> anyhow::Result<()> {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?.to_string();

    let accept = async {
        let (stream, _) = listener.accept().await.unwrap();
        TcpTransport::from_stream(stream)
    };
    let connect = TcpTransport::connect(&addr);
    let (device_end, host_end) = tokio::join!(accept, connect);

    let device = Peer::new(PeerConfig::device("tcp-device"), protocol(), Box::new(device_end));
    serve_add(&device);
    let host = Peer::new(PeerConfig::host("tcp-host"), protocol(), Box::new(host_end?));

    assert_eq!(host.call("add_int", &[Value::U32(3), Value::U32(5)]).await?, Some(Value::U32(8)));
    Ok(())
}

#[tokio::test]
async fn test_tcp_refused_is_unavailable() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?.to_string();
    drop(listener);

    let result = TcpTransport::connect(&addr).await;
    assert!(matches!(result, Err(transport::Error::Unavailable(_))));
    Ok(())
}

#[tokio::test]
async fn test_udp_datagram_per_frame() -> anyhow::Result<()> {
    let device = UdpSocket::bind("127.0.0.1:0").await?;
    let target = device.local_addr()?.to_string();
    let host_end = UdpTransport::connect(&target, Some("127.0.0.1:0")).await?;
    let host = Peer::new(PeerConfig::host("udp-host"), protocol(), Box::new(host_end));

    let device_side = async {
        let mut buf = [0u8; 64];
        let (len, from) = device.recv_from(&mut buf).await.unwrap();
        assert_eq!(len, 12);
        let header = Frame::decode(&buf[..len]).unwrap().header;
        let reply = encode_frame(header.reply(FrameKind::Response), &add_payload(&buf[..len]).to_le_bytes());
        device.send_to(&reply, from).await.unwrap();
    };
    let args = [Value::U32(40), Value::U32(2)];
    let (result, ()) = tokio::join!(host.call("add_int", &args), device_side);
    assert_eq!(result?, Some(Value::U32(42)));
    Ok(())
}

#[tokio::test]
async fn test_missing_program_is_unavailable() {
    let result = ProcessTransport::spawn(&["loam-no-such-program-on-path"]);
    assert!(matches!(result, Err(transport::Error::Unavailable(_))));
}

#[cfg(unix)]
#[tokio::test]
async fn test_process_transport_round_trip() -> anyhow::Result<()> {
    // `cat` echoes every frame, prefix included.
    let config: TransportConfig = "exec:cat".parse()?;
    let transport = loamrun::config::connect(&config).await?;
    transport.send(&[3, 0, 0x02, 0x0E, 7, 0, 0, 0]).await?;
    let echoed = tokio::time::timeout(Duration::from_secs(2), transport.recv()).await??;
    assert_eq!(echoed, Some(vec![3, 0, 0x02, 0x0E, 7, 0, 0, 0]));
    transport.close().await?;
    Ok(())
}

// --- Concurrency ---

#[tokio::test]
async fn test_shuffled_replies_reach_their_callers() -> anyhow::Result<()> {
    const CALLS: u32 = 32;
    let (host_end, device) = ChannelTransport::pair();
    let host = Arc::new(Peer::new(PeerConfig::host("shuffle").with_timeout(None), protocol(), Box::new(host_end)));

    let mut calls = Vec::new();
    for i in 0..CALLS {
        let host = host.clone();
        calls.push(tokio::spawn(async move {
            let result = host.call("add_int", &[Value::U32(i), Value::U32(1000)]).await;
            (i, result)
        }));
    }

    let mut requests = Vec::new();
    for _ in 0..CALLS {
        requests.push(device.recv().await?.expect("host hung up"));
    }
    requests.shuffle(&mut rand::thread_rng());
    for request in &requests {
        let header = Frame::decode(request)?.header;
        let reply = encode_frame(header.reply(FrameKind::Response), &add_payload(request).to_le_bytes());
        device.send(&reply).await?;
    }

    for call in calls {
        let (i, result) = call.await?;
        assert_eq!(result?, Some(Value::U32(i + 1000)));
    }
    Ok(())
}

// --- Wrappers ---

#[test]
fn test_blocking_peer() -> anyhow::Result<()> {
    let (a, b) = loopback();
    let device = BlockingPeer::new(PeerConfig::device("device"), protocol(), b)?;
    serve_add(device.peer());
    let host = BlockingPeer::new(PeerConfig::host("host"), protocol(), a)?;

    let (tx, rx) = std::sync::mpsc::channel();
    host.subscribe("heartbeat", move |args| {
        let _ = tx.send(args.to_vec());
    })?;

    assert_eq!(host.call("add_int", &[Value::U32(3), Value::U32(5)])?, Some(Value::U32(8)));
    device.notify("heartbeat", &[Value::U32(9)])?;
    assert_eq!(rx.recv_timeout(Duration::from_secs(1))?, vec![Value::U32(9)]);

    host.shutdown()?;
    device.shutdown()?;
    Ok(())
}

#[tokio::test]
async fn test_tcp_proxy_relays_calls_and_notifications() -> anyhow::Result<()> {
    init_tracing();
    let (a, b) = loopback();
    let device = Peer::new(PeerConfig::device("device"), protocol(), b);
    serve_add(&device);
    let (_led, mut leds) = device.notifications("set_led")?;

    let local = Arc::new(Peer::new(PeerConfig::host("local"), protocol(), a));
    let proxy = TcpProxy::bind(local.clone(), "127.0.0.1:0").await?;

    let remote_end = TcpTransport::connect(&proxy.local_addr().to_string()).await?;
    let remote = Peer::new(PeerConfig::host("remote"), protocol(), Box::new(remote_end));
    let (_beat, mut beats) = remote.notifications("heartbeat")?;

    // Local and remote callers share the device link.
    let (remote_args, local_args) = ([Value::U32(3), Value::U32(5)], [Value::U32(1), Value::U32(1)]);
    let (via_proxy, direct) = tokio::join!(remote.call("add_int", &remote_args), local.call("add_int", &local_args));
    assert_eq!(via_proxy?, Some(Value::U32(8)));
    assert_eq!(direct?, Some(Value::U32(2)));

    device.notify("heartbeat", &[Value::U32(11)]).await?;
    let beat = tokio::time::timeout(Duration::from_secs(2), beats.recv()).await?;
    assert_eq!(beat, Some(vec![Value::U32(11)]));

    remote.notify("set_led", &[Value::U8(1)]).await?;
    let led = tokio::time::timeout(Duration::from_secs(2), leds.recv()).await?;
    assert_eq!(led, Some(vec![Value::U8(1)]));
    Ok(())
}
