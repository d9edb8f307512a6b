//! # Configuration
//!
//! Typed connection parameters. Transports are described by a short URI:
//!
//! | URI                                | transport          |
//! |------------------------------------|--------------------|
//! | `tcp://host:port`                  | `TcpTransport`     |
//! | `udp://host:port[?bind=addr:port]` | `UdpTransport`     |
//! | `serial:///dev/ttyUSB0[?baud=N]`   | `SerialTransport`  |
//! | `exec:program arg ...`             | `ProcessTransport` |
//! | `stdio:`                           | `StdioTransport`   |

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use loamrpc::Role;

use crate::transport;
use crate::transport::ChannelTransport;
use crate::transport::ProcessTransport;
use crate::transport::SerialTransport;
use crate::transport::StdioTransport;
use crate::transport::TcpTransport;
use crate::transport::Transport;
use crate::transport::UdpTransport;
use crate::transport::DEFAULT_BAUD_RATE;

/// How long a call waits for its response unless configured otherwise.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(1);

/// Where and how to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportConfig {
    Tcp { addr: String },
    Udp { target: String, bind: Option<String> },
    Serial { path: String, baud: u32 },
    /// Command line split with shell quoting rules.
    Exec { argv: Vec<String> },
    Stdio,
}

impl FromStr for TransportConfig {
    type Err = transport::Error;

    fn from_str(s: &str) -> transport::Result<Self> {
        let invalid = |why: &str| transport::Error::InvalidConfig(format!("{}: {}", s, why));

        if let Some(rest) = s.strip_prefix("exec:") {
            let argv = shlex::split(rest).ok_or_else(|| invalid("unbalanced quoting"))?;
            if argv.is_empty() {
                return Err(invalid("missing command"));
            }
            return Ok(TransportConfig::Exec { argv });
        }
        if s == "stdio:" || s == "stdio://" {
            return Ok(TransportConfig::Stdio);
        }

        let (scheme, rest) = s.split_once("://").ok_or_else(|| invalid("missing scheme"))?;
        let (location, query) = match rest.split_once('?') {
            Some((l, q)) => (l, Some(q)),
            None => (rest, None),
        };
        if location.is_empty() {
            return Err(invalid("missing location"));
        }
        let params = parse_query(query);

        match scheme {
            "tcp" => Ok(TransportConfig::Tcp { addr: location.to_string() }),
            "udp" => Ok(TransportConfig::Udp {
                target: location.to_string(),
                bind: params.iter().find(|(k, _)| *k == "bind").map(|(_, v)| v.to_string()),
            }),
            "serial" => {
                let baud = match params.iter().find(|(k, _)| *k == "baud") {
                    Some((_, v)) => v.parse().map_err(|_| invalid("baud is not a number"))?,
                    None => DEFAULT_BAUD_RATE,
                };
                Ok(TransportConfig::Serial { path: location.to_string(), baud })
            }
            other => Err(invalid(&format!("unknown scheme {}", other))),
        }
    }
}

fn parse_query(query: Option<&str>) -> Vec<(&str, &str)> {
    query
        .map(|q| q.split('&').filter_map(|pair| pair.split_once('=')).collect())
        .unwrap_or_default()
}

impl fmt::Display for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportConfig::Tcp { addr } => write!(f, "tcp://{}", addr),
            TransportConfig::Udp { target, bind: Some(bind) } => write!(f, "udp://{}?bind={}", target, bind),
            TransportConfig::Udp { target, bind: None } => write!(f, "udp://{}", target),
            TransportConfig::Serial { path, baud } => write!(f, "serial://{}?baud={}", path, baud),
            TransportConfig::Exec { argv } => {
                let line = shlex::try_join(argv.iter().map(String::as_str)).unwrap_or_else(|_| argv.join(" "));
                write!(f, "exec:{}", line)
            }
            TransportConfig::Stdio => write!(f, "stdio:"),
        }
    }
}

/// Opens the transport described by `config`.
///
/// # Errors
/// `Unavailable` when the endpoint cannot be reached, the device is absent or the
/// child exits at once.
pub async fn connect(config: &TransportConfig) -> transport::Result<Box<dyn Transport>> {
    let transport: Box<dyn Transport> = match config {
        TransportConfig::Tcp { addr } => Box::new(TcpTransport::connect(addr).await?),
        TransportConfig::Udp { target, bind } => Box::new(UdpTransport::connect(target, bind.as_deref()).await?),
        TransportConfig::Serial { path, baud } => Box::new(SerialTransport::open(path, *baud)?),
        TransportConfig::Exec { argv } => Box::new(ProcessTransport::spawn(argv.as_slice())?),
        TransportConfig::Stdio => Box::new(StdioTransport::new()),
    };
    Ok(transport)
}

/// Runtime settings of one `Peer`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConfig {
    /// Shown in logs.
    pub name: String,
    pub role: Role,
    /// `None` waits forever.
    pub call_timeout: Option<Duration>,
}

impl PeerConfig {
    pub fn host(name: impl Into<String>) -> Self {
        Self { name: name.into(), role: Role::Host, call_timeout: Some(DEFAULT_CALL_TIMEOUT) }
    }

    pub fn device(name: impl Into<String>) -> Self {
        Self { role: Role::Device, ..Self::host(name) }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self::host("peer")
    }
}

/// An in-memory host/device link, for tests and simulations.
pub fn loopback() -> (Box<dyn Transport>, Box<dyn Transport>) {
    let (a, b) = ChannelTransport::pair();
    (Box::new(a), Box::new(b))
}
