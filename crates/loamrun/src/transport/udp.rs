//! UDP transport. One datagram carries one frame, no length prefix.
//!
//! Lost datagrams are not retried; the runtime reports them as call timeouts.

use tokio::net::UdpSocket;

use super::Error;
use super::MAX_FRAME_LEN;
use super::Result;
use super::Transport;

pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Binds to `bind` (or an ephemeral port of the matching family) and fixes
    /// `target` as the only peer.
    pub async fn connect(target: &str, bind: Option<&str>) -> Result<Self> {
        let local = match bind {
            Some(addr) => addr.to_string(),
            None => match tokio::net::lookup_host(target).await {
                Ok(mut addrs) => match addrs.next() {
                    Some(a) if a.is_ipv6() => "[::]:0".to_string(),
                    _ => "0.0.0.0:0".to_string(),
                },
                Err(e) => return Err(Error::Unavailable(format!("udp {}: {}", target, e))),
            },
        };
        let socket = UdpSocket::bind(&local)
            .await
            .map_err(|e| Error::Unavailable(format!("udp bind {}: {}", local, e)))?;
        socket
            .connect(target)
            .await
            .map_err(|e| Error::Unavailable(format!("udp {}: {}", target, e)))?;
        Ok(Self { socket })
    }

    /// Local address the socket is bound to.
    pub fn local_addr(&self) -> Result<String> {
        Ok(self.socket.local_addr()?.to_string())
    }
}

#[async_trait::async_trait]
impl Transport for UdpTransport {
    async fn send(&self, frame: &[u8]) -> Result<()> {
        if frame.len() > MAX_FRAME_LEN {
            return Err(Error::FrameTooLarge(frame.len()));
        }
        self.socket.send(frame).await?;
        Ok(())
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; MAX_FRAME_LEN + 1];
        loop {
            match self.socket.recv(&mut buf).await {
                Ok(len) => {
                    buf.truncate(len);
                    return Ok(Some(buf));
                }
                // ICMP unreachable from an earlier send, the link itself is still usable.
                Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                    tracing::debug!(error = %e, "udp peer unreachable");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
