//! UDP plumbing shared by the multicast adapters

use std::io;
use std::net::{Ipv4Addr, SocketAddr};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Instant};
use tracing::debug;

/// Bind an ephemeral UDP socket, send `payload` to `group` and return the
/// socket so unicast replies can be collected on it.
pub(super) async fn send_query(group: SocketAddr, payload: &[u8]) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)).into())?;
    socket.set_multicast_ttl_v4(2)?;
    socket.set_nonblocking(true)?;

    let socket = UdpSocket::from_std(socket.into())?;
    let sent = socket.send_to(payload, group).await?;
    debug!(%group, bytes = sent, local = ?socket.local_addr().ok(), "Multicast query sent");
    Ok(socket)
}

/// Next datagram, or `None` once `deadline` passes
pub(super) async fn recv_until(
    socket: &UdpSocket,
    deadline: Instant,
    buf: &mut [u8],
) -> Option<(usize, SocketAddr)> {
    loop {
        match timeout_at(deadline, socket.recv_from(buf)).await {
            Ok(Ok(reply)) => return Some(reply),
            Ok(Err(e)) => {
                // ICMP errors surface here on some platforms; keep listening
                debug!(error = %e, "recv_from failed");
                if Instant::now() >= deadline {
                    return None;
                }
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
            Err(_) => return None,
        }
    }
}
