//! UDP socket helpers

use std::net::SocketAddr;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use crate::error::NetworkError;

/// Bind a non-blocking UDP socket registered with the tokio runtime.
///
/// The port is held exclusively: a second bind of the same address fails
/// with [`NetworkError::BindFailed`]. UDP ports have no TIME_WAIT, so a
/// restarted session rebinds as soon as the previous socket is dropped.
pub fn bind_socket(addr: SocketAddr, broadcast: bool) -> Result<UdpSocket, NetworkError> {
    let bind_err = |source: std::io::Error| NetworkError::BindFailed { addr, source };

    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
        .map_err(bind_err)?;
    if broadcast {
        socket.set_broadcast(true).map_err(bind_err)?;
    }
    socket.set_nonblocking(true).map_err(bind_err)?;
    socket.bind(&addr.into()).map_err(bind_err)?;

    UdpSocket::from_std(socket.into()).map_err(bind_err)
}

/// Receive one datagram, giving up after `wait`
pub async fn recv_timeout(
    socket: &UdpSocket,
    buf: &mut [u8],
    wait: Duration,
) -> Result<(usize, SocketAddr), NetworkError> {
    match tokio::time::timeout(wait, socket.recv_from(buf)).await {
        Ok(Ok(received)) => Ok(received),
        Ok(Err(e)) => Err(NetworkError::from_recv(e)),
        Err(_elapsed) => Err(NetworkError::Timeout),
    }
}

/// Send a datagram that nobody waits on; failures are logged and dropped
pub async fn send_best_effort(socket: &UdpSocket, payload: &[u8], target: SocketAddr, wait: Duration) {
    match tokio::time::timeout(wait, socket.send_to(payload, target)).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => tracing::debug!("Best-effort send to {} failed: {}", target, e),
        Err(_) => tracing::debug!("Best-effort send to {} timed out", target),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn loopback() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
    }

    #[tokio::test]
    async fn test_bind_and_exchange() {
        let a = bind_socket(loopback(), false).unwrap();
        let b = bind_socket(loopback(), true).unwrap();

        a.send_to(b"ping", b.local_addr().unwrap()).await.unwrap();

        let mut buf = [0u8; 16];
        let (len, src) = recv_timeout(&b, &mut buf, Duration::from_secs(1)).await.unwrap();
        assert_eq!(&buf[..len], b"ping");
        assert_eq!(src, a.local_addr().unwrap());
    }

    #[tokio::test]
    async fn test_recv_times_out() {
        let socket = bind_socket(loopback(), false).unwrap();
        let mut buf = [0u8; 16];

        let result = recv_timeout(&socket, &mut buf, Duration::from_millis(20)).await;
        assert!(matches!(result, Err(NetworkError::Timeout)));
    }

    #[tokio::test]
    async fn test_bind_conflict_reports_address() {
        let std_socket = std::net::UdpSocket::bind(loopback()).unwrap();
        let taken = std_socket.local_addr().unwrap();

        match bind_socket(taken, false) {
            Err(NetworkError::BindFailed { addr, .. }) => assert_eq!(addr, taken),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("second bind of {taken} succeeded"),
        }
    }

    #[tokio::test]
    async fn test_port_is_exclusive() {
        let first = bind_socket(loopback(), true).unwrap();
        let taken = first.local_addr().unwrap();

        assert!(matches!(
            bind_socket(taken, true),
            Err(NetworkError::BindFailed { .. })
        ));

        // Released as soon as the holder goes away
        drop(first);
        bind_socket(taken, true).unwrap();
    }
}
