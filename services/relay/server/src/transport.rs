//! TCP transport for the relay.

use relay_wire::PACKET_SIZE;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpSocket, TcpStream};

/// Most input dropped from one connection before it is closed anyway
pub(crate) const DISCARD_LIMIT: usize = 4 * PACKET_SIZE;

/// Create a TCP listener bound to `addr` with the given accept backlog
pub fn listen_tcp(addr: SocketAddr, backlog: u32) -> tokio::io::Result<TcpListener> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(backlog)
}

/// Connect to a TCP address
pub async fn connect_tcp(addr: SocketAddr) -> tokio::io::Result<TcpStream> {
    TcpStream::connect(addr).await
}

/// Drop whatever the peer already sent but nobody will read, without waiting.
///
/// Closing a socket with unread input resets the connection, which can
/// destroy a response still in flight to the peer. Stops after
/// [`DISCARD_LIMIT`] bytes so a peer that keeps sending cannot hold the loop.
/// Returns the number of bytes dropped.
pub(crate) fn discard_unread(stream: &TcpStream) -> usize {
    let mut scratch = [0u8; PACKET_SIZE];
    let mut discarded = 0;
    while discarded < DISCARD_LIMIT {
        let want = scratch.len().min(DISCARD_LIMIT - discarded);
        match stream.try_read(&mut scratch[..want]) {
            Ok(0) | Err(_) => break,
            Ok(received) => discarded += received,
        }
    }
    discarded
}
