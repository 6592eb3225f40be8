//! Datagram I/O for callers that want it.
//!
//! The coordinator itself never touches a socket. These are the two calls
//! an event loop needs to shuttle bytes between the network and
//! [`HandshakeCoordinator`](crate::HandshakeCoordinator) or
//! [`Listener`](crate::Listener).

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

/// Largest datagram we read.
const RECV_BUFFER: usize = 65_535;

pub trait Transport {
    fn send(&mut self, datagram: &[u8], peer: SocketAddr) -> io::Result<usize>;

    /// `Ok(None)` when nothing is waiting.
    fn recv_nonblocking(&mut self) -> io::Result<Option<(Vec<u8>, SocketAddr)>>;
}

/// [`Transport`] over a non-blocking UDP socket.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    recv_buffer: Vec<u8>,
}

impl UdpTransport {
    pub fn bind(addr: impl ToSocketAddrs) -> io::Result<Self> {
        Self::from_socket(UdpSocket::bind(addr)?)
    }

    /// Wrap an existing socket, switching it to non-blocking mode.
    pub fn from_socket(socket: UdpSocket) -> io::Result<Self> {
        socket.set_nonblocking(true)?;
        Ok(UdpTransport {
            socket,
            recv_buffer: vec![0; RECV_BUFFER],
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, datagram: &[u8], peer: SocketAddr) -> io::Result<usize> {
        match self.socket.send_to(datagram, peer) {
            Ok(sent) => {
                trace!("Sent {} bytes to {}", sent, peer);
                Ok(sent)
            }
            // A full send buffer loses the datagram like the network would.
            // Retransmission covers it.
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                debug!("Send to {} would block, dropping datagram", peer);
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    fn recv_nonblocking(&mut self) -> io::Result<Option<(Vec<u8>, SocketAddr)>> {
        match self.socket.recv_from(&mut self.recv_buffer) {
            Ok((len, src)) => {
                trace!("Received {} bytes from {}", len, src);
                Ok(Some((self.recv_buffer[..len].to_vec(), src)))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(e),
        }
    }
}
