use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{debug, warn};

use crate::Result;

/// Largest payload that fits a single IPv4 UDP datagram.
pub const MAX_DATAGRAM_BYTES: usize = 65_507;

/// Receive buffer we ask the kernel for on video sockets. UDP bursts larger
/// than this get dropped before userspace ever sees them.
const RECV_BUFFER_BYTES: usize = 2 * 1024 * 1024;

/// Single-hop LAN: datagrams never cross a router.
const MULTICAST_TTL: u32 = 1;

const SEND_RETRY_CAP: usize = 10;

/// Sending half of a multicast channel. One sender serves both ports; the
/// destination is picked per send.
#[derive(Debug)]
pub struct MulticastSender {
    socket: UdpSocket,
    group: Ipv4Addr,
}

impl MulticastSender {
    /// Build the broadcaster-side send socket: TTL 1, multicast loopback
    /// disabled so the broadcaster never consumes its own stream.
    pub fn new(group: Ipv4Addr) -> Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_multicast_ttl_v4(MULTICAST_TTL)?;
        socket.set_multicast_loop_v4(false)?;
        socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0).into())?;
        socket.set_nonblocking(true)?;

        let socket = UdpSocket::from_std(socket.into())?;
        Ok(Self { socket, group })
    }

    /// Send one logical message, split into datagrams of at most
    /// [`MAX_DATAGRAM_BYTES`]. Partial sends are retried up to a cap.
    pub async fn send(&self, msg: &[u8], port: u16) -> Result<usize> {
        let addr = SocketAddr::from(SocketAddrV4::new(self.group, port));
        let mut sent_total = 0;
        for chunk in msg.chunks(MAX_DATAGRAM_BYTES) {
            sent_total += self.send_datagram(chunk, addr).await?;
        }
        Ok(sent_total)
    }

    async fn send_datagram(&self, mut payload: &[u8], addr: SocketAddr) -> Result<usize> {
        let total = payload.len();
        let mut attempts = 0;
        loop {
            let sent = self.socket.send_to(payload, addr).await?;
            if sent >= payload.len() {
                return Ok(total);
            }
            // Not known to happen with UDP, but cheap to guard.
            payload = &payload[sent..];
            attempts += 1;
            if attempts > SEND_RETRY_CAP {
                warn!(
                    remaining = payload.len(),
                    attempts, "Unable to send full message; giving up"
                );
                return Ok(total - payload.len());
            }
        }
    }
}

/// Receiving half of one multicast channel (one port).
#[derive(Debug)]
pub struct MulticastReceiver {
    socket: UdpSocket,
    buf: Vec<u8>,
}

impl MulticastReceiver {
    /// Join the group on one port. The kernel receive buffer is raised so a
    /// slow wakeup does not translate into UDP drops; the achieved size is
    /// logged because it is capped by `net.core.rmem_max`.
    pub fn join(group: Ipv4Addr, port: u16) -> Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_recv_buffer_size(RECV_BUFFER_BYTES)?;
        socket.bind(&SocketAddrV4::new(group, port).into())?;
        socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
        socket.set_nonblocking(true)?;

        let achieved = socket.recv_buffer_size().unwrap_or(0);
        if achieved < RECV_BUFFER_BYTES {
            warn!(
                requested = RECV_BUFFER_BYTES,
                achieved,
                "Kernel clamped the receive buffer; consider raising net.core.rmem_max"
            );
        } else {
            debug!(achieved, %group, port, "Joined multicast group");
        }

        let socket = UdpSocket::from_std(socket.into())?;
        Ok(Self {
            socket,
            // Sized to the max datagram so messages are never silently
            // truncated: one datagram in, one complete message out.
            buf: vec![0u8; MAX_DATAGRAM_BYTES],
        })
    }

    /// Receive one datagram; one datagram is one message boundary.
    pub async fn recv(&mut self) -> Result<&[u8]> {
        let len = self.socket.recv(&mut self.buf).await?;
        Ok(&self.buf[..len])
    }

    /// Receive one datagram into an owned buffer.
    pub async fn recv_owned(&mut self) -> Result<Vec<u8>> {
        let len = self.socket.recv(&mut self.buf).await?;
        Ok(self.buf[..len].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Loopback-only tests: multicast to 239.x on the loopback interface works
    // on Linux once the receiver binds the group and joins on ANY.
    const TEST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 77, 77);

    #[tokio::test]
    async fn sender_chunks_large_messages() {
        let sender = MulticastSender::new(TEST_GROUP).expect("sender");
        let msg = vec![7u8; MAX_DATAGRAM_BYTES + 100];
        // Two datagrams' worth of payload is accepted in full. Hosts without
        // a multicast-capable route (some CI sandboxes) surface an error
        // instead, which is not what this test is about.
        match sender.send(&msg, 40123).await {
            Ok(sent) => assert_eq!(sent, msg.len()),
            Err(e) => eprintln!("skipping: no multicast route ({e})"),
        }
    }

    #[tokio::test]
    async fn small_message_fits_one_datagram() {
        let sender = MulticastSender::new(TEST_GROUP).expect("sender");
        match sender.send(b"hello", 40124).await {
            Ok(sent) => assert_eq!(sent, 5),
            Err(e) => eprintln!("skipping: no multicast route ({e})"),
        }
    }
}
