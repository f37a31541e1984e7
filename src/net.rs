//! The UDP listen primitive (§4.C): a thin, `quinn-udp`-backed socket wrapper that exposes
//! `recv`/`send` together with the local-destination-address metadata `quinn-udp` extracts
//! portably from the platform's ancillary/control-message data (`IP_PKTINFO` /
//! `IPV6_PKTINFO` on the platforms that have it).
//!
//! Grounded on `socket-factory`'s `UdpSocket`: same `quinn_udp::UdpSocketState` plumbing,
//! same `try_io`/`async_io` idiom for bridging `quinn-udp`'s non-async calls into tokio's
//! readiness-driven polling, trimmed down to single-datagram (non-GRO/GSO) I/O since this
//! relay never batches (see `disable_sendmmsg` in the config).

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::task::{ready, Context, Poll};

use tokio::io::Interest;

use crate::error::SoftSocketError;

/// A datagram read from a [`Socket`]. The payload itself lives in the caller-provided
/// buffer passed to [`Socket::recv`]; this only carries the metadata `quinn-udp` reported
/// alongside it.
pub struct Received {
    pub len: usize,
    pub from: SocketAddr,
    /// The local address the datagram arrived on, when the platform and socket kind report
    /// it (always `None` for sockets opened with `is_server = false`, since those only ever
    /// listen on one address).
    pub local_ip: Option<IpAddr>,
}

/// A UDP socket opened through [`listen_udp`].
pub struct Socket {
    inner: tokio::net::UdpSocket,
    state: quinn_udp::UdpSocketState,
}

impl Socket {
    pub async fn recv(&self, buf: &mut [u8]) -> io::Result<Received> {
        std::future::poll_fn(|cx| self.poll_recv(buf, cx)).await
    }

    fn poll_recv(&self, buf: &mut [u8], cx: &mut Context<'_>) -> Poll<io::Result<Received>> {
        loop {
            ready!(self.inner.poll_recv_ready(cx))?;

            let mut iov = [std::io::IoSliceMut::new(buf)];
            let mut meta = [quinn_udp::RecvMeta::default()];

            let recv = || {
                let socket = (&self.inner).into();
                self.state.recv(socket, &mut iov, &mut meta)
            };

            match self.inner.try_io(Interest::READABLE, recv) {
                Ok(n) if n > 0 => {
                    let m = &meta[0];

                    return Poll::Ready(Ok(Received {
                        len: m.len,
                        from: m.addr,
                        local_ip: m.dst_ip,
                    }));
                }
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Poll::Ready(Err(e)),
            }
        }
    }

    /// Sends `buf` to `dst`, optionally pinning the source IP to `src` so the reply leaves
    /// via the same local address the inbound datagram arrived on.
    pub async fn send(&self, buf: &[u8], dst: SocketAddr, src: Option<IpAddr>) -> io::Result<()> {
        std::future::poll_fn(|cx| self.poll_send(buf, dst, src, cx)).await
    }

    fn poll_send(
        &self,
        buf: &[u8],
        dst: SocketAddr,
        src: Option<IpAddr>,
        cx: &mut Context<'_>,
    ) -> Poll<io::Result<()>> {
        ready!(self.inner.poll_send_ready(cx))?;

        let transmit = quinn_udp::Transmit {
            destination: dst,
            ecn: None,
            contents: buf,
            segment_size: None,
            src_ip: src,
        };

        let send = || {
            let socket = (&self.inner).into();
            self.state.try_send(socket, &transmit)
        };

        match self.inner.try_io(Interest::WRITABLE, send) {
            Ok(()) => Poll::Ready(Ok(())),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                cx.waker().wake_by_ref();
                Poll::Pending
            }
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

/// Binds a UDP socket for either the shared listener (`is_server = true`) or a per-session
/// upstream socket (`is_server = false`), applying the fwmark and dual-stack options
/// described in §4.C.
///
/// Non-fatal option failures are returned alongside the socket rather than propagated.
pub fn listen_udp(
    addr: SocketAddr,
    is_server: bool,
    fwmark: u32,
) -> io::Result<(Socket, Option<SoftSocketError>)> {
    use socket2::{Domain, Protocol, Socket as Socket2, Type};

    let domain = match addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };

    let socket = Socket2::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_nonblocking(true)?;

    let mut soft_err = None;

    if is_server && domain == Domain::IPV6 {
        if let Err(source) = socket.set_only_v6(false) {
            soft_err = Some(SoftSocketError {
                option: "IPV6_V6ONLY",
                source,
            });
        }
    }

    if fwmark != 0 {
        if let Err(source) = set_fwmark(&socket, fwmark) {
            soft_err.get_or_insert(SoftSocketError {
                option: "SO_MARK",
                source,
            });
        }
    }

    socket.bind(&addr.into())?;

    let std_socket: std::net::UdpSocket = socket.into();
    let inner = tokio::net::UdpSocket::from_std(std_socket)?;
    let state = quinn_udp::UdpSocketState::new((&inner).into())?;

    Ok((Socket { inner, state }, soft_err))
}

#[cfg(target_os = "linux")]
fn set_fwmark(socket: &socket2::Socket, mark: u32) -> io::Result<()> {
    socket.set_mark(mark)
}

#[cfg(not(target_os = "linux"))]
fn set_fwmark(_socket: &socket2::Socket, _mark: u32) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "SO_MARK is only supported on Linux",
    ))
}

/// The unspecified bind address for a given address family, used when opening a
/// per-session upstream socket on an ephemeral port.
pub fn unspecified_for_family(family: AddressFamily) -> SocketAddr {
    match family {
        AddressFamily::V4 => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        AddressFamily::V6 => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    pub fn of(addr: &SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(_) => AddressFamily::V4,
            SocketAddr::V6(v6) => match v6.ip().to_ipv4_mapped() {
                Some(_) => AddressFamily::V4,
                None => AddressFamily::V6,
            },
        }
    }

    /// IP header length in bytes, used to compute `max_proxy_packet_size`.
    pub fn ip_header_len(self) -> usize {
        match self {
            AddressFamily::V4 => 20,
            AddressFamily::V6 => 40,
        }
    }
}

/// Canonicalizes a client address so that IPv4 and IPv4-mapped-IPv6 addresses compare
/// equal: IPv4 addresses are rewritten into their IPv4-in-IPv6 form.
pub fn canonicalize(addr: SocketAddr) -> SocketAddr {
    match addr {
        SocketAddr::V4(v4) => {
            SocketAddr::new(IpAddr::V6(v4.ip().to_ipv6_mapped()), v4.port())
        }
        SocketAddr::V6(_) => addr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_maps_v4_into_v6() {
        let v4: SocketAddr = "10.0.0.1:51820".parse().unwrap();
        let canon = canonicalize(v4);

        assert!(matches!(canon, SocketAddr::V6(_)));
        assert_eq!(AddressFamily::of(&canon), AddressFamily::V4);
    }

    #[test]
    fn canonicalize_is_a_no_op_for_v6() {
        let v6: SocketAddr = "[2001:db8::1]:51820".parse().unwrap();
        assert_eq!(canonicalize(v6), v6);
        assert_eq!(AddressFamily::of(&v6), AddressFamily::V6);
    }

    #[test]
    fn ip_header_lengths_match_boundary_table() {
        assert_eq!(AddressFamily::V4.ip_header_len(), 20);
        assert_eq!(AddressFamily::V6.ip_header_len(), 40);
    }
}
