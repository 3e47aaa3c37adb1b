//! Connection types handed between the transport and the sync layer.

use rustls::pki_types::CertificateDer;
use std::fmt;
use std::net::SocketAddr;
use sync_types::DeviceId;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsStream;

/// A bidirectional byte stream after the secure handshake.
pub trait SecureStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> SecureStream for T {}

/// A connection whose handshake completed but whose peer is not yet admitted.
///
/// Produced by the listener and the dialer, consumed by the supervisor.
pub struct RawConnection {
    /// The secure stream.
    pub stream: Box<dyn SecureStream>,
    /// Certificates the peer presented, leaf first.
    pub peer_certificates: Vec<CertificateDer<'static>>,
    /// Negotiated application protocol, if any.
    pub alpn_protocol: Option<Vec<u8>>,
    /// Our end of the socket.
    pub local_addr: Option<SocketAddr>,
    /// The peer's end of the socket; `None` when it is not an IP endpoint.
    pub remote_addr: Option<SocketAddr>,
}

impl RawConnection {
    /// Capture the handshake results of a TLS stream over TCP.
    pub fn from_tls(
        stream: TlsStream<TcpStream>,
        local_addr: Option<SocketAddr>,
        remote_addr: Option<SocketAddr>,
    ) -> Self {
        let (_, state) = stream.get_ref();
        let peer_certificates = state
            .peer_certificates()
            .map(|certs| certs.iter().map(|c| c.clone().into_owned()).collect())
            .unwrap_or_default();
        let alpn_protocol = state.alpn_protocol().map(<[u8]>::to_vec);

        Self {
            stream: Box::new(stream),
            peer_certificates,
            alpn_protocol,
            local_addr,
            remote_addr,
        }
    }

    /// `local-remote` label used for the connection's name.
    pub fn name(&self) -> String {
        format!(
            "{}-{}",
            display_addr(self.local_addr),
            display_addr(self.remote_addr)
        )
    }
}

impl fmt::Debug for RawConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawConnection")
            .field("peer_certificates", &self.peer_certificates.len())
            .field("alpn_protocol", &self.alpn_protocol)
            .field("local_addr", &self.local_addr)
            .field("remote_addr", &self.remote_addr)
            .finish_non_exhaustive()
    }
}

/// An admitted connection, handed to the sync layer.
///
/// Reader and writer are already wrapped by the bandwidth limiter when the
/// peer is subject to limiting.
pub struct PeerConnection {
    /// Identity of the remote device.
    pub device_id: DeviceId,
    /// `local-remote` label.
    pub name: String,
    /// Remote address, if it is an IP endpoint.
    pub remote_addr: Option<SocketAddr>,
    /// Whether the sync protocol should compress on this connection.
    pub compression: bool,
    /// Incoming bytes.
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    /// Outgoing bytes.
    pub writer: Box<dyn AsyncWrite + Send + Unpin>,
}

impl fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerConnection")
            .field("device_id", &self.device_id)
            .field("name", &self.name)
            .field("remote_addr", &self.remote_addr)
            .field("compression", &self.compression)
            .finish_non_exhaustive()
    }
}

/// Render an optional address, `?` when unknown.
pub fn display_addr(addr: Option<SocketAddr>) -> String {
    addr.map_or_else(|| "?".to_string(), |a| a.to_string())
}
