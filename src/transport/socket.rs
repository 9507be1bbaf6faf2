//! Framed packet transport over TCP.
//!
//! One outbound packet goes through encode → compress → encrypt → frame;
//! inbound frames run the pipeline in reverse. Transport faults never
//! surface as errors here: [`send_packet`](ProtoSocket::send_packet) and
//! [`recv_packet`](ProtoSocket::recv_packet) report a [`SocketStatus`] the
//! caller inspects, so "idle" (`TimedOut`) stays distinguishable from
//! "dead" (`Broken`). Protocol-level failures (bad decrypt, unknown id,
//! malformed fields) do travel as errors: they are fatal to the connection
//! one layer up.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, instrument, trace};

use crate::core::codec::FrameCodec;
use crate::crypto::{FrameCipher, PlainCipher};
use crate::error::Result;
use crate::protocol::packet::{Packet, Side};
use crate::protocol::registry::ProtocolRegistry;
use crate::utils::compression::{compress, decompress, CompressionKind};
use crate::utils::timeout;

/// Outcome of a transport operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketStatus {
    /// The operation completed.
    Success,
    /// The socket was never connected or is already closed.
    Unbound,
    /// The peer reset or closed the stream; the socket is now closed.
    Broken,
    /// No data arrived within the deadline. The connection may be idle.
    TimedOut,
}

/// Packet transport bound to one TCP stream.
pub struct ProtoSocket {
    framed: Option<Framed<TcpStream, FrameCodec>>,
    cipher: Box<dyn FrameCipher>,
    compression: CompressionKind,
    registry: Arc<ProtocolRegistry>,
    inbound: Side,
    recv_timeout: Duration,
    send_timeout: Duration,
}

impl ProtoSocket {
    /// Wrap an accepted or connected stream.
    ///
    /// `inbound` is the direction this role decodes: a server reads
    /// serverbound packets, a client reads clientbound ones.
    pub fn from_stream(
        stream: TcpStream,
        registry: Arc<ProtocolRegistry>,
        inbound: Side,
        compression: CompressionKind,
    ) -> Self {
        Self {
            framed: Some(Framed::new(stream, FrameCodec)),
            cipher: Box::new(PlainCipher),
            compression,
            registry,
            inbound,
            recv_timeout: timeout::DEFAULT_RECV_TIMEOUT,
            send_timeout: timeout::DEFAULT_SEND_TIMEOUT,
        }
    }

    /// Connect to `addr` and decode clientbound packets.
    pub async fn connect(
        addr: &str,
        registry: Arc<ProtocolRegistry>,
        compression: CompressionKind,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let stream = timeout::with_timeout(
            async { Ok(TcpStream::connect(addr).await?) },
            connect_timeout,
        )
        .await?;
        Ok(Self::from_stream(
            stream,
            registry,
            Side::Clientbound,
            compression,
        ))
    }

    /// Set custom timeout durations.
    pub fn with_timeouts(mut self, send_timeout: Duration, recv_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self.recv_timeout = recv_timeout;
        self
    }

    /// Per-receive deadline currently in effect.
    pub fn recv_timeout(&self) -> Duration {
        self.recv_timeout
    }

    /// Hot-swap the active cipher. Used exactly once, right after the key
    /// exchange completes.
    pub fn set_cipher(&mut self, cipher: Box<dyn FrameCipher>) {
        self.cipher = cipher;
    }

    /// True while the underlying stream is open.
    pub fn is_open(&self) -> bool {
        self.framed.is_some()
    }

    /// Close the stream. Idempotent; safe to call from handlers running
    /// inside this connection's own loop.
    pub async fn close(&mut self) {
        if let Some(mut framed) = self.framed.take() {
            let _ = framed.close().await;
            debug!("socket closed");
        }
    }

    /// Encode, compress, encrypt, and write one packet.
    ///
    /// `Err` means the packet could not be turned into bytes (a local
    /// protocol failure); the returned status reports the transport
    /// outcome.
    #[instrument(skip(self, packet), fields(kind = %packet.kind()), level = "trace")]
    pub async fn send_packet(&mut self, packet: &Packet) -> Result<SocketStatus> {
        let encoded = self.registry.encode(packet)?;
        let compressed = compress(&encoded, self.compression)?;
        let sealed = self.cipher.encrypt(&compressed)?;

        let Some(framed) = self.framed.as_mut() else {
            return Ok(SocketStatus::Unbound);
        };

        let outcome =
            tokio::time::timeout(self.send_timeout, framed.send(Bytes::from(sealed))).await;
        match outcome {
            Err(_) => Ok(SocketStatus::TimedOut),
            Ok(Err(e)) => {
                debug!(error = %e, "send failed, closing socket");
                self.close().await;
                Ok(SocketStatus::Broken)
            }
            Ok(Ok(())) => {
                trace!("packet sent");
                Ok(SocketStatus::Success)
            }
        }
    }

    /// Read, decrypt, decompress, and decode one packet.
    ///
    /// The status is `Success` exactly when a packet is returned. `Err`
    /// means bytes arrived but did not form a valid packet — a protocol
    /// violation, fatal to the connection one layer up.
    #[instrument(skip(self), level = "trace")]
    pub async fn recv_packet(&mut self) -> Result<(SocketStatus, Option<Packet>)> {
        let recv_timeout = self.recv_timeout;
        let Some(framed) = self.framed.as_mut() else {
            return Ok((SocketStatus::Unbound, None));
        };

        let frame = match tokio::time::timeout(recv_timeout, framed.next()).await {
            Err(_) => return Ok((SocketStatus::TimedOut, None)),
            Ok(None) => {
                // zero-length read: the peer went away
                debug!("stream ended, closing socket");
                self.close().await;
                return Ok((SocketStatus::Broken, None));
            }
            Ok(Some(Err(e))) => {
                debug!(error = %e, "frame read failed, closing socket");
                self.close().await;
                return Ok((SocketStatus::Broken, None));
            }
            Ok(Some(Ok(frame))) => frame,
        };

        let compressed = self.cipher.decrypt(&frame)?;
        let encoded = decompress(&compressed, self.compression)?;
        let packet = self.registry.decode(self.inbound, &encoded)?;
        trace!(kind = %packet.kind(), "packet received");
        Ok((SocketStatus::Success, Some(packet)))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::crypto::{establish, DhKeypair};
    use tokio::net::TcpListener;

    async fn socket_pair() -> (ProtoSocket, ProtoSocket) {
        let registry = Arc::new(ProtocolRegistry::standard());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = TcpStream::connect(addr);
        let server = listener.accept();
        let (client, server) = tokio::join!(client, server);

        (
            ProtoSocket::from_stream(
                client.unwrap(),
                registry.clone(),
                Side::Clientbound,
                CompressionKind::Lz4,
            ),
            ProtoSocket::from_stream(
                server.unwrap().0,
                registry,
                Side::Serverbound,
                CompressionKind::Lz4,
            ),
        )
    }

    #[tokio::test]
    async fn plaintext_packet_roundtrip() {
        let (mut client, mut server) = socket_pair().await;

        let status = client
            .send_packet(&Packet::HelloRequest { version: 1 })
            .await
            .unwrap();
        assert_eq!(status, SocketStatus::Success);

        let (status, packet) = server.recv_packet().await.unwrap();
        assert_eq!(status, SocketStatus::Success);
        assert_eq!(packet, Some(Packet::HelloRequest { version: 1 }));
    }

    #[tokio::test]
    async fn encrypted_packet_roundtrip() {
        let (mut client, mut server) = socket_pair().await;

        let client_pair = DhKeypair::generate();
        let server_pair = DhKeypair::generate();
        client.set_cipher(
            establish("dhaes", &client_pair, &server_pair.public_material()).unwrap(),
        );
        server.set_cipher(
            establish("dhaes", &server_pair, &client_pair.public_material()).unwrap(),
        );

        let packet = Packet::SendMessage {
            channel: 16,
            content: "over the encrypted link".to_string(),
        };
        assert_eq!(
            client.send_packet(&packet).await.unwrap(),
            SocketStatus::Success
        );
        let (status, received) = server.recv_packet().await.unwrap();
        assert_eq!(status, SocketStatus::Success);
        assert_eq!(received, Some(packet));
    }

    #[tokio::test]
    async fn cipher_mismatch_is_a_protocol_error() {
        let (mut client, mut server) = socket_pair().await;

        let server_pair = DhKeypair::generate();
        // only the server flips to an AEAD cipher; the client keeps sending
        // plaintext frames that fail authentication
        let other = DhKeypair::generate();
        server.set_cipher(
            establish("dhaes", &server_pair, &other.public_material()).unwrap(),
        );

        client
            .send_packet(&Packet::HelloRequest { version: 1 })
            .await
            .unwrap();
        assert!(server.recv_packet().await.is_err());
    }

    #[tokio::test]
    async fn idle_read_times_out() {
        let (_client, server) = socket_pair().await;
        let mut server = server.with_timeouts(
            Duration::from_millis(500),
            Duration::from_millis(50),
        );

        let (status, packet) = server.recv_packet().await.unwrap();
        assert_eq!(status, SocketStatus::TimedOut);
        assert!(packet.is_none());
        // the socket survives a timeout
        assert!(server.is_open());
    }

    #[tokio::test]
    async fn peer_close_is_broken() {
        let (mut client, mut server) = socket_pair().await;
        client.close().await;

        let (status, _) = server.recv_packet().await.unwrap();
        assert_eq!(status, SocketStatus::Broken);
        assert!(!server.is_open());

        // once broken, operations report Unbound
        let (status, _) = server.recv_packet().await.unwrap();
        assert_eq!(status, SocketStatus::Unbound);
        assert_eq!(
            server
                .send_packet(&Packet::HelloRequest { version: 1 })
                .await
                .unwrap(),
            SocketStatus::Unbound
        );
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (mut client, _server) = socket_pair().await;
        client.close().await;
        client.close().await;
        assert!(!client.is_open());
    }
}
