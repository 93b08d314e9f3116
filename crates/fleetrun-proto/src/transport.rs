//! TLS plumbing for the Portal gRPC channel.
//!
//! The agent side turns a `TcpListener` into a stream of authenticated
//! connections for `Server::serve_with_incoming`. The dispatcher side opens
//! a `Channel` through a rustls connector.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ServerConfig};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_rustls::{server::TlsStream, TlsAcceptor, TlsConnector};
use tonic::transport::server::Connected;
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;
use tracing::{debug, warn};

const PENDING_CONNECTIONS: usize = 64;
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid TLS server name '{0}'")]
    InvalidServerName(String),
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
}

/// An accepted, fully handshaken TLS connection.
pub struct TlsConnection {
    stream: TlsStream<TcpStream>,
    remote_addr: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub remote_addr: SocketAddr,
}

impl Connected for TlsConnection {
    type ConnectInfo = PeerInfo;

    fn connect_info(&self) -> Self::ConnectInfo {
        PeerInfo {
            remote_addr: self.remote_addr,
        }
    }
}

impl AsyncRead for TlsConnection {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for TlsConnection {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

/// Accept connections on `listener` and complete the TLS handshake of each
/// one in its own task, so a slow or hostile peer cannot stall the others.
/// Failed or stalled handshakes are logged and dropped. Accepting stops
/// once the returned stream is dropped.
///
/// Must be called from within a tokio runtime.
pub fn tls_incoming(
    listener: TcpListener,
    config: Arc<ServerConfig>,
) -> impl Stream<Item = Result<TlsConnection, io::Error>> {
    tls_incoming_with_timeout(listener, config, HANDSHAKE_TIMEOUT)
}

/// [`tls_incoming`] with an explicit per-connection handshake deadline.
pub fn tls_incoming_with_timeout(
    listener: TcpListener,
    config: Arc<ServerConfig>,
    handshake_timeout: Duration,
) -> impl Stream<Item = Result<TlsConnection, io::Error>> {
    let acceptor = TlsAcceptor::from(config);
    let (tx, rx) = mpsc::channel(PENDING_CONNECTIONS);

    tokio::spawn(async move {
        loop {
            let accepted = tokio::select! {
                _ = tx.closed() => break,
                accepted = listener.accept() => accepted,
            };
            let (stream, remote_addr) = match accepted {
                Ok(accepted) => accepted,
                Err(error) => {
                    warn!(error = %error, "Failed to accept connection");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };

            let acceptor = acceptor.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                match tokio::time::timeout(handshake_timeout, acceptor.accept(stream)).await {
                    Ok(Ok(stream)) => {
                        debug!(%remote_addr, "Accepted TLS connection");
                        if tx.send(Ok(TlsConnection { stream, remote_addr })).await.is_err() {
                            debug!(%remote_addr, "Server stopped; dropping connection");
                        }
                    }
                    Ok(Err(error)) => {
                        warn!(%remote_addr, error = %error, "TLS handshake failed");
                    }
                    Err(_) => {
                        warn!(%remote_addr, timeout = ?handshake_timeout, "TLS handshake timed out");
                    }
                }
            });
        }
        debug!("Stopped accepting connections");
    });

    futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })
}

/// Open a gRPC channel to `host:port` over TLS.
///
/// The certificate is checked against `server_name` when given, otherwise
/// against `host` itself (an IP address SAN for discovered instances).
pub async fn connect_tls(
    host: &str,
    port: u16,
    config: Arc<ClientConfig>,
    server_name: Option<&str>,
    timeout: Duration,
) -> Result<Channel, TransportError> {
    let name = server_name.unwrap_or(host).to_string();
    let server_name = ServerName::try_from(name.clone())
        .map_err(|_| TransportError::InvalidServerName(name))?;

    let authority = if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    };
    let endpoint = Endpoint::from_shared(format!("http://{authority}"))?
        .connect_timeout(timeout)
        .timeout(timeout);

    let connector = TlsConnector::from(config);
    let host = host.to_string();
    let channel = endpoint
        .connect_with_connector(service_fn(move |_: Uri| {
            let connector = connector.clone();
            let server_name = server_name.clone();
            let host = host.clone();
            async move {
                let tcp = TcpStream::connect((host.as_str(), port)).await?;
                connector.connect(server_name, tcp).await
            }
        }))
        .await?;

    Ok(channel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::{client_tls, insecure_client_tls, server_tls, test_pki};
    use futures::StreamExt;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_mutual_tls_handshake_delivers_connection() {
        let pki = test_pki::generate();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut incoming = Box::pin(tls_incoming(listener, server_tls(&pki.paths).unwrap()));

        let connector = TlsConnector::from(client_tls(&pki.paths).unwrap());
        let client = tokio::spawn(async move {
            let tcp = TcpStream::connect(addr).await.unwrap();
            let name = ServerName::try_from("localhost").unwrap();
            let mut tls = connector.connect(name, tcp).await.unwrap();
            tls.write_all(b"ping").await.unwrap();
            tls.flush().await.unwrap();
            tls
        });

        let mut conn = tokio::time::timeout(Duration::from_secs(5), incoming.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let mut buf = [0u8; 4];
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        assert!(conn.connect_info().remote_addr.ip().is_loopback());

        client.await.unwrap();
    }

    #[tokio::test]
    async fn test_client_without_certificate_is_rejected() {
        let pki = test_pki::generate();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut incoming = Box::pin(tls_incoming(listener, server_tls(&pki.paths).unwrap()));

        let connector = TlsConnector::from(insecure_client_tls().unwrap());
        tokio::spawn(async move {
            let tcp = TcpStream::connect(addr).await.unwrap();
            let name = ServerName::try_from("localhost").unwrap();
            if let Ok(mut tls) = connector.connect(name, tcp).await {
                let _ = tls.write_all(b"ping").await;
                let mut buf = [0u8; 4];
                let _ = tls.read(&mut buf).await;
            }
        });

        let next = tokio::time::timeout(Duration::from_millis(500), incoming.next()).await;
        assert!(next.is_err(), "unauthenticated client must not be accepted");
    }

    #[tokio::test]
    async fn test_stalled_handshake_is_dropped_without_blocking_others() {
        let pki = test_pki::generate();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut incoming = Box::pin(tls_incoming_with_timeout(
            listener,
            server_tls(&pki.paths).unwrap(),
            Duration::from_millis(200),
        ));

        // Connects but never sends a ClientHello.
        let mut idle = TcpStream::connect(addr).await.unwrap();

        let connector = TlsConnector::from(client_tls(&pki.paths).unwrap());
        let client = tokio::spawn(async move {
            let tcp = TcpStream::connect(addr).await.unwrap();
            let name = ServerName::try_from("localhost").unwrap();
            connector.connect(name, tcp).await.unwrap()
        });
        let accepted = tokio::time::timeout(Duration::from_secs(5), incoming.next())
            .await
            .unwrap();
        assert!(matches!(accepted, Some(Ok(_))));
        client.await.unwrap();

        // The server gives up on the idle peer and closes its socket.
        let mut buf = [0u8; 1];
        let read = tokio::time::timeout(Duration::from_secs(5), idle.read(&mut buf))
            .await
            .expect("idle connection should be closed after the handshake timeout");
        assert!(matches!(read, Ok(0) | Err(_)));
    }

    #[tokio::test]
    async fn test_dropping_incoming_stops_listener() {
        let pki = test_pki::generate();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let incoming = tls_incoming(listener, server_tls(&pki.paths).unwrap());
        drop(incoming);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if TcpStream::connect(addr).await.is_err() {
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "listener still accepting after the stream was dropped"
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn test_connect_tls_rejects_invalid_server_name() {
        let config = insecure_client_tls().unwrap();
        let result = connect_tls(
            "10.0.0.1",
            1337,
            config,
            Some("not a valid name!"),
            Duration::from_secs(1),
        )
        .await;
        assert!(matches!(result, Err(TransportError::InvalidServerName(_))));
    }
}
