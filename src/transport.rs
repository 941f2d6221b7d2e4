//! The TLS transport: a blocking-feeling, async byte pipe with a per-receive timeout. Makes no
//! framing decisions — it is a dumb pipe over which the protocol codec lays messages.

pub mod pem;

use std::convert::TryFrom;
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::{client::TlsStream, TlsConnector};

use crate::error::{RecvError, TransportError};
use crate::timeout::WithTimeout;

/// The conventional chunk size for a single `recv`. Each logical message is expected to fit in
/// one chunk; larger messages are a protocol violation, not a transport concern.
pub const BUFSIZE: usize = 16384;

/// Everything needed to establish a TLS connection to the server: where to dial, and how to
/// build the trust relationship (the configured CA, plus an optional client certificate for
/// mutual TLS).
#[derive(Clone)]
pub struct TlsMaterial {
    pub client_config: Arc<ClientConfig>,
}

impl TlsMaterial {
    /// Build the TLS client configuration from a CA certificate file and an optional client
    /// certificate/key pair, as the session configuration specifies.
    ///
    /// The configured CA is the sole trust anchor: this client does not fall back to the
    /// system/Mozilla root store, since the server's certificate must chain to the specific CA
    /// the operator provisioned.
    pub fn load(
        ca_certificate_path: impl AsRef<std::path::Path>,
        client_identity: Option<(&std::path::Path, &std::path::Path)>,
    ) -> Result<Self, TransportError> {
        let mut root_store = RootCertStore::empty();
        for cert in pem::read_certificates(ca_certificate_path)? {
            root_store
                .add(cert)
                .map_err(|e| TransportError::Handshake(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("invalid CA certificate: {}", e),
                )))?;
        }

        let builder = ClientConfig::builder_with_provider(
            rustls::crypto::ring::default_provider().into(),
        )
        .with_safe_default_protocol_versions()?
        .with_root_certificates(root_store);

        let client_config = match client_identity {
            None => builder.with_no_client_auth(),
            Some((cert_path, key_path)) => {
                let chain: Vec<CertificateDer<'static>> = pem::read_certificates(cert_path)?;
                let key: PrivateKeyDer<'static> = pem::read_private_key(key_path)?;
                builder.with_client_auth_cert(chain, key)?
            }
        };

        Ok(TlsMaterial {
            client_config: Arc::new(client_config),
        })
    }
}

/// A single TLS connection to the server. Exactly one `Transport` is live per `Session`; it is
/// replaced atomically on reconnect.
pub struct Transport {
    stream: TlsStream<TcpStream>,
}

impl Transport {
    /// Establish a TCP connection to `(host, port)` and perform a TLS handshake, verifying the
    /// server's certificate against `tls.client_config`'s trust anchor and optionally
    /// presenting a client certificate.
    pub async fn connect(
        host: &str,
        port: u16,
        tls: &TlsMaterial,
    ) -> Result<Self, TransportError> {
        let tcp = TcpStream::connect((host, port)).await?;
        tcp.set_nodelay(true)?;

        let server_name = ServerName::try_from(host.to_string())?;
        let connector = TlsConnector::from(tls.client_config.clone());
        let stream = connector
            .connect(server_name, tcp)
            .await
            .map_err(TransportError::Handshake)?;

        Ok(Transport { stream })
    }

    /// Write all bytes to the connection.
    pub async fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Block up to `timeout` for at least one byte, returning whatever is read (bounded by
    /// `max`). An empty result means the peer closed the connection in an orderly fashion.
    pub async fn recv(&mut self, max: usize, timeout: Duration) -> Result<Vec<u8>, RecvError> {
        let mut buf = vec![0u8; max];
        let n = match self.stream.read(&mut buf).with_timeout(timeout).await {
            Ok(Ok(n)) => n,
            Ok(Err(io_err)) => return Err(RecvError::Io(TransportError::from(io_err))),
            Err(_elapsed) => return Err(RecvError::Timeout(crate::error::TransportTimeout)),
        };
        buf.truncate(n);
        Ok(buf)
    }

    /// Idempotent: closing an already-closed transport is a no-op at this layer (the owning
    /// `Session` never calls `close` twice on the same `Transport`, but the underlying TLS
    /// shutdown is itself safe to attempt more than once).
    pub async fn close(&mut self) {
        let _ = self.stream.shutdown().await;
    }
}
