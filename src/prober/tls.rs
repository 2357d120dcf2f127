//! TLS handshake probe.
//!
//! Opens a TCP connection to port 443, completes a TLS handshake against the
//! webpki root set, and closes the connection. No application data is sent.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tracing::debug;

use super::ProbeError;

/// Reusable TLS prober holding one client configuration.
pub struct TlsProbe {
    connector: TlsConnector,
}

impl TlsProbe {
    /// Build a connector trusting the bundled webpki roots.
    ///
    /// # Errors
    ///
    /// [`ProbeError::Setup`] — construction is infallible with the bundled
    /// root set, but the signature leaves room for a configurable store.
    pub fn new() -> Result<Self, ProbeError> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
        })
    }

    /// Connect to `domain:443`, perform the handshake, close.
    ///
    /// # Errors
    ///
    /// [`ProbeError::Tls`] on connect failure, handshake failure, or
    /// timeout.
    pub async fn handshake(&self, domain: &str, timeout: Duration) -> Result<(), ProbeError> {
        self.handshake_port(domain, 443, timeout).await
    }

    /// Handshake against an explicit port. 443 in production; tests point
    /// this at local listeners.
    pub async fn handshake_port(
        &self,
        domain: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<(), ProbeError> {
        let server_name =
            ServerName::try_from(domain.to_string()).map_err(|e| ProbeError::Tls {
                domain: domain.to_string(),
                reason: format!("invalid server name: {e}"),
            })?;

        let attempt = async {
            let tcp = TcpStream::connect((domain, port))
                .await
                .map_err(|e| ProbeError::Tls {
                    domain: domain.to_string(),
                    reason: format!("connect: {e}"),
                })?;

            let mut stream = self
                .connector
                .connect(server_name, tcp)
                .await
                .map_err(|e| ProbeError::Tls {
                    domain: domain.to_string(),
                    reason: format!("handshake: {e}"),
                })?;

            debug!(domain, "tls handshake succeeded");
            // Best-effort close; the handshake already proved the path.
            let _ = stream.shutdown().await;
            Ok(())
        };

        tokio::time::timeout(timeout, attempt)
            .await
            .map_err(|_| ProbeError::Tls {
                domain: domain.to_string(),
                reason: format!("timeout after {}s", timeout.as_secs()),
            })?
    }
}
