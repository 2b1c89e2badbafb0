// crates/network/src/tls/rustls_backend.rs
//! TLS through rustls with the bundled webpki root store

use super::{apply_handshake_timeout, ResumptionToken, TlsBackend, TlsOptions, TlsSession};
use crate::error::{NetworkError, NetworkResult};
use once_cell::sync::OnceCell;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::{ClientSessionMemoryCache, Resumption};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{
    ClientConfig, ClientConnection, DigitallySignedStruct, RootCertStore, SignatureScheme,
    StreamOwned,
};
use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

const NAME: &str = "rustls";

/// Sessions remembered per resumption store
const SESSION_CACHE_SIZE: usize = 32;

type SessionStore = Arc<ClientSessionMemoryCache>;

/// Backend built on rustls with the ring provider
pub struct RustlsBackend {
    options: TlsOptions,
    provider: Arc<CryptoProvider>,
    roots: OnceCell<Arc<RootCertStore>>,
}

impl RustlsBackend {
    pub fn new(options: TlsOptions) -> Self {
        Self {
            options,
            provider: Arc::new(rustls::crypto::ring::default_provider()),
            roots: OnceCell::new(),
        }
    }

    /// Trusts exactly `roots` instead of the bundled store
    pub fn with_roots(options: TlsOptions, roots: RootCertStore) -> Self {
        let backend = Self::new(options);
        let _ = backend.roots.set(Arc::new(roots));
        backend
    }

    fn roots(&self) -> Arc<RootCertStore> {
        Arc::clone(self.roots.get_or_init(|| {
            Arc::new(RootCertStore {
                roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
            })
        }))
    }

    fn client_config(&self, store: SessionStore) -> NetworkResult<ClientConfig> {
        // TLS 1.2 is the lowest version offered
        let builder = ClientConfig::builder_with_provider(Arc::clone(&self.provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| NetworkError::Handshake(e.to_string()))?;

        let mut config = if self.options.verify_certificates {
            builder
                .with_root_certificates(self.roots())
                .with_no_client_auth()
        } else {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate(Arc::clone(
                    &self.provider,
                ))))
                .with_no_client_auth()
        };
        config.resumption = Resumption::store(store);
        Ok(config)
    }
}

impl TlsBackend for RustlsBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn probe(&self) -> NetworkResult<()> {
        let store = Arc::new(ClientSessionMemoryCache::new(1));
        self.client_config(store).map(|_| ())
    }

    fn handshake(
        &self,
        mut socket: TcpStream,
        server_name: &str,
        token: Option<&ResumptionToken>,
        on_token: &dyn Fn(ResumptionToken),
    ) -> NetworkResult<Box<dyn TlsSession>> {
        let store: SessionStore = token
            .and_then(|t| t.payload::<SessionStore>())
            .cloned()
            .unwrap_or_else(|| Arc::new(ClientSessionMemoryCache::new(SESSION_CACHE_SIZE)));

        let config = self.client_config(Arc::clone(&store))?;
        let name = ServerName::try_from(server_name.to_string()).map_err(|e| {
            NetworkError::Handshake(format!("invalid server name '{}': {}", server_name, e))
        })?;
        let mut conn = ClientConnection::new(Arc::new(config), name)
            .map_err(|e| NetworkError::Handshake(e.to_string()))?;

        apply_handshake_timeout(&socket)?;
        while conn.is_handshaking() {
            match conn.complete_io(&mut socket) {
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(NetworkError::Handshake("timed out".to_string()));
                }
                Err(e) => return Err(NetworkError::Handshake(e.to_string())),
            }
        }
        let _ = socket.set_write_timeout(None);

        log::debug!(
            "TLS session established with {} ({:?})",
            server_name,
            conn.protocol_version()
        );

        // tickets land in the store whenever the server sends them
        on_token(ResumptionToken::new(NAME, store));

        Ok(Box::new(RustlsSession {
            stream: StreamOwned::new(conn, socket),
            closed: false,
        }))
    }
}

struct RustlsSession {
    stream: StreamOwned<ClientConnection, TcpStream>,
    closed: bool,
}

impl TlsSession for RustlsSession {
    fn read(&mut self, buf: &mut [u8]) -> NetworkResult<usize> {
        loop {
            match self.stream.read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                    // many servers close data channels without close-notify
                    log::debug!("TLS peer closed without close-notify");
                    return Ok(0);
                }
                Err(e) => return Err(NetworkError::io("Receive", e)),
            }
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> NetworkResult<()> {
        self.stream
            .write_all(buf)
            .and_then(|_| self.stream.flush())
            .map_err(|e| NetworkError::io("Send", e))
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> NetworkResult<()> {
        self.stream
            .sock
            .set_read_timeout(timeout)
            .map_err(|e| NetworkError::io("Set timeout", e))
    }

    fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.stream.conn.send_close_notify();
        let _ = self.stream.flush();
    }
}

/// Verifier used when certificate checks are disabled; signatures are still checked
#[derive(Debug)]
struct AcceptAnyCertificate(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_probe_succeeds() {
        let backend = RustlsBackend::new(TlsOptions::default());
        assert_eq!(backend.name(), "rustls");
        assert!(backend.probe().is_ok());
        assert!(!backend.roots().is_empty());
    }

    #[test]
    fn test_probe_without_verification() {
        let backend = RustlsBackend::new(TlsOptions {
            verify_certificates: false,
        });
        assert!(backend.probe().is_ok());
    }

    #[test]
    fn test_handshake_with_plaintext_peer_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let _ = stream.write_all(b"220 not a TLS server\r\n");
        });

        let socket = TcpStream::connect(addr).unwrap();
        let backend = RustlsBackend::new(TlsOptions::default());
        let stored = std::cell::Cell::new(false);
        let result = backend.handshake(socket, "localhost", None, &|_| stored.set(true));

        assert!(matches!(result, Err(NetworkError::Handshake(_))));
        assert!(!stored.get());
        server.join().unwrap();
    }
}
