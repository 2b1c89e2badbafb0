// crates/network/src/tls/native_backend.rs
//! TLS through the platform library via native-tls
//!
//! native-tls exposes no session ticket API, so this backend never produces
//! a resumption token and ignores any it's given.

use super::{
    apply_handshake_timeout, ResumptionToken, TlsBackend, TlsOptions, TlsSession,
    HANDSHAKE_TIMEOUT,
};
use crate::error::{NetworkError, NetworkResult};
use native_tls::{HandshakeError, Protocol, TlsConnector, TlsStream};
use once_cell::sync::OnceCell;
use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

const NAME: &str = "native-tls";

/// Backend built on the system TLS library
pub struct NativeTlsBackend {
    options: TlsOptions,
    connector: OnceCell<TlsConnector>,
}

impl NativeTlsBackend {
    pub fn new(options: TlsOptions) -> Self {
        Self {
            options,
            connector: OnceCell::new(),
        }
    }

    fn connector(&self) -> NetworkResult<&TlsConnector> {
        self.connector.get_or_try_init(|| {
            TlsConnector::builder()
                .min_protocol_version(Some(Protocol::Tlsv12))
                .danger_accept_invalid_certs(!self.options.verify_certificates)
                .build()
                .map_err(|e| NetworkError::Handshake(e.to_string()))
        })
    }
}

impl TlsBackend for NativeTlsBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn probe(&self) -> NetworkResult<()> {
        self.connector().map(|_| ())
    }

    fn handshake(
        &self,
        socket: TcpStream,
        server_name: &str,
        token: Option<&ResumptionToken>,
        _on_token: &dyn Fn(ResumptionToken),
    ) -> NetworkResult<Box<dyn TlsSession>> {
        if token.is_some() {
            log::debug!("native-tls can't resume sessions, performing full handshake");
        }

        let connector = self.connector()?;
        apply_handshake_timeout(&socket)?;
        let started = Instant::now();

        let stream = match connector.connect(server_name, socket) {
            Ok(stream) => stream,
            Err(HandshakeError::Failure(e)) => return Err(NetworkError::Handshake(e.to_string())),
            Err(HandshakeError::WouldBlock(mut pending)) => loop {
                if started.elapsed() >= HANDSHAKE_TIMEOUT {
                    return Err(NetworkError::Handshake("timed out".to_string()));
                }
                match pending.handshake() {
                    Ok(stream) => break stream,
                    Err(HandshakeError::WouldBlock(next)) => pending = next,
                    Err(HandshakeError::Failure(e)) => {
                        return Err(NetworkError::Handshake(e.to_string()))
                    }
                }
            },
        };
        let _ = stream.get_ref().set_write_timeout(None);

        log::debug!("TLS session established with {}", server_name);
        Ok(Box::new(NativeTlsSession {
            stream,
            closed: false,
        }))
    }
}

struct NativeTlsSession {
    stream: TlsStream<TcpStream>,
    closed: bool,
}

impl TlsSession for NativeTlsSession {
    fn read(&mut self, buf: &mut [u8]) -> NetworkResult<usize> {
        loop {
            match self.stream.read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(0),
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
            .get_ref()
            .set_read_timeout(timeout)
            .map_err(|e| NetworkError::io("Set timeout", e))
    }

    fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.stream.shutdown();
    }
}
