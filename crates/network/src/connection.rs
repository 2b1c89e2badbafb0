// crates/network/src/connection.rs
//! TCP connection with an optional TLS upgrade

use crate::address::{resolve, Address, AddressFamily};
use crate::error::{NetworkError, NetworkResult};
use crate::tls::{TlsLease, TlsSession};
use std::fmt;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

fn secs_to_timeout(secs: u64) -> Option<Duration> {
    if secs == 0 {
        None
    } else {
        Some(Duration::from_secs(secs))
    }
}

/// One socket plus at most one TLS session on top of it
///
/// The TLS session only exists while the socket does; [`disconnect`](Self::disconnect)
/// tears the session down first and can be called any number of times.
pub struct Connection {
    socket: Option<TcpStream>,
    session: Option<Box<dyn TlsSession>>,
    lease: Option<TlsLease>,
    address: Address,
    timeout: Option<Duration>,
}

impl Connection {
    /// Resolves `host` and connects to the first candidate that accepts
    ///
    /// `timeout_secs` bounds each connect attempt and becomes the receive
    /// timeout; 0 blocks indefinitely.
    pub fn connect(
        host: &str,
        port: u16,
        family: AddressFamily,
        timeout_secs: u64,
    ) -> NetworkResult<Self> {
        let candidates = resolve(host, port, family)?;
        let mut last_error = String::from("no candidates");

        for candidate in candidates {
            match Self::open_socket(candidate, timeout_secs) {
                Ok(socket) => {
                    log::debug!("Connected to {} ({})", host, candidate);
                    return Self::from_socket(socket, candidate, timeout_secs);
                }
                Err(e) => {
                    log::debug!("Connection to {} failed: {}", candidate, e);
                    last_error = e.to_string();
                }
            }
        }

        Err(NetworkError::Connect {
            host: host.to_string(),
            message: last_error,
        })
    }

    /// Connects to an already resolved address, e.g. a passive data port
    pub fn connect_addr(address: Address, timeout_secs: u64) -> NetworkResult<Self> {
        let socket = Self::open_socket(address, timeout_secs).map_err(|e| NetworkError::Connect {
            host: address.to_string(),
            message: e.to_string(),
        })?;
        Self::from_socket(socket, address, timeout_secs)
    }

    fn open_socket(address: Address, timeout_secs: u64) -> std::io::Result<TcpStream> {
        match secs_to_timeout(timeout_secs) {
            Some(timeout) => TcpStream::connect_timeout(&address.socket_addr(), timeout),
            None => TcpStream::connect(address.socket_addr()),
        }
    }

    fn from_socket(socket: TcpStream, address: Address, timeout_secs: u64) -> NetworkResult<Self> {
        let mut connection = Self {
            socket: Some(socket),
            session: None,
            lease: None,
            address,
            timeout: None,
        };
        connection.set_timeout(timeout_secs)?;
        Ok(connection)
    }

    /// Secures the connection in place
    ///
    /// On failure the connection is closed; it never falls back to plaintext.
    pub fn upgrade(&mut self, tls: &TlsLease, server_name: &str) -> NetworkResult<()> {
        if self.session.is_some() {
            return Ok(());
        }
        let socket = self.socket.as_ref().ok_or(NetworkError::NotConnected)?;
        let handshake_socket = socket
            .try_clone()
            .map_err(|e| NetworkError::io("Clone socket", e))?;

        let result = tls.handshake(handshake_socket, server_name).and_then(|mut session| {
            session.set_read_timeout(self.timeout)?;
            Ok(session)
        });

        match result {
            Ok(session) => {
                log::debug!("Secured connection to {} with {}", self.address, tls.backend().name());
                self.session = Some(session);
                self.lease = Some(tls.clone());
                Ok(())
            }
            Err(e) => {
                log::warn!("TLS upgrade of {} failed: {}", self.address, e);
                self.disconnect();
                Err(e)
            }
        }
    }

    /// Rewrites the receive timeout in seconds; 0 blocks indefinitely
    pub fn set_timeout(&mut self, secs: u64) -> NetworkResult<()> {
        let timeout = secs_to_timeout(secs);
        if let Some(session) = self.session.as_mut() {
            session.set_read_timeout(timeout)?;
        } else if let Some(socket) = self.socket.as_ref() {
            socket
                .set_read_timeout(timeout)
                .map_err(|e| NetworkError::io("Set timeout", e))?;
        } else {
            return Err(NetworkError::NotConnected);
        }
        self.timeout = timeout;
        Ok(())
    }

    /// Sends the whole buffer
    pub fn send(&mut self, data: &[u8]) -> NetworkResult<()> {
        if let Some(session) = self.session.as_mut() {
            return session.write_all(data);
        }
        let mut socket = self.socket.as_ref().ok_or(NetworkError::NotConnected)?;
        socket
            .write_all(data)
            .map_err(|e| NetworkError::io("Send", e))
    }

    /// Receives up to `buf.len()` bytes; `Ok(0)` means the peer closed
    pub fn receive(&mut self, buf: &mut [u8]) -> NetworkResult<usize> {
        if let Some(session) = self.session.as_mut() {
            return session.read(buf);
        }
        let mut socket = self.socket.as_ref().ok_or(NetworkError::NotConnected)?;
        loop {
            match socket.read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(NetworkError::io("Receive", e)),
            }
        }
    }

    /// Closes the TLS session, then the socket
    pub fn disconnect(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.shutdown();
        }
        if let Some(socket) = self.socket.take() {
            let _ = socket.shutdown(Shutdown::Both);
            log::debug!("Disconnected from {}", self.address);
        }
        self.lease = None;
    }

    pub fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    pub fn is_secured(&self) -> bool {
        self.session.is_some()
    }

    /// The address that accepted the connection
    pub fn address(&self) -> Address {
        self.address
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.address)
            .field("connected", &self.is_connected())
            .field("secured", &self.is_secured())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    fn echo_server() -> (u16, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 64];
            let n = stream.read(&mut buf).unwrap();
            stream.write_all(&buf[..n]).unwrap();
        });
        (port, handle)
    }

    #[test]
    fn test_connect_send_receive() {
        let (port, server) = echo_server();
        let mut conn = Connection::connect("127.0.0.1", port, AddressFamily::Any, 5).unwrap();
        assert!(conn.is_connected());
        assert!(!conn.is_secured());
        assert_eq!(conn.address().port(), port);
        assert_eq!(conn.timeout(), Some(Duration::from_secs(5)));

        conn.send(b"NOOP\r\n").unwrap();
        let mut buf = [0u8; 16];
        let n = conn.receive(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"NOOP\r\n");

        // echo server closes after one round trip
        assert_eq!(conn.receive(&mut buf).unwrap(), 0);
        server.join().unwrap();
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let (port, server) = echo_server();
        let mut conn = Connection::connect("127.0.0.1", port, AddressFamily::V4, 5).unwrap();

        conn.disconnect();
        conn.disconnect();
        assert!(!conn.is_connected());
        assert!(matches!(conn.send(b"x"), Err(NetworkError::NotConnected)));
        let mut buf = [0u8; 4];
        assert!(matches!(conn.receive(&mut buf), Err(NetworkError::NotConnected)));
        assert!(matches!(conn.set_timeout(1), Err(NetworkError::NotConnected)));
        drop(conn);
        let _ = server.join();
    }

    #[test]
    fn test_connect_refused() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let result = Connection::connect("127.0.0.1", port, AddressFamily::Any, 2);
        assert!(matches!(result, Err(NetworkError::Connect { .. })));
    }

    #[test]
    fn test_receive_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_millis(2500));
            drop(stream);
        });

        let mut conn = Connection::connect("127.0.0.1", port, AddressFamily::Any, 1).unwrap();
        let mut buf = [0u8; 4];
        assert!(matches!(conn.receive(&mut buf), Err(NetworkError::Timeout)));
        server.join().unwrap();
    }

    #[test]
    fn test_zero_timeout_blocks_indefinitely() {
        let (port, server) = echo_server();
        let mut conn = Connection::connect("127.0.0.1", port, AddressFamily::Any, 0).unwrap();
        assert_eq!(conn.timeout(), None);
        conn.set_timeout(3).unwrap();
        assert_eq!(conn.timeout(), Some(Duration::from_secs(3)));
        conn.disconnect();
        let _ = server.join();
    }
}
