// crates/network/src/tls/mod.rs
//! Pluggable TLS backends
//!
//! A [`TlsRuntime`] holds an ordered list of candidate [`TlsBackend`]s. The
//! first one whose probe succeeds becomes the active backend; the result of
//! probing (including "nothing available") is computed once per runtime.
//! The runtime also caches the resumption token of the last session so a
//! later handshake to the same server can skip the full negotiation.

#[cfg(feature = "native-backend")]
mod native_backend;
#[cfg(feature = "rustls-backend")]
mod rustls_backend;

#[cfg(feature = "native-backend")]
pub use native_backend::NativeTlsBackend;
#[cfg(feature = "rustls-backend")]
pub use rustls_backend::RustlsBackend;

use crate::error::{NetworkError, NetworkResult};
use once_cell::sync::{Lazy, OnceCell};
use std::any::Any;
use std::fmt;
use std::net::TcpStream;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Upper bound for a complete client handshake
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Options shared by every backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlsOptions {
    /// Reject servers whose certificate chain doesn't validate
    pub verify_certificates: bool,
}

impl Default for TlsOptions {
    fn default() -> Self {
        Self {
            verify_certificates: true,
        }
    }
}

/// Opaque session-resumption state produced by a backend
///
/// Only the backend that created a token can interpret its payload.
#[derive(Clone)]
pub struct ResumptionToken {
    backend: &'static str,
    payload: Arc<dyn Any + Send + Sync>,
}

impl ResumptionToken {
    pub fn new<T: Any + Send + Sync>(backend: &'static str, payload: T) -> Self {
        Self {
            backend,
            payload: Arc::new(payload),
        }
    }

    /// Name of the backend that produced this token
    pub fn backend(&self) -> &'static str {
        self.backend
    }

    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }
}

impl fmt::Debug for ResumptionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResumptionToken")
            .field("backend", &self.backend)
            .finish_non_exhaustive()
    }
}

/// An established TLS session bound to one socket
pub trait TlsSession: Send {
    /// Reads decrypted bytes; `Ok(0)` means the peer closed the stream
    fn read(&mut self, buf: &mut [u8]) -> NetworkResult<usize>;

    /// Writes the whole buffer or fails
    fn write_all(&mut self, buf: &[u8]) -> NetworkResult<()>;

    /// `None` blocks indefinitely
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> NetworkResult<()>;

    /// Sends close-notify best effort; safe to call more than once
    fn shutdown(&mut self);
}

/// A TLS implementation that can secure a connected socket
pub trait TlsBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Checks that the library is usable and meets the minimum protocol version
    fn probe(&self) -> NetworkResult<()>;

    /// Performs a client handshake on `socket`
    ///
    /// `token` is only passed when it was produced by this backend.
    /// `on_token` receives resumption state once the server provides it.
    /// On error no session state is left behind.
    fn handshake(
        &self,
        socket: TcpStream,
        server_name: &str,
        token: Option<&ResumptionToken>,
        on_token: &dyn Fn(ResumptionToken),
    ) -> NetworkResult<Box<dyn TlsSession>>;
}

/// Bounds every handshake read and write on `socket` by [`HANDSHAKE_TIMEOUT`]
pub(crate) fn apply_handshake_timeout(socket: &TcpStream) -> NetworkResult<()> {
    socket
        .set_read_timeout(Some(HANDSHAKE_TIMEOUT))
        .and_then(|_| socket.set_write_timeout(Some(HANDSHAKE_TIMEOUT)))
        .map_err(|e| NetworkError::Handshake(format!("failed to set handshake timeout: {}", e)))
}

/// Backends compiled into this build, in preference order
pub fn default_backends(options: TlsOptions) -> Vec<Arc<dyn TlsBackend>> {
    #[allow(unused_mut)]
    let mut backends: Vec<Arc<dyn TlsBackend>> = Vec::new();
    #[cfg(feature = "rustls-backend")]
    backends.push(Arc::new(RustlsBackend::new(options)));
    #[cfg(feature = "native-backend")]
    backends.push(Arc::new(NativeTlsBackend::new(options)));
    let _ = options;
    backends
}

#[derive(Debug, Default)]
struct RuntimeState {
    users: usize,
    token: Option<ResumptionToken>,
}

/// Process- or test-scoped TLS state: backend selection plus token cache
pub struct TlsRuntime {
    candidates: Vec<Arc<dyn TlsBackend>>,
    active: OnceCell<Option<Arc<dyn TlsBackend>>>,
    state: Mutex<RuntimeState>,
}

static GLOBAL: Lazy<Arc<TlsRuntime>> =
    Lazy::new(|| Arc::new(TlsRuntime::new(default_backends(TlsOptions::default()))));

impl TlsRuntime {
    /// Creates a runtime over `candidates`, tried in order
    pub fn new(candidates: Vec<Arc<dyn TlsBackend>>) -> Self {
        Self {
            candidates,
            active: OnceCell::new(),
            state: Mutex::new(RuntimeState::default()),
        }
    }

    /// Shared runtime using the compiled-in backends with verification on
    pub fn global() -> Arc<TlsRuntime> {
        Arc::clone(&GLOBAL)
    }

    fn state(&self) -> MutexGuard<'_, RuntimeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the active backend, probing the candidates on first use
    pub fn backend(&self) -> Option<Arc<dyn TlsBackend>> {
        self.active
            .get_or_init(|| {
                for candidate in &self.candidates {
                    match candidate.probe() {
                        Ok(()) => {
                            log::info!("Using TLS backend {}", candidate.name());
                            return Some(Arc::clone(candidate));
                        }
                        Err(e) => {
                            log::warn!("TLS backend {} unavailable: {}", candidate.name(), e);
                        }
                    }
                }
                log::warn!("No TLS backend available, encrypted connections are disabled");
                None
            })
            .clone()
    }

    pub fn is_available(&self) -> bool {
        self.backend().is_some()
    }

    /// Registers a user of the runtime and returns a lease on the active backend
    ///
    /// The cached token lives as long as at least one lease does.
    pub fn acquire(self: &Arc<Self>) -> NetworkResult<TlsLease> {
        let backend = self.backend().ok_or(NetworkError::TlsUnavailable)?;
        self.state().users += 1;
        Ok(TlsLease {
            runtime: Arc::clone(self),
            backend,
        })
    }

    fn release(&self) {
        let mut state = self.state();
        state.users = state.users.saturating_sub(1);
        if state.users == 0 && state.token.take().is_some() {
            log::debug!("Dropped cached TLS resumption token");
        }
    }

    /// Number of live leases
    pub fn users(&self) -> usize {
        self.state().users
    }

    /// Replaces the cached token
    pub fn store_token(&self, token: ResumptionToken) {
        let mut state = self.state();
        if state.users == 0 {
            return;
        }
        state.token = Some(token);
    }

    pub fn token(&self) -> Option<ResumptionToken> {
        self.state().token.clone()
    }
}

impl fmt::Debug for TlsRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.candidates.iter().map(|b| b.name()).collect();
        f.debug_struct("TlsRuntime")
            .field("candidates", &names)
            .field("users", &self.users())
            .finish()
    }
}

/// Keeps a [`TlsRuntime`] acquired until dropped
pub struct TlsLease {
    runtime: Arc<TlsRuntime>,
    backend: Arc<dyn TlsBackend>,
}

impl TlsLease {
    pub fn backend(&self) -> &Arc<dyn TlsBackend> {
        &self.backend
    }

    pub fn runtime(&self) -> &Arc<TlsRuntime> {
        &self.runtime
    }

    /// Secures `socket` with the active backend, reusing and refreshing the cached token
    pub fn handshake(&self, socket: TcpStream, server_name: &str) -> NetworkResult<Box<dyn TlsSession>> {
        let cached = self
            .runtime
            .token()
            .filter(|token| token.backend() == self.backend.name());
        let runtime = Arc::clone(&self.runtime);
        let on_token = move |token: ResumptionToken| runtime.store_token(token);

        self.backend
            .handshake(socket, server_name, cached.as_ref(), &on_token)
    }
}

impl Clone for TlsLease {
    fn clone(&self) -> Self {
        self.runtime.state().users += 1;
        Self {
            runtime: Arc::clone(&self.runtime),
            backend: Arc::clone(&self.backend),
        }
    }
}

impl Drop for TlsLease {
    fn drop(&mut self) {
        self.runtime.release();
    }
}

impl fmt::Debug for TlsLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsLease")
            .field("backend", &self.backend.name())
            .finish()
    }
}
