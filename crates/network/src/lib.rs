// crates/network/src/lib.rs
//! Blocking TCP/TLS transport and FTP control-channel client

mod address;
mod buffer;
mod connection;
mod error;
mod ftp;
mod locator;
mod reply;
pub mod tls;

pub use address::{resolve, Address, AddressFamily};
pub use buffer::{GrowableBuffer, DATA_STEP, LINE_STEP};
pub use connection::Connection;
pub use error::{NetworkError, NetworkResult};
pub use ftp::{parse_passive_reply, Features, FileType, FtpSession, Listing, SessionOptions};
pub use locator::{Encryption, Locator, Scheme, ANONYMOUS_USER, DEFAULT_PORT};
pub use reply::{LineRead, Reply, ReplyReader};
pub use tls::{
    ResumptionToken, TlsBackend, TlsLease, TlsOptions, TlsRuntime, TlsSession, HANDSHAKE_TIMEOUT,
};
