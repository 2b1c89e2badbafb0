// crates/downloader/src/fetcher.rs
//! Transport used by the worker to fetch sub-resources

use crate::error::{DownloadError, DownloadResult};
use panelview_config::{AddressFamilyPreference, Config, EncryptionPolicy};
use panelview_network::tls::default_backends;
use panelview_network::{
    AddressFamily, Encryption, FtpSession, Locator, NetworkError, SessionOptions, TlsLease,
    TlsOptions, TlsRuntime,
};
use std::sync::Arc;

/// Fetches one locator at a time
pub trait Fetcher: Send {
    /// Downloads `locator`, calling `keep_going` with the running byte count
    ///
    /// Returning false from `keep_going` aborts with
    /// [`DownloadError::Interrupted`].
    fn fetch(
        &mut self,
        locator: &Locator,
        keep_going: &mut dyn FnMut(usize) -> bool,
    ) -> DownloadResult<Vec<u8>>;

    /// Closes cached connections
    fn release(&mut self) {}
}

/// Fetches `ftp://` and `ftps://` locators, keeping one logged-in session
/// for consecutive requests to the same server
pub struct FtpFetcher {
    runtime: Arc<TlsRuntime>,
    options: SessionOptions,
    anonymous_password: String,
    session: Option<FtpSession>,
    // keeps the runtime acquired so resumption survives between sessions
    lease: Option<TlsLease>,
}

impl FtpFetcher {
    pub fn new(runtime: Arc<TlsRuntime>, options: SessionOptions, anonymous_password: &str) -> Self {
        let lease = if options.encryption == Encryption::Off {
            None
        } else {
            runtime.acquire().ok()
        };
        Self {
            runtime,
            options,
            anonymous_password: anonymous_password.to_string(),
            session: None,
            lease,
        }
    }

    /// Builds a fetcher from the `network` and `download` sections
    pub fn from_config(config: &Config) -> Self {
        let network = &config.network;
        let runtime = if network.verify_certificates {
            TlsRuntime::global()
        } else {
            Arc::new(TlsRuntime::new(default_backends(TlsOptions {
                verify_certificates: false,
            })))
        };
        Self::new(runtime, session_options(config), &network.anonymous_password)
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn is_tls_ready(&self) -> bool {
        self.lease.is_some()
    }

    fn passwords_for(&self, locator: &Locator) -> Vec<String> {
        match (&locator.user, &locator.password) {
            (_, Some(password)) => vec![password.clone()],
            (None, None) => vec![self.anonymous_password.clone()],
            (Some(_), None) => Vec::new(),
        }
    }

    /// Reuses the open session if it talks to the same server as `locator`
    fn session_for(&mut self, locator: &Locator) -> DownloadResult<&mut FtpSession> {
        if let Some(session) = self.session.take() {
            if session.is_usable() && session.host_key() == locator.host_key() {
                return Ok(self.session.insert(session));
            }
            log::debug!("Closing session to {}", session.locator().host);
        }

        let passwords = self.passwords_for(locator);
        let session = FtpSession::open(locator, &passwords, &self.options, &self.runtime)
            .map_err(|source| DownloadError::Connection {
                host: locator.host.clone(),
                source,
            })?;
        Ok(self.session.insert(session))
    }
}

impl Fetcher for FtpFetcher {
    fn fetch(
        &mut self,
        locator: &Locator,
        keep_going: &mut dyn FnMut(usize) -> bool,
    ) -> DownloadResult<Vec<u8>> {
        let session = self.session_for(locator)?;
        let result = session.retrieve_with(&locator.path, |received| keep_going(received));
        let usable = session.is_usable();
        if !usable {
            self.session = None;
        }

        match result {
            Ok(bytes) => Ok(bytes),
            Err(NetworkError::Cancelled) => Err(DownloadError::Interrupted),
            Err(source) if usable => Err(DownloadError::Transfer {
                name: locator.file_name().to_string(),
                source,
            }),
            Err(source) => Err(DownloadError::Connection {
                host: locator.host.clone(),
                source,
            }),
        }
    }

    fn release(&mut self) {
        self.session = None;
    }
}

impl std::fmt::Debug for FtpFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FtpFetcher")
            .field("options", &self.options)
            .field("session", &self.session)
            .field("tls_ready", &self.is_tls_ready())
            .finish()
    }
}

/// Maps the configured network settings onto session options
pub fn session_options(config: &Config) -> SessionOptions {
    let network = &config.network;
    SessionOptions {
        control_timeout_secs: network.control_timeout_secs,
        data_timeout_secs: network.data_timeout_secs,
        encryption: match network.encryption {
            EncryptionPolicy::Off => Encryption::Off,
            EncryptionPolicy::Optional => Encryption::Optional,
            EncryptionPolicy::Force => Encryption::Force,
        },
        family: match network.address_family {
            AddressFamilyPreference::Any => AddressFamily::Any,
            AddressFamilyPreference::Ipv4 => AddressFamily::V4,
            AddressFamilyPreference::Ipv6 => AddressFamily::V6,
        },
        bulk_size_hint: config.download.bulk_size_hint,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher() -> FtpFetcher {
        let options = SessionOptions {
            encryption: Encryption::Off,
            ..Default::default()
        };
        FtpFetcher::new(TlsRuntime::global(), options, "guest@")
    }

    #[test]
    fn test_session_options_from_config() {
        let mut config = Config::default();
        config.network.encryption = EncryptionPolicy::Force;
        config.network.address_family = AddressFamilyPreference::Ipv6;
        config.network.data_timeout_secs = 45;
        config.download.bulk_size_hint = 8192;

        let options = session_options(&config);
        assert_eq!(options.encryption, Encryption::Force);
        assert_eq!(options.family, AddressFamily::V6);
        assert_eq!(options.control_timeout_secs, 10);
        assert_eq!(options.data_timeout_secs, 45);
        assert_eq!(options.bulk_size_hint, 8192);
    }

    #[test]
    fn test_passwords_for() {
        let fetcher = fetcher();
        let anonymous = Locator::parse("ftp://example.org/a.jpg").unwrap();
        let named = Locator::parse("ftp://reader@example.org/a.jpg").unwrap();
        let explicit = Locator::parse("ftp://reader:pw@example.org/a.jpg").unwrap();

        assert_eq!(fetcher.passwords_for(&anonymous), vec!["guest@"]);
        assert!(fetcher.passwords_for(&named).is_empty());
        assert_eq!(fetcher.passwords_for(&explicit), vec!["pw"]);
    }

    #[test]
    fn test_plaintext_fetcher_holds_no_lease() {
        assert!(!fetcher().is_tls_ready());
    }

    #[test]
    fn test_unreachable_host_is_connection_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut fetcher = fetcher();
        let locator = Locator::parse(&format!("ftp://127.0.0.1:{}/a.jpg", port)).unwrap();
        let err = fetcher.fetch(&locator, &mut |_| true).unwrap_err();
        assert!(err.aborts_job());
    }
}
