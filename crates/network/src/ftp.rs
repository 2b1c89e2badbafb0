// crates/network/src/ftp.rs
//! FTP control session: login, optional explicit TLS and passive transfers

use crate::address::{Address, AddressFamily};
use crate::buffer::DATA_STEP;
use crate::connection::Connection;
use crate::error::{NetworkError, NetworkResult};
use crate::locator::{Encryption, Locator};
use crate::reply::{LineRead, Reply, ReplyReader};
use crate::tls::{TlsLease, TlsRuntime};
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use std::net::IpAddr;
use std::sync::Arc;

static PASV_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+)\s*,\s*(\d+)\s*,\s*(\d+)\s*,\s*(\d+)\s*,\s*(\d+)\s*,\s*(\d+)").unwrap()
});

static EPSV_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\|\s*([12]?)\s*\|\s*(.*?)\s*\|\s*(\d+)\s*\|").unwrap());

static SIZE_REGEX: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r"\((\d+)\s*bytes\)\s*$")
        .case_insensitive(true)
        .build()
        .unwrap()
});

static MLST_TYPE_FEATURE: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r"(^|;)type\*?;?(\w|$)")
        .case_insensitive(true)
        .build()
        .unwrap()
});

static MLST_OPTS_REPLY: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r"^MLST\s+OPTS\s+type;?$")
        .case_insensitive(true)
        .build()
        .unwrap()
});

/// Largest buffer preallocated from a size announced by the server
const MAX_SIZE_HINT: usize = 64 * 1024 * 1024;

/// Connection parameters not carried by the locator
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Control channel receive timeout in seconds
    pub control_timeout_secs: u64,
    /// Data channel receive timeout in seconds
    pub data_timeout_secs: u64,
    /// Policy for `ftp://` locators; `ftps://` always forces TLS
    pub encryption: Encryption,
    /// Family used unless the locator names an IPv6 literal
    pub family: AddressFamily,
    /// Initial bulk buffer size when the server announces no size
    pub bulk_size_hint: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            control_timeout_secs: 10,
            data_timeout_secs: 20,
            encryption: Encryption::Optional,
            family: AddressFamily::Any,
            bulk_size_hint: DATA_STEP,
        }
    }
}

/// Extensions announced in the `FEAT` reply
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Features {
    pub auth: bool,
    pub epsv: bool,
    pub mlst: bool,
    pub tvfs: bool,
    pub utf8: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Regular,
    Directory,
    /// Exists, but the server didn't say what it is
    Unknown,
    NotFound,
}

/// Names found by [`FtpSession::list_directory`], each list sorted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    pub files: Vec<String>,
    pub dirs: Vec<String>,
}

/// A logged-in control connection
pub struct FtpSession {
    control: Connection,
    reader: ReplyReader,
    features: Features,
    tls: Option<TlsLease>,
    locator: Locator,
    options: SessionOptions,
    broken: bool,
}

impl FtpSession {
    /// Connects, negotiates TLS per policy and logs in
    ///
    /// `passwords` are tried in order while the server answers 530.
    /// An empty list sends an empty password.
    pub fn open(
        locator: &Locator,
        passwords: &[String],
        options: &SessionOptions,
        runtime: &Arc<TlsRuntime>,
    ) -> NetworkResult<Self> {
        let family = match locator.family {
            AddressFamily::Any => options.family,
            family => family,
        };
        let control = Connection::connect(
            &locator.host,
            locator.port,
            family,
            options.control_timeout_secs,
        )?;

        let mut session = Self {
            control,
            reader: ReplyReader::new(),
            features: Features::default(),
            tls: None,
            locator: locator.clone(),
            options: options.clone(),
            broken: false,
        };

        if let Err(e) = session.login(passwords, runtime) {
            session.quit();
            return Err(e);
        }
        log::info!(
            "Logged in to {} as {}{}",
            session.locator.host,
            session.locator.login_user(),
            if session.is_secured() { " over TLS" } else { "" }
        );
        Ok(session)
    }

    fn login(&mut self, passwords: &[String], runtime: &Arc<TlsRuntime>) -> NetworkResult<()> {
        let greeting = self.reader.get_reply(&mut self.control)?;
        let greeting = self.finish_reply(greeting)?;
        if !greeting.is(220) {
            return Err(greeting.to_error("Failed to connect"));
        }

        self.read_features()?;
        if self.control.address().family() == AddressFamily::V6 && !self.features.epsv {
            return Err(NetworkError::Handshake("No IPv6 support".to_string()));
        }
        if !self.features.tvfs {
            log::warn!("{} has no TVFS support", self.locator.host);
        }
        if self.features.utf8 {
            let reply = self.command("OPTS UTF8 ON")?;
            if !reply.is(200) && !reply.is(202) {
                log::error!("{}", reply.to_error("Failed to enable UTF-8"));
            }
        } else {
            log::warn!("{} has no UTF-8 support", self.locator.host);
        }

        self.negotiate_tls(runtime)?;
        self.authenticate(passwords)?;

        if self.features.mlst {
            let reply = self.command("OPTS MLST type;")?;
            if !reply.is(200) || !MLST_OPTS_REPLY.is_match(reply.text.trim()) {
                log::error!("{}", reply.to_error("Failed to set MLST"));
                self.features.mlst = false;
            }
        } else {
            log::warn!("{} has no MLST support", self.locator.host);
        }
        Ok(())
    }

    fn read_features(&mut self) -> NetworkResult<()> {
        let mut reply = self.reader.send_command(&mut self.control, "FEAT")?;
        if reply.is(500) || reply.is(502) {
            log::warn!("{} doesn't list features", self.locator.host);
            return Ok(());
        }
        if !reply.is_cont(211) {
            return Err(reply.to_error("Failed to get features"));
        }

        loop {
            reply = self.reader.get_reply(&mut self.control)?;
            if !reply.entry {
                break;
            }
            let name = reply.command.as_str();
            if name.eq_ignore_ascii_case("AUTH") {
                self.features.auth = true;
            } else if name.eq_ignore_ascii_case("EPSV") {
                self.features.epsv = true;
            } else if name.eq_ignore_ascii_case("MLST") && MLST_TYPE_FEATURE.is_match(&reply.text) {
                self.features.mlst = true;
            } else if name.eq_ignore_ascii_case("TVFS") {
                self.features.tvfs = true;
            } else if name.eq_ignore_ascii_case("UTF8") {
                self.features.utf8 = true;
            }
        }
        if !reply.is(211) {
            return Err(reply.to_error("Failed to get features"));
        }
        log::debug!("{} features: {:?}", self.locator.host, self.features);
        Ok(())
    }

    fn auth_warning(&self, policy: Encryption, message: String) -> NetworkResult<()> {
        if policy == Encryption::Force {
            return Err(NetworkError::Handshake(message));
        }
        log::warn!("{}", message);
        Ok(())
    }

    fn negotiate_tls(&mut self, runtime: &Arc<TlsRuntime>) -> NetworkResult<()> {
        let policy = self.locator.encryption(self.options.encryption);
        if policy == Encryption::Off {
            return Ok(());
        }
        if !self.features.auth {
            return self.auth_warning(policy, "No AUTH support".to_string());
        }
        let lease = match runtime.acquire() {
            Ok(lease) => lease,
            Err(_) => return self.auth_warning(policy, "Failed to initialize TLS".to_string()),
        };

        let reply = self.command("AUTH TLS")?;
        if reply.is(234) || reply.is(334) {
            self.control.set_timeout(0)?;
            self.control.upgrade(&lease, &self.locator.host)?;
            self.control.set_timeout(self.options.control_timeout_secs)?;
            self.tls = Some(lease);

            let reply = self.command("PBSZ 0")?;
            if !reply.is(200) {
                return Err(reply.to_error("Failed to set protection buffer size"));
            }
            let reply = self.command("PROT P")?;
            if !reply.is(200) {
                return Err(reply.to_error("Failed to set data protection"));
            }
            Ok(())
        } else if reply.is(500) || reply.is(502) {
            let message = reply
                .to_error("Failed to establish encrypted connection")
                .to_string();
            self.auth_warning(policy, message)
        } else {
            Err(reply.to_error("Failed to authenticate"))
        }
    }

    fn authenticate(&mut self, passwords: &[String]) -> NetworkResult<()> {
        let empty = [String::new()];
        let passwords = if passwords.is_empty() { &empty[..] } else { passwords };
        let user = self.locator.login_user().to_string();

        let mut reply = Reply::default();
        for password in passwords {
            reply = self.command_arg("USER", &user)?;
            if reply.is(331) {
                reply = self.command_arg("PASS", password)?;
                if reply.is(230) || reply.is(202) {
                    return Ok(());
                }
                if !reply.is(530) {
                    break;
                }
            } else if reply.is(230) {
                return Ok(());
            } else {
                break;
            }
        }
        Err(reply.to_error("Failed to log in"))
    }

    /// Reads the rest of a multi-line reply and returns its final line
    fn finish_reply(&mut self, first: Reply) -> NetworkResult<Reply> {
        if !first.is_cont(first.code) {
            return Ok(first);
        }
        loop {
            let reply = self.reader.get_reply(&mut self.control)?;
            if reply.is(first.code) {
                return Ok(reply);
            }
        }
    }

    fn command(&mut self, command: &str) -> NetworkResult<Reply> {
        let first = self.track(|s| s.reader.send_command(&mut s.control, command))?;
        self.track(|s| s.finish_reply(first))
    }

    fn command_arg(&mut self, command: &str, arg: &str) -> NetworkResult<Reply> {
        let first = self.track(|s| s.reader.send_command_arg(&mut s.control, command, arg))?;
        self.track(|s| s.finish_reply(first))
    }

    /// Marks the session unusable when the control channel fails
    fn track<T, F>(&mut self, op: F) -> NetworkResult<T>
    where
        F: FnOnce(&mut Self) -> NetworkResult<T>,
    {
        let result = op(self);
        if let Err(e) = &result {
            if e.is_protocol_error() || e.is_retryable() {
                self.broken = true;
            }
        }
        result
    }

    pub fn features(&self) -> Features {
        self.features
    }

    pub fn is_secured(&self) -> bool {
        self.tls.is_some()
    }

    /// False once the control channel failed or was closed
    pub fn is_usable(&self) -> bool {
        !self.broken && self.control.is_connected()
    }

    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    pub fn host_key(&self) -> String {
        self.locator.host_key()
    }

    /// Requests a passive data port (PASV over IPv4, EPSV over IPv6)
    pub fn passive_address(&mut self) -> NetworkResult<Address> {
        let control = self.control.address();
        let command = if control.family() == AddressFamily::V4 { "PASV" } else { "EPSV" };
        let reply = self.command(command)?;
        parse_passive_reply(&reply, control)
    }

    fn open_data(&mut self) -> NetworkResult<Connection> {
        let address = self.passive_address()?;
        log::debug!("Opening data connection to {}", address);
        Connection::connect_addr(address, self.options.data_timeout_secs)
    }

    fn secure_data(&self, data: &mut Connection) -> NetworkResult<()> {
        if let Some(lease) = &self.tls {
            data.upgrade(lease, &self.locator.host)?;
        }
        data.set_timeout(self.options.data_timeout_secs)
    }

    /// Changes into the parent directory of `path` when the server lacks
    /// TVFS and returns the argument to use for file commands
    fn prepare_path(&mut self, path: &str) -> String {
        if self.features.tvfs {
            return path.to_string();
        }
        let trimmed = path.trim_end_matches('/');
        let (dir, name) = match trimmed.rfind('/') {
            Some(i) => (&trimmed[..i], &trimmed[i + 1..]),
            None => ("", trimmed),
        };

        match self.change_directory(dir) {
            Ok(()) => name.to_string(),
            Err(e) => {
                log::error!("{}", e);
                path.to_string()
            }
        }
    }

    fn change_directory(&mut self, dir: &str) -> NetworkResult<()> {
        let reply = self.command("PWD")?;
        if !reply.is(257) {
            return Err(reply.to_error("Failed to get working directory"));
        }
        let current = parse_quoted(&reply.text);
        let cwd: Vec<&str> = current.split('/').filter(|c| !c.is_empty()).collect();
        let dst: Vec<&str> = dir.split('/').filter(|c| !c.is_empty()).collect();
        let common = cwd.iter().zip(&dst).take_while(|(a, b)| a == b).count();

        for _ in common..cwd.len() {
            let reply = self.command("CDUP")?;
            if !reply.is(200) && !reply.is(250) {
                return Err(reply.to_error("Failed to change directory"));
            }
        }
        for component in &dst[common..] {
            let reply = self.command_arg("CWD", component)?;
            if !reply.is(200) && !reply.is(250) {
                return Err(reply.to_error("Failed to change directory"));
            }
        }
        Ok(())
    }

    /// Downloads `path` in binary mode
    pub fn retrieve(&mut self, path: &str) -> NetworkResult<Vec<u8>> {
        self.retrieve_with(path, |_| true)
    }

    /// Downloads `path`, asking `keep_going` with the byte count after every read
    pub fn retrieve_with<F>(&mut self, path: &str, keep_going: F) -> NetworkResult<Vec<u8>>
    where
        F: FnMut(usize) -> bool,
    {
        let arg = self.prepare_path(path);
        let reply = self.command("TYPE I")?;
        if !reply.is(200) {
            return Err(reply.to_error("Failed to set binary mode"));
        }

        let mut data = self.open_data()?;
        let reply = self.command_arg("RETR", &arg)?;
        if !reply.is(150) && !reply.is(125) {
            return Err(reply.to_error("Failed to retrieve file"));
        }
        let size_hint = SIZE_REGEX
            .captures(&reply.text)
            .and_then(|c| c[1].parse::<usize>().ok())
            .unwrap_or(self.options.bulk_size_hint)
            .min(MAX_SIZE_HINT);

        let received = self
            .secure_data(&mut data)
            .and_then(|_| ReplyReader::get_bulk_data_with(&mut data, size_hint, keep_going));
        data.disconnect();

        match received {
            Ok(bytes) => {
                let done = self.track(|s| s.reader.get_reply(&mut s.control))?;
                let done = self.finish_reply(done)?;
                if !done.is(226) && !done.is(250) {
                    return Err(done.to_error("Failed to retrieve file"));
                }
                Ok(bytes)
            }
            Err(e) => {
                self.abandon_transfer();
                Err(e)
            }
        }
    }

    /// Reads the server's verdict on a transfer cut short on the data channel
    ///
    /// The control channel is unusable if that reply can't be read, since the
    /// next command would receive it instead.
    fn abandon_transfer(&mut self) {
        let verdict = self
            .reader
            .get_reply(&mut self.control)
            .and_then(|first| self.finish_reply(first));
        match verdict {
            Ok(reply) => log::debug!("Transfer abandoned: {}", reply),
            Err(e) => {
                log::warn!("Lost control channel to {}: {}", self.locator.host, e);
                self.broken = true;
            }
        }
    }

    /// Lists `path`, following symbolic links to classify them
    pub fn list_directory(&mut self, path: &str, include_hidden: bool) -> NetworkResult<Listing> {
        let arg = self.prepare_path(path);
        let mut data = self.open_data()?;
        let command = if self.features.mlst { "MLSD" } else { "LIST" };
        let reply = self.command_arg(command, &arg)?;
        if !reply.is(150) && !reply.is(125) {
            return Err(reply.to_error("Failed to list directory"));
        }
        let received = self
            .secure_data(&mut data)
            .and_then(|_| self.read_listing(&mut data, include_hidden));
        data.disconnect();
        let (mut listing, links) = match received {
            Ok(received) => received,
            Err(e) => {
                self.abandon_transfer();
                return Err(e);
            }
        };

        let done = self.track(|s| s.reader.get_reply(&mut s.control))?;
        let done = self.finish_reply(done)?;
        if !done.is(226) && !done.is(250) {
            return Err(done.to_error("Failed to list directory"));
        }

        for link in links {
            let target = if link.starts_with('/') {
                link.clone()
            } else {
                format!("{}/{}", path.trim_end_matches('/'), link)
            };
            match self.file_type(&target)? {
                FileType::Regular => listing.files.push(link),
                FileType::Directory => listing.dirs.push(link),
                _ => {}
            }
        }

        listing.files.sort();
        listing.dirs.sort();
        Ok(listing)
    }

    /// Reads listing lines until the server closes the data channel;
    /// symbolic links are returned separately
    fn read_listing(
        &self,
        data: &mut Connection,
        include_hidden: bool,
    ) -> NetworkResult<(Listing, Vec<String>)> {
        let mut listing = Listing::default();
        let mut links = Vec::new();
        let mut lines = ReplyReader::new();
        loop {
            let line = match lines.get_line(data)? {
                LineRead::Complete(line) => String::from_utf8_lossy(line).into_owned(),
                LineRead::Closed(_) => break,
            };
            if line.is_empty() {
                continue;
            }
            let entry = if self.features.mlst {
                parse_mlsd_line(&line)
            } else {
                parse_list_line(&line)
            };
            match entry {
                Some((kind, name)) if include_hidden || !name.starts_with('.') => match kind {
                    EntryKind::File => listing.files.push(name),
                    EntryKind::Dir => listing.dirs.push(name),
                    EntryKind::Link => links.push(name),
                },
                _ => {}
            }
        }
        Ok((listing, links))
    }

    /// Classifies `path` with MLST, or STAT when MLST is unavailable
    ///
    /// A negative reply yields [`FileType::NotFound`]; transport failures are errors.
    pub fn file_type(&mut self, path: &str) -> NetworkResult<FileType> {
        match self.stat(path) {
            Err(NetworkError::UnexpectedReply { context, code, text }) => {
                log::debug!("{}: {} {}", context, code, text);
                Ok(FileType::NotFound)
            }
            other => other,
        }
    }

    fn stat(&mut self, path: &str) -> NetworkResult<FileType> {
        let arg = self.prepare_path(path);
        let mut kind = FileType::Unknown;

        let first = if self.features.mlst {
            let first = self.track(|s| s.reader.send_command_arg(&mut s.control, "MLST", &arg))?;
            if !first.is_cont(250) {
                return Err(first.to_error("Failed to stat file"));
            }
            first
        } else {
            let first = self.track(|s| s.reader.send_command_arg(&mut s.control, "STAT", &arg))?;
            if !first.is_cont(212) && !first.is_cont(213) {
                return Err(first.to_error("Failed to stat file"));
            }
            first
        };

        let mut reply = self.track(|s| s.reader.get_reply(&mut s.control))?;
        if self.features.mlst && reply.code == 0 {
            match mlst_type(&reply.command) {
                Some(t) if t.eq_ignore_ascii_case("file") => kind = FileType::Regular,
                Some(t) if t.eq_ignore_ascii_case("dir") => kind = FileType::Directory,
                _ => {}
            }
        }
        while reply.code == 0 {
            reply = self.track(|s| s.reader.get_reply(&mut s.control))?;
        }
        if !reply.is(first.code) {
            return Err(reply.to_error("Failed to stat file"));
        }
        Ok(kind)
    }

    /// Renames a remote entry
    pub fn rename(&mut self, from: &str, to: &str) -> NetworkResult<()> {
        let reply = self.command_arg("RNFR", from)?;
        if !reply.is(350) {
            return Err(reply.to_error("Failed to rename file"));
        }
        let reply = self.command_arg("RNTO", to)?;
        if !reply.is(250) {
            return Err(reply.to_error("Failed to rename file"));
        }
        Ok(())
    }

    /// Says goodbye and closes the control connection; safe to repeat
    pub fn quit(&mut self) {
        if self.control.is_connected() {
            if !self.broken {
                if let Err(e) = self.reader.send_command(&mut self.control, "QUIT") {
                    log::debug!("QUIT failed: {}", e);
                }
            }
            self.control.disconnect();
        }
        self.tls = None;
    }
}

impl Drop for FtpSession {
    fn drop(&mut self) {
        self.quit();
    }
}

impl std::fmt::Debug for FtpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FtpSession")
            .field("locator", &self.locator.to_string())
            .field("features", &self.features)
            .field("secured", &self.is_secured())
            .field("usable", &self.is_usable())
            .finish()
    }
}

/// Extracts the data address from a 227 (PASV) or 229 (EPSV) reply
pub fn parse_passive_reply(reply: &Reply, control: Address) -> NetworkResult<Address> {
    let invalid = || NetworkError::InvalidPassiveReply(reply.to_string());

    if reply.is(227) {
        let caps = PASV_REGEX.captures(&reply.text).ok_or_else(invalid)?;
        let mut parts = [0u8; 6];
        for (i, part) in parts.iter_mut().enumerate() {
            *part = caps[i + 1].parse().map_err(|_| invalid())?;
        }
        let port = u16::from(parts[4]) << 8 | u16::from(parts[5]);
        if port == 0 {
            return Err(invalid());
        }
        let ip = IpAddr::from([parts[0], parts[1], parts[2], parts[3]]);
        Ok(Address::from_ip(ip, port))
    } else if reply.is(229) {
        let caps = EPSV_REGEX.captures(&reply.text).ok_or_else(invalid)?;
        let port: u16 = caps[3].parse().map_err(|_| invalid())?;
        if port == 0 {
            return Err(invalid());
        }
        let (proto, host) = (&caps[1], &caps[2]);
        if proto.is_empty() || host.is_empty() {
            return Ok(control.with_port(port));
        }
        let ip: IpAddr = host.parse().map_err(|_| invalid())?;
        if (proto == "1") != ip.is_ipv4() {
            return Err(invalid());
        }
        Ok(Address::from_ip(ip, port))
    } else {
        Err(reply.to_error("Failed to set passive"))
    }
}

/// Reads a `"quoted"` directory name, where `""` stands for one quote
fn parse_quoted(text: &str) -> String {
    let Some(rest) = text.strip_prefix('"') else {
        return text.to_string();
    };
    let mut out = String::new();
    let mut chars = rest.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '"' {
            if chars.peek() == Some(&'"') {
                chars.next();
                out.push('"');
            } else {
                break;
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    File,
    Dir,
    Link,
}

/// Value of the `type` fact in an MLST/MLSD fact string
fn mlst_type(facts: &str) -> Option<&str> {
    facts.split(';').find_map(|fact| {
        let (key, value) = fact.split_once('=')?;
        key.trim().eq_ignore_ascii_case("type").then_some(value)
    })
}

fn parse_mlsd_line(line: &str) -> Option<(EntryKind, String)> {
    let (facts, name) = line.split_once(' ')?;
    if name.is_empty() {
        return None;
    }
    let kind = match mlst_type(facts)? {
        t if t.eq_ignore_ascii_case("file") => EntryKind::File,
        t if t.eq_ignore_ascii_case("dir") => EntryKind::Dir,
        t if t.eq_ignore_ascii_case("OS.UNIX=symlink") || t.eq_ignore_ascii_case("OS.UNIX") => {
            EntryKind::Link
        }
        _ => return None,
    };
    Some((kind, name.to_string()))
}

fn parse_list_line(line: &str) -> Option<(EntryKind, String)> {
    let first = line.chars().next()?;
    let kind = first.to_ascii_lowercase();

    // skip permissions, link count, user, group, size, month, day and time
    let mut rest = &line[first.len_utf8()..];
    for _ in 0..8 {
        rest = rest.trim_start_matches(|c: char| !c.is_whitespace());
        rest = rest.trim_start();
    }
    if rest.is_empty() {
        return None;
    }

    match kind {
        '-' => Some((EntryKind::File, rest.to_string())),
        'd' if rest != "." && rest != ".." => Some((EntryKind::Dir, rest.to_string())),
        'l' => rest
            .find(" -> ")
            .map(|i| (EntryKind::Link, rest[..i].to_string())),
        _ => None,
    }
}
