// crates/network/src/reply.rs
//! Control-channel replies and the reader that assembles them
//!
//! Replies are CR LF terminated lines of the form `DDD<sep><text>` where
//! `<sep>` is a space on the final line of a reply and a hyphen on the
//! lines before it. Lines starting with a space are informational entries
//! nested inside a multi-line reply.

use crate::buffer::{GrowableBuffer, DATA_STEP, LINE_STEP};
use crate::connection::Connection;
use crate::error::{NetworkError, NetworkResult};
use std::fmt;

/// One parsed reply line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply {
    /// Text before the first space or hyphen
    pub command: String,
    /// Everything after the separator
    pub text: String,
    /// Three-digit code, or 0 if the command isn't exactly three digits
    pub code: u16,
    /// The separator was a hyphen
    pub continued: bool,
    /// The line started with a space
    pub entry: bool,
}

impl Reply {
    /// Parses a line without its terminator
    ///
    /// Only an empty line is rejected. Anything without a three-digit code
    /// is kept with code 0.
    pub fn parse(line: &[u8]) -> NetworkResult<Self> {
        if line.is_empty() {
            return Err(NetworkError::EmptyReply);
        }
        let line = String::from_utf8_lossy(line);

        let entry = line.starts_with(' ');
        let body = if entry { &line[1..] } else { &line[..] };
        let sep = body.find(|c: char| c == ' ' || c == '-');

        let (command, text, continued) = match sep {
            Some(i) => (&body[..i], &body[i + 1..], body.as_bytes()[i] == b'-'),
            None => (body, "", false),
        };

        let code = if command.len() == 3 && command.bytes().all(|b| b.is_ascii_digit()) {
            command.parse().unwrap_or(0)
        } else {
            0
        };

        Ok(Self {
            command: command.to_string(),
            text: text.to_string(),
            code,
            continued,
            entry,
        })
    }

    /// Final line with this code
    pub fn is(&self, code: u16) -> bool {
        self.code == code && !self.continued && !self.entry
    }

    /// Opening line of a multi-line reply with this code
    pub fn is_cont(&self, code: u16) -> bool {
        self.code == code && self.continued && !self.entry
    }

    /// Builds an error describing this reply in `context`
    pub fn to_error(&self, context: &str) -> NetworkError {
        let text = if self.code == 0 {
            self.to_string()
        } else if self.continued {
            format!("(continued) {}", self.text)
        } else {
            self.text.clone()
        };
        NetworkError::UnexpectedReply {
            context: context.to_string(),
            code: self.code,
            text,
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.entry {
            f.write_str(" ")?;
        }
        let sep = if self.continued { "-" } else { " " };
        write!(f, "{}{}{}", self.command, sep, self.text)
    }
}

/// Result of reading one line from a connection
#[derive(Debug, PartialEq, Eq)]
pub enum LineRead<'a> {
    /// A terminated line, terminator stripped
    Complete(&'a [u8]),
    /// The peer closed; holds whatever unterminated bytes were left
    Closed(&'a [u8]),
}

/// Reads replies and lines from a connection through a reusable buffer
#[derive(Debug, Default)]
pub struct ReplyReader {
    buffer: GrowableBuffer,
}

impl ReplyReader {
    pub fn new() -> Self {
        Self {
            buffer: GrowableBuffer::new(LINE_STEP),
        }
    }

    /// Reads the next line, receiving more data as needed
    pub fn get_line(&mut self, conn: &mut Connection) -> NetworkResult<LineRead<'_>> {
        let end = loop {
            if let Some(end) = self.buffer.find_line_end(usize::MAX) {
                break Some(end);
            }
            if self.buffer.fill_from(|spare| conn.receive(spare))? == 0 {
                break None;
            }
        };

        Ok(match end {
            Some(end) => LineRead::Complete(self.buffer.consume_line(end)),
            None => LineRead::Closed(self.buffer.take_remaining()),
        })
    }

    /// Reads and parses the next reply line
    pub fn get_reply(&mut self, conn: &mut Connection) -> NetworkResult<Reply> {
        let reply = match self.get_line(conn)? {
            LineRead::Complete(line) => Reply::parse(line)?,
            LineRead::Closed(_) => return Err(NetworkError::ConnectionClosed),
        };
        log::debug!("<- {}", reply);
        Ok(reply)
    }

    /// Reads a complete reply: the first line plus, if it's a continuation,
    /// every line up to and including the final line with the same code
    pub fn get_reply_group(&mut self, conn: &mut Connection) -> NetworkResult<Vec<Reply>> {
        let first = self.get_reply(conn)?;
        if !first.is_cont(first.code) {
            return Ok(vec![first]);
        }

        let code = first.code;
        let mut group = vec![first];
        loop {
            let reply = self.get_reply(conn)?;
            let done = reply.is(code);
            group.push(reply);
            if done {
                return Ok(group);
            }
        }
    }

    /// Sends `command` and returns the first reply line
    pub fn send_command(&mut self, conn: &mut Connection, command: &str) -> NetworkResult<Reply> {
        log::trace!("-> {}", command);
        conn.send(format!("{}\r\n", command).as_bytes())?;
        self.get_reply(conn)
    }

    /// Sends `command arg` and returns the first reply line
    pub fn send_command_arg(
        &mut self,
        conn: &mut Connection,
        command: &str,
        arg: &str,
    ) -> NetworkResult<Reply> {
        if command.eq_ignore_ascii_case("PASS") {
            log::trace!("-> {} ****", command);
        } else {
            log::trace!("-> {} {}", command, arg);
        }
        conn.send(format!("{} {}\r\n", command, arg).as_bytes())?;
        self.get_reply(conn)
    }

    /// Drops buffered data, e.g. after the control channel was reset
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Reads until the peer closes and returns everything received
    ///
    /// `size_hint` presizes the buffer; 0 uses the default step.
    pub fn get_bulk_data(conn: &mut Connection, size_hint: usize) -> NetworkResult<Vec<u8>> {
        Self::get_bulk_data_with(conn, size_hint, |_| true)
    }

    /// Like [`get_bulk_data`](Self::get_bulk_data), but asks `keep_going`
    /// with the byte count so far after every receive
    pub fn get_bulk_data_with<F>(
        conn: &mut Connection,
        size_hint: usize,
        mut keep_going: F,
    ) -> NetworkResult<Vec<u8>>
    where
        F: FnMut(usize) -> bool,
    {
        let initial = if size_hint == 0 { DATA_STEP } else { size_hint };
        let mut buffer = GrowableBuffer::with_capacity(initial, DATA_STEP);

        while buffer.fill_from(|spare| conn.receive(spare))? != 0 {
            if !keep_going(buffer.filled()) {
                return Err(NetworkError::Cancelled);
            }
        }
        log::debug!("Received {} bytes of bulk data", buffer.filled());
        Ok(buffer.into_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_final_reply() {
        let reply = Reply::parse(b"226 Transfer complete").unwrap();
        assert_eq!(reply.code, 226);
        assert_eq!(reply.command, "226");
        assert_eq!(reply.text, "Transfer complete");
        assert!(!reply.continued);
        assert!(!reply.entry);
        assert!(reply.is(226));
        assert!(!reply.is_cont(226));
    }

    #[test]
    fn test_parse_continuation() {
        let reply = Reply::parse(b"150-Opening data connection").unwrap();
        assert_eq!(reply.code, 150);
        assert!(reply.continued);
        assert!(reply.is_cont(150));
        assert!(!reply.is(150));
    }

    #[test]
    fn test_parse_entry() {
        let reply = Reply::parse(b" extra detail").unwrap();
        assert_eq!(reply.code, 0);
        assert!(reply.entry);
        assert_eq!(reply.command, "extra");
        assert_eq!(reply.text, "detail");
    }

    #[test]
    fn test_feature_entry() {
        let reply = Reply::parse(b" MLST type*;size*;modify*;").unwrap();
        assert!(reply.entry);
        assert_eq!(reply.command, "MLST");
        assert_eq!(reply.text, "type*;size*;modify*;");
        assert!(!reply.is(0));
    }

    #[test]
    fn test_wrong_digit_count_is_code_zero() {
        assert_eq!(Reply::parse(b"22 Short").unwrap().code, 0);
        assert_eq!(Reply::parse(b"2260 Long").unwrap().code, 0);
        assert_eq!(Reply::parse(b"22a Mixed").unwrap().code, 0);
        assert_eq!(Reply::parse(b"2260-Long").unwrap().code, 0);
    }

    #[test]
    fn test_bare_code() {
        let reply = Reply::parse(b"200").unwrap();
        assert_eq!(reply.code, 200);
        assert!(reply.text.is_empty());
        assert!(reply.is(200));
    }

    #[test]
    fn test_empty_line_rejected() {
        assert!(matches!(Reply::parse(b""), Err(NetworkError::EmptyReply)));
    }

    #[test]
    fn test_display_round_trip() {
        for line in ["211-Features:", " UTF8", "211 End", "PASV"] {
            assert_eq!(Reply::parse(line.as_bytes()).unwrap().to_string().trim_end(), line);
        }
    }

    #[test]
    fn test_to_error() {
        let err = Reply::parse(b"550 No such file").unwrap().to_error("Failed to retrieve file");
        assert_eq!(err.to_string(), "Failed to retrieve file: 550 No such file");
        assert_eq!(err.reply_code(), Some(550));

        let err = Reply::parse(b"garbage line").unwrap().to_error("Failed to connect");
        assert_eq!(err.reply_code(), Some(0));
        assert!(err.to_string().contains("garbage line"));
    }
}
