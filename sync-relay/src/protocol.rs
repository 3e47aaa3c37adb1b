//! Relay wire protocol.
//!
//! One request line from the client, one response line from the server,
//! then raw bytes. The request carries no length prefix and no required
//! terminator, so the parser works on whatever bytes have arrived so far
//! and reports whether they form a complete request.

use crate::error::{ProtocolError, ProtocolResult};
use std::borrow::Cow;
use std::fmt;
use sync_types::DeviceId;

/// Fixed TCP port of the relay service.
pub const RELAY_PORT: u16 = 22001;

/// Maximum bytes accepted for a request before it is a protocol error.
pub const MAX_REQUEST_LEN: usize = 128;

/// Maximum bytes accepted for a response line.
pub const MAX_RESPONSE_LEN: usize = 64;

/// Request keyword, including the separating space.
const RELAY_KEYWORD: &[u8] = b"RELAY ";

/// A parsed `RELAY <device-id>` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayRequest {
    device_id: String,
}

impl RelayRequest {
    /// Build a request for the given target device.
    pub fn new(target: &DeviceId) -> Self {
        Self {
            device_id: target.to_string(),
        }
    }

    /// The requested device id, exactly as sent.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Wire encoding. No terminator is added.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(RELAY_KEYWORD.len() + self.device_id.len());
        out.extend_from_slice(RELAY_KEYWORD);
        out.extend_from_slice(self.device_id.as_bytes());
        out
    }

    /// Parse the bytes received so far.
    ///
    /// Returns `Ok(None)` while the input is still a prefix of a request
    /// (e.g. `RELA`), `Ok(Some(_))` for a complete request and an error for
    /// anything else. A single trailing `\n` or `\r\n` is accepted.
    pub fn parse(buf: &[u8]) -> ProtocolResult<Option<Self>> {
        if buf.len() > MAX_REQUEST_LEN {
            return Err(ProtocolError::TooLong {
                limit: MAX_REQUEST_LEN,
            });
        }

        // First half of a CRLF split across reads.
        if let Some(head) = buf.strip_suffix(b"\r") {
            return Self::parse(head).map(|_| None);
        }

        let (line, terminated) = strip_line_ending(buf);

        if line.len() < RELAY_KEYWORD.len() {
            return if !terminated && RELAY_KEYWORD.starts_with(line) {
                Ok(None)
            } else {
                Err(ProtocolError::Malformed {
                    reason: "expected RELAY keyword",
                })
            };
        }

        let Some(id) = line.strip_prefix(RELAY_KEYWORD) else {
            return Err(ProtocolError::Malformed {
                reason: "expected RELAY keyword",
            });
        };

        if id.is_empty() {
            return if terminated {
                Err(ProtocolError::Malformed {
                    reason: "missing device id",
                })
            } else {
                Ok(None)
            };
        }

        if !id.iter().all(|b| is_device_id_char(*b)) {
            return Err(ProtocolError::Malformed {
                reason: "device id outside [A-Z0-9-]",
            });
        }

        // id is ASCII after the alphabet check
        let device_id = String::from_utf8_lossy(id).into_owned();
        Ok(Some(Self { device_id }))
    }
}

/// Server reply to a relay request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayResponse {
    /// Target reached; the socket is now a pipe.
    Ok,
    /// The relay has no live connection to the target.
    DeviceUnknown,
    /// The relay could not open a connection to the target.
    ConnectionFailed,
    /// Anything else the server sent.
    Other(String),
}

impl RelayResponse {
    /// Wire encoding, including the `\r\n` terminator.
    pub fn as_bytes(&self) -> Cow<'_, [u8]> {
        match self {
            Self::Ok => Cow::Borrowed(b"OK\r\n"),
            Self::DeviceUnknown => Cow::Borrowed(b"DEVICE UNKNOWN\r\n"),
            Self::ConnectionFailed => Cow::Borrowed(b"CONNECTION FAILED\r\n"),
            Self::Other(line) => Cow::Owned(format!("{}\r\n", line).into_bytes()),
        }
    }

    /// Classify a response line. Anything beginning with `OK` is success.
    pub fn parse(line: &[u8]) -> Self {
        let (line, _) = strip_line_ending(line);
        if line.starts_with(b"OK") {
            Self::Ok
        } else if line == b"DEVICE UNKNOWN" {
            Self::DeviceUnknown
        } else if line == b"CONNECTION FAILED" {
            Self::ConnectionFailed
        } else {
            Self::Other(String::from_utf8_lossy(line).into_owned())
        }
    }
}

impl fmt::Display for RelayResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => f.write_str("OK"),
            Self::DeviceUnknown => f.write_str("DEVICE UNKNOWN"),
            Self::ConnectionFailed => f.write_str("CONNECTION FAILED"),
            Self::Other(line) => write!(f, "unexpected response {:?}", line),
        }
    }
}

fn is_device_id_char(b: u8) -> bool {
    b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'-'
}

fn strip_line_ending(buf: &[u8]) -> (&[u8], bool) {
    if let Some(line) = buf.strip_suffix(b"\r\n") {
        (line, true)
    } else if let Some(line) = buf.strip_suffix(b"\n") {
        (line, true)
    } else {
        (buf, false)
    }
}
