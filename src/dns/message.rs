//! Opaque DNS message wrapper.
//!
//! # Responsibilities
//! - Carry query/response payloads between the listener, the forwarder and upstreams
//! - Expose the header fields relaying needs (ID, QR, TC, RCODE)
//! - Build the fixed health-probe query and header-level error replies
//!
//! # Design Decisions
//! - Only the 12-byte header is ever interpreted; sections are never parsed
//! - Anything shorter than a header is rejected at construction

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Size of the fixed DNS header.
pub const HEADER_LEN: usize = 12;

/// Largest message accepted over UDP.
pub const MAX_UDP_SIZE: usize = 4096;

const QR_BIT: u8 = 0x80;
const AA_BIT: u8 = 0x04;
const TC_BIT: u8 = 0x02;
const RD_BIT: u8 = 0x01;
const RA_BIT: u8 = 0x80;
const RCODE_MASK: u8 = 0x0F;

/// Errors raised when wrapping raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    #[error("message too short: {0} bytes, header needs 12")]
    TooShort(usize),
}

/// DNS response code (lower four bits of header byte 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rcode(u8);

impl Rcode {
    pub const NOERROR: Rcode = Rcode(0);
    pub const FORMERR: Rcode = Rcode(1);
    pub const SERVFAIL: Rcode = Rcode(2);
    pub const NXDOMAIN: Rcode = Rcode(3);
    pub const NOTIMP: Rcode = Rcode(4);
    pub const REFUSED: Rcode = Rcode(5);

    /// Build from a raw value; only the low four bits are kept.
    pub fn from_u8(value: u8) -> Self {
        Rcode(value & RCODE_MASK)
    }

    pub fn as_u8(self) -> u8 {
        self.0
    }

    /// Mnemonic used in logs, metrics labels and configuration.
    pub fn name(self) -> &'static str {
        match self.0 {
            0 => "NOERROR",
            1 => "FORMERR",
            2 => "SERVFAIL",
            3 => "NXDOMAIN",
            4 => "NOTIMP",
            5 => "REFUSED",
            _ => "OTHER",
        }
    }
}

impl fmt::Display for Rcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            "OTHER" => write!(f, "RCODE{}", self.0),
            name => f.write_str(name),
        }
    }
}

impl FromStr for Rcode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NOERROR" => Ok(Rcode::NOERROR),
            "FORMERR" => Ok(Rcode::FORMERR),
            "SERVFAIL" => Ok(Rcode::SERVFAIL),
            "NXDOMAIN" => Ok(Rcode::NXDOMAIN),
            "NOTIMP" => Ok(Rcode::NOTIMP),
            "REFUSED" => Ok(Rcode::REFUSED),
            other => other
                .parse::<u8>()
                .ok()
                .filter(|v| *v <= RCODE_MASK)
                .map(Rcode)
                .ok_or_else(|| format!("unknown rcode '{}'", s)),
        }
    }
}

impl TryFrom<String> for Rcode {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Rcode> for String {
    fn from(rcode: Rcode) -> Self {
        rcode.to_string()
    }
}

/// A DNS message in wire form.
#[derive(Clone, PartialEq, Eq)]
pub struct Message {
    bytes: Vec<u8>,
}

impl Message {
    /// Wrap raw wire bytes. Fails if no complete header is present.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, MessageError> {
        if bytes.len() < HEADER_LEN {
            return Err(MessageError::TooShort(bytes.len()));
        }
        Ok(Self { bytes })
    }

    /// The `. IN NS` query used to probe upstream liveness.
    pub fn health_probe(id: u16, recursion_desired: bool) -> Self {
        let mut bytes = Vec::with_capacity(HEADER_LEN + 5);
        bytes.extend_from_slice(&id.to_be_bytes());
        bytes.push(if recursion_desired { RD_BIT } else { 0 });
        bytes.push(0);
        // QDCOUNT=1, AN/NS/AR=0
        bytes.extend_from_slice(&[0, 1, 0, 0, 0, 0, 0, 0]);
        // root name, QTYPE=NS, QCLASS=IN
        bytes.extend_from_slice(&[0, 0, 2, 0, 1]);
        Self { bytes }
    }

    /// Header-only reply to `query` carrying `rcode`, question section echoed.
    pub fn reply_with_rcode(query: &Message, rcode: Rcode) -> Self {
        let mut bytes = query.bytes.clone();
        bytes[2] = (bytes[2] | QR_BIT) & !(AA_BIT | TC_BIT);
        bytes[3] = RA_BIT | rcode.as_u8();
        // ANCOUNT, NSCOUNT
        bytes[6..10].fill(0);
        Self { bytes }
    }

    pub fn id(&self) -> u16 {
        u16::from_be_bytes([self.bytes[0], self.bytes[1]])
    }

    pub fn set_id(&mut self, id: u16) {
        self.bytes[..2].copy_from_slice(&id.to_be_bytes());
    }

    /// QR flag: true for responses.
    pub fn is_response(&self) -> bool {
        self.bytes[2] & QR_BIT != 0
    }

    /// TC flag.
    pub fn is_truncated(&self) -> bool {
        self.bytes[2] & TC_BIT != 0
    }

    pub fn recursion_desired(&self) -> bool {
        self.bytes[2] & RD_BIT != 0
    }

    pub fn rcode(&self) -> Rcode {
        Rcode::from_u8(self.bytes[3])
    }

    /// True if `self` is a response that answers `query` (QR set, same ID).
    pub fn answers(&self, query: &Message) -> bool {
        self.is_response() && self.id() == query.id()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id())
            .field("response", &self.is_response())
            .field("rcode", &self.rcode())
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl TryFrom<Vec<u8>> for Message {
    type Error = MessageError;

    fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
        Message::from_bytes(bytes)
    }
}
