//! DNS message handling.
//!
//! Messages are relayed as opaque payloads. Encoding and decoding of
//! sections belongs to the hosting server; this crate reads the header only.

pub mod message;

pub use message::{Message, MessageError, Rcode, HEADER_LEN, MAX_UDP_SIZE};
