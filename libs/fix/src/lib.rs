//! FIX 4.2 wire codec.
//!
//! Tag-value messages delimited by SOH (0x01), with the envelope layout
//! `8=FIX.4.2|9=<len>|35=...|...|10=<checksum>|`. This crate owns byte-level
//! concerns only: building messages, parsing and validating them, and
//! splitting a TCP byte stream into complete frames. Session semantics
//! (sequence numbers, state) live in the gateway.

pub mod codec;
pub mod framing;
pub mod message;
pub mod timestamp;

pub use codec::{checksum, decode, encode, DecodeError, Envelope};
pub use framing::{FrameBuffer, FrameError};
pub use message::{tags, FixMessage, MsgType, SOH};
