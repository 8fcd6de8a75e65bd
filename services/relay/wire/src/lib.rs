//! Fixed-layout request/response codec and packet framing for the relay.
//!
//! This crate is the pure, I/O-free half of the relay protocol: header and
//! body layouts for every request and response kind, the protocol size
//! constants, and the packet framing rules shared by client and server.
//!
//! ## Wire Format
//!
//! All integers are little-endian; name and key fields are zero-padded to
//! their full width.
//!
//! ```text
//! Request                              Response
//! +---------------------------+        +---------------------------+
//! | client_id      [16]       |        | version        [1]        |
//! | version        [1]        |        | code           [2]        |
//! | code           [2]        |        | payload_size   [4]        |
//! | payload_size   [4]        |        +---------------------------+
//! +---------------------------+        | payload (per code)        |
//! | body (per code)           |        +---------------------------+
//! +---------------------------+
//! ```
//!
//! Every transmission is framed in packets of [`PACKET_SIZE`] bytes: short
//! messages are padded, long ones continue in further packets.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod header;
pub mod packet;
pub mod request;
pub mod response;

// Re-export main types
pub use error::WireError;
pub use header::{
    ClientId, MessageType, RequestCode, RequestHeader, ResponseCode, ResponseHeader,
    CLIENT_ID_SIZE, CLIENT_VERSION, MAX_NAME_LEN, MESSAGE_ID_SIZE, NAME_SIZE, PACKET_SIZE,
    PUBLIC_KEY_SIZE, REQUEST_HEADER_SIZE, RESPONSE_HEADER_SIZE, SERVER_VERSION,
};
pub use packet::Packetizer;
pub use request::{
    PublicKeyLookup, Registration, Request, SendMessage, SendMessagePrelude,
    PUBLIC_KEY_LOOKUP_SIZE, REGISTRATION_SIZE, SEND_MESSAGE_PRELUDE_SIZE,
};
pub use response::{
    ClientEntry, MessageEntry, Response, CLIENT_ENTRY_SIZE, MESSAGE_ENTRY_PRELUDE_SIZE,
};
