//! Request and response headers for the wire protocol.
//!
//! Every request starts with a 23-byte header and every response with a
//! 7-byte header. All multi-byte integers are little-endian.

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::WireError;

/// Protocol version stamped on every server response
pub const SERVER_VERSION: u8 = 2;

/// Protocol version sent by clients
pub const CLIENT_VERSION: u8 = 1;

/// Fixed transport chunk size; every send is padded to or split by it
pub const PACKET_SIZE: usize = 1024;

/// Client identifier width
pub const CLIENT_ID_SIZE: usize = 16;

/// Zero-padded name field width (254 name bytes plus terminator)
pub const NAME_SIZE: usize = 255;

/// Longest name that still leaves room for the zero terminator
pub const MAX_NAME_LEN: usize = NAME_SIZE - 1;

/// Public key field width
pub const PUBLIC_KEY_SIZE: usize = 160;

/// Message identifier width
pub const MESSAGE_ID_SIZE: usize = 4;

/// Request header size: client_id + version + code + payload_size
pub const REQUEST_HEADER_SIZE: usize = CLIENT_ID_SIZE + 1 + 2 + 4;

/// Response header size: version + code + payload_size
pub const RESPONSE_HEADER_SIZE: usize = 1 + 2 + 4;

/// 16-byte opaque client identifier
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(pub [u8; CLIENT_ID_SIZE]);

impl ClientId {
    /// Build an identifier from raw bytes
    pub fn from_bytes(bytes: [u8; CLIENT_ID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw identifier bytes
    pub fn as_bytes(&self) -> &[u8; CLIENT_ID_SIZE] {
        &self.0
    }

    pub(crate) fn decode(buf: &mut impl Buf) -> Self {
        let mut id = [0u8; CLIENT_ID_SIZE];
        buf.copy_to_slice(&mut id);
        Self(id)
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.0);
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Request codes
#[repr(u16)]
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestCode {
    /// Register a new client
    Register = 1000,
    /// List every other registered client
    ClientsList = 1001,
    /// Look up a client's public key by name
    PublicKey = 1002,
    /// Store a message in another client's mailbox
    SendMessage = 1003,
    /// Drain the requester's mailbox
    UnreadMessages = 1004,
}

impl RequestCode {
    /// Every request code the server answers
    pub const ALL: [RequestCode; 5] = [
        RequestCode::Register,
        RequestCode::ClientsList,
        RequestCode::PublicKey,
        RequestCode::SendMessage,
        RequestCode::UnreadMessages,
    ];
}

impl TryFrom<u16> for RequestCode {
    type Error = WireError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            1000 => Ok(RequestCode::Register),
            1001 => Ok(RequestCode::ClientsList),
            1002 => Ok(RequestCode::PublicKey),
            1003 => Ok(RequestCode::SendMessage),
            1004 => Ok(RequestCode::UnreadMessages),
            _ => Err(WireError::RequestCode(value)),
        }
    }
}

/// Response codes
#[repr(u16)]
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseCode {
    /// Registration succeeded
    Registered = 2000,
    /// Client list follows
    ClientsList = 2001,
    /// Public key follows
    PublicKey = 2002,
    /// Message stored
    MessageSent = 2003,
    /// Pending messages follow
    UnreadMessages = 2004,
    /// Request failed inside a handler
    GenericError = 9000,
}

impl TryFrom<u16> for ResponseCode {
    type Error = WireError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            2000 => Ok(ResponseCode::Registered),
            2001 => Ok(ResponseCode::ClientsList),
            2002 => Ok(ResponseCode::PublicKey),
            2003 => Ok(ResponseCode::MessageSent),
            2004 => Ok(ResponseCode::UnreadMessages),
            9000 => Ok(ResponseCode::GenericError),
            _ => Err(WireError::ResponseCode(value)),
        }
    }
}

/// Kinds of relayed messages; the server never looks inside the content
#[repr(u8)]
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    /// Request for the receiver's symmetric key
    GetKey = 1,
    /// Symmetric key, encrypted with the receiver's public key
    SendKey = 2,
    /// Encrypted text
    TextMessage = 3,
    /// Encrypted file contents
    File = 4,
}

impl TryFrom<u8> for MessageType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MessageType::GetKey),
            2 => Ok(MessageType::SendKey),
            3 => Ok(MessageType::TextMessage),
            4 => Ok(MessageType::File),
            _ => Err(WireError::MessageType(value)),
        }
    }
}

/// Request header (23 bytes)
///
/// The code is kept raw so that an unknown code can be reported after the
/// header itself decoded cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    /// Requesting client
    pub client_id: ClientId,
    /// Client protocol version
    pub version: u8,
    /// Raw request code
    pub code: u16,
    /// Declared payload size following the header
    pub payload_size: u32,
}

impl RequestHeader {
    /// Create a header for a known request code
    pub fn new(client_id: ClientId, code: RequestCode, payload_size: u32) -> Self {
        Self {
            client_id,
            version: CLIENT_VERSION,
            code: code as u16,
            payload_size,
        }
    }

    /// Resolve the raw code
    pub fn request_code(&self) -> Result<RequestCode, WireError> {
        RequestCode::try_from(self.code)
    }

    /// Encode the header (little-endian)
    pub fn encode(&self, buf: &mut BytesMut) {
        self.client_id.encode(buf);
        buf.put_u8(self.version);
        buf.put_u16_le(self.code);
        buf.put_u32_le(self.payload_size);
    }

    /// Decode the header from the front of `buf`
    pub fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < REQUEST_HEADER_SIZE {
            return Err(WireError::short("request header", REQUEST_HEADER_SIZE, buf.len()));
        }

        let client_id = ClientId::decode(&mut buf);
        let version = buf.get_u8();
        let code = buf.get_u16_le();
        let payload_size = buf.get_u32_le();

        Ok(Self {
            client_id,
            version,
            code,
            payload_size,
        })
    }
}

/// Response header (7 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    /// Server protocol version
    pub version: u8,
    /// Response code
    pub code: ResponseCode,
    /// Payload size following the header
    pub payload_size: u32,
}

impl ResponseHeader {
    /// Create a header stamped with the server version
    pub fn new(code: ResponseCode, payload_size: u32) -> Self {
        Self {
            version: SERVER_VERSION,
            code,
            payload_size,
        }
    }

    /// Encode the header (little-endian)
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.version);
        buf.put_u16_le(self.code as u16);
        buf.put_u32_le(self.payload_size);
    }

    /// Decode the header from the front of `buf`
    pub fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < RESPONSE_HEADER_SIZE {
            return Err(WireError::short("response header", RESPONSE_HEADER_SIZE, buf.len()));
        }

        let version = buf.get_u8();
        let code = ResponseCode::try_from(buf.get_u16_le())?;
        let payload_size = buf.get_u32_le();

        Ok(Self {
            version,
            code,
            payload_size,
        })
    }
}

/// Write `name` into a zero-padded `NAME_SIZE` field
pub(crate) fn put_name(buf: &mut BytesMut, name: &str) -> Result<(), WireError> {
    let bytes = name.as_bytes();
    if bytes.len() > MAX_NAME_LEN {
        return Err(WireError::Encode {
            field: "name",
            expected: MAX_NAME_LEN,
            actual: bytes.len(),
        });
    }
    buf.put_slice(bytes);
    buf.put_bytes(0, NAME_SIZE - bytes.len());
    Ok(())
}

/// Read a zero-padded `NAME_SIZE` field, truncating at the first zero byte
pub(crate) fn get_name(buf: &mut impl Buf) -> Result<String, WireError> {
    let mut field = [0u8; NAME_SIZE];
    buf.copy_to_slice(&mut field);
    let end = field.iter().position(|&b| b == 0).unwrap_or(NAME_SIZE);
    let name = std::str::from_utf8(&field[..end]).map_err(|_| WireError::Name("not utf-8"))?;
    Ok(name.to_owned())
}

/// Write a fixed-width field, rejecting any width mismatch
pub(crate) fn put_fixed(
    buf: &mut BytesMut,
    field: &'static str,
    bytes: &[u8],
    expected: usize,
) -> Result<(), WireError> {
    if bytes.len() != expected {
        return Err(WireError::Encode {
            field,
            expected,
            actual: bytes.len(),
        });
    }
    buf.put_slice(bytes);
    Ok(())
}

/// Convert a length into its 32-bit wire form
pub(crate) fn wire_len(len: usize) -> Result<u32, WireError> {
    u32::try_from(len).map_err(|_| WireError::Size(len))
}
