//! Request bodies and the tagged request union.
//!
//! Each body is a fixed layout that directly follows the 23-byte header.
//! SendMessage is the only request with a variable tail: its content length
//! is known only after the fixed prelude has been decoded.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::header::{
    get_name, put_fixed, put_name, wire_len, ClientId, RequestCode, RequestHeader,
    CLIENT_ID_SIZE, MAX_NAME_LEN, NAME_SIZE, PUBLIC_KEY_SIZE, REQUEST_HEADER_SIZE,
};
use crate::WireError;

/// Registration body size: name + public key
pub const REGISTRATION_SIZE: usize = NAME_SIZE + PUBLIC_KEY_SIZE;

/// Public key lookup body size
pub const PUBLIC_KEY_LOOKUP_SIZE: usize = NAME_SIZE;

/// SendMessage prelude size: target id + type + content size
pub const SEND_MESSAGE_PRELUDE_SIZE: usize = CLIENT_ID_SIZE + 1 + 4;

/// Register request body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// Requested unique name
    pub name: String,
    /// Opaque public key (exactly `PUBLIC_KEY_SIZE` bytes)
    pub public_key: Bytes,
}

impl Registration {
    /// Decode from the bytes following the header
    pub fn decode(mut body: &[u8]) -> Result<Self, WireError> {
        if body.len() < REGISTRATION_SIZE {
            return Err(WireError::short("registration", REGISTRATION_SIZE, body.len()));
        }

        let name = get_name(&mut body)?;
        if name.is_empty() {
            return Err(WireError::Name("empty"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(WireError::Name("missing terminator"));
        }
        let public_key = Bytes::copy_from_slice(&body[..PUBLIC_KEY_SIZE]);

        Ok(Self { name, public_key })
    }

    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        put_name(buf, &self.name)?;
        put_fixed(buf, "public key", &self.public_key, PUBLIC_KEY_SIZE)
    }
}

/// GetPublicKey request body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyLookup {
    /// Name of the client whose key is wanted
    pub name: String,
}

impl PublicKeyLookup {
    /// Decode from the bytes following the header
    pub fn decode(mut body: &[u8]) -> Result<Self, WireError> {
        if body.len() < PUBLIC_KEY_LOOKUP_SIZE {
            return Err(WireError::short(
                "public key lookup",
                PUBLIC_KEY_LOOKUP_SIZE,
                body.len(),
            ));
        }
        Ok(Self {
            name: get_name(&mut body)?,
        })
    }
}

/// Fixed fields at the start of a SendMessage body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendMessagePrelude {
    /// Receiving client
    pub target: ClientId,
    /// Raw message type; validated by the handler, not the codec
    pub message_type: u8,
    /// Declared content length
    pub content_size: u32,
}

impl SendMessagePrelude {
    /// Decode from the bytes following the header
    pub fn decode(mut body: &[u8]) -> Result<Self, WireError> {
        if body.len() < SEND_MESSAGE_PRELUDE_SIZE {
            return Err(WireError::short(
                "send message prelude",
                SEND_MESSAGE_PRELUDE_SIZE,
                body.len(),
            ));
        }
        Ok(Self {
            target: ClientId::decode(&mut body),
            message_type: body.get_u8(),
            content_size: body.get_u32_le(),
        })
    }
}

/// SendMessage request body with fully assembled content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendMessage {
    /// Receiving client
    pub target: ClientId,
    /// Raw message type
    pub message_type: u8,
    /// Opaque content
    pub content: Bytes,
}

impl SendMessage {
    /// Decode a body whose content is already entirely in `body`
    pub fn decode(body: &[u8]) -> Result<Self, WireError> {
        let prelude = SendMessagePrelude::decode(body)?;
        let needed = SEND_MESSAGE_PRELUDE_SIZE + prelude.content_size as usize;
        if body.len() < needed {
            return Err(WireError::short("send message content", needed, body.len()));
        }
        Ok(Self {
            target: prelude.target,
            message_type: prelude.message_type,
            content: Bytes::copy_from_slice(&body[SEND_MESSAGE_PRELUDE_SIZE..needed]),
        })
    }

    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        self.target.encode(buf);
        buf.put_u8(self.message_type);
        buf.put_u32_le(wire_len(self.content.len())?);
        buf.put_slice(&self.content);
        Ok(())
    }
}

/// A fully assembled logical request, tagged by request code
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Register a new client
    Register(Registration),
    /// List other clients
    ClientsList,
    /// Look up a public key by name
    PublicKey(PublicKeyLookup),
    /// Leave a message in another client's mailbox
    SendMessage(SendMessage),
    /// Drain the requester's mailbox
    UnreadMessages,
}

impl Request {
    /// Request code for this variant
    pub fn code(&self) -> RequestCode {
        match self {
            Request::Register(_) => RequestCode::Register,
            Request::ClientsList => RequestCode::ClientsList,
            Request::PublicKey(_) => RequestCode::PublicKey,
            Request::SendMessage(_) => RequestCode::SendMessage,
            Request::UnreadMessages => RequestCode::UnreadMessages,
        }
    }

    /// Decode the body for `code` from bytes that hold it completely
    pub fn decode_body(code: RequestCode, body: &[u8]) -> Result<Self, WireError> {
        match code {
            RequestCode::Register => Registration::decode(body).map(Request::Register),
            RequestCode::ClientsList => Ok(Request::ClientsList),
            RequestCode::PublicKey => PublicKeyLookup::decode(body).map(Request::PublicKey),
            RequestCode::SendMessage => SendMessage::decode(body).map(Request::SendMessage),
            RequestCode::UnreadMessages => Ok(Request::UnreadMessages),
        }
    }

    /// Encode header and body as one contiguous buffer
    pub fn encode(&self, client_id: ClientId) -> Result<Bytes, WireError> {
        let mut body = BytesMut::new();
        match self {
            Request::Register(registration) => registration.encode(&mut body)?,
            Request::PublicKey(lookup) => put_name(&mut body, &lookup.name)?,
            Request::SendMessage(message) => message.encode(&mut body)?,
            Request::ClientsList | Request::UnreadMessages => {}
        }

        let header = RequestHeader::new(client_id, self.code(), wire_len(body.len())?);
        let mut buf = BytesMut::with_capacity(REQUEST_HEADER_SIZE + body.len());
        header.encode(&mut buf);
        buf.put_slice(&body);
        Ok(buf.freeze())
    }
}
