//! Response bodies and their encoders.
//!
//! Encoding only fails when a caller hands over a field that does not match
//! its fixed wire width, or a list too large for the 32-bit size field.
//! Decoders are provided for the client side of the protocol.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::header::{
    get_name, put_fixed, put_name, wire_len, ClientId, MessageType, ResponseCode,
    ResponseHeader, CLIENT_ID_SIZE, MESSAGE_ID_SIZE, NAME_SIZE, PUBLIC_KEY_SIZE,
    RESPONSE_HEADER_SIZE,
};
use crate::WireError;

/// Size of one entry in a clients list
pub const CLIENT_ENTRY_SIZE: usize = CLIENT_ID_SIZE + NAME_SIZE;

/// Fixed part of one pending message record: from + id + type + size
pub const MESSAGE_ENTRY_PRELUDE_SIZE: usize = CLIENT_ID_SIZE + MESSAGE_ID_SIZE + 1 + 4;

/// One entry of a clients list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientEntry {
    /// Client identifier
    pub id: ClientId,
    /// Registered name
    pub name: String,
}

impl ClientEntry {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        self.id.encode(buf);
        put_name(buf, &self.name)
    }

    fn decode(buf: &mut impl Buf) -> Result<Self, WireError> {
        let id = ClientId::decode(buf);
        let name = get_name(buf)?;
        Ok(Self { id, name })
    }
}

/// One pending message record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEntry {
    /// Sender
    pub from: ClientId,
    /// Server-assigned message id
    pub id: u32,
    /// Message kind
    pub message_type: MessageType,
    /// Opaque content
    pub content: Bytes,
}

impl MessageEntry {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        self.from.encode(buf);
        buf.put_u32_le(self.id);
        buf.put_u8(self.message_type as u8);
        buf.put_u32_le(wire_len(self.content.len())?);
        buf.put_slice(&self.content);
        Ok(())
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        if buf.remaining() < MESSAGE_ENTRY_PRELUDE_SIZE {
            return Err(WireError::short(
                "message entry",
                MESSAGE_ENTRY_PRELUDE_SIZE,
                buf.remaining(),
            ));
        }
        let from = ClientId::decode(buf);
        let id = buf.get_u32_le();
        let message_type = MessageType::try_from(buf.get_u8())?;
        let size = buf.get_u32_le() as usize;
        if buf.remaining() < size {
            return Err(WireError::short("message content", size, buf.remaining()));
        }
        let content = buf.split_to(size);
        Ok(Self {
            from,
            id,
            message_type,
            content,
        })
    }
}

/// Every response the server can produce
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Registration succeeded with a fresh id
    Registered {
        /// Newly issued client id
        client_id: ClientId,
    },
    /// All clients except the requester
    ClientsList(Vec<ClientEntry>),
    /// Public key lookup result
    PublicKey {
        /// Owner of the key
        client_id: ClientId,
        /// Opaque key bytes
        public_key: Bytes,
    },
    /// Message stored for the target
    MessageSent {
        /// Receiving client
        target: ClientId,
        /// Assigned message id
        message_id: u32,
    },
    /// The requester's pending messages (possibly none)
    UnreadMessages(Vec<MessageEntry>),
    /// Payload-less failure
    GenericError,
}

impl Response {
    /// Response code for this variant
    pub fn code(&self) -> ResponseCode {
        match self {
            Response::Registered { .. } => ResponseCode::Registered,
            Response::ClientsList(_) => ResponseCode::ClientsList,
            Response::PublicKey { .. } => ResponseCode::PublicKey,
            Response::MessageSent { .. } => ResponseCode::MessageSent,
            Response::UnreadMessages(_) => ResponseCode::UnreadMessages,
            Response::GenericError => ResponseCode::GenericError,
        }
    }

    /// Encode the payload alone
    pub fn encode_payload(&self) -> Result<Bytes, WireError> {
        let mut buf = BytesMut::new();
        match self {
            Response::Registered { client_id } => client_id.encode(&mut buf),
            Response::ClientsList(entries) => {
                buf.reserve(entries.len() * CLIENT_ENTRY_SIZE);
                for entry in entries {
                    entry.encode(&mut buf)?;
                }
            }
            Response::PublicKey {
                client_id,
                public_key,
            } => {
                client_id.encode(&mut buf);
                put_fixed(&mut buf, "public key", public_key, PUBLIC_KEY_SIZE)?;
            }
            Response::MessageSent { target, message_id } => {
                target.encode(&mut buf);
                buf.put_u32_le(*message_id);
            }
            Response::UnreadMessages(entries) => {
                for entry in entries {
                    entry.encode(&mut buf)?;
                }
            }
            Response::GenericError => {}
        }
        Ok(buf.freeze())
    }

    /// Encode header and payload as one contiguous buffer
    pub fn encode(&self) -> Result<Bytes, WireError> {
        let payload = self.encode_payload()?;
        let header = ResponseHeader::new(self.code(), wire_len(payload.len())?);

        let mut buf = BytesMut::with_capacity(RESPONSE_HEADER_SIZE + payload.len());
        header.encode(&mut buf);
        buf.put_slice(&payload);
        Ok(buf.freeze())
    }

    /// Decode a payload that arrived under `header`
    pub fn decode(header: &ResponseHeader, mut payload: Bytes) -> Result<Self, WireError> {
        let declared = header.payload_size as usize;
        if payload.len() < declared {
            return Err(WireError::short("response payload", declared, payload.len()));
        }
        payload.truncate(declared);

        match header.code {
            ResponseCode::Registered => {
                require(&payload, "registration response", CLIENT_ID_SIZE)?;
                Ok(Response::Registered {
                    client_id: ClientId::decode(&mut payload),
                })
            }
            ResponseCode::ClientsList => {
                if payload.len() % CLIENT_ENTRY_SIZE != 0 {
                    return Err(WireError::short(
                        "clients list",
                        payload.len().next_multiple_of(CLIENT_ENTRY_SIZE),
                        payload.len(),
                    ));
                }
                let mut entries = Vec::with_capacity(payload.len() / CLIENT_ENTRY_SIZE);
                while payload.has_remaining() {
                    entries.push(ClientEntry::decode(&mut payload)?);
                }
                Ok(Response::ClientsList(entries))
            }
            ResponseCode::PublicKey => {
                require(&payload, "public key response", CLIENT_ID_SIZE + PUBLIC_KEY_SIZE)?;
                let client_id = ClientId::decode(&mut payload);
                Ok(Response::PublicKey {
                    client_id,
                    public_key: payload.split_to(PUBLIC_KEY_SIZE),
                })
            }
            ResponseCode::MessageSent => {
                require(&payload, "message sent response", CLIENT_ID_SIZE + MESSAGE_ID_SIZE)?;
                let target = ClientId::decode(&mut payload);
                Ok(Response::MessageSent {
                    target,
                    message_id: payload.get_u32_le(),
                })
            }
            ResponseCode::UnreadMessages => {
                let mut entries = Vec::new();
                while payload.has_remaining() {
                    entries.push(MessageEntry::decode(&mut payload)?);
                }
                Ok(Response::UnreadMessages(entries))
            }
            ResponseCode::GenericError => Ok(Response::GenericError),
        }
    }
}

fn require(payload: &Bytes, what: &'static str, needed: usize) -> Result<(), WireError> {
    if payload.len() < needed {
        return Err(WireError::short(what, needed, payload.len()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::SERVER_VERSION;

    fn decode_encoded(response: &Response) -> Response {
        let bytes = response.encode().unwrap();
        let header = ResponseHeader::decode(&bytes).unwrap();
        Response::decode(&header, bytes.slice(RESPONSE_HEADER_SIZE..)).unwrap()
    }

    #[test]
    fn test_registered_layout() {
        let response = Response::Registered {
            client_id: ClientId([5; CLIENT_ID_SIZE]),
        };
        let bytes = response.encode().unwrap();

        assert_eq!(bytes.len(), RESPONSE_HEADER_SIZE + CLIENT_ID_SIZE);
        assert_eq!(bytes[0], SERVER_VERSION);
        assert_eq!(&bytes[1..3], &2000u16.to_le_bytes());
        assert_eq!(&bytes[3..7], &16u32.to_le_bytes());
        assert_eq!(decode_encoded(&response), response);
    }

    #[test]
    fn test_clients_list_entries_are_fixed_width() {
        let response = Response::ClientsList(vec![
            ClientEntry {
                id: ClientId([1; CLIENT_ID_SIZE]),
                name: "alice".to_string(),
            },
            ClientEntry {
                id: ClientId([2; CLIENT_ID_SIZE]),
                name: "bob".to_string(),
            },
        ]);
        let payload = response.encode_payload().unwrap();
        assert_eq!(payload.len(), 2 * CLIENT_ENTRY_SIZE);
        assert_eq!(&payload[CLIENT_ID_SIZE..CLIENT_ID_SIZE + 6], b"alice\0");
        assert_eq!(decode_encoded(&response), response);
    }

    #[test]
    fn test_empty_clients_list() {
        let response = Response::ClientsList(Vec::new());
        assert_eq!(response.encode().unwrap().len(), RESPONSE_HEADER_SIZE);
        assert_eq!(decode_encoded(&response), response);
    }

    #[test]
    fn test_public_key_requires_full_width_key() {
        let response = Response::PublicKey {
            client_id: ClientId::default(),
            public_key: Bytes::from(vec![1u8; PUBLIC_KEY_SIZE - 1]),
        };
        assert!(matches!(
            response.encode(),
            Err(WireError::Encode {
                expected: PUBLIC_KEY_SIZE,
                actual: 159,
                ..
            })
        ));
    }

    #[test]
    fn test_message_sent_layout() {
        let response = Response::MessageSent {
            target: ClientId([4; CLIENT_ID_SIZE]),
            message_id: 77,
        };
        let payload = response.encode_payload().unwrap();
        assert_eq!(payload.len(), CLIENT_ID_SIZE + MESSAGE_ID_SIZE);
        assert_eq!(&payload[CLIENT_ID_SIZE..], &77u32.to_le_bytes());
    }

    #[test]
    fn test_unread_messages_records() {
        let response = Response::UnreadMessages(vec![
            MessageEntry {
                from: ClientId([8; CLIENT_ID_SIZE]),
                id: 1,
                message_type: MessageType::TextMessage,
                content: Bytes::from_static(b"hello"),
            },
            MessageEntry {
                from: ClientId([9; CLIENT_ID_SIZE]),
                id: 2,
                message_type: MessageType::GetKey,
                content: Bytes::new(),
            },
        ]);
        let payload = response.encode_payload().unwrap();
        assert_eq!(payload.len(), 2 * MESSAGE_ENTRY_PRELUDE_SIZE + 5);
        assert_eq!(payload[CLIENT_ID_SIZE + MESSAGE_ID_SIZE], 3);
        assert_eq!(decode_encoded(&response), response);
    }

    #[test]
    fn test_generic_error_is_header_only() {
        let bytes = Response::GenericError.encode().unwrap();
        assert_eq!(bytes.len(), RESPONSE_HEADER_SIZE);
        assert_eq!(&bytes[1..3], &9000u16.to_le_bytes());
    }

    #[test]
    fn test_truncated_payload_is_malformed() {
        let header = ResponseHeader::new(ResponseCode::Registered, CLIENT_ID_SIZE as u32);
        let err = Response::decode(&header, Bytes::from_static(&[0u8; 4])).unwrap_err();
        assert!(matches!(err, WireError::Malformed { .. }));
    }
}
