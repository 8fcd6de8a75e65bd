//! Client side of the relay protocol.
//!
//! Every call opens its own connection, sends one request in padded
//! packets, reads one response and closes, mirroring the server's
//! one-request-per-connection model.

use bytes::{Bytes, BytesMut};
use relay_wire::{
    ClientEntry, ClientId, MessageEntry, MessageType, Packetizer, PublicKeyLookup,
    Registration, Request, Response, ResponseCode, ResponseHeader, SendMessage, WireError,
    RESPONSE_HEADER_SIZE,
};
use std::io::ErrorKind;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::transport::connect_tcp;

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    /// Connection or socket failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Request could not be encoded or response could not be decoded
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// Server closed without answering; it did not accept the request
    #[error("server closed the connection without a response")]
    NoResponse,

    /// Server closed part way through the response payload
    #[error("response truncated: expected {expected} bytes, received {received}")]
    Truncated {
        /// Declared payload size
        expected: usize,
        /// Payload bytes received
        received: usize,
    },

    /// Server answered with a generic error
    #[error("request rejected by server")]
    Rejected,

    /// Server answered with a response for a different request
    #[error("unexpected response {0:?}")]
    Unexpected(ResponseCode),
}

/// Connection-per-call relay client
#[derive(Debug, Clone)]
pub struct RelayClient {
    addr: SocketAddr,
    client_id: ClientId,
    packetizer: Packetizer,
}

impl RelayClient {
    /// Client that has not registered yet
    pub fn new(addr: SocketAddr) -> Self {
        Self::with_id(addr, ClientId::default())
    }

    /// Client acting under an already issued id
    pub fn with_id(addr: SocketAddr, client_id: ClientId) -> Self {
        Self {
            addr,
            client_id,
            packetizer: Packetizer::new(),
        }
    }

    /// Id sent in every request header
    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// Register under `name`; on success the issued id is used from now on
    pub async fn register(&mut self, name: &str, public_key: Bytes) -> Result<ClientId, ClientError> {
        let request = Request::Register(Registration {
            name: name.to_string(),
            public_key,
        });
        match self.exchange(&request).await? {
            Response::Registered { client_id } => {
                self.client_id = client_id;
                Ok(client_id)
            }
            other => Err(ClientError::Unexpected(other.code())),
        }
    }

    /// Every other registered client
    pub async fn clients(&self) -> Result<Vec<ClientEntry>, ClientError> {
        match self.exchange(&Request::ClientsList).await? {
            Response::ClientsList(entries) => Ok(entries),
            other => Err(ClientError::Unexpected(other.code())),
        }
    }

    /// Id and public key of the client registered as `name`
    pub async fn public_key(&self, name: &str) -> Result<(ClientId, Bytes), ClientError> {
        let request = Request::PublicKey(PublicKeyLookup {
            name: name.to_string(),
        });
        match self.exchange(&request).await? {
            Response::PublicKey {
                client_id,
                public_key,
            } => Ok((client_id, public_key)),
            other => Err(ClientError::Unexpected(other.code())),
        }
    }

    /// Leave a message for `target`; returns the assigned message id
    pub async fn send_message(
        &self,
        target: ClientId,
        message_type: MessageType,
        content: Bytes,
    ) -> Result<u32, ClientError> {
        let request = Request::SendMessage(SendMessage {
            target,
            message_type: message_type as u8,
            content,
        });
        match self.exchange(&request).await? {
            Response::MessageSent { message_id, .. } => Ok(message_id),
            other => Err(ClientError::Unexpected(other.code())),
        }
    }

    /// Collect (and thereby consume) every pending message
    pub async fn unread_messages(&self) -> Result<Vec<MessageEntry>, ClientError> {
        match self.exchange(&Request::UnreadMessages).await? {
            Response::UnreadMessages(entries) => Ok(entries),
            other => Err(ClientError::Unexpected(other.code())),
        }
    }

    async fn exchange(&self, request: &Request) -> Result<Response, ClientError> {
        let encoded = request.encode(self.client_id)?;
        let mut stream = connect_tcp(self.addr).await?;
        for packet in self.packetizer.split_padded(encoded) {
            stream.write_all(&packet).await?;
        }
        stream.flush().await?;
        debug!("Sent {:?} to {}", request.code(), self.addr);

        let response = self.read_response(&mut stream).await?;
        match response {
            Response::GenericError => Err(ClientError::Rejected),
            response => Ok(response),
        }
    }

    async fn read_response(&self, stream: &mut TcpStream) -> Result<Response, ClientError> {
        let mut buffer = BytesMut::new();
        let mut packet = vec![0u8; self.packetizer.packet_size()];

        while buffer.len() < RESPONSE_HEADER_SIZE {
            let received = match stream.read(&mut packet).await {
                Ok(received) => received,
                Err(e) if is_reset(&e) => 0,
                Err(e) => return Err(e.into()),
            };
            if received == 0 {
                return Err(ClientError::NoResponse);
            }
            buffer.extend_from_slice(&packet[..received]);
        }

        let header = ResponseHeader::decode(&buffer)?;
        let expected = header.payload_size as usize;
        let total = RESPONSE_HEADER_SIZE.saturating_add(expected);

        while buffer.len() < total {
            let received = stream.read(&mut packet).await?;
            if received == 0 {
                return Err(ClientError::Truncated {
                    expected,
                    received: buffer.len() - RESPONSE_HEADER_SIZE,
                });
            }
            buffer.extend_from_slice(&packet[..received]);
        }

        let payload = buffer.freeze().slice(RESPONSE_HEADER_SIZE..total);
        Ok(Response::decode(&header, payload)?)
    }
}

fn is_reset(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted
    )
}
