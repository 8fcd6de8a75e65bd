//! Request assembly from a freshly readable connection.
//!
//! The first read takes up to one packet and must contain the whole header.
//! Bodies that did not arrive with it are completed by continuation reads of
//! up to one packet each; bytes beyond the declared body (packet padding)
//! are discarded. A zero-byte read before the body is complete means the peer
//! went away and the request is truncated.

use bytes::BytesMut;
use relay_wire::{
    Request, RequestCode, RequestHeader, SendMessagePrelude, WireError, PACKET_SIZE,
    PUBLIC_KEY_LOOKUP_SIZE, REGISTRATION_SIZE, REQUEST_HEADER_SIZE, SEND_MESSAGE_PRELUDE_SIZE,
};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

/// Errors while assembling a request
#[derive(Error, Debug)]
pub enum ReadError {
    /// Bytes present but not a valid layout
    #[error("malformed request: {0}")]
    Malformed(#[from] WireError),

    /// Peer closed before the declared body arrived
    #[error("truncated request: expected {expected} bytes, received {received}")]
    Truncated {
        /// Bytes the request needs
        expected: usize,
        /// Bytes received before the peer closed
        received: usize,
    },

    /// Socket error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reads one request from a stream
pub struct RequestReader<S> {
    stream: S,
    packet_size: usize,
    /// Header and body bytes received so far
    buffer: BytesMut,
    header: Option<RequestHeader>,
}

impl<S: AsyncRead + Unpin> RequestReader<S> {
    /// Create a reader using the protocol packet size
    pub fn new(stream: S) -> Self {
        Self::with_packet_size(stream, PACKET_SIZE)
    }

    /// Create a reader with a custom packet size
    pub fn with_packet_size(stream: S, packet_size: usize) -> Self {
        Self {
            stream,
            packet_size: packet_size.max(REQUEST_HEADER_SIZE),
            buffer: BytesMut::new(),
            header: None,
        }
    }

    /// Perform the first read and decode the header from it.
    ///
    /// No further reads are attempted if the header does not decode.
    pub async fn read_header(&mut self) -> Result<RequestHeader, ReadError> {
        if let Some(header) = self.header {
            return Ok(header);
        }

        let mut packet = vec![0u8; self.packet_size];
        let received = self.stream.read(&mut packet).await?;
        self.buffer.extend_from_slice(&packet[..received]);

        let header = RequestHeader::decode(&self.buffer)?;
        debug!(
            "Read header code={} client={} payload_size={} ({} bytes in first packet)",
            header.code, header.client_id, header.payload_size, received
        );
        self.header = Some(header);
        Ok(header)
    }

    /// Assemble and decode the body for `code`.
    ///
    /// Reads the header first if that has not happened yet.
    pub async fn read_body(&mut self, code: RequestCode) -> Result<Request, ReadError> {
        self.read_header().await?;

        let body_len = match code {
            RequestCode::Register => REGISTRATION_SIZE,
            RequestCode::PublicKey => PUBLIC_KEY_LOOKUP_SIZE,
            RequestCode::ClientsList | RequestCode::UnreadMessages => 0,
            RequestCode::SendMessage => {
                self.fill_to(REQUEST_HEADER_SIZE + SEND_MESSAGE_PRELUDE_SIZE)
                    .await?;
                let prelude = SendMessagePrelude::decode(&self.buffer[REQUEST_HEADER_SIZE..])?;
                SEND_MESSAGE_PRELUDE_SIZE.saturating_add(prelude.content_size as usize)
            }
        };

        self.fill_to(REQUEST_HEADER_SIZE.saturating_add(body_len))
            .await?;
        let request = Request::decode_body(code, &self.buffer[REQUEST_HEADER_SIZE..])?;
        Ok(request)
    }

    /// Read until at least `len` bytes are buffered, keeping no more than that
    async fn fill_to(&mut self, len: usize) -> Result<(), ReadError> {
        if self.buffer.len() >= len {
            return Ok(());
        }

        let mut packet = vec![0u8; self.packet_size];
        while self.buffer.len() < len {
            let received = self.stream.read(&mut packet).await?;
            if received == 0 {
                return Err(ReadError::Truncated {
                    expected: len,
                    received: self.buffer.len(),
                });
            }
            let take = received.min(len - self.buffer.len());
            self.buffer.extend_from_slice(&packet[..take]);
        }
        Ok(())
    }
}
