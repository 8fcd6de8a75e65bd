//! Response transmission in packet-sized writes.

use relay_wire::{Packetizer, Response, WireError};
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Errors while sending a response
#[derive(Error, Debug)]
pub enum SendError {
    /// Response could not be serialized; nothing was written
    #[error("failed to encode response: {0}")]
    Encode(#[from] WireError),

    /// The peer did not take the full response
    #[error("send failed: {0}")]
    Failed(#[from] std::io::Error),
}

/// Writes responses to a stream
pub struct ResponseWriter<S> {
    stream: S,
    packetizer: Packetizer,
}

impl<S: AsyncWrite + Unpin> ResponseWriter<S> {
    /// Create a writer using the protocol packet size
    pub fn new(stream: S) -> Self {
        Self::with_packetizer(stream, Packetizer::new())
    }

    /// Create a writer with a custom packetizer
    pub fn with_packetizer(stream: S, packetizer: Packetizer) -> Self {
        Self { stream, packetizer }
    }

    /// Encode and transmit `response`, returning the bytes written.
    ///
    /// Short responses go out as one padded packet, long ones as a full
    /// first packet followed by continuation chunks. Every chunk is written
    /// completely or the whole send fails.
    pub async fn send(&mut self, response: &Response) -> Result<usize, SendError> {
        let encoded = response.encode()?;
        let mut written = 0;
        for packet in self.packetizer.split(encoded) {
            self.stream.write_all(&packet).await?;
            written += packet.len();
        }
        self.stream.flush().await?;

        debug!("Wrote {:?} response ({} bytes)", response.code(), written);
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use relay_wire::{
        ClientId, MessageEntry, MessageType, ResponseHeader, PACKET_SIZE, RESPONSE_HEADER_SIZE,
    };
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_short_response_is_padded() {
        let (client, mut server) = tokio::io::duplex(4096);
        let response = Response::Registered {
            client_id: ClientId([6; 16]),
        };

        let written = ResponseWriter::new(client).send(&response).await.unwrap();
        assert_eq!(written, PACKET_SIZE);

        let mut received = Vec::new();
        server.read_to_end(&mut received).await.unwrap();
        assert_eq!(received.len(), PACKET_SIZE);

        let header = ResponseHeader::decode(&received).unwrap();
        assert_eq!(header.payload_size, 16);
        assert_eq!(
            Response::decode(&header, Bytes::from(received).slice(RESPONSE_HEADER_SIZE..))
                .unwrap(),
            response
        );
    }

    #[tokio::test]
    async fn test_long_response_is_chunked_through_small_pipe() {
        let response = Response::UnreadMessages(vec![MessageEntry {
            from: ClientId([1; 16]),
            id: 9,
            message_type: MessageType::File,
            content: Bytes::from(vec![5u8; 5000]),
        }]);
        let expected = response.encode().unwrap();

        let (client, mut server) = tokio::io::duplex(100);
        let reader = tokio::spawn(async move {
            let mut received = Vec::new();
            server.read_to_end(&mut received).await.unwrap();
            received
        });

        let written = {
            let mut writer = ResponseWriter::new(client);
            writer.send(&response).await.unwrap()
        };
        assert_eq!(written, expected.len());
        assert_eq!(reader.await.unwrap(), expected.to_vec());
    }

    #[tokio::test]
    async fn test_closed_peer_is_send_failure() {
        let (client, server) = tokio::io::duplex(64);
        drop(server);

        let err = ResponseWriter::new(client)
            .send(&Response::GenericError)
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::Failed(_)));
    }

    #[tokio::test]
    async fn test_unencodable_response_writes_nothing() {
        let (client, mut server) = tokio::io::duplex(4096);
        let response = Response::PublicKey {
            client_id: ClientId::default(),
            public_key: Bytes::from_static(b"too short"),
        };

        let err = ResponseWriter::new(client).send(&response).await.unwrap_err();
        assert!(matches!(err, SendError::Encode(_)));

        let mut received = Vec::new();
        server.read_to_end(&mut received).await.unwrap();
        assert!(received.is_empty());
    }
}
