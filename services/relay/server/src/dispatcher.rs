//! Request validation and dispatch for one connection.
//!
//! A request is checked in order: the header decodes, the code has a
//! handler, and the requester is a known client (Register is exempt). Any
//! failure there abandons the request without a response. Past validation
//! every request gets exactly one response: the handler's, or a generic
//! error when the handler fails.

use relay_storage::{ClientLookup, Storage, StorageError};
use relay_wire::{ClientId, Packetizer, RequestCode, Response, ResponseCode, PACKET_SIZE};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, warn};

use crate::handlers::{HandlerContext, HandlerError, Reply, Router};
use crate::reader::{ReadError, RequestReader};
use crate::writer::{ResponseWriter, SendError};

/// Reasons a connection ends without a complete response
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Header missing or unreadable
    #[error("bad header: {0}")]
    Header(ReadError),

    /// Code with no installed handler
    #[error("unknown request code {0}")]
    UnknownCode(u16),

    /// Requester id not registered
    #[error("unknown client {0}")]
    UnknownClient(ClientId),

    /// Store failed while validating the requester
    #[error("store failure during validation: {0}")]
    Store(#[from] StorageError),

    /// Response could not be transmitted
    #[error("{0}")]
    Send(#[from] SendError),
}

/// Validates requests and routes them to handlers
#[derive(Clone)]
pub struct Dispatcher {
    storage: Arc<Storage>,
    router: Arc<Router>,
    packet_size: usize,
}

impl Dispatcher {
    /// Create a dispatcher over `storage` with an immutable handler table
    pub fn new(storage: Arc<Storage>, router: Arc<Router>) -> Self {
        Self {
            storage,
            router,
            packet_size: PACKET_SIZE,
        }
    }

    /// Override the packet size used for reads and writes
    pub fn with_packet_size(mut self, packet_size: usize) -> Self {
        self.packet_size = packet_size;
        self
    }

    /// Persistence collaborator
    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// Run one read/dispatch/respond cycle on `stream`.
    ///
    /// Returns the code of the response that was sent. An `Err` means the
    /// request was abandoned or the response did not go out; the caller
    /// closes the connection either way.
    pub async fn dispatch<S>(&self, stream: &mut S) -> Result<ResponseCode, DispatchError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let (client_id, code, outcome) = {
            let mut reader = RequestReader::with_packet_size(&mut *stream, self.packet_size);

            let header = reader.read_header().await.map_err(DispatchError::Header)?;
            let code = RequestCode::try_from(header.code)
                .map_err(|_| DispatchError::UnknownCode(header.code))?;
            let handler = self
                .router
                .get(code)
                .ok_or(DispatchError::UnknownCode(header.code))?;

            if code != RequestCode::Register
                && !self
                    .storage
                    .clients
                    .exists(ClientLookup::Id(header.client_id))
                    .await?
            {
                return Err(DispatchError::UnknownClient(header.client_id));
            }

            if let Err(e) = self.storage.clients.update_last_seen(header.client_id).await {
                warn!("Failed to update last seen for {}: {}", header.client_id, e);
            }

            let ctx = HandlerContext {
                storage: &self.storage,
                client_id: header.client_id,
            };
            let outcome = match reader.read_body(code).await {
                Ok(request) => handler.handle(&ctx, request).await,
                Err(e) => Err(HandlerError::from(e)),
            };
            (header.client_id, code, outcome)
        };

        let reply = match outcome {
            Ok(reply) => reply,
            Err(e) => {
                error!("{:?} from {} failed: {}", code, client_id, e);
                Reply::new(Response::GenericError)
            }
        };

        let mut writer = ResponseWriter::with_packetizer(
            &mut *stream,
            Packetizer::with_packet_size(self.packet_size),
        );
        let sent = match writer.send(&reply.response).await {
            Ok(_) => reply.response.code(),
            Err(SendError::Encode(e)) => {
                error!("{:?} response for {} could not be encoded: {}", code, client_id, e);
                writer.send(&Response::GenericError).await?;
                return Ok(ResponseCode::GenericError);
            }
            Err(e) => return Err(e.into()),
        };

        for id in reply.delivered {
            match self.storage.mailbox.delete(id).await {
                Ok(true) => debug!("Delivered message {} to {}", id, client_id),
                Ok(false) => warn!("Delivered message {} was already gone", id),
                Err(e) => error!("Failed to delete delivered message {}: {}", id, e),
            }
        }

        Ok(sent)
    }
}
