//! Request handlers and the code-to-handler table.
//!
//! Each handler turns one decoded request into a [`Reply`] using the
//! persistence collaborator. Handlers never write to the connection; the
//! dispatcher sends the reply and, once it is out, deletes any messages the
//! reply delivered.

use async_trait::async_trait;
use relay_storage::{ClientLookup, Storage, StorageError};
use relay_wire::{
    ClientEntry, ClientId, MessageEntry, MessageType, Request, RequestCode, Response,
};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::reader::ReadError;

/// Failures inside a handler; each one is answered with a generic error
#[derive(Error, Debug)]
pub enum HandlerError {
    /// Body could not be assembled or decoded
    #[error("bad request body: {0}")]
    Body(#[from] ReadError),

    /// Registration with a name already in use
    #[error("name already taken: {0:?}")]
    NameTaken(String),

    /// Lookup of a name nobody registered
    #[error("name not found: {0:?}")]
    NameNotFound(String),

    /// Message addressed to an unknown client
    #[error("unknown target client {0}")]
    UnknownTarget(ClientId),

    /// Message type outside the defined kinds
    #[error("invalid message type {0}")]
    InvalidMessageType(u8),

    /// Handler received a request it does not serve
    #[error("handler cannot serve {0:?}")]
    Unexpected(RequestCode),

    /// Persistence collaborator failed
    #[error("store failure: {0}")]
    Store(#[from] StorageError),
}

/// What a handler produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Response to send
    pub response: Response,
    /// Message ids to delete once the response is sent
    pub delivered: Vec<u32>,
}

impl Reply {
    /// Reply that delivers nothing
    pub fn new(response: Response) -> Self {
        Self {
            response,
            delivered: Vec::new(),
        }
    }

    /// Reply whose successful send delivers the given messages
    pub fn delivering(response: Response, delivered: Vec<u32>) -> Self {
        Self {
            response,
            delivered,
        }
    }
}

/// Per-request state handed to a handler
pub struct HandlerContext<'a> {
    /// Persistence collaborator
    pub storage: &'a Storage,
    /// Requesting client, as stated in the header
    pub client_id: ClientId,
}

/// Serves one request code
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Produce the reply for `request`
    async fn handle(
        &self,
        ctx: &HandlerContext<'_>,
        request: Request,
    ) -> Result<Reply, HandlerError>;
}

/// Immutable request code to handler table
#[derive(Clone, Default)]
pub struct Router {
    handlers: HashMap<RequestCode, Arc<dyn RequestHandler>>,
}

impl Router {
    /// Empty table; every code is unknown
    pub fn new() -> Self {
        Self::default()
    }

    /// The five protocol handlers
    pub fn standard() -> Self {
        Self::new()
            .with_handler(RequestCode::Register, RegisterHandler)
            .with_handler(RequestCode::ClientsList, ClientsListHandler)
            .with_handler(RequestCode::PublicKey, PublicKeyHandler)
            .with_handler(RequestCode::SendMessage, SendMessageHandler)
            .with_handler(RequestCode::UnreadMessages, UnreadMessagesHandler)
    }

    /// Install `handler` for `code`, replacing any previous one
    pub fn with_handler(mut self, code: RequestCode, handler: impl RequestHandler + 'static) -> Self {
        self.handlers.insert(code, Arc::new(handler));
        self
    }

    /// Handler for `code`
    pub fn get(&self, code: RequestCode) -> Option<&Arc<dyn RequestHandler>> {
        self.handlers.get(&code)
    }

    /// Number of installed handlers
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handler is installed
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Registers a new client under a unique name
pub struct RegisterHandler;

#[async_trait]
impl RequestHandler for RegisterHandler {
    async fn handle(
        &self,
        ctx: &HandlerContext<'_>,
        request: Request,
    ) -> Result<Reply, HandlerError> {
        let registration = match request {
            Request::Register(registration) => registration,
            other => return Err(HandlerError::Unexpected(other.code())),
        };
        let clients = &ctx.storage.clients;

        if clients
            .exists(ClientLookup::Name(&registration.name))
            .await?
        {
            return Err(HandlerError::NameTaken(registration.name));
        }

        let client_id = loop {
            let candidate = ClientId::from_bytes(*Uuid::new_v4().as_bytes());
            if !clients.exists(ClientLookup::Id(candidate)).await? {
                break candidate;
            }
        };

        if !clients
            .insert(client_id, &registration.name, registration.public_key)
            .await?
        {
            return Err(HandlerError::NameTaken(registration.name));
        }

        info!("Registered {:?} as {}", registration.name, client_id);
        Ok(Reply::new(Response::Registered { client_id }))
    }
}

/// Lists every client except the requester
pub struct ClientsListHandler;

#[async_trait]
impl RequestHandler for ClientsListHandler {
    async fn handle(
        &self,
        ctx: &HandlerContext<'_>,
        request: Request,
    ) -> Result<Reply, HandlerError> {
        if !matches!(request, Request::ClientsList) {
            return Err(HandlerError::Unexpected(request.code()));
        }

        let entries: Vec<ClientEntry> = ctx
            .storage
            .clients
            .all()
            .await?
            .into_iter()
            .filter(|record| record.id != ctx.client_id)
            .map(|record| ClientEntry {
                id: record.id,
                name: record.name,
            })
            .collect();

        debug!("Listing {} clients for {}", entries.len(), ctx.client_id);
        Ok(Reply::new(Response::ClientsList(entries)))
    }
}

/// Looks up a client's id and public key by name
pub struct PublicKeyHandler;

#[async_trait]
impl RequestHandler for PublicKeyHandler {
    async fn handle(
        &self,
        ctx: &HandlerContext<'_>,
        request: Request,
    ) -> Result<Reply, HandlerError> {
        let lookup = match request {
            Request::PublicKey(lookup) => lookup,
            other => return Err(HandlerError::Unexpected(other.code())),
        };
        let clients = &ctx.storage.clients;

        let client_id = clients.id_by_name(&lookup.name).await?;
        let public_key = clients.public_key(&lookup.name).await?;
        match (client_id, public_key) {
            (Some(client_id), Some(public_key)) => Ok(Reply::new(Response::PublicKey {
                client_id,
                public_key,
            })),
            _ => Err(HandlerError::NameNotFound(lookup.name)),
        }
    }
}

/// Leaves a message in the target's mailbox
pub struct SendMessageHandler;

#[async_trait]
impl RequestHandler for SendMessageHandler {
    async fn handle(
        &self,
        ctx: &HandlerContext<'_>,
        request: Request,
    ) -> Result<Reply, HandlerError> {
        let message = match request {
            Request::SendMessage(message) => message,
            other => return Err(HandlerError::Unexpected(other.code())),
        };

        let message_type = MessageType::try_from(message.message_type)
            .map_err(|_| HandlerError::InvalidMessageType(message.message_type))?;

        if !ctx
            .storage
            .clients
            .exists(ClientLookup::Id(message.target))
            .await?
        {
            return Err(HandlerError::UnknownTarget(message.target));
        }

        let content_len = message.content.len();
        let message_id = ctx
            .storage
            .mailbox
            .insert(message.target, ctx.client_id, message_type, message.content)
            .await?;

        info!(
            "Stored message {} ({:?}, {} bytes) from {} to {}",
            message_id, message_type, content_len, ctx.client_id, message.target
        );
        Ok(Reply::new(Response::MessageSent {
            target: message.target,
            message_id,
        }))
    }
}

/// Hands the requester every pending message addressed to it
pub struct UnreadMessagesHandler;

#[async_trait]
impl RequestHandler for UnreadMessagesHandler {
    async fn handle(
        &self,
        ctx: &HandlerContext<'_>,
        request: Request,
    ) -> Result<Reply, HandlerError> {
        if !matches!(request, Request::UnreadMessages) {
            return Err(HandlerError::Unexpected(request.code()));
        }

        let pending = ctx.storage.mailbox.unread(ctx.client_id).await?;
        let delivered: Vec<u32> = pending.iter().map(|message| message.id).collect();
        let entries = pending
            .into_iter()
            .map(|message| MessageEntry {
                from: message.from,
                id: message.id,
                message_type: message.message_type,
                content: message.content,
            })
            .collect();

        debug!("{} unread messages for {}", delivered.len(), ctx.client_id);
        Ok(Reply::delivering(Response::UnreadMessages(entries), delivered))
    }
}
