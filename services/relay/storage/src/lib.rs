//! Client directory and mailbox storage for the relay, with pluggable backends.
//!
//! This crate is the persistence collaborator of the relay server: it keeps
//! registered client identities and the messages waiting to be collected by
//! their receivers. Two backends are provided: in-memory (dev/tests) and a
//! file backend that survives restarts.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use relay_wire::{ClientId, MessageType};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// A registered client
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRecord {
    /// Server-issued identifier
    pub id: ClientId,
    /// Unique name (case-sensitive)
    pub name: String,
    /// Opaque public key
    pub public_key: Bytes,
    /// Time of the client's last valid request
    pub last_seen: DateTime<Utc>,
}

/// A message waiting in a receiver's mailbox
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Server-assigned id, monotonically increasing
    pub id: u32,
    /// Receiver
    pub to: ClientId,
    /// Sender
    pub from: ClientId,
    /// Message kind
    pub message_type: MessageType,
    /// Opaque content
    pub content: Bytes,
}

/// Key for client existence checks
#[derive(Clone, Copy, Debug)]
pub enum ClientLookup<'a> {
    /// Match on identifier
    Id(ClientId),
    /// Match on exact name
    Name(&'a str),
}

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Data corruption detected
    #[error("Data corruption: {0}")]
    Corruption(String),
    /// Invalid operation
    #[error("Invalid operation: {0}")]
    Invalid(String),
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Registered client identities
#[async_trait]
pub trait ClientDirectory: Send + Sync {
    /// Check whether a client exists by id or by name
    async fn exists(&self, lookup: ClientLookup<'_>) -> Result<bool, StorageError>;

    /// Insert a new client; `false` if the id or name is already taken
    async fn insert(
        &self,
        id: ClientId,
        name: &str,
        public_key: Bytes,
    ) -> Result<bool, StorageError>;

    /// All registered clients, ordered by name
    async fn all(&self) -> Result<Vec<ClientRecord>, StorageError>;

    /// Public key registered under `name`
    async fn public_key(&self, name: &str) -> Result<Option<Bytes>, StorageError>;

    /// Identifier registered under `name`
    async fn id_by_name(&self, name: &str) -> Result<Option<ClientId>, StorageError>;

    /// Stamp the client's last-seen time with now; `false` if unknown
    async fn update_last_seen(&self, id: ClientId) -> Result<bool, StorageError>;
}

/// Pending messages, one FIFO mailbox per receiver
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Store a message and return its assigned id
    async fn insert(
        &self,
        to: ClientId,
        from: ClientId,
        message_type: MessageType,
        content: Bytes,
    ) -> Result<u32, StorageError>;

    /// Every pending message addressed to `to`, oldest first
    async fn unread(&self, to: ClientId) -> Result<Vec<StoredMessage>, StorageError>;

    /// Remove a message; `false` if it was not pending
    async fn delete(&self, id: u32) -> Result<bool, StorageError>;
}

/// Combined storage interface
pub struct Storage {
    /// Registered clients
    pub clients: Box<dyn ClientDirectory>,
    /// Pending messages
    pub mailbox: Box<dyn Mailbox>,
}

/// Storage backend configuration
#[derive(Clone, Debug, Default)]
pub enum StorageMode {
    /// In-memory storage (dev/tests only)
    #[default]
    InMemory,
    /// File-based storage
    File {
        /// Data directory path
        data_dir: PathBuf,
        /// Sync every write to disk
        fsync: bool,
    },
}

// Re-export backend implementations
pub use backend::file::{FileDirectory, FileMailbox};
pub use backend::mem::{MemoryDirectory, MemoryMailbox};

impl Storage {
    /// In-memory storage
    pub fn in_memory() -> Self {
        Storage {
            clients: Box::new(MemoryDirectory::new()),
            mailbox: Box::new(MemoryMailbox::new()),
        }
    }

    /// Create storage from configuration
    pub async fn from_mode(mode: StorageMode) -> Result<Self, StorageError> {
        match mode {
            StorageMode::InMemory => Ok(Self::in_memory()),
            StorageMode::File { data_dir, fsync } => {
                std::fs::create_dir_all(&data_dir)?;
                Ok(Storage {
                    clients: Box::new(FileDirectory::open(&data_dir, fsync).await?),
                    mailbox: Box::new(FileMailbox::open(&data_dir, fsync).await?),
                })
            }
        }
    }
}

/// Reject records that cannot be represented on the wire
pub(crate) fn validate_client(name: &str, public_key: &[u8]) -> Result<(), StorageError> {
    if name.is_empty() || name.len() > relay_wire::MAX_NAME_LEN {
        return Err(StorageError::Invalid(format!(
            "name must be 1..={} bytes, got {}",
            relay_wire::MAX_NAME_LEN,
            name.len()
        )));
    }
    if public_key.len() != relay_wire::PUBLIC_KEY_SIZE {
        return Err(StorageError::Invalid(format!(
            "public key must be {} bytes, got {}",
            relay_wire::PUBLIC_KEY_SIZE,
            public_key.len()
        )));
    }
    Ok(())
}
