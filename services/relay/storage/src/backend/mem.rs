//! In-memory storage backend for development and testing

use crate::{
    validate_client, ClientDirectory, ClientLookup, ClientRecord, Mailbox, StorageError,
    StoredMessage,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use relay_wire::{ClientId, MessageType};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::debug;

/// In-memory client directory
pub struct MemoryDirectory {
    /// id -> record
    records: Arc<DashMap<ClientId, ClientRecord>>,
    /// name -> id, enforces name uniqueness
    names: Arc<DashMap<String, ClientId>>,
}

impl MemoryDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            names: Arc::new(DashMap::new()),
        }
    }

    /// Put back a record loaded from durable storage
    pub(crate) fn restore(&self, record: ClientRecord) {
        self.names.insert(record.name.clone(), record.id);
        self.records.insert(record.id, record);
    }

    /// Register a client unless its id or name is taken
    pub(crate) fn try_insert(
        &self,
        id: ClientId,
        name: &str,
        public_key: Bytes,
    ) -> Result<bool, StorageError> {
        validate_client(name, &public_key)?;

        if self.records.contains_key(&id) {
            debug!("Directory insert rejected, id {} already present", id);
            return Ok(false);
        }

        match self.names.entry(name.to_owned()) {
            Entry::Occupied(_) => {
                debug!("Directory insert rejected, name {:?} already taken", name);
                Ok(false)
            }
            Entry::Vacant(slot) => {
                slot.insert(id);
                self.records.insert(
                    id,
                    ClientRecord {
                        id,
                        name: name.to_owned(),
                        public_key,
                        last_seen: Utc::now(),
                    },
                );
                debug!("Directory insert id={} name={:?}", id, name);
                Ok(true)
            }
        }
    }

    /// Take a client out again; returns the removed record
    pub(crate) fn remove(&self, id: ClientId) -> Option<ClientRecord> {
        let (_, record) = self.records.remove(&id)?;
        self.names.remove_if(&record.name, |_, owner| *owner == id);
        Some(record)
    }

    /// Stamp `at` as last seen; returns the previous stamp
    pub(crate) fn set_last_seen(&self, id: ClientId, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.records
            .get_mut(&id)
            .map(|mut record| std::mem::replace(&mut record.last_seen, at))
    }

    pub(crate) fn snapshot(&self) -> Vec<ClientRecord> {
        let mut records: Vec<ClientRecord> =
            self.records.iter().map(|entry| entry.value().clone()).collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClientDirectory for MemoryDirectory {
    async fn exists(&self, lookup: ClientLookup<'_>) -> Result<bool, StorageError> {
        Ok(match lookup {
            ClientLookup::Id(id) => self.records.contains_key(&id),
            ClientLookup::Name(name) => self.names.contains_key(name),
        })
    }

    async fn insert(
        &self,
        id: ClientId,
        name: &str,
        public_key: Bytes,
    ) -> Result<bool, StorageError> {
        self.try_insert(id, name, public_key)
    }

    async fn all(&self) -> Result<Vec<ClientRecord>, StorageError> {
        Ok(self.snapshot())
    }

    async fn public_key(&self, name: &str) -> Result<Option<Bytes>, StorageError> {
        Ok(self
            .names
            .get(name)
            .and_then(|id| self.records.get(&*id).map(|r| r.public_key.clone())))
    }

    async fn id_by_name(&self, name: &str) -> Result<Option<ClientId>, StorageError> {
        Ok(self.names.get(name).map(|id| *id))
    }

    async fn update_last_seen(&self, id: ClientId) -> Result<bool, StorageError> {
        Ok(self.set_last_seen(id, Utc::now()).is_some())
    }
}

/// In-memory mailbox implementation
pub struct MemoryMailbox {
    /// Per-receiver FIFO of pending messages
    boxes: Arc<DashMap<ClientId, VecDeque<StoredMessage>>>,
    /// message id -> receiver, for deletion by id
    owners: Arc<DashMap<u32, ClientId>>,
    /// Next id to hand out
    next_id: Arc<AtomicU32>,
}

impl MemoryMailbox {
    /// Create an empty mailbox; ids start at 1
    pub fn new() -> Self {
        Self {
            boxes: Arc::new(DashMap::new()),
            owners: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU32::new(1)),
        }
    }

    /// Put back a message loaded from durable storage
    pub(crate) fn restore(&self, message: StoredMessage) {
        self.owners.insert(message.id, message.to);
        self.boxes
            .entry(message.to)
            .or_insert_with(VecDeque::new)
            .push_back(message);
    }

    pub(crate) fn next_id(&self) -> u32 {
        self.next_id.load(Ordering::SeqCst)
    }

    pub(crate) fn set_next_id(&self, next: u32) {
        self.next_id.fetch_max(next, Ordering::SeqCst);
    }

    /// Every pending message across all mailboxes, by id
    pub(crate) fn pending(&self) -> Vec<StoredMessage> {
        let mut messages: Vec<StoredMessage> = self
            .boxes
            .iter()
            .flat_map(|entry| entry.value().iter().cloned().collect::<Vec<_>>())
            .collect();
        messages.sort_by_key(|m| m.id);
        messages
    }

    pub(crate) fn contains(&self, id: u32) -> bool {
        self.owners.contains_key(&id)
    }

    /// Drop a pending message by id
    pub(crate) fn forget(&self, id: u32) -> bool {
        let Some((_, to)) = self.owners.remove(&id) else {
            return false;
        };
        if let Some(mut queue) = self.boxes.get_mut(&to) {
            queue.retain(|m| m.id != id);
        }
        debug!("Mailbox delete id={} to={}", id, to);
        true
    }

    pub(crate) fn allocate_id(&self) -> Result<u32, StorageError> {
        self.next_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |id| id.checked_add(1))
            .map_err(|_| StorageError::Invalid("message id space exhausted".to_string()))
    }
}

impl Default for MemoryMailbox {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Mailbox for MemoryMailbox {
    async fn insert(
        &self,
        to: ClientId,
        from: ClientId,
        message_type: MessageType,
        content: Bytes,
    ) -> Result<u32, StorageError> {
        let id = self.allocate_id()?;
        debug!(
            "Mailbox insert id={} to={} from={} len={}",
            id,
            to,
            from,
            content.len()
        );
        self.restore(StoredMessage {
            id,
            to,
            from,
            message_type,
            content,
        });
        Ok(id)
    }

    async fn unread(&self, to: ClientId) -> Result<Vec<StoredMessage>, StorageError> {
        Ok(self
            .boxes
            .get(&to)
            .map(|queue| queue.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete(&self, id: u32) -> Result<bool, StorageError> {
        Ok(self.forget(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_wire::PUBLIC_KEY_SIZE;

    fn key(fill: u8) -> Bytes {
        Bytes::from(vec![fill; PUBLIC_KEY_SIZE])
    }

    #[tokio::test]
    async fn test_directory_enforces_unique_names() {
        let directory = MemoryDirectory::new();
        let alice = ClientId([1; 16]);

        assert!(directory.insert(alice, "alice", key(1)).await.unwrap());
        assert!(!directory
            .insert(ClientId([2; 16]), "alice", key(2))
            .await
            .unwrap());
        // Case-sensitive
        assert!(directory
            .insert(ClientId([3; 16]), "Alice", key(3))
            .await
            .unwrap());

        assert!(directory.exists(ClientLookup::Id(alice)).await.unwrap());
        assert!(directory.exists(ClientLookup::Name("alice")).await.unwrap());
        assert!(!directory.exists(ClientLookup::Name("bob")).await.unwrap());
        assert_eq!(directory.public_key("alice").await.unwrap(), Some(key(1)));
        assert_eq!(directory.id_by_name("alice").await.unwrap(), Some(alice));
        assert_eq!(directory.all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_directory_rejects_invalid_records() {
        let directory = MemoryDirectory::new();
        let err = directory
            .insert(ClientId([1; 16]), "alice", Bytes::from_static(b"short"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Invalid(_)));

        let err = directory
            .insert(ClientId([1; 16]), "", key(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_update_last_seen() {
        let directory = MemoryDirectory::new();
        let id = ClientId([4; 16]);
        assert!(!directory.update_last_seen(id).await.unwrap());

        directory.insert(id, "dave", key(4)).await.unwrap();
        let before = directory.all().await.unwrap()[0].last_seen;
        assert!(directory.update_last_seen(id).await.unwrap());
        let after = directory.all().await.unwrap()[0].last_seen;
        assert!(after >= before);
    }

    #[tokio::test]
    async fn test_mailbox_is_fifo_per_receiver() {
        let mailbox = MemoryMailbox::new();
        let alice = ClientId([1; 16]);
        let bob = ClientId([2; 16]);
        let carol = ClientId([3; 16]);

        let first = mailbox
            .insert(alice, bob, MessageType::TextMessage, Bytes::from_static(b"one"))
            .await
            .unwrap();
        let other = mailbox
            .insert(carol, bob, MessageType::File, Bytes::from_static(b"x"))
            .await
            .unwrap();
        let second = mailbox
            .insert(alice, carol, MessageType::SendKey, Bytes::from_static(b"two"))
            .await
            .unwrap();

        assert_eq!(first, 1);
        assert!(other > first && second > other);

        let unread = mailbox.unread(alice).await.unwrap();
        let ids: Vec<u32> = unread.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![first, second]);
        assert_eq!(unread[1].from, carol);
    }

    #[tokio::test]
    async fn test_mailbox_delete() {
        let mailbox = MemoryMailbox::new();
        let alice = ClientId([1; 16]);
        let id = mailbox
            .insert(alice, ClientId([2; 16]), MessageType::GetKey, Bytes::new())
            .await
            .unwrap();

        assert!(mailbox.delete(id).await.unwrap());
        assert!(!mailbox.delete(id).await.unwrap());
        assert!(mailbox.unread(alice).await.unwrap().is_empty());

        // Ids are never reused
        let next = mailbox
            .insert(alice, ClientId([2; 16]), MessageType::GetKey, Bytes::new())
            .await
            .unwrap();
        assert!(next > id);
    }
}
