//! File-based storage backend with an append-only mailbox log and recovery
//!
//! Layout under the data directory:
//!
//! ```text
//! clients.json   snapshot of every registered client, rewritten on change
//! mailbox.log    sequence of CRC-checked records: insert / delete / next-id
//! ```

use crate::backend::mem::{MemoryDirectory, MemoryMailbox};
use crate::{
    ClientDirectory, ClientLookup, ClientRecord, Mailbox, StorageError, StoredMessage,
};
use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::Utc;
use crc32fast::Hasher;
use relay_wire::{ClientId, MessageType};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

const CLIENTS_FILE: &str = "clients.json";
const MAILBOX_FILE: &str = "mailbox.log";

/// Write `content` to `path` through a temp file and rename
fn write_atomically(path: &Path, content: &[u8], fsync: bool) -> Result<(), StorageError> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(content)?;
        if fsync {
            file.sync_all()?;
        }
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn lock_poisoned() -> StorageError {
    StorageError::Invalid("storage lock poisoned".to_string())
}

/// Client directory persisted as a JSON snapshot
pub struct FileDirectory {
    path: PathBuf,
    fsync: bool,
    inner: MemoryDirectory,
    /// Serializes snapshot writes
    write_lock: Mutex<()>,
}

impl FileDirectory {
    /// Open (or create) the directory under `data_dir`
    pub async fn open(data_dir: &Path, fsync: bool) -> Result<Self, StorageError> {
        let path = data_dir.join(CLIENTS_FILE);
        let inner = MemoryDirectory::new();

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let records: Vec<ClientRecord> = serde_json::from_str(&content).map_err(|e| {
                StorageError::Corruption(format!("Invalid client snapshot {:?}: {}", path, e))
            })?;
            info!("Loaded {} clients from {:?}", records.len(), path);
            for record in records {
                inner.restore(record);
            }
        }

        Ok(Self {
            path,
            fsync,
            inner,
            write_lock: Mutex::new(()),
        })
    }

    /// Write the current snapshot; callers hold `write_lock`
    fn persist(&self) -> Result<(), StorageError> {
        let content = serde_json::to_vec_pretty(&self.inner.snapshot())?;
        write_atomically(&self.path, &content, self.fsync)
    }
}

#[async_trait]
impl ClientDirectory for FileDirectory {
    async fn exists(&self, lookup: ClientLookup<'_>) -> Result<bool, StorageError> {
        self.inner.exists(lookup).await
    }

    async fn insert(
        &self,
        id: ClientId,
        name: &str,
        public_key: Bytes,
    ) -> Result<bool, StorageError> {
        let _guard = self.write_lock.lock().map_err(|_| lock_poisoned())?;
        if !self.inner.try_insert(id, name, public_key)? {
            return Ok(false);
        }
        if let Err(e) = self.persist() {
            self.inner.remove(id);
            warn!("Registration of {:?} not persisted, rolled back: {}", name, e);
            return Err(e);
        }
        Ok(true)
    }

    async fn all(&self) -> Result<Vec<ClientRecord>, StorageError> {
        self.inner.all().await
    }

    async fn public_key(&self, name: &str) -> Result<Option<Bytes>, StorageError> {
        self.inner.public_key(name).await
    }

    async fn id_by_name(&self, name: &str) -> Result<Option<ClientId>, StorageError> {
        self.inner.id_by_name(name).await
    }

    async fn update_last_seen(&self, id: ClientId) -> Result<bool, StorageError> {
        let _guard = self.write_lock.lock().map_err(|_| lock_poisoned())?;
        let Some(previous) = self.inner.set_last_seen(id, Utc::now()) else {
            return Ok(false);
        };
        if let Err(e) = self.persist() {
            self.inner.set_last_seen(id, previous);
            return Err(e);
        }
        Ok(true)
    }
}

/// Mailbox log record kinds
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordKind {
    /// JSON-encoded `StoredMessage`
    Insert = 1,
    /// u32 message id
    Delete = 2,
    /// u32 next message id
    NextId = 3,
}

impl RecordKind {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(RecordKind::Insert),
            2 => Some(RecordKind::Delete),
            3 => Some(RecordKind::NextId),
            _ => None,
        }
    }
}

/// Mailbox log record header
#[derive(Debug)]
struct RecordHeader {
    len: u32,   // Body length (not including header)
    kind: u8,   // RecordKind
    crc32: u32, // CRC32 over kind || body
}

impl RecordHeader {
    const SIZE: usize = 4 + 1 + 4;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.len);
        buf.put_u8(self.kind);
        buf.put_u32_le(self.crc32);
    }

    fn decode(buf: &mut Bytes) -> Self {
        Self {
            len: buf.get_u32_le(),
            kind: buf.get_u8(),
            crc32: buf.get_u32_le(),
        }
    }

    fn compute_crc(kind: u8, body: &[u8]) -> u32 {
        let mut hasher = Hasher::new();
        hasher.update(&[kind]);
        hasher.update(body);
        hasher.finalize()
    }
}

fn encode_record(kind: RecordKind, body: &[u8]) -> Result<Bytes, StorageError> {
    let len = u32::try_from(body.len())
        .map_err(|_| StorageError::Invalid(format!("record too large: {}", body.len())))?;
    let header = RecordHeader {
        len,
        kind: kind as u8,
        crc32: RecordHeader::compute_crc(kind as u8, body),
    };
    let mut buf = BytesMut::with_capacity(RecordHeader::SIZE + body.len());
    header.encode(&mut buf);
    buf.put_slice(body);
    Ok(buf.freeze())
}

/// Mailbox persisted as an append-only record log
pub struct FileMailbox {
    fsync: bool,
    inner: MemoryMailbox,
    log: Mutex<File>,
}

impl FileMailbox {
    /// Open (or create) the mailbox under `data_dir`, replaying and
    /// compacting any existing log
    pub async fn open(data_dir: &Path, fsync: bool) -> Result<Self, StorageError> {
        let path = data_dir.join(MAILBOX_FILE);
        let inner = MemoryMailbox::new();

        if path.exists() {
            let raw = Bytes::from(std::fs::read(&path)?);
            Self::replay(&inner, raw, &path)?;
            info!(
                "Recovered {} pending messages from {:?}",
                inner.pending().len(),
                path
            );
        }

        // Compact: live messages plus the id watermark
        let mut compacted = BytesMut::new();
        compacted.put_slice(&encode_record(
            RecordKind::NextId,
            &inner.next_id().to_le_bytes(),
        )?);
        for message in inner.pending() {
            compacted.put_slice(&encode_record(
                RecordKind::Insert,
                &serde_json::to_vec(&message)?,
            )?);
        }
        write_atomically(&path, &compacted, fsync)?;

        let log = OpenOptions::new().append(true).open(&path)?;
        Ok(Self {
            fsync,
            inner,
            log: Mutex::new(log),
        })
    }

    fn replay(inner: &MemoryMailbox, mut raw: Bytes, path: &Path) -> Result<(), StorageError> {
        let mut applied = 0usize;
        while raw.has_remaining() {
            if raw.remaining() < RecordHeader::SIZE {
                warn!("Torn record header at end of {:?}, ignoring tail", path);
                break;
            }
            let header = RecordHeader::decode(&mut raw);
            if raw.remaining() < header.len as usize {
                warn!("Incomplete record in {:?}, ignoring tail", path);
                break;
            }
            let body = raw.split_to(header.len as usize);
            if header.crc32 != RecordHeader::compute_crc(header.kind, &body) {
                warn!(
                    "CRC mismatch in {:?} after {} records, ignoring tail",
                    path, applied
                );
                break;
            }

            match RecordKind::from_u8(header.kind) {
                Some(RecordKind::Insert) => {
                    let message: StoredMessage = serde_json::from_slice(&body).map_err(|e| {
                        StorageError::Corruption(format!("Invalid message record: {}", e))
                    })?;
                    inner.set_next_id(message.id.saturating_add(1));
                    inner.restore(message);
                }
                Some(kind @ (RecordKind::Delete | RecordKind::NextId)) if body.len() == 4 => {
                    let value = u32::from_le_bytes([body[0], body[1], body[2], body[3]]);
                    if kind == RecordKind::Delete {
                        inner.forget(value);
                    } else {
                        inner.set_next_id(value);
                    }
                }
                _ => {
                    return Err(StorageError::Corruption(format!(
                        "Unknown record kind {} ({} bytes) in {:?}",
                        header.kind,
                        body.len(),
                        path
                    )));
                }
            }
            applied += 1;
        }
        debug!("Replayed {} mailbox records from {:?}", applied, path);
        Ok(())
    }

    /// Append one record. On failure the log is cut back to its previous
    /// length so no torn record is left ahead of later appends.
    fn append(&self, record: &[u8]) -> Result<(), StorageError> {
        let mut log = self.log.lock().map_err(|_| lock_poisoned())?;
        let start = log.metadata()?.len();
        if let Err(e) = write_record(&mut log, record, self.fsync) {
            rewind(&log, start);
            return Err(e.into());
        }
        Ok(())
    }
}

fn write_record(log: &mut File, record: &[u8], fsync: bool) -> std::io::Result<()> {
    log.write_all(record)?;
    if fsync {
        log.sync_data()?;
    }
    Ok(())
}

/// Truncate the log to `len`, dropping a partially written record
fn rewind(log: &File, len: u64) {
    if let Err(e) = log.set_len(len) {
        warn!("Could not cut mailbox log back to {} bytes: {}", len, e);
    }
}

#[async_trait]
impl Mailbox for FileMailbox {
    async fn insert(
        &self,
        to: ClientId,
        from: ClientId,
        message_type: MessageType,
        content: Bytes,
    ) -> Result<u32, StorageError> {
        let message = StoredMessage {
            id: self.inner.allocate_id()?,
            to,
            from,
            message_type,
            content,
        };
        self.append(&encode_record(
            RecordKind::Insert,
            &serde_json::to_vec(&message)?,
        )?)?;

        let id = message.id;
        self.inner.restore(message);
        Ok(id)
    }

    async fn unread(&self, to: ClientId) -> Result<Vec<StoredMessage>, StorageError> {
        self.inner.unread(to).await
    }

    async fn delete(&self, id: u32) -> Result<bool, StorageError> {
        if !self.inner.contains(id) {
            return Ok(false);
        }
        self.append(&encode_record(RecordKind::Delete, &id.to_le_bytes())?)?;
        Ok(self.inner.forget(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_wire::PUBLIC_KEY_SIZE;
    use tempfile::TempDir;

    fn key() -> Bytes {
        Bytes::from(vec![0x5a; PUBLIC_KEY_SIZE])
    }

    #[tokio::test]
    async fn test_directory_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let id = ClientId([7; 16]);
        {
            let directory = FileDirectory::open(dir.path(), false).await.unwrap();
            assert!(directory.insert(id, "alice", key()).await.unwrap());
            assert!(directory.update_last_seen(id).await.unwrap());
        }

        let directory = FileDirectory::open(dir.path(), false).await.unwrap();
        assert!(directory.exists(ClientLookup::Id(id)).await.unwrap());
        assert_eq!(directory.public_key("alice").await.unwrap(), Some(key()));
        assert!(!directory
            .insert(ClientId([8; 16]), "alice", key())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_mailbox_replays_inserts_and_deletes() {
        let dir = TempDir::new().unwrap();
        let alice = ClientId([1; 16]);
        let bob = ClientId([2; 16]);
        let (kept, deleted) = {
            let mailbox = FileMailbox::open(dir.path(), true).await.unwrap();
            let kept = mailbox
                .insert(alice, bob, MessageType::TextMessage, Bytes::from_static(b"hi"))
                .await
                .unwrap();
            let deleted = mailbox
                .insert(alice, bob, MessageType::File, Bytes::from_static(b"gone"))
                .await
                .unwrap();
            assert!(mailbox.delete(deleted).await.unwrap());
            (kept, deleted)
        };

        let mailbox = FileMailbox::open(dir.path(), true).await.unwrap();
        let unread = mailbox.unread(alice).await.unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].id, kept);
        assert_eq!(unread[0].content, Bytes::from_static(b"hi"));

        // The deleted id is not handed out again after compaction
        let next = mailbox
            .insert(bob, alice, MessageType::GetKey, Bytes::new())
            .await
            .unwrap();
        assert!(next > deleted);
    }

    #[tokio::test]
    async fn test_mailbox_ignores_torn_tail() {
        let dir = TempDir::new().unwrap();
        let alice = ClientId([1; 16]);
        {
            let mailbox = FileMailbox::open(dir.path(), false).await.unwrap();
            mailbox
                .insert(alice, alice, MessageType::TextMessage, Bytes::from_static(b"ok"))
                .await
                .unwrap();
        }

        let path = dir.path().join(MAILBOX_FILE);
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0x10, 0x00, 0x00]).unwrap();
        drop(file);

        let mailbox = FileMailbox::open(dir.path(), false).await.unwrap();
        assert_eq!(mailbox.unread(alice).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_mailbox_stops_at_corrupt_record() {
        let dir = TempDir::new().unwrap();
        let alice = ClientId([1; 16]);
        {
            let mailbox = FileMailbox::open(dir.path(), false).await.unwrap();
            for body in [&b"first"[..], &b"second"[..]] {
                mailbox
                    .insert(alice, alice, MessageType::TextMessage, Bytes::copy_from_slice(body))
                    .await
                    .unwrap();
            }
        }

        // Flip the last byte of the log, which belongs to the second insert
        let path = dir.path().join(MAILBOX_FILE);
        let mut raw = std::fs::read(&path).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        std::fs::write(&path, raw).unwrap();

        let mailbox = FileMailbox::open(dir.path(), false).await.unwrap();
        let unread = mailbox.unread(alice).await.unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].content, Bytes::from_static(b"first"));
    }

    /// A directory where the snapshot's temp file goes makes every
    /// snapshot write fail
    fn block_snapshot_writes(dir: &TempDir) -> PathBuf {
        let blocker = dir.path().join(CLIENTS_FILE).with_extension("tmp");
        std::fs::create_dir(&blocker).unwrap();
        blocker
    }

    /// Swap the append handle for a read-only one so appends fail
    fn block_log_writes(mailbox: &FileMailbox, dir: &TempDir) {
        let read_only = File::open(dir.path().join(MAILBOX_FILE)).unwrap();
        *mailbox.log.lock().unwrap() = read_only;
    }

    #[tokio::test]
    async fn test_failed_snapshot_rolls_back_insert() {
        let dir = TempDir::new().unwrap();
        let directory = FileDirectory::open(dir.path(), false).await.unwrap();
        let blocker = block_snapshot_writes(&dir);

        assert!(directory
            .insert(ClientId([1; 16]), "alice", key())
            .await
            .is_err());
        assert!(!directory.exists(ClientLookup::Name("alice")).await.unwrap());
        assert!(!directory
            .exists(ClientLookup::Id(ClientId([1; 16])))
            .await
            .unwrap());

        // The name is free for a retry once the disk recovers
        std::fs::remove_dir(&blocker).unwrap();
        assert!(directory
            .insert(ClientId([2; 16]), "alice", key())
            .await
            .unwrap());
        drop(directory);

        let directory = FileDirectory::open(dir.path(), false).await.unwrap();
        assert_eq!(
            directory.id_by_name("alice").await.unwrap(),
            Some(ClientId([2; 16]))
        );
    }

    #[tokio::test]
    async fn test_failed_snapshot_keeps_last_seen() {
        let dir = TempDir::new().unwrap();
        let id = ClientId([3; 16]);
        let directory = FileDirectory::open(dir.path(), false).await.unwrap();
        assert!(directory.insert(id, "carol", key()).await.unwrap());
        let before = directory.all().await.unwrap()[0].last_seen;

        block_snapshot_writes(&dir);
        assert!(directory.update_last_seen(id).await.is_err());
        assert_eq!(directory.all().await.unwrap()[0].last_seen, before);
    }

    #[tokio::test]
    async fn test_failed_delete_keeps_message() {
        let dir = TempDir::new().unwrap();
        let alice = ClientId([1; 16]);
        let id = {
            let mailbox = FileMailbox::open(dir.path(), false).await.unwrap();
            let id = mailbox
                .insert(alice, alice, MessageType::TextMessage, Bytes::from_static(b"once"))
                .await
                .unwrap();

            block_log_writes(&mailbox, &dir);
            assert!(mailbox.delete(id).await.is_err());
            assert_eq!(mailbox.unread(alice).await.unwrap().len(), 1);
            id
        };

        // Memory and log agree: the message is still pending after reopen
        let mailbox = FileMailbox::open(dir.path(), false).await.unwrap();
        let unread = mailbox.unread(alice).await.unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].id, id);
    }

    #[tokio::test]
    async fn test_failed_insert_is_not_pending() {
        let dir = TempDir::new().unwrap();
        let alice = ClientId([1; 16]);
        let mailbox = FileMailbox::open(dir.path(), false).await.unwrap();
        let before = std::fs::metadata(dir.path().join(MAILBOX_FILE)).unwrap().len();

        block_log_writes(&mailbox, &dir);
        assert!(mailbox
            .insert(alice, alice, MessageType::TextMessage, Bytes::from_static(b"lost"))
            .await
            .is_err());
        assert!(mailbox.unread(alice).await.unwrap().is_empty());
        assert_eq!(
            std::fs::metadata(dir.path().join(MAILBOX_FILE)).unwrap().len(),
            before
        );
    }

    #[tokio::test]
    async fn test_torn_append_is_cut_from_log() {
        let dir = TempDir::new().unwrap();
        let alice = ClientId([1; 16]);
        {
            let mailbox = FileMailbox::open(dir.path(), false).await.unwrap();
            mailbox
                .insert(alice, alice, MessageType::TextMessage, Bytes::from_static(b"first"))
                .await
                .unwrap();

            // Half a record lands on disk before the write gives up
            {
                let mut log = mailbox.log.lock().unwrap();
                let start = log.metadata().unwrap().len();
                let record = encode_record(RecordKind::Insert, b"{\"partial\":true}").unwrap();
                log.write_all(&record[..record.len() / 2]).unwrap();
                rewind(&log, start);
                assert_eq!(log.metadata().unwrap().len(), start);
            }

            mailbox
                .insert(alice, alice, MessageType::TextMessage, Bytes::from_static(b"second"))
                .await
                .unwrap();
        }

        let mailbox = FileMailbox::open(dir.path(), false).await.unwrap();
        let contents: Vec<Bytes> = mailbox
            .unread(alice)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(
            contents,
            vec![Bytes::from_static(b"first"), Bytes::from_static(b"second")]
        );
    }
}
