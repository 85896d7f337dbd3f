//! Append-only journaled node store.
//!
//! Every mutation of the five index relations is framed and appended to a
//! journal file:
//!
//! ```text
//! ┌─────────────┬─────────────┬─────────────────┐
//! │ Length (4B) │ CRC32 (4B)  │ Payload (N B)   │
//! └─────────────┴─────────────┴─────────────────┘
//! ```
//!
//! On open the journal is replayed frame by frame into an in-memory mirror.
//! A truncated final frame is ignored (WAL semantics); a checksum mismatch
//! is a hard corruption error. Transactions buffer frames and flush them on
//! commit, so a rolled-back transaction leaves no trace on disk.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};
use crate::keys::KeyElement;
use crate::node::{MemoryNodeStore, NodeId, NodeStore};

/// One persisted mutation. Key elements travel in their textual encoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum JournalOp {
    StoreObject { id: NodeId, payload: Vec<u8> },
    AttachObject { abstruse: NodeId, object: NodeId },
    SetSubtrie { abstruse: NodeId, subtrie: NodeId },
    AttachAbstruse { trie: NodeId, abstruse: NodeId },
    AttachChild { trie: NodeId, key: String, child: NodeId },
}

/// Journal frame header: `[4 bytes length][4 bytes crc32]`.
struct FrameHeader;

impl FrameHeader {
    const SIZE: usize = 8;

    fn encode(payload: &[u8]) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&(payload.len() as u32).to_le_bytes());
        buf[4..8].copy_from_slice(&crc32fast::hash(payload).to_le_bytes());
        buf
    }

    fn decode(buf: &[u8; Self::SIZE]) -> (u32, u32) {
        let length = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let checksum = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        (length, checksum)
    }
}

/// A node store whose state is an append-only journal on disk, mirrored in
/// memory for reads.
#[derive(Debug)]
pub struct JournalNodeStore {
    mirror: MemoryNodeStore<String, Vec<u8>>,
    file: File,
    path: PathBuf,
    pending: Option<Vec<JournalOp>>,
}

impl JournalNodeStore {
    /// Opens a journal, replaying any existing entries.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut mirror = MemoryNodeStore::new();

        if path.exists() {
            let mut data = Vec::new();
            File::open(&path)?.read_to_end(&mut data)?;
            replay(&data, &mut mirror)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            mirror,
            file,
            path,
            pending: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn record(&mut self, op: JournalOp) -> StorageResult<()> {
        match &mut self.pending {
            Some(pending) => {
                pending.push(op);
                Ok(())
            }
            None => write_frame(&mut self.file, &op),
        }
    }
}

fn write_frame(file: &mut File, op: &JournalOp) -> StorageResult<()> {
    let payload = bincode::serialize(op)?;
    let header = FrameHeader::encode(&payload);
    let mut frame = Vec::with_capacity(FrameHeader::SIZE + payload.len());
    frame.extend_from_slice(&header);
    frame.extend_from_slice(&payload);
    file.write_all(&frame)?;
    Ok(())
}

fn replay(data: &[u8], mirror: &mut MemoryNodeStore<String, Vec<u8>>) -> StorageResult<()> {
    let mut pos = 0;
    let mut frame_number = 0u64;

    while pos + FrameHeader::SIZE <= data.len() {
        let header: [u8; FrameHeader::SIZE] = data[pos..pos + FrameHeader::SIZE]
            .try_into()
            .expect("slice length checked above");
        let (length, expected) = FrameHeader::decode(&header);
        pos += FrameHeader::SIZE;

        let end = pos + length as usize;
        if end > data.len() {
            // Torn tail from an interrupted append: replay stops here.
            break;
        }

        let payload = &data[pos..end];
        if crc32fast::hash(payload) != expected {
            return Err(StorageError::Corrupt {
                detail: format!("journal frame {} failed its checksum", frame_number),
            });
        }

        let op: JournalOp = bincode::deserialize(payload).map_err(|err| StorageError::Corrupt {
            detail: format!("journal frame {} is unreadable: {}", frame_number, err),
        })?;
        apply(mirror, op)?;

        pos = end;
        frame_number += 1;
    }

    Ok(())
}

fn apply(mirror: &mut MemoryNodeStore<String, Vec<u8>>, op: JournalOp) -> StorageResult<()> {
    match op {
        JournalOp::StoreObject { id, payload } => {
            mirror.insert_object_raw(id, payload);
            Ok(())
        }
        JournalOp::AttachObject { abstruse, object } => {
            mirror.observe_id(abstruse);
            mirror.observe_id(object);
            mirror.attach_object(abstruse, object)
        }
        JournalOp::SetSubtrie { abstruse, subtrie } => {
            mirror.observe_id(abstruse);
            mirror.set_subtrie_raw(abstruse, subtrie);
            Ok(())
        }
        JournalOp::AttachAbstruse { trie, abstruse } => {
            mirror.observe_id(trie);
            mirror.observe_id(abstruse);
            mirror.attach_abstruse(trie, abstruse)
        }
        JournalOp::AttachChild { trie, key, child } => {
            mirror.observe_id(trie);
            mirror.observe_id(child);
            let key = KeyElement::decode(&key)?;
            mirror.attach_child(trie, key, child)
        }
    }
}

impl NodeStore for JournalNodeStore {
    type Leaf = String;
    type Object = Vec<u8>;

    fn root(&self) -> NodeId {
        self.mirror.root()
    }

    fn next_id(&mut self) -> StorageResult<NodeId> {
        // Allocation is not journaled; ids reappear inside the ops that use
        // them and the counter is rebuilt from their maximum on replay.
        self.mirror.next_id()
    }

    fn store_object(&mut self, payload: Vec<u8>) -> StorageResult<NodeId> {
        if let Some(existing) = self.mirror.object_id_for(&payload) {
            return Ok(existing);
        }
        let id = self.mirror.next_id()?;
        self.record(JournalOp::StoreObject {
            id,
            payload: payload.clone(),
        })?;
        self.mirror.insert_object_raw(id, payload);
        Ok(id)
    }

    fn attach_object(&mut self, abstruse: NodeId, object: NodeId) -> StorageResult<()> {
        self.mirror.attach_object(abstruse, object)?;
        self.record(JournalOp::AttachObject { abstruse, object })
    }

    fn objects_of(&self, abstruse: NodeId) -> StorageResult<Vec<Vec<u8>>> {
        self.mirror.objects_of(abstruse)
    }

    fn subtrie_of(&mut self, abstruse: NodeId) -> StorageResult<NodeId> {
        if let Some(existing) = self.mirror.subtrie_lookup(abstruse)? {
            return Ok(existing);
        }
        let subtrie = self.mirror.next_id()?;
        self.record(JournalOp::SetSubtrie { abstruse, subtrie })?;
        self.mirror.set_subtrie_raw(abstruse, subtrie);
        Ok(subtrie)
    }

    fn subtrie_lookup(&self, abstruse: NodeId) -> StorageResult<Option<NodeId>> {
        self.mirror.subtrie_lookup(abstruse)
    }

    fn attach_abstruse(&mut self, trie: NodeId, abstruse: NodeId) -> StorageResult<()> {
        self.mirror.attach_abstruse(trie, abstruse)?;
        self.record(JournalOp::AttachAbstruse { trie, abstruse })
    }

    fn abstruses_of(&self, trie: NodeId) -> StorageResult<Vec<NodeId>> {
        self.mirror.abstruses_of(trie)
    }

    fn attach_child(
        &mut self,
        trie: NodeId,
        key: KeyElement<String>,
        child: NodeId,
    ) -> StorageResult<()> {
        self.mirror.attach_child(trie, key.clone(), child)?;
        self.record(JournalOp::AttachChild {
            trie,
            key: key.encode(),
            child,
        })
    }

    fn child_by_key(&self, trie: NodeId, key: &KeyElement<String>) -> StorageResult<Option<NodeId>> {
        self.mirror.child_by_key(trie, key)
    }

    fn children_of(&self, trie: NodeId) -> StorageResult<Vec<(KeyElement<String>, NodeId)>> {
        self.mirror.children_of(trie)
    }

    fn object_count(&self) -> StorageResult<usize> {
        self.mirror.object_count()
    }

    fn supports_transactions(&self) -> bool {
        true
    }

    fn begin(&mut self) -> StorageResult<()> {
        if self.pending.is_some() {
            return Err(StorageError::NestedTransaction);
        }
        self.mirror.begin()?;
        self.pending = Some(Vec::new());
        Ok(())
    }

    fn commit(&mut self) -> StorageResult<()> {
        let pending = self.pending.take().ok_or(StorageError::NoActiveTransaction)?;
        self.mirror.commit()?;
        for op in &pending {
            write_frame(&mut self.file, op)?;
        }
        self.file.flush()?;
        Ok(())
    }

    fn rollback(&mut self) -> StorageResult<()> {
        if self.pending.take().is_none() {
            return Err(StorageError::NoActiveTransaction);
        }
        self.mirror.rollback()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Seek;

    fn journal_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("index.journal")
    }

    #[test]
    fn fresh_journal_starts_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = JournalNodeStore::open(journal_path(&dir)).unwrap();
        assert_eq!(store.object_count().unwrap(), 0);
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = journal_path(&dir);

        let (root, object, subtrie, child);
        {
            let mut store = JournalNodeStore::open(&path).unwrap();
            root = store.root();
            object = store.store_object(b"fact".to_vec()).unwrap();
            store.attach_object(root, object).unwrap();
            subtrie = store.subtrie_of(root).unwrap();
            child = store.next_id().unwrap();
            store
                .attach_child(subtrie, KeyElement::Arity(3), child)
                .unwrap();
            store.attach_abstruse(child, root).unwrap();
        }

        let store = JournalNodeStore::open(&path).unwrap();
        assert_eq!(store.objects_of(root).unwrap(), vec![b"fact".to_vec()]);
        assert_eq!(store.subtrie_lookup(root).unwrap(), Some(subtrie));
        assert_eq!(
            store.child_by_key(subtrie, &KeyElement::Arity(3)).unwrap(),
            Some(child)
        );
        assert_eq!(store.abstruses_of(child).unwrap(), vec![root]);
    }

    #[test]
    fn id_allocation_resumes_past_replayed_ids() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = journal_path(&dir);

        let object;
        {
            let mut store = JournalNodeStore::open(&path).unwrap();
            object = store.store_object(b"x".to_vec()).unwrap();
        }

        let mut store = JournalNodeStore::open(&path).unwrap();
        assert!(store.next_id().unwrap() > object);
    }

    #[test]
    fn truncated_tail_is_ignored() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = journal_path(&dir);

        {
            let mut store = JournalNodeStore::open(&path).unwrap();
            let object = store.store_object(b"kept".to_vec()).unwrap();
            store.attach_object(store.root(), object).unwrap();
        }

        // Simulate a torn append.
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0x10, 0x00, 0x00, 0x00]).unwrap();
        drop(file);

        let store = JournalNodeStore::open(&path).unwrap();
        assert_eq!(store.objects_of(store.root()).unwrap(), vec![b"kept".to_vec()]);
    }

    #[test]
    fn checksum_mismatch_is_corruption() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = journal_path(&dir);

        {
            let mut store = JournalNodeStore::open(&path).unwrap();
            store.store_object(b"payload".to_vec()).unwrap();
        }

        // Flip a payload byte in place.
        let mut file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
        file.seek(std::io::SeekFrom::End(-1)).unwrap();
        file.write_all(&[0xFF]).unwrap();
        drop(file);

        assert!(matches!(
            JournalNodeStore::open(&path),
            Err(StorageError::Corrupt { .. })
        ));
    }

    #[test]
    fn rolled_back_transaction_leaves_no_trace() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = journal_path(&dir);

        {
            let mut store = JournalNodeStore::open(&path).unwrap();
            store.begin().unwrap();
            let object = store.store_object(b"ghost".to_vec()).unwrap();
            store.attach_object(store.root(), object).unwrap();
            store.rollback().unwrap();
            assert_eq!(store.object_count().unwrap(), 0);
        }

        let store = JournalNodeStore::open(&path).unwrap();
        assert_eq!(store.object_count().unwrap(), 0);
    }

    #[test]
    fn committed_transaction_is_durable() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = journal_path(&dir);

        {
            let mut store = JournalNodeStore::open(&path).unwrap();
            store.begin().unwrap();
            let object = store.store_object(b"durable".to_vec()).unwrap();
            store.attach_object(store.root(), object).unwrap();
            store.commit().unwrap();
        }

        let store = JournalNodeStore::open(&path).unwrap();
        assert_eq!(store.objects_of(store.root()).unwrap(), vec![b"durable".to_vec()]);
    }
}
