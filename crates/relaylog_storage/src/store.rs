//! The message store and its group transactions.

use crate::backend::StorageBackend;
use crate::error::StorageResult;
use crate::file::FileBackend;
use crate::journal::{CommitRecord, Journal};
use parking_lot::{Condvar, Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::path::Path;
use tracing::{debug, info};

/// A message row as stored: canonical timestamp plus tagged value.
///
/// The group is implied by where the row lives; `(group, timestamp)` is
/// the primary key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Canonical timestamp string (sorts in timestamp order).
    pub timestamp: String,
    /// Dataset (table) name.
    pub dataset: String,
    /// Row identifier.
    pub row: String,
    /// Column name.
    pub column: String,
    /// Type-tagged value.
    pub value: String,
}

impl StoredMessage {
    /// Creates a row.
    pub fn new(
        timestamp: impl Into<String>,
        dataset: impl Into<String>,
        row: impl Into<String>,
        column: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: timestamp.into(),
            dataset: dataset.into(),
            row: row.into(),
            column: column.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Default)]
struct GroupState {
    messages: BTreeMap<String, StoredMessage>,
    index: Option<String>,
}

#[derive(Debug, Default)]
struct StoreState {
    groups: HashMap<String, GroupState>,
}

impl StoreState {
    /// Applies a committed record, returning how many rows were new.
    fn apply(&mut self, record: CommitRecord) -> usize {
        let group = self.groups.entry(record.group_id).or_default();
        let mut inserted = 0;
        for row in record.rows {
            if let std::collections::btree_map::Entry::Vacant(slot) =
                group.messages.entry(row.timestamp.clone())
            {
                slot.insert(row);
                inserted += 1;
            }
        }
        if let Some(index) = record.index {
            group.index = Some(index);
        }
        inserted
    }
}

/// The relay's message log and per-group index snapshots.
///
/// Reads see only committed data. Writes go through
/// [`MessageStore::begin`], which hands out one [`GroupTransaction`] per
/// group at a time.
///
/// A store built with [`MessageStore::in_memory`] keeps nothing across
/// restarts; [`MessageStore::open`] and [`MessageStore::with_backend`]
/// journal every commit and replay the journal on open.
pub struct MessageStore {
    state: RwLock<StoreState>,
    leases: Mutex<HashSet<String>>,
    released: Condvar,
    journal: Option<Mutex<Journal>>,
}

impl MessageStore {
    /// Creates a store that lives only in memory.
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            leases: Mutex::new(HashSet::new()),
            released: Condvar::new(),
            journal: None,
        }
    }

    /// Opens (or creates) a journal file and replays it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the journal is
    /// corrupted.
    pub fn open(path: &Path, sync_on_commit: bool) -> StorageResult<Self> {
        let backend = FileBackend::open_with_create_dirs(path)?;
        info!(path = %path.display(), "opening message journal");
        Self::with_backend(Box::new(backend), sync_on_commit)
    }

    /// Builds a store journaling to `backend`, replaying what it holds.
    ///
    /// With `sync_on_commit`, every commit is synced to stable storage
    /// rather than only flushed.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal cannot be read or is corrupted.
    pub fn with_backend(
        backend: Box<dyn StorageBackend>,
        sync_on_commit: bool,
    ) -> StorageResult<Self> {
        let (journal, records) = Journal::open(backend, sync_on_commit)?;

        let mut state = StoreState::default();
        for record in records {
            state.apply(record);
        }

        Ok(Self {
            state: RwLock::new(state),
            leases: Mutex::new(HashSet::new()),
            released: Condvar::new(),
            journal: Some(Mutex::new(journal)),
        })
    }

    /// Starts a transaction on `group_id`.
    ///
    /// Blocks while another transaction holds the same group. The group is
    /// released when the returned transaction commits or is dropped.
    pub fn begin(&self, group_id: &str) -> GroupTransaction<'_> {
        let mut leases = self.leases.lock();
        while leases.contains(group_id) {
            self.released.wait(&mut leases);
        }
        leases.insert(group_id.to_string());

        GroupTransaction {
            store: self,
            group_id: group_id.to_string(),
            staged: BTreeMap::new(),
            index: None,
        }
    }

    /// Returns the group's rows with timestamps strictly after `after`,
    /// ascending.
    ///
    /// Ordering is lexicographic over the canonical timestamp strings.
    pub fn scan_after(&self, group_id: &str, after: &str) -> Vec<StoredMessage> {
        let state = self.state.read();
        state
            .groups
            .get(group_id)
            .map(|group| {
                group
                    .messages
                    .range::<str, _>((Bound::Excluded(after), Bound::Unbounded))
                    .map(|(_, row)| row.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns every row of the group, ascending.
    pub fn messages(&self, group_id: &str) -> Vec<StoredMessage> {
        let state = self.state.read();
        state
            .groups
            .get(group_id)
            .map(|group| group.messages.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns true if the group holds a row with this timestamp.
    pub fn contains(&self, group_id: &str, timestamp: &str) -> bool {
        self.state
            .read()
            .groups
            .get(group_id)
            .is_some_and(|group| group.messages.contains_key(timestamp))
    }

    /// Returns the group's committed index snapshot, if any.
    pub fn load_index(&self, group_id: &str) -> Option<String> {
        self.state
            .read()
            .groups
            .get(group_id)
            .and_then(|group| group.index.clone())
    }

    /// Returns the number of rows stored for the group.
    pub fn message_count(&self, group_id: &str) -> usize {
        self.state
            .read()
            .groups
            .get(group_id)
            .map_or(0, |group| group.messages.len())
    }

    /// Returns all known group ids, sorted.
    pub fn groups(&self) -> Vec<String> {
        let mut groups: Vec<_> = self.state.read().groups.keys().cloned().collect();
        groups.sort();
        groups
    }

    /// Returns true if commits are journaled.
    pub fn is_durable(&self) -> bool {
        self.journal.is_some()
    }

    fn publish(&self, record: CommitRecord) -> StorageResult<usize> {
        let _journal = match &self.journal {
            Some(journal) => {
                let mut journal = journal.lock();
                journal.append(&record)?;
                Some(journal)
            }
            None => None,
        };
        Ok(self.state.write().apply(record))
    }

    fn release(&self, group_id: &str) {
        self.leases.lock().remove(group_id);
        self.released.notify_all();
    }
}

impl std::fmt::Debug for MessageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStore")
            .field("groups", &self.state.read().groups.len())
            .field("durable", &self.is_durable())
            .finish()
    }
}

/// Exclusive, all-or-nothing write access to one group.
///
/// Rows and the index snapshot are staged in the transaction and become
/// visible together on [`GroupTransaction::commit`]. Dropping the
/// transaction without committing discards everything staged.
#[must_use = "a transaction does nothing unless committed"]
pub struct GroupTransaction<'a> {
    store: &'a MessageStore,
    group_id: String,
    staged: BTreeMap<String, StoredMessage>,
    index: Option<String>,
}

impl GroupTransaction<'_> {
    /// The group this transaction holds.
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// The index snapshot as of this transaction: staged if replaced,
    /// otherwise the committed one.
    pub fn index(&self) -> Option<String> {
        self.index
            .clone()
            .or_else(|| self.store.load_index(&self.group_id))
    }

    /// Stages `row` unless its timestamp is already stored or staged.
    ///
    /// Returns true if the row was staged. An existing row is never
    /// replaced, even when the new row carries different content.
    pub fn insert_if_absent(&mut self, row: StoredMessage) -> bool {
        if self.staged.contains_key(&row.timestamp)
            || self.store.contains(&self.group_id, &row.timestamp)
        {
            return false;
        }
        self.staged.insert(row.timestamp.clone(), row);
        true
    }

    /// Stages a replacement index snapshot.
    pub fn put_index(&mut self, snapshot: String) {
        self.index = Some(snapshot);
    }

    /// Number of rows staged so far.
    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    /// Publishes the staged rows and index atomically.
    ///
    /// Returns the number of rows inserted. A transaction that stages no
    /// rows and leaves the index unchanged writes nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal append fails; nothing is published
    /// in that case.
    pub fn commit(mut self) -> StorageResult<usize> {
        let index = self.index.take();
        let index_changed =
            index.is_some() && index != self.store.load_index(&self.group_id);

        if self.staged.is_empty() && !index_changed {
            debug!(group = %self.group_id, "empty transaction, nothing to commit");
            return Ok(0);
        }

        let record = CommitRecord {
            group_id: self.group_id.clone(),
            rows: std::mem::take(&mut self.staged).into_values().collect(),
            index: if index_changed { index } else { None },
        };
        let inserted = self.store.publish(record)?;
        debug!(group = %self.group_id, inserted, "transaction committed");
        Ok(inserted)
    }

    /// Discards everything staged.
    pub fn rollback(self) {
        debug!(
            group = %self.group_id,
            staged = self.staged.len(),
            "transaction rolled back"
        );
    }
}

impl Drop for GroupTransaction<'_> {
    fn drop(&mut self) {
        self.store.release(&self.group_id);
    }
}
