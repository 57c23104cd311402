//! Merkle trie over message timestamps.
//!
//! The trie has one level per base-3 digit of a timestamp's minute (see
//! [`crate::bucket_path`]). Every node carries the XOR of the digests of all
//! timestamps filed beneath it, plus their count. XOR is commutative and
//! associative, so the digest of a set does not depend on insertion order.
//!
//! Two replicas exchange their tries instead of their logs. Equal root
//! hashes mean equal timestamp sets; otherwise [`HashIndex::diff`] walks both
//! tries to the earliest bucket where they disagree and reports the first
//! millisecond of that bucket. Everything from there on is the catch-up
//! window.
//!
//! ## Wire form
//!
//! ```json
//! {"hash": 1735812381, "count": 3, "0": {"hash": ..., "count": ..., "1": {...}}}
//! ```
//!
//! `count` is optional on input. Any key other than `hash`, `count` and the
//! digits `0`, `1`, `2` is rejected, as is nesting deeper than
//! [`INDEX_DEPTH`].

use crate::clock::{bucket_start, Timestamp, INDEX_DEPTH};
use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use std::collections::{BTreeMap, BTreeSet};

const HASH_KEY: &str = "hash";
const COUNT_KEY: &str = "count";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Node {
    hash: u32,
    count: u64,
    children: BTreeMap<u8, Node>,
}

impl Node {
    fn child_hash(&self, key: u8) -> u32 {
        self.children.get(&key).map_or(0, |child| child.hash)
    }

    fn to_json(&self) -> Json {
        let mut map = Map::new();
        map.insert(HASH_KEY.into(), Json::from(self.hash));
        map.insert(COUNT_KEY.into(), Json::from(self.count));
        for (key, child) in &self.children {
            map.insert(char::from(b'0' + key).to_string(), child.to_json());
        }
        Json::Object(map)
    }

    fn from_json(json: &Json, path: &mut Vec<u8>) -> ProtocolResult<Self> {
        let map = json
            .as_object()
            .ok_or_else(|| ProtocolError::index_shape(path, "node is not an object"))?;

        let mut node = Node::default();
        for (key, value) in map {
            match key.as_str() {
                HASH_KEY => {
                    node.hash = value
                        .as_u64()
                        .and_then(|h| u32::try_from(h).ok())
                        .ok_or_else(|| {
                            ProtocolError::index_shape(path, "hash is not a 32-bit unsigned integer")
                        })?;
                }
                COUNT_KEY => {
                    node.count = value.as_u64().ok_or_else(|| {
                        ProtocolError::index_shape(path, "count is not an unsigned integer")
                    })?;
                }
                "0" | "1" | "2" => {
                    if path.len() == INDEX_DEPTH {
                        return Err(ProtocolError::index_shape(
                            path,
                            format!("nested deeper than {INDEX_DEPTH} levels"),
                        ));
                    }
                    let digit = key.as_bytes()[0] - b'0';
                    path.push(digit);
                    let child = Node::from_json(value, path)?;
                    path.pop();
                    node.children.insert(digit, child);
                }
                other => {
                    return Err(ProtocolError::index_shape(
                        path,
                        format!("unexpected key {other:?}"),
                    ));
                }
            }
        }
        Ok(node)
    }

    fn pruned(&self, keep: usize) -> Node {
        let skip = self.children.len().saturating_sub(keep);
        Node {
            hash: self.hash,
            count: self.count,
            children: self
                .children
                .iter()
                .skip(skip)
                .map(|(key, child)| (*key, child.pruned(keep)))
                .collect(),
        }
    }
}

/// Hierarchical digest of a set of timestamps.
///
/// # Invariants
///
/// - The root hash is the XOR of [`Timestamp::digest`] over the set
/// - Each node's hash and count summarize exactly the timestamps below it
/// - No path is deeper than [`INDEX_DEPTH`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Json", into = "Json")]
pub struct HashIndex {
    root: Node,
}

impl HashIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the index with `ts` folded in.
    ///
    /// Each timestamp must be inserted at most once: XOR is self-inverse,
    /// so inserting the same timestamp twice removes it from the digest.
    #[must_use]
    pub fn insert(mut self, ts: &Timestamp) -> Self {
        let digest = ts.digest();
        let mut node = &mut self.root;
        node.hash ^= digest;
        node.count += 1;
        for key in ts.bucket_path() {
            node = node.children.entry(key).or_default();
            node.hash ^= digest;
            node.count += 1;
        }
        self
    }

    /// Finds where two indexes first disagree.
    ///
    /// Returns `None` when the root hashes match. Otherwise returns the first
    /// millisecond of the earliest bucket whose hashes differ: at each level
    /// the union of both nodes' child keys is scanned in ascending order, a
    /// missing child counts as hash 0, and the walk descends into the first
    /// mismatch until no child differs. The result does not depend on which
    /// index is `self`.
    pub fn diff(&self, other: &HashIndex) -> Option<u64> {
        if self.root.hash == other.root.hash {
            return None;
        }

        let empty = Node::default();
        let mut left = &self.root;
        let mut right = &other.root;
        let mut path = Vec::with_capacity(INDEX_DEPTH);

        loop {
            let keys: BTreeSet<u8> = left
                .children
                .keys()
                .chain(right.children.keys())
                .copied()
                .collect();

            let diverging = keys
                .into_iter()
                .find(|key| left.child_hash(*key) != right.child_hash(*key));

            match diverging {
                Some(key) => {
                    path.push(key);
                    left = left.children.get(&key).unwrap_or(&empty);
                    right = right.children.get(&key).unwrap_or(&empty);
                }
                None => return Some(bucket_start(&path)),
            }
        }
    }

    /// Returns a copy keeping only the `keep` most recent children per level.
    ///
    /// Node hashes are unchanged, so a pruned index still compares equal to
    /// the full one; only the resolution of `diff` into old buckets is lost.
    pub fn prune(&self, keep: usize) -> HashIndex {
        HashIndex {
            root: self.root.pruned(keep),
        }
    }

    /// Root digest.
    pub fn root_hash(&self) -> u32 {
        self.root.hash
    }

    /// Number of timestamps folded into the index.
    pub fn len(&self) -> u64 {
        self.root.count
    }

    /// Returns true if nothing has been inserted.
    pub fn is_empty(&self) -> bool {
        self.root.count == 0 && self.root.hash == 0 && self.root.children.is_empty()
    }

    /// Validates and converts the JSON wire form.
    ///
    /// An empty object is the empty index.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::IndexShape`] naming the first offending node.
    pub fn from_json(json: &Json) -> ProtocolResult<Self> {
        let mut path = Vec::with_capacity(INDEX_DEPTH);
        Ok(Self {
            root: Node::from_json(json, &mut path)?,
        })
    }

    /// Converts to the JSON wire form.
    pub fn to_json(&self) -> Json {
        self.root.to_json()
    }
}

impl TryFrom<Json> for HashIndex {
    type Error = ProtocolError;

    fn try_from(json: Json) -> Result<Self, Self::Error> {
        Self::from_json(&json)
    }
}

impl From<HashIndex> for Json {
    fn from(index: HashIndex) -> Self {
        index.to_json()
    }
}
