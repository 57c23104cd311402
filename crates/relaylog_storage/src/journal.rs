//! Commit journal.
//!
//! Every committed group transaction is one journal record:
//!
//! ```text
//! | magic (4) | version (2) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! The payload is the CBOR encoding of a [`CommitRecord`]; the checksum
//! covers header and payload. Integers are little-endian.
//!
//! ## Recovery
//!
//! - A record cut short at the tail (header or payload incomplete) is a
//!   crash mid-append: it is dropped and the journal truncated to the last
//!   complete record.
//! - A bad magic, unknown version or checksum mismatch is corruption and
//!   fails the open; nothing is repaired heuristically.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use crate::store::StoredMessage;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

const MAGIC: [u8; 4] = *b"RLJ\x01";
const VERSION: u16 = 1;
const HEADER_LEN: usize = 10;
const CRC_LEN: usize = 4;

/// One committed transaction, as written to the journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    /// Group the transaction ran against.
    pub group_id: String,
    /// Rows inserted by the transaction.
    pub rows: Vec<StoredMessage>,
    /// New index snapshot, if the transaction replaced it.
    pub index: Option<String>,
}

pub(crate) struct Journal {
    backend: Box<dyn StorageBackend>,
    sync_on_commit: bool,
}

impl Journal {
    /// Opens a journal and returns every complete record in write order.
    pub(crate) fn open(
        mut backend: Box<dyn StorageBackend>,
        sync_on_commit: bool,
    ) -> StorageResult<(Self, Vec<CommitRecord>)> {
        let size = backend.size()?;
        let bytes = backend.read_at(0, size as usize)?;

        let mut records = Vec::new();
        let mut offset = 0usize;
        while let Some((record, len)) = decode_record(&bytes[offset..], offset as u64)? {
            records.push(record);
            offset += len;
        }

        if offset < bytes.len() {
            warn!(
                valid_bytes = offset,
                torn_bytes = bytes.len() - offset,
                "discarding incomplete journal tail"
            );
            backend.truncate(offset as u64)?;
        }

        info!(records = records.len(), bytes = offset, "journal replayed");
        Ok((
            Self {
                backend,
                sync_on_commit,
            },
            records,
        ))
    }

    /// Appends and flushes one record.
    ///
    /// On failure the journal is cut back to its previous length so a
    /// half-written record never survives.
    pub(crate) fn append(&mut self, record: &CommitRecord) -> StorageResult<()> {
        let frame = encode_record(record)?;
        let start = self.backend.size()?;

        let written = self
            .backend
            .append(&frame)
            .and_then(|_| self.backend.flush())
            .and_then(|_| {
                if self.sync_on_commit {
                    self.backend.sync()
                } else {
                    Ok(())
                }
            });

        if let Err(err) = written {
            if let Err(undo) = self.backend.truncate(start) {
                warn!(error = %undo, offset = start, "failed to undo partial journal append");
            }
            return Err(err);
        }
        Ok(())
    }
}

pub(crate) fn encode_record(record: &CommitRecord) -> StorageResult<Vec<u8>> {
    let mut payload = Vec::new();
    ciborium::into_writer(record, &mut payload)
        .map_err(|e| StorageError::Codec(e.to_string()))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| StorageError::Codec(format!("record of {} bytes", payload.len())))?;

    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len() + CRC_LEN);
    frame.extend_from_slice(&MAGIC);
    frame.extend_from_slice(&VERSION.to_le_bytes());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&payload);
    let crc = crc32(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    Ok(frame)
}

/// Decodes the record at the start of `buf`.
///
/// Returns `Ok(None)` if `buf` ends before the record does.
pub(crate) fn decode_record(
    buf: &[u8],
    offset: u64,
) -> StorageResult<Option<(CommitRecord, usize)>> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }

    let corrupted = |message: String| StorageError::Corrupted { offset, message };

    if buf[0..4] != MAGIC {
        return Err(corrupted(format!("bad magic {:02x?}", &buf[0..4])));
    }
    let version = u16::from_le_bytes([buf[4], buf[5]]);
    if version != VERSION {
        return Err(corrupted(format!("unsupported version {version}")));
    }
    let len = u32::from_le_bytes([buf[6], buf[7], buf[8], buf[9]]) as usize;

    let body_end = HEADER_LEN + len;
    let total = body_end + CRC_LEN;
    if buf.len() < total {
        return Ok(None);
    }

    let stored = u32::from_le_bytes([
        buf[body_end],
        buf[body_end + 1],
        buf[body_end + 2],
        buf[body_end + 3],
    ]);
    let computed = crc32(&buf[..body_end]);
    if stored != computed {
        return Err(corrupted(format!(
            "checksum mismatch: stored {stored:08x}, computed {computed:08x}"
        )));
    }

    let record: CommitRecord = ciborium::from_reader(&buf[HEADER_LEN..body_end])
        .map_err(|e| corrupted(format!("undecodable payload: {e}")))?;
    Ok(Some((record, total)))
}

/// CRC-32 (IEEE polynomial).
fn crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut bit = 0;
            while bit < 8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
                bit += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    !data.iter().fold(0xFFFF_FFFF_u32, |crc, &byte| {
        (crc >> 8) ^ TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize]
    })
}
