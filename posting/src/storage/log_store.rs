//! Append-only file store.
//!
//! Every write is appended to a single log file as a checksummed record and
//! applied to an in-memory ordered index that serves reads. Opening the store
//! replays the log; a torn or corrupt tail is cut off at the last intact
//! record.
//!
//! # Record Format
//!
//! ```text
//! +----------+-------------------------------------------------+
//! | 0-3      | record_length (4 bytes, includes header+crc)    |
//! | 4        | record_type (1 byte)                            |
//! | 5-8      | key_length (4 bytes)                            |
//! | 9-N      | key, then value for Set records                 |
//! | N-N+3    | CRC32 checksum (4 bytes)                        |
//! +----------+-------------------------------------------------+
//! ```

// record lengths fit in u32, keys and posting lists are far smaller
#![allow(clippy::cast_possible_truncation)]

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::storage::memory::MemoryStore;
use crate::storage::store::{KeyValue, Store, StoreError};

/// Record header size: `record_length` (4) + `record_type` (1) + `key_length` (4).
const RECORD_HEADER_SIZE: usize = 9;

/// CRC32 checksum size at end of record.
const CHECKSUM_SIZE: usize = 4;

/// Log record types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum RecordType {
    Set = 0x01,
    Delete = 0x02,
}

/// A decoded log record.
#[derive(Debug, PartialEq, Eq)]
enum LogRecord {
    Set { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

impl LogRecord {
    fn to_bytes(&self) -> Vec<u8> {
        let (record_type, key, value): (RecordType, &[u8], &[u8]) = match self {
            Self::Set { key, value } => (RecordType::Set, key, value),
            Self::Delete { key } => (RecordType::Delete, key, &[]),
        };
        let total_len = RECORD_HEADER_SIZE + key.len() + value.len() + CHECKSUM_SIZE;

        let mut bytes = Vec::with_capacity(total_len);
        bytes.extend_from_slice(&(total_len as u32).to_le_bytes());
        bytes.push(record_type as u8);
        bytes.extend_from_slice(&(key.len() as u32).to_le_bytes());
        bytes.extend_from_slice(key);
        bytes.extend_from_slice(value);

        // CRC32 checksum - computed over everything before it
        let checksum = crc32fast::hash(&bytes);
        bytes.extend_from_slice(&checksum.to_le_bytes());
        bytes
    }

    /// Decode the record at the start of `bytes`.
    ///
    /// Returns the record and the number of bytes consumed.
    fn from_bytes(bytes: &[u8]) -> Result<(Self, usize), StoreError> {
        if bytes.len() < RECORD_HEADER_SIZE + CHECKSUM_SIZE {
            return Err(StoreError::Corruption("truncated record header".into()));
        }
        let record_len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        if record_len < RECORD_HEADER_SIZE + CHECKSUM_SIZE || record_len > bytes.len() {
            return Err(StoreError::Corruption(format!(
                "record length {record_len} out of bounds"
            )));
        }

        let stored = u32::from_le_bytes([
            bytes[record_len - 4],
            bytes[record_len - 3],
            bytes[record_len - 2],
            bytes[record_len - 1],
        ]);
        let computed = crc32fast::hash(&bytes[..record_len - CHECKSUM_SIZE]);
        if stored != computed {
            return Err(StoreError::Corruption(format!(
                "checksum mismatch: expected {stored:#010x}, got {computed:#010x}"
            )));
        }

        let key_len = u32::from_le_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]) as usize;
        let key_end = RECORD_HEADER_SIZE + key_len;
        if key_end > record_len - CHECKSUM_SIZE {
            return Err(StoreError::Corruption("key overruns record".into()));
        }
        let key = bytes[RECORD_HEADER_SIZE..key_end].to_vec();
        let value = &bytes[key_end..record_len - CHECKSUM_SIZE];

        let record = match bytes[4] {
            0x01 => Self::Set {
                key,
                value: value.to_vec(),
            },
            0x02 if value.is_empty() => Self::Delete { key },
            other => {
                return Err(StoreError::Corruption(format!(
                    "invalid record type {other:#04x}"
                )));
            }
        };
        Ok((record, record_len))
    }
}

/// Outcome of replaying the log on open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecoveryResult {
    /// Intact records applied to the index.
    pub records_replayed: u64,
    /// Bytes cut from a torn or corrupt tail.
    pub bytes_discarded: u64,
}

/// A `Store` persisted as an append-only log.
pub struct LogStore {
    path: PathBuf,
    /// Append handle. Held while a record is written and applied so the log
    /// order and the index order agree.
    file: Mutex<File>,
    index: MemoryStore,
    sync_on_write: bool,
}

impl LogStore {
    /// Open the log at `path`, creating it if missing, and replay it.
    ///
    /// With `sync_on_write`, every record is fsynced before the write returns.
    pub fn open(path: &Path, sync_on_write: bool) -> Result<(Self, RecoveryResult), StoreError> {
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)?;

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        let index = MemoryStore::new();
        let mut result = RecoveryResult::default();
        let mut offset = 0;
        while offset < bytes.len() {
            match LogRecord::from_bytes(&bytes[offset..]) {
                Ok((record, consumed)) => {
                    apply(&index, record)?;
                    result.records_replayed += 1;
                    offset += consumed;
                }
                Err(e) => {
                    tracing::warn!(
                        "Discarding log tail of {} at offset {offset}: {e}",
                        path.display()
                    );
                    result.bytes_discarded = (bytes.len() - offset) as u64;
                    file.set_len(offset as u64)?;
                    file.sync_all()?;
                    break;
                }
            }
        }

        Ok((
            Self {
                path: path.to_path_buf(),
                file: Mutex::new(file),
                index,
                sync_on_write,
            },
            result,
        ))
    }

    /// Rewrite the log so it holds one record per live key.
    ///
    /// The new log is written beside the old one and renamed over it.
    pub fn compact(&self) -> Result<(), StoreError> {
        let mut file = self.file.lock().map_err(|_| StoreError::LockPoisoned)?;

        let tmp_path = self.path.with_extension("compact");
        {
            let mut tmp = File::create(&tmp_path)?;
            for (key, value) in self.index.scan_prefix(&[])? {
                tmp.write_all(&LogRecord::Set { key, value }.to_bytes())?;
            }
            tmp.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;

        *file = OpenOptions::new().read(true).append(true).open(&self.path)?;
        tracing::debug!("Compacted log {}", self.path.display());
        Ok(())
    }

    /// Force buffered writes to disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        let file = self.file.lock().map_err(|_| StoreError::LockPoisoned)?;
        file.sync_all()?;
        Ok(())
    }

    fn append(&self, record: LogRecord) -> Result<(), StoreError> {
        self.append_with(record, |file, bytes| file.write_all(bytes))
    }

    /// Append `record` through `write`, then apply it to the index.
    ///
    /// A failed write or sync cuts the log back to its previous end, so a
    /// partial record never sits in front of later ones.
    fn append_with(
        &self,
        record: LogRecord,
        write: impl FnOnce(&mut File, &[u8]) -> io::Result<()>,
    ) -> Result<(), StoreError> {
        let mut file = self.file.lock().map_err(|_| StoreError::LockPoisoned)?;
        let end = file.metadata()?.len();

        let written = write(&mut *file, &record.to_bytes()).and_then(|()| {
            if self.sync_on_write {
                file.sync_data()
            } else {
                Ok(())
            }
        });
        if let Err(e) = written {
            tracing::warn!("Append to {} failed, rolling back: {e}", self.path.display());
            file.set_len(end)?;
            return Err(e.into());
        }
        apply(&self.index, record)
    }
}

fn apply(index: &MemoryStore, record: LogRecord) -> Result<(), StoreError> {
    match record {
        LogRecord::Set { key, value } => index.set(&key, &value),
        LogRecord::Delete { key } => index.delete(&key),
    }
}

impl Store for LogStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.index.get(key)
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.append(LogRecord::Set {
            key: key.to_vec(),
            value: value.to_vec(),
        })
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.append(LogRecord::Delete { key: key.to_vec() })
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<KeyValue>, StoreError> {
        self.index.scan_prefix(prefix)
    }
}
