//! Write-ahead log.
//!
//! Every store mutation is appended here and flushed before it is applied in
//! memory. When the file is fsynced is governed by [`SyncPolicy`]. On open the log is replayed on top of the
//! newest segment snapshot.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [ENTRY 1: codec-framed WalEntry]
//! [ENTRY 2: codec-framed WalEntry]
//! ...
//! ```
//!
//! A torn final entry ends the log; a checksum failure anywhere is an error.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Error as IoError, ErrorKind, Result as IoResult, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::entity::{CanonicalEntity, EntityId};

use super::codec;

/// One logged mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    /// Position in the log, starting at 1 after each truncation.
    pub sequence: u64,
    /// When the entry was written.
    pub timestamp: DateTime<Utc>,
    /// The mutation.
    pub kind: WalEntryKind,
}

/// Logged mutations. Entries carry resolved rows so replay never reassigns ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalEntryKind {
    /// Row stored under its id.
    EntityPut(CanonicalEntity),
    /// Duplicate rows folded into `survivor`.
    EntityMerge {
        /// Post-merge survivor row.
        survivor: CanonicalEntity,
        /// Rows deleted by the merge.
        absorbed: Vec<EntityId>,
    },
    /// All entity rows removed.
    EntitiesCleared,
    /// One committed ledger batch.
    LedgerBatch {
        /// Record ids in the batch.
        ids: Vec<String>,
        /// Batch number.
        batch_number: u64,
        /// Commit time.
        processed_at: DateTime<Utc>,
    },
    /// Ledger metadata value set.
    LedgerMetadata {
        /// Key.
        key: String,
        /// Value.
        value: String,
    },
    /// Ledger cleared.
    LedgerReset,
    /// All state up to this cumulative sequence is in a segment.
    Checkpoint {
        /// Last cumulative sequence covered.
        up_to_sequence: u64,
    },
}

impl WalEntryKind {
    /// Entries that close a unit of work: a ledger commit, a reset or a checkpoint.
    fn is_commit(&self) -> bool {
        !matches!(self, Self::EntityPut(_) | Self::EntityMerge { .. })
    }
}

/// When log appends are fsynced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncPolicy {
    /// After every append.
    EveryWrite,
    /// After ledger commits, resets and checkpoints. Entity rows appended
    /// before a commit reach the disk with it, so a crash loses at most the
    /// uncommitted batch, which resume redoes.
    #[default]
    Commit,
    /// Never; the OS decides.
    Never,
}

impl SyncPolicy {
    fn syncs(self, kind: &WalEntryKind) -> bool {
        match self {
            Self::EveryWrite => true,
            Self::Commit => kind.is_commit(),
            Self::Never => false,
        }
    }
}

fn poisoned(what: &'static str) -> IoError {
    IoError::new(ErrorKind::Other, format!("poisoned lock: wal.{what}"))
}

#[derive(Debug)]
struct WalState {
    writer: Option<BufWriter<File>>,
    sequence: u64,
    syncs: u64,
}

/// Append-only log shared by the persistent stores.
#[derive(Debug)]
pub struct WriteAheadLog {
    path: PathBuf,
    state: Mutex<WalState>,
    sync: SyncPolicy,
}

impl WriteAheadLog {
    /// Opens the log at `path`, creating it with a header if missing.
    pub fn open(path: &Path, sync: SyncPolicy) -> IoResult<Self> {
        let has_header = path.exists() && std::fs::metadata(path)?.len() >= 5;
        let sequence = if has_header {
            Self::find_last_sequence(path)?
        } else {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)?;
            codec::write_header(&mut file)?;
            if sync != SyncPolicy::Never {
                file.sync_all()?;
            }
            0
        };

        let file = OpenOptions::new().append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(WalState {
                writer: Some(BufWriter::new(file)),
                sequence,
                syncs: 0,
            }),
            sync,
        })
    }

    fn lock(&self, what: &'static str) -> IoResult<MutexGuard<'_, WalState>> {
        self.state.lock().map_err(|_| poisoned(what))
    }

    /// Appends `kind` and returns its sequence number.
    pub fn append(&self, kind: WalEntryKind) -> IoResult<u64> {
        let mut state = self.lock("append")?;
        let sequence = state.sequence + 1;
        let sync = self.sync.syncs(&kind);
        let encoded = codec::encode(&WalEntry {
            sequence,
            timestamp: Utc::now(),
            kind,
        })?;

        let writer = state
            .writer
            .as_mut()
            .ok_or_else(|| IoError::new(ErrorKind::Other, "WAL writer is closed"))?;
        writer.write_all(&encoded)?;
        writer.flush()?;
        if sync {
            writer.get_ref().sync_all()?;
            state.syncs += 1;
        }

        state.sequence = sequence;
        Ok(sequence)
    }

    /// Iterates over the entries on disk.
    pub fn iter(&self) -> IoResult<WalIterator> {
        WalIterator::new(&self.path)
    }

    /// Sequence number of the last entry.
    pub fn current_sequence(&self) -> IoResult<u64> {
        Ok(self.lock("current_sequence")?.sequence)
    }

    /// fsyncs issued by appends since open.
    #[cfg(test)]
    fn sync_count(&self) -> IoResult<u64> {
        Ok(self.lock("sync_count")?.syncs)
    }

    /// Size of the log file in bytes.
    pub fn size_bytes(&self) -> IoResult<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    /// Drops every entry, leaving only the header.
    ///
    /// Call only after a segment holding the current state is durable.
    pub fn truncate(&self) -> IoResult<()> {
        let mut state = self.lock("truncate")?;
        if let Some(mut writer) = state.writer.take() {
            writer.flush()?;
        }

        let mut file = OpenOptions::new().write(true).truncate(true).open(&self.path)?;
        codec::write_header(&mut file)?;
        if self.sync != SyncPolicy::Never {
            file.sync_all()?;
        }
        drop(file);

        state.writer = Some(BufWriter::new(OpenOptions::new().append(true).open(&self.path)?));
        state.sequence = 0;
        Ok(())
    }

    fn find_last_sequence(path: &Path) -> IoResult<u64> {
        let mut last = 0;
        for entry in WalIterator::new(path)? {
            match entry {
                Ok(entry) => last = entry.sequence,
                Err(e) => {
                    warn!("WAL: corruption detected after sequence {last}: {e}");
                    break;
                }
            }
        }
        Ok(last)
    }
}

/// Iterator over the entries of a log file.
pub struct WalIterator {
    reader: BufReader<File>,
    file_size: u64,
}

impl WalIterator {
    fn new(path: &Path) -> IoResult<Self> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        codec::read_header(&mut reader)?;
        Ok(Self { reader, file_size })
    }
}

impl Iterator for WalIterator {
    type Item = IoResult<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.reader.stream_position() {
            Ok(pos) if pos >= self.file_size => return None,
            Ok(_) => {}
            Err(e) => return Some(Err(e)),
        }
        match codec::decode(&mut self.reader) {
            Ok(entry) => Some(Ok(entry)),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => None,
            Err(e) => Some(Err(e)),
        }
    }
}
