//! Storage traits and backends for coletor.
//!
//! The traits define the abstract interface; `memory` and `persistent`
//! provide the implementations. Both backends share the indexed tables in
//! `table`.

pub mod memory;
#[cfg(feature = "persistent")]
pub mod persistent;
mod table;
mod traits;

pub use memory::{InMemoryCanonicalStore, InMemoryProgressLedger};
pub use table::{EntitySnapshot, EntityTable, LedgerRecord, LedgerTable};
pub use traits::{CanonicalStore, Compactable, CompactionResult, ProgressLedger, StorageError};

#[cfg(feature = "persistent")]
pub use persistent::{
    open_database, PersistentCanonicalStore, PersistentConfig, PersistentProgressLedger, PersistentStores, SyncPolicy,
};
