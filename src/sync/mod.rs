//! Checksum-verified persistence, conflict handling, and recovery.

pub mod backup;
pub mod manager;
pub mod store;

pub use backup::{BackupScheduler, DEFAULT_BACKUP_INTERVAL_SECS};
pub use manager::{
    generate_checksum, ConflictKind, ConflictRecord, LoadResult, LoadSource, SaveOptions,
    SaveResult, StateSyncManager, StorageInfo, StoredEnvelope, SyncEvent, BACKUP_KEY,
    CONCURRENT_WINDOW_MS, CONFLICTS_KEY, CONTENT_KEY, MAX_STORED_CONFLICTS,
    TIMESTAMP_CONFLICT_THRESHOLD_MS,
};
pub use store::{KeyValueStore, MemoryStore, NullStore};
