//! Checksum-verified persistence of editor content with conflict detection
//! and layered recovery.
//!
//! Content is stored as an envelope carrying the payload, its version, a
//! write timestamp, the writing session id, and a checksum over the
//! rendered HTML. Saves detect version, timestamp, and concurrent
//! conflicts against the stored envelope before overwriting it; loads verify
//! the envelope end to end and fall back to the backup copy, repairing
//! salvageable payloads in place.

use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::document::model::{now_ms, EditorContent};
use crate::error::{EditorError, EditorResult};
use crate::sync::backup::BackupScheduler;
use crate::sync::store::KeyValueStore;

/// Storage key of the primary content envelope.
pub const CONTENT_KEY: &str = "draftsync-content";
/// Storage key of the backup envelope.
pub const BACKUP_KEY: &str = "draftsync-backup";
/// Storage key of the stored conflict list.
pub const CONFLICTS_KEY: &str = "draftsync-conflicts";

/// Clock skew tolerated before two modification times count as conflicting.
pub const TIMESTAMP_CONFLICT_THRESHOLD_MS: i64 = 5_000;
/// Window within which a write from another session counts as concurrent.
pub const CONCURRENT_WINDOW_MS: i64 = 30_000;
/// Stored conflict records are capped at this many, oldest dropped first.
pub const MAX_STORED_CONFLICTS: usize = 20;

// =============================================================================
// CHECKSUM
// =============================================================================

/// Rolling 32-bit hash of the input's UTF-16 code units, rendered in
/// base 36. Not cryptographic; it exists to catch torn and truncated writes,
/// and its exact form is load-bearing because stored envelopes carry it.
/// Envelopes checksum the content's rendered HTML.
pub fn generate_checksum(payload: &str) -> String {
    let mut hash: i32 = 0;
    for unit in payload.encode_utf16() {
        hash = hash
            .wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(unit as i32);
    }
    to_base36(hash)
}

fn to_base36(value: i32) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let negative = value < 0;
    let mut magnitude = value.unsigned_abs();
    let mut buf = Vec::new();
    while magnitude > 0 {
        buf.push(DIGITS[(magnitude % 36) as usize]);
        magnitude /= 36;
    }
    if negative {
        buf.push(b'-');
    }
    buf.reverse();
    String::from_utf8(buf).unwrap_or_default()
}

// =============================================================================
// WIRE TYPES
// =============================================================================

/// The persisted envelope wrapping one content snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredEnvelope {
    pub content: EditorContent,
    /// Write time, epoch milliseconds.
    pub timestamp: i64,
    pub version: u64,
    pub checksum: String,
    pub session_id: String,
}

/// The three conflict classes, ordered by detection priority.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConflictKind {
    /// The incoming version is older than the stored one.
    Version,
    /// Modification times diverge beyond the skew threshold and the local
    /// copy is the older one.
    Timestamp,
    /// Another session wrote within the concurrency window.
    Concurrent,
}

/// One detected conflict, stored for later interactive resolution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    #[serde(rename = "type")]
    pub kind: ConflictKind,
    pub local_content: EditorContent,
    pub remote_content: EditorContent,
    pub local_timestamp: i64,
    pub remote_timestamp: i64,
    pub detected_at: i64,
}

// =============================================================================
// RESULTS AND EVENTS
// =============================================================================

/// Options modifying one save.
#[derive(Debug, Clone, Copy, Default)]
pub struct SaveOptions {
    /// Skip integrity repair and conflict detection. Used when persisting
    /// already-vetted content (repairs, resolutions, recovery).
    pub skip_validation: bool,
    /// Snapshot the current envelope to the backup slot before overwriting
    /// it. Off by default; the periodic [`tick`](StateSyncManager::tick)
    /// refreshes the backup between requested snapshots.
    pub create_backup: bool,
    /// Bypass the in-progress guard instead of deferring.
    pub force: bool,
}

/// Discriminated save outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveResult {
    pub success: bool,
    /// The save was stashed behind an in-flight one and will run after it.
    pub deferred: bool,
    pub conflict: Option<ConflictKind>,
    pub error: Option<String>,
}

impl SaveResult {
    fn ok() -> Self {
        Self {
            success: true,
            deferred: false,
            conflict: None,
            error: None,
        }
    }

    fn deferred() -> Self {
        Self {
            success: false,
            deferred: true,
            conflict: None,
            error: Some("Sync in progress, content queued".to_string()),
        }
    }

    fn conflicted(kind: ConflictKind) -> Self {
        Self {
            success: false,
            deferred: false,
            conflict: Some(kind),
            error: None,
        }
    }

    fn failed(error: &EditorError) -> Self {
        Self {
            success: false,
            deferred: false,
            conflict: None,
            error: Some(error.to_string()),
        }
    }
}

/// Where a successful load got its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    /// Nothing stored yet.
    Empty,
    Primary,
    /// Primary envelope, payload repaired and re-persisted.
    Repaired,
    Backup,
    /// Both primary and backup were unusable.
    Unavailable,
}

/// Discriminated load outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadResult {
    pub success: bool,
    pub content: Option<EditorContent>,
    pub source: LoadSource,
}

/// Events fanned out to sync listeners. `Saved` carries the content that
/// was actually persisted, which may differ from what the caller submitted
/// when a repair ran first.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Saved {
        content: EditorContent,
        version: u64,
        timestamp: i64,
    },
    ConflictDetected(ConflictKind),
    Recovered,
}

/// Snapshot of storage health for diagnostics surfaces.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageInfo {
    pub used_bytes: u64,
    pub has_content: bool,
    pub has_backup: bool,
    pub has_conflicts: bool,
    pub conflict_count: usize,
    pub session_id: String,
    pub last_sync: Option<i64>,
    pub is_online: bool,
    pub sync_in_progress: bool,
}

type SyncListener = Box<dyn Fn(&SyncEvent)>;
type ConflictHandler = Box<dyn Fn(&ConflictRecord)>;
type ExternalChangeListener = Box<dyn Fn(&EditorContent)>;

// =============================================================================
// MANAGER
// =============================================================================

/// Serializes saves and loads of editor content against one storage slot.
///
/// At most one save runs at a time; a save submitted while one is in flight
/// is stashed in a single latest-wins slot and drained when the in-flight
/// save completes.
pub struct StateSyncManager<S: KeyValueStore> {
    store: S,
    session_id: String,
    sync_in_progress: bool,
    recovering: bool,
    is_online: bool,
    pending_save: Option<(EditorContent, SaveOptions)>,
    last_sync: Option<i64>,
    last_external_timestamp: Option<i64>,
    backup_scheduler: BackupScheduler,
    sync_listeners: Vec<(u64, SyncListener)>,
    conflict_handlers: Vec<(u64, ConflictHandler)>,
    external_listeners: Vec<(u64, ExternalChangeListener)>,
    next_listener_id: u64,
}

impl<S: KeyValueStore> StateSyncManager<S> {
    pub fn new(store: S) -> Self {
        Self::with_session(store, format!("session-{}", Uuid::new_v4()))
    }

    /// Constructor with an explicit session id, for hosts that persist
    /// session identity across reloads.
    pub fn with_session(store: S, session_id: String) -> Self {
        Self {
            store,
            session_id,
            sync_in_progress: false,
            recovering: false,
            is_online: true,
            pending_save: None,
            last_sync: None,
            last_external_timestamp: None,
            backup_scheduler: BackupScheduler::new(),
            sync_listeners: Vec::new(),
            conflict_handlers: Vec::new(),
            external_listeners: Vec::new(),
            next_listener_id: 0,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_sync_in_progress(&self) -> bool {
        self.sync_in_progress
    }

    pub fn last_sync_timestamp(&self) -> Option<i64> {
        self.last_sync
    }

    pub fn is_online(&self) -> bool {
        self.is_online
    }

    pub fn backup_scheduler_mut(&mut self) -> &mut BackupScheduler {
        &mut self.backup_scheduler
    }

    // -------------------------------------------------------------------------
    // Listeners
    // -------------------------------------------------------------------------

    /// Registers a sync event listener; returns its removal id.
    pub fn add_sync_listener<F>(&mut self, listener: F) -> u64
    where
        F: Fn(&SyncEvent) + 'static,
    {
        let id = self.next_listener_id;
        self.next_listener_id += 1;
        self.sync_listeners.push((id, Box::new(listener)));
        id
    }

    pub fn remove_sync_listener(&mut self, id: u64) -> bool {
        let before = self.sync_listeners.len();
        self.sync_listeners.retain(|(listener_id, _)| *listener_id != id);
        self.sync_listeners.len() != before
    }

    /// Registers a listener for content written by other sessions; returns
    /// its removal id.
    pub fn add_external_change_listener<F>(&mut self, listener: F) -> u64
    where
        F: Fn(&EditorContent) + 'static,
    {
        let id = self.next_listener_id;
        self.next_listener_id += 1;
        self.external_listeners.push((id, Box::new(listener)));
        id
    }

    /// Registers a handler notified with the full record when a conflict is
    /// detected; returns its removal id.
    pub fn add_conflict_handler<F>(&mut self, handler: F) -> u64
    where
        F: Fn(&ConflictRecord) + 'static,
    {
        let id = self.next_listener_id;
        self.next_listener_id += 1;
        self.conflict_handlers.push((id, Box::new(handler)));
        id
    }

    pub fn remove_conflict_handler(&mut self, id: u64) -> bool {
        let before = self.conflict_handlers.len();
        self.conflict_handlers
            .retain(|(handler_id, _)| *handler_id != id);
        self.conflict_handlers.len() != before
    }

    pub fn remove_external_change_listener(&mut self, id: u64) -> bool {
        let before = self.external_listeners.len();
        self.external_listeners
            .retain(|(listener_id, _)| *listener_id != id);
        self.external_listeners.len() != before
    }

    fn notify_sync(&self, event: &SyncEvent) {
        for (id, listener) in &self.sync_listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                warn!(listener = id, "sync listener panicked");
            }
        }
    }

    fn notify_conflict(&self, record: &ConflictRecord) {
        for (id, handler) in &self.conflict_handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(record))).is_err() {
                warn!(handler = id, "conflict handler panicked");
            }
        }
    }

    fn notify_external(&self, content: &EditorContent) {
        for (id, listener) in &self.external_listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(content))).is_err() {
                warn!(listener = id, "external change listener panicked");
            }
        }
    }

    // -------------------------------------------------------------------------
    // Save
    // -------------------------------------------------------------------------

    /// Persists a content snapshot.
    ///
    /// While a save is in flight, new saves land in a single latest-wins
    /// pending slot and are reported as deferred; the slot drains when the
    /// in-flight save finishes. A failed save triggers recovery.
    pub fn save_content(&mut self, content: EditorContent, options: SaveOptions) -> SaveResult {
        if self.sync_in_progress && !options.force {
            debug!("save deferred behind in-flight sync");
            self.pending_save = Some((content, options));
            return SaveResult::deferred();
        }

        self.sync_in_progress = true;
        let outcome = self.do_save(content.clone(), options);
        self.sync_in_progress = false;

        match outcome {
            Ok(result) => {
                if let Some((pending_content, pending_options)) = self.pending_save.take() {
                    debug!("draining deferred save");
                    let _ = self.save_content(pending_content, pending_options);
                }
                result
            }
            Err(err) => {
                warn!(error = %err, "save failed, attempting recovery");
                self.attempt_recovery(&content);
                SaveResult::failed(&err)
            }
        }
    }

    fn do_save(&mut self, content: EditorContent, options: SaveOptions) -> EditorResult<SaveResult> {
        let content = if options.skip_validation || content.is_valid() {
            content
        } else {
            info!("repairing content before save");
            content.repair()
        };

        if !options.skip_validation {
            if let Some(kind) = self.detect_conflict(&content)? {
                info!(?kind, "conflict detected, save rejected");
                if let Some(record) = self.store_conflict(kind, &content)? {
                    self.notify_conflict(&record);
                }
                self.notify_sync(&SyncEvent::ConflictDetected(kind));
                return Ok(SaveResult::conflicted(kind));
            }
        }

        if options.create_backup {
            self.create_backup()?;
        }

        let timestamp = now_ms();
        let envelope = StoredEnvelope {
            checksum: generate_checksum(&content.html),
            timestamp,
            version: content.version(),
            session_id: self.session_id.clone(),
            content,
        };
        self.store
            .set(CONTENT_KEY, &serde_json::to_string(&envelope)?)?;
        self.last_sync = Some(timestamp);

        debug!(version = envelope.version, timestamp, "content saved");
        self.notify_sync(&SyncEvent::Saved {
            content: envelope.content,
            version: envelope.version,
            timestamp,
        });
        Ok(SaveResult::ok())
    }

    /// Copies the current primary envelope into the backup slot.
    pub fn create_backup(&mut self) -> EditorResult<()> {
        if let Some(raw) = self.store.get(CONTENT_KEY)? {
            self.store.set(BACKUP_KEY, &raw)?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Conflict detection and resolution
    // -------------------------------------------------------------------------

    /// Classifies the incoming content against the stored envelope.
    /// Detection order is version, then timestamp, then concurrent; the
    /// first match wins.
    fn detect_conflict(&self, content: &EditorContent) -> EditorResult<Option<ConflictKind>> {
        let Some(stored) = self.read_envelope(CONTENT_KEY)? else {
            return Ok(None);
        };

        if content.version() < stored.version {
            return Ok(Some(ConflictKind::Version));
        }

        // The timestamp rule compares content modification times, not the
        // envelope write time: resolutions and repairs re-write the envelope
        // long after the content was last modified.
        if let (Some(local), Some(remote)) =
            (content.metadata.as_ref(), stored.content.metadata.as_ref())
        {
            if (local.modified_at - remote.modified_at).abs() > TIMESTAMP_CONFLICT_THRESHOLD_MS
                && local.modified_at < remote.modified_at
            {
                return Ok(Some(ConflictKind::Timestamp));
            }
        }

        if stored.session_id != self.session_id
            && now_ms() - stored.timestamp < CONCURRENT_WINDOW_MS
        {
            return Ok(Some(ConflictKind::Concurrent));
        }

        Ok(None)
    }

    fn store_conflict(
        &mut self,
        kind: ConflictKind,
        local: &EditorContent,
    ) -> EditorResult<Option<ConflictRecord>> {
        let Some(stored) = self.read_envelope(CONTENT_KEY)? else {
            return Ok(None);
        };
        let mut conflicts = self.stored_conflicts()?;
        let record = ConflictRecord {
            kind,
            local_timestamp: local
                .metadata
                .as_ref()
                .map(|m| m.modified_at)
                .unwrap_or_else(now_ms),
            remote_timestamp: stored.timestamp,
            local_content: local.clone(),
            remote_content: stored.content,
            detected_at: now_ms(),
        };
        conflicts.push(record.clone());
        while conflicts.len() > MAX_STORED_CONFLICTS {
            conflicts.remove(0);
        }
        self.store
            .set(CONFLICTS_KEY, &serde_json::to_string(&conflicts)?)?;
        Ok(Some(record))
    }

    /// The stored conflict list, oldest first.
    pub fn stored_conflicts(&self) -> EditorResult<Vec<ConflictRecord>> {
        match self.store.get(CONFLICTS_KEY)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    pub fn clear_conflicts(&mut self) -> EditorResult<()> {
        self.store.remove(CONFLICTS_KEY)
    }

    /// Resolves the conflict at `index` by persisting either its local or
    /// remote side; the record is removed once the chosen side is saved.
    pub fn resolve_conflict(&mut self, index: usize, use_local: bool) -> SaveResult {
        let mut conflicts = match self.stored_conflicts() {
            Ok(conflicts) => conflicts,
            Err(err) => return SaveResult::failed(&err),
        };
        if index >= conflicts.len() {
            return SaveResult::failed(&EditorError::storage_unavailable(
                "conflict index out of range",
            ));
        }

        let record = conflicts.remove(index);
        let chosen = if use_local {
            record.local_content
        } else {
            record.remote_content
        };
        let result = self.save_content(
            chosen,
            SaveOptions {
                skip_validation: true,
                create_backup: true,
                force: true,
            },
        );
        if result.success {
            let persist = serde_json::to_string(&conflicts)
                .map_err(EditorError::from)
                .and_then(|raw| self.store.set(CONFLICTS_KEY, &raw));
            if let Err(err) = persist {
                warn!(error = %err, "failed to persist resolved conflict list");
            }
            info!(index, use_local, "conflict resolved");
        }
        result
    }

    // -------------------------------------------------------------------------
    // Load
    // -------------------------------------------------------------------------

    /// Loads the stored content. An absent envelope is a successful empty
    /// load; a structurally broken or checksum-failing envelope falls back
    /// to the backup; an intact envelope with an invalid payload is repaired
    /// and the repair persisted.
    pub fn load_content(&mut self) -> LoadResult {
        match self.try_load_primary() {
            Ok(None) => LoadResult {
                success: true,
                content: None,
                source: LoadSource::Empty,
            },
            Ok(Some((content, repaired))) => LoadResult {
                success: true,
                content: Some(content),
                source: if repaired {
                    LoadSource::Repaired
                } else {
                    LoadSource::Primary
                },
            },
            Err(err) => {
                warn!(error = %err, "primary load failed, trying backup");
                self.load_from_backup()
            }
        }
    }

    fn try_load_primary(&mut self) -> EditorResult<Option<(EditorContent, bool)>> {
        let Some(raw) = self.store.get(CONTENT_KEY)? else {
            return Ok(None);
        };
        let envelope: StoredEnvelope = serde_json::from_str(&raw)?;

        let computed = generate_checksum(&envelope.content.html);
        if computed != envelope.checksum {
            return Err(EditorError::ChecksumMismatch {
                stored: envelope.checksum,
                computed,
            });
        }

        if envelope.content.is_valid() {
            return Ok(Some((envelope.content, false)));
        }

        info!("stored content failed integrity check, repairing");
        let repaired = envelope.content.repair();
        let save = self.save_content(
            repaired.clone(),
            SaveOptions {
                skip_validation: true,
                create_backup: false,
                force: true,
            },
        );
        if !save.success {
            warn!(error = ?save.error, "failed to persist repaired content");
        }
        Ok(Some((repaired, true)))
    }

    fn load_from_backup(&mut self) -> LoadResult {
        let unavailable = LoadResult {
            success: false,
            content: None,
            source: LoadSource::Unavailable,
        };
        let envelope = match self.read_envelope(BACKUP_KEY) {
            Ok(Some(envelope)) => envelope,
            Ok(None) => return unavailable,
            Err(err) => {
                warn!(error = %err, "backup load failed");
                return unavailable;
            }
        };

        // The backup is validated as strictly as the primary.
        if generate_checksum(&envelope.content.html) != envelope.checksum {
            warn!("backup checksum mismatch, backup unusable");
            return unavailable;
        }

        info!("recovered content from backup");
        let content = if envelope.content.is_valid() {
            envelope.content
        } else {
            envelope.content.repair()
        };
        self.notify_sync(&SyncEvent::Recovered);
        LoadResult {
            success: true,
            content: Some(content),
            source: LoadSource::Backup,
        }
    }

    fn read_envelope(&self, key: &str) -> EditorResult<Option<StoredEnvelope>> {
        match self.store.get(key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    // -------------------------------------------------------------------------
    // Recovery and diagnostics
    // -------------------------------------------------------------------------

    /// Best-effort recovery after a failed save: re-persist the backup, the
    /// most recent conflicted remote, or the local content, in that order.
    /// Guarded against re-entry so a failing store cannot recurse.
    fn attempt_recovery(&mut self, local: &EditorContent) {
        if self.recovering {
            return;
        }
        self.recovering = true;

        let candidate = self
            .read_envelope(BACKUP_KEY)
            .ok()
            .flatten()
            .map(|envelope| envelope.content)
            .or_else(|| {
                self.stored_conflicts()
                    .ok()
                    .and_then(|conflicts| conflicts.last().map(|c| c.remote_content.clone()))
            })
            .unwrap_or_else(|| local.clone());

        let result = self.save_content(
            candidate,
            SaveOptions {
                skip_validation: true,
                create_backup: false,
                force: true,
            },
        );
        if result.success {
            info!("recovery save succeeded");
            self.notify_sync(&SyncEvent::Recovered);
        } else {
            warn!(error = ?result.error, "recovery save failed");
        }

        self.recovering = false;
    }

    /// Refreshes the backup slot when the periodic interval has elapsed.
    /// The host calls this from its own loop.
    pub fn tick(&mut self) -> EditorResult<bool> {
        if !self.backup_scheduler.tick() {
            return Ok(false);
        }
        self.create_backup()?;
        debug!("periodic backup refreshed");
        Ok(true)
    }

    /// Ingests a raw envelope observed through a storage event from another
    /// tab. Malformed payloads and own-session echoes are logged and
    /// swallowed.
    pub fn handle_external_change(&mut self, raw: &str) {
        let envelope: StoredEnvelope = match serde_json::from_str(raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(error = %err, "ignoring malformed external change payload");
                return;
            }
        };
        if envelope.session_id == self.session_id {
            return;
        }
        self.last_external_timestamp = Some(envelope.timestamp);
        debug!(session = %envelope.session_id, "external change ingested");
        self.notify_external(&envelope.content);
    }

    /// Marks the session offline. Local persistence keeps working; only the
    /// flag flips.
    pub fn handle_offline(&mut self) {
        self.is_online = false;
        info!("connectivity lost, continuing on local persistence");
    }

    /// Marks the session online again and performs a one-shot reconciliation
    /// read, republishing the stored content if another session wrote it.
    pub fn handle_online(&mut self) -> Option<EditorContent> {
        self.is_online = true;
        self.last_external_timestamp = None;
        match self.check_external_changes() {
            Ok(update) => update,
            Err(err) => {
                warn!(error = %err, "reconciliation read failed");
                None
            }
        }
    }

    /// Polls for content written by another session and notifies external
    /// change listeners once per observed write.
    pub fn check_external_changes(&mut self) -> EditorResult<Option<EditorContent>> {
        let Some(envelope) = self.read_envelope(CONTENT_KEY)? else {
            return Ok(None);
        };
        if envelope.session_id == self.session_id
            || self.last_external_timestamp == Some(envelope.timestamp)
        {
            return Ok(None);
        }
        self.last_external_timestamp = Some(envelope.timestamp);
        debug!(session = %envelope.session_id, "external content change observed");
        self.notify_external(&envelope.content);
        Ok(Some(envelope.content))
    }

    /// Storage health snapshot.
    pub fn get_storage_info(&self) -> EditorResult<StorageInfo> {
        let conflict_count = self.stored_conflicts()?.len();
        Ok(StorageInfo {
            used_bytes: self.store.used_bytes()?,
            has_content: self.store.get(CONTENT_KEY)?.is_some(),
            has_backup: self.store.get(BACKUP_KEY)?.is_some(),
            has_conflicts: conflict_count > 0,
            conflict_count,
            session_id: self.session_id.clone(),
            last_sync: self.last_sync,
            is_online: self.is_online,
            sync_in_progress: self.sync_in_progress,
        })
    }

    /// Removes everything this manager persisted: content, backup, and the
    /// conflict list.
    pub fn clear_storage(&mut self) -> EditorResult<()> {
        self.store.remove(CONTENT_KEY)?;
        self.store.remove(BACKUP_KEY)?;
        self.store.remove(CONFLICTS_KEY)?;
        self.last_sync = None;
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::model::{
        BlockNode, DocumentMetadata, DocumentNode, EditorContent, InlineNode,
    };
    use crate::sync::store::{MemoryStore, NullStore};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn content(text: &str, version: u64, modified_at: i64) -> EditorContent {
        let mut doc = DocumentNode::new();
        doc.children
            .push(BlockNode::paragraph(vec![InlineNode::text(text)]));
        let metadata = DocumentMetadata {
            version,
            modified_at,
            created_at: modified_at,
            ..Default::default()
        };
        EditorContent::from_document(doc, metadata)
    }

    fn fresh_content(text: &str) -> EditorContent {
        content(text, 1, now_ms())
    }

    fn with_backup() -> SaveOptions {
        SaveOptions {
            create_backup: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_checksum_shape_and_stability() {
        assert_eq!(generate_checksum(""), "0");
        let a = generate_checksum("<p>a</p>");
        assert_eq!(a, generate_checksum("<p>a</p>"));
        assert_ne!(a, generate_checksum("<p>b</p>"));
        // Negative hashes render with a sign like the stored historical values.
        let long = "x".repeat(200);
        let rendered = generate_checksum(&long);
        assert!(rendered.chars().all(|c| c == '-' || c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let mut manager = StateSyncManager::new(MemoryStore::new());
        let snapshot = fresh_content("hello");
        let saved = manager.save_content(snapshot.clone(), SaveOptions::default());
        assert!(saved.success);
        assert!(manager.last_sync_timestamp().is_some());

        let loaded = manager.load_content();
        assert!(loaded.success);
        assert_eq!(loaded.source, LoadSource::Primary);
        assert_eq!(loaded.content.expect("content"), snapshot);
    }

    #[test]
    fn test_load_empty_store_is_successful_none() {
        let mut manager = StateSyncManager::new(MemoryStore::new());
        let loaded = manager.load_content();
        assert!(loaded.success);
        assert_eq!(loaded.content, None);
        assert_eq!(loaded.source, LoadSource::Empty);
    }

    #[test]
    fn test_envelope_fields_are_camel_case() {
        let store = MemoryStore::new();
        let mut manager = StateSyncManager::new(store.clone());
        manager.save_content(fresh_content("x"), SaveOptions::default());
        let raw = store.get(CONTENT_KEY).expect("get").expect("stored");
        assert!(raw.contains("\"sessionId\""));
        assert!(raw.contains("\"checksum\""));
        assert!(raw.contains("\"timestamp\""));
    }

    #[test]
    fn test_corrupted_envelope_falls_back_to_backup() {
        let store = MemoryStore::new();
        let mut manager = StateSyncManager::new(store.clone());
        manager.save_content(fresh_content("first"), SaveOptions::default());
        // Requested snapshot copies the first envelope into the backup slot.
        manager.save_content(content("second", 2, now_ms()), with_backup());

        let mut raw_store = store.clone();
        raw_store.set(CONTENT_KEY, "{not json").expect("corrupt");

        let loaded = manager.load_content();
        assert!(loaded.success);
        assert_eq!(loaded.source, LoadSource::Backup);
        assert_eq!(loaded.content.expect("content").plain_text, "first");
    }

    #[test]
    fn test_checksum_mismatch_falls_back_to_backup() {
        let store = MemoryStore::new();
        let mut manager = StateSyncManager::new(store.clone());
        manager.save_content(fresh_content("first"), SaveOptions::default());
        manager.save_content(content("second", 2, now_ms()), with_backup());

        // Tamper with the payload without updating the checksum.
        let raw = store.get(CONTENT_KEY).expect("get").expect("stored");
        let tampered = raw.replace("second", "edited");
        let mut raw_store = store.clone();
        raw_store.set(CONTENT_KEY, &tampered).expect("tamper");

        let loaded = manager.load_content();
        assert!(loaded.success);
        assert_eq!(loaded.source, LoadSource::Backup);
        assert_eq!(loaded.content.expect("content").plain_text, "first");
    }

    #[test]
    fn test_no_backup_and_broken_primary_fails() {
        let store = MemoryStore::new();
        let mut raw_store = store.clone();
        raw_store.set(CONTENT_KEY, "{not json").expect("corrupt");

        let mut manager = StateSyncManager::new(store);
        let loaded = manager.load_content();
        assert!(!loaded.success);
        assert_eq!(loaded.source, LoadSource::Unavailable);
    }

    #[test]
    fn test_invalid_payload_is_repaired_and_repersisted() {
        let store = MemoryStore::new();
        let mut manager = StateSyncManager::new(store.clone());

        // An envelope whose checksum is intact but whose payload is missing
        // required fields.
        let broken = EditorContent {
            html: "<p>salvage me</p>".to_string(),
            ..Default::default()
        };
        let envelope = StoredEnvelope {
            checksum: generate_checksum(&broken.html),
            timestamp: now_ms(),
            version: broken.version(),
            session_id: manager.session_id().to_string(),
            content: broken,
        };
        let mut raw_store = store.clone();
        raw_store
            .set(CONTENT_KEY, &serde_json::to_string(&envelope).expect("json"))
            .expect("seed");

        let loaded = manager.load_content();
        assert!(loaded.success);
        assert_eq!(loaded.source, LoadSource::Repaired);
        let repaired = loaded.content.expect("content");
        assert_eq!(repaired.plain_text, "salvage me");
        assert!(repaired.document.is_some());

        // The repair was persisted; the next load is a clean primary load.
        let loaded = manager.load_content();
        assert_eq!(loaded.source, LoadSource::Primary);
    }

    #[test]
    fn test_version_conflict_detected_and_stored() {
        let store = MemoryStore::new();
        let mut other = StateSyncManager::new(store.clone());
        other.save_content(content("theirs", 5, now_ms()), SaveOptions::default());

        let mut manager = StateSyncManager::new(store);
        let result = manager.save_content(content("mine", 3, now_ms()), SaveOptions::default());
        assert!(!result.success);
        assert_eq!(result.conflict, Some(ConflictKind::Version));

        let conflicts = manager.stored_conflicts().expect("conflicts");
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].kind, ConflictKind::Version);
        assert_eq!(conflicts[0].local_content.plain_text, "mine");
        assert_eq!(conflicts[0].remote_content.plain_text, "theirs");

        // The rejected save did not overwrite the stored envelope.
        let loaded = manager.load_content();
        assert_eq!(loaded.content.expect("content").plain_text, "theirs");
    }

    #[test]
    fn test_timestamp_conflict_when_local_is_stale() {
        let store = MemoryStore::new();
        let mut other = StateSyncManager::new(store.clone());
        other.save_content(content("newer", 1, now_ms()), SaveOptions::default());

        let mut manager = StateSyncManager::new(store);
        let stale = content("older", 1, now_ms() - 10_000);
        let result = manager.save_content(stale, SaveOptions::default());
        assert_eq!(result.conflict, Some(ConflictKind::Timestamp));
    }

    #[test]
    fn test_rewritten_envelope_does_not_stale_newer_saves() {
        let mut manager = StateSyncManager::new(MemoryStore::new());
        // An envelope re-written well after its content was last modified,
        // as a conflict resolution or a repair re-save produces.
        let settled = manager.save_content(
            content("settled", 3, now_ms() - 60_000),
            SaveOptions {
                skip_validation: true,
                create_backup: false,
                force: true,
            },
        );
        assert!(settled.success);

        // A follow-up that is strictly newer than the stored content must
        // not be rejected just because the envelope write time is recent.
        let result = manager.save_content(
            content("follow-up", 4, now_ms() - 50_000),
            SaveOptions::default(),
        );
        assert_eq!(result.conflict, None);
        assert!(result.success);
    }

    #[test]
    fn test_concurrent_conflict_within_window() {
        let store = MemoryStore::new();
        let mut other = StateSyncManager::new(store.clone());
        other.save_content(content("theirs", 1, now_ms()), SaveOptions::default());

        let mut manager = StateSyncManager::new(store);
        let result = manager.save_content(content("mine", 1, now_ms()), SaveOptions::default());
        assert_eq!(result.conflict, Some(ConflictKind::Concurrent));
    }

    #[test]
    fn test_concurrent_conflict_expires_outside_window() {
        let store = MemoryStore::new();
        let mut other = StateSyncManager::new(store.clone());
        other.save_content(content("theirs", 1, now_ms()), SaveOptions::default());

        // Backdate the stored write so it falls outside the concurrency
        // window while staying inside the timestamp skew threshold locally.
        let raw = store.get(CONTENT_KEY).expect("get").expect("stored");
        let mut envelope: StoredEnvelope = serde_json::from_str(&raw).expect("parse");
        envelope.timestamp -= CONCURRENT_WINDOW_MS + 1_000;
        let mut raw_store = store.clone();
        raw_store
            .set(CONTENT_KEY, &serde_json::to_string(&envelope).expect("json"))
            .expect("backdate");

        let mut manager = StateSyncManager::new(store);
        let result = manager.save_content(content("mine", 2, now_ms()), SaveOptions::default());
        assert!(result.success);
        assert_eq!(result.conflict, None);
    }

    #[test]
    fn test_same_session_sequential_saves_do_not_conflict() {
        let mut manager = StateSyncManager::new(MemoryStore::new());
        assert!(manager
            .save_content(content("v1", 1, now_ms()), SaveOptions::default())
            .success);
        assert!(manager
            .save_content(content("v2", 2, now_ms()), SaveOptions::default())
            .success);
    }

    #[test]
    fn test_conflict_list_is_bounded() {
        let store = MemoryStore::new();
        let mut other = StateSyncManager::new(store.clone());
        other.save_content(content("theirs", 100, now_ms()), SaveOptions::default());

        let mut manager = StateSyncManager::new(store);
        for i in 0..MAX_STORED_CONFLICTS + 5 {
            let result =
                manager.save_content(content(&format!("mine-{}", i), 1, now_ms()), SaveOptions::default());
            assert_eq!(result.conflict, Some(ConflictKind::Version));
        }
        let conflicts = manager.stored_conflicts().expect("conflicts");
        assert_eq!(conflicts.len(), MAX_STORED_CONFLICTS);
        // Oldest records were dropped; the newest survives at the tail.
        assert_eq!(
            conflicts.last().expect("tail").local_content.plain_text,
            format!("mine-{}", MAX_STORED_CONFLICTS + 4)
        );
    }

    #[test]
    fn test_resolve_conflict_with_local_side() {
        let store = MemoryStore::new();
        let mut other = StateSyncManager::new(store.clone());
        other.save_content(content("theirs", 5, now_ms()), SaveOptions::default());

        let mut manager = StateSyncManager::new(store);
        manager.save_content(content("mine", 3, now_ms()), SaveOptions::default());
        assert_eq!(manager.stored_conflicts().expect("conflicts").len(), 1);

        let result = manager.resolve_conflict(0, true);
        assert!(result.success);
        assert_eq!(manager.stored_conflicts().expect("conflicts").len(), 0);

        let loaded = manager.load_content();
        assert_eq!(loaded.content.expect("content").plain_text, "mine");
    }

    #[test]
    fn test_resolve_conflict_with_remote_side_keeps_stored() {
        let store = MemoryStore::new();
        let mut other = StateSyncManager::new(store.clone());
        other.save_content(content("theirs", 5, now_ms()), SaveOptions::default());

        let mut manager = StateSyncManager::new(store);
        manager.save_content(content("mine", 3, now_ms()), SaveOptions::default());

        let result = manager.resolve_conflict(0, false);
        assert!(result.success);
        let loaded = manager.load_content();
        assert_eq!(loaded.content.expect("content").plain_text, "theirs");
    }

    #[test]
    fn test_resolve_conflict_out_of_range() {
        let mut manager = StateSyncManager::new(MemoryStore::new());
        let result = manager.resolve_conflict(7, true);
        assert!(!result.success);
        assert!(result.error.is_some());
    }

    #[test]
    fn test_deferred_save_drains_after_in_flight_one() {
        let mut manager = StateSyncManager::new(MemoryStore::new());

        manager.sync_in_progress = true;
        let deferred = manager.save_content(content("queued-1", 4, now_ms()), SaveOptions::default());
        assert!(deferred.deferred);
        assert_eq!(
            deferred.error.as_deref(),
            Some("Sync in progress, content queued")
        );
        // A later deferred save replaces the earlier one: latest wins.
        let deferred = manager.save_content(content("queued-2", 5, now_ms()), SaveOptions::default());
        assert!(deferred.deferred);
        manager.sync_in_progress = false;

        let result = manager.save_content(content("direct", 3, now_ms()), SaveOptions::default());
        assert!(result.success);

        // The pending slot drained after the direct save finished.
        let loaded = manager.load_content();
        assert_eq!(loaded.content.expect("content").plain_text, "queued-2");
        assert!(manager.pending_save.is_none());
    }

    #[test]
    fn test_forced_save_bypasses_in_progress_guard() {
        let mut manager = StateSyncManager::new(MemoryStore::new());
        manager.sync_in_progress = true;
        let result = manager.save_content(
            fresh_content("forced"),
            SaveOptions {
                force: true,
                ..Default::default()
            },
        );
        assert!(result.success);
    }

    #[test]
    fn test_save_failure_triggers_bounded_recovery() {
        // A store too small for any envelope makes every save fail; the
        // recovery path must terminate instead of recursing.
        let mut manager = StateSyncManager::new(MemoryStore::with_capacity(16));
        let result = manager.save_content(fresh_content("too big"), SaveOptions::default());
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Storage quota exceeded"));
        assert!(!manager.recovering);
    }

    #[test]
    fn test_null_store_save_fails_gracefully() {
        let mut manager = StateSyncManager::new(NullStore);
        let result = manager.save_content(fresh_content("x"), SaveOptions::default());
        assert!(!result.success);
        assert!(result
            .error
            .as_deref()
            .is_some_and(|e| e.contains("Storage unavailable")));
    }

    #[test]
    fn test_sync_listeners_receive_events() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        let mut manager = StateSyncManager::new(MemoryStore::new());
        let id = manager.add_sync_listener(move |event| sink.borrow_mut().push(event.clone()));

        manager.save_content(fresh_content("x"), SaveOptions::default());
        {
            let events = events.borrow();
            assert_eq!(events.len(), 1);
            match &events[0] {
                SyncEvent::Saved {
                    content, version, ..
                } => {
                    // Listeners get the persisted content itself.
                    assert_eq!(content.plain_text, "x");
                    assert_eq!(*version, 1);
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }

        assert!(manager.remove_sync_listener(id));
        manager.save_content(content("y", 2, now_ms()), SaveOptions::default());
        assert_eq!(events.borrow().len(), 1);
    }

    #[test]
    fn test_panicking_sync_listener_does_not_block_others() {
        let called = Rc::new(RefCell::new(false));
        let sink = Rc::clone(&called);
        let mut manager = StateSyncManager::new(MemoryStore::new());
        manager.add_sync_listener(|_| panic!("bad subscriber"));
        manager.add_sync_listener(move |_| *sink.borrow_mut() = true);

        let result = manager.save_content(fresh_content("x"), SaveOptions::default());
        assert!(result.success);
        assert!(*called.borrow());
    }

    #[test]
    fn test_external_change_observed_once_per_write() {
        let store = MemoryStore::new();
        let mut writer = StateSyncManager::new(store.clone());
        let mut observer = StateSyncManager::new(store);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        observer.add_external_change_listener(move |content| {
            sink.borrow_mut().push(content.plain_text.clone());
        });

        assert_eq!(observer.check_external_changes().expect("poll"), None);

        writer.save_content(fresh_content("from other tab"), SaveOptions::default());
        let update = observer.check_external_changes().expect("poll");
        assert_eq!(update.expect("update").plain_text, "from other tab");
        // The same write is not reported twice.
        assert_eq!(observer.check_external_changes().expect("poll"), None);
        assert_eq!(*seen.borrow(), vec!["from other tab".to_string()]);
    }

    #[test]
    fn test_own_writes_are_not_external_changes() {
        let mut manager = StateSyncManager::new(MemoryStore::new());
        manager.save_content(fresh_content("mine"), SaveOptions::default());
        assert_eq!(manager.check_external_changes().expect("poll"), None);
    }

    #[test]
    fn test_storage_info() {
        let mut manager = StateSyncManager::new(MemoryStore::new());
        let info = manager.get_storage_info().expect("info");
        assert!(!info.has_content);
        assert!(!info.has_backup);
        assert!(!info.has_conflicts);
        assert_eq!(info.conflict_count, 0);
        assert_eq!(info.last_sync, None);
        assert!(info.is_online);
        assert!(!info.sync_in_progress);

        manager.save_content(fresh_content("x"), SaveOptions::default());
        manager.save_content(content("y", 2, now_ms()), with_backup());
        let info = manager.get_storage_info().expect("info");
        assert!(info.has_content);
        assert!(info.has_backup);
        assert!(info.used_bytes > 0);
        assert!(info.last_sync.is_some());
        assert!(info.session_id.starts_with("session-"));
    }

    #[test]
    fn test_conflict_handlers_receive_full_record() {
        let store = MemoryStore::new();
        let mut other = StateSyncManager::new(store.clone());
        other.save_content(content("theirs", 5, now_ms()), SaveOptions::default());

        let mut manager = StateSyncManager::new(store);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let id = manager.add_conflict_handler(move |record| {
            sink.borrow_mut()
                .push((record.kind, record.remote_content.plain_text.clone()));
        });

        manager.save_content(content("mine", 3, now_ms()), SaveOptions::default());
        assert_eq!(
            *seen.borrow(),
            vec![(ConflictKind::Version, "theirs".to_string())]
        );

        assert!(manager.remove_conflict_handler(id));
        manager.save_content(content("mine-2", 3, now_ms()), SaveOptions::default());
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn test_handle_external_change_ingests_foreign_envelopes() {
        let mut manager = StateSyncManager::new(MemoryStore::new());
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        manager.add_external_change_listener(move |content| {
            sink.borrow_mut().push(content.plain_text.clone());
        });

        let foreign = fresh_content("from elsewhere");
        let envelope = StoredEnvelope {
            checksum: generate_checksum(&foreign.html),
            timestamp: now_ms(),
            version: 1,
            session_id: "session-elsewhere".to_string(),
            content: foreign,
        };
        manager.handle_external_change(&serde_json::to_string(&envelope).expect("json"));
        assert_eq!(*seen.borrow(), vec!["from elsewhere".to_string()]);

        // Malformed payloads are swallowed, own-session echoes ignored.
        manager.handle_external_change("{definitely not json");
        let mut echo = envelope;
        echo.session_id = manager.session_id().to_string();
        manager.handle_external_change(&serde_json::to_string(&echo).expect("json"));
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn test_offline_does_not_block_local_saves() {
        let mut manager = StateSyncManager::new(MemoryStore::new());
        manager.handle_offline();
        assert!(!manager.is_online());
        let result = manager.save_content(fresh_content("offline edit"), SaveOptions::default());
        assert!(result.success);
    }

    #[test]
    fn test_handle_online_republishes_foreign_write() {
        let store = MemoryStore::new();
        let mut observer = StateSyncManager::new(store.clone());
        observer.handle_offline();

        let mut writer = StateSyncManager::new(store);
        writer.save_content(fresh_content("written while away"), SaveOptions::default());

        let update = observer.handle_online();
        assert!(observer.is_online());
        assert_eq!(update.expect("update").plain_text, "written while away");
    }

    #[test]
    fn test_backup_refreshed_only_on_request() {
        let store = MemoryStore::new();
        let mut manager = StateSyncManager::new(store.clone());
        manager.save_content(fresh_content("x"), SaveOptions::default());
        manager.save_content(content("y", 2, now_ms()), SaveOptions::default());
        assert!(store.get(BACKUP_KEY).expect("get").is_none());

        // A requested snapshot preserves the envelope being overwritten.
        manager.save_content(content("z", 3, now_ms()), with_backup());
        let raw = store.get(BACKUP_KEY).expect("get").expect("backup");
        let backup: StoredEnvelope = serde_json::from_str(&raw).expect("parse");
        assert_eq!(backup.content.plain_text, "y");
    }

    #[test]
    fn test_tick_refreshes_backup_when_due() {
        let mut manager = StateSyncManager::new(MemoryStore::new());
        manager.save_content(fresh_content("x"), SaveOptions::default());
        assert!(!manager.get_storage_info().expect("info").has_backup);

        // First tick after construction is always due.
        assert!(manager.tick().expect("tick"));
        assert!(manager.get_storage_info().expect("info").has_backup);
        // Default interval has not elapsed yet.
        assert!(!manager.tick().expect("tick"));
    }

    #[test]
    fn test_tampered_backup_is_rejected() {
        let store = MemoryStore::new();
        let mut manager = StateSyncManager::new(store.clone());
        manager.save_content(fresh_content("first"), SaveOptions::default());
        manager.save_content(content("second", 2, now_ms()), with_backup());

        let mut raw_store = store.clone();
        raw_store.set(CONTENT_KEY, "{not json").expect("corrupt primary");
        let backup = store.get(BACKUP_KEY).expect("get").expect("backup");
        raw_store
            .set(BACKUP_KEY, &backup.replace("first", "fiddled"))
            .expect("tamper backup");

        let loaded = manager.load_content();
        assert!(!loaded.success);
        assert_eq!(loaded.source, LoadSource::Unavailable);
    }

    #[test]
    fn test_clear_storage_removes_everything() {
        let store = MemoryStore::new();
        let mut other = StateSyncManager::new(store.clone());
        other.save_content(content("theirs", 5, now_ms()), SaveOptions::default());

        let mut manager = StateSyncManager::new(store);
        manager.save_content(content("mine", 3, now_ms()), SaveOptions::default());
        manager.clear_storage().expect("clear");

        let info = manager.get_storage_info().expect("info");
        assert!(!info.has_content);
        assert!(!info.has_backup);
        assert_eq!(info.conflict_count, 0);
        assert_eq!(info.last_sync, None);
        assert!(manager.load_content().success);
    }
}
