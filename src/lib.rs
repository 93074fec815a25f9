//! draftsync: persistence and conflict resolution for a browser-based
//! document editor.
//!
//! The crate has four layers:
//!
//! - [`document`] — the block/inline document tree, its HTML and plain-text
//!   projections, and structural edits over character ranges.
//! - [`command`] — named editor commands (formatting, lists, undo/redo)
//!   executed against an [`EditorState`](command::EditorState) with bounded,
//!   groupable undo history.
//! - [`content`] — queued programmatic HTML mutations: one operation at a
//!   time against the live view, with sanitization and change fan-out.
//! - [`sync`] — checksum-verified save/load of content envelopes with a
//!   three-class conflict taxonomy (version, timestamp, concurrent), backup
//!   and repair recovery, and cross-session change signals.
//!
//! The engine owns no timers and spawns no threads; the host drives queue
//! draining and backup scheduling from its own loop.
//!
//! ```
//! use draftsync::command::EditorState;
//! use draftsync::content::ContentOperationsManager;
//! use draftsync::document::model::DocumentNode;
//! use draftsync::sync::{MemoryStore, SaveOptions, StateSyncManager};
//!
//! let mut ops = ContentOperationsManager::new();
//! ops.attach_view(EditorState::new(DocumentNode::with_empty_paragraph()));
//! assert!(ops.insert_content_at_cursor("<p>Hello</p>").success);
//!
//! let content = ops.view().expect("view").to_content();
//! let mut sync = StateSyncManager::new(MemoryStore::new());
//! assert!(sync.save_content(content, SaveOptions::default()).success);
//! assert!(sync.load_content().content.is_some());
//! ```

pub mod command;
pub mod content;
pub mod document;
pub mod error;
pub mod sync;

pub use command::{CommandPayload, CommandResult, CommandType, EditorState};
pub use content::{ChangeOrigin, ContentOperationsManager, OperationResult};
pub use document::{DocumentMetadata, DocumentNode, EditorContent, Position, Selection};
pub use error::{EditorError, EditorResult};
pub use sync::{
    ConflictKind, KeyValueStore, LoadResult, MemoryStore, NullStore, SaveOptions, SaveResult,
    StateSyncManager,
};
