//! Error types for the editor persistence engine.

use thiserror::Error;

/// Result type alias for editor operations.
pub type EditorResult<T> = Result<T, EditorError>;

/// Errors that can occur during editor persistence and mutation operations.
///
/// Public manager APIs never propagate these directly; they are converted to
/// `error` strings on the discriminated result objects at the API boundary.
#[derive(Error, Debug)]
pub enum EditorError {
    /// No live editor view is attached to the content operations manager.
    #[error("Editor view not available")]
    ViewNotAvailable,

    /// A replace operation was requested without a usable selection.
    #[error("No selection to replace")]
    NoSelection,

    /// A formatting command was issued without an active selection.
    #[error("No selection")]
    SelectionRequired,

    /// Either the view or the content-change handler is missing.
    #[error("Editor view or change handler not available")]
    ChangeHandlerNotAvailable,

    /// A command payload is missing a required field.
    #[error("{0} is required")]
    MissingPayload(&'static str),

    /// A command name did not resolve to a known command type.
    #[error("Unknown command type: {0}")]
    UnknownCommand(String),

    /// Undo was requested with an empty undo stack.
    #[error("Nothing to undo")]
    NothingToUndo,

    /// Redo was requested with an empty redo stack.
    #[error("Nothing to redo")]
    NothingToRedo,

    /// A selection endpoint referenced a block id not present in the tree.
    #[error("Block not found: {0}")]
    BlockNotFound(String),

    /// An HTML payload could not be parsed into a document fragment.
    #[error("Invalid HTML fragment: {0}")]
    InvalidFragment(String),

    /// The persistent store rejected a write because the quota is exhausted.
    #[error("Storage quota exceeded")]
    QuotaExceeded,

    /// The persistent store is disabled or otherwise unusable.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A stored envelope failed its integrity check.
    #[error("Checksum mismatch: stored {stored}, computed {computed}")]
    ChecksumMismatch { stored: String, computed: String },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EditorError {
    /// Creates a BlockNotFound error.
    pub fn block_not_found(id: impl Into<String>) -> Self {
        Self::BlockNotFound(id.into())
    }

    /// Creates an InvalidFragment error.
    pub fn invalid_fragment(msg: impl Into<String>) -> Self {
        Self::InvalidFragment(msg.into())
    }

    /// Creates an UnknownCommand error.
    pub fn unknown_command(name: impl Into<String>) -> Self {
        Self::UnknownCommand(name.into())
    }

    /// Creates a StorageUnavailable error.
    pub fn storage_unavailable(msg: impl Into<String>) -> Self {
        Self::StorageUnavailable(msg.into())
    }
}
