//! Named commands, the editor state they run against, and undo history.

pub mod executor;
pub mod history;

pub use executor::{CommandPayload, CommandResult, CommandType, EditorState};
pub use history::{History, Snapshot, DEFAULT_HISTORY_DEPTH};
