//! Named editor commands and the state they execute against.
//!
//! Commands validate their payload and resolve the selection before touching
//! the tree, so a failed command is a strict no-op. Every accepted mutation
//! records a pre-edit history snapshot and bumps the document version.

use tracing::debug;

use crate::command::history::{History, Snapshot};
use crate::document::edit::{self, ResolvedRange};
use crate::document::model::{
    now_ms, Alignment, BlockKind, DocumentMetadata, DocumentNode, EditorContent, ListKind,
    MarkKind, Selection, TextMark,
};
use crate::error::{EditorError, EditorResult};

// =============================================================================
// COMMAND TYPES
// =============================================================================

/// The closed set of editor commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandType {
    ToggleBold,
    ToggleItalic,
    ToggleUnderline,
    ToggleStrike,
    SetTextColor,
    SetBackgroundColor,
    SetFontSize,
    ToggleBulletList,
    ToggleOrderedList,
    SetParagraphSpacing,
    SetAlignment,
    Undo,
    Redo,
}

impl CommandType {
    /// Resolves a wire-format command name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "TOGGLE_BOLD" => Some(Self::ToggleBold),
            "TOGGLE_ITALIC" => Some(Self::ToggleItalic),
            "TOGGLE_UNDERLINE" => Some(Self::ToggleUnderline),
            "TOGGLE_STRIKE" => Some(Self::ToggleStrike),
            "SET_TEXT_COLOR" => Some(Self::SetTextColor),
            "SET_BACKGROUND_COLOR" => Some(Self::SetBackgroundColor),
            "SET_FONT_SIZE" => Some(Self::SetFontSize),
            "TOGGLE_BULLET_LIST" => Some(Self::ToggleBulletList),
            "TOGGLE_ORDERED_LIST" => Some(Self::ToggleOrderedList),
            "SET_PARAGRAPH_SPACING" => Some(Self::SetParagraphSpacing),
            "SET_ALIGNMENT" => Some(Self::SetAlignment),
            "UNDO" => Some(Self::Undo),
            "REDO" => Some(Self::Redo),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ToggleBold => "TOGGLE_BOLD",
            Self::ToggleItalic => "TOGGLE_ITALIC",
            Self::ToggleUnderline => "TOGGLE_UNDERLINE",
            Self::ToggleStrike => "TOGGLE_STRIKE",
            Self::SetTextColor => "SET_TEXT_COLOR",
            Self::SetBackgroundColor => "SET_BACKGROUND_COLOR",
            Self::SetFontSize => "SET_FONT_SIZE",
            Self::ToggleBulletList => "TOGGLE_BULLET_LIST",
            Self::ToggleOrderedList => "TOGGLE_ORDERED_LIST",
            Self::SetParagraphSpacing => "SET_PARAGRAPH_SPACING",
            Self::SetAlignment => "SET_ALIGNMENT",
            Self::Undo => "UNDO",
            Self::Redo => "REDO",
        }
    }
}

/// Optional arguments carried by a command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandPayload {
    pub color: Option<String>,
    pub font_size: Option<f32>,
    pub spacing: Option<f32>,
    pub alignment: Option<Alignment>,
    /// Edits sharing a group id coalesce into one undo step.
    pub group_id: Option<String>,
}

impl CommandPayload {
    pub fn with_color(color: impl Into<String>) -> Self {
        Self {
            color: Some(color.into()),
            ..Default::default()
        }
    }
}

/// Discriminated command outcome surfaced at the API boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResult {
    pub success: bool,
    pub error: Option<String>,
}

impl CommandResult {
    fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    fn failed(error: &EditorError) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
        }
    }
}

// =============================================================================
// EDITOR STATE
// =============================================================================

/// The live editor state commands execute against: the tree, the current
/// selection, the metadata envelope, and the undo history.
#[derive(Debug)]
pub struct EditorState {
    pub document: DocumentNode,
    pub selection: Option<Selection>,
    pub metadata: DocumentMetadata,
    history: History,
}

impl EditorState {
    pub fn new(document: DocumentNode) -> Self {
        Self {
            document,
            selection: None,
            metadata: DocumentMetadata::default(),
            history: History::new(),
        }
    }

    /// Rebuilds editor state from a loaded content snapshot. Missing pieces
    /// come back as defaults; history starts empty.
    pub fn from_content(content: &EditorContent) -> Self {
        Self {
            document: content
                .document
                .clone()
                .unwrap_or_else(DocumentNode::with_empty_paragraph),
            selection: None,
            metadata: content.metadata.clone().unwrap_or_default(),
            history: History::new(),
        }
    }

    /// Projects the current state into a persistable content snapshot.
    pub fn to_content(&self) -> EditorContent {
        EditorContent::from_document(self.document.clone(), self.metadata.clone())
    }

    pub fn set_selection(&mut self, selection: Option<Selection>) {
        self.selection = selection;
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    /// Marks the document as mutated: version up, modification time now.
    pub fn bump_version(&mut self) {
        self.metadata.version += 1;
        self.metadata.modified_at = now_ms();
    }

    /// Records the pre-edit snapshot of an accepted mutation. The content
    /// operations manager also calls this for programmatic insertions.
    pub fn record_history(&mut self, group_id: Option<&str>) {
        self.history.record(
            Snapshot::new(self.document.clone(), self.selection.clone()),
            group_id,
        );
    }

    /// Dispatches a wire-format command name, converting errors to the
    /// discriminated result used at the API boundary.
    pub fn dispatch(&mut self, name: &str, payload: &CommandPayload) -> CommandResult {
        match self.execute_named(name, payload) {
            Ok(()) => CommandResult::ok(),
            Err(err) => {
                debug!(command = name, error = %err, "command rejected");
                CommandResult::failed(&err)
            }
        }
    }

    /// Resolves a command name and executes it.
    pub fn execute_named(&mut self, name: &str, payload: &CommandPayload) -> EditorResult<()> {
        let command =
            CommandType::from_name(name).ok_or_else(|| EditorError::unknown_command(name))?;
        self.execute(command, payload)
    }

    /// Executes one command. Validation happens before any mutation, so an
    /// error means the document and history are untouched.
    pub fn execute(&mut self, command: CommandType, payload: &CommandPayload) -> EditorResult<()> {
        match command {
            CommandType::Undo => return self.undo(),
            CommandType::Redo => return self.redo(),
            _ => {}
        }

        let selection = self.selection.clone().ok_or(EditorError::SelectionRequired)?;
        let range = edit::resolve_selection(&self.document, &selection)?;

        match command {
            CommandType::ToggleBold => self.toggle_mark(payload, &range, MarkKind::Bold),
            CommandType::ToggleItalic => self.toggle_mark(payload, &range, MarkKind::Italic),
            CommandType::ToggleUnderline => self.toggle_mark(payload, &range, MarkKind::Underline),
            CommandType::ToggleStrike => {
                self.toggle_mark(payload, &range, MarkKind::Strikethrough)
            }
            CommandType::SetTextColor => {
                let color = payload
                    .color
                    .clone()
                    .ok_or(EditorError::MissingPayload("Color"))?;
                self.set_mark(payload, &range, TextMark::with_attr(MarkKind::Color, "color", color));
            }
            CommandType::SetBackgroundColor => {
                let color = payload
                    .color
                    .clone()
                    .ok_or(EditorError::MissingPayload("Color"))?;
                self.set_mark(
                    payload,
                    &range,
                    TextMark::with_attr(MarkKind::Highlight, "color", color),
                );
            }
            CommandType::SetFontSize => {
                let size = payload
                    .font_size
                    .ok_or(EditorError::MissingPayload("Font size"))?;
                self.set_mark(
                    payload,
                    &range,
                    TextMark::with_attr(MarkKind::FontSize, "size", size as f64),
                );
            }
            CommandType::ToggleBulletList => self.toggle_list(payload, &range, ListKind::Bullet),
            CommandType::ToggleOrderedList => self.toggle_list(payload, &range, ListKind::Ordered),
            CommandType::SetParagraphSpacing => {
                let spacing = payload
                    .spacing
                    .ok_or(EditorError::MissingPayload("Spacing"))?;
                self.record_history(payload.group_id.as_deref());
                edit::for_each_block_in_range(&mut self.document, &range, |block| {
                    block.attributes.spacing = Some(spacing);
                });
            }
            CommandType::SetAlignment => {
                let alignment = payload
                    .alignment
                    .ok_or(EditorError::MissingPayload("Alignment"))?;
                self.record_history(payload.group_id.as_deref());
                edit::for_each_block_in_range(&mut self.document, &range, |block| {
                    block.attributes.alignment = Some(alignment);
                });
            }
            CommandType::Undo | CommandType::Redo => unreachable!("handled above"),
        }

        self.bump_version();
        debug!(command = command.name(), version = self.metadata.version, "command applied");
        Ok(())
    }

    fn toggle_mark(&mut self, payload: &CommandPayload, range: &ResolvedRange, kind: MarkKind) {
        self.record_history(payload.group_id.as_deref());
        edit::toggle_mark_in_range(&mut self.document, range, kind);
    }

    fn set_mark(&mut self, payload: &CommandPayload, range: &ResolvedRange, mark: TextMark) {
        self.record_history(payload.group_id.as_deref());
        edit::set_mark_in_range(&mut self.document, range, mark);
    }

    /// Converts covered blocks to a list of the given kind, or back to
    /// paragraphs when they all already are that list kind.
    fn toggle_list(&mut self, payload: &CommandPayload, range: &ResolvedRange, kind: ListKind) {
        self.record_history(payload.group_id.as_deref());
        let mut all_match = true;
        edit::for_each_block_in_range(&mut self.document, range, |block| {
            if block.kind != BlockKind::List || block.attributes.list_kind != Some(kind) {
                all_match = false;
            }
        });
        edit::for_each_block_in_range(&mut self.document, range, |block| {
            if all_match {
                block.kind = BlockKind::Paragraph;
                block.attributes.list_kind = None;
            } else {
                block.kind = BlockKind::List;
                block.attributes.list_kind = Some(kind);
            }
        });
    }

    fn undo(&mut self) -> EditorResult<()> {
        let current = Snapshot::new(self.document.clone(), self.selection.clone());
        let restored = self.history.undo(current).ok_or(EditorError::NothingToUndo)?;
        self.document = restored.document;
        self.selection = restored.selection;
        self.bump_version();
        Ok(())
    }

    fn redo(&mut self) -> EditorResult<()> {
        let current = Snapshot::new(self.document.clone(), self.selection.clone());
        let restored = self.history.redo(current).ok_or(EditorError::NothingToRedo)?;
        self.document = restored.document;
        self.selection = restored.selection;
        self.bump_version();
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::model::{BlockNode, InlineNode, Position};

    fn state_with_text(text: &str) -> EditorState {
        let mut doc = DocumentNode::new();
        doc.children
            .push(BlockNode::paragraph(vec![InlineNode::text(text)]));
        EditorState::new(doc)
    }

    fn select_all(state: &mut EditorState) {
        let block = &state.document.children[0];
        let selection = Selection::new(
            Position::new(block.id.clone(), 0),
            Position::new(block.id.clone(), block.text_len()),
        );
        state.set_selection(Some(selection));
    }

    #[test]
    fn test_toggle_bold_over_selection() {
        let mut state = state_with_text("hello");
        select_all(&mut state);
        let before = state.metadata.version;

        state
            .execute(CommandType::ToggleBold, &CommandPayload::default())
            .expect("execute");
        assert!(state.document.children[0].children[0].has_mark(MarkKind::Bold));
        assert_eq!(state.metadata.version, before + 1);
        assert!(state.can_undo());
    }

    #[test]
    fn test_set_text_color_requires_color() {
        let mut state = state_with_text("hello");
        select_all(&mut state);
        let result = state.dispatch("SET_TEXT_COLOR", &CommandPayload::default());
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Color is required"));
        // Failed command is a strict no-op.
        assert!(!state.can_undo());
        assert_eq!(state.metadata.version, 1);
    }

    #[test]
    fn test_set_text_color_applies_mark() {
        let mut state = state_with_text("hello");
        select_all(&mut state);
        let result = state.dispatch("SET_TEXT_COLOR", &CommandPayload::with_color("#ff0000"));
        assert!(result.success);
        let run = &state.document.children[0].children[0];
        assert!(run.has_mark(MarkKind::Color));
    }

    #[test]
    fn test_unknown_command_name() {
        let mut state = state_with_text("hello");
        let result = state.dispatch("MAKE_SPARKLY", &CommandPayload::default());
        assert!(!result.success);
        let error = result.error.expect("error message");
        assert!(error.contains("Unknown command type"));
        assert!(error.contains("MAKE_SPARKLY"));
    }

    #[test]
    fn test_undo_empty_history_fails_without_mutation() {
        let mut state = state_with_text("hello");
        let result = state.dispatch("UNDO", &CommandPayload::default());
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Nothing to undo"));

        let result = state.dispatch("REDO", &CommandPayload::default());
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Nothing to redo"));
    }

    #[test]
    fn test_undo_restores_document_and_bumps_version() {
        let mut state = state_with_text("hello");
        select_all(&mut state);
        state
            .execute(CommandType::ToggleBold, &CommandPayload::default())
            .expect("bold");
        let version_after_bold = state.metadata.version;

        state
            .execute(CommandType::Undo, &CommandPayload::default())
            .expect("undo");
        assert!(!state.document.children[0].children[0].has_mark(MarkKind::Bold));
        assert!(state.metadata.version > version_after_bold);
        assert!(state.can_redo());

        state
            .execute(CommandType::Redo, &CommandPayload::default())
            .expect("redo");
        assert!(state.document.children[0].children[0].has_mark(MarkKind::Bold));
    }

    #[test]
    fn test_command_without_selection_fails() {
        let mut state = state_with_text("hello");
        let result = state.execute(CommandType::ToggleBold, &CommandPayload::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_toggle_list_flips_back_to_paragraph() {
        let mut state = state_with_text("item");
        select_all(&mut state);
        state
            .execute(CommandType::ToggleBulletList, &CommandPayload::default())
            .expect("to list");
        assert_eq!(state.document.children[0].kind, BlockKind::List);
        assert_eq!(
            state.document.children[0].attributes.list_kind,
            Some(ListKind::Bullet)
        );

        select_all(&mut state);
        state
            .execute(CommandType::ToggleBulletList, &CommandPayload::default())
            .expect("back to paragraph");
        assert_eq!(state.document.children[0].kind, BlockKind::Paragraph);
        assert_eq!(state.document.children[0].attributes.list_kind, None);
    }

    #[test]
    fn test_ordered_list_over_bullet_list_switches_kind() {
        let mut state = state_with_text("item");
        select_all(&mut state);
        state
            .execute(CommandType::ToggleBulletList, &CommandPayload::default())
            .expect("bullet");
        select_all(&mut state);
        state
            .execute(CommandType::ToggleOrderedList, &CommandPayload::default())
            .expect("ordered");
        assert_eq!(
            state.document.children[0].attributes.list_kind,
            Some(ListKind::Ordered)
        );
    }

    #[test]
    fn test_set_alignment_and_spacing() {
        let mut state = state_with_text("text");
        select_all(&mut state);
        let payload = CommandPayload {
            alignment: Some(Alignment::Center),
            ..Default::default()
        };
        state
            .execute(CommandType::SetAlignment, &payload)
            .expect("align");
        assert_eq!(
            state.document.children[0].attributes.alignment,
            Some(Alignment::Center)
        );

        let result = state.dispatch("SET_PARAGRAPH_SPACING", &CommandPayload::default());
        assert_eq!(result.error.as_deref(), Some("Spacing is required"));
    }

    #[test]
    fn test_grouped_commands_undo_as_one_step() {
        let mut state = state_with_text("hello");
        let group = CommandPayload {
            group_id: Some("format-pass".to_string()),
            ..Default::default()
        };
        select_all(&mut state);
        state.execute(CommandType::ToggleBold, &group).expect("bold");
        select_all(&mut state);
        state.execute(CommandType::ToggleItalic, &group).expect("italic");

        state
            .execute(CommandType::Undo, &CommandPayload::default())
            .expect("undo");
        let run = &state.document.children[0].children[0];
        assert!(!run.has_mark(MarkKind::Bold));
        assert!(!run.has_mark(MarkKind::Italic));
        assert!(!state.can_undo());
    }
}
