//! Programmatic content operations against the live editor view.
//!
//! External callers (AI suggestions, templates) mutate the document through
//! this manager rather than touching the tree directly. One operation runs
//! at a time; submissions while one is in flight are queued FIFO and drained
//! by the host after a short delay, so a burst of programmatic writes cannot
//! interleave with each other or with the change notification fan-out.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::{debug, warn};

use crate::command::executor::EditorState;
use crate::document::edit;
use crate::document::html;
use crate::document::model::{BlockNode, EditorContent, Selection};
use crate::error::{EditorError, EditorResult};

/// Delay the host should wait before draining queued operations, in
/// milliseconds.
pub const QUEUE_DRAIN_DELAY_MS: u64 = 100;

/// The two programmatic mutation shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// Replace the current (non-collapsed) selection with parsed HTML.
    Replace,
    /// Insert parsed HTML at the caret, or at the end of the document when
    /// no selection exists.
    Insert,
}

/// Where a change notification originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    Programmatic,
    ForcedSync,
}

/// Discriminated operation outcome. `operation` identifies which mutation
/// produced the result, so drained results stay correlated with the
/// submissions that queued them; `state_changed` reports whether the view
/// was actually mutated (or, for a forced sync, re-published).
#[derive(Debug, Clone, PartialEq)]
pub struct OperationResult {
    pub success: bool,
    pub state_changed: bool,
    pub queued: bool,
    pub operation: Option<OperationKind>,
    pub error: Option<String>,
}

impl OperationResult {
    fn ok(operation: OperationKind) -> Self {
        Self {
            success: true,
            state_changed: true,
            queued: false,
            operation: Some(operation),
            error: None,
        }
    }

    fn synced() -> Self {
        Self {
            success: true,
            state_changed: true,
            queued: false,
            operation: None,
            error: None,
        }
    }

    fn queued(operation: OperationKind) -> Self {
        Self {
            success: false,
            state_changed: false,
            queued: true,
            operation: Some(operation),
            error: Some("Operation queued".to_string()),
        }
    }

    fn failed(operation: Option<OperationKind>, error: &EditorError) -> Self {
        Self {
            success: false,
            state_changed: false,
            queued: false,
            operation,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
struct PendingOperation {
    kind: OperationKind,
    html: String,
}

type ChangeHandler = Box<dyn FnMut(&EditorContent, ChangeOrigin)>;
type StateListener = Box<dyn Fn(bool)>;

/// Serializes programmatic HTML mutations against the attached editor view.
pub struct ContentOperationsManager {
    view: Option<EditorState>,
    on_content_change: Option<ChangeHandler>,
    state_listeners: Vec<(u64, StateListener)>,
    next_listener_id: u64,
    pending: VecDeque<PendingOperation>,
    operation_in_progress: bool,
}

impl Default for ContentOperationsManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentOperationsManager {
    pub fn new() -> Self {
        Self {
            view: None,
            on_content_change: None,
            state_listeners: Vec::new(),
            next_listener_id: 0,
            pending: VecDeque::new(),
            operation_in_progress: false,
        }
    }

    // -------------------------------------------------------------------------
    // Wiring
    // -------------------------------------------------------------------------

    /// Attaches the live editor view operations execute against.
    pub fn attach_view(&mut self, view: EditorState) {
        self.view = Some(view);
    }

    /// Detaches and returns the view; queued operations fail on drain until
    /// a view is attached again.
    pub fn detach_view(&mut self) -> Option<EditorState> {
        self.view.take()
    }

    pub fn view(&self) -> Option<&EditorState> {
        self.view.as_ref()
    }

    pub fn view_mut(&mut self) -> Option<&mut EditorState> {
        self.view.as_mut()
    }

    /// Sets the handler notified with the full content snapshot after every
    /// successful operation.
    pub fn set_content_change_handler<F>(&mut self, handler: F)
    where
        F: FnMut(&EditorContent, ChangeOrigin) + 'static,
    {
        self.on_content_change = Some(Box::new(handler));
    }

    pub fn clear_content_change_handler(&mut self) {
        self.on_content_change = None;
    }

    /// Registers a listener for the busy flag; returns its removal id.
    pub fn add_state_change_listener<F>(&mut self, listener: F) -> u64
    where
        F: Fn(bool) + 'static,
    {
        let id = self.next_listener_id;
        self.next_listener_id += 1;
        self.state_listeners.push((id, Box::new(listener)));
        id
    }

    pub fn remove_state_change_listener(&mut self, id: u64) -> bool {
        let before = self.state_listeners.len();
        self.state_listeners.retain(|(listener_id, _)| *listener_id != id);
        self.state_listeners.len() != before
    }

    // -------------------------------------------------------------------------
    // Operations
    // -------------------------------------------------------------------------

    /// Replaces the current selection with the given HTML. Queued when
    /// another operation is in flight.
    pub fn replace_selection_with_html(&mut self, html: &str) -> OperationResult {
        self.submit(OperationKind::Replace, html)
    }

    /// Inserts the given HTML at the caret (end of document when there is no
    /// selection). Queued when another operation is in flight.
    pub fn insert_content_at_cursor(&mut self, html: &str) -> OperationResult {
        self.submit(OperationKind::Insert, html)
    }

    /// Pushes the current editor content to the change handler immediately,
    /// bypassing the operation queue.
    pub fn force_sync_content(&mut self) -> OperationResult {
        if self.view.is_none() || self.on_content_change.is_none() {
            return OperationResult::failed(None, &EditorError::ChangeHandlerNotAvailable);
        }
        let content = match self.view.as_ref() {
            Some(view) => view.to_content(),
            None => return OperationResult::failed(None, &EditorError::ViewNotAvailable),
        };
        self.notify_content_change(&content, ChangeOrigin::ForcedSync);
        OperationResult::synced()
    }

    fn submit(&mut self, kind: OperationKind, html: &str) -> OperationResult {
        if self.operation_in_progress {
            debug!(?kind, pending = self.pending.len() + 1, "operation queued");
            self.pending.push_back(PendingOperation {
                kind,
                html: html.to_string(),
            });
            return OperationResult::queued(kind);
        }
        // The latch stays set until a drain step finds the queue empty, so
        // anything submitted before the host drains lands in the queue.
        self.operation_in_progress = true;
        self.perform(kind, html)
    }

    /// Runs one queued operation, or clears the in-flight latch when the
    /// queue is empty. The host calls this after [`QUEUE_DRAIN_DELAY_MS`].
    pub fn drain_step(&mut self) -> Option<OperationResult> {
        match self.pending.pop_front() {
            Some(op) => Some(self.perform(op.kind, &op.html)),
            None => {
                self.operation_in_progress = false;
                None
            }
        }
    }

    /// Drains the whole queue in submission order.
    pub fn drain_pending_operations(&mut self) -> Vec<OperationResult> {
        let mut results = Vec::new();
        while let Some(result) = self.drain_step() {
            results.push(result);
        }
        results
    }

    pub fn pending_operations_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_operation_in_progress(&self) -> bool {
        self.operation_in_progress
    }

    /// Drops queued operations without running them and clears the latch.
    pub fn clear_pending_operations(&mut self) {
        self.pending.clear();
        self.operation_in_progress = false;
    }

    // -------------------------------------------------------------------------
    // Execution
    // -------------------------------------------------------------------------

    fn perform(&mut self, kind: OperationKind, html: &str) -> OperationResult {
        match self.apply(kind, html) {
            Ok(content) => {
                self.notify_content_change(&content, ChangeOrigin::Programmatic);
                self.notify_state_listeners(true);
                OperationResult::ok(kind)
            }
            Err(err) => {
                warn!(?kind, error = %err, "content operation failed");
                OperationResult::failed(Some(kind), &err)
            }
        }
    }

    /// Validates, sanitizes, parses, and applies one operation. Any error
    /// before the mutation leaves the view untouched.
    fn apply(&mut self, kind: OperationKind, html: &str) -> EditorResult<EditorContent> {
        let view = self.view.as_mut().ok_or(EditorError::ViewNotAvailable)?;
        let clean = html::sanitize(html);
        let fragment = html::parse_fragment(&clean)?;

        match kind {
            OperationKind::Replace => {
                let selection = view.selection.clone().ok_or(EditorError::NoSelection)?;
                if selection.collapsed() {
                    return Err(EditorError::NoSelection);
                }
                let range = edit::resolve_selection(&view.document, &selection)?;
                view.record_history(None);
                let caret = edit::delete_range(&mut view.document, &range);
                let block_idx = view
                    .document
                    .block_index(&caret.block_id)
                    .ok_or_else(|| EditorError::block_not_found(&caret.block_id))?;
                let caret =
                    edit::insert_fragment(&mut view.document, block_idx, caret.offset, fragment);
                view.set_selection(Some(Selection::caret(caret)));
            }
            OperationKind::Insert => {
                let target = match view.selection.clone() {
                    Some(selection) => {
                        let range = edit::resolve_selection(&view.document, &selection)?;
                        Some((range.start_block, range.start_offset))
                    }
                    None => None,
                };
                view.record_history(None);
                let (block_idx, offset) = match target {
                    Some(point) => point,
                    None => {
                        if view.document.children.is_empty() {
                            view.document.children.push(BlockNode::paragraph(Vec::new()));
                        }
                        let idx = view.document.children.len() - 1;
                        (idx, view.document.children[idx].text_len())
                    }
                };
                let caret = edit::insert_fragment(&mut view.document, block_idx, offset, fragment);
                view.set_selection(Some(Selection::caret(caret)));
            }
        }

        view.bump_version();
        Ok(view.to_content())
    }

    // -------------------------------------------------------------------------
    // Notification
    // -------------------------------------------------------------------------

    fn notify_content_change(&mut self, content: &EditorContent, origin: ChangeOrigin) {
        if let Some(handler) = self.on_content_change.as_mut() {
            let outcome = catch_unwind(AssertUnwindSafe(|| handler(content, origin)));
            if outcome.is_err() {
                warn!("content change handler panicked");
            }
        }
    }

    fn notify_state_listeners(&self, dirty: bool) {
        for (id, listener) in &self.state_listeners {
            let outcome = catch_unwind(AssertUnwindSafe(|| listener(dirty)));
            if outcome.is_err() {
                warn!(listener = id, "state change listener panicked");
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
