//! Structural mutation of the document tree: range resolution, deletion,
//! fragment insertion, and mark application.
//!
//! All offsets are in characters, not bytes. Every mutation leaves the tree
//! structurally valid and returns the caret position a caller should move to.

use std::ops::Range;

use crate::document::model::{
    BlockNode, DocumentNode, InlineKind, InlineNode, MarkKind, Position, Selection, TextMark,
};
use crate::error::{EditorError, EditorResult};

/// A selection resolved to block indices with clamped, ordered offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRange {
    pub start_block: usize,
    pub start_offset: usize,
    pub end_block: usize,
    pub end_offset: usize,
}

impl ResolvedRange {
    pub fn is_collapsed(&self) -> bool {
        self.start_block == self.end_block && self.start_offset == self.end_offset
    }
}

/// Resolves a selection against the current tree. Offsets beyond the block
/// text are clamped; a backwards selection is normalized to forward order.
pub fn resolve_selection(doc: &DocumentNode, selection: &Selection) -> EditorResult<ResolvedRange> {
    let start_block = doc
        .block_index(&selection.start.block_id)
        .ok_or_else(|| EditorError::block_not_found(&selection.start.block_id))?;
    let end_block = doc
        .block_index(&selection.end.block_id)
        .ok_or_else(|| EditorError::block_not_found(&selection.end.block_id))?;

    let start_offset = selection.start.offset.min(doc.children[start_block].text_len());
    let end_offset = selection.end.offset.min(doc.children[end_block].text_len());

    if (start_block, start_offset) <= (end_block, end_offset) {
        Ok(ResolvedRange {
            start_block,
            start_offset,
            end_block,
            end_offset,
        })
    } else {
        Ok(ResolvedRange {
            start_block: end_block,
            start_offset: end_offset,
            end_block: start_block,
            end_offset: start_offset,
        })
    }
}

/// Splits the block's inline runs so `offset` falls exactly on a run
/// boundary, and returns the index of the run starting at that boundary.
pub fn split_inlines_at(block: &mut BlockNode, offset: usize) -> usize {
    let mut remaining = offset;
    for i in 0..block.children.len() {
        if remaining == 0 {
            return i;
        }
        let len = block.children[i].content.chars().count();
        if remaining < len {
            let node = &mut block.children[i];
            let byte = node
                .content
                .char_indices()
                .nth(remaining)
                .map(|(b, _)| b)
                .unwrap_or(node.content.len());
            let tail_content = node.content.split_off(byte);
            let tail = InlineNode {
                content: tail_content,
                ..node.clone()
            };
            block.children.insert(i + 1, tail);
            return i + 1;
        }
        remaining -= len;
    }
    block.children.len()
}

/// Deletes the resolved range from the tree and returns the caret position
/// at the start of the deletion. Cross-block deletion merges the tail of the
/// end block into the start block and removes everything in between.
pub fn delete_range(doc: &mut DocumentNode, range: &ResolvedRange) -> Position {
    if range.start_block == range.end_block {
        let block = &mut doc.children[range.start_block];
        let from = split_inlines_at(block, range.start_offset);
        let to = split_inlines_at(block, range.end_offset);
        block.children.drain(from..to);
        normalize_block(block);
        return Position::new(block.id.clone(), range.start_offset);
    }

    let tail = {
        let end = &mut doc.children[range.end_block];
        let at = split_inlines_at(end, range.end_offset);
        end.children.split_off(at)
    };
    let start = &mut doc.children[range.start_block];
    let keep = split_inlines_at(start, range.start_offset);
    start.children.truncate(keep);
    start.children.extend(tail);
    normalize_block(start);
    let caret = Position::new(start.id.clone(), range.start_offset);

    doc.children.drain(range.start_block + 1..=range.end_block);
    caret
}

/// Inserts parsed fragment blocks at a character offset inside the block at
/// `block_idx`, and returns the caret position at the end of the insertion.
///
/// A single-block fragment splices into the target block; a multi-block
/// fragment splits the target, merging the first fragment block into its
/// head and the target's tail into the last fragment block.
pub fn insert_fragment(
    doc: &mut DocumentNode,
    block_idx: usize,
    offset: usize,
    mut fragment: Vec<BlockNode>,
) -> Position {
    let block_id = doc.children[block_idx].id.clone();
    if fragment.is_empty() {
        return Position::new(block_id, offset);
    }

    if fragment.len() == 1 {
        let added = fragment[0].text_len();
        let runs = std::mem::take(&mut fragment[0].children);
        let block = &mut doc.children[block_idx];
        let at = split_inlines_at(block, offset);
        for (k, run) in runs.into_iter().enumerate() {
            block.children.insert(at + k, run);
        }
        normalize_block(block);
        return Position::new(block_id, offset + added);
    }

    let tail = {
        let block = &mut doc.children[block_idx];
        let at = split_inlines_at(block, offset);
        block.children.split_off(at)
    };

    let first = fragment.remove(0);
    let mut last = fragment
        .pop()
        .unwrap_or_else(|| BlockNode::paragraph(Vec::new()));

    doc.children[block_idx].children.extend(first.children);
    normalize_block(&mut doc.children[block_idx]);

    let caret_offset = last.text_len();
    let caret_block = last.id.clone();
    last.children.extend(tail);
    normalize_block(&mut last);

    let mut at = block_idx + 1;
    for middle in fragment {
        doc.children.insert(at, middle);
        at += 1;
    }
    doc.children.insert(at, last);

    Position::new(caret_block, caret_offset)
}

/// Splits run boundaries at the range edges and returns, per covered block,
/// the run index range the selection covers.
fn split_boundaries(doc: &mut DocumentNode, range: &ResolvedRange) -> Vec<(usize, Range<usize>)> {
    let mut spans = Vec::new();
    if range.start_block == range.end_block {
        let block = &mut doc.children[range.start_block];
        let from = split_inlines_at(block, range.start_offset);
        let to = split_inlines_at(block, range.end_offset);
        spans.push((range.start_block, from..to));
    } else {
        let from = {
            let block = &mut doc.children[range.start_block];
            let i = split_inlines_at(block, range.start_offset);
            i..block.children.len()
        };
        spans.push((range.start_block, from));
        for idx in range.start_block + 1..range.end_block {
            spans.push((idx, 0..doc.children[idx].children.len()));
        }
        let to = split_inlines_at(&mut doc.children[range.end_block], range.end_offset);
        spans.push((range.end_block, 0..to));
    }
    spans
}

/// Toggles an attribute-less mark over the range: removed when every covered
/// non-empty run already carries it, added everywhere otherwise.
pub fn toggle_mark_in_range(doc: &mut DocumentNode, range: &ResolvedRange, kind: MarkKind) {
    let spans = split_boundaries(doc, range);
    let all_marked = spans.iter().all(|(idx, runs)| {
        doc.children[*idx].children[runs.clone()]
            .iter()
            .filter(|n| !n.content.is_empty())
            .all(|n| n.has_mark(kind))
    });
    for (idx, runs) in &spans {
        for node in &mut doc.children[*idx].children[runs.clone()] {
            if all_marked {
                node.marks.retain(|m| m.kind != kind);
            } else if !node.has_mark(kind) {
                node.marks.push(TextMark::new(kind));
            }
        }
    }
    for idx in spans.iter().map(|(idx, _)| *idx) {
        normalize_block(&mut doc.children[idx]);
    }
}

/// Applies a valued mark over the range, replacing any existing mark of the
/// same kind.
pub fn set_mark_in_range(doc: &mut DocumentNode, range: &ResolvedRange, mark: TextMark) {
    let spans = split_boundaries(doc, range);
    for (idx, runs) in &spans {
        for node in &mut doc.children[*idx].children[runs.clone()] {
            node.marks.retain(|m| m.kind != mark.kind);
            node.marks.push(mark.clone());
        }
    }
    for idx in spans.iter().map(|(idx, _)| *idx) {
        normalize_block(&mut doc.children[idx]);
    }
}

/// Applies a mutation to every block the range touches.
pub fn for_each_block_in_range<F>(doc: &mut DocumentNode, range: &ResolvedRange, mut apply: F)
where
    F: FnMut(&mut BlockNode),
{
    for block in &mut doc.children[range.start_block..=range.end_block] {
        apply(block);
    }
}

fn sorted_marks(node: &InlineNode) -> Vec<TextMark> {
    let mut marks = node.marks.clone();
    marks.sort_by_key(|m| m.kind);
    marks
}

fn mergeable(a: &InlineNode, b: &InlineNode) -> bool {
    a.kind == InlineKind::Text
        && b.kind == InlineKind::Text
        && a.attributes == b.attributes
        && sorted_marks(a) == sorted_marks(b)
}

/// Drops empty text runs and merges adjacent runs with identical formatting.
pub fn normalize_block(block: &mut BlockNode) {
    let mut result: Vec<InlineNode> = Vec::with_capacity(block.children.len());
    for node in block.children.drain(..) {
        if node.kind == InlineKind::Text && node.content.is_empty() && node.attributes.is_none() {
            continue;
        }
        match result.last_mut() {
            Some(last) if mergeable(last, &node) => last.content.push_str(&node.content),
            _ => result.push(node),
        }
    }
    block.children = result;
}

// =============================================================================
// TESTS
// =============================================================================
