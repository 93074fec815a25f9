//! Data models for the editor document tree and its persistence envelope.
//!
//! These structs mirror the JSON shape the editor shell persists, so every
//! type derives serde with camelCase field names.

use std::collections::{BTreeMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::document::html;

/// Current wall-clock time as epoch milliseconds.
pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

// =============================================================================
// DOCUMENT TREE
// =============================================================================

/// Root of one editable document.
///
/// Exactly one root exists per editor instance. It is replaced wholesale on
/// load/repair and mutated incrementally during editing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename = "document", rename_all = "camelCase")]
pub struct DocumentNode {
    pub children: Vec<BlockNode>,
    pub styles: DocumentStyles,
}

impl DocumentNode {
    /// Creates an empty document with default styles.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a document containing a single empty paragraph.
    pub fn with_empty_paragraph() -> Self {
        Self {
            children: vec![BlockNode::paragraph(vec![InlineNode::text("")])],
            styles: DocumentStyles::default(),
        }
    }

    /// Pure projection of the tree to HTML.
    pub fn to_html(&self) -> String {
        html::to_html(self)
    }

    /// Pure projection of the tree to flattened plain text.
    pub fn to_plain_text(&self) -> String {
        html::to_plain_text(self)
    }

    /// A document is structurally valid iff every block carries a non-empty
    /// id that is unique within the tree. (The root tag itself is enforced
    /// by the serde `type` tag on deserialization.)
    pub fn is_structurally_valid(&self) -> bool {
        let mut seen = HashSet::new();
        self.children
            .iter()
            .all(|b| !b.id.is_empty() && seen.insert(b.id.as_str()))
    }

    /// Index of the block with the given id, if present.
    pub fn block_index(&self, id: &str) -> Option<usize> {
        self.children.iter().position(|b| b.id == id)
    }
}

/// A structural unit of the document.
///
/// The `id` is stable across edits of the same logical block and is how DOM
/// positions map back to model positions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BlockNode {
    #[serde(rename = "type")]
    pub kind: BlockKind,
    pub id: String,
    pub children: Vec<InlineNode>,
    #[serde(default)]
    pub attributes: BlockAttributes,
}

impl BlockNode {
    /// Creates a block with a freshly generated id.
    pub fn new(kind: BlockKind, children: Vec<InlineNode>) -> Self {
        Self {
            kind,
            id: format!("block-{}", Uuid::new_v4()),
            children,
            attributes: BlockAttributes::default(),
        }
    }

    /// Creates a paragraph block.
    pub fn paragraph(children: Vec<InlineNode>) -> Self {
        Self::new(BlockKind::Paragraph, children)
    }

    /// Creates a heading block of the given level (clamped to 1..=6).
    pub fn heading(level: u8, children: Vec<InlineNode>) -> Self {
        let mut block = Self::new(BlockKind::Heading, children);
        block.attributes.level = Some(level.clamp(1, 6));
        block
    }

    /// Creates a list-item block of the given kind.
    pub fn list_item(kind: ListKind, children: Vec<InlineNode>) -> Self {
        let mut block = Self::new(BlockKind::List, children);
        block.attributes.list_kind = Some(kind);
        block
    }

    /// Concatenated text content of the block's inline runs.
    pub fn text(&self) -> String {
        self.children.iter().map(|n| n.content.as_str()).collect()
    }

    /// Length of the block's text in characters.
    pub fn text_len(&self) -> usize {
        self.children.iter().map(|n| n.content.chars().count()).sum()
    }
}

/// Block kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum BlockKind {
    Paragraph,
    Heading,
    List,
    Table,
    #[serde(alias = "page_break")]
    PageBreak,
}

/// Block-level attributes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct BlockAttributes {
    /// Heading level (1..=6).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<u8>,
    /// List kind, present on list blocks.
    #[serde(rename = "listType", skip_serializing_if = "Option::is_none")]
    pub list_kind: Option<ListKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alignment: Option<Alignment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indent: Option<u32>,
    /// Paragraph spacing in pixels (bottom margin).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spacing: Option<f32>,
}

/// List kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ListKind {
    Bullet,
    Ordered,
}

/// Text alignment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Alignment {
    Left,
    Center,
    Right,
    Justify,
}

impl Alignment {
    pub fn as_css(&self) -> &'static str {
        match self {
            Alignment::Left => "left",
            Alignment::Center => "center",
            Alignment::Right => "right",
            Alignment::Justify => "justify",
        }
    }
}

/// Leaf content: a text run, link, or image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InlineNode {
    #[serde(rename = "type")]
    pub kind: InlineKind,
    pub content: String,
    #[serde(default)]
    pub marks: Vec<TextMark>,
    /// Extra payload for non-text inlines (`href` for links, `src` for images).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<serde_json::Map<String, serde_json::Value>>,
}

impl InlineNode {
    /// Creates a plain text run.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: InlineKind::Text,
            content: content.into(),
            marks: Vec::new(),
            attributes: None,
        }
    }

    /// Creates a text run carrying the given marks.
    pub fn marked(content: impl Into<String>, marks: Vec<TextMark>) -> Self {
        Self {
            kind: InlineKind::Text,
            content: content.into(),
            marks,
            attributes: None,
        }
    }

    /// Creates a link run.
    pub fn link(content: impl Into<String>, href: impl Into<String>) -> Self {
        let mut attributes = serde_json::Map::new();
        attributes.insert("href".into(), serde_json::Value::String(href.into()));
        Self {
            kind: InlineKind::Link,
            content: content.into(),
            marks: Vec::new(),
            attributes: Some(attributes),
        }
    }

    /// Returns true if this run carries a mark of the given kind.
    pub fn has_mark(&self, kind: MarkKind) -> bool {
        self.marks.iter().any(|m| m.kind == kind)
    }

    /// String attribute lookup (`href`, `src`).
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.as_ref()?.get(key)?.as_str()
    }
}

/// Inline kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InlineKind {
    Text,
    Link,
    Image,
}

/// A formatting mark on an inline run.
///
/// Marks are unordered per node; rendering canonicalizes the order so the
/// projection is idempotent regardless of how marks are stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextMark {
    #[serde(rename = "type")]
    pub kind: MarkKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<serde_json::Map<String, serde_json::Value>>,
}

impl TextMark {
    /// Creates an attribute-less mark.
    pub fn new(kind: MarkKind) -> Self {
        Self {
            kind,
            attributes: None,
        }
    }

    /// Creates a mark with a single string attribute.
    pub fn with_attr(kind: MarkKind, key: &str, value: impl Into<serde_json::Value>) -> Self {
        let mut attributes = serde_json::Map::new();
        attributes.insert(key.into(), value.into());
        Self {
            kind,
            attributes: Some(attributes),
        }
    }

    /// String attribute lookup.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.as_ref()?.get(key)?.as_str()
    }
}

/// Mark kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub enum MarkKind {
    Bold,
    Italic,
    Underline,
    Strikethrough,
    Highlight,
    Color,
    FontSize,
}

// =============================================================================
// STYLES
// =============================================================================

/// Page-level document styles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentStyles {
    pub page_size: PageSize,
    pub margins: Margins,
    pub default_font: FontSettings,
    #[serde(default)]
    pub heading_styles: BTreeMap<String, TextStyle>,
    #[serde(default)]
    pub paragraph_styles: BTreeMap<String, TextStyle>,
}

impl Default for DocumentStyles {
    fn default() -> Self {
        Self {
            page_size: PageSize::A4,
            margins: Margins::uniform(32.0),
            default_font: FontSettings::default(),
            heading_styles: BTreeMap::new(),
            paragraph_styles: BTreeMap::new(),
        }
    }
}

/// Supported page sizes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PageSize {
    A4,
    Letter,
}

/// Page margins in CSS pixels.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Margins {
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
    pub left: f32,
}

impl Margins {
    pub fn uniform(value: f32) -> Self {
        Self {
            top: value,
            right: value,
            bottom: value,
            left: value,
        }
    }
}

/// Default font configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FontSettings {
    pub family: String,
    pub size: f32,
    pub weight: u16,
}

impl Default for FontSettings {
    fn default() -> Self {
        Self {
            family: r#""Microsoft YaHei", "PingFang SC", "Helvetica Neue", Arial, sans-serif"#
                .to_string(),
            size: 14.0,
            weight: 400,
        }
    }
}

/// Named text style override.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TextStyle {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_family: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_size: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_weight: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

// =============================================================================
// METADATA, CONTENT AND SELECTION
// =============================================================================

/// Document metadata envelope.
///
/// `version` is monotonically non-decreasing, bumped by the owning editor on
/// every accepted mutation; it is the primary conflict-detection signal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Creation time, epoch milliseconds.
    pub created_at: i64,
    /// Last modification time, epoch milliseconds.
    pub modified_at: i64,
    pub version: u64,
}

impl Default for DocumentMetadata {
    fn default() -> Self {
        let now = now_ms();
        Self {
            title: None,
            author: None,
            created_at: now,
            modified_at: now,
            version: 1,
        }
    }
}

/// The full editor content snapshot: the tree plus its two projections and
/// the metadata envelope.
///
/// Fields are optional on the wire so a corrupted stored payload
/// deserializes into a repairable value instead of failing the parse.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct EditorContent {
    pub document: Option<DocumentNode>,
    pub html: String,
    pub plain_text: String,
    pub metadata: Option<DocumentMetadata>,
}

impl EditorContent {
    /// Builds a content snapshot from a document, deriving both projections.
    pub fn from_document(document: DocumentNode, metadata: DocumentMetadata) -> Self {
        let html = document.to_html();
        let plain_text = document.to_plain_text();
        Self {
            document: Some(document),
            html,
            plain_text,
            metadata: Some(metadata),
        }
    }

    /// Integrity check: document present and structurally valid, both
    /// projections non-empty, metadata present with a modification time.
    pub fn is_valid(&self) -> bool {
        let doc_ok = self
            .document
            .as_ref()
            .is_some_and(|d| d.is_structurally_valid());
        let meta_ok = self.metadata.as_ref().is_some_and(|m| m.modified_at > 0);
        doc_ok && !self.html.is_empty() && !self.plain_text.is_empty() && meta_ok
    }

    /// Version counter, defaulting to 1 when metadata is missing.
    pub fn version(&self) -> u64 {
        self.metadata.as_ref().map(|m| m.version).unwrap_or(1)
    }

    /// Synthesizes missing required fields of an otherwise-salvageable
    /// content object. Pure; the sync manager persists the result so the
    /// repair is durable. Idempotent: repairing valid content is a no-op,
    /// and a second repair of the same input changes nothing further.
    pub fn repair(&self) -> EditorContent {
        if self.is_valid() {
            return self.clone();
        }

        let mut repaired = self.clone();

        if repaired.html.is_empty() {
            repaired.html = if repaired.plain_text.is_empty() {
                "<p></p>".to_string()
            } else {
                format!("<p>{}</p>", html::escape(&repaired.plain_text))
            };
        }

        if repaired.plain_text.is_empty() {
            repaired.plain_text = html::strip_tags(&repaired.html);
        }

        match repaired.document {
            None => {
                let mut document = DocumentNode::new();
                document.children.push(BlockNode::paragraph(vec![InlineNode::text(
                    repaired.plain_text.clone(),
                )]));
                repaired.document = Some(document);
            }
            Some(ref mut document) => {
                // Reassign empty or duplicate block ids.
                let mut seen: HashSet<String> = HashSet::new();
                for block in &mut document.children {
                    if block.id.is_empty() || !seen.insert(block.id.clone()) {
                        block.id = format!("block-{}", Uuid::new_v4());
                        seen.insert(block.id.clone());
                    }
                }
            }
        }

        if repaired.metadata.is_none() {
            repaired.metadata = Some(DocumentMetadata::default());
        }

        repaired
    }
}

/// A caret position inside a block, in characters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub block_id: String,
    pub offset: usize,
}

impl Position {
    pub fn new(block_id: impl Into<String>, offset: usize) -> Self {
        Self {
            block_id: block_id.into(),
            offset,
        }
    }
}

/// A selection between two positions. Equal endpoints mean a caret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub start: Position,
    pub end: Position,
}

impl Selection {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// A collapsed selection (caret) at the given position.
    pub fn caret(position: Position) -> Self {
        Self {
            start: position.clone(),
            end: position,
        }
    }

    pub fn collapsed(&self) -> bool {
        self.start == self.end
    }
}

// =============================================================================
// TESTS
// =============================================================================
