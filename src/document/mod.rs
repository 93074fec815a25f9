//! The document tree, its HTML/plain-text projections, and structural edits.

pub mod edit;
pub mod html;
pub mod model;

pub use edit::{resolve_selection, ResolvedRange};
pub use model::{
    Alignment, BlockAttributes, BlockKind, BlockNode, DocumentMetadata, DocumentNode,
    DocumentStyles, EditorContent, FontSettings, InlineKind, InlineNode, ListKind, Margins,
    MarkKind, PageSize, Position, Selection, TextMark, TextStyle,
};
