//! HTML and plain-text projections of the document tree, plus the sanitizer
//! and minimal fragment parser used by programmatic content insertion.
//!
//! The renderer and parser cover the same tag subset, so content produced by
//! `to_html` parses back losslessly. Unknown tags are skipped on parse with
//! their text kept.

use crate::document::edit::normalize_block;
use crate::document::model::{
    Alignment, BlockAttributes, BlockKind, BlockNode, DocumentNode, InlineKind, InlineNode,
    ListKind, MarkKind, TextMark,
};
use crate::error::{EditorError, EditorResult};

// =============================================================================
// RENDERING
// =============================================================================

/// Escapes text for HTML output.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Removes all markup from an HTML string and decodes standard entities.
pub fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut rest = html;
    while let Some(open) = rest.find('<') {
        out.push_str(&rest[..open]);
        match rest[open..].find('>') {
            Some(close) => rest = &rest[open + close + 1..],
            None => {
                rest = "";
            }
        }
    }
    out.push_str(rest);
    decode_entities(&out)
}

fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = [
            ("&amp;", "&"),
            ("&lt;", "<"),
            ("&gt;", ">"),
            ("&quot;", "\""),
            ("&#39;", "'"),
            ("&nbsp;", " "),
        ]
        .iter()
        .find(|(entity, _)| tail.starts_with(entity));
        match decoded {
            Some((entity, replacement)) => {
                out.push_str(replacement);
                rest = &tail[entity.len()..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn fmt_px(value: f32) -> String {
    if value.fract() == 0.0 {
        format!("{}px", value as i64)
    } else {
        format!("{}px", value)
    }
}

fn block_style_attr(attributes: &BlockAttributes) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(alignment) = attributes.alignment {
        parts.push(format!("text-align: {}", alignment.as_css()));
    }
    if let Some(indent) = attributes.indent {
        if indent > 0 {
            parts.push(format!("margin-left: {}px", indent * 24));
        }
    }
    if let Some(spacing) = attributes.spacing {
        parts.push(format!("margin-bottom: {}", fmt_px(spacing)));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" style=\"{}\"", parts.join("; "))
    }
}

fn render_inlines(children: &[InlineNode], out: &mut String) {
    for node in children {
        render_inline(node, out);
    }
}

/// Renders one inline run. Marks are emitted in canonical order (bold,
/// italic, underline, strike, highlight, then a single span for color and
/// font size) so the projection is idempotent under mark reordering.
fn render_inline(node: &InlineNode, out: &mut String) {
    if node.kind == InlineKind::Image {
        let src = node.attribute("src").unwrap_or("");
        out.push_str(&format!("<img src=\"{}\" />", escape(src)));
        return;
    }

    let mark = |kind: MarkKind| node.marks.iter().find(|m| m.kind == kind);

    let mut close: Vec<&'static str> = Vec::new();
    if node.kind == InlineKind::Link {
        let href = node.attribute("href").unwrap_or("");
        out.push_str(&format!("<a href=\"{}\">", escape(href)));
        close.push("</a>");
    }
    if mark(MarkKind::Bold).is_some() {
        out.push_str("<strong>");
        close.push("</strong>");
    }
    if mark(MarkKind::Italic).is_some() {
        out.push_str("<em>");
        close.push("</em>");
    }
    if mark(MarkKind::Underline).is_some() {
        out.push_str("<u>");
        close.push("</u>");
    }
    if mark(MarkKind::Strikethrough).is_some() {
        out.push_str("<s>");
        close.push("</s>");
    }
    if let Some(highlight) = mark(MarkKind::Highlight) {
        match highlight.attribute("color") {
            Some(color) => {
                out.push_str(&format!("<mark style=\"background-color: {}\">", escape(color)))
            }
            None => out.push_str("<mark>"),
        }
        close.push("</mark>");
    }

    let mut span_styles: Vec<String> = Vec::new();
    if let Some(color) = mark(MarkKind::Color).and_then(|m| m.attribute("color")) {
        span_styles.push(format!("color: {}", color));
    }
    if let Some(size) = mark(MarkKind::FontSize)
        .and_then(|m| m.attributes.as_ref())
        .and_then(|a| a.get("size"))
        .and_then(|v| v.as_f64())
    {
        span_styles.push(format!("font-size: {}", fmt_px(size as f32)));
    }
    if !span_styles.is_empty() {
        out.push_str(&format!("<span style=\"{}\">", span_styles.join("; ")));
        close.push("</span>");
    }

    out.push_str(&escape(&node.content));
    for tag in close.iter().rev() {
        out.push_str(tag);
    }
}

/// Renders the document tree to HTML. Consecutive list blocks of the same
/// kind are coalesced into one `<ul>`/`<ol>`.
pub fn to_html(doc: &DocumentNode) -> String {
    let mut out = String::new();
    let blocks = &doc.children;
    let mut i = 0;
    while i < blocks.len() {
        let block = &blocks[i];
        match block.kind {
            BlockKind::List => {
                let kind = block.attributes.list_kind.unwrap_or(ListKind::Bullet);
                let tag = match kind {
                    ListKind::Bullet => "ul",
                    ListKind::Ordered => "ol",
                };
                out.push_str(&format!("<{}>", tag));
                while i < blocks.len()
                    && blocks[i].kind == BlockKind::List
                    && blocks[i].attributes.list_kind.unwrap_or(ListKind::Bullet) == kind
                {
                    out.push_str(&format!("<li{}>", block_style_attr(&blocks[i].attributes)));
                    render_inlines(&blocks[i].children, &mut out);
                    out.push_str("</li>");
                    i += 1;
                }
                out.push_str(&format!("</{}>", tag));
            }
            BlockKind::Paragraph => {
                out.push_str(&format!("<p{}>", block_style_attr(&block.attributes)));
                render_inlines(&block.children, &mut out);
                out.push_str("</p>");
                i += 1;
            }
            BlockKind::Heading => {
                let level = block.attributes.level.unwrap_or(1).clamp(1, 6);
                out.push_str(&format!("<h{}{}>", level, block_style_attr(&block.attributes)));
                render_inlines(&block.children, &mut out);
                out.push_str(&format!("</h{}>", level));
                i += 1;
            }
            BlockKind::Table => {
                out.push_str("<table><tbody><tr><td>");
                render_inlines(&block.children, &mut out);
                out.push_str("</td></tr></tbody></table>");
                i += 1;
            }
            BlockKind::PageBreak => {
                out.push_str("<div class=\"page-break\"></div>");
                i += 1;
            }
        }
    }
    out
}

/// Flattens the document tree to plain text, blocks joined by newlines.
pub fn to_plain_text(doc: &DocumentNode) -> String {
    doc.children
        .iter()
        .map(|b| b.text())
        .collect::<Vec<_>>()
        .join("\n")
}

// =============================================================================
// TOKENIZER
// =============================================================================

#[derive(Debug)]
enum Token<'a> {
    Text(&'a str),
    Tag {
        name: String,
        attrs: Vec<(String, String)>,
        closing: bool,
        self_closing: bool,
    },
}

fn tokenize(html: &str) -> EditorResult<Vec<Token<'_>>> {
    let mut tokens = Vec::new();
    let mut rest = html;
    loop {
        let Some(open) = rest.find('<') else {
            if !rest.is_empty() {
                tokens.push(Token::Text(rest));
            }
            break;
        };
        if open > 0 {
            tokens.push(Token::Text(&rest[..open]));
        }
        let tail = &rest[open..];
        if tail.starts_with("<!--") {
            match tail.find("-->") {
                Some(end) => {
                    rest = &tail[end + 3..];
                    continue;
                }
                None => break,
            }
        }
        let Some(close) = tail.find('>') else {
            return Err(EditorError::invalid_fragment("unterminated tag"));
        };
        let mut inner = tail[1..close].trim();
        let closing = inner.starts_with('/');
        if closing {
            inner = inner[1..].trim_start();
        }
        let self_closing = inner.ends_with('/');
        if self_closing {
            inner = inner[..inner.len() - 1].trim_end();
        }
        let name_end = inner
            .find(|c: char| c.is_whitespace())
            .unwrap_or(inner.len());
        let name = inner[..name_end].to_ascii_lowercase();
        let attrs = parse_attrs(&inner[name_end..]);
        tokens.push(Token::Tag {
            name,
            attrs,
            closing,
            self_closing,
        });
        rest = &tail[close + 1..];
    }
    Ok(tokens)
}

fn parse_attrs(raw: &str) -> Vec<(String, String)> {
    let mut attrs = Vec::new();
    let mut rest = raw.trim_start();
    while !rest.is_empty() {
        let name_end = rest
            .find(|c: char| c.is_whitespace() || c == '=')
            .unwrap_or(rest.len());
        let name = rest[..name_end].to_ascii_lowercase();
        rest = rest[name_end..].trim_start();
        let mut value = String::new();
        if let Some(stripped) = rest.strip_prefix('=') {
            rest = stripped.trim_start();
            if let Some(quote) = rest.chars().next().filter(|c| *c == '"' || *c == '\'') {
                match rest[1..].find(quote) {
                    Some(end) => {
                        value = rest[1..1 + end].to_string();
                        rest = &rest[end + 2..];
                    }
                    None => {
                        value = rest[1..].to_string();
                        rest = "";
                    }
                }
            } else {
                let end = rest
                    .find(|c: char| c.is_whitespace())
                    .unwrap_or(rest.len());
                value = rest[..end].to_string();
                rest = &rest[end..];
            }
        }
        if !name.is_empty() {
            attrs.push((name, decode_entities(&value)));
        }
        rest = rest.trim_start();
    }
    attrs
}

// =============================================================================
// SANITIZER
// =============================================================================

const BLOCKED_ELEMENTS: &[&str] = &["script", "style", "iframe", "object", "embed"];

fn is_dangerous_attr(name: &str, value: &str) -> bool {
    if name.starts_with("on") {
        return true;
    }
    if name == "href" || name == "src" {
        let v = value.trim().to_ascii_lowercase();
        return v.starts_with("javascript:");
    }
    false
}

/// Strips script-bearing content from an HTML payload: blocked elements are
/// removed with their contents, event-handler attributes and `javascript:`
/// URLs are dropped. Unparseable markup degrades to escaped text.
pub fn sanitize(html: &str) -> String {
    let tokens = match tokenize(html) {
        Ok(tokens) => tokens,
        Err(_) => return escape(html),
    };

    let mut out = String::with_capacity(html.len());
    let mut blocked_depth: Option<(String, usize)> = None;

    for token in tokens {
        match token {
            Token::Text(text) => {
                if blocked_depth.is_none() {
                    out.push_str(text);
                }
            }
            Token::Tag {
                name,
                attrs,
                closing,
                self_closing,
            } => {
                if let Some((blocked, depth)) = blocked_depth.as_mut() {
                    if name == *blocked {
                        if closing {
                            *depth -= 1;
                            if *depth == 0 {
                                blocked_depth = None;
                            }
                        } else if !self_closing {
                            *depth += 1;
                        }
                    }
                    continue;
                }
                if BLOCKED_ELEMENTS.contains(&name.as_str()) {
                    if !closing && !self_closing {
                        blocked_depth = Some((name, 1));
                    }
                    continue;
                }
                out.push('<');
                if closing {
                    out.push('/');
                }
                out.push_str(&name);
                for (attr_name, attr_value) in &attrs {
                    if is_dangerous_attr(attr_name, attr_value) {
                        continue;
                    }
                    out.push_str(&format!(" {}=\"{}\"", attr_name, escape(attr_value)));
                }
                if self_closing {
                    out.push_str(" /");
                }
                out.push('>');
            }
        }
    }
    out
}

// =============================================================================
// FRAGMENT PARSER
// =============================================================================

struct FragmentBuilder {
    blocks: Vec<BlockNode>,
    current: Option<BlockNode>,
    marks: Vec<TextMark>,
    span_stack: Vec<usize>,
    list_kind: Option<ListKind>,
    link_href: Option<String>,
}

impl FragmentBuilder {
    fn new() -> Self {
        Self {
            blocks: Vec::new(),
            current: None,
            marks: Vec::new(),
            span_stack: Vec::new(),
            list_kind: None,
            link_href: None,
        }
    }

    fn flush(&mut self) {
        if let Some(mut block) = self.current.take() {
            normalize_block(&mut block);
            self.blocks.push(block);
        }
    }

    fn open_block(&mut self, block: BlockNode) {
        self.flush();
        self.current = Some(block);
    }

    fn push_inline(&mut self, mut node: InlineNode) {
        if self.current.is_none() {
            self.current = Some(BlockNode::paragraph(Vec::new()));
        }
        if let Some(href) = &self.link_href {
            if node.kind == InlineKind::Text {
                node = InlineNode::link(node.content, href.clone());
            }
        }
        node.marks = self.marks.clone();
        if let Some(block) = self.current.as_mut() {
            block.children.push(node);
        }
    }

    fn pop_mark(&mut self, kind: MarkKind) {
        if let Some(pos) = self.marks.iter().rposition(|m| m.kind == kind) {
            self.marks.remove(pos);
        }
    }
}

fn style_value<'a>(style: &'a str, property: &str) -> Option<&'a str> {
    for decl in style.split(';') {
        let mut parts = decl.splitn(2, ':');
        let name = parts.next()?.trim();
        if name.eq_ignore_ascii_case(property) {
            return parts.next().map(|v| v.trim());
        }
    }
    None
}

fn parse_px(value: &str) -> Option<f64> {
    value.trim().trim_end_matches("px").trim().parse().ok()
}

/// Parses a sanitized HTML fragment into block nodes.
///
/// Recognizes the tag subset the renderer emits plus common aliases; unknown
/// tags are skipped with their text kept; bare text is wrapped in a
/// paragraph. Returns an error for unterminated markup.
pub fn parse_fragment(html: &str) -> EditorResult<Vec<BlockNode>> {
    let tokens = tokenize(html)?;
    let mut fb = FragmentBuilder::new();

    for token in tokens {
        match token {
            Token::Text(text) => {
                let decoded = decode_entities(text);
                if fb.current.is_none() && decoded.trim().is_empty() {
                    continue;
                }
                fb.push_inline(InlineNode::text(decoded));
            }
            Token::Tag {
                name,
                attrs,
                closing,
                self_closing,
            } => {
                let attr = |key: &str| {
                    attrs
                        .iter()
                        .find(|(n, _)| n == key)
                        .map(|(_, v)| v.as_str())
                };
                match name.as_str() {
                    "p" => {
                        if closing {
                            fb.flush();
                        } else {
                            fb.open_block(BlockNode::paragraph(Vec::new()));
                        }
                    }
                    "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                        if closing {
                            fb.flush();
                        } else {
                            let level = name[1..].parse::<u8>().unwrap_or(1);
                            fb.open_block(BlockNode::heading(level, Vec::new()));
                        }
                    }
                    "ul" => {
                        if closing {
                            fb.flush();
                            fb.list_kind = None;
                        } else {
                            fb.list_kind = Some(ListKind::Bullet);
                        }
                    }
                    "ol" => {
                        if closing {
                            fb.flush();
                            fb.list_kind = None;
                        } else {
                            fb.list_kind = Some(ListKind::Ordered);
                        }
                    }
                    "li" => {
                        if closing {
                            fb.flush();
                        } else {
                            let kind = fb.list_kind.unwrap_or(ListKind::Bullet);
                            fb.open_block(BlockNode::list_item(kind, Vec::new()));
                        }
                    }
                    "br" => {
                        if !closing {
                            fb.push_inline(InlineNode::text("\n"));
                        }
                    }
                    "strong" | "b" => {
                        if closing {
                            fb.pop_mark(MarkKind::Bold);
                        } else {
                            fb.marks.push(TextMark::new(MarkKind::Bold));
                        }
                    }
                    "em" | "i" => {
                        if closing {
                            fb.pop_mark(MarkKind::Italic);
                        } else {
                            fb.marks.push(TextMark::new(MarkKind::Italic));
                        }
                    }
                    "u" => {
                        if closing {
                            fb.pop_mark(MarkKind::Underline);
                        } else {
                            fb.marks.push(TextMark::new(MarkKind::Underline));
                        }
                    }
                    "s" | "strike" | "del" => {
                        if closing {
                            fb.pop_mark(MarkKind::Strikethrough);
                        } else {
                            fb.marks.push(TextMark::new(MarkKind::Strikethrough));
                        }
                    }
                    "mark" => {
                        if closing {
                            fb.pop_mark(MarkKind::Highlight);
                        } else {
                            let mark = match attr("style")
                                .and_then(|s| style_value(s, "background-color"))
                            {
                                Some(color) => {
                                    TextMark::with_attr(MarkKind::Highlight, "color", color)
                                }
                                None => TextMark::new(MarkKind::Highlight),
                            };
                            fb.marks.push(mark);
                        }
                    }
                    "span" => {
                        if closing {
                            if let Some(count) = fb.span_stack.pop() {
                                for _ in 0..count {
                                    fb.marks.pop();
                                }
                            }
                        } else if !self_closing {
                            let mut pushed = 0;
                            if let Some(style) = attr("style") {
                                if let Some(color) = style_value(style, "color") {
                                    fb.marks
                                        .push(TextMark::with_attr(MarkKind::Color, "color", color));
                                    pushed += 1;
                                }
                                if let Some(bg) = style_value(style, "background-color") {
                                    fb.marks
                                        .push(TextMark::with_attr(MarkKind::Highlight, "color", bg));
                                    pushed += 1;
                                }
                                if let Some(size) =
                                    style_value(style, "font-size").and_then(parse_px)
                                {
                                    fb.marks
                                        .push(TextMark::with_attr(MarkKind::FontSize, "size", size));
                                    pushed += 1;
                                }
                            }
                            fb.span_stack.push(pushed);
                        }
                    }
                    "a" => {
                        if closing {
                            fb.link_href = None;
                        } else {
                            fb.link_href = attr("href").map(str::to_string);
                        }
                    }
                    "img" => {
                        if !closing {
                            let mut node = InlineNode::text("");
                            node.kind = InlineKind::Image;
                            let mut map = serde_json::Map::new();
                            map.insert(
                                "src".into(),
                                serde_json::Value::String(
                                    attr("src").unwrap_or_default().to_string(),
                                ),
                            );
                            node.attributes = Some(map);
                            fb.push_inline(node);
                        }
                    }
                    "div" => {
                        if !closing
                            && attr("class").is_some_and(|c| c.contains("page-break"))
                        {
                            fb.flush();
                            fb.blocks
                                .push(BlockNode::new(BlockKind::PageBreak, Vec::new()));
                        }
                    }
                    // Unknown tags are skipped; their text content is kept.
                    _ => {}
                }
            }
        }
    }
    fb.flush();
    Ok(fb.blocks)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::model::EditorContent;

    fn doc_with(blocks: Vec<BlockNode>) -> DocumentNode {
        DocumentNode {
            children: blocks,
            ..Default::default()
        }
    }

    #[test]
    fn test_render_paragraph_with_marks() {
        let doc = doc_with(vec![BlockNode::paragraph(vec![
            InlineNode::text("plain "),
            InlineNode::marked("bold", vec![TextMark::new(MarkKind::Bold)]),
        ])]);
        assert_eq!(to_html(&doc), "<p>plain <strong>bold</strong></p>");
    }

    #[test]
    fn test_render_is_idempotent_under_mark_order() {
        let forward = vec![
            TextMark::new(MarkKind::Bold),
            TextMark::new(MarkKind::Italic),
            TextMark::with_attr(MarkKind::Color, "color", "#ff0000"),
        ];
        let mut reversed = forward.clone();
        reversed.reverse();

        let a = doc_with(vec![BlockNode::paragraph(vec![InlineNode::marked(
            "x", forward,
        )])]);
        let b = doc_with(vec![BlockNode::paragraph(vec![InlineNode::marked(
            "x", reversed,
        )])]);
        assert_eq!(to_html(&a), to_html(&b));
        assert_eq!(
            to_html(&a),
            "<p><strong><em><span style=\"color: #ff0000\">x</span></em></strong></p>"
        );
    }

    #[test]
    fn test_render_escapes_text() {
        let doc = doc_with(vec![BlockNode::paragraph(vec![InlineNode::text(
            "a < b & \"c\"",
        )])]);
        assert_eq!(to_html(&doc), "<p>a &lt; b &amp; &quot;c&quot;</p>");
    }

    #[test]
    fn test_render_coalesces_list_blocks() {
        let doc = doc_with(vec![
            BlockNode::list_item(ListKind::Bullet, vec![InlineNode::text("one")]),
            BlockNode::list_item(ListKind::Bullet, vec![InlineNode::text("two")]),
            BlockNode::list_item(ListKind::Ordered, vec![InlineNode::text("three")]),
        ]);
        assert_eq!(
            to_html(&doc),
            "<ul><li>one</li><li>two</li></ul><ol><li>three</li></ol>"
        );
    }

    #[test]
    fn test_render_heading_and_alignment() {
        let mut heading = BlockNode::heading(2, vec![InlineNode::text("Title")]);
        heading.attributes.alignment = Some(Alignment::Center);
        let doc = doc_with(vec![heading]);
        assert_eq!(
            to_html(&doc),
            "<h2 style=\"text-align: center\">Title</h2>"
        );
    }

    #[test]
    fn test_plain_text_joins_blocks() {
        let doc = doc_with(vec![
            BlockNode::paragraph(vec![InlineNode::text("first")]),
            BlockNode::paragraph(vec![InlineNode::text("second")]),
        ]);
        assert_eq!(to_plain_text(&doc), "first\nsecond");
    }

    #[test]
    fn test_strip_tags_decodes_entities() {
        assert_eq!(strip_tags("<p>a &amp; b</p>"), "a & b");
        assert_eq!(strip_tags("<p>no close"), "");
        assert_eq!(strip_tags("plain"), "plain");
    }

    #[test]
    fn test_sanitize_strips_script_with_content() {
        let dirty = "<p>Safe content</p><script>alert(\"xss\")</script>";
        assert_eq!(sanitize(dirty), "<p>Safe content</p>");
    }

    #[test]
    fn test_sanitize_drops_event_handlers_and_js_urls() {
        let dirty = "<p onclick=\"steal()\">x</p><a href=\"javascript:alert(1)\">y</a>";
        let clean = sanitize(dirty);
        assert!(!clean.contains("onclick"));
        assert!(!clean.contains("javascript:"));
        assert!(clean.contains("<p>x</p>"));
    }

    #[test]
    fn test_sanitize_falls_back_to_text_on_broken_markup() {
        let clean = sanitize("<p unterminated");
        assert!(clean.starts_with("&lt;p"));
    }

    #[test]
    fn test_parse_fragment_paragraphs_and_marks() {
        let blocks =
            parse_fragment("<p>plain <strong>bold</strong></p><p>next</p>").expect("parse");
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].text(), "plain bold");
        assert!(blocks[0].children[1].has_mark(MarkKind::Bold));
        assert_eq!(blocks[1].text(), "next");
    }

    #[test]
    fn test_parse_fragment_bare_text_wrapped_in_paragraph() {
        let blocks = parse_fragment("just text").expect("parse");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].kind, BlockKind::Paragraph);
        assert_eq!(blocks[0].text(), "just text");
    }

    #[test]
    fn test_parse_fragment_lists() {
        let blocks = parse_fragment("<ol><li>a</li><li>b</li></ol>").expect("parse");
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].kind, BlockKind::List);
        assert_eq!(blocks[0].attributes.list_kind, Some(ListKind::Ordered));
        assert_eq!(blocks[1].text(), "b");
    }

    #[test]
    fn test_parse_fragment_span_styles() {
        let blocks = parse_fragment(
            "<p><span style=\"color: #00ff00; font-size: 18px\">styled</span></p>",
        )
        .expect("parse");
        let run = &blocks[0].children[0];
        assert!(run.has_mark(MarkKind::Color));
        assert!(run.has_mark(MarkKind::FontSize));
    }

    #[test]
    fn test_parse_fragment_errors_on_unterminated_tag() {
        assert!(parse_fragment("<p unterminated").is_err());
    }

    #[test]
    fn test_parse_render_round_trip() {
        let html = "<p>plain <strong>bold</strong></p><ul><li>item</li></ul>";
        let blocks = parse_fragment(html).expect("parse");
        let doc = doc_with(blocks);
        assert_eq!(to_html(&doc), html);
    }

    #[test]
    fn test_projections_back_repair() {
        // strip_tags must agree with what repair derives from stored html.
        let content = EditorContent {
            html: "<p>kept</p>".to_string(),
            ..Default::default()
        };
        let repaired = content.repair();
        assert_eq!(repaired.plain_text, "kept");
        assert!(repaired
            .metadata
            .as_ref()
            .is_some_and(|m| m.modified_at > 0));
    }
}
