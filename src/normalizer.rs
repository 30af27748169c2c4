//! Turns provider message bodies into comparable plain text.
//!
//! Gmail and Outlook render the same content with very different markup, so every
//! draft comparison goes through [`normalize_for_comparison`] on both sides.

use std::sync::OnceLock;

use regex::Regex;
use scraper::node::Node;
use scraper::{ElementRef, Html};
use unicode_normalization::UnicodeNormalization;

use crate::models::{BodyKind, MailMessage};

/// Elements whose content never reaches the reader
const SKIPPED: &[&str] = &["script", "style", "head", "title", "template", "noscript"];

/// Elements that start a new line
const LINE_BLOCKS: &[&str] = &[
    "div", "li", "ul", "ol", "tr", "table", "blockquote", "h1", "h2", "h3", "h4", "h5", "h6", "section",
    "article", "header", "footer", "pre", "hr",
];

/// Elements separated by a blank line
const PARAGRAPH_BLOCKS: &[&str] = &["p"];

fn quote_markers() -> &'static [Regex] {
    static MARKERS: OnceLock<Vec<Regex>> = OnceLock::new();
    MARKERS.get_or_init(|| {
        [
            r"^On\s.+\swrote:$",
            r"(?i)^-{2,}\s*Original Message\s*-{2,}",
            r"^_{10,}",
            r"^From:",
        ]
        .iter()
        .filter_map(|pattern| Regex::new(pattern).ok())
        .collect()
    })
}

/// Cap runs of newlines at two, i.e. one empty line
fn collapse_blank_runs(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut run = 0;
    for c in text.chars() {
        if c == '\n' {
            run += 1;
            if run > 2 {
                continue;
            }
        } else {
            run = 0;
        }
        out.push(c);
    }
    out
}

/// Plain text of a message body. HTML is flattened, plain text is returned as is.
#[must_use]
pub fn extract_plain_text(message: &MailMessage) -> String {
    match (&message.body, message.body_kind) {
        (None, _) => String::new(),
        (Some(body), BodyKind::Plain) => body.clone(),
        (Some(body), BodyKind::Html) => html_to_text(body),
    }
}

/// Flatten an HTML fragment to text, one line per block element
#[must_use]
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut out = String::with_capacity(html.len() / 2);
    walk(document.root_element(), &mut out);
    tidy_lines(&out)
}

fn walk(element: ElementRef<'_>, out: &mut String) {
    let name = element.value().name();
    if SKIPPED.contains(&name) {
        return;
    }
    if name == "br" {
        out.push('\n');
        return;
    }

    let breaks = if PARAGRAPH_BLOCKS.contains(&name) {
        2
    } else if LINE_BLOCKS.contains(&name) {
        1
    } else {
        0
    };

    ensure_newlines(out, breaks);
    for child in element.children() {
        match child.value() {
            Node::Text(text) => push_collapsed(out, text),
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    walk(child, out);
                }
            }
            _ => {}
        }
    }
    ensure_newlines(out, breaks);
}

/// Append inline text, folding every whitespace run (including nbsp) to one space
fn push_collapsed(out: &mut String, text: &str) {
    for c in text.chars() {
        if c.is_whitespace() || c == '\u{a0}' {
            if !out.is_empty() && !out.ends_with([' ', '\n']) {
                out.push(' ');
            }
        } else {
            out.push(c);
        }
    }
}

fn ensure_newlines(out: &mut String, count: usize) {
    if count == 0 || out.is_empty() {
        return;
    }
    while out.ends_with(' ') {
        out.pop();
    }
    let present = out.chars().rev().take_while(|c| *c == '\n').count();
    for _ in present..count {
        out.push('\n');
    }
}

/// Trim every line and cap blank runs at one empty line
fn tidy_lines(text: &str) -> String {
    let joined = text
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n");
    collapse_blank_runs(&joined).trim().to_string()
}

/// Everything before the first line that opens a quoted reply, trimmed
#[must_use]
pub fn strip_quoted_content(text: &str) -> String {
    let mut previous_blank = false;
    let mut offset = 0;

    for (index, line) in text.split_inclusive('\n').enumerate() {
        let trimmed = line.trim();
        let opens_quote = quote_markers().iter().any(|marker| marker.is_match(trimmed))
            || (index > 0 && previous_blank && trimmed.starts_with('>'));
        if opens_quote {
            return text[..offset].trim().to_string();
        }
        previous_blank = trimmed.is_empty();
        offset += line.len();
    }

    text.trim().to_string()
}

/// Canonical form of a message used for every draft comparison
#[must_use]
pub fn normalize_for_comparison(message: &MailMessage) -> String {
    normalize_text(&extract_plain_text(message))
}

/// Canonical form of already extracted plain text
#[must_use]
pub fn normalize_text(text: &str) -> String {
    let stripped = strip_quoted_content(text);
    let composed: String = stripped.nfc().collect();

    let lines: Vec<String> = composed
        .lines()
        .map(|line| {
            let mut collapsed = String::with_capacity(line.len());
            for c in line.trim().chars() {
                if c == ' ' || c == '\t' || c == '\u{a0}' {
                    if !collapsed.ends_with(' ') {
                        collapsed.push(' ');
                    }
                } else {
                    collapsed.push(c);
                }
            }
            collapsed
        })
        .collect();

    collapse_blank_runs(&lines.join("\n")).trim().to_string()
}
