//! Text transforms for each content shape.
//!
//! The editor never rebuilds a block from a property map: untouched lines are
//! copied back verbatim, in order, with their own terminators.

use crate::analyzer::{link, parse, ParsedBlock, Shape, StampKeys};

/// Formatted dates to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stamps {
    pub created: String,
    pub updated: String,
}

/// What to do with the first block of a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edit {
    /// Leave the block alone
    Skip,
    /// Replace the block content
    Replace(String),
    /// Insert a new block with this content before the block, as a sibling
    InsertBefore(String),
}

impl Edit {
    pub fn is_skip(&self) -> bool {
        matches!(self, Edit::Skip)
    }
}

/// Computes the edit for `content`, already classified as `shape`.
pub fn plan(content: &str, shape: Shape, keys: &StampKeys, stamps: &Stamps) -> Edit {
    match shape {
        Shape::UpToDate => Edit::Skip,
        Shape::HasTimestamp => {
            let patched = patch(&parse(content), keys, stamps);
            if patched == content {
                Edit::Skip
            } else {
                Edit::Replace(patched)
            }
        }
        Shape::PropertyBlock => Edit::Replace(append(&parse(content), keys, stamps)),
        Shape::PlainBlock => Edit::InsertBefore(new_block(keys, stamps)),
    }
}

/// `key:: [[date]]` without terminator
fn property_line(key: &str, date: &str) -> String {
    format!("{}:: {}", key, link(date))
}

/// Content of a fresh timestamp block
pub fn new_block(keys: &StampKeys, stamps: &Stamps) -> String {
    format!(
        "{}\n{}\n",
        property_line(&keys.created, &stamps.created),
        property_line(&keys.updated, &stamps.updated)
    )
}

fn copy_lines(block: &ParsedBlock<'_>, out: &mut String) {
    for line in &block.lines {
        out.push_str(line.text);
        out.push_str(line.ending);
    }
}

fn push_line(out: &mut String, text: &str, ending: &str) {
    out.push_str(text);
    out.push_str(ending);
}

fn append(block: &ParsedBlock<'_>, keys: &StampKeys, stamps: &Stamps) -> String {
    let ending = block.line_ending();
    let mut out = String::new();
    copy_lines(block, &mut out);
    if block.needs_separator() {
        out.push_str(ending);
    }
    push_line(&mut out, &property_line(&keys.created, &stamps.created), ending);
    push_line(&mut out, &property_line(&keys.updated, &stamps.updated), ending);
    out
}

fn patch(block: &ParsedBlock<'_>, keys: &StampKeys, stamps: &Stamps) -> String {
    let ending = block.line_ending();
    let update_at = block.find(&keys.updated);
    let has_created = block.find(&keys.created).is_some();

    let mut out = String::new();
    for (idx, line) in block.lines.iter().enumerate() {
        let offset = line.key_offset(&keys.updated).filter(|_| Some(idx) == update_at);
        match offset {
            Some(offset) => {
                // keep whatever precedes the key, rewrite the rest of the line
                out.push_str(&line.text[..offset]);
                push_line(&mut out, &property_line(&keys.updated, &stamps.updated), line.ending);
            }
            None => push_line(&mut out, line.text, line.ending),
        }
    }

    let mut appended = Vec::new();
    if update_at.is_none() {
        appended.push(property_line(&keys.updated, &stamps.updated));
    }
    if !has_created {
        appended.push(property_line(&keys.created, &stamps.created));
    }
    if appended.is_empty() {
        return out;
    }

    if !out.is_empty() && !out.ends_with('\n') {
        out.push_str(ending);
    }
    for text in appended {
        push_line(&mut out, &text, ending);
    }
    out
}
