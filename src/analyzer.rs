//! Classification of a block's raw text.
//!
//! The content is split into lines that keep their own terminator, and each
//! line is tagged as blank, property (`key:: value`) or text. Everything here
//! is pure string work so the editor can rebuild untouched lines byte for
//! byte.

use crate::Settings;

/// The two property names the engine maintains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StampKeys {
    pub created: String,
    pub updated: String,
}

impl StampKeys {
    pub fn new(created: impl Into<String>, updated: impl Into<String>) -> Self {
        Self {
            created: created.into(),
            updated: updated.into(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.create_time_property_name.trim(),
            settings.update_time_property_name.trim(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Blank,
    Property,
    Text,
}

/// One line of block content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Line<'a> {
    /// Line text without its terminator
    pub text: &'a str,
    /// `"\n"`, `"\r\n"` or `""` for an unterminated last line
    pub ending: &'a str,
    pub kind: LineKind,
}

impl<'a> Line<'a> {
    /// Byte offset of the first `key:: ` in the line.
    pub fn key_offset(&self, key: &str) -> Option<usize> {
        self.text.find(&format!("{}:: ", key))
    }

    /// Text after the first `key:: ` in the line, untrimmed.
    pub fn value_of(&self, key: &str) -> Option<&'a str> {
        let text = self.text;
        self.key_offset(key)
            .map(|offset| &text[offset + key.len() + ":: ".len()..])
    }
}

/// Block content split into tagged lines.
#[derive(Debug, Clone)]
pub struct ParsedBlock<'a> {
    pub lines: Vec<Line<'a>>,
}

/// Content shape, in the priority order it is tested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Both properties exist and `updated` already shows the current date
    UpToDate,
    /// At least one of the properties exists but the block is stale
    HasTimestamp,
    /// Only `key:: value` lines, none of them ours
    PropertyBlock,
    /// Ordinary prose
    PlainBlock,
}

pub fn parse(content: &str) -> ParsedBlock<'_> {
    let lines = content
        .split_inclusive('\n')
        .map(|raw| {
            let (text, ending) = if let Some(text) = raw.strip_suffix("\r\n") {
                (text, &raw[text.len()..])
            } else if let Some(text) = raw.strip_suffix('\n') {
                (text, &raw[text.len()..])
            } else {
                (raw, "")
            };
            Line {
                text,
                ending,
                kind: tag(text),
            }
        })
        .collect();

    ParsedBlock { lines }
}

fn tag(text: &str) -> LineKind {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return LineKind::Blank;
    }
    match trimmed.find("::") {
        Some(idx) if idx > 0 && !trimmed[..idx].contains(':') => LineKind::Property,
        _ => LineKind::Text,
    }
}

impl<'a> ParsedBlock<'a> {
    /// Index of the first line carrying property `key`
    pub fn find(&self, key: &str) -> Option<usize> {
        self.lines.iter().position(|line| line.value_of(key).is_some())
    }

    pub fn is_property_block(&self) -> bool {
        self.lines.iter().all(|line| line.kind != LineKind::Text)
    }

    /// Terminator used by the block, `"\n"` when it has none yet
    pub fn line_ending(&self) -> &'a str {
        self.lines
            .iter()
            .map(|line| line.ending)
            .find(|ending| !ending.is_empty())
            .unwrap_or("\n")
    }

    /// Whether the last line is unterminated (and so needs a break before appending)
    pub fn needs_separator(&self) -> bool {
        self.lines.last().is_some_and(|line| line.ending.is_empty())
    }

    fn has_link_value(&self, key: &str, expected: Option<&str>) -> bool {
        self.lines.iter().any(|line| {
            line.value_of(key).is_some_and(|value| {
                let value = value.trim_end();
                match expected {
                    Some(date) => value == link(date),
                    None => value.len() >= 4 && value.starts_with("[[") && value.ends_with("]]"),
                }
            })
        })
    }
}

/// `[[date]]`, the page-link form dates are written in.
pub fn link(date: &str) -> String {
    format!("[[{}]]", date)
}

/// Classifies `content` given the formatted current update date.
pub fn classify(content: &str, keys: &StampKeys, current_updated: &str) -> Shape {
    classify_parsed(&parse(content), keys, current_updated)
}

pub fn classify_parsed(block: &ParsedBlock<'_>, keys: &StampKeys, current_updated: &str) -> Shape {
    if block.has_link_value(&keys.created, None)
        && block.has_link_value(&keys.updated, Some(current_updated))
    {
        Shape::UpToDate
    } else if block.find(&keys.updated).is_some() || block.find(&keys.created).is_some() {
        Shape::HasTimestamp
    } else if block.is_property_block() {
        Shape::PropertyBlock
    } else {
        Shape::PlainBlock
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> StampKeys {
        StampKeys::new("created", "updated")
    }

    #[test]
    fn parse_keeps_terminators() {
        let block = parse("a:: 1\r\nb:: 2\nlast");
        let endings: Vec<_> = block.lines.iter().map(|l| l.ending).collect();
        assert_eq!(endings, vec!["\r\n", "\n", ""]);
        assert_eq!(block.lines[0].text, "a:: 1");
        assert_eq!(block.line_ending(), "\r\n");
        assert!(block.needs_separator());
    }

    #[test]
    fn empty_content_has_no_lines() {
        let block = parse("");
        assert!(block.lines.is_empty());
        assert!(block.is_property_block());
        assert!(!block.needs_separator());
        assert_eq!(block.line_ending(), "\n");
    }

    #[test]
    fn tags_lines() {
        assert_eq!(tag("title:: Foo"), LineKind::Property);
        assert_eq!(tag("  alias:: a, b"), LineKind::Property);
        assert_eq!(tag("empty::"), LineKind::Property);
        assert_eq!(tag("   "), LineKind::Blank);
        assert_eq!(tag(":: nope"), LineKind::Text);
        assert_eq!(tag("http://x:: y"), LineKind::Text);
        assert_eq!(tag("Some notes here"), LineKind::Text);
    }

    #[test]
    fn up_to_date_needs_exact_update_date() {
        let content = "created:: [[2024-01-01]]\nupdated:: [[2024-01-02]]\n";
        assert_eq!(classify(content, &keys(), "2024-01-02"), Shape::UpToDate);
        assert_eq!(classify(content, &keys(), "2024-01-03"), Shape::HasTimestamp);
        assert_eq!(classify(content, &keys(), "Jan 2nd, 2024"), Shape::HasTimestamp);
    }

    #[test]
    fn up_to_date_ignores_trailing_whitespace_and_crlf() {
        let content = "created:: [[2024-01-01]]  \r\nupdated:: [[2024-01-02]] \r\n";
        assert_eq!(classify(content, &keys(), "2024-01-02"), Shape::UpToDate);
    }

    #[test]
    fn created_without_link_is_not_up_to_date() {
        let content = "created:: yesterday\nupdated:: [[2024-01-02]]";
        assert_eq!(classify(content, &keys(), "2024-01-02"), Shape::HasTimestamp);
    }

    #[test]
    fn either_property_routes_to_patch() {
        assert_eq!(
            classify("updated:: [[old]]\nSome prose", &keys(), "new"),
            Shape::HasTimestamp
        );
        assert_eq!(
            classify("created:: [[2024-01-01]]", &keys(), "new"),
            Shape::HasTimestamp
        );
    }

    #[test]
    fn key_is_found_anywhere_in_the_line() {
        assert_eq!(
            classify("last-updated:: [[x]]", &keys(), "y"),
            Shape::HasTimestamp
        );
        assert_eq!(
            classify("- updated:: [[x]]\ntitle:: Foo", &keys(), "y"),
            Shape::HasTimestamp
        );
        let block = parse("title:: Foo\n  updated:: [[x]]");
        assert_eq!(block.find("updated"), Some(1));
        assert_eq!(block.lines[1].value_of("updated"), Some("[[x]]"));
    }

    #[test]
    fn key_needs_separator_and_space() {
        assert_eq!(classify("updated::[[x]]", &keys(), "x"), Shape::PropertyBlock);
        assert_eq!(classify("updated: [[x]]", &keys(), "x"), Shape::PlainBlock);
    }

    #[test]
    fn property_and_plain_blocks() {
        assert_eq!(classify("title:: Foo", &keys(), "d"), Shape::PropertyBlock);
        assert_eq!(
            classify("title:: Foo\n\ntags:: a\n", &keys(), "d"),
            Shape::PropertyBlock
        );
        assert_eq!(classify("", &keys(), "d"), Shape::PropertyBlock);
        assert_eq!(classify("Some notes here", &keys(), "d"), Shape::PlainBlock);
        assert_eq!(
            classify("title:: Foo\nand some prose", &keys(), "d"),
            Shape::PlainBlock
        );
    }

    #[test]
    fn custom_keys() {
        let keys = StampKeys::new("born", "touched");
        let content = "born:: [[a]]\ntouched:: [[b]]";
        assert_eq!(classify(content, &keys, "b"), Shape::UpToDate);
        assert_eq!(
            classify("created:: [[a]]", &keys, "b"),
            Shape::PropertyBlock
        );
    }
}
