//! Rendering of the user's preferred date pattern.
//!
//! Patterns use date-fns notation (`MMM do, yyyy`, `yyyy-MM-dd`, `EEE, dd.MM.yyyy`
//! ...). They are compiled once into chrono format pieces; month and weekday
//! names follow the user's language when chrono knows the locale.

use chrono::{DateTime, Datelike, Local, Locale, TimeZone, Utc};
use log::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    /// A chrono strftime fragment
    Field(&'static str),
    /// Day of month with an English ordinal suffix (`do`)
    OrdinalDay,
    Literal(String),
}

/// A compiled date pattern bound to a locale.
#[derive(Debug, Clone)]
pub struct DateFormatter {
    pieces: Vec<Piece>,
    locale: Locale,
}

impl DateFormatter {
    pub fn new(pattern: &str, language: &str) -> Self {
        Self {
            pieces: compile(pattern),
            locale: locale_for(language),
        }
    }

    /// Formats an epoch-millisecond timestamp in the local time zone.
    pub fn format_millis(&self, millis: i64) -> String {
        match Local.timestamp_millis_opt(millis).single() {
            Some(dt) => self.format(&dt),
            None => {
                debug!("Timestamp {} is out of range, formatting as epoch", millis);
                self.format(&DateTime::<Utc>::UNIX_EPOCH.with_timezone(&Local))
            }
        }
    }

    pub fn format<Tz: TimeZone>(&self, dt: &DateTime<Tz>) -> String
    where
        Tz::Offset: std::fmt::Display,
    {
        let mut out = String::new();
        for piece in &self.pieces {
            match piece {
                Piece::Field(fmt) => out.push_str(&dt.format_localized(fmt, self.locale).to_string()),
                Piece::OrdinalDay => out.push_str(&ordinal(dt.day())),
                Piece::Literal(text) => out.push_str(text),
            }
        }
        out
    }
}

/// Maps a language tag such as `zh-CN` onto a chrono locale, `en_US` otherwise.
fn locale_for(language: &str) -> Locale {
    let tag = language.trim().replace('-', "_");
    let candidates = [
        tag.clone(),
        match tag.as_str() {
            "en" => "en_US".to_string(),
            "zh" | "zh_Hans" => "zh_CN".to_string(),
            "zh_Hant" => "zh_TW".to_string(),
            other => format!("{}_{}", other, other.to_uppercase()),
        },
    ];
    candidates
        .iter()
        .find_map(|candidate| Locale::try_from(candidate.as_str()).ok())
        .unwrap_or(Locale::en_US)
}

fn ordinal(day: u32) -> String {
    let suffix = match (day % 10, day % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{}{}", day, suffix)
}

fn field(symbol: char, width: usize) -> Option<&'static str> {
    let fmt = match (symbol, width) {
        ('y', 2) => "%y",
        ('y', _) => "%Y",
        ('M', 1) => "%-m",
        ('M', 2) => "%m",
        ('M', 3) => "%b",
        ('M', _) => "%B",
        ('d', 1) => "%-d",
        ('d', _) => "%d",
        ('E', 1..=3) => "%a",
        ('E', _) => "%A",
        ('H', 1) => "%-H",
        ('H', _) => "%H",
        ('h', 1) => "%-I",
        ('h', _) => "%I",
        ('m', 1) => "%-M",
        ('m', _) => "%M",
        ('s', 1) => "%-S",
        ('s', _) => "%S",
        ('a', _) => "%p",
        _ => return None,
    };
    Some(fmt)
}

fn push_literal(pieces: &mut Vec<Piece>, text: &str) {
    if let Some(Piece::Literal(last)) = pieces.last_mut() {
        last.push_str(text);
    } else {
        pieces.push(Piece::Literal(text.to_string()));
    }
}

fn compile(pattern: &str) -> Vec<Piece> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut pieces = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c == '\'' {
            // '' is a literal quote, otherwise quoted text runs to the next quote
            if chars.get(i + 1) == Some(&'\'') {
                push_literal(&mut pieces, "'");
                i += 2;
                continue;
            }
            let mut text = String::new();
            i += 1;
            while i < chars.len() {
                if chars[i] == '\'' {
                    if chars.get(i + 1) == Some(&'\'') {
                        text.push('\'');
                        i += 2;
                        continue;
                    }
                    i += 1;
                    break;
                }
                text.push(chars[i]);
                i += 1;
            }
            push_literal(&mut pieces, &text);
            continue;
        }

        if !c.is_ascii_alphabetic() {
            push_literal(&mut pieces, &c.to_string());
            i += 1;
            continue;
        }

        let start = i;
        while i < chars.len() && chars[i] == c {
            i += 1;
        }
        let width = i - start;

        if c == 'd' && width == 1 && chars.get(i) == Some(&'o') {
            pieces.push(Piece::OrdinalDay);
            i += 1;
            continue;
        }

        match field(c, width) {
            Some(fmt) => pieces.push(Piece::Field(fmt)),
            None => push_literal(&mut pieces, &chars[start..i].iter().collect::<String>()),
        }
    }

    pieces
}
