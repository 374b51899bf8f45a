//! Cleanup and chunking of extracted page text before synthesis.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // "exam-\nple" as produced by line-wrapped text extraction
    static ref HYPHEN_BREAK: Regex = Regex::new(r"(\w)-\s*\n\s*(\w)").unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

fn is_ligature(c: char) -> bool {
    ('\u{FB00}'..='\u{FB06}').contains(&c)
}

/// Joins hyphenated line breaks, expands typographic ligatures and
/// collapses whitespace.
pub fn normalize(text: &str) -> String {
    let joined = HYPHEN_BREAK.replace_all(text, "$1$2");
    let expanded: String = joined
        .chars()
        .map(|c| {
            if is_ligature(c) {
                deunicode::deunicode_char(c).unwrap_or(" ").to_string()
            } else {
                c.to_string()
            }
        })
        .collect();
    WHITESPACE.replace_all(&expanded, " ").trim().to_string()
}

/// Splits text into sentences on `.`, `?`, `!` and newlines.
fn sentences(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut buffer = String::new();

    for c in text.chars() {
        buffer.push(c);
        if matches!(c, '.' | '?' | '!' | '\n') {
            let sentence = WHITESPACE.replace_all(buffer.trim(), " ").to_string();
            if !sentence.is_empty() {
                out.push(sentence);
            }
            buffer.clear();
        }
    }

    let rest = WHITESPACE.replace_all(buffer.trim(), " ").to_string();
    if !rest.is_empty() {
        out.push(rest);
    }
    out
}

/// Largest char boundary at or below `max_bytes`, but always past the
/// first character so splitting makes progress.
fn split_point(word: &str, max_bytes: usize) -> usize {
    let first = word.chars().next().map_or(0, char::len_utf8);
    (first..=max_bytes.min(word.len()))
        .rev()
        .find(|&i| word.is_char_boundary(i))
        .unwrap_or(first)
}

/// Breaks an over-long sentence at word boundaries (or mid-word if a single
/// word exceeds the limit).
fn split_long(sentence: &str, max_bytes: usize, out: &mut Vec<String>) {
    let mut current = String::new();
    for word in sentence.split_whitespace() {
        let mut word = word;
        while word.len() > max_bytes {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            let (head, tail) = word.split_at(split_point(word, max_bytes));
            out.push(head.to_string());
            word = tail;
        }
        if word.is_empty() {
            continue;
        }
        let needed = if current.is_empty() {
            word.len()
        } else {
            current.len() + 1 + word.len()
        };
        if needed > max_bytes {
            out.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        out.push(current);
    }
}

/// Splits page text into chunks of at most `max_bytes` UTF-8 bytes, keeping
/// sentences together where possible. The synthesis endpoint limits input
/// by bytes, so accented and CJK text yields more chunks than ASCII.
pub fn chunk(text: &str, max_bytes: usize) -> Vec<String> {
    let max_bytes = max_bytes.max(1);
    let text = HYPHEN_BREAK.replace_all(text, "$1$2");
    let mut chunks = Vec::new();
    let mut current = String::new();

    for sentence in sentences(&text) {
        let sentence = normalize(&sentence);
        let len = sentence.len();
        if len > max_bytes {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            split_long(&sentence, max_bytes, &mut chunks);
            continue;
        }
        let combined = if current.is_empty() {
            len
        } else {
            current.len() + 1 + len
        };
        if combined > max_bytes {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&sentence);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
