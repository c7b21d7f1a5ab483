//! Lexer for narrative source
//!
//! The script grammar is line-oriented: every logical line is one
//! statement, paragraph, choice, or header. The lexer first strips
//! comments (`//`, `/* … */`, `TODO:` lines are reported separately),
//! then classifies each line into a [`Line`] variant consumed by the
//! parser. Free text that matches nothing is a paragraph line; the
//! best-effort failure model lives here.

use super::ast::SourceLocation;
use std::fmt;

/// Lexical error. Only an unterminated block comment is fatal at this
/// stage; everything else falls through to [`Line::Text`].
#[derive(Debug, Clone)]
pub struct LexError {
    pub message: String,
    pub location: SourceLocation,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.location.line, self.message)
    }
}

impl std::error::Error for LexError {}

/// One classified source line.
#[derive(Debug, Clone, PartialEq)]
pub enum Line {
    Blank,
    /// `TODO: …` — recorded on the story, otherwise skipped.
    Todo(String),
    Include(String),
    /// `=== name ===` (two or more `=`).
    KnotHeader(String),
    /// `= name =` (exactly one leading `=`).
    StitchHeader(String),
    ListDecl { name: String, rhs: String },
    ConstDecl { name: String, rhs: String },
    VarDecl { name: String, rhs: String },
    /// `~ …` statement body, undesugared.
    Statement(String),
    Choice { level: usize, sticky: bool, rest: String },
    Gather { level: usize, rest: String },
    /// Anything else: a paragraph fragment.
    Text(String),
}

/// Remove `//` and `/* … */` comments, preserving line structure so
/// locations stay accurate. An unterminated block comment is an error.
pub fn strip_comments(source: &str) -> Result<String, LexError> {
    let mut out = String::with_capacity(source.len());
    let bytes = source.as_bytes();
    let mut i = 0;
    let mut line = 1;

    while i < bytes.len() {
        if bytes[i] == b'\n' {
            line += 1;
            out.push('\n');
            i += 1;
        } else if bytes[i] == b'/' && bytes.get(i + 1) == Some(&b'/') {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
        } else if bytes[i] == b'/' && bytes.get(i + 1) == Some(&b'*') {
            let open_line = line;
            i += 2;
            loop {
                if i >= bytes.len() {
                    return Err(LexError {
                        message: "unterminated block comment".to_string(),
                        location: SourceLocation::new(open_line),
                    });
                }
                if bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/') {
                    i += 2;
                    break;
                }
                if bytes[i] == b'\n' {
                    line += 1;
                    out.push('\n');
                }
                i += 1;
            }
        } else {
            // Copy a full UTF-8 character, not a byte.
            let ch_len = utf8_len(bytes[i]);
            out.push_str(&source[i..i + ch_len]);
            i += ch_len;
        }
    }

    Ok(out)
}

fn utf8_len(first: u8) -> usize {
    match first {
        b if b < 0x80 => 1,
        b if b >= 0xF0 => 4,
        b if b >= 0xE0 => 3,
        _ => 2,
    }
}

pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Dotted address of 1–3 identifier parts.
pub fn is_address(s: &str) -> bool {
    let parts: Vec<&str> = s.split('.').collect();
    (1..=3).contains(&parts.len()) && parts.iter().all(|p| is_identifier(p))
}

/// Classify one comment-stripped source line.
pub fn scan_line(raw: &str) -> Line {
    let line = raw.trim();
    if line.is_empty() {
        return Line::Blank;
    }

    if let Some(rest) = line.strip_prefix("TODO:") {
        return Line::Todo(rest.trim().to_string());
    }

    if let Some(rest) = keyword(line, "INCLUDE") {
        return Line::Include(rest.to_string());
    }
    if let Some(rest) = keyword(line, "LIST") {
        if let Some((name, rhs)) = split_decl(rest) {
            return Line::ListDecl { name, rhs };
        }
    }
    if let Some(rest) = keyword(line, "CONST") {
        if let Some((name, rhs)) = split_decl(rest) {
            return Line::ConstDecl { name, rhs };
        }
    }
    if let Some(rest) = keyword(line, "VAR") {
        if let Some((name, rhs)) = split_decl(rest) {
            return Line::VarDecl { name, rhs };
        }
    }

    if let Some(rest) = line.strip_prefix('~') {
        return Line::Statement(rest.trim().to_string());
    }

    if line.starts_with('=') {
        if let Some(header) = scan_header(line) {
            return header;
        }
    }

    if line.starts_with('*') || line.starts_with('+') {
        if let Some(choice) = scan_marks(line, &['*', '+']) {
            return choice;
        }
    }

    if line.starts_with('-') && !line.starts_with("->") {
        if let Some(gather) = scan_marks(line, &['-']) {
            return gather;
        }
    }

    // Leading whitespace is kept on plain text: a glue continuation
    // line like ` world.` concatenates verbatim. Delivery trims it for
    // paragraphs that never merge.
    Line::Text(raw.trim_end().to_string())
}

fn keyword<'a>(line: &'a str, word: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(word)?;
    if rest.starts_with(char::is_whitespace) {
        Some(rest.trim())
    } else {
        None
    }
}

fn split_decl(rest: &str) -> Option<(String, String)> {
    let (name, rhs) = rest.split_once('=')?;
    let name = name.trim();
    if is_identifier(name) {
        Some((name.to_string(), rhs.trim().to_string()))
    } else {
        None
    }
}

/// `=== name ===` → knot, `= name =` → stitch. Trailing `=` runs are
/// optional. An invalid name falls back to plain text.
fn scan_header(line: &str) -> Option<Line> {
    let eq_count = line.chars().take_while(|&c| c == '=').count();
    let body = line[eq_count..].trim_end_matches('=').trim();
    if !is_identifier(body) {
        return None;
    }
    if eq_count >= 2 {
        Some(Line::KnotHeader(body.to_string()))
    } else {
        Some(Line::StitchHeader(body.to_string()))
    }
}

/// Count stacked choice (`*`/`+`) or gather (`-`) marks, whitespace
/// permitted between repeats. For gathers a mark directly followed by
/// `>` is a divert arrow and ends the run.
fn scan_marks(line: &str, marks: &[char]) -> Option<Line> {
    let mut level = 0;
    let mut sticky = false;
    let mut rest = line;

    loop {
        let trimmed = rest.trim_start();
        let Some(c) = trimmed.chars().next() else {
            break;
        };
        if !marks.contains(&c) {
            break;
        }
        if c == '-' && trimmed[1..].starts_with('>') {
            break;
        }
        level += 1;
        if c == '+' {
            sticky = true;
        }
        rest = &trimmed[1..];
    }

    if level == 0 {
        return None;
    }
    let rest = rest.trim().to_string();
    if marks == ['-'] {
        Some(Line::Gather { level, rest })
    } else {
        Some(Line::Choice {
            level,
            sticky,
            rest,
        })
    }
}
