//! Paragraph and choice fragment parsing
//!
//! A fragment is the body of one source line after its marks are
//! stripped: optional `(label)`, narrative text, optional `-> divert`,
//! optional `#tag`s. Inline `{…}` spans that contain alternatives or
//! conditions are *decomposed* out of the text into their own blocks;
//! the surrounding text pieces are joined to them with glue (`<>`)
//! markers so emission reassembles a single paragraph. Plain `{expr}`
//! spans stay in the text for emit-time expansion.

use crate::parser::ast::{Block, SeqMode};
use crate::parser::lexer::is_identifier;
use crate::parser::parser::{ParseError, Parser};

enum Seg {
    Text(String),
    Node(Block),
}

#[derive(Clone, Copy)]
enum Edge {
    Front,
    Back,
}

impl Parser {
    pub(crate) fn err(&self, message: &str) -> ParseError {
        ParseError {
            message: message.to_string(),
            location: self.location,
        }
    }

    /// Parse a paragraph line (or gather body) into blocks.
    pub(crate) fn parse_fragment(
        &mut self,
        text: &str,
        allow_label: bool,
    ) -> Result<Vec<Block>, ParseError> {
        let mut rest = text.trim_end();
        let mut label = None;
        if allow_label {
            let lead = rest.trim_start();
            if lead.starts_with('(') {
                if let Some((name, after)) = split_label(lead) {
                    label = Some(name);
                    rest = after;
                }
            }
        }

        let (rest, tags) = split_tags(rest);
        let (text_part, divert) = split_divert(rest);
        let mut blocks = self.decompose_inline(text_part)?;

        if blocks.is_empty() && label.is_none() && divert.is_none() && tags.is_empty() {
            return Ok(Vec::new());
        }

        // A label on an alternatives line names the alternation itself
        // (its visit counter and shuffle seed); otherwise it lands on
        // the first paragraph.
        if let Some(l) = label {
            match blocks.first_mut() {
                Some(Block::Paragraph { label: slot, .. }) => *slot = Some(l),
                Some(Block::Alts { label: slot, .. }) => *slot = l,
                _ => blocks.insert(
                    0,
                    Block::Paragraph {
                        text: None,
                        label: Some(l),
                        divert: None,
                        tags: Vec::new(),
                    },
                ),
            }
        }

        if !tags.is_empty() {
            let mut attached = false;
            for block in blocks.iter_mut() {
                if let Block::Paragraph { tags: slot, .. } = block {
                    slot.extend(tags.iter().cloned());
                    attached = true;
                    break;
                }
            }
            if !attached {
                blocks.push(Block::Paragraph {
                    text: None,
                    label: None,
                    divert: None,
                    tags,
                });
            }
        }

        if let Some(d) = divert {
            attach_divert(&mut blocks, d);
        }

        Ok(blocks)
    }

    /// Parse the body of a choice line (after its `*`/`+` marks).
    pub(crate) fn parse_choice_body(
        &mut self,
        sticky: bool,
        rest: &str,
    ) -> Result<Block, ParseError> {
        let mut rest = rest.trim();

        let mut conditions: Vec<String> = Vec::new();
        while rest.starts_with('{') {
            let close = find_matching_brace(rest, 0)
                .ok_or_else(|| self.err("unterminated condition on choice"))?;
            conditions.push(rest[1..close].trim().to_string());
            rest = rest[close + 1..].trim_start();
        }
        let condition = match conditions.len() {
            0 => None,
            1 => Some(conditions.remove(0)),
            _ => Some(conditions.join(" && ")),
        };

        let mut label = None;
        if let Some((name, after)) = split_label(rest) {
            label = Some(name);
            rest = after;
        }

        // A bare divert is a fallback option: no caption, taken
        // silently when nothing else survives.
        if let Some(target) = rest.strip_prefix("->") {
            return Ok(Block::Choice {
                menu: None,
                text: None,
                condition,
                divert: Some(target.trim().to_string()),
                sticky,
                label,
                node: Vec::new(),
            });
        }

        let (caption, divert) = split_divert(rest);
        let (menu, text) = split_caption(caption.trim());
        Ok(Block::Choice {
            menu: Some(menu),
            text,
            condition,
            divert,
            sticky,
            label,
            node: Vec::new(),
        })
    }

    /// Scan text for `{…}` spans, pulling alternatives and conditions
    /// out into blocks glued to the surrounding text.
    pub(crate) fn decompose_inline(&mut self, text: &str) -> Result<Vec<Block>, ParseError> {
        let mut segs: Vec<Seg> = Vec::new();
        let mut buf = String::new();
        let mut i = 0;

        while i < text.len() {
            if text[i..].starts_with("{{}}") {
                buf.push_str("{{}}");
                i += 4;
                continue;
            }
            if text[i..].starts_with('{') {
                let close = find_matching_brace(text, i)
                    .ok_or_else(|| self.err("unterminated inline expression"))?;
                let content = &text[i + 1..close];
                match self.build_construct(content)? {
                    Some(block) => {
                        if !buf.is_empty() {
                            segs.push(Seg::Text(std::mem::take(&mut buf)));
                        }
                        segs.push(Seg::Node(block));
                    }
                    None => {
                        buf.push('{');
                        buf.push_str(content);
                        buf.push('}');
                    }
                }
                i = close + 1;
                continue;
            }
            let Some(ch) = text[i..].chars().next() else {
                break;
            };
            buf.push(ch);
            i += ch.len_utf8();
        }
        if !buf.is_empty() {
            segs.push(Seg::Text(buf));
        }

        let last = segs.len().saturating_sub(1);
        let mut blocks = Vec::new();
        for (idx, seg) in segs.into_iter().enumerate() {
            match seg {
                Seg::Text(mut t) => {
                    if idx > 0 {
                        t.insert_str(0, "<>");
                    }
                    if idx < last {
                        t.push_str("<>");
                    }
                    blocks.push(Block::Paragraph {
                        text: Some(t),
                        label: None,
                        divert: None,
                        tags: Vec::new(),
                    });
                }
                Seg::Node(mut b) => {
                    if idx > 0 {
                        glue_edge(&mut b, Edge::Front);
                    }
                    if idx < last {
                        glue_edge(&mut b, Edge::Back);
                    }
                    blocks.push(b);
                }
            }
        }
        Ok(blocks)
    }

    /// Classify one brace span. `Ok(None)` means plain expression —
    /// left in the text for emit-time expansion.
    fn build_construct(&mut self, content: &str) -> Result<Option<Block>, ParseError> {
        let trimmed = content.trim();

        // Shorthand alternation markers. A leading `!` only counts when
        // alternatives follow; otherwise it is expression negation.
        if let Some(body) = trimmed.strip_prefix('&') {
            return self.build_alts(body, SeqMode::Cycle, false).map(Some);
        }
        if let Some(body) = trimmed.strip_prefix('!') {
            if split_pipes(body).len() > 1 {
                return self.build_alts(body, SeqMode::Once, false).map(Some);
            }
        }
        if let Some(body) = trimmed.strip_prefix('~') {
            return self.build_alts(body, SeqMode::Cycle, true).map(Some);
        }

        // Keyword alternation: `{stopping: a|b|c}` and friends.
        if let Some(colon) = find_top_level(trimmed, ":") {
            let (mode, shuffled) = match trimmed[..colon].trim() {
                "stopping" => (Some(SeqMode::Stopping), false),
                "cycle" => (Some(SeqMode::Cycle), false),
                "once" => (Some(SeqMode::Once), false),
                "shuffle" | "shuffled" => (Some(SeqMode::Cycle), true),
                _ => (None, false),
            };
            if let Some(mode) = mode {
                return self
                    .build_alts(&trimmed[colon + 1..], mode, shuffled)
                    .map(Some);
            }
        }

        let parts = split_pipes(trimmed);
        if parts.len() > 1 {
            if find_top_level(parts[0], ":").is_some() {
                return self.build_condition(&parts).map(Some);
            }
            return self.build_alts_from(&parts, SeqMode::Stopping, false).map(Some);
        }
        if find_top_level(trimmed, ":").is_some() {
            return self.build_condition(&parts).map(Some);
        }

        Ok(None)
    }

    fn build_alts(
        &mut self,
        body: &str,
        mode: SeqMode,
        shuffled: bool,
    ) -> Result<Block, ParseError> {
        let parts = split_pipes(body);
        self.build_alts_from(&parts, mode, shuffled)
    }

    fn build_alts_from(
        &mut self,
        parts: &[&str],
        mode: SeqMode,
        shuffled: bool,
    ) -> Result<Block, ParseError> {
        let mut items = Vec::new();
        for part in parts {
            items.push(self.parse_inline_body(part)?);
        }
        Ok(Block::Alts {
            items,
            mode,
            shuffled,
            label: self.next_alt_label(),
        })
    }

    fn build_condition(&mut self, parts: &[&str]) -> Result<Block, ParseError> {
        let mut conditions = Vec::new();
        let mut branches = Vec::new();
        let mut otherwise = None;

        for part in parts {
            match find_top_level(part, ":") {
                Some(colon) => {
                    let cond = part[..colon].trim();
                    let body = &part[colon + 1..];
                    if cond == "else" {
                        otherwise = Some(self.parse_inline_body(body)?);
                    } else {
                        conditions.push(cond.to_string());
                        branches.push(self.parse_inline_body(body)?);
                    }
                }
                None => otherwise = Some(self.parse_inline_body(part)?),
            }
        }

        Ok(Block::Condition {
            conditions,
            branches,
            otherwise,
        })
    }

    /// A branch or alternation item: text with optional divert and
    /// nested constructs, but no labels or tags.
    fn parse_inline_body(&mut self, body: &str) -> Result<Vec<Block>, ParseError> {
        let body = body.trim();
        let (text_part, divert) = split_divert(body);
        let mut blocks = self.decompose_inline(text_part.trim())?;
        if let Some(d) = divert {
            attach_divert(&mut blocks, d);
        }
        Ok(blocks)
    }
}

fn attach_divert(blocks: &mut Vec<Block>, divert: String) {
    if let Some(Block::Paragraph { divert: slot, .. }) = blocks.last_mut() {
        if slot.is_none() {
            *slot = Some(divert);
            return;
        }
    }
    blocks.push(Block::Paragraph {
        text: None,
        label: None,
        divert: Some(divert),
        tags: Vec::new(),
    });
}

/// Add a glue marker to the leading/trailing paragraph of every branch
/// of a decomposed construct.
fn glue_edge(block: &mut Block, edge: Edge) {
    match block {
        Block::Alts { items, .. } => {
            for item in items {
                glue_items(item, edge);
            }
        }
        Block::Condition {
            branches,
            otherwise,
            ..
        } => {
            for branch in branches.iter_mut() {
                glue_items(branch, edge);
            }
            if let Some(branch) = otherwise {
                glue_items(branch, edge);
            }
        }
        Block::Paragraph { text, .. } => match edge {
            Edge::Front => {
                *text = Some(format!("<>{}", text.as_deref().unwrap_or("")));
            }
            Edge::Back => text.get_or_insert_with(String::new).push_str("<>"),
        },
        _ => {}
    }
}

fn glue_items(items: &mut [Block], edge: Edge) {
    let target = match edge {
        Edge::Front => items.first_mut(),
        Edge::Back => items.last_mut(),
    };
    if let Some(block) = target {
        glue_edge(block, edge);
    }
}

/// Leading `(name)` label.
fn split_label(s: &str) -> Option<(String, &str)> {
    let rest = s.strip_prefix('(')?;
    let close = rest.find(')')?;
    let name = rest[..close].trim();
    if !is_identifier(name) {
        return None;
    }
    Some((name.to_string(), rest[close + 1..].trim_start()))
}

/// Split off `#tag` suffixes (outside braces).
fn split_tags(s: &str) -> (&str, Vec<String>) {
    match find_top_level(s, "#") {
        Some(pos) => {
            let tags = s[pos..]
                .split('#')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
            (s[..pos].trim_end(), tags)
        }
        None => (s, Vec::new()),
    }
}

/// Split off a `-> target` divert (outside braces).
fn split_divert(s: &str) -> (&str, Option<String>) {
    match find_top_level(s, "->") {
        Some(pos) => {
            let target = s[pos + 2..].trim();
            let divert = (!target.is_empty()).then(|| target.to_string());
            (s[..pos].trim_end(), divert)
        }
        None => (s, None),
    }
}

/// Choice caption `prefix [middle] suffix` → (menu title, narrated text).
fn split_caption(caption: &str) -> (String, Option<String>) {
    let Some(open) = find_top_level(caption, "[") else {
        let menu = caption.to_string();
        let text = (!caption.is_empty()).then(|| caption.to_string());
        return (menu, text);
    };
    let Some(close_rel) = caption[open..].find(']') else {
        let menu = caption.to_string();
        let text = (!caption.is_empty()).then(|| caption.to_string());
        return (menu, text);
    };
    let close = open + close_rel;

    let prefix = &caption[..open];
    let middle = &caption[open + 1..close];
    let suffix = &caption[close + 1..];
    let menu = format!("{prefix}{middle}").trim().to_string();
    let text = format!("{prefix}{suffix}").trim().to_string();
    (menu, (!text.is_empty()).then_some(text))
}

/// Byte index of the matching `}` for the `{` at `open`.
pub(crate) fn find_matching_brace(s: &str, open: usize) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_str = false;
    for (off, c) in s[open..].char_indices() {
        match c {
            '"' => in_str = !in_str,
            '{' if !in_str => depth += 1,
            '}' if !in_str => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + off);
                }
            }
            _ => {}
        }
    }
    None
}

/// First occurrence of `pat` outside braces and string literals.
fn find_top_level(s: &str, pat: &str) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_str = false;
    for (i, c) in s.char_indices() {
        match c {
            '"' => in_str = !in_str,
            '{' if !in_str => depth += 1,
            '}' if !in_str => depth = (depth - 1).max(0),
            _ => {
                if depth == 0 && !in_str && s[i..].starts_with(pat) {
                    return Some(i);
                }
            }
        }
    }
    None
}

/// Split on top-level `|` separators; `||` is the or-operator and does
/// not separate.
fn split_pipes(s: &str) -> Vec<&str> {
    let chars: Vec<(usize, char)> = s.char_indices().collect();
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut in_str = false;
    let mut start = 0;
    let mut idx = 0;

    while idx < chars.len() {
        let (i, c) = chars[idx];
        match c {
            '"' => in_str = !in_str,
            '{' if !in_str => depth += 1,
            '}' if !in_str => depth = (depth - 1).max(0),
            '|' if !in_str && depth == 0 => {
                if chars.get(idx + 1).map(|&(_, n)| n) == Some('|') {
                    idx += 2;
                    continue;
                }
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
        idx += 1;
    }
    parts.push(&s[start..]);
    parts
}
