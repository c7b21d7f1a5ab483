//! Main parser coordinator
//!
//! This module provides the [`Parser`] struct and the line-driven parse
//! loop. The grammar is best-effort: a line that matches no production is
//! kept as narrative text, and a malformed declaration is skipped. The
//! only fatal errors are an unterminated block comment and an
//! unterminated inline `{…}` expression.
//!
//! # Node chain
//!
//! Nesting is tracked with a *node chain*: a stack of indices into the
//! open choice blocks of the current stitch. The chain top is the current
//! insertion point. A choice at level L pops the chain to L−1, inserts
//! the choice, and pushes its node; a gather at level L pops to L−1 and
//! appends; headers reset the chain entirely. Indices (rather than
//! references) keep ownership simple: children are owned by their parent
//! block and the chain re-navigates from the stitch root on demand.
//!
//! Parser methods are split across files using `impl Parser` blocks:
//! declarations in `declarations.rs`, paragraph/choice fragment parsing
//! in `fragments.rs`.

use crate::parser::ast::*;
use crate::parser::lexer::{self, LexError, Line};
use std::fmt;

/// Parser error type
#[derive(Debug, Clone)]
pub struct ParseError {
    pub message: String,
    pub location: SourceLocation,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "parse error at line {}: {}",
            self.location.line, self.message
        )
    }
}

impl std::error::Error for ParseError {}

impl From<LexError> for ParseError {
    fn from(err: LexError) -> Self {
        ParseError {
            message: err.message,
            location: err.location,
        }
    }
}

/// Line-driven parser for narrative source.
pub struct Parser {
    lines: Vec<(usize, Line)>,
    story: Story,
    knot: String,
    stitch: String,
    chain: Vec<usize>,
    alt_seq: usize,
    pub(crate) location: SourceLocation,
}

impl Parser {
    pub(crate) fn story_mut(&mut self) -> &mut Story {
        &mut self.story
    }
}

impl Parser {
    pub fn new(source: &str) -> Result<Self, ParseError> {
        let clean = lexer::strip_comments(source)?;
        let lines = clean
            .lines()
            .enumerate()
            .map(|(i, l)| (i + 1, lexer::scan_line(l)))
            .collect();

        let mut story = Story::default();
        story
            .knots
            .entry(IMPLICIT.to_string())
            .or_default()
            .stitches
            .entry(IMPLICIT.to_string())
            .or_default();

        Ok(Self {
            lines,
            story,
            knot: IMPLICIT.to_string(),
            stitch: IMPLICIT.to_string(),
            chain: Vec::new(),
            alt_seq: 0,
            location: SourceLocation::new(1),
        })
    }

    /// Parse the entire script into a [`Story`].
    pub fn parse_story(mut self) -> Result<Story, ParseError> {
        for (lineno, line) in std::mem::take(&mut self.lines) {
            self.location = SourceLocation::new(lineno);
            match line {
                Line::Blank => {}
                Line::Todo(text) => self.story.todos.push(text),
                Line::Include(path) => self.story.includes.push(path),
                Line::KnotHeader(name) => self.open_knot(name),
                Line::StitchHeader(name) => self.open_stitch(name),
                Line::ListDecl { name, rhs } => self.declare_list(name, &rhs),
                Line::ConstDecl { name, rhs } => self.story.constants.push((name, rhs)),
                Line::VarDecl { name, rhs } => self.story.variables.push((name, rhs)),
                Line::Statement(body) => self.handle_statement(&body),
                Line::Choice {
                    level,
                    sticky,
                    rest,
                } => self.handle_choice(level, sticky, &rest)?,
                Line::Gather { level, rest } => self.handle_gather(level, &rest)?,
                Line::Text(text) => self.handle_text(&text)?,
            }
        }

        self.story.version = Version {
            engine: ENGINE_VERSION,
            tree: tree_version(&self.story),
        };
        Ok(self.story)
    }

    fn open_knot(&mut self, name: String) {
        self.story
            .knots
            .entry(name.clone())
            .or_default()
            .stitches
            .entry(IMPLICIT.to_string())
            .or_default();
        self.knot = name;
        self.stitch = IMPLICIT.to_string();
        self.chain.clear();
    }

    fn open_stitch(&mut self, name: String) {
        self.story
            .knots
            .entry(self.knot.clone())
            .or_default()
            .stitches
            .entry(name.clone())
            .or_default();
        self.stitch = name;
        self.chain.clear();
    }

    /// Navigate from the current stitch root through the chain of open
    /// choice nodes to the current insertion point.
    pub(crate) fn container_mut(&mut self) -> &mut Vec<Block> {
        let stitch = self
            .story
            .knots
            .entry(self.knot.clone())
            .or_default()
            .stitches
            .entry(self.stitch.clone())
            .or_default();
        let mut items = &mut stitch.blocks;
        for &i in &self.chain {
            items = match &mut items[i] {
                Block::Choice { node, .. } => node,
                _ => unreachable!("node chain points at choice blocks"),
            };
        }
        items
    }

    fn handle_choice(&mut self, level: usize, sticky: bool, rest: &str) -> Result<(), ParseError> {
        self.chain.truncate(level.saturating_sub(1));
        let choice = self.parse_choice_body(sticky, rest)?;
        let items = self.container_mut();
        items.push(choice);
        let idx = items.len() - 1;
        self.chain.push(idx);
        Ok(())
    }

    fn handle_gather(&mut self, level: usize, rest: &str) -> Result<(), ParseError> {
        self.chain.truncate(level.saturating_sub(1));
        let blocks = self.parse_fragment(rest, true)?;
        self.container_mut().extend(blocks);
        Ok(())
    }

    fn handle_text(&mut self, text: &str) -> Result<(), ParseError> {
        let blocks = self.parse_fragment(text, true)?;
        self.container_mut().extend(blocks);
        Ok(())
    }

    /// Synthesize a label for an unlabelled alternatives block. The `~`
    /// prefix keeps these apart from author identifiers.
    pub(crate) fn next_alt_label(&mut self) -> String {
        self.alt_seq += 1;
        format!("~{}", self.alt_seq)
    }
}

/// The story's tree version comes from a `CONST tree = N` declaration.
fn tree_version(story: &Story) -> u32 {
    story
        .constants
        .iter()
        .find(|(name, _)| name == "tree")
        .and_then(|(_, rhs)| rhs.trim().parse().ok())
        .unwrap_or(0)
}
