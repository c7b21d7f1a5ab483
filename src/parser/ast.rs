//! Story model definitions
//!
//! The parser turns narrative source into a [`Story`]: a tree of knots →
//! stitches → nested [`Block`]s, plus the declaration tables (`INCLUDE`,
//! `CONST`, `VAR`, `LIST`) and a [`Version`] used for state-migration
//! gating.
//!
//! The model is immutable once parsing finishes; all mutable run state
//! lives in [`crate::state`].

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Name of the implicit knot holding top-level content, and of the
/// implicit stitch holding a knot's own blocks.
pub const IMPLICIT: &str = "_";

/// Line position in the source, reported by parse errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub line: usize,
}

impl SourceLocation {
    pub fn new(line: usize) -> Self {
        SourceLocation { line }
    }
}

/// Engine/tree version pair recorded in every snapshot.
///
/// `tree` comes from a `CONST tree = N` declaration in the script and
/// defaults to 0; `engine` is fixed by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub engine: u32,
    pub tree: u32,
}

/// Snapshot layout revision understood by this build.
pub const ENGINE_VERSION: u32 = 1;

impl Default for Version {
    fn default() -> Self {
        Version {
            engine: ENGINE_VERSION,
            tree: 0,
        }
    }
}

/// A `LIST` declaration. Item ordinals are 1-based declaration positions;
/// `initial` names the parenthesised items that start enabled.
#[derive(Debug, Clone, PartialEq)]
pub struct ListDef {
    pub name: String,
    pub items: Vec<String>,
    pub initial: Vec<String>,
}

impl ListDef {
    /// 1-based ordinal of `item`, if declared in this list.
    pub fn ordinal(&self, item: &str) -> Option<usize> {
        self.items.iter().position(|i| i == item).map(|p| p + 1)
    }
}

/// Sequencing strategy of an alternatives block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqMode {
    /// Advance once per visit, then repeat the last item.
    Stopping,
    /// Wrap around forever.
    Cycle,
    /// Advance once per visit, then produce nothing.
    Once,
}

/// One narrative unit. Explicit tagged variants; the interpreter
/// dispatches on the variant, never on field presence.
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    /// A line of narration. Any of the parts may be absent, but not all.
    Paragraph {
        text: Option<String>,
        label: Option<String>,
        divert: Option<String>,
        tags: Vec<String>,
    },

    /// A menu option (`*` one-shot, `+` sticky). `menu == None` marks a
    /// fallback taken silently when no visible option survives. `node`
    /// holds the blocks read after the option is selected.
    Choice {
        menu: Option<String>,
        text: Option<String>,
        condition: Option<String>,
        divert: Option<String>,
        sticky: bool,
        label: Option<String>,
        node: Vec<Block>,
    },

    /// `{cond: a | b}` or a switch `{c1: a | c2: b | else: c}`. One
    /// condition means if/else; several mean first-true-wins.
    Condition {
        conditions: Vec<String>,
        branches: Vec<Vec<Block>>,
        otherwise: Option<Vec<Block>>,
    },

    /// Varying text `{a|b|c}` with a sequencing mode. The label addresses
    /// the visit counter and shuffle seed; the parser synthesizes one when
    /// the author did not supply it.
    Alts {
        items: Vec<Vec<Block>>,
        mode: SeqMode,
        shuffled: bool,
        label: String,
    },

    /// `~ [temp] name = expr` (after desugaring of `++ -- += -=`).
    Assign {
        var: String,
        value: String,
        temp: bool,
    },
}

/// Ordered block list of one stitch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stitch {
    pub blocks: Vec<Block>,
}

/// Named outer scope; `stitches[IMPLICIT]` holds the knot's own blocks.
#[derive(Debug, Clone, Default)]
pub struct Knot {
    pub stitches: FxHashMap<String, Stitch>,
}

/// The parsed story model.
#[derive(Debug, Clone, Default)]
pub struct Story {
    pub knots: FxHashMap<String, Knot>,
    pub includes: Vec<String>,
    /// `CONST` declarations in source order: name → RHS expression.
    pub constants: Vec<(String, String)>,
    /// `VAR` declarations in source order: name → RHS expression.
    pub variables: Vec<(String, String)>,
    /// `LIST` declarations in source order; ordinals and ambiguous-item
    /// lookup depend on this order.
    pub lists: Vec<ListDef>,
    /// `TODO:` lines, kept for host tooling.
    pub todos: Vec<String>,
    pub version: Version,
}

impl Story {
    pub fn knot(&self, name: &str) -> Option<&Knot> {
        self.knots.get(name)
    }

    pub fn stitch(&self, knot: &str, stitch: &str) -> Option<&Stitch> {
        self.knots.get(knot).and_then(|k| k.stitches.get(stitch))
    }

    pub fn list(&self, name: &str) -> Option<&ListDef> {
        self.lists.iter().find(|l| l.name == name)
    }

    /// Resolve a bare item name by scanning `LIST` declarations in order.
    pub fn find_item(&self, item: &str) -> Option<(&ListDef, usize)> {
        self.lists
            .iter()
            .find_map(|l| l.ordinal(item).map(|ord| (l, ord)))
    }

    pub fn is_constant(&self, name: &str) -> bool {
        self.constants.iter().any(|(n, _)| n == name)
    }
}
