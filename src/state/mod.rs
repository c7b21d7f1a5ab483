//! Mutable session state and persistence
//!
//! Everything the interpreter mutates lives in [`State`]: variable
//! tables, visit counters, shuffle seeds, and the paragraph/choice
//! queues. A [`Snapshot`] is the serializable view of that state plus
//! the story [`Version`], round-tripped through JSON so nested maps and
//! arrays survive losslessly.
//!
//! Constants are evaluated once at session start and are deliberately
//! not part of the snapshot; they are rebuilt from the story on load.

pub mod value;

use crate::parser::ast::{Version, IMPLICIT};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use self::value::Value;

/// One emitted paragraph: narrative text plus its tags.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Paragraph {
    pub text: String,
    pub tags: Vec<String>,
}

/// One pending menu entry. `path` records where the walk descends when
/// the entry is chosen and no divert overrides it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingChoice {
    pub title: String,
    pub text: Option<String>,
    pub divert: Option<String>,
    pub path: String,
}

/// The (knot, stitch) of the most recent visit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentPath {
    pub knot: String,
    pub stitch: String,
}

impl Default for CurrentPath {
    fn default() -> Self {
        CurrentPath {
            knot: IMPLICIT.to_string(),
            stitch: IMPLICIT.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StitchVisits {
    /// How many times this stitch was entered.
    pub entered: u32,
    pub labels: FxHashMap<String, u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KnotVisits {
    /// How many times this knot was entered.
    pub entered: u32,
    pub stitches: FxHashMap<String, StitchVisits>,
}

/// Visit counters, nested knot → stitch → label.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Visits {
    pub knots: FxHashMap<String, KnotVisits>,
}

impl Visits {
    /// Record entry into `(knot, stitch)`. The knot counter only moves
    /// on a knot boundary crossing.
    pub fn enter(&mut self, knot: &str, stitch: &str, knot_changed: bool) {
        let k = self.knots.entry(knot.to_string()).or_default();
        if knot_changed {
            k.entered += 1;
        }
        k.stitches.entry(stitch.to_string()).or_default().entered += 1;
    }

    /// Record a label visit and return the new count.
    pub fn bump_label(&mut self, knot: &str, stitch: &str, label: &str) -> u32 {
        let count = self
            .knots
            .entry(knot.to_string())
            .or_default()
            .stitches
            .entry(stitch.to_string())
            .or_default()
            .labels
            .entry(label.to_string())
            .or_default();
        *count += 1;
        *count
    }

    pub fn knot_count(&self, knot: &str) -> u32 {
        self.knots.get(knot).map_or(0, |k| k.entered)
    }

    pub fn stitch_count(&self, knot: &str, stitch: &str) -> u32 {
        self.knots
            .get(knot)
            .and_then(|k| k.stitches.get(stitch))
            .map_or(0, |s| s.entered)
    }

    pub fn label_count(&self, knot: &str, stitch: &str, label: &str) -> u32 {
        self.knots
            .get(knot)
            .and_then(|k| k.stitches.get(stitch))
            .and_then(|s| s.labels.get(label))
            .copied()
            .unwrap_or(0)
    }
}

/// The full mutable session state.
#[derive(Debug, Default)]
pub struct State {
    pub temp: FxHashMap<String, Value>,
    pub variables: FxHashMap<String, Value>,
    /// Write-once, rebuilt from the story; never serialized.
    pub constants: FxHashMap<String, Value>,
    pub visits: Visits,
    pub seeds: FxHashMap<String, u64>,
    pub current_path: CurrentPath,
    pub paragraphs: VecDeque<Paragraph>,
    pub output: Vec<Paragraph>,
    pub choices: Vec<PendingChoice>,
    pub is_over: bool,
}

/// Serializable view of a [`State`] at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: Version,
    pub temp: FxHashMap<String, Value>,
    pub variables: FxHashMap<String, Value>,
    pub visits: Visits,
    pub seeds: FxHashMap<String, u64>,
    pub current_path: CurrentPath,
    pub paragraphs: VecDeque<Paragraph>,
    pub output: Vec<Paragraph>,
    pub choices: Vec<PendingChoice>,
    #[serde(default)]
    pub is_over: bool,
}

impl Snapshot {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl State {
    pub(crate) fn snapshot(&self, version: Version) -> Snapshot {
        Snapshot {
            version,
            temp: self.temp.clone(),
            variables: self.variables.clone(),
            visits: self.visits.clone(),
            seeds: self.seeds.clone(),
            current_path: self.current_path.clone(),
            paragraphs: self.paragraphs.clone(),
            output: self.output.clone(),
            choices: self.choices.clone(),
            is_over: self.is_over,
        }
    }

    /// Replace run state with a snapshot's. Constants are untouched;
    /// they are rebuilt from the story.
    pub(crate) fn restore(&mut self, snap: Snapshot) {
        self.temp = snap.temp;
        self.variables = snap.variables;
        self.visits = snap.visits;
        self.seeds = snap.seeds;
        self.current_path = snap.current_path;
        self.paragraphs = snap.paragraphs;
        self.output = snap.output;
        self.choices = snap.choices;
        self.is_over = snap.is_over;
    }
}
