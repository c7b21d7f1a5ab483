//! Public session API
//!
//! A [`Session`] owns one playthrough of a parsed [`Story`]: the
//! interpreter state, the pending paragraph and choice queues, bound
//! host functions, and variable observers. The API is a thin façade
//! over the walker in [`crate::interpreter::engine`]; every call is
//! side-effect-free when its precondition does not hold.
//!
//! ```text
//! let story = Parser::new(source)?.parse_story()?;
//! let mut session = Session::new(story);
//! session.begin()?;
//!
//! while !session.is_over() {
//!     for paragraph in session.advance(0) {
//!         println!("{}", paragraph.text);
//!     }
//!     if session.can_choose() {
//!         session.choose(ask_user(session.choices()))?;
//!     } else {
//!         break;
//!     }
//! }
//! ```

use crate::interpreter::engine::Address;
use crate::interpreter::errors::RuntimeError;
use crate::interpreter::{expressions, HostFn};
use crate::parser::ast::{Story, ENGINE_VERSION, IMPLICIT};
use crate::state::value::{ListValue, Value};
use crate::state::{Paragraph, PendingChoice, Snapshot, State};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rustc_hash::FxHashMap;
use std::rc::Rc;
use tracing::debug;

/// Variable observer: called with the new value after a change.
pub type ObserverFn = Box<dyn FnMut(&Value)>;

/// Snapshot migrator: bridges an older snapshot to the story's current
/// tree version.
pub type MigratorFn = Box<dyn Fn(Snapshot) -> Result<Snapshot, RuntimeError>>;

/// One interactive playthrough of a story.
pub struct Session {
    pub(crate) story: Rc<Story>,
    pub(crate) state: State,
    pub(crate) functions: FxHashMap<String, HostFn>,
    pub(crate) observers: FxHashMap<String, Vec<ObserverFn>>,
    pub(crate) migrator: Option<MigratorFn>,
    pub(crate) rng: SmallRng,
    pub(crate) fallback: Option<String>,
    pub(crate) read_depth: usize,
}

impl Session {
    pub fn new(story: Story) -> Self {
        Self::with_rng(story, SmallRng::from_entropy())
    }

    /// Deterministic session for tests and replays; equivalent to
    /// calling `SEED_RANDOM(seed)` before anything runs.
    pub fn with_seed(story: Story, seed: u64) -> Self {
        Self::with_rng(story, SmallRng::seed_from_u64(seed))
    }

    fn with_rng(story: Story, rng: SmallRng) -> Self {
        let story = Rc::new(story);
        let mut session = Session {
            story: Rc::clone(&story),
            state: State::default(),
            functions: FxHashMap::default(),
            observers: FxHashMap::default(),
            migrator: None,
            rng,
            fallback: None,
            read_depth: 0,
        };

        // Every LIST declaration doubles as a set variable holding its
        // initially-active items. The origin entry is recorded even when
        // nothing starts enabled.
        for def in &story.lists {
            let mut value = ListValue::new();
            value.add_origin(&def.name);
            for item in &def.initial {
                value.insert(&def.name, item);
            }
            session
                .state
                .variables
                .insert(def.name.clone(), Value::List(value));
        }

        // Constants, then variables, in declaration order so later RHS
        // expressions can use earlier names. A RHS that fails to
        // evaluate is kept as literal text.
        for (name, rhs) in &story.constants {
            let value = session.eval_decl(rhs);
            session.state.constants.insert(name.clone(), value);
        }
        for (name, rhs) in &story.variables {
            let value = session.eval_decl(rhs);
            session.state.variables.insert(name.clone(), value);
        }

        session
    }

    fn eval_decl(&mut self, rhs: &str) -> Value {
        let mut ctx = self.eval_ctx();
        match expressions::evaluate(rhs, &mut ctx) {
            Ok(value) => value,
            Err(_) => Value::Str(rhs.to_string()),
        }
    }

    pub fn story(&self) -> &Story {
        &self.story
    }

    /// Start narration from the top-level content. A no-op once any
    /// output exists or the story is over.
    pub fn begin(&mut self) -> Result<(), RuntimeError> {
        if !self.state.output.is_empty()
            || self.state.is_over
            || !self.state.paragraphs.is_empty()
            || !self.state.choices.is_empty()
        {
            return Ok(());
        }
        debug!("session begin");
        self.read_address(Address {
            knot: IMPLICIT.to_string(),
            stitch: IMPLICIT.to_string(),
            label: None,
        })
    }

    pub fn can_continue(&self) -> bool {
        !self.state.paragraphs.is_empty()
    }

    pub fn can_choose(&self) -> bool {
        !self.can_continue() && !self.state.choices.is_empty()
    }

    /// True once nothing is pending and the story has ended — via
    /// `-> END` / `-> DONE`, or by running out of content.
    pub fn is_over(&self) -> bool {
        self.state.is_over && !self.can_continue() && !self.can_choose()
    }

    /// Dequeue up to `count` pending paragraphs (all of them when
    /// `count` is 0), appending them to the output log. Empty when
    /// nothing is pending.
    pub fn advance(&mut self, count: usize) -> Vec<Paragraph> {
        let pending = self.state.paragraphs.len();
        let n = if count == 0 { pending } else { count.min(pending) };
        let mut result = Vec::with_capacity(n);
        for _ in 0..n {
            if let Some(paragraph) = self.state.paragraphs.pop_front() {
                let paragraph = sanitize(paragraph);
                self.state.output.push(paragraph.clone());
                result.push(paragraph);
            }
        }
        if n > 0 && self.state.paragraphs.is_empty() && self.state.choices.is_empty() {
            self.state.is_over = true;
        }
        result
    }

    /// The pending menu. Empty while paragraphs are still pending.
    pub fn choices(&self) -> &[PendingChoice] {
        if self.can_continue() {
            &[]
        } else {
            &self.state.choices
        }
    }

    /// Select menu entry `index` (1-based): clears both queues, narrates
    /// the choice text, records the path visit, and reads on from the
    /// choice's divert or node.
    pub fn choose(&mut self, index: usize) -> Result<(), RuntimeError> {
        let len = self.state.choices.len();
        if index == 0 || index > len {
            return Err(RuntimeError::OutOfRange { index, len });
        }
        let entry = self.state.choices[index - 1].clone();
        debug!(title = %entry.title, "choose");

        self.state.paragraphs.clear();
        self.state.choices.clear();
        self.fallback = None;

        if let Some(text) = &entry.text {
            self.push_paragraph(text.clone(), Vec::new());
        }

        let knot = self.state.current_path.knot.clone();
        let stitch = self.state.current_path.stitch.clone();
        self.state.visits.bump_label(&knot, &stitch, &entry.path);

        match &entry.divert {
            Some(target) => self.do_read(target),
            None => self.resume_path(&knot, &stitch, &entry.path),
        }
    }

    /// Observe a variable: `callback` fires whenever an assignment
    /// changes its value.
    pub fn observe(&mut self, name: &str, callback: ObserverFn) {
        self.observers
            .entry(name.to_string())
            .or_default()
            .push(callback);
    }

    /// Bind a host function callable from story expressions.
    pub fn bind(&mut self, name: &str, function: HostFn) {
        self.functions.insert(name.to_string(), function);
    }

    /// Register the migrator used by [`Session::load`] for snapshots
    /// with an older tree version.
    pub fn on_migrate(&mut self, migrator: MigratorFn) {
        self.migrator = Some(migrator);
    }

    /// Read a variable (or constant) by name.
    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.state
            .temp
            .get(name)
            .or_else(|| self.state.variables.get(name))
            .or_else(|| self.state.constants.get(name))
    }

    /// Set a variable from the host, firing observers on change.
    pub fn set_variable(&mut self, name: &str, value: Value) -> Result<(), RuntimeError> {
        if self.story.is_constant(name) {
            return Err(RuntimeError::ConstAssignment {
                name: name.to_string(),
            });
        }
        let old = self.state.variables.insert(name.to_string(), value.clone());
        if old.as_ref() != Some(&value) {
            self.fire_observers(name, &value);
        }
        Ok(())
    }

    /// Consumed paragraphs, oldest first.
    pub fn output(&self) -> &[Paragraph] {
        &self.state.output
    }

    pub fn save(&self) -> Snapshot {
        self.state.snapshot(self.story.version)
    }

    /// Restore a snapshot. An older tree version goes through the
    /// registered migrator; a newer one (or a newer engine) errors.
    pub fn load(&mut self, snapshot: Snapshot) -> Result<(), RuntimeError> {
        let story_tree = self.story.version.tree;

        if snapshot.version.engine > ENGINE_VERSION || snapshot.version.tree > story_tree {
            return Err(RuntimeError::Migration {
                snapshot: snapshot.version.tree,
                story: story_tree,
            });
        }

        let snapshot = if snapshot.version.tree == story_tree {
            snapshot
        } else {
            let Some(migrator) = &self.migrator else {
                return Err(RuntimeError::Migration {
                    snapshot: snapshot.version.tree,
                    story: story_tree,
                });
            };
            let migrated = migrator(snapshot)?;
            if migrated.version.tree != story_tree {
                return Err(RuntimeError::Migration {
                    snapshot: migrated.version.tree,
                    story: story_tree,
                });
            }
            migrated
        };

        debug!("snapshot loaded");
        self.state.restore(snapshot);
        Ok(())
    }
}

/// Strip dangling glue markers left by constructs that emitted nothing.
fn sanitize(mut paragraph: Paragraph) -> Paragraph {
    let text = paragraph.text.trim();
    let text = text.strip_prefix("<>").unwrap_or(text);
    let text = text.strip_suffix("<>").unwrap_or(text);
    paragraph.text = text.trim().to_string();
    paragraph
}
