//! Story walker
//!
//! The interpreter core: given an address, resolve the stitch's block
//! list and walk it under the read-mode machine, filling the paragraph
//! and choice queues on the session state. All expression work is
//! delegated to [`super::expressions`].
//!
//! # Read modes
//!
//! - `Text` accepts any block.
//! - `Choices` accepts only choice blocks; the first non-choice quits
//!   the walk, leaving the rest unread behind the pending menu.
//! - `Gathers` skips choice blocks; the first non-choice block resumes
//!   narration. This is how control returns from a chosen branch to the
//!   gather line that follows it.
//!
//! # Resume chains
//!
//! A pending choice records its position as `label ">" i.j…` — indices
//! through nested choice nodes, with `t`/`tN`/`f` marks for condition
//! arms. Choosing it re-enters the stitch, skips straight to that
//! position, reads the node in `Text` mode, and falls through to
//! `Gathers` for the rest of the container.

use super::errors::RuntimeError;
use super::expressions::{self, EvalCtx};
use super::lists;
use crate::parser::ast::{Block, SeqMode, Story, IMPLICIT};
use crate::parser::fragments::find_matching_brace;
use crate::parser::lexer;
use crate::session::Session;
use crate::state::{CurrentPath, Paragraph, PendingChoice};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::rc::Rc;
use tracing::{debug, trace};

/// Resolved divert target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Address {
    pub knot: String,
    pub stitch: String,
    pub label: Option<String>,
}

/// One step of a saved descent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Step {
    /// Descend into the node of the choice (or arm of the condition) at
    /// this index, then continue after it in `Gathers` mode.
    Enter(usize),
    /// Condition arm marker: `t`, `tN`, or `f`.
    Arm(String),
    /// Start reading at this index in `Text` mode (label divert).
    At(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadMode {
    Text,
    Choices,
    Gathers,
    Quit,
}

/// Walk context: the scope being read and the chain of container steps
/// leading to the current block list.
pub(crate) struct ReadCtx {
    pub knot: String,
    pub stitch: String,
    pub chain: Vec<String>,
}

impl ReadCtx {
    fn child(&self, step: String) -> ReadCtx {
        let mut chain = self.chain.clone();
        chain.push(step);
        ReadCtx {
            knot: self.knot.clone(),
            stitch: self.stitch.clone(),
            chain,
        }
    }

    fn path_with(&self, index: usize) -> String {
        let mut parts = self.chain.clone();
        parts.push(index.to_string());
        parts.join(".")
    }
}

/// Resolve a 1–3 part dotted target against a context scope.
///
/// Three parts are literal. Otherwise the first part is tried as a knot,
/// then as a stitch of the current knot; a last unmatched token is a
/// label in the surrounding scope (validated against the block tree).
pub(crate) fn resolve_address(
    story: &Story,
    parts: &[String],
    knot: &str,
    stitch: &str,
) -> Option<Address> {
    match parts {
        [k, s, l] => {
            story.stitch(k, s)?;
            Some(Address {
                knot: k.clone(),
                stitch: s.clone(),
                label: Some(l.clone()),
            })
        }
        [k, second] if story.knot(k).is_some() => {
            if story.stitch(k, second).is_some() {
                Some(Address {
                    knot: k.clone(),
                    stitch: second.clone(),
                    label: None,
                })
            } else {
                label_address(story, k, IMPLICIT, second)
            }
        }
        [s, l] if story.stitch(knot, s).is_some() => label_address(story, knot, s, l),
        [k] if story.knot(k).is_some() => Some(Address {
            knot: k.clone(),
            stitch: IMPLICIT.to_string(),
            label: None,
        }),
        [s] if story.stitch(knot, s).is_some() => Some(Address {
            knot: knot.to_string(),
            stitch: s.clone(),
            label: None,
        }),
        [l] => label_address(story, knot, stitch, l),
        _ => None,
    }
}

fn label_address(story: &Story, knot: &str, stitch: &str, label: &str) -> Option<Address> {
    let blocks = &story.stitch(knot, stitch)?.blocks;
    find_label_in(blocks, label)?;
    Some(Address {
        knot: knot.to_string(),
        stitch: stitch.to_string(),
        label: Some(label.to_string()),
    })
}

/// Locate a label in a block list, descending through choice nodes and
/// condition arms. Returns the resume chain leading to it.
pub(crate) fn find_label_in(items: &[Block], label: &str) -> Option<Vec<Step>> {
    for (i, block) in items.iter().enumerate() {
        match block {
            Block::Paragraph { label: Some(l), .. } if l == label => {
                return Some(vec![Step::At(i)]);
            }
            Block::Alts { label: l, .. } if l == label => {
                return Some(vec![Step::At(i)]);
            }
            Block::Choice { node, .. } => {
                if let Some(mut steps) = find_label_in(node, label) {
                    steps.insert(0, Step::Enter(i));
                    return Some(steps);
                }
            }
            Block::Condition {
                branches,
                otherwise,
                ..
            } => {
                for (bi, branch) in branches.iter().enumerate() {
                    if let Some(mut steps) = find_label_in(branch, label) {
                        steps.insert(0, Step::Arm(arm_tag(bi, branches.len())));
                        steps.insert(0, Step::Enter(i));
                        return Some(steps);
                    }
                }
                if let Some(branch) = otherwise {
                    if let Some(mut steps) = find_label_in(branch, label) {
                        steps.insert(0, Step::Arm("f".to_string()));
                        steps.insert(0, Step::Enter(i));
                        return Some(steps);
                    }
                }
            }
            _ => {}
        }
    }
    None
}

fn arm_tag(index: usize, arm_count: usize) -> String {
    if index == 0 && arm_count == 1 {
        "t".to_string()
    } else {
        format!("t{}", index + 1)
    }
}

fn parse_path_steps(path: &str) -> Vec<Step> {
    let chain = path.split_once('>').map_or(path, |(_, c)| c);
    chain
        .split('.')
        .filter(|s| !s.is_empty())
        .map(|s| match s.parse::<usize>() {
            Ok(i) => Step::Enter(i),
            Err(_) => Step::Arm(s.to_string()),
        })
        .collect()
}

fn select_arm<'a>(
    branches: &'a [Vec<Block>],
    otherwise: &'a Option<Vec<Block>>,
    tag: &str,
) -> Option<&'a Vec<Block>> {
    if tag == "f" {
        return otherwise.as_ref();
    }
    let index = tag
        .strip_prefix('t')
        .and_then(|n| if n.is_empty() { Some(1) } else { n.parse().ok() })
        .unwrap_or(1usize);
    branches.get(index - 1)
}

impl Session {
    /// Follow a divert target string from the current scope.
    pub(crate) fn do_read(&mut self, target: &str) -> Result<(), RuntimeError> {
        let target = target.trim();
        if target == "END" || target == "DONE" {
            debug!(divert = target, "story over");
            self.state.is_over = true;
            return Ok(());
        }
        if !lexer::is_address(target) {
            return Err(RuntimeError::BadAddress {
                target: target.to_string(),
                knot: self.state.current_path.knot.clone(),
                stitch: self.state.current_path.stitch.clone(),
            });
        }
        let parts: Vec<String> = target.split('.').map(|p| p.trim().to_string()).collect();
        let addr = resolve_address(
            &self.story,
            &parts,
            &self.state.current_path.knot.clone(),
            &self.state.current_path.stitch.clone(),
        )
        .ok_or_else(|| RuntimeError::BadAddress {
            target: target.to_string(),
            knot: self.state.current_path.knot.clone(),
            stitch: self.state.current_path.stitch.clone(),
        })?;
        self.read_address(addr)
    }

    pub(crate) fn read_address(&mut self, addr: Address) -> Result<(), RuntimeError> {
        debug!(knot = %addr.knot, stitch = %addr.stitch, label = ?addr.label, "divert");
        self.read_depth += 1;
        let result = self.read_inner(&addr);
        self.read_depth -= 1;
        if self.read_depth == 0 {
            self.run_fallback()?;
            if result.is_ok() {
                self.finish_walk();
            }
        }
        result
    }

    fn read_inner(&mut self, addr: &Address) -> Result<(), RuntimeError> {
        // Visit bookkeeping: knot counter on boundary crossing (or first
        // ever entry), stitch counter on every entry, temp cleared when
        // the scope actually changes.
        let knot_changed = self.state.current_path.knot != addr.knot;
        let stitch_changed = knot_changed || self.state.current_path.stitch != addr.stitch;
        if stitch_changed {
            self.state.temp.clear();
        }
        let count_knot = knot_changed || self.state.visits.knot_count(&addr.knot) == 0;
        self.state.visits.enter(&addr.knot, &addr.stitch, count_knot);
        self.state.current_path = CurrentPath {
            knot: addr.knot.clone(),
            stitch: addr.stitch.clone(),
        };

        let story = Rc::clone(&self.story);
        let stitch = story
            .stitch(&addr.knot, &addr.stitch)
            .ok_or_else(|| RuntimeError::BadAddress {
                target: format!("{}.{}", addr.knot, addr.stitch),
                knot: addr.knot.clone(),
                stitch: addr.stitch.clone(),
            })?;

        let resume = match &addr.label {
            Some(label) => {
                find_label_in(&stitch.blocks, label).ok_or_else(|| RuntimeError::BadAddress {
                    target: label.clone(),
                    knot: addr.knot.clone(),
                    stitch: addr.stitch.clone(),
                })?
            }
            None => Vec::new(),
        };

        let rc = ReadCtx {
            knot: addr.knot.clone(),
            stitch: addr.stitch.clone(),
            chain: Vec::new(),
        };
        self.read_items(&stitch.blocks, &rc, &resume, ReadMode::Text)?;
        Ok(())
    }

    /// A fallback registered during the walk fires once the walk is
    /// done, if no visible choice survived.
    fn run_fallback(&mut self) -> Result<(), RuntimeError> {
        if let Some(target) = self.fallback.take() {
            if !self.state.is_over && self.state.choices.is_empty() {
                debug!(divert = %target, "taking fallback choice");
                self.do_read(&target)?;
            }
        }
        Ok(())
    }

    /// Re-enter a stitch along a saved choice path.
    pub(crate) fn resume_path(
        &mut self,
        knot: &str,
        stitch: &str,
        path: &str,
    ) -> Result<(), RuntimeError> {
        let steps = parse_path_steps(path);
        let story = Rc::clone(&self.story);
        let stitch_ref = story
            .stitch(knot, stitch)
            .ok_or_else(|| RuntimeError::BadAddress {
                target: path.to_string(),
                knot: knot.to_string(),
                stitch: stitch.to_string(),
            })?;

        self.read_depth += 1;
        let rc = ReadCtx {
            knot: knot.to_string(),
            stitch: stitch.to_string(),
            chain: Vec::new(),
        };
        let result = self
            .read_items(&stitch_ref.blocks, &rc, &steps, ReadMode::Text)
            .map(|_| ());
        self.read_depth -= 1;
        if self.read_depth == 0 {
            self.run_fallback()?;
            if result.is_ok() {
                self.finish_walk();
            }
        }
        result
    }

    /// A completed walk that queued nothing means the story ran out of
    /// content.
    fn finish_walk(&mut self) {
        if self.state.paragraphs.is_empty() && self.state.choices.is_empty() {
            self.state.is_over = true;
        }
    }

    fn read_items(
        &mut self,
        items: &[Block],
        rc: &ReadCtx,
        resume: &[Step],
        mode: ReadMode,
    ) -> Result<ReadMode, RuntimeError> {
        let mut mode = mode;
        let mut start = 0;

        match resume.first() {
            Some(Step::At(i)) => {
                start = *i;
                mode = ReadMode::Text;
            }
            Some(Step::Enter(i)) => {
                let i = *i;
                if let Some(block) = items.get(i) {
                    let m = self.resume_into(block, rc, i, &resume[1..])?;
                    if m == ReadMode::Quit {
                        return Ok(ReadMode::Quit);
                    }
                    // A fresh menu built inside the resumed node stands on
                    // its own; old sibling choices are not re-offered.
                    if m == ReadMode::Choices {
                        return Ok(ReadMode::Quit);
                    }
                }
                start = i + 1;
                mode = ReadMode::Gathers;
            }
            Some(Step::Arm(_)) | None => {}
        }

        let mut i = start;
        while i < items.len() {
            let block = &items[i];
            if let Block::Choice { .. } = block {
                if mode == ReadMode::Gathers {
                    i += 1;
                    continue;
                }
                mode = ReadMode::Choices;
                self.register_choice(block, rc, i);
                i += 1;
                continue;
            }

            if mode == ReadMode::Choices {
                // First non-choice ends the group; the rest stays unread.
                return Ok(ReadMode::Quit);
            }
            if mode == ReadMode::Gathers {
                mode = ReadMode::Text;
            }

            match self.read_block(block, rc, i)? {
                ReadMode::Quit => return Ok(ReadMode::Quit),
                ReadMode::Choices => mode = ReadMode::Choices,
                _ => {}
            }
            i += 1;
        }

        Ok(mode)
    }

    fn resume_into(
        &mut self,
        block: &Block,
        rc: &ReadCtx,
        index: usize,
        rest: &[Step],
    ) -> Result<ReadMode, RuntimeError> {
        match block {
            Block::Choice { node, .. } => {
                let sub = rc.child(index.to_string());
                self.read_items(node, &sub, rest, ReadMode::Text)
            }
            Block::Condition {
                branches,
                otherwise,
                ..
            } => {
                // The saved arm is re-entered without re-evaluating its
                // condition, so resumption is exact.
                if let Some(Step::Arm(tag)) = rest.first() {
                    if let Some(branch) = select_arm(branches, otherwise, tag) {
                        let sub = rc.child(index.to_string()).child(tag.clone());
                        return self.read_items(branch, &sub, &rest[1..], ReadMode::Text);
                    }
                }
                Ok(ReadMode::Text)
            }
            _ => Ok(ReadMode::Text),
        }
    }

    fn read_block(
        &mut self,
        block: &Block,
        rc: &ReadCtx,
        index: usize,
    ) -> Result<ReadMode, RuntimeError> {
        trace!(knot = %rc.knot, stitch = %rc.stitch, index, "read block");
        match block {
            Block::Paragraph {
                text,
                label,
                divert,
                tags,
            } => {
                if let Some(l) = label {
                    self.state.visits.bump_label(&rc.knot, &rc.stitch, l);
                }
                if let Some(t) = text {
                    let expanded = self.expand(t);
                    self.push_paragraph(expanded, tags.clone());
                } else if !tags.is_empty() {
                    self.push_paragraph(String::new(), tags.clone());
                }
                if let Some(d) = divert {
                    self.do_read(d)?;
                    return Ok(ReadMode::Quit);
                }
                Ok(ReadMode::Text)
            }

            Block::Alts {
                items,
                mode,
                shuffled,
                label,
            } => {
                let visit = self.state.visits.bump_label(&rc.knot, &rc.stitch, label) as usize;
                let n = items.len();
                if n == 0 {
                    return Ok(ReadMode::Text);
                }
                let pos = match mode {
                    SeqMode::Stopping => Some(visit.min(n) - 1),
                    SeqMode::Cycle => Some((visit - 1) % n),
                    SeqMode::Once => (visit <= n).then(|| visit - 1),
                };
                let Some(pos) = pos else {
                    return Ok(ReadMode::Text);
                };
                let pos = if *shuffled {
                    self.shuffled_index(rc, label, visit, n, pos)
                } else {
                    pos
                };
                self.read_items(&items[pos], rc, &[], ReadMode::Text)
            }

            Block::Condition {
                conditions,
                branches,
                otherwise,
            } => {
                let mut chosen: Option<(String, &Vec<Block>)> = None;
                for (bi, cond) in conditions.iter().enumerate() {
                    let mut ctx = self.eval_ctx();
                    if expressions::truthy(cond, &mut ctx) {
                        if let Some(branch) = branches.get(bi) {
                            chosen = Some((arm_tag(bi, conditions.len()), branch));
                        }
                        break;
                    }
                }
                let chosen = match chosen {
                    Some(c) => Some(c),
                    None => otherwise.as_ref().map(|b| ("f".to_string(), b)),
                };
                match chosen {
                    Some((tag, branch)) => {
                        let sub = rc.child(index.to_string()).child(tag);
                        self.read_items(branch, &sub, &[], ReadMode::Text)
                    }
                    None => Ok(ReadMode::Text),
                }
            }

            Block::Assign { var, value, temp } => {
                self.run_assign(var, value, *temp)?;
                Ok(ReadMode::Text)
            }

            Block::Choice { .. } => unreachable!("choices handled by read_items"),
        }
    }

    /// Pick the alternative index under a seeded permutation. The seed
    /// is keyed per address and renewed at the start of each epoch of N
    /// visits, so every alternative appears once per epoch and saved
    /// games replay identically.
    fn shuffled_index(
        &mut self,
        rc: &ReadCtx,
        label: &str,
        visit: usize,
        n: usize,
        pos: usize,
    ) -> usize {
        let key = format!("{}.{}:{}", rc.knot, rc.stitch, label);
        let seed = if (visit - 1) % n == 0 {
            let seed = self.rng.gen::<u64>();
            self.state.seeds.insert(key, seed);
            seed
        } else {
            match self.state.seeds.get(&key) {
                Some(seed) => *seed,
                None => {
                    let seed = self.rng.gen::<u64>();
                    self.state.seeds.insert(key, seed);
                    seed
                }
            }
        };
        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(&mut rand::rngs::SmallRng::seed_from_u64(seed));
        order[pos]
    }

    fn register_choice(&mut self, block: &Block, rc: &ReadCtx, index: usize) {
        let Block::Choice {
            menu,
            text,
            condition,
            divert,
            sticky,
            label,
            ..
        } = block
        else {
            return;
        };

        if let Some(cond) = condition {
            let mut ctx = self.eval_ctx();
            if !expressions::truthy(cond, &mut ctx) {
                return;
            }
        }

        let path = format!(
            "{}>{}",
            label.clone().unwrap_or_default(),
            rc.path_with(index)
        );

        let Some(caption) = menu else {
            // Fallback: remembered, fired only if the menu stays empty.
            if self.fallback.is_none() {
                self.fallback = divert.clone();
            }
            return;
        };

        let visible = *sticky || self.state.visits.label_count(&rc.knot, &rc.stitch, &path) == 0;
        if !visible {
            return;
        }
        let title = self.expand(caption);
        let text = text.as_ref().map(|t| self.expand(t));
        trace!(%title, %path, "register choice");
        self.state.choices.push(PendingChoice {
            title,
            text,
            divert: divert.clone(),
            path,
        });
    }

    fn run_assign(&mut self, var: &str, value: &str, temp: bool) -> Result<(), RuntimeError> {
        // Empty target: evaluate-and-discard statement.
        if var.is_empty() {
            let mut ctx = self.eval_ctx();
            if let Err(err) = expressions::evaluate(value, &mut ctx) {
                debug!(%err, "expression statement failed");
            }
            return Ok(());
        }

        if self.story.is_constant(var) {
            return Err(RuntimeError::ConstAssignment {
                name: var.to_string(),
            });
        }

        let new = {
            let mut ctx = self.eval_ctx();
            expressions::evaluate(value, &mut ctx)?
        };

        // `temp` routing: explicit marker, or the name already lives in
        // the temp scope.
        let to_temp = temp || self.state.temp.contains_key(var);
        let old = if to_temp {
            self.state.temp.insert(var.to_string(), new.clone())
        } else {
            self.state.variables.insert(var.to_string(), new.clone())
        };

        if old.as_ref() != Some(&new) {
            self.fire_observers(var, &new);
        }
        Ok(())
    }

    /// Expand `{expr}` templates against current state. Failed
    /// expressions render as empty text; `{{}}` renders literal braces.
    pub(crate) fn expand(&mut self, text: &str) -> String {
        let mut out = String::new();
        let mut i = 0;
        while i < text.len() {
            if text[i..].starts_with("{{}}") {
                out.push_str("{}");
                i += 4;
                continue;
            }
            if text[i..].starts_with('{') {
                if let Some(close) = find_matching_brace(text, i) {
                    let content = &text[i + 1..close];
                    let story = Rc::clone(&self.story);
                    let mut ctx = self.eval_ctx();
                    match expressions::evaluate(content, &mut ctx) {
                        Ok(value) => out.push_str(&lists::render(&value, &story)),
                        Err(err) => debug!(%err, "template expression failed"),
                    }
                    i = close + 1;
                    continue;
                }
            }
            let Some(ch) = text[i..].chars().next() else {
                break;
            };
            out.push(ch);
            i += ch.len_utf8();
        }
        out
    }

    /// Queue a paragraph, honouring glue: if the previous pending
    /// paragraph ends with `<>` or this text starts with `<>`, the two
    /// are concatenated (markers stripped) and their tags merged.
    pub(crate) fn push_paragraph(&mut self, text: String, tags: Vec<String>) {
        let prev_glue = self
            .state
            .paragraphs
            .back()
            .is_some_and(|p| p.text.ends_with("<>"));
        let starts_glue = text.starts_with("<>");

        if prev_glue || starts_glue {
            if let Some(prev) = self.state.paragraphs.back_mut() {
                if prev_glue {
                    prev.text.truncate(prev.text.len() - 2);
                }
                prev.text.push_str(text.strip_prefix("<>").unwrap_or(&text));
                prev.tags.extend(tags);
                return;
            }
        }

        if text.is_empty() && tags.is_empty() {
            return;
        }
        self.state.paragraphs.push_back(Paragraph { text, tags });
    }

    pub(crate) fn eval_ctx(&mut self) -> EvalCtx<'_> {
        EvalCtx {
            story: &self.story,
            temp: &self.state.temp,
            variables: &self.state.variables,
            constants: &self.state.constants,
            visits: &self.state.visits,
            knot: &self.state.current_path.knot,
            stitch: &self.state.current_path.stitch,
            functions: &self.functions,
            rng: &mut self.rng,
        }
    }

    pub(crate) fn fire_observers(&mut self, name: &str, value: &crate::state::value::Value) {
        if let Some(callbacks) = self.observers.get_mut(name) {
            for callback in callbacks.iter_mut() {
                callback(value);
            }
        }
    }
}
