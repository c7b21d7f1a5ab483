// Integration tests for the session API: queue invariants, persistence,
// observers, host functions, and migration.

use skein::{Parser, RuntimeError, Session, Value};
use std::cell::RefCell;
use std::rc::Rc;

fn story(source: &str) -> skein::Story {
    Parser::new(source)
        .expect("lexing failed")
        .parse_story()
        .expect("parsing failed")
}

fn session(source: &str) -> Session {
    Session::with_seed(story(source), 1)
}

fn texts(paragraphs: Vec<skein::Paragraph>) -> Vec<String> {
    paragraphs.into_iter().map(|p| p.text).collect()
}

const BRANCHING: &str = "\
-> crossroads
=== crossroads ===
A signpost leans in the wind.
+ North -> north
+ South -> south
=== north ===
Snow underfoot. -> crossroads
=== south ===
Warm sand. -> END";

#[test]
fn test_exactly_one_phase_holds() {
    let check = |s: &Session| {
        let states = [s.can_continue(), s.can_choose(), s.is_over()];
        assert_eq!(
            states.iter().filter(|b| **b).count(),
            1,
            "states were {states:?}"
        );
    };

    let mut s = session(BRANCHING);
    s.begin().unwrap();
    check(&s);
    s.advance(0);
    check(&s);
    s.choose(1).unwrap();
    check(&s);
    s.advance(0);
    check(&s);
    s.choose(2).unwrap();
    check(&s);
    s.advance(0);
    check(&s);
    assert!(s.is_over());
}

#[test]
fn test_advance_one_at_a_time_is_a_prefix() {
    let source = "First.\nSecond.\nThird.";

    let mut all = session(source);
    all.begin().unwrap();
    let drained = texts(all.advance(0));

    let mut stepwise = session(source);
    stepwise.begin().unwrap();
    let mut collected = Vec::new();
    while stepwise.can_continue() {
        let batch = stepwise.advance(1);
        assert_eq!(batch.len(), 1);
        collected.extend(texts(batch));
    }

    assert_eq!(collected, drained);
    assert_eq!(drained, vec!["First.", "Second.", "Third."]);
}

#[test]
fn test_advance_without_pending_is_empty() {
    let mut s = session("Only line.");
    assert!(s.advance(0).is_empty());
    s.begin().unwrap();
    s.advance(0);
    assert!(s.advance(0).is_empty());
}

#[test]
fn test_output_log_accumulates_in_order() {
    let mut s = session(BRANCHING);
    s.begin().unwrap();
    s.advance(0);
    s.choose(2).unwrap();
    s.advance(0);

    let log: Vec<&str> = s.output().iter().map(|p| p.text.as_str()).collect();
    assert_eq!(
        log,
        vec!["A signpost leans in the wind.", "South", "Warm sand."]
    );
}

#[test]
fn test_choose_out_of_range() {
    let mut s = session(BRANCHING);
    s.begin().unwrap();
    s.advance(0);

    assert!(matches!(
        s.choose(0),
        Err(RuntimeError::OutOfRange { index: 0, len: 2 })
    ));
    assert!(matches!(
        s.choose(5),
        Err(RuntimeError::OutOfRange { index: 5, len: 2 })
    ));
    // The menu is intact afterwards.
    assert_eq!(s.choices().len(), 2);
}

#[test]
fn test_choices_hidden_while_paragraphs_pend() {
    let mut s = session(BRANCHING);
    s.begin().unwrap();
    assert!(s.can_continue());
    assert!(s.choices().is_empty());
    s.advance(0);
    assert_eq!(s.choices().len(), 2);
}

#[test]
fn test_begin_is_idempotent() {
    let mut s = session("Once only.");
    s.begin().unwrap();
    let first = texts(s.advance(0));
    s.begin().unwrap();
    assert!(s.advance(0).is_empty());
    assert_eq!(first, vec!["Once only."]);
}

#[test]
fn test_constants_are_fixed_points() {
    let mut s = session("CONST limit = 10\n~ limit = 11\nUnreached.");
    let err = s.begin().unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::ConstAssignment { name } if name == "limit"
    ));
    assert_eq!(s.variable("limit"), Some(&Value::Number(10.0)));
}

#[test]
fn test_save_load_save_round_trip() {
    let mut s = session(BRANCHING);
    s.begin().unwrap();
    s.advance(0);
    let saved = s.save();

    // Wander off, then rewind.
    s.choose(1).unwrap();
    s.advance(0);
    s.load(saved.clone()).unwrap();

    assert_eq!(s.save(), saved);
    assert_eq!(s.choices().len(), 2);
    s.choose(2).unwrap();
    assert_eq!(texts(s.advance(0)), vec!["South", "Warm sand."]);
}

#[test]
fn test_ended_story_stays_over_across_save_and_load() {
    // The story ends before narrating anything; the terminal flag must
    // survive the round trip, and begin() after load must not re-run
    // the top-level assignments.
    let source = "VAR gold = 0\n~ gold = gold + 10\n-> END";
    let mut s = session(source);
    s.begin().unwrap();
    assert!(s.is_over());
    assert_eq!(s.variable("gold"), Some(&Value::Number(10.0)));
    let saved = s.save();

    let mut restored = session(source);
    restored.load(saved).unwrap();
    assert!(restored.is_over());
    restored.begin().unwrap();
    assert!(restored.is_over());
    assert_eq!(restored.variable("gold"), Some(&Value::Number(10.0)));
}

#[test]
fn test_snapshot_json_round_trip() {
    let mut s = session(BRANCHING);
    s.begin().unwrap();
    s.advance(0);
    let saved = s.save();

    let json = saved.to_json().unwrap();
    let restored = skein::Snapshot::from_json(&json).unwrap();
    assert_eq!(saved, restored);

    s.load(restored).unwrap();
    assert_eq!(s.save(), saved);
}

#[test]
fn test_loading_newer_snapshot_errors() {
    let old_story = story("Old tale.");
    let new_story = story("CONST tree = 2\nNew tale.");

    let newer = Session::with_seed(new_story, 1).save();
    let mut s = Session::with_seed(old_story, 1);
    assert!(matches!(
        s.load(newer),
        Err(RuntimeError::Migration {
            snapshot: 2,
            story: 0
        })
    ));
}

#[test]
fn test_loading_older_snapshot_needs_migrator() {
    let v0 = story("Old tale.");
    let v1 = "CONST tree = 1\nVAR mood = 0\nNew tale.";

    let old_snap = Session::with_seed(v0, 1).save();

    let mut s = Session::with_seed(story(v1), 1);
    assert!(matches!(s.load(old_snap.clone()), Err(RuntimeError::Migration { .. })));

    s.on_migrate(Box::new(|mut snap| {
        snap.version.tree = 1;
        snap.variables
            .insert("mood".to_string(), Value::Number(0.0));
        Ok(snap)
    }));
    s.load(old_snap).unwrap();
    assert_eq!(s.save().version.tree, 1);
}

#[test]
fn test_observer_fires_on_change_only() {
    let mut s = session("VAR gold = 0\n~ gold = 10\n~ gold = 10\n~ gold = 12\nDone.");
    let seen: Rc<RefCell<Vec<f64>>> = Rc::default();
    let sink = Rc::clone(&seen);
    s.observe(
        "gold",
        Box::new(move |value| {
            if let Value::Number(n) = value {
                sink.borrow_mut().push(*n);
            }
        }),
    );

    s.begin().unwrap();
    assert_eq!(*seen.borrow(), vec![10.0, 12.0]);
}

#[test]
fn test_set_variable_from_host() {
    let mut s = session("VAR gold = 1\nYou carry {gold} coins.");
    s.set_variable("gold", Value::Number(30.0)).unwrap();
    s.begin().unwrap();
    assert_eq!(texts(s.advance(0)), vec!["You carry 30 coins."]);
}

#[test]
fn test_bound_function_and_list_result() {
    let source = "\
LIST tools = hammer, chisel, file
VAR kit = 0
~ kit = starter_kit()
Kit: {kit}. Has chisel: {kit has chisel}.";
    let mut s = session(source);
    s.bind(
        "starter_kit",
        Box::new(|_args| {
            let mut v = skein::ListValue::new();
            v.insert("tools", "hammer");
            v.insert("tools", "chisel");
            Value::List(v)
        }),
    );
    s.begin().unwrap();
    assert_eq!(
        texts(s.advance(0)),
        vec!["Kit: hammer, chisel. Has chisel: 1."]
    );
}

#[test]
fn test_seed_random_makes_rolls_reproducible() {
    let source = "\
~ SEED_RANDOM(7)
Roll {RANDOM(1, 6)} then {RANDOM(1, 6)}.";

    let mut a = Session::new(story(source));
    let mut b = Session::new(story(source));
    a.begin().unwrap();
    b.begin().unwrap();
    assert_eq!(texts(a.advance(0)), texts(b.advance(0)));
}

#[test]
fn test_seeded_sessions_replay_shuffles() {
    let source = "\
-> loop
=== loop ===
{~one|two|three|four}
+ [again] -> loop";

    let run = |seed| {
        let mut s = Session::with_seed(story(source), seed);
        s.begin().unwrap();
        let mut seen = Vec::new();
        for _ in 0..8 {
            seen.extend(texts(s.advance(0)));
            s.choose(1).unwrap();
        }
        seen
    };

    assert_eq!(run(42), run(42));
}

#[test]
fn test_includes_are_recorded_for_the_host() {
    let story = story("INCLUDE chapter_two.ink\nINCLUDE endings.ink\nBegin.");
    assert_eq!(story.includes, vec!["chapter_two.ink", "endings.ink"]);
}
