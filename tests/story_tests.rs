// Integration tests for narrative flow: diverts, stitches, labels,
// glue, alternatives, conditions, and choice trees.

use skein::{Parser, Session};

fn session(source: &str) -> Session {
    let story = Parser::new(source)
        .expect("lexing failed")
        .parse_story()
        .expect("parsing failed");
    Session::with_seed(story, 1)
}

fn texts(paragraphs: Vec<skein::Paragraph>) -> Vec<String> {
    paragraphs.into_iter().map(|p| p.text).collect()
}

#[test]
fn test_glue_merges_lines() {
    let mut s = session("Hello<>\n world.");
    s.begin().unwrap();
    assert_eq!(texts(s.advance(0)), vec!["Hello world."]);
}

#[test]
fn test_glue_from_following_line() {
    let mut s = session("Part one\n<> and part two.");
    s.begin().unwrap();
    assert_eq!(texts(s.advance(0)), vec!["Part one and part two."]);
}

#[test]
fn test_divert_to_knot_and_stitch() {
    let source = "\
-> cave
=== cave ===
Entering the cave.
-> pool
= pool =
The pool glitters. -> END";
    let mut s = session(source);
    s.begin().unwrap();
    assert_eq!(
        texts(s.advance(0)),
        vec!["Entering the cave.", "The pool glitters."]
    );
    assert!(s.is_over());
}

#[test]
fn test_divert_to_label_skips_earlier_lines() {
    let source = "\
-> here.mark
=== here ===
One.
(mark) Two.
Three. -> END";
    let mut s = session(source);
    s.begin().unwrap();
    assert_eq!(texts(s.advance(0)), vec!["Two.", "Three."]);
}

#[test]
fn test_tags_attach_to_paragraph() {
    let mut s = session("A dark cellar. # mood # damp");
    s.begin().unwrap();
    let out = s.advance(0);
    assert_eq!(out[0].text, "A dark cellar.");
    assert_eq!(out[0].tags, vec!["mood", "damp"]);
}

#[test]
fn test_inline_expression_expansion() {
    let mut s = session("VAR gold = 7\nYou have {gold} coins, {gold * 2} in debt.");
    s.begin().unwrap();
    assert_eq!(texts(s.advance(0)), vec!["You have 7 coins, 14 in debt."]);
}

#[test]
fn test_brace_escape_renders_literal_braces() {
    let mut s = session("Braces look like {{}}.");
    s.begin().unwrap();
    assert_eq!(texts(s.advance(0)), vec!["Braces look like {}."]);
}

#[test]
fn test_failed_expression_renders_empty() {
    let mut s = session("Count: {broken_fn(1)} done.");
    s.begin().unwrap();
    assert_eq!(texts(s.advance(0)), vec!["Count:  done."]);
}

#[test]
fn test_stopping_alternative_sequence() {
    let source = "\
-> loop
=== loop ===
{stopping: a|b|c}
+ [again] -> loop";
    let mut s = session(source);
    s.begin().unwrap();
    let mut seen = Vec::new();
    for _ in 0..5 {
        seen.extend(texts(s.advance(0)));
        assert!(s.can_choose());
        s.choose(1).unwrap();
    }
    assert_eq!(seen, vec!["a", "b", "c", "c", "c"]);
}

#[test]
fn test_cycle_alternative_is_periodic() {
    let source = "\
-> loop
=== loop ===
{&tick|tock}
+ [again] -> loop";
    let mut s = session(source);
    s.begin().unwrap();
    let mut seen = Vec::new();
    for _ in 0..6 {
        seen.extend(texts(s.advance(0)));
        s.choose(1).unwrap();
    }
    assert_eq!(seen, vec!["tick", "tock", "tick", "tock", "tick", "tock"]);
}

#[test]
fn test_once_alternative_runs_dry() {
    let source = "\
-> loop
=== loop ===
Visit: {!first|second}
+ [again] -> loop";
    let mut s = session(source);
    s.begin().unwrap();
    let mut seen = Vec::new();
    for _ in 0..3 {
        seen.extend(texts(s.advance(0)));
        s.choose(1).unwrap();
    }
    assert_eq!(seen, vec!["Visit: first", "Visit: second", "Visit:"]);
}

#[test]
fn test_shuffle_covers_each_item_per_epoch() {
    let source = "\
-> loop
=== loop ===
{~red|green|blue}
+ [again] -> loop";
    let mut s = session(source);
    s.begin().unwrap();
    let mut seen = Vec::new();
    for _ in 0..3 {
        seen.extend(texts(s.advance(0)));
        s.choose(1).unwrap();
    }
    seen.sort();
    assert_eq!(seen, vec!["blue", "green", "red"]);
}

#[test]
fn test_inline_alternative_glues_into_sentence() {
    let source = "\
-> loop
=== loop ===
The door is {locked|open}.
+ [knock] -> loop";
    let mut s = session(source);
    s.begin().unwrap();
    assert_eq!(texts(s.advance(0)), vec!["The door is locked."]);
    s.choose(1).unwrap();
    assert_eq!(texts(s.advance(0)), vec!["The door is open."]);
}

#[test]
fn test_condition_switch_picks_branch() {
    let mut s = session("VAR x = 2\n{x == 1: one | x == 2: two | else: many}");
    s.begin().unwrap();
    assert_eq!(texts(s.advance(0)), vec!["two"]);

    let mut s = session("VAR x = 5\n{x == 1: one | x == 2: two | else: many}");
    s.begin().unwrap();
    assert_eq!(texts(s.advance(0)), vec!["many"]);
}

#[test]
fn test_condition_if_else_inline() {
    let mut s = session("VAR met = true\nThe guard {met: nods at you | eyes you coldly}.");
    s.begin().unwrap();
    assert_eq!(texts(s.advance(0)), vec!["The guard nods at you."]);
}

#[test]
fn test_condition_branch_divert() {
    let source = "\
VAR ready = true
{ready: -> go | else: Not yet.}
=== go ===
Off you go. -> END";
    let mut s = session(source);
    s.begin().unwrap();
    assert_eq!(texts(s.advance(0)), vec!["Off you go."]);
    assert!(s.is_over());
}

#[test]
fn test_choice_caption_split() {
    let source = "\
-> talk
=== talk ===
* Ask [about the weather] politely
  She shrugs. -> END";
    let mut s = session(source);
    s.begin().unwrap();
    s.advance(0);
    assert_eq!(s.choices()[0].title, "Ask about the weather");
    s.choose(1).unwrap();
    assert_eq!(texts(s.advance(0)), vec!["Ask  politely", "She shrugs."]);
}

#[test]
fn test_nested_choices_and_gathers() {
    let source = "\
-> start
=== start ===
* Open the box
  It creaks.
  ** Look inside
     A key!
  - - Done looking.
- Moving on. -> END";
    let mut s = session(source);
    s.begin().unwrap();
    s.advance(0);
    assert_eq!(s.choices().len(), 1);
    s.choose(1).unwrap();
    assert_eq!(texts(s.advance(0)), vec!["Open the box", "It creaks."]);

    assert_eq!(s.choices()[0].title, "Look inside");
    s.choose(1).unwrap();
    assert_eq!(
        texts(s.advance(0)),
        vec!["Look inside", "A key!", "Done looking.", "Moving on."]
    );
    assert!(s.is_over());
}

#[test]
fn test_sticky_choice_survives_revisits() {
    let source = "\
-> hub
=== hub ===
+ [Ask again] -> hub
* [Leave] -> out
=== out ===
Bye. -> END";
    let mut s = session(source);
    s.begin().unwrap();

    for round in 0..3 {
        s.advance(0);
        let titles: Vec<&str> = s.choices().iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["Ask again", "Leave"], "round {round}");
        s.choose(1).unwrap();
    }

    s.advance(0);
    s.choose(2).unwrap();
    assert_eq!(texts(s.advance(0)), vec!["Bye."]);
}

#[test]
fn test_one_shot_choice_disappears_after_use() {
    let source = "\
-> hub
=== hub ===
* [Examine the painting] -> hub
+ [Wait] -> hub";
    let mut s = session(source);
    s.begin().unwrap();
    s.advance(0);
    assert_eq!(s.choices().len(), 2);
    s.choose(1).unwrap();
    s.advance(0);
    let titles: Vec<&str> = s.choices().iter().map(|c| c.title.as_str()).collect();
    assert_eq!(titles, vec!["Wait"]);
}

#[test]
fn test_conditional_choice_filtered() {
    let source = "\
VAR brave = false
-> door
=== door ===
* {brave} [Charge in] -> END
+ [Peek] -> door";
    let mut s = session(source);
    s.begin().unwrap();
    s.advance(0);
    let titles: Vec<&str> = s.choices().iter().map(|c| c.title.as_str()).collect();
    assert_eq!(titles, vec!["Peek"]);
}

#[test]
fn test_fallback_choice_fires_when_menu_empty() {
    let source = "\
VAR brave = false
-> room
=== room ===
* {brave} Good -> brave_exit
* -> fallout
=== brave_exit ===
Unreachable. -> END
=== fallout ===
Nothing left to do. -> END";
    let mut s = session(source);
    s.begin().unwrap();
    assert_eq!(texts(s.advance(0)), vec!["Nothing left to do."]);
    assert!(s.is_over());
}

#[test]
fn test_fallback_ignored_when_choice_visible() {
    let source = "\
-> room
=== room ===
* Good -> good_exit
* -> fallout
=== good_exit ===
Well chosen. -> END
=== fallout ===
Silence. -> END";
    let mut s = session(source);
    s.begin().unwrap();
    s.advance(0);
    let titles: Vec<&str> = s.choices().iter().map(|c| c.title.as_str()).collect();
    assert_eq!(titles, vec!["Good"]);
    s.choose(1).unwrap();
    assert_eq!(texts(s.advance(0)), vec!["Good", "Well chosen."]);
}

#[test]
fn test_visit_counts_in_expressions() {
    // The knot counter moves on knot boundary crossings, so the route
    // ping-pongs through a second knot.
    let source = "\
-> hub
=== hub ===
Visits: {hub}
+ [out] -> rest
=== rest ===
+ [back] -> hub";
    let mut s = session(source);
    s.begin().unwrap();
    assert_eq!(texts(s.advance(0)), vec!["Visits: 1"]);
    s.choose(1).unwrap();
    s.advance(0);
    s.choose(1).unwrap();
    assert_eq!(texts(s.advance(0)), vec!["Visits: 2"]);
}

#[test]
fn test_label_visit_counts() {
    let source = "\
-> loop
=== loop ===
(top) Around we go: {loop.top}
+ [again] -> loop";
    let mut s = session(source);
    s.begin().unwrap();
    assert_eq!(texts(s.advance(0)), vec!["Around we go: 1"]);
    s.choose(1).unwrap();
    assert_eq!(texts(s.advance(0)), vec!["Around we go: 2"]);
}

#[test]
fn test_list_membership_flow() {
    let source = "\
LIST colors = red, (green), blue
{colors has green}
~ colors = colors - green
{colors has green}";
    let mut s = session(source);
    s.begin().unwrap();
    assert_eq!(texts(s.advance(0)), vec!["1", "0"]);
}

#[test]
fn test_list_rendering_in_text() {
    let source = "\
LIST moods = (calm), (curious), angry
You feel: {moods}.
~ moods = moods + angry
Now: {moods}.";
    let mut s = session(source);
    s.begin().unwrap();
    assert_eq!(
        texts(s.advance(0)),
        vec!["You feel: calm, curious.", "Now: calm, curious, angry."]
    );
}

#[test]
fn test_list_builtins_in_text() {
    let source = "\
LIST steps = one, two, three
~ steps = LIST_ALL(steps)
Count {LIST_COUNT(steps)}, min {LIST_MIN(steps)}, max {LIST_MAX(steps)}, value {LIST_VALUE(LIST_MAX(steps))}.";
    let mut s = session(source);
    s.begin().unwrap();
    assert_eq!(
        texts(s.advance(0)),
        vec!["Count 3, min one, max three, value 3."]
    );
}

#[test]
fn test_temp_cleared_on_knot_change() {
    let source = "\
-> a
=== a ===
~ temp t = 5
T is {t}.
-> b
=== b ===
T is {t} now. -> END";
    let mut s = session(source);
    s.begin().unwrap();
    assert_eq!(texts(s.advance(0)), vec!["T is 5.", "T is  now."]);
}

#[test]
fn test_unknown_divert_is_address_error() {
    let mut s = session("-> nowhere");
    let err = s.begin().unwrap_err();
    assert!(matches!(
        err,
        skein::RuntimeError::BadAddress { target, .. } if target == "nowhere"
    ));
}

#[test]
fn test_todo_lines_are_recorded_not_narrated() {
    let story = Parser::new("TODO: tighten the pacing here\nOnward.")
        .unwrap()
        .parse_story()
        .unwrap();
    assert_eq!(story.todos, vec!["tighten the pacing here"]);

    let mut s = Session::with_seed(story, 1);
    s.begin().unwrap();
    assert_eq!(texts(s.advance(0)), vec!["Onward."]);
}

#[test]
fn test_comments_are_stripped() {
    let source = "\
First. // trailing note
/* a whole
   block */Second.";
    let mut s = session(source);
    s.begin().unwrap();
    assert_eq!(texts(s.advance(0)), vec!["First.", "Second."]);
}
