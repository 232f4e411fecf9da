//! Variables, observers, visit counts, reset, snapshots-by-patch and
//! background saving.

use std::cell::RefCell;
use std::rc::Rc;

use skein_runtime::Value;
use skein_story::{Severity, Story, StoryError};

fn story(json: &str) -> Story {
    let doc = skein_json::load_document(json).expect("document loads");
    Story::new(doc).expect("story starts")
}

const SCORE_STORY: &str = r#"{"inkVersion": 21, "root": [
    "^Score: ", "ev", {"VAR?": "score"}, "out", "/ev", "\n",
    "ev", 7, {"VAR=": "score", "re": true}, "/ev",
    "ev", 9, {"VAR=": "score", "re": true}, "/ev",
    "^Now: ", "ev", {"VAR?": "score"}, "out", "/ev", "\n",
    "done",
    {"global decl": ["ev", 5, {"VAR=": "score"}, "/ev", "end", null]}]}"#;

#[test]
fn globals_declare_read_and_reassign() {
    let mut s = story(SCORE_STORY);
    assert_eq!(s.variable("score"), Some(Value::Int(5)));
    assert_eq!(s.continue_line().unwrap(), "Score: 5\n");
    assert_eq!(s.continue_line().unwrap(), "Now: 9\n");
    assert_eq!(s.variable("score"), Some(Value::Int(9)));
}

#[test]
fn observers_batch_to_one_notification_per_name() {
    let mut s = story(SCORE_STORY);
    let seen: Rc<RefCell<Vec<(String, Value)>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    s.observe_variable("score", move |name, value| {
        sink.borrow_mut().push((name.to_string(), value.clone()));
    })
    .unwrap();

    s.continue_line().unwrap();
    assert!(seen.borrow().is_empty());

    // The second line assigns twice; the batch reports once, with the
    // final value.
    s.continue_line().unwrap();
    assert_eq!(
        seen.borrow().as_slice(),
        &[("score".to_string(), Value::Int(9))]
    );
}

#[test]
fn observing_an_undeclared_variable_fails() {
    let mut s = story(SCORE_STORY);
    assert!(matches!(
        s.observe_variable("nope", |_, _| {}).unwrap_err(),
        StoryError::BadArgument(_)
    ));
}

#[test]
fn set_variable_from_host_notifies_immediately() {
    let mut s = story(SCORE_STORY);
    let seen: Rc<RefCell<Vec<Value>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    s.observe_variable("score", move |_, value| {
        sink.borrow_mut().push(value.clone());
    })
    .unwrap();
    s.set_variable("score", Value::Int(50)).unwrap();
    assert_eq!(seen.borrow().as_slice(), &[Value::Int(50)]);
    assert!(matches!(
        s.set_variable("never_declared", Value::Int(1)).unwrap_err(),
        StoryError::BadArgument(_)
    ));
}

#[test]
fn reset_state_restores_defaults_counts_and_position() {
    let mut s = story(SCORE_STORY);
    let first = s.continue_maximally().unwrap();
    assert_eq!(s.variable("score"), Some(Value::Int(9)));

    s.reset_state().unwrap();
    assert_eq!(s.variable("score"), Some(Value::Int(5)));
    assert!(s.can_continue());
    assert_eq!(s.continue_maximally().unwrap(), first);
}

#[test]
fn unresolved_variable_is_a_runtime_error() {
    let mut s = story(
        r#"{"inkVersion": 21, "root": ["ev", {"VAR?": "ghost"}, "out", "/ev", "\n", "done", null]}"#,
    );
    match s.continue_maximally().unwrap_err() {
        StoryError::Runtime(message) => {
            assert!(message.contains("unresolved variable"), "got: {}", message)
        }
        other => panic!("expected runtime error, got {:?}", other),
    }
}

#[test]
fn registered_error_handler_receives_diagnostics() {
    let mut s = story(
        r#"{"inkVersion": 21, "root": ["ev", {"VAR?": "ghost"}, "out", "/ev", "\n", "done", null]}"#,
    );
    let seen: Rc<RefCell<Vec<(String, Severity)>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    s.on_error(move |message, severity| {
        sink.borrow_mut().push((message.to_string(), severity));
    });
    // With a handler bound the continue does not raise.
    s.continue_line().unwrap();
    let seen = seen.borrow();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].1, Severity::Error);
    assert!(seen[0].0.contains("unresolved variable"));
}

const COUNTED_STORY: &str = r##"{"inkVersion": 21, "root": [{"->": "hub"}, "done",
    {"hub": ["^Hub seen ", "ev", {"CNT?": "hub"}, "out", "/ev", "^.", "\n",
        ["ev", "str", "^Again", "/str", "/ev", {"*": ".^.c-0", "flg": 4},
         "ev", "str", "^Stop", "/str", "/ev", {"*": ".^.c-1", "flg": 4},
         {"c-0": [{"->": "hub"}, null],
          "c-1": ["^Bye.", "\n", "end", null]}],
        {"#f": 1}]}]}"##;

#[test]
fn count_references_see_current_visit_counts() {
    let mut s = story(COUNTED_STORY);
    assert_eq!(s.continue_maximally().unwrap(), "Hub seen 1.\n");
    s.choose_choice_index(0).unwrap();
    assert_eq!(s.continue_maximally().unwrap(), "Hub seen 2.\n");
    s.choose_choice_index(1).unwrap();
    assert_eq!(s.continue_maximally().unwrap(), "Bye.\n");
}

#[test]
fn background_save_hands_out_a_frozen_state() {
    let mut s = story(COUNTED_STORY);
    s.continue_maximally().unwrap();
    let saved = s.copy_state_for_background_save().unwrap();
    let hub = s.document().knot_with_name("hub").unwrap();
    assert_eq!(saved.visit_count(hub), 1);

    // Another save cannot start, and flows cannot switch, while the
    // first save is in flight.
    assert_eq!(
        s.copy_state_for_background_save().unwrap_err(),
        StoryError::SaveInProgress
    );
    assert_eq!(
        s.switch_flow("side").unwrap_err(),
        StoryError::CannotSwitchFlowWhileSaving
    );

    // The live story keeps playing; its writes land in the patch and
    // never alias the saved state.
    s.choose_choice_index(0).unwrap();
    assert_eq!(s.continue_maximally().unwrap(), "Hub seen 2.\n");
    assert_eq!(saved.visit_count(hub), 1);
    assert_eq!(s.state().visit_count(hub), 2);

    s.background_save_complete();
    assert_eq!(s.state().visit_count(hub), 2);
    assert_eq!(saved.visit_count(hub), 1);

    // Completion is idempotent.
    s.background_save_complete();
    assert_eq!(s.state().visit_count(hub), 2);

    // A second save is allowed once the first completes.
    let saved2 = s.copy_state_for_background_save().unwrap();
    assert_eq!(saved2.visit_count(hub), 2);
    s.background_save_complete();
}

#[test]
fn saved_state_can_move_to_another_thread() {
    let mut s = story(COUNTED_STORY);
    s.continue_maximally().unwrap();
    let saved = s.copy_state_for_background_save().unwrap();
    let hub = s.document().knot_with_name("hub").unwrap();
    let handle = std::thread::spawn(move || saved.visit_count(hub));
    assert_eq!(handle.join().unwrap(), 1);
    s.background_save_complete();
}

#[test]
fn async_continue_respects_budget_and_finishes() {
    let mut s = story(
        r#"{"inkVersion": 21, "root": ["^a", "^b", "^c", "^d", "^e", "\n", "done", null]}"#,
    );
    // A vanishingly small budget suspends after the first step.
    s.continue_async(0.0000001).unwrap();
    assert!(!s.async_continue_complete());
    assert_eq!(
        s.switch_flow("side").unwrap_err(),
        StoryError::AsyncOperationInProgress("switch flow".to_string())
    );
    while !s.async_continue_complete() {
        s.continue_async(0.0000001).unwrap();
    }
    assert_eq!(s.current_text(), "abcde\n");
}

#[test]
fn lists_flow_through_variables_and_output() {
    let mut s = story(
        r#"{"inkVersion": 21,
            "root": ["^I have ", "ev", {"VAR?": "inv"}, "out", "/ev", "^.", "\n",
                "ev", {"VAR?": "inv"}, {"list": {"items.sword": 2}, "origins": ["items"]}, "+",
                {"VAR=": "inv", "re": true}, "/ev",
                "^Now ", "ev", {"VAR?": "inv"}, "out", "/ev", "^.", "\n", "done",
                {"global decl": ["ev", {"list": {"items.torch": 1}, "origins": ["items"]},
                                 {"VAR=": "inv"}, "/ev", "end", null]}],
            "listDefs": {"items": {"torch": 1, "sword": 2, "shield": 3}}}"#,
    );
    assert_eq!(s.continue_line().unwrap(), "I have torch.\n");
    assert_eq!(s.continue_line().unwrap(), "Now torch, sword.\n");
}

#[test]
fn seeded_randomness_is_deterministic() {
    let full = r#"{"inkVersion": 21, "root": [
        "ev", 42, "srnd", "pop",
        1, 6, "rnd", "out", "/ev",
        "^ ", "ev", 1, 6, "rnd", "out", "/ev", "\n", "done", null]}"#;
    let mut s1 = story(full);
    let mut s2 = story(full);
    let line1 = s1.continue_maximally().unwrap();
    let line2 = s2.continue_maximally().unwrap();
    assert_eq!(line1, line2);
    for part in line1.trim().split(' ') {
        let n: i64 = part.parse().expect("random output is an integer");
        assert!((1..=6).contains(&n), "out of range: {}", n);
    }
}

#[test]
fn turns_since_tracks_choice_turns() {
    let mut s = story(
        r##"{"inkVersion": 21, "root": [{"->": "spot"}, "done",
            {"spot": ["^At spot, last seen ", "ev", {"^->": "spot"}, "turns", "out", "/ev", "^.", "\n",
                ["ev", "str", "^Wait", "/str", "/ev", {"*": ".^.c-0", "flg": 4},
                 {"c-0": ["^Waited.", "\n", "end", null]}],
                {"#f": 3}]}]}"##,
    );
    // Visited this very turn: zero turns since.
    assert_eq!(s.continue_maximally().unwrap(), "At spot, last seen 0.\n");
    s.choose_choice_index(0).unwrap();
    assert_eq!(s.continue_maximally().unwrap(), "Waited.\n");
}
