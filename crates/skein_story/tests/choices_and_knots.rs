//! Choice generation and selection, knot diverts, tunnels, functions,
//! once-only suppression and invisible defaults.

use skein_story::{Story, StoryError};

fn story(json: &str) -> Story {
    let doc = skein_json::load_document(json).expect("document loads");
    Story::new(doc).expect("story starts")
}

const TWO_CHOICES: &str = r##"{"inkVersion": 21, "root": ["^Hello!", "\n",
    ["ev", "str", "^Option A", "/str", "/ev", {"*": ".^.c-0", "flg": 20},
     "ev", "str", "^Option B", "/str", "/ev", {"*": ".^.c-1", "flg": 20},
     {"c-0": ["^You picked A.", "\n", "end", {"#f": 5}],
      "c-1": ["^You picked B.", "\n", "end", {"#f": 5}]}],
    "done", null]}"##;

#[test]
fn choices_are_offered_and_followed() {
    let mut s = story(TWO_CHOICES);
    assert_eq!(s.continue_maximally().unwrap(), "Hello!\n");
    let choices: Vec<String> = s.current_choices().iter().map(|c| c.text.clone()).collect();
    assert_eq!(choices, vec!["Option A".to_string(), "Option B".to_string()]);
    assert_eq!(s.current_choices()[0].index, 0);
    assert_eq!(s.current_choices()[1].index, 1);

    s.choose_choice_index(1).unwrap();
    assert_eq!(s.continue_maximally().unwrap(), "You picked B.\n");
    assert!(!s.can_continue());
}

#[test]
fn out_of_range_choice_fails() {
    let mut s = story(TWO_CHOICES);
    s.continue_maximally().unwrap();
    assert_eq!(
        s.choose_choice_index(2).unwrap_err(),
        StoryError::OutOfRangeChoice { index: 2, count: 2 }
    );
}

#[test]
fn choices_are_empty_while_continuable() {
    let mut s = story(TWO_CHOICES);
    assert!(s.can_continue());
    assert!(s.current_choices().is_empty());
}

const HUB_LOOP: &str = r##"{"inkVersion": 21, "root": [{"->": "hub"}, "done",
    {"hub": ["^Hub.", "\n",
        ["ev", "str", "^A", "/str", "/ev", {"*": ".^.c-0", "flg": 20},
         "ev", "str", "^B", "/str", "/ev", {"*": ".^.c-1", "flg": 20},
         {"c-0": [{"->": "hub"}, {"#f": 5}],
          "c-1": ["^Finale.", "\n", "end", {"#f": 5}]}],
        {"#f": 1}]}]}"##;

#[test]
fn once_only_choices_are_suppressed_after_use() {
    let mut s = story(HUB_LOOP);
    assert_eq!(s.continue_maximally().unwrap(), "Hub.\n");
    assert_eq!(s.current_choices().len(), 2);

    // Taking A loops back; A is once-only so only B remains.
    s.choose_choice_index(0).unwrap();
    assert_eq!(s.continue_maximally().unwrap(), "Hub.\n");
    let remaining: Vec<String> = s.current_choices().iter().map(|c| c.text.clone()).collect();
    assert_eq!(remaining, vec!["B".to_string()]);

    s.choose_choice_index(0).unwrap();
    assert_eq!(s.continue_maximally().unwrap(), "Finale.\n");
}

#[test]
fn hub_visit_count_tracks_entries() {
    let mut s = story(HUB_LOOP);
    s.continue_maximally().unwrap();
    s.choose_choice_index(0).unwrap();
    s.continue_maximally().unwrap();
    let hub = s.document().knot_with_name("hub").unwrap();
    assert_eq!(s.state().visit_count(hub), 2);
}

#[test]
fn invisible_default_auto_advances_exactly_once() {
    let mut s = story(
        r##"{"inkVersion": 21, "root": ["^Intro.", "\n",
            [{"*": ".^.c-0", "flg": 24},
             {"c-0": ["^Fallback.", "\n", "end", {"#f": 5}]}],
            "done", null]}"##,
    );
    assert_eq!(s.continue_line().unwrap(), "Intro.\n");
    // No visible choices: the invisible default is followed on demand.
    assert!(s.current_choices().is_empty());
    assert!(s.can_continue());
    assert_eq!(s.continue_line().unwrap(), "Fallback.\n");
    assert!(!s.can_continue());
}

const KNOT_STORY: &str = r##"{"inkVersion": 21, "root": [{"->": "start"}, "done",
    {"start": ["^Begin.", "\n",
               {"->t->": "aside"},
               "^Double of 4 is ", "ev", 4, {"f()": "double"}, "out", "/ev", "^.", "\n",
               "^Hub seen ", "ev", {"^->": "start"}, "readc", "out", "/ev", "^ time.", "\n",
               {"->": "finale"}, {"#f": 1}],
     "aside": ["^An aside.", "\n", "ev", "void", "/ev", "->->", {"#f": 1}],
     "double": [{"temp=": "x"}, "ev", {"VAR?": "x"}, 2, "*", "/ev", "~ret", {"#f": 1}],
     "finale": ["^Done.", "\n", "end", {"#f": 1}]}]}"##;

#[test]
fn knots_tunnels_and_functions() {
    let mut s = story(KNOT_STORY);
    assert_eq!(
        s.continue_maximally().unwrap(),
        "Begin.\nAn aside.\nDouble of 4 is 8.\nHub seen 1 time.\nDone.\n"
    );
}

#[test]
fn tunnel_and_function_visits_counted_once() {
    let mut s = story(KNOT_STORY);
    s.continue_maximally().unwrap();
    let aside = s.document().knot_with_name("aside").unwrap();
    let double = s.document().knot_with_name("double").unwrap();
    assert_eq!(s.state().visit_count(aside), 1);
    assert_eq!(s.state().visit_count(double), 1);
}

#[test]
fn missing_tunnel_return_is_diagnosed() {
    // A tunnel whose target never returns runs out of content.
    let mut s = story(
        r#"{"inkVersion": 21, "root": [{"->t->": "broken"}, "done",
            {"broken": ["^Stuck.", "\n", null]}]}"#,
    );
    let err = s.continue_maximally().unwrap_err();
    match err {
        StoryError::Runtime(message) => assert!(message.contains("->->"), "got: {}", message),
        other => panic!("expected runtime error, got {:?}", other),
    }
}

#[test]
fn choice_tags_are_captured() {
    let mut s = story(
        r##"{"inkVersion": 21, "root": ["^Pick.", "\n",
            ["ev", "str", "^Go ", "#", "^danger", "/#", "/str", "/ev", {"*": ".^.c-0", "flg": 20},
             {"c-0": ["^Gone.", "\n", "end", {"#f": 5}]}],
            "done", null]}"##,
    );
    s.continue_maximally().unwrap();
    let choices = s.current_choices();
    assert_eq!(choices.len(), 1);
    assert_eq!(choices[0].text, "Go");
    assert_eq!(choices[0].tags, vec!["danger".to_string()]);
}

#[test]
fn choose_path_string_jumps_directly() {
    let mut s = story(KNOT_STORY);
    s.choose_path_string("finale", true, &[]).unwrap();
    assert_eq!(s.continue_maximally().unwrap(), "Done.\n");
}

#[test]
fn choice_source_path_points_at_choice_point() {
    let mut s = story(TWO_CHOICES);
    s.continue_maximally().unwrap();
    let choices = s.current_choices();
    // The weave container sits at root index 2; the first choice point
    // is its sixth element.
    assert_eq!(choices[0].source_path, "2.5");
}
