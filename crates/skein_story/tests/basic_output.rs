//! End-to-end output assembly: plain lines, glue, inline evaluation,
//! tags, and line-by-line versus maximal continuation.

use skein_story::{Story, StoryError};

fn story(json: &str) -> Story {
    let doc = skein_json::load_document(json).expect("document loads");
    Story::new(doc).expect("story starts")
}

#[test]
fn two_plain_lines() {
    let mut s = story(
        r#"{"inkVersion": 21, "root": ["^Hello, world!", "\n", "^Second line.", "\n", "done", null]}"#,
    );
    assert!(s.can_continue());
    assert_eq!(s.continue_line().unwrap(), "Hello, world!\n");
    assert_eq!(s.continue_line().unwrap(), "Second line.\n");
    assert!(!s.can_continue());
    assert!(s.current_choices().is_empty());
}

#[test]
fn continue_after_end_is_an_error() {
    let mut s = story(r#"{"inkVersion": 21, "root": ["^One.", "\n", "done", null]}"#);
    s.continue_maximally().unwrap();
    assert_eq!(s.continue_line().unwrap_err(), StoryError::CannotContinue);
}

#[test]
fn glue_joins_lines() {
    let mut s = story(
        r#"{"inkVersion": 21, "root": ["^Hello ", "\n", "<>", "^there.", "\n", "done", null]}"#,
    );
    assert_eq!(s.continue_maximally().unwrap(), "Hello there.\n");
}

#[test]
fn glue_at_very_end_without_content_drops_newline() {
    let mut s = story(r#"{"inkVersion": 21, "root": ["^End", "\n", "<>", "done", null]}"#);
    assert_eq!(s.continue_maximally().unwrap(), "End");
}

#[test]
fn glue_at_end_followed_by_content_joins() {
    let mut s = story(
        r#"{"inkVersion": 21, "root": ["^End", "\n", "<>", "^ more.", "\n", "done", null]}"#,
    );
    assert_eq!(s.continue_maximally().unwrap(), "End more.\n");
}

#[test]
fn inline_expression_output() {
    let mut s = story(
        r#"{"inkVersion": 21, "root": ["^Two plus two is ", "ev", 2, 2, "+", "out", "/ev", "^.", "\n", "done", null]}"#,
    );
    assert_eq!(s.continue_maximally().unwrap(), "Two plus two is 4.\n");
}

#[test]
fn float_output_trims_trailing_zeroes() {
    let mut s = story(
        r#"{"inkVersion": 21, "root": ["ev", 5, 2.0, "/", "out", "/ev", "\n", "done", null]}"#,
    );
    assert_eq!(s.continue_maximally().unwrap(), "2.5\n");
}

#[test]
fn whitespace_runs_collapse_within_a_line() {
    let mut s = story(
        r#"{"inkVersion": 21, "root": ["^A ", "^ B", "\n", "done", null]}"#,
    );
    assert_eq!(s.continue_maximally().unwrap(), "A B\n");
}

#[test]
fn line_tags_are_collected_and_removed_from_text() {
    let mut s = story(
        r##"{"inkVersion": 21, "root": ["#", "^mood: calm", "/#", "^A tagged line.", "\n", "done", null]}"##,
    );
    assert_eq!(s.continue_line().unwrap(), "A tagged line.\n");
    assert_eq!(s.current_tags(), &["mood: calm".to_string()]);
}

#[test]
fn legacy_tag_objects_are_collected() {
    let mut s = story(
        r##"{"inkVersion": 21, "root": [{"#": "author: someone"}, "^Line.", "\n", "done", null]}"##,
    );
    assert_eq!(s.continue_line().unwrap(), "Line.\n");
    assert_eq!(s.current_tags(), &["author: someone".to_string()]);
}

#[test]
fn line_by_line_matches_maximal() {
    let json = r#"{"inkVersion": 21, "root": ["^One.", "\n", "^Two ", "\n", "<>", "^joined.", "\n", "^Three.", "\n", "done", null]}"#;
    let mut line_by_line = String::new();
    let mut s1 = story(json);
    while s1.can_continue() {
        line_by_line.push_str(&s1.continue_line().unwrap());
    }
    let mut s2 = story(json);
    let maximal = s2.continue_maximally().unwrap();
    assert_eq!(line_by_line, maximal);
    assert_eq!(maximal, "One.\nTwo joined.\nThree.\n");
}

#[test]
fn turn_counter_starts_at_zero() {
    let mut s = story(
        r#"{"inkVersion": 21, "root": ["^Turn ", "ev", "turn", "out", "/ev", "^.", "\n", "done", null]}"#,
    );
    assert_eq!(s.continue_maximally().unwrap(), "Turn 0.\n");
}

#[test]
fn string_comparison_and_concat() {
    let mut s = story(
        r#"{"inkVersion": 21, "root": ["ev", "str", "^ab", "/str", "str", "^cd", "/str", "+", "out", "/ev", "\n", "done", null]}"#,
    );
    assert_eq!(s.continue_maximally().unwrap(), "abcd\n");
}
