//! Threads (forked callstack slices) and named flows.

use skein_story::{Story, StoryError, DEFAULT_FLOW_NAME};

fn story(json: &str) -> Story {
    let doc = skein_json::load_document(json).expect("document loads");
    Story::new(doc).expect("story starts")
}

const THREAD_STORY: &str = r##"{"inkVersion": 21, "root": [{"->": "main"}, "done",
    {"main": ["^I had a think.", "\n", "thread", {"->": "convo"}, "^I said stuff.", "\n", "done", {"#f": 1}],
     "convo": ["^Nice day.", "\n", "done", {"#f": 1}]}]}"##;

#[test]
fn thread_runs_inline_then_parent_resumes() {
    let mut s = story(THREAD_STORY);
    assert_eq!(
        s.continue_maximally().unwrap(),
        "I had a think.\nNice day.\nI said stuff.\n"
    );
    assert!(!s.can_continue());
}

const THREAD_CHOICE_STORY: &str = r##"{"inkVersion": 21, "root": [{"->": "main"}, "done",
    {"main": ["^I had a think.", "\n", "thread", {"->": "convo"}, "^I said stuff.", "\n", "done", {"#f": 1}],
     "convo": ["^Nice day.", "\n",
               ["ev", "str", "^Reply", "/str", "/ev", {"*": ".^.c-0", "flg": 20},
                {"c-0": ["^You replied.", "\n", "end", {"#f": 5}]}],
               "done", {"#f": 1}]}]}"##;

#[test]
fn choice_from_thread_restores_its_thread() {
    let mut s = story(THREAD_CHOICE_STORY);
    assert_eq!(
        s.continue_maximally().unwrap(),
        "I had a think.\nNice day.\nI said stuff.\n"
    );
    let choices: Vec<String> = s.current_choices().iter().map(|c| c.text.clone()).collect();
    assert_eq!(choices, vec!["Reply".to_string()]);
    assert!(s.current_choices()[0].original_thread_index > 0);

    s.choose_choice_index(0).unwrap();
    assert_eq!(s.continue_maximally().unwrap(), "You replied.\n");
}

const FLOW_STORY: &str = r##"{"inkVersion": 21, "root": ["^Top.", "\n",
    ["ev", "str", "^Go", "/str", "/ev", {"*": ".^.c-0", "flg": 20},
     {"c-0": ["^Went.", "\n", "end", {"#f": 5}]}],
    "done", null]}"##;

#[test]
fn flows_are_independent_execution_contexts() {
    let mut s = story(FLOW_STORY);
    assert_eq!(s.current_flow_name(), DEFAULT_FLOW_NAME);
    assert!(s.current_flow_is_default());
    assert_eq!(s.continue_maximally().unwrap(), "Top.\n");
    assert_eq!(s.current_choices().len(), 1);

    // A fresh flow starts from the top with its own callstack and
    // choices; the default flow's choices stay parked.
    s.switch_flow("side").unwrap();
    assert_eq!(s.current_flow_name(), "side");
    assert!(!s.current_flow_is_default());
    assert!(s.can_continue());
    assert_eq!(s.continue_maximally().unwrap(), "Top.\n");
    s.choose_choice_index(0).unwrap();
    assert_eq!(s.continue_maximally().unwrap(), "Went.\n");

    s.switch_to_default_flow().unwrap();
    assert_eq!(s.current_choices().len(), 1);
    s.choose_choice_index(0).unwrap();
    assert_eq!(s.continue_maximally().unwrap(), "Went.\n");
}

#[test]
fn alive_flow_names_excludes_default() {
    let mut s = story(FLOW_STORY);
    assert!(s.alive_flow_names().is_empty());
    s.switch_flow("side").unwrap();
    s.switch_flow("other").unwrap();
    assert_eq!(
        s.alive_flow_names(),
        vec!["other".to_string(), "side".to_string()]
    );
}

#[test]
fn remove_flow_guards() {
    let mut s = story(FLOW_STORY);
    assert_eq!(
        s.remove_flow(DEFAULT_FLOW_NAME).unwrap_err(),
        StoryError::CannotRemoveDefaultFlow
    );
    s.switch_flow("side").unwrap();
    assert_eq!(
        s.remove_flow("side").unwrap_err(),
        StoryError::CannotRemoveActiveFlow
    );
    assert_eq!(
        s.remove_flow("never-created").unwrap_err(),
        StoryError::UnknownFlow("never-created".to_string())
    );
    s.switch_to_default_flow().unwrap();
    s.remove_flow("side").unwrap();
    assert!(s.alive_flow_names().is_empty());
}

#[test]
fn empty_flow_name_is_rejected() {
    let mut s = story(FLOW_STORY);
    assert!(matches!(
        s.switch_flow("").unwrap_err(),
        StoryError::BadArgument(_)
    ));
}

#[test]
fn globals_are_shared_across_flows() {
    use skein_runtime::Value;
    let mut s = story(
        r#"{"inkVersion": 21, "root": ["ev", 9, {"VAR=": "score", "re": true}, "/ev", "^Set.", "\n", "done",
            {"global decl": ["ev", 5, {"VAR=": "score"}, "/ev", "end", null]}]}"#,
    );
    assert_eq!(s.variable("score"), Some(Value::Int(5)));
    assert_eq!(s.continue_maximally().unwrap(), "Set.\n");
    assert_eq!(s.variable("score"), Some(Value::Int(9)));
    s.switch_flow("side").unwrap();
    assert_eq!(s.variable("score"), Some(Value::Int(9)));
}
