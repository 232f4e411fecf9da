use std::borrow::Cow;

use nu_ansi_term::{Color, Style};
use reedline::{
    DefaultValidator, Prompt, PromptEditMode, PromptHistorySearch, PromptHistorySearchStatus,
    Reedline, Signal,
};

use skein_story::{Severity, Story, StoryError};

/// Prompt shown when the player must pick a choice.
struct ChoicePrompt;

impl Prompt for ChoicePrompt {
    fn render_prompt_left(&self) -> Cow<'_, str> {
        Cow::Owned(Color::Green.bold().paint("skein").to_string())
    }

    fn render_prompt_right(&self) -> Cow<'_, str> {
        Cow::Borrowed("")
    }

    fn render_prompt_indicator(&self, _edit_mode: PromptEditMode) -> Cow<'_, str> {
        Cow::Borrowed("> ")
    }

    fn render_prompt_multiline_indicator(&self) -> Cow<'_, str> {
        Cow::Borrowed("... > ")
    }

    fn render_prompt_history_search_indicator(
        &self,
        history_search: PromptHistorySearch,
    ) -> Cow<'_, str> {
        let prefix = match history_search.status {
            PromptHistorySearchStatus::Passing => "",
            PromptHistorySearchStatus::Failing => "(failed) ",
        };
        Cow::Owned(format!("({}search: {}) ", prefix, history_search.term))
    }
}

/// Drive the story from the terminal until it ends or the player quits.
pub fn play_interactive(story: &mut Story) -> Result<(), StoryError> {
    story.on_error(|message, severity| {
        let style = match severity {
            Severity::Error => Color::Red.bold(),
            Severity::Warning => Color::Yellow.normal(),
        };
        eprintln!("{}", style.paint(message));
    });

    let mut editor = Reedline::create().with_validator(Box::new(DefaultValidator));
    let prompt = ChoicePrompt;

    loop {
        print_lines(story)?;

        let choices: Vec<String> = story
            .current_choices()
            .iter()
            .map(|c| c.text.clone())
            .collect();
        if choices.is_empty() {
            println!("{}", Style::new().dimmed().paint("-- the end --"));
            return Ok(());
        }
        for (i, text) in choices.iter().enumerate() {
            println!("{} {}", Color::Green.paint(format!("{}:", i + 1)), text);
        }

        let selection = loop {
            match editor.read_line(&prompt) {
                Ok(Signal::Success(line)) => {
                    let line = line.trim();
                    if line == "q" || line == "quit" {
                        return Ok(());
                    }
                    match line.parse::<usize>() {
                        Ok(n) if n >= 1 && n <= choices.len() => break n - 1,
                        _ => {
                            println!(
                                "{}",
                                Color::Yellow
                                    .paint(format!("enter 1-{}, or q to quit", choices.len()))
                            );
                        }
                    }
                }
                Ok(Signal::CtrlC) | Ok(Signal::CtrlD) => return Ok(()),
                Err(e) => {
                    eprintln!("input error: {}", e);
                    return Ok(());
                }
            }
        };

        story.choose_choice_index(selection)?;
    }
}

/// Run straight through with a fixed choice list, collecting the
/// transcript instead of printing colored output.
pub fn play_scripted(story: &mut Story, choices: &[usize]) -> Result<String, StoryError> {
    let mut transcript = String::new();
    let mut next_choice = choices.iter().copied();
    loop {
        transcript.push_str(&story.continue_maximally()?);
        if story.current_choices().is_empty() {
            break;
        }
        match next_choice.next() {
            Some(index) => story.choose_choice_index(index)?,
            None => break,
        }
    }
    Ok(transcript)
}

fn print_lines(story: &mut Story) -> Result<(), StoryError> {
    while story.can_continue() {
        let line = story.continue_line()?;
        print!("{}", line);
        let tags = story.current_tags().to_vec();
        for tag in tags {
            println!("{}", Style::new().dimmed().paint(format!("# {}", tag)));
        }
    }
    Ok(())
}
