use std::fs;
use std::process;

use skein_story::Story;

mod player;

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return;
    }

    match args.first().map(String::as_str) {
        Some("play") => {
            if args.len() != 2 {
                eprintln!("usage: skein play <story.json>");
                process::exit(1);
            }
            let mut story = load_story(&args[1]);
            if let Err(e) = player::play_interactive(&mut story) {
                eprintln!("error: {}", e);
                process::exit(1);
            }
        }
        Some("run") => {
            // Scripted playthrough: choice indices after the document.
            if args.len() < 2 {
                eprintln!("usage: skein run <story.json> [choice indices...]");
                process::exit(1);
            }
            let choices: Vec<usize> = match args[2..].iter().map(|a| a.parse()).collect() {
                Ok(choices) => choices,
                Err(_) => {
                    eprintln!("choice indices must be non-negative integers");
                    process::exit(1);
                }
            };
            let mut story = load_story(&args[1]);
            match player::play_scripted(&mut story, &choices) {
                Ok(transcript) => print!("{}", transcript),
                Err(e) => {
                    eprintln!("error: {}", e);
                    process::exit(1);
                }
            }
        }
        Some(other) => {
            eprintln!("unknown subcommand: {}", other);
            eprintln!("usage: skein [play <story.json> | run <story.json> [choices...]]");
            process::exit(1);
        }
        None => {
            print_usage();
            process::exit(1);
        }
    }
}

fn load_story(path: &str) -> Story {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("could not read {}: {}", path, e);
            process::exit(1);
        }
    };
    let doc = match skein_json::load_document(&text) {
        Ok(doc) => doc,
        Err(e) => {
            eprintln!("could not load {}: {}", path, e);
            process::exit(1);
        }
    };
    if doc.has_version_mismatch() {
        eprintln!(
            "note: document format version {} differs from the current version {}",
            doc.version,
            skein_json::CURRENT_VERSION
        );
    }
    match Story::new(doc) {
        Ok(story) => story,
        Err(e) => {
            eprintln!("could not start story: {}", e);
            process::exit(1);
        }
    }
}

fn print_usage() {
    println!("skein - player for compiled story documents");
    println!();
    println!("usage:");
    println!("  skein play <story.json>                  interactive session");
    println!("  skein run <story.json> [choices...]      scripted playthrough, prints transcript");
}
