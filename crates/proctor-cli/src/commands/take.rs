//! The `proctor take` command.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;

use proctor_core::clock::{format_countdown, SystemClock};
use proctor_core::model::{option_label, parse_option_label, QuestionSet};
use proctor_core::parser;
use proctor_core::{Session, SessionController, SessionError, SessionResult, SubmitTrigger};
use proctor_store::config::{create_sink, create_source, load_config_from, ProctorConfig};

/// A line of user input.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Select(usize),
    Next,
    Previous,
    Goto(usize),
    Time,
    Submit,
    Quit,
    Help,
    Redraw,
}

fn parse_input(line: &str) -> Result<Input, String> {
    let line = line.trim();
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Ok(Input::Redraw);
    };

    // `#h` always picks an option, even where the bare letter is a command.
    if let Some(label) = head.strip_prefix('#') {
        let option = parse_option_label(label)
            .ok_or_else(|| format!("unknown option '{label}' (type ? for help)"))?;
        if words.next().is_some() {
            return Err(format!("unexpected input '{line}' (type ? for help)"));
        }
        return Ok(Input::Select(option));
    }

    let input = match head.to_ascii_lowercase().as_str() {
        "n" | "next" => Input::Next,
        "p" | "prev" | "previous" => Input::Previous,
        "t" | "time" => Input::Time,
        "s" | "submit" => Input::Submit,
        "q" | "quit" => Input::Quit,
        "?" | "h" | "help" => Input::Help,
        "g" | "go" | "goto" => {
            let target = words
                .next()
                .and_then(|w| w.parse::<usize>().ok())
                .and_then(|k| k.checked_sub(1))
                .ok_or_else(|| "usage: g <question number>".to_string())?;
            Input::Goto(target)
        }
        other => parse_option_label(other)
            .map(Input::Select)
            .ok_or_else(|| format!("unknown command '{line}' (type ? for help)"))?,
    };

    if words.next().is_some() && !matches!(input, Input::Goto(_)) {
        return Err(format!("unexpected input '{line}' (type ? for help)"));
    }
    Ok(input)
}

/// How the interactive loop ended.
enum Ended {
    Submitted,
    TimeUp,
    EndOfInput,
    Abandoned,
}

pub async fn execute(
    question_set: String,
    duration_secs: Option<u64>,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;
    let set = load_question_set(&question_set, &config).await?;

    let duration = match duration_secs {
        Some(0) => None,
        Some(secs) => Some(Duration::from_secs(secs)),
        None => set.duration(),
    };

    let sink = create_sink(&config.sink)?;
    let controller =
        SessionController::new(sink, Arc::new(SystemClock), config.controller_config());
    let session = controller.create(set, duration)?;

    let set = session.question_set();
    println!("{} ({} questions)", set.title, set.len());
    if !set.description.is_empty() {
        println!("{}", set.description);
    }
    match duration {
        Some(limit) => println!("Time limit: {}", format_countdown(limit)),
        None => println!("No time limit."),
    }
    print_help();

    controller.start(&session)?;
    render(&controller, &session);

    let ended = run_loop(&controller, &session).await;

    match ended {
        Ended::Abandoned => {
            println!("\nSession abandoned. Nothing was saved.");
            return Ok(());
        }
        Ended::TimeUp => println!("\nTime is up! Your answers were submitted automatically."),
        Ended::EndOfInput => println!("\nInput closed, submitting."),
        Ended::Submitted => {}
    }

    let result = submit_with_retry(&controller, &session, &config)
        .await
        .context("your result could not be saved")?;
    print_summary(session.question_set(), &result);
    Ok(())
}

async fn load_question_set(arg: &str, config: &ProctorConfig) -> Result<QuestionSet> {
    let path = Path::new(arg);
    if path.is_file() {
        return parser::parse_question_set(path);
    }

    let source = create_source(config)?;
    source
        .load(arg)
        .await
        .with_context(|| format!("could not load question set '{arg}' from {}", source.name()))
}

/// Read stdin on a dedicated thread; blocking reads never hold up the runtime.
fn spawn_input_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

async fn run_loop(controller: &SessionController, session: &Arc<Session>) -> Ended {
    let mut input = spawn_input_reader();

    loop {
        prompt();
        let line = tokio::select! {
            line = input.recv() => line,
            _ = session.wait_for_outcome() => return Ended::TimeUp,
        };
        let Some(line) = line else {
            return Ended::EndOfInput;
        };

        let command = match parse_input(&line) {
            Ok(command) => command,
            Err(message) => {
                println!("{message}");
                continue;
            }
        };

        let outcome = match command {
            Input::Select(option) => select(controller, session, option),
            Input::Next => controller.next(session).map(|_| render(controller, session)),
            Input::Previous => controller
                .previous(session)
                .map(|_| render(controller, session)),
            Input::Goto(position) => controller
                .navigate(session, position)
                .map(|()| render(controller, session)),
            Input::Time => {
                match controller.remaining(session) {
                    Some(left) => println!("{} left", format_countdown(left)),
                    None => println!("No time limit."),
                }
                Ok(())
            }
            Input::Help => {
                print_help();
                Ok(())
            }
            Input::Redraw => {
                render(controller, session);
                Ok(())
            }
            Input::Submit => {
                let unanswered = session.question_set().len() - session.answered_count();
                if unanswered > 0 {
                    println!("Submitting with {unanswered} unanswered question(s).");
                }
                return Ended::Submitted;
            }
            Input::Quit => match controller.abandon(session) {
                Ok(()) => return Ended::Abandoned,
                Err(e) => Err(e),
            },
        };

        match outcome {
            Ok(()) => {}
            // The countdown finalized the session between two inputs.
            Err(SessionError::InvalidState { .. }) => return Ended::TimeUp,
            Err(e) => println!("{e}"),
        }
    }
}

fn select(
    controller: &SessionController,
    session: &Session,
    option: usize,
) -> Result<(), SessionError> {
    let position = session.cursor();
    controller.select_answer(session, position, option)?;
    if position + 1 < session.question_set().len() {
        controller.next(session)?;
    } else {
        println!("That was the last question. Type s to submit.");
    }
    render(controller, session);
    Ok(())
}

async fn submit_with_retry(
    controller: &SessionController,
    session: &Session,
    config: &ProctorConfig,
) -> Result<Arc<SessionResult>> {
    let mut attempt = 0;
    loop {
        match controller.submit(session).await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_retryable() && attempt < config.max_retries => {
                attempt += 1;
                let delay = config.retry_delay(attempt);
                tracing::warn!(attempt, ?delay, "retrying submission: {e}");
                eprintln!(
                    "Saving failed ({e}); retrying in {:.1}s ({attempt}/{})",
                    delay.as_secs_f64(),
                    config.max_retries
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

fn print_help() {
    println!("Commands: a-z or a number select an option, n next, p previous,");
    println!("          g <k> go to question k, t time left, s submit,");
    println!("          q quit without saving, ? help");
    println!("          Option letters that are also commands: use #h or the number.");
}

fn render(controller: &SessionController, session: &Session) {
    let set = session.question_set();
    let position = session.cursor();
    let Some(question) = set.get(position) else {
        return;
    };
    let selected = session.answer(position);
    let timer = controller
        .remaining(session)
        .map(|left| format!("  [{} left]", format_countdown(left)))
        .unwrap_or_default();

    println!(
        "\nQuestion {}/{} ({} answered){timer}",
        position + 1,
        set.len(),
        session.answered_count()
    );
    println!("{}", question.prompt);
    for (i, option) in question.options.iter().enumerate() {
        let marker = if selected == Some(i) { '*' } else { ' ' };
        println!(" {marker} {}) {option}", option_label(i));
    }
}

fn print_summary(set: &QuestionSet, result: &SessionResult) {
    use comfy_table::{Cell, Table};

    let ended_by = match result.trigger {
        SubmitTrigger::Manual => "submitted",
        SubmitTrigger::Expired => "time limit",
    };

    let mut table = Table::new();
    table.set_header(vec![
        "Question set",
        "Score",
        "Correct",
        "Answered",
        "Time",
        "Ended by",
    ]);
    table.add_row(vec![
        Cell::new(&set.title),
        Cell::new(format!("{}%", result.score)),
        Cell::new(format!("{}/{}", result.correct_count, result.total_questions)),
        Cell::new(format!("{}/{}", result.answered_count, result.total_questions)),
        Cell::new(format_countdown(result.elapsed())),
        Cell::new(ended_by),
    ]);
    println!("\n{table}");

    let mut review = Table::new();
    review.set_header(vec!["#", "Your answer", "Correct answer", "Result", "Explanation"]);
    for (i, question) in set.questions.iter().enumerate() {
        let given = result.answers.get(i);
        let verdict = match given {
            Some(option) if question.is_correct(option) => "correct",
            Some(_) => "wrong",
            None => "unanswered",
        };
        review.add_row(vec![
            Cell::new(i + 1),
            Cell::new(given.map(option_label).unwrap_or_else(|| "-".into())),
            Cell::new(option_label(question.correct_option)),
            Cell::new(verdict),
            Cell::new(question.explanation.as_deref().unwrap_or("")),
        ]);
    }
    println!("{review}");
    println!("Session {}", result.session_id);
}
