//! The `proctor history` command.

use std::path::PathBuf;

use anyhow::Result;

use proctor_core::clock::format_countdown;
use proctor_core::SubmitTrigger;
use proctor_store::config::{load_config_from, SinkConfig};
use proctor_store::file::read_results;

pub fn execute(dir: Option<PathBuf>, config_path: Option<PathBuf>) -> Result<()> {
    let dir = match dir {
        Some(dir) => dir,
        None => match load_config_from(config_path.as_deref())?.sink {
            SinkConfig::File { dir } => dir,
            other => anyhow::bail!(
                "history reads local result files; configured sink is {other:?}, pass --dir"
            ),
        },
    };

    if !dir.exists() {
        println!("No results yet in {}.", dir.display());
        return Ok(());
    }

    let results = read_results(&dir)?;
    if results.is_empty() {
        println!("No results yet in {}.", dir.display());
        return Ok(());
    }

    use comfy_table::{Cell, Table};

    let mut table = Table::new();
    table.set_header(vec![
        "Completed",
        "Question set",
        "Score",
        "Correct",
        "Time",
        "Ended by",
    ]);

    for result in &results {
        let ended_by = match result.trigger {
            SubmitTrigger::Manual => "submitted",
            SubmitTrigger::Expired => "time limit",
        };
        table.add_row(vec![
            Cell::new(result.completed_at.format("%Y-%m-%d %H:%M")),
            Cell::new(&result.question_set_id),
            Cell::new(format!("{}%", result.score)),
            Cell::new(format!("{}/{}", result.correct_count, result.total_questions)),
            Cell::new(format_countdown(result.elapsed())),
            Cell::new(ended_by),
        ]);
    }

    println!("{table}");

    let average =
        results.iter().map(|r| f64::from(r.score)).sum::<f64>() / results.len() as f64;
    println!("{} session(s), average score {average:.1}%", results.len());

    Ok(())
}
