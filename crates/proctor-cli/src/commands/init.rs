//! The `proctor init` command.

use anyhow::Result;

pub fn execute() -> Result<()> {
    if std::path::Path::new("proctor.toml").exists() {
        println!("proctor.toml already exists, skipping.");
    } else {
        std::fs::write("proctor.toml", SAMPLE_CONFIG)?;
        println!("Created proctor.toml");
    }

    std::fs::create_dir_all("question-sets")?;
    let example_path = std::path::Path::new("question-sets/example.toml");
    if example_path.exists() {
        println!("question-sets/example.toml already exists, skipping.");
    } else {
        std::fs::write(example_path, EXAMPLE_QUESTION_SET)?;
        println!("Created question-sets/example.toml");
    }

    println!("\nNext steps:");
    println!("  1. Edit proctor.toml to choose where results are stored");
    println!("  2. Run: proctor validate --question-set question-sets/example.toml");
    println!("  3. Run: proctor take --question-set question-sets/example.toml");

    Ok(())
}

const SAMPLE_CONFIG: &str = r#"# proctor configuration

question_dir = "./question-sets"
tick_interval_ms = 250
max_retries = 3
retry_delay_ms = 1000

[sink]
type = "file"
dir = "./proctor-results"

# To store results in Supabase instead:
# [sink]
# type = "supabase"
# url = "https://<project>.supabase.co"
# api_key = "${PROCTOR_SUPABASE_KEY}"
# user_id = "<your user id>"
"#;

const EXAMPLE_QUESTION_SET: &str = r#"[question_set]
id = "example"
title = "Example Question Set"
description = "A short warmup to get started"
test_type = "aptitude"
duration_minutes = 5

[[questions]]
id = "percent"
prompt = "What is 15% of 200?"
options = ["15", "20", "30", "45"]
correct_option = 2
explanation = "0.15 * 200 = 30"

[[questions]]
id = "sequence"
prompt = "What comes next: 2, 4, 8, 16, ...?"
options = ["18", "24", "32", "64"]
correct_option = 2
explanation = "Each term doubles the previous one."

[[questions]]
id = "speed"
prompt = "A train covers 120 km in 1.5 hours. What is its average speed?"
options = ["60 km/h", "80 km/h", "90 km/h", "180 km/h"]
correct_option = 1
explanation = "120 / 1.5 = 80"
"#;
