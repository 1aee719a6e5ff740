//! proctor CLI — take timed assessments from the terminal.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "proctor", version, about = "Timed assessment runner")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Take a question set interactively
    Take {
        /// Path to a .toml/.json question set, or the id of a configured one
        #[arg(long)]
        question_set: String,

        /// Time limit in seconds (overrides the set's duration; 0 disables the timer)
        #[arg(long)]
        duration: Option<u64>,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Validate question set files
    Validate {
        /// Path to question set file or directory
        #[arg(long)]
        question_set: PathBuf,
    },

    /// List stored results
    History {
        /// Results directory (defaults to the configured file sink)
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Create starter config and example question set
    Init,
}

#[tokio::main]
async fn main() {
    // Logs go to stderr so they never interleave with the question display.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("proctor=warn")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Take {
            question_set,
            duration,
            config,
        } => commands::take::execute(question_set, duration, config).await,
        Commands::Validate { question_set } => commands::validate::execute(question_set),
        Commands::History { dir, config } => commands::history::execute(dir, config),
        Commands::Init => commands::init::execute(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
