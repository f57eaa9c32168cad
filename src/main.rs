mod approval;
mod autosquash;
mod blame;
mod cache;
mod context;
mod diff;
mod error;
mod fallback;
mod git;
mod git_commands;
mod msg;
mod patch;
mod rebase;
mod resolve;
mod strategy;

#[cfg(test)]
mod test_helpers;

use std::io::IsTerminal;

use clap::{Parser, Subcommand};
use colored::control;
use slog::{Drain, o};

use crate::context::{Context, Settings, StrategyChoice};
use crate::error::Error;

#[derive(Parser)]
#[command(
    name = "git-autosquash",
    about = "Squash working tree changes back into the commits that introduced them",
    version
)]
struct Cli {
    /// Split hunks so every change is retargeted on its own
    #[arg(long)]
    line_by_line: bool,

    /// Skip approval; apply only high-confidence blame targets
    #[arg(long)]
    auto_accept: bool,

    /// Show what would be squashed without touching the repository
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Internal: used as GIT_SEQUENCE_EDITOR to write a pre-generated todo file
    #[command(hide = true)]
    InternalWriteTodo {
        /// Path to the source file containing the todo content
        #[arg(long = "source")]
        source: String,
        /// Path to the git rebase todo file (provided by git)
        todo_file: String,
    },
}

fn main() {
    let cli = Cli::parse();

    if cli.no_color
        || std::env::var_os("NO_COLOR").is_some()
        || std::env::var_os("TERM").is_some_and(|v| v == "dumb")
        || !std::io::stdout().is_terminal()
    {
        control::set_override(false);
    }

    // The sequence-editor callback runs inside git; keep it free of any
    // repository inspection.
    if let Some(Command::InternalWriteTodo { source, todo_file }) = cli.command {
        if let Err(e) = handle_write_todo(&source, &todo_file) {
            eprintln!("error: {:#}", e);
            std::process::exit(1);
        }
        return;
    }

    if let Err(e) = git_commands::check_git_version() {
        msg::error(&format!("{:#}", e));
        std::process::exit(1);
    }

    let settings = Settings {
        line_by_line: cli.line_by_line,
        auto_accept: cli.auto_accept,
        dry_run: cli.dry_run,
        strategy: StrategyChoice::from_env(),
    };
    let ctx = Context::new(settings, build_logger());

    if let Err(e) = autosquash::run(&ctx) {
        msg::error(&format!("{:#}", e));
        let code = e
            .downcast_ref::<Error>()
            .map(Error::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

/// Diagnostic logger on stderr, level taken from GIT_AUTOSQUASH_LOG_LEVEL.
fn build_logger() -> slog::Logger {
    let level = match std::env::var("GIT_AUTOSQUASH_LOG_LEVEL")
        .unwrap_or_default()
        .to_lowercase()
        .as_str()
    {
        "trace" => slog::Level::Trace,
        "debug" => slog::Level::Debug,
        "info" => slog::Level::Info,
        "error" => slog::Level::Error,
        _ => slog::Level::Warning,
    };

    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = std::sync::Mutex::new(drain).fuse();
    let drain = slog::LevelFilter::new(drain, level).fuse();
    slog::Logger::root(drain, o!())
}

fn handle_write_todo(source: &str, todo_file: &str) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(source)
        .map_err(|e| anyhow::anyhow!("Failed to read source file '{}': {}", source, e))?;
    std::fs::write(todo_file, content)
        .map_err(|e| anyhow::anyhow!("Failed to write todo file '{}': {}", todo_file, e))?;
    Ok(())
}
