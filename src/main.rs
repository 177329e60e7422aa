use clap::Parser;
use kanban_rust::cli::commands;
use kanban_rust::cli::{Cli, Commands};
use kanban_rust::logging::init_logging;
use kanban_rust::{KanbanError, StructuredError};
use std::io::{self, IsTerminal};

fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.verbose, cli.quiet, cli.log_file.as_deref()) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let overrides = cli.overrides();

    let result = match &cli.command {
        Commands::Sync(args) => commands::sync::execute(args, cli.json, &overrides),
        Commands::Metrics(args) => commands::metrics::execute(args, cli.json, &overrides),
        Commands::Board(args) => commands::board::execute(args, cli.json, &overrides),
        Commands::Audit(args) => commands::audit::execute(args, cli.json, &overrides),
        Commands::Cfd { command } => commands::cfd::execute(command, cli.json, &overrides),
        Commands::Db { command } => commands::db::execute(command, cli.json, &overrides),
        Commands::Config { command } => commands::config::execute(command, cli.json, &overrides),
        Commands::Completions(args) => commands::completions::execute(args),
        Commands::Version => commands::version::execute(cli.json),
    };

    if let Err(e) = result {
        handle_error(&e, cli.json, cli.no_color);
    }
}

/// Handle errors with structured output support.
///
/// When --json is set or stdout is not a TTY, outputs structured JSON to stderr.
/// Otherwise, outputs a human-readable error with optional color.
fn handle_error(err: &KanbanError, json_mode: bool, no_color: bool) -> ! {
    let structured = StructuredError::from_error(err);
    let exit_code = structured.code.exit_code();

    if json_mode || !io::stdout().is_terminal() {
        let json = structured.to_json();
        eprintln!(
            "{}",
            serde_json::to_string_pretty(&json).unwrap_or_else(|_| json.to_string())
        );
    } else {
        let use_color = !no_color && io::stderr().is_terminal();
        eprintln!("{}", structured.to_human(use_color));
    }

    std::process::exit(exit_code);
}
