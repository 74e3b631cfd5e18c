//! Run declarative validation rules against JSON documents.
//!
//! `verdict check` builds a suite from a TOML rule file, runs it against a
//! JSON input, and reports per-field verdicts. `verdict lint` only checks
//! that a rule file parses and compiles.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use verdict::check::{check_file, lint_file, render_json, render_text};
use verdict::{exit_codes, logging};

#[derive(Parser)]
#[command(
    name = "verdict",
    version,
    about = "Run declarative validation suites against JSON input"
)]
struct Cli {
    /// Log suite lifecycle diagnostics to stderr.
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check a JSON document against a rule file.
    Check {
        /// TOML rule file.
        #[arg(long)]
        rules: PathBuf,
        /// JSON document to validate.
        #[arg(long)]
        input: PathBuf,
        /// Report format.
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Parse and compile a rule file without checking any input.
    Lint {
        /// TOML rule file.
        #[arg(long)]
        rules: PathBuf,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Check {
            rules,
            input,
            format,
        } => cmd_check(&rules, &input, format),
        Command::Lint { rules } => cmd_lint(&rules),
    }
}

fn cmd_check(rules: &Path, input: &Path, format: OutputFormat) -> Result<i32> {
    let outcome = check_file(rules, input)?;
    match format {
        OutputFormat::Text => print!("{}", render_text(&outcome.result)),
        OutputFormat::Json => println!("{}", render_json(&outcome.result)?),
    }
    for err in &outcome.deferred {
        eprintln!("warning: {err}");
    }
    if outcome.result.valid {
        Ok(exit_codes::OK)
    } else {
        Ok(exit_codes::VALIDATION_FAILED)
    }
}

fn cmd_lint(rules: &Path) -> Result<i32> {
    let outcome = lint_file(rules)?;
    let name = outcome.name.as_deref().unwrap_or("(unnamed)");
    println!(
        "{name}: {} rules over {} fields",
        outcome.rule_count,
        outcome.fields.len()
    );
    Ok(exit_codes::OK)
}
