//! Decoy imposter file linter.
//!
//! Usage:
//!   decoy-lint <directory_or_file> [OPTIONS]

use clap::{Parser, ValueEnum};
use decoy_lint::{lint_path, LintIssue, LintOptions, LintResult, Severity};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;

// ANSI color codes
const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Output {
    Text,
    Json,
}

/// Validate imposter files the way the server would when loading them
#[derive(Parser, Debug)]
#[command(name = "decoy-lint", author, version)]
struct Args {
    /// Imposter file, or a directory of .json/.yaml/.yml files
    path: PathBuf,

    /// Validate as if the server ran with --allow-injection
    #[arg(long)]
    allow_injection: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = Output::Text)]
    output: Output,

    /// Only show errors (hide warnings)
    #[arg(short = 'e', long)]
    errors_only: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let options = LintOptions {
        allow_injection: args.allow_injection,
    };

    let mut result = lint_path(&args.path, &options);
    if args.errors_only {
        result.retain_errors();
    }

    match args.output {
        Output::Json => match serde_json::to_string_pretty(&result) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Failed to render results: {e}");
                return ExitCode::FAILURE;
            }
        },
        Output::Text => print_results(&args, &result),
    }

    if result.has_errors() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn print_results(args: &Args, result: &LintResult) {
    if result.files_checked == 0 {
        println!("{YELLOW}Warning:{RESET} no imposter files found in {}", args.path.display());
        return;
    }

    let mut by_file: BTreeMap<&PathBuf, Vec<&LintIssue>> = BTreeMap::new();
    for issue in &result.issues {
        by_file.entry(&issue.file).or_default().push(issue);
    }

    for (file, issues) in by_file {
        let failed = issues.iter().any(|i| i.severity == Severity::Error);
        let status = if failed {
            format!("{RED}FAIL{RESET}")
        } else {
            format!("{YELLOW}WARN{RESET}")
        };
        println!("{status} {BOLD}{CYAN}{}{RESET}", file.display());

        for issue in issues {
            let color = match issue.severity {
                Severity::Error => RED,
                Severity::Warning => YELLOW,
            };
            let location = issue
                .location
                .as_ref()
                .map(|l| format!("{DIM}[{l}]{RESET} "))
                .unwrap_or_default();
            println!(
                "  {location}{BOLD}{color}{}{RESET}: {} {DIM}({}){RESET}",
                issue.severity.label(),
                issue.message,
                issue.code
            );
        }
        println!();
    }

    println!(
        "{DIM}Files checked:{RESET} {BOLD}{}{RESET}  {RED}Errors:{RESET} {}  {YELLOW}Warnings:{RESET} {}",
        result.files_checked, result.errors, result.warnings
    );
    if result.issues.is_empty() {
        println!("{GREEN}{BOLD}All checks passed!{RESET}");
    }
}
