use std::path::{Path, PathBuf};
use std::process::ExitCode;

use bugreport_anr::inspector::{inspect, render_triage};
use bugreport_anr::models::anr_summary::{AnrItem, AnrSummary};
use bugreport_anr::utils::file_utils::{collect_log_files, read_log_lines, summary_path, write_summary};
use bugreport_anr::{Bugreport, MonkeyLogParser, Result};
use clap::Parser;
use rayon::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cli_parser::{Cli, Mode};

pub mod cli_parser;
pub mod repl;

fn main() -> ExitCode {
    let args = Cli::parse();
    init_tracing(args.verbose);

    let Some(path) = args.path.as_deref() else {
        eprintln!("Error: Please input the file name.");
        return ExitCode::FAILURE;
    };
    if !path.exists() {
        eprintln!("Error: The file '{}' does not exist.", path.display());
        return ExitCode::FAILURE;
    }

    let result = if args.repl {
        parse_file(path).map(repl::repl)
    } else {
        run(&args, path)
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

// Parse one log with a parser of its own.
fn parse_file(path: &Path) -> Result<Bugreport> {
    let lines = read_log_lines(path)?;
    let mut bugreport = Bugreport::new();
    MonkeyLogParser::new().parse_lines(&mut bugreport, &lines)?;
    info!(path = %path.display(), anr = bugreport.has_anr(), "parsed");
    Ok(bugreport)
}

fn run(args: &Cli, path: &Path) -> Result<()> {
    let files = collect_log_files(path)?;
    let parsed: Vec<(PathBuf, Bugreport)> = files
        .par_iter()
        .filter_map(|file| match parse_file(file) {
            Ok(bugreport) => Some((file.clone(), bugreport)),
            Err(e) => {
                warn!(path = %file.display(), "skipped: {}", e);
                None
            }
        })
        .collect();

    match args.mode {
        Mode::Parse | Mode::Inspect => {
            for (file, bugreport) in &parsed {
                println!("==== {} ====", file.display());
                println!("{bugreport}");
                if args.mode == Mode::Inspect {
                    if let Some(anr) = &bugreport.anr {
                        println!("{}", inspect(anr));
                    }
                }
            }
        }
        Mode::Report => {
            for (file, bugreport) in &parsed {
                println!("==== {} ====", file.display());
                match &bugreport.anr {
                    Some(anr) => print!("{}", render_triage(anr, &inspect(anr))),
                    None => println!("{bugreport}"),
                }
            }
        }
        Mode::Summary => {
            let summary = AnrSummary::from_items(
                parsed
                    .iter()
                    .filter_map(|(file, bugreport)| AnrItem::from_bugreport(bugreport, file)),
            );
            if summary.is_empty() {
                println!("No ANR found in {} file(s).", files.len());
                return Ok(());
            }
            let out = args.output.clone().unwrap_or_else(|| summary_path(path));
            write_summary(&summary, &out)?;
            println!("Summary written to: {}", out.display());
        }
    }

    println!("Done!");
    Ok(())
}
