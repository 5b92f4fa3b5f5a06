use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Extract the ANR a monkey run stopped on from its logs
#[derive(Parser, Debug)]
#[command(name = "bugreport_anr", version)]
pub struct Cli {
    /// Monkey log, zip archive or directory of logs
    pub path: Option<PathBuf>,

    /// What to do with the parsed logs
    #[arg(value_enum, short, long, default_value = "parse")]
    pub mode: Mode,

    /// Explore one parsed log interactively
    #[arg(short, long, action, default_value = "false")]
    pub repl: bool,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long, action, default_value = "false")]
    pub verbose: bool,

    /// Where summary mode writes its report, summary.txt next to the input by default
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Print the ANR of every log
    Parse,
    /// Print the ANR plus blocked threads and deadlocks
    Inspect,
    /// Print the main thread, deadlock and interesting processes with their stacks
    Report,
    /// Group ANRs of all logs by process and stack into summary.txt
    Summary,
}
