use regex::Regex;

pub mod anr_parser;
pub mod cpu_usage_parser;
pub mod monkey_log_parser;
pub mod process_snapshot_parser;
pub mod thread_snapshot_parser;

pub use anr_parser::AnrParser;
pub use cpu_usage_parser::CpuUsageParser;
pub use monkey_log_parser::MonkeyLogParser;
pub use process_snapshot_parser::ProcessSnapshotParser;
pub use thread_snapshot_parser::ThreadSnapshotParser;

// Compile `pattern` so that it only matches a complete line.
pub(crate) fn whole_line(pattern: &str) -> Regex {
    Regex::new(&format!("^(?:{pattern})$")).unwrap()
}
