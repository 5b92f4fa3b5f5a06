use chrono::NaiveDateTime;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

use super::thread_snapshot_parser::{ThreadSnapshotParser, BEGIN_THREAD};
use super::whole_line;
use crate::error::CursorError;
use crate::models::vm_traces::ProcessSnapshot;
use crate::utils::lines::LineCursor;

pub const BEGIN_PROCESS_PATTERN: &str =
    r"----- pid (\d+) at (\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}) -----";

lazy_static! {
    pub static ref BEGIN_PROCESS: Regex = whole_line(BEGIN_PROCESS_PATTERN);
    static ref END_PROCESS: Regex = whole_line(r"----- end (\d+) -----");
    static ref CMD_LINE: Regex = whole_line(r"Cmd line: (.*)");
    static ref BUILD_FINGERPRINT: Regex = whole_line(r"Build fingerprint: '(.*)'");
    static ref ABI: Regex = whole_line(r"ABI: '(.*)'");
}

/// Parses the full thread dump of one process, from `----- pid N at ...`
/// through `----- end N -----`.
#[derive(Debug, Default)]
pub struct ProcessSnapshotParser {
    thread_parser: ThreadSnapshotParser,
}

impl ProcessSnapshotParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(
        &mut self,
        lines: &mut LineCursor,
    ) -> Result<Option<ProcessSnapshot>, CursorError> {
        if !lines.has_next() {
            return Ok(None);
        }
        let header = lines.next()?;
        let Some(caps) = BEGIN_PROCESS.captures(&header.text) else {
            debug!(line = header.line_number, "not a process dump header");
            return Ok(None);
        };

        let Ok(pid) = caps[1].parse() else {
            debug!(line = header.line_number, "process dump pid out of range");
            return Ok(None);
        };
        let mut process = ProcessSnapshot::new(pid);
        process.date = NaiveDateTime::parse_from_str(&caps[2], "%Y-%m-%d %H:%M:%S").ok();

        let mut terminated = false;
        while lines.has_next() {
            let line = lines.next()?;
            let text = line.text.as_str();
            if let Some(caps) = CMD_LINE.captures(text) {
                process.cmd_line = Some(caps[1].to_string());
            } else if let Some(caps) = BUILD_FINGERPRINT.captures(text) {
                process.build_fingerprint = Some(caps[1].to_string());
            } else if let Some(caps) = ABI.captures(text) {
                process.abi = Some(caps[1].to_string());
            } else if BEGIN_THREAD.is_match(text) {
                lines.rewind()?;
                if let Some(thread) = self.thread_parser.parse(lines)? {
                    process.threads.push(thread);
                }
            } else if let Some(caps) = END_PROCESS.captures(text) {
                if caps[1].parse::<u32>().ok() != Some(process.pid) {
                    debug!(line = line.line_number, "end marker for a different pid");
                }
                terminated = true;
                break;
            } else if BEGIN_PROCESS.is_match(text) {
                lines.rewind()?;
                break;
            }
        }

        if !terminated {
            debug!(pid = process.pid, "process dump ended without an end marker");
        }
        Ok(Some(process))
    }
}
