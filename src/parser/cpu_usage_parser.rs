use chrono::NaiveDateTime;
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use tracing::debug;

use super::whole_line;
use crate::error::CursorError;
use crate::models::cpu_usage::{CpuTotal, CpuUsage, CpuUsageSnapshot, Delta};
use crate::utils::lines::LineCursor;

pub const CPU_USAGE_BEGIN_PATTERN: &str =
    r"CPU usage from (-?\d+)ms to (-?\d+)ms (ago|later)(?: \((.+) to (.+)\))?:";

lazy_static! {
    // CPU usage from 5000ms to 0ms ago (2016-01-01 12:00:00.000 to 2016-01-01 12:00:05.000):
    pub static ref CPU_USAGE_BEGIN: Regex = whole_line(CPU_USAGE_BEGIN_PATTERN);
    //   25% 1234/system_server: 20% user + 5% kernel / faults: 100 minor 2 major
    //     96% 1240/Binder:1234_1: 92% user + 4.1% kernel
    static ref CPU_USAGE_ROW: Regex = whole_line(
        r"(\s*)([+-]?)(\d+(?:\.\d+)?)% (\d+)/(\S+): (\d+(?:\.\d+)?)% user \+ (\d+(?:\.\d+)?)% kernel(?: \+ [^/]*)?(?: / faults: (\d+) minor(?: (\d+) major)?)?"
    );
    // 12% TOTAL: 8% user + 3% kernel + 0.5% iowait + 0% softirq
    static ref CPU_USAGE_TOTAL: Regex = whole_line(
        r"\s*(\d+(?:\.\d+)?)% TOTAL: (\d+(?:\.\d+)?)% user \+ (\d+(?:\.\d+)?)% kernel(?: \+ (\d+(?:\.\d+)?)% iowait)?.*"
    );
}

/// Parses one `CPU usage from ...` table.
///
/// The parser can be reused, but one instance serves one cursor at a time.
#[derive(Debug, Default)]
pub struct CpuUsageParser;

impl CpuUsageParser {
    pub fn new() -> Self {
        Self
    }

    // Read the table starting at the cursor's next line.
    // Returns `Ok(None)` when the header does not match or the table has no
    // rows. Either way the cursor is left just after the consumed lines.
    pub fn parse(
        &mut self,
        lines: &mut LineCursor,
    ) -> Result<Option<CpuUsageSnapshot>, CursorError> {
        if !lines.has_next() {
            return Ok(None);
        }
        let header = lines.next()?;
        let Some(caps) = CPU_USAGE_BEGIN.captures(&header.text) else {
            debug!(line = header.line_number, "not a cpu usage header");
            return Ok(None);
        };

        let mut snapshot = CpuUsageSnapshot {
            from_ms: caps[1].parse().unwrap_or_default(),
            to_ms: caps[2].parse().unwrap_or_default(),
            later: &caps[3] == "later",
            start: caps.get(4).and_then(|m| parse_time(m.as_str())),
            end: caps.get(5).and_then(|m| parse_time(m.as_str())),
            ..Default::default()
        };

        while lines.has_next() {
            let line = lines.next()?;
            if let Some(caps) = CPU_USAGE_ROW.captures(&line.text) {
                let row = parse_row(&caps);
                if !is_thread_row(&caps) {
                    snapshot.usages.push(row);
                } else if let Some(process) = snapshot.usages.last_mut() {
                    process.threads.push(row);
                } else {
                    debug!(line = line.line_number, "thread row without a process row");
                }
            } else if let Some(caps) = CPU_USAGE_TOTAL.captures(&line.text) {
                snapshot.total = Some(CpuTotal {
                    total_percent: percent(&caps, 1),
                    user_percent: percent(&caps, 2),
                    kernel_percent: percent(&caps, 3),
                    iowait_percent: caps.get(4).and_then(|m| m.as_str().parse().ok()),
                });
                break;
            } else {
                lines.rewind()?;
                break;
            }
        }

        if snapshot.usages.is_empty() && snapshot.total.is_none() {
            debug!(line = header.line_number, "empty cpu usage table");
            return Ok(None);
        }
        Ok(Some(snapshot))
    }
}

// Process rows are indented by two columns (sign included), their threads by four.
fn is_thread_row(caps: &Captures) -> bool {
    caps[1].len() + caps[2].len() >= 4
}

fn parse_row(caps: &Captures) -> CpuUsage {
    CpuUsage {
        delta: Delta::from_prefix(&caps[2]),
        total_percent: percent(caps, 3),
        pid: caps[4].parse().unwrap_or_default(),
        name: caps[5].to_string(),
        user_percent: percent(caps, 6),
        kernel_percent: percent(caps, 7),
        minor_faults: caps.get(8).and_then(|m| m.as_str().parse().ok()),
        major_faults: caps.get(9).and_then(|m| m.as_str().parse().ok()),
        threads: Vec::new(),
    }
}

fn percent(caps: &Captures, group: usize) -> f32 {
    caps.get(group)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or_default()
}

fn parse_time(text: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text.trim(), "%Y-%m-%d %H:%M:%S%.f").ok()
}
