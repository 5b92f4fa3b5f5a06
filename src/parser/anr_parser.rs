use lazy_static::lazy_static;
use regex::{Captures, Regex};
use tracing::debug;

use super::cpu_usage_parser::{CpuUsageParser, CPU_USAGE_BEGIN};
use super::process_snapshot_parser::{ProcessSnapshotParser, BEGIN_PROCESS};
use super::whole_line;
use crate::error::CursorError;
use crate::models::anr::Anr;
use crate::utils::lines::LineCursor;

pub const ANR_PATTERN: &str = r"ANR in (\S+) \((\S+)/(\S+)\)";
pub const PID_PATTERN: &str = r"PID: (\d+)";
pub const REASON_PATTERN: &str = r"Reason: (.*)";

/// What a line inside an ANR block can be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnrLine {
    Header,
    Pid,
    Reason,
    CpuUsage,
    ProcessBegin,
}

lazy_static! {
    static ref ANR: Regex = whole_line(ANR_PATTERN);
    static ref PID: Regex = whole_line(PID_PATTERN);
    static ref REASON: Regex = whole_line(REASON_PATTERN);

    // Tried in order; the first match wins.
    static ref DISPATCH: [(AnrLine, &'static Regex); 5] = [
        (AnrLine::Header, &*ANR),
        (AnrLine::Pid, &*PID),
        (AnrLine::Reason, &*REASON),
        (AnrLine::CpuUsage, &*CPU_USAGE_BEGIN),
        (AnrLine::ProcessBegin, &*BEGIN_PROCESS),
    ];
}

// Classify one line. `None` means the line carries nothing for an ANR.
pub fn classify(text: &str) -> Option<(AnrLine, Captures<'_>)> {
    DISPATCH
        .iter()
        .find_map(|(kind, re)| re.captures(text).map(|caps| (*kind, caps)))
}

/// Extracts ANR blocks and the cpu usage tables and thread dumps inside them.
///
/// The parser can be reused, but one instance serves one cursor at a time.
#[derive(Debug, Default)]
pub struct AnrParser {
    cpu_usage_parser: CpuUsageParser,
    process_parser: ProcessSnapshotParser,
}

impl AnrParser {
    pub fn new() -> Self {
        Self::default()
    }

    // Parse every ANR until the cursor is exhausted, in discovery order.
    // Thread dumps are only collected when `try_traces` is set.
    pub fn parse(
        &mut self,
        lines: &mut LineCursor,
        try_traces: bool,
    ) -> Result<Vec<Anr>, CursorError> {
        let mut result: Vec<Anr> = Vec::new();
        // Index into `result` of the ANR being filled in.
        let mut current: Option<usize> = None;

        while lines.has_next() {
            let line = lines.next()?;
            let Some((kind, caps)) = classify(&line.text) else {
                continue;
            };

            if kind == AnrLine::Header {
                result.push(Anr::new(&caps[1], &caps[2], &caps[3]));
                current = Some(result.len() - 1);
                continue;
            }
            let Some(anr) = current.and_then(|i| result.get_mut(i)) else {
                debug!(line = line.line_number, ?kind, "no ANR header yet, dropped");
                continue;
            };

            match kind {
                AnrLine::Header => {}
                AnrLine::Pid => anr.pid = caps[1].parse().ok(),
                AnrLine::Reason => anr.reason = Some(caps[1].to_string()),
                AnrLine::CpuUsage => {
                    lines.rewind()?;
                    match self.cpu_usage_parser.parse(lines)? {
                        Some(snapshot) => anr.cpu_usages.push(snapshot),
                        // TODO: backtrack and retry the lines of a rejected table
                        None => debug!(line = line.line_number, "cpu usage table dropped"),
                    }
                }
                AnrLine::ProcessBegin if try_traces => {
                    lines.rewind()?;
                    match self.process_parser.parse(lines)? {
                        Some(process) => anr.vm_traces.processes.push(process),
                        None => debug!(line = line.line_number, "process dump dropped"),
                    }
                }
                AnrLine::ProcessBegin => {}
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::lines::Line;

    fn parse(text: &str, try_traces: bool) -> Vec<Anr> {
        let lines = Line::from_text(text);
        let mut cursor = LineCursor::new(&lines);
        AnrParser::new().parse(&mut cursor, try_traces).unwrap()
    }

    #[test]
    fn test_classify_order() {
        assert_eq!(classify("ANR in a (b/c)").unwrap().0, AnrLine::Header);
        assert_eq!(classify("PID: 12").unwrap().0, AnrLine::Pid);
        assert_eq!(classify("Reason: PID: 12").unwrap().0, AnrLine::Reason);
        assert_eq!(
            classify("CPU usage from 1ms to 0ms ago:").unwrap().0,
            AnrLine::CpuUsage
        );
        assert_eq!(
            classify("----- pid 1 at 2016-01-01 00:00:00 -----").unwrap().0,
            AnrLine::ProcessBegin
        );
        assert!(classify("Load: 1.0 / 2.0 / 3.0").is_none());
        assert!(classify("  PID: 12").is_none());
    }

    #[test]
    fn test_header_pid_reason() {
        let anrs = parse(
            "ANR in com.foo (com.foo/com.foo.MainActivity)\nPID: 1234\nReason: Input dispatching timed out\n",
            false,
        );
        assert_eq!(anrs.len(), 1);
        let anr = &anrs[0];
        assert_eq!(anr.process_name, "com.foo");
        assert_eq!(anr.component_package, "com.foo");
        assert_eq!(anr.component_class, "com.foo.MainActivity");
        assert_eq!(anr.pid, Some(1234));
        assert_eq!(anr.reason.as_deref(), Some("Input dispatching timed out"));
    }

    #[test]
    fn test_header_only_keeps_defaults() {
        let anrs = parse("ANR in com.foo (com.foo/.Main)", true);
        assert_eq!(anrs.len(), 1);
        assert_eq!(anrs[0].pid, None);
        assert_eq!(anrs[0].reason, None);
        assert!(anrs[0].cpu_usages.is_empty());
        assert!(anrs[0].vm_traces.processes.is_empty());
    }

    #[test]
    fn test_fields_before_header_are_ignored() {
        let anrs = parse(
            "PID: 1\nReason: nope\nCPU usage from 1ms to 0ms ago:\n  1% 1/init: 1% user + 0% kernel\nANR in a (a/.B)",
            true,
        );
        assert_eq!(anrs.len(), 1);
        assert_eq!(anrs[0].pid, None);
        assert!(anrs[0].cpu_usages.is_empty());
    }

    #[test]
    fn test_multiple_anrs_in_order() {
        let anrs = parse(
            "ANR in a (a/.A)\nPID: 1\nANR in b (b/.B)\nReason: second\nPID: 2",
            false,
        );
        assert_eq!(anrs.len(), 2);
        assert_eq!(anrs[0].process_name, "a");
        assert_eq!(anrs[0].pid, Some(1));
        assert_eq!(anrs[0].reason, None);
        assert_eq!(anrs[1].process_name, "b");
        assert_eq!(anrs[1].pid, Some(2));
        assert_eq!(anrs[1].reason.as_deref(), Some("second"));
    }

    #[test]
    fn test_cpu_usage_and_traces() {
        let text = r#"ANR in com.foo (com.foo/.Main)
PID: 1234
Reason: timeout
Load: 1.0 / 2.0 / 3.0
CPU usage from 5000ms to 0ms ago:
  25% 1234/com.foo: 20% user + 5% kernel
CPU usage from 5000ms to 0ms ago:
PID: 1234
----- pid 1234 at 2016-01-01 12:00:04 -----
Cmd line: com.foo
"main" prio=5 tid=1 Native
  at com.foo.Main.run(Main.java:1)

----- end 1234 -----"#;

        let anrs = parse(text, true);
        assert_eq!(anrs.len(), 1);
        // the empty second table is dropped and its following line still read
        assert_eq!(anrs[0].cpu_usages.len(), 1);
        assert_eq!(anrs[0].pid, Some(1234));
        assert_eq!(anrs[0].vm_traces.processes.len(), 1);
        assert_eq!(anrs[0].anr_process().unwrap().threads.len(), 1);

        let anrs = parse(text, false);
        assert!(anrs[0].vm_traces.processes.is_empty());
        assert_eq!(anrs[0].cpu_usages.len(), 1);
    }

    #[test]
    fn test_parser_is_reusable() {
        let lines = Line::from_text("ANR in a (a/.A)\nPID: 1");
        let mut parser = AnrParser::new();
        let first = parser.parse(&mut LineCursor::new(&lines), true).unwrap();
        let second = parser.parse(&mut LineCursor::new(&lines), true).unwrap();
        assert_eq!(first, second);
    }
}
