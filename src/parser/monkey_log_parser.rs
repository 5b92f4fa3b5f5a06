use lazy_static::lazy_static;
use regex::Regex;
use std::io::{BufRead, Read};
use tracing::{debug, info};

use super::anr_parser::AnrParser;
use super::whole_line;
use crate::error::Result;
use crate::models::bugreport::Bugreport;
use crate::utils::lines::{Line, LineCursor};

pub const MONKEY_ANR_PATTERN: &str = r"// NOT RESPONDING: \S+ \(pid \d+\)";
pub const ABORTED_PATTERN: &str = r"\*\* Monkey aborted due to error\.";

lazy_static! {
    static ref MONKEY_ANR: Regex = whole_line(MONKEY_ANR_PATTERN);
    static ref ABORTED: Regex = whole_line(ABORTED_PATTERN);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExtractState {
    Initial,
    Anr,
    Done,
}

// The lines from the `// NOT RESPONDING` marker (inclusive) up to the
// monkey abort message (exclusive), or to the end of input when the monkey
// never aborted. Empty when there is no marker.
pub fn extract_anr_region(lines: &[Line]) -> &[Line] {
    let mut state = ExtractState::Initial;
    let mut start = 0;
    let mut end = lines.len();

    for (i, line) in lines.iter().enumerate() {
        match state {
            ExtractState::Initial => {
                if MONKEY_ANR.is_match(&line.text) {
                    start = i;
                    state = ExtractState::Anr;
                }
            }
            ExtractState::Anr => {
                if ABORTED.is_match(&line.text) {
                    end = i;
                    state = ExtractState::Done;
                }
            }
            ExtractState::Done => break,
        }
    }

    match state {
        ExtractState::Initial => &[],
        _ => &lines[start..end],
    }
}

/// Finds the ANR a monkey run stopped on.
#[derive(Debug, Default)]
pub struct MonkeyLogParser;

impl MonkeyLogParser {
    pub fn new() -> Self {
        Self
    }

    // Read a whole monkey log and record its ANR in `bugreport`.
    // Only failing to read `reader` is an error; invalid UTF-8 is replaced
    // and a log without an ANR leaves `bugreport` untouched.
    pub fn parse(&mut self, bugreport: &mut Bugreport, mut reader: impl BufRead) -> Result<()> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        self.parse_lines(bugreport, &Line::from_bytes(&bytes))
    }

    pub fn parse_lines(&mut self, bugreport: &mut Bugreport, lines: &[Line]) -> Result<()> {
        let region = extract_anr_region(lines);
        if region.is_empty() {
            debug!(lines = lines.len(), "no monkey ANR marker");
            return Ok(());
        }

        let mut cursor = LineCursor::new(region);
        let first = cursor.next()?;
        if !MONKEY_ANR.is_match(&first.text) {
            return Ok(());
        }

        let mut anrs = AnrParser::new().parse(&mut cursor, true)?;
        info!(
            line = first.line_number,
            region = region.len(),
            found = anrs.len(),
            "monkey ANR region parsed"
        );
        if !anrs.is_empty() {
            bugreport.set_monkey_anr(anrs.swap_remove(0));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, BufReader, Read};
    use std::sync::Arc;

    const LOG: &str = "// NOT RESPONDING: com.foo (pid 1234)\nANR in com.foo (com.foo/com.foo.MainActivity)\nPID: 1234\nReason: timeout\n** Monkey aborted due to error.\n";

    #[test]
    fn test_extract_region_bounds() {
        let lines = Line::from_text(&format!(":Sending Touch\n{LOG}// Monkey finished"));
        let region = extract_anr_region(&lines);
        assert_eq!(region.len(), 4);
        assert_eq!(region[0].line_number, 2);
        assert!(region[0].text.starts_with("// NOT RESPONDING"));
        assert_eq!(region[3].text, "Reason: timeout");
    }

    #[test]
    fn test_extract_region_runs_to_end_without_abort() {
        let lines = Line::from_text("noise\n// NOT RESPONDING: a (pid 1)\nANR in a (a/.A)\nPID: 1");
        assert_eq!(extract_anr_region(&lines).len(), 3);
    }

    #[test]
    fn test_extract_region_without_marker() {
        let lines = Line::from_text("ANR in a (a/.A)\n** Monkey aborted due to error.");
        assert!(extract_anr_region(&lines).is_empty());
    }

    #[test]
    fn test_parse_sets_shared_anr() {
        let mut bugreport = Bugreport::new();
        MonkeyLogParser::new()
            .parse(&mut bugreport, LOG.as_bytes())
            .unwrap();

        let anr = bugreport.anr.as_ref().unwrap();
        assert!(Arc::ptr_eq(anr, bugreport.monkey_anr.as_ref().unwrap()));
        assert_eq!(anr.pid, Some(1234));
        assert_eq!(anr.reason.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_only_first_anr_is_kept() {
        let log = "// NOT RESPONDING: a (pid 1)\nANR in a (a/.A)\nANR in b (b/.B)\n";
        let mut bugreport = Bugreport::new();
        MonkeyLogParser::new()
            .parse(&mut bugreport, log.as_bytes())
            .unwrap();
        assert_eq!(bugreport.anr.unwrap().process_name, "a");
    }

    #[test]
    fn test_no_marker_leaves_bugreport_empty() {
        let log = "ANR in com.foo (com.foo/.Main)\nPID: 1\n** Monkey aborted due to error.\n";
        let mut bugreport = Bugreport::new();
        MonkeyLogParser::new()
            .parse(&mut bugreport, log.as_bytes())
            .unwrap();
        assert_eq!(bugreport, Bugreport::default());
    }

    #[test]
    fn test_invalid_utf8_before_marker() {
        let mut log = b":Sending Touch \xff\xfe garbage\n".to_vec();
        log.extend_from_slice(LOG.as_bytes());
        let mut bugreport = Bugreport::new();
        MonkeyLogParser::new()
            .parse(&mut bugreport, log.as_slice())
            .unwrap();
        assert_eq!(bugreport.anr.unwrap().pid, Some(1234));
    }

    #[test]
    fn test_invalid_utf8_inside_region() {
        let log = b"// NOT RESPONDING: a (pid 1)\nANR in a (a/.A)\nReason: bad \xc3 byte\nPID: 1\n";
        let mut bugreport = Bugreport::new();
        MonkeyLogParser::new()
            .parse(&mut bugreport, &log[..])
            .unwrap();
        let anr = bugreport.anr.unwrap();
        assert_eq!(anr.pid, Some(1));
        assert_eq!(anr.reason.as_deref(), Some("bad \u{fffd} byte"));
    }

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "device went away"))
        }
    }

    #[test]
    fn test_io_error_propagates() {
        let mut bugreport = Bugreport::new();
        let result = MonkeyLogParser::new().parse(&mut bugreport, BufReader::new(FailingReader));
        assert!(matches!(result, Err(crate::error::BugreportError::Io(_))));
        assert!(!bugreport.has_anr());
    }
}
