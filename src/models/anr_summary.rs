use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use super::bugreport::Bugreport;

lazy_static! {
    static ref DIGITS: Regex = Regex::new(r"\d").unwrap();
}

/// The ANR of one log file reduced to what grouping needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnrItem {
    pub process_name: String,
    /// Java frames of the ANR process' main thread, top first.
    pub trace_list: Vec<String>,
    pub source: PathBuf,
}

impl AnrItem {
    pub fn from_bugreport(bugreport: &Bugreport, source: &Path) -> Option<Self> {
        let anr = bugreport.anr.as_ref()?;
        let trace_list = anr
            .anr_process()
            .and_then(|p| p.main_thread())
            .map(|t| t.java_frames().map(|f| f.text.trim().to_string()).collect())
            .unwrap_or_default();
        Some(Self {
            process_name: anr.process_name.clone(),
            trace_list,
            source: source.to_path_buf(),
        })
    }
}

#[derive(Debug, Default)]
struct TraceAndFiles {
    traces: Vec<String>,
    sources: Vec<PathBuf>,
}

impl TraceAndFiles {
    fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        writeln!(writer, " ")?;
        writeln!(
            writer,
            "<<<<<<<<<<<<<<<<<<<<<<<<<<<{} times>>>>>>>>>>>>>>>>>>>>>>>>>>>",
            self.sources.len()
        )?;

        if self.traces.is_empty() {
            writeln!(writer, "  no trace")?;
        } else {
            for trace in &self.traces {
                writeln!(writer, "{}", trace)?;
            }
        }

        for path in &self.sources {
            writeln!(writer, "{}", path.display())?;
        }

        Ok(())
    }
}

/// All ANRs of one process, grouped by (digit-masked) main-thread stack.
#[derive(Debug)]
pub struct ProcessAnrs {
    process_name: String,
    groups: Vec<TraceAndFiles>,
}

impl ProcessAnrs {
    fn new(process_name: String) -> Self {
        Self {
            process_name,
            groups: Vec::new(),
        }
    }

    pub fn process_name(&self) -> &str {
        &self.process_name
    }

    // Occurrence count of each distinct stack, in first-seen order.
    pub fn counts(&self) -> Vec<usize> {
        self.groups.iter().map(|g| g.sources.len()).collect()
    }

    fn add(&mut self, traces: &[String], source: PathBuf) {
        let masked = mask_traces(traces);
        match self.groups.iter_mut().find(|g| g.traces == masked) {
            Some(group) => group.sources.push(source),
            None => self.groups.push(TraceAndFiles {
                traces: masked,
                sources: vec![source],
            }),
        }
    }

    fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        writeln!(
            writer,
            "---------------------------begin {}---------------------------",
            self.process_name
        )?;
        for group in &self.groups {
            group.write_to(writer)?;
        }
        writeln!(
            writer,
            "---------------------------end {}---------------------------",
            self.process_name
        )
    }
}

fn mask_traces(traces: &[String]) -> Vec<String> {
    traces
        .iter()
        .map(|t| DIGITS.replace_all(t, "X").to_string())
        .collect()
}

/// Cross-log ANR summary, the `summary.txt` of a batch run.
#[derive(Debug, Default)]
pub struct AnrSummary {
    processes: Vec<ProcessAnrs>,
    index: HashMap<String, usize>,
}

impl AnrSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_items(items: impl IntoIterator<Item = AnrItem>) -> Self {
        let mut summary = Self::new();
        for item in items {
            summary.add(item);
        }
        summary
    }

    pub fn add(&mut self, item: AnrItem) {
        let index = match self.index.get(&item.process_name) {
            Some(&index) => index,
            None => {
                self.index
                    .insert(item.process_name.clone(), self.processes.len());
                self.processes
                    .push(ProcessAnrs::new(item.process_name.clone()));
                self.processes.len() - 1
            }
        };
        self.processes[index].add(&item.trace_list, item.source);
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    pub fn processes(&self) -> &[ProcessAnrs] {
        &self.processes
    }

    pub fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        for process in &self.processes {
            process.write_to(writer)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(process: &str, traces: &[&str], source: &str) -> AnrItem {
        AnrItem {
            process_name: process.to_string(),
            trace_list: traces.iter().map(|s| s.to_string()).collect(),
            source: PathBuf::from(source),
        }
    }

    #[test]
    fn test_groups_by_masked_trace() {
        let summary = AnrSummary::from_items(vec![
            item("com.foo", &["at com.foo.A.run(A.java:12)"], "log1.txt"),
            item("com.foo", &["at com.foo.A.run(A.java:98)"], "log2.txt"),
            item("com.foo", &["at com.foo.B.run(B.java:1)"], "log3.txt"),
            item("com.bar", &[], "log4.txt"),
        ]);

        assert_eq!(summary.processes().len(), 2);
        assert_eq!(summary.processes()[0].process_name(), "com.foo");
        assert_eq!(summary.processes()[0].counts(), vec![2, 1]);
        assert_eq!(summary.processes()[1].counts(), vec![1]);
    }

    #[test]
    fn test_write_summary() {
        let summary = AnrSummary::from_items(vec![item("com.bar", &[], "log4.txt")]);
        let mut out = Vec::new();
        summary.write_to(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("---------------------------begin com.bar"));
        assert!(text.contains("<1 times>"));
        assert!(text.contains("  no trace"));
        assert!(text.contains("log4.txt"));
        assert!(text.trim_end().ends_with("end com.bar---------------------------"));
    }
}
