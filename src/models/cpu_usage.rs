use chrono::NaiveDateTime;
use std::fmt::{self, Display, Formatter};

/// Whether a process row was present in both samples, or appeared/disappeared
/// in between (`+`/`-` prefix in the table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Delta {
    #[default]
    Existing,
    Added,
    Removed,
}

impl Delta {
    pub(crate) fn from_prefix(prefix: &str) -> Self {
        match prefix {
            "+" => Delta::Added,
            "-" => Delta::Removed,
            _ => Delta::Existing,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CpuUsage {
    pub pid: u32,
    pub name: String,
    pub total_percent: f32,
    pub user_percent: f32,
    pub kernel_percent: f32,
    pub minor_faults: Option<u64>,
    pub major_faults: Option<u64>,
    pub delta: Delta,
    /// Per-thread rows listed under this process, `later` tables only.
    pub threads: Vec<CpuUsage>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CpuTotal {
    pub total_percent: f32,
    pub user_percent: f32,
    pub kernel_percent: f32,
    pub iowait_percent: Option<f32>,
}

/// One `CPU usage from ...` table.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CpuUsageSnapshot {
    pub from_ms: i64,
    pub to_ms: i64,
    /// `later` tables are sampled after the event, `ago` tables before it.
    pub later: bool,
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
    pub usages: Vec<CpuUsage>,
    pub total: Option<CpuTotal>,
}

impl CpuUsageSnapshot {
    pub fn find_pid(&self, pid: u32) -> Option<&CpuUsage> {
        self.usages.iter().find(|u| u.pid == pid)
    }

    // Rows sorted by descending total percentage.
    pub fn top(&self, n: usize) -> Vec<&CpuUsage> {
        let mut rows: Vec<&CpuUsage> = self.usages.iter().collect();
        rows.sort_by(|a, b| b.total_percent.total_cmp(&a.total_percent));
        rows.truncate(n);
        rows
    }
}

impl Display for CpuUsageSnapshot {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "CPU usage from {}ms to {}ms {} ({} rows)",
            self.from_ms,
            self.to_ms,
            if self.later { "later" } else { "ago" },
            self.usages.len()
        )?;
        for usage in self.top(5) {
            writeln!(
                f,
                "  {:>5.1}% {}/{}: {}% user + {}% kernel",
                usage.total_percent,
                usage.pid,
                usage.name,
                usage.user_percent,
                usage.kernel_percent
            )?;
            for thread in usage.threads.iter().take(3) {
                writeln!(
                    f,
                    "      {:>5.1}% {}/{}",
                    thread.total_percent, thread.pid, thread.name
                )?;
            }
        }
        if let Some(total) = &self.total {
            writeln!(f, "  {:>5.1}% TOTAL", total.total_percent)?;
        }
        Ok(())
    }
}
