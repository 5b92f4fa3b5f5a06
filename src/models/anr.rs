use std::fmt::{self, Display, Formatter};

use super::cpu_usage::CpuUsageSnapshot;
use super::vm_traces::{ProcessSnapshot, VmTraces};

/// One "Application Not Responding" block.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Anr {
    pub process_name: String,
    pub component_package: String,
    pub component_class: String,
    pub pid: Option<u32>,
    pub reason: Option<String>,
    pub cpu_usages: Vec<CpuUsageSnapshot>,
    pub vm_traces: VmTraces,
}

impl Anr {
    pub fn new(
        process_name: impl Into<String>,
        component_package: impl Into<String>,
        component_class: impl Into<String>,
    ) -> Self {
        Self {
            process_name: process_name.into(),
            component_package: component_package.into(),
            component_class: component_class.into(),
            ..Default::default()
        }
    }

    // Thread dump of the process that did not respond, if one was captured.
    pub fn anr_process(&self) -> Option<&ProcessSnapshot> {
        self.pid.and_then(|pid| self.vm_traces.find_process(pid))
    }
}

impl Display for Anr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "ANR in {} ({}/{})",
            self.process_name, self.component_package, self.component_class
        )?;
        match self.pid {
            Some(pid) => writeln!(f, "  pid: {pid}")?,
            None => writeln!(f, "  pid: unknown")?,
        }
        if let Some(reason) = &self.reason {
            writeln!(f, "  reason: {reason}")?;
        }
        writeln!(f, "  cpu usage tables: {}", self.cpu_usages.len())?;
        write!(f, "  process dumps: {}", self.vm_traces.processes.len())
    }
}
