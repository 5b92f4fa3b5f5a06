pub mod anr;
pub mod anr_summary;
pub mod bugreport;
pub mod cpu_usage;
pub mod vm_traces;
