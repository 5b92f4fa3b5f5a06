use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt::{self, Display, Formatter, Write};

use tracing::debug;

use crate::models::anr::Anr;
use crate::models::vm_traces::{
    JavaFrame, LockKind, LockSnapshot, ProcessSnapshot, StackFrame, ThreadSnapshot,
};

// Stack of an idle heap task daemon, which always waits on a lock.
const HEAP_TASK_DAEMON_STACK: [&str; 3] = [
    "dalvik.system.VMRuntime.runHeapTasks",
    "java.lang.Daemons$HeapTaskDaemon.run",
    "java.lang.Thread.run",
];
const HANDWRITTEN_BINDER_SUFFIXES: [&str; 2] = ["Native", "Proxy"];

/// All lock lines of one thread folded by address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CombinedLock {
    pub address: String,
    pub class_name: String,
    pub kinds: BTreeSet<LockKind>,
    pub held_by: Option<u32>,
}

pub fn combine_locks(thread: &ThreadSnapshot) -> BTreeMap<String, CombinedLock> {
    let mut locks: BTreeMap<String, CombinedLock> = BTreeMap::new();
    for lock in thread.locks() {
        let Some(address) = &lock.address else {
            continue;
        };
        let entry = locks
            .entry(address.clone())
            .or_insert_with(|| CombinedLock {
                address: address.clone(),
                class_name: lock.qualified_class(),
                kinds: BTreeSet::new(),
                held_by: None,
            });
        entry.kinds.insert(lock.kind);
        entry.held_by = entry.held_by.or(lock.held_by);
    }
    locks
}

// The thread is called `name` and its java frames are exactly `signature`.
// Native and kernel frames in between do not count.
fn matches_java_stack(thread: &ThreadSnapshot, name: &str, signature: &[&str]) -> bool {
    if thread.name != name {
        return false;
    }
    let methods: Vec<String> = thread.java_frames().map(|f| f.qualified_method()).collect();
    methods.len() == signature.len()
        && methods
            .iter()
            .zip(signature.iter())
            .all(|(method, expected)| method == expected)
}

fn waiting_to_lock(thread: &ThreadSnapshot) -> Option<&LockSnapshot> {
    thread.locks().find(|l| l.kind == LockKind::Blocked)
}

// A thread waiting to lock a monitor. The expected wait of an idle
// `HeapTaskDaemon` does not count.
pub fn is_blocked(thread: &ThreadSnapshot) -> bool {
    if matches_java_stack(thread, "HeapTaskDaemon", &HEAP_TASK_DAEMON_STACK) {
        return false;
    }
    waiting_to_lock(thread).is_some()
}

// The thread of `process` owning the monitor `thread` is waiting for.
fn lock_owner<'p>(
    process: &'p ProcessSnapshot,
    thread: &ThreadSnapshot,
) -> Option<&'p ThreadSnapshot> {
    let lock = waiting_to_lock(thread)?;
    if let Some(tid) = lock.held_by {
        return process.find_thread(tid);
    }
    let address = lock.address.as_deref()?;
    process.threads.iter().find(|t| {
        t.locks()
            .any(|l| l.kind == LockKind::Locked && l.address.as_deref() == Some(address))
    })
}

/// Binder interface and method a thread is calling into or serving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinderCall {
    pub package_name: Option<String>,
    pub class_name: String,
    pub method_name: Option<String>,
}

impl Display for BinderCall {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if let Some(package) = &self.package_name {
            write!(f, "{package}.")?;
        }
        write!(f, "{}", self.class_name)?;
        if let Some(method) = &self.method_name {
            write!(f, ".{method}")?;
        }
        Ok(())
    }
}

fn is_method(frame: &JavaFrame, package: &str, class: &str, method: &str) -> bool {
    frame.package_name.as_deref() == Some(package)
        && frame.class_name == class
        && frame.method_name == method
}

// Strip the aidl `$Stub`/`$Stub$Proxy` classes, and turn the handwritten
// `FooNative`/`FooProxy` glue into the `IFoo` interface name.
pub fn fix_binder_class(class_name: &str) -> String {
    for suffix in ["$Stub$Proxy", "$Stub"] {
        if let Some(stripped) = class_name.strip_suffix(suffix) {
            return stripped.to_string();
        }
    }
    for suffix in HANDWRITTEN_BINDER_SUFFIXES {
        if class_name.len() <= suffix.len() + 2 {
            continue;
        }
        if let Some(stripped) = class_name.strip_suffix(suffix) {
            let mut chars = stripped.chars();
            let interface = chars.next() == Some('I')
                && chars.next().is_some_and(|c| c.is_ascii_uppercase());
            return if interface {
                stripped.to_string()
            } else {
                format!("I{stripped}")
            };
        }
    }
    class_name.to_string()
}

// Outgoing transaction: the topmost java frames are
// `BinderProxy.transactNative`, `BinderProxy.transact`, then the proxy glue.
pub fn outbound_binder(thread: &ThreadSnapshot) -> Option<BinderCall> {
    let top = thread
        .frames
        .iter()
        .position(|f| matches!(f, StackFrame::Java(_)))?;
    let mut frames = thread.frames[top..].iter().map(StackFrame::as_java);

    let native = frames.next()??;
    if !is_method(native, "android.os", "BinderProxy", "transactNative") {
        return None;
    }
    let transact = frames.next()??;
    if !is_method(transact, "android.os", "BinderProxy", "transact") {
        return None;
    }
    let glue = frames.next()??;
    Some(BinderCall {
        package_name: glue.package_name.clone(),
        class_name: fix_binder_class(&glue.class_name),
        method_name: Some(glue.method_name.clone()),
    })
}

// Incoming transaction: the bottom java frame is `Binder.execTransact`, above
// it the stub glue, above that the implementation (missing when inlined).
pub fn inbound_binder(thread: &ThreadSnapshot) -> Option<BinderCall> {
    let bottom = thread
        .frames
        .iter()
        .rposition(|f| matches!(f, StackFrame::Java(_)))?;
    let mut frames = thread.frames[..=bottom].iter().rev().map(StackFrame::as_java);

    let exec = frames.next()??;
    if !is_method(exec, "android.os", "Binder", "execTransact") {
        return None;
    }
    let glue = frames.next()??;
    let method_name = frames.next().flatten().map(|f| f.method_name.clone());
    Some(BinderCall {
        package_name: glue.package_name.clone(),
        class_name: fix_binder_class(&glue.class_name),
        method_name,
    })
}

/// What triage found out about one thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadTriage {
    pub tid: Option<u32>,
    pub name: String,
    /// Index of the thread in its process dump.
    pub position: usize,
    pub runnable: bool,
    pub blocked: bool,
    pub outbound_binder: Option<BinderCall>,
    pub inbound_binder: Option<BinderCall>,
    pub interesting: bool,
}

impl ThreadTriage {
    pub fn new(thread: &ThreadSnapshot, position: usize) -> Self {
        let mut triage = Self {
            tid: thread.tid,
            name: thread.name.clone(),
            position,
            runnable: thread.runnable,
            blocked: is_blocked(thread),
            outbound_binder: outbound_binder(thread),
            inbound_binder: inbound_binder(thread),
            interesting: false,
        };
        triage.interesting = triage.is_interesting(thread);
        triage
    }

    pub fn is_binder(&self) -> bool {
        self.outbound_binder.is_some() || self.inbound_binder.is_some()
    }

    // The stack dumping thread is boring; runnable and binder threads are not.
    fn is_interesting(&self, thread: &ThreadSnapshot) -> bool {
        if matches_java_stack(thread, "Signal Catcher", &[]) {
            return false;
        }
        self.runnable || self.is_binder()
    }

    fn rank(&self) -> u8 {
        if self.name == "main" {
            0
        } else if self.blocked {
            1
        } else if self.is_binder() {
            2
        } else if self.interesting {
            3
        } else {
            4
        }
    }
}

impl Display for ThreadTriage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "\"{}\" tid={}",
            self.name,
            self.tid.map(|t| t.to_string()).unwrap_or_else(|| "?".into())
        )?;
        if self.runnable {
            write!(f, " runnable")?;
        }
        if self.blocked {
            write!(f, " blocked")?;
        }
        if let Some(call) = &self.outbound_binder {
            write!(f, " binder-out {call}")?;
        }
        if let Some(call) = &self.inbound_binder {
            write!(f, " binder-in {call}")?;
        }
        Ok(())
    }
}

/// A process worth looking at, with its interesting threads only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessTriage {
    pub pid: u32,
    pub cmd_line: String,
    pub threads: Vec<ThreadTriage>,
}

// Order processes for reading: the ANR process first, `system_server`
// second, then by command line with native daemons (`/system/bin/...`) last.
// Threads go main, blocked, binder, other interesting, rest; by name within.
pub fn sort_processes(anr_pid: Option<u32>, processes: &mut Vec<ProcessTriage>) {
    processes.sort_by(|a, b| a.cmd_line.cmp(&b.cmd_line));
    processes.sort_by_key(|p| p.cmd_line.starts_with('/'));

    if let Some(i) = processes.iter().position(|p| p.cmd_line == "system_server") {
        let process = processes.remove(i);
        processes.insert(0, process);
    }
    if let Some(i) = processes.iter().position(|p| Some(p.pid) == anr_pid) {
        let process = processes.remove(i);
        processes.insert(0, process);
    }

    for process in processes.iter_mut() {
        process
            .threads
            .sort_by(|a, b| (a.rank(), &a.name).cmp(&(b.rank(), &b.name)));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedThread {
    pub pid: u32,
    pub tid: Option<u32>,
    pub name: String,
    pub waiting_on: String,
    pub owner: Option<(u32, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deadlock {
    pub pid: u32,
    /// Thread ids of the cycle in wait order.
    pub tids: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InspectionReport {
    pub anr_pid: Option<u32>,
    pub main_thread_blocked: bool,
    pub blocked_threads: Vec<BlockedThread>,
    pub deadlock: Option<Deadlock>,
    /// The ANR process and every process with an interesting thread, sorted
    /// by [`sort_processes`].
    pub interesting_processes: Vec<ProcessTriage>,
}

impl InspectionReport {
    pub fn interesting_pids(&self) -> Vec<u32> {
        self.interesting_processes.iter().map(|p| p.pid).collect()
    }
}

// Follow "waiting for a lock owned by" edges from the main thread of
// `process`. Returns the cycle when the chain comes back on itself.
pub fn detect_deadlock(process: &ProcessSnapshot) -> Option<Deadlock> {
    let mut thread = process.main_thread()?;
    let mut chain: Vec<u32> = Vec::new();

    loop {
        let tid = thread.tid?;
        if let Some(start) = chain.iter().position(|&t| t == tid) {
            return Some(Deadlock {
                pid: process.pid,
                tids: chain.split_off(start),
            });
        }
        chain.push(tid);
        thread = lock_owner(process, thread)?;
    }
}

pub fn inspect(anr: &Anr) -> InspectionReport {
    let mut report = InspectionReport {
        anr_pid: anr.pid,
        ..Default::default()
    };

    for process in &anr.vm_traces.processes {
        let is_anr_process = Some(process.pid) == anr.pid;
        let mut interesting_threads = Vec::new();

        for (position, thread) in process.threads.iter().enumerate() {
            let triage = ThreadTriage::new(thread, position);
            if triage.blocked {
                if thread.is_main() && is_anr_process {
                    report.main_thread_blocked = true;
                }
                report.blocked_threads.push(BlockedThread {
                    pid: process.pid,
                    tid: thread.tid,
                    name: thread.name.clone(),
                    waiting_on: waiting_to_lock(thread)
                        .map(|l| l.to_string())
                        .unwrap_or_default(),
                    owner: lock_owner(process, thread)
                        .map(|o| (o.tid.unwrap_or_default(), o.name.clone())),
                });
            }
            if triage.interesting {
                interesting_threads.push(triage);
            }
        }

        if is_anr_process || !interesting_threads.is_empty() {
            report.interesting_processes.push(ProcessTriage {
                pid: process.pid,
                cmd_line: process.cmd_line.clone().unwrap_or_default(),
                threads: interesting_threads,
            });
        }
    }
    sort_processes(anr.pid, &mut report.interesting_processes);

    if let Some(process) = anr.anr_process() {
        report.deadlock = detect_deadlock(process);
    } else {
        debug!(pid = ?anr.pid, "no thread dump for the ANR process");
    }
    report
}

impl Display for InspectionReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.anr_pid {
            Some(pid) => writeln!(f, "ANR pid {pid}")?,
            None => writeln!(f, "ANR pid unknown")?,
        }
        if self.main_thread_blocked {
            writeln!(f, "main thread is blocked")?;
        }
        for blocked in &self.blocked_threads {
            write!(
                f,
                "  {} \"{}\" tid={} {}",
                blocked.pid,
                blocked.name,
                blocked.tid.map(|t| t.to_string()).unwrap_or_else(|| "?".into()),
                blocked.waiting_on
            )?;
            if let Some((tid, name)) = &blocked.owner {
                write!(f, " -> owned by \"{name}\" tid={tid}")?;
            }
            writeln!(f)?;
        }
        if let Some(deadlock) = &self.deadlock {
            let tids: Vec<String> = deadlock.tids.iter().map(|t| t.to_string()).collect();
            writeln!(f, "DEADLOCK in {}: tids {}", deadlock.pid, tids.join(" -> "))?;
        }
        write!(f, "interesting processes: {:?}", self.interesting_pids())?;
        for process in &self.interesting_processes {
            write!(f, "\n  {} {}", process.pid, process.cmd_line)?;
            for thread in &process.threads {
                write!(f, "\n    {thread}")?;
            }
        }
        Ok(())
    }
}

fn write_thread(out: &mut String, thread: &ThreadSnapshot, flags: Option<&ThreadTriage>) {
    let _ = match flags {
        Some(triage) => writeln!(out, "  {thread} {triage}"),
        None => writeln!(out, "  {thread}"),
    };
    for frame in &thread.frames {
        let _ = writeln!(out, "  {}", frame.text());
        if let StackFrame::Java(java) = frame {
            for lock in &java.locks {
                let _ = writeln!(out, "      - {lock}");
            }
        }
    }
}

// Full triage page: the ANR, the main thread of the ANR process, the
// deadlock cycle, then the interesting processes. Every thread appears once,
// at its topmost position.
pub fn render_triage(anr: &Anr, report: &InspectionReport) -> String {
    let mut out = String::new();
    let mut visited: HashSet<(u32, usize)> = HashSet::new();
    let _ = writeln!(out, "{anr}");

    let anr_process = anr.anr_process();
    if let Some(process) = anr_process {
        if let Some(position) = process.threads.iter().position(|t| t.name == "main") {
            let _ = writeln!(out, "\n== main thread ==");
            write_thread(&mut out, &process.threads[position], None);
            visited.insert((process.pid, position));
        }
    }

    if let (Some(deadlock), Some(process)) = (&report.deadlock, anr_process) {
        let _ = writeln!(out, "\n== deadlocked process {} ==", deadlock.pid);
        for tid in &deadlock.tids {
            let Some(position) = process.threads.iter().position(|t| t.tid == Some(*tid)) else {
                continue;
            };
            if visited.insert((process.pid, position)) {
                write_thread(&mut out, &process.threads[position], None);
            }
        }
    }

    let mut header = false;
    for triage in &report.interesting_processes {
        let Some(process) = anr.vm_traces.find_process(triage.pid) else {
            continue;
        };
        let fresh: Vec<&ThreadTriage> = triage
            .threads
            .iter()
            .filter(|t| visited.insert((triage.pid, t.position)))
            .collect();
        if fresh.is_empty() {
            continue;
        }
        if !header {
            let _ = writeln!(out, "\n== interesting processes ==");
            header = true;
        }
        let _ = writeln!(out, "{} {}", triage.pid, triage.cmd_line);
        for thread in fresh {
            write_thread(&mut out, &process.threads[thread.position], Some(thread));
        }
    }
    out
}
