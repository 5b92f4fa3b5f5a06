use chrono::NaiveDateTime;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LockKind {
    /// `- locked <addr>`
    Locked,
    /// `- waiting on <addr>`
    Waiting,
    /// `- sleeping on <addr>`
    Sleeping,
    /// `- waiting to lock <addr>`
    Blocked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockSnapshot {
    pub kind: LockKind,
    /// Hex address without the `0x` prefix. `None` for "an unknown object".
    pub address: Option<String>,
    pub package_name: Option<String>,
    pub class_name: Option<String>,
    /// Owner reported by `held by thread N`.
    pub held_by: Option<u32>,
}

impl LockSnapshot {
    pub fn qualified_class(&self) -> String {
        match (&self.package_name, &self.class_name) {
            (Some(p), Some(c)) => format!("{p}.{c}"),
            (None, Some(c)) => c.clone(),
            _ => String::from("?"),
        }
    }
}

impl fmt::Display for LockSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            LockKind::Locked => "locked",
            LockKind::Waiting => "waiting on",
            LockKind::Sleeping => "sleeping on",
            LockKind::Blocked => "waiting to lock",
        };
        match &self.address {
            Some(address) => write!(f, "{kind} <0x{address}> (a {})", self.qualified_class())?,
            None => write!(f, "{kind} an unknown object")?,
        }
        if let Some(tid) = self.held_by {
            write!(f, " held by thread {tid}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Java,
    Jni,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JavaFrame {
    pub text: String,
    pub package_name: Option<String>,
    pub class_name: String,
    pub method_name: String,
    pub source_file: Option<String>,
    pub source_line: Option<i32>,
    pub language: Language,
    pub locks: Vec<LockSnapshot>,
}

impl JavaFrame {
    // `package.Class.method`
    pub fn qualified_method(&self) -> String {
        match &self.package_name {
            Some(p) => format!("{p}.{}.{}", self.class_name, self.method_name),
            None => format!("{}.{}", self.class_name, self.method_name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackFrame {
    Java(JavaFrame),
    Native {
        text: String,
        library: String,
        symbol: String,
        offset: Option<u64>,
    },
    Kernel {
        text: String,
        syscall: String,
        offset0: u64,
        offset1: u64,
    },
    Other {
        text: String,
    },
}

impl StackFrame {
    pub fn text(&self) -> &str {
        match self {
            StackFrame::Java(f) => &f.text,
            StackFrame::Native { text, .. }
            | StackFrame::Kernel { text, .. }
            | StackFrame::Other { text } => text,
        }
    }

    pub fn as_java(&self) -> Option<&JavaFrame> {
        match self {
            StackFrame::Java(f) => Some(f),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadKind {
    Managed,
    Unmanaged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadSnapshot {
    pub kind: ThreadKind,
    pub name: String,
    pub daemon: Option<String>,
    pub priority: Option<i32>,
    pub tid: Option<u32>,
    pub sys_tid: Option<u32>,
    pub vm_state: Option<String>,
    pub attributes: Vec<String>,
    pub held_mutexes: Option<String>,
    pub runnable: bool,
    pub frames: Vec<StackFrame>,
}

impl ThreadSnapshot {
    pub fn new(kind: ThreadKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            daemon: None,
            priority: None,
            tid: None,
            sys_tid: None,
            vm_state: None,
            attributes: Vec::new(),
            held_mutexes: None,
            runnable: false,
            frames: Vec::new(),
        }
    }

    pub fn java_frames(&self) -> impl Iterator<Item = &JavaFrame> {
        self.frames.iter().filter_map(StackFrame::as_java)
    }

    // Every lock line of every java frame, in stack order.
    pub fn locks(&self) -> impl Iterator<Item = &LockSnapshot> {
        self.java_frames().flat_map(|f| f.locks.iter())
    }

    pub fn is_main(&self) -> bool {
        self.tid == Some(1) || self.name == "main"
    }
}

impl fmt::Display for ThreadSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.name)?;
        if let Some(tid) = self.tid {
            write!(f, " tid={tid}")?;
        }
        if let Some(sys_tid) = self.sys_tid {
            write!(f, " sysTid={sys_tid}")?;
        }
        if let Some(state) = &self.vm_state {
            write!(f, " {state}")?;
        }
        Ok(())
    }
}

/// Full thread dump of one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSnapshot {
    pub pid: u32,
    pub date: Option<NaiveDateTime>,
    pub cmd_line: Option<String>,
    pub build_fingerprint: Option<String>,
    pub abi: Option<String>,
    pub threads: Vec<ThreadSnapshot>,
}

impl ProcessSnapshot {
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            date: None,
            cmd_line: None,
            build_fingerprint: None,
            abi: None,
            threads: Vec::new(),
        }
    }

    pub fn main_thread(&self) -> Option<&ThreadSnapshot> {
        self.threads.iter().find(|t| t.is_main())
    }

    pub fn find_thread(&self, tid: u32) -> Option<&ThreadSnapshot> {
        self.threads.iter().find(|t| t.tid == Some(tid))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VmTraces {
    pub processes: Vec<ProcessSnapshot>,
}

impl VmTraces {
    pub fn find_process(&self, pid: u32) -> Option<&ProcessSnapshot> {
        self.processes.iter().find(|p| p.pid == pid)
    }
}
