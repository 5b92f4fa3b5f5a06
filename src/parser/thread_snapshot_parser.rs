use lazy_static::lazy_static;
use regex::{Captures, Regex};
use tracing::debug;

use super::whole_line;
use crate::error::CursorError;
use crate::models::vm_traces::{
    JavaFrame, Language, LockKind, LockSnapshot, StackFrame, ThreadKind, ThreadSnapshot,
};
use crate::utils::lines::LineCursor;

const LOCK_OBJECT: &str = r"<0x([0-9a-fA-F]{1,16})> \(a (?:(.+)\.)?([^.]+)\)";

lazy_static! {
    pub static ref BEGIN_THREAD: Regex = whole_line(r#"".*"#);
    static ref BEGIN_UNMANAGED_THREAD: Regex = whole_line(r#""(.*)" sysTid=(\d+)(.*)"#);
    static ref BEGIN_MANAGED_THREAD: Regex =
        whole_line(r#""(.*)" (.*) ?prio=(\d+)\s+tid=(\d+)\s*(.*)"#);
    static ref BEGIN_NOT_ATTACHED_THREAD: Regex =
        whole_line(r#""(.*)" (.*) ?prio=(\d+)\s+(\(not attached\))"#);

    static ref ATTR: Regex = whole_line(r"  \| (.*)");
    static ref HELD_MUTEXES: Regex = whole_line(r"  \| (held mutexes=\s*(.*))");
    static ref SYS_TID_ATTR: Regex = whole_line(r"  \| sysTid=(\d+) .*");
    static ref STATE_RUNNABLE_ATTR: Regex = whole_line(r"  \| state=R .*");

    static ref NATIVE: Regex =
        whole_line(r"  (?:native: )?#\d+ \S+ [0-9a-fA-F]+\s+(.*)\s+\((.*)\+(\d+)\)");
    static ref NATIVE_NO_LOC: Regex =
        whole_line(r"  (?:native: )?#\d+ \S+ [0-9a-fA-F]+\s+(.*)\s*\(?(.*)\)?");
    static ref KERNEL: Regex =
        whole_line(r"  kernel: (.*)\+0x([0-9a-fA-F]+)/0x([0-9a-fA-F]+)");
    static ref KERNEL_UNKNOWN: Regex =
        whole_line(r"  kernel: \(couldn't read /proc/self/task/\d+/stack\)");
    static ref JAVA: Regex = whole_line(r"  at (?:(.+)\.)?([^.]+)\.([^.]+)\((.*):([\d-]+)\)");
    static ref JNI: Regex = whole_line(r"  at (?:(.+)\.)?([^.]+)\.([^.]+)\(Native method\)");
    static ref NO_MANAGED_STACK_FRAME: Regex = whole_line(r"  (\(no managed stack frames\))");

    static ref LOCKED: Regex = whole_line(&format!(r"  - locked {LOCK_OBJECT}"));
    static ref WAITING_ON: Regex = whole_line(&format!(r"  - waiting on {LOCK_OBJECT}"));
    static ref SLEEPING_ON: Regex = whole_line(&format!(r"  - sleeping on {LOCK_OBJECT}"));
    static ref WAITING_TO_LOCK_HELD: Regex =
        whole_line(&format!(r"  - waiting to lock {LOCK_OBJECT} held by thread (\d+)"));
    static ref WAITING_TO_LOCK: Regex = whole_line(&format!(r"  - waiting to lock {LOCK_OBJECT}"));
    static ref WAITING_TO_LOCK_UNKNOWN: Regex = whole_line(r"  - waiting to lock an unknown object");

    static ref END_PROCESS: Regex = whole_line(r"----- end \d+ -----");
}

/// Parses one thread of a VM trace dump.
#[derive(Debug, Default)]
pub struct ThreadSnapshotParser;

impl ThreadSnapshotParser {
    pub fn new() -> Self {
        Self
    }

    // Read a thread block up to and including its terminating blank line.
    // A following thread header or process end marker also ends the block
    // and is left unread. Returns `Ok(None)` when the first line is not a
    // thread header; the malformed block is skipped.
    pub fn parse(
        &mut self,
        lines: &mut LineCursor,
    ) -> Result<Option<ThreadSnapshot>, CursorError> {
        if !lines.has_next() {
            return Ok(None);
        }
        let header = lines.next()?;
        let Some(mut thread) = parse_header(&header.text) else {
            debug!(line = header.line_number, "unrecognised thread header");
            self.skip_block(lines)?;
            return Ok(None);
        };

        // Attributes
        while lines.has_next() {
            let text = &lines.next()?.text;
            if let Some(caps) = HELD_MUTEXES.captures(text) {
                thread.attributes.push(caps[1].to_string());
                thread.held_mutexes = Some(caps[2].to_string());
            } else if let Some(caps) = ATTR.captures(text) {
                thread.attributes.push(caps[1].to_string());
                if let Some(caps) = SYS_TID_ATTR.captures(text) {
                    thread.sys_tid = caps[1].parse().ok();
                }
                if STATE_RUNNABLE_ATTR.is_match(text) {
                    thread.runnable = true;
                }
            } else {
                lines.rewind()?;
                break;
            }
        }

        // Stack
        let mut last_java: Option<usize> = None;
        while lines.has_next() {
            let line = lines.next()?;
            let text = line.text.as_str();

            if let Some(lock) = parse_lock(text) {
                match last_java.and_then(|i| thread.frames.get_mut(i)) {
                    Some(StackFrame::Java(frame)) => frame.locks.push(lock),
                    _ => debug!(line = line.line_number, "lock without a java frame"),
                }
                continue;
            }
            if text.trim().is_empty() {
                break;
            }
            if BEGIN_THREAD.is_match(text) || END_PROCESS.is_match(text) {
                lines.rewind()?;
                break;
            }

            let frame = parse_frame(text);
            last_java = matches!(frame, StackFrame::Java(_)).then_some(thread.frames.len());
            thread.frames.push(frame);
        }

        Ok(Some(thread))
    }

    fn skip_block(&mut self, lines: &mut LineCursor) -> Result<(), CursorError> {
        while lines.has_next() {
            let text = &lines.next()?.text;
            if text.trim().is_empty() {
                break;
            }
            if BEGIN_THREAD.is_match(text) || END_PROCESS.is_match(text) {
                lines.rewind()?;
                break;
            }
        }
        Ok(())
    }
}

fn parse_header(text: &str) -> Option<ThreadSnapshot> {
    if let Some(caps) = BEGIN_UNMANAGED_THREAD.captures(text) {
        let mut thread = ThreadSnapshot::new(ThreadKind::Unmanaged, &caps[1]);
        thread.sys_tid = caps[2].parse().ok();
        Some(thread)
    } else if let Some(caps) = BEGIN_MANAGED_THREAD.captures(text) {
        let mut thread = ThreadSnapshot::new(ThreadKind::Managed, &caps[1]);
        thread.daemon = non_empty(&caps, 2);
        thread.priority = caps[3].parse().ok();
        thread.tid = caps[4].parse().ok();
        thread.vm_state = non_empty(&caps, 5);
        Some(thread)
    } else if let Some(caps) = BEGIN_NOT_ATTACHED_THREAD.captures(text) {
        let mut thread = ThreadSnapshot::new(ThreadKind::Managed, &caps[1]);
        thread.daemon = non_empty(&caps, 2);
        thread.priority = caps[3].parse().ok();
        thread.vm_state = non_empty(&caps, 4);
        Some(thread)
    } else {
        None
    }
}

fn parse_frame(text: &str) -> StackFrame {
    if let Some(caps) = NATIVE.captures(text) {
        StackFrame::Native {
            text: text.to_string(),
            library: caps[1].trim().to_string(),
            symbol: caps[2].to_string(),
            offset: caps[3].parse().ok(),
        }
    } else if let Some(caps) = NATIVE_NO_LOC.captures(text) {
        StackFrame::Native {
            text: text.to_string(),
            library: caps[1].trim().to_string(),
            symbol: caps[2].to_string(),
            offset: None,
        }
    } else if let Some(caps) = KERNEL.captures(text) {
        StackFrame::Kernel {
            text: text.to_string(),
            syscall: caps[1].to_string(),
            offset0: u64::from_str_radix(&caps[2], 16).unwrap_or_default(),
            offset1: u64::from_str_radix(&caps[3], 16).unwrap_or_default(),
        }
    } else if let Some(caps) = JAVA.captures(text) {
        StackFrame::Java(java_frame(text, &caps, Language::Java))
    } else if let Some(caps) = JNI.captures(text) {
        StackFrame::Java(java_frame(text, &caps, Language::Jni))
    } else if let Some(caps) = NO_MANAGED_STACK_FRAME.captures(text) {
        StackFrame::Other {
            text: caps[1].to_string(),
        }
    } else {
        if !KERNEL_UNKNOWN.is_match(text) {
            debug!(text, "unrecognised stack frame");
        }
        StackFrame::Other {
            text: text.to_string(),
        }
    }
}

fn java_frame(text: &str, caps: &Captures, language: Language) -> JavaFrame {
    let (source_file, source_line) = match language {
        Language::Java => (
            Some(caps[4].to_string()),
            caps.get(5).and_then(|m| m.as_str().parse().ok()),
        ),
        Language::Jni => (None, None),
    };
    JavaFrame {
        text: text.to_string(),
        package_name: caps.get(1).map(|m| m.as_str().to_string()),
        class_name: caps[2].to_string(),
        method_name: caps[3].to_string(),
        source_file,
        source_line,
        language,
        locks: Vec::new(),
    }
}

fn parse_lock(text: &str) -> Option<LockSnapshot> {
    let (kind, caps) = if let Some(caps) = LOCKED.captures(text) {
        (LockKind::Locked, caps)
    } else if let Some(caps) = WAITING_ON.captures(text) {
        (LockKind::Waiting, caps)
    } else if let Some(caps) = SLEEPING_ON.captures(text) {
        (LockKind::Sleeping, caps)
    } else if let Some(caps) = WAITING_TO_LOCK_HELD.captures(text) {
        (LockKind::Blocked, caps)
    } else if let Some(caps) = WAITING_TO_LOCK.captures(text) {
        (LockKind::Blocked, caps)
    } else if WAITING_TO_LOCK_UNKNOWN.is_match(text) {
        return Some(LockSnapshot {
            kind: LockKind::Blocked,
            address: None,
            package_name: None,
            class_name: None,
            held_by: None,
        });
    } else {
        return None;
    };

    Some(LockSnapshot {
        kind,
        address: Some(caps[1].to_string()),
        package_name: caps.get(2).map(|m| m.as_str().to_string()),
        class_name: Some(caps[3].to_string()),
        held_by: caps.get(4).and_then(|m| m.as_str().parse().ok()),
    })
}

fn non_empty(caps: &Captures, group: usize) -> Option<String> {
    caps.get(group)
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::lines::Line;

    const MAIN_THREAD: &str = r#""main" prio=5 tid=1 Blocked
  | group="main" sCount=1 dsCount=0 obj=0x73a3f2a0 self=0x7f8e4a2a00
  | sysTid=1234 nice=-10 cgrp=default sched=0/0 handle=0x7f92f1ba98
  | held mutexes=
  at com.foo.Worker.sync(Worker.java:42)
  - waiting to lock <0x0a1b2c3d> (a java.lang.Object) held by thread 12
  - locked <0x00ffee11> (a com.foo.Worker)
  at com.foo.MainActivity.onClick(MainActivity.java:-2)
  at android.os.MessageQueue.nativePollOnce(Native method)
  native: #00 pc 000000000006b6d8  /system/lib64/libc.so (__epoll_pwait+8)
  kernel: __switch_to+0x70/0x7c

"next" prio=5 tid=2 Native"#;

    fn parse(text: &str) -> (Option<ThreadSnapshot>, usize) {
        let lines = Line::from_text(text);
        let mut cursor = LineCursor::new(&lines);
        let thread = ThreadSnapshotParser::new().parse(&mut cursor).unwrap();
        (thread, cursor.position())
    }

    #[test]
    fn test_parse_managed_thread() {
        let (thread, pos) = parse(MAIN_THREAD);
        let thread = thread.unwrap();

        // stops after the blank line
        assert_eq!(pos, 12);
        assert_eq!(thread.kind, ThreadKind::Managed);
        assert_eq!(thread.name, "main");
        assert_eq!(thread.priority, Some(5));
        assert_eq!(thread.tid, Some(1));
        assert_eq!(thread.sys_tid, Some(1234));
        assert_eq!(thread.vm_state.as_deref(), Some("Blocked"));
        assert_eq!(thread.attributes.len(), 3);
        assert_eq!(thread.held_mutexes.as_deref(), Some(""));
        assert!(thread.is_main());
        assert_eq!(thread.frames.len(), 5);

        let java: Vec<_> = thread.java_frames().collect();
        assert_eq!(java.len(), 3);
        assert_eq!(java[0].qualified_method(), "com.foo.Worker.sync");
        assert_eq!(java[0].source_file.as_deref(), Some("Worker.java"));
        assert_eq!(java[0].source_line, Some(42));
        assert_eq!(java[1].source_line, Some(-2));
        assert_eq!(java[2].language, Language::Jni);

        let locks = &java[0].locks;
        assert_eq!(locks.len(), 2);
        assert_eq!(locks[0].kind, LockKind::Blocked);
        assert_eq!(locks[0].address.as_deref(), Some("0a1b2c3d"));
        assert_eq!(locks[0].held_by, Some(12));
        assert_eq!(locks[1].kind, LockKind::Locked);
        assert_eq!(locks[1].qualified_class(), "com.foo.Worker");

        match &thread.frames[3] {
            StackFrame::Native { symbol, offset, .. } => {
                assert_eq!(symbol, "__epoll_pwait");
                assert_eq!(*offset, Some(8));
            }
            other => panic!("expected native frame, got {other:?}"),
        }
        match &thread.frames[4] {
            StackFrame::Kernel { syscall, offset0, offset1, .. } => {
                assert_eq!(syscall, "__switch_to");
                assert_eq!(*offset0, 0x70);
                assert_eq!(*offset1, 0x7c);
            }
            other => panic!("expected kernel frame, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_unmanaged_thread() {
        let (thread, _) = parse("\"Signal Catcher\" sysTid=1240\n  #00 pc 0001 /system/lib/libc.so (read+4)\n");
        let thread = thread.unwrap();
        assert_eq!(thread.kind, ThreadKind::Unmanaged);
        assert_eq!(thread.sys_tid, Some(1240));
        assert_eq!(thread.tid, None);
    }

    #[test]
    fn test_not_attached_thread() {
        let (thread, _) = parse("\"Binder\" daemon prio=5 (not attached)\n");
        let thread = thread.unwrap();
        assert_eq!(thread.vm_state.as_deref(), Some("(not attached)"));
        assert_eq!(thread.tid, None);
    }

    #[test]
    fn test_end_marker_without_blank_line() {
        let (thread, pos) = parse(
            "\"main\" prio=5 tid=1 Native\n  at com.foo.A.b(A.java:1)\n----- end 1234 -----",
        );
        assert_eq!(thread.unwrap().frames.len(), 1);
        assert_eq!(pos, 2);
    }

    #[test]
    fn test_bad_header_skips_block() {
        let (thread, pos) = parse("garbage\n  at com.foo.A.b(A.java:1)\n\n\"main\" prio=5 tid=1 Native");
        assert!(thread.is_none());
        assert_eq!(pos, 3);
    }
}
