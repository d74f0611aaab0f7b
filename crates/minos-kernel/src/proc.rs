//! Process identity, lifecycle state, and the process table.
//!
//! The table is owned exclusively by the kernel task; nothing else mutates
//! it. PIDs are monotonically increasing for the kernel's lifetime and are
//! never reused, so the append-only history log can be keyed by PID.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::worker::WorkerHandle;

/// Process identifier, unique for a kernel lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Pid(pub u64);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProcStatus {
    /// Live and producing output.
    Running,
    /// Exited normally (any exit code).
    Terminated,
    /// Forcibly stopped via `terminate`/`proc.kill`.
    Killed,
    /// Runtime failure escaped the program logic.
    Crashed,
}

impl ProcStatus {
    /// True for statuses that end a process's life.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProcStatus::Running)
    }
}

impl fmt::Display for ProcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcStatus::Running => write!(f, "RUNNING"),
            ProcStatus::Terminated => write!(f, "TERMINATED"),
            ProcStatus::Killed => write!(f, "KILLED"),
            ProcStatus::Crashed => write!(f, "CRASHED"),
        }
    }
}

/// A live process tracked by the kernel.
pub struct Process {
    /// Process identifier.
    pub pid: Pid,
    /// Command name.
    pub name: String,
    /// Argument list at launch.
    pub args: Vec<String>,
    /// Current status. `Running` while in the live table.
    pub status: ProcStatus,
    /// Working directory at launch.
    pub cwd: String,
    /// Owning execution context. `None` for processes running directly in
    /// the orchestrator's own context (no isolation).
    pub worker: Option<WorkerHandle>,
    /// Exit code, set only once terminal.
    pub exit_code: Option<i32>,
    /// Launch time.
    pub started: SystemTime,
}

/// Permanent record of a process's lifecycle outcome.
///
/// Same identity as a `Process` but outlives it: mutated in place until the
/// process reaches a terminal status, then frozen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub pid: Pid,
    pub name: String,
    pub status: ProcStatus,
    pub started: SystemTime,
    pub ended: Option<SystemTime>,
    pub exit_code: Option<i32>,
}

/// Snapshot row returned by `list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcSnapshot {
    pub pid: Pid,
    pub name: String,
    pub status: ProcStatus,
}

/// The kernel's authoritative map of live processes plus the append-only
/// lifetime history log.
pub struct ProcessTable {
    next_pid: u64,
    /// Live processes in insertion order. Small enough that linear lookup
    /// beats a map plus a separate order index.
    live: Vec<Process>,
    history: Vec<HistoryEntry>,
}

impl ProcessTable {
    /// Create an empty table. The first allocated PID is 1.
    pub fn new() -> Self {
        Self {
            next_pid: 1,
            live: Vec::new(),
            history: Vec::new(),
        }
    }

    /// Allocate the next PID. PIDs are never reused.
    pub fn alloc_pid(&mut self) -> Pid {
        let pid = Pid(self.next_pid);
        self.next_pid += 1;
        pid
    }

    /// Insert a freshly launched process and open its history entry.
    pub fn insert(&mut self, process: Process) {
        self.history.push(HistoryEntry {
            pid: process.pid,
            name: process.name.clone(),
            status: ProcStatus::Running,
            started: process.started,
            ended: None,
            exit_code: None,
        });
        self.live.push(process);
    }

    /// Look up a live process.
    pub fn get(&self, pid: Pid) -> Option<&Process> {
        self.live.iter().find(|p| p.pid == pid)
    }

    /// Remove a live process, returning it.
    pub fn remove(&mut self, pid: Pid) -> Option<Process> {
        let idx = self.live.iter().position(|p| p.pid == pid)?;
        Some(self.live.remove(idx))
    }

    /// Transition a process to a terminal status: remove it from the live
    /// table and freeze its history entry with end time and exit code.
    ///
    /// Returns the removed process, or `None` if the PID was not live.
    pub fn finish(&mut self, pid: Pid, status: ProcStatus, exit_code: i32) -> Option<Process> {
        debug_assert!(status.is_terminal());
        let mut process = self.remove(pid)?;
        process.status = status;
        process.exit_code = Some(exit_code);
        if let Some(entry) = self.history.iter_mut().find(|e| e.pid == pid) {
            entry.status = status;
            entry.ended = Some(SystemTime::now());
            entry.exit_code = Some(exit_code);
        }
        Some(process)
    }

    /// Snapshot of live processes only, oldest first.
    pub fn list(&self) -> Vec<ProcSnapshot> {
        self.live
            .iter()
            .map(|p| ProcSnapshot {
                pid: p.pid,
                name: p.name.clone(),
                status: p.status,
            })
            .collect()
    }

    /// Full history log, insertion order, no eviction.
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.history.clone()
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Milliseconds since the Unix epoch, for history entries crossing the
/// syscall boundary as JSON.
pub fn unix_millis(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
