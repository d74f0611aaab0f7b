//! Execution contexts — the isolated place a process's command logic runs.
//!
//! A worker is a spawned task that never shares mutable state with the
//! kernel. It owns one process's program future, forwards stdout records
//! the moment they are produced, correlates syscall replies back to the
//! pending continuations, and reports exit through a single event channel.
//!
//! State machine: `Uninitialized → Initialized → Running → {Exited,
//! Crashed}`. Exactly one init message is accepted per context instance; a
//! duplicate is logged and ignored. A second invocation requires a new
//! context.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::errors::KernelResult;
use crate::proc::Pid;
use crate::programs::{Program, ProgramCtx};
use crate::record::{OutputRecord, RecordSink};
use crate::syscall::{reject_all_pending, PendingMap, SyscallHandle};

/// Default capacity for worker-side channels.
pub(crate) const WORKER_CHANNEL_CAPACITY: usize = 64;

/// Lifecycle state of an execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Uninitialized = 0,
    Initialized = 1,
    Running = 2,
    Exited = 3,
    Crashed = 4,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Uninitialized,
            1 => WorkerState::Initialized,
            2 => WorkerState::Running,
            3 => WorkerState::Exited,
            _ => WorkerState::Crashed,
        }
    }

    /// True once the context reached `Exited` or `Crashed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerState::Exited | WorkerState::Crashed)
    }
}

/// Shared, lock-free view of a context's state. The worker task is the
/// only writer; the syscall handle reads it to gate protocol misuse.
#[derive(Clone, Default)]
pub struct StateCell(Arc<AtomicU8>);

impl StateCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> WorkerState {
        WorkerState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub fn set(&self, state: WorkerState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }
}

/// Initialization payload for a context: the resolved program plus its
/// calling contract inputs.
pub struct InitSpec {
    pub program: Arc<dyn Program>,
    pub name: String,
    pub args: Vec<String>,
    pub cwd: String,
    pub stdin: Option<String>,
}

/// Kernel → worker messages.
pub enum WorkerMsg {
    /// Start executing. Accepted exactly once.
    Init(InitSpec),
    /// Correlated answer to an earlier syscall.
    SyscallReply {
        id: u64,
        result: KernelResult<Value>,
    },
}

/// Worker → kernel events.
#[derive(Debug)]
pub enum WorkerEvent {
    /// A capability request crossing the isolation boundary.
    Syscall {
        pid: Pid,
        id: u64,
        name: String,
        params: Value,
    },
    /// One stdout record, forwarded as produced.
    Stdout(OutputRecord),
    /// Terminal state reached. Always the context's final event.
    Exit { pid: Pid, code: i32, crashed: bool },
}

/// Kernel-side handle to a spawned context.
pub struct WorkerHandle {
    pub pid: Pid,
    tx: mpsc::Sender<WorkerMsg>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Sender for replies addressed to this context.
    pub(crate) fn sender(&self) -> mpsc::Sender<WorkerMsg> {
        self.tx.clone()
    }

    /// Deliver the one-time init message.
    pub async fn init(&self, spec: InitSpec) {
        let _ = self.tx.send(WorkerMsg::Init(spec)).await;
    }

    /// Forcible stop. No drain guarantee: records not yet forwarded are
    /// discarded and pending syscall continuations are dropped.
    pub fn abort(&self) {
        self.join.abort();
    }
}

/// Spawn a fresh execution context for `pid`. The context idles until its
/// init message arrives.
pub fn spawn_worker(
    pid: Pid,
    events: mpsc::Sender<WorkerEvent>,
    syscall_deadline: Duration,
) -> WorkerHandle {
    let (tx, inbox) = mpsc::channel(WORKER_CHANNEL_CAPACITY);
    let join = tokio::spawn(run(pid, inbox, events, syscall_deadline));
    WorkerHandle { pid, tx, join }
}

async fn run(
    pid: Pid,
    mut inbox: mpsc::Receiver<WorkerMsg>,
    events: mpsc::Sender<WorkerEvent>,
    syscall_deadline: Duration,
) {
    let state = StateCell::new();

    let spec = loop {
        match inbox.recv().await {
            Some(WorkerMsg::Init(spec)) => break spec,
            Some(WorkerMsg::SyscallReply { id, .. }) => {
                warn!(%pid, id, "syscall reply before init discarded");
            }
            None => return,
        }
    };
    state.set(WorkerState::Initialized);
    debug!(%pid, name = %spec.name, "context initialized");

    let InitSpec {
        program,
        name,
        args,
        cwd,
        stdin,
    } = spec;

    let pending: PendingMap = Arc::default();
    let (rec_tx, mut rec_rx) = mpsc::channel(WORKER_CHANNEL_CAPACITY);
    let syscalls = SyscallHandle::new(
        pid,
        state.clone(),
        pending.clone(),
        events.clone(),
        syscall_deadline,
    );
    let mut ctx = ProgramCtx {
        args,
        stdin,
        cwd,
        syscalls,
        out: RecordSink::new(pid, name.clone(), rec_tx),
    };

    // Running follows initialization synchronously.
    state.set(WorkerState::Running);

    let mut logic = program.run(&mut ctx);
    let outcome: anyhow::Result<i32> = loop {
        tokio::select! {
            res = &mut logic => break res,
            Some(rec) = rec_rx.recv() => {
                let _ = events.send(WorkerEvent::Stdout(rec)).await;
            }
            msg = inbox.recv() => match msg {
                Some(WorkerMsg::SyscallReply { id, result }) => {
                    let continuation = pending
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .remove(&id);
                    match continuation {
                        Some(tx) => {
                            let _ = tx.send(result);
                        }
                        None => trace!(%pid, id, "stale syscall reply dropped"),
                    }
                }
                Some(WorkerMsg::Init(_)) => warn!(%pid, "duplicate init ignored"),
                None => break Err(anyhow!("kernel channel closed")),
            },
        }
    };
    drop(logic);

    // Flush records the program queued right before finishing, so they
    // reach the kernel ahead of the exit event.
    while let Ok(rec) = rec_rx.try_recv() {
        let _ = events.send(WorkerEvent::Stdout(rec)).await;
    }

    let (code, crashed) = match outcome {
        Ok(code) => {
            state.set(WorkerState::Exited);
            (code, false)
        }
        Err(err) => {
            state.set(WorkerState::Crashed);
            let notice = OutputRecord::error(pid, &name, format!("{}: {}", name, err));
            let _ = events.send(WorkerEvent::Stdout(notice)).await;
            (1, true)
        }
    };

    // No leaked continuations past a terminal state.
    reject_all_pending(&pending);
    debug!(%pid, code, crashed, "context finished");
    let _ = events.send(WorkerEvent::Exit { pid, code, crashed }).await;
}
