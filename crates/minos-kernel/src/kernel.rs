//! The kernel — single coordinating task owning all process state.
//!
//! Everything funnels through one `tokio::select!` loop: embedder requests
//! on the message channel, worker events on the event channel. Handlers
//! are synchronous; anything that could block (capability handlers,
//! channel sends into workers) is pushed onto a spawned task, so the loop
//! itself never stalls and event order is preserved.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::errors::{KernelError, KernelResult};
use crate::pipeline::{parse, Pipeline, StageSpec, StdoutRouting};
use crate::proc::{unix_millis, HistoryEntry, Pid, ProcSnapshot, ProcStatus, Process, ProcessTable};
use crate::programs::{register_defaults, Program, ProgramRegistry};
use crate::record::OutputRecord;
use crate::syscall::{CapabilityHandler, ExternalCall, ExternalReply, TimerCapability};
use crate::terminal::{TerminalCapability, TerminalNotice};
use crate::vfs::{MemoryVfs, VfsCapability};
use crate::worker::{spawn_worker, InitSpec, WorkerEvent, WorkerMsg};

/// Syscall deadline, measured in ticks of `KernelConfig::syscall_tick`.
pub const SYSCALL_TIMEOUT_TICKS: u32 = 30;

/// Exit code recorded for forcibly terminated processes.
pub const KILLED_EXIT_CODE: i32 = 143;

/// Tunables fixed at kernel construction.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Length of one syscall timing tick. The syscall deadline is
    /// `SYSCALL_TIMEOUT_TICKS` of these.
    pub syscall_tick: Duration,
    /// Default working directory for launches that don't name one.
    pub cwd: String,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            syscall_tick: Duration::from_millis(100),
            cwd: "/".to_string(),
        }
    }
}

/// A command that runs in the kernel's own context, with no isolation and
/// no syscall mediation. Registered by the embedder for trusted hooks.
pub type DirectLauncher = Arc<dyn Fn(&[String]) -> anyhow::Result<()> + Send + Sync>;

/// Out-of-band kernel announcements for an embedder.
#[derive(Debug, Clone)]
pub enum KernelNotice {
    /// A direct (non-isolated) process was terminated. There is no worker
    /// task to abort, so the embedder owns any actual cleanup.
    DirectTerminated { pid: Pid, name: String },
}

/// Embedder → kernel requests.
enum KernelMsg {
    Run {
        pipeline: Pipeline,
        stdin: Option<String>,
        cwd: Option<String>,
        sink: mpsc::UnboundedSender<OutputRecord>,
        exit: oneshot::Sender<i32>,
    },
    LaunchDirect {
        name: String,
        args: Vec<String>,
        reply: oneshot::Sender<KernelResult<Pid>>,
    },
    Terminate {
        pid: Pid,
        reply: oneshot::Sender<KernelResult<()>>,
    },
    List {
        reply: oneshot::Sender<Vec<ProcSnapshot>>,
    },
    History {
        reply: oneshot::Sender<Vec<HistoryEntry>>,
    },
}

/// Per-process pipeline continuation: where the stage's output goes and
/// what to run when it exits.
struct StageState {
    routing: StdoutRouting,
    /// Working directory the pipeline was launched with; shared by every
    /// stage and by redirect path resolution.
    cwd: String,
    /// Stages after this one, front first.
    remaining: Vec<StageSpec>,
    /// Buffered non-error output, one line per record.
    buffer: Vec<String>,
    sink: mpsc::UnboundedSender<OutputRecord>,
    exit: Option<oneshot::Sender<i32>>,
}

/// The operating environment: process table, program registry, capability
/// handlers, and the pipeline engine, all owned by one task.
pub struct Kernel {
    config: KernelConfig,
    table: ProcessTable,
    programs: ProgramRegistry,
    direct: HashMap<String, DirectLauncher>,
    capabilities: HashMap<String, Arc<dyn CapabilityHandler>>,
    stages: HashMap<Pid, StageState>,
    fs: Arc<MemoryVfs>,
    terminal: Arc<TerminalCapability>,
    notices: broadcast::Sender<KernelNotice>,
    external: broadcast::Sender<ExternalCall>,
    worker_tx: mpsc::Sender<WorkerEvent>,
    worker_rx: Option<mpsc::Receiver<WorkerEvent>>,
}

impl Kernel {
    pub fn new(config: KernelConfig) -> Self {
        let fs = Arc::new(MemoryVfs::new());
        let terminal = Arc::new(TerminalCapability::new());
        let mut capabilities: HashMap<String, Arc<dyn CapabilityHandler>> = HashMap::new();
        let vfs_cap: Arc<dyn CapabilityHandler> = Arc::new(VfsCapability::new(fs.clone()));
        capabilities.insert(vfs_cap.namespace().to_string(), vfs_cap);
        let term_cap: Arc<dyn CapabilityHandler> = terminal.clone();
        capabilities.insert(term_cap.namespace().to_string(), term_cap);
        let timer: Arc<dyn CapabilityHandler> = Arc::new(TimerCapability);
        capabilities.insert(timer.namespace().to_string(), timer);

        let mut programs = ProgramRegistry::new();
        register_defaults(&mut programs);

        let (notices, _) = broadcast::channel(64);
        let (external, _) = broadcast::channel(64);
        let (worker_tx, worker_rx) = mpsc::channel(256);
        Self {
            config,
            table: ProcessTable::new(),
            programs,
            direct: HashMap::new(),
            capabilities,
            stages: HashMap::new(),
            fs,
            terminal,
            notices,
            external,
            worker_tx,
            worker_rx: Some(worker_rx),
        }
    }

    /// The virtual filesystem all `vfs.*` syscalls operate on. Meant for
    /// seeding content before start and inspecting it after.
    pub fn fs(&self) -> Arc<MemoryVfs> {
        self.fs.clone()
    }

    /// Subscribe to terminal notices (`terminal.write` and friends).
    pub fn subscribe_terminal(&self) -> broadcast::Receiver<TerminalNotice> {
        self.terminal.subscribe()
    }

    /// Subscribe to kernel announcements.
    pub fn subscribe_notices(&self) -> broadcast::Receiver<KernelNotice> {
        self.notices.subscribe()
    }

    /// Subscribe to syscalls no kernel-side handler claims. An external
    /// collaborator answers via the call's reply slot; an unanswered call
    /// times out in the issuing context.
    pub fn subscribe_external(&self) -> broadcast::Receiver<ExternalCall> {
        self.external.subscribe()
    }

    /// Register an additional program, shadowing any default of the same
    /// name.
    pub fn register_program(&mut self, program: impl Program + 'static) {
        self.programs.register(program);
    }

    /// Register a capability handler for a syscall namespace.
    pub fn register_capability(&mut self, handler: Arc<dyn CapabilityHandler>) {
        self.capabilities
            .insert(handler.namespace().to_string(), handler);
    }

    /// Register a direct-launch command.
    pub fn register_direct(&mut self, name: impl Into<String>, launcher: DirectLauncher) {
        self.direct.insert(name.into(), launcher);
    }

    fn syscall_deadline(&self) -> Duration {
        self.config.syscall_tick * SYSCALL_TIMEOUT_TICKS
    }

    /// Spawn the kernel task and return the embedder handle.
    pub fn start(mut self) -> KernelHandle {
        let (tx, rx) = mpsc::channel(64);
        let worker_rx = self.worker_rx.take().unwrap_or_else(|| {
            // new() always fills the slot; start consumes self.
            unreachable!("kernel started twice")
        });
        tokio::spawn(self.run(rx, worker_rx));
        KernelHandle { tx }
    }

    async fn run(
        mut self,
        mut msgs: mpsc::Receiver<KernelMsg>,
        mut events: mpsc::Receiver<WorkerEvent>,
    ) {
        loop {
            tokio::select! {
                msg = msgs.recv() => match msg {
                    Some(msg) => self.handle_msg(msg),
                    // All handles dropped: workers keep their tx clones via
                    // self, so shut down explicitly.
                    None => break,
                },
                Some(event) = events.recv() => self.handle_event(event),
            }
        }
        debug!("kernel loop stopped");
    }

    fn handle_msg(&mut self, msg: KernelMsg) {
        match msg {
            KernelMsg::Run {
                pipeline,
                stdin,
                cwd,
                sink,
                exit,
            } => {
                let mut stages = pipeline.into_stages();
                if stages.is_empty() {
                    let _ = exit.send(0);
                    return;
                }
                let cwd = cwd.unwrap_or_else(|| self.config.cwd.clone());
                let first = stages.remove(0);
                self.start_stage(first, stdin, cwd, stages, sink, exit);
            }
            KernelMsg::LaunchDirect { name, args, reply } => {
                let _ = reply.send(self.launch_direct(name, args));
            }
            KernelMsg::Terminate { pid, reply } => {
                let _ = reply.send(self.terminate(pid));
            }
            KernelMsg::List { reply } => {
                let _ = reply.send(self.table.list());
            }
            KernelMsg::History { reply } => {
                let _ = reply.send(self.table.history());
            }
        }
    }

    fn handle_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Syscall {
                pid,
                id,
                name,
                params,
            } => self.dispatch_syscall(pid, id, name, params),
            WorkerEvent::Stdout(record) => self.route_record(record),
            WorkerEvent::Exit { pid, code, crashed } => self.finish_stage(pid, code, crashed),
        }
    }

    /// Launch one pipeline stage in a fresh execution context.
    fn start_stage(
        &mut self,
        spec: StageSpec,
        stdin: Option<String>,
        cwd: String,
        remaining: Vec<StageSpec>,
        sink: mpsc::UnboundedSender<OutputRecord>,
        exit: oneshot::Sender<i32>,
    ) {
        let pid = self.table.alloc_pid();
        let started = SystemTime::now();

        let Some(program) = self.programs.get(&spec.name) else {
            // Unknown commands still get a PID and a history entry, so the
            // failure is visible in the lifetime log.
            self.table.insert(Process {
                pid,
                name: spec.name.clone(),
                args: spec.args.clone(),
                status: ProcStatus::Running,
                cwd,
                worker: None,
                exit_code: None,
                started,
            });
            self.table.finish(pid, ProcStatus::Crashed, 1);
            let _ = sink.send(OutputRecord::error(
                pid,
                &spec.name,
                format!("{}: command not found", spec.name),
            ));
            let _ = exit.send(1);
            return;
        };

        let worker = spawn_worker(pid, self.worker_tx.clone(), self.syscall_deadline());
        let init = InitSpec {
            program,
            name: spec.name.clone(),
            args: spec.args.clone(),
            cwd: cwd.clone(),
            stdin,
        };
        let init_tx = worker.sender();
        tokio::spawn(async move {
            let _ = init_tx.send(WorkerMsg::Init(init)).await;
        });

        debug!(%pid, name = %spec.name, "stage launched");
        self.table.insert(Process {
            pid,
            name: spec.name.clone(),
            args: spec.args,
            status: ProcStatus::Running,
            cwd: cwd.clone(),
            worker: Some(worker),
            exit_code: None,
            started,
        });
        self.stages.insert(
            pid,
            StageState {
                routing: spec.stdout,
                cwd,
                remaining,
                buffer: Vec::new(),
                sink,
                exit: Some(exit),
            },
        );
    }

    /// Forward or buffer one stdout record per its stage's routing. Error
    /// records always reach the caller's sink, even mid-pipeline.
    fn route_record(&mut self, record: OutputRecord) {
        let Some(stage) = self.stages.get_mut(&record.pid) else {
            trace!(pid = %record.pid, "record for untracked process dropped");
            return;
        };
        if record.is_error {
            let _ = stage.sink.send(record);
            return;
        }
        match stage.routing {
            StdoutRouting::Terminal => {
                let _ = stage.sink.send(record);
            }
            StdoutRouting::Pipe | StdoutRouting::File { .. } => {
                stage.buffer.push(record.text);
            }
        }
    }

    /// Handle a stage exit: close its history entry, then continue the
    /// pipeline. A non-zero exit does not short-circuit; downstream stages
    /// still run with whatever output the failed stage produced.
    fn finish_stage(&mut self, pid: Pid, code: i32, crashed: bool) {
        let status = if crashed {
            ProcStatus::Crashed
        } else {
            ProcStatus::Terminated
        };
        if self.table.finish(pid, status, code).is_none() {
            // Already terminated via kill; the abort raced the exit.
            return;
        }
        let Some(mut stage) = self.stages.remove(&pid) else {
            return;
        };

        match stage.routing {
            StdoutRouting::Pipe if !stage.remaining.is_empty() => {
                let next = stage.remaining.remove(0);
                let stdin = Some(stage.buffer.join("\n"));
                if let Some(exit) = stage.exit.take() {
                    self.start_stage(next, stdin, stage.cwd, stage.remaining, stage.sink, exit);
                }
            }
            StdoutRouting::File { ref path, append } => {
                let code = match self.write_redirect(pid, path, append, &stage.cwd, &stage.buffer)
                {
                    Ok(()) => code,
                    Err(err) => {
                        let _ = stage.sink.send(OutputRecord::error(
                            pid,
                            "redirect",
                            format!("{}: {}", path, err),
                        ));
                        1
                    }
                };
                if let Some(exit) = stage.exit.take() {
                    let _ = exit.send(code);
                }
            }
            _ => {
                if let Some(exit) = stage.exit.take() {
                    let _ = exit.send(code);
                }
            }
        }
    }

    /// Write a stage's buffered output to its redirect target.
    fn write_redirect(
        &self,
        pid: Pid,
        path: &str,
        append: bool,
        cwd: &str,
        buffer: &[String],
    ) -> KernelResult<()> {
        let resolved = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("{}/{}", cwd.trim_end_matches('/'), path)
        };
        let mut content = buffer.join("\n");
        if !content.is_empty() {
            content.push('\n');
        }
        if append {
            // Keep appended output on its own line.
            if let Ok(existing) = self.fs.read_file(&resolved) {
                if !existing.is_empty() && !existing.ends_with('\n') {
                    content.insert(0, '\n');
                }
            }
        }
        trace!(%pid, path = %resolved, append, "redirect written");
        self.fs.write_file(&resolved, &content, append)
    }

    fn launch_direct(&mut self, name: String, args: Vec<String>) -> KernelResult<Pid> {
        let Some(launcher) = self.direct.get(&name).cloned() else {
            return Err(KernelError::NotFound(format!("command {:?}", name)));
        };
        let pid = self.table.alloc_pid();
        self.table.insert(Process {
            pid,
            name: name.clone(),
            args: args.clone(),
            status: ProcStatus::Running,
            cwd: self.config.cwd.clone(),
            worker: None,
            exit_code: None,
            started: SystemTime::now(),
        });
        // Direct commands run in the kernel's own context: the launcher is
        // a synchronous hook, and the process then idles as RUNNING until
        // terminated.
        if let Err(err) = launcher(&args) {
            warn!(%pid, name = %name, %err, "direct launch failed");
            self.table.finish(pid, ProcStatus::Crashed, 1);
            return Err(KernelError::Collaborator(format!("{}: {}", name, err)));
        }
        Ok(pid)
    }

    /// Forcibly stop a live process: `KILLED`, exit code 143, no output
    /// drain. Unknown or already-dead PIDs are `NotFound`, including a
    /// second terminate of the same PID.
    fn terminate(&mut self, pid: Pid) -> KernelResult<()> {
        let Some(process) = self.table.finish(pid, ProcStatus::Killed, KILLED_EXIT_CODE) else {
            return Err(KernelError::NotFound(format!("pid {}", pid)));
        };
        match &process.worker {
            Some(worker) => worker.abort(),
            None => {
                let _ = self.notices.send(KernelNotice::DirectTerminated {
                    pid,
                    name: process.name.clone(),
                });
            }
        }
        // Kill fails the whole pipeline; downstream stages never start.
        if let Some(mut stage) = self.stages.remove(&pid) {
            if let Some(exit) = stage.exit.take() {
                let _ = exit.send(KILLED_EXIT_CODE);
            }
        }
        debug!(%pid, name = %process.name, "terminated");
        Ok(())
    }

    /// Resolve one syscall. Process-table calls are served inline by the
    /// kernel itself; named capabilities run on a spawned task; anything
    /// else is broadcast for external collaborators.
    fn dispatch_syscall(&mut self, pid: Pid, id: u64, name: String, params: Value) {
        let Some(reply_tx) = self
            .table
            .get(pid)
            .and_then(|p| p.worker.as_ref())
            .map(|w| w.sender())
        else {
            trace!(%pid, call = %name, "syscall from untracked process dropped");
            return;
        };

        let result = match name.as_str() {
            "proc.list" => Some(
                serde_json::to_value(self.table.list())
                    .map_err(|e| KernelError::Collaborator(e.to_string())),
            ),
            "proc.history" => Some(Ok(Value::Array(
                self.table
                    .history()
                    .iter()
                    .map(|e| {
                        json!({
                            "pid": e.pid.0,
                            "name": e.name,
                            "status": e.status.to_string(),
                            "started": unix_millis(e.started),
                            "ended": e.ended.map(unix_millis),
                            "exitCode": e.exit_code,
                        })
                    })
                    .collect(),
            ))),
            "proc.kill" => {
                let target = params.get("pid").and_then(Value::as_u64).map(Pid);
                Some(match target {
                    Some(target) => self.terminate(target).map(|()| Value::Null),
                    None => Err(KernelError::InvalidSpec(
                        "proc.kill: missing pid".to_string(),
                    )),
                })
            }
            _ => None,
        };
        if let Some(result) = result {
            ExternalReply::new(id, reply_tx).resolve(result);
            return;
        }

        let (namespace, call) = name.split_once('.').unwrap_or((name.as_str(), ""));
        if let Some(handler) = self.capabilities.get(namespace).cloned() {
            let call = call.to_string();
            tokio::spawn(async move {
                let result = handler.handle(&call, params).await;
                let _ = reply_tx
                    .send(WorkerMsg::SyscallReply { id, result })
                    .await;
            });
            return;
        }

        let external = ExternalCall {
            pid,
            name: name.clone(),
            params,
            reply: ExternalReply::new(id, reply_tx),
        };
        if self.external.send(external).is_err() {
            trace!(%pid, call = %name, "no external collaborator; call will time out");
        }
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new(KernelConfig::default())
    }
}

/// Cloneable embedder handle to a started kernel.
#[derive(Clone)]
pub struct KernelHandle {
    tx: mpsc::Sender<KernelMsg>,
}

impl KernelHandle {
    fn stopped() -> KernelError {
        KernelError::Collaborator("kernel task stopped".to_string())
    }

    /// Launch a pipeline, streaming records into `sink`. Resolves to the
    /// receiver for the final exit code. A `None` cwd means the config
    /// default.
    pub async fn launch(
        &self,
        pipeline: Pipeline,
        stdin: Option<String>,
        cwd: Option<String>,
        sink: mpsc::UnboundedSender<OutputRecord>,
    ) -> KernelResult<oneshot::Receiver<i32>> {
        let (exit_tx, exit_rx) = oneshot::channel();
        self.tx
            .send(KernelMsg::Run {
                pipeline,
                stdin,
                cwd,
                sink,
                exit: exit_tx,
            })
            .await
            .map_err(|_| Self::stopped())?;
        Ok(exit_rx)
    }

    /// Launch a pipeline and wait for it to finish, collecting output.
    pub async fn run(
        &self,
        pipeline: Pipeline,
        stdin: Option<String>,
        cwd: Option<String>,
    ) -> KernelResult<(Vec<OutputRecord>, i32)> {
        let (sink, mut records_rx) = mpsc::unbounded_channel();
        let exit_rx = self.launch(pipeline, stdin, cwd, sink).await?;
        let code = exit_rx.await.map_err(|_| Self::stopped())?;
        // Every record is forwarded before the exit event fires.
        let mut records = Vec::new();
        while let Ok(record) = records_rx.try_recv() {
            records.push(record);
        }
        Ok((records, code))
    }

    /// Parse a command line and run it in the default working directory.
    pub async fn run_line(&self, line: &str) -> KernelResult<(Vec<OutputRecord>, i32)> {
        self.run(parse(line)?, None, None).await
    }

    /// Parse a command line and run it in `cwd`.
    pub async fn run_line_in(
        &self,
        line: &str,
        cwd: impl Into<String>,
    ) -> KernelResult<(Vec<OutputRecord>, i32)> {
        self.run(parse(line)?, None, Some(cwd.into())).await
    }

    /// Launch a registered direct command.
    pub async fn launch_direct(
        &self,
        name: impl Into<String>,
        args: Vec<String>,
    ) -> KernelResult<Pid> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(KernelMsg::LaunchDirect {
                name: name.into(),
                args,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Self::stopped())?;
        reply_rx.await.map_err(|_| Self::stopped())?
    }

    /// Forcibly terminate a live process.
    pub async fn terminate(&self, pid: Pid) -> KernelResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(KernelMsg::Terminate {
                pid,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Self::stopped())?;
        reply_rx.await.map_err(|_| Self::stopped())?
    }

    /// Snapshot of live processes.
    pub async fn list(&self) -> KernelResult<Vec<ProcSnapshot>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(KernelMsg::List { reply: reply_tx })
            .await
            .map_err(|_| Self::stopped())?;
        reply_rx.await.map_err(|_| Self::stopped())
    }

    /// Full process history.
    pub async fn history(&self) -> KernelResult<Vec<HistoryEntry>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(KernelMsg::History { reply: reply_tx })
            .await
            .map_err(|_| Self::stopped())?;
        reply_rx.await.map_err(|_| Self::stopped())
    }
}
