//! minos-kernel: a miniature multiprocess operating environment in one
//! host process.
//!
//! This crate provides:
//!
//! - **Kernel**: One coordinating task owning the process table, pipeline
//!   engine, and syscall dispatch
//! - **Workers**: Isolated execution contexts, one task per process,
//!   talking to the kernel only through channels
//! - **Syscalls**: Request/response bridge with call-id correlation and a
//!   30-tick deadline
//! - **Pipelines**: `|` chaining plus `>` / `>>` redirection into the
//!   virtual filesystem
//! - **Programs**: The closed registry of runnable commands
//! - **VFS**: In-memory filesystem behind the `vfs.*` capability
//! - **Terminal**: Fire-and-forget notices for an embedding UI

pub mod errors;
pub mod kernel;
pub mod pipeline;
pub mod proc;
pub mod programs;
pub mod record;
pub mod syscall;
pub mod terminal;
pub mod vfs;
pub mod worker;

pub use errors::{KernelError, KernelResult};
pub use kernel::{
    DirectLauncher, Kernel, KernelConfig, KernelHandle, KernelNotice, KILLED_EXIT_CODE,
    SYSCALL_TIMEOUT_TICKS,
};
pub use pipeline::{parse, Pipeline, StageSpec, StdoutRouting};
pub use proc::{HistoryEntry, Pid, ProcSnapshot, ProcStatus};
pub use programs::{Program, ProgramCtx, ProgramRegistry};
pub use record::OutputRecord;
pub use syscall::{CapabilityHandler, ExternalCall, SyscallHandle};
pub use terminal::TerminalNotice;
pub use vfs::MemoryVfs;
