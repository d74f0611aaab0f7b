//! Command programs — the pluggable leaf logic the kernel schedules.
//!
//! Every command is a `Program`: pure logic behind a fixed calling
//! contract. A program receives its args, optional stdin, the working
//! directory, a syscall handle, and a record sink; it touches the world
//! only through syscalls. Programs are looked up in a closed registry,
//! never resolved from freeform strings.

mod cat;
mod clear;
mod echo;
mod grep;
mod history;
mod kill;
mod ls;
mod mkdir;
mod prog_sleep;
mod ps;
mod pwd;
mod rm;
mod touch;
mod wc;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::record::RecordSink;
use crate::syscall::SyscallHandle;

/// Calling contract inputs for one program invocation.
pub struct ProgramCtx {
    /// Raw argument list (flags not yet separated).
    pub args: Vec<String>,
    /// Piped stdin from the previous stage, if any.
    pub stdin: Option<String>,
    /// Working directory at launch.
    pub cwd: String,
    /// Bridge for capability requests.
    pub syscalls: SyscallHandle,
    /// Stdout channel.
    pub out: RecordSink,
}

impl ProgramCtx {
    /// True if `-x` (possibly combined, `-xy`) or `--long` appears in args.
    pub fn flag(&self, short: char, long: &str) -> bool {
        self.args.iter().any(|a| {
            if let Some(rest) = a.strip_prefix("--") {
                rest == long
            } else if let Some(rest) = a.strip_prefix('-') {
                !rest.is_empty() && rest.chars().all(|c| c.is_ascii_alphanumeric()) && rest.contains(short)
            } else {
                false
            }
        })
    }

    /// Arguments that are not flags, in order.
    pub fn positional(&self) -> Vec<&str> {
        self.args
            .iter()
            .filter(|a| !a.starts_with('-') || a.as_str() == "-")
            .map(|a| a.as_str())
            .collect()
    }

    /// Resolve a path against the working directory.
    pub fn resolve(&self, path: &str) -> String {
        if path.starts_with('/') {
            path.to_string()
        } else {
            format!("{}/{}", self.cwd.trim_end_matches('/'), path)
        }
    }

    /// Take stdin, consuming it.
    pub fn take_stdin(&mut self) -> Option<String> {
        self.stdin.take()
    }
}

/// A command program.
///
/// `run` is driven to completion by an execution context. Returning `Ok`
/// ends the process with that exit code; returning `Err` is an uncaught
/// failure, converted to a `Crashed` terminal state at the context
/// boundary.
#[async_trait]
pub trait Program: Send + Sync {
    /// The program's name (used for registry lookup).
    fn name(&self) -> &'static str;

    /// Execute the program.
    async fn run(&self, ctx: &mut ProgramCtx) -> anyhow::Result<i32>;
}

/// Closed dispatch table: command name → program.
pub struct ProgramRegistry {
    programs: HashMap<String, Arc<dyn Program>>,
}

impl ProgramRegistry {
    pub fn new() -> Self {
        Self {
            programs: HashMap::new(),
        }
    }

    /// Register a program under its own name.
    pub fn register(&mut self, program: impl Program + 'static) {
        self.programs
            .insert(program.name().to_string(), Arc::new(program));
    }

    /// Look up a program by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Program>> {
        self.programs.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.programs.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.programs.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ProgramRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Register the stock program set.
pub fn register_defaults(registry: &mut ProgramRegistry) {
    registry.register(cat::Cat);
    registry.register(clear::Clear);
    registry.register(echo::Echo);
    registry.register(grep::Grep);
    registry.register(history::History);
    registry.register(kill::Kill);
    registry.register(ls::Ls);
    registry.register(mkdir::Mkdir);
    registry.register(prog_sleep::Sleep);
    registry.register(ps::Ps);
    registry.register(pwd::Pwd);
    registry.register(rm::Rm);
    registry.register(touch::Touch);
    registry.register(wc::Wc);
}
