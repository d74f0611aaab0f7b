//! Pipeline specs and the boundary text syntax.
//!
//! The shell/UI owns the syntax, but its output is this module's input
//! contract: stages separated by `|`, an optional trailing `> path` or
//! `>> path` redirection, whitespace-delimited quote-aware tokens.

mod lexer;
mod parser;

pub use lexer::{tokenize, Token};
pub use parser::parse;

use crate::errors::{KernelError, KernelResult};

/// Where a stage's stdout goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StdoutRouting {
    /// Forward each record to the caller's sink immediately.
    Terminal,
    /// Buffer and feed the next stage's stdin.
    Pipe,
    /// Buffer and write to a virtual file at the end of the stage.
    File { path: String, append: bool },
}

/// One command invocation within a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSpec {
    pub name: String,
    pub args: Vec<String>,
    pub stdout: StdoutRouting,
}

impl StageSpec {
    pub fn new(name: impl Into<String>, args: Vec<String>, stdout: StdoutRouting) -> Self {
        Self {
            name: name.into(),
            args,
            stdout,
        }
    }
}

/// An ordered sequence of stages chained stdout → stdin.
///
/// Validated at construction, not just in the parser: every stage except
/// the last must route to `Pipe`, and command names are checked against a
/// closed character set. Callers building `Pipeline` values directly get
/// the same guarantees as parsed ones.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Pipeline {
    stages: Vec<StageSpec>,
}

impl Pipeline {
    /// Build a validated pipeline.
    pub fn new(stages: Vec<StageSpec>) -> KernelResult<Self> {
        let last = stages.len().saturating_sub(1);
        for (i, stage) in stages.iter().enumerate() {
            validate_command_name(&stage.name)?;
            if i != last && stage.stdout != StdoutRouting::Pipe {
                return Err(KernelError::InvalidSpec(format!(
                    "stage {} ({}) must route to the next stage",
                    i, stage.name
                )));
            }
        }
        Ok(Self { stages })
    }

    /// A pipeline with no stages. Executing it performs no work and exits 0.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub(crate) fn into_stages(self) -> Vec<StageSpec> {
        self.stages
    }
}

/// Command names come from a closed set of registered programs; reject
/// anything outside the allow-listed character set before lookup.
pub fn validate_command_name(name: &str) -> KernelResult<()> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if ok {
        Ok(())
    } else {
        Err(KernelError::InvalidSpec(format!(
            "invalid command name: {:?}",
            name
        )))
    }
}
