//! kill — Terminate a process by PID.

use async_trait::async_trait;
use serde_json::json;

use super::{Program, ProgramCtx};

pub struct Kill;

#[async_trait]
impl Program for Kill {
    fn name(&self) -> &'static str {
        "kill"
    }

    async fn run(&self, ctx: &mut ProgramCtx) -> anyhow::Result<i32> {
        let Some(arg) = ctx.positional().first().map(|s| s.to_string()) else {
            ctx.out.error("kill: missing pid").await;
            return Ok(1);
        };
        let pid: u64 = match arg.parse() {
            Ok(pid) => pid,
            Err(_) => {
                ctx.out.error(format!("kill: invalid pid: {:?}", arg)).await;
                return Ok(1);
            }
        };
        match ctx.syscalls.call("proc.kill", json!({ "pid": pid })).await {
            Ok(_) => Ok(0),
            Err(err) => {
                ctx.out.error(format!("kill: {}: {}", pid, err)).await;
                Ok(1)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::programs::testing::run_program;
    use crate::vfs::MemoryVfs;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_kill_missing_pid() {
        let (outcome, records) =
            run_program(Kill, Arc::new(MemoryVfs::new()), &[], None, "/").await;
        assert_eq!(outcome.unwrap(), 1);
        assert!(records[0].is_error);
    }

    #[tokio::test]
    async fn test_kill_invalid_pid() {
        let (outcome, records) =
            run_program(Kill, Arc::new(MemoryVfs::new()), &["abc"], None, "/").await;
        assert_eq!(outcome.unwrap(), 1);
        assert!(records[0].text.contains("invalid pid"));
    }
}
