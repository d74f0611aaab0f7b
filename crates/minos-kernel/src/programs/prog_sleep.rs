//! sleep — Suspend for a number of seconds.
//!
//! Named `prog_sleep` on disk to stay clear of `tokio::time::sleep` in
//! imports; the registered command name is still `sleep`.

use async_trait::async_trait;
use serde_json::json;

use super::{Program, ProgramCtx};

pub struct Sleep;

#[async_trait]
impl Program for Sleep {
    fn name(&self) -> &'static str {
        "sleep"
    }

    async fn run(&self, ctx: &mut ProgramCtx) -> anyhow::Result<i32> {
        let Some(arg) = ctx.positional().first().map(|s| s.to_string()) else {
            ctx.out.error("sleep: missing duration").await;
            return Ok(1);
        };
        let seconds: f64 = match arg.parse() {
            Ok(s) if s >= 0.0 => s,
            _ => {
                ctx.out
                    .error(format!("sleep: invalid duration: {:?}", arg))
                    .await;
                return Ok(1);
            }
        };
        let milliseconds = (seconds * 1000.0).round() as u64;
        ctx.syscalls
            .call("proc.sleep", json!({ "milliseconds": milliseconds }))
            .await?;
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::programs::testing::run_program;
    use crate::vfs::MemoryVfs;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_sleep_short() {
        let (outcome, records) =
            run_program(Sleep, Arc::new(MemoryVfs::new()), &["0.01"], None, "/").await;
        assert_eq!(outcome.unwrap(), 0);
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_sleep_bad_duration() {
        let (outcome, records) =
            run_program(Sleep, Arc::new(MemoryVfs::new()), &["soon"], None, "/").await;
        assert_eq!(outcome.unwrap(), 1);
        assert!(records[0].is_error);
    }

    #[tokio::test]
    async fn test_sleep_missing_duration() {
        let (outcome, _) =
            run_program(Sleep, Arc::new(MemoryVfs::new()), &[], None, "/").await;
        assert_eq!(outcome.unwrap(), 1);
    }
}
