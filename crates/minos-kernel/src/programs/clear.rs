//! clear — Clear the attached terminal.

use async_trait::async_trait;
use serde_json::json;

use super::{Program, ProgramCtx};

pub struct Clear;

#[async_trait]
impl Program for Clear {
    fn name(&self) -> &'static str {
        "clear"
    }

    async fn run(&self, ctx: &mut ProgramCtx) -> anyhow::Result<i32> {
        ctx.syscalls.call("terminal.clear", json!({})).await?;
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
    async fn test_clear_no_output() {
        let (outcome, records) =
            run_program(Clear, Arc::new(MemoryVfs::new()), &[], None, "/").await;
        assert_eq!(outcome.unwrap(), 0);
        assert!(records.is_empty());
    }
}
