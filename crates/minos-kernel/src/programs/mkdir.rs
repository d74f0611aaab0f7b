//! mkdir — Create directories.

use async_trait::async_trait;
use serde_json::json;

use super::{Program, ProgramCtx};

pub struct Mkdir;

#[async_trait]
impl Program for Mkdir {
    fn name(&self) -> &'static str {
        "mkdir"
    }

    async fn run(&self, ctx: &mut ProgramCtx) -> anyhow::Result<i32> {
        let paths: Vec<String> = ctx.positional().iter().map(|s| s.to_string()).collect();
        if paths.is_empty() {
            ctx.out.error("mkdir: missing operand").await;
            return Ok(1);
        }
        let mut code = 0;
        for path in paths {
            let resolved = ctx.resolve(&path);
            if let Err(err) = ctx
                .syscalls
                .call("vfs.mkdir", json!({ "path": resolved }))
                .await
            {
                ctx.out.error(format!("mkdir: {}: {}", path, err)).await;
                code = 1;
            }
        }
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::programs::testing::run_program;
    use crate::vfs::MemoryVfs;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_mkdir_creates_dir() {
        let fs = Arc::new(MemoryVfs::new());
        let (outcome, records) = run_program(Mkdir, fs.clone(), &["logs"], None, "/").await;
        assert_eq!(outcome.unwrap(), 0);
        assert!(records.is_empty());
        assert_eq!(fs.stat("/logs").unwrap().kind.as_str(), "dir");
    }

    #[tokio::test]
    async fn test_mkdir_missing_operand() {
        let (outcome, records) =
            run_program(Mkdir, Arc::new(MemoryVfs::new()), &[], None, "/").await;
        assert_eq!(outcome.unwrap(), 1);
        assert!(records[0].is_error);
    }
}
