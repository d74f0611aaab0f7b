//! touch — Create empty files or bump timestamps.

use async_trait::async_trait;
use serde_json::json;

use super::{Program, ProgramCtx};

pub struct Touch;

#[async_trait]
impl Program for Touch {
    fn name(&self) -> &'static str {
        "touch"
    }

    async fn run(&self, ctx: &mut ProgramCtx) -> anyhow::Result<i32> {
        let paths: Vec<String> = ctx.positional().iter().map(|s| s.to_string()).collect();
        if paths.is_empty() {
            ctx.out.error("touch: missing operand").await;
            return Ok(1);
        }
        let mut code = 0;
        for path in paths {
            let resolved = ctx.resolve(&path);
            // An empty append creates the file if absent and bumps mtime
            // without disturbing existing content.
            let result = ctx
                .syscalls
                .call(
                    "vfs.writeFile",
                    json!({ "path": resolved, "content": "", "append": true }),
                )
                .await;
            if let Err(err) = result {
                ctx.out.error(format!("touch: {}: {}", path, err)).await;
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
    async fn test_touch_creates_empty_file() {
        let fs = Arc::new(MemoryVfs::new());
        let (outcome, _) = run_program(Touch, fs.clone(), &["/new"], None, "/").await;
        assert_eq!(outcome.unwrap(), 0);
        assert_eq!(fs.read_file("/new").unwrap(), "");
    }

    #[tokio::test]
    async fn test_touch_preserves_content() {
        let fs = Arc::new(MemoryVfs::new());
        fs.write_file("/f", "keep", false).unwrap();
        let (outcome, _) = run_program(Touch, fs.clone(), &["/f"], None, "/").await;
        assert_eq!(outcome.unwrap(), 0);
        assert_eq!(fs.read_file("/f").unwrap(), "keep");
    }

    #[tokio::test]
    async fn test_touch_directory_fails() {
        let fs = Arc::new(MemoryVfs::new());
        fs.mkdir("/d").unwrap();
        let (outcome, records) = run_program(Touch, fs, &["/d"], None, "/").await;
        assert_eq!(outcome.unwrap(), 1);
        assert!(records[0].is_error);
    }
}
