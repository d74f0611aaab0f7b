//! rm — Remove files and directories.

use async_trait::async_trait;
use serde_json::json;

use super::{Program, ProgramCtx};

pub struct Rm;

#[async_trait]
impl Program for Rm {
    fn name(&self) -> &'static str {
        "rm"
    }

    async fn run(&self, ctx: &mut ProgramCtx) -> anyhow::Result<i32> {
        let recursive = ctx.flag('r', "recursive");
        let paths: Vec<String> = ctx.positional().iter().map(|s| s.to_string()).collect();
        if paths.is_empty() {
            ctx.out.error("rm: missing operand").await;
            return Ok(1);
        }
        let mut code = 0;
        for path in paths {
            let resolved = ctx.resolve(&path);
            if let Err(err) = ctx
                .syscalls
                .call("vfs.rm", json!({ "path": resolved, "recursive": recursive }))
                .await
            {
                ctx.out.error(format!("rm: {}: {}", path, err)).await;
                code = 1;
            }
        }
        Ok(code)
    }
}
