//! pwd — Print the working directory.

use async_trait::async_trait;

use super::{Program, ProgramCtx};

pub struct Pwd;

#[async_trait]
impl Program for Pwd {
    fn name(&self) -> &'static str {
        "pwd"
    }

    async fn run(&self, ctx: &mut ProgramCtx) -> anyhow::Result<i32> {
        ctx.out.line(ctx.cwd.clone()).await;
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::programs::testing::{run_program, stdout_lines};
    use crate::vfs::MemoryVfs;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_pwd() {
        let (outcome, records) =
            run_program(Pwd, Arc::new(MemoryVfs::new()), &[], None, "/home/amy").await;
        assert_eq!(outcome.unwrap(), 0);
        assert_eq!(stdout_lines(&records), ["/home/amy"]);
    }
}
