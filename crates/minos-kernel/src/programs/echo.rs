//! echo — Print arguments to stdout.

use async_trait::async_trait;

use super::{Program, ProgramCtx};

pub struct Echo;

#[async_trait]
impl Program for Echo {
    fn name(&self) -> &'static str {
        "echo"
    }

    async fn run(&self, ctx: &mut ProgramCtx) -> anyhow::Result<i32> {
        let text = ctx.positional().join(" ");
        // Quoted arguments may carry embedded newlines; each becomes its
        // own record.
        for line in text.split('\n') {
            ctx.out.line(line).await;
        }
        Ok(0)
    }
}
