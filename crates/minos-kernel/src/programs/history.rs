//! history — Show the process lifetime log.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{Program, ProgramCtx};

pub struct History;

#[async_trait]
impl Program for History {
    fn name(&self) -> &'static str {
        "history"
    }

    async fn run(&self, ctx: &mut ProgramCtx) -> anyhow::Result<i32> {
        let entries = ctx.syscalls.call("proc.history", json!({})).await?;
        for line in format_log(&entries) {
            ctx.out.line(line).await;
        }
        Ok(0)
    }
}

/// Render history entries oldest-first, one per line.
fn format_log(entries: &Value) -> Vec<String> {
    let mut lines = Vec::new();
    for entry in entries.as_array().into_iter().flatten() {
        let pid = entry.get("pid").and_then(Value::as_u64).unwrap_or(0);
        let name = entry.get("name").and_then(Value::as_str).unwrap_or("?");
        let status = entry.get("status").and_then(Value::as_str).unwrap_or("?");
        let code = entry
            .get("exitCode")
            .and_then(Value::as_i64)
            .map(|c| format!(" exit={}", c))
            .unwrap_or_default();
        lines.push(format!("{:<6} {:<12} {}{}", pid, status, name, code));
    }
    lines
}
