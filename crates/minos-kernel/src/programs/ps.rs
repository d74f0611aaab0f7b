//! ps — List live processes.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{Program, ProgramCtx};

pub struct Ps;

#[async_trait]
impl Program for Ps {
    fn name(&self) -> &'static str {
        "ps"
    }

    async fn run(&self, ctx: &mut ProgramCtx) -> anyhow::Result<i32> {
        let rows = ctx.syscalls.call("proc.list", json!({})).await?;
        for line in format_table(&rows) {
            ctx.out.line(line).await;
        }
        Ok(0)
    }
}

/// Render snapshot rows as a fixed-width table, header first.
fn format_table(rows: &Value) -> Vec<String> {
    let mut lines = vec![format!("{:<6} {:<12} {}", "PID", "STATUS", "COMMAND")];
    for row in rows.as_array().into_iter().flatten() {
        let pid = row.get("pid").and_then(Value::as_u64).unwrap_or(0);
        let status = row.get("status").and_then(Value::as_str).unwrap_or("?");
        let name = row.get("name").and_then(Value::as_str).unwrap_or("?");
        lines.push(format!("{:<6} {:<12} {}", pid, status, name));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_table() {
        let rows = json!([
            { "pid": 3, "name": "sleep", "status": "RUNNING" },
            { "pid": 7, "name": "cat", "status": "RUNNING" },
        ]);
        let lines = format_table(&rows);
        assert_eq!(lines[0], "PID    STATUS       COMMAND");
        assert_eq!(lines[1], "3      RUNNING      sleep");
        assert_eq!(lines[2], "7      RUNNING      cat");
    }

    #[test]
    fn test_format_table_empty() {
        let lines = format_table(&json!([]));
        assert_eq!(lines.len(), 1, "header only");
    }
}
