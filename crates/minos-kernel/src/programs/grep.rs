//! grep — Filter lines by regular expression.

use async_trait::async_trait;
use regex::Regex;
use serde_json::json;

use super::{Program, ProgramCtx};

pub struct Grep;

#[async_trait]
impl Program for Grep {
    fn name(&self) -> &'static str {
        "grep"
    }

    async fn run(&self, ctx: &mut ProgramCtx) -> anyhow::Result<i32> {
        let positional: Vec<String> = ctx.positional().iter().map(|s| s.to_string()).collect();
        let Some(pattern) = positional.first() else {
            ctx.out.error("grep: missing pattern").await;
            return Ok(1);
        };
        let paths = &positional[1..];

        let mut matched = false;
        let mut failed = false;
        if paths.is_empty() {
            // Filter stdin locally; the vfs only greps files.
            let re = match Regex::new(pattern) {
                Ok(re) => re,
                Err(err) => {
                    ctx.out.error(format!("grep: bad pattern: {}", err)).await;
                    return Ok(1);
                }
            };
            let input = ctx.take_stdin().unwrap_or_default();
            for line in input.lines().filter(|l| re.is_match(l)) {
                matched = true;
                ctx.out.line(line).await;
            }
        } else {
            for path in paths {
                let resolved = ctx.resolve(path);
                let result = ctx
                    .syscalls
                    .call("vfs.grep", json!({ "path": resolved, "pattern": pattern }))
                    .await;
                match result {
                    Ok(value) => {
                        for line in value.as_array().into_iter().flatten() {
                            if let Some(text) = line.as_str() {
                                matched = true;
                                ctx.out.line(text).await;
                            }
                        }
                    }
                    Err(err) => {
                        failed = true;
                        ctx.out.error(format!("grep: {}: {}", path, err)).await;
                    }
                }
            }
        }

        // No matches is an ordinary exit 1, same as a read failure here.
        Ok(if matched && !failed { 0 } else { 1 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::programs::testing::{run_program, stdout_lines};
    use crate::vfs::MemoryVfs;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_grep_stdin() {
        let (outcome, records) = run_program(
            Grep,
            Arc::new(MemoryVfs::new()),
            &["^a"],
            Some("alpha\nbeta\nanchor"),
            "/",
        )
        .await;
        assert_eq!(outcome.unwrap(), 0);
        assert_eq!(stdout_lines(&records), ["alpha", "anchor"]);
    }

    #[tokio::test]
    async fn test_grep_no_match_exits_one() {
        let (outcome, records) = run_program(
            Grep,
            Arc::new(MemoryVfs::new()),
            &["zzz"],
            Some("alpha\nbeta"),
            "/",
        )
        .await;
        assert_eq!(outcome.unwrap(), 1);
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_grep_file() {
        let fs = Arc::new(MemoryVfs::new());
        fs.write_file("/log", "ok line\nfail line\nok again", false)
            .unwrap();
        let (outcome, records) = run_program(Grep, fs, &["ok", "/log"], None, "/").await;
        assert_eq!(outcome.unwrap(), 0);
        assert_eq!(stdout_lines(&records), ["ok line", "ok again"]);
    }

    #[tokio::test]
    async fn test_grep_missing_file() {
        let (outcome, records) =
            run_program(Grep, Arc::new(MemoryVfs::new()), &["x", "/nope"], None, "/").await;
        assert_eq!(outcome.unwrap(), 1);
        assert!(records[0].is_error);
    }

    #[tokio::test]
    async fn test_grep_missing_pattern() {
        let (outcome, _) =
            run_program(Grep, Arc::new(MemoryVfs::new()), &[], None, "/").await;
        assert_eq!(outcome.unwrap(), 1);
    }
}
