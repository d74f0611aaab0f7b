//! cat — Concatenate files (or stdin) to stdout.

use async_trait::async_trait;
use serde_json::json;

use super::{Program, ProgramCtx};

pub struct Cat;

#[async_trait]
impl Program for Cat {
    fn name(&self) -> &'static str {
        "cat"
    }

    async fn run(&self, ctx: &mut ProgramCtx) -> anyhow::Result<i32> {
        let paths: Vec<String> = ctx.positional().iter().map(|s| s.to_string()).collect();

        if paths.is_empty() {
            if let Some(stdin) = ctx.take_stdin() {
                ctx.out.lines(&stdin).await;
            }
            return Ok(0);
        }

        let mut code = 0;
        for path in paths {
            let resolved = ctx.resolve(&path);
            match ctx
                .syscalls
                .call("vfs.readFile", json!({ "path": resolved }))
                .await
            {
                Ok(value) => {
                    let content = value.as_str().unwrap_or_default();
                    ctx.out.lines(content).await;
                }
                Err(err) => {
                    ctx.out.error(format!("cat: {}: {}", path, err)).await;
                    code = 1;
                }
            }
        }
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::programs::testing::{run_program, stdout_lines};
    use crate::vfs::MemoryVfs;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_cat_file() {
        let fs = Arc::new(MemoryVfs::new());
        fs.write_file("/motd", "hello\nworld", false).unwrap();
        let (outcome, records) = run_program(Cat, fs, &["/motd"], None, "/").await;
        assert_eq!(outcome.unwrap(), 0);
        assert_eq!(stdout_lines(&records), ["hello", "world"]);
    }

    #[tokio::test]
    async fn test_cat_relative_path() {
        let fs = Arc::new(MemoryVfs::new());
        fs.write_file("/home/amy/x.txt", "data", false).unwrap();
        let (outcome, records) = run_program(Cat, fs, &["x.txt"], None, "/home/amy").await;
        assert_eq!(outcome.unwrap(), 0);
        assert_eq!(stdout_lines(&records), ["data"]);
    }

    #[tokio::test]
    async fn test_cat_stdin_passthrough() {
        let (outcome, records) = run_program(
            Cat,
            Arc::new(MemoryVfs::new()),
            &[],
            Some("piped\ninput"),
            "/",
        )
        .await;
        assert_eq!(outcome.unwrap(), 0);
        assert_eq!(stdout_lines(&records), ["piped", "input"]);
    }

    #[tokio::test]
    async fn test_cat_missing_file() {
        let (outcome, records) =
            run_program(Cat, Arc::new(MemoryVfs::new()), &["/nope"], None, "/").await;
        assert_eq!(outcome.unwrap(), 1);
        assert!(records.iter().any(|r| r.is_error && r.text.starts_with("cat:")));
    }

    #[tokio::test]
    async fn test_cat_continues_after_error() {
        let fs = Arc::new(MemoryVfs::new());
        fs.write_file("/ok", "fine", false).unwrap();
        let (outcome, records) = run_program(Cat, fs, &["/nope", "/ok"], None, "/").await;
        assert_eq!(outcome.unwrap(), 1);
        assert_eq!(stdout_lines(&records), ["fine"]);
    }
}
