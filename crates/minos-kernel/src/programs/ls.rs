//! ls — List directory contents.

use async_trait::async_trait;
use serde_json::json;

use super::{Program, ProgramCtx};

pub struct Ls;

#[async_trait]
impl Program for Ls {
    fn name(&self) -> &'static str {
        "ls"
    }

    async fn run(&self, ctx: &mut ProgramCtx) -> anyhow::Result<i32> {
        let long = ctx.flag('l', "long");
        let path = ctx
            .positional()
            .first()
            .map(|s| s.to_string())
            .unwrap_or_else(|| ".".to_string());
        let resolved = ctx.resolve(&path);

        let entries = match ctx
            .syscalls
            .call("vfs.readDir", json!({ "path": resolved, "long": long }))
            .await
        {
            Ok(value) => value,
            Err(err) => {
                ctx.out.error(format!("ls: {}: {}", path, err)).await;
                return Ok(1);
            }
        };

        for entry in entries.as_array().into_iter().flatten() {
            let name = entry["name"].as_str().unwrap_or_default();
            if long {
                let marker = if entry["type"] == "dir" { 'd' } else { '-' };
                ctx.out.line(format!("{} {}", marker, name)).await;
            } else {
                ctx.out.line(name).await;
            }
        }
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::programs::testing::{run_program, stdout_lines};
    use crate::vfs::MemoryVfs;
    use std::sync::Arc;

    fn seeded() -> Arc<MemoryVfs> {
        let fs = Arc::new(MemoryVfs::new());
        fs.write_file("/home/b.txt", "", false).unwrap();
        fs.write_file("/home/a.txt", "", false).unwrap();
        fs.mkdir("/home/docs").unwrap();
        fs
    }

    #[tokio::test]
    async fn test_ls_sorted_names() {
        let (outcome, records) = run_program(Ls, seeded(), &["/home"], None, "/").await;
        assert_eq!(outcome.unwrap(), 0);
        assert_eq!(stdout_lines(&records), ["a.txt", "b.txt", "docs"]);
    }

    #[tokio::test]
    async fn test_ls_defaults_to_cwd() {
        let (outcome, records) = run_program(Ls, seeded(), &[], None, "/home").await;
        assert_eq!(outcome.unwrap(), 0);
        assert_eq!(stdout_lines(&records).len(), 3);
    }

    #[tokio::test]
    async fn test_ls_long_markers() {
        let (_, records) = run_program(Ls, seeded(), &["-l", "/home"], None, "/").await;
        assert_eq!(stdout_lines(&records), ["- a.txt", "- b.txt", "d docs"]);
    }

    #[tokio::test]
    async fn test_ls_missing_dir() {
        let (outcome, records) =
            run_program(Ls, Arc::new(MemoryVfs::new()), &["/nope"], None, "/").await;
        assert_eq!(outcome.unwrap(), 1);
        assert!(records[0].is_error);
    }
}
