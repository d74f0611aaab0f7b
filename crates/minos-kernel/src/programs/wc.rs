//! wc — Line, word, and character counts.

use async_trait::async_trait;
use serde_json::json;

use super::{Program, ProgramCtx};

pub struct Wc;

#[async_trait]
impl Program for Wc {
    fn name(&self) -> &'static str {
        "wc"
    }

    async fn run(&self, ctx: &mut ProgramCtx) -> anyhow::Result<i32> {
        let lines_only = ctx.flag('l', "lines");
        let words_only = ctx.flag('w', "words");
        let chars_only = ctx.flag('c', "chars");

        let input = match ctx.positional().first().map(|s| s.to_string()) {
            Some(path) => {
                let resolved = ctx.resolve(&path);
                match ctx
                    .syscalls
                    .call("vfs.readFile", json!({ "path": resolved }))
                    .await
                {
                    Ok(value) => value.as_str().unwrap_or_default().to_string(),
                    Err(err) => {
                        ctx.out.error(format!("wc: {}: {}", path, err)).await;
                        return Ok(1);
                    }
                }
            }
            None => ctx.take_stdin().unwrap_or_default(),
        };

        let (lines, words, chars) = count(&input);
        let output = if lines_only {
            lines.to_string()
        } else if words_only {
            words.to_string()
        } else if chars_only {
            chars.to_string()
        } else {
            format!("{} {} {}", lines, words, chars)
        };
        ctx.out.line(output).await;
        Ok(0)
    }
}

/// Count lines, words, and characters in the input.
fn count(input: &str) -> (usize, usize, usize) {
    if input.is_empty() {
        return (0, 0, 0);
    }
    let lines = input.lines().count();
    let words = input.split_whitespace().count();
    let chars = input.chars().count();
    (lines, words, chars)
}
