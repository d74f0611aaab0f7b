//! Parser: token stream → validated `Pipeline`.

use super::lexer::{tokenize, Token};
use super::{Pipeline, StageSpec, StdoutRouting};
use crate::errors::{KernelError, KernelResult};

/// Parse one pipeline line.
///
/// Stages split on `|`; a trailing `> path` or `>> path` sets the final
/// stage's routing; every other stage routes to the next one. A blank
/// line parses to the empty pipeline.
pub fn parse(line: &str) -> KernelResult<Pipeline> {
    let tokens = tokenize(line)?;
    if tokens.is_empty() {
        return Ok(Pipeline::empty());
    }

    let mut stages: Vec<Vec<String>> = Vec::new();
    let mut words: Vec<String> = Vec::new();
    let mut redirect: Option<(String, bool)> = None;

    let mut iter = tokens.into_iter();
    while let Some(token) = iter.next() {
        match token {
            Token::Word(w) => {
                if redirect.is_some() {
                    return Err(KernelError::InvalidSpec(format!(
                        "unexpected token after redirection target: {:?}",
                        w
                    )));
                }
                words.push(w);
            }
            Token::Pipe => {
                if redirect.is_some() {
                    return Err(KernelError::InvalidSpec(
                        "redirection must be the last element of a pipeline".to_string(),
                    ));
                }
                if words.is_empty() {
                    return Err(KernelError::InvalidSpec("empty pipeline stage".to_string()));
                }
                stages.push(std::mem::take(&mut words));
            }
            Token::Redirect | Token::Append => {
                if redirect.is_some() {
                    return Err(KernelError::InvalidSpec(
                        "multiple redirections".to_string(),
                    ));
                }
                let append = matches!(token, Token::Append);
                match iter.next() {
                    Some(Token::Word(path)) => redirect = Some((path, append)),
                    _ => {
                        return Err(KernelError::InvalidSpec(
                            "missing redirection target".to_string(),
                        ))
                    }
                }
            }
        }
    }
    if words.is_empty() {
        return Err(KernelError::InvalidSpec("empty pipeline stage".to_string()));
    }
    stages.push(words);

    let last = stages.len() - 1;
    let specs = stages
        .into_iter()
        .enumerate()
        .map(|(i, mut stage_words)| {
            let name = stage_words.remove(0);
            let routing = if i != last {
                StdoutRouting::Pipe
            } else {
                match redirect.take() {
                    Some((path, append)) => StdoutRouting::File { path, append },
                    None => StdoutRouting::Terminal,
                }
            };
            StageSpec::new(name, stage_words, routing)
        })
        .collect();

    Pipeline::new(specs)
}
