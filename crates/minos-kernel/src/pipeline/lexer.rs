//! Tokenizer for the pipeline boundary syntax.
//!
//! Words are whitespace-delimited and quote-aware: single quotes are
//! literal, double quotes honor backslash escapes. Operators are `|`,
//! `>`, and `>>`.

use logos::Logos;

use crate::errors::{KernelError, KernelResult};

/// A token of the pipeline text syntax.
#[derive(Logos, Debug, Clone, PartialEq, Eq)]
#[logos(skip r"[ \t\r\n]+")]
pub enum Token {
    #[token("|")]
    Pipe,

    #[token(">>")]
    Append,

    #[token(">")]
    Redirect,

    #[regex(r#"[^ \t\r\n|>'"]+"#, |lex| lex.slice().to_string())]
    #[regex(r"'[^']*'", |lex| trim_quotes(lex.slice()).to_string())]
    #[regex(r#""([^"\\]|\\.)*""#, |lex| unescape(trim_quotes(lex.slice())))]
    Word(String),
}

fn trim_quotes(slice: &str) -> &str {
    &slice[1..slice.len() - 1]
}

/// Resolve backslash escapes inside a double-quoted word.
fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(escaped) => out.push(escaped),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Tokenize one pipeline line.
pub fn tokenize(line: &str) -> KernelResult<Vec<Token>> {
    let mut tokens = Vec::new();
    for (result, span) in Token::lexer(line).spanned() {
        match result {
            Ok(token) => tokens.push(token),
            Err(()) => {
                return Err(KernelError::InvalidSpec(format!(
                    "unparseable input at {:?}: {:?}",
                    span,
                    &line[span.clone()]
                )))
            }
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(line: &str) -> Vec<String> {
        tokenize(line)
            .unwrap()
            .into_iter()
            .filter_map(|t| match t {
                Token::Word(w) => Some(w),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_plain_words() {
        assert_eq!(words("echo hi there"), ["echo", "hi", "there"]);
    }

    #[test]
    fn test_operators() {
        let tokens = tokenize("a | b >> out").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Word("a".into()),
                Token::Pipe,
                Token::Word("b".into()),
                Token::Append,
                Token::Word("out".into()),
            ]
        );
    }

    #[test]
    fn test_append_wins_over_redirect() {
        let tokens = tokenize(">>").unwrap();
        assert_eq!(tokens, vec![Token::Append]);
    }

    #[test]
    fn test_single_quotes_literal() {
        assert_eq!(words(r"echo 'hi | there > you'"), ["echo", "hi | there > you"]);
    }

    #[test]
    fn test_double_quotes_escapes() {
        assert_eq!(words(r#"echo "a \"quoted\" word""#), [
            "echo",
            r#"a "quoted" word"#
        ]);
        assert_eq!(words(r#""line\nbreak""#), ["line\nbreak"]);
    }

    #[test]
    fn test_empty_line() {
        assert!(tokenize("   ").unwrap().is_empty());
    }

    #[test]
    fn test_unterminated_quote_is_invalid() {
        assert!(tokenize("echo 'oops").is_err());
    }
}
