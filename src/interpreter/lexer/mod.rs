//! Lexer - PEST-based tokenizer for Za source
//!
//! Turns source text into phrases: one statement per line (or per `;`), each
//! holding its tokens, the line it started on and the original text.

use pest::Parser;
use pest_derive::Parser;
use thiserror::Error;

use super::executor::types::{Phrase, Token, TokenKind, Val};

/* ===================== PEST Lexer ===================== */

#[derive(Parser)]
#[grammar = "interpreter/lexer/za.pest"]
struct ZaLexer;

/* ===================== Error Types ===================== */

#[derive(Debug, Error)]
pub enum LexError {
    #[error("{0}")]
    Pest(String),
    #[error("line {line}: invalid number literal '{text}'")]
    Number { line: usize, text: String },
    #[error("line {line}: unknown symbol '{text}'")]
    Symbol { line: usize, text: String },
}

impl From<pest::error::Error<Rule>> for LexError {
    fn from(err: pest::error::Error<Rule>) -> Self {
        LexError::Pest(err.to_string())
    }
}

/* ===================== Public API ===================== */

/// Split source text into phrases
pub fn phrases(source: &str) -> Result<Vec<Phrase>, LexError> {
    let pairs = ZaLexer::parse(Rule::program, source)?;

    let mut out = Vec::new();
    let mut tokens: Vec<Token> = Vec::new();
    let mut line = 0;
    let mut span: Option<(usize, usize)> = None;

    for program in pairs {
        for pair in program.into_inner() {
            match pair.as_rule() {
                Rule::separator | Rule::EOI => {
                    if !tokens.is_empty() {
                        let original = span.map(|(s, e)| &source[s..e]).unwrap_or_default();
                        out.push(Phrase::new(std::mem::take(&mut tokens), line, original.trim()));
                    }
                    span = None;
                }
                _ => {
                    let p = pair.as_span();
                    if tokens.is_empty() {
                        line = p.start_pos().line_col().0;
                        span = Some((p.start(), p.end()));
                    } else if let Some((start, _)) = span {
                        span = Some((start, p.end()));
                    }
                    tokens.push(build_token(pair, line)?);
                }
            }
        }
    }

    Ok(out)
}

/* ===================== Token Builder ===================== */

fn build_token(pair: pest::iterators::Pair<Rule>, line: usize) -> Result<Token, LexError> {
    let text = pair.as_str();
    match pair.as_rule() {
        Rule::integer => {
            let literal = match text.parse::<i64>() {
                Ok(n) => Val::Int(n),
                Err(_) => Val::Uint(text.parse::<u64>().map_err(|_| LexError::Number {
                    line,
                    text: text.to_string(),
                })?),
            };
            Ok(Token::with_literal(TokenKind::NumericLiteral, text, literal))
        }
        Rule::float => {
            let value = text.parse::<f64>().map_err(|_| LexError::Number {
                line,
                text: text.to_string(),
            })?;
            Ok(Token::with_literal(
                TokenKind::NumericLiteral,
                text,
                Val::Float(value),
            ))
        }
        Rule::string => {
            let inner = pair
                .into_inner()
                .next()
                .map(|p| p.as_str())
                .unwrap_or_default();
            let value = unescape(inner);
            Ok(Token::with_literal(
                TokenKind::StringLiteral,
                value.clone(),
                Val::Str(value),
            ))
        }
        Rule::identifier => Ok(word_token(text)),
        _ => TokenKind::symbol(text)
            .map(|kind| Token::new(kind, text))
            .ok_or_else(|| LexError::Symbol {
                line,
                text: text.to_string(),
            }),
    }
}

fn word_token(text: &str) -> Token {
    match text.to_ascii_lowercase().as_str() {
        "true" => Token::with_literal(TokenKind::BoolLiteral, text, Val::Bool(true)),
        "false" => Token::with_literal(TokenKind::BoolLiteral, text, Val::Bool(false)),
        "nil" => Token::with_literal(TokenKind::NilLiteral, text, Val::Nil),
        _ => match TokenKind::keyword(text) {
            Some(kind) => Token::new(kind, text),
            None => Token::identifier(text),
        },
    }
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(phrase: &Phrase) -> Vec<TokenKind> {
        phrase.tokens.iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_lex_splits_lines_and_semicolons() {
        let src = "a = 1\n\nfor i = 1 to 3; println i\nendfor\n";
        let out = phrases(src).unwrap();
        assert_eq!(out.len(), 4);
        assert_eq!(out[0].line, 1);
        assert_eq!(out[1].line, 3);
        assert_eq!(out[2].line, 3);
        assert_eq!(out[3].line, 4);
        assert_eq!(out[1].original, "for i = 1 to 3");
        assert_eq!(
            kinds(&out[1]),
            vec![
                TokenKind::For,
                TokenKind::Identifier,
                TokenKind::Assign,
                TokenKind::NumericLiteral,
                TokenKind::To,
                TokenKind::NumericLiteral,
            ]
        );
    }

    #[test]
    fn test_lex_keywords_ignore_case() {
        let out = phrases("WHILE true\nEndWhile").unwrap();
        assert_eq!(kinds(&out[0]), vec![TokenKind::While, TokenKind::BoolLiteral]);
        assert_eq!(out[1].leading(), Some(TokenKind::Endwhile));
    }

    #[test]
    fn test_lex_literals() {
        let out = phrases(r#"x = "a\tb" + 2.5 # trailing comment"#).unwrap();
        let tokens = &out[0].tokens;
        assert_eq!(tokens[2].literal, Some(Val::str("a\tb")));
        assert_eq!(tokens[4].literal, Some(Val::Float(2.5)));
        assert_eq!(tokens.len(), 5);
    }

    #[test]
    fn test_lex_two_char_operators() {
        let out = phrases("a += b >= c && !d").unwrap();
        assert_eq!(
            kinds(&out[0]),
            vec![
                TokenKind::Identifier,
                TokenKind::PlusAssign,
                TokenKind::Identifier,
                TokenKind::Ge,
                TokenKind::Identifier,
                TokenKind::LogicalAnd,
                TokenKind::Not,
                TokenKind::Identifier,
            ]
        );
    }

    #[test]
    fn test_lex_block_keywords() {
        let out = phrases("with notes as fh\nEndWith\ntest \"a\" group \"b\"").unwrap();
        assert_eq!(
            kinds(&out[0]),
            vec![
                TokenKind::With,
                TokenKind::Identifier,
                TokenKind::As,
                TokenKind::Identifier,
            ]
        );
        assert_eq!(out[1].leading(), Some(TokenKind::Endwith));
        assert_eq!(out[2].tokens[2].kind, TokenKind::Identifier);
    }
}
