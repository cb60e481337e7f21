//! Token and phrase types
//!
//! Phrases are produced once by the lexer and never rewritten afterwards. The
//! only mutable part of a token is its lookahead cache, which IF uses to
//! remember where its ELSE/ENDIF live after the first visit.

use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use super::values::Val;

/* ===================== Token Kinds ===================== */

/// Token type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenKind {
    // Statement keywords
    Var,
    Setglob,
    Unset,
    While,
    Endwhile,
    For,
    Foreach,
    Endfor,
    Continue,
    Break,
    Case,
    Is,
    Has,
    Contains,
    Or,
    Endcase,
    If,
    Else,
    Endif,
    Define,
    Enddef,
    Return,
    Async,
    Enum,
    Struct,
    Endstruct,
    Print,
    Println,
    Assert,
    Exit,
    On,
    Do,
    Doc,
    Nop,
    Test,
    Endtest,
    With,
    Endwith,
    Log,

    // Clause keywords
    To,
    Step,
    In,
    As,

    // Operands
    Identifier,
    NumericLiteral,
    StringLiteral,
    BoolLiteral,
    NilLiteral,

    // Punctuation
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Dot,
    Colon,

    // Operators
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LogicalAnd,
    LogicalOr,
    Not,
}

impl TokenKind {
    /// Look up a keyword, ignoring case
    pub fn keyword(word: &str) -> Option<TokenKind> {
        let kind = match word.to_ascii_lowercase().as_str() {
            "var" => TokenKind::Var,
            "setglob" => TokenKind::Setglob,
            "unset" => TokenKind::Unset,
            "while" => TokenKind::While,
            "endwhile" => TokenKind::Endwhile,
            "for" => TokenKind::For,
            "foreach" => TokenKind::Foreach,
            "endfor" => TokenKind::Endfor,
            "continue" => TokenKind::Continue,
            "break" => TokenKind::Break,
            "case" => TokenKind::Case,
            "is" => TokenKind::Is,
            "has" => TokenKind::Has,
            "contains" => TokenKind::Contains,
            "or" => TokenKind::Or,
            "endcase" => TokenKind::Endcase,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "endif" => TokenKind::Endif,
            "define" => TokenKind::Define,
            "enddef" => TokenKind::Enddef,
            "return" => TokenKind::Return,
            "async" => TokenKind::Async,
            "enum" => TokenKind::Enum,
            "struct" => TokenKind::Struct,
            "endstruct" => TokenKind::Endstruct,
            "print" => TokenKind::Print,
            "println" => TokenKind::Println,
            "assert" => TokenKind::Assert,
            "exit" => TokenKind::Exit,
            "on" => TokenKind::On,
            "do" => TokenKind::Do,
            "doc" => TokenKind::Doc,
            "nop" => TokenKind::Nop,
            "test" => TokenKind::Test,
            "endtest" => TokenKind::Endtest,
            "with" => TokenKind::With,
            "endwith" => TokenKind::Endwith,
            "log" => TokenKind::Log,
            "as" => TokenKind::As,
            "to" => TokenKind::To,
            "step" => TokenKind::Step,
            "in" => TokenKind::In,
            _ => return None,
        };
        Some(kind)
    }

    /// Map operator or punctuation text to its kind
    pub fn symbol(text: &str) -> Option<TokenKind> {
        let kind = match text {
            "(" => TokenKind::LParen,
            ")" => TokenKind::RParen,
            "[" => TokenKind::LBracket,
            "]" => TokenKind::RBracket,
            "{" => TokenKind::LBrace,
            "}" => TokenKind::RBrace,
            "," => TokenKind::Comma,
            "." => TokenKind::Dot,
            ":" => TokenKind::Colon,
            "=" => TokenKind::Assign,
            "+=" => TokenKind::PlusAssign,
            "-=" => TokenKind::MinusAssign,
            "*=" => TokenKind::StarAssign,
            "/=" => TokenKind::SlashAssign,
            "+" => TokenKind::Plus,
            "-" => TokenKind::Minus,
            "*" => TokenKind::Star,
            "/" => TokenKind::Slash,
            "%" => TokenKind::Percent,
            "==" => TokenKind::Eq,
            "!=" => TokenKind::Ne,
            "<" => TokenKind::Lt,
            "<=" => TokenKind::Le,
            ">" => TokenKind::Gt,
            ">=" => TokenKind::Ge,
            "&&" => TokenKind::LogicalAnd,
            "||" => TokenKind::LogicalOr,
            "!" => TokenKind::Not,
            _ => return None,
        };
        Some(kind)
    }

    /// CASE clause keywords
    pub fn is_case_clause(self) -> bool {
        matches!(
            self,
            TokenKind::Is | TokenKind::Has | TokenKind::Contains | TokenKind::Or
        )
    }

    pub fn is_compound_assign(self) -> bool {
        matches!(
            self,
            TokenKind::PlusAssign
                | TokenKind::MinusAssign
                | TokenKind::StarAssign
                | TokenKind::SlashAssign
        )
    }
}

/* ===================== Tokens ===================== */

/// Memoized IF jump distances, relative to the IF phrase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JumpCache {
    pub else_distance: Option<usize>,
    pub endif_distance: usize,
}

/// Lexical unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub literal: Option<Val>,
    #[serde(skip)]
    pub(crate) jumps: OnceLock<JumpCache>,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            literal: None,
            jumps: OnceLock::new(),
        }
    }

    pub fn with_literal(kind: TokenKind, text: impl Into<String>, literal: Val) -> Self {
        Self {
            literal: Some(literal),
            ..Self::new(kind, text)
        }
    }

    pub fn identifier(name: impl Into<String>) -> Self {
        Self::new(TokenKind::Identifier, name)
    }

    /// Cached IF jump distances, if this token has been visited before
    pub fn cached_jumps(&self) -> Option<JumpCache> {
        self.jumps.get().copied()
    }

    pub(crate) fn remember_jumps(&self, jumps: JumpCache) {
        // A concurrent first visit computes the same distances; losing the race is harmless.
        let _ = self.jumps.set(jumps);
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.text == other.text && self.literal == other.literal
    }
}

/* ===================== Phrases ===================== */

/// One statement: its tokens plus source metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phrase {
    pub tokens: Vec<Token>,
    pub line: usize,
    /// Unmodified statement text, used by the interactive shell fallback
    #[serde(default)]
    pub original: String,
}

impl Phrase {
    pub fn new(tokens: Vec<Token>, line: usize, original: impl Into<String>) -> Self {
        Self {
            tokens,
            line,
            original: original.into(),
        }
    }

    /// Kind of the statement's leading token
    pub fn leading(&self) -> Option<TokenKind> {
        self.tokens.first().map(|t| t.kind)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
