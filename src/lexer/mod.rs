use logos::Logos;

use crate::source_map::{SourceMap, Span};

/// Prefix reserved for temporaries. Everything else names a global.
pub const TEMPORARY_PREFIX: &str = "t_";

pub fn is_temporary(name: &str) -> bool {
    name.starts_with(TEMPORARY_PREFIX)
}

#[derive(Logos, Debug, PartialEq, Eq, Clone)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip(r"//[^\n]*", allow_greedy = true))]
pub enum TokenKind {
    // Types
    #[token("bool")]
    Bool,
    #[token("byte")]
    Byte,
    #[token("int")]
    Int,
    #[token("state")]
    State,

    // Sections
    #[token("process")]
    Process,
    #[token("guardblock")]
    #[token("guardBlock")]
    GuardBlock,
    #[token("guardcondition")]
    #[token("guardCondition")]
    GuardCondition,
    #[token("effect")]
    Effect,

    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("and")]
    And,
    #[token("or")]
    Or,
    #[token("not")]
    Not,

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
    #[token(";")]
    Semicolon,
    #[token("=")]
    Assign,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<")]
    Less,
    #[token("<=")]
    LessEq,
    #[token(">")]
    Greater,
    #[token(">=")]
    GreaterEq,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,

    #[regex(r"[0-9]+", |lex| lex.slice().parse::<u32>().ok())]
    Number(u32),

    #[regex(r"[A-Za-z_][A-Za-z0-9_.]*", |lex| lex.slice().to_string())]
    Ident(String),

    /// Produced by `lex` for input the scanner rejects.
    Error(LexError),
    Eof,
}

impl TokenKind {
    /// Kinds compare equal regardless of payload.
    pub fn same_kind(&self, other: &TokenKind) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    /// Starts a global declaration.
    pub fn is_type_keyword(&self) -> bool {
        matches!(self, TokenKind::Bool | TokenKind::Byte | TokenKind::Int | TokenKind::State)
    }

    pub fn is_section_keyword(&self) -> bool {
        matches!(
            self,
            TokenKind::Process | TokenKind::GuardBlock | TokenKind::GuardCondition | TokenKind::Effect
        )
    }

    /// Source text of the token, empty at end of input.
    pub fn lexeme(&self) -> String {
        match self {
            TokenKind::Number(n) => n.to_string(),
            TokenKind::Ident(name) => name.clone(),
            TokenKind::Error(LexError::UnexpectedCharacter(c)) => c.to_string(),
            TokenKind::Error(LexError::NumberTooLarge(digits)) => digits.clone(),
            other => other.symbol().to_string(),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            TokenKind::Bool => "bool",
            TokenKind::Byte => "byte",
            TokenKind::Int => "int",
            TokenKind::State => "state",
            TokenKind::Process => "process",
            TokenKind::GuardBlock => "guardblock",
            TokenKind::GuardCondition => "guardcondition",
            TokenKind::Effect => "effect",
            TokenKind::True => "true",
            TokenKind::False => "false",
            TokenKind::And => "and",
            TokenKind::Or => "or",
            TokenKind::Not => "not",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::Comma => ",",
            TokenKind::Semicolon => ";",
            TokenKind::Assign => "=",
            TokenKind::EqEq => "==",
            TokenKind::NotEq => "!=",
            TokenKind::Less => "<",
            TokenKind::LessEq => "<=",
            TokenKind::Greater => ">",
            TokenKind::GreaterEq => ">=",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::Number(_) | TokenKind::Ident(_) | TokenKind::Error(_) | TokenKind::Eof => "",
        }
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenKind::Number(n) => write!(f, "NUMBER {n}"),
            TokenKind::Ident(name) if is_temporary(name) => write!(f, "TEMP {name}"),
            TokenKind::Ident(name) => write!(f, "IDENT {name}"),
            TokenKind::Error(e) => write!(f, "ERROR {e}"),
            TokenKind::Eof => write!(f, "EOF"),
            other => f.write_str(other.symbol()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LexError {
    #[error("unexpected character '{0}'")]
    UnexpectedCharacter(char),
    #[error("number literal '{0}' is too large")]
    NumberTooLarge(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    /// 1-based.
    pub line: usize,
}

/// Scan `source` into tokens. Rejected input becomes `TokenKind::Error` and
/// scanning carries on; the stream always ends with a single `Eof`.
pub fn lex(source: &str) -> Vec<Token> {
    let map = SourceMap::new(source);
    let mut lexer = TokenKind::lexer(source);
    let mut tokens = Vec::new();

    while let Some(result) = lexer.next() {
        let span = Span::new(lexer.span());
        let kind = match result {
            Ok(kind) => kind,
            Err(()) => TokenKind::Error(classify(lexer.slice())),
        };
        tokens.push(Token { kind, span, line: map.lookup(span.start).0 });
    }

    let end = Span { start: source.len(), end: source.len() };
    tokens.push(Token { kind: TokenKind::Eof, span: end, line: map.lookup(source.len()).0 });
    tokens
}

fn classify(slice: &str) -> LexError {
    if !slice.is_empty() && slice.bytes().all(|b| b.is_ascii_digit()) {
        return LexError::NumberTooLarge(slice.to_string());
    }
    LexError::UnexpectedCharacter(slice.chars().next().unwrap_or('\0'))
}
