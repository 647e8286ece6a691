//! Pull-style token access for the compiler.

use crate::lexer::{Token, TokenKind};

use super::{CompileError, ErrorKind};

/// The primitives the compiler needs from a front end.
pub trait TokenSource {
    /// Current token. Once the input is exhausted this keeps returning `Eof`.
    fn peek(&self) -> &Token;

    /// Consume and return the current token.
    fn advance(&mut self) -> Token;

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek_kind().same_kind(kind)
    }

    fn match_kind(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, message: &str) -> Result<Token, CompileError> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(CompileError::at(self.peek(), ErrorKind::Syntax(message.to_string())))
        }
    }
}

/// A `TokenSource` over a scanned token vector. Malformed tokens stay in
/// place so the compiler meets them where they were written.
pub struct TokenCursor {
    tokens: Vec<Token>,
    pos: usize,
}

impl TokenCursor {
    pub fn new(mut tokens: Vec<Token>) -> Self {
        if !matches!(tokens.last().map(|t| &t.kind), Some(TokenKind::Eof)) {
            let end = tokens.last().map(|t| (t.span.end, t.line)).unwrap_or((0, 1));
            tokens.push(Token {
                kind: TokenKind::Eof,
                span: crate::source_map::Span { start: end.0, end: end.0 },
                line: end.1,
            });
        }
        TokenCursor { tokens, pos: 0 }
    }
}

impl TokenSource for TokenCursor {
    fn peek(&self) -> &Token {
        // `new` guarantees a trailing Eof
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }
}
