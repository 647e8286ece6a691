//! Single-pass compiler from guarded-action source to bytecode.
//!
//! Globals are declared into the table as they are read. Each process is
//! compiled as guard block, guard test and effect; the guard test emits a
//! forward jump that is patched once the effect has been committed.

pub mod backend;
pub mod stream;

use serde::Serialize;
use tracing::debug;

use crate::bytecode::{Chunk, CodecError};
use crate::lexer::{self, LexError, Token, TokenKind, is_temporary};
use crate::register::{MAX_REGISTERS, RegisterError};
use crate::source_map::Span;
use crate::table::{Table, TableError};
use crate::value::{Value, ValueType};

use backend::{Backend, BinOp, Expr, Term, TermKind};
use stream::{TokenCursor, TokenSource};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ErrorKind {
    #[error(transparent)]
    Lexical(LexError),
    #[error("{0}")]
    Syntax(String),
    #[error("'{0}' is not a declared global")]
    UndeclaredVariable(String),
    #[error("temporary '{0}' is read before it is assigned")]
    UndefinedTemporary(String),
    #[error("'{0}' is already declared")]
    DuplicateGlobal(String),
    #[error("global '{0}' uses the reserved temporary prefix 't_'")]
    ReservedPrefix(String),
    #[error("{0}")]
    OutOfRange(String),
    #[error("'{0}' is not an array")]
    NotAnArray(String),
    #[error("array '{0}' is used without an index")]
    MissingIndex(String),
    #[error("guard condition '{0}' is not a temporary")]
    GuardNotTemporary(String),
    #[error("no register left for this instruction")]
    RegisterExhausted,
    #[error(transparent)]
    FieldOverflow(CodecError),
}

impl ErrorKind {
    /// Stable code, see `diagnostic::registry`.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Lexical(LexError::UnexpectedCharacter(_)) => "SDVU-L001",
            ErrorKind::Lexical(LexError::NumberTooLarge(_)) => "SDVU-L002",
            ErrorKind::Syntax(_) => "SDVU-P001",
            ErrorKind::UndeclaredVariable(_) => "SDVU-S001",
            ErrorKind::UndefinedTemporary(_) => "SDVU-S002",
            ErrorKind::DuplicateGlobal(_) => "SDVU-S003",
            ErrorKind::ReservedPrefix(_) => "SDVU-S004",
            ErrorKind::OutOfRange(_) => "SDVU-S005",
            ErrorKind::NotAnArray(_) => "SDVU-S006",
            ErrorKind::MissingIndex(_) => "SDVU-S007",
            ErrorKind::GuardNotTemporary(_) => "SDVU-S008",
            ErrorKind::RegisterExhausted => "SDVU-R001",
            ErrorKind::FieldOverflow(_) => "SDVU-R002",
        }
    }
}

impl From<CodecError> for ErrorKind {
    fn from(e: CodecError) -> Self {
        ErrorKind::FieldOverflow(e)
    }
}

impl From<TableError> for ErrorKind {
    fn from(e: TableError) -> Self {
        match e {
            TableError::Duplicate(name) => ErrorKind::DuplicateGlobal(name),
            TableError::NotFound(name) => ErrorKind::UndeclaredVariable(name),
        }
    }
}

impl From<RegisterError> for ErrorKind {
    fn from(e: RegisterError) -> Self {
        match e {
            RegisterError::RegisterExhausted => ErrorKind::RegisterExhausted,
            RegisterError::Undeclared(name) => ErrorKind::UndeclaredVariable(name),
            RegisterError::Table(e) => e.into(),
            RegisterError::Codec(e) => e.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("[line {line}] Error{}: {kind}", location(.lexeme, .kind))]
pub struct CompileError {
    pub kind: ErrorKind,
    pub span: Span,
    pub line: usize,
    /// Offending token text; empty at end of input.
    pub lexeme: String,
}

fn location(lexeme: &str, kind: &ErrorKind) -> String {
    match kind {
        ErrorKind::Lexical(_) => String::new(),
        _ if lexeme.is_empty() => " at end".to_string(),
        _ => format!(" at '{lexeme}'"),
    }
}

impl CompileError {
    /// An error at `token`. A malformed token reports its own scanner error
    /// in place of `kind`.
    pub fn at(token: &Token, kind: ErrorKind) -> Self {
        let kind = match &token.kind {
            TokenKind::Error(e) => ErrorKind::Lexical(e.clone()),
            _ => kind,
        };
        CompileError { kind, span: token.span, line: token.line, lexeme: token.kind.lexeme() }
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    /// General registers shared by temporaries and cached globals.
    pub registers: usize,
}

impl Default for Options {
    fn default() -> Self {
        Options { registers: MAX_REGISTERS }
    }
}

/// Word range of one compiled process within the chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessInfo {
    pub name: String,
    pub start: usize,
    pub len: usize,
}

#[derive(Debug)]
pub struct Compilation {
    /// Diagnostic-only when `succeeded` is false.
    pub chunk: Chunk,
    pub table: Table,
    pub processes: Vec<ProcessInfo>,
    /// Every recorded error, in source order.
    pub errors: Vec<CompileError>,
}

impl Compilation {
    pub fn succeeded(&self) -> bool {
        self.errors.is_empty()
    }
}

pub fn compile(source: &str, options: Options) -> Compilation {
    Compiler::new(TokenCursor::new(lexer::lex(source)), options).compile()
}

pub struct Compiler<S: TokenSource> {
    tokens: S,
    backend: Backend,
    errors: Vec<CompileError>,
    processes: Vec<ProcessInfo>,
}

type Result<T> = std::result::Result<T, CompileError>;

fn binop(kind: &TokenKind) -> Option<BinOp> {
    let op = match kind {
        TokenKind::Plus => BinOp::Add,
        TokenKind::Minus => BinOp::Sub,
        TokenKind::Star => BinOp::Mul,
        TokenKind::Slash => BinOp::Div,
        TokenKind::Percent => BinOp::Mod,
        TokenKind::And => BinOp::And,
        TokenKind::Or => BinOp::Or,
        TokenKind::Less => BinOp::Lt,
        TokenKind::Greater => BinOp::Gt,
        TokenKind::EqEq => BinOp::Eq,
        TokenKind::NotEq => BinOp::NotEq,
        TokenKind::LessEq => BinOp::LessEq,
        TokenKind::GreaterEq => BinOp::GreaterEq,
        _ => return None,
    };
    Some(op)
}

fn ident(token: &Token) -> String {
    match &token.kind {
        TokenKind::Ident(name) => name.clone(),
        _ => String::new(),
    }
}

fn number(token: &Token) -> i32 {
    match token.kind {
        TokenKind::Number(n) => i32::try_from(n).unwrap_or(i32::MAX),
        _ => 0,
    }
}

const IDENT: TokenKind = TokenKind::Ident(String::new());
const NUMBER: TokenKind = TokenKind::Number(0);

impl<S: TokenSource> Compiler<S> {
    pub fn new(tokens: S, options: Options) -> Self {
        Compiler { tokens, backend: Backend::new(options.registers), errors: Vec::new(), processes: Vec::new() }
    }

    pub fn compile(mut self) -> Compilation {
        self.program();
        // flush errors point back at their process keyword
        self.errors.sort_by_key(|e| e.span.start);
        Compilation {
            chunk: self.backend.emitter.into_chunk(),
            table: self.backend.table,
            processes: self.processes,
            errors: self.errors,
        }
    }

    fn report(&mut self, error: CompileError) {
        let seen = |e: &CompileError| matches!(e.kind, ErrorKind::Lexical(_)) && e.span == error.span;
        if matches!(error.kind, ErrorKind::Lexical(_)) && self.errors.iter().any(seen) {
            return;
        }
        debug!(code = error.code(), line = error.line, "{}", error.kind);
        self.errors.push(error);
    }

    /// Skip to the next assignment or section boundary without consuming it.
    fn synchronize(&mut self) {
        loop {
            let kind = self.tokens.peek_kind();
            if matches!(kind, TokenKind::Comma | TokenKind::Semicolon | TokenKind::Eof)
                || kind.is_section_keyword()
                || kind.is_type_keyword()
            {
                return;
            }
            self.skip();
        }
    }

    /// Drop one token while recovering. Malformed tokens are still reported.
    fn skip(&mut self) -> Token {
        let token = self.tokens.advance();
        if let TokenKind::Error(e) = &token.kind {
            self.report(CompileError::at(&token, ErrorKind::Lexical(e.clone())));
        }
        token
    }

    /// Skip past the end of a broken global declaration.
    fn synchronize_declaration(&mut self) {
        loop {
            let kind = self.tokens.peek_kind();
            if matches!(kind, TokenKind::Eof | TokenKind::Process) || kind.is_type_keyword() {
                return;
            }
            if matches!(self.skip().kind, TokenKind::Semicolon) {
                return;
            }
        }
    }

    fn program(&mut self) {
        loop {
            let kind = self.tokens.peek_kind().clone();
            match kind {
                TokenKind::Eof => return,
                TokenKind::Process => self.process(),
                k if k.is_type_keyword() => {
                    if let Err(e) = self.global_declaration() {
                        self.report(e);
                        self.synchronize_declaration();
                    }
                }
                _ => {
                    let token = self.tokens.advance();
                    self.report(CompileError::at(
                        &token,
                        ErrorKind::Syntax("expected a global declaration or 'process'".into()),
                    ));
                    self.synchronize_declaration();
                }
            }
        }
    }

    // ---- Globals ----

    fn global_declaration(&mut self) -> Result<()> {
        let ty = match self.tokens.advance().kind {
            TokenKind::Bool => ValueType::Bool,
            TokenKind::Byte => ValueType::Byte,
            TokenKind::Int => ValueType::Int,
            _ => return self.state_declaration(),
        };
        let name_token = self.global_name("expected a variable name after the type")?;
        let name = ident(&name_token);

        let length = if self.tokens.match_kind(&TokenKind::LBracket) {
            let len_token = self.tokens.expect(&NUMBER, "expected the array length")?;
            self.tokens.expect(&TokenKind::RBracket, "expected ']' after the array length")?;
            match u16::try_from(number(&len_token)) {
                Ok(n) if n >= 1 => Some(n),
                _ => {
                    return Err(CompileError::at(
                        &len_token,
                        ErrorKind::OutOfRange("array length must be between 1 and 65535".into()),
                    ));
                }
            }
        } else {
            None
        };

        self.tokens.expect(&TokenKind::Assign, "expected '=' after the variable name")?;
        let value = self.initializer(ty, length.unwrap_or(1))?;
        self.tokens.expect(&TokenKind::Semicolon, "expected ';' after the declaration")?;

        let declared = match length {
            Some(n) => self.backend.table.declare_array(&name, value, n),
            None => self.backend.table.declare(&name, value),
        };
        declared.map_err(|e| CompileError::at(&name_token, e.into()))?;
        Ok(())
    }

    fn global_name(&mut self, message: &str) -> Result<Token> {
        let token = self.tokens.expect(&IDENT, message)?;
        let name = ident(&token);
        if is_temporary(&name) {
            return Err(CompileError::at(&token, ErrorKind::ReservedPrefix(name)));
        }
        if self.backend.state(&name).is_some() {
            return Err(CompileError::at(&token, ErrorKind::DuplicateGlobal(name)));
        }
        Ok(token)
    }

    /// A single literal, or a brace list whose length matches the array.
    fn initializer(&mut self, ty: ValueType, length: u16) -> Result<Value> {
        if !self.tokens.check(&TokenKind::LBrace) {
            return self.literal(ty, 0);
        }
        let open = self.tokens.advance();
        let first = self.literal(ty, 0)?;
        let mut count = 1usize;
        while self.tokens.match_kind(&TokenKind::Comma) {
            self.literal(ty, 0)?;
            count += 1;
        }
        self.tokens.expect(&TokenKind::RBrace, "expected '}' after the initializer list")?;
        if count != 1 && count != length as usize {
            return Err(CompileError::at(
                &open,
                ErrorKind::OutOfRange(format!("expected {length} initializers, found {count}")),
            ));
        }
        Ok(first)
    }

    fn literal(&mut self, ty: ValueType, state_count: u16) -> Result<Value> {
        let token = self.tokens.advance();
        let n = match &token.kind {
            TokenKind::Number(_) => number(&token),
            TokenKind::Minus => -number(&self.tokens.expect(&NUMBER, "expected a number after '-'")?),
            TokenKind::True => 1,
            TokenKind::False => 0,
            TokenKind::Ident(name) if ty == ValueType::State => match self.backend.state(name) {
                Some(v) => v as i32,
                None => {
                    return Err(CompileError::at(&token, ErrorKind::UndeclaredVariable(name.clone())));
                }
            },
            _ => return Err(CompileError::at(&token, ErrorKind::Syntax(format!("expected a {ty} literal")))),
        };
        Value::from_literal(ty, n, state_count)
            .map_err(|e| CompileError::at(&token, ErrorKind::OutOfRange(e.to_string())))
    }

    fn state_declaration(&mut self) -> Result<()> {
        self.tokens.expect(&TokenKind::LBrace, "expected '{' before the list of states")?;
        let mut states = Vec::new();
        loop {
            let name = self.tokens.expect(&IDENT, "expected a state name")?;
            self.tokens.expect(&TokenKind::LParen, "expected '(' before the state number")?;
            let value = self.tokens.expect(&NUMBER, "expected the state number")?;
            self.tokens.expect(&TokenKind::RParen, "expected ')' after the state number")?;
            states.push((name, value));
            if !self.tokens.match_kind(&TokenKind::Comma) {
                break;
            }
        }
        self.tokens.expect(&TokenKind::RBrace, "expected '}' after the list of states")?;

        let count = u16::try_from(states.len()).unwrap_or(u16::MAX);
        let mut used = Vec::with_capacity(states.len());
        for (name, value) in &states {
            let v = number(value);
            if v >= count as i32 {
                return Err(CompileError::at(
                    value,
                    ErrorKind::OutOfRange(format!("state number {v} must be below the state count {count}")),
                ));
            }
            if used.contains(&v) {
                return Err(CompileError::at(
                    value,
                    ErrorKind::OutOfRange(format!("state number {v} is already used")),
                ));
            }
            used.push(v);
            let state = ident(name);
            if self.backend.table.get(&state).is_some() || !self.backend.define_state(&state, v as u16) {
                return Err(CompileError::at(name, ErrorKind::DuplicateGlobal(state)));
            }
        }

        let name_token = self.global_name("expected a variable name after the list of states")?;
        self.tokens.expect(&TokenKind::Assign, "expected '=' after the variable name")?;
        let value = self.literal(ValueType::State, count)?;
        self.tokens.expect(&TokenKind::Semicolon, "expected ';' after the declaration")?;
        self.backend
            .table
            .declare(&ident(&name_token), value)
            .map_err(|e| CompileError::at(&name_token, e.into()))?;
        Ok(())
    }

    // ---- Processes ----

    fn process(&mut self) {
        let process_token = self.tokens.advance();
        let name = match self.tokens.expect(&IDENT, "expected a process name") {
            Ok(token) => ident(&token),
            Err(e) => {
                self.report(e);
                String::new()
            }
        };
        let start = self.backend.emitter.chunk().len();
        self.backend.reset();
        debug!(process = %name, start, "process begins");

        if self.section(&TokenKind::GuardBlock, "expected 'guardblock' to open the process") {
            self.assignments();
        }

        let mut site = None;
        if self.section(&TokenKind::GuardCondition, "expected 'guardcondition' after the guard block") {
            match self.condition() {
                Ok(s) => site = Some(s),
                Err(e) => {
                    self.report(e);
                    self.synchronize();
                }
            }
            if let Err(e) = self.tokens.expect(&TokenKind::Semicolon, "expected ';' after the guard condition") {
                self.report(e);
                self.synchronize();
                self.tokens.match_kind(&TokenKind::Semicolon);
            }
        }

        if self.section(&TokenKind::Effect, "expected 'effect' after the guard condition") {
            self.assignments();
        }

        if let Err(e) = self.backend.finish_process(site, &process_token) {
            self.report(e);
        }
        self.backend.reset();
        let len = self.backend.emitter.chunk().len() - start;
        debug!(process = %name, start, len, "process ends");
        self.processes.push(ProcessInfo { name, start, len });
    }

    /// Consume the keyword opening a section, recovering to it if needed.
    fn section(&mut self, keyword: &TokenKind, message: &str) -> bool {
        if self.tokens.match_kind(keyword) {
            return true;
        }
        let error = CompileError::at(self.tokens.peek(), ErrorKind::Syntax(message.to_string()));
        self.report(error);
        loop {
            let kind = self.tokens.peek_kind();
            if matches!(kind, TokenKind::Eof | TokenKind::Process) || kind.is_section_keyword() {
                break;
            }
            self.skip();
        }
        self.tokens.match_kind(keyword)
    }

    fn condition(&mut self) -> Result<usize> {
        let token = self.tokens.expect(&IDENT, "expected the temporary to test")?;
        let term = self.named_term(token)?;
        self.backend.guard(&term)
    }

    fn assignments(&mut self) {
        loop {
            if let Err(e) = self.assignment() {
                self.report(e);
                self.synchronize();
            }
            if self.tokens.match_kind(&TokenKind::Comma) {
                continue;
            }
            self.tokens.match_kind(&TokenKind::Semicolon);
            return;
        }
    }

    fn assignment(&mut self) -> Result<()> {
        let token = self.tokens.expect(&IDENT, "expected a variable to assign")?;
        let target = self.named_term(token)?;
        self.tokens.expect(&TokenKind::Assign, "expected '=' in the assignment")?;
        let expr = self.expression()?;
        // nothing is emitted for a statement that does not end cleanly
        if !matches!(self.tokens.peek_kind(), TokenKind::Comma | TokenKind::Semicolon) {
            return Err(CompileError::at(
                self.tokens.peek(),
                ErrorKind::Syntax("expected ',' or ';' after the assignment".into()),
            ));
        }
        self.backend.assign(&target, &expr)
    }

    fn expression(&mut self) -> Result<Expr> {
        if self.tokens.match_kind(&TokenKind::Not) {
            return Ok(Expr::Not(self.operand()?));
        }
        let lhs = self.operand()?;
        match binop(self.tokens.peek_kind()) {
            Some(op) => {
                self.tokens.advance();
                let rhs = self.operand()?;
                Ok(Expr::Binary(lhs, op, rhs))
            }
            None => Ok(Expr::Term(lhs)),
        }
    }

    fn operand(&mut self) -> Result<Term> {
        let token = self.tokens.advance();
        let kind = match &token.kind {
            TokenKind::Number(_) => TermKind::Literal(number(&token)),
            TokenKind::Minus => {
                let digits = self.tokens.expect(&NUMBER, "expected a number after '-'")?;
                TermKind::Literal(-number(&digits))
            }
            TokenKind::True => TermKind::Literal(1),
            TokenKind::False => TermKind::Literal(0),
            TokenKind::Ident(_) => return self.named_term(token),
            _ => return Err(CompileError::at(&token, ErrorKind::Syntax("expected an operand".into()))),
        };
        Ok(Term { kind, token })
    }

    /// Classify an identifier, reading an index if one follows.
    fn named_term(&mut self, token: Token) -> Result<Term> {
        let name = ident(&token);
        if self.tokens.match_kind(&TokenKind::LBracket) {
            let index = self.operand()?;
            self.tokens.expect(&TokenKind::RBracket, "expected ']' after the index")?;
            if is_temporary(&name) || self.backend.state(&name).is_some() {
                return Err(CompileError::at(&token, ErrorKind::NotAnArray(name)));
            }
            return Ok(Term { kind: TermKind::Element { array: name, index: Box::new(index) }, token });
        }
        let kind = if is_temporary(&name) {
            TermKind::Temp(name)
        } else if let Some(v) = self.backend.state(&name) {
            TermKind::State(v)
        } else {
            TermKind::Global(name)
        };
        Ok(Term { kind, token })
    }
}
