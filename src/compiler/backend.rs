//! Lowering of assignments, guard tests and process boundaries into
//! instructions. The backend owns every piece of state that outlives a
//! single statement: the global table, the emitter and the register file.

use std::collections::HashMap;

use tracing::debug;

use crate::bytecode::{BinaryOp, CodecError, Emitter, Instruction, Operand, Source, Target, LOAD_IMMEDIATE_BITS, MAX_SLOT_IMMEDIATE, SLOT_BITS};
use crate::lexer::Token;
use crate::register::{ADDRESS_REGISTER, RegisterError, RegisterFile};
use crate::table::Table;
use crate::value::{Value, ValueType};

use super::{CompileError, ErrorKind};

/// Name given to the temporaries that carry array elements.
const ELEMENT_SCRATCH: &str = "t_#elem";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Lt,
    Gt,
    Eq,
    NotEq,
    LessEq,
    GreaterEq,
}

impl BinOp {
    /// The opcode to emit and whether its result is negated afterwards.
    pub fn lower(self) -> (BinaryOp, bool) {
        match self {
            BinOp::Add => (BinaryOp::Add, false),
            BinOp::Sub => (BinaryOp::Sub, false),
            BinOp::Mul => (BinaryOp::Mul, false),
            BinOp::Div => (BinaryOp::Div, false),
            BinOp::Mod => (BinaryOp::Mod, false),
            BinOp::And => (BinaryOp::And, false),
            BinOp::Or => (BinaryOp::Or, false),
            BinOp::Lt => (BinaryOp::Lt, false),
            BinOp::Gt => (BinaryOp::Gt, false),
            BinOp::Eq => (BinaryOp::Eq, false),
            BinOp::NotEq => (BinaryOp::Eq, true),
            BinOp::LessEq => (BinaryOp::Gt, true),
            BinOp::GreaterEq => (BinaryOp::Lt, true),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TermKind {
    Literal(i32),
    State(u16),
    Global(String),
    Temp(String),
    Element { array: String, index: Box<Term> },
}

/// An operand or assignment target with the token that introduced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
    pub kind: TermKind,
    pub token: Token,
}

impl Term {
    fn constant(&self) -> Option<i32> {
        match self.kind {
            TermKind::Literal(n) => Some(n),
            TermKind::State(v) => Some(v as i32),
            _ => None,
        }
    }

    fn is_element(&self) -> bool {
        matches!(self.kind, TermKind::Element { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Term(Term),
    Not(Term),
    Binary(Term, BinOp, Term),
}

#[derive(Default)]
struct Operands {
    /// Registers read by the instruction being built.
    pinned: Vec<u8>,
    /// Temporaries released once their value has been read.
    consumed: Vec<u8>,
}

enum Shape {
    /// `LOAD IMM`, with the literal it came from.
    Immediate(u16, i32),
    Copy(u8),
    Negate(u8),
    Binary(BinaryOp, bool, Operand, Operand),
}

enum Dest<'a> {
    Global(&'a str, &'a Token),
    Temp(&'a str, &'a Token),
    Register(u8),
}

fn fail(token: &Token, kind: ErrorKind) -> CompileError {
    CompileError::at(token, kind)
}

fn located<E: Into<ErrorKind>>(token: &Token) -> impl Fn(E) -> CompileError + '_ {
    move |e| CompileError::at(token, e.into())
}

fn slot_immediate(n: i32, token: &Token) -> Result<Operand, CompileError> {
    if n < 0 {
        return Err(fail(
            token,
            ErrorKind::OutOfRange(format!("operand {n} is negative; operand immediates are 0..={MAX_SLOT_IMMEDIATE}")),
        ));
    }
    match u16::try_from(n) {
        Ok(v) if v <= MAX_SLOT_IMMEDIATE => Ok(Operand::Imm(v)),
        _ => Err(fail(
            token,
            ErrorKind::FieldOverflow(CodecError::FieldOverflow { field: "immediate", value: n as u32, bits: SLOT_BITS }),
        )),
    }
}

/// 16-bit `LOAD IMM` payload; negative values are two's complement.
fn load_immediate(n: i32, token: &Token) -> Result<u16, CompileError> {
    if let Ok(v) = i16::try_from(n) {
        return Ok(v as u16);
    }
    u16::try_from(n).map_err(|_| {
        fail(
            token,
            ErrorKind::FieldOverflow(CodecError::FieldOverflow {
                field: "imm",
                value: n as u32,
                bits: LOAD_IMMEDIATE_BITS,
            }),
        )
    })
}

pub struct Backend {
    pub table: Table,
    pub emitter: Emitter,
    pub registers: RegisterFile,
    states: HashMap<String, u16>,
}

impl Backend {
    pub fn new(registers: usize) -> Self {
        Backend {
            table: Table::new(),
            emitter: Emitter::new(),
            registers: RegisterFile::new(registers),
            states: HashMap::new(),
        }
    }

    pub fn state(&self, name: &str) -> Option<u16> {
        self.states.get(name).copied()
    }

    /// Record a state name. Returns false if the name is already taken.
    pub fn define_state(&mut self, name: &str, value: u16) -> bool {
        if self.states.contains_key(name) {
            return false;
        }
        self.states.insert(name.to_string(), value);
        true
    }

    fn emit(&mut self, instruction: Instruction, token: &Token) -> Result<usize, CompileError> {
        self.emitter.emit(instruction).map_err(located(token))
    }

    fn global(&mut self, name: &str, pinned: &[u8], token: &Token) -> Result<u8, CompileError> {
        match self.table.get(name) {
            None => return Err(fail(token, ErrorKind::UndeclaredVariable(name.to_string()))),
            Some(entry) if entry.is_array() => {
                return Err(fail(token, ErrorKind::MissingIndex(name.to_string())));
            }
            Some(_) => {}
        }
        self.registers
            .resolve_global(name, pinned, &mut self.table, &mut self.emitter)
            .map_err(located::<RegisterError>(token))
    }

    fn scratch(&mut self, token: &Token) -> Result<u8, CompileError> {
        let reg = self
            .registers
            .alloc_temp(&mut self.table, &mut self.emitter)
            .map_err(located::<RegisterError>(token))?;
        self.registers.bind_temp(reg, ELEMENT_SCRATCH);
        Ok(reg)
    }

    fn release(&mut self, consumed: &[u8]) {
        for &reg in consumed {
            self.registers.consume_temp(reg);
        }
    }

    fn operand(&mut self, term: &Term, ops: &mut Operands) -> Result<Operand, CompileError> {
        match &term.kind {
            TermKind::Literal(n) => slot_immediate(*n, &term.token),
            TermKind::State(v) => slot_immediate(*v as i32, &term.token),
            TermKind::Temp(name) => {
                let reg = self
                    .registers
                    .lookup_by_variable(name)
                    .ok_or_else(|| fail(&term.token, ErrorKind::UndefinedTemporary(name.clone())))?;
                ops.pinned.push(reg);
                ops.consumed.push(reg);
                Ok(Operand::Reg(reg))
            }
            TermKind::Global(name) => {
                let reg = self.global(name, &ops.pinned, &term.token)?;
                ops.pinned.push(reg);
                Ok(Operand::Reg(reg))
            }
            TermKind::Element { array, index } => {
                let ty = self.element_address(array, index, ops, &term.token)?;
                let reg = self.scratch(&term.token)?;
                self.emit(Instruction::Load { rd: reg, source: Source::Indirect(ADDRESS_REGISTER, ty) }, &term.token)?;
                ops.pinned.push(reg);
                ops.consumed.push(reg);
                Ok(Operand::Reg(reg))
            }
        }
    }

    /// Leave the address of `array[index]` in the address register and
    /// return the element type.
    fn element_address(
        &mut self,
        array: &str,
        index: &Term,
        ops: &mut Operands,
        token: &Token,
    ) -> Result<ValueType, CompileError> {
        let entry = self
            .table
            .get(array)
            .ok_or_else(|| fail(token, ErrorKind::UndeclaredVariable(array.to_string())))?;
        if !entry.is_array() {
            return Err(fail(token, ErrorKind::NotAnArray(array.to_string())));
        }
        let (base, length) = (entry.address, entry.length);
        let ty = entry
            .value
            .value_type()
            .ok_or_else(|| fail(token, ErrorKind::UndeclaredVariable(array.to_string())))?;

        let offset = match (&index.kind, index.constant()) {
            (_, Some(n)) => {
                if n < 0 || n >= length as i32 {
                    return Err(fail(
                        &index.token,
                        ErrorKind::OutOfRange(format!("index {n} is outside '{array}' of length {length}")),
                    ));
                }
                Operand::Imm(n as u16)
            }
            (TermKind::Element { .. }, _) => {
                return Err(fail(
                    &index.token,
                    ErrorKind::Syntax("an array index must be a literal or a variable".into()),
                ));
            }
            _ => self.operand(index, ops)?,
        };

        self.emit(
            Instruction::Binary { op: BinaryOp::Mul, rd: ADDRESS_REGISTER, lhs: Operand::Imm(ty.size() as u16), rhs: offset },
            token,
        )?;
        let base = u16::try_from(base)
            .ok()
            .filter(|b| *b <= MAX_SLOT_IMMEDIATE)
            .ok_or_else(|| {
                fail(
                    token,
                    ErrorKind::FieldOverflow(CodecError::FieldOverflow { field: "base", value: base, bits: SLOT_BITS }),
                )
            })?;
        self.emit(
            Instruction::Binary {
                op: BinaryOp::Add,
                rd: ADDRESS_REGISTER,
                lhs: Operand::Reg(ADDRESS_REGISTER),
                rhs: Operand::Imm(base),
            },
            token,
        )?;
        Ok(ty)
    }

    /// Check that literal `n` fits the type of global `name`.
    fn typed_literal(&self, name: &str, n: i32, token: &Token) -> Result<Value, CompileError> {
        let entry = self
            .table
            .get(name)
            .ok_or_else(|| fail(token, ErrorKind::UndeclaredVariable(name.to_string())))?;
        let (ty, count) = match entry.value {
            Value::State { count, .. } => (ValueType::State, count),
            other => (other.value_type().unwrap_or(ValueType::Int), 0),
        };
        Value::from_literal(ty, n, count).map_err(|e| fail(token, ErrorKind::OutOfRange(e.to_string())))
    }

    fn shape(&mut self, expr: &Expr, ops: &mut Operands) -> Result<Shape, CompileError> {
        let shape = match expr {
            Expr::Term(t) => match t.constant() {
                Some(n) => Shape::Immediate(load_immediate(n, &t.token)?, n),
                None => match self.operand(t, ops)? {
                    Operand::Reg(r) => Shape::Copy(r),
                    Operand::Imm(v) => Shape::Immediate(v, v as i32),
                },
            },
            Expr::Not(t) => match t.constant() {
                Some(n) => {
                    let folded = (n == 0) as i32;
                    Shape::Immediate(folded as u16, folded)
                }
                None => match self.operand(t, ops)? {
                    Operand::Reg(r) => Shape::Negate(r),
                    Operand::Imm(v) => Shape::Immediate((v == 0) as u16, (v == 0) as i32),
                },
            },
            Expr::Binary(lhs, op, rhs) => {
                let mut lowered = [Operand::Imm(0); 2];
                // Elements first: their scratch temporaries may evict globals.
                for elements in [true, false] {
                    for (slot, term) in [lhs, rhs].into_iter().enumerate() {
                        if term.is_element() == elements {
                            lowered[slot] = self.operand(term, ops)?;
                        }
                    }
                }
                let (opcode, negate) = op.lower();
                Shape::Binary(opcode, negate, lowered[0], lowered[1])
            }
        };
        Ok(shape)
    }

    fn lower(&mut self, expr: &Expr, dest: Dest<'_>, token: &Token) -> Result<u8, CompileError> {
        let mut ops = Operands::default();
        if let Dest::Register(r) = dest {
            ops.pinned.push(r);
        }
        let shape = self.shape(expr, &mut ops)?;
        self.release(&ops.consumed);

        let rd = match dest {
            Dest::Register(r) => r,
            Dest::Global(name, at) => {
                let literal = match shape {
                    Shape::Immediate(_, n) => Some(self.typed_literal(name, n, at)?),
                    _ => None,
                };
                let rd = self.global(name, &ops.pinned, at)?;
                if let Some(value) = literal {
                    self.registers.set_value(rd, value);
                }
                rd
            }
            Dest::Temp(name, at) => match self.registers.lookup_by_variable(name) {
                Some(r) => r,
                None => {
                    let r = self
                        .registers
                        .alloc_temp(&mut self.table, &mut self.emitter)
                        .map_err(located::<RegisterError>(at))?;
                    self.registers.bind_temp(r, name);
                    r
                }
            },
        };

        match shape {
            Shape::Immediate(v, _) => {
                self.emit(Instruction::Load { rd, source: Source::Immediate(v) }, token)?;
            }
            Shape::Copy(ra) if ra == rd => {}
            Shape::Copy(ra) => {
                self.emit(Instruction::Load { rd, source: Source::Register(ra) }, token)?;
            }
            Shape::Negate(ra) => {
                self.emit(Instruction::Not { rd, ra }, token)?;
            }
            Shape::Binary(op, negate, lhs, rhs) => {
                self.emit(Instruction::Binary { op, rd, lhs, rhs }, token)?;
                if negate {
                    self.emit(Instruction::Not { rd, ra: rd }, token)?;
                }
            }
        }
        Ok(rd)
    }

    /// Compile `target = expr`.
    pub fn assign(&mut self, target: &Term, expr: &Expr) -> Result<(), CompileError> {
        match &target.kind {
            TermKind::Global(name) => self.lower(expr, Dest::Global(name, &target.token), &target.token).map(drop),
            TermKind::Temp(name) => self.lower(expr, Dest::Temp(name, &target.token), &target.token).map(drop),
            TermKind::Element { array, index } => {
                if let Expr::Term(t) = expr {
                    if let Some(n) = t.constant() {
                        self.typed_literal(array, n, &t.token)?;
                    }
                }
                let value = self.scratch(&target.token)?;
                self.lower(expr, Dest::Register(value), &target.token)?;
                let mut ops = Operands { pinned: vec![value], consumed: Vec::new() };
                let ty = self.element_address(array, index, &mut ops, &target.token)?;
                self.emit(
                    Instruction::Store { rs: value, target: Target::Indirect(ADDRESS_REGISTER), ty },
                    &target.token,
                )?;
                ops.consumed.push(value);
                self.release(&ops.consumed);
                Ok(())
            }
            TermKind::Literal(_) | TermKind::State(_) => Err(fail(
                &target.token,
                ErrorKind::Syntax("only variables and array elements can be assigned".into()),
            )),
        }
    }

    /// Emit the guard test on temporary `cond` and return the jump to patch.
    pub fn guard(&mut self, cond: &Term) -> Result<usize, CompileError> {
        let TermKind::Temp(name) = &cond.kind else {
            return Err(fail(&cond.token, ErrorKind::GuardNotTemporary(cond.token.kind.lexeme())));
        };
        let reg = self
            .registers
            .lookup_by_variable(name)
            .ok_or_else(|| fail(&cond.token, ErrorKind::UndefinedTemporary(name.clone())))?;
        let site = self.emitter.reserve_jump(reg).map_err(located(&cond.token))?;
        self.registers.consume_temp(reg);
        debug!(temp = %name, reg, site, "guard jump reserved");
        Ok(site)
    }

    /// Commit cached globals, point the guard jump here and close the process.
    pub fn finish_process(&mut self, site: Option<usize>, token: &Token) -> Result<(), CompileError> {
        self.registers
            .flush(&mut self.table, &mut self.emitter)
            .map_err(located::<RegisterError>(token))?;
        if let Some(site) = site {
            self.emitter.patch_jump(site).map_err(located(token))?;
        }
        self.emit(Instruction::EndGa, token)?;
        Ok(())
    }

    /// Forget register bindings and restart the program counter.
    pub fn reset(&mut self) {
        self.registers.reset();
        self.emitter.reset_pc();
    }
}
