//! Two-stack register allocator.
//!
//! One register file is shared by temporaries, growing up from index 0, and
//! cached globals, growing down from the last general register. `top_temp` is
//! the next slot a temporary takes; `top_glob` is the next slot a global may be
//! cached in. Registers above `top_glob` mirror globals and are written back to
//! memory whenever they are repurposed.

use tracing::debug;

use crate::bytecode::{CodecError, Emitter, Instruction, Source, Target};
use crate::table::{Table, TableError};
use crate::value::{Value, ValueType};

/// Largest general register file; one more index is left for addressing.
pub const MAX_REGISTERS: usize = 15;
/// Holds effective addresses for array element access.
pub const ADDRESS_REGISTER: u8 = 15;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Register {
    pub number: u8,
    pub name: Option<String>,
    pub value: Value,
    /// Set while the register caches a global.
    pub address: Option<u32>,
}

impl Register {
    fn new(number: u8) -> Self {
        Register { number, ..Register::default() }
    }

    pub fn is_free(&self) -> bool {
        self.name.is_none()
    }

    pub fn caches_global(&self) -> bool {
        self.address.is_some()
    }

    fn clear(&mut self) {
        self.name = None;
        self.value = Value::Nil;
        self.address = None;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegisterError {
    #[error("register file exhausted")]
    RegisterExhausted,
    #[error("'{0}' is not a declared global")]
    Undeclared(String),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

#[derive(Debug, Clone)]
pub struct RegisterFile {
    registers: Vec<Register>,
    top_temp: usize,
    top_glob: usize,
}

impl RegisterFile {
    /// `count` general registers, clamped to `2..=MAX_REGISTERS`.
    pub fn new(count: usize) -> Self {
        let count = count.clamp(2, MAX_REGISTERS);
        RegisterFile {
            registers: (0..count as u8).map(Register::new).collect(),
            top_temp: 0,
            top_glob: count - 1,
        }
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    pub fn top_temp(&self) -> usize {
        self.top_temp
    }

    pub fn top_glob(&self) -> usize {
        self.top_glob
    }

    pub fn registers(&self) -> &[Register] {
        &self.registers
    }

    /// Claim the next temporary slot, spilling a global cached there.
    pub fn alloc_temp(&mut self, table: &mut Table, emitter: &mut Emitter) -> Result<u8, RegisterError> {
        let n = self.registers.len();
        if self.top_temp + 1 == n {
            return Err(RegisterError::RegisterExhausted);
        }
        let slot = self.top_temp;
        if self.registers[slot].caches_global() {
            self.spill(slot, table, emitter)?;
        }
        if self.top_temp == self.top_glob {
            self.top_glob += 1;
        }
        self.top_temp += 1;
        debug!(slot, top_temp = self.top_temp, top_glob = self.top_glob, "temporary allocated");
        Ok(slot as u8)
    }

    /// Release the most recent temporary. Its value is dead; nothing is stored.
    pub fn free_temp(&mut self) {
        if self.top_temp == 0 {
            return;
        }
        self.top_temp -= 1;
        self.registers[self.top_temp].clear();
    }

    /// Name the temporary in `slot`.
    pub fn bind_temp(&mut self, slot: u8, name: &str) {
        if let Some(reg) = self.registers.get_mut(slot as usize) {
            reg.name = Some(name.to_string());
            reg.address = None;
            reg.value = Value::Nil;
        }
    }

    /// Mark the temporary in `slot` dead and pop every dead slot off the top
    /// of the temporary stack.
    pub fn consume_temp(&mut self, slot: u8) {
        let slot = slot as usize;
        if slot < self.top_temp {
            self.registers[slot].name = None;
        }
        while self.top_temp > 0 && self.registers[self.top_temp - 1].is_free() {
            self.free_temp();
        }
    }

    /// Register caching or holding `name`, if any.
    pub fn lookup_by_variable(&self, name: &str) -> Option<u8> {
        self.registers
            .iter()
            .find(|r| r.name.as_deref() == Some(name))
            .map(|r| r.number)
    }

    /// Return a register holding global `name`, loading it if needed.
    /// Registers listed in `pinned` are operands of the instruction being
    /// built and are never chosen for a swap.
    pub fn resolve_global(
        &mut self,
        name: &str,
        pinned: &[u8],
        table: &mut Table,
        emitter: &mut Emitter,
    ) -> Result<u8, RegisterError> {
        if let Some(reg) = self.lookup_by_variable(name) {
            debug!(name, reg, "cache hit");
            return Ok(reg);
        }
        let entry = table.get(name).ok_or_else(|| RegisterError::Undeclared(name.to_string()))?;
        let (value, address) = (entry.value, entry.address);

        let n = self.registers.len();
        if self.top_temp != self.top_glob && !pinned.contains(&(self.top_glob as u8)) {
            let slot = self.top_glob;
            self.bind_global(slot, name, value, address, table, emitter)?;
            if self.top_glob > 0 {
                self.top_glob -= 1;
            }
            debug!(name, slot, top_glob = self.top_glob, "global cached");
            return Ok(slot as u8);
        }

        // No free cache slot: swap through a register above `top_glob`, or
        // `top_glob` itself when it is the last one.
        let near_end = self.top_glob + 1 >= n;
        let start = if near_end { self.top_glob } else { self.top_glob + 1 };
        let slot = (start..n)
            .find(|&i| !pinned.contains(&(i as u8)))
            .ok_or(RegisterError::RegisterExhausted)?;
        self.bind_global(slot, name, value, address, table, emitter)?;
        debug!(name, slot, near_end, "global swapped through");
        Ok(slot as u8)
    }

    fn bind_global(
        &mut self,
        slot: usize,
        name: &str,
        value: Value,
        address: u32,
        table: &mut Table,
        emitter: &mut Emitter,
    ) -> Result<(), RegisterError> {
        if self.registers[slot].caches_global() {
            self.spill(slot, table, emitter)?;
        }
        let ty = value.value_type().ok_or_else(|| RegisterError::Undeclared(name.to_string()))?;
        emitter.emit(Instruction::Load { rd: slot as u8, source: Source::Address(address, ty) })?;
        let reg = &mut self.registers[slot];
        reg.name = Some(name.to_string());
        reg.value = value;
        reg.address = Some(address);
        Ok(())
    }

    /// Write a cached global back to memory and unbind the register.
    pub fn spill(&mut self, slot: usize, table: &mut Table, emitter: &mut Emitter) -> Result<(), RegisterError> {
        self.write_back(slot, table, emitter)?;
        self.registers[slot].clear();
        Ok(())
    }

    fn write_back(&self, slot: usize, table: &mut Table, emitter: &mut Emitter) -> Result<(), RegisterError> {
        let reg = &self.registers[slot];
        let (Some(name), Some(address)) = (reg.name.as_deref(), reg.address) else {
            return Ok(());
        };
        let ty = match reg.value.value_type() {
            Some(ty) => ty,
            None => stored_type(table, name)?,
        };
        emitter.emit(Instruction::Store { rs: slot as u8, target: Target::Address(address), ty })?;
        if !reg.value.is_nil() {
            table.update(name, reg.value)?;
        }
        debug!(name, slot, address, "spilled");
        Ok(())
    }

    /// Store every cached global back to memory. Bindings are kept.
    pub fn flush(&mut self, table: &mut Table, emitter: &mut Emitter) -> Result<usize, RegisterError> {
        let mut stored = 0;
        for slot in 0..self.registers.len() {
            if self.registers[slot].caches_global() {
                self.write_back(slot, table, emitter)?;
                stored += 1;
            }
        }
        debug!(stored, "flushed cached globals");
        Ok(stored)
    }

    /// Record `value` as the cached contents of `slot`.
    pub fn set_value(&mut self, slot: u8, value: Value) {
        if let Some(reg) = self.registers.get_mut(slot as usize) {
            reg.value = value;
        }
    }

    /// Forget every binding and restore both stack pointers.
    pub fn reset(&mut self) {
        for reg in &mut self.registers {
            reg.clear();
        }
        self.top_temp = 0;
        self.top_glob = self.registers.len() - 1;
    }
}

fn stored_type(table: &Table, name: &str) -> Result<ValueType, RegisterError> {
    table
        .get(name)
        .and_then(|e| e.value.value_type())
        .ok_or_else(|| RegisterError::Undeclared(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(globals: &[(&str, Value)]) -> (Table, Emitter) {
        let mut table = Table::new();
        for (name, value) in globals {
            table.declare(name, *value).unwrap();
        }
        (table, Emitter::new())
    }

    fn code(emitter: &Emitter) -> Vec<Instruction> {
        (0..emitter.chunk().len()).map(|i| emitter.instruction(i).unwrap()).collect()
    }

    #[test]
    fn temporaries_are_lifo() {
        let (mut table, mut em) = setup(&[]);
        let mut regs = RegisterFile::new(15);
        let a = regs.alloc_temp(&mut table, &mut em).unwrap();
        let b = regs.alloc_temp(&mut table, &mut em).unwrap();
        regs.free_temp();
        let c = regs.alloc_temp(&mut table, &mut em).unwrap();
        assert_eq!((a, b, c), (0, 1, 1));
        assert!(em.chunk().is_empty());
    }

    #[test]
    fn at_most_n_minus_one_temporaries() {
        let (mut table, mut em) = setup(&[]);
        let mut regs = RegisterFile::new(15);
        for expected in 0..14 {
            assert_eq!(regs.alloc_temp(&mut table, &mut em), Ok(expected));
        }
        assert_eq!(regs.alloc_temp(&mut table, &mut em), Err(RegisterError::RegisterExhausted));
    }

    #[test]
    fn cache_hit_emits_nothing() {
        let (mut table, mut em) = setup(&[("x", Value::Int(5))]);
        let mut regs = RegisterFile::new(15);
        let r = regs.resolve_global("x", &[], &mut table, &mut em).unwrap();
        assert_eq!(r, 14);
        assert_eq!(regs.top_glob(), 13);
        assert_eq!(regs.resolve_global("x", &[], &mut table, &mut em), Ok(14));
        assert_eq!(code(&em), [Instruction::Load { rd: 14, source: Source::Address(0, ValueType::Int) }]);
    }

    #[test]
    fn undeclared_global() {
        let (mut table, mut em) = setup(&[]);
        let mut regs = RegisterFile::new(15);
        assert_eq!(
            regs.resolve_global("ghost", &[], &mut table, &mut em),
            Err(RegisterError::Undeclared("ghost".into()))
        );
    }

    #[test]
    fn eviction_spills_then_reload_loads() {
        let (mut table, mut em) = setup(&[("a", Value::Int(1)), ("x", Value::Int(5))]);
        let mut regs = RegisterFile::new(4);
        assert_eq!(regs.resolve_global("a", &[], &mut table, &mut em), Ok(3));
        let x = regs.resolve_global("x", &[], &mut table, &mut em).unwrap();
        assert_eq!(x, 2);
        regs.set_value(x, Value::Int(42));

        for _ in 0..3 {
            regs.alloc_temp(&mut table, &mut em).unwrap();
        }
        assert_eq!(regs.lookup_by_variable("x"), None);
        assert_eq!(table.lookup("x"), Ok((Value::Int(42), 2)));
        assert!(code(&em).contains(&Instruction::Store {
            rs: 2,
            target: Target::Address(2),
            ty: ValueType::Int
        }));

        let before = em.chunk().len();
        let again = regs.resolve_global("x", &[], &mut table, &mut em).unwrap();
        let tail = &code(&em)[before..];
        assert_eq!(
            tail.last(),
            Some(&Instruction::Load { rd: again, source: Source::Address(2, ValueType::Int) })
        );
    }

    #[test]
    fn full_cache_swaps_through_working_register() {
        let globals = [("a", Value::Byte(1)), ("b", Value::Byte(2)), ("c", Value::Byte(3)), ("d", Value::Byte(4))];
        let (mut table, mut em) = setup(&globals);
        let mut regs = RegisterFile::new(4);
        for (name, expected) in [("a", 3), ("b", 2), ("c", 1)] {
            assert_eq!(regs.resolve_global(name, &[], &mut table, &mut em), Ok(expected));
        }
        assert_eq!(regs.top_glob(), 0);

        assert_eq!(regs.resolve_global("d", &[], &mut table, &mut em), Ok(1));
        assert_eq!(regs.top_glob(), 0);
        assert_eq!(
            &code(&em)[3..],
            [
                Instruction::Store { rs: 1, target: Target::Address(2), ty: ValueType::Byte },
                Instruction::Load { rd: 1, source: Source::Address(3, ValueType::Byte) },
            ]
        );

        // pinned registers are skipped
        assert_eq!(regs.resolve_global("c", &[1], &mut table, &mut em), Ok(2));
        assert_eq!(regs.lookup_by_variable("b"), None);
        assert_eq!(regs.resolve_global("a", &[0, 1, 2, 3], &mut table, &mut em), Ok(3));
    }

    #[test]
    fn last_register_swaps_when_temporaries_fill_the_rest() {
        let (mut table, mut em) = setup(&[("x", Value::Int(5)), ("y", Value::Int(7))]);
        let mut regs = RegisterFile::new(3);
        assert_eq!(regs.alloc_temp(&mut table, &mut em), Ok(0));
        assert_eq!(regs.alloc_temp(&mut table, &mut em), Ok(1));
        assert_eq!(regs.top_temp(), regs.top_glob());

        assert_eq!(regs.resolve_global("x", &[], &mut table, &mut em), Ok(2));
        assert_eq!(regs.top_glob(), 2);
        assert_eq!(code(&em), [Instruction::Load { rd: 2, source: Source::Address(0, ValueType::Int) }]);

        assert_eq!(regs.resolve_global("y", &[], &mut table, &mut em), Ok(2));
        assert_eq!(regs.top_glob(), 2);
        assert_eq!(regs.lookup_by_variable("x"), None);
        assert_eq!(
            &code(&em)[1..],
            [
                Instruction::Store { rs: 2, target: Target::Address(0), ty: ValueType::Int },
                Instruction::Load { rd: 2, source: Source::Address(2, ValueType::Int) },
            ]
        );
    }

    #[test]
    fn no_working_register_left() {
        let (mut table, mut em) = setup(&[("a", Value::Int(0)), ("b", Value::Int(0))]);
        let mut regs = RegisterFile::new(2);
        assert_eq!(regs.resolve_global("a", &[], &mut table, &mut em), Ok(1));
        assert_eq!(
            regs.resolve_global("b", &[1], &mut table, &mut em),
            Err(RegisterError::RegisterExhausted)
        );
    }

    #[test]
    fn flush_stores_every_cached_global() {
        let (mut table, mut em) = setup(&[("x", Value::Int(5)), ("y", Value::Bool(false))]);
        let mut regs = RegisterFile::new(15);
        let x = regs.resolve_global("x", &[], &mut table, &mut em).unwrap();
        let y = regs.resolve_global("y", &[], &mut table, &mut em).unwrap();
        regs.set_value(y, Value::Bool(true));
        assert_eq!(regs.flush(&mut table, &mut em), Ok(2));
        assert_eq!(
            &code(&em)[2..],
            [
                Instruction::Store { rs: y, target: Target::Address(2), ty: ValueType::Bool },
                Instruction::Store { rs: x, target: Target::Address(0), ty: ValueType::Int },
            ]
        );
        assert_eq!(table.lookup("y"), Ok((Value::Bool(true), 2)));
    }

    #[test]
    fn consume_pops_dead_temporaries() {
        let (mut table, mut em) = setup(&[]);
        let mut regs = RegisterFile::new(15);
        let a = regs.alloc_temp(&mut table, &mut em).unwrap();
        regs.bind_temp(a, "t_a");
        let b = regs.alloc_temp(&mut table, &mut em).unwrap();
        regs.bind_temp(b, "t_b");

        regs.consume_temp(a);
        assert_eq!(regs.top_temp(), 2);
        regs.consume_temp(b);
        assert_eq!(regs.top_temp(), 0);
        assert_eq!(regs.lookup_by_variable("t_a"), None);
    }

    #[test]
    fn reset_restores_pointers() {
        let (mut table, mut em) = setup(&[("x", Value::Int(5))]);
        let mut regs = RegisterFile::new(8);
        regs.resolve_global("x", &[], &mut table, &mut em).unwrap();
        regs.alloc_temp(&mut table, &mut em).unwrap();
        regs.reset();
        assert_eq!((regs.top_temp(), regs.top_glob()), (0, 7));
        assert!(regs.registers().iter().all(Register::is_free));
    }
}
