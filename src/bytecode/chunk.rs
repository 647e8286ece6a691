use tracing::trace;

use super::{CodecError, Instruction, OP_JMP, WORD_SIZE, decode, encode, opcode_of, with_jump_target};

/// Append-only buffer of encoded instructions.
///
/// Capacity is tracked explicitly so growth is deterministic: the first write
/// allocates 8 words and every later growth doubles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chunk {
    code: Vec<u32>,
    capacity: usize,
}

impl Chunk {
    pub fn new() -> Self {
        Chunk::default()
    }

    pub fn from_words(words: Vec<u32>) -> Self {
        let capacity = words.len();
        Chunk { code: words, capacity }
    }

    pub fn write(&mut self, word: u32) -> usize {
        if self.capacity < self.code.len() + 1 {
            self.capacity = grow_capacity(self.capacity);
            self.code.reserve_exact(self.capacity - self.code.len());
        }
        let idx = self.code.len();
        self.code.push(word);
        idx
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn words(&self) -> &[u32] {
        &self.code
    }

    pub fn get(&self, index: usize) -> Option<u32> {
        self.code.get(index).copied()
    }

    /// Overwrite the target field of the JMP word at `index`.
    pub fn patch_jump(&mut self, index: usize, target: u32) -> Result<(), CodecError> {
        let word = self.get(index).ok_or(CodecError::PatchOutOfRange { index })?;
        if opcode_of(word) != OP_JMP {
            return Err(CodecError::NotAJump { index });
        }
        self.code[index] = with_jump_target(word, target)?;
        Ok(())
    }
}

fn grow_capacity(capacity: usize) -> usize {
    if capacity < 8 { 8 } else { capacity * 2 }
}

/// Writes instructions into a chunk and mirrors the byte-granular program
/// counter of the process being compiled.
#[derive(Debug, Default)]
pub struct Emitter {
    chunk: Chunk,
    pc: u32,
}

impl Emitter {
    pub fn new() -> Self {
        Emitter::default()
    }

    pub fn emit(&mut self, instruction: Instruction) -> Result<usize, CodecError> {
        let word = encode(&instruction)?;
        let idx = self.chunk.write(word);
        trace!(idx, pc = self.pc, word = format_args!("{word:#010x}"), ?instruction, "emit");
        self.pc += WORD_SIZE;
        Ok(idx)
    }

    /// Emit a JMP testing `rd` with a zero target and return its index.
    pub fn reserve_jump(&mut self, rd: u8) -> Result<usize, CodecError> {
        self.emit(Instruction::Jmp { rd, target: 0 })
    }

    /// Point the jump at `site` to the current program counter.
    pub fn patch_jump(&mut self, site: usize) -> Result<(), CodecError> {
        self.chunk.patch_jump(site, self.pc)?;
        trace!(site, target = self.pc, "patched jump");
        Ok(())
    }

    pub fn pc(&self) -> u32 {
        self.pc
    }

    pub fn reset_pc(&mut self) {
        self.pc = 0;
    }

    pub fn chunk(&self) -> &Chunk {
        &self.chunk
    }

    /// Decoded view of the word at `index`.
    pub fn instruction(&self, index: usize) -> Option<Instruction> {
        self.chunk.get(index).and_then(|w| decode(w).ok())
    }

    pub fn into_chunk(self) -> Chunk {
        self.chunk
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{BinaryOp, Operand};

    #[test]
    fn new_chunk_is_empty() {
        let chunk = Chunk::new();
        assert_eq!(chunk.len(), 0);
        assert_eq!(chunk.capacity(), 0);
        assert!(chunk.words().is_empty());
    }

    #[test]
    fn first_write_grows_to_eight() {
        let mut chunk = Chunk::new();
        chunk.write(0xFF);
        assert_eq!(chunk.len(), 1);
        assert_eq!(chunk.capacity(), 8);
        assert_eq!(chunk.get(0), Some(0xFF));
    }

    #[test]
    fn writes_within_capacity_do_not_grow() {
        let mut chunk = Chunk::new();
        for w in 1..=3 {
            chunk.write(w);
        }
        assert_eq!(chunk.len(), 3);
        assert_eq!(chunk.capacity(), 8);
    }

    #[test]
    fn ninth_write_doubles() {
        let mut chunk = Chunk::new();
        for w in 1..=8 {
            chunk.write(w);
        }
        assert_eq!(chunk.capacity(), 8);
        chunk.write(0xFF);
        assert_eq!(chunk.len(), 9);
        assert_eq!(chunk.capacity(), 16);
        assert_eq!(chunk.words(), &[1, 2, 3, 4, 5, 6, 7, 8, 0xFF]);
        for w in 0..8 {
            chunk.write(w);
        }
        assert_eq!(chunk.len(), 17);
        assert_eq!(chunk.capacity(), 32);
    }

    #[test]
    fn patch_only_touches_jumps() {
        let mut emitter = Emitter::new();
        emitter
            .emit(Instruction::Binary { op: BinaryOp::Add, rd: 1, lhs: Operand::Reg(1), rhs: Operand::Imm(1) })
            .unwrap();
        let site = emitter.reserve_jump(3).unwrap();
        emitter.emit(Instruction::EndGa).unwrap();
        assert_eq!(emitter.pc(), 12);

        emitter.patch_jump(site).unwrap();
        assert_eq!(emitter.instruction(site), Some(Instruction::Jmp { rd: 3, target: 12 }));
        assert_eq!(emitter.chunk().len(), 3);

        assert_eq!(emitter.patch_jump(0), Err(CodecError::NotAJump { index: 0 }));
        assert_eq!(emitter.patch_jump(7), Err(CodecError::PatchOutOfRange { index: 7 }));
    }

    #[test]
    fn reset_pc_keeps_the_chunk() {
        let mut emitter = Emitter::new();
        emitter.emit(Instruction::Nop).unwrap();
        emitter.reset_pc();
        assert_eq!(emitter.pc(), 0);
        assert_eq!(emitter.chunk().len(), 1);
    }
}
