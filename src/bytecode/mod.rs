pub mod chunk;

pub use chunk::{Chunk, Emitter};

use crate::value::ValueType;

// ── Opcodes (4 bits) ─────────────────────────────────────────────────
//
// Narrow layout, NOP and the ten binary operators (opcode < 11):
//   [OP:4 | CFG:2 | RD:4 | A:11 | B:11]
//   A and B hold either an immediate or a register index zero-padded to 11 bits.
//
// Wide layout, NOT / JMP / STORE / LOAD:
//   [OP:4 | CFG:2 | TYPE:2 | RD:4 | PAYLOAD:20]
//   PAYLOAD holds an address, a 16-bit immediate, or a register index.
//
// ENDGA carries no operands. Every bit outside the fields used by a given
// opcode/config is zero.

pub const OP_NOP: u32 = 0x0;
pub const OP_ADD: u32 = 0x1;
pub const OP_SUB: u32 = 0x2;
pub const OP_MUL: u32 = 0x3;
pub const OP_DIV: u32 = 0x4;
pub const OP_MOD: u32 = 0x5;
pub const OP_AND: u32 = 0x6;
pub const OP_OR: u32 = 0x7;
pub const OP_LT: u32 = 0x8;
pub const OP_GT: u32 = 0x9;
pub const OP_EQ: u32 = 0xA;
pub const OP_NOT: u32 = 0xB;
pub const OP_JMP: u32 = 0xC;
pub const OP_STORE: u32 = 0xD;
pub const OP_LOAD: u32 = 0xE;
pub const OP_ENDGA: u32 = 0xF;

// Binary operand configurations
pub const CFG_RR: u32 = 0b00;
pub const CFG_RI: u32 = 0b01;
pub const CFG_IR: u32 = 0b10;
pub const CFG_II: u32 = 0b11;

// LOAD configurations
pub const LOAD_REG: u32 = 0b00;
pub const LOAD_IMM: u32 = 0b01;
pub const LOAD_ADR: u32 = 0b10;
pub const LOAD_RAA: u32 = 0b11;

// STORE configurations
pub const STORE_ADR: u32 = 0b00;
pub const STORE_RAA: u32 = 0b01;

pub const REGISTER_BITS: u32 = 4;
pub const SLOT_BITS: u32 = 11;
pub const ADDRESS_BITS: u32 = 20;
pub const LOAD_IMMEDIATE_BITS: u32 = 16;

/// Largest immediate a binary operand slot can hold.
pub const MAX_SLOT_IMMEDIATE: u16 = (1 << SLOT_BITS) - 1;
/// Largest byte address or jump target.
pub const MAX_ADDRESS: u32 = (1 << ADDRESS_BITS) - 1;

/// Size of one encoded instruction in bytes.
pub const WORD_SIZE: u32 = 4;

const PAYLOAD_MASK: u32 = MAX_ADDRESS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
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
}

impl BinaryOp {
    pub const ALL: [BinaryOp; 10] = [
        BinaryOp::Add,
        BinaryOp::Sub,
        BinaryOp::Mul,
        BinaryOp::Div,
        BinaryOp::Mod,
        BinaryOp::And,
        BinaryOp::Or,
        BinaryOp::Lt,
        BinaryOp::Gt,
        BinaryOp::Eq,
    ];

    pub fn opcode(self) -> u32 {
        match self {
            BinaryOp::Add => OP_ADD,
            BinaryOp::Sub => OP_SUB,
            BinaryOp::Mul => OP_MUL,
            BinaryOp::Div => OP_DIV,
            BinaryOp::Mod => OP_MOD,
            BinaryOp::And => OP_AND,
            BinaryOp::Or => OP_OR,
            BinaryOp::Lt => OP_LT,
            BinaryOp::Gt => OP_GT,
            BinaryOp::Eq => OP_EQ,
        }
    }

    pub fn from_opcode(op: u32) -> Option<BinaryOp> {
        BinaryOp::ALL.into_iter().find(|b| b.opcode() == op)
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            BinaryOp::Add => "ADD",
            BinaryOp::Sub => "SUB",
            BinaryOp::Mul => "MUL",
            BinaryOp::Div => "DIV",
            BinaryOp::Mod => "MOD",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Lt => "LT",
            BinaryOp::Gt => "GT",
            BinaryOp::Eq => "EQ",
        }
    }
}

/// One side of a binary operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Reg(u8),
    Imm(u16),
}

/// Where a LOAD takes its value from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Register(u8),
    Immediate(u16),
    Address(u32, ValueType),
    /// The address is held in a register.
    Indirect(u8, ValueType),
}

/// Where a STORE writes its register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Address(u32),
    Indirect(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Nop,
    Binary { op: BinaryOp, rd: u8, lhs: Operand, rhs: Operand },
    Not { rd: u8, ra: u8 },
    /// Branch to `target` when register `rd` is false.
    Jmp { rd: u8, target: u32 },
    Store { rs: u8, target: Target, ty: ValueType },
    Load { rd: u8, source: Source },
    EndGa,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("{field} value {value} does not fit in {bits} bits")]
    FieldOverflow { field: &'static str, value: u32, bits: u32 },
    #[error("word {word:#010x} uses an unknown configuration")]
    UnknownConfig { word: u32 },
    #[error("word {word:#010x} has bits set outside its fields")]
    ReservedBits { word: u32 },
    #[error("instruction {index} is not a jump")]
    NotAJump { index: usize },
    #[error("no instruction at index {index}")]
    PatchOutOfRange { index: usize },
}

fn field(name: &'static str, value: u32, bits: u32) -> Result<u32, CodecError> {
    if value >> bits != 0 {
        return Err(CodecError::FieldOverflow { field: name, value, bits });
    }
    Ok(value)
}

fn reg(name: &'static str, r: u8) -> Result<u32, CodecError> {
    field(name, r as u32, REGISTER_BITS)
}

#[inline]
fn narrow(op: u32, cfg: u32, rd: u32, a: u32, b: u32) -> u32 {
    op << 28 | cfg << 26 | rd << 22 | a << 11 | b
}

#[inline]
fn wide(op: u32, cfg: u32, ty: u32, rd: u32, payload: u32) -> u32 {
    op << 28 | cfg << 26 | ty << 24 | rd << 20 | payload
}

/// Encode one instruction. Fails rather than truncating when a field is too
/// narrow for its value.
pub fn encode(instruction: &Instruction) -> Result<u32, CodecError> {
    let word = match *instruction {
        Instruction::Nop => OP_NOP << 28,
        Instruction::EndGa => OP_ENDGA << 28,
        Instruction::Binary { op, rd, lhs, rhs } => {
            let rd = reg("rd", rd)?;
            let (cfg, a, b) = match (lhs, rhs) {
                (Operand::Reg(ra), Operand::Reg(rb)) => (CFG_RR, reg("ra", ra)?, reg("rb", rb)?),
                (Operand::Reg(ra), Operand::Imm(ib)) => {
                    (CFG_RI, reg("ra", ra)?, field("immb", ib as u32, SLOT_BITS)?)
                }
                (Operand::Imm(ia), Operand::Reg(rb)) => {
                    (CFG_IR, field("imma", ia as u32, SLOT_BITS)?, reg("rb", rb)?)
                }
                (Operand::Imm(ia), Operand::Imm(ib)) => (
                    CFG_II,
                    field("imma", ia as u32, SLOT_BITS)?,
                    field("immb", ib as u32, SLOT_BITS)?,
                ),
            };
            narrow(op.opcode(), cfg, rd, a, b)
        }
        Instruction::Not { rd, ra } => wide(OP_NOT, 0, 0, reg("rd", rd)?, reg("ra", ra)?),
        Instruction::Jmp { rd, target } => {
            wide(OP_JMP, 0, 0, reg("rd", rd)?, field("target", target, ADDRESS_BITS)?)
        }
        Instruction::Store { rs, target, ty } => {
            let rs = reg("rs", rs)?;
            match target {
                Target::Address(addr) => {
                    wide(OP_STORE, STORE_ADR, ty.tag(), rs, field("addr", addr, ADDRESS_BITS)?)
                }
                Target::Indirect(ra) => wide(OP_STORE, STORE_RAA, ty.tag(), rs, reg("ra", ra)?),
            }
        }
        Instruction::Load { rd, source } => {
            let rd = reg("rd", rd)?;
            match source {
                Source::Register(ra) => wide(OP_LOAD, LOAD_REG, 0, rd, reg("ra", ra)?),
                Source::Immediate(imm) => {
                    wide(OP_LOAD, LOAD_IMM, 0, rd, field("imm", imm as u32, LOAD_IMMEDIATE_BITS)?)
                }
                Source::Address(addr, ty) => {
                    wide(OP_LOAD, LOAD_ADR, ty.tag(), rd, field("addr", addr, ADDRESS_BITS)?)
                }
                Source::Indirect(ra, ty) => wide(OP_LOAD, LOAD_RAA, ty.tag(), rd, reg("ra", ra)?),
            }
        }
    };
    Ok(word)
}

/// Decode one word. Every word `encode` produces decodes back to the same
/// instruction; any other word is rejected.
pub fn decode(word: u32) -> Result<Instruction, CodecError> {
    let op = word >> 28;
    let cfg = (word >> 26) & 0b11;

    let instruction = match op {
        OP_NOP => Instruction::Nop,
        OP_ENDGA => Instruction::EndGa,
        OP_NOT..=OP_LOAD => {
            let ty = (word >> 24) & 0b11;
            let rd = ((word >> 20) & 0xF) as u8;
            let payload = word & PAYLOAD_MASK;
            let low_reg = (payload & 0xF) as u8;
            let value_type = ValueType::from_tag(ty).ok_or(CodecError::UnknownConfig { word })?;
            match (op, cfg) {
                (OP_NOT, 0) => Instruction::Not { rd, ra: low_reg },
                (OP_JMP, 0) => Instruction::Jmp { rd, target: payload },
                (OP_STORE, STORE_ADR) => {
                    Instruction::Store { rs: rd, target: Target::Address(payload), ty: value_type }
                }
                (OP_STORE, STORE_RAA) => {
                    Instruction::Store { rs: rd, target: Target::Indirect(low_reg), ty: value_type }
                }
                (OP_LOAD, LOAD_REG) => Instruction::Load { rd, source: Source::Register(low_reg) },
                (OP_LOAD, LOAD_IMM) => {
                    Instruction::Load { rd, source: Source::Immediate((payload & 0xFFFF) as u16) }
                }
                (OP_LOAD, LOAD_ADR) => {
                    Instruction::Load { rd, source: Source::Address(payload, value_type) }
                }
                (OP_LOAD, LOAD_RAA) => {
                    Instruction::Load { rd, source: Source::Indirect(low_reg, value_type) }
                }
                _ => return Err(CodecError::UnknownConfig { word }),
            }
        }
        _ => {
            let Some(bin) = BinaryOp::from_opcode(op) else {
                return Err(CodecError::UnknownConfig { word });
            };
            let rd = ((word >> 22) & 0xF) as u8;
            let a = (word >> 11) & 0x7FF;
            let b = word & 0x7FF;
            let (lhs, rhs) = match cfg {
                CFG_RR => (Operand::Reg((a & 0xF) as u8), Operand::Reg((b & 0xF) as u8)),
                CFG_RI => (Operand::Reg((a & 0xF) as u8), Operand::Imm(b as u16)),
                CFG_IR => (Operand::Imm(a as u16), Operand::Reg((b & 0xF) as u8)),
                _ => (Operand::Imm(a as u16), Operand::Imm(b as u16)),
            };
            Instruction::Binary { op: bin, rd, lhs, rhs }
        }
    };

    // Fields were masked on the way out; re-encoding exposes any stray bits.
    if encode(&instruction)? != word {
        return Err(CodecError::ReservedBits { word });
    }
    Ok(instruction)
}

/// Replace the target of the JMP word `word`, keeping every other field.
pub fn with_jump_target(word: u32, target: u32) -> Result<u32, CodecError> {
    let target = field("target", target, ADDRESS_BITS)?;
    Ok((word & !PAYLOAD_MASK) | target)
}

pub fn opcode_of(word: u32) -> u32 {
    word >> 28
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rt(instruction: Instruction) -> u32 {
        let word = encode(&instruction).unwrap();
        assert_eq!(decode(word).unwrap(), instruction, "word {word:#034b}");
        word
    }

    #[test]
    fn binary_rr_layout() {
        for op in BinaryOp::ALL {
            let word = rt(Instruction::Binary { op, rd: 15, lhs: Operand::Reg(1), rhs: Operand::Reg(2) });
            // cfg 00 | rd 1111 | ra 00000000001 | rb 00000000010
            assert_eq!(word, op.opcode() << 28 | 0b0011110000000000100000000010);
        }
    }

    #[test]
    fn binary_ri_layout() {
        for op in BinaryOp::ALL {
            let word = rt(Instruction::Binary { op, rd: 15, lhs: Operand::Reg(1), rhs: Operand::Imm(255) });
            assert_eq!(word, op.opcode() << 28 | 0b0111110000000000100011111111);
        }
    }

    #[test]
    fn binary_ir_layout() {
        for op in BinaryOp::ALL {
            let word = rt(Instruction::Binary { op, rd: 15, lhs: Operand::Imm(255), rhs: Operand::Reg(2) });
            assert_eq!(word, op.opcode() << 28 | 0b1011110001111111100000000010);
        }
    }

    #[test]
    fn binary_ii_layout() {
        for op in BinaryOp::ALL {
            let word = rt(Instruction::Binary { op, rd: 15, lhs: Operand::Imm(255), rhs: Operand::Imm(255) });
            assert_eq!(word, op.opcode() << 28 | 0b1111110001111111100011111111);
        }
    }

    #[test]
    fn register_and_immediate_share_slot_padding() {
        let as_reg = encode(&Instruction::Binary {
            op: BinaryOp::Add,
            rd: 0,
            lhs: Operand::Reg(3),
            rhs: Operand::Reg(0),
        })
        .unwrap();
        let as_imm = encode(&Instruction::Binary {
            op: BinaryOp::Add,
            rd: 0,
            lhs: Operand::Imm(3),
            rhs: Operand::Reg(0),
        })
        .unwrap();
        // Same slot bits, told apart only by the configuration.
        assert_eq!(as_reg & 0x03FF_FFFF, as_imm & 0x03FF_FFFF);
        assert_ne!(as_reg, as_imm);
    }

    #[test]
    fn load_layouts() {
        let reg = rt(Instruction::Load { rd: 15, source: Source::Register(12) });
        assert_eq!(reg, OP_LOAD << 28 | LOAD_REG << 26 | 15 << 20 | 12);

        let imm = rt(Instruction::Load { rd: 15, source: Source::Immediate(255) });
        assert_eq!(imm, OP_LOAD << 28 | LOAD_IMM << 26 | 15 << 20 | 255);

        let adr = rt(Instruction::Load { rd: 15, source: Source::Address(25255, ValueType::Int) });
        assert_eq!(adr, OP_LOAD << 28 | LOAD_ADR << 26 | 0b10 << 24 | 15 << 20 | 25255);

        let raa = rt(Instruction::Load { rd: 3, source: Source::Indirect(15, ValueType::Byte) });
        assert_eq!(raa, OP_LOAD << 28 | LOAD_RAA << 26 | 0b01 << 24 | 3 << 20 | 15);
    }

    #[test]
    fn store_configurations_are_disjoint() {
        let adr = rt(Instruction::Store { rs: 4, target: Target::Address(0x1234), ty: ValueType::State });
        assert_eq!(adr, OP_STORE << 28 | STORE_ADR << 26 | 0b11 << 24 | 4 << 20 | 0x1234);

        let raa = rt(Instruction::Store { rs: 4, target: Target::Indirect(15), ty: ValueType::Bool });
        assert_eq!(raa, OP_STORE << 28 | STORE_RAA << 26 | 4 << 20 | 15);
    }

    #[test]
    fn jump_not_and_operandless() {
        let jmp = rt(Instruction::Jmp { rd: 2, target: 40 });
        assert_eq!(jmp, OP_JMP << 28 | 2 << 20 | 40);
        let not = rt(Instruction::Not { rd: 7, ra: 9 });
        assert_eq!(not, OP_NOT << 28 | 7 << 20 | 9);
        assert_eq!(rt(Instruction::Nop), 0);
        assert_eq!(rt(Instruction::EndGa), 0xF000_0000);
    }

    #[test]
    fn overflow_is_rejected() {
        let too_wide = Instruction::Binary { op: BinaryOp::Add, rd: 0, lhs: Operand::Reg(0), rhs: Operand::Imm(2048) };
        assert_eq!(
            encode(&too_wide),
            Err(CodecError::FieldOverflow { field: "immb", value: 2048, bits: 11 })
        );
        let bad_reg = Instruction::Not { rd: 16, ra: 0 };
        assert!(matches!(encode(&bad_reg), Err(CodecError::FieldOverflow { field: "rd", .. })));
        let far = Instruction::Load { rd: 0, source: Source::Address(1 << 20, ValueType::Int) };
        assert!(matches!(encode(&far), Err(CodecError::FieldOverflow { field: "addr", .. })));
    }

    #[test]
    fn stray_bits_are_rejected() {
        // NOP with a register field set
        assert_eq!(decode(0x0000_0001), Err(CodecError::ReservedBits { word: 1 }));
        // RR with a bit set in the padding of slot A
        let word = encode(&Instruction::Binary {
            op: BinaryOp::Sub,
            rd: 1,
            lhs: Operand::Reg(1),
            rhs: Operand::Reg(1),
        })
        .unwrap();
        assert!(matches!(decode(word | 1 << 20), Err(CodecError::ReservedBits { .. })));
        // JMP with a non-zero configuration
        assert!(matches!(decode(OP_JMP << 28 | 0b01 << 26), Err(CodecError::UnknownConfig { .. })));
    }

    #[test]
    fn jump_target_patch_keeps_other_fields() {
        let word = encode(&Instruction::Jmp { rd: 9, target: 0 }).unwrap();
        let patched = with_jump_target(word, 96).unwrap();
        assert_eq!(decode(patched).unwrap(), Instruction::Jmp { rd: 9, target: 96 });
        assert!(with_jump_target(word, 1 << 20).is_err());
    }

    #[test]
    fn random_instructions_round_trip() {
        let mut rng = fastrand::Rng::with_seed(0x5d7u64);
        let ty = |rng: &mut fastrand::Rng| ValueType::ALL[rng.usize(..4)];
        let operand = |rng: &mut fastrand::Rng| {
            if rng.bool() { Operand::Reg(rng.u8(..16)) } else { Operand::Imm(rng.u16(..=MAX_SLOT_IMMEDIATE)) }
        };
        for _ in 0..2000 {
            let instruction = match rng.u8(..7) {
                0 => Instruction::Binary {
                    op: BinaryOp::ALL[rng.usize(..10)],
                    rd: rng.u8(..16),
                    lhs: operand(&mut rng),
                    rhs: operand(&mut rng),
                },
                1 => Instruction::Not { rd: rng.u8(..16), ra: rng.u8(..16) },
                2 => Instruction::Jmp { rd: rng.u8(..16), target: rng.u32(..=MAX_ADDRESS) },
                3 => Instruction::Store {
                    rs: rng.u8(..16),
                    target: if rng.bool() {
                        Target::Address(rng.u32(..=MAX_ADDRESS))
                    } else {
                        Target::Indirect(rng.u8(..16))
                    },
                    ty: ty(&mut rng),
                },
                4 => Instruction::Load {
                    rd: rng.u8(..16),
                    source: match rng.u8(..4) {
                        0 => Source::Register(rng.u8(..16)),
                        1 => Source::Immediate(rng.u16(..)),
                        2 => Source::Address(rng.u32(..=MAX_ADDRESS), ty(&mut rng)),
                        _ => Source::Indirect(rng.u8(..16), ty(&mut rng)),
                    },
                },
                5 => Instruction::Nop,
                _ => Instruction::EndGa,
            };
            rt(instruction);
        }
    }
}
