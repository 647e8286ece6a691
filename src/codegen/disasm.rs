//! Human-readable listings of compiled chunks and the global table.

use std::fmt::Write;

use crate::bytecode::{Chunk, Instruction, Operand, Source, Target, decode};
use crate::compiler::ProcessInfo;
use crate::table::Table;

fn operand(o: Operand) -> String {
    match o {
        Operand::Reg(r) => format!("r{r}"),
        Operand::Imm(v) => format!("#{v}"),
    }
}

fn config(lhs: Operand, rhs: Operand) -> &'static str {
    match (lhs, rhs) {
        (Operand::Reg(_), Operand::Reg(_)) => "RR",
        (Operand::Reg(_), Operand::Imm(_)) => "RI",
        (Operand::Imm(_), Operand::Reg(_)) => "IR",
        (Operand::Imm(_), Operand::Imm(_)) => "II",
    }
}

/// Mnemonic, configuration and fields of one instruction.
pub fn format_instruction(instruction: &Instruction) -> String {
    match *instruction {
        Instruction::Nop => "NOP".to_string(),
        Instruction::EndGa => "ENDGA".to_string(),
        Instruction::Binary { op, rd, lhs, rhs } => format!(
            "{:<6} {:<4} r{rd}, {}, {}",
            op.mnemonic(),
            config(lhs, rhs),
            operand(lhs),
            operand(rhs)
        ),
        Instruction::Not { rd, ra } => format!("{:<6} {:<4} r{rd}, r{ra}", "NOT", ""),
        Instruction::Jmp { rd, target } => format!("{:<6} {:<4} r{rd}, {target}", "JMP", ""),
        Instruction::Store { rs, target: Target::Address(addr), ty } => {
            format!("{:<6} {:<4} r{rs} -> @{addr} {ty}", "STORE", "ADR")
        }
        Instruction::Store { rs, target: Target::Indirect(ra), ty } => {
            format!("{:<6} {:<4} r{rs} -> [r{ra}] {ty}", "STORE", "RAA")
        }
        Instruction::Load { rd, source } => match source {
            Source::Register(ra) => format!("{:<6} {:<4} r{rd} <- r{ra}", "LOAD", "REG"),
            Source::Immediate(v) => format!("{:<6} {:<4} r{rd} <- #{v}", "LOAD", "IMM"),
            Source::Address(addr, ty) => format!("{:<6} {:<4} r{rd} <- @{addr} {ty}", "LOAD", "ADR"),
            Source::Indirect(ra, ty) => format!("{:<6} {:<4} r{rd} <- [r{ra}] {ty}", "LOAD", "RAA"),
        },
    }
}

/// Words that do not decode print as raw `.word` directives.
pub fn disassemble_word(word: u32) -> String {
    match decode(word) {
        Ok(instruction) => format_instruction(&instruction),
        Err(_) => format!(".word {word:#010x}"),
    }
}

/// One line per word, with a header before the first word of each process.
/// The offset column is process-relative, matching jump targets.
pub fn disassemble(chunk: &Chunk, processes: &[ProcessInfo]) -> String {
    let mut out = String::new();
    let mut base = 0;
    for (index, &word) in chunk.words().iter().enumerate() {
        if let Some(p) = processes.iter().find(|p| p.start == index && p.len > 0) {
            let _ = writeln!(out, "== process {} ==", p.name);
            base = index;
        }
        let offset = (index - base) * 4;
        let _ = writeln!(out, "{index:04} {offset:>5}  {word:08x}  {}", disassemble_word(word));
    }
    out
}

/// Globals ordered by address.
pub fn format_table(table: &Table) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:>7}  {:<5}  {:<16}  value", "address", "type", "name");
    for entry in table.entries() {
        let ty = entry.value.value_type().map(|t| t.name()).unwrap_or("nil");
        let name = if entry.is_array() { format!("{}[{}]", entry.key, entry.length) } else { entry.key.clone() };
        let _ = writeln!(out, "{:>7}  {:<5}  {:<16}  {}", entry.address, ty, name, entry.value);
    }
    let _ = writeln!(out, "{} bytes", table.address_space());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{BinaryOp, encode};
    use crate::compiler::{Options, compile};
    use crate::value::ValueType;

    fn word(i: Instruction) -> u32 {
        encode(&i).unwrap()
    }

    #[test]
    fn formats_each_layout() {
        let add = Instruction::Binary { op: BinaryOp::Add, rd: 14, lhs: Operand::Reg(14), rhs: Operand::Imm(1) };
        assert_eq!(disassemble_word(word(add)), "ADD    RI   r14, r14, #1");
        assert_eq!(disassemble_word(word(Instruction::Jmp { rd: 0, target: 20 })), "JMP         r0, 20");
        assert_eq!(
            disassemble_word(word(Instruction::Load { rd: 14, source: Source::Address(0, ValueType::Int) })),
            "LOAD   ADR  r14 <- @0 int"
        );
        assert_eq!(
            disassemble_word(word(Instruction::Store { rs: 0, target: Target::Indirect(15), ty: ValueType::Byte })),
            "STORE  RAA  r0 -> [r15] byte"
        );
        assert_eq!(disassemble_word(word(Instruction::EndGa)), "ENDGA");
    }

    #[test]
    fn undecodable_word_is_raw() {
        // NOP with stray operand bits
        assert_eq!(disassemble_word(0x0000_0001), ".word 0x00000001");
    }

    #[test]
    fn listing_has_process_headers() {
        let src = "int x = 5;\n\
                   process a guardblock t_a = 1; guardcondition t_a; effect x = x + 1;\n\
                   process b guardblock t_b = x; guardcondition t_b; effect x = 0;";
        let c = compile(src, Options::default());
        assert!(c.succeeded(), "{:?}", c.errors);
        let listing = disassemble(&c.chunk, &c.processes);
        let lines: Vec<&str> = listing.lines().collect();
        assert_eq!(lines[0], "== process a ==");
        assert!(lines[1].starts_with("0000     0  "), "{}", lines[1]);
        assert!(lines[2].ends_with("JMP         r0, 20"), "{}", lines[2]);
        let b = lines.iter().position(|l| *l == "== process b ==").unwrap();
        assert!(lines[b + 1].starts_with("0006     0  "), "{}", lines[b + 1]);
        assert_eq!(lines.len(), c.chunk.len() + 2);
    }

    #[test]
    fn table_listing() {
        let c = compile("int x = -2;\nbyte buf[3] = {1, 2, 3};\nbool f = true;", Options::default());
        assert!(c.succeeded(), "{:?}", c.errors);
        let text = format_table(&c.table);
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[1].contains("int") && lines[1].contains(" x ") && lines[1].ends_with("-2"));
        assert!(lines[2].trim_start().starts_with('2') && lines[2].contains("buf[3]"));
        assert!(lines[3].trim_start().starts_with('5') && lines[3].ends_with("true"));
        assert_eq!(lines[4], "6 bytes");
    }
}
