pub mod binary;
pub mod disasm;
