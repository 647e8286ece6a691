pub mod bytecode;
pub mod codegen;
pub mod compiler;
pub mod diagnostic;
pub mod lexer;
pub mod register;
pub mod source_map;
pub mod table;
pub mod value;
