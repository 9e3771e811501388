pub mod alu;
pub mod bus;
pub mod config;
pub mod cpu;
pub mod decoder;
pub mod diagnostics;
pub mod error;
pub mod instructions;
pub mod interrupt;
pub mod io;
pub mod memory;
pub mod modrm;
pub mod registers;
