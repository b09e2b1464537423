//! Kestrel: an embeddable scripting language. Source text is compiled in a
//! single pass to bytecode ([`compiler`], [`program`]) and executed by a
//! stack machine ([`vm`]) over copy-on-write values ([`value`]).

pub mod compiler;
pub mod diagnostic;
pub mod lexer;
pub mod program;
pub mod value;
pub mod vm;

pub use compiler::{CompileError, Compiler, compile};
pub use program::Program;
pub use value::Value;
pub use vm::{Environment, ErrorCode, RuntimeError, Vm, VmConfig};
