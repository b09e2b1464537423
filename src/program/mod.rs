//! Compiled bytecode: instruction stream, function table, constants.

pub mod dump;
pub mod opcode;
pub mod optimize;

use std::collections::BTreeMap;
use std::rc::Rc;

pub use opcode::Opcode;

use crate::value::Value;

/// Placeholder for jump targets that are patched later, and the
/// instruction pointer value of a VM that stopped on an error.
pub const INVALID_ADDRESS: usize = usize::MAX;

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    None,
    Identifier(Rc<str>),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Address(usize),
    Constant(Value),
    Range(Value, Value),
    /// Expression variable: name plus the address of the code computing it.
    Function { name: Rc<str>, address: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operand: Operand,
    pub line: u32,
    /// Argument count, pop count, cast target or flag, depending on the opcode.
    pub stack_items: i32,
}

impl Instruction {
    pub fn new(opcode: Opcode, operand: Operand, line: u32) -> Self {
        Instruction { opcode, operand, line, stack_items: 0 }
    }

    pub fn with_items(mut self, stack_items: i32) -> Self {
        self.stack_items = stack_items;
        self
    }

    pub fn address(&self) -> Option<usize> {
        if !self.opcode.carries_address() {
            return None;
        }
        match self.operand {
            Operand::Address(a) | Operand::Function { address: a, .. } => Some(a),
            _ => None,
        }
    }

    pub fn address_mut(&mut self) -> Option<&mut usize> {
        if !self.opcode.carries_address() {
            return None;
        }
        match &mut self.operand {
            Operand::Address(a) | Operand::Function { address: a, .. } => Some(a),
            _ => None,
        }
    }

    pub fn identifier(&self) -> Option<&Rc<str>> {
        match &self.operand {
            Operand::Identifier(name) | Operand::Function { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Shifts the address operand by `offset` (module linking).
    pub fn relocate(&mut self, offset: usize) {
        if let Some(a) = self.address_mut() {
            if *a != INVALID_ADDRESS {
                *a += offset;
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub name: String,
    pub address: usize,
}

/// Output of the compiler; loadable into any number of VMs.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub(crate) instructions: Vec<Instruction>,
    pub(crate) functions: Vec<Function>,
    pub(crate) constants: BTreeMap<String, Value>,
    pub(crate) required_modules: Vec<String>,
}

impl Program {
    pub fn new() -> Self {
        Program::default()
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    pub fn function_address(&self, name: &str) -> Option<usize> {
        self.functions.iter().find(|f| f.name == name).map(|f| f.address)
    }

    pub fn constants(&self) -> &BTreeMap<String, Value> {
        &self.constants
    }

    pub fn required_modules(&self) -> &[String] {
        &self.required_modules
    }

    pub(crate) fn emit(&mut self, instruction: Instruction) -> usize {
        self.instructions.push(instruction);
        self.instructions.len() - 1
    }

    /// Points the jump at `at` to `target`.
    pub(crate) fn patch(&mut self, at: usize, target: usize) {
        if let Some(a) = self.instructions.get_mut(at).and_then(Instruction::address_mut) {
            *a = target;
        }
    }

    /// Registers a function; `false` if the name is already taken.
    pub(crate) fn add_function(&mut self, name: &str, address: usize) -> bool {
        if self.function_address(name).is_some() {
            return false;
        }
        self.functions.push(Function { name: name.to_string(), address });
        true
    }

    /// Rewrites external calls to script functions defined in this program
    /// into direct calls. Returns the names that stayed external.
    pub fn resolve_functions(&mut self) -> Vec<(String, u32)> {
        let mut unresolved = Vec::new();
        for i in 0..self.instructions.len() {
            if self.instructions[i].opcode != Opcode::CallExternal {
                continue;
            }
            let Some(name) = self.instructions[i].identifier().cloned() else { continue };
            match self.function_address(&name) {
                Some(address) => {
                    let instr = &mut self.instructions[i];
                    instr.opcode = Opcode::Call;
                    instr.operand = Operand::Address(address);
                }
                None => unresolved.push((name.to_string(), self.instructions[i].line)),
            }
        }
        unresolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jmp(to: usize) -> Instruction {
        Instruction::new(Opcode::Jmp, Operand::Address(to), 1)
    }

    #[test]
    fn relocate_moves_addresses_only() {
        let mut j = jmp(3);
        j.relocate(10);
        assert_eq!(j.address(), Some(13));

        let mut call = Instruction::new(Opcode::CallExternal, Operand::Identifier("f".into()), 1);
        call.relocate(10);
        assert_eq!(call.operand, Operand::Identifier("f".into()));

        let mut x = Instruction::new(Opcode::PushExprVar, Operand::Function { name: "a".into(), address: 2 }, 1);
        x.relocate(5);
        assert_eq!(x.address(), Some(7));
    }

    #[test]
    fn resolve_rewrites_known_calls() {
        let mut p = Program::new();
        p.emit(Instruction::new(Opcode::CallExternal, Operand::Identifier("f".into()), 1).with_items(0));
        p.emit(Instruction::new(Opcode::CallExternal, Operand::Identifier("g".into()), 2).with_items(0));
        p.emit(Instruction::new(Opcode::RetNull, Operand::None, 3));
        assert!(p.add_function("f", 2));
        assert!(!p.add_function("f", 0));

        let unresolved = p.resolve_functions();
        assert_eq!(unresolved, vec![("g".to_string(), 2)]);
        assert_eq!(p.instructions()[0].opcode, Opcode::Call);
        assert_eq!(p.instructions()[0].address(), Some(2));
    }
}
