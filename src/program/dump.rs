use std::fmt::{self, Write};

use super::{Instruction, Opcode, Operand, Program};
use crate::value::{DataType, Value};

fn constant(out: &mut String, value: &Value) -> fmt::Result {
    match value {
        Value::Null => out.write_str("<null>"),
        Value::String(s) => write!(out, "{s:?}"),
        Value::Array(_) => out.write_str("<array>"),
        Value::HashMap(_) => out.write_str("<hashmap>"),
        Value::Object(_) => out.write_str("<object>"),
        other => write!(out, "{other}"),
    }
}

fn operand(out: &mut String, instr: &Instruction) -> fmt::Result {
    match (&instr.opcode, &instr.operand) {
        (Opcode::CallExternal | Opcode::CallMethod | Opcode::SafeCallMethod, Operand::Identifier(name)) => {
            write!(out, "{name}, {}", instr.stack_items)
        }
        (Opcode::Call, Operand::Address(a)) => write!(out, "{a:04X}, {}", instr.stack_items),
        (Opcode::CallIndirect, _) => write!(out, "{}", instr.stack_items),
        (_, Operand::Address(a)) => write!(out, "{a:04X}"),
        (_, Operand::Function { name, address }) => write!(out, "{name}, {address:04X}"),
        (_, Operand::Identifier(name)) => out.write_str(name),
        (_, Operand::Constant(v)) => constant(out, v),
        (_, Operand::Range(lo, hi)) => {
            constant(out, lo)?;
            out.write_str(" .. ")?;
            constant(out, hi)
        }
        (_, Operand::Int32(v)) => write!(out, "{v}"),
        (_, Operand::UInt32(v)) => write!(out, "{v}"),
        (_, Operand::Int64(v)) => write!(out, "{v}"),
        (_, Operand::UInt64(v)) => write!(out, "{v}"),
        (Opcode::Pop | Opcode::HashMapSet, Operand::None) => write!(out, "{}", instr.stack_items),
        (Opcode::Cast, Operand::None) => {
            let ty = DataType::from_code(instr.stack_items).map_or("?", DataType::name);
            write!(out, "[{ty}]")
        }
        _ => Ok(()),
    }
}

impl Program {
    /// Human-readable listing, one instruction per line:
    /// hex address, mnemonic, operand.
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        for (addr, instr) in self.instructions.iter().enumerate() {
            let _ = write!(out, "{addr:04X}  {:<6}  ", instr.opcode.mnemonic());
            let _ = operand(&mut out, instr);
            let trimmed = out.trim_end_matches(' ').len();
            out.truncate(trimmed);
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_format() {
        let mut p = Program::new();
        p.emit(Instruction::new(Opcode::PushConstant, Operand::Constant(Value::from("hi")), 1));
        p.emit(Instruction::new(Opcode::CallExternal, Operand::Identifier("print".into()), 1).with_items(1));
        p.emit(Instruction::new(Opcode::Jz, Operand::Address(0x1A), 2));
        p.emit(Instruction::new(Opcode::Cast, Operand::None, 2).with_items(DataType::Int64.code()));
        p.emit(Instruction::new(Opcode::Pop, Operand::None, 2).with_items(2));
        p.emit(Instruction::new(Opcode::Call, Operand::Address(3), 3).with_items(2));
        p.emit(Instruction::new(Opcode::PushConstant, Operand::Constant(Value::Null), 3));
        p.emit(Instruction::new(Opcode::RetNull, Operand::None, 3));

        let text = p.disassemble();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "0000  PUSHC   \"hi\"");
        assert_eq!(lines[1], "0001  CALLX   print, 1");
        assert_eq!(lines[2], "0002  JZ      001A");
        assert_eq!(lines[3], "0003  CAST    [int64]");
        assert_eq!(lines[4], "0004  POP     2");
        assert_eq!(lines[5], "0005  CALL    0003, 2");
        assert_eq!(lines[6], "0006  PUSHC   <null>");
        assert_eq!(lines[7], "0007  RETN");
    }
}
