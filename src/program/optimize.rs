use super::{Instruction, Opcode, Operand, Program};

impl Program {
    /// Peephole pass: past-the-end jumps become `RetNull`, jump chains are
    /// collapsed, and jumps to the next instruction are removed.
    pub fn optimize(&mut self) {
        self.retarget_past_end();
        self.collapse_jump_chains();
        while self.remove_jumps_to_next() {}
    }

    fn retarget_past_end(&mut self) {
        let len = self.instructions.len();
        for instr in &mut self.instructions {
            if instr.opcode == Opcode::Jmp && instr.address().is_some_and(|a| a >= len) {
                instr.opcode = Opcode::RetNull;
                instr.operand = Operand::None;
            }
        }
    }

    fn collapse_jump_chains(&mut self) {
        let len = self.instructions.len();
        for i in 0..len {
            let instr = &self.instructions[i];
            if !(instr.opcode.is_jump() || instr.opcode == Opcode::Catch) {
                continue;
            }
            let Some(mut target) = instr.address() else { continue };
            let mut hops = 0;
            while target < len && hops < len {
                let next = &self.instructions[target];
                if next.opcode != Opcode::Jmp {
                    break;
                }
                match next.address() {
                    Some(a) if a != target => target = a,
                    _ => break,
                }
                hops += 1;
            }
            self.patch(i, target);
        }
    }

    fn remove_jumps_to_next(&mut self) -> bool {
        let mut changed = false;
        let mut i = 0;
        while i < self.instructions.len() {
            let instr = &self.instructions[i];
            if !(instr.opcode.is_jump() && instr.address() == Some(i + 1)) {
                i += 1;
                continue;
            }
            let (opcode, line) = (instr.opcode, instr.line);
            changed = true;
            match opcode {
                // the condition is still on the stack
                Opcode::Jz | Opcode::Jnz => {
                    self.instructions[i] = Instruction::new(Opcode::Pop, Operand::None, line).with_items(1);
                    i += 1;
                }
                _ => self.remove_instruction(i),
            }
        }
        changed
    }

    fn remove_instruction(&mut self, index: usize) {
        self.instructions.remove(index);
        for instr in &mut self.instructions {
            if let Some(a) = instr.address_mut() {
                if *a > index {
                    *a -= 1;
                }
            }
        }
        for f in &mut self.functions {
            if f.address > index {
                f.address -= 1;
            }
        }
    }
}
