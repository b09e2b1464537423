use super::{BlockKind, Parser, Result};
use crate::lexer::Token;
use crate::program::{Opcode, Operand};
use crate::value::{Value, ops};

impl Parser<'_> {
    /// Definitions that only make sense outside any block, otherwise a
    /// statement of `$main`.
    pub(super) fn top_level(&mut self) -> Result {
        match self.peek()? {
            Some(Token::Function) => self.function_definition(),
            Some(Token::Use) => self.use_module(),
            Some(Token::Const) => self.constant_definition(),
            Some(Token::With) => self.expression_variables(),
            _ => self.statement(),
        }
    }

    fn function_definition(&mut self) -> Result {
        self.advance()?;
        let name = self.expect_ident()?;
        self.push_jump(Opcode::Jmp);
        let address = self.here();
        if !self.program.add_function(&name, address) {
            return Err(self.error(format!("duplicate function '{name}'")));
        }

        self.expect(&Token::LParen, "'('")?;
        if !self.at(&Token::RParen)? {
            loop {
                let param = self.expect_ident()?;
                self.emit_name(Opcode::Bind, &param);
                if !self.eat(&Token::Comma)? {
                    break;
                }
            }
        }
        self.expect(&Token::RParen, "')'")?;
        self.block()?;
        self.emit_op(Opcode::RetNull);
        self.patch_pending();
        Ok(())
    }

    fn use_module(&mut self) -> Result {
        self.advance()?;
        let name = self.expect_ident()?;
        self.expect_semicolon()?;
        if !self.program.required_modules.iter().any(|m| **m == *name) {
            self.program.required_modules.push(name.to_string());
        }
        Ok(())
    }

    fn constant_definition(&mut self) -> Result {
        self.advance()?;
        loop {
            let name = self.expect_ident()?;
            self.expect(&Token::Assign, "'='")?;
            let value = self.literal()?;
            if self.program.constants.contains_key(&*name) {
                return Err(self.error(format!("constant '{name}' is already defined")));
            }
            self.program.constants.insert(name.to_string(), value);
            if !self.eat(&Token::Comma)? {
                break;
            }
        }
        self.expect_semicolon()
    }

    /// `with name = { ... }, ...;` compiles each body as a hidden function
    /// that runs on first read of the name.
    fn expression_variables(&mut self) -> Result {
        self.advance()?;
        loop {
            let name = self.expect_ident()?;
            self.expect(&Token::Assign, "'='")?;
            self.push_jump(Opcode::Jmp);
            let address = self.here();
            if self.expr_vars.insert(name.clone(), address).is_some() {
                return Err(self.error(format!("expression variable '{name}' is already defined")));
            }
            self.block()?;
            self.emit_op(Opcode::RetNull);
            self.patch_pending();
            if !self.eat(&Token::Comma)? {
                break;
            }
        }
        self.expect_semicolon()
    }

    pub(super) fn statement(&mut self) -> Result {
        let Some(token) = self.peek()?.cloned() else {
            return Err(self.unexpected("statement"));
        };
        match token {
            Token::LBrace => self.block(),
            Token::Semicolon => {
                self.advance()?;
                Ok(())
            }
            Token::If => self.if_statement(),
            Token::While => self.while_statement(),
            Token::Do => self.do_statement(),
            Token::For => self.for_statement(),
            Token::Foreach => {
                self.advance()?;
                self.expect(&Token::LParen, "'('")?;
                self.foreach_loop()
            }
            Token::Switch => self.switch_statement(),
            Token::Try => self.try_statement(),
            Token::Break => self.jump_statement(false),
            Token::Continue => self.jump_statement(true),
            Token::Return => {
                self.advance()?;
                if self.eat(&Token::Semicolon)? {
                    self.emit_op(Opcode::RetNull);
                    return Ok(());
                }
                self.expression()?;
                self.emit_op(Opcode::Return);
                self.expect_semicolon()
            }
            Token::Exit | Token::Abort => {
                self.advance()?;
                self.optional_value()?;
                self.emit_op(if token == Token::Exit { Opcode::Exit } else { Opcode::Abort });
                self.expect_semicolon()
            }
            Token::Print => {
                self.advance()?;
                self.expression()?;
                self.emit_op(Opcode::Print);
                self.expect_semicolon()
            }
            Token::Println => {
                self.advance()?;
                if self.at(&Token::Semicolon)? {
                    self.emit(Opcode::PushConstant, Operand::Constant(Value::from("")));
                } else {
                    self.expression()?;
                }
                self.emit_items(Opcode::Print, Operand::None, 1);
                self.expect_semicolon()
            }
            Token::Global => self.global_declaration(),
            Token::Array => {
                self.advance()?;
                loop {
                    let name = self.expect_ident()?;
                    self.emit_name(Opcode::Array, &name);
                    if !self.eat(&Token::Comma)? {
                        break;
                    }
                }
                self.expect_semicolon()
            }
            Token::Function | Token::Use | Token::Const | Token::With => {
                self.advance()?;
                Err(self.error(format!("{} is only allowed at top level", token.describe())))
            }
            _ => {
                self.expression()?;
                self.emit_items(Opcode::Pop, Operand::None, 1);
                self.expect_semicolon()
            }
        }
    }

    pub(super) fn block(&mut self) -> Result {
        self.expect(&Token::LBrace, "'{'")?;
        while !self.eat(&Token::RBrace)? {
            if self.peek()?.is_none() {
                return Err(self.unexpected("'}'"));
            }
            self.statement()?;
        }
        Ok(())
    }

    fn optional_value(&mut self) -> Result {
        if self.at(&Token::Semicolon)? {
            self.emit_op(Opcode::PushNull);
            return Ok(());
        }
        self.expression()
    }

    fn condition(&mut self) -> Result {
        self.expect(&Token::LParen, "'('")?;
        self.expression()?;
        self.expect(&Token::RParen, "')'")
    }

    fn if_statement(&mut self) -> Result {
        self.advance()?;
        self.condition()?;
        self.push_jump(Opcode::Jz);
        self.statement()?;
        if self.eat(&Token::Else)? {
            let skip = self.emit_jump(Opcode::Jmp);
            self.patch_pending();
            self.addresses.push(skip);
            self.statement()?;
        }
        self.patch_pending();
        Ok(())
    }

    fn while_statement(&mut self) -> Result {
        self.advance()?;
        let start = self.here();
        self.condition()?;
        self.push_jump(Opcode::Jz);
        self.enter(BlockKind::Loop);
        self.statement()?;
        self.emit_jump_to(Opcode::Jmp, start);
        self.patch_pending();
        let end = self.here();
        self.leave(end, start);
        Ok(())
    }

    fn do_statement(&mut self) -> Result {
        self.advance()?;
        let start = self.here();
        self.enter(BlockKind::Loop);
        self.statement()?;
        self.expect(&Token::While, "'while'")?;
        let test = self.here();
        self.condition()?;
        self.emit_jump_to(Opcode::Jnz, start);
        self.expect_semicolon()?;
        let end = self.here();
        self.leave(end, test);
        Ok(())
    }

    /// `for (init; cond; step)` or the `for (x : expr)` iteration form.
    ///
    /// ```text
    ///         init; POP
    /// test:   cond; JZ end
    ///         JMP body
    /// step:   step; POP
    ///         JMP test
    /// body:   statement
    ///         JMP step
    /// end:
    /// ```
    fn for_statement(&mut self) -> Result {
        self.advance()?;
        self.expect(&Token::LParen, "'('")?;
        if matches!(self.peek()?, Some(Token::Ident(_))) && self.peek_nth(1)? == Some(&Token::Colon) {
            return self.foreach_loop();
        }

        if !self.eat(&Token::Semicolon)? {
            self.expression()?;
            self.emit_items(Opcode::Pop, Operand::None, 1);
            self.expect_semicolon()?;
        }
        let test = self.here();
        let exit = if self.at(&Token::Semicolon)? {
            None
        } else {
            self.expression()?;
            Some(self.emit_jump(Opcode::Jz))
        };
        self.expect_semicolon()?;
        let to_body = self.emit_jump(Opcode::Jmp);
        let step = self.here();
        if !self.at(&Token::RParen)? {
            self.expression()?;
            self.emit_items(Opcode::Pop, Operand::None, 1);
        }
        self.expect(&Token::RParen, "')'")?;
        self.emit_jump_to(Opcode::Jmp, test);
        self.patch_here(to_body);

        self.enter(BlockKind::Loop);
        self.statement()?;
        self.emit_jump_to(Opcode::Jmp, step);
        let end = self.here();
        if let Some(exit) = exit {
            self.program.patch(exit, end);
        }
        self.leave(end, step);
        Ok(())
    }

    /// Rest of `for (x : expr) statement` after the opening parenthesis.
    /// The iterator stays on the stack for the whole loop.
    fn foreach_loop(&mut self) -> Result {
        let variable = self.expect_ident()?;
        self.expect(&Token::Colon, "':'")?;
        self.expression()?;
        self.expect(&Token::RParen, "')'")?;
        self.emit_name(Opcode::Foreach, &variable);
        let start = self.emit_op(Opcode::Next);
        self.push_jump(Opcode::Jz);
        self.enter(BlockKind::Loop);
        self.statement()?;
        self.emit_jump_to(Opcode::Jmp, start);
        self.patch_pending();
        let end = self.emit_items(Opcode::Pop, Operand::None, 1);
        self.leave(end, start);
        Ok(())
    }

    /// The switch value stays on the stack; each `case` tests it with
    /// `CASE`/`CASER` and a failed test jumps to the next one. Bodies fall
    /// through into the next body over the test in between.
    fn switch_statement(&mut self) -> Result {
        self.advance()?;
        self.condition()?;
        self.expect(&Token::LBrace, "'{'")?;
        self.enter(BlockKind::Switch);

        let mut next_test = Some(self.emit_jump(Opcode::Jmp));
        let mut default = None;
        let mut in_body = false;
        loop {
            match self.peek()? {
                Some(Token::Case) => {
                    self.advance()?;
                    let fall_through = in_body.then(|| self.emit_jump(Opcode::Jmp));
                    if let Some(at) = next_test.take() {
                        self.patch_here(at);
                    }
                    let lo = self.literal()?;
                    if self.eat(&Token::DotDot)? {
                        let hi = self.literal()?;
                        self.emit(Opcode::CaseRange, Operand::Range(lo, hi));
                    } else {
                        self.emit(Opcode::Case, Operand::Constant(lo));
                    }
                    next_test = Some(self.emit_jump(Opcode::Jz));
                    self.expect(&Token::Colon, "':'")?;
                    if let Some(at) = fall_through {
                        self.patch_here(at);
                    }
                    in_body = true;
                }
                Some(Token::Default) => {
                    self.advance()?;
                    self.expect(&Token::Colon, "':'")?;
                    if default.is_some() {
                        return Err(self.error("duplicate default label"));
                    }
                    default = Some(self.here());
                    in_body = true;
                }
                Some(Token::RBrace) => break,
                None => return Err(self.unexpected("'}'")),
                Some(_) if !in_body => return Err(self.unexpected("'case' or 'default'")),
                Some(_) => self.statement()?,
            }
        }
        self.advance()?;

        let end = self.here();
        if let Some(at) = next_test {
            self.program.patch(at, default.unwrap_or(end));
        }
        self.emit_items(Opcode::Pop, Operand::None, 1);
        self.leave(end, end);
        Ok(())
    }

    fn try_statement(&mut self) -> Result {
        self.advance()?;
        self.push_jump(Opcode::Catch);
        self.enter(BlockKind::Try);
        self.block()?;
        self.blocks.pop();
        self.emit_op(Opcode::CPop);
        let skip = self.emit_jump(Opcode::Jmp);
        self.patch_pending();
        self.expect(&Token::Catch, "'catch'")?;
        self.block()?;
        self.patch_here(skip);
        Ok(())
    }

    /// `break` leaves the innermost loop or switch, `continue` restarts the
    /// innermost loop. Catch points and switch values of the regions left
    /// on the way are popped first.
    fn jump_statement(&mut self, is_continue: bool) -> Result {
        self.advance()?;
        self.expect_semicolon()?;
        let target = self
            .blocks
            .iter()
            .rposition(|b| b.kind == BlockKind::Loop || (!is_continue && b.kind == BlockKind::Switch));
        let Some(target) = target else {
            let message = if is_continue { "continue outside of a loop" } else { "break outside of a loop or switch" };
            return Err(self.error(message));
        };

        let crossed: Vec<BlockKind> = self.blocks[target + 1..].iter().rev().map(|b| b.kind).collect();
        for kind in crossed {
            match kind {
                BlockKind::Try => {
                    self.emit_op(Opcode::CPop);
                }
                BlockKind::Switch => {
                    self.emit_items(Opcode::Pop, Operand::None, 1);
                }
                BlockKind::Loop => {}
            }
        }
        let jump = self.emit_jump(Opcode::Jmp);
        let block = &mut self.blocks[target];
        if is_continue {
            block.continues.push(jump);
        } else {
            block.breaks.push(jump);
        }
        Ok(())
    }

    /// `global x = e, y;` and `global array a;`
    fn global_declaration(&mut self) -> Result {
        self.advance()?;
        let arrays = self.eat(&Token::Array)?;
        loop {
            let name = self.expect_ident()?;
            if arrays {
                self.emit_name(Opcode::GlobalArray, &name);
            } else if self.eat(&Token::Assign)? {
                self.expression()?;
                self.emit_items(Opcode::Global, Operand::Identifier(name), 1);
            } else {
                self.emit_name(Opcode::Global, &name);
            }
            if !self.eat(&Token::Comma)? {
                break;
            }
        }
        self.expect_semicolon()
    }

    /// Compile-time value for `const` and `case` labels: a literal,
    /// optionally negated, or the name of a constant defined earlier.
    pub(super) fn literal(&mut self) -> Result<Value> {
        let negative = self.eat(&Token::Minus)?;
        let value = match self.advance()? {
            Token::Integer(literal) => super::expr::integer_value(literal),
            Token::Real(v) => Value::Real(v),
            Token::Str(s) if !negative => Value::string(s),
            Token::Null if !negative => Value::Null,
            Token::True if !negative => Value::Boolean(true),
            Token::False if !negative => Value::Boolean(false),
            Token::Ident(name) => match self.program.constants.get(&name) {
                Some(value) => value.clone(),
                None => return Err(self.error(format!("'{name}' is not a constant"))),
            },
            other => return Err(self.error(format!("expected literal, found {}", other.describe()))),
        };
        if negative {
            return ops::negate(&value).map_err(|code| self.error(format!("cannot negate literal: {code}")));
        }
        Ok(value)
    }
}
