use std::rc::Rc;

use super::{Parser, Result};
use crate::lexer::{IntLiteral, Token};
use crate::program::{Opcode, Operand};
use crate::value::{Array, DataType, Map, Value};

/// What the code just emitted reads, so a following `=`, `op=`, `++` or
/// `--` can turn the read into a write.
#[derive(Debug, Clone)]
pub(super) enum Place {
    None,
    Variable(Rc<str>),
    Constant(Rc<str>),
    ExprVar(Rc<str>),
    /// Addresses of the `GetElement`s of an `a[i][j]...` chain; the last
    /// one is the final instruction emitted.
    Element(Vec<usize>),
    Attribute(Rc<str>),
}

/// Binding power and opcode of a binary operator; higher binds tighter.
fn infix(token: &Token) -> Option<(u8, Opcode)> {
    Some(match token {
        Token::OrOr => (1, Opcode::Or),
        Token::AndAnd => (2, Opcode::And),
        Token::Pipe => (3, Opcode::BitOr),
        Token::Caret => (4, Opcode::BitXor),
        Token::Amp => (5, Opcode::BitAnd),
        Token::EqEq => (6, Opcode::Eq),
        Token::NotEq => (6, Opcode::Ne),
        Token::Like => (6, Opcode::Like),
        Token::ILike => (6, Opcode::ILike),
        Token::MatchOp | Token::Match => (6, Opcode::Match),
        Token::IMatch => (6, Opcode::IMatch),
        Token::Lt => (7, Opcode::Lt),
        Token::Le => (7, Opcode::Le),
        Token::Gt => (7, Opcode::Gt),
        Token::Ge => (7, Opcode::Ge),
        Token::Shl => (8, Opcode::Shl),
        Token::Shr => (8, Opcode::Shr),
        Token::Plus => (9, Opcode::Add),
        Token::Minus => (9, Opcode::Sub),
        Token::Dot => (9, Opcode::Concat),
        Token::Star => (10, Opcode::Mul),
        Token::Slash => (10, Opcode::Div),
        Token::Percent => (10, Opcode::Rem),
        _ => return None,
    })
}

fn compound(token: &Token) -> Option<Opcode> {
    Some(match token {
        Token::AddAssign => Opcode::Add,
        Token::SubAssign => Opcode::Sub,
        Token::MulAssign => Opcode::Mul,
        Token::DivAssign => Opcode::Div,
        Token::RemAssign => Opcode::Rem,
        Token::ConcatAssign => Opcode::Concat,
        Token::AndAssign => Opcode::BitAnd,
        Token::OrAssign => Opcode::BitOr,
        Token::XorAssign => Opcode::BitXor,
        Token::ShlAssign => Opcode::Shl,
        Token::ShrAssign => Opcode::Shr,
        _ => return None,
    })
}

fn cast_target(token: &Token) -> Option<DataType> {
    Some(match token {
        Token::Int32Type => DataType::Int32,
        Token::Int64Type => DataType::Int64,
        Token::UInt32Type => DataType::UInt32,
        Token::UInt64Type => DataType::UInt64,
        Token::RealType => DataType::Real,
        Token::StringType => DataType::String,
        Token::BooleanType => DataType::Boolean,
        _ => return None,
    })
}

pub(super) fn integer_value(literal: IntLiteral) -> Value {
    match literal {
        IntLiteral::Int32(v) => Value::Int32(v),
        IntLiteral::UInt32(v) => Value::UInt32(v),
        IntLiteral::Int64(v) => Value::Int64(v),
        IntLiteral::UInt64(v) => Value::UInt64(v),
    }
}

fn push_operand(value: Value) -> (Opcode, Operand) {
    match value {
        Value::Null => (Opcode::PushNull, Operand::None),
        Value::Boolean(true) => (Opcode::PushTrue, Operand::None),
        Value::Boolean(false) => (Opcode::PushFalse, Operand::None),
        Value::Int32(v) => (Opcode::PushInt32, Operand::Int32(v)),
        Value::UInt32(v) => (Opcode::PushUInt32, Operand::UInt32(v)),
        Value::Int64(v) => (Opcode::PushInt64, Operand::Int64(v)),
        Value::UInt64(v) => (Opcode::PushUInt64, Operand::UInt64(v)),
        other => (Opcode::PushConstant, Operand::Constant(other)),
    }
}

impl Parser<'_> {
    pub(super) fn expression(&mut self) -> Result {
        let place = self.conditional()?;
        let Some(token) = self.peek()?.cloned() else { return Ok(()) };
        if token == Token::Assign {
            self.advance()?;
            return self.assign(place);
        }
        if let Some(op) = compound(&token) {
            self.advance()?;
            return self.compound_assign(place, op);
        }
        Ok(())
    }

    fn assign(&mut self, place: Place) -> Result {
        match place {
            Place::Variable(name) => {
                self.drop_last();
                self.expression()?;
                self.emit_name(Opcode::Set, &name);
            }
            Place::ExprVar(name) => {
                self.drop_last();
                self.drop_last();
                self.expression()?;
                self.emit_name(Opcode::SetExprVar, &name);
            }
            Place::Element(chain) => {
                self.mark_for_update(&chain);
                self.drop_last();
                self.expression()?;
                self.emit_op(Opcode::SetElement);
            }
            Place::Attribute(name) => {
                self.drop_last();
                self.expression()?;
                self.emit_name(Opcode::SetAttribute, &name);
            }
            Place::Constant(name) => return Err(self.error(format!("cannot assign to constant '{name}'"))),
            Place::None => return Err(self.error("invalid assignment target")),
        }
        Ok(())
    }

    /// `x op= e` keeps the read of `x` on the stack, applies `op` and
    /// stores the result.
    fn compound_assign(&mut self, place: Place, op: Opcode) -> Result {
        let store = match place {
            Place::Variable(name) => (Opcode::Set, Operand::Identifier(name)),
            Place::ExprVar(name) => (Opcode::SetExprVar, Operand::Identifier(name)),
            Place::Element(chain) => {
                self.mark_for_update(&chain);
                self.retag_last(Opcode::PeekElement);
                (Opcode::SetElement, Operand::None)
            }
            Place::Attribute(name) => {
                self.retag_last(Opcode::PeekAttribute);
                (Opcode::SetAttribute, Operand::Identifier(name))
            }
            Place::Constant(name) => return Err(self.error(format!("cannot assign to constant '{name}'"))),
            Place::None => return Err(self.error("invalid assignment target")),
        };
        self.expression()?;
        self.emit_op(op);
        self.emit(store.0, store.1);
        Ok(())
    }

    /// Element reads that lead to the written element fetch it for update,
    /// so the write lands in the container and not in a copy.
    fn mark_for_update(&mut self, chain: &[usize]) {
        let Some((_, outer)) = chain.split_last() else { return };
        for &at in outer {
            if let Some(instr) = self.program.instructions.get_mut(at) {
                instr.stack_items = 1;
            }
        }
    }

    fn retag_last(&mut self, opcode: Opcode) {
        if let Some(instr) = self.last_instruction() {
            instr.opcode = opcode;
            instr.stack_items = 0;
        }
    }

    /// Turns the read just emitted into an increment or decrement.
    fn step(&mut self, place: Place, increment: bool, prefix: bool) -> Result {
        let opcode = match (place, increment, prefix) {
            (Place::Variable(_), true, true) => Opcode::IncP,
            (Place::Variable(_), false, true) => Opcode::DecP,
            (Place::Variable(_), true, false) => Opcode::Inc,
            (Place::Variable(_), false, false) => Opcode::Dec,
            (Place::Element(chain), increment, prefix) => {
                self.mark_for_update(&chain);
                match (increment, prefix) {
                    (true, true) => Opcode::IncPElement,
                    (false, true) => Opcode::DecPElement,
                    (true, false) => Opcode::IncElement,
                    (false, false) => Opcode::DecElement,
                }
            }
            _ => return Err(self.error("increment and decrement need a variable or an element")),
        };
        self.retag_last(opcode);
        Ok(())
    }

    fn conditional(&mut self) -> Result<Place> {
        let place = self.binary(0)?;
        if !self.eat(&Token::Question)? {
            return Ok(place);
        }
        self.push_jump(Opcode::Jz);
        self.expression()?;
        self.expect(&Token::Colon, "':'")?;
        let skip = self.emit_jump(Opcode::Jmp);
        self.patch_pending();
        self.addresses.push(skip);
        self.conditional()?;
        self.patch_pending();
        Ok(Place::None)
    }

    fn binary(&mut self, min: u8) -> Result<Place> {
        let mut place = self.unary()?;
        loop {
            let Some((power, opcode)) = self.peek()?.and_then(infix) else { break };
            if power < min {
                break;
            }
            self.advance()?;
            match opcode {
                // short circuit: the left operand decides when it is enough
                Opcode::And | Opcode::Or => {
                    self.push_jump(if opcode == Opcode::And { Opcode::JzPeek } else { Opcode::JnzPeek });
                    self.binary(power + 1)?;
                    self.emit_op(opcode);
                    self.patch_pending();
                }
                _ => {
                    self.binary(power + 1)?;
                    self.emit_op(opcode);
                }
            }
            place = Place::None;
        }
        Ok(place)
    }

    fn unary(&mut self) -> Result<Place> {
        let opcode = match self.peek()? {
            Some(Token::Minus) => Opcode::Neg,
            Some(Token::Bang) => Opcode::Not,
            Some(Token::Tilde) => Opcode::BitNot,
            Some(Token::Increment | Token::Decrement) => {
                let increment = self.advance()? == Token::Increment;
                let place = self.unary()?;
                self.step(place, increment, true)?;
                return Ok(Place::None);
            }
            _ => return self.postfix(),
        };
        self.advance()?;
        if opcode == Opcode::Neg && self.negative_literal()? {
            return Ok(Place::None);
        }
        self.unary()?;
        self.emit_op(opcode);
        Ok(Place::None)
    }

    /// `-` directly before a number folds into the pushed literal.
    fn negative_literal(&mut self) -> Result<bool> {
        let value = match self.peek()? {
            Some(Token::Integer(IntLiteral::Int32(v))) => Value::Int32(-*v),
            Some(Token::Integer(IntLiteral::Int64(v))) => {
                let v = -*v;
                i32::try_from(v).map_or(Value::Int64(v), Value::Int32)
            }
            Some(Token::Real(v)) => Value::Real(-*v),
            _ => return Ok(false),
        };
        self.advance()?;
        let (opcode, operand) = push_operand(value);
        self.emit(opcode, operand);
        Ok(true)
    }

    fn postfix(&mut self) -> Result<Place> {
        let mut place = self.primary()?;
        loop {
            match self.peek()? {
                Some(Token::LBracket) => {
                    self.advance()?;
                    place = self.subscript(place)?;
                }
                Some(Token::Arrow | Token::SafeArrow) => {
                    let safe = self.advance()? == Token::SafeArrow;
                    let name = self.expect_ident()?;
                    if self.at(&Token::LParen)? {
                        let argc = self.arguments()?;
                        let opcode = if safe { Opcode::SafeCallMethod } else { Opcode::CallMethod };
                        self.emit_items(opcode, Operand::Identifier(name), argc);
                        place = Place::None;
                    } else if safe {
                        self.emit_name(Opcode::SafeGetAttribute, &name);
                        place = Place::None;
                    } else {
                        self.emit_name(Opcode::GetAttribute, &name);
                        place = Place::Attribute(name);
                    }
                }
                Some(Token::Increment | Token::Decrement) => {
                    let increment = self.advance()? == Token::Increment;
                    self.step(place, increment, false)?;
                    place = Place::None;
                }
                _ => return Ok(place),
            }
        }
    }

    /// After `[`: an element `a[i]` or a slice `a[lo:hi]` with either bound
    /// optional.
    fn subscript(&mut self, place: Place) -> Result<Place> {
        if self.eat(&Token::Colon)? {
            self.emit_op(Opcode::PushNull);
            return self.slice_end();
        }
        self.expression()?;
        if self.eat(&Token::Colon)? {
            return self.slice_end();
        }
        self.expect(&Token::RBracket, "']'")?;
        let at = self.emit_op(Opcode::GetElement);
        let mut chain = match place {
            Place::Element(chain) => chain,
            _ => Vec::new(),
        };
        chain.push(at);
        Ok(Place::Element(chain))
    }

    fn slice_end(&mut self) -> Result<Place> {
        if self.at(&Token::RBracket)? {
            self.emit_op(Opcode::PushNull);
        } else {
            self.expression()?;
        }
        self.expect(&Token::RBracket, "']'")?;
        self.emit_op(Opcode::GetRange);
        Ok(Place::None)
    }

    fn primary(&mut self) -> Result<Place> {
        let token = self.advance()?;
        if let Some(target) = cast_target(&token) {
            self.expect(&Token::LParen, "'('")?;
            self.expression()?;
            self.expect(&Token::RParen, "')'")?;
            self.emit_items(Opcode::Cast, Operand::None, target.code());
            return Ok(Place::None);
        }
        let literal = match token {
            Token::Integer(literal) => integer_value(literal),
            Token::Real(v) => Value::Real(v),
            Token::Str(s) => Value::string(s),
            Token::Null => Value::Null,
            Token::True => Value::Boolean(true),
            Token::False => Value::Boolean(false),
            Token::Ident(name) => return self.identifier(name.into()),
            Token::LBracket => return self.array_literal(),
            Token::MapOpen => return self.map_literal(),
            Token::LParen => {
                self.expression()?;
                self.expect(&Token::RParen, "')'")?;
                // (expr)(args): call the function named by the value
                if self.at(&Token::LParen)? {
                    let argc = self.arguments()?;
                    self.emit_items(Opcode::CallIndirect, Operand::None, argc);
                }
                return Ok(Place::None);
            }
            other => return Err(self.error(format!("expected expression, found {}", other.describe()))),
        };
        let (opcode, operand) = push_operand(literal);
        self.emit(opcode, operand);
        Ok(Place::None)
    }

    fn identifier(&mut self, name: Rc<str>) -> Result<Place> {
        if self.eat(&Token::DoubleColon)? {
            let function = self.expect_ident()?;
            if !self.at(&Token::LParen)? {
                return Err(self.unexpected("'(' after a module-qualified name"));
            }
            let argc = self.arguments()?;
            self.emit_items(Opcode::CallExternal, Operand::Identifier(format!("{name}::{function}").into()), argc);
            return Ok(Place::None);
        }
        if self.at(&Token::LParen)? {
            let argc = self.arguments()?;
            self.emit_items(Opcode::CallExternal, Operand::Identifier(name), argc);
            return Ok(Place::None);
        }
        if let Some(&address) = self.expr_vars.get(&name) {
            self.emit(Opcode::PushExprVar, Operand::Function { name: name.clone(), address });
            self.emit_name(Opcode::UpdateExprVar, &name);
            return Ok(Place::ExprVar(name));
        }
        if self.program.constants.contains_key(&*name) {
            self.emit_name(Opcode::PushConstantRef, &name);
            return Ok(Place::Constant(name));
        }
        self.emit_name(Opcode::PushVariable, &name);
        Ok(Place::Variable(name))
    }

    /// `(a, b, name: c)`; returns the argument count.
    fn arguments(&mut self) -> Result<i32> {
        self.expect(&Token::LParen, "'('")?;
        let mut count = 0;
        if self.eat(&Token::RParen)? {
            return Ok(count);
        }
        loop {
            let named = matches!(self.peek()?, Some(Token::Ident(_))) && self.peek_nth(1)? == Some(&Token::Colon);
            if named {
                let name = self.expect_ident()?;
                self.advance()?;
                self.expression()?;
                self.emit_name(Opcode::Name, &name);
            } else {
                self.expression()?;
            }
            count += 1;
            if !self.eat(&Token::Comma)? {
                break;
            }
        }
        self.expect(&Token::RParen, "')'")?;
        Ok(count)
    }

    /// Value pushed by the single instruction emitted since `start`, if
    /// that is all the element compiled to.
    fn literal_since(&self, start: usize) -> Option<Value> {
        let code = &self.program.instructions[start..];
        let [instr] = code else { return None };
        match (&instr.opcode, &instr.operand) {
            (Opcode::PushNull, _) => Some(Value::Null),
            (Opcode::PushTrue, _) => Some(Value::Boolean(true)),
            (Opcode::PushFalse, _) => Some(Value::Boolean(false)),
            (_, Operand::Int32(v)) => Some(Value::Int32(*v)),
            (_, Operand::UInt32(v)) => Some(Value::UInt32(*v)),
            (_, Operand::Int64(v)) => Some(Value::Int64(*v)),
            (_, Operand::UInt64(v)) => Some(Value::UInt64(*v)),
            (Opcode::PushConstant, Operand::Constant(v)) => Some(v.clone()),
            _ => None,
        }
    }

    /// After `[`. All-literal arrays become a single constant.
    fn array_literal(&mut self) -> Result<Place> {
        let start = self.emit_op(Opcode::NewArray);
        let mut constant = Some(Vec::new());
        while !self.at(&Token::RBracket)? {
            if self.eat(&Token::Ellipsis)? {
                self.expression()?;
                self.emit_op(Opcode::AppendAll);
                constant = None;
            } else {
                let element = self.here();
                self.expression()?;
                constant = match (constant, self.literal_since(element)) {
                    (Some(mut values), Some(value)) => {
                        values.push(value);
                        Some(values)
                    }
                    _ => None,
                };
                self.emit_op(Opcode::Append);
            }
            if !self.eat(&Token::Comma)? {
                break;
            }
        }
        self.expect(&Token::RBracket, "']'")?;

        if let Some(values) = constant {
            self.program.instructions.truncate(start);
            self.emit(Opcode::PushConstant, Operand::Constant(Value::array(Array::from_values(values))));
        }
        Ok(Place::None)
    }

    /// After `%{`: `key: value` pairs.
    fn map_literal(&mut self) -> Result<Place> {
        let start = self.emit_op(Opcode::NewHashMap);
        let mut constant = Some(Map::new());
        let mut pairs = 0;
        while !self.at(&Token::RBrace)? {
            let key_start = self.here();
            self.expression()?;
            let key = self.literal_since(key_start);
            self.expect(&Token::Colon, "':'")?;
            let value_start = self.here();
            self.expression()?;
            let value = self.literal_since(value_start);

            let entry = key.and_then(|k| k.to_key().ok()).zip(value);
            constant = match (constant, entry) {
                (Some(mut map), Some((key, value))) => {
                    map.set(key, value);
                    Some(map)
                }
                _ => None,
            };
            pairs += 1;
            if !self.eat(&Token::Comma)? {
                break;
            }
        }
        self.expect(&Token::RBrace, "'}'")?;
        self.emit_items(Opcode::HashMapSet, Operand::None, pairs);

        if let Some(map) = constant {
            self.program.instructions.truncate(start);
            self.emit(Opcode::PushConstant, Operand::Constant(Value::hashmap(map)));
        }
        Ok(Place::None)
    }
}
