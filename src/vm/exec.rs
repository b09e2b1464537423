//! Opcode dispatch.

use std::cell::RefCell;
use std::rc::Rc;

use super::env::Completion;
use super::error::{Exec, Fault};
use super::{CallTarget, CatchPoint, ErrorCode, Vm, methods};
use crate::program::{Instruction, Opcode, Operand};
use crate::value::{Array, BinaryOp, DataType, Map, ScriptIterator, Value, ops};

fn identifier(instr: &Instruction) -> Exec<&Rc<str>> {
    instr.identifier().ok_or_else(|| ErrorCode::Internal.into())
}

fn address(instr: &Instruction) -> Exec<usize> {
    instr.address().ok_or_else(|| ErrorCode::Internal.into())
}

fn count(instr: &Instruction) -> usize {
    usize::try_from(instr.stack_items).unwrap_or(0)
}

fn array_index(index: &Value) -> Result<i32, ErrorCode> {
    index.to_integer().and_then(|i| i32::try_from(i).ok()).ok_or(ErrorCode::IndexNotInteger)
}

fn binary_op(opcode: Opcode) -> Option<BinaryOp> {
    Some(match opcode {
        Opcode::Add => BinaryOp::Add,
        Opcode::Sub => BinaryOp::Sub,
        Opcode::Mul => BinaryOp::Mul,
        Opcode::Div => BinaryOp::Div,
        Opcode::Rem => BinaryOp::Rem,
        Opcode::Shl => BinaryOp::Shl,
        Opcode::Shr => BinaryOp::Shr,
        Opcode::BitAnd => BinaryOp::BitAnd,
        Opcode::BitOr => BinaryOp::BitOr,
        Opcode::BitXor => BinaryOp::BitXor,
        Opcode::Eq => BinaryOp::Eq,
        Opcode::Ne => BinaryOp::Ne,
        Opcode::Lt => BinaryOp::Lt,
        Opcode::Le => BinaryOp::Le,
        Opcode::Gt => BinaryOp::Gt,
        Opcode::Ge => BinaryOp::Ge,
        _ => return None,
    })
}

/// Element read; missing entries read as null.
fn element(container: &Value, index: &Value) -> Exec<Value> {
    Ok(match container {
        Value::Array(a) => a.borrow().get(array_index(index)?).cloned().unwrap_or(Value::Null),
        Value::HashMap(m) => m.borrow().get(&index.to_key()?).cloned().unwrap_or(Value::Null),
        Value::String(s) => {
            let i = index.to_integer().ok_or(ErrorCode::IndexNotInteger)?;
            usize::try_from(i)
                .ok()
                .and_then(|i| s.chars().nth(i))
                .map_or(Value::Null, |c| Value::from(c.to_string()))
        }
        Value::Null => return Err(ErrorCode::NullValue.into()),
        _ => return Err(ErrorCode::NotContainer.into()),
    })
}

fn set_element(container: &Value, index: &Value, value: Value) -> Exec {
    match container {
        Value::Array(a) => {
            let i = array_index(index)?;
            a.borrow_mut().set(i, value);
        }
        Value::HashMap(m) => {
            let key = index.to_key()?;
            m.borrow_mut().set(key, value);
        }
        _ => return Err(ErrorCode::NotContainer.into()),
    }
    Ok(())
}

/// Applies `delta` to an element in place; returns (old, new).
fn step_element(container: &Value, index: &Value, delta: i32) -> Exec<(Value, Value)> {
    let update = |slot: &mut Value| -> Exec<(Value, Value)> {
        let old = slot.clone();
        let new = ops::step(&old, delta)?;
        *slot = new.clone();
        Ok((old, new))
    };
    match container {
        Value::Array(a) => {
            let i = array_index(index)?;
            update(a.borrow_mut().entry(i))
        }
        Value::HashMap(m) => {
            let key = index.to_key()?;
            update(m.borrow_mut().entry(&key))
        }
        _ => Err(ErrorCode::NotContainer.into()),
    }
}

fn range_bound(value: &Value) -> Exec<Option<i32>> {
    match value {
        Value::Null => Ok(None),
        other => Ok(Some(array_index(other)?)),
    }
}

impl Vm {
    pub(super) fn step(&mut self, instr: &Instruction) -> Exec {
        let ip = self.current;
        match instr.opcode {
            Opcode::Nop => {}

            // literals
            Opcode::PushNull => self.data.push(Value::Null)?,
            Opcode::PushTrue => self.data.push(Value::Boolean(true))?,
            Opcode::PushFalse => self.data.push(Value::Boolean(false))?,
            Opcode::PushInt32 | Opcode::PushUInt32 | Opcode::PushInt64 | Opcode::PushUInt64 => {
                let value = match instr.operand {
                    Operand::Int32(v) => Value::Int32(v),
                    Operand::UInt32(v) => Value::UInt32(v),
                    Operand::Int64(v) => Value::Int64(v),
                    Operand::UInt64(v) => Value::UInt64(v),
                    _ => return Err(ErrorCode::Internal.into()),
                };
                self.data.push(value)?;
            }
            Opcode::PushConstant => match &instr.operand {
                Operand::Constant(v) => self.data.push(v.clone())?,
                _ => return Err(ErrorCode::Internal.into()),
            },

            // variables
            Opcode::PushVariable => {
                let binding = self.resolve(ip, identifier(instr)?);
                let value = self.read(binding)?.alias();
                self.data.push(value)?;
            }
            Opcode::PushConstantRef => {
                let name = identifier(instr)?;
                let value = self.constants.value(name).cloned().ok_or(ErrorCode::NoSuchConstant)?;
                self.data.push(value)?;
            }
            Opcode::PushExprVar => {
                let name = identifier(instr)?;
                let cached = self
                    .constants
                    .value(name)
                    .or_else(|| self.locals.value(name))
                    .or_else(|| self.expressions.value(name))
                    .map(Value::alias);
                match cached {
                    Some(value) => {
                        self.data.push(value)?;
                        // skip the UpdateExprVar that stores a computed value
                        self.ip += 1;
                    }
                    None => self.call_script(address(instr)?, 0)?,
                }
            }
            Opcode::UpdateExprVar | Opcode::SetExprVar => {
                let name = identifier(instr)?;
                let value = self.data.peek()?.clone();
                self.expressions.set(name, value);
            }
            Opcode::Set => {
                let binding = self.resolve(ip, identifier(instr)?);
                let value = self.data.peek()?.clone();
                self.assign(binding, value)?;
            }
            Opcode::Global | Opcode::GlobalArray => {
                let name = identifier(instr)?;
                let initial = match (instr.opcode, instr.stack_items) {
                    (Opcode::GlobalArray, _) => Value::array(Array::new()),
                    (_, 0) => Value::Null,
                    _ => self.data.pop()?.clone(),
                };
                match self.globals.value(name) {
                    Some(existing) if instr.opcode == Opcode::GlobalArray => {
                        if !matches!(existing, Value::Array(_)) {
                            return Err(ErrorCode::VariableAlreadyExists.into());
                        }
                    }
                    Some(_) => {}
                    None => {
                        if self.lookup(name).is_some() {
                            return Err(ErrorCode::VariableAlreadyExists.into());
                        }
                        self.globals.create(name.clone(), initial, false);
                    }
                }
            }
            Opcode::Array => {
                let name = identifier(instr)?;
                match self.lookup(name) {
                    Some(binding) => {
                        if !matches!(self.read(binding)?, Value::Array(_)) {
                            return Err(ErrorCode::VariableAlreadyExists.into());
                        }
                    }
                    None => {
                        self.locals.create(name.clone(), Value::array(Array::new()), false);
                    }
                }
            }
            Opcode::Bind => {
                let name = identifier(instr)?;
                self.bind_pos += 1;
                let value = self
                    .locals
                    .value(&format!("${name}"))
                    .or_else(|| self.locals.value(&format!("${}", self.bind_pos)))
                    .cloned()
                    .unwrap_or(Value::Null);
                self.locals.set(name, value);
            }
            Opcode::Inc | Opcode::Dec | Opcode::IncP | Opcode::DecP => {
                let binding = self.resolve(ip, identifier(instr)?);
                let delta = if matches!(instr.opcode, Opcode::Inc | Opcode::IncP) { 1 } else { -1 };
                let old = self.read(binding)?.clone();
                let new = ops::step(&old, delta)?;
                self.assign(binding, new.clone())?;
                let pushed = if matches!(instr.opcode, Opcode::Inc | Opcode::Dec) { old } else { new };
                self.data.push(pushed)?;
            }

            // containers
            Opcode::NewArray => self.data.push(Value::array(Array::new()))?,
            Opcode::NewHashMap => self.data.push(Value::hashmap(Map::new()))?,
            Opcode::Append | Opcode::AppendAll => {
                let value = self.data.pop()?;
                let Value::Array(target) = self.data.peek()? else {
                    return Err(ErrorCode::NotContainer.into());
                };
                match (&value, instr.opcode) {
                    (Value::Array(source), Opcode::AppendAll) => {
                        let items: Vec<Value> = source.borrow().values().cloned().collect();
                        let mut target = target.borrow_mut();
                        for item in items {
                            target.append(item)?;
                        }
                    }
                    _ => {
                        let item = value.clone();
                        target.borrow_mut().append(item)?;
                    }
                }
            }
            Opcode::HashMapSet => {
                let entries = self.data.pop_n(count(instr) * 2)?;
                let Value::HashMap(map) = self.data.peek()? else {
                    return Err(ErrorCode::NotContainer.into());
                };
                let mut pairs = Vec::with_capacity(entries.len() / 2);
                for pair in entries.chunks(2) {
                    pairs.push((pair[0].value.to_key()?, pair[1].value.clone()));
                }
                let mut map = map.borrow_mut();
                for (key, value) in pairs {
                    map.set(key, value);
                }
            }
            Opcode::GetElement => {
                let index = self.data.pop()?;
                let container = self.data.pop()?;
                let value = if instr.stack_items == 0 {
                    element(&container, &index)?
                } else {
                    // the container is about to be written through this element
                    match &container {
                        Value::Array(a) => {
                            let i = array_index(&index)?;
                            a.borrow_mut().get_mut(i).map_or(Value::Null, |v| v.alias())
                        }
                        Value::HashMap(m) => {
                            let key = index.to_key()?;
                            m.borrow_mut().get_mut(&key).map_or(Value::Null, |v| v.alias())
                        }
                        other => element(other, &index)?,
                    }
                };
                self.data.push(value)?;
            }
            Opcode::PeekElement => {
                let index = self.data.peek_at(0)?;
                let container = self.data.peek_at(1)?;
                let value = element(container, index)?;
                self.data.push(value)?;
            }
            Opcode::SetElement => {
                let value = self.data.pop()?;
                let index = self.data.pop()?;
                let container = self.data.pop()?;
                set_element(&container, &index, value.clone())?;
                self.data.push(value)?;
            }
            Opcode::IncElement | Opcode::DecElement | Opcode::IncPElement | Opcode::DecPElement => {
                let index = self.data.pop()?;
                let container = self.data.pop()?;
                let delta = if matches!(instr.opcode, Opcode::IncElement | Opcode::IncPElement) { 1 } else { -1 };
                let (old, new) = step_element(&container, &index, delta)?;
                let pushed = if matches!(instr.opcode, Opcode::IncElement | Opcode::DecElement) { old } else { new };
                self.data.push(pushed)?;
            }
            Opcode::GetRange => {
                let hi = self.data.pop()?;
                let lo = self.data.pop()?;
                let container = self.data.pop()?;
                let (lo, hi) = (range_bound(&lo)?, range_bound(&hi)?);
                let value = match &container {
                    Value::Array(a) => Value::array(a.borrow().slice(lo, hi)),
                    Value::String(s) => {
                        let len = s.chars().count() as i32;
                        let start = lo.unwrap_or(0).clamp(0, len) as usize;
                        let end = hi.unwrap_or(len).clamp(0, len) as usize;
                        Value::from(s.chars().skip(start).take(end.saturating_sub(start)).collect::<String>())
                    }
                    Value::Null => return Err(ErrorCode::NullValue.into()),
                    _ => return Err(ErrorCode::NotContainer.into()),
                };
                self.data.push(value)?;
            }

            // attributes
            Opcode::GetAttribute | Opcode::SafeGetAttribute => {
                let name = identifier(instr)?;
                let receiver = self.data.pop()?;
                let value = if receiver.is_null() && instr.opcode == Opcode::SafeGetAttribute {
                    Value::Null
                } else {
                    self.attribute(&receiver, name)?
                };
                self.data.push(value)?;
            }
            Opcode::PeekAttribute => {
                let name = identifier(instr)?;
                let value = self.attribute(self.data.peek()?, name)?;
                self.data.push(value)?;
            }
            Opcode::SetAttribute => {
                let name = identifier(instr)?;
                let value = self.data.pop()?;
                let receiver = self.data.pop()?;
                match &receiver {
                    Value::Object(object) => {
                        if !object.class().set_attribute(object, name, value.clone()) {
                            return Err(ErrorCode::NoSuchAttribute.into());
                        }
                    }
                    Value::Null => return Err(ErrorCode::NullValue.into()),
                    _ => return Err(ErrorCode::NotObject.into()),
                }
                self.data.push(value)?;
            }

            // operators
            Opcode::Concat => {
                let right = self.data.pop()?;
                let left = self.data.pop()?;
                self.data.push(ops::concat(&left, &right)?)?;
            }
            Opcode::Like | Opcode::ILike => {
                let pattern = self.data.pop()?;
                let text = self.data.pop()?;
                let matched = ops::like(&text, &pattern, instr.opcode == Opcode::ILike)?;
                self.data.push(Value::Boolean(matched))?;
            }
            Opcode::Match | Opcode::IMatch => {
                let pattern = self.data.pop()?;
                let text = self.data.pop()?;
                let groups = ops::regex_match(&text, &pattern, instr.opcode == Opcode::IMatch)?;
                let matched = groups.is_some();
                for (i, group) in groups.into_iter().flatten().enumerate() {
                    let value = group.map_or(Value::Null, Value::from);
                    self.locals.set(&format!("${}", i + 1), value);
                }
                self.data.push(Value::Boolean(matched))?;
            }
            Opcode::And | Opcode::Or => {
                let right = self.data.pop()?.is_true()?;
                let left = self.data.pop()?.is_true()?;
                let result = if instr.opcode == Opcode::And { left && right } else { left || right };
                self.data.push(Value::Boolean(result))?;
            }
            Opcode::Neg => {
                let value = self.data.pop()?;
                self.data.push(ops::negate(&value)?)?;
            }
            Opcode::Not => {
                let value = self.data.pop()?;
                self.data.push(Value::Boolean(!value.is_true()?))?;
            }
            Opcode::BitNot => {
                let value = self.data.pop()?;
                self.data.push(ops::bit_not(&value)?)?;
            }
            Opcode::Cast => {
                let target = DataType::from_code(instr.stack_items).ok_or(ErrorCode::Internal)?;
                let value = self.data.pop()?;
                self.data.push(value.convert(target)?)?;
            }
            Opcode::Name => {
                let name = identifier(instr)?.clone();
                self.data.peek_mut()?.name = Some(name);
            }
            op if binary_op(op).is_some() => {
                let op = binary_op(op).ok_or(ErrorCode::Internal)?;
                let right = self.data.pop()?;
                let left = self.data.pop()?;
                self.data.push(ops::binary(op, &left, &right)?)?;
            }

            // control flow
            Opcode::Jmp => self.ip = address(instr)?,
            Opcode::Jz | Opcode::Jnz => {
                let condition = self.data.pop()?.is_true()?;
                if condition == (instr.opcode == Opcode::Jnz) {
                    self.ip = address(instr)?;
                }
            }
            Opcode::JzPeek | Opcode::JnzPeek => {
                let condition = self.data.peek()?.is_true()?;
                if condition == (instr.opcode == Opcode::JnzPeek) {
                    self.ip = address(instr)?;
                }
            }
            Opcode::Case => {
                let Operand::Constant(expected) = &instr.operand else {
                    return Err(ErrorCode::Internal.into());
                };
                let matched = self.data.peek()?.loose_eq(expected);
                self.data.push(Value::Boolean(matched))?;
            }
            Opcode::CaseRange => {
                let Operand::Range(lo, hi) = &instr.operand else {
                    return Err(ErrorCode::Internal.into());
                };
                let value = self.data.peek()?;
                let above = ops::binary(BinaryOp::Ge, value, lo)?;
                let below = ops::binary(BinaryOp::Le, value, hi)?;
                let matched = above.is_true()? && below.is_true()?;
                self.data.push(Value::Boolean(matched))?;
            }
            Opcode::Pop => {
                self.data.pop_n(count(instr))?;
            }

            // calls
            Opcode::Call => self.call_script(address(instr)?, count(instr))?,
            Opcode::CallExternal => {
                let target = match self.calls.get(&ip) {
                    Some(target) => target.clone(),
                    None => {
                        let target = self.resolve_call(identifier(instr)?)?;
                        self.calls.insert(ip, target.clone());
                        target
                    }
                };
                self.invoke(target, count(instr))?;
            }
            Opcode::CallIndirect => {
                let args = self.data.pop_n(count(instr))?;
                let callee = self.data.pop()?;
                let name = match &callee {
                    Value::String(name) => name.clone(),
                    _ => return Err(ErrorCode::NotString.into()),
                };
                let target = self.resolve_call(&name)?;
                for arg in args {
                    self.data.push_entry(arg)?;
                }
                self.invoke(target, count(instr))?;
            }
            Opcode::CallMethod | Opcode::SafeCallMethod => {
                let name = identifier(instr)?;
                let args: Vec<Value> = self.data.pop_n(count(instr))?.into_iter().map(|e| e.value).collect();
                let receiver = self.data.pop()?;
                match &receiver {
                    Value::Null if instr.opcode == Opcode::SafeCallMethod => self.data.push(Value::Null)?,
                    Value::Object(object) => {
                        let object = object.clone();
                        let class = object.class().clone();
                        let result = class.call_method(&object, name, &args, self).ok_or(ErrorCode::NoSuchMethod)?;
                        self.complete(result?)?;
                    }
                    other => {
                        let value = methods::call_method(other, name, &args)?;
                        self.data.push(value)?;
                    }
                }
            }
            Opcode::Return => {
                let value = self.data.pop()?;
                self.return_from_call(value)?;
            }
            Opcode::RetNull => self.return_from_call(Value::Null)?,
            Opcode::Exit => {
                let value = self.data.pop()?;
                self.finish(value.clone())?;
            }
            Opcode::Abort => {
                let value = self.data.pop()?;
                return Err(match &value {
                    Value::Null => ErrorCode::ExecutionAborted.into(),
                    other => match other.to_integer().and_then(|c| i32::try_from(c).ok()) {
                        Some(code) if !matches!(other, Value::String(_) | Value::Real(_)) => Fault::custom(code),
                        _ => ErrorCode::NotInteger.into(),
                    },
                });
            }
            Opcode::Print => {
                let value = self.data.pop()?;
                let mut text = value.to_text();
                if instr.stack_items != 0 {
                    text.push('\n');
                }
                self.env.print(&text);
            }

            // exceptions
            Opcode::Catch => {
                let addr = address(instr)?;
                self.catches.push(CatchPoint { addr, data_depth: self.data.len(), sub_level: self.frames.len() });
            }
            Opcode::CPop => {
                self.catches.pop();
            }

            // iteration
            Opcode::Foreach => {
                let variable = identifier(instr)?.clone();
                let source = self.data.pop()?;
                let iterator = match &source {
                    Value::Array(a) => ScriptIterator::over_values(variable, a.borrow().values().cloned().collect()),
                    Value::HashMap(m) => {
                        ScriptIterator::over_values(variable, m.borrow().keys().map(Value::from).collect())
                    }
                    Value::Object(o) if o.class().is_iterable() => ScriptIterator::over_object(variable, o.clone()),
                    _ => return Err(ErrorCode::NotIterator.into()),
                };
                self.data.push(Value::Iterator(Rc::new(RefCell::new(iterator))))?;
            }
            Opcode::Next => {
                let Value::Iterator(iterator) = self.data.peek()? else {
                    return Err(ErrorCode::NotIterator.into());
                };
                let cursor = iterator.clone();
                let mut state = cursor.borrow_mut();
                match state.next_value() {
                    Some(value) => {
                        let name = state.variable().clone();
                        drop(state);
                        self.assign_by_name(&name, value)?;
                        self.data.push(Value::Boolean(true))?;
                    }
                    None => self.data.push(Value::Boolean(false))?,
                }
            }

            _ => return Err(ErrorCode::Internal.into()),
        }
        Ok(())
    }

    /// Script functions (including linked module functions) take
    /// precedence over native ones.
    fn resolve_call(&self, name: &str) -> Exec<CallTarget> {
        if let Some(address) = self.function_address(name) {
            return Ok(CallTarget::Script(address));
        }
        self.env.function(name).map(CallTarget::Native).ok_or_else(|| {
            log::debug!("unresolved function {name}");
            ErrorCode::NoSuchFunction.into()
        })
    }

    fn invoke(&mut self, target: CallTarget, argc: usize) -> Exec {
        match target {
            CallTarget::Script(address) => self.call_script(address, argc),
            CallTarget::Native(function) => {
                let args: Vec<Value> = self.data.pop_n(argc)?.into_iter().map(|e| e.value.clone()).collect();
                let result = function.call(&args, self)?;
                self.complete(result)
            }
        }
    }

    fn complete(&mut self, completion: Completion) -> Exec {
        match completion {
            Completion::Value(value) => self.data.push(value),
            Completion::Stop(value) => self.finish(value),
        }
    }

    fn attribute(&self, receiver: &Value, name: &str) -> Exec<Value> {
        match receiver {
            Value::Object(object) => object
                .class()
                .get_attribute(object, name)
                .ok_or_else(|| ErrorCode::NoSuchAttribute.into()),
            other => Ok(methods::get_attribute(other, name)?),
        }
    }
}
