//! The interpreter: call protocol and instruction dispatch.
//!
//! Lua-to-Lua calls push frames and stay inside one dispatch loop; host
//! calls recurse through the native stack. After an unprotected error
//! the state's stack shape is unspecified; `pcall` restores it.

use crate::vm::bytecode::Op;
use crate::vm::error::{Result, VmError};
use crate::vm::heap::ClosureKind;
use crate::vm::state::{Frame, LuaState, MULTRET};
use crate::vm::value::{number_to_display, ClosureHandle, Value};

impl LuaState {
    /// Call the closure below the top `nargs` values, expecting
    /// `nresults` results (or MULTRET for all of them).
    pub fn call(&mut self, nargs: i32, nresults: i32) -> Result<()> {
        let nargs = usize::try_from(nargs)
            .map_err(|_| VmError::Runtime("negative argument count".to_string()))?;
        if self.stack.len() < self.current_base() + nargs + 1 {
            return Err(VmError::StackUnderflow);
        }
        if self.frames.is_empty() {
            self.instruction_count = 0;
        }
        let callee_slot = self.stack.len() - nargs - 1;
        let h = self.callable_at(callee_slot)?;
        if self.is_lua_closure(h)? {
            let floor = self.frames.len();
            self.push_lua_frame(h, callee_slot, nresults)?;
            self.run(floor)
        } else {
            self.call_host(h, callee_slot, nresults)
        }
    }

    /// Protected call: on error, the stack and call frames are restored
    /// to their pre-call shape and the error is returned.
    pub fn pcall(&mut self, nargs: i32, nresults: i32) -> Result<()> {
        let nargs_count = usize::try_from(nargs)
            .map_err(|_| VmError::Runtime("negative argument count".to_string()))?;
        let frame_floor = self.frames.len();
        let callee_slot = self
            .stack
            .len()
            .checked_sub(nargs_count + 1)
            .ok_or(VmError::StackUnderflow)?;
        match self.call(nargs, nresults) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.frames.truncate(frame_floor);
                self.stack.truncate(callee_slot);
                Err(e)
            }
        }
    }

    fn callable_at(&self, slot: usize) -> Result<ClosureHandle> {
        match self.stack[slot] {
            Value::Closure(h) => Ok(h),
            v => Err(VmError::Type(format!(
                "attempt to call a {} value",
                v.type_name()
            ))),
        }
    }

    fn is_lua_closure(&self, h: ClosureHandle) -> Result<bool> {
        Ok(matches!(self.heap.closure(h)?.kind, ClosureKind::Lua { .. }))
    }

    fn push_lua_frame(&mut self, h: ClosureHandle, callee_slot: usize, nresults: i32) -> Result<()> {
        if self.frames.len() >= self.limits.call_depth {
            return Err(VmError::StackOverflow);
        }
        let proto = match &self.heap.closure(h)?.kind {
            ClosureKind::Lua { proto, .. } => proto.clone(),
            ClosureKind::Host { .. } => {
                return Err(VmError::Runtime("host closure in a Lua frame".to_string()));
            }
        };
        let base = callee_slot + 1;
        let nlocals = proto.locals.len().max(proto.param_count as usize);
        if base + nlocals > self.limits.stack_slots {
            return Err(VmError::StackOverflow);
        }
        // Trim extra arguments, pad missing ones, then reserve the
        // remaining local slots.
        self.stack.resize(base + proto.param_count as usize, Value::Nil);
        self.stack.resize(base + nlocals, Value::Nil);
        self.frames.push(Frame {
            callee: h,
            proto: Some(proto),
            pc: 0,
            base,
            ret_slot: callee_slot,
            nresults,
        });
        Ok(())
    }

    fn call_host(&mut self, h: ClosureHandle, callee_slot: usize, nresults: i32) -> Result<()> {
        if self.frames.len() >= self.limits.call_depth {
            return Err(VmError::StackOverflow);
        }
        let func = match &self.heap.closure(h)?.kind {
            ClosureKind::Host { func, .. } => *func,
            ClosureKind::Lua { .. } => {
                return Err(VmError::Runtime("Lua closure in a host frame".to_string()));
            }
        };
        let base = callee_slot + 1;
        self.frames.push(Frame {
            callee: h,
            proto: None,
            pc: 0,
            base,
            ret_slot: callee_slot,
            nresults,
        });
        let nres = func(self)?;
        self.frames.pop();

        let nres = if nres < 0 { 0 } else { nres as usize };
        let src = self
            .stack
            .len()
            .checked_sub(nres)
            .ok_or(VmError::StackUnderflow)?;
        if src < callee_slot {
            return Err(VmError::StackUnderflow);
        }
        for i in 0..nres {
            self.stack[callee_slot + i] = self.stack[src + i];
        }
        self.stack.truncate(callee_slot + nres);
        if nresults != MULTRET {
            self.stack
                .resize(callee_slot + nresults.max(0) as usize, Value::Nil);
        }
        Ok(())
    }

    fn run(&mut self, floor: usize) -> Result<()> {
        while self.frames.len() > floor {
            let frame_idx = self.frames.len() - 1;
            let (proto, pc) = {
                let f = &self.frames[frame_idx];
                match &f.proto {
                    Some(p) => (p.clone(), f.pc),
                    None => {
                        return Err(VmError::Runtime(
                            "host frame reached the interpreter loop".to_string(),
                        ));
                    }
                }
            };

            if pc >= proto.code.len() {
                self.do_return(0)?;
                continue;
            }
            self.frames[frame_idx].pc = pc + 1;

            self.instruction_count += 1;
            if self.instruction_count > self.limits.instruction_limit {
                return Err(VmError::InstructionLimit);
            }

            match proto.code[pc] {
                Op::LoadNil => self.stack.push(Value::Nil),
                Op::LoadTrue => self.stack.push(Value::Boolean(true)),
                Op::LoadFalse => self.stack.push(Value::Boolean(false)),
                Op::LoadConst(i) => {
                    let v = self.const_at(frame_idx, i)?;
                    self.stack.push(v);
                }
                Op::Dup => {
                    let v = *self.stack.last().ok_or(VmError::StackUnderflow)?;
                    self.stack.push(v);
                }
                Op::GetLocal(slot) => {
                    let base = self.frames[frame_idx].base;
                    let v = self
                        .stack
                        .get(base + slot as usize)
                        .copied()
                        .ok_or(VmError::StackUnderflow)?;
                    self.stack.push(v);
                }
                Op::SetLocal(slot) => {
                    let v = self.pop_value()?;
                    let base = self.frames[frame_idx].base;
                    let s = base + slot as usize;
                    if s >= self.stack.len() {
                        return Err(VmError::StackUnderflow);
                    }
                    self.stack[s] = v;
                }
                Op::GetGlobal(i) => {
                    let key = self.const_at(frame_idx, i)?;
                    let v = self.heap.table(self.globals)?.get(&key);
                    self.stack.push(v);
                }
                Op::SetGlobal(i) => {
                    let key = self.const_at(frame_idx, i)?;
                    let v = self.pop_value()?;
                    self.heap.table_mut(self.globals)?.set(key, v);
                }
                Op::NewTable(hint) => {
                    let t = self.heap.create_table(hint as usize, 0);
                    self.stack.push(Value::Table(t));
                }
                Op::GetIndex => {
                    let key = self.pop_value()?;
                    match self.pop_value()? {
                        Value::Table(t) => {
                            let v = self.heap.table(t)?.get(&key);
                            self.stack.push(v);
                        }
                        v => {
                            return Err(VmError::Type(format!(
                                "attempt to index a {} value",
                                v.type_name()
                            )));
                        }
                    }
                }
                Op::SetIndex => {
                    let value = self.pop_value()?;
                    let key = self.pop_value()?;
                    match self.pop_value()? {
                        Value::Table(t) => self.heap.table_mut(t)?.set(key, value),
                        v => {
                            return Err(VmError::Type(format!(
                                "attempt to index a {} value",
                                v.type_name()
                            )));
                        }
                    }
                }
                op @ (Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Mod | Op::Pow) => {
                    self.arith(op)?;
                }
                Op::Concat => self.concat()?,
                op @ (Op::Eq | Op::Ne | Op::Lt | Op::Le | Op::Gt | Op::Ge) => {
                    self.compare(op)?;
                }
                Op::Neg => {
                    let v = self.pop_value()?;
                    let n = v.as_number().ok_or_else(|| {
                        VmError::Type(format!(
                            "attempt to perform arithmetic on a {} value",
                            v.type_name()
                        ))
                    })?;
                    self.stack.push(Value::Number(-n));
                }
                Op::Not => {
                    let v = self.pop_value()?;
                    self.stack.push(Value::Boolean(!v.truthy()));
                }
                Op::Len => {
                    let v = self.pop_value()?;
                    let len = match v {
                        Value::String(h) => self.heap.string(h)?.len(),
                        Value::Table(t) => self.heap.table(t)?.len(),
                        v => {
                            return Err(VmError::Type(format!(
                                "attempt to get length of a {} value",
                                v.type_name()
                            )));
                        }
                    };
                    self.stack.push(Value::Number(len as f64));
                }
                Op::Jump(off) => self.jump(frame_idx, off)?,
                Op::JumpIfFalse(off) => {
                    let v = self.pop_value()?;
                    if !v.truthy() {
                        self.jump(frame_idx, off)?;
                    }
                }
                Op::AndJump(off) => {
                    let v = *self.stack.last().ok_or(VmError::StackUnderflow)?;
                    if !v.truthy() {
                        self.jump(frame_idx, off)?;
                    } else {
                        self.pop_value()?;
                    }
                }
                Op::OrJump(off) => {
                    let v = *self.stack.last().ok_or(VmError::StackUnderflow)?;
                    if v.truthy() {
                        self.jump(frame_idx, off)?;
                    } else {
                        self.pop_value()?;
                    }
                }
                Op::Pop(n) => {
                    for _ in 0..n {
                        self.pop_value()?;
                    }
                }
                Op::Call(nargs, nres) => {
                    let callee_slot = self
                        .stack
                        .len()
                        .checked_sub(nargs as usize + 1)
                        .ok_or(VmError::StackUnderflow)?;
                    let h = self.callable_at(callee_slot)?;
                    if self.is_lua_closure(h)? {
                        self.push_lua_frame(h, callee_slot, nres as i32)?;
                    } else {
                        self.call_host(h, callee_slot, nres as i32)?;
                    }
                }
                Op::Closure(i) => {
                    let nested = proto
                        .protos
                        .get(i as usize)
                        .cloned()
                        .ok_or_else(|| VmError::Runtime("bad prototype index".to_string()))?;
                    let consts = self.bind_consts(&nested);
                    let h = self
                        .heap
                        .create_closure(ClosureKind::Lua { proto: nested, consts });
                    self.stack.push(Value::Closure(h));
                }
                Op::Return(n) => self.do_return(n as usize)?,
            }
        }
        Ok(())
    }

    fn jump(&mut self, frame_idx: usize, off: i16) -> Result<()> {
        let f = &mut self.frames[frame_idx];
        let target = f.pc as i64 + off as i64;
        if target < 0 {
            return Err(VmError::Runtime("jump out of range".to_string()));
        }
        f.pc = target as usize;
        Ok(())
    }

    fn const_at(&self, frame_idx: usize, i: u16) -> Result<Value> {
        let callee = self.frames[frame_idx].callee;
        match &self.heap.closure(callee)?.kind {
            ClosureKind::Lua { consts, .. } => consts
                .get(i as usize)
                .copied()
                .ok_or_else(|| VmError::Runtime("bad constant index".to_string())),
            ClosureKind::Host { .. } => {
                Err(VmError::Runtime("constant access in a host frame".to_string()))
            }
        }
    }

    fn do_return(&mut self, n: usize) -> Result<()> {
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| VmError::Runtime("return outside a function".to_string()))?;
        let src = self
            .stack
            .len()
            .checked_sub(n)
            .ok_or(VmError::StackUnderflow)?;
        if src < frame.ret_slot {
            return Err(VmError::StackUnderflow);
        }
        for i in 0..n {
            self.stack[frame.ret_slot + i] = self.stack[src + i];
        }
        self.stack.truncate(frame.ret_slot + n);
        if frame.nresults != MULTRET {
            self.stack
                .resize(frame.ret_slot + frame.nresults.max(0) as usize, Value::Nil);
        }
        Ok(())
    }

    fn pop_value(&mut self) -> Result<Value> {
        self.stack.pop().ok_or(VmError::StackUnderflow)
    }

    fn arith(&mut self, op: Op) -> Result<()> {
        let rhs = self.pop_value()?;
        let lhs = self.pop_value()?;
        let (a, b) = match (lhs.as_number(), rhs.as_number()) {
            (Some(a), Some(b)) => (a, b),
            _ => {
                let offender = if lhs.as_number().is_none() { lhs } else { rhs };
                return Err(VmError::Type(format!(
                    "attempt to perform arithmetic on a {} value",
                    offender.type_name()
                )));
            }
        };
        let result = match op {
            Op::Add => a + b,
            Op::Sub => a - b,
            Op::Mul => a * b,
            Op::Div => a / b,
            // Lua's modulo: result takes the sign of the divisor
            Op::Mod => a - (a / b).floor() * b,
            Op::Pow => a.powf(b),
            _ => return Err(VmError::Runtime("bad arithmetic opcode".to_string())),
        };
        self.stack.push(Value::Number(result));
        Ok(())
    }

    fn compare(&mut self, op: Op) -> Result<()> {
        let rhs = self.pop_value()?;
        let lhs = self.pop_value()?;
        let result = match op {
            Op::Eq => values_equal(&lhs, &rhs),
            Op::Ne => !values_equal(&lhs, &rhs),
            _ => self.order(&lhs, &rhs, op)?,
        };
        self.stack.push(Value::Boolean(result));
        Ok(())
    }

    fn order(&self, lhs: &Value, rhs: &Value, op: Op) -> Result<bool> {
        match (lhs, rhs) {
            (Value::Number(a), Value::Number(b)) => Ok(match op {
                Op::Lt => a < b,
                Op::Le => a <= b,
                Op::Gt => a > b,
                Op::Ge => a >= b,
                _ => false,
            }),
            (Value::String(a), Value::String(b)) => {
                let a = self.heap.string(*a)?;
                let b = self.heap.string(*b)?;
                Ok(match op {
                    Op::Lt => a < b,
                    Op::Le => a <= b,
                    Op::Gt => a > b,
                    Op::Ge => a >= b,
                    _ => false,
                })
            }
            _ => Err(VmError::Type(format!(
                "attempt to compare {} with {}",
                lhs.type_name(),
                rhs.type_name()
            ))),
        }
    }

    fn concat(&mut self) -> Result<()> {
        let rhs = self.pop_value()?;
        let lhs = self.pop_value()?;
        let text = format!("{}{}", self.concat_part(&lhs)?, self.concat_part(&rhs)?);
        let h = self.heap.create_string(&text);
        self.stack.push(Value::String(h));
        Ok(())
    }

    fn concat_part(&self, v: &Value) -> Result<String> {
        match v {
            Value::String(h) => Ok(self.heap.string(*h)?.to_string()),
            Value::Number(n) => Ok(number_to_display(*n)),
            v => Err(VmError::Type(format!(
                "attempt to concatenate a {} value",
                v.type_name()
            ))),
        }
    }
}

/// Lua `==` semantics: numbers by value (NaN is never equal), reference
/// types by identity, strings by identity (which is content, as strings
/// are interned).
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x == y,
        _ => a == b,
    }
}
