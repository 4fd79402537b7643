//! The VM state and its native primitive surface.
//!
//! `LuaState` exposes the Luau-shaped API the compatibility layer is
//! written against: stack primitives, tagged userdata with per-tag
//! destructors, environment tables, registry references, level-indexed
//! debug queries, and the bytecode loader. Positive stack indices are
//! 1-based from the current call base; negative indices count from the
//! top.

use crate::vm::bytecode::{self, Constant, Proto};
use crate::vm::error::{Result, VmError};
use crate::vm::heap::{ClosureKind, GcStats, Heap, UserdataDtor};
use crate::vm::value::{
    ClosureHandle, HostFunction, LuaType, TableHandle, UserdataHandle, Value,
};
use crate::vm::VmLimits;
use std::collections::HashMap;
use std::rc::Rc;

/// Result-count sentinel meaning "keep every returned value"
pub const MULTRET: i32 = -1;

/// An activation record
#[derive(Debug)]
pub(crate) struct Frame {
    /// The closure being executed
    pub callee: ClosureHandle,

    /// Prototype for Lua frames; None for host frames
    pub proto: Option<Rc<Proto>>,

    /// Next instruction to execute
    pub pc: usize,

    /// Absolute stack index of local slot 0
    pub base: usize,

    /// Absolute stack index where results are placed
    pub ret_slot: usize,

    /// Expected result count, or MULTRET
    pub nresults: i32,
}

/// Debug information for one stack level
#[derive(Debug, Clone)]
pub struct DebugInfo {
    /// Function name, when one is known (host functions only)
    pub name: Option<String>,

    /// Frame kind: "main", "Lua", or "C"
    pub what: Option<&'static str>,

    /// Chunk name the function came from
    pub source: Option<String>,

    /// Shortened source for messages
    pub short_src: Option<String>,

    /// Line currently executing, or -1
    pub current_line: i32,

    /// Line the function was defined on, or -1
    pub line_defined: i32,
}

impl Default for DebugInfo {
    fn default() -> Self {
        DebugInfo {
            name: None,
            what: None,
            source: None,
            short_src: None,
            current_line: -1,
            line_defined: -1,
        }
    }
}

/// A single VM instance. One state per driving thread; states share
/// nothing except what the embedder shares explicitly.
pub struct LuaState {
    pub(crate) heap: Heap,
    pub(crate) stack: Vec<Value>,
    pub(crate) frames: Vec<Frame>,
    pub(crate) globals: TableHandle,
    pub(crate) registry: TableHandle,
    pub(crate) dtors: HashMap<u8, UserdataDtor>,
    pub(crate) limits: VmLimits,
    pub(crate) instruction_count: u64,
    next_ref: i32,
}

impl LuaState {
    /// Create a state with default limits
    pub fn new() -> Self {
        Self::with_limits(VmLimits::default())
    }

    /// Create a state with explicit limits
    pub fn with_limits(limits: VmLimits) -> Self {
        let mut heap = Heap::new();
        let globals = heap.create_table(0, 16);
        let registry = heap.create_table(0, 8);
        LuaState {
            heap,
            stack: Vec::new(),
            frames: Vec::new(),
            globals,
            registry,
            dtors: HashMap::new(),
            limits,
            instruction_count: 0,
            next_ref: 1,
        }
    }

    // ------------------------------------------------------------------
    // Stack primitives
    // ------------------------------------------------------------------

    pub(crate) fn current_base(&self) -> usize {
        self.frames.last().map(|f| f.base).unwrap_or(0)
    }

    /// Resolve an acceptable index to an absolute stack slot
    pub(crate) fn slot(&self, idx: i32) -> Result<usize> {
        let base = self.current_base();
        if idx > 0 {
            let s = base + idx as usize - 1;
            if s < self.stack.len() {
                return Ok(s);
            }
        } else if idx < 0 {
            let s = self.stack.len() as i64 + idx as i64;
            if s >= base as i64 {
                return Ok(s as usize);
            }
        }
        Err(VmError::InvalidIndex(idx))
    }

    /// Number of values above the current call base
    pub fn get_top(&self) -> i32 {
        (self.stack.len() - self.current_base()) as i32
    }

    /// Grow or shrink the stack to `n` values above the base
    pub fn set_top(&mut self, n: i32) -> Result<()> {
        let base = self.current_base();
        let target = if n >= 0 {
            base as i64 + n as i64
        } else {
            self.stack.len() as i64 + n as i64 + 1
        };
        if target < base as i64 {
            return Err(VmError::InvalidIndex(n));
        }
        if target as usize > self.limits.stack_slots {
            return Err(VmError::StackOverflow);
        }
        self.stack.resize(target as usize, Value::Nil);
        Ok(())
    }

    /// Pop n values
    pub fn pop(&mut self, n: i32) -> Result<()> {
        self.set_top(-n - 1)
    }

    /// Convert an acceptable index into an absolute (positive) index
    pub fn abs_index(&self, idx: i32) -> i32 {
        if idx > 0 {
            idx
        } else {
            self.get_top() + idx + 1
        }
    }

    pub(crate) fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    /// Push nil
    pub fn push_nil(&mut self) {
        self.push(Value::Nil);
    }

    /// Push a boolean
    pub fn push_boolean(&mut self, b: bool) {
        self.push(Value::Boolean(b));
    }

    /// Push a number
    pub fn push_number(&mut self, n: f64) {
        self.push(Value::Number(n));
    }

    /// Push a string
    pub fn push_string(&mut self, s: &str) {
        let h = self.heap.create_string(s);
        self.push(Value::String(h));
    }

    /// Push a copy of the value at `idx`
    pub fn push_value(&mut self, idx: i32) -> Result<()> {
        let v = self.stack[self.slot(idx)?];
        self.push(v);
        Ok(())
    }

    /// Remove the value at `idx`, shifting the values above it down
    pub fn remove(&mut self, idx: i32) -> Result<()> {
        let s = self.slot(idx)?;
        self.stack.remove(s);
        Ok(())
    }

    /// Move the top value into `idx`, shifting the values above it up
    pub fn insert(&mut self, idx: i32) -> Result<()> {
        let s = self.slot(idx)?;
        let v = self.stack.pop().ok_or(VmError::StackUnderflow)?;
        if s > self.stack.len() {
            return Err(VmError::InvalidIndex(idx));
        }
        self.stack.insert(s, v);
        Ok(())
    }

    /// Pop the top value into `idx`
    pub fn replace(&mut self, idx: i32) -> Result<()> {
        let s = self.slot(idx)?;
        let v = self.stack.pop().ok_or(VmError::StackUnderflow)?;
        if s == self.stack.len() {
            // Replacing the top with itself: push it back
            self.stack.push(v);
        } else {
            self.stack[s] = v;
        }
        Ok(())
    }

    /// Copy of the value at `idx`
    pub fn value_at(&self, idx: i32) -> Result<Value> {
        Ok(self.stack[self.slot(idx)?])
    }

    /// Type of the value at `idx`, or None for an empty slot
    pub fn type_of(&self, idx: i32) -> Option<LuaType> {
        self.slot(idx).ok().map(|s| self.stack[s].type_of())
    }

    /// True if the value at `idx` is nil (or the index is empty)
    pub fn is_nil(&self, idx: i32) -> bool {
        matches!(self.type_of(idx), Some(LuaType::Nil) | None)
    }

    /// True if the value at `idx` is a number
    pub fn is_number(&self, idx: i32) -> bool {
        matches!(self.type_of(idx), Some(LuaType::Number))
    }

    /// Read the number at `idx`
    pub fn to_number(&self, idx: i32) -> Option<f64> {
        self.slot(idx).ok().and_then(|s| self.stack[s].as_number())
    }

    /// Read the boolean interpretation of the value at `idx`
    pub fn to_boolean(&self, idx: i32) -> bool {
        self.slot(idx)
            .ok()
            .map(|s| self.stack[s].truthy())
            .unwrap_or(false)
    }

    /// Read the string at `idx`
    pub fn to_str(&self, idx: i32) -> Option<&str> {
        let s = self.slot(idx).ok()?;
        match self.stack[s] {
            Value::String(h) => self.heap.string(h).ok(),
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Tables, globals, registry
    // ------------------------------------------------------------------

    /// Create a table with capacity hints and push it
    pub fn create_table(&mut self, narr: usize, nrec: usize) -> TableHandle {
        let t = self.heap.create_table(narr, nrec);
        self.push(Value::Table(t));
        t
    }

    /// Push `t[n]` for the table at `idx`; returns the pushed type
    pub fn raw_get_index(&mut self, idx: i32, n: i32) -> Result<LuaType> {
        let t = self.table_at(idx)?;
        let v = self.heap.table(t)?.get(&Value::Number(n as f64));
        self.push(v);
        Ok(v.type_of())
    }

    /// Pop a value and store it at `t[n]` for the table at `idx`
    pub fn raw_set_index(&mut self, idx: i32, n: i32) -> Result<()> {
        let t = self.table_at(idx)?;
        let v = self.stack.pop().ok_or(VmError::StackUnderflow)?;
        self.heap.table_mut(t)?.set(Value::Number(n as f64), v);
        Ok(())
    }

    /// Push `t[name]` for the table at `idx`; returns the pushed type
    pub fn get_field(&mut self, idx: i32, name: &str) -> Result<LuaType> {
        let t = self.table_at(idx)?;
        let key = Value::String(self.heap.create_string(name));
        let v = self.heap.table(t)?.get(&key);
        self.push(v);
        Ok(v.type_of())
    }

    /// Pop a value and store it at `t[name]` for the table at `idx`
    pub fn set_field(&mut self, idx: i32, name: &str) -> Result<()> {
        let t = self.table_at(idx)?;
        let v = self.stack.pop().ok_or(VmError::StackUnderflow)?;
        let key = Value::String(self.heap.create_string(name));
        self.heap.table_mut(t)?.set(key, v);
        Ok(())
    }

    /// Length of the string or table at `idx` (0 for other types)
    pub fn object_len(&self, idx: i32) -> Result<usize> {
        match self.value_at(idx)? {
            Value::String(h) => Ok(self.heap.string(h)?.len()),
            Value::Table(t) => Ok(self.heap.table(t)?.len()),
            _ => Ok(0),
        }
    }

    /// Push the global named `name`; returns the pushed type
    pub fn get_global(&mut self, name: &str) -> Result<LuaType> {
        let key = Value::String(self.heap.create_string(name));
        let v = self.heap.table(self.globals)?.get(&key);
        self.push(v);
        Ok(v.type_of())
    }

    /// Pop a value and bind it to the global named `name`
    pub fn set_global(&mut self, name: &str) -> Result<()> {
        let v = self.stack.pop().ok_or(VmError::StackUnderflow)?;
        let key = Value::String(self.heap.create_string(name));
        self.heap.table_mut(self.globals)?.set(key, v);
        Ok(())
    }

    /// Push the globals table
    pub fn push_globals(&mut self) {
        let t = self.globals;
        self.push(Value::Table(t));
    }

    /// Push the registry table
    pub fn push_registry(&mut self) {
        let t = self.registry;
        self.push(Value::Table(t));
    }

    fn table_at(&self, idx: i32) -> Result<TableHandle> {
        match self.value_at(idx)? {
            Value::Table(t) => Ok(t),
            v => Err(VmError::Type(format!(
                "expected a table, got {}",
                v.type_name()
            ))),
        }
    }

    // ------------------------------------------------------------------
    // Host functions
    // ------------------------------------------------------------------

    /// Push a host closure with a debug name, capturing `nup` values
    /// from the top of the stack as upvalues (first pushed is upvalue 1).
    pub fn push_host_closure(
        &mut self,
        func: HostFunction,
        name: &str,
        nup: usize,
    ) -> Result<ClosureHandle> {
        if self.stack.len() < self.current_base() + nup {
            return Err(VmError::StackUnderflow);
        }
        let upvalues = self.stack.split_off(self.stack.len() - nup);
        let h = self.heap.create_closure(ClosureKind::Host {
            func,
            name: name.to_string(),
            upvalues,
        });
        self.push(Value::Closure(h));
        Ok(h)
    }

    /// Read upvalue `n` (1-based) of the running host function
    pub fn upvalue(&self, n: usize) -> Option<Value> {
        let frame = self.frames.last()?;
        match &self.heap.closure(frame.callee).ok()?.kind {
            ClosureKind::Host { upvalues, .. } => upvalues.get(n.checked_sub(1)?).copied(),
            ClosureKind::Lua { .. } => None,
        }
    }

    // ------------------------------------------------------------------
    // Userdata
    // ------------------------------------------------------------------

    /// Create an untagged userdata block and push it
    pub fn new_userdata(&mut self, size: usize) -> UserdataHandle {
        let h = self.heap.create_userdata(size, 0);
        self.push(Value::Userdata(h));
        h
    }

    /// Create a tagged userdata block and push it. The destructor
    /// registered for `tag` runs when the block is reclaimed.
    pub fn new_userdata_tagged(&mut self, size: usize, tag: u8) -> UserdataHandle {
        let h = self.heap.create_userdata(size, tag);
        self.push(Value::Userdata(h));
        h
    }

    /// Register the destructor invoked for userdata carrying `tag`.
    /// Later registrations overwrite earlier ones; once-only discipline
    /// is the compatibility layer's concern.
    pub fn set_userdata_dtor(&mut self, tag: u8, dtor: UserdataDtor) {
        if tag != 0 {
            self.dtors.insert(tag, dtor);
        }
    }

    /// Destructor currently registered for `tag`
    pub fn userdata_dtor(&self, tag: u8) -> Option<UserdataDtor> {
        self.dtors.get(&tag).copied()
    }

    /// Tag of the userdata at `idx`
    pub fn userdata_tag(&self, idx: i32) -> Result<u8> {
        let h = self.userdata_at(idx)?;
        Ok(self.heap.userdata(h)?.tag)
    }

    /// Mutable access to the raw block of the userdata at `idx`
    pub fn userdata_data_mut(&mut self, idx: i32) -> Result<&mut [u8]> {
        let h = self.userdata_at(idx)?;
        Ok(&mut self.heap.userdata_mut(h)?.data)
    }

    /// Push the environment table of the userdata at `idx`, or nil when
    /// none has been attached
    pub fn get_env(&mut self, idx: i32) -> Result<()> {
        let h = self.userdata_at(idx)?;
        let env = self.heap.userdata(h)?.env;
        match env {
            Some(t) => self.push(Value::Table(t)),
            None => self.push(Value::Nil),
        }
        Ok(())
    }

    /// Pop a table (or nil) and attach it as the environment of the
    /// userdata at `idx`
    pub fn set_env(&mut self, idx: i32) -> Result<()> {
        let h = self.userdata_at(idx)?;
        let v = self.stack.pop().ok_or(VmError::StackUnderflow)?;
        let env = match v {
            Value::Table(t) => Some(t),
            Value::Nil => None,
            v => {
                return Err(VmError::Type(format!(
                    "environment must be a table, got {}",
                    v.type_name()
                )));
            }
        };
        self.heap.userdata_mut(h)?.env = env;
        Ok(())
    }

    fn userdata_at(&self, idx: i32) -> Result<UserdataHandle> {
        match self.value_at(idx)? {
            Value::Userdata(h) => Ok(h),
            v => Err(VmError::Type(format!(
                "expected userdata, got {}",
                v.type_name()
            ))),
        }
    }

    // ------------------------------------------------------------------
    // Registry references
    // ------------------------------------------------------------------

    /// Pop the top value and pin it in the registry, returning its id
    pub fn create_ref(&mut self) -> Result<i32> {
        let v = self.stack.pop().ok_or(VmError::StackUnderflow)?;
        let id = self.next_ref;
        self.next_ref += 1;
        self.heap
            .table_mut(self.registry)?
            .set(Value::Number(id as f64), v);
        Ok(id)
    }

    /// Release a registry reference
    pub fn release_ref(&mut self, id: i32) -> Result<()> {
        self.heap
            .table_mut(self.registry)?
            .set(Value::Number(id as f64), Value::Nil);
        Ok(())
    }

    /// Push the value pinned under a registry reference
    pub fn push_ref(&mut self, id: i32) -> Result<LuaType> {
        let v = self.heap.table(self.registry)?.get(&Value::Number(id as f64));
        self.push(v);
        Ok(v.type_of())
    }

    // ------------------------------------------------------------------
    // Loader
    // ------------------------------------------------------------------

    /// Load a bytecode buffer, pushing the resulting closure.
    ///
    /// Fails with a `Bytecode` error on malformed input; the buffer must
    /// be the success form produced by `compile`.
    pub fn load_bytecode(&mut self, chunk_name: &str, bytes: &[u8]) -> Result<ClosureHandle> {
        let proto = bytecode::deserialize(bytes, chunk_name)?;
        let consts = self.bind_consts(&proto);
        let h = self.heap.create_closure(ClosureKind::Lua { proto, consts });
        self.push(Value::Closure(h));
        Ok(h)
    }

    pub(crate) fn bind_consts(&mut self, proto: &Proto) -> Vec<Value> {
        proto
            .consts
            .iter()
            .map(|c| match c {
                Constant::Nil => Value::Nil,
                Constant::True => Value::Boolean(true),
                Constant::False => Value::Boolean(false),
                Constant::Number(n) => Value::Number(*n),
                Constant::Str(s) => Value::String(self.heap.create_string(s)),
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Debug introspection (single-call, level-indexed)
    // ------------------------------------------------------------------

    /// Current call stack depth
    pub fn stack_depth(&self) -> i32 {
        self.frames.len() as i32
    }

    /// Query debug information at a stack level (0 = innermost).
    ///
    /// `what` selects fields: 's' source/what/linedefined, 'l' current
    /// line, 'n' name, 'f' pushes the function itself.
    pub fn debug_info(&mut self, level: i32, what: &str) -> Option<DebugInfo> {
        if level < 0 {
            return None;
        }
        let idx = self.frames.len().checked_sub(1 + level as usize)?;
        let (callee, pc) = {
            let f = &self.frames[idx];
            (f.callee, f.pc)
        };

        let mut info = DebugInfo::default();
        {
            let closure = self.heap.closure(callee).ok()?;
            match &closure.kind {
                ClosureKind::Host { name, .. } => {
                    if what.contains('s') {
                        info.what = Some("C");
                        info.source = Some("=[C]".to_string());
                        info.short_src = Some("[C]".to_string());
                    }
                    if what.contains('n') {
                        info.name = Some(name.clone());
                    }
                }
                ClosureKind::Lua { proto, .. } => {
                    if what.contains('s') {
                        info.what = Some(if proto.line_defined == 0 { "main" } else { "Lua" });
                        info.source = Some(proto.chunk_name.clone());
                        info.short_src = Some(proto.chunk_name.clone());
                        info.line_defined = proto.line_defined as i32;
                    }
                    if what.contains('l') {
                        info.current_line = pc
                            .checked_sub(1)
                            .and_then(|i| proto.lines.get(i))
                            .map(|l| *l as i32)
                            .unwrap_or(-1);
                    }
                    // 'n' for Lua functions is not resolved; a name
                    // would require call-site analysis this VM does not
                    // keep.
                }
            }
        }

        if what.contains('f') {
            self.push(Value::Closure(callee));
        }
        Some(info)
    }

    /// Push the value of local `n` (1-based) at a stack level and
    /// return its name. Host frames and out-of-range locals yield None.
    pub fn local_at(&mut self, level: i32, n: i32) -> Option<String> {
        if level < 0 || n < 1 {
            return None;
        }
        let idx = self.frames.len().checked_sub(1 + level as usize)?;
        let (callee, base) = {
            let f = &self.frames[idx];
            (f.callee, f.base)
        };
        let (name, slot) = {
            let closure = self.heap.closure(callee).ok()?;
            match &closure.kind {
                ClosureKind::Lua { proto, .. } => {
                    let local = proto.locals.get((n - 1) as usize)?;
                    (local.name.clone(), local.slot as usize)
                }
                ClosureKind::Host { .. } => return None,
            }
        };
        let value = self.stack.get(base + slot).copied()?;
        self.push(value);
        Some(name)
    }

    // ------------------------------------------------------------------
    // Garbage collection
    // ------------------------------------------------------------------

    /// Run a full collection cycle. Destructors of unreachable tagged
    /// userdata run exactly once, before their blocks are reclaimed.
    pub fn collect_garbage(&mut self) -> GcStats {
        let mut roots: Vec<Value> = self.stack.clone();
        roots.push(Value::Table(self.globals));
        roots.push(Value::Table(self.registry));
        for frame in &self.frames {
            roots.push(Value::Closure(frame.callee));
        }
        self.heap.collect(&roots, &self.dtors)
    }

    /// Number of live userdata blocks (for tests and diagnostics)
    pub fn userdata_count(&self) -> usize {
        self.heap.userdata_count()
    }
}

impl Default for LuaState {
    fn default() -> Self {
        LuaState::new()
    }
}

impl Drop for LuaState {
    /// Closing the state finalizes every still-live tagged userdata.
    /// Blocks already reclaimed by a collection cycle are gone from the
    /// heap, so no destructor can run twice.
    fn drop(&mut self) {
        for h in self.heap.userdata_handles() {
            if let Ok(ud) = self.heap.userdata_mut(h) {
                if ud.tag != 0 {
                    if let Some(dtor) = self.dtors.get(&ud.tag) {
                        dtor(&mut ud.data);
                    }
                }
            }
        }
    }
}
