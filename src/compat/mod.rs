//! Lua 5.4 API compatibility layer.
//!
//! Every adapter here is an ordinary wrapper function with the original
//! contract's shape, implemented purely in terms of the VM's native
//! primitives:
//! - `tags` / `userdata`: tag-dispatched destructors standing in for
//!   per-object `__gc` finalization
//! - `uservalue`: indexed user-value slots over environment tables
//! - `numeric`: 64-bit integer pushes and reads over doubles
//! - `loader` / `cache`: source loading over compile-then-load
//! - `stack`: rotate and copy over push/remove/insert/replace
//! - `debug`: the two-call frame API over single-call level queries
//! - `hooks`: honest no-ops for the hook registration surface
//!
//! This module itself carries the small-surface shims: the globals
//! table push, integer-indexed table access, lengths, registry
//! references, and host-function pushes that supply the debug name the
//! VM requires.

pub mod cache;
pub mod debug;
pub mod hooks;
pub mod loader;
pub mod numeric;
pub mod stack;
pub mod tags;
pub mod userdata;
pub mod uservalue;

pub use cache::BytecodeCache;
pub use debug::DebugFrame;
pub use loader::LoadError;
pub use tags::{get_or_create_tag, TagRegistry, MAX_USERDATA_TAGS, UNTAGGED};

use crate::vm::error::Result;
use crate::vm::value::ClosureHandle;
use crate::vm::{HostFunction, LuaState, LuaType};

/// Reference id meaning "the pinned value was nil"
pub const REF_NIL: i32 = -1;

/// Reference id meaning "no reference was created"
pub const NO_REF: i32 = -2;

/// Push the globals table (the original contract's pseudo-index has no
/// equivalent here).
pub fn push_global_table(state: &mut LuaState) {
    state.push_globals();
}

/// Push `t[n]` for the table at `idx`. The 64-bit key is narrowed to
/// the VM's 32-bit raw table operation.
pub fn get_index(state: &mut LuaState, idx: i32, n: i64) -> Result<LuaType> {
    state.raw_get_index(idx, n as i32)
}

/// Pop a value into `t[n]` for the table at `idx`, narrowing the key
/// like `get_index`.
pub fn set_index(state: &mut LuaState, idx: i32, n: i64) -> Result<()> {
    state.raw_set_index(idx, n as i32)
}

/// Length of the value at `idx` as an integer
pub fn table_len(state: &LuaState, idx: i32) -> Result<i64> {
    state.object_len(idx).map(|len| len as i64)
}

/// Pop the top value and pin it in the registry, returning a reference
/// id. Popping nil yields [`REF_NIL`] without creating a reference.
pub fn create_ref(state: &mut LuaState) -> Result<i32> {
    if state.get_top() == 0 {
        return Ok(NO_REF);
    }
    if state.is_nil(-1) {
        state.pop(1)?;
        return Ok(REF_NIL);
    }
    state.create_ref()
}

/// Release a reference id; the sentinel ids are accepted and ignored.
pub fn release_ref(state: &mut LuaState, id: i32) -> Result<()> {
    if id >= 0 {
        state.release_ref(id)?;
    }
    Ok(())
}

/// Push the value pinned under a reference id ([`REF_NIL`] and
/// [`NO_REF`] push nil).
pub fn push_ref(state: &mut LuaState, id: i32) -> Result<LuaType> {
    if id < 0 {
        state.push_nil();
        return Ok(LuaType::Nil);
    }
    state.push_ref(id)
}

/// Push a host function, supplying the debug name the VM requires of
/// every host closure.
pub fn push_function(
    state: &mut LuaState,
    func: HostFunction,
    name: &str,
) -> Result<ClosureHandle> {
    state.push_host_closure(func, name, 0)
}

/// Push a host closure capturing `nup` upvalues from the stack top.
pub fn push_closure(
    state: &mut LuaState,
    func: HostFunction,
    name: &str,
    nup: usize,
) -> Result<ClosureHandle> {
    state.push_host_closure(func, name, nup)
}
