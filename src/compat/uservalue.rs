//! User-value emulation.
//!
//! The original contract gives userdata N indexed auxiliary slots. This
//! VM has no such slots; it has a single environment-table association
//! per userdata. The adapter stores uservalues positionally in that
//! table, creating it lazily on first write. The positional index is
//! not validated against a declared count — the VM has no declared
//! count to validate against.

use crate::vm::error::Result;
use crate::vm::value::UserdataHandle;
use crate::vm::{LuaState, LuaType};

// Pre-size for the lazily created environment table; typical consumers
// attach one or two uservalues.
const ENV_SIZE_HINT: usize = 4;

/// Create a userdata block with `n` uservalue slots and push it.
///
/// When `n` is positive the environment table is attached eagerly,
/// sized for `n` entries.
pub fn new_userdata_with_uservalues(
    state: &mut LuaState,
    size: usize,
    n: usize,
) -> Result<UserdataHandle> {
    let h = state.new_userdata(size);
    if n > 0 {
        state.create_table(n, 0);
        state.set_env(-2)?;
    }
    Ok(h)
}

/// Store the value at the top of the stack as uservalue `n` of the
/// userdata at `idx`, popping it. Creates the environment table on
/// first use.
pub fn set_uservalue(state: &mut LuaState, idx: i32, n: i32) -> Result<()> {
    let idx = state.abs_index(idx);

    // Stack: [value]
    state.get_env(idx)?;
    if state.is_nil(-1) {
        state.pop(1)?;
        state.create_table(ENV_SIZE_HINT, 0);
        state.push_value(-1)?;
        state.set_env(idx)?;
    }

    // Stack: [value] [env]
    state.push_value(-2)?;
    state.raw_set_index(-2, n)?;
    state.pop(2)?;
    Ok(())
}

/// Push uservalue `n` of the userdata at `idx` and return its type.
///
/// Absent slots and objects with no environment table both yield nil,
/// never an error.
pub fn get_uservalue(state: &mut LuaState, idx: i32, n: i32) -> Result<LuaType> {
    let idx = state.abs_index(idx);

    state.get_env(idx)?;
    if state.is_nil(-1) {
        // No environment table: the pushed nil is the result
        return Ok(LuaType::Nil);
    }

    state.raw_get_index(-1, n)?;
    state.remove(-2)?;
    Ok(state.type_of(-1).unwrap_or(LuaType::Nil))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eager_environment_for_declared_count() {
        let mut state = LuaState::new();
        new_userdata_with_uservalues(&mut state, 8, 2).unwrap();
        state.get_env(-1).unwrap();
        assert_eq!(state.type_of(-1), Some(LuaType::Table));
    }

    #[test]
    fn lazy_environment_on_first_write() {
        let mut state = LuaState::new();
        state.new_userdata(8);
        state.get_env(-1).unwrap();
        assert!(state.is_nil(-1));
        state.pop(1).unwrap();

        state.push_number(42.0);
        set_uservalue(&mut state, -2, 1).unwrap();
        state.get_env(-1).unwrap();
        assert_eq!(state.type_of(-1), Some(LuaType::Table));
    }
}
