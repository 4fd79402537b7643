//! Stack manipulation adapter.
//!
//! The VM has no native rotate or copy primitives; both are expressed
//! through push/remove/insert/replace. The rotation here matches the
//! original contract's direction: positive `n` rotates toward the top,
//! negative toward the base.

use crate::vm::error::{Result, VmError};
use crate::vm::LuaState;

/// Rotate the stack segment between `idx` and the top by `n` positions.
pub fn rotate(state: &mut LuaState, idx: i32, n: i32) -> Result<()> {
    let top = state.get_top();
    let idx = state.abs_index(idx);
    if idx < 1 || idx > top {
        return Err(VmError::InvalidIndex(idx));
    }

    if n > 0 {
        // Toward the top: the top value wraps around to `idx`
        for _ in 0..n {
            state.push_value(top)?;
            state.remove(top)?;
            state.insert(idx)?;
        }
    } else {
        // Toward the base: the value at `idx` wraps around to the top
        for _ in 0..-n {
            state.push_value(idx)?;
            state.remove(idx)?;
            state.insert(top)?;
        }
    }
    Ok(())
}

/// Copy the value at `from` into slot `to` without disturbing the
/// stack height.
pub fn copy(state: &mut LuaState, from: i32, to: i32) -> Result<()> {
    state.push_value(from)?;
    state.replace(to)
}
