//! No-op hook shims.
//!
//! The original contract's line/call/return hook machinery has no
//! equivalent in this VM. These entry points exist so call sites still
//! compile and run; they register nothing and always report that no
//! hook is installed. They must never be mistaken for a working hook
//! mechanism.

use crate::compat::debug::DebugFrame;
use crate::vm::LuaState;

/// Hook event: call
pub const HOOK_CALL: i32 = 0;
/// Hook event: return
pub const HOOK_RET: i32 = 1;
/// Hook event: line
pub const HOOK_LINE: i32 = 2;
/// Hook event: count
pub const HOOK_COUNT: i32 = 3;
/// Hook event: tail call
pub const HOOK_TAIL_CALL: i32 = 4;

/// Hook mask: call events
pub const MASK_CALL: i32 = 1 << 0;
/// Hook mask: return events
pub const MASK_RET: i32 = 1 << 1;
/// Hook mask: line events
pub const MASK_LINE: i32 = 1 << 2;
/// Hook mask: count events
pub const MASK_COUNT: i32 = 1 << 3;

/// Hook function signature, kept for call-site compatibility
pub type Hook = fn(&mut LuaState, &DebugFrame);

/// Accepts any hook registration and installs nothing. Returns 0, the
/// original contract's success value.
pub fn set_hook(_state: &mut LuaState, _hook: Option<Hook>, _mask: i32, _count: i32) -> i32 {
    0
}

/// Always reports that no hook is installed.
pub fn get_hook(_state: &LuaState) -> Option<Hook> {
    None
}

/// Always reports an empty hook mask.
pub fn get_hook_mask(_state: &LuaState) -> i32 {
    0
}

/// Always reports a zero hook count.
pub fn get_hook_count(_state: &LuaState) -> i32 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_hook(_state: &mut LuaState, _frame: &DebugFrame) {}

    #[test]
    fn registration_is_an_honest_no_op() {
        let mut state = LuaState::new();
        assert_eq!(
            set_hook(&mut state, Some(sample_hook), MASK_CALL | MASK_LINE, 100),
            0
        );
        assert!(get_hook(&state).is_none());
        assert_eq!(get_hook_mask(&state), 0);
        assert_eq!(get_hook_count(&state), 0);
    }
}
