//! Userdata lifetime adapter.
//!
//! The original contract ties destruction to a per-object `__gc`
//! metamethod; this VM invokes finalizers by tag instead. The adapter
//! brokers allocation plus tag-to-destructor binding so that every
//! object of a bound type shares one destruction routine, run exactly
//! once when the VM reclaims the block.

use crate::compat::tags::{self, UNTAGGED};
use crate::vm::{LuaState, UserdataDtor};
use crate::vm::value::UserdataHandle;

/// Create a userdata block and push it.
///
/// A nonzero registered tag requests a tagged allocation, so the tag's
/// destructor runs at reclamation. Tag 0 requests a plain allocation:
/// no destructor will ever run for such blocks, and callers must not
/// expect teardown.
pub fn new_userdata_tagged(state: &mut LuaState, size: usize, tag: u8) -> UserdataHandle {
    if tag != UNTAGGED {
        state.new_userdata_tagged(size, tag)
    } else {
        state.new_userdata(size)
    }
}

/// Bind a destructor to a tag, once.
///
/// A tag already bound keeps its original destructor; tag 0 is silently
/// ignored. The destructor must run the embedded object's teardown and
/// must never raise back into the VM.
pub fn register_destructor(state: &mut LuaState, tag: u8, dtor: UserdataDtor) {
    if tag == UNTAGGED {
        return;
    }
    if state.userdata_dtor(tag).is_none() {
        state.set_userdata_dtor(tag, dtor);
    }
}

/// Object-creation helper: resolve the tag for a type name and bind its
/// destructor in one step (the first-check-then-set discipline object
/// creation sites must follow). Returns the tag, which is [`UNTAGGED`]
/// when the tag space is exhausted.
pub fn register_type(state: &mut LuaState, name: &str, dtor: UserdataDtor) -> u8 {
    let tag = tags::get_or_create_tag(name);
    register_destructor(state, tag, dtor);
    tag
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static DROPS: AtomicUsize = AtomicUsize::new(0);

    fn counting_dtor(_data: &mut [u8]) {
        DROPS.fetch_add(1, Ordering::SeqCst);
    }

    fn other_dtor(_data: &mut [u8]) {}

    #[test]
    fn destructor_binding_is_once_only() {
        let mut state = LuaState::new();
        register_destructor(&mut state, 7, counting_dtor);
        register_destructor(&mut state, 7, other_dtor);
        assert_eq!(state.userdata_dtor(7), Some(counting_dtor as UserdataDtor));
    }

    #[test]
    fn untagged_registration_is_ignored() {
        let mut state = LuaState::new();
        register_destructor(&mut state, UNTAGGED, counting_dtor);
        assert!(state.userdata_dtor(UNTAGGED).is_none());
    }

    #[test]
    fn untagged_blocks_are_never_finalized() {
        DROPS.store(0, Ordering::SeqCst);
        {
            let mut state = LuaState::new();
            register_destructor(&mut state, 9, counting_dtor);
            new_userdata_tagged(&mut state, 16, UNTAGGED);
            state.set_top(0).unwrap();
            state.collect_garbage();
        }
        assert_eq!(DROPS.load(Ordering::SeqCst), 0);
    }
}
