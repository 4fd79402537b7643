//! Finalization timing and tag registry behavior.
//!
//! Destructors are dispatched by tag, run exactly once per block, after
//! the last reference is gone and before the memory is reclaimed.

use luau_compat::compat::tags::{self, TagRegistry, UNTAGGED};
use luau_compat::compat::userdata;
use luau_compat::LuaState;
use std::sync::Mutex;

static FINALIZED: Mutex<Vec<u64>> = Mutex::new(Vec::new());

fn record_dtor(data: &mut [u8]) {
    let mut id = [0u8; 8];
    id.copy_from_slice(&data[..8]);
    FINALIZED.lock().unwrap().push(u64::from_le_bytes(id));
}

fn stamp(state: &mut LuaState, id: u64) {
    state.userdata_data_mut(-1).unwrap()[..8].copy_from_slice(&id.to_le_bytes());
}

fn finalized_count(id: u64) -> usize {
    FINALIZED.lock().unwrap().iter().filter(|&&x| x == id).count()
}

#[test]
fn distinct_type_names_get_distinct_stable_tags() {
    let a = tags::get_or_create_tag("finalizer-tests-type-a");
    let b = tags::get_or_create_tag("finalizer-tests-type-b");
    assert_ne!(a, b);
    assert_eq!(tags::get_or_create_tag("finalizer-tests-type-a"), a);
    assert_eq!(tags::get_or_create_tag("finalizer-tests-type-b"), b);
}

#[test]
fn destructor_runs_after_last_reference_exactly_once() {
    let mut state = LuaState::new();
    let tag = userdata::register_type(&mut state, "finalizer-tests-handle", record_dtor);
    assert_ne!(tag, UNTAGGED);

    userdata::new_userdata_tagged(&mut state, 16, tag);
    stamp(&mut state, 101);

    // Still referenced from the stack: must not be finalized
    state.collect_garbage();
    assert_eq!(finalized_count(101), 0);

    // Drop the reference: the next cycle finalizes it, once
    state.set_top(0).unwrap();
    let stats = state.collect_garbage();
    assert_eq!(stats.finalized, 1);
    assert_eq!(finalized_count(101), 1);
    assert_eq!(state.userdata_count(), 0);

    // Further cycles have nothing left to finalize
    state.collect_garbage();
    assert_eq!(finalized_count(101), 1);
}

#[test]
fn closing_the_state_finalizes_live_blocks_once() {
    {
        let mut state = LuaState::new();
        let tag = userdata::register_type(&mut state, "finalizer-tests-handle", record_dtor);
        userdata::new_userdata_tagged(&mut state, 16, tag);
        stamp(&mut state, 202);
        // Still on the stack when the state goes away
    }
    assert_eq!(finalized_count(202), 1);
}

#[test]
fn collected_blocks_are_not_refinalized_at_close() {
    {
        let mut state = LuaState::new();
        let tag = userdata::register_type(&mut state, "finalizer-tests-handle", record_dtor);
        userdata::new_userdata_tagged(&mut state, 16, tag);
        stamp(&mut state, 303);
        state.set_top(0).unwrap();
        state.collect_garbage();
        assert_eq!(finalized_count(303), 1);
    }
    assert_eq!(finalized_count(303), 1);
}

#[test]
fn blocks_sharing_a_tag_share_one_destructor() {
    let mut state = LuaState::new();
    let tag = userdata::register_type(&mut state, "finalizer-tests-handle", record_dtor);

    userdata::new_userdata_tagged(&mut state, 16, tag);
    stamp(&mut state, 404);
    userdata::new_userdata_tagged(&mut state, 16, tag);
    stamp(&mut state, 405);

    state.set_top(0).unwrap();
    state.collect_garbage();
    assert_eq!(finalized_count(404), 1);
    assert_eq!(finalized_count(405), 1);
}

#[test]
fn exhausted_tag_space_degrades_to_no_finalizer() {
    let mut registry = TagRegistry::new();
    for i in 0..255 {
        assert_ne!(registry.get_or_create_tag(&format!("exhaust-{}", i)), UNTAGGED);
    }
    let tag = registry.get_or_create_tag("exhaust-overflow");
    assert_eq!(tag, UNTAGGED);

    // Tag 0 requests a plain allocation: no destructor ever runs
    let mut state = LuaState::new();
    userdata::register_destructor(&mut state, tag, record_dtor);
    userdata::new_userdata_tagged(&mut state, 16, tag);
    stamp(&mut state, 505);
    state.set_top(0).unwrap();
    state.collect_garbage();
    drop(state);
    assert_eq!(finalized_count(505), 0);
}

#[test]
fn rebinding_a_tag_keeps_the_first_destructor() {
    fn second_dtor(_data: &mut [u8]) {
        panic!("second destructor must never be bound");
    }

    let mut state = LuaState::new();
    let tag = userdata::register_type(&mut state, "finalizer-tests-handle", record_dtor);
    userdata::register_destructor(&mut state, tag, second_dtor);

    userdata::new_userdata_tagged(&mut state, 16, tag);
    stamp(&mut state, 606);
    state.set_top(0).unwrap();
    state.collect_garbage();
    assert_eq!(finalized_count(606), 1);
}
