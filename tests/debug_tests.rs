//! Frame capture and query through the two-call debug surface.

use luau_compat::compat::debug::{get_info, get_local, get_stack, where_at, DebugFrame};
use luau_compat::compat::{self, loader};
use luau_compat::LuaState;

// Host function invoked from inside a script; performs the capture and
// query sequence while three frames are live (main chunk, the Lua
// function `inner`, and this probe).
fn probe(state: &mut LuaState) -> luau_compat::vm::Result<i32> {
    let depth = state.stack_depth();
    assert_eq!(depth, 3);

    // Levels at or beyond the depth are not capturable
    assert!(get_stack(state, depth).is_none());
    assert!(get_stack(state, depth + 5).is_none());
    assert!(get_stack(state, -1).is_none());

    // Level 0: this host function
    let mut frame = get_stack(state, 0).expect("level 0 must capture");
    assert!(get_info(state, "sn", &mut frame));
    assert_eq!(frame.what.as_deref(), Some("C"));
    assert_eq!(frame.name.as_deref(), Some("probe"));
    assert_eq!(frame.current_line, -1);

    // Level 1: the Lua function that called us
    let mut frame = get_stack(state, 1).expect("level 1 must capture");
    assert!(get_info(state, "sl", &mut frame));
    assert_eq!(frame.what.as_deref(), Some("Lua"));
    assert_eq!(frame.source.as_deref(), Some("chunk"));
    assert_eq!(frame.current_line, 2);
    assert!(frame.line_defined >= 1);

    // Its first local is the parameter `x`
    let name = get_local(state, &frame, 1).expect("local 1 must resolve");
    assert_eq!(name, "x");
    assert_eq!(state.to_number(-1), Some(42.0));
    state.pop(1)?;

    // Out-of-range locals are a clean miss
    assert!(get_local(state, &frame, 99).is_none());

    // Level 2: the main chunk
    let mut frame = get_stack(state, 2).expect("level 2 must capture");
    assert!(get_info(state, "s", &mut frame));
    assert_eq!(frame.what.as_deref(), Some("main"));

    state.push_number(depth as f64);
    Ok(1)
}

#[test]
fn capture_and_query_across_live_frames() {
    let mut state = LuaState::new();
    compat::push_function(&mut state, probe, "probe").unwrap();
    state.set_global("probe").unwrap();

    loader::do_string(
        &mut state,
        "local function inner(x)\n  return probe()\nend\nreturn inner(42)",
    )
    .unwrap();
    assert_eq!(state.to_number(-1), Some(3.0));
}

fn where_probe(state: &mut LuaState) -> luau_compat::vm::Result<i32> {
    let (src, line) = where_at(state, 1).expect("caller location");
    state.push_string(&format!("{}:{}", src, line));
    Ok(1)
}

#[test]
fn where_at_reports_the_caller_location() {
    let mut state = LuaState::new();
    compat::push_function(&mut state, where_probe, "where_probe").unwrap();
    state.set_global("where_probe").unwrap();

    loader::do_string(&mut state, "return where_probe()").unwrap();
    assert_eq!(state.to_str(-1), Some("chunk:1"));
}

#[test]
fn capture_fails_outside_any_call() {
    let state = LuaState::new();
    assert!(get_stack(&state, 0).is_none());
}

#[test]
fn query_pushes_the_function_when_asked() {
    fn function_probe(state: &mut LuaState) -> luau_compat::vm::Result<i32> {
        let top_before = state.get_top();
        let mut frame = DebugFrame::default();
        assert!(get_stack(state, 0).is_some());
        assert!(get_info(state, "f", &mut frame));
        assert_eq!(state.get_top(), top_before + 1);
        assert!(luau_compat::compat::debug::pushed_function(state));
        state.pop(1)?;
        state.push_boolean(true);
        Ok(1)
    }

    let mut state = LuaState::new();
    compat::push_function(&mut state, function_probe, "function_probe").unwrap();
    state.call(0, 1).unwrap();
    assert!(state.to_boolean(-1));
}
