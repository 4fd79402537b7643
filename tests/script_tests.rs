//! End-to-end behavior of the compiled language subset.

use luau_compat::compat::{self, loader};
use luau_compat::vm::VmLimits;
use luau_compat::{LuaState, VmError};

fn eval_number(source: &str) -> f64 {
    let mut state = LuaState::new();
    loader::do_string(&mut state, source).unwrap();
    state.to_number(-1).expect("expected a number result")
}

fn eval_str(source: &str) -> String {
    let mut state = LuaState::new();
    loader::do_string(&mut state, source).unwrap();
    state.to_str(-1).expect("expected a string result").to_string()
}

#[test]
fn arithmetic_and_precedence() {
    assert_eq!(eval_number("return 1 + 2 * 3"), 7.0);
    assert_eq!(eval_number("return (1 + 2) * 3"), 9.0);
    assert_eq!(eval_number("return 2 ^ 3 ^ 2"), 512.0);
    assert_eq!(eval_number("return -2 ^ 2"), -4.0);
    assert_eq!(eval_number("return 7 % 3"), 1.0);
    assert_eq!(eval_number("return -7 % 3"), 2.0);
}

#[test]
fn comparison_and_logic() {
    let mut state = LuaState::new();
    loader::do_string(&mut state, "return 1 < 2, 'a' < 'b', nil and 1, false or 'd'").unwrap();
    assert!(state.to_boolean(1));
    assert!(state.to_boolean(2));
    assert!(state.is_nil(3));
    assert_eq!(state.to_str(4), Some("d"));
}

#[test]
fn concatenation() {
    assert_eq!(eval_str("return 'x=' .. 1 + 1"), "x=2");
    assert_eq!(eval_str("return 'a' .. 'b' .. 'c'"), "abc");
}

#[test]
fn control_flow() {
    assert_eq!(
        eval_str(
            "local n = 3\n\
             if n < 0 then return 'neg'\n\
             elseif n == 0 then return 'zero'\n\
             else return 'pos' end"
        ),
        "pos"
    );

    assert_eq!(
        eval_number(
            "local sum = 0\n\
             local i = 1\n\
             while i <= 10 do\n\
               sum = sum + i\n\
               i = i + 1\n\
             end\n\
             return sum"
        ),
        55.0
    );
}

#[test]
fn functions_and_recursion() {
    assert_eq!(
        eval_number(
            "function fact(n)\n\
               if n <= 1 then return 1 end\n\
               return n * fact(n - 1)\n\
             end\n\
             return fact(6)"
        ),
        720.0
    );

    assert_eq!(
        eval_number("local function double(x) return x * 2 end return double(21)"),
        42.0
    );
}

#[test]
fn tables() {
    assert_eq!(eval_number("local t = {10, 20, 30} return t[2]"), 20.0);
    assert_eq!(eval_number("local t = {n = 5} return t.n"), 5.0);
    assert_eq!(eval_number("local t = {[4] = 'x', 1, 2} return #t"), 2.0);
    assert_eq!(
        eval_number("local t = {} t.a = {} t.a.b = 9 return t.a.b"),
        9.0
    );
    assert_eq!(eval_number("return #'hello'"), 5.0);
}

#[test]
fn multiple_return_values() {
    let mut state = LuaState::new();
    loader::do_string(&mut state, "return 1, 2, 3").unwrap();
    assert_eq!(state.get_top(), 3);
    assert_eq!(state.to_number(3), Some(3.0));
}

#[test]
fn host_functions_are_callable_from_scripts() {
    fn add(state: &mut LuaState) -> luau_compat::vm::Result<i32> {
        let a = state.to_number(1).unwrap_or(0.0);
        let b = state.to_number(2).unwrap_or(0.0);
        state.push_number(a + b);
        Ok(1)
    }

    let mut state = LuaState::new();
    compat::push_function(&mut state, add, "add").unwrap();
    state.set_global("add").unwrap();

    loader::do_string(&mut state, "return add(19, 23)").unwrap();
    assert_eq!(state.to_number(-1), Some(42.0));
}

#[test]
fn calling_nil_is_a_type_error() {
    let mut state = LuaState::new();
    match loader::do_string(&mut state, "return missing()") {
        Err(loader::LoadError::Vm(VmError::Type(msg))) => {
            assert!(msg.contains("attempt to call a nil value"));
        }
        other => panic!("expected a type error, got {:?}", other),
    }
}

#[test]
fn arithmetic_on_tables_is_a_type_error() {
    let mut state = LuaState::new();
    assert!(matches!(
        loader::do_string(&mut state, "return 1 + {}"),
        Err(loader::LoadError::Vm(VmError::Type(_)))
    ));
}

#[test]
fn protected_calls_restore_the_stack() {
    let mut state = LuaState::new();
    state.push_number(7.0);
    assert!(loader::do_string(&mut state, "return missing()").is_err());
    assert_eq!(state.get_top(), 1);
    assert_eq!(state.to_number(1), Some(7.0));
}

#[test]
fn runaway_loops_hit_the_instruction_limit() {
    let mut state = LuaState::with_limits(VmLimits {
        instruction_limit: 10_000,
        ..VmLimits::default()
    });
    match loader::do_string(&mut state, "while true do end") {
        Err(loader::LoadError::Vm(VmError::InstructionLimit)) => {}
        other => panic!("expected the instruction limit, got {:?}", other),
    }
}

#[test]
fn deep_recursion_hits_the_call_depth_limit() {
    let mut state = LuaState::new();
    match loader::do_string(
        &mut state,
        "function dive(n) return dive(n + 1) end return dive(0)",
    ) {
        Err(loader::LoadError::Vm(VmError::StackOverflow)) => {}
        other => panic!("expected stack overflow, got {:?}", other),
    }
}
