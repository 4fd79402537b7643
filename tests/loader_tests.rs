//! Source loading: the compile-then-load path, its error shapes, and
//! the bytecode cache.

use luau_compat::compat::cache::BytecodeCache;
use luau_compat::compat::loader::{self, LoadError};
use luau_compat::{LuaState, VmError};
use std::io::Write;

#[test]
fn load_string_yields_a_runnable_closure() {
    let mut state = LuaState::new();
    loader::load_string(&mut state, "return 1 + 1").unwrap();
    state.call(0, 1).unwrap();
    assert_eq!(state.to_number(-1), Some(2.0));
}

#[test]
fn syntax_failure_has_a_nonempty_message() {
    let mut state = LuaState::new();
    match loader::load_string(&mut state, "1+") {
        Err(LoadError::Syntax(msg)) => assert!(!msg.is_empty()),
        other => panic!("expected a syntax error, got {:?}", other),
    }
}

#[test]
fn load_buffer_and_load_string_share_one_path() {
    let mut state = LuaState::new();
    loader::load_buffer(&mut state, b"return 'buffer'", "named").unwrap();
    state.call(0, 1).unwrap();
    assert_eq!(state.to_str(-1), Some("buffer"));

    let mut state = LuaState::new();
    match loader::load_buffer(&mut state, b"1+", "named") {
        Err(LoadError::Syntax(msg)) => assert!(msg.contains("named")),
        other => panic!("expected a syntax error, got {:?}", other),
    }
}

#[test]
fn load_file_reads_and_compiles() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "return 40 + 2").unwrap();

    let mut state = LuaState::new();
    loader::load_file(&mut state, file.path()).unwrap();
    state.call(0, 1).unwrap();
    assert_eq!(state.to_number(-1), Some(42.0));
}

#[test]
fn missing_file_is_a_cannot_open_error() {
    let mut state = LuaState::new();
    match loader::load_file(&mut state, std::path::Path::new("/no/such/file.lua")) {
        Err(LoadError::CannotOpen(path)) => assert!(path.contains("file.lua")),
        other => panic!("expected a cannot-open error, got {:?}", other),
    }
}

#[test]
fn unreadable_path_is_a_file_error_not_a_syntax_error() {
    // A directory cannot be loaded; kernels differ on whether the open
    // or the read is what fails
    let dir = tempfile::tempdir().unwrap();
    let mut state = LuaState::new();
    match loader::load_file(&mut state, dir.path()) {
        Err(LoadError::CannotRead(path)) | Err(LoadError::CannotOpen(path)) => {
            assert!(!path.is_empty());
        }
        other => panic!("expected a file error, got {:?}", other),
    }
}

#[test]
fn file_syntax_errors_name_the_path() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "local = nope").unwrap();

    let mut state = LuaState::new();
    match loader::load_file(&mut state, file.path()) {
        Err(LoadError::Syntax(msg)) => {
            let name = file.path().display().to_string();
            assert!(msg.contains(&name), "diagnostic {:?} names {:?}", msg, name);
        }
        other => panic!("expected a syntax error, got {:?}", other),
    }
}

#[test]
fn do_string_runs_the_chunk() {
    let mut state = LuaState::new();
    loader::do_string(&mut state, "answer = 6 * 7").unwrap();
    state.get_global("answer").unwrap();
    assert_eq!(state.to_number(-1), Some(42.0));
}

#[test]
fn do_file_runs_the_chunk() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "from_file = 'yes'").unwrap();

    let mut state = LuaState::new();
    loader::do_file(&mut state, file.path()).unwrap();
    state.get_global("from_file").unwrap();
    assert_eq!(state.to_str(-1), Some("yes"));
}

#[test]
fn runtime_failures_surface_the_vm_error() {
    let mut state = LuaState::new();
    match loader::do_string(&mut state, "return missing()") {
        Err(LoadError::Vm(VmError::Type(msg))) => assert!(msg.contains("call")),
        other => panic!("expected a VM type error, got {:?}", other),
    }
}

#[test]
fn malformed_bytecode_is_rejected_by_the_native_loader() {
    let mut state = LuaState::new();
    match state.load_bytecode("junk", &[9, 9, 9, 9]) {
        Err(VmError::Bytecode(_)) => {}
        other => panic!("expected a bytecode error, got {:?}", other),
    }
}

#[test]
fn cache_skips_recompilation() {
    let mut state = LuaState::new();
    let mut cache = BytecodeCache::new();
    for _ in 0..3 {
        cache
            .load_buffer_cached(&mut state, b"return 9", "cached")
            .unwrap();
        state.call(0, 1).unwrap();
        assert_eq!(state.to_number(-1), Some(9.0));
        state.pop(1).unwrap();
    }
    assert_eq!(cache.misses(), 1);
    assert_eq!(cache.hits(), 2);
}
