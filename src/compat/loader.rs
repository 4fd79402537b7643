//! Loader/compiler adapter.
//!
//! The original contract loads source text directly; this VM only loads
//! bytecode, so every entry point runs the compiler first and inspects
//! the buffer: a leading 0 byte marks a compile failure whose message
//! is the remainder of the buffer. "Load string", "load buffer", and
//! "load file" all reduce to this one compile-then-load path; the
//! native loader's own failures (malformed bytecode) are surfaced
//! as-is.

use crate::vm::{self, LuaState, VmError, MULTRET};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use thiserror::Error;

/// Chunk name used when the caller does not supply one
pub const DEFAULT_CHUNK_NAME: &str = "chunk";

/// Structured load failures, shaped like the original contract's
/// error results.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Source text failed to compile
    #[error("syntax error: {0}")]
    Syntax(String),

    /// File could not be opened
    #[error("cannot open {0}")]
    CannotOpen(String),

    /// File opened but could not be fully read
    #[error("cannot read {0}")]
    CannotRead(String),

    /// Failure from the VM itself (malformed bytecode, runtime errors
    /// from the do_* helpers), surfaced as-is
    #[error(transparent)]
    Vm(#[from] VmError),
}

/// Compile `source` and push the resulting closure.
pub fn load_buffer(
    state: &mut LuaState,
    source: &[u8],
    chunk_name: &str,
) -> Result<(), LoadError> {
    let bytecode = vm::compile(source, chunk_name);
    if bytecode.first().copied().unwrap_or(0) == 0 {
        return Err(LoadError::Syntax(syntax_message(&bytecode)));
    }
    state.load_bytecode(chunk_name, &bytecode)?;
    Ok(())
}

/// Compile a source string under the default chunk name and push the
/// resulting closure.
pub fn load_string(state: &mut LuaState, source: &str) -> Result<(), LoadError> {
    load_buffer(state, source.as_bytes(), DEFAULT_CHUNK_NAME)
}

/// Read a file whole, then compile and push it as a closure.
///
/// Open failures and short reads are reported distinctly; the file's
/// path becomes the chunk name.
pub fn load_file(state: &mut LuaState, path: &Path) -> Result<(), LoadError> {
    let name = path.display().to_string();

    let mut file = File::open(path).map_err(|_| LoadError::CannotOpen(name.clone()))?;
    let size = file
        .seek(SeekFrom::End(0))
        .map_err(|_| LoadError::CannotRead(name.clone()))?;
    file.seek(SeekFrom::Start(0))
        .map_err(|_| LoadError::CannotRead(name.clone()))?;

    let mut content = vec![0u8; size as usize];
    file.read_exact(&mut content)
        .map_err(|_| LoadError::CannotRead(name.clone()))?;

    load_buffer(state, &content, &name)
}

/// Load a string and run it in a protected call, keeping every result.
pub fn do_string(state: &mut LuaState, source: &str) -> Result<(), LoadError> {
    load_string(state, source)?;
    state.pcall(0, MULTRET)?;
    Ok(())
}

/// Load a file and run it in a protected call, keeping every result.
pub fn do_file(state: &mut LuaState, path: &Path) -> Result<(), LoadError> {
    load_file(state, path)?;
    state.pcall(0, MULTRET)?;
    Ok(())
}

/// Extract the diagnostic from the error form of a bytecode buffer
pub(crate) fn syntax_message(buffer: &[u8]) -> String {
    if buffer.len() > 1 {
        String::from_utf8_lossy(&buffer[1..]).into_owned()
    } else {
        "compilation failed".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_pushes_a_callable_closure() {
        let mut state = LuaState::new();
        load_string(&mut state, "return 1 + 1").unwrap();
        state.call(0, 1).unwrap();
        assert_eq!(state.to_number(-1), Some(2.0));
    }

    #[test]
    fn syntax_failure_is_structured() {
        let mut state = LuaState::new();
        let err = load_string(&mut state, "1+").expect_err("must fail");
        match err {
            LoadError::Syntax(msg) => {
                assert!(!msg.is_empty());
                assert!(msg.contains(DEFAULT_CHUNK_NAME));
            }
            other => panic!("expected a syntax error, got {:?}", other),
        }
        // Nothing was pushed on the failure path
        assert_eq!(state.get_top(), 0);
    }

    #[test]
    fn empty_source_compiles() {
        let mut state = LuaState::new();
        do_string(&mut state, "").unwrap();
    }
}
