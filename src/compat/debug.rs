//! Debug-frame adapter.
//!
//! The original contract is two calls: capture a frame handle at a
//! stack level, then query that handle. This VM only answers queries by
//! level, in a single call. The adapter bridges the two with a
//! thread-local cursor holding the most recently validated level: the
//! query ignores the frame handle's identity and reads the cursor. A
//! capture interleaved between another capture and its query on the
//! same thread clobbers the cursor — a known fidelity gap of this
//! emulation, not a general-purpose cursor stack.

use crate::vm::{LuaState, Value};
use std::cell::Cell;

thread_local! {
    static CAPTURED_LEVEL: Cell<i32> = Cell::new(0);
}

/// A captured frame handle.
///
/// Fields are unresolved at capture time; `get_info` fills them.
#[derive(Debug, Clone)]
pub struct DebugFrame {
    /// Function name when known (host functions only)
    pub name: Option<String>,

    /// Classification of `name`; never recovered by this emulation and
    /// always empty
    pub name_what: String,

    /// Frame kind: "main", "Lua", or "C"
    pub what: Option<String>,

    /// Chunk name
    pub source: Option<String>,

    /// Shortened source for messages
    pub short_src: Option<String>,

    /// Line the function was defined on, or -1
    pub line_defined: i32,

    /// Line currently executing, or -1
    pub current_line: i32,
}

impl Default for DebugFrame {
    fn default() -> Self {
        DebugFrame {
            name: None,
            name_what: String::new(),
            what: None,
            source: None,
            short_src: None,
            line_defined: -1,
            current_line: -1,
        }
    }
}

/// Capture a frame at `level` (0 = innermost).
///
/// Returns None when the level is negative or at/beyond the current
/// stack depth. On success the level is recorded in the thread-local
/// cursor for the subsequent `get_info`/`get_local` call.
pub fn get_stack(state: &LuaState, level: i32) -> Option<DebugFrame> {
    let depth = state.stack_depth();
    if level < 0 || level >= depth {
        return None;
    }
    CAPTURED_LEVEL.with(|c| c.set(level));
    Some(DebugFrame::default())
}

/// Fill `frame` with the information selected by `what` ('s' source,
/// 'l' current line, 'n' name, 'f' pushes the function).
///
/// Queries the level most recently captured on this thread; the frame
/// handle's identity is ignored.
pub fn get_info(state: &mut LuaState, what: &str, frame: &mut DebugFrame) -> bool {
    let level = CAPTURED_LEVEL.with(|c| c.get());
    match state.debug_info(level, what) {
        Some(info) => {
            if what.contains('s') {
                frame.what = info.what.map(str::to_string);
                frame.source = info.source;
                frame.short_src = info.short_src;
                frame.line_defined = info.line_defined;
            }
            if what.contains('l') {
                frame.current_line = info.current_line;
            }
            if what.contains('n') {
                frame.name = info.name;
            }
            true
        }
        None => false,
    }
}

/// Push the value of local `n` at the captured level and return its
/// name. The frame handle is ignored, like `get_info`.
pub fn get_local(state: &mut LuaState, _frame: &DebugFrame, n: i32) -> Option<String> {
    let level = CAPTURED_LEVEL.with(|c| c.get());
    state.local_at(level, n)
}

/// Convenience query used by error reporters: source and current line
/// of the frame at `level`, without going through a frame handle.
pub fn where_at(state: &mut LuaState, level: i32) -> Option<(String, i32)> {
    if get_stack(state, level).is_none() {
        return None;
    }
    let mut frame = DebugFrame::default();
    if !get_info(state, "sl", &mut frame) {
        return None;
    }
    Some((frame.short_src.unwrap_or_default(), frame.current_line))
}

/// True when the value at the top of the stack is a function pushed by
/// a `get_info` query containing 'f'.
pub fn pushed_function(state: &LuaState) -> bool {
    matches!(state.value_at(-1), Ok(Value::Closure(_)))
}
