//! Lua 5.4 C-API compatibility layer over a Luau-style VM
//!
//! This crate makes code written against the Lua 5.4 embedding contract
//! run against a structurally different VM that omits or reshapes large
//! parts of that contract:
//! - Destructor timing via tagged userdata instead of `__gc`
//! - Indexed user values over per-object environment tables
//! - 64-bit integer fidelity over a double-only number type
//! - Source loading over an explicit compile-then-load pipeline
//! - Stack rotation/copy from push/remove/insert/replace primitives
//! - Two-call debug introspection over single-call level queries
//!
//! The `vm` module is the VM substrate; `compat` is the adapter layer
//! embedders call.

pub mod compat;
pub mod vm;

// Re-export the types embedders touch most
pub use compat::{BytecodeCache, DebugFrame, LoadError};
pub use vm::{DebugInfo, LuaState, LuaType, Value, VmError, VmLimits, MULTRET};
