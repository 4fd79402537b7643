//! Error types for the virtual machine

use thiserror::Error;

/// Result type for VM operations
pub type Result<T> = std::result::Result<T, VmError>;

/// Errors raised by the virtual machine at runtime or load time
#[derive(Debug, Clone, Error)]
pub enum VmError {
    /// Error raised by script code or the interpreter
    #[error("runtime error: {0}")]
    Runtime(String),

    /// Operation applied to a value of the wrong type
    #[error("type error: {0}")]
    Type(String),

    /// Malformed or truncated bytecode handed to the loader
    #[error("malformed bytecode: {0}")]
    Bytecode(String),

    /// Call stack exceeded the configured depth
    #[error("stack overflow")]
    StackOverflow,

    /// Value stack ran dry during an operation
    #[error("stack underflow")]
    StackUnderflow,

    /// A heap handle no longer refers to a live object
    #[error("invalid handle")]
    InvalidHandle,

    /// Stack index outside the acceptable range
    #[error("invalid stack index {0}")]
    InvalidIndex(i32),

    /// Instruction budget exhausted
    #[error("instruction limit exceeded")]
    InstructionLimit,
}

/// Error produced by the source-to-bytecode pipeline.
///
/// Compilation never surfaces this directly to embedders; `compile`
/// encodes it into the error form of the bytecode buffer.
#[derive(Debug, Clone)]
pub struct CompileError {
    /// Human-readable diagnostic
    pub message: String,

    /// Source line the diagnostic refers to
    pub line: u32,
}

impl CompileError {
    /// Create a new compile error at the given line
    pub fn new(message: impl Into<String>, line: u32) -> Self {
        CompileError {
            message: message.into(),
            line,
        }
    }
}
