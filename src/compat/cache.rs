//! Compiled-bytecode cache keyed by source digest.
//!
//! Embedders that reload the same chunks repeatedly (script consoles,
//! mod reloads) pay the compiler once per distinct source. Keys are the
//! SHA-1 hex of the source bytes; only successful compiles are cached,
//! so failures re-surface their diagnostics every time.

use crate::compat::loader::{syntax_message, LoadError};
use crate::vm::{self, LuaState};
use sha1::{Digest, Sha1};
use std::collections::HashMap;

/// A cache of compiled bytecode buffers
#[derive(Default)]
pub struct BytecodeCache {
    entries: HashMap<String, Vec<u8>>,
    hits: u64,
    misses: u64,
}

impl BytecodeCache {
    /// Create an empty cache
    pub fn new() -> Self {
        BytecodeCache::default()
    }

    /// Cache key for a source buffer: SHA-1 of the bytes, hex-encoded
    pub fn source_key(source: &[u8]) -> String {
        hex::encode(Sha1::digest(source))
    }

    /// Like `loader::load_buffer`, but skipping compilation when the
    /// same source has been compiled before.
    pub fn load_buffer_cached(
        &mut self,
        state: &mut LuaState,
        source: &[u8],
        chunk_name: &str,
    ) -> Result<(), LoadError> {
        let key = Self::source_key(source);

        if let Some(bytecode) = self.entries.get(&key) {
            self.hits += 1;
            state.load_bytecode(chunk_name, bytecode)?;
            return Ok(());
        }

        self.misses += 1;
        let bytecode = vm::compile(source, chunk_name);
        if bytecode.first().copied().unwrap_or(0) == 0 {
            return Err(LoadError::Syntax(syntax_message(&bytecode)));
        }
        state.load_bytecode(chunk_name, &bytecode)?;
        self.entries.insert(key, bytecode);
        Ok(())
    }

    /// Cache hits so far
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Cache misses so far
    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Number of cached chunks
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing has been cached yet
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
