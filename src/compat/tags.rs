//! Process-wide tag registry.
//!
//! Each bound type name is assigned a small integer tag so the VM's
//! tagged-userdata facility can dispatch destructors. The mapping is
//! append-only, bijective, and lives for the whole process; tag 0 is
//! reserved to mean "untagged, no destructor will run".

use std::collections::HashMap;
use std::sync::Mutex;

/// Maximum number of userdata tags, matching the VM's tag space.
/// Usable tags are 1..MAX_USERDATA_TAGS.
pub const MAX_USERDATA_TAGS: usize = 256;

/// The reserved "no tag" value
pub const UNTAGGED: u8 = 0;

/// Name-to-tag mapping with monotonic assignment.
///
/// The process-wide instance lives behind [`get_or_create_tag`]; a
/// fresh instance exists so exhaustion behavior stays testable without
/// poisoning the global namespace.
pub struct TagRegistry {
    tags: HashMap<String, u8>,
    next_tag: usize,
}

impl TagRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        TagRegistry {
            tags: HashMap::new(),
            next_tag: 1,
        }
    }

    /// Look up the tag for `name`, assigning the next free one on first
    /// use. Once the tag space is exhausted, every new name gets
    /// [`UNTAGGED`]: a degraded but safe fallback in which no destructor
    /// will ever run for those objects.
    pub fn get_or_create_tag(&mut self, name: &str) -> u8 {
        if let Some(&tag) = self.tags.get(name) {
            return tag;
        }
        if self.next_tag >= MAX_USERDATA_TAGS {
            return UNTAGGED;
        }
        let tag = self.next_tag as u8;
        self.next_tag += 1;
        self.tags.insert(name.to_string(), tag);
        tag
    }

    /// Number of names registered so far
    pub fn tag_count(&self) -> usize {
        self.tags.len()
    }
}

impl Default for TagRegistry {
    fn default() -> Self {
        TagRegistry::new()
    }
}

lazy_static::lazy_static! {
    static ref TAGS: Mutex<TagRegistry> = Mutex::new(TagRegistry::new());
}

/// Process-wide tag lookup. Assignment order is the order distinct
/// names are first seen across all threads, serialized by the lock.
pub fn get_or_create_tag(name: &str) -> u8 {
    TAGS.lock().unwrap().get_or_create_tag(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_names_get_distinct_tags() {
        let a = get_or_create_tag("tags-test-alpha");
        let b = get_or_create_tag("tags-test-beta");
        assert_ne!(a, b);
        assert_ne!(a, UNTAGGED);
        assert_ne!(b, UNTAGGED);
    }

    #[test]
    fn repeated_lookups_are_stable() {
        let first = get_or_create_tag("tags-test-stable");
        let second = get_or_create_tag("tags-test-stable");
        assert_eq!(first, second);
    }

    #[test]
    fn exhaustion_degrades_to_untagged() {
        let mut registry = TagRegistry::new();
        let mut seen = std::collections::HashSet::new();
        for i in 0..MAX_USERDATA_TAGS - 1 {
            let tag = registry.get_or_create_tag(&format!("type-{}", i));
            assert_ne!(tag, UNTAGGED);
            assert!(seen.insert(tag), "tag {} assigned twice", tag);
        }
        assert_eq!(registry.tag_count(), MAX_USERDATA_TAGS - 1);

        // The 256th distinct name falls back to untagged
        assert_eq!(registry.get_or_create_tag("type-overflow"), UNTAGGED);
        // And the fallback is not recorded as an assignment
        assert_eq!(registry.tag_count(), MAX_USERDATA_TAGS - 1);

        // Existing names still resolve to their original tags
        assert_eq!(registry.get_or_create_tag("type-0"), 1);
    }
}
