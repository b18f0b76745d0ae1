//! Insertion-ordered vocabulary: surface string ↔ dense u32 id.
//!
//! Forward (id → string): O(1) Vec index. Reverse (string → id): HashMap
//! lookup. `Arc<str>` shared between both, no string duplication. Ids are
//! assigned densely from 0 in insertion order and stay stable for the life
//! of the table; the vocabulary is built once at load time and never grows
//! afterwards.

use std::collections::HashMap;
use std::sync::Arc;

/// Insertion-ordered string ↔ u32 dictionary.
#[derive(Debug, Clone, Default)]
pub struct Vocab {
    /// Forward map: entry at index `i` has id `i`.
    entries: Vec<Arc<str>>,
    /// Reverse map sharing the forward allocations.
    index: HashMap<Arc<str>, u32>,
}

impl Vocab {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(n: usize) -> Self {
        Self {
            entries: Vec::with_capacity(n),
            index: HashMap::with_capacity(n),
        }
    }

    /// Append a word, returning its id, or `None` if the word is already
    /// present. Entry at insertion position `i` gets id `i`, which is what
    /// guarantees id stability across serialization round-trips.
    pub fn push(&mut self, word: &str) -> Option<u32> {
        if self.index.contains_key(word) {
            return None;
        }
        let id = self.entries.len() as u32;
        let interned: Arc<str> = Arc::from(word);
        self.entries.push(Arc::clone(&interned));
        self.index.insert(interned, id);
        Some(id)
    }

    /// Look up a word without inserting.
    pub fn find(&self, word: &str) -> Option<u32> {
        self.index.get(word).copied()
    }

    /// Get the string for a given id.
    pub fn resolve(&self, id: u32) -> Option<&str> {
        self.entries.get(id as usize).map(|s| &**s)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterator over `(id, word)` pairs in id order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, s)| (i as u32, &**s))
    }
}

// ============================================================================
// Tests
// ============================================================================
