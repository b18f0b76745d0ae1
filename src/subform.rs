//! Subword decomposition and composed-row bookkeeping.
//!
//! An out-of-vocabulary word is bracketed with begin/end markers (`<word>`)
//! and every contiguous substring of 2–4 codepoints, starting at each
//! codepoint boundary of the bracketed form, is probed against the
//! vocabulary. The markers are ordinary characters of the probed string, so
//! very short words only ever produce marker-inclusive substrings; windows
//! at the tail are cut off by the end of the string, and a start offset with
//! a single codepoint remaining yields nothing.
//!
//! Matched ids become the constituent set of a freshly allocated composed id.
//! Composed ids occupy their own region of the id space, directly above the
//! base rows (dictionary entries plus the optional unknown row), and grow
//! monotonically; they are never reused and never evicted.
//!
//! # Key invariants
//!
//! - `entries[i]` backs row `base_rows + i` of the weight store.
//! - Constituent ids always point into the base region.
//! - `snapshot` holds the values written at the last materialization;
//!   `valid` is the explicit cache status (never a sentinel inside the
//!   vector itself).
//! - The memo maps every decomposed surface form exactly once, either to its
//!   composed id or to [`NO_WORD`] when decomposition found nothing and no
//!   unknown vector exists.

use std::collections::HashMap;

use crate::table::{WordId, NO_WORD};
use crate::vocab::Vocab;

/// Begin-of-word marker prepended before decomposition.
const BEGIN_MARKER: char = '<';
/// End-of-word marker appended before decomposition.
const END_MARKER: char = '>';

/// Substring window bounds, in codepoints, over the bracketed form.
const MIN_WINDOW: usize = 2;
const MAX_WINDOW: usize = 4;

/// Enumerate dictionary hits among the 2–4-codepoint substrings of
/// `<word>`, deduplicated and sorted.
pub(crate) fn decompose(word: &str, vocab: &Vocab) -> Vec<u32> {
    let mut bracketed = String::with_capacity(word.len() + 2);
    bracketed.push(BEGIN_MARKER);
    bracketed.push_str(word);
    bracketed.push(END_MARKER);

    // Byte offsets of every codepoint boundary, including the end.
    let mut boundaries: Vec<usize> = bracketed.char_indices().map(|(i, _)| i).collect();
    boundaries.push(bracketed.len());
    let codepoints = boundaries.len() - 1;

    let mut ids = Vec::new();
    for start in 0..codepoints {
        for len in MIN_WINDOW..=MAX_WINDOW {
            if start + len > codepoints {
                break;
            }
            let piece = &bracketed[boundaries[start]..boundaries[start + len]];
            if let Some(id) = vocab.find(piece) {
                ids.push(id);
            }
        }
    }

    ids.sort_unstable();
    ids.dedup();
    ids
}

// ============================================================================
// Composed region
// ============================================================================

/// Bookkeeping for one composed row.
#[derive(Debug, Clone)]
pub(crate) struct ComposedEntry {
    /// Sorted, deduplicated constituent ids (base region only).
    pub subforms: Vec<u32>,
    /// Values written at the last materialization.
    pub snapshot: Vec<f32>,
    /// Whether the composed row currently reflects `snapshot`.
    pub valid: bool,
}

/// The dynamically grown region of the id space backing composed vectors.
///
/// Owned per table instance; multiple loaded models never share state.
#[derive(Debug, Clone, Default)]
pub(crate) struct ComposedRegion {
    /// Number of base rows (dictionary + optional unknown); composed row `i`
    /// is weight-store row `base_rows + i`.
    base_rows: usize,
    pub entries: Vec<ComposedEntry>,
    /// Composed offsets whose cache is currently valid and may need delta
    /// redistribution on the next commit.
    pub active: Vec<usize>,
    /// Decomposition results per distinct surface form, for the lifetime of
    /// the table. Maps to the composed id, or to `NO_WORD` when the word has
    /// no representation at all.
    memo: HashMap<String, WordId>,
}

impl ComposedRegion {
    pub fn new(base_rows: usize) -> Self {
        Self {
            base_rows,
            entries: Vec::new(),
            active: Vec::new(),
            memo: HashMap::new(),
        }
    }

    pub fn base_rows(&self) -> usize {
        self.base_rows
    }

    /// Map a weight-store row index to a composed offset, if it is one.
    pub fn offset_of(&self, row: usize) -> Option<usize> {
        let offset = row.checked_sub(self.base_rows)?;
        (offset < self.entries.len()).then_some(offset)
    }

    /// Memoized result of a previous decomposition, if any.
    pub fn memo_get(&self, word: &str) -> Option<WordId> {
        self.memo.get(word).copied()
    }

    /// Permanently record that `word` has no representation.
    pub fn memoize_absent(&mut self, word: &str) {
        self.memo.insert(word.to_string(), NO_WORD);
    }

    /// Allocate the next composed id for `word` with the given constituents.
    ///
    /// The snapshot starts stale; the caller appends the matching weight row.
    pub fn allocate(&mut self, word: &str, subforms: Vec<u32>, dimension: usize) -> WordId {
        debug_assert!(!subforms.is_empty());
        let id = (self.base_rows + self.entries.len()) as WordId;
        self.entries.push(ComposedEntry {
            subforms,
            snapshot: vec![0.0; dimension],
            valid: false,
        });
        self.memo.insert(word.to_string(), id);
        id
    }

    /// Number of composed entries allocated so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

// ============================================================================
// Tests
// ============================================================================
