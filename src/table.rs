//! The embedding table: multi-stage lookup, lazy composition, delta commit.
//!
//! # Lifecycle
//!
//! 1. **Load** → [`Embedding::from_bytes`] (or `from_reader` / `from_path`)
//!    builds the vocabulary and base weight rows from a serialized model.
//! 2. **Inference** → [`Embedding::resolve`] maps a token to an id,
//!    [`Embedding::weight`] yields its vector. Out-of-vocabulary tokens may
//!    allocate composed rows; results are memoized per surface form.
//! 3. **Training** → the caller either edits active composed rows in place
//!    via [`Embedding::weight_mut`] and then calls
//!    [`Embedding::commit_updates`] once per batch, or uses the explicit
//!    [`Embedding::apply_gradient`] protocol. The two are alternatives for a
//!    given id within one batch, never both.
//!
//! # Key invariants
//!
//! - Ids are dense and never reused: `0..dict_size` are dictionary rows, the
//!   optional unknown row is `dict_size`, composed rows follow and grow
//!   monotonically.
//! - A composed row is either stale or exactly the unweighted mean of its
//!   constituents at the time of last materialization.
//! - All caches (memo, snapshots, active list) are per-instance; loading a
//!   second model into a new `Embedding` shares nothing with the first.
//!
//! Every operation takes `&mut self` and runs to completion; concurrent
//! callers must serialize access themselves (e.g. `Mutex<Embedding>`).

use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

use crate::error::{EmbedError, Result};
use crate::fallback::{lowercase_after_first, scan_categories};
use crate::format::{read_model_from_bytes, write_model, RawModel};
use crate::store::WeightStore;
use crate::subform::{decompose, ComposedRegion};
use crate::vocab::Vocab;

/// Integer id of a weight row. Non-negative ids index rows; [`NO_WORD`]
/// means "no representation at all, not even a generic unknown vector".
pub type WordId = i32;

/// Sentinel id for words with no representation.
pub const NO_WORD: WordId = -1;

/// Word-embedding lookup table with optional subword composition.
#[derive(Debug, Clone)]
pub struct Embedding {
    vocab: Vocab,
    store: WeightStore,
    /// Id of the generic unknown row, or [`NO_WORD`] if the model was
    /// trained without one.
    unknown: WordId,
    /// Whether out-of-vocabulary words decompose into subword constituents.
    subword: bool,
    composed: ComposedRegion,
}

impl Embedding {
    // ------------------------------------------------------------------
    // Construction / load
    // ------------------------------------------------------------------

    /// Parse a serialized model from a byte buffer.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Self::assemble(read_model_from_bytes(data)?)
    }

    /// Parse a serialized model from a reader (consumes it to the end).
    pub fn from_reader(mut reader: impl Read) -> Result<Self> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Self::from_bytes(&data)
    }

    /// Parse a serialized model from a file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_bytes(&std::fs::read(path)?)
    }

    /// Replace this table with a freshly parsed model.
    ///
    /// All prior state (dictionary, weights, composed rows, memoized
    /// decompositions) is discarded. Re-loading the same bytes is
    /// idempotent.
    pub fn load(&mut self, data: &[u8]) -> Result<()> {
        *self = Self::from_bytes(data)?;
        Ok(())
    }

    /// Build a table directly from `(word, vector)` pairs.
    ///
    /// Words get dense ids in iteration order; the unknown row, if given,
    /// sits directly after them. Rejects a zero dimension, rows of the wrong
    /// length, and duplicate words.
    pub fn from_parts(
        dimension: usize,
        words: impl IntoIterator<Item = (String, Vec<f32>)>,
        unknown_vector: Option<Vec<f32>>,
        subword: bool,
    ) -> Result<Self> {
        if dimension == 0 {
            return Err(EmbedError::invalid("dimension must be nonzero"));
        }

        let mut names = Vec::new();
        let mut weights = Vec::new();
        let mut seen = HashSet::new();
        for (word, row) in words {
            if row.len() != dimension {
                return Err(EmbedError::invalid(format!(
                    "row for {word:?} has length {}, expected {dimension}",
                    row.len()
                )));
            }
            if !seen.insert(word.clone()) {
                return Err(EmbedError::invalid(format!("duplicate word {word:?}")));
            }
            weights.extend_from_slice(&row);
            names.push(word);
        }

        let has_unknown = match unknown_vector {
            Some(row) => {
                if row.len() != dimension {
                    return Err(EmbedError::invalid(format!(
                        "unknown row has length {}, expected {dimension}",
                        row.len()
                    )));
                }
                weights.extend_from_slice(&row);
                true
            }
            None => false,
        };

        Self::assemble(RawModel {
            dimension,
            words: names,
            has_unknown,
            subword,
            weights,
        })
    }

    /// Semantic assembly of decoded model parts.
    fn assemble(raw: RawModel) -> Result<Self> {
        let base_rows = raw.words.len() + usize::from(raw.has_unknown);
        debug_assert_eq!(raw.weights.len(), base_rows * raw.dimension);

        let mut vocab = Vocab::with_capacity(raw.words.len());
        for word in &raw.words {
            if vocab.push(word).is_none() {
                return Err(EmbedError::decode(format!(
                    "duplicate dictionary entry {word:?}"
                )));
            }
        }

        let mut store = WeightStore::with_row_capacity(raw.dimension, base_rows);
        for row in raw.weights.chunks_exact(raw.dimension) {
            // Infallible: chunks are exactly `dimension` long.
            let _ = store.push(row);
        }

        let unknown = if raw.has_unknown {
            vocab.len() as WordId
        } else {
            NO_WORD
        };

        tracing::debug!(
            dimension = raw.dimension,
            words = vocab.len(),
            unknown = raw.has_unknown,
            subword = raw.subword,
            "embedding model loaded"
        );

        Ok(Self {
            vocab,
            store,
            unknown,
            subword: raw.subword,
            composed: ComposedRegion::new(base_rows),
        })
    }

    // ------------------------------------------------------------------
    // Serialization
    // ------------------------------------------------------------------

    /// Serialize the base model (dictionary, flags, base rows) in the load
    /// format. Composed rows are runtime-only and never written, so an
    /// unmodified load/save cycle is byte-identical.
    pub fn write_to(&self, writer: &mut impl std::io::Write) -> Result<()> {
        let base_floats = self.composed.base_rows() * self.store.dimension();
        write_model(
            writer,
            self.store.dimension(),
            &self.vocab,
            self.unknown >= 0,
            self.subword,
            &self.store.raw_values()[..base_floats],
        )
    }

    /// Serialize the base model to a byte vector.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.write_to(&mut buf)?;
        Ok(buf)
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    /// Map a token to an id.
    ///
    /// Tries, in order, short-circuiting on the first hit: exact match;
    /// all-but-first lowercased (only for forms whose first character and at
    /// least one later character are upper/title-case); fully lowercased
    /// (any upper/title-case character present); the leading digit alone
    /// (leading-numeric forms with no letters: large numbers, dates,
    /// times); subword decomposition when enabled; otherwise the unknown
    /// sentinel. Never fails: unresolvable words degrade to
    /// [`Embedding::unknown_word`].
    pub fn resolve(&mut self, word: &str) -> WordId {
        if let Some(id) = self.vocab.find(word) {
            return id as WordId;
        }

        let scan = scan_categories(word);

        if scan.first.upper && scan.rest.upper {
            if let Some(id) = self.vocab.find(&lowercase_after_first(word)) {
                return id as WordId;
            }
        }

        if scan.first.upper || scan.rest.upper {
            if let Some(id) = self.vocab.find(&word.to_lowercase()) {
                return id as WordId;
            }
        }

        if scan.first.number && !scan.rest.letter {
            if let Some(first) = word.chars().next() {
                let mut buf = [0u8; 4];
                if let Some(id) = self.vocab.find(first.encode_utf8(&mut buf)) {
                    return id as WordId;
                }
            }
        }

        if self.subword {
            return self.resolve_subword(word);
        }

        self.unknown
    }

    /// Subword path: memoized decomposition into a composed id.
    fn resolve_subword(&mut self, word: &str) -> WordId {
        if let Some(id) = self.composed.memo_get(word) {
            return id;
        }

        let mut subforms = decompose(word, &self.vocab);
        if subforms.is_empty() {
            if self.unknown < 0 {
                // Nothing matched and there is no generic unknown vector:
                // this word permanently has no representation.
                self.composed.memoize_absent(word);
                return NO_WORD;
            }
            subforms.push(self.unknown as u32);
        }

        let count = subforms.len();
        let id = self
            .composed
            .allocate(word, subforms, self.store.dimension());
        let row = self.store.push_zeroed();
        debug_assert_eq!(row, id as usize);

        tracing::trace!(word, id, subforms = count, "allocated composed form");
        id
    }

    /// The reserved unknown id, or [`NO_WORD`] if the model carries no
    /// generic unknown vector.
    pub fn unknown_word(&self) -> WordId {
        self.unknown
    }

    // ------------------------------------------------------------------
    // Weight access
    // ------------------------------------------------------------------

    /// Borrow the weight vector for an id, materializing a stale composed
    /// row first. `None` for negative or out-of-extent ids.
    pub fn weight(&mut self, id: WordId) -> Option<&[f32]> {
        let idx = self.row_index(id)?;
        self.materialize(idx);
        self.store.row(idx)
    }

    /// Mutably borrow the weight vector for an id (training hot path).
    ///
    /// A stale composed row is materialized first, so the caller always
    /// edits the live mean; the net change is redistributed to the
    /// constituents by the next [`Embedding::commit_updates`].
    pub fn weight_mut(&mut self, id: WordId) -> Option<&mut [f32]> {
        let idx = self.row_index(id)?;
        self.materialize(idx);
        self.store.row_mut(idx)
    }

    fn row_index(&self, id: WordId) -> Option<usize> {
        if id < 0 {
            return None;
        }
        let idx = id as usize;
        (idx < self.store.rows()).then_some(idx)
    }

    /// Recompute a composed row as the unweighted mean of its constituents,
    /// snapshot the result, and register the id as active. No-op for base
    /// rows and for composed rows whose cache is already valid.
    fn materialize(&mut self, idx: usize) {
        let Some(offset) = self.composed.offset_of(idx) else {
            return;
        };
        if self.composed.entries[offset].valid {
            return;
        }

        let dimension = self.store.dimension();
        let mut mean = vec![0.0f32; dimension];
        let entry = &self.composed.entries[offset];
        for &sid in &entry.subforms {
            if let Some(row) = self.store.row(sid as usize) {
                for (acc, &v) in mean.iter_mut().zip(row) {
                    *acc += v;
                }
            }
        }
        let normalize = 1.0 / entry.subforms.len() as f32;
        for v in &mut mean {
            *v *= normalize;
        }

        if let Some(row) = self.store.row_mut(idx) {
            row.copy_from_slice(&mean);
        }
        let entry = &mut self.composed.entries[offset];
        entry.snapshot.copy_from_slice(&mean);
        entry.valid = true;
        self.composed.active.push(offset);
    }

    // ------------------------------------------------------------------
    // Training updates
    // ------------------------------------------------------------------

    /// Redistribute in-place edits of active composed rows to their
    /// constituents.
    ///
    /// For every active composed id, the net change since materialization,
    /// `(row - snapshot) / constituent_count`, is added to each constituent
    /// row, and the composed cache is marked stale so the next read
    /// recomputes from the updated constituents. Call exactly once after
    /// each batch of in-place edits, before the next resolve/weight cycle
    /// reuses those ids.
    pub fn commit_updates(&mut self) {
        let active = std::mem::take(&mut self.composed.active);
        for offset in active {
            // Skip entries already settled through apply_gradient.
            if !self.composed.entries[offset].valid {
                continue;
            }

            let idx = self.composed.base_rows() + offset;
            let entry = &self.composed.entries[offset];
            let normalize = 1.0 / entry.subforms.len() as f32;

            let mut delta = vec![0.0f32; self.store.dimension()];
            if let Some(row) = self.store.row(idx) {
                for ((d, &cur), &prev) in delta.iter_mut().zip(row).zip(&entry.snapshot) {
                    *d = (cur - prev) * normalize;
                }
            }

            for &sid in &entry.subforms {
                if let Some(row) = self.store.row_mut(sid as usize) {
                    for (w, &d) in row.iter_mut().zip(&delta) {
                        *w += d;
                    }
                }
            }

            self.composed.entries[offset].valid = false;
        }
    }

    /// Apply an explicit gradient step to an id.
    ///
    /// For a base id the delta is added to its row directly. For a composed
    /// id, `delta / constituent_count` is added to every constituent and the
    /// composed cache is marked stale immediately, so a later
    /// [`Embedding::commit_updates`] adds nothing further for this id.
    /// Returns `false` (and changes nothing) for out-of-extent ids or a
    /// delta of the wrong length.
    pub fn apply_gradient(&mut self, id: WordId, delta: &[f32]) -> bool {
        if delta.len() != self.store.dimension() {
            return false;
        }
        let Some(idx) = self.row_index(id) else {
            return false;
        };

        match self.composed.offset_of(idx) {
            None => {
                if let Some(row) = self.store.row_mut(idx) {
                    for (w, &d) in row.iter_mut().zip(delta) {
                        *w += d;
                    }
                }
            }
            Some(offset) => {
                let entry = &self.composed.entries[offset];
                let normalize = 1.0 / entry.subforms.len() as f32;
                for &sid in &entry.subforms {
                    if let Some(row) = self.store.row_mut(sid as usize) {
                        for (w, &d) in row.iter_mut().zip(delta) {
                            *w += d * normalize;
                        }
                    }
                }
                self.composed.entries[offset].valid = false;
            }
        }
        true
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Fixed vector dimension.
    pub fn dimension(&self) -> usize {
        self.store.dimension()
    }

    /// Number of dictionary entries (excluding the unknown row and any
    /// composed rows).
    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    /// Current id-space extent: base rows plus composed rows.
    pub fn rows(&self) -> usize {
        self.store.rows()
    }

    /// Whether subword decomposition is enabled.
    pub fn subword_mode(&self) -> bool {
        self.subword
    }

    /// The load-time dictionary.
    pub fn vocab(&self) -> &Vocab {
        &self.vocab
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn model(
        words: &[(&str, &[f32])],
        unknown: Option<&[f32]>,
        subword: bool,
    ) -> Embedding {
        let dimension = words
            .first()
            .map(|(_, v)| v.len())
            .or_else(|| unknown.map(<[f32]>::len))
            .unwrap_or(1);
        Embedding::from_parts(
            dimension,
            words
                .iter()
                .map(|(w, v)| (w.to_string(), v.to_vec())),
            unknown.map(<[f32]>::to_vec),
            subword,
        )
        .unwrap()
    }

    #[test]
    fn test_exact_match() {
        let mut e = model(&[("the", &[1.0]), ("cat", &[2.0])], None, false);
        assert_eq!(e.resolve("the"), 0);
        assert_eq!(e.resolve("cat"), 1);
    }

    #[test]
    fn test_unknown_sentinel_without_unknown_row() {
        let mut e = model(&[("the", &[1.0])], None, false);
        assert_eq!(e.resolve("dog"), NO_WORD);
        assert_eq!(e.unknown_word(), NO_WORD);
    }

    #[test]
    fn test_unknown_row_id_follows_dictionary() {
        let mut e = model(&[("the", &[1.0]), ("cat", &[2.0])], Some(&[9.0]), false);
        assert_eq!(e.unknown_word(), 2);
        assert_eq!(e.resolve("dog"), 2);
        assert_eq!(e.weight(2).unwrap(), &[9.0]);
    }

    #[test]
    fn test_interior_case_fold() {
        // "McDonald" present only as the all-but-first-lowercased form.
        let mut e = model(&[("Mcdonald", &[1.0])], None, false);
        assert_eq!(e.resolve("McDONALD"), 0);
    }

    #[test]
    fn test_full_lowercase_fold() {
        let mut e = model(&[("usa", &[1.0])], None, false);
        assert_eq!(e.resolve("USA"), 0);
        assert_eq!(e.resolve("Usa"), 0);
    }

    #[test]
    fn test_interior_fold_tried_before_full_fold() {
        // Both folded forms exist; the all-but-first fold must win for a
        // mixed-caps word.
        let mut e = model(&[("iphone", &[1.0]), ("Iphone", &[2.0])], None, false);
        assert_eq!(e.resolve("IPHONE"), 1);
    }

    #[test]
    fn test_lowercase_fold_not_applied_without_uppercase() {
        // No upper/title-case character → no case fallback at all.
        let mut e = model(&[("straße", &[1.0])], None, false);
        assert_eq!(e.resolve("straße"), 0);
        assert_eq!(e.resolve("strasse"), NO_WORD);
    }

    #[test]
    fn test_leading_digit_collapse() {
        let mut e = model(&[("3", &[1.0]), ("2", &[2.0])], None, false);
        assert_eq!(e.resolve("3:45"), 0);
        assert_eq!(e.resolve("2024-01-01"), 1);
        assert_eq!(e.resolve("999999"), NO_WORD); // "9" not in dictionary
    }

    #[test]
    fn test_digit_collapse_blocked_by_letters() {
        let mut e = model(&[("3", &[1.0])], None, false);
        // Contains a letter after the digit: not a pure numeric token.
        assert_eq!(e.resolve("3rd"), NO_WORD);
    }

    #[test]
    fn test_cyrillic_case_fold() {
        let mut e = model(&[("москва", &[1.0])], None, false);
        assert_eq!(e.resolve("МОСКВА"), 0);
    }

    #[test]
    fn test_subword_allocates_composed_id() {
        let mut e = model(&[("<a", &[1.0, 0.0]), ("b>", &[0.0, 1.0])], None, true);
        let id = e.resolve("ab");
        assert_eq!(id, 2); // first composed id, right after the base rows
        assert_eq!(e.rows(), 3);
    }

    #[test]
    fn test_subword_memoized() {
        let mut e = model(&[("<a", &[1.0, 0.0]), ("b>", &[0.0, 1.0])], None, true);
        let id = e.resolve("ab");
        assert_eq!(e.resolve("ab"), id);
        assert_eq!(e.rows(), 3); // no second allocation
    }

    #[test]
    fn test_subword_no_hits_no_unknown() {
        let mut e = model(&[("zz", &[1.0])], None, true);
        assert_eq!(e.resolve("ab"), NO_WORD);
        assert_eq!(e.resolve("ab"), NO_WORD);
        assert_eq!(e.rows(), 1); // nothing allocated, result memoized
    }

    #[test]
    fn test_subword_no_hits_with_unknown() {
        let mut e = model(&[("zz", &[1.0, 1.0])], Some(&[4.0, 6.0]), true);
        let id = e.resolve("ab");
        assert_eq!(id, 2);
        // Sole constituent is the unknown row; the mean is the unknown row.
        assert_eq!(e.weight(id).unwrap(), &[4.0, 6.0]);
    }

    #[test]
    fn test_exact_match_wins_over_decomposition() {
        let mut e = model(&[("ab", &[7.0])], None, true);
        assert_eq!(e.resolve("ab"), 0);
        assert_eq!(e.rows(), 1);
    }

    #[test]
    fn test_composed_weight_is_mean() {
        let mut e = model(&[("<a", &[1.0, 0.0]), ("b>", &[0.0, 1.0])], None, true);
        let id = e.resolve("ab");
        assert_eq!(e.weight(id).unwrap(), &[0.5, 0.5]);
    }

    #[test]
    fn test_weight_bounds() {
        let mut e = model(&[("the", &[1.0])], None, false);
        assert!(e.weight(NO_WORD).is_none());
        assert!(e.weight(-7).is_none());
        assert!(e.weight(1).is_none());
        assert!(e.weight(i32::MAX).is_none());
    }

    #[test]
    fn test_delta_redistribution() {
        let mut e = model(&[("<a", &[1.0, 0.0]), ("b>", &[0.0, 1.0])], None, true);
        let id = e.resolve("ab");

        // Trainer nudges the composed row in place.
        {
            let row = e.weight_mut(id).unwrap();
            row[0] += 0.5;
            row[1] += 0.25;
        }
        e.commit_updates();

        // Each constituent moved by delta / 2.
        assert_eq!(e.weight(0).unwrap(), &[1.25, 0.125]);
        assert_eq!(e.weight(1).unwrap(), &[0.25, 1.125]);

        // Next read recomputes the mean from the updated constituents.
        assert_eq!(e.weight(id).unwrap(), &[0.75, 0.625]);
    }

    #[test]
    fn test_commit_without_edits_is_noop() {
        let mut e = model(&[("<a", &[1.0, 0.0]), ("b>", &[0.0, 1.0])], None, true);
        let id = e.resolve("ab");
        let _ = e.weight(id);
        e.commit_updates();
        assert_eq!(e.weight(0).unwrap(), &[1.0, 0.0]);
        assert_eq!(e.weight(1).unwrap(), &[0.0, 1.0]);
    }

    #[test]
    fn test_apply_gradient_base_row() {
        let mut e = model(&[("the", &[1.0, 2.0])], None, false);
        assert!(e.apply_gradient(0, &[0.5, -1.0]));
        assert_eq!(e.weight(0).unwrap(), &[1.5, 1.0]);
    }

    #[test]
    fn test_apply_gradient_composed_matches_commit() {
        let mut e = model(&[("<a", &[1.0, 0.0]), ("b>", &[0.0, 1.0])], None, true);
        let id = e.resolve("ab");
        let _ = e.weight(id);

        assert!(e.apply_gradient(id, &[0.5, 0.25]));
        assert_eq!(e.weight(0).unwrap(), &[1.25, 0.125]);
        assert_eq!(e.weight(1).unwrap(), &[0.25, 1.125]);

        // The id was settled; the pending active entry adds nothing more.
        e.commit_updates();
        assert_eq!(e.weight(0).unwrap(), &[1.25, 0.125]);
        assert_eq!(e.weight(1).unwrap(), &[0.25, 1.125]);
    }

    #[test]
    fn test_apply_gradient_rejects_bad_input() {
        let mut e = model(&[("the", &[1.0, 2.0])], None, false);
        assert!(!e.apply_gradient(0, &[1.0])); // wrong length
        assert!(!e.apply_gradient(-1, &[1.0, 1.0]));
        assert!(!e.apply_gradient(9, &[1.0, 1.0]));
        assert_eq!(e.weight(0).unwrap(), &[1.0, 2.0]);
    }

    #[test]
    fn test_from_parts_validation() {
        assert!(matches!(
            Embedding::from_parts(0, Vec::new(), None, false),
            Err(EmbedError::Invalid(_))
        ));
        assert!(matches!(
            Embedding::from_parts(2, vec![("a".to_string(), vec![1.0])], None, false),
            Err(EmbedError::Invalid(_))
        ));
        assert!(matches!(
            Embedding::from_parts(
                1,
                vec![("a".to_string(), vec![1.0]), ("a".to_string(), vec![2.0])],
                None,
                false
            ),
            Err(EmbedError::Invalid(_))
        ));
        assert!(matches!(
            Embedding::from_parts(2, Vec::new(), Some(vec![1.0]), false),
            Err(EmbedError::Invalid(_))
        ));
    }

    #[test]
    fn test_load_replaces_state() {
        let mut e = model(&[("<a", &[1.0, 0.0]), ("b>", &[0.0, 1.0])], None, true);
        let _ = e.resolve("ab"); // allocate a composed row
        assert_eq!(e.rows(), 3);

        let other = model(&[("x", &[5.0])], None, false);
        e.load(&other.to_bytes().unwrap()).unwrap();

        assert_eq!(e.dimension(), 1);
        assert_eq!(e.vocab_size(), 1);
        assert_eq!(e.rows(), 1);
        assert_eq!(e.resolve("x"), 0);
        assert_eq!(e.resolve("ab"), NO_WORD); // memo did not survive
    }
}
