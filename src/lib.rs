//! # embed-table
//!
//! Word-embedding lookup table used as a feature source inside a neural
//! sequence predictor. Maps a token string to a dense f32 vector (including
//! tokens never seen during training) and supports an online training mode
//! where out-of-vocabulary vectors are synthesized from known subword pieces
//! and gradient updates flow back into them.
//!
//! This crate provides:
//! - Multi-stage lookup: exact match → case folds → leading-digit collapse →
//!   subword decomposition → unknown sentinel
//! - Lazy composed-vector materialization with explicit cache status
//! - Proportional delta redistribution from composed rows to constituents
//! - A fixed binary model format with byte-exact round-trips
//!
//! ## Wire format
//!
//! ```text
//! dimension:   u32 LE
//! dict_size:   u32 LE
//! entries:     dict_size × { len: u32 LE, utf8_bytes: [u8; len] }
//! has_unknown: u8 (0|1)
//! subword:     u8 (0|1)
//! weights:     [f32 LE] × dimension × (dict_size + has_unknown)
//! ```
//!
//! ## Design principles
//!
//! 1. **Never fail on the hot path**: lookups degrade to the unknown
//!    sentinel and weight access returns `Option`; decode errors exist only
//!    at load time.
//! 2. **Monotonic id space**: dictionary rows, then the optional unknown
//!    row, then composed rows; ids are never reused or evicted.
//! 3. **Single-threaded by construction**: every operation takes `&mut self`
//!    and runs to completion; wrap the table in a `Mutex` to share it.

pub mod error;
pub mod store;
pub mod table;
pub mod vocab;

mod fallback;
mod format;
mod subform;

pub use error::{EmbedError, Result};
pub use store::WeightStore;
pub use table::{Embedding, WordId, NO_WORD};
pub use vocab::Vocab;
