//! # fpgist
//!
//! Audio fingerprint algebra and a spatial index over it:
//! - binary fingerprint records (348-byte rough vector, 66-byte dominant
//!   vector, variable-length chroma print) with a canonical text form and a
//!   length-prefixed page form
//! - the calibrated similarity kernels (`match_fooid`, the chroma family,
//!   the composite `match_cpfm`) behind the EQ/NEQ/MATCH predicates
//! - union keys summarising groups of records by bitwise OR with a songlen
//!   envelope
//! - the R-tree operator set (compress, decompress, union, penalty,
//!   picksplit, consistent, same) and an in-memory index driver built on it

pub mod bitops;
pub mod fprint;
pub mod gist;
pub mod merge;
pub mod persistence;
pub mod rtree;
pub mod similarity;

// Re-export key types
pub use fprint::{Fingerprint, ParseError};
pub use gist::{
    compress, consistent, decompress, penalty, picksplit, same, union, Consistency, GistError,
    KeyRef, PickSplit, Strategy,
};
pub use merge::{match_fprint_merge, match_merges, try_match_merges, UnionKey, MAX_KEY_CP_LEN};
pub use persistence::{PersistenceError, Snapshot};
pub use rtree::{FprintIndex, IndexError, SearchHit};
pub use similarity::{
    is_eq, is_match, is_neq, match_chroma, match_chromab, match_chromac, match_chromat,
    match_cpfm, match_fooid,
};
