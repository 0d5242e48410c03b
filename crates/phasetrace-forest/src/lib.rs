//! phasetrace-forest: call-observation reconciliation.
//!
//! This crate turns an unordered stream of per-call observations into a
//! deduplicated, depth-bounded call forest, one forest per tracking phase:
//!
//! - **Types**: `CallSite`, `CallObservation`, `ReceiverMetadata`, `Phase`
//! - **Inclusion**: the pure relevance predicate over site and depth
//! - **Forest**: arena-backed reconciliation via content-hash node identity
//!   and ancestor-climbing insertion
//! - **Dump**: idempotent serialization to `trace.txt` plus per-node JSON
//!   records
//!
//! # Usage
//!
//! ```rust,no_run
//! use phasetrace_forest::{CallObservation, CallSite, Forest, InclusionFilter, Phase};
//!
//! let mut forest = Forest::new(Phase::Training, InclusionFilter::default());
//!
//! let root = CallObservation::new(CallSite::new("app", "main"));
//! let step = CallObservation::new(CallSite::new("app", "train_step")).with_parent(&root);
//! forest.ingest(&root, None);
//! forest.ingest(&step, None);
//!
//! forest.dump(std::path::Path::new(".phasetrace/traces/session")).unwrap();
//! ```
//!
//! Structurally identical call subtrees collapse onto shared nodes; the
//! merge key is a commutative content hash, not full structural equality.

pub mod dump;
pub mod forest;
pub mod inclusion;
pub mod types;

// Re-export main types
pub use dump::{DumpError, TRACE_FILE, slugify};
pub use forest::{
    ARGUMENT_BYTE_LIMIT, DEFAULT_CACHE_CAPACITY, ExcludedError, Forest, Node, NodeId,
};
pub use inclusion::{
    CALL_OPERATOR_MARKER, CONSTRUCTOR_MARKER, DEFAULT_MAX_DEPTH, FilterConfig, InclusionFilter,
};
pub use types::{
    CallObservation, CallSite, FnSignature, Phase, ReceiverMetadata, SignatureResolver,
    UnknownPhaseError,
};
