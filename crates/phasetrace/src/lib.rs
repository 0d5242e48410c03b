//! phasetrace: phase-scoped call tracking sessions.
//!
//! This crate wraps the reconciliation engine from `phasetrace-forest` in a
//! session lifecycle:
//!
//! - **Config**: `.phasetrace/config.toml` discovery and validation
//! - **Session**: `PhaseSession` with `track`/`observe`/`stop`, hook
//!   chaining, and the per-session artifact directory layout
//!
//! # Usage
//!
//! ```rust,no_run
//! use phasetrace::{PhaseSession, Phase};
//! use phasetrace::forest::{CallObservation, CallSite};
//!
//! let mut session = PhaseSession::with_defaults();
//!
//! session.track(Phase::Training).unwrap();
//! // The host runtime's instrumentation hook delivers one observation per
//! // call entry:
//! session.observe(&CallObservation::new(CallSite::new("app", "main")));
//! session.stop().unwrap();
//! ```
//!
//! Artifacts land under `<trace root>/<session id>/<Phase>/`: a flat
//! `trace.txt` plus one JSON record per distinct call site, and a
//! session-scoped `versions.txt` when an inventory collaborator is
//! attached.

pub mod config;
pub mod session;

/// The reconciliation engine this crate orchestrates.
pub use phasetrace_forest as forest;

// Re-export main types
pub use config::{CONFIG_FILE, Config, ConfigError, ConfigValidationError, PHASETRACE_DIR};
pub use forest::{Phase, SignatureResolver, UnknownPhaseError};
pub use session::{CallHook, LibraryInventory, PhaseSession, SessionError, SessionId};
