//! Phase tracking sessions.
//!
//! A `PhaseSession` owns the three per-phase forests, selects the active
//! one, chains to any pre-existing instrumentation hook, and flushes
//! artifacts on stop. Each session gets a unique ID and directory for
//! isolated artifact trees.

use std::fmt;
use std::fs;
use std::path::PathBuf;

use chrono::Utc;
use tracing::{debug, info};

use phasetrace_forest::{
    CallObservation, DumpError, Forest, Phase, SignatureResolver, UnknownPhaseError,
};

use crate::config::Config;

/// Unique identifier for a tracking session.
///
/// Format: `YYYY-MM-DDTHH-MM-SS_XXXX` where XXXX is a short UUID suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a new session ID with current timestamp and random suffix.
    pub fn generate() -> Self {
        let now = Utc::now();
        let short_uuid = &uuid::Uuid::new_v4().to_string()[..4];
        Self(format!(
            "{}_{}",
            now.format("%Y-%m-%dT%H-%M-%S"),
            short_uuid
        ))
    }

    /// Create a session ID from a string (for testing or restoration).
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the session ID as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The shape of an instrumentation hook: the host runtime invokes it
/// synchronously, inline, at every call-entry event on the observed thread.
///
/// A previously installed hook handed to the session keeps being invoked
/// after the engine's own processing, in the same call frame.
pub trait CallHook {
    fn on_call(&mut self, observation: &CallObservation<'_>);
}

/// Externally-supplied installed-library inventory, written once per
/// session to `versions.txt`.
pub trait LibraryInventory {
    fn installed_libraries(&self) -> Vec<(String, String)>;
}

/// Error type for session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    UnknownPhase(#[from] UnknownPhaseError),

    #[error(transparent)]
    Dump(#[from] DumpError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Lifecycle state machine for phase-scoped call tracking.
///
/// Exactly one phase is active at a time; starting a new phase implicitly
/// stops the previous one first, so artifacts from phase N are durable on
/// disk before phase N+1 begins.
pub struct PhaseSession {
    id: SessionId,
    config: Config,
    forests: [Forest; 3],
    active: Option<Phase>,
    chained: Option<Box<dyn CallHook>>,
    resolver: Option<Box<dyn SignatureResolver>>,
    inventory: Option<Box<dyn LibraryInventory>>,
}

impl PhaseSession {
    /// Create a session with the given configuration. All three forests are
    /// created up front and persist across repeated phase switches.
    pub fn new(config: Config) -> Self {
        let capacity = config.trace.cache_capacity;
        let filter = config.inclusion_filter();
        Self {
            id: SessionId::generate(),
            forests: [
                Forest::with_cache_capacity(Phase::Processing, filter.clone(), capacity),
                Forest::with_cache_capacity(Phase::Training, filter.clone(), capacity),
                Forest::with_cache_capacity(Phase::Inference, filter, capacity),
            ],
            config,
            active: None,
            chained: None,
            resolver: None,
            inventory: None,
        }
    }

    /// Create a session with discovered (or default) configuration.
    pub fn with_defaults() -> Self {
        Self::new(Config::load_or_default())
    }

    /// Attach the signature-resolution collaborator.
    pub fn with_resolver(mut self, resolver: Box<dyn SignatureResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Attach the installed-library inventory collaborator.
    pub fn with_inventory(mut self, inventory: Box<dyn LibraryInventory>) -> Self {
        self.inventory = Some(inventory);
        self
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_phase(&self) -> Option<Phase> {
        self.active
    }

    /// Root directory of this session's artifact tree.
    pub fn root_dir(&self) -> PathBuf {
        self.config.trace.root.join(self.id.as_str())
    }

    /// The forest for a phase (active or not).
    pub fn forest(&self, phase: Phase) -> &Forest {
        &self.forests[Self::index(phase)]
    }

    /// Hand over a previously installed hook; it keeps running after the
    /// engine at every observed call.
    pub fn set_chained_hook(&mut self, hook: Box<dyn CallHook>) {
        self.chained = Some(hook);
    }

    /// Reclaim the chained hook, e.g. to reinstall it after stopping.
    pub fn take_chained_hook(&mut self) -> Option<Box<dyn CallHook>> {
        self.chained.take()
    }

    /// Start tracking a phase. Any active phase is stopped (and flushed to
    /// disk) first.
    pub fn track(&mut self, phase: Phase) -> Result<(), SessionError> {
        if self.is_active() {
            self.stop()?;
        }
        self.active = Some(phase);
        info!(session = %self.id, %phase, "phase tracking started");
        Ok(())
    }

    /// Start tracking a phase given by name. Unrecognized names abort phase
    /// start entirely; no partial activation.
    pub fn track_named(&mut self, phase: &str) -> Result<(), SessionError> {
        let phase: Phase = phase.parse()?;
        self.track(phase)
    }

    /// Ingestion point for the host runtime's hook: reconcile the
    /// observation into the active forest, then invoke the chained
    /// pre-existing hook in the same call frame.
    pub fn observe(&mut self, observation: &CallObservation<'_>) {
        if let Some(phase) = self.active {
            let resolver = self.resolver.as_deref();
            self.forests[Self::index(phase)].ingest(observation, resolver);
        }
        if let Some(hook) = self.chained.as_mut() {
            hook.on_call(observation);
        }
    }

    /// Flush and deactivate the current phase. A no-op when nothing is
    /// active.
    pub fn stop(&mut self) -> Result<(), SessionError> {
        let Some(phase) = self.active.take() else {
            debug!(session = %self.id, "stop with no active phase");
            return Ok(());
        };

        let root = self.root_dir();
        let forest = &mut self.forests[Self::index(phase)];
        forest.dump(&root)?;
        // New nodes in a later phase must never alias this phase's nodes
        // through stale frame identities.
        forest.clear_construction_cache();

        self.save_versions()?;
        info!(session = %self.id, %phase, dir = %root.display(), "phase tracking stopped");
        Ok(())
    }

    /// Write the session-scoped `versions.txt` from the inventory
    /// collaborator. Written once; an existing file is never overwritten.
    pub fn save_versions(&self) -> Result<(), SessionError> {
        let Some(inventory) = &self.inventory else {
            return Ok(());
        };
        let root = self.root_dir();
        fs::create_dir_all(&root)?;
        let path = root.join("versions.txt");
        if !path.exists() {
            let libraries: std::collections::BTreeMap<String, String> =
                inventory.installed_libraries().into_iter().collect();
            fs::write(&path, serde_json::to_string(&libraries)?)?;
        }
        Ok(())
    }

    fn index(phase: Phase) -> usize {
        match phase {
            Phase::Processing => 0,
            Phase::Training => 1,
            Phase::Inference => 2,
        }
    }
}
