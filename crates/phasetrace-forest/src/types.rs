//! Core observation data types.
//!
//! These types describe what the host runtime's instrumentation hook
//! witnessed: which call site fired, who called it, and what was bound
//! locally. The reconciliation engine consumes them; it never inspects
//! the observed program itself.

use std::collections::BTreeMap;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A labeled window of execution being traced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Data preparation and feature processing.
    Processing,
    /// Model training.
    Training,
    /// Model inference.
    Inference,
}

/// Error for phase names that do not name a known tracking phase.
///
/// Phase start aborts entirely on this error; there is no partial
/// activation.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown tracking phase: {0}")]
pub struct UnknownPhaseError(pub String);

impl Phase {
    /// All phase kinds, in a stable order.
    pub const ALL: [Phase; 3] = [Phase::Processing, Phase::Training, Phase::Inference];

    /// Returns the string representation used in artifact directory names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Processing => "Processing",
            Phase::Training => "Training",
            Phase::Inference => "Inference",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = UnknownPhaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Processing" | "processing" => Ok(Phase::Processing),
            "Training" | "training" => Ok(Phase::Training),
            "Inference" | "inference" => Ok(Phase::Inference),
            other => Err(UnknownPhaseError(other.to_string())),
        }
    }
}

/// Immutable descriptor of a reusable piece of code.
///
/// Identity for hashing purposes is `(module, qualified_name)`; the source
/// text is descriptive only and never participates in identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallSite {
    /// Module the call site was defined in. `None` when the host could not
    /// resolve one; unresolved call sites are always filtered out.
    pub module: Option<String>,

    /// Qualified name within the module (e.g., `Trainer.train_step`).
    pub qualified_name: String,

    /// Best-effort source text, if the host could retrieve it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_text: Option<String>,
}

impl CallSite {
    /// Create a call site with a resolved module.
    pub fn new(module: impl Into<String>, qualified_name: impl Into<String>) -> Self {
        Self {
            module: Some(module.into()),
            qualified_name: qualified_name.into(),
            source_text: None,
        }
    }

    /// Create a call site whose module could not be resolved.
    pub fn unresolved(qualified_name: impl Into<String>) -> Self {
        Self {
            module: None,
            qualified_name: qualified_name.into(),
            source_text: None,
        }
    }

    /// Attach source text.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source_text = Some(source.into());
        self
    }

    /// The last `.`-separated segment of the qualified name.
    pub fn leaf_name(&self) -> &str {
        self.qualified_name
            .rsplit('.')
            .next()
            .unwrap_or(&self.qualified_name)
    }

    /// Identity hash over `(module, qualified_name)`.
    ///
    /// Deterministic within a process; not cryptographically strong.
    pub fn identity_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.module.hash(&mut hasher);
        self.qualified_name.hash(&mut hasher);
        hasher.finish()
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.module {
            Some(module) => write!(f, "{}.{}", module, self.qualified_name),
            None => write!(f, "?.{}", self.qualified_name),
        }
    }
}

/// Metadata read off a captured receiver binding (the `self`/owner-style
/// first parameter), as far as the host could resolve it.
///
/// Every field is independently best-effort: a failed read degrades to
/// `None` for that field alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiverMetadata {
    /// Qualified type/instance name of the receiver.
    pub class_name: Option<String>,

    /// Human-readable caller name (qualname, falling back through name and
    /// the receiver's type names).
    pub readable_name: Option<String>,

    /// Docstring of the receiver, if present.
    pub doc_string: Option<String>,

    /// Stable identifier previously assigned by the external tagging
    /// collaborator, if the receiver was tagged.
    pub tracking_id: Option<String>,
}

/// One witnessed invocation of a call site.
///
/// The parent observation is borrowed from the host's call stack, never
/// owned here; an observation is consumed once its node is built (or
/// immediately, if excluded).
#[derive(Debug)]
pub struct CallObservation<'a> {
    /// The call site that fired.
    pub call_site: CallSite,

    /// The caller's observation, if there is one.
    pub parent: Option<&'a CallObservation<'a>>,

    /// Captured local bindings, as the host's best-effort value capture.
    pub local_bindings: BTreeMap<String, serde_json::Value>,

    /// Receiver metadata, when a receiver binding was present.
    pub receiver: Option<ReceiverMetadata>,

    /// Raw frame identity from the host, used only as the construction
    /// cache key. Observations without one are never cached.
    pub frame_id: Option<u64>,
}

impl<'a> CallObservation<'a> {
    /// Create an observation for a call site with no caller and no bindings.
    pub fn new(call_site: CallSite) -> Self {
        Self {
            call_site,
            parent: None,
            local_bindings: BTreeMap::new(),
            receiver: None,
            frame_id: None,
        }
    }

    /// Set the caller's observation.
    pub fn with_parent(mut self, parent: &'a CallObservation<'a>) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Add a captured local binding.
    pub fn with_binding(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.local_bindings.insert(name.into(), value.into());
        self
    }

    /// Attach receiver metadata.
    pub fn with_receiver(mut self, receiver: ReceiverMetadata) -> Self {
        self.receiver = Some(receiver);
        self
    }

    /// Attach the host's raw frame identity.
    pub fn with_frame_id(mut self, frame_id: u64) -> Self {
        self.frame_id = Some(frame_id);
        self
    }
}

/// A resolved function signature: its printable text and the default values
/// of defaulted parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct FnSignature {
    /// Printable signature text (e.g., `def train_step(self, lr=0.01)`).
    pub text: String,

    /// Default values keyed by parameter name.
    pub defaults: BTreeMap<String, serde_json::Value>,
}

/// Capability the observed environment may or may not implement: resolving
/// a call site back to its original function definition.
///
/// Every call fails soft; `None` means the signature stays unknown.
pub trait SignatureResolver {
    fn resolve(&self, site: &CallSite) -> Option<FnSignature>;
}
