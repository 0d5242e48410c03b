//! Per-phase call forest and the reconciliation algorithm.
//!
//! A `Forest` owns every node it ever built in an arena; parent links are
//! arena indices, never owning pointers, so ancestor climbing cannot create
//! reference cycles. Reconciliation merges structurally identical call
//! subtrees onto shared nodes keyed by content hash.

use std::collections::{BTreeMap, HashMap, VecDeque};

use tracing::trace;

use crate::inclusion::InclusionFilter;
use crate::types::{CallObservation, CallSite, Phase, ReceiverMetadata, SignatureResolver};

/// Captured argument values above this serialized size are dropped.
pub const ARGUMENT_BYTE_LIMIT: usize = 512;

/// Default capacity of the construction cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Signals that a call site failed the inclusion filter.
///
/// Caught exactly at the ingestion point; a recursive parent resolution
/// lets it propagate, dropping the whole observation.
#[derive(Debug, Clone, thiserror::Error)]
#[error("call site excluded from tracking")]
pub struct ExcludedError;

/// Index of a node within its forest's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// A reconciled tree element built from one or more structurally identical
/// observations.
#[derive(Debug)]
pub struct Node {
    site: CallSite,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    arguments: BTreeMap<String, String>,
    signature: Option<String>,
    caller_name: Option<String>,
    readable_caller_name: Option<String>,
    caller_docs: Option<String>,
    tracked_id: Option<String>,
    // Computed once the node's child set is final for the phase; later
    // child merges keep the cached value, which is what makes it usable
    // as a stable merge key.
    content_hash: Option<u64>,
}

impl Node {
    pub fn site(&self) -> &CallSite {
        &self.site
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn arguments(&self) -> &BTreeMap<String, String> {
        &self.arguments
    }

    pub fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }

    /// Qualified name of the receiver's type/instance, if one was captured.
    pub fn caller_name(&self) -> Option<&str> {
        self.caller_name.as_deref()
    }

    /// Human-readable caller name.
    pub fn readable_caller_name(&self) -> Option<&str> {
        self.readable_caller_name.as_deref()
    }

    pub fn caller_docs(&self) -> Option<&str> {
        self.caller_docs.as_deref()
    }

    /// Tracking identifier assigned by the external tagging collaborator.
    pub fn tracked_id(&self) -> Option<&str> {
        self.tracked_id.as_deref()
    }
}

/// The per-phase reconciliation engine.
pub struct Forest {
    phase: Phase,
    filter: InclusionFilter,
    arena: Vec<Node>,
    roots: Vec<NodeId>,
    /// Content hash => node. Aliases into the arena; last writer wins on
    /// collision, an accepted imprecision of the commutative hash.
    lookup: HashMap<u64, NodeId>,
    /// Construction cache: host frame identity => built node. Bounded,
    /// evict-oldest; must be cleared at every phase stop so nodes from a
    /// later phase never alias nodes from an earlier one.
    built: HashMap<u64, NodeId>,
    built_order: VecDeque<u64>,
    cache_capacity: usize,
}

impl Forest {
    /// Create a forest for one tracking phase.
    pub fn new(phase: Phase, filter: InclusionFilter) -> Self {
        Self::with_cache_capacity(phase, filter, DEFAULT_CACHE_CAPACITY)
    }

    /// Create a forest with an explicit construction cache capacity.
    pub fn with_cache_capacity(phase: Phase, filter: InclusionFilter, capacity: usize) -> Self {
        Self {
            phase,
            filter,
            arena: Vec::new(),
            roots: Vec::new(),
            lookup: HashMap::new(),
            built: HashMap::new(),
            built_order: VecDeque::new(),
            cache_capacity: capacity.max(1),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn max_depth(&self) -> usize {
        self.filter.max_depth()
    }

    /// Root nodes, in insertion order.
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.arena[id.0]
    }

    /// Number of nodes ever built, including ones that were merged away.
    pub fn node_count(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Depth of a node: ancestor edges to its root. Recomputed on demand by
    /// walking the parent chain, never cached.
    pub fn depth(&self, id: NodeId) -> usize {
        let mut depth = 0;
        let mut current = self.arena[id.0].parent;
        while let Some(parent) = current {
            depth += 1;
            current = self.arena[parent.0].parent;
        }
        depth
    }

    /// Top-level ingestion point: build a node from the observation and
    /// reconcile it into the forest. Excluded observations are dropped
    /// silently.
    pub fn ingest(
        &mut self,
        observation: &CallObservation<'_>,
        resolver: Option<&dyn SignatureResolver>,
    ) {
        match self.build_node(observation, resolver) {
            Ok(id) => self.add_node(id),
            Err(ExcludedError) => {
                trace!(site = %observation.call_site, "observation excluded, dropped");
            }
        }
    }

    /// Build a node (and, recursively, its ancestors) from an observation.
    ///
    /// Fails with `ExcludedError` when the observation's own module fails
    /// the filter; the error from a parent resolution propagates, dropping
    /// the child as well. Dunder- and depth-excluded ancestors are not this
    /// function's concern: `add_node` climbs past them.
    pub fn build_node(
        &mut self,
        observation: &CallObservation<'_>,
        resolver: Option<&dyn SignatureResolver>,
    ) -> Result<NodeId, ExcludedError> {
        if let Some(frame_id) = observation.frame_id {
            if let Some(&id) = self.built.get(&frame_id) {
                return Ok(id);
            }
        }

        let site = &observation.call_site;
        if !self.filter.module_included(site.module.as_deref()) {
            return Err(ExcludedError);
        }

        let parent = match observation.parent {
            Some(parent_obs) => Some(self.build_node(parent_obs, resolver)?),
            None => None,
        };

        let mut arguments = BTreeMap::new();
        for (name, value) in &observation.local_bindings {
            if let Some(rendered) = render_binding(value) {
                arguments.insert(name.clone(), rendered);
            }
        }

        let receiver = observation.receiver.clone().unwrap_or_default();
        let ReceiverMetadata {
            class_name,
            readable_name,
            doc_string,
            tracking_id,
        } = receiver;

        // Default parameter values only make sense once a receiver binding
        // proved the call site is a bound function; explicit captured
        // locals win on key conflict.
        let mut signature = None;
        if observation.receiver.is_some() {
            if let Some(resolved) = resolver.and_then(|r| r.resolve(site)) {
                for (name, default) in &resolved.defaults {
                    if let Some(rendered) = render_binding(default) {
                        arguments.entry(name.clone()).or_insert(rendered);
                    }
                }
                signature = Some(resolved.text);
            }
        }

        let id = NodeId(self.arena.len());
        self.arena.push(Node {
            site: site.clone(),
            parent,
            children: Vec::new(),
            arguments,
            signature,
            caller_name: class_name,
            readable_caller_name: readable_name,
            caller_docs: doc_string,
            tracked_id: tracking_id,
            content_hash: None,
        });

        if let Some(frame_id) = observation.frame_id {
            self.cache_built(frame_id, id);
        }

        Ok(id)
    }

    /// Reconcile a built node into the forest.
    ///
    /// Idempotent no-op for filter-rejected nodes. Repeated structurally
    /// identical call patterns collapse onto one shared subtree keyed by
    /// content hash.
    pub fn add_node(&mut self, id: NodeId) {
        if !self.node_included(id) {
            return;
        }

        let hash = self.content_hash(id);

        match self.arena[id.0].parent {
            None => {
                let roots = self.roots.clone();
                let existing = roots.iter().find(|&&root| self.content_hash(root) == hash);
                match existing {
                    // Equal-hash root already present: merge onto it and keep
                    // the lookup pointing at the node that is in the tree.
                    Some(&survivor) => {
                        self.lookup.insert(hash, survivor);
                    }
                    None => {
                        self.roots.push(id);
                        self.lookup.insert(hash, id);
                    }
                }
            }
            Some(parent) => {
                let parent_hash = self.content_hash(parent);
                if let Some(&target) = self.lookup.get(&parent_hash) {
                    let siblings = self.arena[target.0].children.clone();
                    let survivor = siblings
                        .iter()
                        .find(|&&child| self.content_hash(child) == hash)
                        .copied();
                    match survivor {
                        // Content-hash merge: repeated identical call patterns
                        // collapse onto the sibling already in the tree.
                        Some(survivor) => {
                            self.lookup.insert(hash, survivor);
                        }
                        None => {
                            self.arena[target.0].children.push(id);
                            self.arena[id.0].parent = Some(target);
                            // Registered only after attachment: a directly
                            // recursive call shares its parent's bare hash,
                            // and an earlier registration would resolve the
                            // parent to the node itself, forming a self-loop.
                            self.lookup.insert(hash, id);
                        }
                    }
                } else {
                    // Ancestor climbing: skip every filter-rejected ancestor
                    // until an included one is found or the chain runs out,
                    // register it, then retry. Each retry strictly shortens
                    // the climbed chain.
                    let mut ancestor = Some(parent);
                    while let Some(candidate) = ancestor {
                        if self.node_included(candidate) {
                            break;
                        }
                        ancestor = self.arena[candidate.0].parent;
                    }
                    self.arena[id.0].parent = ancestor;
                    if let Some(candidate) = ancestor {
                        self.add_node(candidate);
                    }
                    self.add_node(id);
                }
            }
        }
    }

    /// Content hash: the call site's identity hash combined with the
    /// children's hashes by wrapping addition. Commutative and
    /// order-independent; different child sets summing to the same value
    /// are indistinguishable, an accepted risk of the merge key. Computed
    /// once; children merged in later do not reopen it.
    pub fn content_hash(&mut self, id: NodeId) -> u64 {
        if let Some(hash) = self.arena[id.0].content_hash {
            return hash;
        }
        let mut hash = self.arena[id.0].site.identity_hash();
        let children = self.arena[id.0].children.clone();
        for child in children {
            hash = hash.wrapping_add(self.content_hash(child));
        }
        self.arena[id.0].content_hash = Some(hash);
        hash
    }

    /// Content hash without caching, for read-only traversal. Falls back to
    /// recomputation for nodes that were never inserted.
    pub(crate) fn hash_of(&self, id: NodeId) -> u64 {
        if let Some(hash) = self.arena[id.0].content_hash {
            return hash;
        }
        let mut hash = self.arena[id.0].site.identity_hash();
        for &child in &self.arena[id.0].children {
            hash = hash.wrapping_add(self.hash_of(child));
        }
        hash
    }

    /// Clear the construction cache. Called at phase stop so a later phase
    /// never aliases this phase's nodes through stale frame identities.
    pub fn clear_construction_cache(&mut self) {
        self.built.clear();
        self.built_order.clear();
    }

    fn node_included(&self, id: NodeId) -> bool {
        let depth = self.depth(id);
        self.filter.is_relevant(&self.arena[id.0].site, depth)
    }

    fn cache_built(&mut self, frame_id: u64, id: NodeId) {
        if self.built.len() >= self.cache_capacity {
            if let Some(oldest) = self.built_order.pop_front() {
                self.built.remove(&oldest);
            }
        }
        self.built.insert(frame_id, id);
        self.built_order.push_back(frame_id);
    }
}

/// Best-effort string rendering of a captured binding. Values whose
/// serialized size reaches the byte limit, and values that fail to
/// serialize, are omitted rather than failing the construction.
fn render_binding(value: &serde_json::Value) -> Option<String> {
    let size = serde_json::to_vec(value).ok()?.len();
    if size >= ARGUMENT_BYTE_LIMIT {
        return None;
    }
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
