//! Relevance filtering for call sites.
//!
//! The filter is a pure predicate over `(module, qualified name, depth)`.
//! It is consulted twice: once when a node is built from an observation
//! (module rules only) and once when a node is inserted into a forest
//! (all rules, including the dunder and depth rules).

use crate::types::CallSite;

/// Default bound on node depth, counted as ancestor edges from a root.
pub const DEFAULT_MAX_DEPTH: usize = 6;

/// The constructor lifecycle marker, exempt from the dunder rule.
pub const CONSTRUCTOR_MARKER: &str = "__init__";

/// The call-operator lifecycle marker, exempt from the dunder rule.
pub const CALL_OPERATOR_MARKER: &str = "__call__";

const DUNDER_PREFIX: &str = "__";

/// Top-level packages shipped with the default runtime distribution.
const RUNTIME_PACKAGES: &[&str] = &[
    "builtins", "abc", "typing", "importlib", "functools", "itertools",
    "collections", "contextlib", "dataclasses", "enum", "inspect", "os",
    "sys", "io", "re", "json", "pathlib", "threading", "logging", "codecs",
    "weakref", "copy", "pickle", "warnings",
];

/// Top-level packages belonging to development tooling.
const DEV_PACKAGES: &[&str] = &[
    "pytest", "unittest", "doctest", "pdb", "pip", "setuptools", "wheel",
    "IPython", "ipykernel", "pluggy",
];

/// Substrings marking modules known to be irrelevant noise.
const IRRELEVANT_SUBSTRINGS: &[&str] = &[
    "numpy", "pandas", "matplotlib", "tqdm", "joblib", "pkg_resources",
];

/// Configuration for the inclusion filter.
///
/// The denylists extend the built-in defaults; `max_depth` bounds how deep
/// into a call chain nodes are still recorded.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    /// Extra top-level runtime packages to exclude.
    pub runtime_packages: Vec<String>,
    /// Extra top-level development-tooling packages to exclude.
    pub dev_packages: Vec<String>,
    /// Extra module-name substrings to exclude.
    pub irrelevant_substrings: Vec<String>,
    /// Maximum recorded node depth.
    pub max_depth: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            runtime_packages: Vec::new(),
            dev_packages: Vec::new(),
            irrelevant_substrings: Vec::new(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Pure predicate deciding whether a call site / depth is worth recording.
#[derive(Debug, Clone, Default)]
pub struct InclusionFilter {
    config: FilterConfig,
}

impl InclusionFilter {
    /// Create a filter from a configuration.
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    /// Create a filter with default denylists and the given depth bound.
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self::new(FilterConfig {
            max_depth,
            ..FilterConfig::default()
        })
    }

    /// The configured depth bound.
    pub fn max_depth(&self) -> usize {
        self.config.max_depth
    }

    /// Module-level rules: the module must be resolved, its top-level
    /// package must not be a runtime or dev-tooling package, and its full
    /// name must not contain a denylisted substring.
    pub fn module_included(&self, module: Option<&str>) -> bool {
        let Some(module) = module else {
            return false;
        };
        let top_level = module.split('.').next().unwrap_or(module);

        if RUNTIME_PACKAGES.contains(&top_level) || DEV_PACKAGES.contains(&top_level) {
            return false;
        }
        if self
            .config
            .runtime_packages
            .iter()
            .chain(self.config.dev_packages.iter())
            .any(|pkg| pkg == top_level)
        {
            return false;
        }

        !IRRELEVANT_SUBSTRINGS
            .iter()
            .copied()
            .chain(self.config.irrelevant_substrings.iter().map(String::as_str))
            .any(|noise| module.contains(noise))
    }

    /// All rules, evaluated in order: module rules, then the dunder rule on
    /// the leaf name (`__init__` and `__call__` stay), then the depth bound.
    pub fn is_relevant(&self, site: &CallSite, depth: usize) -> bool {
        if !self.module_included(site.module.as_deref()) {
            return false;
        }

        let leaf = site.leaf_name();
        if leaf.starts_with(DUNDER_PREFIX)
            && leaf != CONSTRUCTOR_MARKER
            && leaf != CALL_OPERATOR_MARKER
        {
            return false;
        }

        depth <= self.config.max_depth
    }
}
