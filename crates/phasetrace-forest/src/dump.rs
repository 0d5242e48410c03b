//! Artifact serialization for a reconciled forest.
//!
//! Two artifacts per phase, written at phase stop into
//! `<session root>/<Phase>/`:
//! - `trace.txt`: a flat indented pre-order walk of the root nodes
//! - one JSON record per distinct reachable node, named by a slug of the
//!   caller (or module) and the call-site name; an existing file is left
//!   untouched, so repeated dumps never rewrite an artifact

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::forest::{Forest, NodeId};

/// Error type for artifact dump operations.
#[derive(Debug, thiserror::Error)]
pub enum DumpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// The flat trace file name within a phase directory.
pub const TRACE_FILE: &str = "trace.txt";

/// Structured per-node record, one file per distinct call-site slug.
#[derive(Serialize)]
struct NodeRecord<'a> {
    arguments: &'a std::collections::BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tracked_class_name: Option<&'a str>,
    signature: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    caller_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    caller_docs: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<&'a str>,
}

impl Forest {
    /// Serialize the forest into `session_root/<Phase>/`.
    ///
    /// Idempotent by construction: `trace.txt` is rewritten with identical
    /// content, and a per-node artifact that already exists is skipped
    /// (first writer for a call-site identity wins). Returns the phase
    /// directory.
    pub fn dump(&self, session_root: &Path) -> Result<PathBuf, DumpError> {
        let phase_dir = session_root.join(self.phase().as_str());
        fs::create_dir_all(&phase_dir)?;

        let mut trace = String::new();
        for &root in self.roots() {
            self.write_trace_line(root, 0, &mut trace);
        }
        fs::write(phase_dir.join(TRACE_FILE), trace)?;

        for &root in self.roots() {
            self.dump_node(root, &phase_dir)?;
        }

        debug!(phase = %self.phase(), dir = %phase_dir.display(), "forest dumped");
        Ok(phase_dir)
    }

    /// File name (without directory) of a node's artifact.
    pub fn artifact_name(&self, id: NodeId) -> String {
        let node = self.node(id);
        let owner = node
            .caller_name()
            .or(node.site().module.as_deref())
            .unwrap_or("unknown-module");
        format!("{}.json", slugify(&format!("{}.{}", owner, node.site().leaf_name())))
    }

    fn write_trace_line(&self, id: NodeId, level: usize, out: &mut String) {
        if level > self.max_depth() {
            return;
        }
        out.push_str(&format!("[{}]", level));
        out.push_str(&"\t".repeat(level + 1));
        out.push_str(&self.node(id).site().to_string());
        out.push('\n');

        // Consecutive identical-hash siblings render once.
        let mut previous = None;
        for &child in self.node(id).children() {
            let hash = self.hash_of(child);
            if previous != Some(hash) {
                self.write_trace_line(child, level + 1, out);
                previous = Some(hash);
            }
        }
    }

    fn dump_node(&self, id: NodeId, phase_dir: &Path) -> Result<(), DumpError> {
        let path = phase_dir.join(self.artifact_name(id));
        if !path.exists() {
            let node = self.node(id);
            let record = NodeRecord {
                arguments: node.arguments(),
                tracked_class_name: node.tracked_id(),
                signature: node.signature().unwrap_or(""),
                caller_name: node.readable_caller_name(),
                caller_docs: node.caller_docs(),
                source: node.site().source_text.as_deref(),
            };
            let mut writer = BufWriter::new(File::create(&path)?);
            serde_json::to_writer(&mut writer, &record)?;
            writer.flush()?;
        }
        for &child in self.node(id).children() {
            self.dump_node(child, phase_dir)?;
        }
        Ok(())
    }
}

/// Lowercase alphanumeric slug with `-` separators; runs of other
/// characters collapse to a single separator.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_separator = false;
    for ch in input.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_separator && !slug.is_empty() {
                slug.push('-');
            }
            pending_separator = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_separator = true;
        }
    }
    slug
}
