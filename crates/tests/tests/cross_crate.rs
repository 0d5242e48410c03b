//! Cross-crate integration tests
//!
//! These tests drive the session lifecycle end to end and verify the
//! reconciliation guarantees on the artifacts actually written to disk.

use std::fs;
use std::path::{Path, PathBuf};

use phasetrace::{Config, Phase, PhaseSession};
use phasetrace_forest::{CallObservation, CallSite};
use tempfile::tempdir;

fn session_in(dir: &Path) -> PhaseSession {
    let mut config = Config::default();
    config.trace.root = dir.to_path_buf();
    PhaseSession::new(config)
}

fn phase_files(phase_dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = fs::read_dir(phase_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    files.sort();
    files
}

/// Scenario A: `root()` calls `train_step()` three times with identical
/// captured arguments within one Training phase.
///
/// The dumped trace shows one `train_step` line nested once under `root`,
/// and exactly one artifact file exists for `train_step`.
#[test]
fn test_repeated_identical_calls_collapse() {
    let dir = tempdir().unwrap();
    let mut session = session_in(dir.path());

    session.track(Phase::Training).unwrap();
    let root = CallObservation::new(CallSite::new("app", "root")).with_frame_id(1);
    session.observe(&root);
    for step in 0..3u64 {
        let call = CallObservation::new(CallSite::new("app", "train_step"))
            .with_parent(&root)
            .with_frame_id(10 + step)
            .with_binding("batch", 32);
        session.observe(&call);
    }
    session.stop().unwrap();

    let phase_dir = session.root_dir().join("Training");
    let trace = fs::read_to_string(phase_dir.join("trace.txt")).unwrap();
    assert_eq!(trace, "[0]\tapp.root\n[1]\t\tapp.train_step\n");

    let step_artifacts: Vec<_> = phase_files(&phase_dir)
        .into_iter()
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.contains("train-step"))
        })
        .collect();
    assert_eq!(step_artifacts.len(), 1);
}

/// Scenario B: a recursive call chain seven levels deep with the default
/// depth bound of 6. The depth-7 node is absent from both the trace and
/// the artifact set.
#[test]
fn test_depth_bound_truncates_chain() {
    let dir = tempdir().unwrap();
    let mut session = session_in(dir.path());

    session.track(Phase::Training).unwrap();
    let f0 = CallObservation::new(CallSite::new("app", "f0"));
    let f1 = CallObservation::new(CallSite::new("app", "f1")).with_parent(&f0);
    let f2 = CallObservation::new(CallSite::new("app", "f2")).with_parent(&f1);
    let f3 = CallObservation::new(CallSite::new("app", "f3")).with_parent(&f2);
    let f4 = CallObservation::new(CallSite::new("app", "f4")).with_parent(&f3);
    let f5 = CallObservation::new(CallSite::new("app", "f5")).with_parent(&f4);
    let f6 = CallObservation::new(CallSite::new("app", "f6")).with_parent(&f5);
    let f7 = CallObservation::new(CallSite::new("app", "f7")).with_parent(&f6);
    for obs in [&f0, &f1, &f2, &f3, &f4, &f5, &f6, &f7] {
        session.observe(obs);
    }
    session.stop().unwrap();

    let phase_dir = session.root_dir().join("Training");
    let trace = fs::read_to_string(phase_dir.join("trace.txt")).unwrap();
    assert!(trace.contains("app.f6"));
    assert!(!trace.contains("app.f7"));

    let names: Vec<String> = phase_files(&phase_dir)
        .iter()
        .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(String::from))
        .collect();
    assert!(names.contains(&"app-f6.json".to_string()));
    assert!(!names.contains(&"app-f7.json".to_string()));
}

/// A directly recursive chain: the same call site as its own ancestor,
/// eight frames deep with the default depth bound of 6. Ingestion
/// terminates, the dump succeeds, and nesting stops at the bound.
#[test]
fn test_directly_recursive_chain_depth_bounded() {
    let dir = tempdir().unwrap();
    let mut session = session_in(dir.path());

    session.track(Phase::Training).unwrap();
    let f0 = CallObservation::new(CallSite::new("app", "fib")).with_frame_id(1);
    let f1 = CallObservation::new(CallSite::new("app", "fib"))
        .with_parent(&f0)
        .with_frame_id(2);
    let f2 = CallObservation::new(CallSite::new("app", "fib"))
        .with_parent(&f1)
        .with_frame_id(3);
    let f3 = CallObservation::new(CallSite::new("app", "fib"))
        .with_parent(&f2)
        .with_frame_id(4);
    let f4 = CallObservation::new(CallSite::new("app", "fib"))
        .with_parent(&f3)
        .with_frame_id(5);
    let f5 = CallObservation::new(CallSite::new("app", "fib"))
        .with_parent(&f4)
        .with_frame_id(6);
    let f6 = CallObservation::new(CallSite::new("app", "fib"))
        .with_parent(&f5)
        .with_frame_id(7);
    let f7 = CallObservation::new(CallSite::new("app", "fib"))
        .with_parent(&f6)
        .with_frame_id(8);
    for obs in [&f0, &f1, &f2, &f3, &f4, &f5, &f6, &f7] {
        session.observe(obs);
    }
    session.stop().unwrap();

    let phase_dir = session.root_dir().join("Training");
    let trace = fs::read_to_string(phase_dir.join("trace.txt")).unwrap();
    assert_eq!(trace.matches("app.fib").count(), 7);
    assert!(trace.contains("[6]"));
    assert!(!trace.contains("[7]"));
    assert!(phase_dir.join("app-fib.json").exists());
}

/// The same recursive chain without frame identities: every observation
/// rebuilds its ancestry from scratch, and each recursion level still
/// lands one deeper instead of looping or vanishing.
#[test]
fn test_directly_recursive_chain_without_frame_ids() {
    let dir = tempdir().unwrap();
    let mut session = session_in(dir.path());

    session.track(Phase::Training).unwrap();
    let f0 = CallObservation::new(CallSite::new("app", "fib"));
    let f1 = CallObservation::new(CallSite::new("app", "fib")).with_parent(&f0);
    let f2 = CallObservation::new(CallSite::new("app", "fib")).with_parent(&f1);
    for obs in [&f0, &f1, &f2] {
        session.observe(obs);
    }
    session.stop().unwrap();

    let trace =
        fs::read_to_string(session.root_dir().join("Training").join("trace.txt")).unwrap();
    assert_eq!(trace, "[0]\tapp.fib\n[1]\t\tapp.fib\n[2]\t\t\tapp.fib\n");
}

/// Scenario C: `track(Training)` then `track(Inference)` without an
/// intervening `stop()`. The Training forest is fully dumped before
/// Inference tracking begins.
#[test]
fn test_phase_switch_flushes_previous_phase() {
    let dir = tempdir().unwrap();
    let mut session = session_in(dir.path());

    session.track(Phase::Training).unwrap();
    session.observe(&CallObservation::new(CallSite::new("app", "fit")));

    session.track(Phase::Inference).unwrap();
    let training_dir = session.root_dir().join("Training");
    assert!(training_dir.join("trace.txt").exists());
    assert!(training_dir.join("app-fit.json").exists());
    assert_eq!(session.active_phase(), Some(Phase::Inference));

    session.observe(&CallObservation::new(CallSite::new("app", "predict")));
    session.stop().unwrap();
    let inference_trace =
        fs::read_to_string(session.root_dir().join("Inference").join("trace.txt")).unwrap();
    assert!(inference_trace.contains("app.predict"));
    // The Inference phase never sees Training observations.
    assert!(!inference_trace.contains("app.fit"));
}

/// Ancestor skip: root -> A (dunder-excluded) -> B (included). B appears as
/// a direct child of root in the dumped trace; A never appears.
#[test]
fn test_excluded_ancestor_skipped_without_breaking_ancestry() {
    let dir = tempdir().unwrap();
    let mut session = session_in(dir.path());

    session.track(Phase::Processing).unwrap();
    let root = CallObservation::new(CallSite::new("app", "root")).with_frame_id(1);
    let excluded = CallObservation::new(CallSite::new("app", "Loader.__getattr__"))
        .with_parent(&root)
        .with_frame_id(2);
    let included = CallObservation::new(CallSite::new("app", "load_batch"))
        .with_parent(&excluded)
        .with_frame_id(3);
    session.observe(&root);
    session.observe(&excluded);
    session.observe(&included);
    session.stop().unwrap();

    let trace =
        fs::read_to_string(session.root_dir().join("Processing").join("trace.txt")).unwrap();
    assert_eq!(trace, "[0]\tapp.root\n[1]\t\tapp.load_batch\n");
}

/// Dunder filter: no emitted call-site name starts with `__` except the
/// constructor and call-operator markers.
#[test]
fn test_dunder_names_filtered_except_lifecycle_markers() {
    let dir = tempdir().unwrap();
    let mut session = session_in(dir.path());

    session.track(Phase::Inference).unwrap();
    let root = CallObservation::new(CallSite::new("app", "serve")).with_frame_id(1);
    session.observe(&root);
    for (frame, name) in [
        (2, "Model.__init__"),
        (3, "Model.__call__"),
        (4, "Model.__repr__"),
        (5, "Model.__getattr__"),
    ] {
        let call = CallObservation::new(CallSite::new("app.models", name))
            .with_parent(&root)
            .with_frame_id(frame);
        session.observe(&call);
    }
    session.stop().unwrap();

    let trace =
        fs::read_to_string(session.root_dir().join("Inference").join("trace.txt")).unwrap();
    assert!(trace.contains("__init__"));
    assert!(trace.contains("__call__"));
    assert!(!trace.contains("__repr__"));
    assert!(!trace.contains("__getattr__"));
}

/// Idempotent dump: a second dump of the same forest never overwrites an
/// existing per-node artifact.
#[test]
fn test_artifacts_written_once_across_dumps() {
    let dir = tempdir().unwrap();
    let mut session = session_in(dir.path());

    session.track(Phase::Training).unwrap();
    session.observe(&CallObservation::new(CallSite::new("app", "root")));
    session.stop().unwrap();

    let artifact = session.root_dir().join("Training").join("app-root.json");
    fs::write(&artifact, "sentinel").unwrap();

    // Re-enter and stop the phase again; the forest persists and re-dumps.
    session.track(Phase::Training).unwrap();
    session.stop().unwrap();
    assert_eq!(fs::read_to_string(&artifact).unwrap(), "sentinel");
}

/// Per-node artifact contents: captured arguments, defaults merged under
/// explicit values, and receiver metadata.
#[test]
fn test_artifact_record_contents() {
    use phasetrace::forest::{FnSignature, ReceiverMetadata, SignatureResolver};
    use std::collections::BTreeMap;

    struct Resolver;
    impl SignatureResolver for Resolver {
        fn resolve(&self, site: &CallSite) -> Option<FnSignature> {
            let mut defaults = BTreeMap::new();
            defaults.insert("lr".to_string(), serde_json::json!(0.01));
            defaults.insert("epochs".to_string(), serde_json::json!(10));
            Some(FnSignature {
                text: format!("def {}(self, lr=0.01, epochs=10)", site.leaf_name()),
                defaults,
            })
        }
    }

    let dir = tempdir().unwrap();
    let mut config = Config::default();
    config.trace.root = dir.path().to_path_buf();
    let mut session = PhaseSession::new(config).with_resolver(Box::new(Resolver));

    session.track(Phase::Training).unwrap();
    let fit = CallObservation::new(CallSite::new("app.train", "Trainer.fit"))
        .with_binding("lr", 0.5)
        .with_receiver(ReceiverMetadata {
            class_name: Some("app.train.Trainer".to_string()),
            readable_name: Some("Trainer".to_string()),
            doc_string: Some("Trains the model.".to_string()),
            tracking_id: Some("trainer-1".to_string()),
        });
    session.observe(&fit);
    session.stop().unwrap();

    let record: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(
            session
                .root_dir()
                .join("Training")
                .join("app-train-trainer-fit.json"),
        )
        .unwrap(),
    )
    .unwrap();

    assert_eq!(record["arguments"]["lr"], "0.5");
    assert_eq!(record["arguments"]["epochs"], "10");
    assert_eq!(record["signature"], "def fit(self, lr=0.01, epochs=10)");
    assert_eq!(record["caller_name"], "Trainer");
    assert_eq!(record["caller_docs"], "Trains the model.");
    assert_eq!(record["tracked_class_name"], "trainer-1");
}

/// Re-entering a phase after a stop keeps accumulating into the same
/// forest, but never aliases nodes through stale frame identities.
#[test]
fn test_phase_reentry_does_not_alias_cached_nodes() {
    let dir = tempdir().unwrap();
    let mut session = session_in(dir.path());

    session.track(Phase::Training).unwrap();
    session.observe(&CallObservation::new(CallSite::new("app", "root")).with_frame_id(1));
    session.stop().unwrap();

    session.track(Phase::Training).unwrap();
    // Same frame identity, different call site: a stale cache entry would
    // resurrect the old node instead of recording this one.
    session.observe(&CallObservation::new(CallSite::new("app", "other")).with_frame_id(1));
    session.stop().unwrap();

    let trace =
        fs::read_to_string(session.root_dir().join("Training").join("trace.txt")).unwrap();
    assert!(trace.contains("app.root"));
    assert!(trace.contains("app.other"));
}
