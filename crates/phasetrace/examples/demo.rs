//! Demo of phase tracking simulating a small training-then-inference run.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use phasetrace::forest::{
    CallObservation, CallSite, FnSignature, ReceiverMetadata, SignatureResolver,
};
use phasetrace::{Config, LibraryInventory, Phase, PhaseSession};

/// Pretend the observed environment can resolve `Trainer.fit` back to its
/// definition.
struct DemoResolver;

impl SignatureResolver for DemoResolver {
    fn resolve(&self, site: &CallSite) -> Option<FnSignature> {
        if site.leaf_name() != "fit" {
            return None;
        }
        let mut defaults = std::collections::BTreeMap::new();
        defaults.insert("lr".to_string(), serde_json::json!(0.01));
        Some(FnSignature {
            text: "def fit(self, data, lr=0.01)".to_string(),
            defaults,
        })
    }
}

struct DemoInventory;

impl LibraryInventory for DemoInventory {
    fn installed_libraries(&self) -> Vec<(String, String)> {
        vec![
            ("torch".to_string(), "2.3.0".to_string()),
            ("app".to_string(), "0.1.0".to_string()),
        ]
    }
}

fn simulate_training(session: &mut PhaseSession) {
    let main = CallObservation::new(CallSite::new("app", "main")).with_frame_id(1);
    session.observe(&main);

    let fit = CallObservation::new(CallSite::new("app.train", "Trainer.fit"))
        .with_parent(&main)
        .with_frame_id(2)
        .with_binding("lr", 0.5)
        .with_receiver(ReceiverMetadata {
            class_name: Some("app.train.Trainer".to_string()),
            readable_name: Some("Trainer".to_string()),
            doc_string: Some("Trains the model.".to_string()),
            tracking_id: Some("trainer-1".to_string()),
        });
    session.observe(&fit);

    // A loop body: three structurally identical steps collapse onto one node.
    for step in 0..3u64 {
        let train_step = CallObservation::new(CallSite::new("app.train", "Trainer.train_step"))
            .with_parent(&fit)
            .with_frame_id(10 + step)
            .with_binding("batch", 32);
        session.observe(&train_step);
    }
}

fn simulate_inference(session: &mut PhaseSession) {
    let main = CallObservation::new(CallSite::new("app", "serve")).with_frame_id(20);
    session.observe(&main);

    let predict = CallObservation::new(CallSite::new("app.models", "Net.__call__"))
        .with_parent(&main)
        .with_frame_id(21)
        .with_binding("batch", 1);
    session.observe(&predict);
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut config = Config::default();
    config.trace.root = std::env::temp_dir().join("phasetrace-demo");

    let mut session = PhaseSession::new(config)
        .with_resolver(Box::new(DemoResolver))
        .with_inventory(Box::new(DemoInventory));

    session.track(Phase::Training)?;
    simulate_training(&mut session);

    // Switching phases flushes Training to disk first.
    session.track(Phase::Inference)?;
    simulate_inference(&mut session);
    session.stop()?;

    let root = session.root_dir();
    println!("Session artifacts: {}", root.display());
    for phase in Phase::ALL {
        let trace = root.join(phase.as_str()).join("trace.txt");
        if trace.exists() {
            println!("\n--- {} ---", phase);
            print!("{}", std::fs::read_to_string(trace)?);
        }
    }

    Ok(())
}
