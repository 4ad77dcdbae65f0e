use tablo_select::config::EngineConfig;
use tablo_select::reservation::ReservationState;
use tablo_select::store::PoolRegistry;
use tablo_select::workflow::WorkflowOrchestrator;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Reports the reservation state of every gallery and, with `--release`,
/// releases reservations left behind by interrupted finalizations.
///
/// Must not run while the engine is serving requests: a finalization in
/// flight is indistinguishable from an orphan.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tablo_select=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let release = std::env::args().skip(1).any(|arg| arg == "--release");
    let config = EngineConfig::from_env();
    let engine = WorkflowOrchestrator::open(&config)?;
    let coordinator = engine.coordinator();

    for gallery in engine.pool().galleries()? {
        let states = coordinator.reservation_state(gallery)?;
        let unclaimed = states
            .values()
            .filter(|s| matches!(s, ReservationState::Unclaimed))
            .count();
        let committed = states
            .values()
            .filter(|s| matches!(s, ReservationState::Committed(_)))
            .count();
        let orphaned: Vec<_> = states.iter().filter(|(_, s)| s.is_orphaned()).collect();

        println!(
            "{}: {} unclaimed, {} committed, {} orphaned",
            gallery,
            unclaimed,
            committed,
            orphaned.len()
        );
        for (media, state) in &orphaned {
            println!("  {} {}", media, state);
        }

        if release && !orphaned.is_empty() {
            let released = coordinator.release_orphaned(gallery)?;
            info!(gallery = %gallery, released = released.len(), "Orphans released");
        }
    }

    Ok(())
}
