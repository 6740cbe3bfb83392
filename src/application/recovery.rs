use crate::domain::machine::MachineState;
use crate::domain::ports::EventStore;
use crate::domain::product::Catalog;
use crate::error::Result;

/// Rebuilds the machine state from the latest snapshot plus the event log.
///
/// Runs once at startup, before anything appends. Records already covered by
/// the snapshot (timestamp at or before it) are skipped, as are records the
/// state rejects. Calling it twice on the same store gives the same result.
pub async fn recover(store: &dyn EventStore, catalog: &Catalog) -> Result<MachineState> {
    let (mut state, watermark) = match store.load_latest_snapshot().await? {
        Some(mut snapshot) => {
            snapshot.seed_inventory(catalog);
            let watermark = snapshot.timestamp;
            (snapshot, watermark)
        }
        None => (MachineState::from_catalog(catalog), None),
    };

    let records = store.replay_all().await?;
    let mut applied = 0usize;
    let mut skipped = 0usize;
    for record in &records {
        if watermark.is_some_and(|ts| record.timestamp <= ts) {
            tracing::debug!(timestamp = %record.timestamp, "Record already covered by snapshot");
            continue;
        }
        match state.apply(record) {
            Ok(()) => applied += 1,
            Err(e) => {
                skipped += 1;
                tracing::warn!(
                    kind = ?record.event.kind(),
                    timestamp = %record.timestamp,
                    error = %e,
                    "Skipping event that cannot be applied"
                );
            }
        }
    }

    tracing::info!(
        from_snapshot = watermark.is_some(),
        applied,
        skipped,
        state = %state.state,
        escrow = state.escrow.balance(),
        "Recovered machine state"
    );
    Ok(state)
}
