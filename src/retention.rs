use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

/// Interval between sweeps (seconds).
const SWEEP_INTERVAL_SECS: u64 = 60;
/// How long a soft-deleted file stays recoverable before hard deletion.
const FILE_PURGE_AFTER_DAYS: i64 = 7;
/// How long a dead/delivered webhook delivery row is kept for inspection.
const DELIVERY_PURGE_AFTER_DAYS: i64 = 30;

#[derive(Debug, Clone, Default)]
pub struct SweepResult {
    pub claims_expired: i64,
    pub files_purged: i64,
    pub deliveries_purged: i64,
}

/// Spawns the background sweep: claim expiry is read-derived (orchestration
/// recomputes it from `expires_at` on every query, SPEC_FULL.md §4.3), so
/// this task only needs to purge rows whose retention window has passed —
/// soft-deleted files and settled webhook deliveries. Runs on its own
/// connection, same shape as the webhook dispatcher.
pub fn spawn_retention_task(db_path: String) {
    tokio::spawn(async move {
        let conn = Arc::new(Mutex::new(match Connection::open(&db_path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("⚠️ Retention task: failed to open DB: {e}");
                return;
            }
        }));
        {
            let db = conn.lock().unwrap_or_else(|e| e.into_inner());
            db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;").ok();
        }

        tokio::time::sleep(std::time::Duration::from_secs(30)).await;

        loop {
            {
                let db = conn.lock().unwrap_or_else(|e| {
                    eprintln!("WARN: Retention task DB mutex poisoned, recovering");
                    e.into_inner()
                });
                let result = run_sweep(&db);
                if result.files_purged > 0 || result.deliveries_purged > 0 {
                    eprintln!(
                        "🧹 Retention sweep: purged {} files, {} webhook deliveries",
                        result.files_purged, result.deliveries_purged
                    );
                }
            }
            tokio::time::sleep(std::time::Duration::from_secs(SWEEP_INTERVAL_SECS)).await;
        }
    });
}

pub fn run_sweep(conn: &Connection) -> SweepResult {
    let mut result = SweepResult::default();

    let file_cutoff = (chrono::Utc::now() - chrono::Duration::days(FILE_PURGE_AFTER_DAYS)).to_rfc3339();
    result.files_purged = conn
        .execute(
            "DELETE FROM files WHERE deleted_at IS NOT NULL AND deleted_at < ?1",
            params![file_cutoff],
        )
        .unwrap_or(0) as i64;

    let delivery_cutoff = (chrono::Utc::now() - chrono::Duration::days(DELIVERY_PURGE_AFTER_DAYS)).to_rfc3339();
    result.deliveries_purged = conn
        .execute(
            "DELETE FROM webhook_deliveries WHERE status IN ('delivered', 'dead') AND created_at < ?1",
            params![delivery_cutoff],
        )
        .unwrap_or(0) as i64;

    result
}
