use rusqlite::{params, Connection};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::models::AuditLogEntry;

/// Flush interval for batched audit inserts (seconds).
const FLUSH_INTERVAL_SECS: u64 = 1;

#[derive(Clone)]
pub struct AuditLog {
    sender: UnboundedSender<AuditLogEntry>,
}

impl AuditLog {
    /// Records a mutating action. Non-blocking: the entry is handed to the
    /// background flush task and this call returns immediately. A full
    /// receiver (flush task gone) silently drops the entry rather than
    /// backpressuring the request path.
    pub fn record(&self, entry: AuditLogEntry) {
        let _ = self.sender.send(entry);
    }
}

/// Spawns the channel + flush task pair, grounded on the retention task's
/// fixed-interval poll-loop shape. Returns the handle handlers use to enqueue
/// entries; the receiver is consumed by the spawned task.
pub fn spawn(db_path: String) -> AuditLog {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(flush_loop(db_path, rx));
    AuditLog { sender: tx }
}

async fn flush_loop(db_path: String, mut rx: UnboundedReceiver<AuditLogEntry>) {
    let conn = match Connection::open(&db_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("⚠️ Audit log: failed to open DB: {e}");
            return;
        }
    };
    conn.execute_batch("PRAGMA journal_mode=WAL;").ok();

    let mut pending: Vec<AuditLogEntry> = Vec::new();
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(FLUSH_INTERVAL_SECS));

    loop {
        tokio::select! {
            entry = rx.recv() => {
                match entry {
                    Some(e) => pending.push(e),
                    None => break,
                }
            }
            _ = ticker.tick() => {
                if !pending.is_empty() {
                    flush(&conn, &pending);
                    pending.clear();
                }
            }
        }
    }
    if !pending.is_empty() {
        flush(&conn, &pending);
    }
}

fn flush(conn: &Connection, entries: &[AuditLogEntry]) {
    for entry in entries {
        let details = entry.details.as_ref().map(|v| v.to_string());
        let result = conn.execute(
            "INSERT INTO audit_logs (id, workspace_id, actor_type, actor, action, resource_id, details, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                uuid::Uuid::new_v4().to_string(),
                &entry.workspace_id,
                &entry.actor_type,
                &entry.actor,
                &entry.action,
                &entry.resource_id,
                details,
                &entry.created_at,
            ],
        );
        if let Err(e) = result {
            eprintln!("⚠️ Audit log: failed to flush entry: {e}");
        }
    }
}
