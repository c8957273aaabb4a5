use hmac::{Hmac, Mac};
use rusqlite::{params, Connection};
use sha2::Sha256;
use std::sync::{Arc, Mutex};

use crate::db::Db;

type HmacSha256 = Hmac<Sha256>;

/// `[1s, 5s, 30s, 2m, 10m]`, SPEC_FULL.md §4.6. A delivery that still fails
/// after the fifth attempt is marked dead and not retried again.
const RETRY_SCHEDULE_SECS: [i64; 5] = [1, 5, 30, 120, 600];
const MAX_ATTEMPTS: i64 = 5;
const POLL_INTERVAL_SECS: u64 = 2;

/// Looks up webhooks whose scope covers `file_path` and whose event filter
/// matches `event_name`, and inserts one `webhook_deliveries` row per match.
/// Called synchronously from the handler that published the triggering
/// event, on the same connection — the dispatcher only ever reads rows this
/// wrote.
pub fn enqueue_for_event(db: &Db, workspace_id: &str, file_path: &str, event_name: &str, payload: &serde_json::Value) {
    let conn = db.conn.lock().unwrap();
    let mut stmt = match conn.prepare(
        "SELECT id, scope_type, scope_path, recursive, events FROM webhooks
         WHERE workspace_id = ?1 AND status = 'active' AND deleted_at IS NULL",
    ) {
        Ok(s) => s,
        Err(_) => return,
    };

    let rows: Vec<(String, String, String, bool, String)> = stmt
        .query_map(params![workspace_id], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get::<_, i64>(3)? != 0, r.get(4)?))
        })
        .map(|rows| rows.filter_map(|r| r.ok()).collect())
        .unwrap_or_default();

    let now = chrono::Utc::now().to_rfc3339();

    for (webhook_id, scope_type, scope_path, recursive, events) in rows {
        if !scope_matches(&scope_type, &scope_path, recursive, file_path) {
            continue;
        }
        if events != "*" {
            let allowed: Vec<&str> = events.split(',').map(|s| s.trim()).collect();
            if !allowed.contains(&event_name) {
                continue;
            }
        }

        let body = serde_json::json!({
            "event": event_name,
            "workspaceId": workspace_id,
            "path": file_path,
            "data": payload,
            "timestamp": now,
        });

        conn.execute(
            "INSERT INTO webhook_deliveries (id, webhook_id, event, payload, attempts, next_attempt_at, status, created_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5, 'pending', ?5)",
            params![
                uuid::Uuid::new_v4().to_string(),
                webhook_id,
                event_name,
                body.to_string(),
                &now,
            ],
        )
        .ok();
    }
}

fn scope_matches(scope_type: &str, scope_path: &str, recursive: bool, file_path: &str) -> bool {
    match scope_type {
        "workspace" => true,
        "file" => file_path == scope_path,
        "folder" => {
            let prefix = if scope_path.ends_with('/') { scope_path.to_string() } else { format!("{scope_path}/") };
            if recursive {
                file_path.starts_with(&prefix)
            } else {
                // non-recursive: only direct children, no nested subfolder
                file_path.starts_with(&prefix) && !file_path[prefix.len()..].contains('/')
            }
        }
        _ => false,
    }
}

/// Spawns the background delivery loop: polls `webhook_deliveries` for rows
/// due now, POSTs each with an HMAC-SHA256 body signature, and reschedules
/// on failure per `RETRY_SCHEDULE_SECS`. Runs on its own connection, the same
/// way the reference server isolates its background tasks from the
/// request-serving connection.
pub fn spawn_dispatcher(db_path: String) {
    tokio::spawn(async move {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        let conn = Arc::new(Mutex::new(
            Connection::open(&db_path).expect("Webhook dispatcher: failed to open DB"),
        ));
        conn.lock().unwrap().execute_batch("PRAGMA journal_mode=WAL;").ok();

        loop {
            tokio::time::sleep(std::time::Duration::from_secs(POLL_INTERVAL_SECS)).await;
            deliver_due(&conn, &client).await;
        }
    });
}

async fn deliver_due(conn: &Arc<Mutex<Connection>>, client: &reqwest::Client) {
    let now = chrono::Utc::now().to_rfc3339();

    let due: Vec<(String, String, String, String, i64)> = {
        let db = conn.lock().unwrap();
        let mut stmt = match db.prepare(
            "SELECT id, webhook_id, event, payload, attempts FROM webhook_deliveries
             WHERE status = 'pending' AND next_attempt_at <= ?1 LIMIT 50",
        ) {
            Ok(s) => s,
            Err(_) => return,
        };
        stmt.query_map(params![&now], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?))
        })
        .map(|rows| rows.filter_map(|r| r.ok()).collect())
        .unwrap_or_default()
    };

    for (delivery_id, webhook_id, event, payload, attempts) in due {
        let webhook: Option<(String, String)> = {
            let db = conn.lock().unwrap();
            db.query_row(
                "SELECT url, secret FROM webhooks WHERE id = ?1 AND status = 'active' AND deleted_at IS NULL",
                params![&webhook_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .ok()
        };

        let Some((url, secret)) = webhook else {
            mark_dead(conn, &delivery_id, "webhook no longer active");
            continue;
        };

        let signature = sign(&secret, &payload);
        let result = client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("X-Webhook-Event", &event)
            .header("X-Webhook-Delivery", &delivery_id)
            .header("X-Webhook-Signature", format!("sha256={signature}"))
            .body(payload)
            .send()
            .await;

        let success = matches!(&result, Ok(resp) if resp.status().is_success());
        if success {
            mark_delivered(conn, &delivery_id);
            continue;
        }

        let next_attempts = attempts + 1;
        if next_attempts >= MAX_ATTEMPTS {
            let reason = match result {
                Ok(resp) => format!("HTTP {}", resp.status()),
                Err(e) => e.to_string(),
            };
            mark_dead(conn, &delivery_id, &reason);
        } else {
            let delay = RETRY_SCHEDULE_SECS[(next_attempts - 1).max(0) as usize];
            let next_at = (chrono::Utc::now() + chrono::Duration::seconds(delay)).to_rfc3339();
            let db = conn.lock().unwrap();
            db.execute(
                "UPDATE webhook_deliveries SET attempts = ?1, next_attempt_at = ?2 WHERE id = ?3",
                params![next_attempts, &next_at, &delivery_id],
            )
            .ok();
        }
    }
}

fn sign(secret: &str, body: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn mark_delivered(conn: &Arc<Mutex<Connection>>, delivery_id: &str) {
    conn.lock()
        .unwrap()
        .execute(
            "UPDATE webhook_deliveries SET status = 'delivered' WHERE id = ?1",
            params![delivery_id],
        )
        .ok();
}

fn mark_dead(conn: &Arc<Mutex<Connection>>, delivery_id: &str, reason: &str) {
    eprintln!("⚠️ webhook delivery {delivery_id} exhausted retries: {reason}");
    conn.lock()
        .unwrap()
        .execute(
            "UPDATE webhook_deliveries SET status = 'dead' WHERE id = ?1",
            params![delivery_id],
        )
        .ok();
}
