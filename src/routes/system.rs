use rocket::serde::json::Json;
use rocket::{get, Request, State};

use crate::db::Db;
use crate::errors::{ApiError, ApiResult};
use crate::models::{AdminMetrics, LivenessEntry, LivenessResponse};

#[get("/api/v1/health")]
pub fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "agent-workspace",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Checks `Authorization: Bearer <ADMIN_SECRET>` against the configured
/// secret. 401 when the env var isn't set at all or the header is missing;
/// 403 when a value was supplied but doesn't match (SPEC_FULL.md §6).
fn require_admin(req: &Request<'_>) -> Result<(), ApiError> {
    let configured = std::env::var("ADMIN_SECRET").ok().filter(|s| !s.is_empty());
    let Some(configured) = configured else {
        return Err(ApiError::unauthorized("UNAUTHORIZED", "Admin access is not configured"));
    };
    let Some(provided) = req
        .headers()
        .get_one("Authorization")
        .and_then(|h| h.strip_prefix("Bearer "))
    else {
        return Err(ApiError::unauthorized("UNAUTHORIZED", "Missing Authorization header"));
    };
    if !crate::db::hashes_equal(&crate::db::hash_key(provided), &crate::db::hash_key(&configured)) {
        return Err(ApiError::forbidden("FORBIDDEN", "Invalid admin secret"));
    }
    Ok(())
}

#[get("/api/v1/admin/metrics")]
pub fn admin_metrics(req: &Request<'_>, db: &State<Db>, started_at: &State<std::time::Instant>) -> ApiResult<Json<serde_json::Value>> {
    require_admin(req)?;
    let conn = db.conn.lock().unwrap();
    let now = chrono::Utc::now().to_rfc3339();

    let metrics = AdminMetrics {
        workspaces: conn
            .query_row("SELECT COUNT(*) FROM workspaces WHERE deleted_at IS NULL", [], |r| r.get(0))
            .unwrap_or(0),
        files: conn
            .query_row("SELECT COUNT(*) FROM files WHERE deleted_at IS NULL", [], |r| r.get(0))
            .unwrap_or(0),
        appends: conn.query_row("SELECT COUNT(*) FROM appends", [], |r| r.get(0)).unwrap_or(0),
        active_claims: conn
            .query_row(
                "SELECT COUNT(*) FROM appends WHERE type = 'claim' AND status = 'active' AND (expires_at IS NULL OR expires_at > ?1)",
                rusqlite::params![&now],
                |r| r.get(0),
            )
            .unwrap_or(0),
        webhooks: conn
            .query_row("SELECT COUNT(*) FROM webhooks WHERE deleted_at IS NULL", [], |r| r.get(0))
            .unwrap_or(0),
        webhook_deliveries_pending: conn
            .query_row("SELECT COUNT(*) FROM webhook_deliveries WHERE status = 'pending'", [], |r| r.get(0))
            .unwrap_or(0),
        uptime_seconds: started_at.elapsed().as_secs() as i64,
    };

    Ok(Json(crate::errors::ok_envelope(metrics)))
}

/// Workspace-agnostic liveness, admin-gated the same way as `/admin/metrics`
/// since it has no capability key to scope it (the per-workspace variant
/// lives at `/{r|a|w}/{key}/agents/liveness` in `capability.rs`).
#[get("/api/v1/agents/liveness")]
pub fn agents_liveness(req: &Request<'_>, db: &State<Db>) -> ApiResult<Json<serde_json::Value>> {
    require_admin(req)?;
    let conn = db.conn.lock().unwrap();

    let mut stmt = conn
        .prepare("SELECT author, status, last_seen FROM heartbeats ORDER BY last_seen DESC")
        .map_err(|e| ApiError::server_error(e.to_string()))?;
    let agents: Vec<LivenessEntry> = stmt
        .query_map([], |r| {
            Ok(LivenessEntry {
                author: r.get(0)?,
                status: r.get(1)?,
                last_seen: r.get(2)?,
            })
        })
        .map_err(|e| ApiError::server_error(e.to_string()))?
        .filter_map(|r| r.ok())
        .collect();

    Ok(Json(crate::errors::ok_envelope(LivenessResponse { agents })))
}

#[rocket::catch(429)]
pub fn too_many_requests() -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": false, "error": {"code": "RATE_LIMITED", "message": "Too many requests"}}))
}

#[rocket::catch(404)]
pub fn not_found() -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": false, "error": {"code": "NOT_FOUND", "message": "Not found"}}))
}
