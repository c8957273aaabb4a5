use rocket::serde::json::Json;
use rocket::{post, State};
use rusqlite::params;

use crate::audit::AuditLog;
use crate::db::{generate_capability_key, hash_key, Db};
use crate::errors::ApiResult;
use crate::models::BootstrapResponse;
use crate::rate_limit::{RateLimitConfig, RateLimited, RateLimitedError, RateLimiter};
use crate::routes::ClientIp;

/// Creates a workspace and its three root capability keys (read/append/write,
/// workspace-scoped). Keys are returned once, in plaintext, and never again —
/// only their hashes are persisted (SPEC_FULL.md §4.1).
#[post("/bootstrap")]
pub fn bootstrap(
    db: &State<Db>,
    rate_limiter: &State<RateLimiter>,
    rate_config: &State<RateLimitConfig>,
    audit: &State<AuditLog>,
    ip: ClientIp,
) -> ApiResult<RateLimited<BootstrapResponse>> {
    let rl = rate_limiter.check_with_info(
        &format!("bootstrap:{}", ip.0),
        rate_config.bootstrap_max,
        rate_config.bootstrap_window_secs,
    );
    if !rl.allowed {
        return Err(RateLimitedError {
            info: rl,
            message: "Too many workspace bootstraps from this address".to_string(),
        }
        .into());
    }

    let conn = db.conn.lock().unwrap();
    let now = chrono::Utc::now().to_rfc3339();
    let workspace_id = format!("ws_{}", uuid::Uuid::new_v4().simple());

    conn.execute(
        "INSERT INTO workspaces (id, name, created_at, last_activity_at) VALUES (?1, ?2, ?3, ?3)",
        params![&workspace_id, "Untitled workspace", &now],
    )
    .map_err(|e| crate::errors::ApiError::server_error(e.to_string()))?;

    let read_key = generate_capability_key();
    let append_key = generate_capability_key();
    let write_key = generate_capability_key();

    for (key, permission) in [(&read_key, "read"), (&append_key, "append"), (&write_key, "write")] {
        conn.execute(
            "INSERT INTO capability_keys (id, workspace_id, key_prefix, key_hash, permission, scope_type, scope_path, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'workspace', '/', ?6)",
            params![
                uuid::Uuid::new_v4().to_string(),
                &workspace_id,
                &key[..4],
                hash_key(key),
                permission,
                &now,
            ],
        )
        .map_err(|e| crate::errors::ApiError::server_error(e.to_string()))?;
    }

    audit.record(crate::models::AuditLogEntry {
        workspace_id: workspace_id.clone(),
        actor_type: "system".to_string(),
        actor: ip.0,
        action: "workspace.bootstrap".to_string(),
        resource_id: Some(workspace_id.clone()),
        details: None,
        created_at: now,
    });

    Ok(RateLimited::new(
        Json(BootstrapResponse {
            workspace_id,
            read_key,
            append_key,
            write_key,
        }),
        rl,
    ))
}
