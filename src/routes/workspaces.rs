use rocket::serde::json::Json;
use rocket::{delete, get, patch, post, State};
use rusqlite::params;

use crate::appends::{create_append, resolve_claim, validate_author, NewAppend};
use crate::audit::AuditLog;
use crate::credential::{verify_workspace_owner, SessionAuth};
use crate::db::{generate_api_key, generate_capability_key, hash_key, Db};
use crate::errors::{ApiError, ApiResult};
use crate::models::*;

fn audit_entry(workspace_id: &str, actor: &str, action: &str, resource_id: Option<String>) -> AuditLogEntry {
    AuditLogEntry {
        workspace_id: workspace_id.to_string(),
        actor_type: "session".to_string(),
        actor: actor.to_string(),
        action: action.to_string(),
        resource_id,
        details: None,
        created_at: chrono::Utc::now().to_rfc3339(),
    }
}

#[get("/workspaces/<workspace_id>/orchestration?<status>&<priority>&<agent>&<file>&<folder>&<since>&<limit>&<cursor>")]
#[allow(clippy::too_many_arguments)]
pub fn workspace_orchestration(
    db: &State<Db>,
    workspace_id: &str,
    session: SessionAuth,
    status: Option<&str>,
    priority: Option<&str>,
    agent: Option<&str>,
    file: Option<&str>,
    folder: Option<&str>,
    since: Option<&str>,
    limit: Option<i64>,
    cursor: Option<&str>,
) -> ApiResult<Json<serde_json::Value>> {
    verify_workspace_owner(db, workspace_id, &session.user_id)?;
    let query = OrchestrationQuery {
        status: status.map(String::from),
        priority: priority.map(String::from),
        agent: agent.map(String::from),
        file: file.map(String::from),
        folder: folder.map(String::from),
        since: since.map(String::from),
        limit,
        cursor: cursor.map(String::from),
    };
    let conn = db.conn.lock().unwrap();
    let result = crate::appends::orchestration(&conn, workspace_id, &query)?;
    Ok(Json(crate::errors::ok_envelope(result)))
}

/// POST /workspaces/<ws>/claims/<cid>/<action>, action ∈ {renew, complete, cancel, block}.
/// `cid` is the claim append's global id (unique workspace-wide), not the
/// file-local `aN` form used on the capability-URL append surface — see
/// DESIGN.md for why the two addressing schemes differ.
#[post("/workspaces/<workspace_id>/claims/<cid>/<action>", format = "json", data = "<body>")]
pub fn claim_action(
    db: &State<Db>,
    workspace_id: &str,
    cid: &str,
    action: &str,
    session: SessionAuth,
    body: Json<ClaimAction>,
) -> ApiResult<Json<serde_json::Value>> {
    verify_workspace_owner(db, workspace_id, &session.user_id)?;

    let append_type = match action {
        "renew" => AppendType::Renew,
        "complete" => AppendType::Complete,
        "cancel" => AppendType::Cancel,
        "block" => AppendType::Blocked,
        _ => return Err(ApiError::bad_request("INVALID_REQUEST", "Unknown claim action")),
    };

    let author = body
        .author
        .clone()
        .ok_or_else(|| ApiError::bad_request("INVALID_REQUEST", "author is required"))?;
    validate_author(&author)?;

    let mut conn = db.conn.lock().unwrap();
    let (file_path, claim_ref) = resolve_claim(&conn, workspace_id, cid)?;

    let append = create_append(
        &mut conn,
        NewAppend {
            workspace_id,
            file_path: &file_path,
            author: &author,
            append_type,
            priority: None,
            reference: Some(&claim_ref),
            labels: &[],
            value: None,
            content: None,
            expires_in_seconds: body.expires_in_seconds,
        },
        None,
    )?;

    Ok(Json(crate::errors::ok_envelope(append)))
}

#[patch("/workspaces/<workspace_id>/name", format = "json", data = "<body>")]
pub fn rename_workspace(
    db: &State<Db>,
    audit: &State<AuditLog>,
    workspace_id: &str,
    session: SessionAuth,
    body: Json<RenameWorkspace>,
) -> ApiResult<Json<serde_json::Value>> {
    verify_workspace_owner(db, workspace_id, &session.user_id)?;

    let name = body.name.trim();
    if name.is_empty() || name.chars().count() > 200 {
        return Err(ApiError::bad_request("INVALID_REQUEST", "name must be 1-200 characters"));
    }

    let conn = db.conn.lock().unwrap();
    conn.execute(
        "UPDATE workspaces SET name = ?1, last_activity_at = ?2 WHERE id = ?3",
        params![name, chrono::Utc::now().to_rfc3339(), workspace_id],
    )
    .map_err(|e| ApiError::server_error(e.to_string()))?;

    audit.record(audit_entry(workspace_id, &session.user_id, "workspace.rename", None));
    Ok(Json(crate::errors::ok_envelope(serde_json::json!({"name": name}))))
}

/// Revokes every active capability key for the workspace and mints three
/// fresh ones (read/append/write, workspace-scoped), mirroring `bootstrap`'s
/// key-minting shape. Returns the new keys in plaintext once.
#[post("/workspaces/<workspace_id>/rotate-all")]
pub fn rotate_all_keys(
    db: &State<Db>,
    audit: &State<AuditLog>,
    workspace_id: &str,
    session: SessionAuth,
) -> ApiResult<Json<serde_json::Value>> {
    verify_workspace_owner(db, workspace_id, &session.user_id)?;
    let conn = db.conn.lock().unwrap();
    let now = chrono::Utc::now().to_rfc3339();

    conn.execute(
        "UPDATE capability_keys SET revoked_at = ?1 WHERE workspace_id = ?2 AND revoked_at IS NULL",
        params![&now, workspace_id],
    )
    .map_err(|e| ApiError::server_error(e.to_string()))?;

    let read_key = generate_capability_key();
    let append_key = generate_capability_key();
    let write_key = generate_capability_key();

    for (key, permission) in [(&read_key, "read"), (&append_key, "append"), (&write_key, "write")] {
        conn.execute(
            "INSERT INTO capability_keys (id, workspace_id, key_prefix, key_hash, permission, scope_type, scope_path, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'workspace', '/', ?6)",
            params![
                uuid::Uuid::new_v4().to_string(),
                workspace_id,
                &key[..4],
                hash_key(key),
                permission,
                &now,
            ],
        )
        .map_err(|e| ApiError::server_error(e.to_string()))?;
    }

    audit.record(audit_entry(workspace_id, &session.user_id, "workspace.rotate_all", None));

    Ok(Json(crate::errors::ok_envelope(serde_json::json!({
        "readKey": read_key,
        "appendKey": append_key,
        "writeKey": write_key,
    }))))
}

#[delete("/workspaces/<workspace_id>")]
pub fn delete_workspace(
    db: &State<Db>,
    audit: &State<AuditLog>,
    workspace_id: &str,
    session: SessionAuth,
) -> ApiResult<Json<serde_json::Value>> {
    verify_workspace_owner(db, workspace_id, &session.user_id)?;
    let conn = db.conn.lock().unwrap();
    conn.execute(
        "UPDATE workspaces SET deleted_at = ?1 WHERE id = ?2",
        params![chrono::Utc::now().to_rfc3339(), workspace_id],
    )
    .map_err(|e| ApiError::server_error(e.to_string()))?;

    audit.record(audit_entry(workspace_id, &session.user_id, "workspace.delete", None));
    Ok(Json(crate::errors::ok_envelope(serde_json::json!({"deleted": true}))))
}

// --- API keys ---

fn row_to_api_key(
    id: String,
    workspace_id: String,
    name: String,
    key_prefix: String,
    mode_str: String,
    scopes_json: String,
    created_at: String,
    expires_at: Option<String>,
    last_used_at: Option<String>,
    revoked_at: Option<String>,
) -> ApiKey {
    ApiKey {
        id,
        workspace_id,
        name,
        key_prefix,
        mode: if mode_str == "test" { ApiKeyMode::Test } else { ApiKeyMode::Live },
        scopes: serde_json::from_str::<Vec<String>>(&scopes_json)
            .unwrap_or_default()
            .iter()
            .filter_map(|s| ApiScope::from_str(s))
            .collect(),
        created_at,
        expires_at,
        last_used_at,
        revoked_at,
    }
}

#[get("/workspaces/<workspace_id>/api-keys")]
pub fn list_api_keys(db: &State<Db>, workspace_id: &str, session: SessionAuth) -> ApiResult<Json<serde_json::Value>> {
    verify_workspace_owner(db, workspace_id, &session.user_id)?;
    let conn = db.conn.lock().unwrap();

    let mut stmt = conn
        .prepare(
            "SELECT id, workspace_id, name, key_prefix, mode, scopes, created_at, expires_at, last_used_at, revoked_at
             FROM api_keys WHERE workspace_id = ?1 ORDER BY created_at DESC",
        )
        .map_err(|e| ApiError::server_error(e.to_string()))?;

    let keys: Vec<ApiKey> = stmt
        .query_map(params![workspace_id], |r| {
            Ok(row_to_api_key(
                r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?, r.get(6)?, r.get(7)?, r.get(8)?, r.get(9)?,
            ))
        })
        .map_err(|e| ApiError::server_error(e.to_string()))?
        .filter_map(|r| r.ok())
        .collect();

    Ok(Json(crate::errors::ok_envelope(keys)))
}

#[post("/workspaces/<workspace_id>/api-keys", format = "json", data = "<body>")]
pub fn create_api_key(
    db: &State<Db>,
    audit: &State<AuditLog>,
    workspace_id: &str,
    session: SessionAuth,
    body: Json<CreateApiKey>,
) -> ApiResult<Json<serde_json::Value>> {
    verify_workspace_owner(db, workspace_id, &session.user_id)?;

    let name = strip_html(body.name.trim());
    if name.is_empty() || name.chars().count() > 64 {
        return Err(ApiError::bad_request("INVALID_REQUEST", "name must be 1-64 characters"));
    }

    let mut scopes: Vec<ApiScope> = body.scopes.iter().filter_map(|s| ApiScope::from_str(s)).collect();
    if scopes.len() != body.scopes.len() {
        return Err(ApiError::bad_request("INVALID_REQUEST", "Unknown scope in request"));
    }
    scopes.sort_by_key(|s| *s as u8);
    scopes.dedup();

    let mode_str = match body.mode {
        ApiKeyMode::Live => "live",
        ApiKeyMode::Test => "test",
    };
    let plaintext = generate_api_key(mode_str);
    let key_prefix = format!("{}...", &plaintext[..12]);
    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    let scopes_json = serde_json::to_string(
        &scopes.iter().map(|s| match s {
            ApiScope::Read => "read",
            ApiScope::Append => "append",
            ApiScope::Write => "write",
            ApiScope::Export => "export",
        }).collect::<Vec<_>>(),
    )
    .unwrap();

    let conn = db.conn.lock().unwrap();
    conn.execute(
        "INSERT INTO api_keys (id, workspace_id, name, key_prefix, key_hash, mode, scopes, created_at, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![&id, workspace_id, &name, &key_prefix, hash_key(&plaintext), mode_str, &scopes_json, &now, &body.expires_at],
    )
    .map_err(|e| ApiError::server_error(e.to_string()))?;

    audit.record(audit_entry(workspace_id, &session.user_id, "apikey.create", Some(id.clone())));

    Ok(Json(crate::errors::ok_envelope(CreateApiKeyResponse {
        key: row_to_api_key(id, workspace_id.to_string(), name, key_prefix, mode_str.to_string(), scopes_json, now, body.expires_at.clone(), None, None),
        plaintext,
    })))
}

#[delete("/workspaces/<workspace_id>/api-keys/<key_id>")]
pub fn revoke_api_key(
    db: &State<Db>,
    audit: &State<AuditLog>,
    workspace_id: &str,
    key_id: &str,
    session: SessionAuth,
) -> ApiResult<Json<serde_json::Value>> {
    verify_workspace_owner(db, workspace_id, &session.user_id)?;
    let conn = db.conn.lock().unwrap();

    let updated = conn
        .execute(
            "UPDATE api_keys SET revoked_at = ?1 WHERE id = ?2 AND workspace_id = ?3 AND revoked_at IS NULL",
            params![chrono::Utc::now().to_rfc3339(), key_id, workspace_id],
        )
        .unwrap_or(0);
    if updated == 0 {
        return Err(ApiError::not_found("NOT_FOUND", "API key not found"));
    }

    audit.record(audit_entry(workspace_id, &session.user_id, "apikey.revoke", Some(key_id.to_string())));
    Ok(Json(crate::errors::ok_envelope(serde_json::json!({"revoked": true}))))
}

fn strip_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_tag = false;
    for c in s.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}
