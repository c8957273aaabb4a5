use rocket::form::FromForm;
use rocket::serde::json::Json;
use rocket::{delete, get, post, put, State};
use rusqlite::params;

use crate::credential::{verify_workspace_owner, SessionAuth};
use crate::db::{generate_webhook_secret, Db};
use crate::errors::{ApiError, ApiResult};
use crate::models::*;
use crate::ssrf::validate_webhook_url;

#[post("/api/v1/workspaces/<workspace_id>/webhooks", format = "json", data = "<body>")]
pub fn create_webhook(
    db: &State<Db>,
    workspace_id: &str,
    session: SessionAuth,
    body: Json<CreateWebhook>,
) -> ApiResult<Json<serde_json::Value>> {
    verify_workspace_owner(db, workspace_id, &session.user_id)?;
    validate_webhook_url(&body.url, &test_allowlist())?;

    if body.events != "*" {
        for ev in body.events.split(',').map(|s| s.trim()) {
            if AppendType::from_str(ev).is_none() && ev != "file.put" && ev != "file.deleted" && ev != "append.created" {
                return Err(ApiError::bad_request("INVALID_REQUEST", format!("Unknown event type '{ev}'")));
            }
        }
    }

    let conn = db.conn.lock().unwrap();
    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    let secret = generate_webhook_secret();
    let scope_type_str = match body.scope_type {
        ScopeType::Workspace => "workspace",
        ScopeType::Folder => "folder",
        ScopeType::File => "file",
    };

    conn.execute(
        "INSERT INTO webhooks (id, workspace_id, scope_type, scope_path, recursive, url, secret, events, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'active', ?9)",
        params![&id, workspace_id, scope_type_str, &body.scope_path, body.recursive as i64, &body.url, &secret, &body.events, &now],
    )
    .map_err(|e| ApiError::server_error(e.to_string()))?;

    Ok(Json(crate::errors::ok_envelope(serde_json::json!({
        "id": id,
        "workspaceId": workspace_id,
        "scopeType": scope_type_str,
        "scopePath": body.scope_path,
        "recursive": body.recursive,
        "url": body.url,
        "events": body.events,
        "status": "active",
        "secret": secret,
        "createdAt": now,
    }))))
}

fn test_allowlist() -> Vec<String> {
    std::env::var("WEBHOOK_TEST_ALLOWLIST")
        .ok()
        .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
        .unwrap_or_default()
}

#[get("/api/v1/workspaces/<workspace_id>/webhooks")]
pub fn list_webhooks(db: &State<Db>, workspace_id: &str, session: SessionAuth) -> ApiResult<Json<serde_json::Value>> {
    verify_workspace_owner(db, workspace_id, &session.user_id)?;
    let conn = db.conn.lock().unwrap();

    let mut stmt = conn
        .prepare(
            "SELECT id, workspace_id, scope_type, scope_path, recursive, url, events, status, created_at
             FROM webhooks WHERE workspace_id = ?1 AND deleted_at IS NULL ORDER BY created_at DESC",
        )
        .map_err(|e| ApiError::server_error(e.to_string()))?;

    let webhooks: Vec<Webhook> = stmt
        .query_map(params![workspace_id], |row| {
            let scope_type_str: String = row.get(2)?;
            Ok(Webhook {
                id: row.get(0)?,
                workspace_id: row.get(1)?,
                scope_type: match scope_type_str.as_str() {
                    "folder" => ScopeType::Folder,
                    "file" => ScopeType::File,
                    _ => ScopeType::Workspace,
                },
                scope_path: row.get(3)?,
                recursive: row.get::<_, i64>(4)? != 0,
                url: row.get(5)?,
                events: row.get(6)?,
                status: match row.get::<_, String>(7)?.as_str() {
                    "paused" => WebhookStatus::Paused,
                    _ => WebhookStatus::Active,
                },
                created_at: row.get(8)?,
            })
        })
        .map_err(|e| ApiError::server_error(e.to_string()))?
        .filter_map(|r| r.ok())
        .collect();

    Ok(Json(crate::errors::ok_envelope(webhooks)))
}

#[put("/api/v1/workspaces/<workspace_id>/webhooks/<webhook_id>", format = "json", data = "<body>")]
pub fn update_webhook(
    db: &State<Db>,
    workspace_id: &str,
    webhook_id: &str,
    session: SessionAuth,
    body: Json<UpdateWebhook>,
) -> ApiResult<Json<serde_json::Value>> {
    verify_workspace_owner(db, workspace_id, &session.user_id)?;
    let conn = db.conn.lock().unwrap();

    let exists: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM webhooks WHERE id = ?1 AND workspace_id = ?2 AND deleted_at IS NULL",
            params![webhook_id, workspace_id],
            |r| r.get::<_, i64>(0),
        )
        .unwrap_or(0)
        > 0;
    if !exists {
        return Err(ApiError::not_found("NOT_FOUND", "Webhook not found"));
    }

    if let Some(ref url) = body.url {
        validate_webhook_url(url, &test_allowlist())?;
    }

    let mut updates: Vec<String> = Vec::new();
    let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
    let mut idx = 1;

    if let Some(ref url) = body.url {
        updates.push(format!("url = ?{idx}"));
        values.push(Box::new(url.clone()));
        idx += 1;
    }
    if let Some(ref events) = body.events {
        updates.push(format!("events = ?{idx}"));
        values.push(Box::new(events.clone()));
        idx += 1;
    }
    if let Some(status) = body.status {
        let status_str = match status {
            WebhookStatus::Active => "active",
            WebhookStatus::Paused => "paused",
        };
        updates.push(format!("status = ?{idx}"));
        values.push(Box::new(status_str.to_string()));
        idx += 1;
    }

    if updates.is_empty() {
        return Err(ApiError::bad_request("INVALID_REQUEST", "No fields to update"));
    }

    let sql = format!(
        "UPDATE webhooks SET {} WHERE id = ?{} AND workspace_id = ?{}",
        updates.join(", "),
        idx,
        idx + 1
    );
    values.push(Box::new(webhook_id.to_string()));
    values.push(Box::new(workspace_id.to_string()));

    let param_refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();
    conn.execute(&sql, param_refs.as_slice()).map_err(|e| ApiError::server_error(e.to_string()))?;

    Ok(Json(crate::errors::ok_envelope(serde_json::json!({"updated": true, "id": webhook_id}))))
}

#[delete("/api/v1/workspaces/<workspace_id>/webhooks/<webhook_id>")]
pub fn delete_webhook(db: &State<Db>, workspace_id: &str, webhook_id: &str, session: SessionAuth) -> ApiResult<Json<serde_json::Value>> {
    verify_workspace_owner(db, workspace_id, &session.user_id)?;
    let conn = db.conn.lock().unwrap();

    let now = chrono::Utc::now().to_rfc3339();
    let updated = conn
        .execute(
            "UPDATE webhooks SET deleted_at = ?1, status = 'paused' WHERE id = ?2 AND workspace_id = ?3 AND deleted_at IS NULL",
            params![&now, webhook_id, workspace_id],
        )
        .unwrap_or(0);

    if updated == 0 {
        return Err(ApiError::not_found("NOT_FOUND", "Webhook not found"));
    }

    Ok(Json(crate::errors::ok_envelope(serde_json::json!({"deleted": true, "id": webhook_id}))))
}

#[derive(Debug, FromForm)]
pub struct DeliveryQuery {
    pub limit: Option<i64>,
    pub status: Option<String>,
}

#[get("/api/v1/workspaces/<workspace_id>/webhooks/<webhook_id>/deliveries?<query..>")]
pub fn get_webhook_deliveries(
    db: &State<Db>,
    workspace_id: &str,
    webhook_id: &str,
    session: SessionAuth,
    query: DeliveryQuery,
) -> ApiResult<Json<serde_json::Value>> {
    verify_workspace_owner(db, workspace_id, &session.user_id)?;
    let conn = db.conn.lock().unwrap();

    let exists: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM webhooks WHERE id = ?1 AND workspace_id = ?2",
            params![webhook_id, workspace_id],
            |r| r.get::<_, i64>(0),
        )
        .unwrap_or(0)
        > 0;
    if !exists {
        return Err(ApiError::not_found("NOT_FOUND", "Webhook not found"));
    }

    let limit = query.limit.unwrap_or(50).clamp(1, 200);

    let mut sql = String::from(
        "SELECT id, webhook_id, event, attempts, status, next_attempt_at, created_at FROM webhook_deliveries WHERE webhook_id = ?1",
    );
    let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(webhook_id.to_string())];
    let mut idx = 2;

    if let Some(ref status) = query.status {
        sql.push_str(&format!(" AND status = ?{idx}"));
        values.push(Box::new(status.clone()));
        idx += 1;
    }
    sql.push_str(&format!(" ORDER BY created_at DESC LIMIT ?{idx}"));
    values.push(Box::new(limit));

    let param_refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();
    let mut stmt = conn.prepare(&sql).map_err(|e| ApiError::server_error(e.to_string()))?;

    let deliveries: Vec<WebhookDeliveryLog> = stmt
        .query_map(param_refs.as_slice(), |row| {
            Ok(WebhookDeliveryLog {
                id: row.get(0)?,
                webhook_id: row.get(1)?,
                event: row.get(2)?,
                attempts: row.get(3)?,
                status: row.get(4)?,
                next_attempt_at: row.get(5)?,
                created_at: row.get(6)?,
            })
        })
        .map_err(|e| ApiError::server_error(e.to_string()))?
        .filter_map(|r| r.ok())
        .collect();

    Ok(Json(crate::errors::ok_envelope(deliveries)))
}
