use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{delete, get, post, put, State};
use rusqlite::params;
use sha2::{Digest, Sha256};

use crate::appends::{create_append, orchestration as derive_orchestration, validate_author};
use crate::credential::{decode_and_validate_path, resolve_capability};
use crate::db::Db;
use crate::errors::{ApiError, ApiResult};
use crate::events::{EventBus, WorkspaceEvent};
use crate::models::*;
use crate::rate_limit::{RateLimitConfig, RateLimited, RateLimitedError, RateLimiter};
use crate::webhooks::enqueue_for_event;

const MAX_FILE_BYTES: usize = 1024 * 1024;

fn etag_of(content: &[u8]) -> String {
    let digest = Sha256::digest(content);
    hex::encode(&digest[..8])
}

fn normalize_etag(raw: &str) -> String {
    raw.trim().trim_matches('"').to_lowercase()
}

/// Dispatches the tail segment(s) of a capability URL to file/folder/append/
/// heartbeat/orchestration/search operations. Rocket's `<path..>` segment
/// must be the final URI component, so a single catch-all per verb is the
/// idiomatic way to expose this spec's nested operation suffixes.
#[get("/<perm>/<key>/<tail..>?<q>&<status>&<priority>&<agent>&<file>&<folder>&<since>&<limit>&<cursor>")]
#[allow(clippy::too_many_arguments)]
pub fn capability_get(
    db: &State<Db>,
    rate_limiter: &State<RateLimiter>,
    rate_config: &State<RateLimitConfig>,
    perm: &str,
    key: &str,
    tail: std::path::PathBuf,
    q: Option<&str>,
    status: Option<&str>,
    priority: Option<&str>,
    agent: Option<&str>,
    file: Option<&str>,
    folder: Option<&str>,
    since: Option<&str>,
    limit: Option<i64>,
    cursor: Option<&str>,
) -> Result<RateLimited<serde_json::Value>, ApiError> {
    let tail_str = tail.to_string_lossy().replace('\\', "/");
    decode_and_validate_path(&tail_str)?;
    let resource_path = if tail_str.is_empty() { "/".to_string() } else { format!("/{tail_str}") };

    let cap = resolve_capability(db, perm, key, &resource_path)?;

    let rl = rate_limiter.check_with_info(
        &format!("capability_read:{}", cap.key_id),
        rate_config.capability_read_max,
        rate_config.capability_read_window_secs,
    );
    if !rl.allowed {
        return Err(RateLimitedError {
            info: rl,
            message: "Too many reads for this capability key".to_string(),
        }
        .into());
    }

    let data = if tail_str == "orchestration" {
        let oq = OrchestrationQuery {
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
        serde_json::to_value(derive_orchestration(&conn, &cap.workspace_id, &oq)?).unwrap()
    } else if tail_str == "search" {
        let query = q.unwrap_or("").to_string();
        serde_json::to_value(search_workspace(db, &cap.workspace_id, &query)?).unwrap()
    } else if tail_str == "folders" || tail_str.starts_with("folders/") {
        let folder_path = tail_str.strip_prefix("folders").unwrap_or("").trim_start_matches('/');
        serde_json::to_value(list_folder(db, &cap.workspace_id, folder_path)?).unwrap()
    } else if tail_str == "agents/liveness" {
        serde_json::to_value(liveness(db, &cap.workspace_id)?).unwrap()
    } else {
        serde_json::to_value(get_file(db, &cap.workspace_id, &resource_path)?).unwrap()
    };

    Ok(RateLimited::new(Json(crate::errors::ok_envelope(data)), rl))
}

#[put("/<perm>/<key>/<tail..>", format = "json", data = "<body>")]
pub fn capability_put(
    db: &State<Db>,
    events: &State<EventBus>,
    perm: &str,
    key: &str,
    tail: std::path::PathBuf,
    if_match: Option<IfMatch>,
    body: Json<PutFile>,
) -> ApiResult<Json<serde_json::Value>> {
    let tail_str = tail.to_string_lossy().replace('\\', "/");
    decode_and_validate_path(&tail_str)?;
    let resource_path = format!("/{tail_str}");
    let cap = resolve_capability(db, perm, key, &resource_path)?;
    if cap.permission < Permission::Write {
        return Err(ApiError::not_found("PERMISSION_DENIED", "Key does not grant write access"));
    }

    let content = body.content.as_bytes();
    if content.len() > MAX_FILE_BYTES {
        return Err(ApiError::new(
            Status::PayloadTooLarge,
            "PAYLOAD_TOO_LARGE",
            "File content exceeds the 1 MiB limit",
        ));
    }

    let file = put_file(db, &cap.workspace_id, &resource_path, content, if_match.map(|m| m.0))?;
    events.publish(WorkspaceEvent::FilePut {
        workspace_id: cap.workspace_id.clone(),
        file_path: resource_path.clone(),
        payload: serde_json::to_value(&file).unwrap(),
    });
    enqueue_for_event(db, &cap.workspace_id, &resource_path, "file.put", &serde_json::to_value(&file).unwrap());

    Ok(Json(crate::errors::ok_envelope(file)))
}

#[delete("/<perm>/<key>/<tail..>?<permanent>")]
pub fn capability_delete(
    db: &State<Db>,
    events: &State<EventBus>,
    perm: &str,
    key: &str,
    tail: std::path::PathBuf,
    permanent: Option<bool>,
) -> ApiResult<Json<serde_json::Value>> {
    let tail_str = tail.to_string_lossy().replace('\\', "/");
    decode_and_validate_path(&tail_str)?;
    let resource_path = format!("/{tail_str}");
    let cap = resolve_capability(db, perm, key, &resource_path)?;
    if cap.permission < Permission::Write {
        return Err(ApiError::not_found("PERMISSION_DENIED", "Key does not grant write access"));
    }

    delete_file(db, &cap.workspace_id, &resource_path, permanent.unwrap_or(false))?;
    events.publish(WorkspaceEvent::FileDeleted {
        workspace_id: cap.workspace_id.clone(),
        file_path: resource_path.clone(),
        payload: serde_json::json!({"path": resource_path}),
    });
    enqueue_for_event(
        db,
        &cap.workspace_id,
        &resource_path,
        "file.deleted",
        &serde_json::json!({"path": resource_path}),
    );

    Ok(Json(crate::errors::ok_envelope(serde_json::json!({"deleted": true}))))
}

#[post("/<perm>/<key>/<tail..>", format = "json", data = "<body>")]
#[allow(clippy::too_many_arguments)]
pub fn capability_post(
    db: &State<Db>,
    events: &State<EventBus>,
    perm: &str,
    key: &str,
    tail: std::path::PathBuf,
    body: Json<serde_json::Value>,
) -> ApiResult<Json<serde_json::Value>> {
    let tail_str = tail.to_string_lossy().replace('\\', "/");

    if tail_str == "claim" || tail_str == "workspace" {
        // Workspace-management actions require a write key but are handled
        // by the session/API-key surface in routes/workspaces.rs; capability
        // URLs only expose the rename shortcut described in SPEC_FULL.md §6.
        return Err(ApiError::not_found("NOT_FOUND", "Use the session-authenticated workspace endpoints"));
    }

    if let Some(file_path) = tail_str.strip_suffix("/append") {
        decode_and_validate_path(file_path)?;
        let resource_path = format!("/{file_path}");
        let cap = resolve_capability(db, perm, key, &resource_path)?;
        if cap.permission < Permission::Append {
            return Err(ApiError::not_found("PERMISSION_DENIED", "Key does not grant append access"));
        }
        let req: CreateAppend = serde_json::from_value(body.into_inner())
            .map_err(|e| ApiError::bad_request("INVALID_REQUEST", e.to_string()))?;
        let append = do_append(db, &cap, &resource_path, req)?;
        events.publish(WorkspaceEvent::AppendCreated {
            workspace_id: cap.workspace_id.clone(),
            file_path: resource_path,
            append_id: append.append_id.clone(),
            event_name: "append.created",
            payload: serde_json::to_value(&append).unwrap(),
        });
        enqueue_for_event(
            db,
            &cap.workspace_id,
            file_path,
            "append.created",
            &serde_json::to_value(&append).unwrap(),
        );
        return Ok(Json(crate::errors::ok_envelope(append)));
    }

    if let Some(file_path) = tail_str.strip_suffix("/heartbeat") {
        decode_and_validate_path(file_path)?;
        let resource_path = format!("/{file_path}");
        let cap = resolve_capability(db, perm, key, &resource_path)?;
        if cap.permission < Permission::Append {
            return Err(ApiError::not_found("PERMISSION_DENIED", "Key does not grant append access"));
        }
        let req: SendHeartbeat = serde_json::from_value(body.into_inner())
            .map_err(|e| ApiError::bad_request("INVALID_REQUEST", e.to_string()))?;
        let hb = send_heartbeat(db, &cap.workspace_id, req)?;
        return Ok(Json(crate::errors::ok_envelope(hb)));
    }

    Err(ApiError::not_found("NOT_FOUND", "Unknown capability action"))
}

pub struct IfMatch(pub String);

#[rocket::async_trait]
impl<'r> rocket::request::FromRequest<'r> for IfMatch {
    type Error = ();
    async fn from_request(req: &'r rocket::Request<'_>) -> rocket::request::Outcome<Self, Self::Error> {
        match req.headers().get_one("If-Match") {
            Some(v) => rocket::request::Outcome::Success(IfMatch(v.to_string())),
            None => rocket::request::Outcome::Forward(Status::Ok),
        }
    }
}

fn get_file(db: &State<Db>, workspace_id: &str, path: &str) -> ApiResult<FileResponse> {
    let conn = db.conn.lock().unwrap();
    let row = conn
        .query_row(
            "SELECT content, etag, created_at, updated_at, deleted_at FROM files WHERE workspace_id = ?1 AND path = ?2",
            params![workspace_id, path],
            |r| {
                Ok((
                    r.get::<_, Vec<u8>>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, Option<String>>(4)?,
                ))
            },
        )
        .map_err(|_| ApiError::not_found("FILE_NOT_FOUND", "No such file"))?;

    let (content, etag, created_at, updated_at, deleted_at) = row;
    if deleted_at.is_some() {
        return Err(ApiError::gone("File has been deleted"));
    }

    Ok(FileResponse {
        filename: path.rsplit('/').next().unwrap_or(path).to_string(),
        path: path.to_string(),
        content: String::from_utf8_lossy(&content).to_string(),
        etag,
        created_at,
        updated_at,
    })
}

fn put_file(
    db: &State<Db>,
    workspace_id: &str,
    path: &str,
    content: &[u8],
    if_match: Option<String>,
) -> ApiResult<FileResponse> {
    let mut conn = db.conn.lock().unwrap();
    let tx = conn.transaction().map_err(|e| ApiError::server_error(e.to_string()))?;

    let existing: Option<(String, String, Option<String>, i64)> = tx
        .query_row(
            "SELECT id, etag, deleted_at, size FROM files WHERE workspace_id = ?1 AND path = ?2",
            params![workspace_id, path],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .ok();

    if let Some((_, _, Some(_), _)) = existing {
        return Err(ApiError::gone("File has been deleted"));
    }

    if let Some(ref provided) = if_match {
        let current = existing.as_ref().map(|(_, etag, ..)| normalize_etag(etag));
        let provided_norm = normalize_etag(provided);
        if current.as_deref() != Some(provided_norm.as_str()) {
            return Err(ApiError::new(Status::PreconditionFailed, "CONFLICT", "File was modified since last read")
                .with_details(serde_json::json!({
                    "currentEtag": current,
                    "providedEtag": provided_norm,
                })));
        }
    }

    let existing_size = existing.as_ref().map(|(_, _, _, size)| *size).unwrap_or(0);
    let workspace_storage: i64 = tx
        .query_row(
            "SELECT storage_bytes FROM workspaces WHERE id = ?1",
            params![workspace_id],
            |r| r.get(0),
        )
        .unwrap_or(0);
    let quota: i64 = std::env::var("MAX_WORKSPACE_STORAGE_BYTES")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(100 * 1024 * 1024);
    let projected = workspace_storage - existing_size + content.len() as i64;
    if projected > quota {
        return Err(ApiError::new(
            Status::PayloadTooLarge,
            "QUOTA_EXCEEDED",
            "Writing this file would exceed the workspace storage quota",
        ));
    }

    let etag = etag_of(content);
    let now = chrono::Utc::now().to_rfc3339();

    if let Some((id, ..)) = &existing {
        tx.execute(
            "UPDATE files SET content = ?1, etag = ?2, size = ?3, updated_at = ?4 WHERE id = ?5",
            params![content, &etag, content.len() as i64, &now, id],
        )
        .map_err(|e| ApiError::server_error(e.to_string()))?;
    } else {
        let id = uuid::Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO files (id, workspace_id, path, content, etag, size, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![&id, workspace_id, path, content, &etag, content.len() as i64, &now],
        )
        .map_err(|e| ApiError::server_error(e.to_string()))?;
    }

    tx.execute(
        "UPDATE workspaces SET storage_bytes = ?1, last_activity_at = ?2 WHERE id = ?3",
        params![projected, &now, workspace_id],
    )
    .ok();

    tx.commit().map_err(|e| ApiError::server_error(e.to_string()))?;

    Ok(FileResponse {
        filename: path.rsplit('/').next().unwrap_or(path).to_string(),
        path: path.to_string(),
        content: String::from_utf8_lossy(content).to_string(),
        etag,
        created_at: now.clone(),
        updated_at: now,
    })
}

fn delete_file(db: &State<Db>, workspace_id: &str, path: &str, permanent: bool) -> ApiResult<()> {
    let conn = db.conn.lock().unwrap();
    let row: Option<(String, Option<String>, i64)> = conn
        .query_row(
            "SELECT id, deleted_at, size FROM files WHERE workspace_id = ?1 AND path = ?2",
            params![workspace_id, path],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .ok();

    let Some((id, deleted_at, size)) = row else {
        return Err(ApiError::not_found("FILE_NOT_FOUND", "No such file"));
    };
    if deleted_at.is_some() {
        return Err(ApiError::gone("File was already deleted"));
    }

    let now = chrono::Utc::now().to_rfc3339();
    if permanent {
        conn.execute("DELETE FROM files WHERE id = ?1", params![id]).ok();
    } else {
        conn.execute(
            "UPDATE files SET deleted_at = ?1 WHERE id = ?2",
            params![&now, id],
        )
        .ok();
    }
    conn.execute(
        "UPDATE workspaces SET storage_bytes = MAX(0, storage_bytes - ?1) WHERE id = ?2",
        params![size, workspace_id],
    )
    .ok();

    Ok(())
}

fn list_folder(db: &State<Db>, workspace_id: &str, folder_path: &str) -> ApiResult<FolderListing> {
    let prefix = if folder_path.is_empty() { "/".to_string() } else { format!("/{folder_path}/") };
    let conn = db.conn.lock().unwrap();

    let mut stmt = conn
        .prepare("SELECT path, size, updated_at FROM files WHERE workspace_id = ?1 AND deleted_at IS NULL AND path LIKE ?2")
        .map_err(|e| ApiError::server_error(e.to_string()))?;
    let like_pattern = format!("{prefix}%");
    let rows: Vec<(String, i64, String)> = stmt
        .query_map(params![workspace_id, like_pattern], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
        .map_err(|e| ApiError::server_error(e.to_string()))?
        .filter_map(|r| r.ok())
        .collect();

    if rows.is_empty() && prefix != "/" {
        return Err(ApiError::not_found("FOLDER_NOT_FOUND", "Folder has no files"));
    }

    let mut folders = std::collections::BTreeMap::<String, i64>::new();
    let mut files = Vec::new();

    for (path, size, updated_at) in rows {
        let rest = path.strip_prefix(&prefix).unwrap_or(&path);
        if let Some((child_folder, _)) = rest.split_once('/') {
            *folders.entry(child_folder.to_string()).or_insert(0) += 1;
        } else {
            files.push(FolderEntry {
                name: rest.to_string(),
                entry_type: "file".to_string(),
                updated_at,
                size: Some(size),
                child_count: None,
            });
        }
    }

    let mut entries: Vec<FolderEntry> = folders
        .into_iter()
        .map(|(name, count)| FolderEntry {
            name,
            entry_type: "folder".to_string(),
            updated_at: chrono::Utc::now().to_rfc3339(),
            size: None,
            child_count: Some(count),
        })
        .collect();
    entries.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
    files.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
    entries.extend(files);

    Ok(FolderListing {
        path: if folder_path.is_empty() { "/".to_string() } else { format!("/{folder_path}") },
        entries,
    })
}

fn do_append(
    db: &State<Db>,
    cap: &crate::credential::ResolvedCapability,
    file_path: &str,
    req: CreateAppend,
) -> ApiResult<Append> {
    if let Some(ref bound) = cap.bound_author {
        if bound != &req.author {
            return Err(ApiError::bad_request(
                "AUTHOR_MISMATCH",
                format!("This key is bound to author '{bound}', got '{}'", req.author),
            )
            .with_details(serde_json::json!({"expected": bound, "received": req.author})));
        }
    }

    let append_type = AppendType::from_str(&req.append_type)
        .ok_or_else(|| ApiError::bad_request("INVALID_REQUEST", "Unknown append type"))?;
    let priority = req.priority.as_deref().map(Priority::from_str).transpose()
        .ok_or_else(|| ApiError::bad_request("INVALID_REQUEST", "Unknown priority"))?;

    validate_author(&req.author)?;

    let mut conn = db.conn.lock().unwrap();
    create_append(
        &mut conn,
        crate::appends::NewAppend {
            workspace_id: &cap.workspace_id,
            file_path,
            author: &req.author,
            append_type,
            priority,
            reference: req.reference.as_deref(),
            labels: &req.labels,
            value: req.value,
            content: req.content.as_deref(),
            expires_in_seconds: req.expires_in_seconds,
        },
        cap_wip_limit(db, &cap.key_id),
    )
}

fn cap_wip_limit(db: &State<Db>, key_id: &str) -> Option<i64> {
    let conn = db.conn.lock().unwrap();
    conn.query_row(
        "SELECT wip_limit FROM capability_keys WHERE id = ?1",
        params![key_id],
        |r| r.get(0),
    )
    .ok()
    .flatten()
}

fn send_heartbeat(db: &State<Db>, workspace_id: &str, req: SendHeartbeat) -> ApiResult<Heartbeat> {
    validate_author(&req.author)?;
    let conn = db.conn.lock().unwrap();
    let now = chrono::Utc::now().timestamp();
    let status_str = match req.status {
        HeartbeatStatus::Alive => "alive",
        HeartbeatStatus::Idle => "idle",
        HeartbeatStatus::Busy => "busy",
    };
    let metadata = req.metadata.map(|m| m.to_string()).unwrap_or_else(|| "{}".to_string());

    conn.execute(
        "INSERT INTO heartbeats (workspace_id, author, status, current_task, metadata, last_seen)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(workspace_id, author) DO UPDATE SET
            status = excluded.status, current_task = excluded.current_task,
            metadata = excluded.metadata, last_seen = excluded.last_seen",
        params![workspace_id, &req.author, status_str, req.current_task, metadata, now],
    )
    .map_err(|e| ApiError::server_error(e.to_string()))?;

    Ok(Heartbeat {
        author: req.author,
        status: req.status,
        current_task: req.current_task,
        last_seen: now,
    })
}

fn search_workspace(db: &State<Db>, workspace_id: &str, query: &str) -> ApiResult<SearchResponse> {
    let conn = db.conn.lock().unwrap();
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Ok(SearchResponse { results: vec![], count: 0, query: query.to_string() });
    }

    let fts_query: String = trimmed
        .split_whitespace()
        .map(|w| format!("\"{}\"", w.replace(['"', '*'], "")))
        .collect::<Vec<_>>()
        .join(" ");

    let sql = "SELECT a.append_seq, a.file_path, a.author, a.type, a.content, a.created_at
               FROM appends_fts f JOIN appends a ON a.id = f.append_id
               WHERE a.workspace_id = ?1 AND appends_fts MATCH ?2
               ORDER BY a.created_at DESC LIMIT 100";

    let mut stmt = conn.prepare(sql).map_err(|e| ApiError::server_error(e.to_string()))?;
    let rows = stmt.query_map(params![workspace_id, &fts_query], |r| {
        Ok(SearchResult {
            append_id: format!("a{}", r.get::<_, i64>(0)?),
            file_path: r.get(1)?,
            author: r.get(2)?,
            append_type: r.get(3)?,
            content: r.get(4)?,
            created_at: r.get(5)?,
        })
    });

    let results: Vec<SearchResult> = match rows {
        Ok(mapped) => mapped.filter_map(|r| r.ok()).collect(),
        Err(_) => {
            // FTS5 syntax error: fall back to a LIKE scan, escaping wildcards.
            let escaped = trimmed.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
            let like = format!("%{escaped}%");
            let mut stmt = conn
                .prepare(
                    "SELECT append_seq, file_path, author, type, content, created_at FROM appends
                     WHERE workspace_id = ?1 AND content LIKE ?2 ESCAPE '\\' ORDER BY created_at DESC LIMIT 100",
                )
                .map_err(|e| ApiError::server_error(e.to_string()))?;
            stmt.query_map(params![workspace_id, &like], |r| {
                Ok(SearchResult {
                    append_id: format!("a{}", r.get::<_, i64>(0)?),
                    file_path: r.get(1)?,
                    author: r.get(2)?,
                    append_type: r.get(3)?,
                    content: r.get(4)?,
                    created_at: r.get(5)?,
                })
            })
            .map_err(|e| ApiError::server_error(e.to_string()))?
            .filter_map(|r| r.ok())
            .collect()
        }
    };

    let count = results.len();
    Ok(SearchResponse { results, count, query: query.to_string() })
}

fn liveness(db: &State<Db>, workspace_id: &str) -> ApiResult<LivenessResponse> {
    let conn = db.conn.lock().unwrap();
    let mut stmt = conn
        .prepare("SELECT author, status, last_seen FROM heartbeats WHERE workspace_id = ?1 ORDER BY last_seen DESC")
        .map_err(|e| ApiError::server_error(e.to_string()))?;
    let agents = stmt
        .query_map(params![workspace_id], |r| {
            Ok(LivenessEntry {
                author: r.get(0)?,
                status: r.get(1)?,
                last_seen: r.get(2)?,
            })
        })
        .map_err(|e| ApiError::server_error(e.to_string()))?
        .filter_map(|r| r.ok())
        .collect();
    Ok(LivenessResponse { agents })
}

impl From<RateLimitedError> for ApiError {
    fn from(e: RateLimitedError) -> Self {
        ApiError::new(Status::TooManyRequests, "RATE_LIMITED", e.message)
            .with_details(serde_json::json!({"retryAfterSeconds": e.info.retry_after_secs}))
    }
}
