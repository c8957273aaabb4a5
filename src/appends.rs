use rusqlite::params;
use rusqlite::Connection;

use crate::errors::ApiError;
use crate::models::*;

/// Author whitelist per SPEC_FULL.md §4.2: `[A-Za-z0-9_-]{1,64}`, and the
/// literal "system" is reserved (but "admin" is fine).
pub fn validate_author(author: &str) -> Result<(), ApiError> {
    if author.is_empty() || author.len() > 64 {
        return Err(ApiError::bad_request(
            "INVALID_AUTHOR",
            "author must be 1-64 characters",
        ));
    }
    if !author.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(ApiError::bad_request(
            "INVALID_AUTHOR",
            "author may only contain letters, digits, '_' and '-'",
        ));
    }
    if author == "system" {
        return Err(ApiError::bad_request(
            "INVALID_AUTHOR",
            "'system' is a reserved author name",
        ));
    }
    Ok(())
}

fn format_append_id(seq: i64) -> String {
    format!("a{seq}")
}

fn parse_append_seq(append_id: &str) -> Option<i64> {
    append_id.strip_prefix('a')?.parse::<i64>().ok()
}

pub struct NewAppend<'a> {
    pub workspace_id: &'a str,
    pub file_path: &'a str,
    pub author: &'a str,
    pub append_type: AppendType,
    pub priority: Option<Priority>,
    pub reference: Option<&'a str>,
    pub labels: &'a [String],
    pub value: Option<i32>,
    pub content: Option<&'a str>,
    pub expires_in_seconds: Option<i64>,
}

/// Inserts a single append row, applying the claim first-writer-wins and
/// WIP-limit checks where relevant (SPEC_FULL.md §4.3a). Runs inside one
/// transaction; the whole thing is additionally serialized by `Db`'s single
/// connection mutex, so the transaction guards crash-atomicity, not
/// concurrent-access exclusion.
pub fn create_append(
    conn: &mut Connection,
    new: NewAppend<'_>,
    wip_limit: Option<i64>,
) -> Result<Append, ApiError> {
    validate_author(new.author)?;

    let tx = conn
        .transaction()
        .map_err(|e| ApiError::server_error(e.to_string()))?;

    let next_seq: i64 = tx
        .query_row(
            "SELECT COALESCE(MAX(append_seq), 0) + 1 FROM appends WHERE workspace_id = ?1 AND file_path = ?2",
            params![new.workspace_id, new.file_path],
            |r| r.get(0),
        )
        .map_err(|e| ApiError::server_error(e.to_string()))?;

    if let Some(reference) = new.reference {
        let ref_seq = parse_append_seq(reference)
            .ok_or_else(|| ApiError::bad_request("INVALID_REQUEST", "Malformed ref"))?;
        let ref_exists: bool = tx
            .query_row(
                "SELECT COUNT(*) FROM appends WHERE workspace_id = ?1 AND file_path = ?2 AND append_seq = ?3",
                params![new.workspace_id, new.file_path, ref_seq],
                |r| r.get::<_, i64>(0),
            )
            .unwrap_or(0)
            > 0;
        if !ref_exists {
            return Err(ApiError::bad_request(
                "INVALID_REQUEST",
                "ref does not point to an existing append in this file",
            ));
        }
    }

    let now = chrono::Utc::now();
    let now_str = now.to_rfc3339();

    let status = match new.append_type {
        AppendType::Claim => {
            let task_ref = new
                .reference
                .ok_or_else(|| ApiError::bad_request("INVALID_REQUEST", "claim requires ref"))?;

            let active_claim_exists: bool = tx
                .query_row(
                    "SELECT COUNT(*) FROM appends
                     WHERE workspace_id = ?1 AND file_path = ?2 AND type = 'claim'
                       AND ref_append_id = ?3 AND status = 'active'
                       AND (expires_at IS NULL OR expires_at > ?4)",
                    params![new.workspace_id, new.file_path, task_ref, &now_str],
                    |r| r.get::<_, i64>(0),
                )
                .unwrap_or(0)
                > 0;
            if active_claim_exists {
                return Err(ApiError::new(
                    rocket::http::Status::Conflict,
                    "CONFLICT",
                    "Task already has an active claim",
                ));
            }

            if let Some(limit) = wip_limit {
                let held: i64 = tx
                    .query_row(
                        "SELECT COUNT(*) FROM appends
                         WHERE workspace_id = ?1 AND author = ?2 AND type = 'claim'
                           AND status = 'active' AND (expires_at IS NULL OR expires_at > ?3)",
                        params![new.workspace_id, new.author, &now_str],
                        |r| r.get::<_, i64>(0),
                    )
                    .unwrap_or(0);
                if held >= limit {
                    return Err(ApiError::new(
                        rocket::http::Status::TooManyRequests,
                        "WIP_EXCEEDED",
                        "Author already holds the maximum number of active claims",
                    ));
                }
            }
            Some("active".to_string())
        }
        AppendType::Renew => {
            let claim_ref = new
                .reference
                .ok_or_else(|| ApiError::bad_request("INVALID_REQUEST", "renew requires ref"))?;
            let owner: Option<String> = tx
                .query_row(
                    "SELECT author FROM appends WHERE workspace_id = ?1 AND file_path = ?2 AND append_seq = ?3 AND status = 'active'",
                    params![new.workspace_id, new.file_path, parse_append_seq(claim_ref).unwrap_or(-1)],
                    |r| r.get(0),
                )
                .ok();
            match owner {
                Some(ref o) if o == new.author => {}
                Some(_) => {
                    return Err(ApiError::forbidden("FORBIDDEN", "Only the claim owner may renew it"))
                }
                None => {
                    return Err(ApiError::new(
                        rocket::http::Status::BadRequest,
                        "CLAIM_EXPIRED",
                        "Claim is no longer active",
                    ))
                }
            }
            None
        }
        _ => None,
    };

    let expires_at = if matches!(new.append_type, AppendType::Claim) {
        let ttl = new.expires_in_seconds.unwrap_or(300).max(1);
        Some((now + chrono::Duration::seconds(ttl)).to_rfc3339())
    } else {
        None
    };

    let labels_json = serde_json::to_string(new.labels).unwrap_or_else(|_| "[]".to_string());
    let id = uuid::Uuid::new_v4().to_string();

    tx.execute(
        "INSERT INTO appends (id, workspace_id, file_path, append_seq, author, type, status, priority, ref_append_id, labels, value, content, expires_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            &id,
            new.workspace_id,
            new.file_path,
            next_seq,
            new.author,
            new.append_type.as_str(),
            status,
            new.priority.map(|p| p.as_str().to_string()),
            new.reference,
            labels_json,
            new.value,
            new.content,
            expires_at,
            &now_str,
        ],
    )
    .map_err(|e| ApiError::server_error(e.to_string()))?;

    tx.commit().map_err(|e| ApiError::server_error(e.to_string()))?;
    crate::db::upsert_fts(conn, &id);

    Ok(Append {
        append_id: format_append_id(next_seq),
        file_path: new.file_path.to_string(),
        author: new.author.to_string(),
        append_type: new.append_type.as_str().to_string(),
        status,
        priority: new.priority.map(|p| p.as_str().to_string()),
        reference: new.reference.map(String::from),
        labels: new.labels.to_vec(),
        value: new.value,
        content: new.content.map(String::from),
        expires_at,
        created_at: now_str,
    })
}

/// Resolves a workspace-scoped claim action target: looks up the claim's
/// owning file and local append id by its global (cross-file-unique) id, the
/// way the capability-URL surface addresses appends by (file, local id) pair.
pub fn resolve_claim(conn: &Connection, workspace_id: &str, claim_global_id: &str) -> Result<(String, String), ApiError> {
    let row: Option<(String, i64)> = conn
        .query_row(
            "SELECT file_path, append_seq FROM appends WHERE id = ?1 AND workspace_id = ?2 AND type = 'claim'",
            params![claim_global_id, workspace_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .ok();
    let Some((file_path, seq)) = row else {
        return Err(ApiError::not_found("NOT_FOUND", "No such claim"));
    };
    Ok((file_path, format_append_id(seq)))
}

struct AppendRow {
    id: String,
    append_id: String,
    file_path: String,
    author: String,
    append_type: String,
    status: Option<String>,
    priority: Option<String>,
    reference: Option<String>,
    labels: Vec<String>,
    content: Option<String>,
    expires_at: Option<String>,
    created_at: String,
}

/// Derives task/claim state by folding a file's append log, grounded on the
/// reference server's dynamic-filter query builder (`activity_feed`) for the
/// SQL side, with the fold itself a small pure state machine per SPEC_FULL.md
/// §4.2/§4.2a. Always recomputed at query time — no materialized task table.
pub fn orchestration(
    conn: &Connection,
    workspace_id: &str,
    query: &OrchestrationQuery,
) -> Result<OrchestrationResponse, ApiError> {
    let limit = query.limit.unwrap_or(200);
    if !(1..=1000).contains(&limit) {
        return Err(ApiError::bad_request("INVALID_REQUEST", "limit must be between 1 and 1000"));
    }

    let mut sql = String::from(
        "SELECT id, append_seq, file_path, author, type, status, priority, ref_append_id, labels, content, expires_at, created_at
         FROM appends WHERE workspace_id = ?1",
    );
    let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(workspace_id.to_string())];
    let mut idx = 2;

    if let Some(ref folder) = query.folder {
        sql.push_str(&format!(" AND file_path LIKE ?{idx}"));
        values.push(Box::new(format!("{folder}%")));
        idx += 1;
    }
    if let Some(ref file) = query.file {
        sql.push_str(&format!(" AND file_path LIKE ?{idx}"));
        values.push(Box::new(format!("%{file}%")));
        idx += 1;
    }
    if let Some(ref since) = query.since {
        sql.push_str(&format!(" AND created_at >= ?{idx}"));
        values.push(Box::new(since.clone()));
        idx += 1;
    }
    let _ = idx;
    sql.push_str(" ORDER BY file_path, append_seq ASC");

    let param_refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| ApiError::server_error(e.to_string()))?;
    let rows: Vec<AppendRow> = stmt
        .query_map(param_refs.as_slice(), |row| {
            let labels_json: String = row.get(8)?;
            Ok(AppendRow {
                id: row.get(0)?,
                append_id: format_append_id(row.get(1)?),
                file_path: row.get(2)?,
                author: row.get(3)?,
                append_type: row.get(4)?,
                status: row.get(5)?,
                priority: row.get(6)?,
                reference: row.get(7)?,
                labels: serde_json::from_str(&labels_json).unwrap_or_default(),
                content: row.get(9)?,
                expires_at: row.get(10)?,
                created_at: row.get(11)?,
            })
        })
        .map_err(|e| ApiError::server_error(e.to_string()))?
        .filter_map(|r| r.ok())
        .collect();

    let now = chrono::Utc::now().to_rfc3339();

    // Fold: every task-type append becomes a task; later appends referencing
    // it mutate its derived status (SPEC_FULL.md §4.2 lifecycle).
    let mut tasks: Vec<OrchestrationTask> = Vec::new();
    let mut task_index: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    let mut claims: Vec<OrchestrationClaim> = Vec::new();
    let mut workload: std::collections::HashMap<String, AgentWorkload> = std::collections::HashMap::new();

    for row in &rows {
        if row.append_type == "task" {
            task_index.insert(row.append_id.clone(), tasks.len());
            tasks.push(OrchestrationTask {
                id: row.append_id.clone(),
                file_path: row.file_path.clone(),
                author: row.author.clone(),
                content: row.content.clone(),
                priority: row.priority.clone().unwrap_or_else(|| "medium".to_string()),
                status: TaskStatus::Pending.as_str().to_string(),
                labels: row.labels.clone(),
                created_at: row.created_at.clone(),
                claimed_by: None,
                claim_expires_at: None,
            });
        }
    }

    for row in &rows {
        let Some(ref reference) = row.reference else { continue };
        let Some(&task_idx) = task_index.get(reference) else { continue };

        match row.append_type.as_str() {
            "claim" => {
                let expired = row
                    .expires_at
                    .as_deref()
                    .map(|e| e < now.as_str())
                    .unwrap_or(false);
                let status = if expired { TaskStatus::Stalled } else { TaskStatus::Claimed };
                tasks[task_idx].status = status.as_str().to_string();
                tasks[task_idx].claimed_by = Some(row.author.clone());
                tasks[task_idx].claim_expires_at = row.expires_at.clone();
                claims.push(OrchestrationClaim {
                    id: row.append_id.clone(),
                    global_id: row.id.clone(),
                    task_id: reference.clone(),
                    author: row.author.clone(),
                    status: "active".to_string(),
                    expires_at: row.expires_at.clone(),
                    created_at: row.created_at.clone(),
                });
                let entry = workload.entry(row.author.clone()).or_insert_with(|| AgentWorkload {
                    author: row.author.clone(),
                    active_claims: 0,
                    completed_total: 0,
                });
                if !expired {
                    entry.active_claims += 1;
                }
            }
            "complete" | "response" => {
                tasks[task_idx].status = TaskStatus::Completed.as_str().to_string();
                let entry = workload.entry(row.author.clone()).or_insert_with(|| AgentWorkload {
                    author: row.author.clone(),
                    active_claims: 0,
                    completed_total: 0,
                });
                entry.completed_total += 1;
                entry.active_claims = entry.active_claims.saturating_sub(1);
            }
            "cancel" => {
                // cancel-of-claim returns the task to pending; cancel-of-task is terminal
                // (both observed in source material, SPEC_FULL.md §9 decision).
                let targets_task = tasks[task_idx].id == *reference
                    && !claims.iter().any(|c| c.id == *reference);
                if targets_task {
                    tasks[task_idx].status = TaskStatus::Cancelled.as_str().to_string();
                } else {
                    tasks[task_idx].status = TaskStatus::Pending.as_str().to_string();
                    tasks[task_idx].claimed_by = None;
                    tasks[task_idx].claim_expires_at = None;
                }
            }
            "blocked" => {
                tasks[task_idx].status = TaskStatus::Stalled.as_str().to_string();
            }
            _ => {}
        }
    }

    // Apply filters post-fold (status/priority/agent are derived values).
    let status_filter: Option<Vec<&str>> = query.status.as_deref().map(|s| s.split(',').collect());
    let priority_filter: Option<Vec<&str>> = query.priority.as_deref().map(|s| s.split(',').collect());

    if let Some(ref statuses) = status_filter {
        for s in statuses {
            if TaskStatus::from_str(s).is_none() {
                return Err(ApiError::bad_request("INVALID_REQUEST", format!("Unknown status '{s}'")));
            }
        }
    }
    if let Some(ref priorities) = priority_filter {
        for p in priorities {
            if Priority::from_str(p).is_none() {
                return Err(ApiError::bad_request("INVALID_REQUEST", format!("Unknown priority '{p}'")));
            }
        }
    }

    let mut filtered: Vec<OrchestrationTask> = tasks
        .into_iter()
        .filter(|t| status_filter.as_ref().is_none_or(|s| s.contains(&t.status.as_str())))
        .filter(|t| priority_filter.as_ref().is_none_or(|p| p.contains(&t.priority.as_str())))
        .filter(|t| query.agent.as_deref().is_none_or(|a| t.claimed_by.as_deref() == Some(a)))
        .collect();

    filtered.sort_by(|a, b| {
        let pw_a = Priority::from_str(&a.priority).map(|p| p.weight()).unwrap_or(0);
        let pw_b = Priority::from_str(&b.priority).map(|p| p.weight()).unwrap_or(0);
        pw_b.cmp(&pw_a).then(a.created_at.cmp(&b.created_at))
    });

    let summary = OrchestrationSummary {
        pending: filtered.iter().filter(|t| t.status == "pending").count() as i64,
        claimed: filtered.iter().filter(|t| t.status == "claimed").count() as i64,
        stalled: filtered.iter().filter(|t| t.status == "stalled").count() as i64,
        completed: filtered.iter().filter(|t| t.status == "completed").count() as i64,
        cancelled: filtered.iter().filter(|t| t.status == "cancelled").count() as i64,
    };

    filtered.truncate(limit as usize);

    let mut agents: Vec<AgentWorkload> = workload.into_values().collect();
    agents.sort_by(|a, b| a.author.cmp(&b.author));

    Ok(OrchestrationResponse {
        summary,
        tasks: filtered,
        claims,
        agents,
        next_cursor: None,
    })
}
