use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};

use crate::db::{hash_key, hashes_equal, Db};
use crate::errors::ApiError;
use crate::models::{Permission, ScopeType};

/// One of the three credential families described in SPEC_FULL.md §4.1a.
/// Handlers that need to distinguish branch on this; most only need the
/// resolved `workspace_id` + `permission`/`scopes` it carries.
#[allow(dead_code)]
pub enum Credential {
    Capability {
        permission: Permission,
        scope_type: ScopeType,
        scope_path: String,
        bound_author: Option<String>,
    },
    ApiKey {
        scopes: Vec<crate::models::ApiScope>,
    },
    Session {
        user_id: String,
    },
}

pub struct ResolvedCapability {
    pub workspace_id: String,
    pub key_id: String,
    pub permission: Permission,
    pub scope_type: ScopeType,
    pub scope_path: String,
    pub bound_author: Option<String>,
}

/// Resolves a capability-URL key the way `verify_room_admin` resolves an
/// admin key in the reference server: a plain function called from the
/// handler, not a `FromRequest` guard, because the required permission
/// depends on the route's own path prefix (`/r/`, `/a/`, `/w/`).
///
/// Every failure returns HTTP 404 (see SPEC_FULL.md §4.1's information-leakage
/// rule) — the `code` field still carries the specific reason.
pub fn resolve_capability(
    db: &Db,
    prefix_letter: &str,
    key: &str,
    resource_path: &str,
) -> Result<ResolvedCapability, ApiError> {
    let required = Permission::from_prefix(prefix_letter)
        .ok_or_else(|| ApiError::not_found("INVALID_KEY", "Unknown capability prefix"))?;

    if key.len() < 22 || key.len() > 32 || !key.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ApiError::not_found("INVALID_KEY", "Malformed capability key"));
    }

    let key_hash = hash_key(key);
    let conn = db.conn.lock().unwrap();

    let row = conn
        .query_row(
            "SELECT id, workspace_id, permission, scope_type, scope_path, bound_author,
                    expires_at, revoked_at, key_hash
             FROM capability_keys WHERE key_hash = ?1",
            rusqlite::params![&key_hash],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                    r.get::<_, Option<String>>(5)?,
                    r.get::<_, Option<String>>(6)?,
                    r.get::<_, Option<String>>(7)?,
                    r.get::<_, String>(8)?,
                ))
            },
        )
        .map_err(|_| ApiError::not_found("INVALID_KEY", "No such capability key"))?;

    let (id, workspace_id, perm_str, scope_type_str, scope_path, bound_author, expires_at, revoked_at, stored_hash) = row;

    if !hashes_equal(&stored_hash, &key_hash) {
        return Err(ApiError::not_found("INVALID_KEY", "No such capability key"));
    }

    if revoked_at.is_some() {
        return Err(ApiError::not_found("KEY_REVOKED", "Capability key was revoked"));
    }

    if let Some(ref exp) = expires_at {
        if exp.as_str() < chrono::Utc::now().to_rfc3339().as_str() {
            return Err(ApiError::not_found("KEY_EXPIRED", "Capability key has expired"));
        }
    }

    let granted = Permission::from_str(&perm_str)
        .ok_or_else(|| ApiError::server_error("Corrupt permission value"))?;
    if required > granted {
        return Err(ApiError::not_found(
            "PERMISSION_DENIED",
            "Key does not grant the required permission",
        ));
    }

    let scope_type = match scope_type_str.as_str() {
        "workspace" => ScopeType::Workspace,
        "folder" => ScopeType::Folder,
        "file" => ScopeType::File,
        _ => return Err(ApiError::server_error("Corrupt scope type value")),
    };

    if !path_within_scope(scope_type, &scope_path, resource_path) {
        return Err(ApiError::not_found(
            "PERMISSION_DENIED",
            "Resource is outside the key's scope",
        ));
    }

    conn.execute(
        "UPDATE capability_keys SET last_used_at = ?1 WHERE id = ?2",
        rusqlite::params![chrono::Utc::now().to_rfc3339(), &id],
    )
    .ok();

    Ok(ResolvedCapability {
        workspace_id,
        key_id: id,
        permission: granted,
        scope_type,
        scope_path,
        bound_author,
    })
}

fn path_within_scope(scope_type: ScopeType, scope_path: &str, resource_path: &str) -> bool {
    match scope_type {
        ScopeType::Workspace => true,
        ScopeType::File => resource_path == scope_path,
        ScopeType::Folder => {
            let prefix = if scope_path.ends_with('/') {
                scope_path.to_string()
            } else {
                format!("{scope_path}/")
            };
            resource_path.starts_with(&prefix) || resource_path == scope_path.trim_end_matches('/')
        }
    }
}

/// Percent-decodes a URL path segment exactly once and rejects traversal
/// (SPEC_FULL.md §4.1). `%ZZ`, a trailing `%`, or an embedded `%00` are all
/// rejected rather than silently passed through.
pub fn decode_and_validate_path(raw: &str) -> Result<String, ApiError> {
    let decoded = percent_decode(raw)
        .ok_or_else(|| ApiError::bad_request("INVALID_REQUEST", "Invalid URL encoding"))?;

    if decoded.contains('\0') {
        return Err(ApiError::bad_request("INVALID_PATH", "Path traversal"));
    }
    for segment in decoded.split('/') {
        if segment == ".." {
            return Err(ApiError::bad_request("INVALID_PATH", "Path traversal"));
        }
    }
    Ok(decoded)
}

fn percent_decode(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if i + 2 >= bytes.len() + 1 || i + 3 > bytes.len() {
                return None;
            }
            let hi = (bytes[i + 1] as char).to_digit(16)?;
            let lo = (bytes[i + 2] as char).to_digit(16)?;
            out.push(((hi << 4) | lo) as u8);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

/// Bearer `sk_(live|test)_...` API key, resolved as a `FromRequest` guard
/// since it doesn't depend on route path parameters (unlike capability keys).
pub struct ApiKeyAuth {
    pub workspace_id: String,
    pub key_id: String,
    pub scopes: Vec<crate::models::ApiScope>,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ApiKeyAuth {
    type Error = ApiError;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let Some(auth) = req.headers().get_one("Authorization") else {
            return Outcome::Error((
                Status::Unauthorized,
                ApiError::unauthorized("UNAUTHORIZED", "Missing Authorization header"),
            ));
        };
        let Some(token) = auth.strip_prefix("Bearer ") else {
            return Outcome::Error((
                Status::Unauthorized,
                ApiError::unauthorized("UNAUTHORIZED", "Authorization must be a Bearer token"),
            ));
        };
        if !(token.starts_with("sk_live_") || token.starts_with("sk_test_")) || token.len() < 20 {
            return Outcome::Error((
                Status::Unauthorized,
                ApiError::unauthorized("INVALID_KEY", "Malformed API key"),
            ));
        }

        let Some(db) = req.rocket().state::<Db>() else {
            return Outcome::Error((
                Status::InternalServerError,
                ApiError::server_error("Database not managed"),
            ));
        };

        let key_hash = hash_key(token);
        let conn = db.conn.lock().unwrap();
        let row = conn.query_row(
            "SELECT id, workspace_id, scopes, expires_at, revoked_at FROM api_keys WHERE key_hash = ?1",
            rusqlite::params![&key_hash],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, Option<String>>(3)?,
                    r.get::<_, Option<String>>(4)?,
                ))
            },
        );

        let Ok((id, workspace_id, scopes_json, expires_at, revoked_at)) = row else {
            return Outcome::Error((
                Status::Unauthorized,
                ApiError::unauthorized("INVALID_KEY", "No such API key"),
            ));
        };

        if revoked_at.is_some() {
            return Outcome::Error((
                Status::Unauthorized,
                ApiError::unauthorized("KEY_REVOKED", "API key was revoked"),
            ));
        }
        if let Some(exp) = expires_at {
            if exp.as_str() < chrono::Utc::now().to_rfc3339().as_str() {
                return Outcome::Error((
                    Status::Unauthorized,
                    ApiError::unauthorized("KEY_EXPIRED", "API key has expired"),
                ));
            }
        }

        conn.execute(
            "UPDATE api_keys SET last_used_at = ?1 WHERE id = ?2",
            rusqlite::params![chrono::Utc::now().to_rfc3339(), &id],
        )
        .ok();

        let scopes: Vec<crate::models::ApiScope> = serde_json::from_str::<Vec<String>>(&scopes_json)
            .unwrap_or_default()
            .iter()
            .filter_map(|s| crate::models::ApiScope::from_str(s))
            .collect();

        Outcome::Success(ApiKeyAuth {
            workspace_id,
            key_id: id,
            scopes,
        })
    }
}

/// OAuth session cookie, used only for workspace-claim and ownership-gated
/// endpoints. The core only ever needs `{user_id}` out of the session — the
/// OAuth provider itself is an external collaborator (SPEC_FULL.md §9).
pub struct SessionAuth {
    pub user_id: String,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for SessionAuth {
    type Error = ApiError;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let Some(cookie) = req.cookies().get("better-auth.session_token") else {
            return Outcome::Error((
                Status::Unauthorized,
                ApiError::unauthorized("UNAUTHORIZED", "Missing session cookie"),
            ));
        };
        let Some(db) = req.rocket().state::<Db>() else {
            return Outcome::Error((
                Status::InternalServerError,
                ApiError::server_error("Database not managed"),
            ));
        };

        let token_hash = hash_key(cookie.value());
        let conn = db.conn.lock().unwrap();
        let row = conn.query_row(
            "SELECT user_id, expires_at FROM sessions WHERE token_hash = ?1",
            rusqlite::params![&token_hash],
            |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)),
        );

        let Ok((user_id, expires_at)) = row else {
            return Outcome::Error((
                Status::Unauthorized,
                ApiError::unauthorized("UNAUTHORIZED", "Invalid session"),
            ));
        };
        if expires_at.as_str() < chrono::Utc::now().to_rfc3339().as_str() {
            return Outcome::Error((
                Status::Unauthorized,
                ApiError::unauthorized("UNAUTHORIZED", "Session expired"),
            ));
        }

        Outcome::Success(SessionAuth { user_id })
    }
}

/// Confirms the session's user owns the workspace. Never returns 403 — a
/// non-owner sees 404, matching capability-URL's enumeration-resistance
/// posture (SPEC_FULL.md §4.1).
pub fn verify_workspace_owner(db: &Db, workspace_id: &str, user_id: &str) -> Result<(), ApiError> {
    let conn = db.conn.lock().unwrap();
    let owns: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM user_workspaces WHERE workspace_id = ?1 AND user_id = ?2",
            rusqlite::params![workspace_id, user_id],
            |r| r.get::<_, i64>(0),
        )
        .unwrap_or(0)
        > 0;
    if !owns {
        return Err(ApiError::not_found("NOT_FOUND", "Workspace not found"));
    }
    Ok(())
}
