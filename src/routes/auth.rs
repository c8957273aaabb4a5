use rocket::http::{Cookie, CookieJar};
use rocket::serde::json::Json;
use rocket::{get, post, State};
use rusqlite::params;

use crate::credential::SessionAuth;
use crate::db::{hash_key, Db};
use crate::errors::ApiResult;

#[derive(serde::Serialize)]
pub struct MeResponse {
    pub user_id: String,
    pub email: String,
}

/// Returns the authenticated user's identity. Workspace ownership isn't
/// included here — callers list their workspaces separately.
#[get("/auth/me")]
pub fn me(db: &State<Db>, session: SessionAuth) -> ApiResult<Json<serde_json::Value>> {
    let conn = db.conn.lock().unwrap();
    let email: String = conn
        .query_row(
            "SELECT email FROM users WHERE id = ?1",
            params![&session.user_id],
            |r| r.get(0),
        )
        .map_err(|e| crate::errors::ApiError::server_error(e.to_string()))?;

    Ok(Json(crate::errors::ok_envelope(MeResponse {
        user_id: session.user_id,
        email,
    })))
}

/// Invalidates the session cookie both client- and server-side. The cookie's
/// own short lifetime means this is a courtesy, not the only defense.
#[post("/auth/logout")]
pub fn logout(db: &State<Db>, cookies: &CookieJar<'_>) -> ApiResult<Json<serde_json::Value>> {
    if let Some(cookie) = cookies.get("better-auth.session_token") {
        let token_hash = hash_key(cookie.value());
        let conn = db.conn.lock().unwrap();
        conn.execute("DELETE FROM sessions WHERE token_hash = ?1", params![&token_hash])
            .ok();
    }
    cookies.remove(Cookie::from("better-auth.session_token"));
    Ok(Json(crate::errors::ok_envelope(serde_json::json!({"loggedOut": true}))))
}
