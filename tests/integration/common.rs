use agent_workspace::db::Db;
use rocket::http::Status;
use rocket::local::blocking::Client;

/// Wrapper around Client that auto-deletes the temp DB on drop.
/// Prevents /tmp/agent-workspace_test_*.db file accumulation.
/// Uses Option<Client> so we can drop the DB connection before deleting the file.
pub struct TestClient {
    client: Option<Client>,
    db_path: String,
}

impl Drop for TestClient {
    fn drop(&mut self) {
        // Drop client first to release SQLite connection (WAL mode holds the file)
        drop(self.client.take());
        let _ = std::fs::remove_file(&self.db_path);
        let _ = std::fs::remove_file(format!("{}-wal", self.db_path));
        let _ = std::fs::remove_file(format!("{}-shm", self.db_path));
    }
}

impl std::ops::Deref for TestClient {
    type Target = Client;
    fn deref(&self) -> &Client {
        self.client.as_ref().unwrap()
    }
}

fn temp_db_path() -> String {
    format!(
        "/tmp/agent-workspace_test_{}.db",
        uuid::Uuid::new_v4().to_string().split('-').next().unwrap()
    )
}

pub fn test_client() -> TestClient {
    let db_path = temp_db_path();
    let rocket = agent_workspace::rocket_with_db(&db_path);
    let client = Client::tracked(rocket).expect("valid rocket instance");
    TestClient { client: Some(client), db_path }
}

/// Create a test client with custom rate limit configuration.
/// Useful for testing configurable rate limits without env var races.
pub fn test_client_with_rate_limits(config: agent_workspace::rate_limit::RateLimitConfig) -> TestClient {
    let db_path = temp_db_path();
    let rocket = agent_workspace::rocket_with_db_and_config(&db_path, config);
    let client = Client::tracked(rocket).expect("valid rocket instance");
    TestClient { client: Some(client), db_path }
}

pub struct BootstrappedWorkspace {
    pub workspace_id: String,
    pub read_key: String,
    pub append_key: String,
    pub write_key: String,
}

/// Hits `POST /bootstrap` and returns the workspace id plus its three
/// freshly-minted capability keys.
pub fn bootstrap_workspace(client: &Client) -> BootstrappedWorkspace {
    let res = client.post("/bootstrap").dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    let data = &body["data"];
    BootstrappedWorkspace {
        workspace_id: data["workspace_id"].as_str().unwrap().to_string(),
        read_key: data["read_key"].as_str().unwrap().to_string(),
        append_key: data["append_key"].as_str().unwrap().to_string(),
        write_key: data["write_key"].as_str().unwrap().to_string(),
    }
}

/// There's no OAuth provider wired into the test harness, so session-gated
/// routes are exercised by seeding a user + session row directly and an
/// ownership link to an existing workspace, then handing back the raw token
/// the real provider would have set as a cookie.
pub fn seed_session(client: &Client, workspace_id: &str) -> String {
    let db = client.rocket().state::<Db>().expect("Db not managed");
    let user_id = uuid::Uuid::new_v4().to_string();
    let token = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    let expires_at = (chrono::Utc::now() + chrono::Duration::hours(1)).to_rfc3339();

    let conn = db.conn.lock().unwrap();
    conn.execute(
        "INSERT INTO users (id, email, created_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![&user_id, format!("{user_id}@example.test"), &now],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO user_workspaces (user_id, workspace_id) VALUES (?1, ?2)",
        rusqlite::params![&user_id, workspace_id],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO sessions (token_hash, user_id, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![agent_workspace::db::hash_key(&token), &user_id, &now, &expires_at],
    )
    .unwrap();

    token
}

/// Bootstraps a workspace and seeds a session cookie that owns it, returning
/// both in one call for tests that only care about the session surface.
pub fn bootstrap_with_session(client: &Client) -> (BootstrappedWorkspace, rocket::http::Cookie<'static>) {
    let ws = bootstrap_workspace(client);
    let token = seed_session(client, &ws.workspace_id);
    (ws, rocket::http::Cookie::new("better-auth.session_token", token))
}
