use rusqlite::{params, Connection};
use sha2::{Digest, Sha256};
use std::sync::Mutex;

pub struct Db {
    pub conn: Mutex<Connection>,
}

/// Opaque capability-URL key: 24 alphanumeric characters, no prefix (it rides
/// in the URL path itself so a prefix would just be dead weight).
pub fn generate_capability_key() -> String {
    let a = uuid::Uuid::new_v4().simple().to_string();
    let b = uuid::Uuid::new_v4().simple().to_string();
    format!("{}{}", &a[..16], &b[..8])
}

pub fn generate_api_key(mode: &str) -> String {
    let raw = format!(
        "{:032x}{:032x}",
        uuid::Uuid::new_v4().as_u128(),
        uuid::Uuid::new_v4().as_u128()
    );
    format!("sk_{mode}_{}", &raw[..32])
}

pub fn generate_webhook_secret() -> String {
    format!("whsec_{:032x}", uuid::Uuid::new_v4().as_u128())
}

pub fn hash_key(plaintext: &str) -> String {
    let digest = Sha256::digest(plaintext.as_bytes());
    hex::encode(digest)
}

/// Constant-time-ish comparison of two hash hex strings (both fixed length,
/// so a simple byte loop is enough without pulling in a `subtle` dependency).
pub fn hashes_equal(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        diff |= x ^ y;
    }
    diff == 0
}

impl Db {
    pub fn new(path: &str) -> Self {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).ok();
            }
        }
        let conn = Connection::open(path).expect("Failed to open database");
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .expect("Failed to set pragmas");
        let db = Db {
            conn: Mutex::new(conn),
        };
        db.migrate();
        db
    }

    fn migrate(&self) {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS workspaces (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_activity_at TEXT NOT NULL,
                claimed_at TEXT,
                claimed_by_email TEXT,
                deleted_at TEXT,
                storage_bytes INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS user_workspaces (
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                workspace_id TEXT NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
                PRIMARY KEY (user_id, workspace_id)
            );

            CREATE TABLE IF NOT EXISTS sessions (
                token_hash TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS capability_keys (
                id TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
                key_prefix TEXT NOT NULL,
                key_hash TEXT NOT NULL UNIQUE,
                permission TEXT NOT NULL,
                scope_type TEXT NOT NULL,
                scope_path TEXT NOT NULL,
                bound_author TEXT,
                wip_limit INTEGER,
                created_at TEXT NOT NULL,
                expires_at TEXT,
                revoked_at TEXT,
                last_used_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_capability_keys_workspace ON capability_keys(workspace_id);
            CREATE INDEX IF NOT EXISTS idx_capability_keys_hash ON capability_keys(key_hash);

            CREATE TABLE IF NOT EXISTS api_keys (
                id TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                key_prefix TEXT NOT NULL,
                key_hash TEXT NOT NULL UNIQUE,
                mode TEXT NOT NULL,
                scopes TEXT NOT NULL,
                created_at TEXT NOT NULL,
                expires_at TEXT,
                last_used_at TEXT,
                revoked_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_api_keys_workspace ON api_keys(workspace_id);

            CREATE TABLE IF NOT EXISTS files (
                id TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
                path TEXT NOT NULL,
                content BLOB NOT NULL,
                etag TEXT NOT NULL,
                size INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_files_workspace_path_live
                ON files(workspace_id, path) WHERE deleted_at IS NULL;
            CREATE INDEX IF NOT EXISTS idx_files_workspace ON files(workspace_id);

            CREATE TABLE IF NOT EXISTS folders (
                id TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
                path TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(workspace_id, path)
            );

            CREATE TABLE IF NOT EXISTS appends (
                id TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
                file_path TEXT NOT NULL,
                append_seq INTEGER NOT NULL,
                author TEXT NOT NULL,
                type TEXT NOT NULL,
                status TEXT,
                priority TEXT,
                ref_append_id TEXT,
                labels TEXT NOT NULL DEFAULT '[]',
                value INTEGER,
                content TEXT,
                expires_at TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_appends_file ON appends(workspace_id, file_path, append_seq);
            CREATE INDEX IF NOT EXISTS idx_appends_ref ON appends(workspace_id, file_path, ref_append_id);
            CREATE INDEX IF NOT EXISTS idx_appends_author ON appends(workspace_id, author);

            CREATE TABLE IF NOT EXISTS heartbeats (
                workspace_id TEXT NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
                author TEXT NOT NULL,
                status TEXT NOT NULL,
                current_task TEXT,
                metadata TEXT DEFAULT '{}',
                last_seen INTEGER NOT NULL,
                PRIMARY KEY (workspace_id, author)
            );

            CREATE TABLE IF NOT EXISTS webhooks (
                id TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
                scope_type TEXT NOT NULL,
                scope_path TEXT NOT NULL,
                recursive INTEGER NOT NULL DEFAULT 0,
                url TEXT NOT NULL,
                secret TEXT NOT NULL,
                events TEXT NOT NULL DEFAULT '*',
                status TEXT NOT NULL DEFAULT 'active',
                created_at TEXT NOT NULL,
                deleted_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_webhooks_workspace ON webhooks(workspace_id);

            CREATE TABLE IF NOT EXISTS webhook_deliveries (
                id TEXT PRIMARY KEY,
                webhook_id TEXT NOT NULL REFERENCES webhooks(id) ON DELETE CASCADE,
                event TEXT NOT NULL,
                payload TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                next_attempt_at TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_webhook_deliveries_due
                ON webhook_deliveries(status, next_attempt_at);
            CREATE INDEX IF NOT EXISTS idx_webhook_deliveries_webhook
                ON webhook_deliveries(webhook_id);

            CREATE TABLE IF NOT EXISTS audit_logs (
                id TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL,
                actor_type TEXT NOT NULL,
                actor TEXT NOT NULL,
                action TEXT NOT NULL,
                resource_id TEXT,
                details TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_audit_logs_workspace ON audit_logs(workspace_id, created_at);

            CREATE TABLE IF NOT EXISTS export_jobs (
                id TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL
            );
            ",
        )
        .expect("Failed to run migrations");

        // FTS5 index over append content, for workspace search.
        conn.execute_batch(
            "CREATE VIRTUAL TABLE IF NOT EXISTS appends_fts USING fts5(
                append_id UNINDEXED,
                author,
                content,
                tokenize='porter unicode61'
            );",
        )
        .expect("Failed to create FTS5 table");

        rebuild_fts_index(&conn);
    }
}

pub fn rebuild_fts_index(conn: &Connection) {
    conn.execute("DELETE FROM appends_fts", []).ok();
    conn.execute_batch(
        "INSERT INTO appends_fts (append_id, author, content)
         SELECT id, author, COALESCE(content, '') FROM appends;",
    )
    .ok();
}

pub fn upsert_fts(conn: &Connection, append_id: &str) {
    conn.execute("DELETE FROM appends_fts WHERE append_id = ?1", [append_id])
        .ok();
    conn.execute(
        "INSERT INTO appends_fts (append_id, author, content)
         SELECT id, author, COALESCE(content, '') FROM appends WHERE id = ?1",
        params![append_id],
    )
    .ok();
}
