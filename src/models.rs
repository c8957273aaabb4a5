use serde::{Deserialize, Serialize};

// --- Workspaces ---

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Workspace {
    pub id: String,
    pub name: String,
    pub created_at: String,
    pub last_activity_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_by_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RenameWorkspace {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct BootstrapResponse {
    pub workspace_id: String,
    pub read_key: String,
    pub append_key: String,
    pub write_key: String,
}

// --- Capability keys ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Append,
    Write,
}

impl Permission {
    pub fn as_str(self) -> &'static str {
        match self {
            Permission::Read => "read",
            Permission::Append => "append",
            Permission::Write => "write",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "read" => Some(Permission::Read),
            "append" => Some(Permission::Append),
            "write" => Some(Permission::Write),
            _ => None,
        }
    }

    /// URL prefix letter: r, a, w.
    pub fn from_prefix(c: &str) -> Option<Self> {
        match c {
            "r" => Some(Permission::Read),
            "a" => Some(Permission::Append),
            "w" => Some(Permission::Write),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeType {
    Workspace,
    Folder,
    File,
}

#[derive(Debug, Clone)]
pub struct CapabilityKeyRow {
    pub id: String,
    pub workspace_id: String,
    pub permission: Permission,
    pub scope_type: ScopeType,
    pub scope_path: String,
    pub bound_author: Option<String>,
    pub wip_limit: Option<i64>,
    pub expires_at: Option<String>,
    pub revoked_at: Option<String>,
}

// --- API keys ---

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyMode {
    Live,
    Test,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ApiScope {
    Read,
    Append,
    Write,
    Export,
}

impl ApiScope {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "read" => Some(ApiScope::Read),
            "append" => Some(ApiScope::Append),
            "write" => Some(ApiScope::Write),
            "export" => Some(ApiScope::Export),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ApiKey {
    pub id: String,
    pub workspace_id: String,
    pub name: String,
    pub key_prefix: String,
    pub mode: ApiKeyMode,
    pub scopes: Vec<ApiScope>,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateApiKey {
    pub name: String,
    #[serde(default = "default_api_key_mode")]
    pub mode: ApiKeyMode,
    pub scopes: Vec<String>,
    #[serde(default)]
    pub expires_at: Option<String>,
}

fn default_api_key_mode() -> ApiKeyMode {
    ApiKeyMode::Live
}

#[derive(Debug, Serialize)]
pub struct CreateApiKeyResponse {
    #[serde(flatten)]
    pub key: ApiKey,
    pub plaintext: String,
}

// --- Files ---

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FileRecord {
    pub id: String,
    pub workspace_id: String,
    pub path: String,
    pub etag: String,
    pub size: i64,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FileResponse {
    pub filename: String,
    pub path: String,
    pub content: String,
    pub etag: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Deserialize)]
pub struct PutFile {
    pub content: String,
}

// --- Folders ---

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FolderEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub entry_type: String, // "folder" | "file"
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_count: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct FolderListing {
    pub path: String,
    pub entries: Vec<FolderEntry>,
}

// --- Appends ---

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AppendType {
    Task,
    Claim,
    Response,
    Blocked,
    Answer,
    Renew,
    Cancel,
    Complete,
    Comment,
    Vote,
    Heartbeat,
}

impl AppendType {
    pub fn as_str(self) -> &'static str {
        match self {
            AppendType::Task => "task",
            AppendType::Claim => "claim",
            AppendType::Response => "response",
            AppendType::Blocked => "blocked",
            AppendType::Answer => "answer",
            AppendType::Renew => "renew",
            AppendType::Cancel => "cancel",
            AppendType::Complete => "complete",
            AppendType::Comment => "comment",
            AppendType::Vote => "vote",
            AppendType::Heartbeat => "heartbeat",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "task" => AppendType::Task,
            "claim" => AppendType::Claim,
            "response" => AppendType::Response,
            "blocked" => AppendType::Blocked,
            "answer" => AppendType::Answer,
            "renew" => AppendType::Renew,
            "cancel" => AppendType::Cancel,
            "complete" => AppendType::Complete,
            "comment" => AppendType::Comment,
            "vote" => AppendType::Vote,
            "heartbeat" => AppendType::Heartbeat,
            _ => return None,
        })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Priority::Low),
            "medium" => Some(Priority::Medium),
            "high" => Some(Priority::High),
            "critical" => Some(Priority::Critical),
            _ => None,
        }
    }

    /// Higher weight sorts first.
    pub fn weight(self) -> i32 {
        match self {
            Priority::Critical => 3,
            Priority::High => 2,
            Priority::Medium => 1,
            Priority::Low => 0,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Append {
    pub append_id: String,
    pub file_path: String,
    pub author: String,
    #[serde(rename = "type")]
    pub append_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub labels: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateAppend {
    #[serde(rename = "type")]
    pub append_type: String,
    pub author: String,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default, rename = "ref")]
    pub reference: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub value: Option<i32>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub expires_in_seconds: Option<i64>,
}

// --- Heartbeats ---

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HeartbeatStatus {
    Alive,
    Idle,
    Busy,
}

#[derive(Debug, Deserialize)]
pub struct SendHeartbeat {
    pub author: String,
    #[serde(default = "default_heartbeat_status")]
    pub status: HeartbeatStatus,
    #[serde(default)]
    pub current_task: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

fn default_heartbeat_status() -> HeartbeatStatus {
    HeartbeatStatus::Alive
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Heartbeat {
    pub author: String,
    pub status: HeartbeatStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,
    pub last_seen: i64,
}

// --- Orchestration ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Claimed,
    Stalled,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Claimed => "claimed",
            TaskStatus::Stalled => "stalled",
            TaskStatus::Completed => "completed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "claimed" => Some(TaskStatus::Claimed),
            "stalled" => Some(TaskStatus::Stalled),
            "completed" => Some(TaskStatus::Completed),
            "cancelled" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct OrchestrationTask {
    pub id: String,
    pub file_path: String,
    pub author: String,
    pub content: Option<String>,
    pub priority: String,
    pub status: String,
    pub labels: Vec<String>,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim_expires_at: Option<String>,
}

#[derive(Debug, Serialize, Clone)]
pub struct OrchestrationClaim {
    pub id: String,
    /// Global append id, unique across the whole workspace (not just the
    /// owning file). Workspace-scoped claim actions address claims by this
    /// value since `id` alone collides across files.
    pub global_id: String,
    pub task_id: String,
    pub author: String,
    pub status: String,
    pub expires_at: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Serialize, Clone)]
pub struct AgentWorkload {
    pub author: String,
    pub active_claims: i64,
    pub completed_total: i64,
}

#[derive(Debug, Serialize)]
pub struct OrchestrationSummary {
    pub pending: i64,
    pub claimed: i64,
    pub stalled: i64,
    pub completed: i64,
    pub cancelled: i64,
}

#[derive(Debug, Serialize)]
pub struct OrchestrationResponse {
    pub summary: OrchestrationSummary,
    pub tasks: Vec<OrchestrationTask>,
    pub claims: Vec<OrchestrationClaim>,
    pub agents: Vec<AgentWorkload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct OrchestrationQuery {
    pub status: Option<String>,
    pub priority: Option<String>,
    pub agent: Option<String>,
    pub file: Option<String>,
    pub folder: Option<String>,
    pub since: Option<String>,
    pub limit: Option<i64>,
    pub cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ClaimAction {
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub expires_in_seconds: Option<i64>,
}

// --- Search ---

#[derive(Debug, Serialize, Clone)]
pub struct SearchResult {
    pub append_id: String,
    pub file_path: String,
    pub author: String,
    #[serde(rename = "type")]
    pub append_type: String,
    pub content: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub count: usize,
    pub query: String,
}

// --- Webhooks ---

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WebhookStatus {
    Active,
    Paused,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Webhook {
    pub id: String,
    pub workspace_id: String,
    pub scope_type: ScopeType,
    pub scope_path: String,
    pub recursive: bool,
    pub url: String,
    pub events: String,
    pub status: WebhookStatus,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateWebhook {
    pub url: String,
    #[serde(default = "default_scope_type")]
    pub scope_type: ScopeType,
    #[serde(default = "default_root")]
    pub scope_path: String,
    #[serde(default)]
    pub recursive: bool,
    #[serde(default = "default_webhook_events")]
    pub events: String,
}

fn default_scope_type() -> ScopeType {
    ScopeType::Workspace
}

fn default_root() -> String {
    "/".to_string()
}

fn default_webhook_events() -> String {
    "*".to_string()
}

#[derive(Debug, Deserialize)]
pub struct UpdateWebhook {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub events: Option<String>,
    #[serde(default)]
    pub status: Option<WebhookStatus>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WebhookDeliveryLog {
    pub id: String,
    pub webhook_id: String,
    pub event: String,
    pub attempts: i64,
    pub status: String,
    pub next_attempt_at: Option<String>,
    pub created_at: String,
}

// --- Audit ---

#[derive(Debug, Serialize, Clone)]
pub struct AuditLogEntry {
    pub workspace_id: String,
    pub actor_type: String,
    pub actor: String,
    pub action: String,
    pub resource_id: Option<String>,
    pub details: Option<serde_json::Value>,
    pub created_at: String,
}

// --- Admin metrics ---

#[derive(Debug, Serialize)]
pub struct AdminMetrics {
    pub workspaces: i64,
    pub files: i64,
    pub appends: i64,
    pub active_claims: i64,
    pub webhooks: i64,
    pub webhook_deliveries_pending: i64,
    pub uptime_seconds: i64,
}

#[derive(Debug, Serialize)]
pub struct LivenessEntry {
    pub author: String,
    pub status: String,
    pub last_seen: i64,
}

#[derive(Debug, Serialize)]
pub struct LivenessResponse {
    pub agents: Vec<LivenessEntry>,
}
