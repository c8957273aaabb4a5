// Route module decomposition — each domain area in its own file.
// Shared types (request guards) live here; route functions in submodules.

mod auth;
mod bootstrap;
mod capability;
mod system;
mod webhook_routes;
mod workspaces;

// --- Re-exports (all route functions used by lib.rs mount) ---
// API-key CRUD lives in `workspaces` alongside the other `/workspaces/{ws}/...`
// session-authenticated endpoints it's nested under.

pub use auth::{logout, me};
pub use bootstrap::bootstrap;
pub use capability::{capability_delete, capability_get, capability_post, capability_put};
pub use system::{admin_metrics, agents_liveness, health, not_found, too_many_requests};
pub use webhook_routes::{create_webhook, delete_webhook, get_webhook_deliveries, list_webhooks, update_webhook};
pub use workspaces::{
    claim_action, create_api_key, delete_workspace, list_api_keys, rename_workspace,
    revoke_api_key, rotate_all_keys, workspace_orchestration,
};

// --- Shared request guards ---

use rocket::request::{FromRequest, Outcome, Request};

pub struct ClientIp(pub String);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ClientIp {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let ip = req
            .headers()
            .get_one("X-Forwarded-For")
            .and_then(|s| s.split(',').next())
            .map(|s| s.trim().to_string())
            .or_else(|| req.remote().map(|r| r.ip().to_string()))
            .unwrap_or_else(|| "unknown".to_string());
        Outcome::Success(ClientIp(ip))
    }
}
