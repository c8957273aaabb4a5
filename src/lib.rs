pub mod appends;
pub mod audit;
pub mod credential;
pub mod db;
pub mod errors;
pub mod events;
pub mod models;
pub mod rate_limit;
pub mod retention;
pub mod routes;
pub mod ssrf;
pub mod webhooks;

use db::Db;
use events::EventBus;
use rate_limit::{RateLimitConfig, RateLimiter};
use rocket_cors::CorsOptions;
use std::env;

pub fn rocket() -> rocket::Rocket<rocket::Build> {
    let db_path = env::var("DATABASE_PATH").unwrap_or_else(|_| "data/workspace.db".to_string());
    rocket_with_db(&db_path)
}

pub fn rocket_with_db_and_config(db_path: &str, rate_config: RateLimitConfig) -> rocket::Rocket<rocket::Build> {
    build_rocket(db_path, rate_config)
}

pub fn rocket_with_db(db_path: &str) -> rocket::Rocket<rocket::Build> {
    let rate_limit_config = RateLimitConfig::from_env();
    build_rocket(db_path, rate_limit_config)
}

fn build_rocket(db_path: &str, rate_limit_config: RateLimitConfig) -> rocket::Rocket<rocket::Build> {
    if let Some(parent) = std::path::Path::new(db_path).parent() {
        std::fs::create_dir_all(parent).ok();
    }

    let db = Db::new(db_path);
    let events = EventBus::new();
    let rate_limiter = RateLimiter::new();
    let audit_log = audit::spawn(db_path.to_string());
    let started_at = std::time::Instant::now();

    let cors = CorsOptions::default()
        .to_cors()
        .expect("Failed to create CORS");

    // Base64-encoded file content can run several times larger than the
    // workspace quota it's checked against, so the JSON body limit is raised
    // accordingly.
    let figment = rocket::Config::figment().merge(("limits.json", 10 * 1024 * 1024));

    let webhook_dispatch_db_path = db_path.to_string();
    let retention_db_path = db_path.to_string();

    rocket::custom(figment)
        .manage(db)
        .manage(events)
        .manage(rate_limit_config)
        .manage(rate_limiter)
        .manage(audit_log)
        .manage(started_at)
        .attach(cors)
        .register(
            "/",
            rocket::catchers![routes::too_many_requests, routes::not_found],
        )
        .mount(
            "/",
            rocket::routes![
                routes::health,
                routes::admin_metrics,
                routes::agents_liveness,
                routes::bootstrap,
                routes::me,
                routes::logout,
                routes::capability_get,
                routes::capability_put,
                routes::capability_delete,
                routes::capability_post,
                routes::create_webhook,
                routes::list_webhooks,
                routes::update_webhook,
                routes::delete_webhook,
                routes::get_webhook_deliveries,
                routes::workspace_orchestration,
                routes::claim_action,
                routes::rename_workspace,
                routes::rotate_all_keys,
                routes::delete_workspace,
                routes::list_api_keys,
                routes::create_api_key,
                routes::revoke_api_key,
            ],
        )
        .attach(rocket::fairing::AdHoc::on_liftoff(
            "Webhook Dispatcher",
            move |_rocket| {
                Box::pin(async move {
                    webhooks::spawn_dispatcher(webhook_dispatch_db_path);
                    println!("🔗 Webhook dispatcher started");
                })
            },
        ))
        .attach(rocket::fairing::AdHoc::on_liftoff(
            "Retention Sweep",
            move |_rocket| {
                Box::pin(async move {
                    retention::spawn_retention_task(retention_db_path);
                    println!("🧹 Retention sweep started");
                })
            },
        ))
}
