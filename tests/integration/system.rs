use rocket::http::{Header, Status};

use crate::common::test_client;

#[test]
fn test_health() {
    let client = test_client();
    let res = client.get("/api/v1/health").dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

#[test]
fn test_admin_metrics_requires_secret_configured() {
    std::env::remove_var("ADMIN_SECRET");
    let client = test_client();
    let res = client.get("/api/v1/admin/metrics").dispatch();
    assert_eq!(res.status(), Status::Unauthorized);
}

#[test]
fn test_admin_metrics_rejects_missing_header() {
    std::env::set_var("ADMIN_SECRET", "topsecret");
    let client = test_client();
    let res = client.get("/api/v1/admin/metrics").dispatch();
    assert_eq!(res.status(), Status::Unauthorized);
    std::env::remove_var("ADMIN_SECRET");
}

#[test]
fn test_admin_metrics_rejects_wrong_secret() {
    std::env::set_var("ADMIN_SECRET", "topsecret");
    let client = test_client();
    let res = client
        .get("/api/v1/admin/metrics")
        .header(Header::new("Authorization", "Bearer wrong"))
        .dispatch();
    assert_eq!(res.status(), Status::Forbidden);
    std::env::remove_var("ADMIN_SECRET");
}

#[test]
fn test_admin_metrics_accepts_correct_secret() {
    std::env::set_var("ADMIN_SECRET", "topsecret");
    let client = test_client();
    let res = client
        .get("/api/v1/admin/metrics")
        .header(Header::new("Authorization", "Bearer topsecret"))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert!(body["data"]["workspaces"].is_number());
    assert!(body["data"]["uptime_seconds"].is_number());
    std::env::remove_var("ADMIN_SECRET");
}

#[test]
fn test_agents_liveness_is_admin_gated() {
    std::env::set_var("ADMIN_SECRET", "topsecret");
    let client = test_client();

    let res = client.get("/api/v1/agents/liveness").dispatch();
    assert_eq!(res.status(), Status::Unauthorized);

    let res = client
        .get("/api/v1/agents/liveness")
        .header(Header::new("Authorization", "Bearer topsecret"))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert!(body["data"]["agents"].as_array().unwrap().is_empty());
    std::env::remove_var("ADMIN_SECRET");
}

#[test]
fn test_not_found_catcher_returns_envelope() {
    let client = test_client();
    let res = client.get("/this/route/does/not/exist").dispatch();
    assert_eq!(res.status(), Status::NotFound);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["ok"], false);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}
