use rocket::http::{ContentType, Status};

use crate::common::{bootstrap_with_session, test_client};

#[test]
fn test_create_webhook() {
    let client = test_client();
    let (ws, cookie) = bootstrap_with_session(&client);

    let res = client
        .post(format!("/api/v1/workspaces/{}/webhooks", ws.workspace_id))
        .cookie(cookie)
        .header(ContentType::JSON)
        .body(r#"{"url": "https://example.com/hook"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["data"]["url"], "https://example.com/hook");
    assert_eq!(body["data"]["status"], "active");
    assert!(!body["data"]["secret"].as_str().unwrap().is_empty());
}

#[test]
fn test_create_webhook_rejects_loopback_url() {
    let client = test_client();
    let (ws, cookie) = bootstrap_with_session(&client);

    let res = client
        .post(format!("/api/v1/workspaces/{}/webhooks", ws.workspace_id))
        .cookie(cookie)
        .header(ContentType::JSON)
        .body(r#"{"url": "http://127.0.0.1:9999/hook"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn test_create_webhook_loopback_allowed_via_test_allowlist() {
    std::env::set_var("WEBHOOK_TEST_ALLOWLIST", "127.0.0.1");
    let client = test_client();
    let (ws, cookie) = bootstrap_with_session(&client);

    let res = client
        .post(format!("/api/v1/workspaces/{}/webhooks", ws.workspace_id))
        .cookie(cookie)
        .header(ContentType::JSON)
        .body(r#"{"url": "http://127.0.0.1:9999/hook"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    std::env::remove_var("WEBHOOK_TEST_ALLOWLIST");
}

#[test]
fn test_create_webhook_invalid_event_name() {
    let client = test_client();
    let (ws, cookie) = bootstrap_with_session(&client);

    let res = client
        .post(format!("/api/v1/workspaces/{}/webhooks", ws.workspace_id))
        .cookie(cookie)
        .header(ContentType::JSON)
        .body(r#"{"url": "https://example.com/hook", "events": "task,bogus_event"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn test_create_webhook_requires_owner_session() {
    let client = test_client();
    let ws = crate::common::bootstrap_workspace(&client);

    let res = client
        .post(format!("/api/v1/workspaces/{}/webhooks", ws.workspace_id))
        .header(ContentType::JSON)
        .body(r#"{"url": "https://example.com/hook"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);
}

#[test]
fn test_list_webhooks() {
    let client = test_client();
    let (ws, cookie) = bootstrap_with_session(&client);

    client
        .post(format!("/api/v1/workspaces/{}/webhooks", ws.workspace_id))
        .cookie(cookie.clone())
        .header(ContentType::JSON)
        .body(r#"{"url": "https://example.com/hook1"}"#)
        .dispatch();
    client
        .post(format!("/api/v1/workspaces/{}/webhooks", ws.workspace_id))
        .cookie(cookie.clone())
        .header(ContentType::JSON)
        .body(r#"{"url": "https://example.com/hook2"}"#)
        .dispatch();

    let res = client
        .get(format!("/api/v1/workspaces/{}/webhooks", ws.workspace_id))
        .cookie(cookie)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
}

#[test]
fn test_update_webhook() {
    let client = test_client();
    let (ws, cookie) = bootstrap_with_session(&client);

    let res = client
        .post(format!("/api/v1/workspaces/{}/webhooks", ws.workspace_id))
        .cookie(cookie.clone())
        .header(ContentType::JSON)
        .body(r#"{"url": "https://example.com/hook"}"#)
        .dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    let webhook_id = body["data"]["id"].as_str().unwrap();

    let res = client
        .put(format!("/api/v1/workspaces/{}/webhooks/{webhook_id}", ws.workspace_id))
        .cookie(cookie)
        .header(ContentType::JSON)
        .body(r#"{"status": "paused"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["data"]["updated"], true);
}

#[test]
fn test_update_webhook_no_fields_is_bad_request() {
    let client = test_client();
    let (ws, cookie) = bootstrap_with_session(&client);

    let res = client
        .post(format!("/api/v1/workspaces/{}/webhooks", ws.workspace_id))
        .cookie(cookie.clone())
        .header(ContentType::JSON)
        .body(r#"{"url": "https://example.com/hook"}"#)
        .dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    let webhook_id = body["data"]["id"].as_str().unwrap();

    let res = client
        .put(format!("/api/v1/workspaces/{}/webhooks/{webhook_id}", ws.workspace_id))
        .cookie(cookie)
        .header(ContentType::JSON)
        .body(r#"{}"#)
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn test_delete_webhook() {
    let client = test_client();
    let (ws, cookie) = bootstrap_with_session(&client);

    let res = client
        .post(format!("/api/v1/workspaces/{}/webhooks", ws.workspace_id))
        .cookie(cookie.clone())
        .header(ContentType::JSON)
        .body(r#"{"url": "https://example.com/hook"}"#)
        .dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    let webhook_id = body["data"]["id"].as_str().unwrap();

    let res = client
        .delete(format!("/api/v1/workspaces/{}/webhooks/{webhook_id}", ws.workspace_id))
        .cookie(cookie.clone())
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    let res = client
        .get(format!("/api/v1/workspaces/{}/webhooks", ws.workspace_id))
        .cookie(cookie)
        .dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["data"].as_array().unwrap().len(), 0);
}

#[test]
fn test_delete_webhook_not_found() {
    let client = test_client();
    let (ws, cookie) = bootstrap_with_session(&client);

    let res = client
        .delete(format!("/api/v1/workspaces/{}/webhooks/nonexistent-id", ws.workspace_id))
        .cookie(cookie)
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);
}

#[test]
fn test_webhook_deliveries_empty_initially() {
    let client = test_client();
    let (ws, cookie) = bootstrap_with_session(&client);

    let res = client
        .post(format!("/api/v1/workspaces/{}/webhooks", ws.workspace_id))
        .cookie(cookie.clone())
        .header(ContentType::JSON)
        .body(r#"{"url": "https://example.com/hook"}"#)
        .dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    let webhook_id = body["data"]["id"].as_str().unwrap();

    let res = client
        .get(format!(
            "/api/v1/workspaces/{}/webhooks/{webhook_id}/deliveries",
            ws.workspace_id
        ))
        .cookie(cookie)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["data"].as_array().unwrap().len(), 0);
}
