use rocket::http::{ContentType, Status};

use crate::common::{bootstrap_with_session, bootstrap_workspace, test_client};

fn create_task(client: &rocket::local::blocking::Client, append_key: &str, path: &str, author: &str) -> String {
    let res = client
        .post(format!("/a/{append_key}/{path}/append"))
        .header(ContentType::JSON)
        .body(format!(r#"{{"type": "task", "author": "{author}", "content": "do the thing"}}"#))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    body["data"]["append_id"].as_str().unwrap().to_string()
}

#[test]
fn test_task_append_shows_as_pending() {
    let client = test_client();
    let (ws, cookie) = bootstrap_with_session(&client);
    create_task(&client, &ws.append_key, "plan.md", "nanook");

    let res = client
        .get(format!("/workspaces/{}/orchestration", ws.workspace_id))
        .cookie(cookie)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    let tasks = body["data"]["tasks"].as_array().unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0]["status"], "pending");
    assert_eq!(body["data"]["summary"]["pending"], 1);
}

#[test]
fn test_claim_moves_task_to_claimed() {
    let client = test_client();
    let (ws, cookie) = bootstrap_with_session(&client);
    let task_id = create_task(&client, &ws.append_key, "plan.md", "nanook");

    let res = client
        .post(format!("/a/{}/plan.md/append", ws.append_key))
        .header(ContentType::JSON)
        .body(format!(
            r#"{{"type": "claim", "author": "forge", "ref": "{task_id}"}}"#
        ))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    let res = client
        .get(format!("/workspaces/{}/orchestration", ws.workspace_id))
        .cookie(cookie)
        .dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    let tasks = body["data"]["tasks"].as_array().unwrap();
    assert_eq!(tasks[0]["status"], "claimed");
    assert_eq!(tasks[0]["claimed_by"], "forge");
}

#[test]
fn test_second_claim_on_same_task_conflicts() {
    let client = test_client();
    let ws = bootstrap_workspace(&client);
    let task_id = create_task(&client, &ws.append_key, "plan.md", "nanook");

    let res = client
        .post(format!("/a/{}/plan.md/append", ws.append_key))
        .header(ContentType::JSON)
        .body(format!(r#"{{"type": "claim", "author": "forge", "ref": "{task_id}"}}"#))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    let res = client
        .post(format!("/a/{}/plan.md/append", ws.append_key))
        .header(ContentType::JSON)
        .body(format!(r#"{{"type": "claim", "author": "drift", "ref": "{task_id}"}}"#))
        .dispatch();
    assert_eq!(res.status(), Status::Conflict);
}

#[test]
fn test_complete_claim_via_session_endpoint() {
    let client = test_client();
    let (ws, cookie) = bootstrap_with_session(&client);
    let task_id = create_task(&client, &ws.append_key, "plan.md", "nanook");

    let res = client
        .post(format!("/a/{}/plan.md/append", ws.append_key))
        .header(ContentType::JSON)
        .body(format!(r#"{{"type": "claim", "author": "forge", "ref": "{task_id}"}}"#))
        .dispatch();
    let append: serde_json::Value = res.into_json().unwrap();

    // The orchestration feed exposes the claim's global id for claim actions.
    let res = client
        .get(format!("/workspaces/{}/orchestration", ws.workspace_id))
        .cookie(cookie.clone())
        .dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    let claim_global_id = body["data"]["claims"][0]["global_id"].as_str().unwrap();
    let _ = append;

    let res = client
        .post(format!("/workspaces/{}/claims/{claim_global_id}/complete", ws.workspace_id))
        .cookie(cookie.clone())
        .header(ContentType::JSON)
        .body(r#"{"author": "forge"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    let res = client
        .get(format!("/workspaces/{}/orchestration", ws.workspace_id))
        .cookie(cookie)
        .dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["data"]["tasks"][0]["status"], "completed");
    assert_eq!(body["data"]["summary"]["completed"], 1);
}

#[test]
fn test_cancel_claim_returns_task_to_pending() {
    let client = test_client();
    let (ws, cookie) = bootstrap_with_session(&client);
    let task_id = create_task(&client, &ws.append_key, "plan.md", "nanook");

    client
        .post(format!("/a/{}/plan.md/append", ws.append_key))
        .header(ContentType::JSON)
        .body(format!(r#"{{"type": "claim", "author": "forge", "ref": "{task_id}"}}"#))
        .dispatch();

    let res = client
        .get(format!("/workspaces/{}/orchestration", ws.workspace_id))
        .cookie(cookie.clone())
        .dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    let claim_global_id = body["data"]["claims"][0]["global_id"].as_str().unwrap();

    let res = client
        .post(format!("/workspaces/{}/claims/{claim_global_id}/cancel", ws.workspace_id))
        .cookie(cookie.clone())
        .header(ContentType::JSON)
        .body(r#"{"author": "forge"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    let res = client
        .get(format!("/workspaces/{}/orchestration", ws.workspace_id))
        .cookie(cookie)
        .dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["data"]["tasks"][0]["status"], "pending");
    assert!(body["data"]["tasks"][0]["claimed_by"].is_null());
}

#[test]
fn test_renew_by_non_owner_is_forbidden() {
    let client = test_client();
    let (ws, cookie) = bootstrap_with_session(&client);
    let task_id = create_task(&client, &ws.append_key, "plan.md", "nanook");

    client
        .post(format!("/a/{}/plan.md/append", ws.append_key))
        .header(ContentType::JSON)
        .body(format!(r#"{{"type": "claim", "author": "forge", "ref": "{task_id}"}}"#))
        .dispatch();

    let res = client
        .get(format!("/workspaces/{}/orchestration", ws.workspace_id))
        .cookie(cookie.clone())
        .dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    let claim_global_id = body["data"]["claims"][0]["global_id"].as_str().unwrap();

    let res = client
        .post(format!("/workspaces/{}/claims/{claim_global_id}/renew", ws.workspace_id))
        .cookie(cookie)
        .header(ContentType::JSON)
        .body(r#"{"author": "drift"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Forbidden);
}

#[test]
fn test_invalid_author_rejected() {
    let client = test_client();
    let ws = bootstrap_workspace(&client);

    let res = client
        .post(format!("/a/{}/plan.md/append", ws.append_key))
        .header(ContentType::JSON)
        .body(r#"{"type": "task", "author": "system", "content": "nope"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn test_orchestration_filters_by_priority() {
    let client = test_client();
    let (ws, cookie) = bootstrap_with_session(&client);

    client
        .post(format!("/a/{}/a.md/append", ws.append_key))
        .header(ContentType::JSON)
        .body(r#"{"type": "task", "author": "nanook", "priority": "high", "content": "urgent"}"#)
        .dispatch();
    client
        .post(format!("/a/{}/b.md/append", ws.append_key))
        .header(ContentType::JSON)
        .body(r#"{"type": "task", "author": "nanook", "priority": "low", "content": "whenever"}"#)
        .dispatch();

    let res = client
        .get(format!("/workspaces/{}/orchestration?priority=high", ws.workspace_id))
        .cookie(cookie)
        .dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    let tasks = body["data"]["tasks"].as_array().unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0]["priority"], "high");
}

#[test]
fn test_heartbeat_then_liveness() {
    let client = test_client();
    let ws = bootstrap_workspace(&client);

    let res = client
        .post(format!("/a/{}/any.md/heartbeat", ws.append_key))
        .header(ContentType::JSON)
        .body(r#"{"author": "nanook", "status": "alive"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    let res = client.get(format!("/r/{}/agents/liveness", ws.read_key)).dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    let agents = body["data"]["agents"].as_array().unwrap();
    assert_eq!(agents.len(), 1);
    assert_eq!(agents[0]["author"], "nanook");
}
