use rocket::http::{ContentType, Status};

use crate::common::{bootstrap_with_session, bootstrap_workspace, test_client};

#[test]
fn test_rename_workspace() {
    let client = test_client();
    let (ws, cookie) = bootstrap_with_session(&client);

    let res = client
        .patch(format!("/workspaces/{}/name", ws.workspace_id))
        .cookie(cookie)
        .header(ContentType::JSON)
        .body(r#"{"name": "Project Atlas"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["data"]["name"], "Project Atlas");
}

#[test]
fn test_rename_workspace_rejects_empty_name() {
    let client = test_client();
    let (ws, cookie) = bootstrap_with_session(&client);

    let res = client
        .patch(format!("/workspaces/{}/name", ws.workspace_id))
        .cookie(cookie)
        .header(ContentType::JSON)
        .body(r#"{"name": "  "}"#)
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn test_non_owner_gets_404_not_403() {
    let client = test_client();
    let ws = bootstrap_workspace(&client);
    // A session for a *different* workspace than the one being targeted.
    let other = bootstrap_workspace(&client);
    let token = crate::common::seed_session(&client, &other.workspace_id);
    let cookie = rocket::http::Cookie::new("better-auth.session_token", token);

    let res = client
        .patch(format!("/workspaces/{}/name", ws.workspace_id))
        .cookie(cookie)
        .header(ContentType::JSON)
        .body(r#"{"name": "hijacked"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);
}

#[test]
fn test_missing_session_rejected() {
    let client = test_client();
    let ws = bootstrap_workspace(&client);

    let res = client
        .patch(format!("/workspaces/{}/name", ws.workspace_id))
        .header(ContentType::JSON)
        .body(r#"{"name": "no cookie"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Unauthorized);
}

#[test]
fn test_rotate_all_keys_revokes_old_and_mints_new() {
    let client = test_client();
    let (ws, cookie) = bootstrap_with_session(&client);

    let res = client
        .post(format!("/workspaces/{}/rotate-all", ws.workspace_id))
        .cookie(cookie)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    let new_write_key = body["data"]["writeKey"].as_str().unwrap();
    assert_ne!(new_write_key, ws.write_key);

    // Old write key no longer works.
    let res = client
        .put(format!("/w/{}/a.md", ws.write_key))
        .header(ContentType::JSON)
        .body(r#"{"content": "should fail"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);

    // New write key does.
    let res = client
        .put(format!("/w/{new_write_key}/a.md"))
        .header(ContentType::JSON)
        .body(r#"{"content": "works now"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
}

#[test]
fn test_delete_workspace_soft_deletes() {
    let client = test_client();
    let (ws, cookie) = bootstrap_with_session(&client);

    let res = client.delete(format!("/workspaces/{}", ws.workspace_id)).cookie(cookie).dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["data"]["deleted"], true);
}
