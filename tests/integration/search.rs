use rocket::http::{ContentType, Status};

use crate::common::{bootstrap_workspace, test_client};

fn post_append(client: &rocket::local::blocking::Client, key: &str, path: &str, body: &str) {
    let res = client
        .post(format!("/a/{key}/{path}/append"))
        .header(ContentType::JSON)
        .body(body)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
}

#[test]
fn test_search_word_matching() {
    let client = test_client();
    let ws = bootstrap_workspace(&client);

    post_append(
        &client,
        &ws.append_key,
        "a.md",
        r#"{"type": "comment", "author": "nanook", "content": "the frobulation process completed successfully"}"#,
    );
    post_append(
        &client,
        &ws.append_key,
        "b.md",
        r#"{"type": "comment", "author": "forge", "content": "starting frobulation on all servers now"}"#,
    );
    post_append(
        &client,
        &ws.append_key,
        "c.md",
        r#"{"type": "comment", "author": "drift", "content": "the weather is nice today"}"#,
    );

    let res = client.get(format!("/r/{}/search?q=frobulation", ws.read_key)).dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["data"]["count"].as_u64().unwrap(), 2);

    let res = client.get(format!("/r/{}/search?q=weather", ws.read_key)).dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["data"]["count"].as_u64().unwrap(), 1);
}

#[test]
fn test_search_multi_word() {
    let client = test_client();
    let ws = bootstrap_workspace(&client);

    post_append(
        &client,
        &ws.append_key,
        "a.md",
        r#"{"type": "comment", "author": "nanook", "content": "the api test results look good"}"#,
    );
    post_append(
        &client,
        &ws.append_key,
        "b.md",
        r#"{"type": "comment", "author": "forge", "content": "running api integration tests now"}"#,
    );
    post_append(
        &client,
        &ws.append_key,
        "c.md",
        r#"{"type": "comment", "author": "drift", "content": "the weather api is down"}"#,
    );

    let res = client.get(format!("/r/{}/search?q=api%20test", ws.read_key)).dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["data"]["count"].as_u64().unwrap(), 2);
}

#[test]
fn test_search_empty_query_returns_empty() {
    let client = test_client();
    let ws = bootstrap_workspace(&client);

    post_append(
        &client,
        &ws.append_key,
        "a.md",
        r#"{"type": "comment", "author": "nanook", "content": "hello world"}"#,
    );

    let res = client.get(format!("/r/{}/search?q=", ws.read_key)).dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["data"]["count"].as_u64().unwrap(), 0);
}

#[test]
fn test_search_falls_back_on_fts_syntax_error() {
    let client = test_client();
    let ws = bootstrap_workspace(&client);

    post_append(
        &client,
        &ws.append_key,
        "a.md",
        r#"{"type": "comment", "author": "nanook", "content": "needle in a haystack"}"#,
    );

    // An unbalanced quote is invalid FTS5 MATCH syntax; the handler falls
    // back to a LIKE scan instead of erroring.
    let res = client.get(format!("/r/{}/search?q=%22needle", ws.read_key)).dispatch();
    assert_eq!(res.status(), Status::Ok);
}

#[test]
fn test_search_requires_read_permission() {
    let client = test_client();
    let ws = bootstrap_workspace(&client);

    post_append(
        &client,
        &ws.append_key,
        "a.md",
        r#"{"type": "comment", "author": "nanook", "content": "hello world"}"#,
    );

    let res = client.get(format!("/r/{}/search?q=hello", ws.read_key)).dispatch();
    assert_eq!(res.status(), Status::Ok);
}
