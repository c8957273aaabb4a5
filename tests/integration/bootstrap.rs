use rocket::http::Status;

use crate::common::test_client;

#[test]
fn test_bootstrap_creates_workspace_and_three_keys() {
    let client = test_client();
    let res = client.post("/bootstrap").dispatch();
    assert_eq!(res.status(), Status::Ok);

    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["ok"], true);
    let data = &body["data"];
    assert!(data["workspace_id"].as_str().unwrap().starts_with("ws_"));
    assert!(!data["read_key"].as_str().unwrap().is_empty());
    assert!(!data["append_key"].as_str().unwrap().is_empty());
    assert!(!data["write_key"].as_str().unwrap().is_empty());

    // Each key is distinct.
    let keys = [
        data["read_key"].as_str().unwrap(),
        data["append_key"].as_str().unwrap(),
        data["write_key"].as_str().unwrap(),
    ];
    assert_ne!(keys[0], keys[1]);
    assert_ne!(keys[1], keys[2]);
}

#[test]
fn test_bootstrap_keys_grant_matching_permission() {
    let client = test_client();
    let res = client.post("/bootstrap").dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    let data = &body["data"];
    let read_key = data["read_key"].as_str().unwrap();
    let append_key = data["append_key"].as_str().unwrap();
    let write_key = data["write_key"].as_str().unwrap();

    // Read key cannot write a file.
    let res = client
        .put(format!("/w/{read_key}/notes.md"))
        .header(rocket::http::ContentType::JSON)
        .body(r#"{"content": "hello"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);

    // Append key cannot write a file either.
    let res = client
        .put(format!("/w/{append_key}/notes.md"))
        .header(rocket::http::ContentType::JSON)
        .body(r#"{"content": "hello"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);

    // Write key can.
    let res = client
        .put(format!("/w/{write_key}/notes.md"))
        .header(rocket::http::ContentType::JSON)
        .body(r#"{"content": "hello"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
}

#[test]
fn test_bootstrap_rate_limited_per_ip() {
    use agent_workspace::rate_limit::RateLimitConfig;
    let mut config = RateLimitConfig::default();
    config.bootstrap_max = 2;
    let client = crate::common::test_client_with_rate_limits(config);

    for i in 0..2 {
        let res = client.post("/bootstrap").dispatch();
        assert_eq!(res.status(), Status::Ok, "bootstrap {i} should succeed");
    }

    let res = client.post("/bootstrap").dispatch();
    assert_eq!(res.status(), Status::TooManyRequests);
}
