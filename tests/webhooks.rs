//! Git host webhook deliveries importing tags from a local repository.

mod common;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use serde_json::{Value, json};
use tempfile::TempDir;

use common::{MAIN_TF, TestApp, TestResponse, UPLOAD_KEY, git_repo};
use terrareg::webhook::sign;

const HOOK: &str = "/v1/terrareg/modules/acme/vpc/aws/hooks";

async fn deliver(
    app: &TestApp,
    host: &str,
    event: Option<(&str, &str)>,
    signature: Option<String>,
    body: &Value,
) -> TestResponse {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(format!("{HOOK}/{host}"))
        .header(header::CONTENT_TYPE, "application/json");
    if let Some((name, value)) = event {
        builder = builder.header(name, value);
    }
    if let Some(signature) = signature {
        builder = builder.header("X-Hub-Signature-256", signature);
    }
    app.send(builder.body(Body::from(body.to_string())).unwrap())
        .await
}

/// App with `acme/vpc/aws` cloning from a local repository tagged `tags`.
async fn app_with_repo(tags: &[&str]) -> (TestApp, TempDir) {
    let repo_dir = TempDir::new().unwrap();
    git_repo(repo_dir.path(), &[("main.tf", MAIN_TF)], tags);

    let app = TestApp::start().await;
    app.create_namespace("acme").await;
    app.create_module(
        "acme",
        "vpc",
        "aws",
        json!({ "repo_clone_url_template": repo_dir.path().display().to_string() }),
    )
    .await;
    (app, repo_dir)
}

fn release(tag: &str) -> Value {
    json!({
        "action": "published",
        "release": { "tag_name": tag }
    })
}

#[tokio::test]
async fn test_signed_github_release_imports_tag() {
    let (app, _repo) = app_with_repo(&["1.0.0"]).await;
    let body = release("1.0.0");
    let signature = sign(UPLOAD_KEY, body.to_string().as_bytes()).unwrap();

    let resp = deliver(&app, "github", Some(("X-GitHub-Event", "release")), Some(signature), &body).await;
    assert_eq!(resp.status, StatusCode::OK, "{}", String::from_utf8_lossy(&resp.body));
    let result = resp.json();
    assert_eq!(result["status"], "processed");
    assert_eq!(result["imported"], json!(["1.0.0"]));
    assert_eq!(result["failed_count"], 0);

    let resp = app.get("/v1/terrareg/modules/acme/vpc/aws/1.0.0", Some(UPLOAD_KEY)).await;
    assert_eq!(resp.status, StatusCode::OK);
    let version = &resp.json()["version"];
    assert_eq!(version["git_tag"], "1.0.0");
    assert_eq!(version["published"], false);

    // Redelivery is a no-op.
    let signature = sign(UPLOAD_KEY, body.to_string().as_bytes()).unwrap();
    let resp = deliver(&app, "github", Some(("X-GitHub-Event", "release")), Some(signature), &body).await;
    assert_eq!(resp.json()["imported"], json!(["1.0.0"]));
}

#[tokio::test]
async fn test_github_signature_is_checked() {
    let (app, _repo) = app_with_repo(&["1.0.0"]).await;
    let body = release("1.0.0");

    let resp = deliver(&app, "github", Some(("X-GitHub-Event", "release")), None, &body).await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);

    let forged = sign("not-a-configured-key", body.to_string().as_bytes()).unwrap();
    let resp = deliver(&app, "github", Some(("X-GitHub-Event", "release")), Some(forged), &body).await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);

    let resp = app.get("/v1/terrareg/modules/acme/vpc/aws/1.0.0", Some(UPLOAD_KEY)).await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_github_events_other_than_release_are_ignored() {
    let (app, _repo) = app_with_repo(&["1.0.0"]).await;
    let body = json!({ "zen": "Keep it logically awesome." });
    let signature = sign(UPLOAD_KEY, body.to_string().as_bytes()).unwrap();

    let resp = deliver(&app, "github", Some(("X-GitHub-Event", "ping")), Some(signature), &body).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json()["status"], "ignored");
}

#[tokio::test]
async fn test_bitbucket_push_reports_partial_failure() {
    let (app, _repo) = app_with_repo(&["1.0.0"]).await;
    let body = json!({
        "push": {
            "changes": [
                { "new": { "type": "tag", "name": "1.0.0" } },
                { "new": { "type": "tag", "name": "2.0.0" } },
                { "new": { "type": "branch", "name": "main" } }
            ]
        }
    });
    let signature = sign(UPLOAD_KEY, body.to_string().as_bytes()).unwrap();

    let resp = deliver(&app, "bitbucket", Some(("X-Event-Key", "repo:push")), Some(signature), &body).await;
    assert_eq!(resp.status, StatusCode::OK, "{}", String::from_utf8_lossy(&resp.body));
    let result = resp.json();
    assert_eq!(result["imported"], json!(["1.0.0"]));
    assert_eq!(result["failed_count"], 1);
    assert_eq!(result["failed"][0]["tag"], "2.0.0");

    let resp = app.get("/v1/terrareg/modules/acme/vpc/aws/versions", Some(UPLOAD_KEY)).await;
    assert_eq!(resp.json().as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_unsupported_hosts() {
    let (app, _repo) = app_with_repo(&[]).await;
    let body = json!({});

    let resp = deliver(&app, "gitlab", None, None, &body).await;
    assert_eq!(resp.status, StatusCode::NOT_IMPLEMENTED);

    let resp = deliver(&app, "gitea", None, None, &body).await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);

    // Unsupported before the module is even looked up.
    let request = Request::builder()
        .method(Method::POST)
        .uri("/v1/terrareg/modules/acme/missing/aws/hooks/gitlab")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();
    assert_eq!(app.send(request).await.status, StatusCode::NOT_IMPLEMENTED);
}

async fn deliver_legacy_signature(app: &TestApp, host: &str, event: (&str, &str), body: &Value) -> TestResponse {
    let signature = sign(UPLOAD_KEY, body.to_string().as_bytes()).unwrap();
    let request = Request::builder()
        .method(Method::POST)
        .uri(format!("{HOOK}/{host}"))
        .header(header::CONTENT_TYPE, "application/json")
        .header(event.0, event.1)
        .header("X-Hub-Signature", signature)
        .body(Body::from(body.to_string()))
        .unwrap();
    app.send(request).await
}

#[tokio::test]
async fn test_legacy_signature_header_is_bitbucket_only() {
    let (app, _repo) = app_with_repo(&["1.0.0"]).await;

    let resp = deliver_legacy_signature(&app, "github", ("X-GitHub-Event", "release"), &release("1.0.0")).await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);

    let push = json!({
        "push": { "changes": [{ "new": { "type": "tag", "name": "1.0.0" } }] }
    });
    let resp = deliver_legacy_signature(&app, "bitbucket", ("X-Event-Key", "repo:push"), &push).await;
    assert_eq!(resp.status, StatusCode::OK, "{}", String::from_utf8_lossy(&resp.body));
    assert_eq!(resp.json()["imported"], json!(["1.0.0"]));
}

#[tokio::test]
async fn test_webhook_at_renamed_address_still_imports() {
    let (app, _repo) = app_with_repo(&["1.0.0"]).await;
    let resp = app
        .put_json(
            "/v1/terrareg/modules/acme/vpc/aws/settings",
            Some(common::ADMIN_KEY),
            json!({ "module": "network" }),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);

    let body = release("1.0.0");
    let signature = sign(UPLOAD_KEY, body.to_string().as_bytes()).unwrap();
    let resp = deliver(&app, "github", Some(("X-GitHub-Event", "release")), Some(signature), &body).await;
    assert_eq!(resp.status, StatusCode::OK, "{}", String::from_utf8_lossy(&resp.body));
    assert_eq!(resp.json()["imported"], json!(["1.0.0"]));

    let resp = app
        .get("/v1/terrareg/modules/acme/network/aws/1.0.0", Some(UPLOAD_KEY))
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json()["version"]["git_tag"], "1.0.0");

    // The import endpoint follows the redirect too.
    let resp = app
        .post_json(
            "/v1/terrareg/modules/acme/vpc/aws/import",
            Some(UPLOAD_KEY),
            json!({ "version": "1.0.0" }),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json()["status"], "unchanged");
}

#[tokio::test]
async fn test_import_endpoint_uses_git_tag_format() {
    let (app, _repo) = app_with_repo(&["v1.4.0"]).await;
    let resp = app
        .put_json(
            "/v1/terrareg/modules/acme/vpc/aws/settings",
            Some(common::ADMIN_KEY),
            json!({ "git_tag_format": "v{version}" }),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);

    let resp = app
        .post_json(
            "/v1/terrareg/modules/acme/vpc/aws/import",
            Some(UPLOAD_KEY),
            json!({ "version": "1.4.0" }),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK, "{}", String::from_utf8_lossy(&resp.body));
    assert_eq!(resp.json()["status"], "imported");

    let resp = app
        .post_json(
            "/v1/terrareg/modules/acme/vpc/aws/import",
            Some(UPLOAD_KEY),
            json!({ "git_tag": "v1.4.0" }),
        )
        .await;
    assert_eq!(resp.json()["status"], "unchanged");

    let resp = app
        .post_json("/v1/terrareg/modules/acme/vpc/aws/import", Some(UPLOAD_KEY), json!({}))
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
}
