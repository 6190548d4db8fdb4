//! Terraform registry protocol tests against the in-process router.

mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::{ADMIN_KEY, ANALYTICS_KEY, MAIN_TF, TestApp, tar_gz};

async fn app_with_module() -> TestApp {
    let app = TestApp::start().await;
    app.create_namespace("acme").await;
    app.create_module("acme", "vpc", "aws", json!({})).await;
    app
}

#[tokio::test]
async fn test_health_and_service_discovery() {
    let app = TestApp::start().await;

    let resp = app.get("/health", None).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(&resp.body[..], b"OK");

    let resp = app.get("/.well-known/terraform.json", None).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json()["modules.v1"], "/v1/modules/");
    assert_eq!(resp.json()["providers.v1"], "/v1/providers/");
}

#[tokio::test]
async fn test_versions_hide_beta_and_unpublished() {
    let app = app_with_module().await;
    app.publish_upload("acme/vpc/aws", "1.0.0", &[("main.tf", MAIN_TF)]).await;
    app.publish_upload("acme/vpc/aws", "1.2.0", &[("main.tf", MAIN_TF)]).await;
    app.publish_upload("acme/vpc/aws", "2.0.0-beta.1", &[("main.tf", MAIN_TF)]).await;

    // Uploaded but never published.
    let resp = app
        .upload(
            "/v1/terrareg/modules/acme/vpc/aws/1.3.0/upload",
            Some(ADMIN_KEY),
            "module.tar.gz",
            &tar_gz(&[("main.tf", MAIN_TF)]),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json()["published"], false);

    let resp = app.get("/v1/modules/acme/vpc/aws/versions", None).await;
    assert_eq!(resp.status, StatusCode::OK);
    let versions: Vec<String> = resp.json()["modules"][0]["versions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["version"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(versions, vec!["1.2.0", "1.0.0"]);

    let resp = app.get("/v1/modules/acme/vpc/aws", None).await;
    assert_eq!(resp.status, StatusCode::OK);
    let body = resp.json();
    assert_eq!(body["version"], "1.2.0");
    assert_eq!(body["id"], "acme/vpc/aws/1.2.0");
    assert_eq!(body["root"]["inputs"][0]["name"], "name");
    assert_eq!(body["root"]["outputs"][0]["name"], "id");

    // Published beta versions are reachable by exact version only.
    let resp = app.get("/v1/modules/acme/vpc/aws/2.0.0-beta.1", None).await;
    assert_eq!(resp.status, StatusCode::OK);
    let resp = app.get("/v1/modules/acme/vpc/aws/1.3.0", None).await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
    assert!(resp.json()["errors"].is_array());
}

#[tokio::test]
async fn test_download_redirects_to_hosted_archive() {
    let app = app_with_module().await;
    let archive = tar_gz(&[("main.tf", MAIN_TF)]);
    let resp = app
        .upload(
            "/v1/terrareg/modules/acme/vpc/aws/1.0.0/upload",
            Some(ADMIN_KEY),
            "module.tar.gz",
            &archive,
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    let resp = app
        .post_empty("/v1/terrareg/modules/acme/vpc/aws/1.0.0/publish", Some(ADMIN_KEY))
        .await;
    assert_eq!(resp.status, StatusCode::CREATED);

    let resp = app.get("/v1/modules/acme/vpc/aws/1.0.0/download", None).await;
    assert_eq!(resp.status, StatusCode::NO_CONTENT);
    let location = resp.header("X-Terraform-Get").unwrap().to_string();
    assert_eq!(
        location,
        "/v1/modules/acme/vpc/aws/1.0.0/download?archive=tar.gz"
    );

    let resp = app.get(&location, None).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.header("content-type"), Some("application/gzip"));
    assert_eq!(&resp.body[..], &archive[..]);

    let resp = app.get("/v1/modules/acme/vpc/aws/download", None).await;
    assert_eq!(resp.status, StatusCode::NO_CONTENT);

    let resp = app
        .get("/v1/modules/acme/vpc/aws/downloads/summary", None)
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json()["data"]["attributes"]["total"], 2);
}

async fn latest_location(app: &TestApp) -> String {
    let resp = app.get("/v1/modules/acme/vpc/aws/download", None).await;
    assert_eq!(resp.status, StatusCode::NO_CONTENT);
    resp.header("X-Terraform-Get").unwrap().to_string()
}

#[tokio::test]
async fn test_latest_download_follows_publish_and_unpublish() {
    let app = app_with_module().await;

    app.publish_upload("acme/vpc/aws", "1.0.0", &[("main.tf", MAIN_TF)]).await;
    assert!(latest_location(&app).await.contains("/1.0.0/download"));

    app.publish_upload("acme/vpc/aws", "1.1.0", &[("main.tf", MAIN_TF)]).await;
    assert!(latest_location(&app).await.contains("/1.1.0/download"));

    let resp = app
        .post_empty("/v1/terrareg/modules/acme/vpc/aws/1.1.0/unpublish", Some(ADMIN_KEY))
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    assert!(latest_location(&app).await.contains("/1.0.0/download"));

    let resp = app
        .post_empty("/v1/terrareg/modules/acme/vpc/aws/1.1.0/publish", Some(ADMIN_KEY))
        .await;
    assert_eq!(resp.status, StatusCode::CREATED);
    assert!(latest_location(&app).await.contains("/1.1.0/download"));
}

#[tokio::test]
async fn test_analytics_token_is_stripped_and_recorded() {
    let app = app_with_module().await;
    app.publish_upload("acme/vpc/aws", "1.0.0", &[("main.tf", MAIN_TF)]).await;

    let resp = app
        .get("/v1/modules/my-app__acme/vpc/aws/1.0.0/download", Some(ANALYTICS_KEY))
        .await;
    assert_eq!(resp.status, StatusCode::NO_CONTENT);

    let resp = app
        .get("/v1/terrareg/analytics/acme/vpc/aws", Some(ADMIN_KEY))
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    let body = resp.json();
    assert_eq!(body["tokens"][0]["analytics_token"], "my-app");
    assert_eq!(body["tokens"][0]["environment"], "production");
    assert_eq!(body["summary"]["authenticated"], 1);
}

#[tokio::test]
async fn test_analytics_token_required() {
    let app = TestApp::with_config(|c| c.analytics_token_phase_ii_required = true).await;
    app.create_namespace("acme").await;
    app.create_module("acme", "vpc", "aws", json!({})).await;
    app.publish_upload("acme/vpc/aws", "1.0.0", &[("main.tf", MAIN_TF)]).await;

    let resp = app.get("/v1/modules/acme/vpc/aws/1.0.0/download", None).await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);

    let resp = app
        .get("/v1/modules/team__acme/vpc/aws/1.0.0/download", None)
        .await;
    assert_eq!(resp.status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_search() {
    let app = app_with_module().await;
    app.create_module("acme", "network", "gcp", json!({})).await;
    app.publish_upload("acme/vpc/aws", "1.0.0", &[("main.tf", MAIN_TF)]).await;
    app.publish_upload("acme/network/gcp", "0.1.0", &[("main.tf", MAIN_TF)]).await;

    let resp = app.get("/v1/modules/search?q=vpc", None).await;
    assert_eq!(resp.status, StatusCode::OK);
    let body = resp.json();
    assert_eq!(body["modules"].as_array().unwrap().len(), 1);
    assert_eq!(body["modules"][0]["id"], "acme/vpc/aws/1.0.0");

    let resp = app.get("/v1/modules/search", None).await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);

    let resp = app.get("/v1/modules/acme", None).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json()["meta"]["total_count"], 2);

    let resp = app.get("/v1/modules/unknown", None).await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unauthenticated_access_disabled() {
    let app = TestApp::with_config(|c| c.allow_unauthenticated_access = false).await;
    app.create_namespace("acme").await;

    let resp = app.get("/v1/modules/acme", None).await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
    assert!(resp.header("www-authenticate").is_some());
    assert!(resp.json()["errors"].is_array());

    let resp = app.get("/v1/modules/acme", Some(ADMIN_KEY)).await;
    assert_eq!(resp.status, StatusCode::OK);

    let resp = app.get("/v1/modules/acme", Some("not-a-key")).await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);

    // Discovery stays public.
    let resp = app.get("/.well-known/terraform.json", None).await;
    assert_eq!(resp.status, StatusCode::OK);
}

#[tokio::test]
async fn test_provider_versions_and_download() {
    let app = TestApp::start().await;
    app.create_namespace("hashicorp").await;

    let resp = app
        .post_json(
            "/v1/terrareg/providers/hashicorp/aws/create",
            Some(ADMIN_KEY),
            json!({ "description": "AWS provider" }),
        )
        .await;
    assert_eq!(resp.status, StatusCode::CREATED);

    let resp = app
        .post_json(
            "/v1/terrareg/providers/hashicorp/aws/versions",
            Some(ADMIN_KEY),
            json!({
                "version": "4.0.0",
                "shasums_url": "https://example.com/SHA256SUMS",
                "shasums_signature_url": "https://example.com/SHA256SUMS.sig",
                "binaries": [{
                    "os": "linux",
                    "arch": "amd64",
                    "filename": "terraform-provider-aws_4.0.0_linux_amd64.zip",
                    "download_url": "https://example.com/terraform-provider-aws_4.0.0_linux_amd64.zip",
                    "shasum": "ABCDEF"
                }]
            }),
        )
        .await;
    assert_eq!(resp.status, StatusCode::CREATED, "{}", String::from_utf8_lossy(&resp.body));

    let resp = app.get("/v1/providers/hashicorp/aws/versions", None).await;
    assert_eq!(resp.status, StatusCode::OK);
    let body = resp.json();
    assert_eq!(body["versions"][0]["version"], "4.0.0");
    assert_eq!(body["versions"][0]["protocols"], json!(["5.0"]));
    assert_eq!(body["versions"][0]["platforms"][0]["os"], "linux");

    let resp = app
        .get("/v1/providers/hashicorp/aws/4.0.0/download/linux/amd64", None)
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    let body = resp.json();
    assert_eq!(body["filename"], "terraform-provider-aws_4.0.0_linux_amd64.zip");
    assert_eq!(body["shasum"], "abcdef");
    assert_eq!(body["signing_keys"]["gpg_public_keys"], json!([]));

    let resp = app
        .get("/v1/providers/hashicorp/aws/4.0.0/download/darwin/arm64", None)
        .await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
    assert_eq!(resp.json()["errors"][0], "Binary not found for darwin/arm64");
}

#[tokio::test]
async fn test_hosted_provider_binary() {
    let app = TestApp::start().await;
    app.create_namespace("hashicorp").await;
    app.post_json(
        "/v1/terrareg/providers/hashicorp/null/create",
        Some(ADMIN_KEY),
        json!({}),
    )
    .await;
    let resp = app
        .post_json(
            "/v1/terrareg/providers/hashicorp/null/versions",
            Some(ADMIN_KEY),
            json!({
                "version": "3.2.1",
                "shasums_url": "https://example.com/SHA256SUMS",
                "shasums_signature_url": "https://example.com/SHA256SUMS.sig"
            }),
        )
        .await;
    assert_eq!(resp.status, StatusCode::CREATED);

    let resp = app
        .upload(
            "/v1/terrareg/providers/hashicorp/null/3.2.1/binaries/linux/amd64",
            Some(ADMIN_KEY),
            "terraform-provider-null_3.2.1_linux_amd64.zip",
            b"binary-bytes",
        )
        .await;
    assert_eq!(resp.status, StatusCode::CREATED, "{}", String::from_utf8_lossy(&resp.body));

    let resp = app
        .get("/v1/providers/hashicorp/null/3.2.1/download/linux/amd64", None)
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    let download_url = resp.json()["download_url"].as_str().unwrap().to_string();
    assert_eq!(
        download_url,
        "/v1/terrareg/providers/hashicorp/null/3.2.1/binaries/terraform-provider-null_3.2.1_linux_amd64.zip"
    );

    let resp = app.get(&download_url, None).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(&resp.body[..], b"binary-bytes");
}
