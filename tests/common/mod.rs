//! In-process test harness: the real router over a temp-dir SQLite store
//! and filesystem blob store, driven with `oneshot`.

#![allow(dead_code)]

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Method, Request, StatusCode, header};
use flate2::Compression;
use flate2::write::GzEncoder;
use git2::{Repository, Signature};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use terrareg::config::ServerConfig;
use terrareg::server::{AppState, create_router};
use terrareg::storage::FilesystemBackend;
use terrareg::store::{SqliteStore, Store};

pub const ADMIN_KEY: &str = "test-admin-key";
pub const UPLOAD_KEY: &str = "test-upload-key";
pub const ANALYTICS_KEY: &str = "test-analytics-key";

const BOUNDARY: &str = "terrareg-test-boundary";

pub struct TestApp {
    pub temp_dir: TempDir,
    pub state: Arc<AppState>,
    router: Router,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or_else(|e| {
            panic!(
                "response is not JSON ({e}): {}",
                String::from_utf8_lossy(&self.body)
            )
        })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

impl TestApp {
    pub async fn start() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(configure: impl FnOnce(&mut ServerConfig)) -> Self {
        let temp_dir = TempDir::new().expect("create temp dir");

        let mut config = ServerConfig::default();
        config.database_url = format!(
            "sqlite://{}",
            temp_dir.path().join("terrareg.db").display()
        );
        config.storage_root = temp_dir.path().join("storage");
        config.admin_authentication_token = Some(ADMIN_KEY.to_string());
        config.upload_api_keys = vec![UPLOAD_KEY.to_string()];
        config.analytics_auth_keys = vec![format!("{ANALYTICS_KEY}:production")];
        config.session_secret = Some("test-session-secret".to_string());
        configure(&mut config);
        config.validate().expect("valid config");

        let store = SqliteStore::new(temp_dir.path().join("terrareg.db")).expect("open store");
        store.initialize().expect("initialize store");
        let blobs = FilesystemBackend::new(&config.storage_root, config.max_upload_size)
            .await
            .expect("create blob store");

        let state = Arc::new(AppState::new(Arc::new(store), Arc::new(blobs), config));
        let router = create_router(state.clone());

        Self {
            temp_dir,
            state,
            router,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn get(&self, path: &str, key: Option<&str>) -> TestResponse {
        self.send(request(Method::GET, path, key).body(Body::empty()).expect("request"))
            .await
    }

    pub async fn delete(&self, path: &str, key: Option<&str>) -> TestResponse {
        self.send(request(Method::DELETE, path, key).body(Body::empty()).expect("request"))
            .await
    }

    pub async fn post_json(&self, path: &str, key: Option<&str>, body: Value) -> TestResponse {
        self.send_json(Method::POST, path, key, body).await
    }

    pub async fn put_json(&self, path: &str, key: Option<&str>, body: Value) -> TestResponse {
        self.send_json(Method::PUT, path, key, body).await
    }

    async fn send_json(&self, method: Method, path: &str, key: Option<&str>, body: Value) -> TestResponse {
        let request = request(method, path, key)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request");
        self.send(request).await
    }

    pub async fn post_empty(&self, path: &str, key: Option<&str>) -> TestResponse {
        self.send(request(Method::POST, path, key).body(Body::empty()).expect("request"))
            .await
    }

    /// Posts `data` as the multipart field `file`.
    pub async fn upload(&self, path: &str, key: Option<&str>, filename: &str, data: &[u8]) -> TestResponse {
        let request = request(Method::POST, path, key)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(filename, data)))
            .expect("request");
        self.send(request).await
    }

    pub async fn create_namespace(&self, name: &str) {
        let resp = self
            .post_json(
                "/v1/terrareg/namespaces",
                Some(ADMIN_KEY),
                serde_json::json!({ "name": name }),
            )
            .await;
        assert_eq!(resp.status, StatusCode::CREATED, "{}", String::from_utf8_lossy(&resp.body));
    }

    pub async fn create_module(&self, namespace: &str, module: &str, provider: &str, settings: Value) {
        let resp = self
            .post_json(
                &format!("/v1/terrareg/modules/{namespace}/{module}/{provider}/create"),
                Some(ADMIN_KEY),
                settings,
            )
            .await;
        assert_eq!(resp.status, StatusCode::CREATED, "{}", String::from_utf8_lossy(&resp.body));
    }

    /// Uploads and publishes `version` built from `files`.
    pub async fn publish_upload(&self, address: &str, version: &str, files: &[(&str, &str)]) {
        let resp = self
            .upload(
                &format!("/v1/terrareg/modules/{address}/{version}/upload"),
                Some(ADMIN_KEY),
                "module.tar.gz",
                &tar_gz(files),
            )
            .await;
        assert_eq!(resp.status, StatusCode::OK, "{}", String::from_utf8_lossy(&resp.body));

        let resp = self
            .post_empty(
                &format!("/v1/terrareg/modules/{address}/{version}/publish"),
                Some(ADMIN_KEY),
            )
            .await;
        assert_eq!(resp.status, StatusCode::CREATED, "{}", String::from_utf8_lossy(&resp.body));
    }

    pub fn store(&self) -> &dyn Store {
        self.state.store.as_ref()
    }
}

fn request(method: Method, path: &str, key: Option<&str>) -> axum::http::request::Builder {
    let builder = Request::builder().method(method).uri(path);
    match key {
        Some(key) => builder.header("X-Terrareg-ApiKey", key),
        None => builder,
    }
}

fn multipart_body(filename: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    write!(
        body,
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
    )
    .expect("write multipart header");
    body.extend_from_slice(data);
    write!(body, "\r\n--{BOUNDARY}--\r\n").expect("write multipart trailer");
    body
}

/// A gzipped tarball of `files`.
pub fn tar_gz(files: &[(&str, &str)]) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (path, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, path, content.as_bytes())
            .expect("append tar entry");
    }
    builder
        .into_inner()
        .expect("finish tar")
        .finish()
        .expect("finish gzip")
}

pub const MAIN_TF: &str = r#"
variable "name" {
  type        = string
  description = "Name of the widget"
}

output "id" {
  value = "widget"
}
"#;

/// Creates a repository at `dir` with one commit of `files` and the given tags.
pub fn git_repo(dir: &Path, files: &[(&str, &str)], tags: &[&str]) -> String {
    let repo = Repository::init(dir).expect("init repo");
    let mut index = repo.index().expect("index");
    for (path, content) in files {
        let full = dir.join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).expect("create dirs");
        }
        std::fs::write(&full, content).expect("write file");
        index.add_path(Path::new(path)).expect("add path");
    }
    index.write().expect("write index");

    let tree = repo
        .find_tree(index.write_tree().expect("write tree"))
        .expect("find tree");
    let signature = Signature::now("Test", "test@example.com").expect("signature");
    let commit_id = repo
        .commit(Some("HEAD"), &signature, &signature, "initial", &tree, &[])
        .expect("commit");
    let commit = repo.find_object(commit_id, None).expect("find commit");
    for tag in tags {
        repo.tag_lightweight(tag, &commit, false).expect("tag");
    }
    commit_id.to_string()
}
