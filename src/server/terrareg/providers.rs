use std::sync::Arc;

use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Multipart, Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use tokio::fs::File;

use super::namespaces::find_namespace;
use super::optional_json;
use super::spool::spool_multipart_file;
use crate::auth::{Auth, RequireRead};
use crate::error::{Error, Result};
use crate::server::AppState;
use crate::server::dto::{CreateProviderRequest, CreateProviderVersionRequest};
use crate::server::lookup::audit;
use crate::server::response::ApiError;
use crate::server::validation::{
    validate_filename, validate_platform, validate_provider_name, validate_version,
};
use crate::storage::provider_binary_path;
use crate::store::NewProviderVersion;
use crate::types::{NewProviderBinary, PermissionLevel, Provider, ProviderVersion};

fn find_provider(state: &AppState, namespace: &str, name: &str) -> Result<Provider> {
    state
        .store
        .find_provider(namespace, name)?
        .ok_or_else(|| Error::not_found(format!("Provider {namespace}/{name} not found")))
}

fn find_provider_version(state: &AppState, provider: &Provider, version: &str) -> Result<ProviderVersion> {
    state
        .store
        .get_provider_version(provider.id, version)?
        .ok_or_else(|| {
            Error::not_found(format!(
                "Version {version} of provider {}/{} not found",
                provider.namespace, provider.name
            ))
        })
}

/// `/v1/terrareg/providers/{ns}/{prov}/{ver}/binaries/{filename}`
fn hosted_binary_url(namespace: &str, provider: &str, version: &str, filename: &str) -> String {
    format!("/v1/terrareg/providers/{namespace}/{provider}/{version}/binaries/{filename}")
}

/// POST /providers/{ns}/{prov}/create
pub async fn create_provider(
    Auth(principal): Auth,
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
    body: Bytes,
) -> std::result::Result<impl IntoResponse, ApiError> {
    principal.require_namespace(state.store.as_ref(), &namespace, PermissionLevel::Full)?;
    validate_provider_name(&name)?;
    let req: CreateProviderRequest = optional_json(&body)?;
    let ns = find_namespace(&state, &namespace)?;

    let provider = state
        .store
        .create_provider(ns.id, &name, req.description.as_deref())?;
    tracing::info!("Created provider {namespace}/{name}");
    audit(
        state.store.as_ref(),
        &principal,
        "PROVIDER_CREATE",
        "provider",
        &format!("{namespace}/{name}"),
        None,
        None,
    );

    Ok((StatusCode::CREATED, Json(provider)))
}

/// POST /providers/{ns}/{prov}/versions
pub async fn create_version(
    Auth(principal): Auth,
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
    Json(req): Json<CreateProviderVersionRequest>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let store = state.store.as_ref();
    principal.require_namespace(store, &namespace, PermissionLevel::Full)?;
    validate_version(&req.version)?;
    let provider = find_provider(&state, &namespace, &name)?;

    if let Some(key_id) = req.gpg_key_id {
        let key = store
            .get_gpg_key(key_id)?
            .ok_or_else(|| ApiError::bad_request(format!("GPG key {key_id} does not exist")))?;
        if key.namespace_id != provider.namespace_id {
            return Err(ApiError::bad_request(format!(
                "GPG key {key_id} does not belong to namespace {namespace}"
            )));
        }
    }

    let mut binaries = Vec::with_capacity(req.binaries.len());
    for binary in req.binaries {
        validate_platform(&binary.os, &binary.arch)?;
        validate_filename(&binary.filename)?;
        binaries.push(NewProviderBinary {
            os: binary.os,
            arch: binary.arch,
            filename: binary.filename,
            download_url: binary.download_url,
            shasum: binary.shasum.to_ascii_lowercase(),
        });
    }

    let version = store.create_provider_version(
        provider.id,
        &NewProviderVersion {
            version: req.version,
            protocols: req.protocols,
            gpg_key_id: req.gpg_key_id,
            shasums_url: req.shasums_url,
            shasums_signature_url: req.shasums_signature_url,
        },
        &binaries,
    )?;
    tracing::info!("Created provider version {namespace}/{name} {}", version.version);
    audit(
        store,
        &principal,
        "PROVIDER_VERSION_CREATE",
        "provider_version",
        &format!("{namespace}/{name}/{}", version.version),
        None,
        None,
    );

    Ok((StatusCode::CREATED, Json(version)))
}

/// POST /providers/{ns}/{prov}/{ver}/binaries/{os}/{arch}
pub async fn upload_binary(
    Auth(principal): Auth,
    State(state): State<Arc<AppState>>,
    Path((namespace, name, version, os, arch)): Path<(String, String, String, String, String)>,
    mut multipart: Multipart,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let store = state.store.as_ref();
    principal.require_namespace(store, &namespace, PermissionLevel::Full)?;
    validate_platform(&os, &arch)?;
    let provider = find_provider(&state, &namespace, &name)?;
    let provider_version = find_provider_version(&state, &provider, &version)?;

    let spooled = spool_multipart_file(&mut multipart, "file", state.config.max_upload_size).await?;
    let filename = spooled
        .filename
        .clone()
        .unwrap_or_else(|| format!("terraform-provider-{name}_{version}_{os}_{arch}.zip"));
    validate_filename(&filename)?;

    let path = provider_binary_path(&namespace, &name, &version, &filename);
    let mut file = File::open(spooled.path()).await?;
    let stored = state.blobs.put(&path, &mut file).await?;

    let binary = store.upsert_provider_binary(
        provider_version.id,
        &NewProviderBinary {
            os,
            arch,
            filename: filename.clone(),
            download_url: hosted_binary_url(&namespace, &name, &version, &filename),
            shasum: stored.sha256,
        },
    )?;
    tracing::info!(
        "Stored provider binary {filename} ({} bytes) for {namespace}/{name} {version}",
        stored.size
    );
    audit(
        store,
        &principal,
        "PROVIDER_BINARY_UPLOAD",
        "provider_binary",
        &format!("{namespace}/{name}/{version}/{filename}"),
        None,
        None,
    );

    Ok((StatusCode::CREATED, Json(binary)))
}

/// GET /providers/{ns}/{prov}/{ver}/binaries/{filename}
pub async fn download_binary(
    _auth: RequireRead,
    State(state): State<Arc<AppState>>,
    Path((namespace, name, version, filename)): Path<(String, String, String, String)>,
) -> std::result::Result<Response, ApiError> {
    validate_filename(&filename)?;
    let provider = find_provider(&state, &namespace, &name)?;
    let provider_version = find_provider_version(&state, &provider, &version)?;
    let binary = state
        .store
        .find_provider_binary_by_filename(provider_version.id, &filename)?
        .ok_or_else(|| ApiError::not_found(format!("Binary {filename} not found")))?;

    let path = provider_binary_path(&namespace, &name, &version, &binary.filename);
    let stream = state.blobs.get(&path).await?;

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/zip")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", binary.filename),
        )
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hosted_binary_url() {
        assert_eq!(
            hosted_binary_url("hashicorp", "aws", "4.0.0", "terraform-provider-aws_4.0.0_linux_amd64.zip"),
            "/v1/terrareg/providers/hashicorp/aws/4.0.0/binaries/terraform-provider-aws_4.0.0_linux_amd64.zip"
        );
    }
}
