use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};

use crate::auth::RequireRead;
use crate::error::{Error, Result};
use crate::module::version::compare_precedence;
use crate::server::AppState;
use crate::server::dto::{
    GpgPublicKey, Platform, ProviderDownloadResponse, ProviderVersionEntry,
    ProviderVersionsResponse, SigningKeys,
};
use crate::server::response::RegistryError;
use crate::types::Provider;

fn find_provider(state: &AppState, namespace: &str, name: &str) -> Result<Provider> {
    state
        .store
        .find_provider(namespace, name)?
        .ok_or_else(|| Error::not_found(format!("Provider {namespace}/{name} not found")))
}

/// GET /v1/providers/{ns}/{prov}/versions
pub async fn list_versions(
    _auth: RequireRead,
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> std::result::Result<Json<ProviderVersionsResponse>, RegistryError> {
    let provider = find_provider(&state, &namespace, &name)?;
    let mut versions = state.store.list_provider_versions(provider.id)?;
    versions.sort_by(|a, b| match (semver::Version::parse(&a.version), semver::Version::parse(&b.version)) {
        (Ok(a), Ok(b)) => compare_precedence(&b, &a),
        _ => b.version.cmp(&a.version),
    });

    let mut entries = Vec::with_capacity(versions.len());
    for version in versions {
        let platforms = state
            .store
            .list_provider_binaries(version.id)?
            .into_iter()
            .map(|b| Platform {
                os: b.os,
                arch: b.arch,
            })
            .collect();
        entries.push(ProviderVersionEntry {
            version: version.version,
            protocols: version.protocols,
            platforms,
        });
    }

    Ok(Json(ProviderVersionsResponse {
        id: format!("{}/{}", provider.namespace, provider.name),
        versions: entries,
    }))
}

/// GET /v1/providers/{ns}/{prov}/{ver}/download/{os}/{arch}
pub async fn download(
    _auth: RequireRead,
    State(state): State<Arc<AppState>>,
    Path((namespace, name, version, os, arch)): Path<(String, String, String, String, String)>,
) -> std::result::Result<Json<ProviderDownloadResponse>, RegistryError> {
    let provider = find_provider(&state, &namespace, &name)?;
    let version = state
        .store
        .get_provider_version(provider.id, &version)?
        .ok_or_else(|| {
            RegistryError::not_found(format!(
                "Version {version} of provider {namespace}/{name} not found"
            ))
        })?;
    let binary = state
        .store
        .find_provider_binary(version.id, &os, &arch)?
        .ok_or_else(|| RegistryError::not_found(format!("Binary not found for {os}/{arch}")))?;

    let gpg_public_keys = match version.gpg_key_id {
        Some(id) => state
            .store
            .get_gpg_key(id)?
            .map(|key| GpgPublicKey {
                key_id: key.key_id,
                ascii_armor: key.ascii_armor,
            })
            .into_iter()
            .collect(),
        None => Vec::new(),
    };

    let download_url = if binary.download_url.starts_with('/') {
        state.config.absolute_url(&binary.download_url)
    } else {
        binary.download_url
    };

    Ok(Json(ProviderDownloadResponse {
        protocols: version.protocols,
        os: binary.os,
        arch: binary.arch,
        filename: binary.filename,
        download_url,
        shasums_url: version.shasums_url,
        shasums_signature_url: version.shasums_signature_url,
        shasum: binary.shasum,
        signing_keys: SigningKeys { gpg_public_keys },
    }))
}
