use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde_json::{Value, json};

use crate::analytics::{self, DownloadContext, split_analytics_token};
use crate::auth::{Principal, RequireRead};
use crate::config::ModuleHosting;
use crate::error::{Error, Result};
use crate::module::extractor::ArchiveFormat;
use crate::module::{git, sort_descending};
use crate::server::AppState;
use crate::server::dto::{
    DownloadParams, ModuleInterface, ModuleOutline, ModuleVersionList, ModuleVersionsResponse,
    SearchMeta, SearchParams, SearchResponse, VersionEntry,
};
use crate::server::lookup::{git_provider_of, module_summary, resolve_module_provider};
use crate::server::response::RegistryError;
use crate::storage::module_archive_path;
use crate::store::ModuleSearch;
use crate::types::{ModuleProvider, ModuleVersion, SubmoduleKind};

const DEFAULT_SEARCH_LIMIT: u32 = 10;
const MAX_SEARCH_LIMIT: u32 = 100;
const TERRAFORM_VERSION_HEADER: &str = "X-Terraform-Version";

/// Address of a registry request after stripping any analytics token.
struct ModuleAddress {
    analytics_token: Option<String>,
    namespace: String,
    module: String,
    provider: String,
}

impl ModuleAddress {
    fn parse(namespace_segment: &str, module: String, provider: String) -> Self {
        let (token, namespace) = split_analytics_token(namespace_segment);
        Self {
            analytics_token: token.map(str::to_string),
            namespace: namespace.to_string(),
            module,
            provider,
        }
    }

    fn resolve(&self, state: &AppState) -> Result<ModuleProvider> {
        resolve_module_provider(
            state.store.as_ref(),
            &self.namespace,
            &self.module,
            &self.provider,
        )
    }
}

fn published_version(
    state: &AppState,
    module_provider: &ModuleProvider,
    version: &str,
) -> Result<ModuleVersion> {
    state
        .store
        .get_module_version(module_provider.id, version)?
        .filter(|v| v.published)
        .ok_or_else(|| {
            Error::not_found(format!(
                "Version {version} of {} not found",
                module_provider.address()
            ))
        })
}

fn latest_version(state: &AppState, module_provider: &ModuleProvider) -> Result<ModuleVersion> {
    state
        .latest
        .latest_public(state.store.as_ref(), module_provider.id)?
        .ok_or_else(|| {
            Error::not_found(format!(
                "No published versions of {}",
                module_provider.address()
            ))
        })
}

/// GET /v1/modules/{ns}/{mod}/{prov}/versions
pub async fn list_versions(
    _auth: RequireRead,
    State(state): State<Arc<AppState>>,
    Path((namespace, module, provider)): Path<(String, String, String)>,
) -> std::result::Result<Json<ModuleVersionsResponse>, RegistryError> {
    let address = ModuleAddress::parse(&namespace, module, provider);
    let module_provider = address.resolve(&state)?;

    let mut versions: Vec<ModuleVersion> = state
        .store
        .list_module_versions(module_provider.id)
        .map_err(RegistryError::from)?
        .into_iter()
        .filter(ModuleVersion::is_public)
        .collect();
    sort_descending(&mut versions);

    Ok(Json(ModuleVersionsResponse {
        modules: vec![ModuleVersionList {
            versions: versions
                .into_iter()
                .map(|v| VersionEntry { version: v.version })
                .collect(),
        }],
    }))
}

/// `X-Terraform-Get` value for a version: the hosted archive when there is
/// one, otherwise a `git::` source pinned to the version's tag.
fn terraform_get(
    state: &AppState,
    module_provider: &ModuleProvider,
    version: &ModuleVersion,
) -> Result<String> {
    let hosting = state.config.allow_module_hosting;
    let subdir = version
        .git_path
        .as_deref()
        .filter(|p| !p.is_empty())
        .map(|p| format!("//{p}"))
        .unwrap_or_default();

    if let Some(ext) = version.archive_ext.as_deref() {
        if hosting != ModuleHosting::Disallow {
            let path = format!(
                "/v1/modules/{}/{}/{}/{}/download{subdir}?archive={ext}",
                module_provider.namespace,
                module_provider.module,
                module_provider.provider,
                version.version
            );
            return Ok(state.config.absolute_url(&path));
        }
    }

    let unavailable = || {
        Error::not_found(format!(
            "No source available for {} {}",
            module_provider.address(),
            version.version
        ))
    };
    if hosting == ModuleHosting::Enforce {
        return Err(unavailable());
    }
    let git_provider = git_provider_of(state.store.as_ref(), module_provider)?;
    let clone_url = git::clone_url(module_provider, git_provider.as_ref()).ok_or_else(unavailable)?;
    let tag = version.git_tag.as_deref().ok_or_else(unavailable)?;
    Ok(format!(
        "git::{clone_url}{subdir}?ref={}",
        urlencoding::encode(tag)
    ))
}

fn download_context(
    principal: &Principal,
    address: &ModuleAddress,
    headers: &HeaderMap,
) -> DownloadContext {
    let environment = match principal {
        Principal::AnalyticsKey { environment } => Some(environment.clone()),
        _ => None,
    };
    DownloadContext {
        analytics_token: address.analytics_token.clone(),
        auth_principal: principal.is_authenticated().then(|| principal.label()),
        terraform_version: headers
            .get(TERRAFORM_VERSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        environment,
    }
}

async fn serve_archive(
    state: &AppState,
    module_provider: &ModuleProvider,
    version: &ModuleVersion,
    requested: &str,
) -> Result<Response> {
    let not_hosted = || {
        Error::not_found(format!(
            "No {requested} archive for {} {}",
            module_provider.address(),
            version.version
        ))
    };
    let format = ArchiveFormat::from_extension(requested).ok_or_else(not_hosted)?;
    if version.archive_ext.as_deref() != Some(format.extension())
        || state.config.allow_module_hosting == ModuleHosting::Disallow
    {
        return Err(not_hosted());
    }

    let path = module_archive_path(
        &module_provider.namespace,
        &module_provider.module,
        &module_provider.provider,
        &version.version,
        format.extension(),
    );
    let stream = state.blobs.get(&path).await?;

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, format.content_type())
        .header("X-Content-Type-Options", "nosniff");
    if let Some(size) = version.archive_size {
        response = response.header(header::CONTENT_LENGTH, size);
    }
    Ok(response
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()))
}

async fn download(
    state: &AppState,
    principal: &Principal,
    address: &ModuleAddress,
    version: Option<&str>,
    params: &DownloadParams,
    headers: &HeaderMap,
) -> std::result::Result<Response, RegistryError> {
    let module_provider = address.resolve(state)?;
    let version = match version {
        Some(v) => published_version(state, &module_provider, v)?,
        None => latest_version(state, &module_provider)?,
    };

    if let Some(requested) = params.archive.as_deref() {
        return Ok(serve_archive(state, &module_provider, &version, requested).await?);
    }

    if state.config.analytics_token_phase_ii_required && address.analytics_token.is_none() {
        return Err(RegistryError::unauthorized(
            "An analytics token must be provided in the module source namespace",
        ));
    }

    let location = terraform_get(state, &module_provider, &version)?;
    let location = HeaderValue::from_str(&location)
        .map_err(|_| RegistryError::from(Error::internal("Download URL is not a valid header")))?;

    analytics::record_download(
        state.store.as_ref(),
        &module_provider,
        &version,
        download_context(principal, address, headers),
    );

    let mut response = StatusCode::NO_CONTENT.into_response();
    response.headers_mut().insert("X-Terraform-Get", location);
    Ok(response)
}

/// GET /v1/modules/{ns}/{mod}/{prov}/{ver}/download
pub async fn download_version(
    RequireRead(principal): RequireRead,
    State(state): State<Arc<AppState>>,
    Path((namespace, module, provider, version)): Path<(String, String, String, String)>,
    Query(params): Query<DownloadParams>,
    headers: HeaderMap,
) -> std::result::Result<Response, RegistryError> {
    let address = ModuleAddress::parse(&namespace, module, provider);
    download(&state, &principal, &address, Some(&version), &params, &headers).await
}

/// GET /v1/modules/{ns}/{mod}/{prov}/download
pub async fn download_latest(
    RequireRead(principal): RequireRead,
    State(state): State<Arc<AppState>>,
    Path((namespace, module, provider)): Path<(String, String, String)>,
    Query(params): Query<DownloadParams>,
    headers: HeaderMap,
) -> std::result::Result<Response, RegistryError> {
    let address = ModuleAddress::parse(&namespace, module, provider);
    download(&state, &principal, &address, None, &params, &headers).await
}

fn interface(state: &AppState, path: &str, details_id: i64) -> Result<ModuleInterface> {
    let details = state
        .store
        .get_module_details(details_id)?
        .unwrap_or_default();
    Ok(ModuleInterface::new(path, details))
}

fn outline(
    state: &AppState,
    module_provider: &ModuleProvider,
    version: &ModuleVersion,
) -> Result<ModuleOutline> {
    let summary = module_summary(state, module_provider, version)?;
    let root = interface(state, "", version.details_id)?;

    let subtrees = |kind: SubmoduleKind| -> Result<Vec<ModuleInterface>> {
        state
            .store
            .list_subtrees(version.id, kind)?
            .into_iter()
            .map(|s| interface(state, &s.path, s.details_id))
            .collect()
    };
    let submodules = subtrees(SubmoduleKind::Submodule)?;
    let examples = subtrees(SubmoduleKind::Example)?;

    let mut providers: Vec<String> = state
        .store
        .list_namespace_module_providers(module_provider.namespace_id)?
        .into_iter()
        .filter(|mp| mp.module == module_provider.module)
        .map(|mp| mp.provider)
        .collect();
    providers.sort();
    providers.dedup();

    let mut versions: Vec<ModuleVersion> = state
        .store
        .list_module_versions(module_provider.id)?
        .into_iter()
        .filter(ModuleVersion::is_public)
        .collect();
    sort_descending(&mut versions);

    Ok(ModuleOutline {
        summary,
        root,
        submodules,
        examples,
        providers,
        versions: versions.into_iter().map(|v| v.version).collect(),
    })
}

/// GET /v1/modules/{ns}/{mod}/{prov}
pub async fn get_latest(
    _auth: RequireRead,
    State(state): State<Arc<AppState>>,
    Path((namespace, module, provider)): Path<(String, String, String)>,
) -> std::result::Result<Json<ModuleOutline>, RegistryError> {
    let address = ModuleAddress::parse(&namespace, module, provider);
    let module_provider = address.resolve(&state)?;
    let version = latest_version(&state, &module_provider)?;
    Ok(Json(outline(&state, &module_provider, &version)?))
}

/// GET /v1/modules/{ns}/{mod}/{prov}/{ver}
pub async fn get_version(
    _auth: RequireRead,
    State(state): State<Arc<AppState>>,
    Path((namespace, module, provider, version)): Path<(String, String, String, String)>,
) -> std::result::Result<Json<ModuleOutline>, RegistryError> {
    let address = ModuleAddress::parse(&namespace, module, provider);
    let module_provider = address.resolve(&state)?;
    let version = published_version(&state, &module_provider, &version)?;
    Ok(Json(outline(&state, &module_provider, &version)?))
}

fn search_page(
    state: &AppState,
    mut filter: ModuleSearch,
) -> std::result::Result<SearchResponse, RegistryError> {
    filter.limit = filter.limit.clamp(1, MAX_SEARCH_LIMIT);
    let page = state.store.search_module_providers(&filter)?;

    let mut modules = Vec::with_capacity(page.module_providers.len());
    for module_provider in &page.module_providers {
        let Some(version) = state
            .latest
            .latest_public(state.store.as_ref(), module_provider.id)?
        else {
            continue;
        };
        modules.push(module_summary(state, module_provider, &version)?);
    }

    let next = filter.offset.saturating_add(filter.limit);
    Ok(SearchResponse {
        meta: SearchMeta {
            limit: filter.limit,
            current_offset: filter.offset,
            offset: filter.offset,
            total_count: page.total,
            next_offset: (u64::from(next) < page.total).then_some(next),
            prev_offset: (filter.offset > 0).then(|| filter.offset.saturating_sub(filter.limit)),
        },
        modules,
    })
}

fn filter_from(state: &AppState, params: SearchParams) -> ModuleSearch {
    ModuleSearch {
        query: params.q.filter(|q| !q.trim().is_empty()),
        namespace: params.namespace,
        provider: params.provider,
        verified: params.verified.filter(|v| *v),
        namespaces_in: params
            .trusted_namespaces
            .filter(|t| *t)
            .map(|_| state.config.trusted_namespaces.clone()),
        limit: params.limit.unwrap_or(DEFAULT_SEARCH_LIMIT),
        offset: params.offset.unwrap_or(0),
    }
}

/// GET /v1/modules/search
pub async fn search(
    _auth: RequireRead,
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> std::result::Result<Json<SearchResponse>, RegistryError> {
    if params.q.as_deref().is_none_or(|q| q.trim().is_empty()) {
        return Err(RegistryError::bad_request("Search query 'q' is required"));
    }
    let filter = filter_from(&state, params);
    Ok(Json(search_page(&state, filter)?))
}

/// GET /v1/modules
pub async fn list_modules(
    _auth: RequireRead,
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> std::result::Result<Json<SearchResponse>, RegistryError> {
    let filter = filter_from(&state, params);
    Ok(Json(search_page(&state, filter)?))
}

/// GET /v1/modules/{ns}
pub async fn list_namespace_modules(
    _auth: RequireRead,
    State(state): State<Arc<AppState>>,
    Path(namespace): Path<String>,
    Query(params): Query<SearchParams>,
) -> std::result::Result<Json<SearchResponse>, RegistryError> {
    let (_, namespace) = split_analytics_token(&namespace);
    if state.store.get_namespace_by_name(namespace)?.is_none() {
        return Err(RegistryError::not_found(format!("Namespace {namespace} not found")));
    }
    let mut filter = filter_from(&state, params);
    filter.namespace = Some(namespace.to_string());
    Ok(Json(search_page(&state, filter)?))
}

/// GET /v1/modules/{ns}/{mod}/{prov}/downloads/summary
pub async fn download_summary(
    _auth: RequireRead,
    State(state): State<Arc<AppState>>,
    Path((namespace, module, provider)): Path<(String, String, String)>,
) -> std::result::Result<Json<Value>, RegistryError> {
    let address = ModuleAddress::parse(&namespace, module, provider);
    let module_provider = address.resolve(&state)?;
    let summary = state.store.download_summary(module_provider.id, Utc::now())?;

    Ok(Json(json!({
        "data": {
            "type": "module-downloads-summary",
            "id": module_provider.address(),
            "attributes": {
                "week": summary.week,
                "month": summary.month,
                "year": summary.year,
                "total": summary.total,
            }
        }
    })))
}
