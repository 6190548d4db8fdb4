//! Download analytics.

use chrono::Utc;

use crate::store::Store;
use crate::types::{ModuleProvider, ModuleVersion, NewDownloadEvent};

const TOKEN_SEPARATOR: &str = "__";

/// Splits an `{analytics_token}__{namespace}` path segment.
///
/// Namespaces cannot contain `__`, so the first separator always ends the token.
#[must_use]
pub fn split_analytics_token(segment: &str) -> (Option<&str>, &str) {
    match segment.split_once(TOKEN_SEPARATOR) {
        Some((token, namespace)) if !token.is_empty() && !namespace.is_empty() => {
            (Some(token), namespace)
        }
        _ => (None, segment),
    }
}

/// Who downloaded, as far as the request tells.
#[derive(Debug, Clone, Default)]
pub struct DownloadContext {
    pub analytics_token: Option<String>,
    pub auth_principal: Option<String>,
    pub terraform_version: Option<String>,
    pub environment: Option<String>,
}

/// Appends a download event. Failures are logged and never reach the caller.
pub fn record_download(
    store: &dyn Store,
    module_provider: &ModuleProvider,
    version: &ModuleVersion,
    context: DownloadContext,
) {
    let event = NewDownloadEvent {
        module_provider_id: module_provider.id,
        module_version_id: version.id,
        version: version.version.clone(),
        timestamp: Utc::now(),
        analytics_token: context.analytics_token,
        auth_principal: context.auth_principal,
        terraform_version: context.terraform_version,
        environment: context.environment,
    };
    if let Err(e) = store.record_download(&event) {
        tracing::warn!(
            "Failed to record download of {} {}: {}",
            module_provider.address(),
            version.version,
            e
        );
    }
}
