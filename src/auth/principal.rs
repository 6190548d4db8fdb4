use serde::Serialize;

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::store::Store;
use crate::types::{AuthMethod, PermissionLevel};

/// The identity a request acts as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Principal {
    Anonymous,
    AdminApiKey,
    /// Static module upload key: may write modules, nothing else.
    UploadToken,
    /// Analytics auth key: read access, downloads attributed to `environment`.
    AnalyticsKey { environment: String },
    User {
        external_id: String,
        auth_method: AuthMethod,
        user_groups: Vec<String>,
    },
}

impl Principal {
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        !matches!(self, Self::Anonymous)
    }

    /// Name recorded in audit events and download rows.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Anonymous => "anonymous".to_string(),
            Self::AdminApiKey => "admin-api-key".to_string(),
            Self::UploadToken => "upload-api-key".to_string(),
            Self::AnalyticsKey { environment } => format!("analytics-key:{environment}"),
            Self::User {
                external_id,
                auth_method,
                ..
            } => format!("{}:{external_id}", auth_method.as_str()),
        }
    }

    /// Read access to the registry protocol and read-only terrareg endpoints.
    #[must_use]
    pub fn can_read(&self, config: &ServerConfig) -> bool {
        self.is_authenticated() || config.allow_unauthenticated_access
    }

    pub fn is_site_admin(&self, store: &dyn Store) -> Result<bool> {
        match self {
            Self::AdminApiKey => Ok(true),
            Self::User { user_groups, .. } => {
                Ok(store.resolve_group_access(user_groups, None)?.site_admin)
            }
            _ => Ok(false),
        }
    }

    /// Effective level on `namespace`: the highest over the user's groups,
    /// with site admin as the supremum.
    pub fn namespace_level(&self, store: &dyn Store, namespace: &str) -> Result<Option<PermissionLevel>> {
        match self {
            Self::AdminApiKey => Ok(Some(PermissionLevel::Full)),
            Self::User { user_groups, .. } => {
                let access = store.resolve_group_access(user_groups, Some(namespace))?;
                if access.site_admin {
                    Ok(Some(PermissionLevel::Full))
                } else {
                    Ok(access.level)
                }
            }
            _ => Ok(None),
        }
    }

    fn deny(&self, message: &str) -> Error {
        if self.is_authenticated() {
            Error::forbidden(message.to_string())
        } else {
            Error::unauthorized("Authentication required")
        }
    }

    pub fn require_site_admin(&self, store: &dyn Store) -> Result<()> {
        if self.is_site_admin(store)? {
            Ok(())
        } else {
            Err(self.deny("Site admin access required"))
        }
    }

    pub fn require_namespace(
        &self,
        store: &dyn Store,
        namespace: &str,
        required: PermissionLevel,
    ) -> Result<()> {
        match self.namespace_level(store, namespace)? {
            Some(level) if level.allows(required) => Ok(()),
            _ => Err(self.deny(&format!(
                "{} permission on namespace {namespace} required",
                required.as_str()
            ))),
        }
    }

    /// Module writes accept upload keys as well as MODIFY on the namespace.
    pub fn require_module_write(&self, store: &dyn Store, namespace: &str) -> Result<()> {
        if matches!(self, Self::UploadToken) {
            return Ok(());
        }
        self.require_namespace(store, namespace, PermissionLevel::Modify)
    }

    /// Read of unpublished or beta versions through the terrareg API.
    ///
    /// Never granted to anonymous callers, whatever the public read setting.
    pub fn require_namespace_read(&self, store: &dyn Store, namespace: &str) -> Result<()> {
        if matches!(self, Self::UploadToken | Self::AnalyticsKey { .. }) {
            return Ok(());
        }
        self.require_namespace(store, namespace, PermissionLevel::Read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{NamespaceRepository, SqliteStore, UserGroupRepository};
    use crate::types::NamespaceType;

    fn store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store.initialize().unwrap();
        store
    }

    fn user(groups: &[&str]) -> Principal {
        Principal::User {
            external_id: "alice".to_string(),
            auth_method: AuthMethod::Oidc,
            user_groups: groups.iter().map(|g| g.to_string()).collect(),
        }
    }

    #[test]
    fn test_effective_level_is_max_over_groups() {
        let store = store();
        let ns = store.create_namespace("acme", None, NamespaceType::None).unwrap();
        let readers = store.create_user_group("readers", false).unwrap();
        let writers = store.create_user_group("writers", false).unwrap();
        store
            .set_namespace_permission(readers.id, ns.id, PermissionLevel::Read)
            .unwrap();
        store
            .set_namespace_permission(writers.id, ns.id, PermissionLevel::Modify)
            .unwrap();

        let principal = user(&["readers", "writers"]);
        assert_eq!(
            principal.namespace_level(&store, "acme").unwrap(),
            Some(PermissionLevel::Modify)
        );
        assert!(principal.require_module_write(&store, "acme").is_ok());
        assert!(matches!(
            principal.require_namespace(&store, "acme", PermissionLevel::Full),
            Err(Error::Forbidden(_))
        ));
    }

    #[test]
    fn test_read_only_user_cannot_write() {
        let store = store();
        let ns = store.create_namespace("acme", None, NamespaceType::None).unwrap();
        let readers = store.create_user_group("readers", false).unwrap();
        store
            .set_namespace_permission(readers.id, ns.id, PermissionLevel::Read)
            .unwrap();

        let err = user(&["readers"]).require_module_write(&store, "acme").unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
    }

    #[test]
    fn test_site_admin_group_is_supremum() {
        let store = store();
        store.create_namespace("acme", None, NamespaceType::None).unwrap();
        store.create_user_group("admins", true).unwrap();

        let principal = user(&["admins"]);
        assert!(principal.is_site_admin(&store).unwrap());
        assert_eq!(
            principal.namespace_level(&store, "acme").unwrap(),
            Some(PermissionLevel::Full)
        );
    }

    #[test]
    fn test_anonymous_is_unauthorized_not_forbidden() {
        let store = store();
        let err = Principal::Anonymous
            .require_namespace(&store, "acme", PermissionLevel::Read)
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
        assert!(Principal::UploadToken.require_module_write(&store, "acme").is_ok());
        assert!(matches!(
            Principal::UploadToken.require_site_admin(&store),
            Err(Error::Forbidden(_))
        ));
    }

    #[test]
    fn test_unpublished_reads_need_namespace_read() {
        let store = store();
        let ns = store.create_namespace("acme", None, NamespaceType::None).unwrap();
        let readers = store.create_user_group("readers", false).unwrap();
        store
            .set_namespace_permission(readers.id, ns.id, PermissionLevel::Read)
            .unwrap();

        assert!(ServerConfig::default().allow_unauthenticated_access);
        assert!(matches!(
            Principal::Anonymous.require_namespace_read(&store, "acme"),
            Err(Error::Unauthorized(_))
        ));
        assert!(matches!(
            user(&[]).require_namespace_read(&store, "acme"),
            Err(Error::Forbidden(_))
        ));
        assert!(user(&["readers"]).require_namespace_read(&store, "acme").is_ok());
        assert!(Principal::UploadToken.require_namespace_read(&store, "acme").is_ok());
    }

    #[test]
    fn test_read_access_follows_configuration() {
        let mut config = ServerConfig::default();
        assert!(Principal::Anonymous.can_read(&config));
        config.allow_unauthenticated_access = false;
        assert!(!Principal::Anonymous.can_read(&config));
        assert!(Principal::AdminApiKey.can_read(&config));
    }
}
