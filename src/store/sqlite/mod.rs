mod analytics;
mod auth;
mod modules;
mod namespaces;
mod providers;
mod versions;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;

use super::Store;
use super::schema::SCHEMA;
use crate::config::DatabaseLocation;
use crate::error::{Error, Result};

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open(location: &DatabaseLocation) -> Result<Self> {
        match location {
            DatabaseLocation::Memory => Self::open_in_memory(),
            DatabaseLocation::File(path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                Self::new(path)
            }
        }
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns a guard to the underlying database connection.
    pub fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn()
    }
}

impl Store for SqliteStore {
    fn initialize(&self) -> Result<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }
}

pub(super) fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::error!("Invalid datetime in database: '{}' - {}", s, e);
            Utc::now()
        })
}

pub(super) fn parse_optional_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.as_deref().map(parse_datetime)
}

/// Fixed-width so that string comparison in SQL matches time order.
pub(super) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(super) fn decode_json<T: serde::de::DeserializeOwned>(column: &str, raw: &str) -> Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| Error::internal(format!("corrupt {column} column in catalog: {e}")))
}

pub(super) fn encode_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::internal(format!("failed to encode: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::*;
    use crate::types::*;
    use chrono::Duration;
    use tempfile::TempDir;

    pub(crate) fn store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store.initialize().unwrap();
        store
    }

    fn module_provider(store: &SqliteStore, ns: &str, module: &str, provider: &str) -> ModuleProvider {
        let namespace = match store.get_namespace_by_name(ns).unwrap() {
            Some(n) => n,
            None => store.create_namespace(ns, None, NamespaceType::None).unwrap(),
        };
        store
            .create_module_provider(&NewModuleProvider {
                namespace_id: namespace.id,
                module: module.to_string(),
                provider: provider.to_string(),
                verified: false,
                git: GitConfig::default(),
            })
            .unwrap()
    }

    fn import(mp: &ModuleProvider, version: &str, publish: bool) -> ModuleImport {
        ModuleImport {
            module_provider_id: mp.id,
            version: version.to_string(),
            beta: version.contains('-'),
            git_sha: None,
            git_tag: None,
            git_path: None,
            extraction_version: 1,
            description: Some(format!("{} module", mp.module)),
            owner: None,
            archive: Some(ArchiveInfo {
                ext: "tar.gz".to_string(),
                sha256: "abc".to_string(),
                size: 3,
            }),
            details: ModuleDetails::default(),
            subtrees: vec![ImportedSubtree {
                kind: SubmoduleKind::Submodule,
                path: "modules/child".to_string(),
                details: ModuleDetails::default(),
            }],
            publish,
        }
    }

    #[test]
    fn test_initialize_creates_tables() {
        let temp = TempDir::new().unwrap();
        let store = SqliteStore::new(temp.path().join("test.db")).unwrap();
        store.initialize().unwrap();
        store.initialize().unwrap();

        let conn = store.conn();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        for table in [
            "namespaces",
            "module_providers",
            "module_versions",
            "module_details",
            "submodules",
            "module_provider_redirects",
            "providers",
            "provider_versions",
            "provider_binaries",
            "download_events",
            "user_groups",
            "namespace_permissions",
            "sessions",
            "audit_events",
        ] {
            assert!(tables.contains(&table.to_string()), "missing {table}");
        }
    }

    #[test]
    fn test_namespace_crud() {
        let store = store();
        let ns = store
            .create_namespace("acme", Some("Acme Corp"), NamespaceType::GithubOrg)
            .unwrap();
        assert_eq!(ns.name, "acme");

        let found = store.get_namespace_by_name("acme").unwrap().unwrap();
        assert_eq!(found.id, ns.id);
        assert_eq!(found.display_name.as_deref(), Some("Acme Corp"));
        assert_eq!(found.namespace_type, NamespaceType::GithubOrg);

        let updated = store.update_namespace(ns.id, None, NamespaceType::None).unwrap();
        assert_eq!(updated.display_name, None);

        let dup = store.create_namespace("acme", None, NamespaceType::None);
        assert_eq!(dup.unwrap_err().kind(), crate::error::ErrorKind::Conflict);

        assert!(store.delete_namespace(ns.id).unwrap());
        assert!(store.get_namespace_by_name("acme").unwrap().is_none());
    }

    #[test]
    fn test_namespace_delete_blocked_by_modules() {
        let store = store();
        let mp = module_provider(&store, "acme", "widget", "aws");
        let result = store.delete_namespace(mp.namespace_id);
        assert!(matches!(result, Err(Error::Conflict(_))));
    }

    #[test]
    fn test_module_provider_unique_triple() {
        let store = store();
        let mp = module_provider(&store, "acme", "widget", "aws");
        let dup = store.create_module_provider(&NewModuleProvider {
            namespace_id: mp.namespace_id,
            module: "widget".to_string(),
            provider: "aws".to_string(),
            verified: false,
            git: GitConfig::default(),
        });
        assert_eq!(dup.unwrap_err().kind(), crate::error::ErrorKind::Conflict);
    }

    #[test]
    fn test_commit_imports_and_publish() {
        let store = store();
        let mp = module_provider(&store, "acme", "widget", "aws");

        let results = store
            .commit_module_imports(&[import(&mp, "1.0.0", false)])
            .unwrap();
        let version = results.into_iter().next().unwrap().unwrap();
        assert!(!version.published);
        assert_eq!(version.archive_ext.as_deref(), Some("tar.gz"));

        let subtrees = store
            .list_subtrees(version.id, SubmoduleKind::Submodule)
            .unwrap();
        assert_eq!(subtrees.len(), 1);
        assert_eq!(subtrees[0].path, "modules/child");

        let published = store
            .publish_module_version(
                version.id,
                &PublishUpdate {
                    owner: Some("platform".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(published.published);
        assert!(published.published_at.is_some());
        assert_eq!(published.owner.as_deref(), Some("platform"));

        let unpublished = store.unpublish_module_version(version.id).unwrap();
        assert!(!unpublished.published);
    }

    #[test]
    fn test_reimport_replaces_subtrees_without_duplicates() {
        let store = store();
        let mp = module_provider(&store, "acme", "widget", "aws");
        store.commit_module_imports(&[import(&mp, "1.0.0", false)]).unwrap();
        store.commit_module_imports(&[import(&mp, "1.0.0", false)]).unwrap();

        let versions = store.list_module_versions(mp.id).unwrap();
        assert_eq!(versions.len(), 1);
        let subtrees = store
            .list_subtrees(versions[0].id, SubmoduleKind::Submodule)
            .unwrap();
        assert_eq!(subtrees.len(), 1);

        let details: i64 = store
            .conn()
            .query_row("SELECT COUNT(*) FROM module_details", [], |row| row.get(0))
            .unwrap();
        assert_eq!(details, 2);
    }

    #[test]
    fn test_savepoint_isolates_failing_entry() {
        let store = store();
        let mp = module_provider(&store, "acme", "widget", "aws");

        let mut broken = import(&mp, "1.0.1", false);
        broken.module_provider_id = 9999;

        let results = store
            .commit_module_imports(&[
                import(&mp, "1.0.0", false),
                broken,
                import(&mp, "1.0.2", false),
            ])
            .unwrap();
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert!(results[2].is_ok());

        let versions: Vec<String> = store
            .list_module_versions(mp.id)
            .unwrap()
            .into_iter()
            .map(|v| v.version)
            .collect();
        assert_eq!(versions.len(), 2);
        assert!(versions.contains(&"1.0.0".to_string()));
        assert!(versions.contains(&"1.0.2".to_string()));
    }

    #[test]
    fn test_rename_creates_redirect() {
        let store = store();
        let mp = module_provider(&store, "ns1", "m", "p");
        let ns2 = store.create_namespace("ns2", None, NamespaceType::None).unwrap();

        let renamed = store.rename_module_provider(mp.id, ns2.id, "m", "p").unwrap();
        assert_eq!(renamed.namespace, "ns2");
        assert!(store.find_module_provider("ns1", "m", "p").unwrap().is_none());

        let redirect = store.find_redirect("ns1", "m", "p").unwrap().unwrap();
        assert_eq!(redirect.module_provider_id, mp.id);
        assert_eq!(store.list_redirects(mp.id).unwrap().len(), 1);

        assert!(store.delete_redirect(redirect.id).unwrap());
        assert!(store.find_redirect("ns1", "m", "p").unwrap().is_none());
    }

    #[test]
    fn test_search_only_returns_public_modules() {
        let store = store();
        let visible = module_provider(&store, "acme", "network", "aws");
        let hidden = module_provider(&store, "acme", "storage", "aws");
        store.commit_module_imports(&[import(&visible, "1.0.0", true)]).unwrap();
        store.commit_module_imports(&[import(&hidden, "1.0.0", false)]).unwrap();

        let page = store
            .search_module_providers(&ModuleSearch {
                limit: 10,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.module_providers[0].module, "network");

        let page = store
            .search_module_providers(&ModuleSearch {
                query: Some("netw".to_string()),
                limit: 10,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.total, 1);

        let page = store
            .search_module_providers(&ModuleSearch {
                query: Some("storage".to_string()),
                limit: 10,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.total, 0);
    }

    #[test]
    fn test_delete_version_tombstones_downloads() {
        let store = store();
        let mp = module_provider(&store, "acme", "widget", "aws");
        let version = store
            .commit_module_imports(&[import(&mp, "1.0.0", true)])
            .unwrap()
            .remove(0)
            .unwrap();

        let now = Utc::now();
        for token in [Some("team-a"), None] {
            store
                .record_download(&NewDownloadEvent {
                    module_provider_id: mp.id,
                    module_version_id: version.id,
                    version: version.version.clone(),
                    timestamp: now,
                    analytics_token: token.map(str::to_string),
                    auth_principal: None,
                    terraform_version: Some("1.6.0".to_string()),
                    environment: None,
                })
                .unwrap();
        }

        let before = store.download_summary(mp.id, now).unwrap();
        assert_eq!(before.total, 2);
        assert_eq!(before.authenticated, 1);
        assert_eq!(before.anonymous, 1);

        assert!(store.delete_module_version(version.id).unwrap());
        let after = store.download_summary(mp.id, now).unwrap();
        assert_eq!(after.total, before.total);

        let tombstoned: i64 = store
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM download_events WHERE tombstoned = 1",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tombstoned, 2);
    }

    #[test]
    fn test_download_summary_windows() {
        let store = store();
        let mp = module_provider(&store, "acme", "widget", "aws");
        let version = store
            .commit_module_imports(&[import(&mp, "1.0.0", true)])
            .unwrap()
            .remove(0)
            .unwrap();
        let now = Utc::now();
        for days in [1, 20, 200, 800] {
            store
                .record_download(&NewDownloadEvent {
                    module_provider_id: mp.id,
                    module_version_id: version.id,
                    version: "1.0.0".to_string(),
                    timestamp: now - Duration::days(days),
                    analytics_token: None,
                    auth_principal: None,
                    terraform_version: None,
                    environment: None,
                })
                .unwrap();
        }
        let summary = store.download_summary(mp.id, now).unwrap();
        assert_eq!(summary.week, 1);
        assert_eq!(summary.month, 2);
        assert_eq!(summary.year, 3);
        assert_eq!(summary.total, 4);

        let (top, count) = store.most_downloaded_this_week(now).unwrap().unwrap();
        assert_eq!(top.id, mp.id);
        assert_eq!(count, 1);
    }

    #[test]
    fn test_group_access_is_max_over_groups() {
        let store = store();
        let ns = store.create_namespace("acme", None, NamespaceType::None).unwrap();
        let readers = store.create_user_group("readers", false).unwrap();
        let writers = store.create_user_group("writers", false).unwrap();
        store.create_user_group("admins", true).unwrap();
        store
            .set_namespace_permission(readers.id, ns.id, PermissionLevel::Read)
            .unwrap();
        store
            .set_namespace_permission(writers.id, ns.id, PermissionLevel::Modify)
            .unwrap();

        let access = store
            .resolve_group_access(&["readers".to_string(), "writers".to_string()], Some("acme"))
            .unwrap();
        assert!(!access.site_admin);
        assert_eq!(access.level, Some(PermissionLevel::Modify));

        let access = store
            .resolve_group_access(&["admins".to_string()], Some("acme"))
            .unwrap();
        assert!(access.site_admin);
        assert_eq!(access.level, None);

        let access = store.resolve_group_access(&[], Some("acme")).unwrap();
        assert_eq!(access, GroupAccess::default());
    }

    #[test]
    fn test_session_expiry() {
        let store = store();
        let now = Utc::now();
        store
            .create_session(&Session {
                id: "s1".to_string(),
                external_id: "alice".to_string(),
                auth_method: AuthMethod::Oidc,
                user_groups: vec!["writers".to_string()],
                created_at: now,
                expires_at: now + Duration::seconds(60),
            })
            .unwrap();

        let session = store.get_session("s1", now).unwrap().unwrap();
        assert_eq!(session.user_groups, vec!["writers"]);
        assert!(store.get_session("s1", now + Duration::seconds(120)).unwrap().is_none());
        assert_eq!(store.purge_expired_sessions(now + Duration::seconds(120)).unwrap(), 1);
    }

    #[test]
    fn test_provider_version_with_binaries() {
        let store = store();
        let ns = store.create_namespace("hashicorp", None, NamespaceType::None).unwrap();
        let provider = store.create_provider(ns.id, "aws", None).unwrap();
        let key = store.create_gpg_key(ns.id, "ABCDEF", "-----BEGIN PGP-----").unwrap();

        let version = store
            .create_provider_version(
                provider.id,
                &NewProviderVersion {
                    version: "4.0.0".to_string(),
                    protocols: vec!["5.0".to_string()],
                    gpg_key_id: Some(key.id),
                    shasums_url: "https://example.com/SHA256SUMS".to_string(),
                    shasums_signature_url: "https://example.com/SHA256SUMS.sig".to_string(),
                },
                &[NewProviderBinary {
                    os: "linux".to_string(),
                    arch: "arm64".to_string(),
                    filename: "terraform-provider-aws_4.0.0_linux_arm64.zip".to_string(),
                    download_url: "https://example.com/aws_linux_arm64.zip".to_string(),
                    shasum: "deadbeef".to_string(),
                }],
            )
            .unwrap();
        assert_eq!(version.protocols, vec!["5.0"]);

        assert!(store.find_provider_binary(version.id, "linux", "arm64").unwrap().is_some());
        assert!(store.find_provider_binary(version.id, "linux", "amd64").unwrap().is_none());
        assert!(store.delete_namespace(ns.id).is_err());
    }

    #[test]
    fn test_audit_events_are_listed_newest_first() {
        let store = store();
        let now = Utc::now();
        for (i, action) in ["NAMESPACE_CREATE", "MODULE_PROVIDER_CREATE"].iter().enumerate() {
            store
                .record_audit_event(&AuditEvent {
                    id: format!("evt-{i}"),
                    timestamp: now + Duration::seconds(i as i64),
                    principal: "admin".to_string(),
                    action: action.to_string(),
                    object_type: "namespace".to_string(),
                    object_id: "acme".to_string(),
                    old_value: None,
                    new_value: None,
                })
                .unwrap();
        }
        let (events, total) = store.list_audit_events(0, 10).unwrap();
        assert_eq!(total, 2);
        assert_eq!(events[0].action, "MODULE_PROVIDER_CREATE");
    }
}
