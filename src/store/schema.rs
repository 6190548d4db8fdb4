pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS namespaces (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    display_name TEXT,
    namespace_type TEXT NOT NULL DEFAULT 'none',
    created_at TEXT NOT NULL
);

-- Reusable URL templates shared by module-providers
CREATE TABLE IF NOT EXISTS git_providers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    base_url_template TEXT NOT NULL,
    clone_url_template TEXT NOT NULL,
    browse_url_template TEXT NOT NULL
);

-- Namespace deletion is refused while module-providers exist
CREATE TABLE IF NOT EXISTS module_providers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    namespace_id INTEGER NOT NULL REFERENCES namespaces(id) ON DELETE RESTRICT,
    module TEXT NOT NULL,
    provider TEXT NOT NULL,
    verified INTEGER NOT NULL DEFAULT 0,

    git_provider_id INTEGER REFERENCES git_providers(id) ON DELETE SET NULL,
    clone_url_template TEXT,
    browse_url_template TEXT,
    base_url_template TEXT,
    tag_format TEXT NOT NULL DEFAULT '{version}',
    git_path TEXT NOT NULL DEFAULT '',
    archive_git_path INTEGER NOT NULL DEFAULT 0,

    created_at TEXT NOT NULL,
    UNIQUE(namespace_id, module, provider)
);

-- Serialized ModuleDetails; shared by versions and their subtrees
CREATE TABLE IF NOT EXISTS module_details (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    content TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS module_versions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    module_provider_id INTEGER NOT NULL REFERENCES module_providers(id) ON DELETE CASCADE,
    version TEXT NOT NULL,
    beta INTEGER NOT NULL DEFAULT 0,
    published INTEGER NOT NULL DEFAULT 0,
    internal INTEGER NOT NULL DEFAULT 0,
    git_sha TEXT,
    git_tag TEXT,
    git_path TEXT,
    published_at TEXT,
    extraction_version INTEGER NOT NULL,
    details_id INTEGER NOT NULL REFERENCES module_details(id),
    description TEXT,
    owner TEXT,
    archive_ext TEXT,
    archive_sha256 TEXT,
    archive_size INTEGER,
    created_at TEXT NOT NULL,
    UNIQUE(module_provider_id, version)
);

CREATE INDEX IF NOT EXISTS idx_module_versions_published_at
    ON module_versions(published_at);

-- Submodules (modules/*) and examples (examples/*)
CREATE TABLE IF NOT EXISTS submodules (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    module_version_id INTEGER NOT NULL REFERENCES module_versions(id) ON DELETE CASCADE,
    kind TEXT NOT NULL,
    path TEXT NOT NULL,
    details_id INTEGER NOT NULL REFERENCES module_details(id),
    UNIQUE(module_version_id, path)
);

-- Old addresses of renamed module-providers
CREATE TABLE IF NOT EXISTS module_provider_redirects (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    namespace TEXT NOT NULL,
    module TEXT NOT NULL,
    provider TEXT NOT NULL,
    module_provider_id INTEGER NOT NULL REFERENCES module_providers(id) ON DELETE CASCADE,
    created_at TEXT NOT NULL,
    UNIQUE(namespace, module, provider)
);

-- Search index over module addresses and latest description
CREATE VIRTUAL TABLE IF NOT EXISTS module_search USING fts5(
    module_provider_id UNINDEXED,
    namespace,
    module,
    provider,
    description
);

CREATE TABLE IF NOT EXISTS providers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    namespace_id INTEGER NOT NULL REFERENCES namespaces(id) ON DELETE RESTRICT,
    name TEXT NOT NULL,
    description TEXT,
    created_at TEXT NOT NULL,
    UNIQUE(namespace_id, name)
);

CREATE TABLE IF NOT EXISTS gpg_keys (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    namespace_id INTEGER NOT NULL REFERENCES namespaces(id) ON DELETE CASCADE,
    key_id TEXT NOT NULL,
    ascii_armor TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(namespace_id, key_id)
);

CREATE TABLE IF NOT EXISTS provider_versions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    provider_id INTEGER NOT NULL REFERENCES providers(id) ON DELETE CASCADE,
    version TEXT NOT NULL,
    protocols TEXT NOT NULL,                -- JSON array
    gpg_key_id INTEGER REFERENCES gpg_keys(id) ON DELETE SET NULL,
    shasums_url TEXT NOT NULL,
    shasums_signature_url TEXT NOT NULL,
    published_at TEXT NOT NULL,
    UNIQUE(provider_id, version)
);

CREATE TABLE IF NOT EXISTS provider_binaries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    provider_version_id INTEGER NOT NULL REFERENCES provider_versions(id) ON DELETE CASCADE,
    os TEXT NOT NULL,
    arch TEXT NOT NULL,
    filename TEXT NOT NULL,
    download_url TEXT NOT NULL,
    shasum TEXT NOT NULL,
    UNIQUE(provider_version_id, os, arch)
);

-- Append-only. module_provider_id is a weak reference so counts survive deletes.
CREATE TABLE IF NOT EXISTS download_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    module_provider_id INTEGER,
    module_version_id INTEGER,
    version TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    analytics_token TEXT,
    auth_principal TEXT,
    terraform_version TEXT,
    environment TEXT,
    tombstoned INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_download_events_provider_time
    ON download_events(module_provider_id, timestamp);

CREATE TABLE IF NOT EXISTS user_groups (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    site_admin INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

-- level: 1 = READ, 2 = MODIFY, 3 = FULL
CREATE TABLE IF NOT EXISTS namespace_permissions (
    user_group_id INTEGER NOT NULL REFERENCES user_groups(id) ON DELETE CASCADE,
    namespace_id INTEGER NOT NULL REFERENCES namespaces(id) ON DELETE CASCADE,
    level INTEGER NOT NULL,
    PRIMARY KEY (user_group_id, namespace_id)
);

CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    external_id TEXT NOT NULL,
    auth_method TEXT NOT NULL,
    user_groups TEXT NOT NULL,              -- JSON array
    created_at TEXT NOT NULL,
    expires_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS audit_events (
    id TEXT PRIMARY KEY,
    timestamp TEXT NOT NULL,
    principal TEXT NOT NULL,
    action TEXT NOT NULL,
    object_type TEXT NOT NULL,
    object_id TEXT NOT NULL,
    old_value TEXT,
    new_value TEXT
);

CREATE INDEX IF NOT EXISTS idx_audit_events_timestamp ON audit_events(timestamp);
"#;
