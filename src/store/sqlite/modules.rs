use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};

use super::{SqliteStore, format_datetime, parse_datetime};
use crate::error::{Error, Result};
use crate::store::{ModuleProviderRepository, ModuleSearch, SearchPage};
use crate::types::*;

const MODULE_PROVIDER_SELECT: &str = "SELECT mp.id, mp.namespace_id, n.name, mp.module, mp.provider,
        mp.verified, mp.git_provider_id, mp.clone_url_template, mp.browse_url_template,
        mp.base_url_template, mp.tag_format, mp.git_path, mp.archive_git_path, mp.created_at
    FROM module_providers mp JOIN namespaces n ON n.id = mp.namespace_id";

pub(super) fn module_provider_from_row(row: &Row<'_>) -> rusqlite::Result<ModuleProvider> {
    Ok(ModuleProvider {
        id: row.get(0)?,
        namespace_id: row.get(1)?,
        namespace: row.get(2)?,
        module: row.get(3)?,
        provider: row.get(4)?,
        verified: row.get(5)?,
        git: GitConfig {
            git_provider_id: row.get(6)?,
            clone_url_template: row.get(7)?,
            browse_url_template: row.get(8)?,
            base_url_template: row.get(9)?,
            tag_format: row.get(10)?,
            path: row.get(11)?,
            archive_git_path: row.get(12)?,
        },
        created_at: parse_datetime(&row.get::<_, String>(13)?),
    })
}

pub(super) fn query_module_provider(
    conn: &Connection,
    id: i64,
) -> rusqlite::Result<Option<ModuleProvider>> {
    conn.query_row(
        &format!("{MODULE_PROVIDER_SELECT} WHERE mp.id = ?1"),
        params![id],
        module_provider_from_row,
    )
    .optional()
}

fn query_module_provider_by_address(
    conn: &Connection,
    namespace: &str,
    module: &str,
    provider: &str,
) -> rusqlite::Result<Option<ModuleProvider>> {
    conn.query_row(
        &format!("{MODULE_PROVIDER_SELECT} WHERE n.name = ?1 AND mp.module = ?2 AND mp.provider = ?3"),
        params![namespace, module, provider],
        module_provider_from_row,
    )
    .optional()
}

fn redirect_from_row(row: &Row<'_>) -> rusqlite::Result<ModuleProviderRedirect> {
    Ok(ModuleProviderRedirect {
        id: row.get(0)?,
        namespace: row.get(1)?,
        module: row.get(2)?,
        provider: row.get(3)?,
        module_provider_id: row.get(4)?,
        created_at: parse_datetime(&row.get::<_, String>(5)?),
    })
}

/// Turns free text into an FTS5 prefix query; `None` when nothing searchable remains.
fn fts_query(text: &str) -> Option<String> {
    let terms: Vec<String> = text
        .split_whitespace()
        .map(|term| {
            term.chars()
                .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
                .collect::<String>()
        })
        .filter(|term| !term.is_empty())
        .map(|term| format!("\"{term}\"*"))
        .collect();
    (!terms.is_empty()).then(|| terms.join(" "))
}

fn search_conditions(filter: &ModuleSearch) -> (String, Vec<Value>) {
    let mut sql = String::from(
        " WHERE EXISTS (SELECT 1 FROM module_versions v
              WHERE v.module_provider_id = mp.id AND v.published = 1 AND v.beta = 0)",
    );
    let mut values = Vec::new();

    if let Some(namespace) = &filter.namespace {
        sql.push_str(" AND n.name = ?");
        values.push(Value::Text(namespace.clone()));
    }
    if let Some(provider) = &filter.provider {
        sql.push_str(" AND mp.provider = ?");
        values.push(Value::Text(provider.clone()));
    }
    if let Some(verified) = filter.verified {
        sql.push_str(" AND mp.verified = ?");
        values.push(Value::Integer(i64::from(verified)));
    }
    if let Some(namespaces) = &filter.namespaces_in {
        if namespaces.is_empty() {
            sql.push_str(" AND 0");
        } else {
            let placeholders = vec!["?"; namespaces.len()].join(", ");
            sql.push_str(&format!(" AND n.name IN ({placeholders})"));
            values.extend(namespaces.iter().cloned().map(Value::Text));
        }
    }
    if let Some(query) = filter.query.as_deref().and_then(fts_query) {
        sql.push_str(
            " AND mp.id IN (SELECT module_provider_id FROM module_search WHERE module_search MATCH ?)",
        );
        values.push(Value::Text(query));
    }

    (sql, values)
}

impl ModuleProviderRepository for SqliteStore {
    fn create_module_provider(&self, new: &NewModuleProvider) -> Result<ModuleProvider> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let namespace: String = tx
            .query_row(
                "SELECT name FROM namespaces WHERE id = ?1",
                params![new.namespace_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| Error::not_found("Namespace not found"))?;

        tx.execute(
            "INSERT INTO module_providers (namespace_id, module, provider, verified,
                git_provider_id, clone_url_template, browse_url_template, base_url_template,
                tag_format, git_path, archive_git_path, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                new.namespace_id,
                new.module,
                new.provider,
                new.verified,
                new.git.git_provider_id,
                new.git.clone_url_template,
                new.git.browse_url_template,
                new.git.base_url_template,
                new.git.tag_format,
                new.git.path,
                new.git.archive_git_path,
                format_datetime(&Utc::now()),
            ],
        )?;
        let id = tx.last_insert_rowid();

        // A real module-provider now owns this address.
        tx.execute(
            "DELETE FROM module_provider_redirects WHERE namespace = ?1 AND module = ?2 AND provider = ?3",
            params![namespace, new.module, new.provider],
        )?;
        tx.execute(
            "INSERT INTO module_search (module_provider_id, namespace, module, provider, description)
             VALUES (?1, ?2, ?3, ?4, '')",
            params![id, namespace, new.module, new.provider],
        )?;

        let created = query_module_provider(&tx, id)?
            .ok_or_else(|| Error::internal("module provider vanished during insert"))?;
        tx.commit()?;
        Ok(created)
    }

    fn get_module_provider(&self, id: i64) -> Result<Option<ModuleProvider>> {
        query_module_provider(&self.conn(), id).map_err(Error::from)
    }

    fn find_module_provider(
        &self,
        namespace: &str,
        module: &str,
        provider: &str,
    ) -> Result<Option<ModuleProvider>> {
        query_module_provider_by_address(&self.conn(), namespace, module, provider)
            .map_err(Error::from)
    }

    fn list_namespace_module_providers(&self, namespace_id: i64) -> Result<Vec<ModuleProvider>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "{MODULE_PROVIDER_SELECT} WHERE mp.namespace_id = ?1 ORDER BY mp.module, mp.provider"
        ))?;
        let rows = stmt.query_map(params![namespace_id], module_provider_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn search_module_providers(&self, filter: &ModuleSearch) -> Result<SearchPage> {
        let (conditions, values) = search_conditions(filter);
        let conn = self.conn();

        let total: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM module_providers mp JOIN namespaces n ON n.id = mp.namespace_id{conditions}"
            ),
            params_from_iter(values.iter()),
            |row| row.get(0),
        )?;

        let mut page_values = values;
        page_values.push(Value::Integer(i64::from(filter.limit)));
        page_values.push(Value::Integer(i64::from(filter.offset)));

        let mut stmt = conn.prepare(&format!(
            "{MODULE_PROVIDER_SELECT}{conditions}
             ORDER BY mp.verified DESC, n.name, mp.module, mp.provider LIMIT ? OFFSET ?"
        ))?;
        let rows = stmt.query_map(params_from_iter(page_values.iter()), module_provider_from_row)?;
        let module_providers = rows.collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(SearchPage {
            module_providers,
            total: u64::try_from(total).unwrap_or_default(),
        })
    }

    fn update_module_provider_settings(
        &self,
        id: i64,
        verified: bool,
        git: &GitConfig,
    ) -> Result<ModuleProvider> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE module_providers SET verified = ?1, git_provider_id = ?2,
                clone_url_template = ?3, browse_url_template = ?4, base_url_template = ?5,
                tag_format = ?6, git_path = ?7, archive_git_path = ?8
             WHERE id = ?9",
            params![
                verified,
                git.git_provider_id,
                git.clone_url_template,
                git.browse_url_template,
                git.base_url_template,
                git.tag_format,
                git.path,
                git.archive_git_path,
                id,
            ],
        )?;
        if changed == 0 {
            return Err(Error::not_found("Module provider not found"));
        }
        query_module_provider(&conn, id)?.ok_or_else(|| Error::not_found("Module provider not found"))
    }

    fn rename_module_provider(
        &self,
        id: i64,
        namespace_id: i64,
        module: &str,
        provider: &str,
    ) -> Result<ModuleProvider> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let current = query_module_provider(&tx, id)?
            .ok_or_else(|| Error::not_found("Module provider not found"))?;
        if current.namespace_id == namespace_id
            && current.module == module
            && current.provider == provider
        {
            return Ok(current);
        }

        let namespace: String = tx
            .query_row(
                "SELECT name FROM namespaces WHERE id = ?1",
                params![namespace_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| Error::not_found("Namespace not found"))?;

        if query_module_provider_by_address(&tx, &namespace, module, provider)?.is_some() {
            return Err(Error::conflict(format!(
                "Module provider {namespace}/{module}/{provider} already exists"
            )));
        }

        tx.execute(
            "UPDATE module_providers SET namespace_id = ?1, module = ?2, provider = ?3 WHERE id = ?4",
            params![namespace_id, module, provider, id],
        )?;
        tx.execute(
            "DELETE FROM module_provider_redirects WHERE namespace = ?1 AND module = ?2 AND provider = ?3",
            params![namespace, module, provider],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO module_provider_redirects
                (namespace, module, provider, module_provider_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                current.namespace,
                current.module,
                current.provider,
                id,
                format_datetime(&Utc::now())
            ],
        )?;
        tx.execute(
            "UPDATE module_search SET namespace = ?1, module = ?2, provider = ?3
             WHERE module_provider_id = ?4",
            params![namespace, module, provider, id],
        )?;

        let renamed = query_module_provider(&tx, id)?
            .ok_or_else(|| Error::internal("module provider vanished during rename"))?;
        tx.commit()?;
        Ok(renamed)
    }

    fn delete_module_provider(&self, id: i64) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let detail_ids: Vec<i64> = {
            let mut stmt = tx.prepare(
                "SELECT details_id FROM module_versions WHERE module_provider_id = ?1
                 UNION
                 SELECT s.details_id FROM submodules s
                    JOIN module_versions v ON v.id = s.module_version_id
                 WHERE v.module_provider_id = ?1",
            )?;
            let rows = stmt.query_map(params![id], |row| row.get(0))?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };

        tx.execute(
            "UPDATE download_events SET module_version_id = NULL, tombstoned = 1
             WHERE module_provider_id = ?1 AND tombstoned = 0",
            params![id],
        )?;
        tx.execute(
            "DELETE FROM module_search WHERE module_provider_id = ?1",
            params![id],
        )?;
        let deleted = tx.execute("DELETE FROM module_providers WHERE id = ?1", params![id])?;
        for details_id in detail_ids {
            tx.execute("DELETE FROM module_details WHERE id = ?1", params![details_id])?;
        }

        tx.commit()?;
        Ok(deleted > 0)
    }

    fn find_redirect(
        &self,
        namespace: &str,
        module: &str,
        provider: &str,
    ) -> Result<Option<ModuleProviderRedirect>> {
        self.conn()
            .query_row(
                "SELECT id, namespace, module, provider, module_provider_id, created_at
                 FROM module_provider_redirects
                 WHERE namespace = ?1 AND module = ?2 AND provider = ?3",
                params![namespace, module, provider],
                redirect_from_row,
            )
            .optional()
            .map_err(Error::from)
    }

    fn list_redirects(&self, module_provider_id: i64) -> Result<Vec<ModuleProviderRedirect>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, namespace, module, provider, module_provider_id, created_at
             FROM module_provider_redirects WHERE module_provider_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![module_provider_id], redirect_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn delete_redirect(&self, id: i64) -> Result<bool> {
        let deleted = self.conn().execute(
            "DELETE FROM module_provider_redirects WHERE id = ?1",
            params![id],
        )?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fts_query_sanitizes_input() {
        assert_eq!(fts_query("aws vpc").as_deref(), Some("\"aws\"* \"vpc\"*"));
        assert_eq!(fts_query("net\"work").as_deref(), Some("\"network\"*"));
        assert_eq!(fts_query("  \" * ").as_deref(), None);
    }
}
