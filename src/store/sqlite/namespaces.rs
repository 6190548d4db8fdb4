use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::{SqliteStore, format_datetime, parse_datetime};
use crate::error::{Error, Result};
use crate::store::{GitProviderRepository, NamespaceRepository, NewGitProvider};
use crate::types::*;

const NAMESPACE_COLUMNS: &str = "id, name, display_name, namespace_type, created_at";

fn namespace_from_row(row: &Row<'_>) -> rusqlite::Result<Namespace> {
    let namespace_type: String = row.get(3)?;
    Ok(Namespace {
        id: row.get(0)?,
        name: row.get(1)?,
        display_name: row.get(2)?,
        namespace_type: NamespaceType::parse(&namespace_type).unwrap_or_default(),
        created_at: parse_datetime(&row.get::<_, String>(4)?),
    })
}

pub(super) fn query_namespace(conn: &Connection, id: i64) -> rusqlite::Result<Option<Namespace>> {
    conn.query_row(
        &format!("SELECT {NAMESPACE_COLUMNS} FROM namespaces WHERE id = ?1"),
        params![id],
        namespace_from_row,
    )
    .optional()
}

impl NamespaceRepository for SqliteStore {
    fn create_namespace(
        &self,
        name: &str,
        display_name: Option<&str>,
        namespace_type: NamespaceType,
    ) -> Result<Namespace> {
        let created_at = Utc::now();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO namespaces (name, display_name, namespace_type, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                name,
                display_name,
                namespace_type.as_str(),
                format_datetime(&created_at)
            ],
        )?;
        Ok(Namespace {
            id: conn.last_insert_rowid(),
            name: name.to_string(),
            display_name: display_name.map(str::to_string),
            namespace_type,
            created_at,
        })
    }

    fn get_namespace(&self, id: i64) -> Result<Option<Namespace>> {
        query_namespace(&self.conn(), id).map_err(Error::from)
    }

    fn get_namespace_by_name(&self, name: &str) -> Result<Option<Namespace>> {
        self.conn()
            .query_row(
                &format!("SELECT {NAMESPACE_COLUMNS} FROM namespaces WHERE name = ?1"),
                params![name],
                namespace_from_row,
            )
            .optional()
            .map_err(Error::from)
    }

    fn list_namespaces(&self, offset: u32, limit: u32) -> Result<Vec<Namespace>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {NAMESPACE_COLUMNS} FROM namespaces ORDER BY name LIMIT ?1 OFFSET ?2"
        ))?;
        let rows = stmt.query_map(params![limit, offset], namespace_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn update_namespace(
        &self,
        id: i64,
        display_name: Option<&str>,
        namespace_type: NamespaceType,
    ) -> Result<Namespace> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE namespaces SET display_name = ?1, namespace_type = ?2 WHERE id = ?3",
            params![display_name, namespace_type.as_str(), id],
        )?;
        if changed == 0 {
            return Err(Error::not_found("Namespace not found"));
        }
        query_namespace(&conn, id)?.ok_or_else(|| Error::not_found("Namespace not found"))
    }

    fn delete_namespace(&self, id: i64) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let owned: i64 = tx.query_row(
            "SELECT (SELECT COUNT(*) FROM module_providers WHERE namespace_id = ?1)
                  + (SELECT COUNT(*) FROM providers WHERE namespace_id = ?1)",
            params![id],
            |row| row.get(0),
        )?;
        if owned > 0 {
            return Err(Error::conflict(
                "Namespace cannot be deleted while it contains modules or providers",
            ));
        }

        let deleted = tx.execute("DELETE FROM namespaces WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(deleted > 0)
    }
}

fn git_provider_from_row(row: &Row<'_>) -> rusqlite::Result<GitProvider> {
    Ok(GitProvider {
        id: row.get(0)?,
        name: row.get(1)?,
        base_url_template: row.get(2)?,
        clone_url_template: row.get(3)?,
        browse_url_template: row.get(4)?,
    })
}

impl GitProviderRepository for SqliteStore {
    fn create_git_provider(&self, provider: &NewGitProvider) -> Result<GitProvider> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO git_providers (name, base_url_template, clone_url_template, browse_url_template)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                provider.name,
                provider.base_url_template,
                provider.clone_url_template,
                provider.browse_url_template
            ],
        )?;
        Ok(GitProvider {
            id: conn.last_insert_rowid(),
            name: provider.name.clone(),
            base_url_template: provider.base_url_template.clone(),
            clone_url_template: provider.clone_url_template.clone(),
            browse_url_template: provider.browse_url_template.clone(),
        })
    }

    fn get_git_provider(&self, id: i64) -> Result<Option<GitProvider>> {
        self.conn()
            .query_row(
                "SELECT id, name, base_url_template, clone_url_template, browse_url_template
                 FROM git_providers WHERE id = ?1",
                params![id],
                git_provider_from_row,
            )
            .optional()
            .map_err(Error::from)
    }

    fn list_git_providers(&self) -> Result<Vec<GitProvider>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, base_url_template, clone_url_template, browse_url_template
             FROM git_providers ORDER BY name",
        )?;
        let rows = stmt.query_map([], git_provider_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }
}
