use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params};

use super::{
    SqliteStore, decode_json, encode_json, format_datetime, parse_datetime, parse_optional_datetime,
};
use crate::error::{Error, Result};
use crate::store::{ModuleImport, ModuleVersionRepository, PublishUpdate};
use crate::types::*;

pub(super) const VERSION_COLUMNS: &str = "id, module_provider_id, version, beta, published, internal,
    git_sha, git_tag, git_path, published_at, extraction_version, details_id, description,
    owner, archive_ext, archive_sha256, archive_size, created_at";

pub(super) fn version_from_row(row: &Row<'_>) -> rusqlite::Result<ModuleVersion> {
    Ok(ModuleVersion {
        id: row.get(0)?,
        module_provider_id: row.get(1)?,
        version: row.get(2)?,
        beta: row.get(3)?,
        published: row.get(4)?,
        internal: row.get(5)?,
        git_sha: row.get(6)?,
        git_tag: row.get(7)?,
        git_path: row.get(8)?,
        published_at: parse_optional_datetime(row.get(9)?),
        extraction_version: row.get(10)?,
        details_id: row.get(11)?,
        description: row.get(12)?,
        owner: row.get(13)?,
        archive_ext: row.get(14)?,
        archive_sha256: row.get(15)?,
        archive_size: row.get(16)?,
        created_at: parse_datetime(&row.get::<_, String>(17)?),
    })
}

pub(super) fn query_version(conn: &Connection, id: i64) -> rusqlite::Result<Option<ModuleVersion>> {
    conn.query_row(
        &format!("SELECT {VERSION_COLUMNS} FROM module_versions WHERE id = ?1"),
        params![id],
        version_from_row,
    )
    .optional()
}

fn query_version_by_number(
    conn: &Connection,
    module_provider_id: i64,
    version: &str,
) -> rusqlite::Result<Option<ModuleVersion>> {
    conn.query_row(
        &format!(
            "SELECT {VERSION_COLUMNS} FROM module_versions
             WHERE module_provider_id = ?1 AND version = ?2"
        ),
        params![module_provider_id, version],
        version_from_row,
    )
    .optional()
}

fn submodule_from_row(row: &Row<'_>) -> rusqlite::Result<Submodule> {
    let kind: String = row.get(2)?;
    Ok(Submodule {
        id: row.get(0)?,
        module_version_id: row.get(1)?,
        kind: SubmoduleKind::parse(&kind).unwrap_or(SubmoduleKind::Submodule),
        path: row.get(3)?,
        details_id: row.get(4)?,
    })
}

fn insert_details(conn: &Connection, details: &ModuleDetails) -> Result<i64> {
    conn.execute(
        "INSERT INTO module_details (content) VALUES (?1)",
        params![encode_json(details)?],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Details rows owned by a version: its own plus those of its subtrees.
fn owned_detail_ids(conn: &Connection, version_id: i64) -> rusqlite::Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT details_id FROM module_versions WHERE id = ?1
         UNION
         SELECT details_id FROM submodules WHERE module_version_id = ?1",
    )?;
    let rows = stmt.query_map(params![version_id], |row| row.get(0))?;
    rows.collect()
}

fn delete_details(conn: &Connection, ids: &[i64]) -> rusqlite::Result<()> {
    for id in ids {
        conn.execute("DELETE FROM module_details WHERE id = ?1", params![id])?;
    }
    Ok(())
}

fn refresh_search_description(
    conn: &Connection,
    module_provider_id: i64,
    description: Option<&str>,
) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE module_search SET description = ?1 WHERE module_provider_id = ?2",
        params![description.unwrap_or_default(), module_provider_id],
    )?;
    Ok(())
}

fn persist_import(conn: &Connection, import: &ModuleImport) -> Result<ModuleVersion> {
    let existing = query_version_by_number(conn, import.module_provider_id, &import.version)?;
    let details_id = insert_details(conn, &import.details)?;
    let (archive_ext, archive_sha256, archive_size) = match &import.archive {
        Some(a) => (Some(a.ext.as_str()), Some(a.sha256.as_str()), Some(a.size)),
        None => (None, None, None),
    };

    let version_id = match existing {
        Some(existing) => {
            let stale = owned_detail_ids(conn, existing.id)?;
            conn.execute(
                "DELETE FROM submodules WHERE module_version_id = ?1",
                params![existing.id],
            )?;
            conn.execute(
                "UPDATE module_versions SET beta = ?1, git_sha = ?2, git_tag = ?3, git_path = ?4,
                    extraction_version = ?5, details_id = ?6, description = ?7, owner = ?8,
                    archive_ext = ?9, archive_sha256 = ?10, archive_size = ?11
                 WHERE id = ?12",
                params![
                    import.beta,
                    import.git_sha,
                    import.git_tag,
                    import.git_path,
                    import.extraction_version,
                    details_id,
                    import.description,
                    import.owner,
                    archive_ext,
                    archive_sha256,
                    archive_size,
                    existing.id,
                ],
            )?;
            delete_details(conn, &stale)?;
            existing.id
        }
        None => {
            conn.execute(
                "INSERT INTO module_versions (module_provider_id, version, beta, published,
                    internal, git_sha, git_tag, git_path, extraction_version, details_id,
                    description, owner, archive_ext, archive_sha256, archive_size, created_at)
                 VALUES (?1, ?2, ?3, 0, 0, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    import.module_provider_id,
                    import.version,
                    import.beta,
                    import.git_sha,
                    import.git_tag,
                    import.git_path,
                    import.extraction_version,
                    details_id,
                    import.description,
                    import.owner,
                    archive_ext,
                    archive_sha256,
                    archive_size,
                    format_datetime(&Utc::now()),
                ],
            )?;
            conn.last_insert_rowid()
        }
    };

    for subtree in &import.subtrees {
        let subtree_details = insert_details(conn, &subtree.details)?;
        conn.execute(
            "INSERT INTO submodules (module_version_id, kind, path, details_id)
             VALUES (?1, ?2, ?3, ?4)",
            params![version_id, subtree.kind.as_str(), subtree.path, subtree_details],
        )?;
    }

    if import.publish {
        conn.execute(
            "UPDATE module_versions SET published = 1,
                published_at = COALESCE(published_at, ?1)
             WHERE id = ?2",
            params![format_datetime(&Utc::now()), version_id],
        )?;
        refresh_search_description(conn, import.module_provider_id, import.description.as_deref())?;
    }

    query_version(conn, version_id)?
        .ok_or_else(|| Error::internal("module version vanished during import"))
}

fn commit_one(tx: &mut Transaction<'_>, import: &ModuleImport) -> Result<ModuleVersion> {
    let savepoint = tx.savepoint()?;
    let version = persist_import(&savepoint, import)?;
    savepoint.commit()?;
    Ok(version)
}

impl ModuleVersionRepository for SqliteStore {
    fn get_module_version(
        &self,
        module_provider_id: i64,
        version: &str,
    ) -> Result<Option<ModuleVersion>> {
        query_version_by_number(&self.conn(), module_provider_id, version).map_err(Error::from)
    }

    fn get_module_version_by_id(&self, id: i64) -> Result<Option<ModuleVersion>> {
        query_version(&self.conn(), id).map_err(Error::from)
    }

    fn list_module_versions(&self, module_provider_id: i64) -> Result<Vec<ModuleVersion>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {VERSION_COLUMNS} FROM module_versions WHERE module_provider_id = ?1 ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![module_provider_id], version_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn get_module_details(&self, details_id: i64) -> Result<Option<ModuleDetails>> {
        let raw: Option<String> = self
            .conn()
            .query_row(
                "SELECT content FROM module_details WHERE id = ?1",
                params![details_id],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|raw| decode_json("module_details.content", &raw))
            .transpose()
    }

    fn list_subtrees(&self, module_version_id: i64, kind: SubmoduleKind) -> Result<Vec<Submodule>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, module_version_id, kind, path, details_id FROM submodules
             WHERE module_version_id = ?1 AND kind = ?2 ORDER BY path",
        )?;
        let rows = stmt.query_map(params![module_version_id, kind.as_str()], submodule_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn get_subtree(&self, module_version_id: i64, path: &str) -> Result<Option<Submodule>> {
        self.conn()
            .query_row(
                "SELECT id, module_version_id, kind, path, details_id FROM submodules
                 WHERE module_version_id = ?1 AND path = ?2",
                params![module_version_id, path],
                submodule_from_row,
            )
            .optional()
            .map_err(Error::from)
    }

    fn commit_module_imports(&self, imports: &[ModuleImport]) -> Result<Vec<Result<ModuleVersion>>> {
        let mut conn = self.conn();
        let mut tx = conn.transaction()?;

        let mut results = Vec::with_capacity(imports.len());
        for import in imports {
            let outcome = commit_one(&mut tx, import);
            if let Err(e) = &outcome {
                tracing::warn!(
                    "Rolled back import of version {} for module provider {}: {}",
                    import.version,
                    import.module_provider_id,
                    e
                );
            }
            results.push(outcome);
        }

        tx.commit()?;
        Ok(results)
    }

    fn publish_module_version(&self, id: i64, update: &PublishUpdate) -> Result<ModuleVersion> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let changed = tx.execute(
            "UPDATE module_versions SET published = 1,
                published_at = COALESCE(published_at, ?1),
                beta = COALESCE(?2, beta),
                description = COALESCE(?3, description),
                owner = COALESCE(?4, owner)
             WHERE id = ?5",
            params![
                format_datetime(&Utc::now()),
                update.beta,
                update.description,
                update.owner,
                id
            ],
        )?;
        if changed == 0 {
            return Err(Error::not_found("Module version not found"));
        }

        let version = query_version(&tx, id)?
            .ok_or_else(|| Error::not_found("Module version not found"))?;
        refresh_search_description(&tx, version.module_provider_id, version.description.as_deref())?;
        tx.commit()?;
        Ok(version)
    }

    fn unpublish_module_version(&self, id: i64) -> Result<ModuleVersion> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE module_versions SET published = 0 WHERE id = ?1",
            params![id],
        )?;
        if changed == 0 {
            return Err(Error::not_found("Module version not found"));
        }
        query_version(&conn, id)?.ok_or_else(|| Error::not_found("Module version not found"))
    }

    fn delete_module_version(&self, id: i64) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let detail_ids = owned_detail_ids(&tx, id)?;
        tx.execute(
            "UPDATE download_events SET module_version_id = NULL, tombstoned = 1
             WHERE module_version_id = ?1",
            params![id],
        )?;
        let deleted = tx.execute("DELETE FROM module_versions WHERE id = ?1", params![id])?;
        delete_details(&tx, &detail_ids)?;

        tx.commit()?;
        Ok(deleted > 0)
    }
}
