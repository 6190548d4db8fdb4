use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::{SqliteStore, decode_json, encode_json, format_datetime, parse_datetime};
use crate::error::{Error, Result};
use crate::store::{NewProviderVersion, ProviderRepository};
use crate::types::*;

const PROVIDER_VERSION_COLUMNS: &str = "id, provider_id, version, protocols, gpg_key_id,
    shasums_url, shasums_signature_url, published_at";

const BINARY_COLUMNS: &str = "id, provider_version_id, os, arch, filename, download_url, shasum";

fn provider_from_row(row: &Row<'_>) -> rusqlite::Result<Provider> {
    Ok(Provider {
        id: row.get(0)?,
        namespace_id: row.get(1)?,
        namespace: row.get(2)?,
        name: row.get(3)?,
        description: row.get(4)?,
        created_at: parse_datetime(&row.get::<_, String>(5)?),
    })
}

/// Protocols are decoded after the row is read so JSON errors surface as catalog errors.
fn provider_version_from_row(row: &Row<'_>) -> rusqlite::Result<(ProviderVersion, String)> {
    let protocols: String = row.get(3)?;
    Ok((
        ProviderVersion {
            id: row.get(0)?,
            provider_id: row.get(1)?,
            version: row.get(2)?,
            protocols: Vec::new(),
            gpg_key_id: row.get(4)?,
            shasums_url: row.get(5)?,
            shasums_signature_url: row.get(6)?,
            published_at: parse_datetime(&row.get::<_, String>(7)?),
        },
        protocols,
    ))
}

fn finish_provider_version((mut version, protocols): (ProviderVersion, String)) -> Result<ProviderVersion> {
    version.protocols = decode_json("provider_versions.protocols", &protocols)?;
    Ok(version)
}

fn binary_from_row(row: &Row<'_>) -> rusqlite::Result<ProviderBinary> {
    Ok(ProviderBinary {
        id: row.get(0)?,
        provider_version_id: row.get(1)?,
        os: row.get(2)?,
        arch: row.get(3)?,
        filename: row.get(4)?,
        download_url: row.get(5)?,
        shasum: row.get(6)?,
    })
}

fn gpg_key_from_row(row: &Row<'_>) -> rusqlite::Result<GpgKey> {
    Ok(GpgKey {
        id: row.get(0)?,
        namespace_id: row.get(1)?,
        key_id: row.get(2)?,
        ascii_armor: row.get(3)?,
        created_at: parse_datetime(&row.get::<_, String>(4)?),
    })
}

fn query_provider_version(conn: &Connection, id: i64) -> Result<Option<ProviderVersion>> {
    conn.query_row(
        &format!("SELECT {PROVIDER_VERSION_COLUMNS} FROM provider_versions WHERE id = ?1"),
        params![id],
        provider_version_from_row,
    )
    .optional()?
    .map(finish_provider_version)
    .transpose()
}

fn upsert_binary(
    conn: &Connection,
    provider_version_id: i64,
    binary: &NewProviderBinary,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO provider_binaries (provider_version_id, os, arch, filename, download_url, shasum)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(provider_version_id, os, arch) DO UPDATE SET
            filename = excluded.filename,
            download_url = excluded.download_url,
            shasum = excluded.shasum",
        params![
            provider_version_id,
            binary.os,
            binary.arch,
            binary.filename,
            binary.download_url,
            binary.shasum
        ],
    )?;
    Ok(())
}

impl ProviderRepository for SqliteStore {
    fn create_provider(
        &self,
        namespace_id: i64,
        name: &str,
        description: Option<&str>,
    ) -> Result<Provider> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO providers (namespace_id, name, description, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![namespace_id, name, description, format_datetime(&Utc::now())],
        )?;
        let id = conn.last_insert_rowid();
        conn.query_row(
            "SELECT p.id, p.namespace_id, n.name, p.name, p.description, p.created_at
             FROM providers p JOIN namespaces n ON n.id = p.namespace_id WHERE p.id = ?1",
            params![id],
            provider_from_row,
        )
        .map_err(Error::from)
    }

    fn find_provider(&self, namespace: &str, name: &str) -> Result<Option<Provider>> {
        self.conn()
            .query_row(
                "SELECT p.id, p.namespace_id, n.name, p.name, p.description, p.created_at
                 FROM providers p JOIN namespaces n ON n.id = p.namespace_id
                 WHERE n.name = ?1 AND p.name = ?2",
                params![namespace, name],
                provider_from_row,
            )
            .optional()
            .map_err(Error::from)
    }

    fn list_provider_versions(&self, provider_id: i64) -> Result<Vec<ProviderVersion>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {PROVIDER_VERSION_COLUMNS} FROM provider_versions WHERE provider_id = ?1 ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![provider_id], provider_version_from_row)?;
        rows.map(|row| finish_provider_version(row?)).collect()
    }

    fn get_provider_version(
        &self,
        provider_id: i64,
        version: &str,
    ) -> Result<Option<ProviderVersion>> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {PROVIDER_VERSION_COLUMNS} FROM provider_versions
                     WHERE provider_id = ?1 AND version = ?2"
                ),
                params![provider_id, version],
                provider_version_from_row,
            )
            .optional()?
            .map(finish_provider_version)
            .transpose()
    }

    fn create_provider_version(
        &self,
        provider_id: i64,
        version: &NewProviderVersion,
        binaries: &[NewProviderBinary],
    ) -> Result<ProviderVersion> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO provider_versions (provider_id, version, protocols, gpg_key_id,
                shasums_url, shasums_signature_url, published_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                provider_id,
                version.version,
                encode_json(&version.protocols)?,
                version.gpg_key_id,
                version.shasums_url,
                version.shasums_signature_url,
                format_datetime(&Utc::now()),
            ],
        )?;
        let id = tx.last_insert_rowid();
        for binary in binaries {
            upsert_binary(&tx, id, binary)?;
        }

        let created = query_provider_version(&tx, id)?
            .ok_or_else(|| Error::internal("provider version vanished during insert"))?;
        tx.commit()?;
        Ok(created)
    }

    fn list_provider_binaries(&self, provider_version_id: i64) -> Result<Vec<ProviderBinary>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {BINARY_COLUMNS} FROM provider_binaries
             WHERE provider_version_id = ?1 ORDER BY os, arch"
        ))?;
        let rows = stmt.query_map(params![provider_version_id], binary_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn find_provider_binary(
        &self,
        provider_version_id: i64,
        os: &str,
        arch: &str,
    ) -> Result<Option<ProviderBinary>> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {BINARY_COLUMNS} FROM provider_binaries
                     WHERE provider_version_id = ?1 AND os = ?2 AND arch = ?3"
                ),
                params![provider_version_id, os, arch],
                binary_from_row,
            )
            .optional()
            .map_err(Error::from)
    }

    fn find_provider_binary_by_filename(
        &self,
        provider_version_id: i64,
        filename: &str,
    ) -> Result<Option<ProviderBinary>> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {BINARY_COLUMNS} FROM provider_binaries
                     WHERE provider_version_id = ?1 AND filename = ?2"
                ),
                params![provider_version_id, filename],
                binary_from_row,
            )
            .optional()
            .map_err(Error::from)
    }

    fn upsert_provider_binary(
        &self,
        provider_version_id: i64,
        binary: &NewProviderBinary,
    ) -> Result<ProviderBinary> {
        let conn = self.conn();
        upsert_binary(&conn, provider_version_id, binary)?;
        conn.query_row(
            &format!(
                "SELECT {BINARY_COLUMNS} FROM provider_binaries
                 WHERE provider_version_id = ?1 AND os = ?2 AND arch = ?3"
            ),
            params![provider_version_id, binary.os, binary.arch],
            binary_from_row,
        )
        .map_err(Error::from)
    }

    fn create_gpg_key(&self, namespace_id: i64, key_id: &str, ascii_armor: &str) -> Result<GpgKey> {
        let created_at = Utc::now();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO gpg_keys (namespace_id, key_id, ascii_armor, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![namespace_id, key_id, ascii_armor, format_datetime(&created_at)],
        )?;
        Ok(GpgKey {
            id: conn.last_insert_rowid(),
            namespace_id,
            key_id: key_id.to_string(),
            ascii_armor: ascii_armor.to_string(),
            created_at,
        })
    }

    fn get_gpg_key(&self, id: i64) -> Result<Option<GpgKey>> {
        self.conn()
            .query_row(
                "SELECT id, namespace_id, key_id, ascii_armor, created_at FROM gpg_keys WHERE id = ?1",
                params![id],
                gpg_key_from_row,
            )
            .optional()
            .map_err(Error::from)
    }

    fn list_gpg_keys(&self, namespace_id: i64) -> Result<Vec<GpgKey>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, namespace_id, key_id, ascii_armor, created_at FROM gpg_keys
             WHERE namespace_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![namespace_id], gpg_key_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }
}
