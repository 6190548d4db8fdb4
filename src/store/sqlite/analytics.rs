use chrono::{DateTime, Duration, Utc};
use rusqlite::{OptionalExtension, params};

use super::modules::query_module_provider;
use super::versions::{VERSION_COLUMNS, version_from_row};
use super::{SqliteStore, format_datetime, parse_datetime};
use crate::error::{Error, Result};
use crate::store::{DownloadRepository, DownloadSummary, GlobalStats, TokenDownload};
use crate::types::*;

fn count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

impl DownloadRepository for SqliteStore {
    fn record_download(&self, event: &NewDownloadEvent) -> Result<()> {
        self.conn().execute(
            "INSERT INTO download_events (module_provider_id, module_version_id, version,
                timestamp, analytics_token, auth_principal, terraform_version, environment)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                event.module_provider_id,
                event.module_version_id,
                event.version,
                format_datetime(&event.timestamp),
                event.analytics_token,
                event.auth_principal,
                event.terraform_version,
                event.environment,
            ],
        )?;
        Ok(())
    }

    fn download_summary(&self, module_provider_id: i64, now: DateTime<Utc>) -> Result<DownloadSummary> {
        let week = format_datetime(&(now - Duration::days(7)));
        let month = format_datetime(&(now - Duration::days(30)));
        let year = format_datetime(&(now - Duration::days(365)));

        self.conn()
            .query_row(
                "SELECT
                    COUNT(*),
                    COALESCE(SUM(timestamp >= ?2), 0),
                    COALESCE(SUM(timestamp >= ?3), 0),
                    COALESCE(SUM(timestamp >= ?4), 0),
                    COALESCE(SUM(analytics_token IS NOT NULL), 0)
                 FROM download_events WHERE module_provider_id = ?1",
                params![module_provider_id, week, month, year],
                |row| {
                    let total = count(row.get(0)?);
                    let authenticated = count(row.get(4)?);
                    Ok(DownloadSummary {
                        week: count(row.get(1)?),
                        month: count(row.get(2)?),
                        year: count(row.get(3)?),
                        total,
                        authenticated,
                        anonymous: total.saturating_sub(authenticated),
                    })
                },
            )
            .map_err(Error::from)
    }

    fn global_stats(&self) -> Result<GlobalStats> {
        self.conn()
            .query_row(
                "SELECT
                    (SELECT COUNT(*) FROM namespaces),
                    (SELECT COUNT(*) FROM module_providers),
                    (SELECT COUNT(*) FROM module_versions),
                    (SELECT COUNT(*) FROM download_events)",
                [],
                |row| {
                    Ok(GlobalStats {
                        namespaces: count(row.get(0)?),
                        modules: count(row.get(1)?),
                        module_versions: count(row.get(2)?),
                        downloads: count(row.get(3)?),
                    })
                },
            )
            .map_err(Error::from)
    }

    fn most_recently_published(&self) -> Result<Option<(ModuleProvider, ModuleVersion)>> {
        let conn = self.conn();
        let version = conn
            .query_row(
                &format!(
                    "SELECT {VERSION_COLUMNS} FROM module_versions
                     WHERE published = 1 AND beta = 0
                     ORDER BY published_at DESC, id DESC LIMIT 1"
                ),
                [],
                version_from_row,
            )
            .optional()?;

        let Some(version) = version else {
            return Ok(None);
        };
        let provider = query_module_provider(&conn, version.module_provider_id)?;
        Ok(provider.map(|provider| (provider, version)))
    }

    fn most_downloaded_this_week(&self, now: DateTime<Utc>) -> Result<Option<(ModuleProvider, u64)>> {
        let conn = self.conn();
        let top: Option<(i64, i64)> = conn
            .query_row(
                "SELECT d.module_provider_id, COUNT(*) AS downloads
                 FROM download_events d
                 JOIN module_providers mp ON mp.id = d.module_provider_id
                 WHERE d.timestamp >= ?1
                 GROUP BY d.module_provider_id
                 ORDER BY downloads DESC, d.module_provider_id
                 LIMIT 1",
                params![format_datetime(&(now - Duration::days(7)))],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((module_provider_id, downloads)) = top else {
            return Ok(None);
        };
        let provider = query_module_provider(&conn, module_provider_id)?;
        Ok(provider.map(|provider| (provider, count(downloads))))
    }

    fn token_downloads(&self, module_provider_id: i64) -> Result<Vec<TokenDownload>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT d.analytics_token, d.environment, d.terraform_version, d.version, d.timestamp
             FROM download_events d
             WHERE d.module_provider_id = ?1
               AND d.analytics_token IS NOT NULL
               AND d.id = (SELECT MAX(d2.id) FROM download_events d2
                           WHERE d2.module_provider_id = ?1
                             AND d2.analytics_token = d.analytics_token)
             ORDER BY d.analytics_token",
        )?;
        let rows = stmt.query_map(params![module_provider_id], |row| {
            Ok(TokenDownload {
                analytics_token: row.get(0)?,
                environment: row.get(1)?,
                terraform_version: row.get(2)?,
                module_version: row.get(3)?,
                timestamp: parse_datetime(&row.get::<_, String>(4)?),
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }
}
