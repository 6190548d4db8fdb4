use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{OptionalExtension, Row, params, params_from_iter};

use super::{SqliteStore, decode_json, encode_json, format_datetime, parse_datetime};
use crate::error::{Error, Result};
use crate::store::{AuditRepository, GroupAccess, SessionRepository, UserGroupRepository};
use crate::types::*;

fn user_group_from_row(row: &Row<'_>) -> rusqlite::Result<UserGroup> {
    Ok(UserGroup {
        id: row.get(0)?,
        name: row.get(1)?,
        site_admin: row.get(2)?,
        created_at: parse_datetime(&row.get::<_, String>(3)?),
    })
}

fn audit_event_from_row(row: &Row<'_>) -> rusqlite::Result<AuditEvent> {
    Ok(AuditEvent {
        id: row.get(0)?,
        timestamp: parse_datetime(&row.get::<_, String>(1)?),
        principal: row.get(2)?,
        action: row.get(3)?,
        object_type: row.get(4)?,
        object_id: row.get(5)?,
        old_value: row.get(6)?,
        new_value: row.get(7)?,
    })
}

impl UserGroupRepository for SqliteStore {
    fn create_user_group(&self, name: &str, site_admin: bool) -> Result<UserGroup> {
        let created_at = Utc::now();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO user_groups (name, site_admin, created_at) VALUES (?1, ?2, ?3)",
            params![name, site_admin, format_datetime(&created_at)],
        )?;
        Ok(UserGroup {
            id: conn.last_insert_rowid(),
            name: name.to_string(),
            site_admin,
            created_at,
        })
    }

    fn get_user_group_by_name(&self, name: &str) -> Result<Option<UserGroup>> {
        self.conn()
            .query_row(
                "SELECT id, name, site_admin, created_at FROM user_groups WHERE name = ?1",
                params![name],
                user_group_from_row,
            )
            .optional()
            .map_err(Error::from)
    }

    fn list_user_groups(&self) -> Result<Vec<UserGroup>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT id, name, site_admin, created_at FROM user_groups ORDER BY name")?;
        let rows = stmt.query_map([], user_group_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn delete_user_group(&self, id: i64) -> Result<bool> {
        let deleted = self
            .conn()
            .execute("DELETE FROM user_groups WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    fn set_namespace_permission(
        &self,
        user_group_id: i64,
        namespace_id: i64,
        level: PermissionLevel,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO namespace_permissions (user_group_id, namespace_id, level)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(user_group_id, namespace_id) DO UPDATE SET level = excluded.level",
            params![user_group_id, namespace_id, level.rank()],
        )?;
        Ok(())
    }

    fn delete_namespace_permission(&self, user_group_id: i64, namespace_id: i64) -> Result<bool> {
        let deleted = self.conn().execute(
            "DELETE FROM namespace_permissions WHERE user_group_id = ?1 AND namespace_id = ?2",
            params![user_group_id, namespace_id],
        )?;
        Ok(deleted > 0)
    }

    fn list_group_permissions(&self, user_group_id: i64) -> Result<Vec<NamespacePermission>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT p.user_group_id, g.name, p.namespace_id, n.name, p.level
             FROM namespace_permissions p
             JOIN user_groups g ON g.id = p.user_group_id
             JOIN namespaces n ON n.id = p.namespace_id
             WHERE p.user_group_id = ?1
             ORDER BY n.name",
        )?;
        let rows = stmt.query_map(params![user_group_id], |row| {
            let rank: i64 = row.get(4)?;
            Ok(NamespacePermission {
                user_group_id: row.get(0)?,
                user_group: row.get(1)?,
                namespace_id: row.get(2)?,
                namespace: row.get(3)?,
                level: PermissionLevel::from_rank(rank).unwrap_or(PermissionLevel::Read),
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn resolve_group_access(&self, groups: &[String], namespace: Option<&str>) -> Result<GroupAccess> {
        if groups.is_empty() {
            return Ok(GroupAccess::default());
        }

        let placeholders = vec!["?"; groups.len()].join(", ");
        let sql = format!(
            "SELECT COALESCE(MAX(g.site_admin), 0), MAX(p.level)
             FROM user_groups g
             LEFT JOIN namespace_permissions p
                ON p.user_group_id = g.id
               AND p.namespace_id = (SELECT id FROM namespaces WHERE name = ?)
             WHERE g.name IN ({placeholders})"
        );

        let mut values = Vec::with_capacity(groups.len() + 1);
        values.push(namespace.map_or(Value::Null, |n| Value::Text(n.to_string())));
        values.extend(groups.iter().cloned().map(Value::Text));

        self.conn()
            .query_row(&sql, params_from_iter(values.iter()), |row| {
                let site_admin: bool = row.get(0)?;
                let level: Option<i64> = row.get(1)?;
                Ok(GroupAccess {
                    site_admin,
                    level: level.and_then(PermissionLevel::from_rank),
                })
            })
            .map_err(Error::from)
    }
}

impl SessionRepository for SqliteStore {
    fn create_session(&self, session: &Session) -> Result<()> {
        self.conn().execute(
            "INSERT INTO sessions (id, external_id, auth_method, user_groups, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                session.id,
                session.external_id,
                session.auth_method.as_str(),
                encode_json(&session.user_groups)?,
                format_datetime(&session.created_at),
                format_datetime(&session.expires_at),
            ],
        )?;
        Ok(())
    }

    fn get_session(&self, id: &str, now: DateTime<Utc>) -> Result<Option<Session>> {
        let row: Option<(String, String, String, String, String, String)> = self
            .conn()
            .query_row(
                "SELECT id, external_id, auth_method, user_groups, created_at, expires_at
                 FROM sessions WHERE id = ?1 AND expires_at > ?2",
                params![id, format_datetime(&now)],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, external_id, auth_method, user_groups, created_at, expires_at)) = row else {
            return Ok(None);
        };
        let Some(auth_method) = AuthMethod::parse(&auth_method) else {
            tracing::warn!("Session {} has unknown auth method '{}'", id, auth_method);
            return Ok(None);
        };

        Ok(Some(Session {
            id,
            external_id,
            auth_method,
            user_groups: decode_json("sessions.user_groups", &user_groups)?,
            created_at: parse_datetime(&created_at),
            expires_at: parse_datetime(&expires_at),
        }))
    }

    fn delete_session(&self, id: &str) -> Result<bool> {
        let deleted = self
            .conn()
            .execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    fn purge_expired_sessions(&self, now: DateTime<Utc>) -> Result<usize> {
        let deleted = self.conn().execute(
            "DELETE FROM sessions WHERE expires_at <= ?1",
            params![format_datetime(&now)],
        )?;
        Ok(deleted)
    }
}

impl AuditRepository for SqliteStore {
    fn record_audit_event(&self, event: &AuditEvent) -> Result<()> {
        self.conn().execute(
            "INSERT INTO audit_events (id, timestamp, principal, action, object_type, object_id,
                old_value, new_value)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                event.id,
                format_datetime(&event.timestamp),
                event.principal,
                event.action,
                event.object_type,
                event.object_id,
                event.old_value,
                event.new_value,
            ],
        )?;
        Ok(())
    }

    fn list_audit_events(&self, offset: u32, limit: u32) -> Result<(Vec<AuditEvent>, u64)> {
        let conn = self.conn();
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM audit_events", [], |row| row.get(0))?;
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, principal, action, object_type, object_id, old_value, new_value
             FROM audit_events ORDER BY timestamp DESC, id DESC LIMIT ?1 OFFSET ?2",
        )?;
        let rows = stmt.query_map(params![limit, offset], audit_event_from_row)?;
        let events = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        Ok((events, u64::try_from(total).unwrap_or_default()))
    }
}
