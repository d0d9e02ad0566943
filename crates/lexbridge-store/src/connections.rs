//! CRUD operations for [`DirectConnection`] records.

use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use lexbridge_shared::types::{ChannelId, UserId};

use crate::database::Database;
use crate::error::{duplicate, not_found, Result, StoreError};
use crate::models::DirectConnection;
use crate::rows::{enum_at, opt_time_at, time_at, user_at, uuid_at};

const CONNECTION_COLUMNS: &str = "id, citizen, lawyer, status, message, response_message, \
                                  channel_id, version, requested_at, responded_at";

impl Database {
    /// Insert a new connection. A second row for the same pair fails with
    /// [`StoreError::Duplicate`].
    pub fn insert_connection(&self, conn: &DirectConnection) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO direct_connections
                     (id, citizen, lawyer, status, message, response_message, channel_id,
                      version, requested_at, responded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    conn.id.to_string(),
                    conn.citizen.to_string(),
                    conn.lawyer.to_string(),
                    conn.status.as_str(),
                    conn.message,
                    conn.response_message,
                    conn.channel_id.as_ref().map(|c| c.as_str()),
                    conn.version,
                    conn.requested_at.to_rfc3339(),
                    conn.responded_at.map(|t| t.to_rfc3339()),
                ],
            )
            .map_err(duplicate)?;
        Ok(())
    }

    pub fn get_connection(&self, id: Uuid) -> Result<DirectConnection> {
        self.conn()
            .query_row(
                &format!("SELECT {CONNECTION_COLUMNS} FROM direct_connections WHERE id = ?1"),
                params![id.to_string()],
                row_to_connection,
            )
            .map_err(not_found)
    }

    /// The connection between this citizen and this lawyer, if any.
    pub fn find_connection_for_pair(
        &self,
        citizen: UserId,
        lawyer: UserId,
    ) -> Result<Option<DirectConnection>> {
        Ok(self
            .conn()
            .query_row(
                &format!(
                    "SELECT {CONNECTION_COLUMNS} FROM direct_connections
                     WHERE citizen = ?1 AND lawyer = ?2"
                ),
                params![citizen.to_string(), lawyer.to_string()],
                row_to_connection,
            )
            .optional()?)
    }

    /// Like [`Database::find_connection_for_pair`] without knowing who is who.
    pub fn find_connection_between(&self, a: UserId, b: UserId) -> Result<Option<DirectConnection>> {
        match self.find_connection_for_pair(a, b)? {
            Some(found) => Ok(Some(found)),
            None => self.find_connection_for_pair(b, a),
        }
    }

    pub fn find_connections_by_participant(&self, user: UserId) -> Result<Vec<DirectConnection>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {CONNECTION_COLUMNS} FROM direct_connections
             WHERE citizen = ?1 OR lawyer = ?1
             ORDER BY requested_at DESC"
        ))?;

        let rows = stmt.query_map(params![user.to_string()], row_to_connection)?;

        let mut connections = Vec::new();
        for row in rows {
            connections.push(row?);
        }
        Ok(connections)
    }

    /// Write back a connection if its version is still `expected_version`.
    /// Returns the new version.
    pub fn save_connection(&self, conn: &DirectConnection, expected_version: i64) -> Result<i64> {
        let updated = self.conn().execute(
            "UPDATE direct_connections
             SET status = ?1, message = ?2, response_message = ?3, channel_id = ?4,
                 requested_at = ?5, responded_at = ?6, version = version + 1
             WHERE id = ?7 AND version = ?8",
            params![
                conn.status.as_str(),
                conn.message,
                conn.response_message,
                conn.channel_id.as_ref().map(|c| c.as_str()),
                conn.requested_at.to_rfc3339(),
                conn.responded_at.map(|t| t.to_rfc3339()),
                conn.id.to_string(),
                expected_version,
            ],
        )?;

        if updated == 0 {
            return match self.get_connection(conn.id) {
                Ok(_) => Err(StoreError::Conflict {
                    expected: expected_version,
                }),
                Err(e) => Err(e),
            };
        }
        Ok(expected_version + 1)
    }
}

fn row_to_connection(row: &rusqlite::Row<'_>) -> rusqlite::Result<DirectConnection> {
    let channel_id: Option<String> = row.get(6)?;
    Ok(DirectConnection {
        id: uuid_at(row, 0)?,
        citizen: user_at(row, 1)?,
        lawyer: user_at(row, 2)?,
        status: enum_at(row, 3)?,
        message: row.get(4)?,
        response_message: row.get(5)?,
        channel_id: channel_id.map(ChannelId),
        version: row.get(7)?,
        requested_at: time_at(row, 8)?,
        responded_at: opt_time_at(row, 9)?,
    })
}
