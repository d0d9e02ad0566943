//! Persistence for [`Channel`] records and their participant lists.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use lexbridge_shared::types::{CaseId, ChannelId, ChannelStatus, UserId};

use crate::database::Database;
use crate::error::{not_found, Result, StoreError};
use crate::models::{Channel, ChannelTie};
use crate::rows::{enum_at, opt_time_at, opt_uuid_at, time_at, user_at};

impl Database {
    /// Find-or-create a channel.
    ///
    /// Creates the channel with the given status and participants if no row
    /// with that id exists. If it exists, missing participants are added and
    /// a `Pending` channel is promoted when `Active` is requested; an active
    /// channel is never demoted. Returns the stored channel and whether this
    /// call created it.
    pub fn ensure_channel(&self, channel: &Channel) -> Result<(Channel, bool)> {
        let tx = self.conn().unchecked_transaction()?;

        let (tie_kind, case_id) = match channel.tie {
            ChannelTie::Case { case_id, .. } => (channel.tie.kind_str(), Some(case_id.to_string())),
            ChannelTie::Direct => (channel.tie.kind_str(), None),
        };

        let created = tx.execute(
            "INSERT OR IGNORE INTO channels (id, tie_kind, case_id, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                channel.id.as_str(),
                tie_kind,
                case_id,
                channel.status.as_str(),
                channel.created_at.to_rfc3339(),
            ],
        )? == 1;

        for user in &channel.participants {
            tx.execute(
                "INSERT OR IGNORE INTO channel_participants (channel_id, user_id) VALUES (?1, ?2)",
                params![channel.id.as_str(), user.to_string()],
            )?;
        }

        if !created && channel.status == ChannelStatus::Active {
            tx.execute(
                "UPDATE channels SET status = 'active' WHERE id = ?1 AND status = 'pending'",
                params![channel.id.as_str()],
            )?;
        }

        let stored = load_channel(&tx, &channel.id)?.ok_or(StoreError::NotFound)?;
        tx.commit()?;
        Ok((stored, created))
    }

    pub fn get_channel(&self, id: &ChannelId) -> Result<Channel> {
        load_channel(self.conn(), id)?.ok_or(StoreError::NotFound)
    }

    pub fn find_channel(&self, id: &ChannelId) -> Result<Option<Channel>> {
        load_channel(self.conn(), id)
    }

    pub fn is_participant(&self, id: &ChannelId, user: UserId) -> Result<bool> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM channel_participants WHERE channel_id = ?1 AND user_id = ?2",
                params![id.as_str(), user.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Channels the user takes part in, most recently active first.
    pub fn find_channels_by_participant(&self, user: UserId) -> Result<Vec<Channel>> {
        let mut stmt = self.conn().prepare(
            "SELECT c.id FROM channels c
             JOIN channel_participants p ON p.channel_id = c.id
             WHERE p.user_id = ?1
             ORDER BY COALESCE(c.last_message_at, c.created_at) DESC",
        )?;
        let ids = stmt.query_map(params![user.to_string()], |row| row.get::<_, String>(0))?;

        let mut channels = Vec::new();
        for id in ids {
            channels.push(self.get_channel(&ChannelId(id?))?);
        }
        Ok(channels)
    }

    /// Whether both users take part in at least one common channel.
    pub fn shares_channel(&self, a: UserId, b: UserId) -> Result<bool> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM channel_participants x
                 JOIN channel_participants y ON y.channel_id = x.channel_id
                 WHERE x.user_id = ?1 AND y.user_id = ?2
                 LIMIT 1",
                params![a.to_string(), b.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// The participant's read cursor: highest sequence number they have read.
    pub fn read_cursor(&self, id: &ChannelId, user: UserId) -> Result<i64> {
        self.conn()
            .query_row(
                "SELECT last_read_seq FROM channel_participants WHERE channel_id = ?1 AND user_id = ?2",
                params![id.as_str(), user.to_string()],
                |row| row.get(0),
            )
            .map_err(not_found)
    }
}

impl Channel {
    /// A not-yet-stored channel value for [`Database::ensure_channel`].
    pub fn draft(id: ChannelId, tie: ChannelTie, status: ChannelStatus, participants: Vec<UserId>) -> Self {
        Self {
            id,
            tie,
            status,
            participants,
            created_at: Utc::now(),
            last_message_at: None,
        }
    }
}

fn load_channel(conn: &Connection, id: &ChannelId) -> Result<Option<Channel>> {
    let row = conn
        .query_row(
            "SELECT id, tie_kind, case_id, status, created_at, last_message_at
             FROM channels WHERE id = ?1",
            params![id.as_str()],
            |row| {
                let id: String = row.get(0)?;
                let tie_kind: String = row.get(1)?;
                let case_id = opt_uuid_at(row, 2)?;
                let tie = match (tie_kind.as_str(), case_id) {
                    ("direct", _) | (_, None) => ChannelTie::Direct,
                    (_, Some(case_id)) => ChannelTie::Case {
                        kind: enum_at(row, 1)?,
                        case_id: CaseId(case_id),
                    },
                };
                Ok(Channel {
                    id: ChannelId(id),
                    tie,
                    status: enum_at(row, 3)?,
                    participants: Vec::new(),
                    created_at: time_at(row, 4)?,
                    last_message_at: opt_time_at(row, 5)?,
                })
            },
        )
        .optional()?;

    let Some(mut channel) = row else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT user_id FROM channel_participants WHERE channel_id = ?1 ORDER BY rowid ASC",
    )?;
    let users = stmt.query_map(params![id.as_str()], |row| user_at(row, 0))?;
    for user in users {
        channel.participants.push(user?);
    }
    Ok(Some(channel))
}
