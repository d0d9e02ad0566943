use chrono::Utc;
use rusqlite::{params, Connection};
use uuid::Uuid;

use lexbridge_shared::types::{ChannelId, UserId};

use crate::database::Database;
use crate::error::{not_found, Result, StoreError};
use crate::models::{Message, NewMessage, ReadMarker};
use crate::rows::{enum_at, time_at, user_at, uuid_at};

const MESSAGE_COLUMNS: &str = "id, channel_id, seq, sender, kind, content, file_ref, sent_at";

impl Database {
    /// Append a message to the end of its channel.
    ///
    /// The message gets the next sequence number and counts as read by its
    /// sender. Fails with `NotFound` (via the foreign key) if the channel does
    /// not exist.
    pub fn append_message(&self, new: &NewMessage) -> Result<Message> {
        let tx = self.conn().unchecked_transaction()?;
        let now = Utc::now();
        let id = Uuid::new_v4();

        let seq: i64 = tx.query_row(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM messages WHERE channel_id = ?1",
            params![new.channel_id.as_str()],
            |row| row.get(0),
        )?;

        tx.execute(
            &format!("INSERT INTO messages ({MESSAGE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
            params![
                id.to_string(),
                new.channel_id.as_str(),
                seq,
                new.sender.to_string(),
                new.kind.as_str(),
                new.content,
                new.file_ref,
                now.to_rfc3339(),
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(ref err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::NotFound
            }
            other => other.into(),
        })?;

        tx.execute(
            "INSERT INTO message_reads (message_id, user_id, read_at) VALUES (?1, ?2, ?3)",
            params![id.to_string(), new.sender.to_string(), now.to_rfc3339()],
        )?;
        tx.execute(
            "UPDATE channel_participants SET last_read_seq = MAX(last_read_seq, ?1)
             WHERE channel_id = ?2 AND user_id = ?3",
            params![seq, new.channel_id.as_str(), new.sender.to_string()],
        )?;
        tx.execute(
            "UPDATE channels SET last_message_at = ?1 WHERE id = ?2",
            params![now.to_rfc3339(), new.channel_id.as_str()],
        )?;
        tx.commit()?;

        Ok(Message {
            id,
            channel_id: new.channel_id.clone(),
            seq,
            sender: new.sender,
            kind: new.kind,
            content: new.content.clone(),
            file_ref: new.file_ref.clone(),
            read_by: vec![ReadMarker {
                user_id: new.sender,
                read_at: now,
            }],
            sent_at: now,
        })
    }

    /// Up to `limit` messages before `before_seq` (or the newest ones),
    /// returned oldest first.
    pub fn get_messages_for_channel(
        &self,
        channel_id: &ChannelId,
        limit: u32,
        before_seq: Option<i64>,
    ) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE channel_id = ?1 AND seq < ?2
             ORDER BY seq DESC
             LIMIT ?3"
        ))?;

        let rows = stmt.query_map(
            params![channel_id.as_str(), before_seq.unwrap_or(i64::MAX), limit],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            let mut message = row?;
            message.read_by = load_reads(self.conn(), message.id)?;
            messages.push(message);
        }
        messages.reverse();
        Ok(messages)
    }

    pub fn get_message_by_id(&self, id: Uuid) -> Result<Message> {
        let mut message = self
            .conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .map_err(not_found)?;
        message.read_by = load_reads(self.conn(), id)?;
        Ok(message)
    }

    /// Record that `user` has read messages in a channel.
    ///
    /// With `ids == None` every message in the channel is marked; otherwise
    /// only the listed ones that belong to the channel. Returns the ids that
    /// were newly marked, in channel order. Marking is idempotent.
    pub fn mark_read(
        &self,
        channel_id: &ChannelId,
        user: UserId,
        ids: Option<&[Uuid]>,
    ) -> Result<Vec<Uuid>> {
        let tx = self.conn().unchecked_transaction()?;
        let now = Utc::now().to_rfc3339();

        let unread: Vec<(Uuid, i64)> = {
            let mut stmt = tx.prepare(
                "SELECT m.id, m.seq FROM messages m
                 WHERE m.channel_id = ?1
                   AND NOT EXISTS (
                       SELECT 1 FROM message_reads r
                       WHERE r.message_id = m.id AND r.user_id = ?2)
                 ORDER BY m.seq ASC",
            )?;
            let rows = stmt.query_map(params![channel_id.as_str(), user.to_string()], |row| {
                Ok((uuid_at(row, 0)?, row.get::<_, i64>(1)?))
            })?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            out
        };

        let mut marked = Vec::new();
        let mut high_seq = 0;
        for (id, seq) in unread {
            if let Some(wanted) = ids {
                if !wanted.contains(&id) {
                    continue;
                }
            }
            tx.execute(
                "INSERT OR IGNORE INTO message_reads (message_id, user_id, read_at) VALUES (?1, ?2, ?3)",
                params![id.to_string(), user.to_string(), now],
            )?;
            marked.push(id);
            high_seq = high_seq.max(seq);
        }

        if ids.is_none() {
            // Everything is read now, so the cursor sits on the newest message.
            high_seq = tx.query_row(
                "SELECT COALESCE(MAX(seq), 0) FROM messages WHERE channel_id = ?1",
                params![channel_id.as_str()],
                |row| row.get(0),
            )?;
        }
        if high_seq > 0 {
            tx.execute(
                "UPDATE channel_participants SET last_read_seq = MAX(last_read_seq, ?1)
                 WHERE channel_id = ?2 AND user_id = ?3",
                params![high_seq, channel_id.as_str(), user.to_string()],
            )?;
        }

        tx.commit()?;
        Ok(marked)
    }

    /// Messages in the channel `user` has not read.
    pub fn unread_count(&self, channel_id: &ChannelId, user: UserId) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM messages m
             WHERE m.channel_id = ?1
               AND NOT EXISTS (
                   SELECT 1 FROM message_reads r
                   WHERE r.message_id = m.id AND r.user_id = ?2)",
            params![channel_id.as_str(), user.to_string()],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }
}

fn load_reads(conn: &Connection, message_id: Uuid) -> Result<Vec<ReadMarker>> {
    let mut stmt = conn.prepare(
        "SELECT user_id, read_at FROM message_reads WHERE message_id = ?1 ORDER BY read_at ASC",
    )?;
    let rows = stmt.query_map(params![message_id.to_string()], |row| {
        Ok(ReadMarker {
            user_id: user_at(row, 0)?,
            read_at: time_at(row, 1)?,
        })
    })?;

    let mut reads = Vec::new();
    for row in rows {
        reads.push(row?);
    }
    Ok(reads)
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let channel_id: String = row.get(1)?;
    Ok(Message {
        id: uuid_at(row, 0)?,
        channel_id: ChannelId(channel_id),
        seq: row.get(2)?,
        sender: user_at(row, 3)?,
        kind: enum_at(row, 4)?,
        content: row.get(5)?,
        file_ref: row.get(6)?,
        read_by: Vec::new(),
        sent_at: time_at(row, 7)?,
    })
}
