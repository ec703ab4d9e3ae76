use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;

use super::IdentityStore;

/// A correspondent and the topic assigned to them
#[derive(Debug, Clone, PartialEq)]
pub struct UserRecord {
    pub user_id: u64,
    pub first_name: String,
    pub username: Option<String>,
    pub topic_id: i32,
    /// `None` until the lookup service has been asked about this user
    pub verified: Option<bool>,
    pub card_message_id: Option<i32>,
    pub last_auto_reply_at: Option<DateTime<Utc>>,
}

/// Data needed to register a user that has just been given a topic
#[derive(Debug, Clone)]
pub struct NewUser<'a> {
    pub user_id: u64,
    pub first_name: &'a str,
    pub username: Option<&'a str>,
    pub topic_id: i32,
}

const USER_COLUMNS: &str =
    "user_id, first_name, username, topic_id, verified, card_message_id, last_auto_reply_at";

impl IdentityStore {
    pub async fn get_user(&self, user_id: u64) -> Result<Option<UserRecord>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = ?1"),
            rusqlite::params![user_id as i64],
            parse_user_row,
        )
        .optional()
        .context("Failed to load user")
    }

    /// Reverse lookup used for every support-side event (indexed on topic_id)
    pub async fn get_user_by_topic(&self, topic_id: i32) -> Result<Option<UserRecord>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE topic_id = ?1"),
            rusqlite::params![topic_id],
            parse_user_row,
        )
        .optional()
        .context("Failed to load user by topic")
    }

    /// Insert the user unless a row already exists.
    /// Returns `false` when another writer got there first; the caller must
    /// re-read to learn the topic that won.
    pub async fn insert_user_if_absent(&self, user: &NewUser<'_>) -> Result<bool> {
        let conn = self.conn.lock().await;
        let inserted = conn
            .execute(
                "INSERT INTO users (user_id, first_name, username, topic_id)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(user_id) DO NOTHING",
                rusqlite::params![
                    user.user_id as i64,
                    user.first_name,
                    user.username,
                    user.topic_id
                ],
            )
            .context("Failed to create user")?;
        Ok(inserted == 1)
    }

    /// Whether the cooldown window since the last automated acknowledgement has elapsed
    pub async fn should_send_auto_reply(
        &self,
        user_id: u64,
        now: DateTime<Utc>,
        cooldown: chrono::Duration,
    ) -> Result<bool> {
        let conn = self.conn.lock().await;
        let last: Option<Option<String>> = conn
            .query_row(
                "SELECT last_auto_reply_at FROM users WHERE user_id = ?1",
                rusqlite::params![user_id as i64],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to read auto-reply timestamp")?;

        let Some(Some(last)) = last else {
            return Ok(true);
        };
        let last = parse_timestamp(&last)?;
        Ok(now - last >= cooldown)
    }

    pub async fn record_auto_reply(&self, user_id: u64, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE users SET last_auto_reply_at = ?1 WHERE user_id = ?2",
            rusqlite::params![at.to_rfc3339(), user_id as i64],
        )
        .context("Failed to update auto-reply timestamp")?;
        Ok(())
    }

    pub async fn set_enrichment(
        &self,
        user_id: u64,
        verified: bool,
        card_message_id: Option<i32>,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE users SET verified = ?1, card_message_id = ?2 WHERE user_id = ?3",
            rusqlite::params![verified, card_message_id, user_id as i64],
        )
        .context("Failed to store user enrichment")?;
        Ok(())
    }
}

fn parse_user_row(row: &rusqlite::Row) -> rusqlite::Result<UserRecord> {
    let user_id: i64 = row.get(0)?;
    let last_auto_reply_at: Option<String> = row.get(6)?;
    Ok(UserRecord {
        user_id: user_id as u64,
        first_name: row.get(1)?,
        username: row.get(2)?,
        topic_id: row.get(3)?,
        verified: row.get(4)?,
        card_message_id: row.get(5)?,
        last_auto_reply_at: last_auto_reply_at
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
    })
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp in store: {value}"))
}
