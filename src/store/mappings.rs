use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;

use super::IdentityStore;

/// One relayed message. `group_message_id` is only unique within its topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageMapping {
    pub group_message_id: i32,
    pub topic_id: i32,
    pub client_message_id: i32,
    pub user_id: u64,
}

impl IdentityStore {
    /// Record a relayed message. Re-recording the same (group message, topic)
    /// replaces the previous destination.
    pub async fn save_mapping(&self, mapping: &MessageMapping) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO message_map
                (group_message_id, topic_id, client_message_id, user_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(group_message_id, topic_id) DO UPDATE SET
                client_message_id = excluded.client_message_id,
                user_id = excluded.user_id",
            rusqlite::params![
                mapping.group_message_id,
                mapping.topic_id,
                mapping.client_message_id,
                mapping.user_id as i64,
                Utc::now().to_rfc3339(),
            ],
        )
        .context("Failed to save message mapping")?;
        Ok(())
    }

    pub async fn client_message_id(
        &self,
        group_message_id: i32,
        topic_id: i32,
    ) -> Result<Option<i32>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT client_message_id FROM message_map
             WHERE group_message_id = ?1 AND topic_id = ?2",
            rusqlite::params![group_message_id, topic_id],
            |row| row.get(0),
        )
        .optional()
        .context("Failed to look up client message id")
    }

    pub async fn group_message_id(
        &self,
        client_message_id: i32,
        user_id: u64,
    ) -> Result<Option<i32>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT group_message_id FROM message_map
             WHERE client_message_id = ?1 AND user_id = ?2",
            rusqlite::params![client_message_id, user_id as i64],
            |row| row.get(0),
        )
        .optional()
        .context("Failed to look up group message id")
    }

    /// Returns whether a row was removed
    pub async fn delete_mapping(&self, group_message_id: i32, topic_id: i32) -> Result<bool> {
        let conn = self.conn.lock().await;
        let removed = conn
            .execute(
                "DELETE FROM message_map WHERE group_message_id = ?1 AND topic_id = ?2",
                rusqlite::params![group_message_id, topic_id],
            )
            .context("Failed to delete message mapping")?;
        Ok(removed > 0)
    }

    pub async fn purge_mappings_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock().await;
        // RFC 3339 strings in UTC sort chronologically
        let removed = conn
            .execute(
                "DELETE FROM message_map WHERE created_at < ?1",
                rusqlite::params![cutoff.to_rfc3339()],
            )
            .context("Failed to purge message mappings")?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(group: i32, topic: i32, client: i32, user: u64) -> MessageMapping {
        MessageMapping {
            group_message_id: group,
            topic_id: topic,
            client_message_id: client,
            user_id: user,
        }
    }

    #[tokio::test]
    async fn test_forward_and_reverse_lookup_agree() {
        let store = IdentityStore::open_in_memory().unwrap();
        store.save_mapping(&mapping(1, 55, 1, 1001)).await.unwrap();
        store.save_mapping(&mapping(2, 55, 2, 1001)).await.unwrap();

        assert_eq!(store.client_message_id(2, 55).await.unwrap(), Some(2));
        assert_eq!(store.group_message_id(2, 1001).await.unwrap(), Some(2));
        assert_eq!(store.client_message_id(3, 55).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_same_group_id_in_different_topics() {
        let store = IdentityStore::open_in_memory().unwrap();
        store.save_mapping(&mapping(10, 55, 4, 1001)).await.unwrap();
        store.save_mapping(&mapping(10, 66, 9, 1002)).await.unwrap();

        assert_eq!(store.client_message_id(10, 55).await.unwrap(), Some(4));
        assert_eq!(store.client_message_id(10, 66).await.unwrap(), Some(9));

        assert!(store.delete_mapping(10, 55).await.unwrap());
        assert_eq!(store.client_message_id(10, 55).await.unwrap(), None);
        assert_eq!(store.client_message_id(10, 66).await.unwrap(), Some(9));
    }

    #[tokio::test]
    async fn test_resave_replaces_destination() {
        let store = IdentityStore::open_in_memory().unwrap();
        store.save_mapping(&mapping(5, 55, 6, 1001)).await.unwrap();
        store.save_mapping(&mapping(5, 55, 7, 1001)).await.unwrap();

        assert_eq!(store.client_message_id(5, 55).await.unwrap(), Some(7));
        assert_eq!(store.group_message_id(6, 1001).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_missing_mapping() {
        let store = IdentityStore::open_in_memory().unwrap();
        assert!(!store.delete_mapping(1, 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_before_cutoff() {
        let store = IdentityStore::open_in_memory().unwrap();
        store.save_mapping(&mapping(1, 55, 1, 1001)).await.unwrap();
        store.save_mapping(&mapping(2, 55, 2, 1001)).await.unwrap();

        let past = Utc::now() - chrono::Duration::days(1);
        assert_eq!(store.purge_mappings_before(past).await.unwrap(), 0);

        let future = Utc::now() + chrono::Duration::seconds(5);
        assert_eq!(store.purge_mappings_before(future).await.unwrap(), 2);
        assert_eq!(store.client_message_id(1, 55).await.unwrap(), None);
    }
}
