use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::error::TransportError;
use super::transport::{Author, Transport};
use crate::store::users::{NewUser, UserRecord};
use crate::store::IdentityStore;

#[derive(Debug, Error)]
pub enum TopicError {
    #[error("failed to create topic: {0}")]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedTopic {
    Existing(i32),
    /// Created by this call; enrichment may follow
    Created(i32),
}

impl ResolvedTopic {
    pub fn id(self) -> i32 {
        match self {
            ResolvedTopic::Existing(id) | ResolvedTopic::Created(id) => id,
        }
    }
}

/// Answers "which topic belongs to this user" and "who owns this topic",
/// creating topics on first contact.
pub struct TopicDirectory {
    store: IdentityStore,
    transport: Arc<dyn Transport>,
    // Held only while cloning/removing entries, never across .await
    creating: std::sync::Mutex<HashMap<u64, Arc<tokio::sync::Mutex<()>>>>,
}

impl TopicDirectory {
    pub fn new(store: IdentityStore, transport: Arc<dyn Transport>) -> Self {
        Self {
            store,
            transport,
            creating: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Idempotent per user: concurrent first-contact callers share one topic.
    pub async fn resolve_or_create_topic(&self, author: &Author) -> Result<ResolvedTopic, TopicError> {
        if let Some(user) = self.store.get_user(author.id).await? {
            return Ok(ResolvedTopic::Existing(user.topic_id));
        }

        let entry = self.user_lock(author.id);
        let _guard = entry.lock.lock().await;
        self.create_locked(author).await
    }

    pub async fn owner_of(&self, topic_id: i32) -> anyhow::Result<Option<UserRecord>> {
        self.store.get_user_by_topic(topic_id).await
    }

    async fn create_locked(&self, author: &Author) -> Result<ResolvedTopic, TopicError> {
        // Someone else may have finished while we waited for the lock
        if let Some(user) = self.store.get_user(author.id).await? {
            debug!(
                user_id = author.id,
                topic_id = user.topic_id,
                "topic created by a concurrent message, reusing it"
            );
            return Ok(ResolvedTopic::Existing(user.topic_id));
        }

        let name = topic_name(author);
        let topic_id = self.transport.create_topic(&name).await?;

        let inserted = self
            .store
            .insert_user_if_absent(&NewUser {
                user_id: author.id,
                first_name: &author.first_name,
                username: author.username.as_deref(),
                topic_id,
            })
            .await?;

        if !inserted {
            // Another writer outside this process won the race
            let winner = self
                .store
                .get_user(author.id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("user {} vanished after insert conflict", author.id))?;
            warn!(
                user_id = author.id,
                topic_id,
                kept_topic_id = winner.topic_id,
                "duplicate topic created for user, keeping the first one"
            );
            return Ok(ResolvedTopic::Existing(winner.topic_id));
        }

        info!(user_id = author.id, topic_id, "Created topic '{}'", name);
        Ok(ResolvedTopic::Created(topic_id))
    }

    fn user_lock(&self, user_id: u64) -> CreationLock<'_> {
        let mut creating = self.creating.lock().unwrap_or_else(|e| e.into_inner());
        CreationLock {
            directory: self,
            user_id,
            lock: Arc::clone(creating.entry(user_id).or_default()),
        }
    }

    fn release_user_lock(&self, user_id: u64, lock: &Arc<tokio::sync::Mutex<()>>) {
        let mut creating = self.creating.lock().unwrap_or_else(|e| e.into_inner());
        // Map + our clone: nobody else is waiting on this entry
        if Arc::strong_count(lock) == 2 {
            creating.remove(&user_id);
        }
    }

    #[cfg(test)]
    fn pending_locks(&self) -> usize {
        self.creating.lock().unwrap().len()
    }
}

/// Per-user creation lock, dropped from the table even if the caller is cancelled
struct CreationLock<'a> {
    directory: &'a TopicDirectory,
    user_id: u64,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for CreationLock<'_> {
    fn drop(&mut self) {
        self.directory.release_user_lock(self.user_id, &self.lock);
    }
}

/// "First @handle", falling back to the user id when there is no name
pub fn topic_name(author: &Author) -> String {
    let mut name = author.first_name.trim().to_string();
    if let Some(username) = author.username.as_deref().filter(|u| !u.is_empty()) {
        if !name.is_empty() {
            name.push(' ');
        }
        name.push('@');
        name.push_str(username);
    }
    if name.is_empty() {
        name = author.id.to_string();
    }
    name
}
