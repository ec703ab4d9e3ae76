use anyhow::Result;
use tracing::debug;

use crate::store::mappings::MessageMapping;
use crate::store::IdentityStore;

/// Records and retracts origin↔destination pairs as relays succeed or are undone
#[derive(Clone)]
pub struct MappingRecorder {
    store: IdentityStore,
}

impl MappingRecorder {
    pub fn new(store: IdentityStore) -> Self {
        Self { store }
    }

    pub async fn record(&self, mapping: MessageMapping) -> Result<()> {
        self.store.save_mapping(&mapping).await?;
        debug!(
            user_id = mapping.user_id,
            topic_id = mapping.topic_id,
            group_message_id = mapping.group_message_id,
            client_message_id = mapping.client_message_id,
            "mapping recorded"
        );
        Ok(())
    }

    /// Destination message in the user's chat for an in-topic message
    pub async fn destination_of(&self, group_message_id: i32, topic_id: i32) -> Result<Option<i32>> {
        self.store.client_message_id(group_message_id, topic_id).await
    }

    /// In-topic message for a message in the user's chat
    pub async fn origin_of(&self, client_message_id: i32, user_id: u64) -> Result<Option<i32>> {
        self.store.group_message_id(client_message_id, user_id).await
    }

    pub async fn retract(&self, group_message_id: i32, topic_id: i32) -> Result<()> {
        if self.store.delete_mapping(group_message_id, topic_id).await? {
            debug!(topic_id, group_message_id, "mapping removed");
        }
        Ok(())
    }
}
