use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, error, info, warn};

use super::directory::{ResolvedTopic, TopicDirectory, TopicError};
use super::error::{IgnoreReason, RelayOutcome, RetractStep};
use super::recorder::MappingRecorder;
use super::transport::{
    Acknowledgement, Author, InboundMessage, MessageBody, ReplyTarget, Transport,
};
use crate::config::RelayConfig;
use crate::lookup::{format_user_card, UserLookup};
use crate::scheduler::auto_reply::AutoReplyThrottle;
use crate::store::mappings::MessageMapping;
use crate::store::IdentityStore;

#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub support_group_id: i64,
    /// The engine's own user id, used to recognise its messages
    pub bot_id: u64,
    pub welcome_message: String,
    pub relay_failure_notice: String,
    pub topic_failure_notice: String,
}

impl RouterSettings {
    pub fn new(relay: &RelayConfig, support_group_id: i64, bot_id: u64) -> Self {
        Self {
            support_group_id,
            bot_id,
            welcome_message: relay.welcome_message.clone(),
            relay_failure_notice: relay.relay_failure_notice.clone(),
            topic_failure_notice: relay.topic_failure_notice.clone(),
        }
    }
}

/// Decides which events cross the relay and carries them to the other side
pub struct RelayRouter {
    settings: RouterSettings,
    store: IdentityStore,
    directory: TopicDirectory,
    recorder: MappingRecorder,
    transport: Arc<dyn Transport>,
    throttle: AutoReplyThrottle,
    lookup: Option<UserLookup>,
}

impl RelayRouter {
    pub fn new(
        settings: RouterSettings,
        store: IdentityStore,
        transport: Arc<dyn Transport>,
        throttle: AutoReplyThrottle,
        lookup: Option<UserLookup>,
    ) -> Self {
        Self {
            directory: TopicDirectory::new(store.clone(), Arc::clone(&transport)),
            recorder: MappingRecorder::new(store.clone()),
            settings,
            store,
            transport,
            throttle,
            lookup,
        }
    }

    pub fn throttle(&self) -> &AutoReplyThrottle {
        &self.throttle
    }

    /// `/start` in a private chat
    pub async fn handle_start(&self, msg: &InboundMessage) -> Result<RelayOutcome> {
        if let Err(e) = self
            .transport
            .send_text(msg.chat_id, None, &self.settings.welcome_message)
            .await
        {
            warn!(chat_id = msg.chat_id, error = %e, "Failed to send welcome message");
            return Ok(RelayOutcome::Failed);
        }
        Ok(RelayOutcome::Relayed)
    }

    /// User → support: copy the message into the user's topic
    pub async fn handle_user_message(&self, msg: &InboundMessage) -> Result<RelayOutcome> {
        let Some(author) = msg.author.as_ref() else {
            return Ok(RelayOutcome::Ignored(IgnoreReason::NoAuthor));
        };
        let user_id = author.id;

        let resolved = match self.directory.resolve_or_create_topic(author).await {
            Ok(resolved) => resolved,
            Err(TopicError::Transport(e)) => {
                error!(user_id, error = %e, "Failed to create topic");
                self.notify_user(user_id, &self.settings.topic_failure_notice)
                    .await;
                return Ok(RelayOutcome::Failed);
            }
            Err(TopicError::Store(e)) => return Err(e),
        };
        let topic_id = resolved.id();
        if let ResolvedTopic::Created(_) = resolved {
            self.enrich_new_topic(author, topic_id).await;
        }

        // Thread the copy under the in-topic message the user replied to
        let reply_to = match &msg.reply_to {
            Some(target) => self.recorder.origin_of(target.message_id, user_id).await?,
            None => None,
        };

        let group_message_id = match self
            .transport
            .copy_content(
                msg.chat_id,
                msg.message_id,
                self.settings.support_group_id,
                Some(topic_id),
                reply_to,
            )
            .await
        {
            Ok(id) => id,
            Err(e) => {
                error!(
                    user_id,
                    topic_id,
                    message_id = msg.message_id,
                    error = %e,
                    "Failed to relay message into topic"
                );
                self.notify_user(user_id, &self.settings.relay_failure_notice)
                    .await;
                return Ok(RelayOutcome::Failed);
            }
        };

        self.recorder
            .record(MessageMapping {
                group_message_id,
                topic_id,
                client_message_id: msg.message_id,
                user_id,
            })
            .await?;

        self.throttle.on_user_message(user_id).await?;
        Ok(RelayOutcome::Relayed)
    }

    /// Support → user: relay replies to messages the engine placed in the topic
    pub async fn handle_support_message(&self, msg: &InboundMessage) -> Result<RelayOutcome> {
        let (topic_id, target) = match support_reply_target(msg, self.settings.bot_id) {
            Ok(eligible) => eligible,
            Err(reason) => return Ok(RelayOutcome::Ignored(reason)),
        };

        let Some(owner) = self.directory.owner_of(topic_id).await? else {
            debug!(topic_id, "message in orphaned topic");
            return Ok(RelayOutcome::Ignored(IgnoreReason::OrphanTopic));
        };
        if owner.card_message_id == Some(target.message_id) {
            debug!(topic_id, "reply to info card stays in the topic");
            return Ok(RelayOutcome::Ignored(IgnoreReason::InfoCard));
        }

        let reply_to = self.recorder.destination_of(target.message_id, topic_id).await?;

        let client_message_id = match self
            .transport
            .copy_content(
                self.settings.support_group_id,
                msg.message_id,
                owner.user_id as i64,
                None,
                reply_to,
            )
            .await
        {
            Ok(id) => id,
            Err(e) => {
                error!(
                    user_id = owner.user_id,
                    topic_id,
                    message_id = msg.message_id,
                    error = %e,
                    "Failed to relay reply to user"
                );
                return Ok(RelayOutcome::Failed);
            }
        };

        self.recorder
            .record(MessageMapping {
                group_message_id: msg.message_id,
                topic_id,
                client_message_id,
                user_id: owner.user_id,
            })
            .await?;

        self.acknowledge(msg.message_id, Acknowledgement::Delivered)
            .await;
        Ok(RelayOutcome::Relayed)
    }

    /// Re-apply a support edit to the message previously delivered to the user
    pub async fn handle_support_edit(&self, msg: &InboundMessage) -> Result<RelayOutcome> {
        if is_own_message(msg, self.settings.bot_id) {
            return Ok(RelayOutcome::Ignored(IgnoreReason::OwnMessage));
        }
        let Some(topic_id) = msg.topic_id else {
            return Ok(RelayOutcome::Ignored(IgnoreReason::NotInTopic));
        };

        let Some(owner) = self.directory.owner_of(topic_id).await? else {
            return Ok(RelayOutcome::Ignored(IgnoreReason::OrphanTopic));
        };

        let Some(client_message_id) = self
            .recorder
            .destination_of(msg.message_id, topic_id)
            .await?
        else {
            debug!(topic_id, message_id = msg.message_id, "edited message was never relayed");
            return Ok(RelayOutcome::Ignored(IgnoreReason::NotRelayed));
        };

        let chat = owner.user_id as i64;
        let result = match &msg.body {
            MessageBody::Text { text, entities } => {
                self.transport
                    .edit_text(chat, client_message_id, text, entities)
                    .await
            }
            MessageBody::Caption { caption, entities } => {
                self.transport
                    .edit_caption(chat, client_message_id, caption, entities)
                    .await
            }
            MessageBody::Empty => return Ok(RelayOutcome::Ignored(IgnoreReason::NoContent)),
        };

        if let Err(e) = result {
            error!(
                user_id = owner.user_id,
                topic_id,
                message_id = msg.message_id,
                client_message_id,
                error = %e,
                "Failed to edit message for user"
            );
            return Ok(RelayOutcome::Failed);
        }

        self.acknowledge(msg.message_id, Acknowledgement::Edited).await;
        info!(
            user_id = owner.user_id,
            message_id = msg.message_id,
            "Edit propagated to user"
        );
        Ok(RelayOutcome::Edited)
    }

    /// Retract command issued as a reply: best-effort delete on both sides
    pub async fn handle_retract_command(&self, msg: &InboundMessage) -> Result<RelayOutcome> {
        let Some(topic_id) = msg.topic_id else {
            return Ok(RelayOutcome::Ignored(IgnoreReason::NotInTopic));
        };
        let target = match msg.reply_to.as_ref() {
            None => return Ok(RelayOutcome::Ignored(IgnoreReason::NotAReply)),
            Some(target) if target.is_topic_marker => {
                return Ok(RelayOutcome::Ignored(IgnoreReason::TopicMarker))
            }
            Some(target) => target,
        };

        let Some(owner) = self.directory.owner_of(topic_id).await? else {
            return Ok(RelayOutcome::Ignored(IgnoreReason::OrphanTopic));
        };

        let group = self.settings.support_group_id;
        let Some(client_message_id) = self
            .recorder
            .destination_of(target.message_id, topic_id)
            .await?
        else {
            // Never relayed: only the command itself goes away
            if let Err(e) = self.transport.delete_message(group, msg.message_id).await {
                debug!(topic_id, error = %e, "Failed to delete retract command");
            }
            return Ok(RelayOutcome::Ignored(IgnoreReason::NotRelayed));
        };

        let (user_side, topic_side, command) = futures::join!(
            self.transport
                .delete_message(owner.user_id as i64, client_message_id),
            self.transport.delete_message(group, target.message_id),
            self.transport.delete_message(group, msg.message_id),
        );

        let mut failures = Vec::new();
        for (step, result) in [
            (RetractStep::UserMessage, user_side),
            (RetractStep::TopicMessage, topic_side),
            (RetractStep::Command, command),
        ] {
            if let Err(e) = result {
                warn!(
                    user_id = owner.user_id,
                    topic_id,
                    message_id = target.message_id,
                    error = %e,
                    "Failed to delete {}",
                    step
                );
                failures.push(step);
            }
        }

        // Removed regardless of the deletes so the mapping never gets stuck
        self.recorder.retract(target.message_id, topic_id).await?;

        if failures.is_empty() {
            info!(
                user_id = owner.user_id,
                message_id = target.message_id,
                "Message retracted on both sides"
            );
        } else {
            let failed: Vec<String> = failures.iter().map(ToString::to_string).collect();
            warn!(
                message_id = target.message_id,
                "Partial retraction, failed: {}",
                failed.join("; ")
            );
        }
        Ok(RelayOutcome::Retracted { failures })
    }

    async fn enrich_new_topic(&self, author: &Author, topic_id: i32) {
        let Some(lookup) = self.lookup.as_ref() else {
            return;
        };

        let record = match lookup.lookup(author.id).await {
            Ok(record) => record,
            Err(e) => {
                warn!(user_id = author.id, "User lookup failed: {:#}", e);
                return;
            }
        };

        let card = format_user_card(
            record.as_ref(),
            author.username.as_deref(),
            lookup.profile_base_url(),
        );
        let card_message_id = match self
            .transport
            .send_text(self.settings.support_group_id, Some(topic_id), &card)
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(user_id = author.id, topic_id, error = %e, "Failed to post info card");
                None
            }
        };

        if let Err(e) = self
            .store
            .set_enrichment(author.id, record.is_some(), card_message_id)
            .await
        {
            warn!(user_id = author.id, "Failed to store enrichment: {:#}", e);
        }
    }

    async fn acknowledge(&self, message_id: i32, ack: Acknowledgement) {
        if let Err(e) = self
            .transport
            .set_acknowledgement(self.settings.support_group_id, message_id, ack)
            .await
        {
            warn!(message_id, error = %e, "Failed to set {:?} marker", ack);
        }
    }

    async fn notify_user(&self, user_id: u64, notice: &str) {
        if let Err(e) = self.transport.send_text(user_id as i64, None, notice).await {
            warn!(user_id, error = %e, "Failed to send failure notice");
        }
    }
}

fn is_own_message(msg: &InboundMessage, bot_id: u64) -> bool {
    msg.author.as_ref().is_some_and(|a| a.id == bot_id)
}

/// Eligibility filter for support-side messages: returns the topic and the
/// engine-authored message being answered.
pub fn support_reply_target(
    msg: &InboundMessage,
    bot_id: u64,
) -> std::result::Result<(i32, &ReplyTarget), IgnoreReason> {
    if is_own_message(msg, bot_id) {
        return Err(IgnoreReason::OwnMessage);
    }
    let topic_id = msg.topic_id.ok_or(IgnoreReason::NotInTopic)?;
    let target = msg.reply_to.as_ref().ok_or(IgnoreReason::NotAReply)?;
    if target.is_topic_marker {
        return Err(IgnoreReason::TopicMarker);
    }
    if target.author_id != Some(bot_id) {
        return Err(IgnoreReason::ReplyToColleague);
    }
    Ok((topic_id, target))
}

/// Matches `/cmd`, `/cmd@bot` and `/cmd args`
pub fn is_command(text: &str, command: &str, bot_username: Option<&str>) -> bool {
    let Some(first) = text.split_whitespace().next() else {
        return false;
    };
    let (name, mention) = match first.split_once('@') {
        Some((name, mention)) => (name, Some(mention)),
        None => (first, None),
    };
    if name != command {
        return false;
    }
    match (mention, bot_username) {
        (Some(mention), Some(bot)) => mention.eq_ignore_ascii_case(bot),
        _ => true,
    }
}
