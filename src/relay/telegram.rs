use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use teloxide::payloads::setters::*;
use teloxide::prelude::*;
use teloxide::types::{MessageEntity, MessageId, ReactionType, ReplyParameters, ThreadId};
use tracing::{debug, error, info};

use super::error::RelayOutcome;
use super::router::{is_command, RelayRouter};
use super::transport::{
    Acknowledgement, Author, InboundMessage, MessageBody, ReplyTarget, Transport,
    TransportResult,
};

/// Telegram Bot API implementation of the relay transport
pub struct TelegramTransport {
    bot: Bot,
    support_group_id: ChatId,
}

impl TelegramTransport {
    pub fn new(bot: Bot, support_group_id: i64) -> Self {
        Self {
            bot,
            support_group_id: ChatId(support_group_id),
        }
    }
}

fn thread(topic_id: i32) -> ThreadId {
    ThreadId(MessageId(topic_id))
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn create_topic(&self, name: &str) -> TransportResult<i32> {
        let topic = self
            .bot
            .create_forum_topic(self.support_group_id, name)
            .await?;
        Ok(topic.thread_id.0 .0)
    }

    async fn copy_content(
        &self,
        from_chat: i64,
        message_id: i32,
        to_chat: i64,
        topic_id: Option<i32>,
        reply_to: Option<i32>,
    ) -> TransportResult<i32> {
        let mut request =
            self.bot
                .copy_message(ChatId(to_chat), ChatId(from_chat), MessageId(message_id));
        if let Some(topic_id) = topic_id {
            request = request.message_thread_id(thread(topic_id));
        }
        if let Some(reply_to) = reply_to {
            // The target may have been deleted in the meantime
            request = request.reply_parameters(
                ReplyParameters::new(MessageId(reply_to)).allow_sending_without_reply(),
            );
        }
        let copied = request.await?;
        Ok(copied.0)
    }

    async fn send_text(
        &self,
        chat: i64,
        topic_id: Option<i32>,
        text: &str,
    ) -> TransportResult<i32> {
        let mut request = self.bot.send_message(ChatId(chat), text);
        if let Some(topic_id) = topic_id {
            request = request.message_thread_id(thread(topic_id));
        }
        let sent = request.await?;
        Ok(sent.id.0)
    }

    async fn edit_text(
        &self,
        chat: i64,
        message_id: i32,
        text: &str,
        entities: &[MessageEntity],
    ) -> TransportResult<()> {
        let mut request = self
            .bot
            .edit_message_text(ChatId(chat), MessageId(message_id), text);
        if !entities.is_empty() {
            request = request.entities(entities.to_vec());
        }
        request.await?;
        Ok(())
    }

    async fn edit_caption(
        &self,
        chat: i64,
        message_id: i32,
        caption: &str,
        entities: &[MessageEntity],
    ) -> TransportResult<()> {
        let mut request = self
            .bot
            .edit_message_caption(ChatId(chat), MessageId(message_id))
            .caption(caption);
        if !entities.is_empty() {
            request = request.caption_entities(entities.to_vec());
        }
        request.await?;
        Ok(())
    }

    async fn delete_message(&self, chat: i64, message_id: i32) -> TransportResult<()> {
        self.bot
            .delete_message(ChatId(chat), MessageId(message_id))
            .await?;
        Ok(())
    }

    async fn set_acknowledgement(
        &self,
        chat: i64,
        message_id: i32,
        ack: Acknowledgement,
    ) -> TransportResult<()> {
        self.bot
            .set_message_reaction(ChatId(chat), MessageId(message_id))
            .reaction(vec![ReactionType::Emoji {
                emoji: ack.emoji().to_string(),
            }])
            .await?;
        Ok(())
    }
}

fn author_of(msg: &Message) -> Option<Author> {
    msg.from.as_ref().map(|user| Author {
        id: user.id.0,
        first_name: user.first_name.clone(),
        username: user.username.clone(),
    })
}

fn body_of(msg: &Message) -> MessageBody {
    if let Some(text) = msg.text() {
        return MessageBody::Text {
            text: text.to_string(),
            entities: msg.entities().map(<[_]>::to_vec).unwrap_or_default(),
        };
    }
    if let Some(caption) = msg.caption() {
        return MessageBody::Caption {
            caption: caption.to_string(),
            entities: msg.caption_entities().map(<[_]>::to_vec).unwrap_or_default(),
        };
    }
    MessageBody::Empty
}

/// Flatten a Telegram message into the relay's platform-independent view
pub fn inbound_from(msg: &Message) -> InboundMessage {
    let topic_id = if msg.is_topic_message {
        msg.thread_id.map(|thread| thread.0 .0)
    } else {
        None
    };

    let reply_to = msg.reply_to_message().map(|reply| ReplyTarget {
        message_id: reply.id.0,
        author_id: reply.from.as_ref().map(|user| user.id.0),
        is_topic_marker: reply.forum_topic_created().is_some(),
    });

    InboundMessage {
        chat_id: msg.chat.id.0,
        message_id: msg.id.0,
        topic_id,
        author: author_of(msg),
        reply_to,
        body: body_of(msg),
    }
}

/// Static routing facts shared with every handler
#[derive(Debug, Clone)]
pub struct DispatchContext {
    pub support_group_id: i64,
    pub retract_command: String,
    /// Accepted after `@` in commands
    pub bot_username: Option<String>,
}

/// Run the long-polling dispatcher until ctrl-c
pub async fn run(bot: Bot, router: Arc<RelayRouter>, context: DispatchContext) -> Result<()> {
    info!(
        support_group_id = context.support_group_id,
        "Starting Telegram dispatcher..."
    );

    let context = Arc::new(context);
    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(handle_message))
        .branch(Update::filter_edited_message().endpoint(handle_edited_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![router, context])
        .default_handler(|upd| async move {
            debug!("Unhandled update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("Telegram dispatcher stopped");
    Ok(())
}

async fn handle_message(
    msg: Message,
    router: Arc<RelayRouter>,
    context: Arc<DispatchContext>,
) -> ResponseResult<()> {
    let inbound = inbound_from(&msg);
    let bot_username = context.bot_username.as_deref();
    let command = inbound.body.text().filter(|text| text.starts_with('/'));

    let result = if msg.chat.is_private() {
        match command {
            Some(text) if is_command(text, "/start", bot_username) => {
                router.handle_start(&inbound).await
            }
            Some(text) => {
                debug!(chat_id = inbound.chat_id, "Ignoring private command {}", text);
                return Ok(());
            }
            None => router.handle_user_message(&inbound).await,
        }
    } else if inbound.chat_id == context.support_group_id {
        match command {
            Some(text) if is_command(text, &context.retract_command, bot_username) => {
                router.handle_retract_command(&inbound).await
            }
            // Other commands are for the group's own bots
            Some(_) => return Ok(()),
            None => router.handle_support_message(&inbound).await,
        }
    } else {
        debug!(chat_id = inbound.chat_id, "Message from unrelated chat");
        return Ok(());
    };

    report(&inbound, result);
    Ok(())
}

async fn handle_edited_message(
    msg: Message,
    router: Arc<RelayRouter>,
    context: Arc<DispatchContext>,
) -> ResponseResult<()> {
    let inbound = inbound_from(&msg);
    if inbound.chat_id != context.support_group_id {
        return Ok(());
    }

    let result = router.handle_support_edit(&inbound).await;
    report(&inbound, result);
    Ok(())
}

/// Router errors end the current event only; the dispatcher keeps running
fn report(inbound: &InboundMessage, result: Result<RelayOutcome>) {
    match result {
        Ok(RelayOutcome::Ignored(reason)) => debug!(
            chat_id = inbound.chat_id,
            message_id = inbound.message_id,
            "Ignored: {:?}",
            reason
        ),
        Ok(outcome) => debug!(
            chat_id = inbound.chat_id,
            message_id = inbound.message_id,
            "Outcome: {:?}",
            outcome
        ),
        Err(e) => error!(
            chat_id = inbound.chat_id,
            message_id = inbound.message_id,
            "Failed to handle message: {:#}",
            e
        ),
    }
}
