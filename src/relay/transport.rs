use async_trait::async_trait;
use teloxide::types::MessageEntity;

use super::error::TransportError;

pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Marker set on an in-topic message so support sees the relay status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgement {
    Delivered,
    Edited,
}

impl Acknowledgement {
    pub fn emoji(self) -> &'static str {
        match self {
            Acknowledgement::Delivered => "✅",
            Acknowledgement::Edited => "✏️",
        }
    }
}

/// Send/copy/edit/delete primitives of the messaging platform.
/// Chat ids are platform chat ids; a user's private chat id equals their user id.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Create a topic in the support group, returning its id
    async fn create_topic(&self, name: &str) -> TransportResult<i32>;

    /// Copy a message's content (not a "forwarded from" citation) and return the new id.
    /// `reply_to` threads the copy under an existing message of the destination chat.
    async fn copy_content(
        &self,
        from_chat: i64,
        message_id: i32,
        to_chat: i64,
        topic_id: Option<i32>,
        reply_to: Option<i32>,
    ) -> TransportResult<i32>;

    async fn send_text(&self, chat: i64, topic_id: Option<i32>, text: &str)
        -> TransportResult<i32>;

    async fn edit_text(
        &self,
        chat: i64,
        message_id: i32,
        text: &str,
        entities: &[MessageEntity],
    ) -> TransportResult<()>;

    async fn edit_caption(
        &self,
        chat: i64,
        message_id: i32,
        caption: &str,
        entities: &[MessageEntity],
    ) -> TransportResult<()>;

    async fn delete_message(&self, chat: i64, message_id: i32) -> TransportResult<()>;

    async fn set_acknowledgement(
        &self,
        chat: i64,
        message_id: i32,
        ack: Acknowledgement,
    ) -> TransportResult<()>;
}

/// Who sent an inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub id: u64,
    pub first_name: String,
    pub username: Option<String>,
}

/// Summary of the message an inbound message replies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyTarget {
    pub message_id: i32,
    pub author_id: Option<u64>,
    /// The synthetic service message that opens every topic
    pub is_topic_marker: bool,
}

/// Text or caption of a message, with its rich-text spans
#[derive(Debug, Clone, PartialEq, Default)]
pub enum MessageBody {
    Text {
        text: String,
        entities: Vec<MessageEntity>,
    },
    Caption {
        caption: String,
        entities: Vec<MessageEntity>,
    },
    #[default]
    Empty,
}

impl MessageBody {
    pub fn text(&self) -> Option<&str> {
        match self {
            MessageBody::Text { text, .. } => Some(text),
            _ => None,
        }
    }
}

/// Platform-independent view of a new or edited message
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub chat_id: i64,
    pub message_id: i32,
    /// Set only for messages posted inside a topic
    pub topic_id: Option<i32>,
    pub author: Option<Author>,
    pub reply_to: Option<ReplyTarget>,
    pub body: MessageBody,
}
