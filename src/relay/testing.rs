//! In-process transport double for router, directory and throttle tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use teloxide::types::MessageEntity;

use super::error::TransportError;
use super::transport::{Acknowledgement, Transport, TransportResult};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CreateTopic {
        name: String,
    },
    Copy {
        from_chat: i64,
        message_id: i32,
        to_chat: i64,
        topic_id: Option<i32>,
        reply_to: Option<i32>,
    },
    SendText {
        chat: i64,
        topic_id: Option<i32>,
        text: String,
    },
    EditText {
        chat: i64,
        message_id: i32,
        text: String,
    },
    EditCaption {
        chat: i64,
        message_id: i32,
        caption: String,
    },
    Delete {
        chat: i64,
        message_id: i32,
    },
    Ack {
        chat: i64,
        message_id: i32,
        ack: Acknowledgement,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    CreateTopic,
    Copy,
    SendText,
    Edit,
    /// Deletes in the given chat fail
    DeleteIn(i64),
    Ack,
}

pub struct MockTransport {
    calls: Mutex<Vec<Call>>,
    failing: Mutex<HashSet<Op>>,
    next_topic_id: AtomicI32,
    next_message_id: AtomicI32,
    create_topic_delay: Duration,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            next_topic_id: AtomicI32::new(55),
            next_message_id: AtomicI32::new(1),
            create_topic_delay: Duration::ZERO,
        }
    }

    /// Make `create_topic` yield for a while so concurrent callers overlap
    pub fn with_create_topic_delay(mut self, delay: Duration) -> Self {
        self.create_topic_delay = delay;
        self
    }

    pub fn fail(&self, op: Op) {
        self.failing.lock().unwrap().insert(op);
    }

    pub fn recover(&self, op: Op) {
        self.failing.lock().unwrap().remove(&op);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: Call, op: Op) -> TransportResult<()> {
        self.calls.lock().unwrap().push(call);
        if self.failing.lock().unwrap().contains(&op) {
            return Err(TransportError::message(format!("{op:?} failed")));
        }
        Ok(())
    }

    fn next_message_id(&self) -> i32 {
        self.next_message_id.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn create_topic(&self, name: &str) -> TransportResult<i32> {
        if !self.create_topic_delay.is_zero() {
            tokio::time::sleep(self.create_topic_delay).await;
        }
        self.record(
            Call::CreateTopic {
                name: name.to_string(),
            },
            Op::CreateTopic,
        )?;
        Ok(self.next_topic_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn copy_content(
        &self,
        from_chat: i64,
        message_id: i32,
        to_chat: i64,
        topic_id: Option<i32>,
        reply_to: Option<i32>,
    ) -> TransportResult<i32> {
        self.record(
            Call::Copy {
                from_chat,
                message_id,
                to_chat,
                topic_id,
                reply_to,
            },
            Op::Copy,
        )?;
        Ok(self.next_message_id())
    }

    async fn send_text(
        &self,
        chat: i64,
        topic_id: Option<i32>,
        text: &str,
    ) -> TransportResult<i32> {
        self.record(
            Call::SendText {
                chat,
                topic_id,
                text: text.to_string(),
            },
            Op::SendText,
        )?;
        Ok(self.next_message_id())
    }

    async fn edit_text(
        &self,
        chat: i64,
        message_id: i32,
        text: &str,
        _entities: &[MessageEntity],
    ) -> TransportResult<()> {
        self.record(
            Call::EditText {
                chat,
                message_id,
                text: text.to_string(),
            },
            Op::Edit,
        )
    }

    async fn edit_caption(
        &self,
        chat: i64,
        message_id: i32,
        caption: &str,
        _entities: &[MessageEntity],
    ) -> TransportResult<()> {
        self.record(
            Call::EditCaption {
                chat,
                message_id,
                caption: caption.to_string(),
            },
            Op::Edit,
        )
    }

    async fn delete_message(&self, chat: i64, message_id: i32) -> TransportResult<()> {
        self.record(Call::Delete { chat, message_id }, Op::DeleteIn(chat))
    }

    async fn set_acknowledgement(
        &self,
        chat: i64,
        message_id: i32,
        ack: Acknowledgement,
    ) -> TransportResult<()> {
        self.record(
            Call::Ack {
                chat,
                message_id,
                ack,
            },
            Op::Ack,
        )
    }
}
