use thiserror::Error;

/// A failed call to the messaging transport
#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Telegram(#[from] teloxide::RequestError),

    #[error("{message}")]
    Message { message: String },
}

impl TransportError {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }
}

/// Why an inbound event did not cross the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Authored by the engine itself
    OwnMessage,
    /// Not attributed to a topic
    NotInTopic,
    /// Not a reply, so internal discussion
    NotAReply,
    /// Reply to the synthetic "topic created" marker
    TopicMarker,
    /// Reply to a colleague's message rather than one the engine placed
    ReplyToColleague,
    /// Reply to the engine's info card, which is internal to support
    InfoCard,
    /// Topic with no owning user
    OrphanTopic,
    /// Target message was never relayed
    NotRelayed,
    /// Nothing to relay (e.g. an edit without text or caption)
    NoContent,
    /// No sender attached, as with anonymous channel posts
    NoAuthor,
}

/// Result of handling one inbound event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    Relayed,
    Edited,
    Retracted { failures: Vec<RetractStep> },
    Ignored(IgnoreReason),
    /// Transport failure, already logged
    Failed,
}

/// One leg of the three-way retraction cleanup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetractStep {
    UserMessage,
    TopicMessage,
    Command,
}

impl std::fmt::Display for RetractStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetractStep::UserMessage => write!(f, "user message"),
            RetractStep::TopicMessage => write!(f, "topic message"),
            RetractStep::Command => write!(f, "retract command"),
        }
    }
}
