use std::path::PathBuf;

use crate::domain::{ChatId, ContactId, MessageId};

/// A participant of a conversation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Contact {
    pub id: ContactId,
    pub addr: String,
}

impl Contact {
    pub fn is_self(&self) -> bool {
        self.id == ContactId::SELF
    }
}

/// Snapshot of a conversation ("chat") as seen by the transport.
#[derive(Clone, Debug)]
pub struct Conversation {
    pub id: ChatId,
    pub title: String,
    pub image: Option<PathBuf>,
    pub members: Vec<Contact>,
    /// Cryptographically verified group.
    pub protected: bool,
}

impl Conversation {
    pub fn has_member(&self, contact_id: ContactId) -> bool {
        self.members.iter().any(|c| c.id == contact_id)
    }
}

/// Declared kind of an attachment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewType {
    Text,
    Image,
    Gif,
    Sticker,
    Audio,
    Voice,
    Video,
    File,
    Other,
}

impl ViewType {
    pub fn is_image(self) -> bool {
        matches!(self, ViewType::Image | ViewType::Gif | ViewType::Sticker)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    pub path: PathBuf,
    pub kind: ViewType,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageState {
    Incoming,
    Pending,
    Delivered,
    Failed,
}

/// A message loaded from the transport.
#[derive(Clone, Debug)]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender: Contact,
    pub text: String,
    pub attachment: Option<Attachment>,
    /// The single message this one replies to.
    pub quote: Option<MessageId>,
    /// Membership/title/image notices generated by the transport.
    pub is_system: bool,
    pub state: MessageState,
}

/// A message to be sent.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub text: String,
    pub attachment: Option<Attachment>,
    pub quote: Option<MessageId>,
    /// Shown instead of the bot's display name.
    pub override_sender_name: Option<String>,
}

impl OutgoingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn reply(text: impl Into<String>, quote: MessageId) -> Self {
        Self {
            text: text.into(),
            quote: Some(quote),
            ..Self::default()
        }
    }

    /// Copy the content (text and attachment) of a received message.
    pub fn copy_of(msg: &Message) -> Self {
        Self {
            text: msg.text.clone(),
            attachment: msg.attachment.clone(),
            ..Self::default()
        }
    }

    pub fn with_sender_name(mut self, name: impl Into<String>) -> Self {
        self.override_sender_name = Some(name.into());
        self
    }
}

/// Events pushed by the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    IncomingMessage { chat_id: ChatId, msg_id: MessageId },
    MessageDelivered { chat_id: ChatId, msg_id: MessageId },
    MessageFailed { chat_id: ChatId, msg_id: MessageId },
    ChatModified { chat_id: ChatId },
    /// A contact finished a verified join (e.g. scanned the crew invite).
    ContactJoined { contact_id: ContactId },
}
