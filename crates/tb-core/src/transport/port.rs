use std::path::Path;

use async_trait::async_trait;

use crate::{
    domain::{ChatId, ContactId, MessageId},
    transport::types::{Contact, Conversation, Message, OutgoingMessage},
    Result,
};

/// Port to the secure-messaging transport.
///
/// Implementations must be cheap to share (`Arc<dyn Transport>`); every call
/// may be issued concurrently from the router and from delivery supervisors.
#[async_trait]
pub trait Transport: Send + Sync {
    /// The bot's own contact (id is always [`ContactId::SELF`]).
    async fn self_contact(&self) -> Result<Contact>;

    async fn display_name(&self) -> Result<Option<String>>;
    async fn set_display_name(&self, name: &str) -> Result<()>;
    async fn set_avatar(&self, image: Option<&Path>) -> Result<()>;

    /// All conversation ids known to the account, in no particular order.
    async fn chat_ids(&self) -> Result<Vec<ChatId>>;
    async fn chat(&self, chat_id: ChatId) -> Result<Conversation>;
    /// Message ids of a conversation, oldest first.
    async fn message_ids(&self, chat_id: ChatId) -> Result<Vec<MessageId>>;
    async fn message(&self, msg_id: MessageId) -> Result<Message>;
    /// Human-readable delivery diagnostic for a message.
    async fn message_info(&self, msg_id: MessageId) -> Result<String>;

    /// Look up (or create) the contact for an address.
    async fn lookup_contact(&self, addr: &str) -> Result<ContactId>;

    async fn create_group(
        &self,
        title: &str,
        members: &[ContactId],
        protected: bool,
    ) -> Result<ChatId>;
    async fn set_chat_name(&self, chat_id: ChatId, title: &str) -> Result<()>;
    async fn set_chat_image(&self, chat_id: ChatId, image: Option<&Path>) -> Result<()>;
    async fn add_member(&self, chat_id: ChatId, contact_id: ContactId) -> Result<()>;
    async fn remove_member(&self, chat_id: ChatId, contact_id: ContactId) -> Result<()>;

    async fn send(&self, chat_id: ChatId, msg: OutgoingMessage) -> Result<MessageId>;

    /// Verified-contact invite text; with a chat id, an invite to join that group.
    async fn invite(&self, chat_id: Option<ChatId>) -> Result<String>;
}
