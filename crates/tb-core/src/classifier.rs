//! Conversation role classification.

use std::sync::Arc;

use crate::{
    domain::ChatId,
    store::RelayStore,
    transport::{port::Transport, types::Conversation},
    utils::relay_tag,
    Result,
};

/// Role of a conversation from the bot's point of view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatRole {
    /// The verified group of operators.
    Crew,
    /// A group mirroring one outside conversation to the crew.
    RelayGroup,
    /// Anything else: a correspondent talking to the bot.
    Outside,
}

/// Read-only classifier; never mutates the relay store.
pub struct Classifier {
    transport: Arc<dyn Transport>,
    store: Arc<RelayStore>,
}

impl Classifier {
    pub fn new(transport: Arc<dyn Transport>, store: Arc<RelayStore>) -> Self {
        Self { transport, store }
    }

    pub async fn classify(&self, chat: &Conversation) -> Result<ChatRole> {
        let crew_id = self.store.crew_id()?;
        if crew_id == Some(chat.id) {
            return Ok(ChatRole::Crew);
        }
        if self.store.is_relay_group(chat.id)? {
            return Ok(ChatRole::RelayGroup);
        }
        if self.store.relay_group_for(chat.id)?.is_some() {
            return Ok(ChatRole::Outside);
        }

        // No durable record: fall back to the structural convention.
        if let Some(crew_id) = crew_id {
            if self.looks_like_relay_group(chat, crew_id).await? {
                tracing::debug!(chat = %chat.id, "unmapped chat looks like a relay group");
                return Ok(ChatRole::RelayGroup);
            }
        }
        Ok(ChatRole::Outside)
    }

    /// Structural relay-group check. Lookalike groups created by hand with the
    /// same title tag and membership also match.
    async fn looks_like_relay_group(&self, chat: &Conversation, crew_id: ChatId) -> Result<bool> {
        let me = self.transport.self_contact().await?;
        if !chat.title.starts_with(&relay_tag(&me.addr)) {
            return Ok(false); // relay groups are tagged with the bot's localpart
        }
        if chat.protected {
            return Ok(false); // relay groups are never verified groups
        }
        let ids = self.transport.message_ids(chat.id).await?;
        let Some(first) = ids.first() else {
            return Ok(false);
        };
        if !self.transport.message(*first).await?.sender.is_self() {
            return Ok(false); // relay groups are started by the bot
        }
        let crew = self.transport.chat(crew_id).await?;
        Ok(crew.members.iter().all(|m| chat.has_member(m.id)))
    }
}
