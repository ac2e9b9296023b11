//! Relay group lifecycle: creation on first contact and title/image sync.
//! Relay groups are never deleted.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    crew::CrewDirectory,
    domain::{ChatId, ContactId},
    errors::Error,
    store::RelayStore,
    transport::{
        port::Transport,
        types::{Conversation, OutgoingMessage},
    },
    utils::relay_title,
    Result,
};

/// Per-chat async locks.
#[derive(Default)]
pub struct ChatLocks {
    inner: Mutex<HashMap<ChatId, Arc<Mutex<()>>>>,
}

impl ChatLocks {
    pub async fn lock_chat(&self, chat_id: ChatId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(chat_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Drop the lock entry of a chat that needs no more serialization.
    /// Holders of the old lock keep it until they release it.
    pub async fn forget(&self, chat_id: ChatId) {
        self.inner.lock().await.remove(&chat_id);
    }

    #[cfg(test)]
    async fn tracked(&self) -> usize {
        self.inner.lock().await.len()
    }
}

/// Who caused a relay group to be created.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelayOrigin {
    /// An outsider wrote to the bot.
    Outsider,
    /// The crew started the conversation with `/start_chat`.
    Crew,
}

pub struct Lifecycle {
    transport: Arc<dyn Transport>,
    store: Arc<RelayStore>,
    crew: Arc<CrewDirectory>,
    creation_locks: ChatLocks,
}

impl Lifecycle {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<RelayStore>,
        crew: Arc<CrewDirectory>,
    ) -> Self {
        Self {
            transport,
            store,
            crew,
            creation_locks: ChatLocks::default(),
        }
    }

    /// Relay group of `outside`, created if this is the first contact.
    ///
    /// Lookup and creation run under a lock keyed by the outside chat, so two
    /// messages racing from a new conversation yield one relay group. Without
    /// a crew nothing is created: the group would have no one to relay to.
    pub async fn relay_group_for_or_create(
        &self,
        outside: &Conversation,
        origin: RelayOrigin,
    ) -> Result<ChatId> {
        if let Some(relay) = self.store.relay_group_for(outside.id)? {
            return Ok(relay);
        }

        let guard = self.creation_locks.lock_chat(outside.id).await;
        if let Some(relay) = self.store.relay_group_for(outside.id)? {
            return Ok(relay);
        }
        if self.store.crew_id()?.is_none() {
            return Err(Error::Mapping {
                chat: outside.id,
                reason: "no crew to relay to; run `team-bot init` first".to_string(),
            });
        }

        let created = self.create_relay_group(outside, origin).await;
        drop(guard);
        if created.is_ok() {
            // Mapped now; later lookups take the unlocked path.
            self.creation_locks.forget(outside.id).await;
        }
        created
    }

    async fn create_relay_group(&self, outside: &Conversation, origin: RelayOrigin) -> Result<ChatId> {
        let me = self.transport.self_contact().await?;
        let title = relay_title(&me.addr, &outside.title);
        let members: Vec<ContactId> = self
            .crew
            .crew_members_except_self()
            .await?
            .iter()
            .map(|c| c.id)
            .collect();

        tracing::info!(outside = %outside.id, "creating new relay group: '{title}'");
        let relay = self.transport.create_group(&title, &members, false).await?;
        // Record the pair right away; everything below is cosmetic.
        self.store.append_relay(outside.id, relay)?;

        if let Some(image) = &outside.image {
            if let Err(e) = self.transport.set_chat_image(relay, Some(image)).await {
                tracing::warn!(relay = %relay, "copying chat image to relay group failed: {e}");
            }
        }

        let explanation = explanation(origin, &outside.title);
        if let Err(e) = self
            .transport
            .send(relay, OutgoingMessage::text(explanation))
            .await
        {
            tracing::warn!(relay = %relay, "sending relay group explanation failed: {e}");
        }

        Ok(relay)
    }

    /// Copy the outside conversation's current image onto its relay group.
    pub async fn sync_image(&self, outside: &Conversation) -> Result<()> {
        let relay = self.existing_relay(outside.id)?;
        tracing::debug!(outside = %outside.id, relay = %relay, "syncing relay group image");
        self.transport
            .set_chat_image(relay, outside.image.as_deref())
            .await
    }

    /// Rename the relay group after the outside conversation's current title.
    pub async fn sync_title(&self, outside: &Conversation) -> Result<()> {
        let relay = self.existing_relay(outside.id)?;
        let me = self.transport.self_contact().await?;
        let title = relay_title(&me.addr, &outside.title);
        tracing::debug!(outside = %outside.id, relay = %relay, "renaming relay group to '{title}'");
        self.transport.set_chat_name(relay, &title).await
    }

    fn existing_relay(&self, outside: ChatId) -> Result<ChatId> {
        self.store
            .relay_group_for(outside)?
            .ok_or_else(|| Error::Mapping {
                chat: outside,
                reason: "no relay group for outside chat".to_string(),
            })
    }
}

fn explanation(origin: RelayOrigin, outside_title: &str) -> String {
    match origin {
        RelayOrigin::Outsider => format!(
            "This is the relay group for {outside_title}; I'll only forward 'direct replies' to the outside."
        ),
        RelayOrigin::Crew => {
            format!("We started a chat with {outside_title}. This was our first message:")
        }
    }
}
