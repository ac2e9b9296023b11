//! Message forwarding between outside conversations and relay groups.

use std::sync::Arc;

use crate::{
    domain::ChatId,
    lifecycle::{Lifecycle, RelayOrigin},
    store::RelayStore,
    transport::{
        port::Transport,
        types::{Message, OutgoingMessage},
    },
    Result,
};

pub struct Forwarder {
    transport: Arc<dyn Transport>,
    store: Arc<RelayStore>,
    lifecycle: Arc<Lifecycle>,
}

impl Forwarder {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<RelayStore>,
        lifecycle: Arc<Lifecycle>,
    ) -> Self {
        Self {
            transport,
            store,
            lifecycle,
        }
    }

    /// Copy `msg` into the relay group of its conversation, creating the group
    /// on first contact. The sender's address is shown as the sender name.
    pub async fn to_relay_group(&self, msg: &Message, origin: RelayOrigin) -> Result<ChatId> {
        let outside = self.transport.chat(msg.chat_id).await?;
        let relay = self
            .lifecycle
            .relay_group_for_or_create(&outside, origin)
            .await?;
        let copy = OutgoingMessage::copy_of(msg).with_sender_name(msg.sender.addr.clone());
        self.transport.send(relay, copy).await?;
        tracing::debug!(outside = %outside.id, relay = %relay, msg = %msg.id, "forwarded to relay group");
        Ok(relay)
    }

    /// Copy a crew reply from a relay group to the paired outside conversation.
    ///
    /// Returns `None` when the relay group has no paired conversation.
    pub async fn to_outside(&self, msg: &Message) -> Result<Option<ChatId>> {
        let Some(outside) = self.store.outside_chat_for(msg.chat_id)? else {
            tracing::error!(
                relay = %msg.chat_id,
                "couldn't find the corresponding outside chat for relay group"
            );
            return Ok(None);
        };
        self.transport
            .send(outside, OutgoingMessage::copy_of(msg))
            .await?;
        tracing::debug!(relay = %msg.chat_id, outside = %outside, msg = %msg.id, "forwarded to outsider");
        Ok(Some(outside))
    }
}
