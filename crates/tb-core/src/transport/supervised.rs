//! Outbound delivery supervision.
//!
//! [`SupervisedTransport`] decorates a [`Transport`] so that every sent message
//! is watched by its own task. A confirmed failure is reported into the relay
//! group paired with the conversation the message was sent to. Nothing is
//! retried.

use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use crate::{
    config::DeliveryPolicy,
    domain::{ChatId, ContactId, MessageId},
    store::RelayStore,
    transport::{
        port::Transport,
        types::{Contact, Conversation, Message, MessageState, OutgoingMessage},
    },
    Result,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Failed,
}

/// Transport decorator that spawns a delivery supervisor for each sent message.
pub struct SupervisedTransport {
    inner: Arc<dyn Transport>,
    store: Arc<RelayStore>,
    policy: DeliveryPolicy,
    shutdown: CancellationToken,
}

impl SupervisedTransport {
    pub fn new(
        inner: Arc<dyn Transport>,
        store: Arc<RelayStore>,
        policy: DeliveryPolicy,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inner,
            store,
            policy,
            shutdown,
        }
    }

    fn supervise(&self, chat_id: ChatId, msg_id: MessageId) {
        let inner = self.inner.clone();
        let store = self.store.clone();
        let policy = self.policy;
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = supervise_delivery(inner, store, policy, chat_id, msg_id) => {}
            }
        });
    }
}

/// Wait until `msg_id` is delivered or has conclusively failed.
///
/// A failure is only final once it has stayed failed for the grace window; the
/// transport may report a late success after an early failure.
pub async fn wait_for_outcome(
    transport: &dyn Transport,
    msg_id: MessageId,
    policy: DeliveryPolicy,
) -> Result<DeliveryOutcome> {
    loop {
        match transport.message(msg_id).await?.state {
            MessageState::Delivered | MessageState::Incoming => {
                return Ok(DeliveryOutcome::Delivered)
            }
            MessageState::Failed => break,
            MessageState::Pending => sleep(policy.poll_interval).await,
        }
    }

    let deadline = Instant::now() + policy.grace;
    loop {
        let now = Instant::now();
        if now >= deadline {
            return Ok(DeliveryOutcome::Failed);
        }
        sleep(policy.poll_interval.min(deadline - now)).await;
        if transport.message(msg_id).await?.state == MessageState::Delivered {
            tracing::debug!(msg = %msg_id, "message delivered after reported failure");
            return Ok(DeliveryOutcome::Delivered);
        }
    }
}

async fn supervise_delivery(
    transport: Arc<dyn Transport>,
    store: Arc<RelayStore>,
    policy: DeliveryPolicy,
    chat_id: ChatId,
    msg_id: MessageId,
) {
    match wait_for_outcome(transport.as_ref(), msg_id, policy).await {
        Ok(DeliveryOutcome::Delivered) => {
            tracing::debug!(chat = %chat_id, msg = %msg_id, "message delivered");
        }
        Ok(DeliveryOutcome::Failed) => {
            if let Err(e) = report_failure(transport.as_ref(), &store, chat_id, msg_id).await {
                tracing::error!(chat = %chat_id, msg = %msg_id, "reporting failed delivery: {e}");
            }
        }
        Err(e) => {
            tracing::warn!(chat = %chat_id, msg = %msg_id, "cannot supervise delivery: {e}");
        }
    }
}

async fn report_failure(
    transport: &dyn Transport,
    store: &RelayStore,
    chat_id: ChatId,
    msg_id: MessageId,
) -> Result<()> {
    let error = transport.message_info(msg_id).await?;
    tracing::warn!(chat = %chat_id, "Outgoing message failed. Forwarding error to relay group: {error}");

    let Some(relay_group) = store.relay_group_for(chat_id)? else {
        tracing::error!(chat = %chat_id, "no relay group to report the failed message to");
        return Ok(());
    };
    transport
        .send(
            relay_group,
            OutgoingMessage::text(format!("Sending Message failed:\n\n{error}")),
        )
        .await?;
    Ok(())
}

#[async_trait]
impl Transport for SupervisedTransport {
    async fn self_contact(&self) -> Result<Contact> {
        self.inner.self_contact().await
    }

    async fn display_name(&self) -> Result<Option<String>> {
        self.inner.display_name().await
    }

    async fn set_display_name(&self, name: &str) -> Result<()> {
        self.inner.set_display_name(name).await
    }

    async fn set_avatar(&self, image: Option<&Path>) -> Result<()> {
        self.inner.set_avatar(image).await
    }

    async fn chat_ids(&self) -> Result<Vec<ChatId>> {
        self.inner.chat_ids().await
    }

    async fn chat(&self, chat_id: ChatId) -> Result<Conversation> {
        self.inner.chat(chat_id).await
    }

    async fn message_ids(&self, chat_id: ChatId) -> Result<Vec<MessageId>> {
        self.inner.message_ids(chat_id).await
    }

    async fn message(&self, msg_id: MessageId) -> Result<Message> {
        self.inner.message(msg_id).await
    }

    async fn message_info(&self, msg_id: MessageId) -> Result<String> {
        self.inner.message_info(msg_id).await
    }

    async fn lookup_contact(&self, addr: &str) -> Result<ContactId> {
        self.inner.lookup_contact(addr).await
    }

    async fn create_group(
        &self,
        title: &str,
        members: &[ContactId],
        protected: bool,
    ) -> Result<ChatId> {
        self.inner.create_group(title, members, protected).await
    }

    async fn set_chat_name(&self, chat_id: ChatId, title: &str) -> Result<()> {
        self.inner.set_chat_name(chat_id, title).await
    }

    async fn set_chat_image(&self, chat_id: ChatId, image: Option<&Path>) -> Result<()> {
        self.inner.set_chat_image(chat_id, image).await
    }

    async fn add_member(&self, chat_id: ChatId, contact_id: ContactId) -> Result<()> {
        self.inner.add_member(chat_id, contact_id).await
    }

    async fn remove_member(&self, chat_id: ChatId, contact_id: ContactId) -> Result<()> {
        self.inner.remove_member(chat_id, contact_id).await
    }

    async fn send(&self, chat_id: ChatId, msg: OutgoingMessage) -> Result<MessageId> {
        let msg_id = self.inner.send(chat_id, msg).await?;
        self.supervise(chat_id, msg_id);
        Ok(msg_id)
    }

    async fn invite(&self, chat_id: Option<ChatId>) -> Result<String> {
        self.inner.invite(chat_id).await
    }
}
