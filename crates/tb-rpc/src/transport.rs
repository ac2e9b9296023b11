//! [`Transport`] implementation backed by `deltachat-rpc-server`.

use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use tb_core::{
    domain::{ChatId, ContactId, MessageId},
    transport::{
        port::Transport,
        types::{Contact, Conversation, Message, OutgoingMessage, TransportEvent},
    },
    Result,
};

use crate::{
    client::RpcClient,
    mapping::{message_data, transport_event, RpcContact, RpcEventEnvelope, RpcFullChat, RpcMessage},
};

/// One Delta Chat account driven through the rpc server.
pub struct RpcTransport {
    rpc: Arc<RpcClient>,
    account: u32,
}

impl RpcTransport {
    /// Start the rpc server and select its account, creating one if needed.
    pub async fn spawn(server: &Path, accounts_dir: &Path) -> Result<Self> {
        let rpc = RpcClient::spawn(server, accounts_dir).await?;
        let ids: Vec<u32> = rpc.call_as("get_all_account_ids", json!([])).await?;
        let account = match ids.as_slice() {
            [] => {
                tracing::info!("creating a new account");
                rpc.call_as("add_account", json!([])).await?
            }
            [id] => *id,
            [id, ..] => {
                tracing::warn!(account = id, "several accounts found; using the first one");
                *id
            }
        };
        Ok(Self { rpc, account })
    }

    pub async fn is_configured(&self) -> Result<bool> {
        self.call_as("is_configured", json!([self.account])).await
    }

    /// Log in with `email`/`password`. Blocks until the account is configured.
    pub async fn configure(&self, email: &str, password: &str) -> Result<()> {
        self.set_config("addr", Some(email)).await?;
        self.set_config("mail_pw", Some(password)).await?;
        tracing::info!(addr = email, "configuring account");
        self.call("configure", json!([self.account])).await?;
        tracing::info!("account configured");
        Ok(())
    }

    /// Mark the account as a bot and keep copies of its own sent messages.
    pub async fn prepare_bot(&self) -> Result<()> {
        self.set_config("bot", Some("1")).await?;
        self.set_config("bcc_self", Some("1")).await
    }

    pub async fn start_io(&self) -> Result<()> {
        self.call("start_io", json!([self.account])).await.map(|_| ())
    }

    /// Pump server events for this account into a channel until `shutdown`
    /// fires or the server goes away.
    pub fn events(&self, shutdown: CancellationToken) -> mpsc::UnboundedReceiver<TransportEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let rpc = self.rpc.clone();
        let account = self.account;
        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    next = rpc.call_as::<RpcEventEnvelope>("get_next_event", json!([])) => next,
                };
                let envelope = match next {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        tracing::error!("event stream ended: {e}");
                        break;
                    }
                };
                let Some(event) = transport_event(account, envelope) else {
                    continue;
                };
                if tx.send(event).is_err() {
                    break;
                }
            }
        });
        rx
    }

    /// Stop network activity and the server process.
    pub async fn shutdown(&self) -> Result<()> {
        if let Err(e) = self.call("stop_io", json!([self.account])).await {
            tracing::debug!("stop_io failed: {e}");
        }
        self.rpc.shutdown().await
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.rpc.call(method, params).await
    }

    async fn call_as<T: serde::de::DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        self.rpc.call_as(method, params).await
    }

    async fn set_config(&self, key: &str, value: Option<&str>) -> Result<()> {
        self.call("set_config", json!([self.account, key, value]))
            .await
            .map(|_| ())
    }

    async fn get_config(&self, key: &str) -> Result<Option<String>> {
        self.call_as("get_config", json!([self.account, key])).await
    }
}

#[async_trait]
impl Transport for RpcTransport {
    async fn self_contact(&self) -> Result<Contact> {
        let c: RpcContact = self
            .call_as("get_contact", json!([self.account, ContactId::SELF.0]))
            .await?;
        Ok(c.into())
    }

    async fn display_name(&self) -> Result<Option<String>> {
        self.get_config("displayname").await
    }

    async fn set_display_name(&self, name: &str) -> Result<()> {
        self.set_config("displayname", Some(name)).await
    }

    async fn set_avatar(&self, image: Option<&Path>) -> Result<()> {
        let path = image.map(|p| p.to_string_lossy().into_owned());
        self.set_config("selfavatar", path.as_deref()).await
    }

    async fn chat_ids(&self) -> Result<Vec<ChatId>> {
        let ids: Vec<u32> = self
            .call_as(
                "get_chatlist_entries",
                json!([self.account, null, null, null]),
            )
            .await?;
        Ok(ids.into_iter().map(ChatId).collect())
    }

    async fn chat(&self, chat_id: ChatId) -> Result<Conversation> {
        let chat: RpcFullChat = self
            .call_as("get_full_chat_by_id", json!([self.account, chat_id.0]))
            .await?;
        Ok(chat.into())
    }

    async fn message_ids(&self, chat_id: ChatId) -> Result<Vec<MessageId>> {
        let ids: Vec<u32> = self
            .call_as(
                "get_message_ids",
                json!([self.account, chat_id.0, false, false]),
            )
            .await?;
        Ok(ids.into_iter().map(MessageId).collect())
    }

    async fn message(&self, msg_id: MessageId) -> Result<Message> {
        let msg: RpcMessage = self
            .call_as("get_message", json!([self.account, msg_id.0]))
            .await?;
        Ok(msg.into())
    }

    async fn message_info(&self, msg_id: MessageId) -> Result<String> {
        self.call_as("get_message_info", json!([self.account, msg_id.0]))
            .await
    }

    async fn lookup_contact(&self, addr: &str) -> Result<ContactId> {
        let id: u32 = self
            .call_as("create_contact", json!([self.account, addr, null]))
            .await?;
        Ok(ContactId(id))
    }

    async fn create_group(
        &self,
        title: &str,
        members: &[ContactId],
        protected: bool,
    ) -> Result<ChatId> {
        let id: u32 = self
            .call_as("create_group_chat", json!([self.account, title, protected]))
            .await?;
        let chat_id = ChatId(id);
        for member in members {
            self.add_member(chat_id, *member).await?;
        }
        Ok(chat_id)
    }

    async fn set_chat_name(&self, chat_id: ChatId, title: &str) -> Result<()> {
        self.call("set_chat_name", json!([self.account, chat_id.0, title]))
            .await
            .map(|_| ())
    }

    async fn set_chat_image(&self, chat_id: ChatId, image: Option<&Path>) -> Result<()> {
        let path = image.map(|p| p.to_string_lossy().into_owned());
        self.call(
            "set_chat_profile_image",
            json!([self.account, chat_id.0, path]),
        )
        .await
        .map(|_| ())
    }

    async fn add_member(&self, chat_id: ChatId, contact_id: ContactId) -> Result<()> {
        self.call(
            "add_contact_to_chat",
            json!([self.account, chat_id.0, contact_id.0]),
        )
        .await
        .map(|_| ())
    }

    async fn remove_member(&self, chat_id: ChatId, contact_id: ContactId) -> Result<()> {
        self.call(
            "remove_contact_from_chat",
            json!([self.account, chat_id.0, contact_id.0]),
        )
        .await
        .map(|_| ())
    }

    async fn send(&self, chat_id: ChatId, msg: OutgoingMessage) -> Result<MessageId> {
        let id: u32 = self
            .call_as(
                "send_msg",
                json!([self.account, chat_id.0, message_data(&msg)]),
            )
            .await?;
        Ok(MessageId(id))
    }

    async fn invite(&self, chat_id: Option<ChatId>) -> Result<String> {
        self.call_as(
            "get_chat_securejoin_qr_code",
            json!([self.account, chat_id.map(|c| c.0)]),
        )
        .await
    }
}
