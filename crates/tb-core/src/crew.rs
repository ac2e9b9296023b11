//! Crew directory: finds the active crew conversation and retires superseded
//! ones.

use std::sync::Arc;

use crate::{
    domain::{ChatId, ContactId, MessageId},
    errors::Error,
    store::RelayStore,
    transport::{
        port::Transport,
        types::{Contact, Conversation, OutgoingMessage},
    },
    utils::{crew_title, old_crew_title},
    Result,
};

/// Step of a crew handover that can fail independently.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetireStep {
    Rename,
    Notify,
    Leave,
}

#[derive(Debug)]
pub struct RetireFailure {
    pub chat_id: ChatId,
    pub step: RetireStep,
    pub error: Error,
}

#[derive(Debug, Default)]
pub struct CrewResolution {
    /// The authoritative crew, if any exists.
    pub crew: Option<ChatId>,
    /// Superseded crews handed over in this pass.
    pub retired: Vec<ChatId>,
    /// Handover notices sent into the retired crews.
    pub notices: Vec<MessageId>,
    pub failures: Vec<RetireFailure>,
}

pub struct CrewDirectory {
    transport: Arc<dyn Transport>,
    store: Arc<RelayStore>,
}

impl CrewDirectory {
    pub fn new(transport: Arc<dyn Transport>, store: Arc<RelayStore>) -> Self {
        Self { transport, store }
    }

    /// Scan all conversations for crews; keep the newest, retire the rest.
    ///
    /// The resolved crew is persisted. Retirement is best effort: failures are
    /// logged and returned, they never prevent resolving the new crew.
    pub async fn resolve_crew(&self) -> Result<CrewResolution> {
        let me = self.transport.self_contact().await?;
        let title = crew_title(&me.addr);

        let mut ids = self.transport.chat_ids().await?;
        // Chat ids grow with creation time: newest first.
        ids.sort_unstable_by(|a, b| b.cmp(a));

        let mut candidates = Vec::new();
        for id in ids {
            let chat = match self.transport.chat(id).await {
                Ok(chat) => chat,
                Err(e) => {
                    tracing::warn!(chat = %id, "skipping unreadable chat during crew scan: {e}");
                    continue;
                }
            };
            if is_crew_candidate(&chat, &title) {
                tracing::debug!(chat = %chat.id, title = %chat.title, "chat could be a crew");
                candidates.push(chat);
            } else {
                tracing::trace!(chat = %chat.id, title = %chat.title, "chat is not a crew");
            }
        }

        let mut candidates = candidates.into_iter();
        let Some(crew) = candidates.next() else {
            tracing::debug!("currently there is no crew");
            return Ok(CrewResolution::default());
        };
        self.store.set_crew_id(crew.id)?;

        let mut resolution = CrewResolution {
            crew: Some(crew.id),
            ..CrewResolution::default()
        };
        for old in candidates {
            let (notice, failures) = self.retire(&old, &crew, &me.addr).await;
            resolution.retired.push(old.id);
            resolution.notices.extend(notice);
            resolution.failures.extend(failures);
        }

        tracing::debug!(
            crew = %crew.id,
            members = %member_addrs(&crew.members).join(" or "),
            "resolved current crew"
        );
        Ok(resolution)
    }

    /// Hand an old crew over to the new one: rename it, tell its members where
    /// the new crew is, then leave it.
    async fn retire(
        &self,
        old: &Conversation,
        new_crew: &Conversation,
        bot_addr: &str,
    ) -> (Option<MessageId>, Vec<RetireFailure>) {
        let mut failures = Vec::new();
        let mut record = |step: RetireStep, result: Result<()>| {
            if let Err(error) = result {
                tracing::warn!(chat = %old.id, ?step, "retiring old crew failed: {error}");
                failures.push(RetireFailure {
                    chat_id: old.id,
                    step,
                    error,
                });
            }
        };

        let renamed = self
            .transport
            .set_chat_name(old.id, &old_crew_title(bot_addr))
            .await;
        record(RetireStep::Rename, renamed);

        let quit_message = handover_notice(new_crew);
        tracing::debug!(chat = %old.id, "sending quit message to old crew: {quit_message}");
        let notice = match self
            .transport
            .send(old.id, OutgoingMessage::text(quit_message))
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                record(RetireStep::Notify, Err(e));
                None
            }
        };

        let left = self.transport.remove_member(old.id, ContactId::SELF).await;
        record(RetireStep::Leave, left);

        (notice, failures)
    }

    /// Members of the current crew, including the bot itself.
    pub async fn crew_members(&self) -> Result<Vec<Contact>> {
        let Some(crew_id) = self.store.crew_id()? else {
            return Ok(Vec::new());
        };
        Ok(self.transport.chat(crew_id).await?.members)
    }

    /// Members of the current crew without the bot.
    pub async fn crew_members_except_self(&self) -> Result<Vec<Contact>> {
        Ok(self
            .crew_members()
            .await?
            .into_iter()
            .filter(|c| !c.is_self())
            .collect())
    }
}

fn is_crew_candidate(chat: &Conversation, crew_title: &str) -> bool {
    chat.protected && chat.members.len() > 1 && chat.title == crew_title
}

fn member_addrs(members: &[Contact]) -> Vec<&str> {
    members.iter().map(|c| c.addr.as_str()).collect()
}

fn handover_notice(new_crew: &Conversation) -> String {
    let people: Vec<&Contact> = new_crew.members.iter().filter(|c| !c.is_self()).collect();
    let addrs = people.iter().map(|c| c.addr.as_str()).collect::<Vec<_>>();
    format!(
        "There is a new Group for the Team now; you can ask {} to add you to it.",
        addrs.join(" or ")
    )
}
