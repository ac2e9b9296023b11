//! Inbound routing: classify every incoming message and decide where it goes.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    classifier::{ChatRole, Classifier},
    commands::CommandDispatcher,
    config::DeliveryPolicy,
    crew::CrewDirectory,
    domain::{ChatId, MessageId},
    forward::Forwarder,
    lifecycle::{Lifecycle, RelayOrigin},
    store::RelayStore,
    transport::{
        notice::{self, SystemNotice},
        port::Transport,
        supervised::SupervisedTransport,
        types::{Conversation, Message, OutgoingMessage, TransportEvent},
    },
    utils::truncate_text,
    Result,
};

/// What the router did with one inbound message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Routed {
    Ignored,
    Command,
    HelpReply,
    ToRelayGroup(ChatId),
    ToOutside(ChatId),
    Synced(SystemNotice),
}

/// The relay bot: owns the core components and drains transport events.
pub struct Relay {
    transport: Arc<dyn Transport>,
    store: Arc<RelayStore>,
    classifier: Classifier,
    crew: Arc<CrewDirectory>,
    lifecycle: Arc<Lifecycle>,
    forwarder: Arc<Forwarder>,
    commands: CommandDispatcher,
}

impl Relay {
    /// Wire the core around `transport`. Outgoing messages are supervised for
    /// delivery until `shutdown` fires.
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<RelayStore>,
        policy: DeliveryPolicy,
        shutdown: CancellationToken,
    ) -> Self {
        let transport: Arc<dyn Transport> = Arc::new(SupervisedTransport::new(
            transport,
            store.clone(),
            policy,
            shutdown,
        ));
        let crew = Arc::new(CrewDirectory::new(transport.clone(), store.clone()));
        let lifecycle = Arc::new(Lifecycle::new(
            transport.clone(),
            store.clone(),
            crew.clone(),
        ));
        let forwarder = Arc::new(Forwarder::new(
            transport.clone(),
            store.clone(),
            lifecycle.clone(),
        ));
        Self {
            classifier: Classifier::new(transport.clone(), store.clone()),
            commands: CommandDispatcher::new(transport.clone(), store.clone(), forwarder.clone()),
            transport,
            store,
            crew,
            lifecycle,
            forwarder,
        }
    }

    /// Resolve the crew, then handle events until the channel closes or
    /// `shutdown` fires. Errors while handling one event never stop the loop.
    pub async fn run(
        &self,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let resolution = self.crew.resolve_crew().await?;
        match resolution.crew {
            Some(crew) => tracing::info!(crew = %crew, "relay bot running"),
            None => tracing::warn!(
                "there is no crew yet; outside messages are dropped until `team-bot init` ran"
            ),
        }

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("shutting down");
                    break;
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        tracing::info!("transport event stream closed");
                        break;
                    };
                    self.handle_event(event).await;
                }
            }
        }
        Ok(())
    }

    pub async fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::IncomingMessage { chat_id, msg_id } => {
                if let Err(e) = self.handle_incoming(msg_id).await {
                    tracing::error!(chat = %chat_id, msg = %msg_id, "handling message failed: {e}");
                }
            }
            TransportEvent::MessageDelivered { chat_id, msg_id } => {
                tracing::trace!(chat = %chat_id, msg = %msg_id, "message delivered");
            }
            TransportEvent::MessageFailed { chat_id, msg_id } => {
                tracing::debug!(chat = %chat_id, msg = %msg_id, "message failed");
            }
            TransportEvent::ChatModified { chat_id } => {
                tracing::trace!(chat = %chat_id, "chat modified");
            }
            TransportEvent::ContactJoined { contact_id } => {
                tracing::debug!(contact = %contact_id, "contact joined");
            }
        }
    }

    pub async fn handle_incoming(&self, msg_id: MessageId) -> Result<Routed> {
        let msg = self.transport.message(msg_id).await?;
        if msg.sender.is_self() {
            tracing::trace!(msg = %msg.id, "ignoring own message");
            return Ok(Routed::Ignored);
        }
        let chat = self.transport.chat(msg.chat_id).await?;
        tracing::info!(
            "New message from {} in chat {}: {}",
            msg.sender.addr,
            chat.title,
            truncate_text(&msg.text, 200)
        );

        let role = self.classifier.classify(&chat).await?;
        if let Some(notice) = notice::translate(&msg) {
            return self.handle_notice(role, notice, &chat).await;
        }

        match role {
            ChatRole::Crew => {
                if msg.text.starts_with('/') {
                    tracing::debug!("command was given: {}", msg.text);
                    self.commands.dispatch(&msg).await?;
                    Ok(Routed::Command)
                } else {
                    tracing::debug!("ignoring message, just the crew chatting");
                    Ok(Routed::Ignored)
                }
            }
            ChatRole::RelayGroup => self.handle_crew_reply(&msg).await,
            ChatRole::Outside => self.handle_outsider(&msg).await,
        }
    }

    async fn handle_notice(
        &self,
        role: ChatRole,
        notice: SystemNotice,
        chat: &Conversation,
    ) -> Result<Routed> {
        match role {
            ChatRole::Crew => Ok(Routed::Ignored),
            ChatRole::RelayGroup => {
                tracing::debug!(chat = %chat.id, ?notice, "system message in a relay group");
                Ok(Routed::Ignored)
            }
            ChatRole::Outside => {
                if self.store.relay_group_for(chat.id)?.is_none() {
                    tracing::debug!(chat = %chat.id, ?notice, "no relay group to sync yet");
                    return Ok(Routed::Ignored);
                }
                match notice {
                    SystemNotice::ImageChanged => self.lifecycle.sync_image(chat).await?,
                    SystemNotice::TitleChanged => self.lifecycle.sync_title(chat).await?,
                    SystemNotice::Other => return Ok(Routed::Ignored),
                }
                Ok(Routed::Synced(notice))
            }
        }
    }

    /// Only direct replies to the bot leave a relay group.
    async fn handle_crew_reply(&self, msg: &Message) -> Result<Routed> {
        if !self.quotes_bot(msg).await {
            tracing::debug!(msg = %msg.id, "ignoring message, just the crew chatting in a relay group");
            return Ok(Routed::Ignored);
        }
        match self.forwarder.to_outside(msg).await {
            Ok(Some(outside)) => Ok(Routed::ToOutside(outside)),
            Ok(None) => Ok(Routed::Ignored),
            Err(e) => {
                tracing::error!(relay = %msg.chat_id, "forwarding to outsider failed: {e}");
                self.transport
                    .send(
                        msg.chat_id,
                        OutgoingMessage::reply("Sending message failed.", msg.id),
                    )
                    .await?;
                Err(e)
            }
        }
    }

    async fn quotes_bot(&self, msg: &Message) -> bool {
        let Some(quote) = msg.quote else {
            return false;
        };
        match self.transport.message(quote).await {
            Ok(quoted) => quoted.sender.is_self(),
            Err(e) => {
                tracing::debug!(msg = %msg.id, quote = %quote, "quoted message unavailable: {e}");
                false
            }
        }
    }

    async fn handle_outsider(&self, msg: &Message) -> Result<Routed> {
        if msg.text.starts_with("/help") {
            tracing::info!("Outsider {} asked for help", msg.sender.addr);
            let help = match self.store.outside_help()? {
                Some(text) => text,
                None => self.default_outside_help().await?,
            };
            if !help.is_empty() {
                self.transport
                    .send(msg.chat_id, OutgoingMessage::reply(help, msg.id))
                    .await?;
                return Ok(Routed::HelpReply);
            }
            tracing::debug!("help message empty, forwarding message to relay group");
        }
        let relay = self
            .forwarder
            .to_relay_group(msg, RelayOrigin::Outsider)
            .await?;
        Ok(Routed::ToRelayGroup(relay))
    }

    async fn default_outside_help(&self) -> Result<String> {
        let name = match self.transport.display_name().await? {
            Some(name) if !name.is_empty() => name,
            _ => self.transport.self_contact().await?.addr,
        };
        Ok(format!("I forward messages to the {name} team."))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::domain::ContactId;
    use crate::store::tmp_store_path;
    use crate::transport::fake::FakeTransport;
    use crate::transport::types::{Attachment, MessageState, ViewType};
    use crate::utils::crew_title;

    const BOT: &str = "team@example.org";

    struct Fixture {
        fake: Arc<FakeTransport>,
        store: Arc<RelayStore>,
        relay: Relay,
        shutdown: CancellationToken,
        crew: ChatId,
        alice: ContactId,
        outsider: ContactId,
        outside: ChatId,
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            self.shutdown.cancel();
        }
    }

    fn fast_policy() -> DeliveryPolicy {
        DeliveryPolicy {
            poll_interval: Duration::from_millis(5),
            grace: Duration::from_millis(30),
        }
    }

    fn fixture(prefix: &str) -> Fixture {
        let fake = Arc::new(FakeTransport::new(BOT));
        let store = Arc::new(RelayStore::open(tmp_store_path(prefix)).unwrap());
        let alice = fake.add_contact("alice@example.org");
        let crew = fake.add_chat(&crew_title(BOT), &[alice], true);
        store.set_crew_id(crew).unwrap();
        let outsider = fake.add_contact("out@example.org");
        let outside = fake.add_chat("out@example.org", &[outsider], false);
        let shutdown = CancellationToken::new();
        let relay = Relay::new(fake.clone(), store.clone(), fast_policy(), shutdown.clone());
        Fixture {
            fake,
            store,
            relay,
            shutdown,
            crew,
            alice,
            outsider,
            outside,
        }
    }

    impl Fixture {
        async fn outsider_says(&self, text: &str) -> Routed {
            let msg = self.fake.receive(self.outside, self.outsider, text);
            self.relay.handle_incoming(msg.id).await.unwrap()
        }
    }

    #[tokio::test]
    async fn outsider_message_reaches_new_relay_group() {
        let f = fixture("router-first-contact");
        let Routed::ToRelayGroup(relay) = f.outsider_says("Hi there").await else {
            panic!("expected a relay");
        };

        assert_eq!(f.store.relay_group_for(f.outside).unwrap(), Some(relay));
        let group = f.fake.chat(relay).await.unwrap();
        assert_eq!(group.title, "[team] out@example.org");
        assert!(group.has_member(f.alice));
        assert!(!group.protected);

        let sent = f.fake.sent_to(relay);
        assert_eq!(sent.len(), 2);
        assert!(sent[0].text.starts_with("This is the relay group for out@example.org"));
        assert_eq!(sent[1].text, "Hi there");
        assert_eq!(sent[1].override_sender_name.as_deref(), Some("out@example.org"));

        // Second message reuses the group.
        assert_eq!(f.outsider_says("again").await, Routed::ToRelayGroup(relay));
        assert_eq!(f.store.relays().unwrap().len(), 1);
        assert_eq!(f.fake.sent_texts_to(relay).len(), 3);
    }

    #[tokio::test]
    async fn outsider_before_any_crew_is_not_mapped() {
        let fake = Arc::new(FakeTransport::new(BOT));
        let store = Arc::new(RelayStore::open(tmp_store_path("router-no-crew")).unwrap());
        let outsider = fake.add_contact("out@example.org");
        let outside = fake.add_chat("out@example.org", &[outsider], false);
        let shutdown = CancellationToken::new();
        let relay = Relay::new(fake.clone(), store.clone(), fast_policy(), shutdown.clone());

        let msg = fake.receive(outside, outsider, "hello");
        let err = relay.handle_incoming(msg.id).await.unwrap_err();
        assert!(matches!(err, crate::Error::Mapping { .. }));
        assert!(store.relays().unwrap().is_empty());
        assert_eq!(fake.newest_chat(), Some(outside));
        shutdown.cancel();
    }

    #[tokio::test]
    async fn attachments_are_forwarded() {
        let f = fixture("router-attachment");
        let msg = f.fake.receive_with_attachment(
            f.outside,
            f.outsider,
            "",
            Attachment {
                path: "/tmp/voice.opus".into(),
                kind: ViewType::Voice,
            },
        );
        let Routed::ToRelayGroup(relay) = f.relay.handle_incoming(msg.id).await.unwrap() else {
            panic!("expected a relay");
        };
        let copy = f.fake.sent_to(relay).pop().unwrap();
        assert_eq!(copy.attachment.unwrap().kind, ViewType::Voice);
    }

    #[tokio::test]
    async fn only_direct_replies_leave_the_relay_group() {
        let f = fixture("router-replies");
        let Routed::ToRelayGroup(relay) = f.outsider_says("question").await else {
            panic!("expected a relay");
        };
        let forwarded = *f.fake.sent_ids_to(relay).last().unwrap();

        let chatter = f.fake.receive(relay, f.alice, "who takes this one?");
        assert_eq!(f.relay.handle_incoming(chatter.id).await.unwrap(), Routed::Ignored);

        // Quoting a crew member is still chatter.
        let quoting_crew = f.fake.receive_reply(relay, f.alice, "me", chatter.id);
        assert_eq!(
            f.relay.handle_incoming(quoting_crew.id).await.unwrap(),
            Routed::Ignored
        );
        assert!(f.fake.sent_to(f.outside).is_empty());

        let answer = f.fake.receive_reply(relay, f.alice, "here is the answer", forwarded);
        assert_eq!(
            f.relay.handle_incoming(answer.id).await.unwrap(),
            Routed::ToOutside(f.outside)
        );
        let out = f.fake.sent_to(f.outside);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, "here is the answer");
        assert_eq!(out[0].override_sender_name, None);
    }

    #[tokio::test]
    async fn failed_forward_to_outsider_is_answered() {
        let f = fixture("router-forward-fails");
        let Routed::ToRelayGroup(relay) = f.outsider_says("question").await else {
            panic!("expected a relay");
        };
        let forwarded = *f.fake.sent_ids_to(relay).last().unwrap();
        f.fake.fail_sends_to(f.outside);

        let answer = f.fake.receive_reply(relay, f.alice, "answer", forwarded);
        assert!(f.relay.handle_incoming(answer.id).await.is_err());
        let last = f.fake.sent_to(relay).pop().unwrap();
        assert_eq!(last.text, "Sending message failed.");
        assert_eq!(last.quote, Some(answer.id));
    }

    #[tokio::test]
    async fn crew_chatter_is_ignored_and_commands_run() {
        let f = fixture("router-crew");
        let before = f.fake.sent_count();
        let msg = f.fake.receive(f.crew, f.alice, "lunch?");
        assert_eq!(f.relay.handle_incoming(msg.id).await.unwrap(), Routed::Ignored);
        assert_eq!(f.fake.sent_count(), before);

        let cmd = f.fake.receive(f.crew, f.alice, "/set_outside_help Write us!");
        assert_eq!(f.relay.handle_incoming(cmd.id).await.unwrap(), Routed::Command);
        assert_eq!(f.store.outside_help().unwrap().as_deref(), Some("Write us!"));
    }

    #[tokio::test]
    async fn outsider_help_has_three_states() {
        let f = fixture("router-help");
        f.fake.set_display_name_now("Support");

        assert_eq!(f.outsider_says("/help").await, Routed::HelpReply);
        assert_eq!(
            f.fake.sent_texts_to(f.outside).last().unwrap(),
            "I forward messages to the Support team."
        );

        f.store.set_outside_help("Ask us anything.").unwrap();
        assert_eq!(f.outsider_says("/help me").await, Routed::HelpReply);
        assert_eq!(
            f.fake.sent_texts_to(f.outside).last().unwrap(),
            "Ask us anything."
        );
        assert!(f.store.relays().unwrap().is_empty());

        f.store.set_outside_help("").unwrap();
        assert!(matches!(
            f.outsider_says("/help").await,
            Routed::ToRelayGroup(_)
        ));
        assert_eq!(f.fake.sent_to(f.outside).len(), 2);
    }

    #[tokio::test]
    async fn outside_title_and_image_changes_are_mirrored() {
        let f = fixture("router-sync");
        // Before any relay group exists, notices are dropped.
        let early = f.fake.receive_system(f.outside, "Group name changed from \"a\" to \"b\" by out@example.org.");
        assert_eq!(f.relay.handle_incoming(early.id).await.unwrap(), Routed::Ignored);

        let Routed::ToRelayGroup(relay) = f.outsider_says("hello").await else {
            panic!("expected a relay");
        };

        f.fake.set_chat_title_now(f.outside, "Renamed");
        let notice = f
            .fake
            .receive_system(f.outside, "Group name changed from \"x\" to \"Renamed\" by out@example.org.");
        assert_eq!(
            f.relay.handle_incoming(notice.id).await.unwrap(),
            Routed::Synced(SystemNotice::TitleChanged)
        );
        assert_eq!(f.fake.chat(relay).await.unwrap().title, "[team] Renamed");

        f.fake.set_chat_image_now(f.outside, "/tmp/new.png");
        let notice = f
            .fake
            .receive_system(f.outside, "Group image changed by out@example.org.");
        assert_eq!(
            f.relay.handle_incoming(notice.id).await.unwrap(),
            Routed::Synced(SystemNotice::ImageChanged)
        );
        assert_eq!(
            f.fake.chat(relay).await.unwrap().image,
            Some("/tmp/new.png".into())
        );

        // Notices inside the relay group itself change nothing.
        let inside = f.fake.receive_system(relay, "Group image changed by alice@example.org.");
        assert_eq!(f.relay.handle_incoming(inside.id).await.unwrap(), Routed::Ignored);
    }

    #[tokio::test]
    async fn failed_delivery_is_reported_in_relay_group() {
        let f = fixture("router-delivery");
        let Routed::ToRelayGroup(relay) = f.outsider_says("question").await else {
            panic!("expected a relay");
        };
        let forwarded = *f.fake.sent_ids_to(relay).last().unwrap();

        f.fake.set_send_state(MessageState::Failed);
        let answer = f.fake.receive_reply(relay, f.alice, "answer", forwarded);
        f.relay.handle_incoming(answer.id).await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        let reports: Vec<String> = f
            .fake
            .sent_texts_to(relay)
            .into_iter()
            .filter(|t| t.starts_with("Sending Message failed:"))
            .collect();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].contains("550 mailbox unavailable"));
    }

    #[tokio::test]
    async fn run_survives_bad_events_and_stops_on_shutdown() {
        let f = fixture("router-run");
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(TransportEvent::IncomingMessage {
            chat_id: ChatId(999),
            msg_id: MessageId(999),
        })
        .unwrap();
        let msg = f.fake.receive(f.outside, f.outsider, "still works");
        tx.send(TransportEvent::IncomingMessage {
            chat_id: f.outside,
            msg_id: msg.id,
        })
        .unwrap();

        let shutdown = f.shutdown.clone();
        let stopper = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            stopper.cancel();
        });
        f.relay.run(rx, shutdown).await.unwrap();

        assert_eq!(f.store.relays().unwrap().len(), 1);
        drop(tx);
    }
}
