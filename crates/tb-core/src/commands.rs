//! Slash-commands issued in the crew conversation.

use std::sync::Arc;

use crate::{
    domain::{ChatId, ContactId},
    forward::Forwarder,
    lifecycle::RelayOrigin,
    store::RelayStore,
    transport::{
        port::Transport,
        types::{Message, OutgoingMessage},
    },
    Result,
};

/// A parsed crew command. Arguments borrow from the message text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CrewCommand<'a> {
    Help,
    SetName(Option<&'a str>),
    SetAvatar,
    GenerateInvite,
    StartChat(&'a str),
    SetOutsideHelp(Option<&'a str>),
}

/// Parse a crew message. Unknown commands (including `/cmd@someone` chatter)
/// yield `None` and are ignored without a reply.
pub fn parse_command(text: &str) -> Option<CrewCommand<'_>> {
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or("");
    let rest = parts.next().map(str::trim).filter(|s| !s.is_empty());

    let cmd = match name {
        "/help" => CrewCommand::Help,
        "/set_name" => CrewCommand::SetName(rest),
        "/set_avatar" => CrewCommand::SetAvatar,
        "/generate-invite" => CrewCommand::GenerateInvite,
        "/start_chat" => CrewCommand::StartChat(rest.unwrap_or("")),
        "/set_outside_help" => CrewCommand::SetOutsideHelp(rest),
        _ => return None,
    };
    Some(cmd)
}

/// Help text listing all crew commands.
pub fn crew_help() -> String {
    "\
Start a chat:\t/start_chat alice@example.org,bob@example.org Chat_Title Hello friends!
Change the bot's name:\t/set_name Name
Change the bot's avatar:\t/set_avatar <attach image>
Generate an invite for the bot:\t/generate-invite
Show this help text:\t\t/help
Change the help message for outsiders:\t/set_outside_help Hello outsider"
        .to_string()
}

/// Arguments of `/start_chat <addr,addr> <Title_With_Underscores> <text...>`.
#[derive(Clone, Debug, PartialEq, Eq)]
struct StartChatArgs<'a> {
    recipients: Vec<&'a str>,
    title: String,
    text: &'a str,
}

fn parse_start_chat(args: &str) -> Option<StartChatArgs<'_>> {
    let mut parts = args.trim().splitn(3, char::is_whitespace);
    let recipients: Vec<&str> = parts
        .next()?
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    let title = parts.next().filter(|t| !t.is_empty())?.replace('_', " ");
    let text = parts.next().map(str::trim).unwrap_or("");
    if recipients.is_empty() {
        return None;
    }
    Some(StartChatArgs {
        recipients,
        title,
        text,
    })
}

pub struct CommandDispatcher {
    transport: Arc<dyn Transport>,
    store: Arc<RelayStore>,
    forwarder: Arc<Forwarder>,
}

impl CommandDispatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<RelayStore>,
        forwarder: Arc<Forwarder>,
    ) -> Self {
        Self {
            transport,
            store,
            forwarder,
        }
    }

    /// Run the command in `msg` and send the quoted reply. Returns the parsed
    /// command, or `None` when it was ignored.
    pub async fn dispatch<'m>(&self, msg: &'m Message) -> Result<Option<CrewCommand<'m>>> {
        let Some(cmd) = parse_command(&msg.text) else {
            tracing::debug!(text = %msg.text, "ignoring unknown command");
            return Ok(None);
        };
        tracing::debug!(sender = %msg.sender.addr, ?cmd, "handling command");

        let reply = match cmd {
            CrewCommand::Help => crew_help(),
            CrewCommand::SetName(name) => self.set_name(name).await?,
            CrewCommand::SetAvatar => self.set_avatar(msg).await?,
            CrewCommand::GenerateInvite => self.transport.invite(None).await?,
            CrewCommand::StartChat(args) => self.start_chat(msg, args).await,
            CrewCommand::SetOutsideHelp(text) => self.set_outside_help(text)?,
        };

        self.transport
            .send(msg.chat_id, OutgoingMessage::reply(reply, msg.id))
            .await?;
        Ok(Some(cmd))
    }

    async fn set_name(&self, name: Option<&str>) -> Result<String> {
        let Some(name) = name else {
            return Ok("Please give the new name: /set_name Name".to_string());
        };
        self.transport.set_display_name(name).await?;
        Ok(format!("Display name changed to {name}"))
    }

    async fn set_avatar(&self, msg: &Message) -> Result<String> {
        let Some(image) = msg.attachment.as_ref().filter(|a| a.kind.is_image()) else {
            return Ok("Please attach an image so the avatar can be changed.".to_string());
        };
        tracing::debug!(path = %image.path.display(), "setting avatar");
        self.transport.set_avatar(Some(&image.path)).await?;
        self.transport
            .set_chat_image(msg.chat_id, Some(&image.path))
            .await?;
        Ok("Avatar changed to this image.".to_string())
    }

    fn set_outside_help(&self, text: Option<&str>) -> Result<String> {
        match text {
            None => {
                self.store.set_outside_help("")?;
                Ok("Removed help message for outsiders".to_string())
            }
            Some(text) => {
                self.store.set_outside_help(text)?;
                Ok(format!("Set help message for outsiders to {text}"))
            }
        }
    }

    /// Create an outbound group and relay its first message into a new relay
    /// group. Failures become the reply text.
    async fn start_chat(&self, command: &Message, args: &str) -> String {
        let Some(args) = parse_start_chat(args) else {
            return format!(
                "Please give recipients, a title and a message:\n\n{}",
                crew_help()
            );
        };
        tracing::info!(
            recipients = %args.recipients.join(", "),
            title = %args.title,
            "starting chat: {}",
            args.text
        );

        let chat_id = match self.create_outbound_chat(command, &args).await {
            Ok(chat_id) => chat_id,
            Err(e) => {
                tracing::error!("can't start chat: {e}");
                return format!("Something went wrong...\n\n{e}\n\n{}", crew_help());
            }
        };

        if let Err(e) = self.relay_started_chat(chat_id).await {
            tracing::error!(chat = %chat_id, "relaying started chat failed: {e}");
        }
        "Chat successfully created.".to_string()
    }

    async fn create_outbound_chat(
        &self,
        command: &Message,
        args: &StartChatArgs<'_>,
    ) -> Result<ChatId> {
        let mut contacts: Vec<ContactId> = Vec::with_capacity(args.recipients.len());
        for addr in &args.recipients {
            contacts.push(self.transport.lookup_contact(addr).await?);
        }
        let chat_id = self
            .transport
            .create_group(&args.title, &contacts, false)
            .await?;

        let first = OutgoingMessage {
            text: args.text.to_string(),
            attachment: command.attachment.clone(),
            ..OutgoingMessage::default()
        };
        if let Some(a) = &first.attachment {
            tracing::info!(kind = ?a.kind, path = %a.path.display(), "first message has an attachment");
        }
        self.transport.send(chat_id, first).await?;
        Ok(chat_id)
    }

    async fn relay_started_chat(&self, chat_id: ChatId) -> Result<()> {
        for id in self.transport.message_ids(chat_id).await? {
            let msg = self.transport.message(id).await?;
            if msg.is_system {
                continue;
            }
            self.forwarder.to_relay_group(&msg, RelayOrigin::Crew).await?;
        }
        Ok(())
    }
}
