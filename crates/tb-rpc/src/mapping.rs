//! Mapping between deltachat-jsonrpc objects and core transport types.

use std::path::PathBuf;

use serde::Deserialize;
use serde_json::{json, Value};

use tb_core::{
    domain::{ChatId, ContactId, MessageId},
    transport::types::{
        Attachment, Contact, Conversation, Message, MessageState, OutgoingMessage,
        TransportEvent, ViewType,
    },
};

/// Progress value of a finished secure-join handshake.
const SECUREJOIN_DONE: u32 = 1000;

#[derive(Clone, Debug, Deserialize)]
pub struct RpcContact {
    pub id: u32,
    pub address: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcFullChat {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub is_protected: bool,
    #[serde(default)]
    pub profile_image: Option<String>,
    #[serde(default)]
    pub contacts: Vec<RpcContact>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcQuote {
    pub kind: String,
    #[serde(default)]
    pub message_id: Option<u32>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcMessage {
    pub id: u32,
    pub chat_id: u32,
    pub sender: RpcContact,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub view_type: String,
    pub state: u32,
    #[serde(default)]
    pub is_info: bool,
    #[serde(default)]
    pub quote: Option<RpcQuote>,
}

/// Result of `get_next_event`.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcEventEnvelope {
    pub context_id: u32,
    pub event: RpcEvent,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "kind")]
pub enum RpcEvent {
    #[serde(rename_all = "camelCase")]
    IncomingMsg { chat_id: u32, msg_id: u32 },
    #[serde(rename_all = "camelCase")]
    MsgDelivered { chat_id: u32, msg_id: u32 },
    #[serde(rename_all = "camelCase")]
    MsgFailed { chat_id: u32, msg_id: u32 },
    #[serde(rename_all = "camelCase")]
    ChatModified { chat_id: u32 },
    #[serde(rename_all = "camelCase")]
    SecurejoinInviterProgress { contact_id: u32, progress: u32 },
    #[serde(rename_all = "camelCase")]
    Info { msg: String },
    #[serde(rename_all = "camelCase")]
    Warning { msg: String },
    #[serde(rename_all = "camelCase")]
    Error { msg: String },
    #[serde(other)]
    Other,
}

impl From<RpcContact> for Contact {
    fn from(c: RpcContact) -> Self {
        Contact {
            id: ContactId(c.id),
            addr: c.address,
        }
    }
}

impl From<RpcFullChat> for Conversation {
    fn from(c: RpcFullChat) -> Self {
        Conversation {
            id: ChatId(c.id),
            title: c.name,
            image: c.profile_image.filter(|p| !p.is_empty()).map(PathBuf::from),
            members: c.contacts.into_iter().map(Contact::from).collect(),
            protected: c.is_protected,
        }
    }
}

impl From<RpcMessage> for Message {
    fn from(m: RpcMessage) -> Self {
        let kind = view_type(&m.view_type);
        let attachment = m
            .file
            .filter(|f| !f.is_empty())
            .map(|path| Attachment {
                path: PathBuf::from(path),
                kind,
            });
        Message {
            id: MessageId(m.id),
            chat_id: ChatId(m.chat_id),
            sender: m.sender.into(),
            text: m.text,
            attachment,
            quote: m
                .quote
                .filter(|q| q.kind == "WithMessage")
                .and_then(|q| q.message_id)
                .map(MessageId),
            is_system: m.is_info,
            state: message_state(m.state),
        }
    }
}

/// Delta Chat message state codes.
pub fn message_state(code: u32) -> MessageState {
    match code {
        10 | 13 | 16 => MessageState::Incoming,
        24 => MessageState::Failed,
        26 | 28 => MessageState::Delivered,
        // 18 preparing, 19 draft, 20 pending and anything unknown.
        _ => MessageState::Pending,
    }
}

pub fn view_type(name: &str) -> ViewType {
    match name {
        "Text" => ViewType::Text,
        "Image" => ViewType::Image,
        "Gif" => ViewType::Gif,
        "Sticker" => ViewType::Sticker,
        "Audio" => ViewType::Audio,
        "Voice" => ViewType::Voice,
        "Video" => ViewType::Video,
        "File" => ViewType::File,
        _ => ViewType::Other,
    }
}

pub fn view_type_name(kind: ViewType) -> &'static str {
    match kind {
        ViewType::Text => "Text",
        ViewType::Image => "Image",
        ViewType::Gif => "Gif",
        ViewType::Sticker => "Sticker",
        ViewType::Audio => "Audio",
        ViewType::Voice => "Voice",
        ViewType::Video => "Video",
        ViewType::File | ViewType::Other => "File",
    }
}

/// `MessageData` payload for `send_msg`.
pub fn message_data(msg: &OutgoingMessage) -> Value {
    let mut data = json!({ "text": msg.text });
    if let Some(a) = &msg.attachment {
        data["file"] = json!(a.path.to_string_lossy());
        data["viewtype"] = json!(view_type_name(a.kind));
    }
    if let Some(quote) = msg.quote {
        data["quotedMessageId"] = json!(quote.0);
    }
    if let Some(name) = &msg.override_sender_name {
        data["overrideSenderName"] = json!(name);
    }
    data
}

/// Translate a server event for `account`; `None` for events the core ignores.
pub fn transport_event(account: u32, envelope: RpcEventEnvelope) -> Option<TransportEvent> {
    if envelope.context_id != account {
        return None;
    }
    match envelope.event {
        RpcEvent::IncomingMsg { chat_id, msg_id } => Some(TransportEvent::IncomingMessage {
            chat_id: ChatId(chat_id),
            msg_id: MessageId(msg_id),
        }),
        RpcEvent::MsgDelivered { chat_id, msg_id } => Some(TransportEvent::MessageDelivered {
            chat_id: ChatId(chat_id),
            msg_id: MessageId(msg_id),
        }),
        RpcEvent::MsgFailed { chat_id, msg_id } => Some(TransportEvent::MessageFailed {
            chat_id: ChatId(chat_id),
            msg_id: MessageId(msg_id),
        }),
        RpcEvent::ChatModified { chat_id } => Some(TransportEvent::ChatModified {
            chat_id: ChatId(chat_id),
        }),
        RpcEvent::SecurejoinInviterProgress {
            contact_id,
            progress,
        } if progress == SECUREJOIN_DONE => Some(TransportEvent::ContactJoined {
            contact_id: ContactId(contact_id),
        }),
        RpcEvent::Info { msg } => {
            tracing::trace!(target: "tb_rpc::core", "{msg}");
            None
        }
        RpcEvent::Warning { msg } => {
            tracing::warn!(target: "tb_rpc::core", "{msg}");
            None
        }
        RpcEvent::Error { msg } => {
            tracing::error!(target: "tb_rpc::core", "{msg}");
            None
        }
        _ => None,
    }
}
