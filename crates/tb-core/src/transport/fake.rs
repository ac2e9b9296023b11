//! In-memory transport used by the core's unit tests.

use std::{
    collections::{BTreeMap, HashSet},
    path::{Path, PathBuf},
    sync::Mutex,
};

use async_trait::async_trait;

use crate::{
    domain::{ChatId, ContactId, MessageId},
    errors::Error,
    transport::{
        port::Transport,
        types::{Attachment, Contact, Conversation, Message, MessageState, OutgoingMessage},
    },
    Result,
};

#[derive(Clone, Debug)]
struct FakeChat {
    title: String,
    image: Option<PathBuf>,
    members: Vec<ContactId>,
    protected: bool,
    messages: Vec<MessageId>,
}

#[derive(Debug)]
struct FakeState {
    display_name: Option<String>,
    avatar: Option<PathBuf>,
    next_chat: u32,
    next_msg: u32,
    next_contact: u32,
    contacts: BTreeMap<ContactId, Contact>,
    chats: BTreeMap<ChatId, FakeChat>,
    messages: BTreeMap<MessageId, Message>,
    sent: Vec<(ChatId, MessageId, OutgoingMessage)>,
    send_state: MessageState,
    failing_sends: HashSet<ChatId>,
    fail_remove_member: bool,
}

pub(crate) struct FakeTransport {
    state: Mutex<FakeState>,
}

impl FakeTransport {
    pub(crate) fn new(self_addr: &str) -> Self {
        let mut contacts = BTreeMap::new();
        contacts.insert(
            ContactId::SELF,
            Contact {
                id: ContactId::SELF,
                addr: self_addr.to_string(),
            },
        );
        Self {
            state: Mutex::new(FakeState {
                display_name: None,
                avatar: None,
                // Mirror the transport's reserved low ids.
                next_chat: 10,
                next_msg: 10,
                next_contact: 10,
                contacts,
                chats: BTreeMap::new(),
                messages: BTreeMap::new(),
                sent: Vec::new(),
                send_state: MessageState::Delivered,
                failing_sends: HashSet::new(),
                fail_remove_member: false,
            }),
        }
    }

    pub(crate) fn add_contact(&self, addr: &str) -> ContactId {
        let mut st = self.state.lock().unwrap();
        st.contact_by_addr(addr)
    }

    pub(crate) fn add_chat(&self, title: &str, members: &[ContactId], protected: bool) -> ChatId {
        let mut st = self.state.lock().unwrap();
        st.new_chat(title, members, protected)
    }

    pub(crate) fn set_display_name_now(&self, name: &str) {
        self.state.lock().unwrap().display_name = Some(name.to_string());
    }

    pub(crate) fn set_chat_title_now(&self, chat_id: ChatId, title: &str) {
        let mut st = self.state.lock().unwrap();
        st.chats.get_mut(&chat_id).unwrap().title = title.to_string();
    }

    pub(crate) fn set_chat_image_now(&self, chat_id: ChatId, image: &str) {
        let mut st = self.state.lock().unwrap();
        st.chats.get_mut(&chat_id).unwrap().image = Some(PathBuf::from(image));
    }

    pub(crate) fn receive(&self, chat_id: ChatId, from: ContactId, text: &str) -> Message {
        self.receive_full(chat_id, from, text, None, None, false)
    }

    pub(crate) fn receive_reply(
        &self,
        chat_id: ChatId,
        from: ContactId,
        text: &str,
        quote: MessageId,
    ) -> Message {
        self.receive_full(chat_id, from, text, Some(quote), None, false)
    }

    pub(crate) fn receive_with_attachment(
        &self,
        chat_id: ChatId,
        from: ContactId,
        text: &str,
        attachment: Attachment,
    ) -> Message {
        self.receive_full(chat_id, from, text, None, Some(attachment), false)
    }

    pub(crate) fn receive_system(&self, chat_id: ChatId, text: &str) -> Message {
        self.receive_full(chat_id, ContactId(2), text, None, None, true)
    }

    fn receive_full(
        &self,
        chat_id: ChatId,
        from: ContactId,
        text: &str,
        quote: Option<MessageId>,
        attachment: Option<Attachment>,
        is_system: bool,
    ) -> Message {
        let mut st = self.state.lock().unwrap();
        let sender = st.contacts.get(&from).cloned().unwrap_or(Contact {
            id: from,
            addr: String::new(),
        });
        let state = if sender.is_self() {
            MessageState::Delivered
        } else {
            MessageState::Incoming
        };
        st.push_message(chat_id, sender, text, quote, attachment, is_system, state)
    }

    /// State given to every message sent from now on.
    pub(crate) fn set_send_state(&self, state: MessageState) {
        self.state.lock().unwrap().send_state = state;
    }

    pub(crate) fn set_message_state(&self, msg_id: MessageId, state: MessageState) {
        let mut st = self.state.lock().unwrap();
        st.messages.get_mut(&msg_id).unwrap().state = state;
    }

    pub(crate) fn fail_sends_to(&self, chat_id: ChatId) {
        self.state.lock().unwrap().failing_sends.insert(chat_id);
    }

    pub(crate) fn fail_remove_member(&self) {
        self.state.lock().unwrap().fail_remove_member = true;
    }

    pub(crate) fn sent_to(&self, chat_id: ChatId) -> Vec<OutgoingMessage> {
        self.state
            .lock()
            .unwrap()
            .sent
            .iter()
            .filter(|(c, _, _)| *c == chat_id)
            .map(|(_, _, m)| m.clone())
            .collect()
    }

    pub(crate) fn sent_ids_to(&self, chat_id: ChatId) -> Vec<MessageId> {
        self.state
            .lock()
            .unwrap()
            .sent
            .iter()
            .filter(|(c, _, _)| *c == chat_id)
            .map(|(_, id, _)| *id)
            .collect()
    }

    pub(crate) fn sent_texts_to(&self, chat_id: ChatId) -> Vec<String> {
        self.sent_to(chat_id).into_iter().map(|m| m.text).collect()
    }

    pub(crate) fn sent_count(&self) -> usize {
        self.state.lock().unwrap().sent.len()
    }

    pub(crate) fn chat_count(&self) -> usize {
        self.state.lock().unwrap().chats.len()
    }

    pub(crate) fn newest_chat(&self) -> Option<ChatId> {
        self.state.lock().unwrap().chats.keys().next_back().copied()
    }

    pub(crate) fn avatar_now(&self) -> Option<PathBuf> {
        self.state.lock().unwrap().avatar.clone()
    }
}

impl FakeState {
    fn contact_by_addr(&mut self, addr: &str) -> ContactId {
        if let Some(c) = self.contacts.values().find(|c| c.addr == addr) {
            return c.id;
        }
        let id = ContactId(self.next_contact);
        self.next_contact += 1;
        self.contacts.insert(
            id,
            Contact {
                id,
                addr: addr.to_string(),
            },
        );
        id
    }

    fn new_chat(&mut self, title: &str, members: &[ContactId], protected: bool) -> ChatId {
        let id = ChatId(self.next_chat);
        self.next_chat += 1;
        let mut all = vec![ContactId::SELF];
        for m in members {
            if !all.contains(m) {
                all.push(*m);
            }
        }
        self.chats.insert(
            id,
            FakeChat {
                title: title.to_string(),
                image: None,
                members: all,
                protected,
                messages: Vec::new(),
            },
        );
        id
    }

    #[allow(clippy::too_many_arguments)]
    fn push_message(
        &mut self,
        chat_id: ChatId,
        sender: Contact,
        text: &str,
        quote: Option<MessageId>,
        attachment: Option<Attachment>,
        is_system: bool,
        state: MessageState,
    ) -> Message {
        let id = MessageId(self.next_msg);
        self.next_msg += 1;
        let msg = Message {
            id,
            chat_id,
            sender,
            text: text.to_string(),
            attachment,
            quote,
            is_system,
            state,
        };
        self.messages.insert(id, msg.clone());
        self.chats
            .get_mut(&chat_id)
            .expect("chat exists")
            .messages
            .push(id);
        msg
    }

    fn chat(&self, chat_id: ChatId) -> Result<&FakeChat> {
        self.chats
            .get(&chat_id)
            .ok_or_else(|| Error::Transport(format!("no chat {chat_id}")))
    }

    fn chat_mut(&mut self, chat_id: ChatId) -> Result<&mut FakeChat> {
        self.chats
            .get_mut(&chat_id)
            .ok_or_else(|| Error::Transport(format!("no chat {chat_id}")))
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn self_contact(&self) -> Result<Contact> {
        let st = self.state.lock().unwrap();
        Ok(st.contacts[&ContactId::SELF].clone())
    }

    async fn display_name(&self) -> Result<Option<String>> {
        Ok(self.state.lock().unwrap().display_name.clone())
    }

    async fn set_display_name(&self, name: &str) -> Result<()> {
        self.state.lock().unwrap().display_name = Some(name.to_string());
        Ok(())
    }

    async fn set_avatar(&self, image: Option<&Path>) -> Result<()> {
        self.state.lock().unwrap().avatar = image.map(Path::to_path_buf);
        Ok(())
    }

    async fn chat_ids(&self) -> Result<Vec<ChatId>> {
        Ok(self.state.lock().unwrap().chats.keys().copied().collect())
    }

    async fn chat(&self, chat_id: ChatId) -> Result<Conversation> {
        let st = self.state.lock().unwrap();
        let chat = st.chat(chat_id)?;
        Ok(Conversation {
            id: chat_id,
            title: chat.title.clone(),
            image: chat.image.clone(),
            members: chat
                .members
                .iter()
                .filter_map(|id| st.contacts.get(id).cloned())
                .collect(),
            protected: chat.protected,
        })
    }

    async fn message_ids(&self, chat_id: ChatId) -> Result<Vec<MessageId>> {
        let st = self.state.lock().unwrap();
        Ok(st.chat(chat_id)?.messages.clone())
    }

    async fn message(&self, msg_id: MessageId) -> Result<Message> {
        let st = self.state.lock().unwrap();
        st.messages
            .get(&msg_id)
            .cloned()
            .ok_or_else(|| Error::Transport(format!("no message {msg_id}")))
    }

    async fn message_info(&self, msg_id: MessageId) -> Result<String> {
        Ok(format!("Message {msg_id}: 550 mailbox unavailable"))
    }

    async fn lookup_contact(&self, addr: &str) -> Result<ContactId> {
        Ok(self.state.lock().unwrap().contact_by_addr(addr))
    }

    async fn create_group(
        &self,
        title: &str,
        members: &[ContactId],
        protected: bool,
    ) -> Result<ChatId> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .new_chat(title, members, protected))
    }

    async fn set_chat_name(&self, chat_id: ChatId, title: &str) -> Result<()> {
        self.state.lock().unwrap().chat_mut(chat_id)?.title = title.to_string();
        Ok(())
    }

    async fn set_chat_image(&self, chat_id: ChatId, image: Option<&Path>) -> Result<()> {
        self.state.lock().unwrap().chat_mut(chat_id)?.image = image.map(Path::to_path_buf);
        Ok(())
    }

    async fn add_member(&self, chat_id: ChatId, contact_id: ContactId) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        let chat = st.chat_mut(chat_id)?;
        if !chat.members.contains(&contact_id) {
            chat.members.push(contact_id);
        }
        Ok(())
    }

    async fn remove_member(&self, chat_id: ChatId, contact_id: ContactId) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        if st.fail_remove_member {
            return Err(Error::Transport("membership changed".to_string()));
        }
        st.chat_mut(chat_id)?.members.retain(|m| *m != contact_id);
        Ok(())
    }

    async fn send(&self, chat_id: ChatId, msg: OutgoingMessage) -> Result<MessageId> {
        let mut st = self.state.lock().unwrap();
        st.chat(chat_id)?;
        if st.failing_sends.contains(&chat_id) {
            return Err(Error::Transport(format!("cannot send to chat {chat_id}")));
        }
        let sender = st.contacts[&ContactId::SELF].clone();
        let state = st.send_state;
        let stored = st.push_message(
            chat_id,
            sender,
            &msg.text,
            msg.quote,
            msg.attachment.clone(),
            false,
            state,
        );
        st.sent.push((chat_id, stored.id, msg));
        Ok(stored.id)
    }

    async fn invite(&self, chat_id: Option<ChatId>) -> Result<String> {
        let st = self.state.lock().unwrap();
        let addr = &st.contacts[&ContactId::SELF].addr;
        Ok(match chat_id {
            Some(id) => format!("https://i.delta.chat/#INVITE&a={addr}&g={id}"),
            None => format!("https://i.delta.chat/#INVITE&a={addr}"),
        })
    }
}
