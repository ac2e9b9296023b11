//! Translation of transport system notices into structured events.
//!
//! The transport reports title and image changes only as human-readable system
//! messages. All substring matching on that text lives here.

use crate::transport::types::Message;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SystemNotice {
    ImageChanged,
    TitleChanged,
    Other,
}

/// Classify a system message. Returns `None` for ordinary content.
pub fn translate(msg: &Message) -> Option<SystemNotice> {
    if !msg.is_system {
        return None;
    }
    Some(translate_text(&msg.text))
}

fn translate_text(text: &str) -> SystemNotice {
    if text.contains("image changed by") {
        SystemNotice::ImageChanged
    } else if text.contains("name changed from") {
        SystemNotice::TitleChanged
    } else {
        SystemNotice::Other
    }
}
