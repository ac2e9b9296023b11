//! Naming conventions shared by the crew and relay-group logic.

/// Local part of an address (`team` for `team@example.org`).
pub fn localpart(addr: &str) -> &str {
    addr.split('@').next().unwrap_or(addr)
}

/// Tag every relay group title starts with.
pub fn relay_tag(bot_addr: &str) -> String {
    format!("[{}] ", localpart(bot_addr))
}

/// Canonical relay group title for an outside conversation.
pub fn relay_title(bot_addr: &str, outside_title: &str) -> String {
    format!("{}{outside_title}", relay_tag(bot_addr))
}

/// Canonical title of the crew conversation.
pub fn crew_title(bot_addr: &str) -> String {
    format!("Team: {bot_addr}")
}

/// Title given to a superseded crew.
pub fn old_crew_title(bot_addr: &str) -> String {
    format!("Old Team: {bot_addr}")
}

/// Shorten text for log lines.
pub fn truncate_text(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let mut out = s.chars().take(max_len).collect::<String>();
    out.push_str("...");
    out
}
