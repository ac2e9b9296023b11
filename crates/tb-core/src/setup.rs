//! One-time crew setup run by `team-bot init`.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::{
    config::DeliveryPolicy,
    crew::CrewDirectory,
    domain::ChatId,
    errors::Error,
    store::RelayStore,
    transport::{
        port::Transport,
        supervised::{wait_for_outcome, DeliveryOutcome},
        types::{OutgoingMessage, TransportEvent},
    },
    utils::crew_title,
    Result,
};

fn welcome_text(bot_addr: &str) -> String {
    format!("Welcome to the {bot_addr} crew! Type /help to see the existing commands.")
}

/// Create a fresh verified crew and wait for its first member.
///
/// `on_invite` receives the join invite for the new crew. Once someone joined,
/// older crews are retired, the crew is welcomed, and the call returns after
/// every message it sent has a final delivery outcome.
pub async fn init_crew(
    transport: Arc<dyn Transport>,
    store: Arc<RelayStore>,
    events: &mut mpsc::UnboundedReceiver<TransportEvent>,
    policy: DeliveryPolicy,
    on_invite: impl FnOnce(&str),
) -> Result<ChatId> {
    let me = transport.self_contact().await?;
    let crew = transport
        .create_group(&crew_title(&me.addr), &[], true)
        .await?;
    tracing::info!(crew = %crew, "created crew, waiting for the first member");
    on_invite(&transport.invite(Some(crew)).await?);

    wait_for_first_member(transport.as_ref(), events, crew).await?;

    let resolution = CrewDirectory::new(transport.clone(), store)
        .resolve_crew()
        .await?;
    if resolution.crew != Some(crew) {
        return Err(Error::External(format!(
            "crew {crew} was not resolved as the current crew"
        )));
    }

    let welcome = transport
        .send(crew, OutgoingMessage::text(welcome_text(&me.addr)))
        .await?;

    let mut pending = resolution.notices;
    pending.push(welcome);
    for msg_id in pending {
        match wait_for_outcome(transport.as_ref(), msg_id, policy).await? {
            DeliveryOutcome::Delivered => tracing::debug!(msg = %msg_id, "delivered"),
            DeliveryOutcome::Failed => {
                let info = transport.message_info(msg_id).await?;
                tracing::warn!(msg = %msg_id, "sending failed: {info}");
            }
        }
    }
    Ok(crew)
}

async fn wait_for_first_member(
    transport: &dyn Transport,
    events: &mut mpsc::UnboundedReceiver<TransportEvent>,
    crew: ChatId,
) -> Result<()> {
    loop {
        if transport.chat(crew).await?.members.len() > 1 {
            return Ok(());
        }
        match events.recv().await {
            Some(event) => tracing::trace!(?event, "event while waiting for crew member"),
            None => {
                return Err(Error::Transport(
                    "event stream closed before anyone joined the crew".to_string(),
                ))
            }
        }
    }
}
