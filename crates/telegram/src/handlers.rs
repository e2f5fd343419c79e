//! Update handlers: membership changes and incoming messages become
//! [`ChannelEvent`]s on the shared queue.

use std::error::Error;

use {
    herald_channels::{ChannelEvent, EventSender, InboundMessage, MembershipChange},
    herald_common::Backend,
    teloxide::{
        dispatching::UpdateHandler,
        dptree,
        prelude::*,
        types::{ChatMemberUpdated, Message, Update},
    },
    tracing::{debug, info},
};

type HandlerError = Box<dyn Error + Send + Sync>;
type HandlerResult = Result<(), HandlerError>;

pub(crate) fn schema() -> UpdateHandler<HandlerError> {
    dptree::entry()
        .branch(Update::filter_my_chat_member().endpoint(on_my_chat_member))
        .branch(Update::filter_message().endpoint(on_message))
}

async fn on_my_chat_member(update: ChatMemberUpdated, events: EventSender) -> HandlerResult {
    // A user starting or blocking the bot in a private chat is not a recipient.
    if update.chat.is_private() {
        debug!(chat = update.chat.id.0, "ignoring private chat member update");
        return Ok(());
    }
    let kind = &update.new_chat_member.kind;
    let gone = kind.is_left() || kind.is_banned();
    let change = member_change(update.chat.id.0, update.chat.title(), gone);
    match &change {
        MembershipChange::Left { id } => info!(chat = %id, "removed from Telegram chat"),
        _ => info!(chat = update.chat.id.0, title = update.chat.title(), "added to Telegram chat"),
    }
    emit(&events, ChannelEvent::Membership {
        backend: Backend::Telegram,
        change,
    })
    .await;
    Ok(())
}

async fn on_message(msg: Message, events: EventSender) -> HandlerResult {
    let text = msg.text().or(msg.caption());
    for event in message_events(msg.chat.id.0, msg.chat.title(), msg.chat.is_private(), text) {
        emit(&events, event).await;
    }
    Ok(())
}

/// The bot's own membership in `chat_id` changed.
pub(crate) fn member_change(chat_id: i64, title: Option<&str>, gone: bool) -> MembershipChange {
    let id = chat_id.to_string();
    if gone {
        MembershipChange::Left { id }
    } else {
        MembershipChange::Joined {
            id,
            title: title.map(str::to_string),
        }
    }
}

/// Group and channel messages register their chat. Private chats are only
/// candidates for admin commands, with the chat id doubling as the sender id,
/// and never register.
pub(crate) fn message_events(
    chat_id: i64,
    title: Option<&str>,
    is_private: bool,
    text: Option<&str>,
) -> Vec<ChannelEvent> {
    let id = chat_id.to_string();
    let mut events = Vec::with_capacity(2);
    if !is_private {
        events.push(ChannelEvent::Membership {
            backend: Backend::Telegram,
            change: MembershipChange::Seen {
                id: id.clone(),
                title: title.map(str::to_string),
            },
        });
    }
    events.push(ChannelEvent::Inbound(InboundMessage {
        backend: Backend::Telegram,
        chat_id: id.clone(),
        sender_id: id,
        is_direct: is_private,
        from_self: false,
        text: text.map(str::to_string),
        media: None,
    }));
    events
}

async fn emit(events: &EventSender, event: ChannelEvent) {
    if events.send(event).await.is_err() {
        debug!("event loop closed, dropping Telegram event");
    }
}
