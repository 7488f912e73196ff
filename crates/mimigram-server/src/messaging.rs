//! Message operations on direct and group conversations.
//!
//! Every mutation follows the same shape: resolve the [`Thread`], load its
//! log, apply the change, commit the whole log, then push events to whoever
//! is online. Commits of one conversation are not isolated from each other,
//! see DESIGN.md.

use chrono::Utc;
use tracing::debug;

use mimigram_shared::{key_for, key_for_group, ChatId, ConversationKey, GroupId, MessageId, UserId};
use mimigram_store::{Message, Reaction};

use crate::accounts::{find_user, is_blocked_by};
use crate::api::AppState;
use crate::conversation::{ConversationLog, MessageDraft, MessageView};
use crate::error::{Result, ServerError};
use crate::events::{MessageRead, MessageUpdated, NewMessage, ServerEvent};
use crate::groups::member_group;

/// Where a message lives, as seen by the acting user.
#[derive(Debug, Clone)]
pub enum Thread {
    Direct { actor: UserId, peer: UserId },
    Group {
        actor: UserId,
        id: GroupId,
        members: Vec<UserId>,
    },
}

impl Thread {
    /// A 1:1 thread between `actor` and an existing, different user.
    pub fn direct(state: &AppState, actor: UserId, peer: UserId) -> Result<Self> {
        if actor == peer {
            return Err(ServerError::Validation("cannot message yourself".into()));
        }
        find_user(&state.store, &peer)?;
        Ok(Self::Direct { actor, peer })
    }

    /// A group thread. `actor` has to be a member.
    pub fn group(state: &AppState, actor: UserId, id: GroupId) -> Result<Self> {
        let group = member_group(&state.store, &id, &actor)?;
        Ok(Self::Group {
            actor,
            id,
            members: group.members,
        })
    }

    pub fn actor(&self) -> &UserId {
        match self {
            Self::Direct { actor, .. } | Self::Group { actor, .. } => actor,
        }
    }

    pub fn key(&self) -> ConversationKey {
        match self {
            Self::Direct { actor, peer } => key_for(actor, peer),
            Self::Group { id, .. } => key_for_group(id),
        }
    }

    /// The chat id `recipient` files this conversation under.
    fn chat_id_for(&self, recipient: &UserId) -> ChatId {
        match self {
            Self::Direct { actor, peer } if recipient == peer => ChatId::from(*actor),
            Self::Direct { peer, .. } => ChatId::from(*peer),
            Self::Group { id, .. } => ChatId::from(*id),
        }
    }

    /// Everyone but the actor.
    fn others(&self) -> Vec<UserId> {
        match self {
            Self::Direct { peer, .. } => vec![*peer],
            Self::Group { actor, members, .. } => {
                members.iter().copied().filter(|m| m != actor).collect()
            }
        }
    }

    fn load(&self, state: &AppState) -> Result<ConversationLog> {
        ConversationLog::load(&state.store, self.key())
    }
}

pub async fn send(state: &AppState, thread: &Thread, draft: MessageDraft) -> Result<MessageView> {
    let actor = *thread.actor();
    if let Thread::Direct { peer, .. } = thread {
        if is_blocked_by(&state.store, peer, &actor)? {
            return Err(ServerError::Forbidden("you are blocked by this user".into()));
        }
    }

    let mut log = thread.load(state)?;
    let message = log.append(draft, actor, Utc::now())?;
    log.commit(&state.store)?;
    debug!(key = %log.key(), message = %message.id, "Message stored");

    let mut audience = thread.others();
    audience.push(actor);
    let delivered = state
        .dispatcher
        .notify_group(&audience, |member| {
            ServerEvent::NewMessage(NewMessage {
                chat_id: thread.chat_id_for(member),
                message: MessageView::new(message.clone(), member),
            })
        })
        .await;
    debug!(message = %message.id, delivered, "Message fanned out");

    Ok(MessageView::new(message, &actor))
}

pub fn list(state: &AppState, thread: &Thread) -> Result<Vec<MessageView>> {
    let log = thread.load(state)?;
    let profiles = state.store.profiles()?;
    Ok(log.view(thread.actor(), &profiles))
}

pub async fn react(
    state: &AppState,
    thread: &Thread,
    id: &MessageId,
    emoji: &str,
) -> Result<Vec<Reaction>> {
    let mut log = thread.load(state)?;
    let reactions = log.react(id, thread.actor(), emoji)?;
    log.commit(&state.store)?;

    let reactions_out = reactions.clone();
    announce(state, thread, *id, move |update| {
        update.reactions = Some(reactions_out.clone());
    })
    .await;
    Ok(reactions)
}

pub async fn edit(
    state: &AppState,
    thread: &Thread,
    id: &MessageId,
    text: &str,
) -> Result<Message> {
    let mut log = thread.load(state)?;
    let message = log.edit(id, thread.actor(), text, Utc::now())?.clone();
    log.commit(&state.store)?;

    let text = message.text.clone();
    announce(state, thread, *id, move |update| {
        update.text = Some(text.clone());
        update.edited = Some(true);
    })
    .await;
    Ok(message)
}

pub async fn delete(state: &AppState, thread: &Thread, id: &MessageId) -> Result<Message> {
    let mut log = thread.load(state)?;
    let message = log.delete(id, thread.actor())?.clone();
    log.commit(&state.store)?;

    announce(state, thread, *id, |update| {
        update.deleted = Some(true);
    })
    .await;
    Ok(message)
}

/// Mark the peer's messages in a direct conversation as read. The peer is
/// only told when something actually flipped.
pub async fn mark_read(state: &AppState, reader: UserId, peer: UserId) -> Result<bool> {
    let thread = Thread::direct(state, reader, peer)?;
    let mut log = thread.load(state)?;
    if !log.mark_read(&reader) {
        return Ok(false);
    }
    log.commit(&state.store)?;

    state
        .dispatcher
        .notify(
            &peer,
            ServerEvent::MessageRead(MessageRead {
                chat_id: ChatId::from(reader),
            }),
        )
        .await;
    Ok(true)
}

async fn announce<F>(state: &AppState, thread: &Thread, id: MessageId, fill: F)
where
    F: Fn(&mut MessageUpdated),
{
    let others = thread.others();
    state
        .dispatcher
        .notify_group(&others, |member| {
            let mut update = MessageUpdated::new(thread.chat_id_for(member), id);
            fill(&mut update);
            ServerEvent::MessageUpdated(update)
        })
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::{register, set_blocked, RegisterRequest};
    use crate::api::test_state;
    use crate::dispatch::EventReceiver;
    use crate::groups::{create, CreateGroup};
    use mimigram_shared::ConnectionId;

    fn user(state: &AppState, name: &str) -> UserId {
        register(
            state,
            RegisterRequest {
                username: Some(name.into()),
                password: Some("pw".into()),
                ..Default::default()
            },
        )
        .unwrap()
        .id
    }

    async fn connect(state: &AppState, user: UserId) -> EventReceiver {
        let conn = ConnectionId::new();
        let mut rx = state.dispatcher.attach(conn).await;
        state.dispatcher.authenticate(user, conn).await;
        drain(&mut rx);
        rx
    }

    fn drain(rx: &mut EventReceiver) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn new_messages(rx: &mut EventReceiver) -> Vec<NewMessage> {
        drain(rx)
            .into_iter()
            .filter_map(|e| match e {
                ServerEvent::NewMessage(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_direct_send_notifies_both_sides() {
        let state = test_state();
        let a = user(&state, "a");
        let b = user(&state, "b");
        let mut a_rx = connect(&state, a).await;
        let mut b_rx = connect(&state, b).await;
        drain(&mut a_rx);

        let thread = Thread::direct(&state, a, b).unwrap();
        let view = send(&state, &thread, MessageDraft::text("hi")).await.unwrap();
        assert!(view.sent);

        let to_b = new_messages(&mut b_rx);
        assert_eq!(to_b.len(), 1);
        assert_eq!(to_b[0].chat_id, ChatId::from(a));
        assert!(!to_b[0].message.sent);

        let echo = new_messages(&mut a_rx);
        assert_eq!(echo.len(), 1);
        assert_eq!(echo[0].chat_id, ChatId::from(b));
        assert!(echo[0].message.sent);
    }

    #[tokio::test]
    async fn test_offline_recipient_still_persists() {
        let state = test_state();
        let a = user(&state, "a");
        let b = user(&state, "b");

        let thread = Thread::direct(&state, a, b).unwrap();
        send(&state, &thread, MessageDraft::text("later")).await.unwrap();

        let listed = list(&state, &Thread::direct(&state, b, a).unwrap()).unwrap();
        assert_eq!(listed.len(), 1);
        assert!(!listed[0].sent);
        assert_eq!(listed[0].message.delivered, Some(true));
        assert_eq!(listed[0].message.read, Some(false));
    }

    #[tokio::test]
    async fn test_direct_thread_validation() {
        let state = test_state();
        let a = user(&state, "a");
        let b = user(&state, "b");

        assert!(matches!(Thread::direct(&state, a, a), Err(ServerError::Validation(_))));
        assert!(matches!(
            Thread::direct(&state, a, UserId::new()),
            Err(ServerError::NotFound(_))
        ));

        set_blocked(&state, &b, &a, true).unwrap();
        let thread = Thread::direct(&state, a, b).unwrap();
        assert!(matches!(
            send(&state, &thread, MessageDraft::text("hey")).await,
            Err(ServerError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_group_send_fans_out() {
        let state = test_state();
        let a = user(&state, "a");
        let b = user(&state, "b");
        let c = user(&state, "c");
        let outsider = user(&state, "z");
        let group = create(
            &state,
            &a,
            CreateGroup {
                name: "g".into(),
                members: vec![b, c],
                ..Default::default()
            },
        )
        .unwrap();
        let mut a_rx = connect(&state, a).await;
        let mut b_rx = connect(&state, b).await;
        drain(&mut a_rx);

        let thread = Thread::group(&state, a, group.id).unwrap();
        send(&state, &thread, MessageDraft::text("all")).await.unwrap();

        let to_b = new_messages(&mut b_rx);
        assert_eq!(to_b.len(), 1);
        assert_eq!(to_b[0].chat_id, ChatId::from(group.id));
        assert!(!to_b[0].message.sent);
        assert_eq!(to_b[0].message.message.delivered, None);

        let echo = new_messages(&mut a_rx);
        assert!(echo[0].message.sent);

        assert!(matches!(
            Thread::group(&state, outsider, group.id),
            Err(ServerError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_react_twice_restores_state() {
        let state = test_state();
        let a = user(&state, "a");
        let b = user(&state, "b");
        let thread = Thread::direct(&state, a, b).unwrap();
        let sent = send(&state, &thread, MessageDraft::text("x")).await.unwrap();

        let reactor = Thread::direct(&state, b, a).unwrap();
        let once = react(&state, &reactor, &sent.message.id, "👍").await.unwrap();
        assert_eq!(once.len(), 1);
        let twice = react(&state, &reactor, &sent.message.id, "👍").await.unwrap();
        assert!(twice.is_empty());
    }

    #[tokio::test]
    async fn test_edit_and_delete_notify_peer() {
        let state = test_state();
        let a = user(&state, "a");
        let b = user(&state, "b");
        let mut b_rx = connect(&state, b).await;
        let thread = Thread::direct(&state, a, b).unwrap();
        let sent = send(&state, &thread, MessageDraft::text("typo")).await.unwrap();
        drain(&mut b_rx);

        let edited = edit(&state, &thread, &sent.message.id, "fixed").await.unwrap();
        assert!(edited.edited);
        let mut expected = MessageUpdated::new(ChatId::from(a), sent.message.id);
        expected.text = Some("fixed".into());
        expected.edited = Some(true);
        assert_eq!(drain(&mut b_rx), vec![ServerEvent::MessageUpdated(expected)]);

        let other = Thread::direct(&state, b, a).unwrap();
        assert!(matches!(
            delete(&state, &other, &sent.message.id).await,
            Err(ServerError::Forbidden(_))
        ));
        let deleted = delete(&state, &thread, &sent.message.id).await.unwrap();
        assert!(deleted.deleted);
        assert!(deleted.text.is_empty());
    }

    #[tokio::test]
    async fn test_mark_read_notifies_only_on_change() {
        let state = test_state();
        let a = user(&state, "a");
        let b = user(&state, "b");
        let mut a_rx = connect(&state, a).await;
        let thread = Thread::direct(&state, a, b).unwrap();
        send(&state, &thread, MessageDraft::text("read me")).await.unwrap();
        drain(&mut a_rx);

        assert!(mark_read(&state, b, a).await.unwrap());
        assert_eq!(
            drain(&mut a_rx),
            vec![ServerEvent::MessageRead(MessageRead {
                chat_id: ChatId::from(b)
            })]
        );

        assert!(!mark_read(&state, b, a).await.unwrap());
        assert!(drain(&mut a_rx).is_empty());
    }
}
