//! Conversation log: the ordered messages of one conversation key.
//!
//! A log is loaded whole, mutated in memory and written back whole with
//! [`ConversationLog::commit`]. There is no locking between load and commit,
//! so two callers mutating the same key at the same time can lose one of the
//! updates. Callers are expected to be the only writer of a key at a time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mimigram_shared::constants::{EDIT_WINDOW, UNKNOWN_SENDER_NAME};
use mimigram_shared::{ConversationKey, MessageId, UserId};
use mimigram_store::collections::Profiles;
use mimigram_store::{Message, Persistence, Reaction, ReplyRef};

use crate::error::{Result, ServerError};

/// Client-supplied content of a new message.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageDraft {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub voice_duration: Option<f64>,
    #[serde(default)]
    pub is_sticker: bool,
    #[serde(default)]
    pub reply_to: Option<ReplyRef>,
}

impl MessageDraft {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    fn is_empty(&self) -> bool {
        let blank = |s: &Option<String>| s.as_deref().map_or(true, |s| s.trim().is_empty());
        blank(&self.text) && blank(&self.image) && blank(&self.voice)
    }
}

/// A message as seen by one viewer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageView {
    #[serde(flatten)]
    pub message: Message,
    /// Whether the viewer sent it.
    pub sent: bool,
}

impl MessageView {
    pub fn new(message: Message, viewer: &UserId) -> Self {
        let sent = message.sender == *viewer;
        Self { message, sent }
    }
}

#[derive(Debug, Clone)]
pub struct ConversationLog {
    key: ConversationKey,
    messages: Vec<Message>,
}

impl ConversationLog {
    /// Read the current log of `key`. A key that was never written is empty.
    pub fn load(store: &Persistence, key: ConversationKey) -> Result<Self> {
        let messages = store.messages()?.remove(&key).unwrap_or_default();
        Ok(Self { key, messages })
    }

    /// Make sure `key` has a (possibly empty) log in the store.
    pub fn ensure_exists(store: &Persistence, key: &ConversationKey) -> Result<()> {
        store.update_messages(|all| {
            all.entry(key.clone()).or_default();
            Ok(())
        })
    }

    /// Write this log back, replacing whatever the store holds for this key.
    /// Other keys are left as they are at the time of the write; a commit
    /// for the same key made since [`load`](Self::load) is overwritten.
    pub fn commit(&self, store: &Persistence) -> Result<()> {
        store.update_messages(|all| {
            all.insert(self.key.clone(), self.messages.clone());
            Ok::<_, ServerError>(())
        })?;
        tracing::trace!(key = %self.key, len = self.messages.len(), "Committed conversation log");
        Ok(())
    }

    pub fn key(&self) -> &ConversationKey {
        &self.key
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == *id)
    }

    pub fn append(
        &mut self,
        draft: MessageDraft,
        sender: UserId,
        now: DateTime<Utc>,
    ) -> Result<Message> {
        if draft.is_empty() {
            return Err(ServerError::Validation(
                "message needs text, an image or a voice clip".into(),
            ));
        }

        let direct = !self.key.is_group();
        let message = Message {
            id: MessageId::new(),
            sender,
            text: draft.text.as_deref().map(str::trim).unwrap_or_default().to_string(),
            image: draft.image.filter(|s| !s.is_empty()),
            voice: draft.voice.filter(|s| !s.is_empty()),
            voice_duration: draft.voice_duration,
            is_sticker: draft.is_sticker,
            time: now,
            reactions: Vec::new(),
            edited: false,
            edit_time: None,
            deleted: false,
            reply_to: draft.reply_to.map(|reply| ReplyRef {
                sender_name: None,
                ..reply
            }),
            delivered: direct.then_some(true),
            read: direct.then_some(false),
        };

        self.messages.push(message.clone());
        Ok(message)
    }

    pub fn edit(
        &mut self,
        id: &MessageId,
        actor: &UserId,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<&Message> {
        let window = chrono::Duration::from_std(EDIT_WINDOW)
            .map_err(|e| ServerError::Internal(e.to_string()))?;

        let message = self.owned_mut(id, actor)?;
        if now.signed_duration_since(message.time) > window {
            return Err(ServerError::Forbidden("too late to edit this message".into()));
        }
        if message.deleted {
            return Err(ServerError::Validation("message was deleted".into()));
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(ServerError::Validation("text must not be empty".into()));
        }

        message.text = text.to_string();
        message.edited = true;
        message.edit_time = Some(now);
        Ok(message)
    }

    /// Tombstone a message: the text goes, the record stays.
    pub fn delete(&mut self, id: &MessageId, actor: &UserId) -> Result<&Message> {
        let message = self.owned_mut(id, actor)?;
        message.deleted = true;
        message.text.clear();
        Ok(message)
    }

    /// Toggle `actor`'s `emoji` reaction. Returns the message's reactions.
    pub fn react(&mut self, id: &MessageId, actor: &UserId, emoji: &str) -> Result<Vec<Reaction>> {
        if emoji.trim().is_empty() {
            return Err(ServerError::Validation("emoji must not be empty".into()));
        }
        let message = self.find_mut(id)?;
        let reactions = &mut message.reactions;

        match reactions.iter().position(|r| r.emoji == emoji) {
            Some(idx) => {
                let users = &mut reactions[idx].users;
                if let Some(pos) = users.iter().position(|u| u == actor) {
                    users.remove(pos);
                    if users.is_empty() {
                        reactions.remove(idx);
                    }
                } else {
                    users.push(*actor);
                }
            }
            None => reactions.push(Reaction {
                emoji: emoji.to_string(),
                users: vec![*actor],
            }),
        }

        Ok(reactions.clone())
    }

    /// Mark everything the other side sent as read. Returns whether any
    /// message changed.
    pub fn mark_read(&mut self, reader: &UserId) -> bool {
        let mut changed = false;
        for message in &mut self.messages {
            if message.sender != *reader && message.read == Some(false) {
                message.read = Some(true);
                changed = true;
            }
        }
        changed
    }

    /// The whole log as `viewer` sees it. Replies get the display name of the
    /// quoted message's author, looked up now rather than stored.
    pub fn view(&self, viewer: &UserId, profiles: &Profiles) -> Vec<MessageView> {
        self.messages
            .iter()
            .map(|message| {
                let mut message = message.clone();
                if let Some(reply) = message.reply_to.as_mut() {
                    if let Some(original) = self.get(&reply.id) {
                        reply.sender_name = Some(
                            profiles
                                .get(&original.sender)
                                .map(|p| p.display_name())
                                .unwrap_or_else(|| UNKNOWN_SENDER_NAME.to_string()),
                        );
                    }
                }
                MessageView::new(message, viewer)
            })
            .collect()
    }

    fn find_mut(&mut self, id: &MessageId) -> Result<&mut Message> {
        self.messages
            .iter_mut()
            .find(|m| m.id == *id)
            .ok_or_else(|| ServerError::NotFound(format!("message {id}")))
    }

    fn owned_mut(&mut self, id: &MessageId, actor: &UserId) -> Result<&mut Message> {
        let message = self.find_mut(id)?;
        if message.sender != *actor {
            return Err(ServerError::Forbidden("not the author of this message".into()));
        }
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;
    use mimigram_shared::{key_for, key_for_group, GroupId};
    use mimigram_store::{MemoryStore, Profile};

    use super::*;

    fn store() -> Persistence {
        Persistence::new(Arc::new(MemoryStore::new()))
    }

    fn direct_log() -> (ConversationLog, UserId, UserId) {
        let alice = UserId::new();
        let bob = UserId::new();
        let log = ConversationLog::load(&store(), key_for(&alice, &bob)).unwrap();
        (log, alice, bob)
    }

    #[test]
    fn test_append_then_list() {
        let store = store();
        let alice = UserId::new();
        let bob = UserId::new();
        let mut log = ConversationLog::load(&store, key_for(&alice, &bob)).unwrap();
        log.append(MessageDraft::text("first"), bob, Utc::now()).unwrap();
        let sent = log.append(MessageDraft::text("  hi  "), alice, Utc::now()).unwrap();
        log.commit(&store).unwrap();

        let reloaded = ConversationLog::load(&store, key_for(&bob, &alice)).unwrap();
        let view = reloaded.view(&alice, &Profiles::new());
        assert_eq!(view.len(), 2);
        assert_eq!(view.iter().filter(|v| v.message.id == sent.id).count(), 1);

        let last = view.last().unwrap();
        assert_eq!(last.message.id, sent.id);
        assert_eq!(last.message.text, "hi");
        assert!(last.sent);
        assert!(!view[0].sent);
    }

    #[test]
    fn test_append_rejects_empty_content() {
        let (mut log, alice, _) = direct_log();
        let err = log
            .append(MessageDraft::text("   "), alice, Utc::now())
            .unwrap_err();
        assert!(matches!(err, ServerError::Validation(_)));
        assert!(log.messages().is_empty());
    }

    #[test]
    fn test_append_image_only() {
        let (mut log, alice, _) = direct_log();
        let draft = MessageDraft {
            image: Some("data:image/png;base64,AAAA".into()),
            ..Default::default()
        };
        let msg = log.append(draft, alice, Utc::now()).unwrap();
        assert_eq!(msg.text, "");
        assert_eq!(msg.delivered, Some(true));
        assert_eq!(msg.read, Some(false));
    }

    #[test]
    fn test_group_messages_have_no_receipts() {
        let mut log = ConversationLog::load(&store(), key_for_group(&GroupId::new())).unwrap();
        let msg = log
            .append(MessageDraft::text("hello"), UserId::new(), Utc::now())
            .unwrap();
        assert_eq!(msg.delivered, None);
        assert_eq!(msg.read, None);
    }

    #[test]
    fn test_edit_window() {
        let (mut log, alice, _) = direct_log();
        let sent_at = Utc::now();
        let id = log.append(MessageDraft::text("draft"), alice, sent_at).unwrap().id;

        let at_limit = sent_at + Duration::minutes(30);
        let edited = log.edit(&id, &alice, " final ", at_limit).unwrap();
        assert_eq!(edited.text, "final");
        assert!(edited.edited);
        assert_eq!(edited.edit_time, Some(at_limit));

        let too_late = sent_at + Duration::minutes(30) + Duration::seconds(1);
        let err = log.edit(&id, &alice, "again", too_late).unwrap_err();
        assert!(matches!(err, ServerError::Forbidden(_)));
    }

    #[test]
    fn test_edit_checks_owner_and_text() {
        let (mut log, alice, bob) = direct_log();
        let id = log.append(MessageDraft::text("mine"), alice, Utc::now()).unwrap().id;

        assert!(matches!(
            log.edit(&id, &bob, "hijack", Utc::now()),
            Err(ServerError::Forbidden(_))
        ));
        assert!(matches!(
            log.edit(&id, &alice, "   ", Utc::now()),
            Err(ServerError::Validation(_))
        ));
        assert!(matches!(
            log.edit(&MessageId::new(), &alice, "x", Utc::now()),
            Err(ServerError::NotFound(_))
        ));
    }

    #[test]
    fn test_delete_leaves_tombstone() {
        let (mut log, alice, bob) = direct_log();
        let original = log.append(MessageDraft::text("oops"), alice, Utc::now()).unwrap();
        log.react(&original.id, &bob, "👍").unwrap();

        assert!(matches!(
            log.delete(&original.id, &bob),
            Err(ServerError::Forbidden(_))
        ));

        let deleted = log.delete(&original.id, &alice).unwrap().clone();
        assert!(deleted.deleted);
        assert_eq!(deleted.text, "");
        assert_eq!(deleted.id, original.id);
        assert_eq!(deleted.sender, original.sender);
        assert_eq!(deleted.time, original.time);
        assert_eq!(deleted.reactions.len(), 1);

        let view = log.view(&bob, &Profiles::new());
        assert_eq!(view.len(), 1);
        assert!(view[0].message.deleted);
    }

    #[test]
    fn test_react_toggles() {
        let (mut log, alice, bob) = direct_log();
        let id = log.append(MessageDraft::text("vote"), alice, Utc::now()).unwrap().id;

        let after_bob = log.react(&id, &bob, "👍").unwrap();
        assert_eq!(after_bob, vec![Reaction { emoji: "👍".into(), users: vec![bob] }]);

        let after_alice = log.react(&id, &alice, "👍").unwrap();
        assert_eq!(after_alice[0].users, vec![bob, alice]);

        log.react(&id, &alice, "👍").unwrap();
        let back = log.react(&id, &bob, "👍").unwrap();
        assert!(back.is_empty());

        assert!(matches!(
            log.react(&MessageId::new(), &bob, "👍"),
            Err(ServerError::NotFound(_))
        ));
    }

    #[test]
    fn test_react_keeps_other_groups() {
        let (mut log, alice, bob) = direct_log();
        let id = log.append(MessageDraft::text("hm"), alice, Utc::now()).unwrap().id;

        log.react(&id, &bob, "🔥").unwrap();
        log.react(&id, &bob, "👍").unwrap();
        let reactions = log.react(&id, &bob, "🔥").unwrap();
        assert_eq!(reactions.len(), 1);
        assert_eq!(reactions[0].emoji, "👍");
    }

    #[test]
    fn test_mark_read_only_flips_incoming() {
        let (mut log, alice, bob) = direct_log();
        let from_alice = log.append(MessageDraft::text("a"), alice, Utc::now()).unwrap().id;
        let from_bob = log.append(MessageDraft::text("b"), bob, Utc::now()).unwrap().id;

        assert!(log.mark_read(&bob));
        assert_eq!(log.get(&from_alice).unwrap().read, Some(true));
        assert_eq!(log.get(&from_bob).unwrap().read, Some(false));

        assert!(!log.mark_read(&bob));
    }

    #[test]
    fn test_reply_sender_name_resolved_at_read_time() {
        let (mut log, alice, bob) = direct_log();
        let original = log.append(MessageDraft::text("question"), alice, Utc::now()).unwrap();
        let reply = MessageDraft {
            text: Some("answer".into()),
            reply_to: Some(ReplyRef {
                id: original.id,
                text: "question".into(),
                sender_name: Some("spoofed".into()),
            }),
            ..Default::default()
        };
        let stored = log.append(reply, bob, Utc::now()).unwrap();
        assert_eq!(stored.reply_to.as_ref().unwrap().sender_name, None);

        let mut profiles = Profiles::new();
        profiles.insert(
            alice,
            Profile {
                first_name: "Alice".into(),
                last_name: "Liddell".into(),
                ..Default::default()
            },
        );
        let view = log.view(&bob, &profiles);
        let name = view[1].message.reply_to.as_ref().unwrap().sender_name.clone();
        assert_eq!(name.as_deref(), Some("Alice Liddell"));

        let anonymous = log.view(&bob, &Profiles::new());
        let name = anonymous[1].message.reply_to.as_ref().unwrap().sender_name.clone();
        assert_eq!(name.as_deref(), Some(UNKNOWN_SENDER_NAME));
    }

    #[test]
    fn test_reply_to_unknown_message_has_no_name() {
        let (mut log, alice, _) = direct_log();
        let draft = MessageDraft {
            text: Some("re: ?".into()),
            reply_to: Some(ReplyRef {
                id: MessageId::new(),
                text: String::new(),
                sender_name: None,
            }),
            ..Default::default()
        };
        log.append(draft, alice, Utc::now()).unwrap();
        let view = log.view(&alice, &Profiles::new());
        assert_eq!(view[0].message.reply_to.as_ref().unwrap().sender_name, None);
    }

    #[test]
    fn test_view_serializes_flat() {
        let (mut log, alice, _) = direct_log();
        log.append(MessageDraft::text("x"), alice, Utc::now()).unwrap();
        let value = serde_json::to_value(&log.view(&alice, &Profiles::new())[0]).unwrap();
        assert_eq!(value["sent"], true);
        assert_eq!(value["text"], "x");
    }

    #[test]
    fn test_commits_to_distinct_keys_all_survive() {
        let store = store();
        let writers = 8;
        let rounds = 200;

        let handles: Vec<_> = (0..writers)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let (alice, bob) = (UserId::new(), UserId::new());
                    let key = key_for(&alice, &bob);
                    for _ in 0..rounds {
                        let mut log = ConversationLog::load(&store, key.clone()).unwrap();
                        log.append(MessageDraft::text("x"), alice, Utc::now()).unwrap();
                        log.commit(&store).unwrap();
                    }
                    key
                })
            })
            .collect();
        let keys: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        for key in keys {
            let log = ConversationLog::load(&store, key).unwrap();
            assert_eq!(log.messages().len(), rounds);
        }
    }

    #[test]
    fn test_ensure_exists_keeps_existing_log() {
        let store = store();
        let (alice, bob) = (UserId::new(), UserId::new());
        let key = key_for(&alice, &bob);
        let mut log = ConversationLog::load(&store, key.clone()).unwrap();
        log.append(MessageDraft::text("kept"), alice, Utc::now()).unwrap();
        log.commit(&store).unwrap();

        ConversationLog::ensure_exists(&store, &key).unwrap();
        ConversationLog::ensure_exists(&store, &key_for_group(&GroupId::new())).unwrap();

        assert_eq!(ConversationLog::load(&store, key).unwrap().messages().len(), 1);
        assert_eq!(store.messages().unwrap().len(), 2);
    }
}
