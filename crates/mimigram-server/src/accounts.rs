//! Accounts, profiles, chat lists and stickers.

use serde::{Deserialize, Deserializer, Serialize};
use subtle::ConstantTimeEq;
use tracing::info;

use mimigram_shared::{key_for, ChatId, UserId};
use mimigram_store::{ChatEntry, Persistence, Profile, User};

use crate::api::AppState;
use crate::conversation::ConversationLog;
use crate::error::{Result, ServerError};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub id: UserId,
}

/// Profile fields to change. Absent fields are left alone; an explicit
/// `"avatar": null` clears the avatar.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub avatar: Option<Option<String>>,
    #[serde(default)]
    pub bio: Option<String>,
}

fn present<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublicProfile {
    #[serde(flatten)]
    pub profile: Profile,
    pub online: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: UserId,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatListItem {
    #[serde(flatten)]
    pub entry: ChatEntry,
    pub online: bool,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

pub fn register(state: &AppState, req: RegisterRequest) -> Result<User> {
    if !state.config.registration_open {
        return Err(ServerError::Forbidden("registration is closed".into()));
    }
    let (Some(username), Some(password)) = (non_empty(req.username), req.password) else {
        return Err(ServerError::Validation("username and password are required".into()));
    };
    if password.is_empty() {
        return Err(ServerError::Validation("username and password are required".into()));
    }

    let user = User {
        id: UserId::new(),
        first_name: non_empty(req.first_name).unwrap_or_default(),
        last_name: non_empty(req.last_name).unwrap_or_default(),
        username,
        password,
        token: new_token(),
    };
    state.store.update_users(|users| {
        if users.iter().any(|u| u.username == user.username) {
            return Err(ServerError::Conflict(format!(
                "username `{}` is taken",
                user.username
            )));
        }
        users.push(user.clone());
        Ok(())
    })?;

    state.store.update_profiles(|profiles| {
        profiles.insert(
            user.id,
            Profile {
                first_name: user.first_name.clone(),
                last_name: user.last_name.clone(),
                username: user.username.clone(),
                ..Default::default()
            },
        );
        Ok::<_, ServerError>(())
    })?;

    info!(user = %user.id, username = %user.username, "Registered user");
    Ok(user)
}

/// Check credentials and hand out a fresh token. Older tokens stop working.
pub fn login(state: &AppState, username: &str, password: &str) -> Result<Session> {
    let session = state.store.update_users(|users| {
        let user = users
            .iter_mut()
            .find(|u| u.username == username && secret_eq(&u.password, password))
            .ok_or_else(|| ServerError::Auth("wrong username or password".into()))?;
        user.token = new_token();
        Ok::<_, ServerError>(Session {
            token: user.token.clone(),
            id: user.id,
        })
    })?;

    info!(user = %session.id, "User logged in");
    Ok(session)
}

/// Resolve a session token to its user.
pub fn authenticate_token(store: &Persistence, token: &str) -> Result<User> {
    if token.is_empty() {
        return Err(ServerError::Auth("missing token".into()));
    }
    store
        .users()?
        .into_iter()
        .find(|u| secret_eq(&u.token, token))
        .ok_or_else(|| ServerError::Auth("invalid token".into()))
}

pub fn find_user(store: &Persistence, id: &UserId) -> Result<User> {
    store
        .users()?
        .into_iter()
        .find(|u| u.id == *id)
        .ok_or_else(|| ServerError::NotFound(format!("user {id}")))
}

pub fn own_profile(state: &AppState, user: &UserId) -> Result<Profile> {
    Ok(state.store.profiles()?.remove(user).unwrap_or_default())
}

pub async fn public_profile(state: &AppState, id: &UserId) -> Result<PublicProfile> {
    find_user(&state.store, id)?;
    let profile = state.store.profiles()?.remove(id).unwrap_or_default();
    let online = state.dispatcher.presence().is_online(id).await;
    Ok(PublicProfile { profile, online })
}

pub fn update_profile(state: &AppState, user: &UserId, update: ProfileUpdate) -> Result<Profile> {
    let first_name = non_empty(update.first_name);
    let last_name = non_empty(update.last_name);
    let username = non_empty(update.username);

    state.store.update_users(|users| {
        if let Some(name) = &username {
            if users.iter().any(|u| u.username == *name && u.id != *user) {
                return Err(ServerError::Conflict(format!("username `{name}` is taken")));
            }
        }
        let account = users
            .iter_mut()
            .find(|u| u.id == *user)
            .ok_or_else(|| ServerError::NotFound(format!("user {user}")))?;
        if let Some(v) = &first_name {
            account.first_name = v.clone();
        }
        if let Some(v) = &last_name {
            account.last_name = v.clone();
        }
        if let Some(v) = &username {
            account.username = v.clone();
        }
        Ok(())
    })?;

    state.store.update_profiles(|profiles| {
        let profile = profiles.entry(*user).or_default();
        if let Some(v) = first_name {
            profile.first_name = v;
        }
        if let Some(v) = last_name {
            profile.last_name = v;
        }
        if let Some(v) = username {
            profile.username = v;
        }
        if let Some(avatar) = update.avatar {
            profile.avatar = avatar;
        }
        if let Some(bio) = update.bio {
            profile.bio = bio;
        }
        Ok(profile.clone())
    })
}

/// Exact handle lookup, never returning the searcher.
pub fn search(state: &AppState, viewer: &UserId, username: &str) -> Result<Option<UserSummary>> {
    let username = username.trim();
    if username.is_empty() {
        return Ok(None);
    }
    let Some(found) = state
        .store
        .users()?
        .into_iter()
        .find(|u| u.username == username && u.id != *viewer)
    else {
        return Ok(None);
    };
    let avatar = state
        .store
        .profiles()?
        .remove(&found.id)
        .and_then(|p| p.avatar);

    Ok(Some(UserSummary {
        id: found.id,
        username: found.username,
        first_name: found.first_name,
        last_name: found.last_name,
        avatar,
    }))
}

pub fn set_blocked(state: &AppState, user: &UserId, target: &UserId, blocked: bool) -> Result<()> {
    if user == target {
        return Err(ServerError::Validation("cannot block yourself".into()));
    }
    find_user(&state.store, target)?;

    let changed = state.store.update_profiles(|profiles| {
        let profile = profiles.entry(*user).or_default();
        let already = profile.has_blocked(target);
        if blocked && !already {
            profile.blocked_users.push(*target);
        } else if !blocked && already {
            profile.blocked_users.retain(|u| u != target);
        } else {
            return Ok::<_, ServerError>(false);
        }
        Ok(true)
    })?;
    if changed {
        info!(user = %user, target = %target, blocked, "Block list changed");
    }
    Ok(())
}

/// Whether `owner` has blocked `other`.
pub fn is_blocked_by(store: &Persistence, owner: &UserId, other: &UserId) -> Result<bool> {
    Ok(store
        .profiles()?
        .get(owner)
        .map_or(false, |p| p.has_blocked(other)))
}

/// Put `me` and the owner of `username` on each other's chat lists.
pub fn add_chat(state: &AppState, me: &User, username: &str) -> Result<UserId> {
    let target = state
        .store
        .users()?
        .into_iter()
        .find(|u| u.username == username.trim())
        .ok_or_else(|| ServerError::NotFound(format!("user `{}`", username.trim())))?;
    if target.id == me.id {
        return Err(ServerError::Validation("cannot start a chat with yourself".into()));
    }

    let profiles = state.store.profiles()?;
    if profiles
        .get(&target.id)
        .map_or(false, |p| p.has_blocked(&me.id))
    {
        return Err(ServerError::Forbidden("you are blocked by this user".into()));
    }

    state.store.update_chats(|chats| {
        for (owner, peer) in [(me, &target), (&target, me)] {
            let list = chats.entry(owner.id).or_default();
            if !list.iter().any(|c| c.id == ChatId::from(peer.id)) {
                list.push(ChatEntry::direct(peer, profiles.get(&peer.id)));
            }
        }
        Ok::<_, ServerError>(())
    })?;

    ConversationLog::ensure_exists(&state.store, &key_for(&me.id, &target.id))?;

    info!(user = %me.id, peer = %target.id, "Chat added");
    Ok(target.id)
}

pub async fn list_chats(state: &AppState, user: &UserId) -> Result<Vec<ChatListItem>> {
    let entries = state.store.chats()?.remove(user).unwrap_or_default();
    let presence = state.dispatcher.presence();

    let mut items = Vec::with_capacity(entries.len());
    for entry in entries {
        let online = !entry.is_group && presence.is_online(&UserId(entry.id.0)).await;
        items.push(ChatListItem { entry, online });
    }
    Ok(items)
}

pub fn add_sticker(state: &AppState, user: &UserId, sticker: serde_json::Value) -> Result<()> {
    if sticker.is_null() {
        return Err(ServerError::Validation("sticker is required".into()));
    }
    state.store.update_stickers(|stickers| {
        stickers.entry(*user).or_default().push(sticker);
        Ok(())
    })
}

pub fn list_stickers(state: &AppState, user: &UserId) -> Result<Vec<serde_json::Value>> {
    Ok(state.store.stickers()?.remove(user).unwrap_or_default())
}

fn new_token() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn secret_eq(stored: &str, given: &str) -> bool {
    let (a, b) = (stored.as_bytes(), given.as_bytes());
    a.len() == b.len() && a.ct_eq(b).unwrap_u8() == 1
}
