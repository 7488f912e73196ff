//! Group lifecycle and membership.
//!
//! Only the creator may add or remove members and change the group's name,
//! description or avatar. Any member may leave.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use mimigram_shared::{key_for_group, ChatId, GroupId, UserId};
use mimigram_store::collections::Chats;
use mimigram_store::{ChatEntry, Group, Persistence};

use crate::accounts::find_user;
use crate::api::AppState;
use crate::conversation::ConversationLog;
use crate::error::{Result, ServerError};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroup {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub members: Vec<UserId>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MemberSummary {
    pub id: UserId,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GroupDetails {
    pub id: GroupId,
    pub name: String,
    pub description: String,
    pub avatar: Option<String>,
    pub creator: UserId,
    pub created_at: DateTime<Utc>,
    /// Members that still have an account, in join order.
    pub members: Vec<MemberSummary>,
}

pub fn find_group(store: &Persistence, id: &GroupId) -> Result<Group> {
    store
        .groups()?
        .remove(id)
        .ok_or_else(|| ServerError::NotFound(format!("group {id}")))
}

/// Load a group the caller belongs to.
pub fn member_group(store: &Persistence, id: &GroupId, user: &UserId) -> Result<Group> {
    let group = find_group(store, id)?;
    if !group.is_member(user) {
        return Err(ServerError::Forbidden("not a member of this group".into()));
    }
    Ok(group)
}

fn require_creator(group: &Group, user: &UserId) -> Result<()> {
    if group.creator != *user {
        return Err(ServerError::Forbidden("only the group creator can do that".into()));
    }
    Ok(())
}

/// Apply `change` to the stored group under the store's write lock and
/// return the group as saved. Permission checks belong inside `change` so
/// they see the same state that gets written.
fn modify_group<F>(store: &Persistence, id: &GroupId, change: F) -> Result<Group>
where
    F: FnOnce(&mut Group) -> Result<()>,
{
    store.update_groups(|groups| {
        let group = groups
            .get_mut(id)
            .ok_or_else(|| ServerError::NotFound(format!("group {id}")))?;
        change(group)?;
        Ok(group.clone())
    })
}

fn add_entry(chats: &mut Chats, member: UserId, group: &Group) {
    let list = chats.entry(member).or_default();
    if !list.iter().any(|c| c.id == ChatId::from(group.id)) {
        list.push(ChatEntry::group(group));
    }
}

fn remove_entry(store: &Persistence, member: &UserId, group: &GroupId) -> Result<()> {
    store.update_chats(|chats| {
        if let Some(list) = chats.get_mut(member) {
            list.retain(|c| c.id != ChatId::from(*group));
        }
        Ok(())
    })
}

pub fn create(state: &AppState, creator: &UserId, req: CreateGroup) -> Result<Group> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ServerError::Validation("group name is required".into()));
    }

    let mut members = vec![*creator];
    for member in req.members {
        if !members.contains(&member) {
            find_user(&state.store, &member)?;
            members.push(member);
        }
    }

    let group = Group {
        id: GroupId::new(),
        name: name.to_string(),
        description: req.description.unwrap_or_default(),
        avatar: req.avatar,
        creator: *creator,
        members,
        created_at: Utc::now(),
    };
    state.store.update_groups(|groups| {
        groups.insert(group.id, group.clone());
        Ok::<_, ServerError>(())
    })?;

    state.store.update_chats(|chats| {
        for member in &group.members {
            add_entry(chats, *member, &group);
        }
        Ok::<_, ServerError>(())
    })?;

    ConversationLog::ensure_exists(&state.store, &key_for_group(&group.id))?;

    info!(group = %group.id, creator = %creator, members = group.members.len(), "Group created");
    Ok(group)
}

pub fn add_member(state: &AppState, actor: &UserId, id: &GroupId, user: &UserId) -> Result<Group> {
    find_user(&state.store, user)?;
    let group = modify_group(&state.store, id, |group| {
        require_creator(group, actor)?;
        if !group.is_member(user) {
            group.members.push(*user);
        }
        Ok(())
    })?;

    state.store.update_chats(|chats| {
        add_entry(chats, *user, &group);
        Ok::<_, ServerError>(())
    })?;

    info!(group = %id, user = %user, "Member added");
    Ok(group)
}

pub fn remove_member(
    state: &AppState,
    actor: &UserId,
    id: &GroupId,
    user: &UserId,
) -> Result<Group> {
    let group = modify_group(&state.store, id, |group| {
        require_creator(group, actor)?;
        if *user == group.creator {
            return Err(ServerError::Validation(
                "the creator cannot be removed, leave the group instead".into(),
            ));
        }
        group.members.retain(|m| m != user);
        Ok(())
    })?;
    remove_entry(&state.store, user, id)?;

    info!(group = %id, user = %user, "Member removed");
    Ok(group)
}

/// Returns the leaving user's handle so clients can announce it.
pub fn leave(state: &AppState, user: &UserId, id: &GroupId) -> Result<String> {
    modify_group(&state.store, id, |group| {
        if !group.is_member(user) {
            return Err(ServerError::Forbidden("not a member of this group".into()));
        }
        group.members.retain(|m| m != user);
        Ok(())
    })?;
    remove_entry(&state.store, user, id)?;

    info!(group = %id, user = %user, "Member left");
    Ok(find_user(&state.store, user)?.username)
}

pub fn update(state: &AppState, actor: &UserId, id: &GroupId, req: GroupUpdate) -> Result<Group> {
    let group = modify_group(&state.store, id, |group| {
        require_creator(group, actor)?;
        if let Some(name) = req.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            group.name = name.to_string();
        }
        if let Some(description) = req.description {
            group.description = description;
        }
        if let Some(avatar) = req.avatar {
            group.avatar = Some(avatar).filter(|a| !a.is_empty());
        }
        Ok(())
    })?;

    let refreshed = ChatEntry::group(&group);
    state.store.update_chats(|chats| {
        for member in &group.members {
            if let Some(entry) = chats
                .get_mut(member)
                .and_then(|list| list.iter_mut().find(|c| c.id == refreshed.id))
            {
                *entry = refreshed.clone();
            }
        }
        Ok::<_, ServerError>(())
    })?;

    Ok(group)
}

pub fn details(state: &AppState, viewer: &UserId, id: &GroupId) -> Result<GroupDetails> {
    let group = member_group(&state.store, id, viewer)?;
    let users = state.store.users()?;
    let profiles = state.store.profiles()?;

    let members = group
        .members
        .iter()
        .filter_map(|member| {
            let user = users.iter().find(|u| u.id == *member)?;
            let profile = profiles.get(member);
            Some(MemberSummary {
                id: *member,
                username: user.username.clone(),
                first_name: profile.map_or_else(String::new, |p| p.first_name.clone()),
                last_name: profile.map_or_else(String::new, |p| p.last_name.clone()),
                avatar: profile.and_then(|p| p.avatar.clone()),
            })
        })
        .collect();

    Ok(GroupDetails {
        id: group.id,
        name: group.name,
        description: group.description,
        avatar: group.avatar,
        creator: group.creator,
        created_at: group.created_at,
        members,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::{register, RegisterRequest};
    use crate::api::test_state;

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

    fn chat_ids(state: &AppState, user: &UserId) -> Vec<ChatId> {
        state
            .store
            .chats()
            .unwrap()
            .remove(user)
            .unwrap_or_default()
            .into_iter()
            .map(|c| c.id)
            .collect()
    }

    #[test]
    fn test_create_group() {
        let state = test_state();
        let a = user(&state, "a");
        let b = user(&state, "b");

        let group = create(
            &state,
            &a,
            CreateGroup {
                name: " Team ".into(),
                members: vec![b, a, b],
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(group.name, "Team");
        assert_eq!(group.members, vec![a, b]);
        assert_eq!(chat_ids(&state, &b), vec![ChatId::from(group.id)]);
        assert!(state
            .store
            .messages()
            .unwrap()
            .contains_key(&key_for_group(&group.id)));
    }

    #[test]
    fn test_create_group_validation() {
        let state = test_state();
        let a = user(&state, "a");
        assert!(matches!(
            create(&state, &a, CreateGroup::default()),
            Err(ServerError::Validation(_))
        ));
        let unknown = CreateGroup {
            name: "x".into(),
            members: vec![UserId::new()],
            ..Default::default()
        };
        assert!(matches!(create(&state, &a, unknown), Err(ServerError::NotFound(_))));
    }

    #[test]
    fn test_only_creator_manages_members() {
        let state = test_state();
        let a = user(&state, "a");
        let b = user(&state, "b");
        let c = user(&state, "c");
        let group = create(
            &state,
            &a,
            CreateGroup {
                name: "g".into(),
                members: vec![b],
                ..Default::default()
            },
        )
        .unwrap();

        assert!(matches!(
            add_member(&state, &b, &group.id, &c),
            Err(ServerError::Forbidden(_))
        ));
        let grown = add_member(&state, &a, &group.id, &c).unwrap();
        assert_eq!(grown.members, vec![a, b, c]);
        assert_eq!(add_member(&state, &a, &group.id, &c).unwrap().members.len(), 3);

        assert!(matches!(
            remove_member(&state, &b, &group.id, &c),
            Err(ServerError::Forbidden(_))
        ));
        let shrunk = remove_member(&state, &a, &group.id, &c).unwrap();
        assert_eq!(shrunk.members, vec![a, b]);
        assert!(chat_ids(&state, &c).is_empty());

        assert!(matches!(
            add_member(&state, &a, &GroupId::new(), &c),
            Err(ServerError::NotFound(_))
        ));
    }

    #[test]
    fn test_member_can_leave() {
        let state = test_state();
        let a = user(&state, "a");
        let b = user(&state, "b");
        let group = create(
            &state,
            &a,
            CreateGroup {
                name: "g".into(),
                members: vec![b],
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(leave(&state, &b, &group.id).unwrap(), "b");
        assert_eq!(find_group(&state.store, &group.id).unwrap().members, vec![a]);
        assert!(matches!(leave(&state, &b, &group.id), Err(ServerError::Forbidden(_))));
    }

    #[test]
    fn test_update_refreshes_chat_entries() {
        let state = test_state();
        let a = user(&state, "a");
        let b = user(&state, "b");
        let group = create(
            &state,
            &a,
            CreateGroup {
                name: "old".into(),
                members: vec![b],
                ..Default::default()
            },
        )
        .unwrap();

        let req = GroupUpdate {
            name: Some("new".into()),
            description: Some("about".into()),
            avatar: None,
        };
        assert!(matches!(
            update(&state, &b, &group.id, req.clone()),
            Err(ServerError::Forbidden(_))
        ));
        let updated = update(&state, &a, &group.id, req).unwrap();
        assert_eq!(updated.name, "new");
        assert_eq!(updated.description, "about");

        let entry = state.store.chats().unwrap()[&b][0].clone();
        assert_eq!(entry.name.as_deref(), Some("new"));
    }

    #[test]
    fn test_details_resolves_members() {
        let state = test_state();
        let a = user(&state, "a");
        let b = user(&state, "b");
        let outsider = user(&state, "z");
        let group = create(
            &state,
            &a,
            CreateGroup {
                name: "g".into(),
                members: vec![b],
                ..Default::default()
            },
        )
        .unwrap();

        let details = details(&state, &b, &group.id).unwrap();
        let names: Vec<_> = details.members.iter().map(|m| m.username.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(matches!(
            super::details(&state, &outsider, &group.id),
            Err(ServerError::Forbidden(_))
        ));
    }
}
