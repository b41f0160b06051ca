// discord/roles.rs — Guild role membership
//
// A point-in-time snapshot of the guild's roles and members, taken once per
// rank batch. Needs the GUILD_MEMBERS privileged intent for the member list.

use std::collections::HashSet;

use async_trait::async_trait;
use consentkeeper_core::{EngineError, EngineResult, RoleDirectory};
use log::info;
use serde::Deserialize;
use serde_json::Value;

use super::DiscordRest;

/// Discord's maximum page size for the member list.
const MEMBER_PAGE_LIMIT: usize = 1000;

#[derive(Debug, Deserialize)]
struct GuildRole {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MemberUser {
    id: String,
}

#[derive(Debug, Deserialize)]
struct GuildMember {
    user: MemberUser,
    #[serde(default)]
    roles: Vec<String>,
}

pub struct GuildRoleSnapshot {
    role_ids: HashSet<String>,
    members: Vec<GuildMember>,
}

impl GuildRoleSnapshot {
    /// No roles and no members: every tier is skipped.
    pub fn empty() -> Self {
        GuildRoleSnapshot { role_ids: HashSet::new(), members: Vec::new() }
    }

    /// Fetch every role and every member of the guild.
    pub async fn fetch(rest: &DiscordRest, guild_id: &str) -> EngineResult<Self> {
        let roles: Vec<GuildRole> = parse(rest.get(&format!("/guilds/{}/roles", guild_id)).await?, "roles")?;

        let mut members = Vec::new();
        let mut after = "0".to_string();
        loop {
            let path = format!("/guilds/{}/members?limit={}&after={}", guild_id, MEMBER_PAGE_LIMIT, after);
            let page: Vec<GuildMember> = parse(rest.get(&path).await?, "members")?;
            let full = page.len() == MEMBER_PAGE_LIMIT;
            if let Some(last) = page.iter().filter_map(|m| m.user.id.parse::<u64>().ok()).max() {
                after = last.to_string();
            }
            members.extend(page);
            if !full {
                break;
            }
        }

        info!("[discord] Role snapshot: {} roles, {} members", roles.len(), members.len());
        Ok(GuildRoleSnapshot { role_ids: roles.into_iter().map(|r| r.id).collect(), members })
    }

    fn members_of(&self, role_id: &str) -> Option<Vec<String>> {
        if !self.role_ids.contains(role_id) {
            return None;
        }
        Some(
            self.members
                .iter()
                .filter(|m| m.roles.iter().any(|r| r == role_id))
                .map(|m| m.user.id.clone())
                .collect(),
        )
    }
}

fn parse<T: serde::de::DeserializeOwned>(value: Value, what: &str) -> EngineResult<T> {
    serde_json::from_value(value).map_err(|e| EngineError::RoleLookup(format!("bad {} response: {}", what, e)))
}

#[async_trait]
impl RoleDirectory for GuildRoleSnapshot {
    async fn members_with_role(&self, role_id: &str) -> EngineResult<Option<Vec<String>>> {
        Ok(self.members_of(role_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot() -> GuildRoleSnapshot {
        let roles: Vec<GuildRole> = parse(json!([{ "id": "10" }, { "id": "20" }]), "roles").unwrap();
        let members: Vec<GuildMember> = parse(
            json!([
                { "user": { "id": "1" }, "roles": ["10", "20"] },
                { "user": { "id": "2" }, "roles": ["20"] },
                { "user": { "id": "3" } },
            ]),
            "members",
        )
        .unwrap();
        GuildRoleSnapshot { role_ids: roles.into_iter().map(|r| r.id).collect(), members }
    }

    #[tokio::test]
    async fn members_by_role() {
        let snap = snapshot();
        assert_eq!(snap.members_with_role("10").await.unwrap(), Some(vec!["1".to_string()]));
        assert_eq!(
            snap.members_with_role("20").await.unwrap(),
            Some(vec!["1".to_string(), "2".to_string()])
        );
    }

    #[tokio::test]
    async fn unknown_role_is_none() {
        assert_eq!(snapshot().members_with_role("99").await.unwrap(), None);
    }

    #[test]
    fn malformed_member_list_is_role_lookup_error() {
        let r: EngineResult<Vec<GuildMember>> = parse(json!({ "code": 50001 }), "members");
        assert!(matches!(r, Err(EngineError::RoleLookup(_))));
    }
}
