//! Discord REST client
//!
//! Implements [`ChatServer`] over the Discord HTTP API with a simple
//! minimum-interval rate limiter. No retries: a 429 surfaces as
//! [`ChatError::RateLimited`] and the caller decides.

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use super::{
    Channel, ChannelEdit, ChannelId, ChannelKind, ChatError, ChatServer, GuildId, Member,
    NewChannel, NewRole, OverwriteTarget, PermissionOverwrite, Permissions, Role, RoleEdit,
    RoleId, UserId,
};

const USER_AGENT: &str = concat!("DiscordBot (gotm-bot, ", env!("CARGO_PKG_VERSION"), ")");
const GUILD_PAGE_LIMIT: usize = 200;
const MEMBER_PAGE_LIMIT: usize = 1000;

const CHANNEL_TYPE_TEXT: u8 = 0;
const CHANNEL_TYPE_CATEGORY: u8 = 4;
const OVERWRITE_TYPE_ROLE: u8 = 0;
const OVERWRITE_TYPE_MEMBER: u8 = 1;

/// Enforces a minimum spacing between requests
struct RateLimiter {
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateLimiter {
    fn new(min_interval: Duration) -> Self {
        Self {
            last_request: Mutex::new(None),
            min_interval,
        }
    }

    async fn wait(&self) {
        let mut last = self.last_request.lock().await;

        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                debug!("Rate limiting: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        *last = Some(Instant::now());
    }
}

pub struct DiscordClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
    rate_limiter: Arc<RateLimiter>,
}

impl DiscordClient {
    pub fn new(api_base: &str, token: &str, min_request_interval: Duration) -> Result<Self, ChatError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ChatError::Network(e.to_string()))?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
            rate_limiter: Arc::new(RateLimiter::new(min_request_interval)),
        })
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
        audit_reason: Option<&str>,
    ) -> Result<reqwest::Response, ChatError> {
        self.rate_limiter.wait().await;

        let url = format!("{}{}", self.api_base, path);
        debug!(%method, %url, "Discord request");

        let mut request = self
            .http
            .request(method, &url)
            .header("Authorization", format!("Bot {}", self.token));
        if let Some(reason) = audit_reason {
            request = request.header("X-Audit-Log-Reason", reason);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ChatError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .json::<RateLimitBody>()
                .await
                .map(|body| Duration::from_secs_f64(body.retry_after.max(0.0)))
                .unwrap_or(Duration::from_secs(1));
            return Err(ChatError::RateLimited { retry_after });
        }

        let message = response.text().await.unwrap_or_default();
        Err(ChatError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ChatError> {
        self.send(Method::GET, path, None, None)
            .await?
            .json()
            .await
            .map_err(|e| ChatError::Decode(e.to_string()))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, ChatError> {
        self.send(method, path, Some(body), None)
            .await?
            .json()
            .await
            .map_err(|e| ChatError::Decode(e.to_string()))
    }
}

fn encode<T: Serialize>(value: &T) -> Result<serde_json::Value, ChatError> {
    serde_json::to_value(value).map_err(|e| ChatError::Decode(e.to_string()))
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Deserialize)]
struct RateLimitBody {
    retry_after: f64,
}

#[derive(Deserialize)]
struct UserDto {
    id: UserId,
    #[serde(default)]
    username: String,
    #[serde(default)]
    global_name: Option<String>,
    #[serde(default)]
    bot: bool,
}

#[derive(Deserialize)]
struct PartialGuildDto {
    id: GuildId,
}

#[derive(Deserialize)]
struct RoleDto {
    id: RoleId,
    name: String,
    #[serde(default)]
    color: u32,
    #[serde(default)]
    permissions: String,
}

impl From<RoleDto> for Role {
    fn from(dto: RoleDto) -> Self {
        Role {
            id: dto.id,
            name: dto.name,
            color: dto.color,
            permissions: Permissions::from_bits(dto.permissions.parse().unwrap_or(0)),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct OverwriteDto {
    id: String,
    #[serde(rename = "type")]
    kind: u8,
    allow: String,
    deny: String,
}

impl From<&PermissionOverwrite> for OverwriteDto {
    fn from(overwrite: &PermissionOverwrite) -> Self {
        let (id, kind) = match overwrite.target {
            OverwriteTarget::Role(role) => (role.to_string(), OVERWRITE_TYPE_ROLE),
            OverwriteTarget::Member(user) => (user.to_string(), OVERWRITE_TYPE_MEMBER),
        };
        OverwriteDto {
            id,
            kind,
            allow: overwrite.allow.bits().to_string(),
            deny: overwrite.deny.bits().to_string(),
        }
    }
}

impl OverwriteDto {
    fn into_overwrite(self) -> Option<PermissionOverwrite> {
        let id: u64 = self.id.parse().ok()?;
        let target = match self.kind {
            OVERWRITE_TYPE_ROLE => OverwriteTarget::Role(RoleId(id)),
            OVERWRITE_TYPE_MEMBER => OverwriteTarget::Member(UserId(id)),
            _ => return None,
        };
        Some(PermissionOverwrite {
            target,
            allow: Permissions::from_bits(self.allow.parse().unwrap_or(0)),
            deny: Permissions::from_bits(self.deny.parse().unwrap_or(0)),
        })
    }
}

#[derive(Deserialize)]
struct ChannelDto {
    id: ChannelId,
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    parent_id: Option<ChannelId>,
    #[serde(default)]
    position: i32,
    #[serde(default)]
    permission_overwrites: Vec<OverwriteDto>,
}

impl From<ChannelDto> for Channel {
    fn from(dto: ChannelDto) -> Self {
        Channel {
            id: dto.id,
            kind: kind_from_wire(dto.kind),
            name: dto.name.unwrap_or_default(),
            parent_id: dto.parent_id,
            position: dto.position,
            overwrites: dto
                .permission_overwrites
                .into_iter()
                .filter_map(OverwriteDto::into_overwrite)
                .collect(),
        }
    }
}

fn kind_from_wire(kind: u8) -> ChannelKind {
    match kind {
        CHANNEL_TYPE_TEXT => ChannelKind::Text,
        CHANNEL_TYPE_CATEGORY => ChannelKind::Category,
        other => ChannelKind::Other(other),
    }
}

fn kind_to_wire(kind: ChannelKind) -> u8 {
    match kind {
        ChannelKind::Text => CHANNEL_TYPE_TEXT,
        ChannelKind::Category => CHANNEL_TYPE_CATEGORY,
        ChannelKind::Other(other) => other,
    }
}

#[derive(Deserialize)]
struct MemberDto {
    user: UserDto,
    #[serde(default)]
    nick: Option<String>,
    #[serde(default)]
    roles: Vec<RoleId>,
}

impl From<MemberDto> for Member {
    fn from(dto: MemberDto) -> Self {
        let display_name = dto
            .nick
            .or(dto.user.global_name)
            .unwrap_or(dto.user.username);
        Member {
            user_id: dto.user.id,
            display_name,
            is_bot: dto.user.bot,
            roles: dto.roles,
        }
    }
}

#[derive(Serialize)]
struct CreateRoleBody<'a> {
    name: &'a str,
    color: u32,
    permissions: String,
}

#[derive(Serialize)]
struct CreateChannelBody<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    kind: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    position: Option<i32>,
    permission_overwrites: Vec<OverwriteDto>,
}

#[derive(Serialize)]
struct ModifyChannelBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    position: Option<i32>,
}

// ============================================================================
// ChatServer implementation
// ============================================================================

#[async_trait]
impl ChatServer for DiscordClient {
    async fn current_user(&self) -> Result<UserId, ChatError> {
        let user: UserDto = self.get_json("/users/@me").await?;
        Ok(user.id)
    }

    async fn guilds(&self) -> Result<Vec<GuildId>, ChatError> {
        let mut guilds = Vec::new();
        let mut after: Option<GuildId> = None;
        loop {
            let mut path = format!("/users/@me/guilds?limit={}", GUILD_PAGE_LIMIT);
            if let Some(after) = after {
                path.push_str(&format!("&after={}", after));
            }
            let page: Vec<PartialGuildDto> = self.get_json(&path).await?;
            let page_len = page.len();
            guilds.extend(page.into_iter().map(|g| g.id));
            after = guilds.last().copied();
            if page_len < GUILD_PAGE_LIMIT {
                break;
            }
        }
        Ok(guilds)
    }

    async fn roles(&self, guild: GuildId) -> Result<Vec<Role>, ChatError> {
        let roles: Vec<RoleDto> = self.get_json(&format!("/guilds/{}/roles", guild)).await?;
        Ok(roles.into_iter().map(Role::from).collect())
    }

    async fn channels(&self, guild: GuildId) -> Result<Vec<Channel>, ChatError> {
        let channels: Vec<ChannelDto> = self.get_json(&format!("/guilds/{}/channels", guild)).await?;
        Ok(channels.into_iter().map(Channel::from).collect())
    }

    async fn create_role(&self, guild: GuildId, role: &NewRole) -> Result<Role, ChatError> {
        let body = encode(&CreateRoleBody {
            name: &role.name,
            color: role.color,
            permissions: role.permissions.bits().to_string(),
        })?;
        let created: RoleDto = self
            .send_json(Method::POST, &format!("/guilds/{}/roles", guild), body)
            .await?;
        Ok(created.into())
    }

    async fn modify_role(&self, guild: GuildId, role: RoleId, edit: &RoleEdit) -> Result<Role, ChatError> {
        let body = serde_json::json!({ "name": edit.name, "color": edit.color });
        let modified: RoleDto = self
            .send_json(Method::PATCH, &format!("/guilds/{}/roles/{}", guild, role), body)
            .await?;
        Ok(modified.into())
    }

    async fn create_channel(&self, guild: GuildId, channel: &NewChannel) -> Result<Channel, ChatError> {
        let body = encode(&CreateChannelBody {
            name: &channel.name,
            kind: kind_to_wire(channel.kind),
            parent_id: channel.parent_id.map(|id| id.to_string()),
            position: channel.position,
            permission_overwrites: channel.overwrites.iter().map(OverwriteDto::from).collect(),
        })?;
        let created: ChannelDto = self
            .send_json(Method::POST, &format!("/guilds/{}/channels", guild), body)
            .await?;
        Ok(created.into())
    }

    async fn modify_channel(&self, channel: ChannelId, edit: &ChannelEdit) -> Result<Channel, ChatError> {
        let body = encode(&ModifyChannelBody {
            name: edit.name.as_deref(),
            parent_id: edit.parent_id.map(|id| id.to_string()),
            position: edit.position,
        })?;
        let modified: ChannelDto = self
            .send_json(Method::PATCH, &format!("/channels/{}", channel), body)
            .await?;
        Ok(modified.into())
    }

    async fn members(&self, guild: GuildId) -> Result<Vec<Member>, ChatError> {
        let mut members: Vec<Member> = Vec::new();
        let mut after: Option<UserId> = None;
        loop {
            let mut path = format!("/guilds/{}/members?limit={}", guild, MEMBER_PAGE_LIMIT);
            if let Some(after) = after {
                path.push_str(&format!("&after={}", after));
            }
            let page: Vec<MemberDto> = self.get_json(&path).await?;
            let page_len = page.len();
            members.extend(page.into_iter().map(Member::from));
            after = members.last().map(|m| m.user_id);
            if page_len < MEMBER_PAGE_LIMIT {
                break;
            }
        }
        debug!(guild_id = %guild, count = members.len(), "Downloaded guild members");
        Ok(members)
    }

    async fn add_member_role(&self, guild: GuildId, user: UserId, role: RoleId) -> Result<(), ChatError> {
        self.send(
            Method::PUT,
            &format!("/guilds/{}/members/{}/roles/{}", guild, user, role),
            None,
            None,
        )
        .await?;
        Ok(())
    }

    async fn remove_member_role(&self, guild: GuildId, user: UserId, role: RoleId) -> Result<(), ChatError> {
        self.send(
            Method::DELETE,
            &format!("/guilds/{}/members/{}/roles/{}", guild, user, role),
            None,
            None,
        )
        .await?;
        Ok(())
    }

    async fn remove_member(&self, guild: GuildId, user: UserId, reason: &str) -> Result<(), ChatError> {
        self.send(
            Method::DELETE,
            &format!("/guilds/{}/members/{}", guild, user),
            None,
            Some(reason),
        )
        .await?;
        Ok(())
    }

    async fn send_message(&self, channel: ChannelId, content: &str) -> Result<(), ChatError> {
        self.send(
            Method::POST,
            &format!("/channels/{}/messages", channel),
            Some(serde_json::json!({ "content": content })),
            None,
        )
        .await?;
        Ok(())
    }
}
