//! Twitch Helix implementation of [`LiveSetProvider`].
//!
//! Requests are authenticated with an app access token obtained through the
//! client-credentials grant. The token is cached until shortly before it
//! expires and refreshed once if Helix rejects it.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use streamwatch_core::types::{LiveEntity, LiveFilter, OwnerId, StreamId};
use streamwatch_sync::{plan, LiveSetProvider, ProviderError};

pub const HELIX_BASE_URL: &str = "https://api.twitch.tv/helix";
pub const AUTH_BASE_URL: &str = "https://id.twitch.tv/oauth2";

/// Helix page size ceiling.
const PAGE_SIZE: &str = "100";
/// Upper bound on pages followed in one fetch.
const MAX_PAGES: usize = 50;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
/// Refresh this long before the token actually expires.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct AppToken {
    value: String,
    expires_at: Instant,
}

/// Client id and secret are passed in by the caller; never log them.
#[derive(Debug)]
pub struct TwitchProvider {
    http: Client,
    client_id: String,
    client_secret: String,
    api_base: String,
    auth_base: String,
    token: Mutex<Option<AppToken>>,
}

impl TwitchProvider {
    pub fn new(client_id: String, client_secret: String) -> Self {
        Self::new_with_base_urls(
            client_id,
            client_secret,
            HELIX_BASE_URL.to_string(),
            AUTH_BASE_URL.to_string(),
        )
    }

    pub fn new_with_base_urls(
        client_id: String,
        client_secret: String,
        api_base: String,
        auth_base: String,
    ) -> Self {
        Self {
            http: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            client_id,
            client_secret,
            api_base: api_base.trim_end_matches('/').to_string(),
            auth_base: auth_base.trim_end_matches('/').to_string(),
            token: Mutex::new(None),
        }
    }

    async fn access_token(&self) -> Result<String, ProviderError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        let endpoint = format!("{}/token", self.auth_base);
        let resp = self
            .http
            .post(&endpoint)
            .query(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await
            .map_err(request_err)?;
        let body: TokenResponse = decode(resp, "oauth2/token").await?;

        let lifetime = Duration::from_secs(body.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        tracing::debug!(expires_in = body.expires_in, "obtained twitch app access token");
        *cached = Some(AppToken {
            value: body.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(body.access_token)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    /// GET a Helix endpoint, retrying once with a fresh token on 401.
    async fn helix_get<T>(&self, path: &str, query: &[(&str, &str)]) -> Result<T, ProviderError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let url = format!("{}/{}", self.api_base, path);
        for attempt in 0..2 {
            let token = self.access_token().await?;
            let resp = self
                .http
                .get(&url)
                .header("Client-Id", &self.client_id)
                .bearer_auth(&token)
                .query(query)
                .send()
                .await
                .map_err(request_err)?;

            if resp.status() == StatusCode::UNAUTHORIZED && attempt == 0 {
                tracing::info!(endpoint = path, "twitch rejected app token, refreshing");
                self.invalidate_token().await;
                continue;
            }
            return decode(resp, path).await;
        }
        Err(ProviderError::Status {
            status: StatusCode::UNAUTHORIZED.as_u16(),
            endpoint: path.to_string(),
        })
    }

    async fn user_by(&self, key: &str, value: &str) -> Result<Option<HelixUser>, ProviderError> {
        let page: HelixPage<HelixUser> = self.helix_get("users", &[(key, value)]).await?;
        Ok(page.data.into_iter().next())
    }
}

#[async_trait]
impl LiveSetProvider for TwitchProvider {
    async fn fetch_live(&self, filter: &LiveFilter) -> Result<Vec<LiveEntity>, ProviderError> {
        let mut out = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let mut query = vec![("game_id", filter.game_id.as_str()), ("first", PAGE_SIZE)];
            if let Some(after) = cursor.as_deref() {
                query.push(("after", after));
            }
            let page: HelixPage<HelixStream> = self.helix_get("streams", &query).await?;
            let fetched = page.data.len();
            out.extend(page.data.into_iter().map(LiveEntity::from));

            cursor = page.pagination.and_then(|p| p.cursor).filter(|c| !c.is_empty());
            if cursor.is_none() || fetched == 0 {
                break;
            }
        }
        if cursor.is_some() {
            tracing::warn!(pages = MAX_PAGES, "stopped following stream pagination");
        }

        // The list can shift between pages, repeating a stream on the next one.
        let out = plan::dedup_live(out);
        tracing::debug!(game_id = %filter.game_id, live = out.len(), "fetched live streams");
        Ok(out)
    }

    async fn owner_icon_url(&self, owner: &OwnerId) -> Result<Option<String>, ProviderError> {
        Ok(self
            .user_by("id", &owner.0)
            .await?
            .map(|u| u.profile_image_url)
            .filter(|url| !url.is_empty()))
    }

    async fn lookup_owner_id(&self, login: &str) -> Result<OwnerId, ProviderError> {
        self.user_by("login", &login.to_lowercase())
            .await?
            .map(|u| OwnerId(u.id))
            .ok_or_else(|| ProviderError::NotFound {
                name: login.to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct HelixPage<T> {
    data: Vec<T>,
    #[serde(default)]
    pagination: Option<HelixPagination>,
}

#[derive(Debug, Deserialize)]
struct HelixPagination {
    #[serde(default)]
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HelixStream {
    id: String,
    user_id: String,
    user_name: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    viewer_count: u64,
    #[serde(default)]
    thumbnail_url: String,
}

impl From<HelixStream> for LiveEntity {
    fn from(s: HelixStream) -> Self {
        LiveEntity {
            id: StreamId(s.id),
            owner_id: OwnerId(s.user_id),
            owner_name: s.user_name,
            title: s.title,
            viewer_count: s.viewer_count,
            thumbnail_url: s.thumbnail_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct HelixUser {
    id: String,
    #[serde(default)]
    profile_image_url: String,
}

fn request_err(err: reqwest::Error) -> ProviderError {
    ProviderError::Request(err.to_string())
}

async fn decode<T>(resp: reqwest::Response, endpoint: &str) -> Result<T, ProviderError>
where
    T: for<'de> Deserialize<'de>,
{
    let status = resp.status();
    if !status.is_success() {
        return Err(ProviderError::Status {
            status: status.as_u16(),
            endpoint: endpoint.to_string(),
        });
    }
    resp.json::<T>()
        .await
        .map_err(|err| ProviderError::Decode(format!("{endpoint}: {err}")))
}
