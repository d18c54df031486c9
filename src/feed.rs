use super::*;

use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;

pub(crate) const DEFAULT_SERVICE_URL: &str = "https://bsky.social";
const POST_COLLECTION: &str = "app.bsky.feed.post";
const EXPIRED_TOKEN: &str = "ExpiredToken";
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, thiserror::Error)]
pub(crate) enum FeedError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP {status}: {message}")]
    Http {
        status: u16,
        error: Option<String>,
        message: String,
    },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("superseded by a newer review session")]
    Superseded,
}

impl FeedError {
    pub(crate) fn is_transient(&self) -> bool {
        match self {
            FeedError::Network(_) => true,
            FeedError::Http { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            FeedError::InvalidResponse(_) | FeedError::NotAuthenticated | FeedError::Superseded => {
                false
            }
        }
    }

    fn is_expired_token(&self) -> bool {
        matches!(self, FeedError::Http { error: Some(code), .. } if code == EXPIRED_TOKEN)
    }
}

#[derive(Deserialize, Clone, Debug, Default)]
pub(crate) struct FeedPage {
    #[serde(rename = "feed", default)]
    pub(crate) posts: Vec<FeedViewPost>,
    #[serde(default)]
    pub(crate) cursor: Option<String>,
}

#[derive(Deserialize, Clone, Debug, Default)]
pub(crate) struct FeedViewPost {
    pub(crate) post: PostView,
    #[serde(default)]
    pub(crate) reply: Option<ReplyRef>,
    #[serde(default)]
    pub(crate) reason: Option<FeedReason>,
}

#[derive(Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PostView {
    pub(crate) uri: String,
    #[serde(default)]
    pub(crate) author: ProfileBasic,
    #[serde(default)]
    pub(crate) record: PostRecord,
    #[serde(default)]
    pub(crate) like_count: Option<u64>,
    #[serde(default)]
    pub(crate) repost_count: Option<u64>,
    #[serde(default)]
    pub(crate) reply_count: Option<u64>,
    #[serde(default)]
    pub(crate) viewer: Option<ViewerState>,
}

#[derive(Deserialize, Clone, Debug, Default)]
pub(crate) struct ProfileBasic {
    #[serde(default)]
    pub(crate) did: String,
    #[serde(default)]
    pub(crate) handle: String,
}

#[derive(Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PostRecord {
    #[serde(default)]
    pub(crate) text: String,
    #[serde(default)]
    pub(crate) created_at: Option<String>,
    #[serde(default)]
    pub(crate) reply: Option<serde_json::Value>,
}

#[derive(Deserialize, Clone, Debug, Default)]
pub(crate) struct ViewerState {
    #[serde(default)]
    pub(crate) repost: Option<String>,
}

#[derive(Deserialize, Clone, Debug, Default)]
pub(crate) struct ReplyRef {
    #[serde(default)]
    pub(crate) parent: Option<ReplyParent>,
}

#[derive(Deserialize, Clone, Debug, Default)]
pub(crate) struct ReplyParent {
    #[serde(default)]
    pub(crate) author: Option<ProfileBasic>,
}

#[derive(Deserialize, Clone, Debug, Default)]
pub(crate) struct FeedReason {
    #[serde(rename = "$type", default)]
    pub(crate) kind: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Session {
    pub(crate) did: String,
    pub(crate) handle: String,
    pub(crate) access_jwt: String,
    pub(crate) refresh_jwt: String,
}

#[derive(Deserialize, Debug, Default)]
struct XrpcErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize, Debug)]
struct SessionInfo {
    did: String,
    handle: String,
}

#[async_trait]
pub(crate) trait FeedSource: Send + Sync {
    async fn get_page(&self, actor: &str, cursor: Option<&str>) -> Result<FeedPage, FeedError>;

    async fn delete_post(&self, record_uri: &str) -> Result<(), FeedError>;
}

pub(crate) struct BlueskyClient {
    http: reqwest::Client,
    service_url: String,
    page_size: u32,
    session: RwLock<Option<Session>>,
    session_path: Option<PathBuf>,
}

impl BlueskyClient {
    pub(crate) fn new(
        service_url: &str,
        page_size: u32,
        session_path: Option<PathBuf>,
    ) -> Result<Self, FeedError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("skeet-sweeper/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            http,
            service_url: service_url.trim_end_matches('/').to_string(),
            page_size: page_size.clamp(1, 100),
            session: RwLock::new(None),
            session_path,
        })
    }

    pub(crate) async fn session(&self) -> Option<Session> {
        self.session.read().await.clone()
    }

    pub(crate) async fn login(&self, identifier: &str, password: &str) -> Result<Session, FeedError> {
        let response = self
            .http
            .post(self.xrpc("com.atproto.server.createSession"))
            .json(&serde_json::json!({
                "identifier": identifier.trim(),
                "password": password.trim(),
            }))
            .send()
            .await?;
        let session: Session = parse_body(&read_xrpc(response).await?)?;
        info!("logged in as {} ({})", session.handle, session.did);
        self.store_session(session.clone()).await;
        Ok(session)
    }

    pub(crate) async fn resume(&self, saved: Session) -> Result<Session, FeedError> {
        *self.session.write().await = Some(saved.clone());
        let result = self
            .send_authed(|token| {
                self.http
                    .get(self.xrpc("com.atproto.server.getSession"))
                    .bearer_auth(token)
            })
            .await;
        match result {
            Ok(body) => {
                let info: SessionInfo = parse_body(&body)?;
                if info.did != saved.did {
                    return Err(FeedError::InvalidResponse(format!(
                        "session belongs to {}, expected {}",
                        info.did, saved.did
                    )));
                }
                let session = self.session().await.ok_or(FeedError::NotAuthenticated)?;
                info!("resumed session for {}", info.handle);
                Ok(session)
            }
            Err(err) => {
                *self.session.write().await = None;
                Err(err)
            }
        }
    }

    pub(crate) async fn logout(&self) {
        *self.session.write().await = None;
    }

    async fn refresh(&self) -> Result<Session, FeedError> {
        let refresh_jwt = self
            .session()
            .await
            .map(|session| session.refresh_jwt)
            .ok_or(FeedError::NotAuthenticated)?;
        let response = self
            .http
            .post(self.xrpc("com.atproto.server.refreshSession"))
            .bearer_auth(refresh_jwt)
            .send()
            .await?;
        let session: Session = parse_body(&read_xrpc(response).await?)?;
        debug!("refreshed session for {}", session.handle);
        self.store_session(session.clone()).await;
        Ok(session)
    }

    async fn store_session(&self, session: Session) {
        if let Some(path) = &self.session_path {
            if let Err(err) = save_session(path, &session) {
                warn!("failed to persist session: {:#}", err);
            }
        }
        *self.session.write().await = Some(session);
    }

    async fn access_token(&self) -> Result<String, FeedError> {
        self.session()
            .await
            .map(|session| session.access_jwt)
            .ok_or(FeedError::NotAuthenticated)
    }

    async fn send_authed<F>(&self, build: F) -> Result<String, FeedError>
    where
        F: Fn(&str) -> RequestBuilder + Send + Sync,
    {
        let token = self.access_token().await?;
        match read_xrpc(build(&token).send().await?).await {
            Err(err) if err.is_expired_token() => {
                self.refresh().await?;
                let token = self.access_token().await?;
                read_xrpc(build(&token).send().await?).await
            }
            other => other,
        }
    }

    fn xrpc(&self, method: &str) -> String {
        format!("{}/xrpc/{}", self.service_url, method)
    }
}

#[async_trait]
impl FeedSource for BlueskyClient {
    async fn get_page(&self, actor: &str, cursor: Option<&str>) -> Result<FeedPage, FeedError> {
        let limit = self.page_size.to_string();
        let body = self
            .send_authed(|token| {
                let mut query = vec![("actor", actor), ("limit", limit.as_str())];
                if let Some(cursor) = cursor {
                    query.push(("cursor", cursor));
                }
                self.http
                    .get(self.xrpc("app.bsky.feed.getAuthorFeed"))
                    .query(&query)
                    .bearer_auth(token)
            })
            .await?;
        let mut page: FeedPage = parse_body(&body)?;
        if page.cursor.as_deref().map(str::is_empty).unwrap_or(false) {
            page.cursor = None;
        }
        Ok(page)
    }

    async fn delete_post(&self, record_uri: &str) -> Result<(), FeedError> {
        let target = AtUri::parse(record_uri)?;
        self.send_authed(|token| {
            self.http
                .post(self.xrpc("com.atproto.repo.deleteRecord"))
                .bearer_auth(token)
                .json(&serde_json::json!({
                    "repo": target.repo,
                    "collection": target.collection,
                    "rkey": target.rkey,
                }))
        })
        .await?;
        Ok(())
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct AtUri {
    pub(crate) repo: String,
    pub(crate) collection: String,
    pub(crate) rkey: String,
}

impl AtUri {
    pub(crate) fn parse(uri: &str) -> Result<Self, FeedError> {
        let rest = uri
            .strip_prefix("at://")
            .ok_or_else(|| FeedError::InvalidResponse(format!("not an at:// uri: {}", uri)))?;
        let parts: Vec<&str> = rest.split('/').collect();
        match parts.as_slice() {
            [repo, collection, rkey] if !repo.is_empty() && !collection.is_empty() && !rkey.is_empty() => {
                Ok(AtUri {
                    repo: repo.to_string(),
                    collection: collection.to_string(),
                    rkey: rkey.to_string(),
                })
            }
            [repo, rkey] if !repo.is_empty() && !rkey.is_empty() => Ok(AtUri {
                repo: repo.to_string(),
                collection: POST_COLLECTION.to_string(),
                rkey: rkey.to_string(),
            }),
            _ => Err(FeedError::InvalidResponse(format!("malformed record uri: {}", uri))),
        }
    }
}

async fn read_xrpc(response: reqwest::Response) -> Result<String, FeedError> {
    let status = response.status();
    let body = response.text().await?;
    if status.is_success() {
        return Ok(body);
    }
    let parsed: XrpcErrorBody = serde_json::from_str(&body).unwrap_or_default();
    Err(FeedError::Http {
        status: status.as_u16(),
        error: parsed.error,
        message: parsed
            .message
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string()),
    })
}

fn parse_body<T: DeserializeOwned>(body: &str) -> Result<T, FeedError> {
    serde_json::from_str(body).map_err(|err| FeedError::InvalidResponse(err.to_string()))
}
