use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize};
use shared::{
    domain::{ConversationId, FriendRequestId},
    protocol::{FriendRequest, FriendSummary},
};
use tracing::debug;
use url::Url;

use crate::ChatServiceClient;

pub const DEFAULT_SERVER_URL: &str = "https://server.kahla.app";

#[derive(Debug, Deserialize)]
struct StatusResponse {
    code: i32,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitPusherResponse {
    code: i32,
    #[serde(default)]
    message: String,
    #[serde(default)]
    server_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ItemsResponse<T> {
    code: i32,
    #[serde(default)]
    message: String,
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

fn ensure_success(action: &str, code: i32, message: &str) -> Result<()> {
    if code != 0 {
        bail!("{action} rejected by chat server (code {code}): {message}");
    }
    Ok(())
}

fn bool_param(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

/// HTTP client for the Kahla REST API. The login cookie is kept in the
/// client's cookie store and reused by every later call.
pub struct KahlaClient {
    http: Client,
    server_url: Url,
}

impl KahlaClient {
    pub fn new(server_url: &str) -> Result<Self> {
        let mut parsed = Url::parse(server_url)
            .with_context(|| format!("invalid chat server url: {server_url}"))?;
        if !parsed.path().ends_with('/') {
            let path = format!("{}/", parsed.path());
            parsed.set_path(&path);
        }
        let http = Client::builder()
            .cookie_store(true)
            .build()
            .context("failed to build chat server http client")?;
        Ok(Self {
            http,
            server_url: parsed,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.server_url
            .join(path)
            .with_context(|| format!("invalid chat server endpoint: {path}"))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        debug!(%url, "chat server request");
        let body = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(body)
    }

    async fn post_form<T: DeserializeOwned>(&self, url: Url, form: &[(&str, &str)]) -> Result<T> {
        debug!(%url, "chat server request");
        let body = self
            .http
            .post(url)
            .form(form)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(body)
    }
}

#[async_trait]
impl ChatServiceClient for KahlaClient {
    async fn login(&self, email: &str, password: &str) -> Result<()> {
        let response: StatusResponse = self
            .post_form(
                self.endpoint("Auth/AuthByPassword")?,
                &[("Email", email), ("Password", password)],
            )
            .await
            .context("login request failed")?;
        ensure_success("login", response.code, &response.message)
    }

    async fn init_pusher(&self) -> Result<String> {
        let response: InitPusherResponse = self
            .get_json(self.endpoint("Auth/InitPusher")?)
            .await
            .context("init pusher request failed")?;
        ensure_success("init pusher", response.code, &response.message)?;
        response
            .server_path
            .filter(|path| !path.is_empty())
            .ok_or_else(|| anyhow!("init pusher response did not include a server path"))
    }

    async fn my_friends(&self, order_by_name: bool) -> Result<Vec<FriendSummary>> {
        let mut url = self.endpoint("Friendship/MyFriends")?;
        url.query_pairs_mut()
            .append_pair("orderByName", bool_param(order_by_name));
        let response: ItemsResponse<FriendSummary> = self
            .get_json(url)
            .await
            .context("friend list request failed")?;
        ensure_success("friend list", response.code, &response.message)?;
        Ok(response.items)
    }

    async fn my_requests(&self) -> Result<Vec<FriendRequest>> {
        let response: ItemsResponse<FriendRequest> = self
            .get_json(self.endpoint("Friendship/MyRequests")?)
            .await
            .context("friend request list failed")?;
        ensure_success("friend request list", response.code, &response.message)?;
        Ok(response.items)
    }

    async fn complete_request(&self, request_id: FriendRequestId, accept: bool) -> Result<()> {
        let response: StatusResponse = self
            .post_form(
                self.endpoint(&format!("Friendship/CompleteRequest/{}", request_id.0))?,
                &[("accept", bool_param(accept))],
            )
            .await
            .with_context(|| format!("complete friend request {} failed", request_id.0))?;
        ensure_success("complete friend request", response.code, &response.message)
    }

    async fn send_message(&self, conversation_id: ConversationId, ciphertext: &str) -> Result<()> {
        let response: StatusResponse = self
            .post_form(
                self.endpoint(&format!("Conversation/SendMessage/{}", conversation_id.0))?,
                &[("content", ciphertext)],
            )
            .await
            .with_context(|| format!("send message to conversation {} failed", conversation_id.0))?;
        ensure_success("send message", response.code, &response.message)
    }
}

#[cfg(test)]
#[path = "tests/kahla_tests.rs"]
mod tests;
