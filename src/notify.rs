//! Outbound notifications over the WeCom (enterprise WeChat) app API.
//!
//! Fire-and-forget from the orchestrators' perspective: a failed push is
//! logged and dropped, never retried here. The next scheduled tick will
//! re-detect the condition and try again with the repeat budget untouched.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

use crate::config::WeChatConfig;

const API_BASE_URL: &str = "https://qyapi.weixin.qq.com/cgi-bin";
/// Refresh the token slightly before the server-side expiry
const TOKEN_EXPIRY_MARGIN_SECS: u64 = 30;

/// Card-style notification payload.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TextCard {
    pub title: String,
    pub description: String,
    pub url: String,
}

/// Capability the orchestrators depend on: push one card, report success.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, card: &TextCard) -> Result<bool>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    errcode: i64,
    #[serde(default)]
    errmsg: String,
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

#[derive(Serialize)]
struct SendRequest<'a> {
    touser: &'a str,
    msgtype: &'a str,
    agentid: i64,
    textcard: &'a TextCard,
}

/// WeCom app message client with an in-process access-token cache.
pub struct WeChatNotifier {
    client: reqwest::Client,
    config: WeChatConfig,
    token: Mutex<Option<(String, Instant)>>,
}

impl WeChatNotifier {
    pub fn new(client: reqwest::Client, config: WeChatConfig) -> Self {
        Self {
            client,
            config,
            token: Mutex::new(None),
        }
    }

    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some((token, expires_at)) = cached.as_ref() {
            if *expires_at > Instant::now() {
                return Ok(token.clone());
            }
        }

        let url = format!(
            "{}/gettoken?corpid={}&corpsecret={}",
            API_BASE_URL, self.config.corp_id, self.config.corp_secret
        );
        let response: TokenResponse = self
            .client
            .get(&url)
            .send()
            .await
            .context("gettoken request failed")?
            .json()
            .await
            .context("gettoken returned malformed json")?;

        if response.errcode != 0 {
            anyhow::bail!("gettoken rejected: {} {}", response.errcode, response.errmsg);
        }

        let ttl = response
            .expires_in
            .saturating_sub(TOKEN_EXPIRY_MARGIN_SECS);
        *cached = Some((
            response.access_token.clone(),
            Instant::now() + Duration::from_secs(ttl),
        ));
        Ok(response.access_token)
    }
}

#[async_trait]
impl Notifier for WeChatNotifier {
    /// Push a textcard to everyone in the app's visible range.
    ///
    /// `Ok(false)` means the API accepted the call but refused the message;
    /// transport and token errors surface as `Err`.
    async fn send(&self, card: &TextCard) -> Result<bool> {
        let token = self.access_token().await?;
        let url = format!("{}/message/send?access_token={}", API_BASE_URL, token);

        let request = SendRequest {
            touser: "@all",
            msgtype: "textcard",
            agentid: self.config.agent_id,
            textcard: card,
        };
        let response: SendResponse = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("message/send request failed")?
            .json()
            .await
            .context("message/send returned malformed json")?;

        if response.errcode != 0 {
            log::warn!(
                "message/send refused: {} {}",
                response.errcode,
                response.errmsg
            );
            return Ok(false);
        }
        Ok(true)
    }
}
