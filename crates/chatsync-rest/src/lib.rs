//! HTTP transport adapter.
//!
//! Sends messages to `POST /channels/{id}/messages`, as JSON or as a
//! multipart form (`payload_json` plus `files[i]` parts) when files are
//! attached, and typing signals to `POST /channels/{id}/typing`.

use async_trait::async_trait;
use chatsync_core::{
    config::Config,
    domain::{ChannelId, Nonce},
    errors::Error,
    ports::{OutgoingPayload, Transport, TypingSignal},
    Result,
};
use reqwest::header::AUTHORIZATION;
use tracing::debug;

#[derive(Clone, Debug)]
pub struct RestTransport {
    base_url: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl RestTransport {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::External(format!("http client build error: {e}")))?;
        Ok(Self {
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            http,
        })
    }

    pub fn messages_url(&self, channel_id: ChannelId) -> String {
        format!("{}/channels/{channel_id}/messages", self.base_url)
    }

    pub fn typing_url(&self, channel_id: ChannelId) -> String {
        format!("{}/channels/{channel_id}/typing", self.base_url)
    }

    fn post(&self, url: String) -> reqwest::RequestBuilder {
        let req = self.http.post(url);
        match &self.token {
            Some(token) => req.header(AUTHORIZATION, token),
            None => req,
        }
    }

    fn message_request(&self, channel_id: ChannelId, payload: OutgoingPayload) -> Result<reqwest::RequestBuilder> {
        let req = self.post(self.messages_url(channel_id));
        match payload {
            OutgoingPayload::Json(body) => Ok(req.json(&body)),
            OutgoingPayload::Multipart {
                payload_json,
                files,
            } => {
                let mut form = reqwest::multipart::Form::new()
                    .text("payload_json", serde_json::to_string(&payload_json)?);
                for (i, file) in files.into_iter().enumerate() {
                    let mut part = reqwest::multipart::Part::bytes(file.data).file_name(file.filename);
                    if let Some(ct) = file.content_type.as_deref() {
                        part = part
                            .mime_str(ct)
                            .map_err(|e| Error::External(format!("multipart error: {e}")))?;
                    }
                    form = form.part(format!("files[{i}]"), part);
                }
                Ok(req.multipart(form))
            }
        }
    }
}

async fn check(resp: reqwest::Response, what: &str) -> Result<()> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    let body = resp.text().await.unwrap_or_default();
    Err(Error::External(format!(
        "{what} failed: {status} {}",
        body.chars().take(200).collect::<String>()
    )))
}

#[async_trait]
impl Transport for RestTransport {
    async fn send_message(&self, channel_id: ChannelId, nonce: Nonce, payload: OutgoingPayload) -> Result<()> {
        debug!(%channel_id, %nonce, "POST message");
        let resp = self
            .message_request(channel_id, payload)?
            .send()
            .await
            .map_err(|e| Error::External(format!("send message request error: {e}")))?;
        check(resp, "send message").await
    }

    async fn send_typing(&self, channel_id: ChannelId, signal: TypingSignal) -> Result<()> {
        match signal {
            TypingSignal::Start => {
                let resp = self
                    .post(self.typing_url(channel_id))
                    .send()
                    .await
                    .map_err(|e| Error::External(format!("typing request error: {e}")))?;
                check(resp, "typing").await
            }
            // No endpoint; the server expires typing on its own.
            TypingSignal::Stop => {
                debug!(%channel_id, "stop typing has no REST call");
                Ok(())
            }
        }
    }
}
