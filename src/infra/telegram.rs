//! Bot API adapter: `sendMessage` and `sendPhoto`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
    Client, StatusCode,
    multipart::{Form, Part},
};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::application::gateway::{Gateway, GatewayError};
use crate::domain::entities::ChatId;
use crate::infra::blobs::{BlobError, BlobStorage};
use crate::infra::error::InfraError;

#[derive(Debug, Clone)]
pub struct TelegramSettings {
    pub api_base: Url,
    pub bot_token: String,
    pub timeout: Duration,
    pub parse_mode: Option<String>,
}

pub struct TelegramGateway {
    client: Client,
    settings: TelegramSettings,
    blobs: Arc<BlobStorage>,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: ChatId,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

impl TelegramGateway {
    pub fn new(settings: TelegramSettings, blobs: Arc<BlobStorage>) -> Result<Self, InfraError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|err| InfraError::http(format!("failed to build bot client: {err}")))?;
        Ok(Self {
            client,
            settings,
            blobs,
        })
    }

    /// Token-bearing; never log the result.
    fn api_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.settings.api_base.as_str().trim_end_matches('/'),
            self.settings.bot_token,
            method
        )
    }

    async fn finish(
        &self,
        method: &'static str,
        chat_id: ChatId,
        sent: Result<reqwest::Response, reqwest::Error>,
    ) -> Result<(), GatewayError> {
        let response = sent.map_err(transport_error)?;
        let status = response.status();
        let body = response.json::<ApiResponse>().await.ok();

        let (ok, description, retry_after) = match body {
            Some(body) => (
                body.ok,
                body.description,
                body.parameters.and_then(|p| p.retry_after),
            ),
            None => (false, None, None),
        };

        if status.is_success() && ok {
            debug!(
                target = "tidings::infra::telegram",
                method,
                chat_id,
                "bot api call succeeded"
            );
            return Ok(());
        }

        Err(classify(status, description.as_deref(), retry_after))
    }
}

#[async_trait]
impl Gateway for TelegramGateway {
    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<(), GatewayError> {
        let payload = SendMessage {
            chat_id,
            text,
            parse_mode: self.settings.parse_mode.as_deref(),
        };
        let sent = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&payload)
            .send()
            .await;
        self.finish("sendMessage", chat_id, sent).await
    }

    async fn send_photo(
        &self,
        chat_id: ChatId,
        blob_ref: &str,
        caption: &str,
    ) -> Result<(), GatewayError> {
        let data = self.blobs.read(blob_ref).await.map_err(|err| match err {
            BlobError::InvalidPath(_) | BlobError::EmptyPayload => {
                GatewayError::permanent(format!("image `{blob_ref}` is unusable: {err}"))
            }
            BlobError::Io(_) => GatewayError::transient(format!("image `{blob_ref}` unreadable: {err}")),
        })?;

        let file_name = blob_ref.rsplit('/').next().unwrap_or(blob_ref).to_string();
        let mime = mime_guess::from_path(&file_name).first_or_octet_stream();
        let part = Part::bytes(data.to_vec())
            .file_name(file_name)
            .mime_str(mime.essence_str())
            .map_err(|err| GatewayError::permanent(format!("invalid image type: {err}")))?;

        let mut form = Form::new()
            .text("chat_id", chat_id.to_string())
            .part("photo", part);
        if !caption.is_empty() {
            form = form.text("caption", caption.to_string());
        }
        if let Some(mode) = self.settings.parse_mode.as_deref() {
            form = form.text("parse_mode", mode.to_string());
        }

        let sent = self
            .client
            .post(self.api_url("sendPhoto"))
            .multipart(form)
            .send()
            .await;
        self.finish("sendPhoto", chat_id, sent).await
    }
}

fn transport_error(err: reqwest::Error) -> GatewayError {
    let err = err.without_url();
    if err.is_timeout() {
        GatewayError::transient(format!("request timed out: {err}"))
    } else {
        GatewayError::transient(format!("request failed: {err}"))
    }
}

/// Rate limits and server errors may pass; rejected targets and payloads will
/// not.
fn classify(status: StatusCode, description: Option<&str>, retry_after: Option<u64>) -> GatewayError {
    let description = description.unwrap_or("no description");
    match status.as_u16() {
        429 => match retry_after {
            Some(secs) => GatewayError::transient(format!("rate limited, retry after {secs}s")),
            None => GatewayError::transient("rate limited"),
        },
        500..=599 => GatewayError::transient(format!("server error {status}: {description}")),
        400..=499 => GatewayError::permanent(format!("{status}: {description}")),
        _ if status.is_success() => GatewayError::permanent(format!("request refused: {description}")),
        _ => GatewayError::transient(format!("unexpected status {status}: {description}")),
    }
}
