use reqwest::{Client, StatusCode};
use serde::Serialize;
use thiserror::Error;
use url::Url;

/// `hub.mode` values exchanged with the WebSub hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubMode {
    Subscribe,
    Unsubscribe,
    Denied,
}

impl HubMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::Denied => "denied",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "subscribe" => Some(Self::Subscribe),
            "unsubscribe" => Some(Self::Unsubscribe),
            "denied" => Some(Self::Denied),
            _ => None,
        }
    }
}

/// Parameters of a subscribe/unsubscribe call.
pub struct HubRequest<'a> {
    pub callback: &'a Url,
    pub topic: &'a Url,
    pub lease_seconds: u64,
    pub secret: &'a str,
}

#[derive(Serialize)]
struct HubPayload<'a> {
    #[serde(rename = "hub.callback")]
    callback: &'a str,
    #[serde(rename = "hub.mode")]
    mode: &'static str,
    #[serde(rename = "hub.topic")]
    topic: &'a str,
    #[serde(rename = "hub.lease_seconds", skip_serializing_if = "Option::is_none")]
    lease_seconds: Option<String>,
    #[serde(rename = "hub.secret")]
    secret: &'a str,
}

/// Client for the WebSub hub that delivers stream change notifications.
#[derive(Clone)]
pub struct HubClient {
    http: Client,
    hub_url: Url,
    client_id: String,
}

impl HubClient {
    pub fn new(client_id: impl Into<String>, hub_url: Url, http: Client) -> Self {
        Self {
            http,
            hub_url,
            client_id: client_id.into(),
        }
    }

    /// Requests (or renews) a subscription for `request.lease_seconds`.
    pub async fn subscribe(
        &self,
        access_token: &str,
        request: &HubRequest<'_>,
    ) -> Result<(), HubError> {
        self.send(access_token, HubMode::Subscribe, request).await
    }

    /// Cancels the subscription. The lease is not sent.
    pub async fn unsubscribe(
        &self,
        access_token: &str,
        request: &HubRequest<'_>,
    ) -> Result<(), HubError> {
        self.send(access_token, HubMode::Unsubscribe, request).await
    }

    async fn send(
        &self,
        access_token: &str,
        mode: HubMode,
        request: &HubRequest<'_>,
    ) -> Result<(), HubError> {
        let payload = HubPayload {
            callback: request.callback.as_str(),
            mode: mode.as_str(),
            topic: request.topic.as_str(),
            lease_seconds: matches!(mode, HubMode::Subscribe)
                .then(|| request.lease_seconds.to_string()),
            secret: request.secret,
        };

        let response = self
            .http
            .post(self.hub_url.clone())
            .header("Client-Id", &self.client_id)
            .header("Authorization", format!("Bearer {access_token}"))
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::ACCEPTED {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<unavailable>"));
            return Err(HubError::Rejected { status, body });
        }
        Ok(())
    }
}

/// Errors raised while talking to the hub.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("hub did not accept the request ({status}): {body}")]
    Rejected { status: StatusCode, body: String },
}
