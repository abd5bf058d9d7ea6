use chrono::{DateTime, Utc};
use reqwest::{Client, Method, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use thiserror::Error;
use url::Url;

const RATE_LIMIT_RESET_HEADER: &str = "Ratelimit-Reset";

/// Client for the Helix endpoints used to track a channel.
///
/// Request timeouts are taken from the supplied [`Client`]; a request that
/// exceeds it fails with [`HelixError::Timeout`].
#[derive(Clone)]
pub struct HelixClient {
    http: Client,
    base_url: Url,
    client_id: String,
}

impl HelixClient {
    /// Creates a new Helix client with the provided configuration.
    pub fn new(client_id: impl Into<String>, base_url: Url, http: Client) -> Self {
        Self {
            http,
            base_url,
            client_id: client_id.into(),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Builds the WebSub topic URL for a broadcaster's stream changes.
    pub fn streams_topic(&self, user_id: &str) -> Result<Url, HelixError> {
        let mut url = self.base_url.join("streams")?;
        url.query_pairs_mut().append_pair("user_id", user_id);
        Ok(url)
    }

    /// Looks up a game by id. `Ok(None)` means Helix does not know the id.
    pub async fn get_game(
        &self,
        access_token: &str,
        game_id: &str,
    ) -> Result<Option<HelixGame>, HelixError> {
        let mut url = self.base_url.join("games")?;
        url.query_pairs_mut().append_pair("id", game_id);
        self.first(url, access_token).await
    }

    /// Resolves a login name to the user record.
    pub async fn get_user_by_login(
        &self,
        access_token: &str,
        login: &str,
    ) -> Result<Option<HelixUser>, HelixError> {
        let mut url = self.base_url.join("users")?;
        url.query_pairs_mut().append_pair("login", login);
        self.first(url, access_token).await
    }

    /// Fetches the live stream of a broadcaster, `Ok(None)` when offline.
    pub async fn get_stream(
        &self,
        access_token: &str,
        user_id: &str,
    ) -> Result<Option<HelixStream>, HelixError> {
        let url = self.streams_topic(user_id)?;
        self.first(url, access_token).await
    }

    async fn first<T>(&self, url: Url, access_token: &str) -> Result<Option<T>, HelixError>
    where
        T: DeserializeOwned,
    {
        let response = self
            .authorized_request(Method::GET, url, access_token)
            .send()
            .await?;

        parse_json::<DataEnvelope<T>>(response)
            .await
            .map(|envelope| envelope.data.into_iter().next())
    }

    fn authorized_request(
        &self,
        method: Method,
        url: Url,
        access_token: &str,
    ) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header("Client-Id", &self.client_id)
            .header("Authorization", format!("Bearer {access_token}"))
    }
}

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: Vec<T>,
}

/// Game (category) entry.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct HelixGame {
    pub id: String,
    pub name: String,
}

/// User entry; only the fields needed to subscribe are kept.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct HelixUser {
    pub id: String,
    pub login: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Live stream entry.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct HelixStream {
    pub user_id: String,
    pub game_id: String,
    pub title: String,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
}

/// Errors produced by the Helix client.
#[derive(Debug, Error)]
pub enum HelixError {
    #[error("failed to build url: {0}")]
    Url(#[from] url::ParseError),
    #[error("helix request timed out")]
    Timeout,
    #[error("http error: {0}")]
    Http(reqwest::Error),
    #[error("rate limited by helix until {}", display_reset(.reset_at))]
    RateLimited { reset_at: Option<DateTime<Utc>> },
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
}

impl From<reqwest::Error> for HelixError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Http(err)
        }
    }
}

fn display_reset(reset_at: &Option<DateTime<Utc>>) -> String {
    reset_at
        .map(|at| at.to_rfc3339())
        .unwrap_or_else(|| String::from("an unknown time"))
}

fn rate_limit_reset(response: &Response) -> Option<DateTime<Utc>> {
    response
        .headers()
        .get(RATE_LIMIT_RESET_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.trim().parse::<i64>().ok())
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}

async fn parse_json<T>(response: Response) -> Result<T, HelixError>
where
    T: DeserializeOwned,
{
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(HelixError::RateLimited {
            reset_at: rate_limit_reset(&response),
        });
    }
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<unavailable>"));
        return Err(HelixError::Status { status, body });
    }

    Ok(response.json().await?)
}
