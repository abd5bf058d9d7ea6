mod events;
mod handshake;
mod problem;
mod resolver;
mod router;
mod sink;
mod subscription;
mod telemetry;
#[cfg(test)]
mod testing;
mod webhook;

use std::{net::SocketAddr, sync::Arc};

use chrono::Utc;
use gamelog_core::{ChannelState, SignatureVerifier, StreamUpdate};
use gamelog_storage::GameCacheStore;
use gamelog_twitch::{HelixClient, HubClient, TwitchOAuthClient};
use gamelog_util::{load_env_file, AppConfig};
use tracing::{info, warn};
use url::Url;

use crate::events::EventHub;
use crate::resolver::GameNameResolver;
use crate::sink::{EventLogFile, EventSink, EventSinks};
use crate::subscription::SubscriptionManager;
use crate::webhook::WebhookDispatcher;

const OAUTH_BASE_URL: &str = "https://id.twitch.tv/oauth2/";
const HELIX_BASE_URL: &str = "https://api.twitch.tv/helix/";
const HUB_URL: &str = "https://api.twitch.tv/helix/webhooks/hub";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(config.environment)?;
    let metrics = telemetry::init_metrics()?;

    let http = reqwest::Client::builder()
        .timeout(config.helix_timeout)
        .build()?;

    let oauth = TwitchOAuthClient::new(
        config.twitch.client_id.clone(),
        config.twitch.client_secret.clone(),
        Url::parse(OAUTH_BASE_URL)?,
        http.clone(),
    );
    let token = oauth.client_credentials().await?;
    let token_expires_at = token.expires_at(Utc::now());
    info!(
        stage = "startup",
        expires_at = %token_expires_at.to_rfc3339(),
        "app access token acquired"
    );
    let access_token: Arc<str> = Arc::from(token.access_token);

    let helix = HelixClient::new(
        config.twitch.client_id.clone(),
        Url::parse(HELIX_BASE_URL)?,
        http.clone(),
    );
    let user = helix
        .get_user_by_login(&access_token, &config.twitch.channel)
        .await?
        .ok_or_else(|| format!("unknown channel login '{}'", config.twitch.channel))?;
    let topic = helix.streams_topic(&user.id)?;
    info!(
        stage = "startup",
        channel = %user.login,
        user_id = %user.id,
        display_name = user.display_name.as_deref().unwrap_or_default(),
        %topic,
        "tracking channel"
    );

    let store = GameCacheStore::new(config.game_cache_path.clone());
    let resolver = GameNameResolver::load(helix.clone(), access_token.clone(), store)?;

    let events = EventHub::new();
    let log_file = EventLogFile::new(config.event_log_dir.clone());
    info!(stage = "startup", dir = %log_file.dir().display(), "event log directory");
    let sinks: Vec<Arc<dyn EventSink>> = vec![Arc::new(log_file), Arc::new(events.clone())];

    let subscriptions = SubscriptionManager::new(
        HubClient::new(config.twitch.client_id.clone(), Url::parse(HUB_URL)?, http),
        access_token.clone(),
        config.webhook.callback_url.clone(),
        topic.clone(),
        config.webhook.lease,
        Arc::from(config.webhook.secret.as_str()),
    )
    .with_token_expiry(token_expires_at);

    let dispatcher = WebhookDispatcher::new(
        user.login.as_str(),
        ChannelState::offline(),
        Arc::new(resolver),
        EventSinks::new(sinks),
    )
    .with_subscriptions(subscriptions.clone());

    let verifier = SignatureVerifier::new(config.webhook.secret.as_bytes())
        .map_err(|err| format!("invalid webhook secret: {err}"))?;
    let state = router::AppState::new(metrics, topic, verifier, dispatcher.clone(), events);

    let addr: SocketAddr = config.bind_addr;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(stage = "startup", %addr, env = %config.environment.as_str(), "starting HTTP server");

    // the hub verifies intent against the callback, so the listener must be up first
    let server = tokio::spawn(async move { axum::serve(listener, router::app_router(state)).await });

    subscriptions.subscribe().await?;
    subscriptions.spawn_renewal();

    match helix.get_stream(&access_token, &user.id).await {
        Ok(stream) => {
            let update = match stream {
                Some(stream) => StreamUpdate::live(stream.game_id, stream.title),
                None => StreamUpdate::Offline,
            };
            dispatcher.apply(update, Utc::now()).await;
        }
        Err(err) => {
            warn!(stage = "startup", error = %err, "could not prime channel state");
        }
    }

    server.await??;
    Ok(())
}
