use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Duration, Utc};
use gamelog_storage::{CacheError, GameCache, GameCacheStore};
use gamelog_twitch::{HelixClient, HelixError};
use metrics::counter;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Back-off applied when a 429 carries no usable reset header.
const DEFAULT_RATE_LIMIT_BACKOFF_SECS: i64 = 60;

/// Resolves game ids to display names, caching every successful lookup on disk.
///
/// Hits never touch the network. Misses are serialised so concurrent requests
/// for the same id trigger a single Helix call, and after a 429 every miss
/// fails fast until the advertised reset time.
pub struct GameNameResolver {
    helix: HelixClient,
    access_token: Arc<str>,
    store: GameCacheStore,
    cache: RwLock<GameCache>,
    miss_guard: tokio::sync::Mutex<()>,
    rate_limited_until: Mutex<Option<DateTime<Utc>>>,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl GameNameResolver {
    pub fn new(
        helix: HelixClient,
        access_token: Arc<str>,
        store: GameCacheStore,
        initial: GameCache,
    ) -> Self {
        Self {
            helix,
            access_token,
            store,
            cache: RwLock::new(initial),
            miss_guard: tokio::sync::Mutex::new(()),
            rate_limited_until: Mutex::new(None),
            clock: Arc::new(Utc::now),
        }
    }

    /// Builds a resolver seeded from the store's current contents.
    pub fn load(
        helix: HelixClient,
        access_token: Arc<str>,
        store: GameCacheStore,
    ) -> Result<Self, CacheError> {
        let initial = store.load()?;
        info!(
            stage = "resolver",
            path = %store.path().display(),
            entries = initial.len(),
            "game cache loaded"
        );
        Ok(Self::new(helix, access_token, store, initial))
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.read_cache().len()
    }

    /// Returns the display name of `game_id`.
    pub async fn resolve(&self, game_id: &str) -> Result<String, ResolveError> {
        if let Some(name) = self.cached(game_id) {
            counter!("game_cache_lookups_total", "result" => "hit").increment(1);
            return Ok(name);
        }
        if game_id.is_empty() {
            return Err(ResolveError::NotFound(String::new()));
        }
        self.ensure_not_rate_limited()?;

        let _miss = self.miss_guard.lock().await;
        // another request may have filled the entry while we waited
        if let Some(name) = self.cached(game_id) {
            counter!("game_cache_lookups_total", "result" => "hit").increment(1);
            return Ok(name);
        }
        self.ensure_not_rate_limited()?;

        counter!("game_cache_lookups_total", "result" => "miss").increment(1);
        debug!(stage = "resolver", game_id, "looking up game on helix");
        let game = match self.helix.get_game(&self.access_token, game_id).await {
            Ok(Some(game)) => game,
            Ok(None) => return Err(ResolveError::NotFound(game_id.to_string())),
            Err(HelixError::RateLimited { reset_at }) => {
                let until = self.record_rate_limit(reset_at);
                return Err(ResolveError::RateLimited { reset_at: until });
            }
            Err(HelixError::Timeout) => return Err(ResolveError::Timeout),
            Err(err) => return Err(ResolveError::Upstream(err)),
        };

        let snapshot = {
            let mut cache = self.write_cache();
            cache
                .entry(game_id.to_string())
                .or_insert_with(|| game.name.clone());
            cache.clone()
        };
        self.persist(snapshot).await;

        info!(stage = "resolver", game_id, name = %game.name, "cached new game");
        Ok(game.name)
    }

    fn cached(&self, game_id: &str) -> Option<String> {
        self.read_cache().get(game_id).cloned()
    }

    fn read_cache(&self) -> std::sync::RwLockReadGuard<'_, GameCache> {
        self.cache
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_cache(&self) -> std::sync::RwLockWriteGuard<'_, GameCache> {
        self.cache
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_not_rate_limited(&self) -> Result<(), ResolveError> {
        let mut until = self
            .rate_limited_until
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match *until {
            Some(reset_at) if (self.clock)() < reset_at => {
                Err(ResolveError::RateLimited { reset_at })
            }
            Some(_) => {
                *until = None;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn record_rate_limit(&self, reset_at: Option<DateTime<Utc>>) -> DateTime<Utc> {
        let until = reset_at
            .unwrap_or_else(|| (self.clock)() + Duration::seconds(DEFAULT_RATE_LIMIT_BACKOFF_SECS));
        *self
            .rate_limited_until
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(until);
        counter!("helix_rate_limited_total").increment(1);
        warn!(
            stage = "resolver",
            reset_at = %until.to_rfc3339(),
            "helix rate limit exceeded, skipping game lookups until reset"
        );
        until
    }

    async fn persist(&self, snapshot: GameCache) {
        let store = self.store.clone();
        let outcome = tokio::task::spawn_blocking(move || store.save(&snapshot)).await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(stage = "resolver", error = %err, "failed to persist game cache");
            }
            Err(err) => {
                warn!(stage = "resolver", error = %err, "game cache persist task failed");
            }
        }
    }
}

/// Reasons a game name could not be resolved.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("unknown game id '{0}'")]
    NotFound(String),
    #[error("helix rate limited until {reset_at}")]
    RateLimited { reset_at: DateTime<Utc> },
    #[error("game lookup timed out")]
    Timeout,
    #[error("game lookup failed: {0}")]
    Upstream(HelixError),
}

impl ResolveError {
    pub fn metric_label(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::RateLimited { .. } => "rate_limited",
            Self::Timeout => "timeout",
            Self::Upstream(_) => "upstream",
        }
    }
}
