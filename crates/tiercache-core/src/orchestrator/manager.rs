//! Cache orchestrator
//!
//! Composes the active providers behind one cache contract:
//! - reads scan providers in priority order and promote hits into the
//!   tiers that missed
//! - writes and maintenance fan out to every provider concurrently
//! - the provider list is reconciled against the [`ConfigSource`] at most
//!   once per poll interval

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::worker::BackgroundWorker;
use crate::cache::{BackendType, CacheHit, CacheProvider, CacheStats, CachedValue};
use crate::config::{ConfigSource, MemorySettings, OrchestratorSettings};
use crate::error::CacheError;
use crate::providers::{MemoryProvider, ProviderFactory};

/// The ordered providers in use and when they were last validated
#[derive(Default)]
struct ProviderSet {
    providers: Vec<Arc<dyn CacheProvider>>,
    last_check: Option<Instant>,
}

impl ProviderSet {
    fn is_fresh(&self, poll_interval: Duration) -> bool {
        !self.providers.is_empty()
            && self
                .last_check
                .is_some_and(|checked| checked.elapsed() < poll_interval)
    }

    fn backend_types(&self) -> Vec<BackendType> {
        self.providers.iter().map(|p| p.backend_type()).collect()
    }
}

fn describe(backends: &[BackendType]) -> String {
    backends
        .iter()
        .map(BackendType::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

fn record_failure(backend: BackendType, operation: &'static str, e: &CacheError) {
    warn!(backend = %backend, operation, "Cache provider operation failed: {}", e);
    metrics::counter!(
        "tiercache_provider_failures_total",
        "backend" => backend.as_str(),
        "operation" => operation
    )
    .increment(1);
}

/// Unified cache over an ordered list of providers
pub struct CacheOrchestrator {
    config_source: Arc<dyn ConfigSource>,
    factory: Arc<dyn ProviderFactory>,
    settings: OrchestratorSettings,
    provider_set: RwLock<ProviderSet>,
    worker: BackgroundWorker,
    closed: AtomicBool,
}

impl CacheOrchestrator {
    /// Create an orchestrator with an empty provider set.
    ///
    /// Providers are built lazily by the first operation, or eagerly by
    /// [`initialize`](Self::initialize).
    pub fn new(
        config_source: Arc<dyn ConfigSource>,
        factory: Arc<dyn ProviderFactory>,
        settings: OrchestratorSettings,
    ) -> Self {
        let worker = BackgroundWorker::new(settings.max_background_tasks);
        Self {
            config_source,
            factory,
            settings,
            provider_set: RwLock::new(ProviderSet::default()),
            worker,
            closed: AtomicBool::new(false),
        }
    }

    /// Build the provider set now, surfacing a critical construction failure
    pub async fn initialize(&self) -> Result<Vec<BackendType>, CacheError> {
        let providers = self.ensure_providers().await?;
        Ok(providers.iter().map(|p| p.backend_type()).collect())
    }

    async fn ensure_providers(&self) -> Result<Vec<Arc<dyn CacheProvider>>, CacheError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Unavailable(
                "cache orchestrator is shut down".to_string(),
            ));
        }

        {
            let set = self.provider_set.read().await;
            if set.is_fresh(self.settings.poll_interval) {
                return Ok(set.providers.clone());
            }
        }

        let mut set = self.provider_set.write().await;
        // Another caller may have reconciled while we waited for the lock
        if !set.is_fresh(self.settings.poll_interval) {
            self.reconcile(&mut set).await?;
        }
        Ok(set.providers.clone())
    }

    async fn reconcile(&self, set: &mut ProviderSet) -> Result<(), CacheError> {
        let desired = match self.config_source.ordered_backend_types().await {
            Ok(raw) => BackendType::parse_list(&raw),
            Err(e) if !set.providers.is_empty() => {
                warn!("Config source failed, keeping current providers: {}", e);
                set.last_check = Some(Instant::now());
                return Ok(());
            }
            Err(e) => {
                warn!("Config source failed, falling back to memory only: {}", e);
                vec![BackendType::Memory]
            }
        };
        set.last_check = Some(Instant::now());

        let current = set.backend_types();
        if !set.providers.is_empty() && current == desired {
            debug!("Cache providers unchanged: {}", describe(&current));
            return Ok(());
        }

        if !set.providers.is_empty() {
            info!(
                "Cache backend list changed: [{}] -> [{}]",
                describe(&current),
                describe(&desired)
            );
            self.worker.drain().await;
            for provider in set.providers.drain(..) {
                provider.close().await;
            }
        }

        let mut providers: Vec<Arc<dyn CacheProvider>> = Vec::with_capacity(desired.len());
        for backend in desired {
            match self.factory.create(backend).await {
                Ok(provider) => providers.push(provider),
                Err(e) if backend.is_critical() => {
                    error!("Critical {} provider failed to start: {}", backend, e);
                    for provider in &providers {
                        provider.close().await;
                    }
                    return Err(CacheError::CriticalProvider {
                        backend,
                        source: Box::new(e),
                    });
                }
                Err(e) => warn!("Skipping {} provider: {}", backend, e),
            }
        }

        if providers.is_empty() {
            warn!("No cache provider could be constructed, using a bare memory provider");
            providers.push(Arc::new(MemoryProvider::new(MemorySettings::default())?));
        }

        set.providers = providers;
        metrics::counter!("tiercache_reconfigurations_total").increment(1);
        info!("Cache providers active: {}", describe(&set.backend_types()));
        Ok(())
    }

    /// Run `op` on every provider concurrently, logging failures.
    ///
    /// Returns the successful results.
    async fn fan_out<R, F, Fut>(
        providers: Vec<Arc<dyn CacheProvider>>,
        operation: &'static str,
        op: F,
    ) -> Vec<R>
    where
        F: Fn(Arc<dyn CacheProvider>) -> Fut,
        Fut: Future<Output = Result<R, CacheError>>,
    {
        let calls = providers.into_iter().map(|provider| {
            let backend = provider.backend_type();
            let call = op(provider);
            async move { (backend, call.await) }
        });

        join_all(calls)
            .await
            .into_iter()
            .filter_map(|(backend, result)| match result {
                Ok(value) => Some(value),
                Err(e) => {
                    record_failure(backend, operation, &e);
                    None
                }
            })
            .collect()
    }

    /// Copy a hit into the providers that missed, without awaiting it
    fn promote(&self, key: &str, hit: CacheHit, missed: Vec<Arc<dyn CacheProvider>>) {
        if missed.is_empty() {
            return;
        }

        let now = Utc::now();
        if hit.is_expired_at(now) {
            return;
        }
        let ttl = hit.remaining_ttl(now);
        let key = key.to_string();
        let value = hit.value;

        self.worker.spawn("promotion", async move {
            let key = key.as_str();
            let value = &value;
            let promoted = Self::fan_out(missed, "promote", |provider| async move {
                provider.set(key, value.clone(), ttl).await
            })
            .await;

            if !promoted.is_empty() {
                debug!("Promoted {} into {} faster tier(s)", key, promoted.len());
                metrics::counter!("tiercache_promotions_total").increment(promoted.len() as u64);
            }
        });
    }

    /// Look up a key and decode it with `decode`.
    ///
    /// A provider whose value fails to decode counts as a miss for that
    /// provider and the scan continues.
    pub async fn get_with<T, F>(&self, key: &str, decode: F) -> Option<T>
    where
        F: Fn(&CachedValue) -> Result<T, CacheError>,
    {
        let providers = match self.ensure_providers().await {
            Ok(providers) => providers,
            Err(e) => {
                warn!("Cache get for {} skipped: {}", key, e);
                return None;
            }
        };

        let mut missed = Vec::new();
        for provider in providers {
            let Some(hit) = provider.get(key).await else {
                missed.push(provider);
                continue;
            };

            match decode(&hit.value) {
                Ok(value) => {
                    self.promote(key, hit, missed);
                    return Some(value);
                }
                Err(e) => {
                    warn!(
                        backend = %provider.backend_type(),
                        key,
                        "Discarding cached value: {}",
                        e
                    );
                    missed.push(provider);
                }
            }
        }
        None
    }

    /// Look up a key and deserialize it into `T`
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get_with(key, CachedValue::decode::<T>).await
    }

    /// Look up a key without decoding it
    pub async fn get_value(&self, key: &str) -> Option<CachedValue> {
        self.get_with(key, |value| Ok(value.clone())).await
    }

    /// Write a value to every provider.
    ///
    /// Fails only if the value cannot be serialized or no provider set is
    /// available; individual provider failures are logged.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let value = CachedValue::encode(value)?;
        self.set_value(key, value, ttl).await
    }

    /// Write an already encoded value to every provider
    pub async fn set_value(
        &self,
        key: &str,
        value: CachedValue,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let providers = self.ensure_providers().await?;
        let total = providers.len();
        let value = &value;
        let written = Self::fan_out(providers, "set", |provider| async move {
            provider.set(key, value.clone(), ttl).await
        })
        .await;

        if written.len() < total {
            debug!("Cache set for {} reached {}/{} providers", key, written.len(), total);
        }
        Ok(())
    }

    /// Remove a key from every provider
    pub async fn remove(&self, key: &str) {
        match self.ensure_providers().await {
            Ok(providers) => {
                Self::fan_out(providers, "remove", |provider| async move {
                    provider.remove(key).await
                })
                .await;
            }
            Err(e) => warn!("Cache remove for {} skipped: {}", key, e),
        }
    }

    /// Remove every entry from every provider
    pub async fn clear(&self) {
        match self.ensure_providers().await {
            Ok(providers) => {
                Self::fan_out(providers, "clear", |provider| async move {
                    provider.clear().await
                })
                .await;
                info!("Cache cleared");
            }
            Err(e) => warn!("Cache clear skipped: {}", e),
        }
    }

    /// Sweep expired entries from every provider, returning the total removed
    pub async fn cleanup(&self) -> u64 {
        match self.ensure_providers().await {
            Ok(providers) => Self::fan_out(providers, "cleanup", |provider| async move {
                provider.cleanup().await
            })
            .await
            .into_iter()
            .sum(),
            Err(e) => {
                warn!("Cache cleanup skipped: {}", e);
                0
            }
        }
    }

    /// Whether any provider holds a live entry, checked in priority order
    pub async fn contains_key(&self, key: &str) -> bool {
        let Ok(providers) = self.ensure_providers().await else {
            return false;
        };

        for provider in providers {
            match provider.contains_key(key).await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(e) => record_failure(provider.backend_type(), "contains_key", &e),
            }
        }
        false
    }

    /// Live keys of the highest-priority provider
    pub async fn keys(&self) -> Result<Vec<String>, CacheError> {
        match self.ensure_providers().await?.first() {
            Some(provider) => provider.keys().await,
            None => Ok(Vec::new()),
        }
    }

    /// Live entry count of the highest-priority provider
    pub async fn size(&self) -> Result<usize, CacheError> {
        match self.ensure_providers().await?.first() {
            Some(provider) => provider.size().await,
            None => Ok(0),
        }
    }

    /// Counters summed across the active providers
    pub async fn stats(&self) -> CacheStats {
        let stats = self.provider_stats().await;
        CacheStats::aggregate(stats.iter().map(|(_, s)| s))
    }

    /// Counters of each active provider, in priority order
    pub async fn provider_stats(&self) -> Vec<(BackendType, CacheStats)> {
        match self.ensure_providers().await {
            Ok(providers) => providers
                .iter()
                .map(|p| (p.backend_type(), p.stats()))
                .collect(),
            Err(e) => {
                warn!("Cache stats unavailable: {}", e);
                Vec::new()
            }
        }
    }

    /// Backend types of the active providers, in priority order
    pub async fn active_backends(&self) -> Vec<BackendType> {
        match self.ensure_providers().await {
            Ok(providers) => providers.iter().map(|p| p.backend_type()).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Cache-aside lookup.
    ///
    /// On a miss `factory` runs exactly once and its result is written to
    /// every provider. The produced value is returned even if the write fails.
    pub async fn get_or_set<T, F, Fut>(&self, key: &str, factory: F, ttl: Option<Duration>) -> T
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if let Some(value) = self.get(key).await {
            return value;
        }

        let value = factory().await;
        if let Err(e) = self.set(key, &value, ttl).await {
            warn!("Failed to cache computed value for {}: {}", key, e);
        }
        value
    }

    /// Cache-aside lookup with a fallible factory. Errors are returned and
    /// nothing is cached.
    pub async fn try_get_or_set<T, E, F, Fut>(
        &self,
        key: &str,
        factory: F,
        ttl: Option<Duration>,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }

        let value = factory().await?;
        if let Err(e) = self.set(key, &value, ttl).await {
            warn!("Failed to cache computed value for {}: {}", key, e);
        }
        Ok(value)
    }

    /// Write several entries, one after another
    pub async fn set_multiple<K, V>(
        &self,
        entries: impl IntoIterator<Item = (K, V)>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError>
    where
        K: AsRef<str>,
        V: Serialize,
    {
        for (key, value) in entries {
            self.set(key.as_ref(), &value, ttl).await?;
        }
        Ok(())
    }

    /// Look up several keys, returning only the hits
    pub async fn get_multiple<T, K>(&self, keys: impl IntoIterator<Item = K>) -> HashMap<String, T>
    where
        T: DeserializeOwned,
        K: AsRef<str>,
    {
        let mut found = HashMap::new();
        for key in keys {
            let key = key.as_ref();
            if let Some(value) = self.get(key).await {
                found.insert(key.to_string(), value);
            }
        }
        found
    }

    /// Remove several keys, one after another
    pub async fn remove_multiple<K: AsRef<str>>(&self, keys: impl IntoIterator<Item = K>) {
        for key in keys {
            self.remove(key.as_ref()).await;
        }
    }

    /// Make the next operation re-read the config source
    pub async fn force_provider_update(&self) {
        self.provider_set.write().await.last_check = None;
        debug!("Provider update forced");
    }

    /// Wait for queued promotions to finish
    pub async fn drain_background(&self) {
        self.worker.drain().await;
    }

    /// Number of background tasks queued or running
    pub fn background_tasks(&self) -> usize {
        self.worker.in_flight()
    }

    /// Stop background work and close every provider.
    ///
    /// Later operations behave as misses or fail with
    /// [`CacheError::Unavailable`].
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.worker.shutdown().await;
        let mut set = self.provider_set.write().await;
        for provider in set.providers.drain(..) {
            provider.close().await;
        }
        set.last_check = None;
        info!("Cache orchestrator shut down");
    }
}
