//! Webhook event aggregation and dispatch.
//!
//! Classifies inbound media-server events, drops duplicate terminal
//! events through a TTL key cache, buffers per-series library-add
//! bursts behind a reset-on-arrival debounce timer, and sends one
//! enriched notification per logical occurrence.

pub mod dedup;
pub mod event;
pub mod format;

use crate::config::WebhookConfig;
use crate::notifications::NotificationSink;
use crate::webhook::dedup::{DedupCache, DEFAULT_TTL};
use crate::webhook::event::WebhookEvent;
use crate::webhook::format::{CachedMetadataProvider, DetailKind, MediaDetails, MessageComposer};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

struct SeriesBuffer {
    events: Vec<WebhookEvent>,
    timer: JoinHandle<()>,
}

pub struct WebhookAggregator {
    /// Self-handle for the debounce timers this service spawns.
    weak: Weak<WebhookAggregator>,
    enabled: bool,
    allowed_types: HashSet<String>,
    servers: Vec<String>,
    aggregate: bool,
    aggregate_delay: Duration,
    dedup: Mutex<DedupCache>,
    buffers: Mutex<HashMap<String, SeriesBuffer>>,
    composer: MessageComposer,
    provider: Option<Arc<CachedMetadataProvider>>,
    sink: Arc<dyn NotificationSink>,
}

impl WebhookAggregator {
    pub fn new(
        config: &WebhookConfig,
        sink: Arc<dyn NotificationSink>,
        provider: Option<Arc<CachedMetadataProvider>>,
    ) -> Arc<Self> {
        Self::with_aggregate_delay(
            config,
            sink,
            provider,
            Duration::from_secs(config.aggregate_secs),
        )
    }

    /// Constructor with an explicit debounce delay (tests shrink it to
    /// milliseconds).
    pub fn with_aggregate_delay(
        config: &WebhookConfig,
        sink: Arc<dyn NotificationSink>,
        provider: Option<Arc<CachedMetadataProvider>>,
        aggregate_delay: Duration,
    ) -> Arc<Self> {
        // an allow-list entry may be a pipe-delimited alias group
        let allowed_types = config
            .event_types
            .iter()
            .flat_map(|entry| entry.split('|'))
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();

        Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            enabled: config.enabled,
            allowed_types,
            servers: config.servers.clone(),
            aggregate: config.aggregate,
            aggregate_delay,
            dedup: Mutex::new(DedupCache::new(DEFAULT_TTL)),
            buffers: Mutex::new(HashMap::new()),
            composer: MessageComposer {
                overview_max_len: config.overview_max_len,
                play_url_template: if config.add_play_link {
                    config.play_url_template.clone()
                } else {
                    None
                },
                fallback_image: config.fallback_image.clone(),
            },
            provider,
            sink,
        })
    }

    /// Entry point for one inbound event.
    pub async fn handle(&self, event: WebhookEvent) {
        if !self.enabled || event.event.is_empty() {
            return;
        }
        debug!(
            "Webhook event {} from {}",
            event.event,
            event.server_name.as_deref().unwrap_or("?")
        );

        // server filter; tests always pass so wiring can be verified
        if !event.is_test() {
            if let Some(server) = &event.server_name {
                if !self.servers.is_empty() && !self.servers.contains(server) {
                    debug!("Server {server} not selected, dropping event");
                    return;
                }
            }
            if !self.allowed_types.contains(&event.event) {
                debug!("Event type {} not enabled, dropping", event.event);
                return;
            }
        }

        let key = event.dedup_key();
        {
            let mut dedup = match self.dedup.lock() {
                Ok(guard) => guard,
                Err(e) => {
                    error!("Failed to lock dedup cache: {}", e);
                    return;
                }
            };
            dedup.sweep();
            if event.is_stop() && dedup.contains(&key) {
                // repeated terminal event: drop it but keep the key warm
                dedup.insert(key);
                info!("Suppressed duplicate stop event for {}", event.event);
                return;
            }
        }

        if event.is_test() {
            let message = self.composer.compose_test(&event);
            self.deliver(message).await;
            return;
        }
        if event.is_login() {
            let message = self.composer.compose_login(&event);
            self.deliver(message).await;
            return;
        }

        if self.aggregate && event.event == "library.new" && event.is_series() {
            match event.series_key() {
                Some(series) => {
                    self.buffer_episode(series, event);
                    return;
                }
                None => warn!("Series event without id, sending single notification"),
            }
        }

        self.dispatch_single(event, key).await;
    }

    /// Append to the series buffer and restart its debounce timer. The
    /// timer handle lives under the same lock as the buffered events,
    /// so a firing timer and a new arrival cannot interleave.
    fn buffer_episode(&self, series: String, event: WebhookEvent) {
        let Some(aggregator) = self.weak.upgrade() else {
            return;
        };
        let mut buffers = match self.buffers.lock() {
            Ok(guard) => guard,
            Err(e) => {
                error!("Failed to lock aggregation buffers: {}", e);
                return;
            }
        };

        let timer_series = series.clone();
        let delay = self.aggregate_delay;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            aggregator.flush_series(&timer_series).await;
        });

        match buffers.entry(series) {
            Entry::Occupied(mut occupied) => {
                occupied.get().timer.abort();
                let buffer = occupied.get_mut();
                buffer.events.push(event);
                buffer.timer = timer;
            }
            Entry::Vacant(vacant) => {
                vacant.insert(SeriesBuffer {
                    events: vec![event],
                    timer,
                });
            }
        }
    }

    async fn flush_series(&self, series: &str) {
        let buffer = match self.buffers.lock() {
            Ok(mut guard) => guard.remove(series),
            Err(e) => {
                error!("Failed to lock aggregation buffers: {}", e);
                return;
            }
        };
        let Some(buffer) = buffer else {
            return;
        };
        self.dispatch_buffer(buffer.events).await;
    }

    async fn dispatch_buffer(&self, mut events: Vec<WebhookEvent>) {
        match events.len() {
            0 => {}
            1 => {
                let event = events.remove(0);
                let key = event.dedup_key();
                self.dispatch_single(event, key).await;
            }
            count => {
                info!("Dispatching aggregated notification for {count} episodes");
                let first = &events[0];
                let details = self.lookup_details(first, DetailKind::Series, None).await;
                let message = self.composer.compose_aggregated(&events, details.as_ref());
                self.deliver(message).await;
            }
        }
    }

    async fn dispatch_single(&self, event: WebhookEvent, key: String) {
        let kind = if event.is_series() {
            DetailKind::Series
        } else {
            DetailKind::Movie
        };
        let details = self.lookup_details(&event, kind, event.season_id).await;
        let message = self.composer.compose_single(&event, details.as_ref());

        // terminal events arm the dedup key; a fresh start clears it
        match self.dedup.lock() {
            Ok(mut dedup) => {
                if event.is_stop() {
                    dedup.insert(key);
                } else if event.is_start() {
                    dedup.remove(&key);
                }
            }
            Err(e) => error!("Failed to lock dedup cache: {}", e),
        }

        self.deliver(message).await;
    }

    async fn lookup_details(
        &self,
        event: &WebhookEvent,
        kind: DetailKind,
        season: Option<u32>,
    ) -> Option<MediaDetails> {
        let provider = self.provider.as_ref()?;
        let tmdb_id = event.resolve_tmdb_id()?;
        provider.lookup(tmdb_id, kind, season).await
    }

    async fn deliver(&self, message: crate::notifications::Notification) {
        if let Err(e) = self.sink.send(&message).await {
            error!("Notification dispatch failed: {}", e);
        }
    }

    /// Force-flush everything on shutdown so buffered episodes are not
    /// silently lost, then drop timers and caches.
    pub async fn shutdown(&self) {
        loop {
            let entry = match self.buffers.lock() {
                Ok(mut guard) => {
                    let key = guard.keys().next().cloned();
                    key.and_then(|k| guard.remove(&k))
                }
                Err(e) => {
                    error!("Failed to lock aggregation buffers: {}", e);
                    return;
                }
            };
            let Some(buffer) = entry else {
                break;
            };
            buffer.timer.abort();
            self.dispatch_buffer(buffer.events).await;
        }
        if let Ok(mut dedup) = self.dedup.lock() {
            dedup.clear();
        }
        info!("Webhook aggregator drained");
    }
}
