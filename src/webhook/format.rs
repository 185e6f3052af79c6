//! Message construction and metadata enrichment for webhook events.

use crate::episodes::format_seasons;
use crate::notifications::Notification;
use crate::webhook::event::WebhookEvent;
use async_trait::async_trait;
use chrono::Local;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetailKind {
    Movie,
    Series,
}

/// What a metadata provider can contribute to a message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaDetails {
    pub title: Option<String>,
    pub year: Option<u16>,
    pub rating: Option<f32>,
    pub status: Option<String>,
    pub genres: Vec<String>,
    pub cast: Vec<String>,
    pub overview: Option<String>,
    pub poster_url: Option<String>,
    pub backdrop_url: Option<String>,
}

/// External metadata lookup seam. The service never implements a
/// concrete provider; deployments wire one in, tests use doubles.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    async fn lookup(
        &self,
        tmdb_id: u64,
        kind: DetailKind,
        season: Option<u32>,
    ) -> Option<MediaDetails>;
}

/// TTL cache in front of any provider; webhook bursts for one series
/// would otherwise hammer the same lookup.
pub struct CachedMetadataProvider {
    inner: Arc<dyn MetadataProvider>,
    ttl: Duration,
    cache: Mutex<HashMap<(u64, DetailKind, Option<u32>), (Instant, Option<MediaDetails>)>>,
}

impl CachedMetadataProvider {
    pub fn new(inner: Arc<dyn MetadataProvider>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn lookup(
        &self,
        tmdb_id: u64,
        kind: DetailKind,
        season: Option<u32>,
    ) -> Option<MediaDetails> {
        let key = (tmdb_id, kind, season);
        {
            match self.cache.lock() {
                Ok(cache) => {
                    if let Some((stored, details)) = cache.get(&key) {
                        if stored.elapsed() < self.ttl {
                            return details.clone();
                        }
                    }
                }
                Err(e) => error!("Failed to lock metadata cache: {}", e),
            }
        }

        let details = self.inner.lookup(tmdb_id, kind, season).await;
        if let Ok(mut cache) = self.cache.lock() {
            cache.retain(|_, (stored, _)| stored.elapsed() < self.ttl);
            cache.insert(key, (Instant::now(), details.clone()));
        }
        details
    }
}

/// Human label for an event type; unknown types pass through verbatim.
pub fn action_label(event: &str) -> &str {
    match event {
        "library.new" => "added to library",
        "playback.start" | "media.play" | "PlaybackStart" => "started playing",
        "playback.stop" | "media.stop" | "PlaybackStop" => "stopped playing",
        "playback.pause" | "media.pause" => "paused",
        "playback.unpause" | "media.resume" => "resumed",
        "item.rate" => "rated",
        "item.markplayed" => "marked played",
        "item.markunplayed" => "marked unplayed",
        other => other,
    }
}

pub struct MessageComposer {
    pub overview_max_len: usize,
    pub play_url_template: Option<String>,
    pub fallback_image: Option<String>,
}

impl MessageComposer {
    fn timestamp() -> String {
        Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
    }

    fn truncate_overview(&self, text: &str) -> String {
        if text.chars().count() <= self.overview_max_len {
            return text.to_string();
        }
        let cut: String = text.chars().take(self.overview_max_len).collect();
        format!("{}...", cut.trim_end())
    }

    fn play_link(&self, event: &WebhookEvent) -> Option<String> {
        let template = self.play_url_template.as_deref()?;
        let item_id = event.item_id.as_deref()?;
        Some(template.replace("{item_id}", item_id))
    }

    /// Artwork preference: backdrop for series, poster for movies, then
    /// whatever the event itself carried, then the configured fallback.
    fn image_for(&self, event: &WebhookEvent, details: Option<&MediaDetails>) -> Option<String> {
        if let Some(details) = details {
            let preferred = if event.is_series() {
                details
                    .backdrop_url
                    .clone()
                    .or_else(|| details.poster_url.clone())
            } else {
                details
                    .poster_url
                    .clone()
                    .or_else(|| details.backdrop_url.clone())
            };
            if preferred.is_some() {
                return preferred;
            }
        }
        event
            .image_url
            .clone()
            .or_else(|| self.fallback_image.clone())
    }

    fn titled(&self, event: &WebhookEvent, details: Option<&MediaDetails>) -> String {
        let mut name = event.display_name();
        if name.is_empty() {
            if let Some(title) = details.and_then(|d| d.title.clone()) {
                name = title;
            }
        }
        let year = details
            .and_then(|d| d.year.map(u64::from))
            .or_else(|| event.production_year());
        if let Some(year) = year {
            if !name.contains(&year.to_string()) {
                name.push_str(&format!(" ({year})"));
            }
        }
        name
    }

    fn meta_lines(&self, lines: &mut Vec<String>, details: Option<&MediaDetails>) {
        let Some(details) = details else {
            return;
        };
        if let Some(rating) = details.rating {
            lines.push(format!("⭐ Rating: {rating:.1}/10"));
        }
        if let Some(status) = &details.status {
            lines.push(format!("📡 Status: {status}"));
        }
        if !details.genres.is_empty() {
            let genres: Vec<&str> = details.genres.iter().take(3).map(String::as_str).collect();
            lines.push(format!("🎭 Genres: {}", genres.join(", ")));
        }
        if !details.cast.is_empty() {
            let cast: Vec<&str> = details.cast.iter().take(3).map(String::as_str).collect();
            lines.push(format!("🎬 Cast: {}", cast.join(", ")));
        }
    }

    fn overview_lines(
        &self,
        lines: &mut Vec<String>,
        event: &WebhookEvent,
        details: Option<&MediaDetails>,
    ) {
        let overview = details
            .and_then(|d| d.overview.clone())
            .or_else(|| event.overview.clone());
        if let Some(overview) = overview {
            if !overview.is_empty() {
                lines.push("━━━━━━━━━━━━━━━".to_string());
                lines.push(format!("📖 {}", self.truncate_overview(&overview)));
            }
        }
    }

    fn session_lines(&self, lines: &mut Vec<String>, event: &WebhookEvent) {
        if let Some(user) = &event.user_name {
            lines.push(format!("👤 User: {user}"));
        }
        if let Some(device) = &event.device_name {
            let client = event.client.as_deref().unwrap_or("");
            lines.push(format!("📱 Device: {client} {device}").trim_end().to_string());
        }
        if let Some(ip) = &event.ip {
            lines.push(format!("🌐 IP: {ip}"));
        }
        if let Some(pct) = event.percentage {
            lines.push(format!("📊 Progress: {pct:.1}%"));
        }
    }

    pub fn compose_single(
        &self,
        event: &WebhookEvent,
        details: Option<&MediaDetails>,
    ) -> Notification {
        let name = self.titled(event, details);
        let server = event.server_name.as_deref().unwrap_or("media server");
        let title = format!("{name} {} on {server}", action_label(&event.event));

        let mut lines = vec![format!("⏰ {}", Self::timestamp())];
        if let Some((season, episode)) = event.season_episode() {
            let mut line = format!("📺 S{season:02}E{episode:02}");
            if let Some(ep_name) = event.episode_name() {
                if ep_name != event.display_name() {
                    line.push_str(&format!(" - {ep_name}"));
                }
            }
            lines.push(line);
        }
        self.meta_lines(&mut lines, details);
        self.overview_lines(&mut lines, event, details);
        self.session_lines(&mut lines, event);

        Notification {
            title,
            text: lines.join("\n"),
            image: self.image_for(event, details),
            link: self.play_link(event),
        }
    }

    /// One message for a burst of per-episode library adds. Episode
    /// numbers are merged per season into compressed range notation.
    pub fn compose_aggregated(
        &self,
        events: &[WebhookEvent],
        details: Option<&MediaDetails>,
    ) -> Notification {
        let first = &events[0];
        let name = self.titled(first, details);
        let server = first.server_name.as_deref().unwrap_or("media server");
        let title = format!("{name} added to library ({} files) on {server}", events.len());

        let mut by_season: BTreeMap<u32, BTreeSet<u32>> = BTreeMap::new();
        for event in events {
            if let Some((season, episode)) = event.season_episode() {
                by_season.entry(season).or_default().insert(episode);
            }
        }

        let mut lines = vec![format!("⏰ {}", Self::timestamp())];
        let merged = format_seasons(&by_season);
        if !merged.is_empty() {
            lines.push(format!("📺 {merged}"));
        }
        self.meta_lines(&mut lines, details);
        self.overview_lines(&mut lines, first, details);

        Notification {
            title,
            text: lines.join("\n"),
            image: self.image_for(first, details),
            link: self.play_link(first),
        }
    }

    pub fn compose_test(&self, event: &WebhookEvent) -> Notification {
        let server = event.server_name.as_deref().unwrap_or("media server");
        let mut lines = vec![
            format!("From: {server}"),
            format!("Time: {}", Self::timestamp()),
            "Status: connection ok".to_string(),
        ];
        if let Some(user) = &event.user_name {
            lines.push(format!("User: {user}"));
        }
        Notification {
            title: "🔔 Webhook test".to_string(),
            text: lines.join("\n"),
            image: self.fallback_image.clone(),
            link: None,
        }
    }

    pub fn compose_login(&self, event: &WebhookEvent) -> Notification {
        let failed = event.event.contains("failed");
        let title = if failed {
            "🔐 Sign-in failed".to_string()
        } else {
            "🔐 Sign-in".to_string()
        };

        let mut lines = Vec::new();
        if let Some(user) = &event.user_name {
            lines.push(format!("👤 User: {user}"));
        }
        lines.push(format!("⏰ Time: {}", Self::timestamp()));
        if let Some(device) = &event.device_name {
            let client = event.client.as_deref().unwrap_or("");
            lines.push(format!("📱 Device: {client} {device}").trim_end().to_string());
        }
        if let Some(ip) = &event.ip {
            lines.push(format!("🌐 IP: {ip}"));
        }
        if let Some(server) = &event.server_name {
            lines.push(format!("🖥️ Server: {server}"));
        }

        Notification {
            title,
            text: lines.join("\n"),
            image: self.fallback_image.clone(),
            link: None,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::StaticProvider;
    use super::*;
    use serde_json::json;

    fn composer() -> MessageComposer {
        MessageComposer {
            overview_max_len: 20,
            play_url_template: Some("http://emby/item/{item_id}".to_string()),
            fallback_image: Some("http://img/default.jpg".to_string()),
        }
    }

    fn details() -> MediaDetails {
        MediaDetails {
            title: Some("ShowX".to_string()),
            year: Some(2024),
            rating: Some(8.3),
            status: Some("Returning Series".to_string()),
            genres: vec!["Drama".into(), "Crime".into(), "Thriller".into(), "More".into()],
            cast: vec!["A".into(), "B".into(), "C".into(), "D".into()],
            overview: Some("A very long overview that will be cut".to_string()),
            poster_url: Some("http://img/poster.jpg".to_string()),
            backdrop_url: Some("http://img/backdrop.jpg".to_string()),
        }
    }

    fn episode_event(season: u32, episode: u32) -> WebhookEvent {
        WebhookEvent {
            event: "library.new".to_string(),
            item_type: Some("TV".to_string()),
            item_id: Some("42".to_string()),
            server_name: Some("homeserver".to_string()),
            json_object: Some(json!({
                "Item": {
                    "SeriesName": "ShowX",
                    "ParentIndexNumber": season,
                    "IndexNumber": episode,
                }
            })),
            ..Default::default()
        }
    }

    #[test]
    fn test_compose_single_enriched() {
        let message = composer().compose_single(&episode_event(1, 2), Some(&details()));
        assert_eq!(message.title, "ShowX (2024) added to library on homeserver");
        assert!(message.text.contains("📺 S01E02"));
        assert!(message.text.contains("⭐ Rating: 8.3/10"));
        assert!(message.text.contains("🎭 Genres: Drama, Crime, Thriller"));
        assert!(message.text.contains("🎬 Cast: A, B, C"));
        // truncated at 20 chars with ellipsis
        assert!(message.text.contains("📖 A very long overview..."));
        // series prefers the backdrop
        assert_eq!(message.image.as_deref(), Some("http://img/backdrop.jpg"));
        assert_eq!(message.link.as_deref(), Some("http://emby/item/42"));
    }

    #[test]
    fn test_compose_single_without_details() {
        let message = composer().compose_single(&episode_event(1, 2), None);
        assert!(message.text.contains("📺 S01E02"));
        assert!(!message.text.contains("Rating"));
        // no metadata, no event image: configured fallback
        assert_eq!(message.image.as_deref(), Some("http://img/default.jpg"));
    }

    #[test]
    fn test_compose_aggregated_merges_ranges() {
        let events: Vec<WebhookEvent> =
            [1, 2, 3, 5, 7, 8].iter().map(|&e| episode_event(1, e)).collect();
        let message = composer().compose_aggregated(&events, Some(&details()));
        assert_eq!(
            message.title,
            "ShowX (2024) added to library (6 files) on homeserver"
        );
        assert!(message.text.contains("📺 S01 E01-E03 E05 E07-E08"));
    }

    #[test]
    fn test_compose_login() {
        let event = WebhookEvent {
            event: "user.authenticationfailed".to_string(),
            user_name: Some("kim".to_string()),
            ip: Some("10.0.0.9".to_string()),
            server_name: Some("homeserver".to_string()),
            ..Default::default()
        };
        let message = composer().compose_login(&event);
        assert_eq!(message.title, "🔐 Sign-in failed");
        assert!(message.text.contains("👤 User: kim"));
        assert!(message.text.contains("🌐 IP: 10.0.0.9"));
    }

    #[tokio::test]
    async fn test_cached_provider_deduplicates_lookups() {
        let provider = StaticProvider::new(Some(details()));
        let cached = CachedMetadataProvider::new(provider.clone(), Duration::from_secs(60));

        let first = cached.lookup(42, DetailKind::Series, Some(1)).await;
        let second = cached.lookup(42, DetailKind::Series, Some(1)).await;
        assert_eq!(first, second);
        assert_eq!(*provider.calls.lock().unwrap(), 1);

        // a different key misses the cache
        cached.lookup(42, DetailKind::Series, Some(2)).await;
        assert_eq!(*provider.calls.lock().unwrap(), 2);
    }
}
