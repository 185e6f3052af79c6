//! Inbound webhook payload model.
//!
//! Servers disagree about which fields they fill in, so everything
//! beyond the event type is optional and probed explicitly. The raw
//! provider JSON rides along for the fields only it carries
//! (`SeriesId`, `ProductionYear`, per-episode index numbers).

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookEvent {
    pub event: String,
    /// Originating server flavor: `emby`, `jellyfin`, `plex`.
    pub channel: Option<String>,
    pub server_name: Option<String>,
    pub item_id: Option<String>,
    pub item_type: Option<String>,
    pub item_name: Option<String>,
    pub item_path: Option<String>,
    pub season_id: Option<u32>,
    pub episode_id: Option<u32>,
    pub tmdb_id: Option<u64>,
    pub user_name: Option<String>,
    pub client: Option<String>,
    pub device_name: Option<String>,
    pub ip: Option<String>,
    pub percentage: Option<f64>,
    pub overview: Option<String>,
    pub image_url: Option<String>,
    pub series_id: Option<String>,
    /// Raw provider payload, when the host passes it through.
    pub json_object: Option<serde_json::Value>,
}

fn path_tmdb_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)[\[{](?:tmdbid|tmdb)[=-](\d+)[\]}]").unwrap())
}

impl WebhookEvent {
    pub fn is_stop(&self) -> bool {
        self.event.to_lowercase().contains("stop")
    }

    pub fn is_start(&self) -> bool {
        self.event.to_lowercase().contains("start")
            || self.event.to_lowercase().contains("media.play")
    }

    pub fn is_test(&self) -> bool {
        self.event.to_lowercase().contains("test")
    }

    pub fn is_login(&self) -> bool {
        self.event.contains("user.authentic")
    }

    pub fn is_series(&self) -> bool {
        matches!(self.item_type.as_deref(), Some("TV") | Some("SHOW"))
    }

    /// Key under which repeated terminal events collapse.
    pub fn dedup_key(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.item_id.as_deref().unwrap_or(""),
            self.client.as_deref().unwrap_or(""),
            self.user_name.as_deref().unwrap_or(""),
            self.event
        )
    }

    fn raw_item(&self) -> Option<&serde_json::Value> {
        self.json_object.as_ref()?.get("Item")
    }

    fn raw_item_str(&self, field: &str) -> Option<String> {
        match self.raw_item()?.get(field)? {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn raw_item_u64(&self, field: &str) -> Option<u64> {
        self.raw_item()?.get(field)?.as_u64()
    }

    /// Series identity for aggregation: raw `Item.SeriesId`, then
    /// `Item.SeriesName`, then the typed field. `None` means the event
    /// cannot be aggregated and goes out on its own.
    pub fn series_key(&self) -> Option<String> {
        self.raw_item_str("SeriesId")
            .or_else(|| self.raw_item_str("SeriesName"))
            .or_else(|| self.series_id.clone().filter(|s| !s.is_empty()))
    }

    /// Display name, preferring the raw series name for episodes.
    pub fn display_name(&self) -> String {
        if self.is_series() {
            if let Some(series) = self.raw_item_str("SeriesName") {
                return series;
            }
        }
        self.item_name.clone().unwrap_or_default()
    }

    pub fn production_year(&self) -> Option<u64> {
        self.raw_item_u64("ProductionYear")
    }

    /// Episode name from the raw payload, if distinct from the series.
    pub fn episode_name(&self) -> Option<String> {
        self.raw_item_str("Name")
    }

    /// Season/episode numbers: raw index fields first, typed fields as
    /// the fallback.
    pub fn season_episode(&self) -> Option<(u32, u32)> {
        let season = self
            .raw_item_u64("ParentIndexNumber")
            .map(|n| n as u32)
            .or(self.season_id);
        let episode = self
            .raw_item_u64("IndexNumber")
            .map(|n| n as u32)
            .or(self.episode_id);
        match (season, episode) {
            (Some(s), Some(e)) => Some((s, e)),
            _ => None,
        }
    }

    /// Recover a TMDB id: typed field → raw `ProviderIds.Tmdb` →
    /// `[tmdbid=123]` tag in the item path.
    pub fn resolve_tmdb_id(&self) -> Option<u64> {
        if let Some(id) = self.tmdb_id {
            return Some(id);
        }
        if let Some(ids) = self.raw_item().and_then(|item| item.get("ProviderIds")) {
            if let Some(raw) = ids.get("Tmdb") {
                if let Some(id) = raw.as_u64() {
                    return Some(id);
                }
                if let Some(id) = raw.as_str().and_then(|s| s.parse().ok()) {
                    return Some(id);
                }
            }
        }
        let path = self.item_path.as_deref()?;
        path_tmdb_re()
            .captures(path)
            .and_then(|caps| caps[1].parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn episode_event(series_id: &str, season: u32, episode: u32) -> WebhookEvent {
        WebhookEvent {
            event: "library.new".to_string(),
            item_type: Some("TV".to_string()),
            item_name: Some(format!("Episode {episode}")),
            json_object: Some(json!({
                "Item": {
                    "SeriesId": series_id,
                    "SeriesName": "ShowX",
                    "ParentIndexNumber": season,
                    "IndexNumber": episode,
                    "ProductionYear": 2024,
                }
            })),
            ..Default::default()
        }
    }

    #[test]
    fn test_series_key_prefers_raw_id() {
        let mut event = episode_event("abc123", 1, 2);
        event.series_id = Some("typed".to_string());
        assert_eq!(event.series_key().as_deref(), Some("abc123"));

        event.json_object = None;
        assert_eq!(event.series_key().as_deref(), Some("typed"));

        event.series_id = None;
        assert_eq!(event.series_key(), None);
    }

    #[test]
    fn test_season_episode_falls_back_to_typed_fields() {
        let event = episode_event("x", 3, 7);
        assert_eq!(event.season_episode(), Some((3, 7)));

        let typed = WebhookEvent {
            event: "library.new".to_string(),
            season_id: Some(1),
            episode_id: Some(4),
            ..Default::default()
        };
        assert_eq!(typed.season_episode(), Some((1, 4)));

        let missing = WebhookEvent {
            event: "library.new".to_string(),
            season_id: Some(1),
            ..Default::default()
        };
        assert_eq!(missing.season_episode(), None);
    }

    #[test]
    fn test_resolve_tmdb_id_sources() {
        let typed = WebhookEvent {
            tmdb_id: Some(42),
            ..Default::default()
        };
        assert_eq!(typed.resolve_tmdb_id(), Some(42));

        let provider = WebhookEvent {
            json_object: Some(json!({"Item": {"ProviderIds": {"Tmdb": "1396"}}})),
            ..Default::default()
        };
        assert_eq!(provider.resolve_tmdb_id(), Some(1396));

        let path = WebhookEvent {
            item_path: Some("/media/ShowX (2024) [tmdbid=777]/S01E01.mkv".to_string()),
            ..Default::default()
        };
        assert_eq!(path.resolve_tmdb_id(), Some(777));

        assert_eq!(WebhookEvent::default().resolve_tmdb_id(), None);
    }

    #[test]
    fn test_dedup_key_composition() {
        let event = WebhookEvent {
            event: "playback.stop".to_string(),
            item_id: Some("9".to_string()),
            client: Some("Infuse".to_string()),
            user_name: Some("kim".to_string()),
            ..Default::default()
        };
        assert_eq!(event.dedup_key(), "9-Infuse-kim-playback.stop");
    }

    #[test]
    fn test_classifiers() {
        let stop = WebhookEvent {
            event: "PlaybackStop".to_string(),
            ..Default::default()
        };
        assert!(stop.is_stop());
        assert!(!stop.is_start());

        let test = WebhookEvent {
            event: "system.webhooktest".to_string(),
            ..Default::default()
        };
        assert!(test.is_test());

        let login = WebhookEvent {
            event: "user.authenticationfailed".to_string(),
            ..Default::default()
        };
        assert!(login.is_login());
    }
}
