//! Service configuration.
//!
//! Loaded from a TOML file; missing file falls back to defaults. The
//! monitor-rule, path-replacement and extension-list fields keep the
//! compact line-oriented grammar users already know, so they are stored
//! raw and parsed into typed values once at startup.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{error, warn};

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub refresh: RefreshConfig,
    pub notify: NotifyConfig,
    pub webhook: WebhookConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SyncConfig {
    /// One mapping per line: `source#pointer#upstream#template`, with
    /// optional `@category` and `$monitor` suffixes. Lines starting
    /// with `#` are comments.
    pub rules: String,
    /// Watch the source roots live (full scans work either way).
    pub monitor: bool,
    /// Overwrite existing pointer files instead of skipping them.
    pub overwrite: bool,
    pub copy_other_files: bool,
    pub copy_subtitles: bool,
    /// Percent-encode the `{cloud_file}` substitution.
    pub url_encode: bool,
    pub media_extensions: String,
    pub other_extensions: String,
    pub subtitle_extensions: String,
    /// Literal content replacements, one `from:to` per line.
    pub path_replacements: String,
    /// Optional endpoint receiving `{"path":…,"type":"add"}` per new pointer.
    pub task_push_url: Option<String>,
    /// Seconds between directory-poll passes of the live watcher.
    pub poll_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            rules: String::new(),
            monitor: true,
            overwrite: false,
            copy_other_files: true,
            copy_subtitles: true,
            url_encode: false,
            media_extensions: ".mp4, .mkv, .ts, .iso, .rmvb, .avi, .mov, .mpeg, .mpg, .wmv, \
                               .3gp, .asf, .m4v, .flv, .m2ts, .strm, .tp, .f4v"
                .to_string(),
            other_extensions: ".nfo, .jpg, .png, .json".to_string(),
            subtitle_extensions: ".srt, .ass, .ssa, .sub".to_string(),
            path_replacements: String::new(),
            task_push_url: None,
            poll_secs: 10,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RefreshMode {
    Periodic,
    Debounce,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RefreshTarget {
    ExactPath,
    ParentDirectory,
    Mapped,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RefreshConfig {
    pub enabled: bool,
    pub mode: RefreshMode,
    /// Periodic mode: seconds between queue drains.
    pub interval_secs: u64,
    /// Debounce mode: quiet period after the last enqueue.
    pub debounce_secs: u64,
    pub target: RefreshTarget,
    /// Media server base URL, e.g. `http://emby:8096/emby`.
    pub base_url: String,
    pub api_key: Option<String>,
    /// Prefix rewrites applied to refresh targets, `prefix:to` entries
    /// separated by commas or newlines. First match in listed order wins.
    pub path_rewrites: String,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: RefreshMode::Periodic,
            interval_secs: 15,
            debounce_secs: 30,
            target: RefreshTarget::ParentDirectory,
            base_url: String::new(),
            api_key: None,
            path_rewrites: String::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct NotifyConfig {
    pub enabled: bool,
    pub webhook_url: Option<String>,
    /// Quiet period before a per-title batch is flushed.
    pub message_delay_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            webhook_url: None,
            message_delay_secs: 10,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct WebhookConfig {
    pub enabled: bool,
    /// Enabled event types; an entry may be a pipe-delimited alias group
    /// such as `playback.start|media.play|PlaybackStart`.
    pub event_types: Vec<String>,
    /// Only accept events from these server names (empty = any).
    pub servers: Vec<String>,
    pub aggregate: bool,
    /// Per-series quiet period before an aggregated message goes out.
    pub aggregate_secs: u64,
    pub overview_max_len: usize,
    pub add_play_link: bool,
    /// `{item_id}` is substituted to build the deep link.
    pub play_url_template: Option<String>,
    /// Artwork used when neither metadata nor the event carries any.
    pub fallback_image: Option<String>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            event_types: Vec::new(),
            servers: Vec::new(),
            aggregate: true,
            aggregate_secs: 15,
            overview_max_len: 150,
            add_play_link: false,
            play_url_template: None,
            fallback_image: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8900".to_string(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

/// One configured source → pointer mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorRule {
    pub source_root: String,
    pub pointer_root: String,
    pub upstream_root: String,
    pub content_template: String,
    pub category: Option<String>,
}

impl MonitorRule {
    /// Parse one `source#pointer#upstream#template[@category][$flag]` line.
    /// Returns `None` for comments, blanks and malformed lines.
    fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        // The `$flag` suffix used to carry a per-rule monitor switch; the
        // global switch replaced it, so it is stripped and ignored.
        let line = line.split_once('$').map_or(line, |(head, _)| head);

        let (line, category) = match line.split_once('@') {
            Some((head, tag)) if !tag.trim().is_empty() => {
                (head, Some(tag.trim().to_string()))
            }
            Some((head, _)) => (head, None),
            None => (line, None),
        };

        let parts: Vec<&str> = line.split('#').collect();
        if parts.len() != 4 {
            error!("Malformed monitor rule (expected 4 '#'-separated fields): {line}");
            return None;
        }

        Some(Self {
            source_root: parts[0].trim().to_string(),
            pointer_root: parts[1].trim().to_string(),
            upstream_root: parts[2].trim().to_string(),
            content_template: parts[3].trim().to_string(),
            category,
        })
    }
}

/// Parse the multi-line rule block, dropping malformed lines and rules
/// whose pointer root would sit under the watched source root (the
/// watcher would chase its own output).
pub fn parse_rules(raw: &str) -> Vec<MonitorRule> {
    let mut rules = Vec::new();
    for line in raw.lines() {
        let Some(rule) = MonitorRule::parse(line) else {
            continue;
        };
        if Path::new(&rule.pointer_root).starts_with(&rule.source_root) {
            warn!(
                "{} is inside watched root {}, rule skipped",
                rule.pointer_root, rule.source_root
            );
            continue;
        }
        rules.push(rule);
    }
    rules
}

/// Ordered literal `from:to` pairs applied to generated pointer content.
pub fn parse_replacements(raw: &str) -> Vec<(String, String)> {
    raw.lines()
        .filter_map(|line| {
            let line = line.trim();
            let (from, to) = line.split_once(':')?;
            let from = from.trim();
            if from.is_empty() {
                return None;
            }
            Some((from.to_string(), to.trim().to_string()))
        })
        .collect()
}

/// Ordered `prefix:to` rewrite pairs, comma- or newline-delimited.
pub fn parse_rewrites(raw: &str) -> Vec<(String, String)> {
    raw.split(['\n', ','])
        .filter_map(|entry| {
            let entry = entry.trim();
            let (prefix, to) = entry.split_once(':')?;
            let prefix = prefix.trim();
            if prefix.is_empty() {
                return None;
            }
            Some((prefix.to_string(), to.trim().to_string()))
        })
        .collect()
}

/// Comma-delimited extension list, normalized to lowercase with a
/// leading dot.
pub fn parse_extensions(raw: &str) -> HashSet<String> {
    raw.split(',')
        .filter_map(|ext| {
            let ext = ext.trim().to_lowercase();
            if ext.is_empty() {
                return None;
            }
            Some(if ext.starts_with('.') {
                ext
            } else {
                format!(".{ext}")
            })
        })
        .collect()
}

/// Lowercased `.ext` of a path, if any.
pub fn path_extension(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
}
