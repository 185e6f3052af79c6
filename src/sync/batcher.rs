//! Per-title accumulation of pointer-creation notifications.
//!
//! A season dropping thirty episodes at once should produce one
//! message, not thirty. Entries are keyed by title/year/season; a
//! periodic sweep flushes whatever has been quiet long enough. Movies
//! have nothing to accumulate and flush on the next sweep regardless.

use crate::episodes::compress_episodes;
use crate::notifications::{Notification, NotificationSink};
use crate::sync::meta::{MediaKind, MediaMeta};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(15);

struct PendingTitle {
    episodes: BTreeSet<u32>,
    kind: MediaKind,
    last_update: Instant,
}

pub struct NotificationBatcher {
    entries: Mutex<HashMap<String, PendingTitle>>,
    quiet_period: Duration,
    sink: Arc<dyn NotificationSink>,
}

impl NotificationBatcher {
    pub fn new(quiet_period: Duration, sink: Arc<dyn NotificationSink>) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            quiet_period,
            sink,
        })
    }

    /// Fold one created pointer into its title's entry.
    pub fn record(&self, meta: &MediaMeta) {
        let key = meta.aggregation_key();
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(e) => {
                error!("Failed to lock notification batch: {}", e);
                return;
            }
        };

        let entry = entries.entry(key.clone()).or_insert_with(|| PendingTitle {
            episodes: BTreeSet::new(),
            kind: meta.kind(),
            last_update: Instant::now(),
        });
        if let Some(episode) = meta.episode {
            entry.episodes.insert(episode);
        }
        entry.last_update = Instant::now();
        debug!("Batched notification for {key}");
    }

    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let batcher = self;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                batcher.sweep().await;
            }
        })
    }

    /// Flush every entry that is a movie or has been quiet past the
    /// threshold. The lock is released before any message goes out.
    pub async fn sweep(&self) {
        let due: Vec<(String, PendingTitle)> = {
            let mut entries = match self.entries.lock() {
                Ok(guard) => guard,
                Err(e) => {
                    error!("Failed to lock notification batch: {}", e);
                    return;
                }
            };
            let keys: Vec<String> = entries
                .iter()
                .filter(|(_, entry)| {
                    entry.kind == MediaKind::Movie
                        || entry.last_update.elapsed() >= self.quiet_period
                })
                .map(|(key, _)| key.clone())
                .collect();
            keys.into_iter()
                .filter_map(|key| entries.remove(&key).map(|entry| (key, entry)))
                .collect()
        };

        for (key, entry) in due {
            let message = Self::compose(&key, &entry);
            if let Err(e) = self.sink.send(&message).await {
                error!("Failed to send batched notification for {}: {}", key, e);
            } else {
                info!("Sent batched notification for {}", key);
            }
        }
    }

    fn compose(key: &str, entry: &PendingTitle) -> Notification {
        let file_count = entry.episodes.len().max(1);
        let title = if entry.episodes.is_empty() {
            format!("{key} pointer files ready")
        } else {
            format!("{key} {} pointer files ready", compress_episodes(&entry.episodes))
        };
        Notification {
            title,
            text: format!("{file_count} file(s)"),
            image: None,
            link: None,
        }
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::testing::RecordingSink;
    use crate::sync::meta::MediaMeta;

    fn episode(title: &str, season: u32, episode: u32) -> MediaMeta {
        MediaMeta {
            title: title.to_string(),
            year: Some(2024),
            season: Some(season),
            episode: Some(episode),
            tmdb_id: None,
        }
    }

    fn movie(title: &str) -> MediaMeta {
        MediaMeta {
            title: title.to_string(),
            year: Some(2016),
            season: None,
            episode: None,
            tmdb_id: None,
        }
    }

    #[tokio::test]
    async fn test_movie_flushes_on_first_sweep() {
        let sink = Arc::new(RecordingSink::default());
        let batcher = NotificationBatcher::new(Duration::from_secs(60), sink.clone());

        batcher.record(&movie("Arrival"));
        batcher.sweep().await;

        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].title.starts_with("Arrival (2016)"));
        assert_eq!(batcher.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_series_waits_for_quiet_period() {
        let sink = Arc::new(RecordingSink::default());
        let batcher = NotificationBatcher::new(Duration::from_millis(150), sink.clone());

        batcher.record(&episode("ShowX", 1, 1));
        batcher.record(&episode("ShowX", 1, 2));
        batcher.record(&episode("ShowX", 1, 3));

        // still inside the quiet period: nothing goes out
        batcher.sweep().await;
        assert!(sink.sent.lock().unwrap().is_empty());
        assert_eq!(batcher.pending_len(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        batcher.sweep().await;

        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].title, "ShowX (2024) S01 E01-E03 pointer files ready");
        assert_eq!(sent[0].text, "3 file(s)");
    }

    #[tokio::test]
    async fn test_duplicate_episodes_collapse() {
        let sink = Arc::new(RecordingSink::default());
        let batcher = NotificationBatcher::new(Duration::from_millis(50), sink.clone());

        batcher.record(&episode("ShowX", 1, 7));
        batcher.record(&episode("ShowX", 1, 7));

        tokio::time::sleep(Duration::from_millis(100)).await;
        batcher.sweep().await;

        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].text, "1 file(s)");
    }
}
