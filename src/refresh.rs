//! Library-refresh coalescing.
//!
//! Pointer creation can arrive in bursts of hundreds of files; the
//! media server wants one rescan per directory, not one per file. New
//! targets land in a deduplicating pending set, and a flush policy
//! (fixed-interval or debounce) drains the whole set in one batch.

use crate::config::{RefreshMode, RefreshTarget};
use crate::mediaserver::MediaServerClient;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

pub struct RefreshCoalescer {
    pending: Mutex<HashSet<PathBuf>>,
    /// Debounce signal; the stored permit means a kick sent before the
    /// flush task is listening is never lost.
    kick: Notify,
    rewrites: Vec<(String, String)>,
    target: RefreshTarget,
    client: Arc<MediaServerClient>,
}

impl RefreshCoalescer {
    pub fn new(
        client: Arc<MediaServerClient>,
        target: RefreshTarget,
        rewrites: Vec<(String, String)>,
    ) -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(HashSet::new()),
            kick: Notify::new(),
            rewrites,
            target,
            client,
        })
    }

    /// Queue a refresh for the pointer at `path`, resolved per the
    /// configured target strategy. Duplicate targets within one batch
    /// collapse by set membership.
    pub fn enqueue(&self, path: &Path) {
        let target = match self.target {
            RefreshTarget::ExactPath => path.to_path_buf(),
            RefreshTarget::ParentDirectory => {
                path.parent().map(Path::to_path_buf).unwrap_or_else(|| path.to_path_buf())
            }
            RefreshTarget::Mapped => PathBuf::from(self.rewrite(&path.to_string_lossy())),
        };

        match self.pending.lock() {
            Ok(mut pending) => {
                debug!("Queued refresh target {:?}", target);
                pending.insert(target);
            }
            Err(e) => {
                error!("Failed to lock refresh queue: {}", e);
                return;
            }
        }
        self.kick.notify_one();
    }

    /// Spawn the flush policy task.
    pub fn spawn(self: Arc<Self>, mode: RefreshMode, every: Duration) -> JoinHandle<()> {
        let coalescer = self;
        match mode {
            RefreshMode::Periodic => tokio::spawn(async move {
                loop {
                    tokio::time::sleep(every).await;
                    coalescer.flush().await;
                }
            }),
            RefreshMode::Debounce => tokio::spawn(async move {
                loop {
                    // wait for the first signal of a burst
                    coalescer.kick.notified().await;
                    // then keep restarting the countdown while signals
                    // keep arriving; only a full quiet period flushes
                    loop {
                        tokio::select! {
                            _ = tokio::time::sleep(every) => {
                                coalescer.flush().await;
                                break;
                            }
                            _ = coalescer.kick.notified() => {}
                        }
                    }
                }
            }),
        }
    }

    /// Drain the pending set atomically and refresh every distinct
    /// target. One failing path never stops the rest of the batch.
    pub async fn flush(&self) {
        let batch: Vec<PathBuf> = match self.pending.lock() {
            Ok(mut pending) => {
                if pending.is_empty() {
                    return;
                }
                pending.drain().collect()
            }
            Err(e) => {
                error!("Failed to lock refresh queue: {}", e);
                return;
            }
        };

        info!("Flushing refresh batch of {} paths", batch.len());
        for path in batch {
            let target = self.rewrite(&path.to_string_lossy());
            if let Err(e) = self.client.refresh_path(&target).await {
                error!("Refresh failed for {}: {}", target, e);
            } else {
                info!("Refreshed {}", target);
            }
        }
    }

    /// First configured prefix match wins; later (possibly longer)
    /// prefixes are intentionally not preferred; rule order is the
    /// contract.
    fn rewrite(&self, path: &str) -> String {
        for (prefix, to) in &self.rewrites {
            if let Some(rest) = path.strip_prefix(prefix.as_str()) {
                return format!("{to}{rest}");
            }
        }
        path.to_string()
    }

    #[cfg(test)]
    pub fn pending_snapshot(&self) -> Vec<PathBuf> {
        let mut v: Vec<PathBuf> = self.pending.lock().unwrap().iter().cloned().collect();
        v.sort();
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coalescer(target: RefreshTarget, rewrites: Vec<(String, String)>) -> Arc<RefreshCoalescer> {
        let client = Arc::new(MediaServerClient::new("http://127.0.0.1:1".to_string(), None));
        RefreshCoalescer::new(client, target, rewrites)
    }

    #[tokio::test]
    async fn test_enqueue_dedupes_targets() {
        let c = coalescer(RefreshTarget::ParentDirectory, Vec::new());
        c.enqueue(Path::new("/ptr/ShowX/S01E01.strm"));
        c.enqueue(Path::new("/ptr/ShowX/S01E02.strm"));
        c.enqueue(Path::new("/ptr/ShowX/S01E03.strm"));
        assert_eq!(c.pending_snapshot(), vec![PathBuf::from("/ptr/ShowX")]);
    }

    #[tokio::test]
    async fn test_target_strategies() {
        let exact = coalescer(RefreshTarget::ExactPath, Vec::new());
        exact.enqueue(Path::new("/ptr/ShowX/S01E01.strm"));
        assert_eq!(
            exact.pending_snapshot(),
            vec![PathBuf::from("/ptr/ShowX/S01E01.strm")]
        );

        let mapped = coalescer(
            RefreshTarget::Mapped,
            vec![("/ptr".to_string(), "/media".to_string())],
        );
        mapped.enqueue(Path::new("/ptr/ShowX/S01E01.strm"));
        assert_eq!(
            mapped.pending_snapshot(),
            vec![PathBuf::from("/media/ShowX/S01E01.strm")]
        );
    }

    async fn spawn_counting_server() -> (String, Arc<std::sync::atomic::AtomicUsize>) {
        use axum::{routing::post, Router};
        use std::sync::atomic::{AtomicUsize, Ordering};

        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let app = Router::new().route(
            "/Library/Media/Updated",
            post(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    axum::http::StatusCode::NO_CONTENT
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), count)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_debounce_coalesces_to_single_call() {
        use std::sync::atomic::Ordering;

        let (base, count) = spawn_counting_server().await;
        let client = Arc::new(MediaServerClient::new(base, None));
        let c = RefreshCoalescer::new(client, RefreshTarget::ParentDirectory, Vec::new());
        let handle = c.clone().spawn(RefreshMode::Debounce, Duration::from_millis(300));

        c.enqueue(Path::new("/ptr/ShowX/S01E01.strm"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        c.enqueue(Path::new("/ptr/ShowX/S01E02.strm"));

        // the second enqueue restarted the countdown, so nothing may
        // flush before a full quiet period measured from it
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(450)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(c.pending_snapshot().is_empty());
        handle.abort();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_periodic_flush_drains_batch() {
        use std::sync::atomic::Ordering;

        let (base, count) = spawn_counting_server().await;
        let client = Arc::new(MediaServerClient::new(base, None));
        let c = RefreshCoalescer::new(client, RefreshTarget::ParentDirectory, Vec::new());
        let handle = c.clone().spawn(RefreshMode::Periodic, Duration::from_millis(200));

        c.enqueue(Path::new("/ptr/ShowX/S01E01.strm"));
        c.enqueue(Path::new("/ptr/ShowY/S02E01.strm"));

        tokio::time::sleep(Duration::from_millis(600)).await;
        // two distinct parent dirs, one call each, queue drained
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(c.pending_snapshot().is_empty());
        handle.abort();
    }

    #[tokio::test]
    async fn test_rewrite_first_match_wins() {
        let c = coalescer(
            RefreshTarget::ExactPath,
            vec![
                ("/a".to_string(), "/first".to_string()),
                ("/a/b".to_string(), "/longer".to_string()),
            ],
        );
        // configuration order, not longest prefix
        assert_eq!(c.rewrite("/a/b/c.strm"), "/first/b/c.strm");
        assert_eq!(c.rewrite("/z/c.strm"), "/z/c.strm");
    }
}
