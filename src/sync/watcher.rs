//! Live filesystem monitoring for the configured source roots.
//!
//! Polling watchers are used deliberately: the roots are typically
//! network or FUSE mounts where inotify either misses events or is not
//! available at all. Subscription happens off the startup path because
//! those same mounts may appear minutes after boot.

use crate::error::{BridgeError, Result};
use crate::sync::scanner::is_excluded;
use notify::event::ModifyKind;
use notify::{Config as NotifyConfig, Event, EventKind, PollWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

const MOUNT_WAIT_RETRIES: u32 = 12;
const MOUNT_WAIT_SLEEP: Duration = Duration::from_secs(10);

pub struct DirectoryWatcher {
    roots: Vec<PathBuf>,
    poll_interval: Duration,
    watchers: Mutex<Vec<PollWatcher>>,
}

impl DirectoryWatcher {
    pub fn new(roots: Vec<PathBuf>, poll_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            roots,
            poll_interval,
            watchers: Mutex::new(Vec::new()),
        })
    }

    /// Start one background subscription task per root. Each task waits
    /// (bounded) for its mount to appear; a root that never shows up is
    /// skipped with an error while the others keep going, so a dead
    /// mount can never wedge startup.
    pub fn start(self: Arc<Self>, tx: mpsc::Sender<(PathBuf, PathBuf)>) {
        for root in self.roots.clone() {
            let watcher = Arc::clone(&self);
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut retries = MOUNT_WAIT_RETRIES;
                while !root.exists() && retries > 0 {
                    info!(
                        "Watch root {:?} not ready, waiting for mount ({} retries left)",
                        root, retries
                    );
                    tokio::time::sleep(MOUNT_WAIT_SLEEP).await;
                    retries -= 1;
                }
                if !root.exists() {
                    error!(
                        "Watch root {:?} is unreachable, live monitoring skipped",
                        root
                    );
                    return;
                }
                match watcher.subscribe(&root, tx) {
                    Ok(()) => info!("Live monitoring started for {:?}", root),
                    Err(e) => error!("Failed to start watching {:?}: {}", root, e),
                }
            });
        }
    }

    fn subscribe(&self, root: &Path, tx: mpsc::Sender<(PathBuf, PathBuf)>) -> Result<()> {
        let event_root = root.to_path_buf();
        let callback_root = event_root.clone();

        let mut watcher = PollWatcher::new(
            move |res: notify::Result<Event>| {
                let Ok(event) = res else {
                    return;
                };
                if !matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(_))
                ) {
                    return;
                }
                for path in event.paths {
                    if is_excluded(&path, &callback_root) {
                        continue;
                    }
                    // directory events and files deleted mid-flight drop here
                    if !path.is_file() {
                        continue;
                    }
                    debug!("Watched file event: {:?}", path);
                    if tx.blocking_send((callback_root.clone(), path)).is_err() {
                        return;
                    }
                }
            },
            NotifyConfig::default().with_poll_interval(self.poll_interval),
        )
        .map_err(|e| BridgeError::Watch(format!("Failed to create watcher: {e}")))?;

        watcher
            .watch(&event_root, RecursiveMode::Recursive)
            .map_err(|e| BridgeError::Watch(format!("Failed to watch {:?}: {e}", event_root)))?;

        match self.watchers.lock() {
            Ok(mut guard) => guard.push(watcher),
            Err(e) => error!("Failed to store watcher handle: {}", e),
        }
        Ok(())
    }

    /// Drop all live subscriptions.
    pub fn stop(&self) {
        if let Ok(mut guard) = self.watchers.lock() {
            guard.clear();
        }
    }
}
