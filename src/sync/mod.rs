//! Source-tree synchronization: one file event in, at most one pointer
//! file (plus sidecars and downstream signals) out.

pub mod batcher;
pub mod mapper;
pub mod meta;
pub mod scanner;
pub mod strm;
pub mod watcher;

use crate::config::{self, Config, MonitorRule};
use crate::error::Result;
use crate::mediaserver::MediaServerClient;
use crate::refresh::RefreshCoalescer;
use crate::sync::batcher::NotificationBatcher;
use crate::sync::scanner::Scanner;
use crate::sync::strm::{SidecarCopier, StrmWriter, WriteOutcome};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// What a handled event produced, for the post-lock cascade.
struct SyncEffects {
    pointer_path: PathBuf,
    /// The written pointer content references a media file (as opposed
    /// to e.g. a bare directory URL); only those feed notifications.
    media_content: bool,
}

pub struct SyncEngine {
    rules: Vec<MonitorRule>,
    media_extensions: HashSet<String>,
    url_encode: bool,
    task_push_url: Option<String>,
    writer: StrmWriter,
    sidecars: SidecarCopier,
    /// Serializes all file handling. Pointer writes are cheap; keeping
    /// one writer at a time keeps shared queue state simple.
    guard: Mutex<()>,
    client: Arc<MediaServerClient>,
    refresh: Option<Arc<RefreshCoalescer>>,
    batcher: Option<Arc<NotificationBatcher>>,
}

impl SyncEngine {
    pub fn new(
        config: &Config,
        client: Arc<MediaServerClient>,
        refresh: Option<Arc<RefreshCoalescer>>,
        batcher: Option<Arc<NotificationBatcher>>,
    ) -> Arc<Self> {
        let sync = &config.sync;
        Arc::new(Self {
            rules: config::parse_rules(&sync.rules),
            media_extensions: config::parse_extensions(&sync.media_extensions),
            url_encode: sync.url_encode,
            task_push_url: sync.task_push_url.clone(),
            writer: StrmWriter::new(
                sync.overwrite,
                config::parse_replacements(&sync.path_replacements),
            ),
            sidecars: SidecarCopier::new(
                sync.copy_other_files,
                sync.copy_subtitles,
                config::parse_extensions(&sync.other_extensions),
                config::parse_extensions(&sync.subtitle_extensions),
            ),
            guard: Mutex::new(()),
            client,
            refresh,
            batcher,
        })
    }

    pub fn rules(&self) -> &[MonitorRule] {
        &self.rules
    }

    pub fn source_roots(&self) -> Vec<PathBuf> {
        self.rules
            .iter()
            .map(|rule| PathBuf::from(&rule.source_root))
            .collect()
    }

    /// Longest matching source root wins so nested roots behave
    /// predictably.
    fn resolve_rule(&self, path: &str) -> Option<&MonitorRule> {
        self.rules
            .iter()
            .filter(|rule| path.starts_with(&rule.source_root))
            .max_by_key(|rule| rule.source_root.len())
    }

    /// Handle one file event end to end. Errors are logged here and the
    /// event dropped; one bad file must never take the watcher down.
    pub async fn handle_event(&self, path: &Path) {
        let path_str = path.to_string_lossy().to_string();
        let Some(rule) = self.resolve_rule(&path_str) else {
            error!("No monitored root covers {:?}", path);
            return;
        };
        // the file may have vanished between event and handling
        if !path.is_file() {
            return;
        }

        let effects = {
            let _guard = self.guard.lock().await;
            match self.sync_file(path, &path_str, rule) {
                Ok(effects) => effects,
                Err(e) => {
                    error!("Sync failed for {:?}: {}", path, e);
                    return;
                }
            }
        };

        // outbound work happens with the lock released
        if let Some(effects) = effects {
            if effects.media_content {
                if let Some(url) = &self.task_push_url {
                    let pointer = effects.pointer_path.to_string_lossy();
                    if let Err(e) = self.client.push_task(url, &pointer).await {
                        error!("Task push failed for {:?}: {}", effects.pointer_path, e);
                    }
                }
                if let Some(batcher) = &self.batcher {
                    batcher.record(&meta::parse_path(&effects.pointer_path));
                }
            }
            if let Some(refresh) = &self.refresh {
                refresh.enqueue(&effects.pointer_path);
            }
        }
    }

    /// The filesystem half of event handling; runs under the sync lock.
    fn sync_file(
        &self,
        path: &Path,
        path_str: &str,
        rule: &MonitorRule,
    ) -> Result<Option<SyncEffects>> {
        let pointer_target = mapper::map_to(path_str, &rule.source_root, &rule.pointer_root);
        let upstream = mapper::map_to(path_str, &rule.source_root, &rule.upstream_root);

        let extension = config::path_extension(path);
        let is_media = extension
            .as_deref()
            .is_some_and(|ext| self.media_extensions.contains(ext));

        if !is_media {
            // non-media files go straight through the sidecar gate
            if let Err(e) = self
                .sidecars
                .copy_matching(path, Path::new(&pointer_target))
            {
                warn!("Sidecar copy failed for {:?}: {}", path, e);
            }
            return Ok(None);
        }

        let Some(content) =
            mapper::format_content(&rule.content_template, path_str, &upstream, self.url_encode)
        else {
            warn!(
                "Template for {} has no {{local_file}}/{{cloud_file}} placeholder, skipping",
                rule.source_root
            );
            return Ok(None);
        };

        let pointer_target = PathBuf::from(pointer_target);
        match self.writer.write(&pointer_target, &content)? {
            WriteOutcome::Skipped => Ok(None),
            WriteOutcome::Created => {
                // a fresh pointer pulls its nfo/artwork/subtitles along
                for sibling in SidecarCopier::siblings(path) {
                    let sibling_str = sibling.to_string_lossy();
                    let dest =
                        mapper::map_to(&sibling_str, &rule.source_root, &rule.pointer_root);
                    if let Err(e) = self.sidecars.copy_matching(&sibling, Path::new(&dest)) {
                        warn!("Sidecar copy failed for {:?}: {}", sibling, e);
                    }
                }

                let media_content = config::path_extension(Path::new(&content))
                    .is_some_and(|ext| self.media_extensions.contains(&ext));
                Ok(Some(SyncEffects {
                    pointer_path: pointer_target.with_extension("strm"),
                    media_content,
                }))
            }
        }
    }

    /// Full pass over every configured source root.
    pub async fn full_scan(&self) {
        info!("Starting full sync run");
        let files = Scanner::scan_roots(&self.source_roots());
        for (_root, file) in files {
            self.handle_event(&file).await;
        }
        info!("Full sync run complete");
    }

    /// Targeted re-sync of one file or subtree.
    pub async fn sync_path(&self, path: &Path) {
        if path.is_file() {
            self.handle_event(path).await;
            return;
        }
        if !path.is_dir() {
            warn!("Sync target {:?} does not exist", path);
            return;
        }
        for file in Scanner::scan_subtree(path) {
            self.handle_event(&file).await;
        }
    }

    /// Re-sync the `limit` most recently changed subdirectories of the
    /// directory a category tag maps to.
    pub async fn sync_category_latest(&self, category: &str, limit: usize) {
        let Some(rule) = self
            .rules
            .iter()
            .find(|rule| rule.category.as_deref() == Some(category))
        else {
            error!("No monitor rule carries category {category}");
            return;
        };
        let base = Path::new(&rule.source_root).join(category);
        let latest = Scanner::latest_subdirs(&base, limit);
        if latest.is_empty() {
            warn!("No subdirectories under {:?}", base);
            return;
        }
        for dir in latest {
            debug!("Targeted sync of {:?}", dir);
            self.sync_path(&dir).await;
        }
    }
}
