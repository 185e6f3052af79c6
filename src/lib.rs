pub mod config;
pub mod episodes;
pub mod error;
pub mod mediaserver;
pub mod notifications;
pub mod refresh;
pub mod server;
pub mod sync;
pub mod webhook;

pub use config::Config;
pub use error::{BridgeError, Result};
pub use mediaserver::MediaServerClient;
pub use notifications::{Notification, NotificationSink};
pub use refresh::RefreshCoalescer;
pub use sync::batcher::NotificationBatcher;
pub use sync::watcher::DirectoryWatcher;
pub use sync::SyncEngine;
pub use webhook::WebhookAggregator;
