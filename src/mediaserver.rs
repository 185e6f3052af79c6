//! Media-server HTTP surface: library refresh and the generic task push.

use crate::error::{BridgeError, Result};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct MediaServerClient {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl MediaServerClient {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client: reqwest::Client::new(),
        }
    }

    /// Ask the media index to rescan one path. 200 and 204 both count
    /// as success.
    pub async fn refresh_path(&self, path: &str) -> Result<()> {
        #[derive(Serialize)]
        struct Update<'a> {
            #[serde(rename = "Path")]
            path: &'a str,
            #[serde(rename = "UpdateType")]
            update_type: &'a str,
        }

        #[derive(Serialize)]
        struct Body<'a> {
            #[serde(rename = "Updates")]
            updates: [Update<'a>; 1],
        }

        let body = Body {
            updates: [Update {
                path,
                update_type: "Modified",
            }],
        };

        let url = format!("{}/Library/Media/Updated", self.base_url);
        let mut request = self
            .client
            .post(&url)
            .json(&body)
            .timeout(REQUEST_TIMEOUT);
        if let Some(key) = &self.api_key {
            request = request.header("X-Emby-Token", key);
        }

        let response = request.send().await?;
        match response.status().as_u16() {
            200 | 204 => {
                debug!("Refresh accepted for {}", path);
                Ok(())
            }
            status => Err(BridgeError::MediaServer(format!(
                "refresh of {path} returned {status}"
            ))),
        }
    }

    /// Push a newly created pointer to an arbitrary downstream task
    /// endpoint: `{"path": …, "type": "add"}`.
    pub async fn push_task(&self, url: &str, path: &str) -> Result<()> {
        #[derive(Serialize)]
        struct Body<'a> {
            path: &'a str,
            #[serde(rename = "type")]
            kind: &'a str,
        }

        let response = self
            .client
            .post(url)
            .json(&Body { path, kind: "add" })
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BridgeError::MediaServer(format!(
                "task push returned {}",
                response.status()
            )));
        }
        debug!("Task push accepted for {}", path);
        Ok(())
    }
}
